//! Configuration and settings management
//!
//! Loads settings from config files and environment variables and defines the
//! engine tuning knobs (worker count, queue capacity, rate limits, timeouts).

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Telegram Bot API token
    pub telegram_token: String,

    /// API key for the OpenAI-compatible responder
    pub ai_api_key: Option<String>,
    /// Base URL of the OpenAI-compatible responder
    #[serde(default = "default_ai_api_base")]
    pub ai_api_base: String,
    /// Model identifier passed to the responder
    #[serde(default = "default_ai_model")]
    pub ai_model: String,
    /// System prompt for the shop assistant
    pub system_message: Option<String>,

    /// Password for `/admin` login
    pub admin_password: Option<String>,
    /// Comma-separated list of chat IDs notified about new orders
    #[serde(rename = "admin_chat_ids")]
    pub admin_chat_ids_str: Option<String>,

    /// Engine tuning
    #[serde(default)]
    pub engine: EngineSettings,
}

fn default_ai_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_ai_model() -> String {
    "gpt-4o-mini".to_string()
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails or engine limits are invalid.
    pub fn new() -> Result<Self, ConfigError> {
        let settings: Self = build_config()?.try_deserialize()?;
        settings.engine.validate()?;
        Ok(settings)
    }

    /// Returns the set of chat IDs that receive order notifications
    #[must_use]
    pub fn admin_chat_ids(&self) -> HashSet<i64> {
        parse_id_list(self.admin_chat_ids_str.as_deref())
    }
}

/// Build the layered configuration source shared by all settings structs.
///
/// # Errors
///
/// Returns a `ConfigError` if a present source cannot be parsed.
pub fn build_config() -> Result<Config, ConfigError> {
    let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

    Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
        // Local overrides, not checked into git
        .add_source(File::with_name("config/local").required(false))
        // Prefixed overrides, `__` separates nested keys such as `engine.workers`
        .add_source(Environment::with_prefix("APP").separator("__"))
        // UPPER_SNAKE_CASE env vars map to snake_case keys; empty values count as unset
        .add_source(Environment::default().ignore_empty(true))
        .build()
}

fn parse_id_list(raw: Option<&str>) -> HashSet<i64> {
    raw.map(|s| {
        s.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
            .filter(|token| !token.is_empty())
            .filter_map(|id| id.parse::<i64>().ok())
            .collect()
    })
    .unwrap_or_default()
}

/// Tuning knobs of the request-processing engine.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct EngineSettings {
    /// Number of pool workers (`W`)
    pub workers: usize,
    /// Capacity of the pool queue (`Q`)
    pub queue_capacity: usize,
    /// Allowed AI turns per actor per window (`R`)
    pub rate_limit_per_window: u32,
    /// Rate limit window length in milliseconds
    pub rate_limit_window_ms: u64,
    /// How often the limiter sweeps idle entries (`C`), seconds
    pub limiter_cleanup_interval_secs: u64,
    /// Idle time after which a limiter entry is dropped (`I`), seconds
    pub limiter_max_idle_secs: u64,
    /// Hard cap on limiter entries (`M`)
    pub limiter_max_entries: usize,
    /// Timeout for a single responder call (`T`), seconds
    pub ai_timeout_secs: u64,
    /// Response cache entry lifetime, seconds
    pub cache_ttl_secs: u64,
    /// Response cache capacity
    pub cache_max_entries: usize,
    /// Flow sessions idle longer than this are evicted, seconds
    pub session_idle_timeout_secs: u64,
    /// Interval of the TTL reaper (`C2`), seconds
    pub reaper_interval_secs: u64,
    /// Processing flags older than this are force-cleared, seconds
    pub processing_max_age_secs: u64,
    /// Pending approvals expire after this many seconds
    pub approval_ttl_secs: u64,
    /// Interval between escalating "still working" notices, seconds
    pub wait_notice_interval_secs: u64,
    /// Optional bound on concurrently handled inbound events (unbounded if unset)
    pub dispatcher_max_in_flight: Option<usize>,
    /// Lifetime of an admin login, seconds
    pub admin_grant_ttl_secs: u64,
    /// Upper bound for reminder delays, minutes
    pub max_reminder_delay_mins: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKERS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            rate_limit_per_window: DEFAULT_RATE_LIMIT_PER_WINDOW,
            rate_limit_window_ms: RATE_LIMIT_WINDOW_MS,
            limiter_cleanup_interval_secs: 300,
            limiter_max_idle_secs: 600,
            limiter_max_entries: 10_000,
            ai_timeout_secs: DEFAULT_AI_TIMEOUT_SECS,
            cache_ttl_secs: 300,
            cache_max_entries: 1_000,
            session_idle_timeout_secs: 1_800, // 30 minutes
            reaper_interval_secs: 60,
            processing_max_age_secs: 300,
            approval_ttl_secs: 86_400, // 24 hours
            wait_notice_interval_secs: 15,
            dispatcher_max_in_flight: None,
            admin_grant_ttl_secs: 3_600,
            max_reminder_delay_mins: 7 * 24 * 60,
        }
    }
}

impl EngineSettings {
    /// Reject settings that would make the engine unusable.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Message` naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks = [
            (self.workers == 0, "engine.workers must be at least 1"),
            (self.queue_capacity == 0, "engine.queue_capacity must be at least 1"),
            (
                self.rate_limit_per_window == 0,
                "engine.rate_limit_per_window must be at least 1",
            ),
            (
                self.rate_limit_window_ms == 0,
                "engine.rate_limit_window_ms must be positive",
            ),
            (self.ai_timeout_secs == 0, "engine.ai_timeout_secs must be positive"),
            (self.reaper_interval_secs == 0, "engine.reaper_interval_secs must be positive"),
            (
                self.limiter_cleanup_interval_secs == 0,
                "engine.limiter_cleanup_interval_secs must be positive",
            ),
            (
                self.dispatcher_max_in_flight == Some(0),
                "engine.dispatcher_max_in_flight must be at least 1 when set",
            ),
            (
                self.processing_max_age_secs <= self.ai_timeout_secs,
                "engine.processing_max_age_secs must exceed engine.ai_timeout_secs",
            ),
        ];
        match checks.iter().find(|(failed, _)| *failed) {
            Some((_, message)) => Err(ConfigError::Message((*message).to_string())),
            None => Ok(()),
        }
    }

    /// Rate limit window length
    #[must_use]
    pub const fn rate_limit_window(&self) -> Duration {
        Duration::from_millis(self.rate_limit_window_ms)
    }

    /// Responder call timeout
    #[must_use]
    pub const fn ai_timeout(&self) -> Duration {
        Duration::from_secs(self.ai_timeout_secs)
    }

    /// Response cache TTL
    #[must_use]
    pub const fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Flow session idle timeout
    #[must_use]
    pub const fn session_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.session_idle_timeout_secs)
    }

    /// Reaper tick interval
    #[must_use]
    pub const fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }

    /// Limiter sweep interval
    #[must_use]
    pub const fn limiter_cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.limiter_cleanup_interval_secs)
    }

    /// Limiter entry idle limit
    #[must_use]
    pub const fn limiter_max_idle(&self) -> Duration {
        Duration::from_secs(self.limiter_max_idle_secs)
    }

    /// Age after which a processing flag counts as orphaned
    #[must_use]
    pub const fn processing_max_age(&self) -> Duration {
        Duration::from_secs(self.processing_max_age_secs)
    }

    /// Pending approval lifetime
    #[must_use]
    pub const fn approval_ttl(&self) -> Duration {
        Duration::from_secs(self.approval_ttl_secs)
    }

    /// Interval between wait notices
    #[must_use]
    pub const fn wait_notice_interval(&self) -> Duration {
        Duration::from_secs(self.wait_notice_interval_secs)
    }

    /// Admin login lifetime
    #[must_use]
    pub const fn admin_grant_ttl(&self) -> Duration {
        Duration::from_secs(self.admin_grant_ttl_secs)
    }
}

/// Default number of pool workers
pub const DEFAULT_WORKERS: usize = 8;
/// Default pool queue capacity
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
/// Default AI turns allowed per actor per window
pub const DEFAULT_RATE_LIMIT_PER_WINDOW: u32 = 3;
/// Fixed rate limit window
pub const RATE_LIMIT_WINDOW_MS: u64 = 1_000;
/// Default responder timeout in seconds
pub const DEFAULT_AI_TIMEOUT_SECS: u64 = 60;

// Telegram API retry configuration
/// Maximum retry attempts for Telegram API operations
pub const TELEGRAM_API_MAX_RETRIES: usize = 3;
/// Initial backoff delay in milliseconds
pub const TELEGRAM_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Maximum backoff delay in milliseconds
pub const TELEGRAM_API_MAX_BACKOFF_MS: u64 = 4000;

/// Telegram message limit with a safety margin for formatting
pub const TELEGRAM_MESSAGE_LIMIT: usize = 4000;

/// Max tokens requested from the responder per reply
pub const AI_MAX_TOKENS: u32 = 1024;
/// Default system prompt for the shop assistant
pub const DEFAULT_SYSTEM_MESSAGE: &str = "You are a helpful shop assistant. Answer briefly. \
When recommending exactly one product, answer with a single line in the form \
`SUGGEST: <product name> | <price>`.";

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_config_env_loading() -> Result<(), Box<dyn std::error::Error>> {
        env::set_var("TELEGRAM_TOKEN", "dummy_token");
        env::set_var("ADMIN_CHAT_IDS", "42, 43");
        env::set_var("AI_API_KEY", "");

        let settings = Settings::new()?;
        assert_eq!(settings.telegram_token, "dummy_token");
        assert_eq!(settings.admin_chat_ids().len(), 2);
        // Empty env vars are treated as unset
        assert_eq!(settings.ai_api_key, None);
        assert_eq!(settings.engine, EngineSettings::default());

        env::remove_var("TELEGRAM_TOKEN");
        env::remove_var("ADMIN_CHAT_IDS");
        env::remove_var("AI_API_KEY");
        Ok(())
    }

    #[test]
    fn test_list_parsing() {
        let ids = parse_id_list(Some("333; 444, 555 abc"));
        assert_eq!(ids.len(), 3);
        assert!(ids.contains(&333));
        assert!(ids.contains(&555));

        assert!(parse_id_list(None).is_empty());
    }

    #[test]
    fn test_validate_rejects_zero_limits() {
        let engine = EngineSettings {
            workers: 0,
            ..EngineSettings::default()
        };
        assert!(engine.validate().is_err());

        let engine = EngineSettings {
            dispatcher_max_in_flight: Some(0),
            ..EngineSettings::default()
        };
        assert!(engine.validate().is_err());

        assert!(EngineSettings::default().validate().is_ok());
    }

    #[test]
    fn test_validate_requires_stale_age_above_ai_timeout() {
        let engine = EngineSettings {
            ai_timeout_secs: 60,
            processing_max_age_secs: 60,
            ..EngineSettings::default()
        };
        assert!(engine.validate().is_err());

        let engine = EngineSettings {
            ai_timeout_secs: 60,
            processing_max_age_secs: 61,
            ..EngineSettings::default()
        };
        assert!(engine.validate().is_ok());
    }
}
