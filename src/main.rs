use dotenvy::dotenv;
use oxide_shop::bot::{self, AdminGrants, DispatcherConfig, DispatcherDeps};
use oxide_shop::config::Settings;
use oxide_shop::engine::{
    CacheKey, PendingApprovals, PoolConfig, PoolDeps, ProcessingGuard, RateLimiter, ResponseCache,
    SuggestionHandler, TtlReaper, WorkerPool,
};
use oxide_shop::flows::FlowStores;
use oxide_shop::gateway::telegram::{inbound_event, TelegramGateway};
use oxide_shop::gateway::MessagingGateway;
use oxide_shop::responder::{OpenAiResponder, Responder};
use regex::Regex;
use std::io::{self, Write};
use std::sync::Arc;
use teloxide::prelude::*;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{prelude::*, EnvFilter};

/// Regex patterns for redacting secrets from log output
struct RedactionPatterns {
    token_url: Regex,
    token_bare: Regex,
    token_prefixed: Regex,
    api_key: Regex,
    bearer: Regex,
}

impl RedactionPatterns {
    /// Compile all patterns
    ///
    /// # Errors
    ///
    /// Returns an error if any regex pattern is invalid
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            token_url: Regex::new(r"(https?://[^/]+/bot)([0-9]+:[A-Za-z0-9_-]+)(/['\s]*)")?,
            token_bare: Regex::new(r"([0-9]{8,10}:[A-Za-z0-9_-]{35})")?,
            token_prefixed: Regex::new(r"(bot[0-9]{8,10}:)[A-Za-z0-9_-]+")?,
            api_key: Regex::new(r"sk-[A-Za-z0-9_-]{16,}")?,
            bearer: Regex::new(r"(?i)(bearer\s+)[^\s'\x22]+")?,
        })
    }

    fn redact(&self, input: &str) -> String {
        let output = self.token_url.replace_all(input, "$1[TELEGRAM_TOKEN]$3");
        let output = self.token_bare.replace_all(&output, "[TELEGRAM_TOKEN]");
        let output = self.token_prefixed.replace_all(&output, "$1[TELEGRAM_TOKEN]");
        let output = self.api_key.replace_all(&output, "[API_KEY]");
        self.bearer.replace_all(&output, "$1[MASKED]").into_owned()
    }
}

struct RedactingWriter<W: Write> {
    inner: W,
    patterns: Arc<RedactionPatterns>,
}

impl<W: Write> Write for RedactingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let text = String::from_utf8_lossy(buf);
        self.inner
            .write_all(self.patterns.redact(&text).as_bytes())?;
        // Report the original length; the redacted text may differ
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct RedactingMakeWriter<F> {
    make_inner: F,
    patterns: Arc<RedactionPatterns>,
}

impl<'a, F, W> tracing_subscriber::fmt::MakeWriter<'a> for RedactingMakeWriter<F>
where
    F: Fn() -> W + 'static,
    W: Write,
{
    type Writer = RedactingWriter<W>;

    fn make_writer(&'a self) -> Self::Writer {
        RedactingWriter {
            inner: (self.make_inner)(),
            patterns: Arc::clone(&self.patterns),
        }
    }
}

fn init_logging(patterns: Arc<RedactionPatterns>) {
    let make_writer = RedactingMakeWriter {
        make_inner: io::stderr,
        patterns,
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(make_writer))
        .init();
}

fn init_settings() -> Settings {
    match Settings::new() {
        Ok(s) => {
            info!("Configuration loaded successfully.");
            s
        }
        Err(e) => {
            error!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let patterns = Arc::new(RedactionPatterns::new().map_err(|e| {
        eprintln!("Failed to compile regex patterns: {e}");
        e
    })?);
    init_logging(patterns);

    info!("Starting oxide-shop...");

    let settings = init_settings();
    let engine = &settings.engine;

    let responder: Arc<dyn Responder> = Arc::new(OpenAiResponder::from_settings(&settings)?);
    let bot = Bot::new(settings.telegram_token.clone());
    let bot_name = match bot.get_me().await {
        Ok(me) => me.username().to_string(),
        Err(e) => {
            warn!("Failed to fetch bot identity: {e}");
            String::new()
        }
    };
    let gateway: Arc<dyn MessagingGateway> = Arc::new(TelegramGateway::new(bot.clone()));

    let shutdown = CancellationToken::new();
    let limiter = Arc::new(RateLimiter::new(
        engine.rate_limit_per_window,
        engine.rate_limit_window(),
    ));
    let guard = Arc::new(ProcessingGuard::new());
    let cache = Arc::new(ResponseCache::<CacheKey, String>::new(
        engine.cache_ttl(),
        engine.cache_max_entries,
    ));
    let flows = FlowStores::new();
    let approvals = PendingApprovals::new(engine.approval_ttl(), 10_000);
    let admins = AdminGrants::new(engine.admin_grant_ttl(), 10_000, settings.admin_chat_ids());

    let pool = Arc::new(WorkerPool::start(
        PoolConfig::from_settings(engine),
        PoolDeps {
            responder,
            gateway: Arc::clone(&gateway),
            limiter: Arc::clone(&limiter),
            guard: Arc::clone(&guard),
            cache: Some(Arc::clone(&cache)),
            suggestions: Some(Arc::clone(&flows.checkout) as Arc<dyn SuggestionHandler>),
        },
    ));

    let limiter_task = Arc::clone(&limiter).spawn_cleanup_task(
        engine.limiter_cleanup_interval(),
        engine.limiter_max_idle(),
        engine.limiter_max_entries,
        shutdown.child_token(),
    );
    let reaper = TtlReaper::new(engine.session_idle_timeout(), engine.processing_max_age())
        .with_stores(flows.sweepables())
        .with_approvals(approvals.clone())
        .with_guard(Arc::clone(&guard), Arc::clone(&gateway))
        .with_cache(Arc::clone(&cache));
    let reaper_task = Arc::new(reaper).spawn(engine.reaper_interval(), shutdown.child_token());

    let router = Arc::new(bot::Dispatcher::new(
        DispatcherDeps {
            gateway,
            pool: Arc::clone(&pool),
            guard,
            flows,
            approvals,
            admins,
            cache: Some(cache),
        },
        DispatcherConfig {
            admin_password: settings.admin_password.clone(),
            max_reminder_delay_mins: engine.max_reminder_delay_mins,
            max_in_flight: engine.dispatcher_max_in_flight,
            bot_name,
        },
        shutdown.child_token(),
    ));

    info!("Bot is running...");

    let handler = Update::filter_message().endpoint(handle_message);
    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![router])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("Shutting down...");
    pool.shutdown_with_grace(engine.ai_timeout()).await;
    shutdown.cancel();
    for task in [limiter_task, reaper_task] {
        if let Err(e) = task.await {
            warn!("Background task ended abnormally: {e}");
        }
    }
    info!("Stopped.");

    Ok(())
}

async fn handle_message(
    msg: Message,
    router: Arc<bot::Dispatcher>,
) -> Result<(), teloxide::RequestError> {
    if let Some(event) = inbound_event(&msg) {
        router.spawn_event(event);
    }
    respond(())
}
