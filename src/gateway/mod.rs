//! Messaging gateway interface
//!
//! The engine only needs best-effort delivery: send, edit, delete and a typing
//! indicator. Failures are reported to the caller, which logs them; nothing in
//! the engine retries a failed delivery.

/// Telegram implementation of [`MessagingGateway`]
pub mod telegram;

use crate::ActorId;
use async_trait::async_trait;
use thiserror::Error;

/// Chat that receives replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChatId(pub i64);

/// Reference to a message already delivered by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageRef {
    /// Chat containing the message
    pub chat: ChatId,
    /// Gateway-specific message identifier
    pub message_id: i32,
}

/// Language used for engine notices and flow prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Locale {
    /// English
    #[default]
    En,
    /// Russian
    Ru,
}

impl Locale {
    /// Map a client language code (`"ru"`, `"ru-RU"`, `"en"`) to a locale.
    #[must_use]
    pub fn from_language_code(code: Option<&str>) -> Self {
        match code {
            Some(code) if code.to_ascii_lowercase().starts_with("ru") => Self::Ru,
            _ => Self::En,
        }
    }

    /// Parse an explicit locale choice typed by the actor.
    #[must_use]
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_lowercase().as_str() {
            "en" | "english" | "английский" => Some(Self::En),
            "ru" | "russian" | "русский" => Some(Self::Ru),
            _ => None,
        }
    }

    /// Short code of the locale
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::En => "en",
            Self::Ru => "ru",
        }
    }
}

/// One inbound text event received from the gateway.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    /// Sender
    pub actor: ActorId,
    /// Chat to reply to
    pub chat: ChatId,
    /// Sender's display name
    pub display_name: String,
    /// Message text
    pub text: String,
    /// Client language code, if the gateway reports one
    pub language_code: Option<String>,
}

/// Errors reported by a messaging gateway
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Transport-level failure after the gateway's own retries
    #[error("Transport error: {0}")]
    Transport(String),
    /// The referenced message no longer exists or cannot be modified
    #[error("Message unavailable: {0}")]
    MessageUnavailable(String),
}

/// Outbound side of the messaging gateway
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessagingGateway: Send + Sync {
    /// Send a plain text message
    async fn send_text(&self, chat: ChatId, text: &str) -> Result<MessageRef, GatewayError>;

    /// Replace the text of a previously sent message
    async fn edit_text(&self, message: MessageRef, text: &str) -> Result<(), GatewayError>;

    /// Delete a previously sent message
    async fn delete_message(&self, message: MessageRef) -> Result<(), GatewayError>;

    /// Show a "typing" indicator in the chat
    async fn send_typing(&self, chat: ChatId) -> Result<(), GatewayError>;
}
