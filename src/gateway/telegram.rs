//! Telegram gateway with automatic retry for Bot API operations.
//!
//! Sends and edits retry on transient network failures using exponential
//! backoff with jitter; expected failures ("message is not modified",
//! "message to edit not found") are reported as
//! [`GatewayError::MessageUnavailable`] without retrying further.

use super::{ChatId, GatewayError, InboundEvent, MessageRef, MessagingGateway};
use crate::utils::retry_telegram_operation;
use crate::ActorId;
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, MessageId};
use tracing::debug;

const ERROR_NOT_MODIFIED: &str = "message is not modified";
const ERROR_NOT_FOUND: &str = "message to edit not found";
const ERROR_DELETE_NOT_FOUND: &str = "message to delete not found";

/// [`MessagingGateway`] backed by the Telegram Bot API.
#[derive(Clone)]
pub struct TelegramGateway {
    bot: Bot,
}

impl TelegramGateway {
    /// Wrap a configured bot instance
    #[must_use]
    pub const fn new(bot: Bot) -> Self {
        Self { bot }
    }
}

fn classify(err: &teloxide::RequestError) -> GatewayError {
    let text = err.to_string();
    if text.contains(ERROR_NOT_MODIFIED)
        || text.contains(ERROR_NOT_FOUND)
        || text.contains(ERROR_DELETE_NOT_FOUND)
    {
        GatewayError::MessageUnavailable(text)
    } else {
        GatewayError::Transport(text)
    }
}

const fn tg_chat(chat: ChatId) -> teloxide::types::ChatId {
    teloxide::types::ChatId(chat.0)
}

#[async_trait]
impl MessagingGateway for TelegramGateway {
    async fn send_text(&self, chat: ChatId, text: &str) -> Result<MessageRef, GatewayError> {
        let sent = retry_telegram_operation(|| async {
            self.bot
                .send_message(tg_chat(chat), text.to_string())
                .await
                .map_err(|e| classify(&e))
        })
        .await?;

        Ok(MessageRef {
            chat,
            message_id: sent.id.0,
        })
    }

    async fn edit_text(&self, message: MessageRef, text: &str) -> Result<(), GatewayError> {
        // Telegram limit is 4096, 4000 leaves room for the ellipsis
        let text = if text.chars().count() > 4000 {
            format!("{}...", crate::utils::truncate_str(text, 4000))
        } else {
            text.to_string()
        };

        let skipped = retry_telegram_operation(|| async {
            match self
                .bot
                .edit_message_text(
                    tg_chat(message.chat),
                    MessageId(message.message_id),
                    text.clone(),
                )
                .await
            {
                Ok(_) => Ok(None),
                // Not worth retrying
                Err(e) => match classify(&e) {
                    GatewayError::MessageUnavailable(reason) => Ok(Some(reason)),
                    other => Err(other),
                },
            }
        })
        .await?;

        match skipped {
            None => Ok(()),
            Some(reason) => {
                debug!("Message update skipped: {reason}");
                Err(GatewayError::MessageUnavailable(reason))
            }
        }
    }

    async fn delete_message(&self, message: MessageRef) -> Result<(), GatewayError> {
        self.bot
            .delete_message(tg_chat(message.chat), MessageId(message.message_id))
            .await
            .map(|_| ())
            .map_err(|e| classify(&e))
    }

    async fn send_typing(&self, chat: ChatId) -> Result<(), GatewayError> {
        self.bot
            .send_chat_action(tg_chat(chat), ChatAction::Typing)
            .await
            .map(|_| ())
            .map_err(|e| classify(&e))
    }
}

/// Convert a Telegram text message into an engine event.
///
/// Returns `None` for messages without text or without a sender.
#[must_use]
pub fn inbound_event(msg: &Message) -> Option<InboundEvent> {
    let text = msg.text()?.to_string();
    let user = msg.from.as_ref()?;

    let display_name = user
        .username
        .clone()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| user.first_name.clone());

    Some(InboundEvent {
        actor: ActorId(user.id.0.cast_signed()),
        chat: ChatId(msg.chat.id.0),
        display_name,
        text,
        language_code: user.language_code.clone(),
    })
}
