//! Responder backed by an OpenAI-compatible chat completion API

use super::{Responder, ResponderError};
use crate::config::{Settings, AI_MAX_TOKENS, DEFAULT_SYSTEM_MESSAGE};
use crate::ActorId;
use async_openai::error::OpenAIError;
use async_openai::types::chat::{
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestUserMessageArgs, CreateChatCompletionRequestArgs,
};
use async_openai::{config::OpenAIConfig, Client};
use async_trait::async_trait;
use tracing::debug;

/// Responder backed by any OpenAI-compatible chat completion endpoint
pub struct OpenAiResponder {
    client: Client<OpenAIConfig>,
    model: String,
    system_message: String,
}

impl OpenAiResponder {
    /// Create a responder for `model` at `api_base`
    #[must_use]
    pub fn new(api_key: &str, api_base: &str, model: String, system_message: String) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(api_base);
        Self {
            client: Client::with_config(config),
            model,
            system_message,
        }
    }

    /// Build the responder from application settings
    ///
    /// # Errors
    ///
    /// Returns `ResponderError::MissingConfig` if no API key is configured.
    pub fn from_settings(settings: &Settings) -> Result<Self, ResponderError> {
        let api_key = settings
            .ai_api_key
            .as_deref()
            .ok_or_else(|| ResponderError::MissingConfig("AI_API_KEY".to_string()))?;
        let system_message = settings
            .system_message
            .clone()
            .unwrap_or_else(|| DEFAULT_SYSTEM_MESSAGE.to_string());
        Ok(Self::new(
            api_key,
            &settings.ai_api_base,
            settings.ai_model.clone(),
            system_message,
        ))
    }

    fn build_messages(
        &self,
        display_name: &str,
        text: &str,
    ) -> Result<Vec<ChatCompletionRequestMessage>, ResponderError> {
        let system = ChatCompletionRequestSystemMessageArgs::default()
            .content(self.system_message.as_str())
            .build()
            .map_err(|e| ResponderError::Api(e.to_string()))?
            .into();
        let user = ChatCompletionRequestUserMessageArgs::default()
            .content(format!("{display_name}: {text}"))
            .build()
            .map_err(|e| ResponderError::Api(e.to_string()))?
            .into();
        Ok(vec![system, user])
    }
}

fn classify(err: OpenAIError) -> ResponderError {
    match err {
        OpenAIError::Reqwest(e) => ResponderError::Network(e.to_string()),
        other => ResponderError::Api(other.to_string()),
    }
}

#[async_trait]
impl Responder for OpenAiResponder {
    async fn process_message(
        &self,
        actor: ActorId,
        display_name: &str,
        text: &str,
    ) -> Result<String, ResponderError> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(self.model.as_str())
            .messages(self.build_messages(display_name, text)?)
            .max_tokens(AI_MAX_TOKENS)
            .build()
            .map_err(|e| ResponderError::Api(e.to_string()))?;

        debug!(actor = %actor, model = %self.model, "Requesting completion");
        let response = self.client.chat().create(request).await.map_err(classify)?;

        response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .filter(|content| !content.trim().is_empty())
            .ok_or(ResponderError::EmptyResponse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineSettings;

    fn settings(api_key: Option<&str>) -> Settings {
        Settings {
            telegram_token: "dummy".to_string(),
            ai_api_key: api_key.map(str::to_string),
            ai_api_base: "http://localhost:1234/v1".to_string(),
            ai_model: "test-model".to_string(),
            system_message: None,
            admin_password: None,
            admin_chat_ids_str: None,
            engine: EngineSettings::default(),
        }
    }

    #[test]
    fn missing_api_key_is_a_config_error() {
        assert!(matches!(
            OpenAiResponder::from_settings(&settings(None)),
            Err(ResponderError::MissingConfig(_))
        ));
    }

    #[test]
    fn default_system_message_is_used() {
        let responder = OpenAiResponder::from_settings(&settings(Some("sk-test"))).expect("responder");
        assert_eq!(responder.system_message, DEFAULT_SYSTEM_MESSAGE);
        assert_eq!(responder.model, "test-model");

        let messages = responder
            .build_messages("alice", "any green tea?")
            .expect("messages");
        assert_eq!(messages.len(), 2);
    }
}
