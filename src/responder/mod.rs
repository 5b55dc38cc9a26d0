//! Generative responder interface
//!
//! The engine treats the responder as a slow, fallible black box. A call is
//! cancelled by dropping its future, which the worker pool does on timeout,
//! `/cancel` or shutdown.

/// OpenAI-compatible implementation
pub mod openai;

use crate::ActorId;
use async_trait::async_trait;
use thiserror::Error;

pub use openai::OpenAiResponder;

/// Errors reported by a responder
#[derive(Debug, Error)]
pub enum ResponderError {
    /// The API answered with an error
    #[error("API error: {0}")]
    Api(String),
    /// The request never reached the API
    #[error("Network error: {0}")]
    Network(String),
    /// Required configuration is absent
    #[error("Missing configuration: {0}")]
    MissingConfig(String),
    /// The API answered without any text
    #[error("Empty response")]
    EmptyResponse,
}

/// Produces the reply to one AI-backed turn
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Responder: Send + Sync {
    /// Generate a reply to `text` from `actor`
    async fn process_message(
        &self,
        actor: ActorId,
        display_name: &str,
        text: &str,
    ) -> Result<String, ResponderError>;
}
