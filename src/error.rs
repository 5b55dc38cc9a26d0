//! Engine error taxonomy
//!
//! Every terminal failure of an AI-backed turn maps to exactly one variant, and
//! every variant maps to a distinct short message for the actor.

use thiserror::Error;

/// Failures surfaced by the request-processing engine.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    /// Actor exceeded the per-window request budget
    #[error("rate limit exceeded")]
    RateLimited,
    /// Worker queue is at capacity
    #[error("worker queue is full")]
    QueueFull,
    /// Pool no longer accepts work
    #[error("worker pool is shutting down")]
    ShuttingDown,
    /// Responder did not answer within the configured timeout
    #[error("responder timed out")]
    Timeout,
    /// Request was cancelled by the actor or by shutdown
    #[error("request cancelled")]
    Canceled,
    /// Responder returned an error
    #[error("upstream error: {0}")]
    Upstream(String),
    /// A panic was caught at the worker boundary
    #[error("internal panic: {0}")]
    InternalPanic(String),
}

impl EngineError {
    /// Whether the failure deserves a detailed server-side log entry.
    ///
    /// Rejections, timeouts and cancellations are expected operating conditions.
    #[must_use]
    pub const fn is_server_fault(&self) -> bool {
        matches!(self, Self::Upstream(_) | Self::InternalPanic(_))
    }

    /// Short machine-readable label, used as a tracing field.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::QueueFull => "queue_full",
            Self::ShuttingDown => "shutting_down",
            Self::Timeout => "timeout",
            Self::Canceled => "canceled",
            Self::Upstream(_) => "upstream_error",
            Self::InternalPanic(_) => "internal_panic",
        }
    }
}

/// Extract a readable message from a caught panic payload.
#[must_use]
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
