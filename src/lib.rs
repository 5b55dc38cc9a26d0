#![deny(missing_docs)]
//! Oxide Shop library.
//!
//! Request-processing and session-orchestration engine for the commerce bot:
//! worker pool, rate limiting, per-actor processing guard, flow session stores
//! and the dispatcher that ties them to a messaging gateway.

/// Telegram routing and user-facing texts.
pub mod bot;
/// Configuration management.
pub mod config;
/// Concurrency core: pool, limiter, guard, caches, session stores, reaper.
pub mod engine;
/// Error taxonomy of the engine.
pub mod error;
/// Multi-step flow kinds (checkout, wizard, admin login, inventory, reminders).
pub mod flows;
/// Messaging gateway interface and the Telegram adapter.
pub mod gateway;
/// Generative responder interface and the OpenAI-compatible adapter.
pub mod responder;
/// Utility functions.
pub mod utils;

/// Stable numeric identity of a conversation participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId(pub i64);

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
