//! Concurrent request-processing engine
//!
//! Leaves first: rate limiter, processing guard, response cache, session
//! stores and approvals; then the reaper that expires them and the worker
//! pool that runs AI-backed turns.

/// Single-shot pending approvals
pub mod approvals;
/// TTL response cache
pub mod cache;
/// Bounded worker pool
pub mod pool;
/// Per-actor processing flags
pub mod processing;
/// Per-actor rate limiting
pub mod rate_limiter;
/// Periodic expiry
pub mod reaper;
/// Keyed flow sessions
pub mod session_store;
/// Product suggestion detection
pub mod suggestion;

pub use approvals::{PendingApproval, PendingApprovals};
pub use cache::{CacheKey, CacheStats, ResponseCache};
pub use pool::{
    PoolConfig, PoolDeps, PoolStatsSnapshot, Request, RequestOutcome, SubmitError, WorkerPool,
};
pub use processing::{Phase, ProcessingGuard, ProcessingTicket};
pub use rate_limiter::RateLimiter;
pub use reaper::{ReapReport, TtlReaper};
pub use session_store::{Disposition, FlowState, KeyedSessionStore, Session, Sweepable};
pub use suggestion::{parse_suggestion, Suggestion, SuggestionHandler};
