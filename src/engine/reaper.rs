//! Periodic expiry of idle sessions, stale approvals and orphaned flags
//!
//! Components are visited one after another; no two component locks are
//! ever held at the same time, and gateway calls happen after the guard lock
//! has been released.

use super::approvals::PendingApprovals;
use super::cache::{CacheKey, ResponseCache};
use super::processing::ProcessingGuard;
use super::session_store::Sweepable;
use crate::gateway::MessagingGateway;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// What one reaper pass removed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ReapReport {
    /// Idle flow sessions removed, across all stores
    pub sessions: usize,
    /// Processing flags force-cleared
    pub stale_flags: usize,
    /// Orphaned waiting messages deleted through the gateway
    pub orphaned_messages: usize,
    /// Expired cache entries purged
    pub cache_entries: usize,
}

impl ReapReport {
    fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Periodic sweeper over the engine's TTL-bounded state.
pub struct TtlReaper {
    stores: Vec<Arc<dyn Sweepable>>,
    approvals: Option<PendingApprovals>,
    guard: Option<Arc<ProcessingGuard>>,
    cache: Option<Arc<ResponseCache<CacheKey, String>>>,
    gateway: Option<Arc<dyn MessagingGateway>>,
    session_idle: Duration,
    processing_max_age: Duration,
}

impl TtlReaper {
    /// Create a reaper with nothing registered yet
    #[must_use]
    pub fn new(session_idle: Duration, processing_max_age: Duration) -> Self {
        Self {
            stores: Vec::new(),
            approvals: None,
            guard: None,
            cache: None,
            gateway: None,
            session_idle,
            processing_max_age,
        }
    }

    /// Register session stores
    #[must_use]
    pub fn with_stores(mut self, stores: impl IntoIterator<Item = Arc<dyn Sweepable>>) -> Self {
        self.stores.extend(stores);
        self
    }

    /// Register the pending approvals
    #[must_use]
    pub fn with_approvals(mut self, approvals: PendingApprovals) -> Self {
        self.approvals = Some(approvals);
        self
    }

    /// Register the processing guard and the gateway used to delete orphaned
    /// waiting messages
    #[must_use]
    pub fn with_guard(
        mut self,
        guard: Arc<ProcessingGuard>,
        gateway: Arc<dyn MessagingGateway>,
    ) -> Self {
        self.guard = Some(guard);
        self.gateway = Some(gateway);
        self
    }

    /// Register the response cache
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<ResponseCache<CacheKey, String>>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Run one sweep over every registered component.
    pub async fn run_once(&self) -> ReapReport {
        let mut report = ReapReport::default();

        for store in &self.stores {
            let removed = store.sweep(self.session_idle);
            if removed > 0 {
                debug!(kind = store.kind(), removed, "Idle sessions evicted");
            }
            report.sessions += removed;
        }

        if let Some(approvals) = &self.approvals {
            approvals.expire_stale().await;
        }

        if let Some(guard) = &self.guard {
            let stale = guard.sweep_stale(self.processing_max_age);
            report.stale_flags = stale.len();
            if let Some(gateway) = &self.gateway {
                for message in stale.into_iter().filter_map(|(_, message)| message) {
                    match gateway.delete_message(message).await {
                        Ok(()) => report.orphaned_messages += 1,
                        Err(e) => warn!("Failed to delete orphaned waiting message: {e}"),
                    }
                }
            }
        }

        if let Some(cache) = &self.cache {
            report.cache_entries = cache.purge_expired();
        }

        report
    }

    /// Spawn the periodic loop. It stops when `shutdown` is cancelled.
    pub fn spawn(self: Arc<Self>, interval: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => {
                        debug!("TTL reaper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let report = self.run_once().await;
                        if !report.is_empty() {
                            info!(?report, "TTL reaper pass");
                        }
                    }
                }
            }
        })
    }
}
