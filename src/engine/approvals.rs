//! Single-shot pending approvals
//!
//! A completed checkout becomes a pending approval until an admin runs
//! `/approve <id>`. Each record can be taken once and expires after a long
//! TTL (24 hours by default).

use crate::gateway::ChatId;
use crate::ActorId;
use moka::future::Cache;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

/// Order waiting for an admin decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingApproval {
    /// Short identifier quoted in `/approve`
    pub id: String,
    /// Customer who placed the order
    pub actor: ActorId,
    /// Customer's chat, notified on approval
    pub chat: ChatId,
    /// Human-readable order summary
    pub summary: String,
    /// Creation time
    pub created_at: Instant,
}

/// TTL-bounded store of [`PendingApproval`] records.
#[derive(Clone)]
pub struct PendingApprovals {
    cache: Cache<String, PendingApproval>,
}

impl PendingApprovals {
    /// Create a store whose records expire `ttl` after insertion
    #[must_use]
    pub fn new(ttl: Duration, max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();
        Self { cache }
    }

    /// Record a new approval and return its id.
    pub async fn insert(&self, actor: ActorId, chat: ChatId, summary: String) -> String {
        let mut id = uuid::Uuid::new_v4().simple().to_string();
        id.truncate(8);

        let record = PendingApproval {
            id: id.clone(),
            actor,
            chat,
            summary,
            created_at: Instant::now(),
        };
        self.cache.insert(id.clone(), record).await;
        info!(actor = %actor, approval = %id, "Approval pending");
        id
    }

    /// Remove and return the record. A second call for the same id yields `None`.
    pub async fn take(&self, id: &str) -> Option<PendingApproval> {
        self.cache.remove(id.trim()).await
    }

    /// Run pending expirations now instead of lazily.
    pub async fn expire_stale(&self) {
        self.cache.run_pending_tasks().await;
    }

    /// Number of live records, accurate after [`Self::expire_stale`]
    #[must_use]
    pub fn len(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Whether no record is live
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
