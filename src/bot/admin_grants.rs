//! Time-limited admin rights
//!
//! A successful `/admin` login grants admin rights for a fixed TTL. Chats
//! listed in `ADMIN_CHAT_IDS` are always admins.

use crate::ActorId;
use moka::future::Cache;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Cache of actors holding admin rights
#[derive(Clone)]
pub struct AdminGrants {
    /// Moka cache storing actor -> () with automatic TTL
    cache: Cache<ActorId, ()>,
    /// Actors that are admins without logging in
    permanent: Arc<HashSet<i64>>,
    /// Successful logins since start
    granted_count: Arc<AtomicU64>,
}

impl AdminGrants {
    /// Creates grants that expire after `ttl`
    ///
    /// # Examples
    ///
    /// ```
    /// use oxide_shop::bot::AdminGrants;
    /// use std::collections::HashSet;
    /// use std::time::Duration;
    ///
    /// let grants = AdminGrants::new(Duration::from_secs(3600), 1_000, HashSet::from([42]));
    /// ```
    #[must_use]
    pub fn new(ttl: Duration, max_capacity: u64, permanent: HashSet<i64>) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();

        Self {
            cache,
            permanent: Arc::new(permanent),
            granted_count: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Grant admin rights to `actor` for the configured TTL
    pub async fn grant(&self, actor: ActorId) {
        self.cache.insert(actor, ()).await;
        let total = self.granted_count.fetch_add(1, Ordering::Relaxed) + 1;
        info!(actor = %actor, total, "Admin rights granted");
    }

    /// Whether `actor` currently has admin rights
    pub async fn is_admin(&self, actor: ActorId) -> bool {
        self.permanent.contains(&actor.0) || self.cache.get(&actor).await.is_some()
    }

    /// Revoke a login grant; permanent admins are unaffected
    pub async fn revoke(&self, actor: ActorId) {
        self.cache.invalidate(&actor).await;
    }

    /// Chats notified about new orders
    pub fn notification_chats(&self) -> impl Iterator<Item = i64> + '_ {
        self.permanent.iter().copied()
    }

    /// Successful logins since start
    #[must_use]
    pub fn granted_count(&self) -> u64 {
        self.granted_count.load(Ordering::Relaxed)
    }
}
