//! Per-actor fixed-window rate limiter
//!
//! The map lock is only held to look up or insert an entry handle; the
//! window/count read-modify-write happens under the entry's own lock.

use crate::ActorId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug)]
struct RateLimitEntry {
    window_start: Instant,
    count: u32,
    last_request: Instant,
}

/// Allows up to `max_per_window` checks per actor per fixed window.
#[derive(Debug)]
pub struct RateLimiter {
    entries: RwLock<HashMap<ActorId, Arc<Mutex<RateLimitEntry>>>>,
    max_per_window: u32,
    window: Duration,
}

impl RateLimiter {
    /// Create a limiter. A zero budget is treated as one.
    #[must_use]
    pub fn new(max_per_window: u32, window: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_per_window: max_per_window.max(1),
            window,
        }
    }

    fn entry(&self, actor: ActorId) -> Arc<Mutex<RateLimitEntry>> {
        {
            let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(entry) = entries.get(&actor) {
                return Arc::clone(entry);
            }
        }

        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(entries.entry(actor).or_insert_with(|| {
            Arc::new(Mutex::new(RateLimitEntry {
                window_start: now,
                count: 0,
                last_request: now,
            }))
        }))
    }

    /// Record one request for `actor` and report whether it is within budget.
    ///
    /// Rejected calls do not consume budget; the caller is expected to drop
    /// the request rather than retry.
    pub fn check_rate_limit(&self, actor: ActorId) -> bool {
        let entry = self.entry(actor);
        let now = Instant::now();
        let mut entry = entry.lock().unwrap_or_else(PoisonError::into_inner);

        entry.last_request = now;
        if now.duration_since(entry.window_start) >= self.window {
            entry.window_start = now;
            entry.count = 1;
            return true;
        }

        if entry.count >= self.max_per_window {
            debug!(actor = %actor, count = entry.count, "Rate limit exceeded");
            return false;
        }

        entry.count += 1;
        true
    }

    /// Drop entries idle longer than `max_idle`, then evict the least recently
    /// used entries until at most `max_entries` remain.
    ///
    /// Returns the number of removed entries.
    pub fn sweep(&self, max_idle: Duration, max_entries: usize) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();

        let mut by_age: Vec<(ActorId, Instant)> = entries
            .iter()
            .map(|(actor, entry)| {
                let last = entry
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .last_request;
                (*actor, last)
            })
            .collect();

        by_age.retain(|(actor, last)| {
            if now.duration_since(*last) > max_idle {
                entries.remove(actor);
                false
            } else {
                true
            }
        });

        if entries.len() > max_entries {
            by_age.sort_by_key(|(_, last)| *last);
            let excess = entries.len() - max_entries;
            for (actor, _) in by_age.into_iter().take(excess) {
                entries.remove(&actor);
            }
        }

        before - entries.len()
    }

    /// Number of tracked actors
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no actor is tracked
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Spawn the periodic sweep. It stops when `shutdown` is cancelled.
    pub fn spawn_cleanup_task(
        self: Arc<Self>,
        interval: Duration,
        max_idle: Duration,
        max_entries: usize,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately
            ticker.tick().await;
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => {
                        debug!("Rate limiter cleanup stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = self.sweep(max_idle, max_entries);
                        if removed > 0 {
                            info!(removed, remaining = self.len(), "Rate limiter entries evicted");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACTOR: ActorId = ActorId(7);

    #[tokio::test(start_paused = true)]
    async fn burst_is_capped_per_window() {
        let limiter = RateLimiter::new(3, Duration::from_secs(1));

        let results: Vec<bool> = (0..10).map(|_| limiter.check_rate_limit(ACTOR)).collect();
        assert_eq!(results.iter().filter(|allowed| **allowed).count(), 3);
        assert!(results[..3].iter().all(|allowed| *allowed));

        tokio::time::advance(Duration::from_millis(1001)).await;
        assert!(limiter.check_rate_limit(ACTOR));
    }

    #[tokio::test(start_paused = true)]
    async fn actors_have_independent_budgets() {
        let limiter = RateLimiter::new(1, Duration::from_secs(1));
        assert!(limiter.check_rate_limit(ActorId(1)));
        assert!(!limiter.check_rate_limit(ActorId(1)));
        assert!(limiter.check_rate_limit(ActorId(2)));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_budget_allows_one() {
        let limiter = RateLimiter::new(0, Duration::from_secs(1));
        assert!(limiter.check_rate_limit(ACTOR));
        assert!(!limiter.check_rate_limit(ACTOR));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_drops_idle_entries() {
        let limiter = RateLimiter::new(3, Duration::from_secs(1));
        limiter.check_rate_limit(ActorId(1));
        tokio::time::advance(Duration::from_secs(30)).await;
        limiter.check_rate_limit(ActorId(2));

        assert_eq!(limiter.sweep(Duration::from_secs(10), 100), 1);
        assert_eq!(limiter.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_enforces_capacity_oldest_first() {
        let limiter = RateLimiter::new(3, Duration::from_secs(1));
        for id in 1..=5 {
            limiter.check_rate_limit(ActorId(id));
            tokio::time::advance(Duration::from_millis(10)).await;
        }

        assert_eq!(limiter.sweep(Duration::from_secs(600), 2), 3);
        assert_eq!(limiter.len(), 2);

        // The two most recent actors keep their exhausted-or-not state
        let entries = limiter.entries.read().expect("lock");
        assert!(entries.contains_key(&ActorId(4)));
        assert!(entries.contains_key(&ActorId(5)));
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_task_stops_on_shutdown() {
        let limiter = Arc::new(RateLimiter::new(3, Duration::from_secs(1)));
        limiter.check_rate_limit(ACTOR);
        let shutdown = CancellationToken::new();
        let handle = Arc::clone(&limiter).spawn_cleanup_task(
            Duration::from_secs(5),
            Duration::from_secs(1),
            100,
            shutdown.clone(),
        );

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(limiter.is_empty());

        shutdown.cancel();
        handle.await.expect("cleanup task panicked");
    }
}
