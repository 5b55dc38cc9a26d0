//! Bounded worker pool for AI-backed turns
//!
//! `W` workers share one bounded queue of capacity `Q`. Submission never
//! blocks: a full queue rejects immediately and hands the request back.
//! Every terminal state of a request, including a caught panic, funnels
//! through the same cleanup path that releases the actor's processing
//! ticket and deletes the waiting message.

use super::cache::{CacheKey, ResponseCache};
use super::processing::{ProcessingGuard, ProcessingTicket};
use super::rate_limiter::RateLimiter;
use super::suggestion::{parse_suggestion, SuggestionHandler};
use crate::bot::views;
use crate::config::{EngineSettings, TELEGRAM_MESSAGE_LIMIT};
use crate::error::{panic_message, EngineError};
use crate::gateway::{ChatId, Locale, MessagingGateway};
use crate::responder::Responder;
use crate::utils::split_long_message;
use crate::ActorId;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, error, info, warn};

/// One AI-backed turn waiting for a worker.
#[derive(Debug)]
pub struct Request {
    /// Requesting actor
    pub actor: ActorId,
    /// Display name passed to the responder
    pub display_name: String,
    /// Free-text payload
    pub text: String,
    /// Reply target
    pub chat: ChatId,
    /// Language of engine notices
    pub locale: Locale,
    /// When the request was created
    pub enqueued_at: Instant,
    cancel: CancellationToken,
    ticket: Option<ProcessingTicket>,
}

impl Request {
    /// Build a request without a processing ticket
    #[must_use]
    pub fn new(
        actor: ActorId,
        display_name: impl Into<String>,
        text: impl Into<String>,
        chat: ChatId,
        locale: Locale,
    ) -> Self {
        Self {
            actor,
            display_name: display_name.into(),
            text: text.into(),
            chat,
            locale,
            enqueued_at: Instant::now(),
            cancel: CancellationToken::new(),
            ticket: None,
        }
    }

    /// Attach the actor's processing ticket. The request then follows the
    /// ticket's cancellation token and releases the flag when dropped.
    #[must_use]
    pub fn with_ticket(mut self, ticket: ProcessingTicket) -> Self {
        self.cancel = ticket.cancellation().clone();
        self.ticket = Some(ticket);
        self
    }

    /// Token that cancels this request
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }
}

/// Rejected submission. The request is handed back to the caller.
#[derive(Debug, Error)]
#[error("submit rejected: {reason}")]
pub struct SubmitError {
    /// `QueueFull` or `ShuttingDown`
    pub reason: EngineError,
    /// The request that was not enqueued
    pub request: Box<Request>,
}

/// Terminal state of a dequeued request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// Reply delivered (fresh or cached)
    Completed,
    /// Rejected by the rate limiter before reaching the responder
    RateLimited,
    /// Responder exceeded the call timeout
    TimedOut,
    /// Cancelled by the actor or by shutdown
    Canceled,
    /// Responder returned an error
    Failed,
    /// A panic was caught at the worker boundary
    Panicked,
}

impl RequestOutcome {
    const fn from_error(err: &EngineError) -> Self {
        match err {
            EngineError::RateLimited => Self::RateLimited,
            EngineError::Timeout => Self::TimedOut,
            EngineError::Canceled => Self::Canceled,
            EngineError::InternalPanic(_) => Self::Panicked,
            EngineError::Upstream(_) | EngineError::QueueFull | EngineError::ShuttingDown => {
                Self::Failed
            }
        }
    }

    const fn label(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::RateLimited => "rate_limited",
            Self::TimedOut => "timed_out",
            Self::Canceled => "canceled",
            Self::Failed => "failed",
            Self::Panicked => "panicked",
        }
    }
}

/// Pool sizing and timing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of workers (`W`)
    pub workers: usize,
    /// Queue capacity (`Q`)
    pub queue_capacity: usize,
    /// Timeout of one responder call (`T`)
    pub call_timeout: Duration,
    /// Interval between wait notices; zero disables them
    pub wait_notice_interval: Duration,
}

impl PoolConfig {
    /// Take pool settings from the engine configuration
    #[must_use]
    pub const fn from_settings(settings: &EngineSettings) -> Self {
        Self {
            workers: settings.workers,
            queue_capacity: settings.queue_capacity,
            call_timeout: settings.ai_timeout(),
            wait_notice_interval: settings.wait_notice_interval(),
        }
    }
}

/// Collaborators shared by all workers
#[derive(Clone)]
pub struct PoolDeps {
    /// Generates replies
    pub responder: Arc<dyn Responder>,
    /// Delivers replies and notices
    pub gateway: Arc<dyn MessagingGateway>,
    /// Per-actor rate limiter, checked on dequeue
    pub limiter: Arc<RateLimiter>,
    /// Processing flags, used for wait-notice escalation
    pub guard: Arc<ProcessingGuard>,
    /// Reply cache
    pub cache: Option<Arc<ResponseCache<CacheKey, String>>>,
    /// Receiver of detected product suggestions
    pub suggestions: Option<Arc<dyn SuggestionHandler>>,
}

#[derive(Debug, Default)]
struct PoolStats {
    submitted: AtomicU64,
    rejected: AtomicU64,
    completed: AtomicU64,
    rate_limited: AtomicU64,
    timed_out: AtomicU64,
    canceled: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
}

impl PoolStats {
    fn record(&self, outcome: RequestOutcome) {
        let counter = match outcome {
            RequestOutcome::Completed => &self.completed,
            RequestOutcome::RateLimited => &self.rate_limited,
            RequestOutcome::TimedOut => &self.timed_out,
            RequestOutcome::Canceled => &self.canceled,
            RequestOutcome::Failed => &self.failed,
            RequestOutcome::Panicked => &self.panicked,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Counters of a running pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStatsSnapshot {
    /// Requests accepted into the queue
    pub submitted: u64,
    /// Requests rejected by `submit`
    pub rejected: u64,
    /// Replies delivered
    pub completed: u64,
    /// Requests dropped by the rate limiter
    pub rate_limited: u64,
    /// Responder timeouts
    pub timed_out: u64,
    /// Cancelled requests
    pub canceled: u64,
    /// Responder errors
    pub failed: u64,
    /// Panics caught at the worker boundary
    pub panicked: u64,
}

struct WorkerContext {
    config: PoolConfig,
    deps: PoolDeps,
    root: CancellationToken,
    stats: Arc<PoolStats>,
}

/// Fixed set of workers consuming a bounded queue.
pub struct WorkerPool {
    sender: Mutex<Option<mpsc::Sender<Request>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    root: CancellationToken,
    stats: Arc<PoolStats>,
    worker_count: usize,
}

impl WorkerPool {
    /// Spawn the workers. Must be called within a tokio runtime.
    #[must_use]
    pub fn start(config: PoolConfig, deps: PoolDeps) -> Self {
        let worker_count = config.workers.max(1);
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let root = CancellationToken::new();
        let stats = Arc::new(PoolStats::default());

        let ctx = Arc::new(WorkerContext {
            config,
            deps,
            root: root.clone(),
            stats: Arc::clone(&stats),
        });

        let workers = (0..worker_count)
            .map(|id| {
                let rx = Arc::clone(&rx);
                let ctx = Arc::clone(&ctx);
                tokio::spawn(async move {
                    debug!(worker = id, "Worker started");
                    loop {
                        // The receiver lock is held only while waiting for the next request
                        let next = rx.lock().await.recv().await;
                        let Some(request) = next else { break };
                        ctx.process(id, request).await;
                    }
                    debug!(worker = id, "Worker stopped");
                })
            })
            .collect();

        info!(
            workers = worker_count,
            queue_capacity = config.queue_capacity,
            "Worker pool started"
        );

        Self {
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            root,
            stats,
            worker_count,
        }
    }

    fn sender(&self) -> MutexGuard<'_, Option<mpsc::Sender<Request>>> {
        self.sender.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue a request without waiting.
    ///
    /// # Errors
    ///
    /// `QueueFull` if the queue is at capacity, `ShuttingDown` once shutdown
    /// has begun. The request is returned inside the error.
    pub fn submit(&self, request: Request) -> Result<(), SubmitError> {
        let sender = self.sender();
        let Some(tx) = sender.as_ref() else {
            self.stats.rejected.fetch_add(1, Ordering::Relaxed);
            return Err(SubmitError {
                reason: EngineError::ShuttingDown,
                request: Box::new(request),
            });
        };

        if let Some(ticket) = &request.ticket {
            ticket.mark_queued();
        }
        match tx.try_send(request) {
            Ok(()) => {
                self.stats.submitted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(request)) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(actor = %request.actor, "Worker queue full, request rejected");
                Err(SubmitError {
                    reason: EngineError::QueueFull,
                    request: Box::new(request),
                })
            }
            Err(TrySendError::Closed(request)) => {
                self.stats.rejected.fetch_add(1, Ordering::Relaxed);
                Err(SubmitError {
                    reason: EngineError::ShuttingDown,
                    request: Box::new(request),
                })
            }
        }
    }

    /// Requests waiting in the queue
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.sender()
            .as_ref()
            .map_or(0, |tx| tx.max_capacity() - tx.capacity())
    }

    /// Number of workers
    #[must_use]
    pub const fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Current counters
    #[must_use]
    pub fn stats(&self) -> PoolStatsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        PoolStatsSnapshot {
            submitted: load(&self.stats.submitted),
            rejected: load(&self.stats.rejected),
            completed: load(&self.stats.completed),
            rate_limited: load(&self.stats.rate_limited),
            timed_out: load(&self.stats.timed_out),
            canceled: load(&self.stats.canceled),
            failed: load(&self.stats.failed),
            panicked: load(&self.stats.panicked),
        }
    }

    fn close(&self) -> Vec<JoinHandle<()>> {
        if self.sender().take().is_some() {
            info!("Worker pool closing, draining queued requests");
        }
        std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Stop accepting work, let workers drain the queue and join them.
    pub async fn shutdown(&self) {
        join_workers(self.close()).await;
    }

    /// Like [`Self::shutdown`], but cancels in-flight and queued calls once
    /// `grace` has elapsed.
    pub async fn shutdown_with_grace(&self, grace: Duration) {
        let join = join_workers(self.close());
        tokio::pin!(join);
        tokio::select! {
            () = &mut join => {}
            () = tokio::time::sleep(grace) => {
                warn!(grace_ms = grace.as_millis(), "Shutdown grace elapsed, cancelling in-flight requests");
                self.root.cancel();
                join.await;
            }
        }
    }
}

async fn join_workers(handles: Vec<JoinHandle<()>>) {
    for result in futures_util::future::join_all(handles).await {
        if let Err(e) = result {
            error!("Worker task failed: {e}");
        }
    }
}

impl WorkerContext {
    async fn process(&self, worker: usize, mut request: Request) {
        let ticket = request.ticket.take();
        if let Some(ticket) = &ticket {
            ticket.mark_running();
        }
        let actor = request.actor;
        let waited = request.enqueued_at.elapsed();

        let result = AssertUnwindSafe(self.execute(&request)).catch_unwind().await;
        let (outcome, failure) = match result {
            Ok(Ok(())) => (RequestOutcome::Completed, None),
            Ok(Err(err)) => (RequestOutcome::from_error(&err), Some(err)),
            Err(payload) => (
                RequestOutcome::Panicked,
                Some(EngineError::InternalPanic(panic_message(payload.as_ref()))),
            ),
        };
        self.stats.record(outcome);

        // Cleanup below must run even if the gateway panics
        if let Some(err) = failure {
            if let Err(payload) = AssertUnwindSafe(self.report(worker, &request, &err))
                .catch_unwind()
                .await
            {
                error!(worker, actor = %actor, "Error notice panicked: {}", panic_message(payload.as_ref()));
            }
        }

        // Release the flag first so the actor may start a new turn
        if let Some(message) = ticket.and_then(ProcessingTicket::finish) {
            match AssertUnwindSafe(self.deps.gateway.delete_message(message))
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => {}
                Ok(Err(e)) => debug!(actor = %actor, "Failed to delete waiting message: {e}"),
                Err(payload) => error!(
                    worker,
                    actor = %actor,
                    "Deleting waiting message panicked: {}",
                    panic_message(payload.as_ref())
                ),
            }
        }

        info!(
            worker,
            actor = %actor,
            outcome = outcome.label(),
            queued_ms = waited.as_millis(),
            elapsed_ms = request.enqueued_at.elapsed().as_millis(),
            "Request finished"
        );
    }

    async fn execute(&self, request: &Request) -> Result<(), EngineError> {
        if request.cancellation().is_cancelled() {
            return Err(EngineError::Canceled);
        }
        if !self.deps.limiter.check_rate_limit(request.actor) {
            return Err(EngineError::RateLimited);
        }

        let cache_key = self
            .deps
            .cache
            .as_ref()
            .map(|_| CacheKey::new(request.actor, &request.text));
        if let (Some(cache), Some(key)) = (&self.deps.cache, &cache_key) {
            if let Some(reply) = cache.get(key) {
                debug!(actor = %request.actor, "Reply served from cache");
                self.deliver(request, &reply).await;
                return Ok(());
            }
        }

        if let Err(e) = self.deps.gateway.send_typing(request.chat).await {
            debug!("Failed to send typing indicator: {e}");
        }
        let _notices = self.spawn_wait_notices(request);

        let call = self.deps.responder.process_message(
            request.actor,
            &request.display_name,
            &request.text,
        );
        let reply = tokio::select! {
            biased;
            () = request.cancellation().cancelled() => return Err(EngineError::Canceled),
            () = self.root.cancelled() => return Err(EngineError::Canceled),
            result = tokio::time::timeout(self.config.call_timeout, call) => match result {
                Err(_) => return Err(EngineError::Timeout),
                Ok(Err(e)) => return Err(EngineError::Upstream(e.to_string())),
                Ok(Ok(reply)) => reply,
            },
        };

        if let (Some(cache), Some(key)) = (&self.deps.cache, cache_key) {
            cache.set(key, reply.clone());
        }
        self.deliver(request, &reply).await;
        Ok(())
    }

    async fn deliver(&self, request: &Request, reply: &str) {
        for part in split_long_message(reply, TELEGRAM_MESSAGE_LIMIT) {
            if let Err(e) = self.deps.gateway.send_text(request.chat, &part).await {
                warn!(actor = %request.actor, "Failed to deliver reply: {e}");
                return;
            }
        }

        let Some(handler) = &self.deps.suggestions else {
            return;
        };
        let Some(suggestion) = parse_suggestion(reply) else {
            return;
        };
        if let Some(prompt) =
            handler.on_suggestion(request.actor, request.chat, suggestion, request.locale)
        {
            if let Err(e) = self.deps.gateway.send_text(request.chat, &prompt).await {
                warn!(actor = %request.actor, "Failed to send suggestion prompt: {e}");
            }
        }
    }

    /// Escalating "still working" edits of the waiting message, stopped when
    /// the returned guard is dropped.
    fn spawn_wait_notices(&self, request: &Request) -> Option<DropGuard> {
        let interval = self.config.wait_notice_interval;
        if interval.is_zero() {
            return None;
        }

        let token = self.root.child_token();
        let stop = token.clone();
        let guard = Arc::clone(&self.deps.guard);
        let gateway = Arc::clone(&self.deps.gateway);
        let (actor, locale) = (request.actor, request.locale);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    () = stop.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(level) = guard.bump_warning(actor) else { break };
                        let Some(message) = guard.waiting_message(actor) else { continue };
                        if let Err(e) = gateway.edit_text(message, &views::wait_notice(locale, level)).await {
                            debug!(actor = %actor, "Failed to update wait notice: {e}");
                        }
                    }
                }
            }
        });

        Some(token.drop_guard())
    }

    async fn report(&self, worker: usize, request: &Request, err: &EngineError) {
        match err {
            EngineError::Timeout => {
                warn!(worker, actor = %request.actor, timeout_secs = self.config.call_timeout.as_secs(), "Responder timed out");
            }
            err if err.is_server_fault() => {
                error!(worker, actor = %request.actor, kind = err.label(), "Request failed: {err}");
            }
            err => {
                debug!(worker, actor = %request.actor, kind = err.label(), "Request ended early");
            }
        }

        let text = views::error_text(request.locale, err);
        if let Err(e) = self.deps.gateway.send_text(request.chat, &text).await {
            warn!(actor = %request.actor, "Failed to send error notice: {e}");
        }
    }
}
