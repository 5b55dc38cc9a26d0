//! Per-actor processing flag with waiting-message lifecycle
//!
//! At most one long-running operation per actor. The flag is normally held
//! through a [`ProcessingTicket`], which releases it on drop so every exit
//! path (success, rejected submit, panic unwinding) clears it exactly once.

use crate::gateway::MessageRef;
use crate::ActorId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Where an in-flight operation currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Flag taken, not yet handed to the worker queue
    Acquired,
    /// Waiting in the worker queue
    Queued,
    /// Picked up by a worker
    Running,
}

#[derive(Debug)]
struct ProcessingState {
    generation: u64,
    phase: Phase,
    since: Instant,
    waiting: Option<MessageRef>,
    warnings: u32,
    cancel: CancellationToken,
}

/// Tracks which actors currently have an operation in flight.
#[derive(Debug, Default)]
pub struct ProcessingGuard {
    active: Mutex<HashMap<ActorId, ProcessingState>>,
    next_generation: AtomicU64,
}

impl ProcessingGuard {
    /// Create an empty guard
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ActorId, ProcessingState>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn insert_if_idle(&self, actor: ActorId) -> Option<(u64, CancellationToken)> {
        let mut active = self.lock();
        if active.contains_key(&actor) {
            return None;
        }
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();
        active.insert(
            actor,
            ProcessingState {
                generation,
                phase: Phase::Acquired,
                since: Instant::now(),
                waiting: None,
                warnings: 0,
                cancel: cancel.clone(),
            },
        );
        Some((generation, cancel))
    }

    /// Mark `actor` as processing. Returns `false` if it already is.
    ///
    /// Prefer [`Self::try_acquire`], which cannot leak the flag.
    pub fn start_processing(&self, actor: ActorId) -> bool {
        self.insert_if_idle(actor).is_some()
    }

    /// Mark `actor` as processing and hand out the owning ticket.
    ///
    /// Returns `None` if an operation is already in flight for the actor.
    pub fn try_acquire(self: &Arc<Self>, actor: ActorId) -> Option<ProcessingTicket> {
        let (generation, cancel) = self.insert_if_idle(actor)?;
        Some(ProcessingTicket {
            guard: Arc::clone(self),
            actor,
            generation,
            cancel,
            released: false,
        })
    }

    /// Clear the flag. Idempotent.
    ///
    /// Returns the waiting message still attached to the flag, if any, so the
    /// caller can delete it.
    pub fn end_processing(&self, actor: ActorId) -> Option<MessageRef> {
        self.lock().remove(&actor).and_then(|state| state.waiting)
    }

    fn end_generation(&self, actor: ActorId, generation: u64) -> Option<MessageRef> {
        let mut active = self.lock();
        match active.get(&actor) {
            Some(state) if state.generation == generation => {
                active.remove(&actor).and_then(|state| state.waiting)
            }
            Some(_) => {
                debug!(actor = %actor, generation, "Stale ticket ignored");
                None
            }
            None => None,
        }
    }

    fn set_phase(&self, actor: ActorId, generation: u64, phase: Phase) {
        if let Some(state) = self.lock().get_mut(&actor) {
            if state.generation == generation {
                state.phase = phase;
                state.since = Instant::now();
            }
        }
    }

    /// Current phase of the actor's operation
    #[must_use]
    pub fn phase(&self, actor: ActorId) -> Option<Phase> {
        self.lock().get(&actor).map(|state| state.phase)
    }

    /// Whether an operation is in flight for `actor`
    #[must_use]
    pub fn is_processing(&self, actor: ActorId) -> bool {
        self.lock().contains_key(&actor)
    }

    /// Attach the "please wait" message to the in-flight operation.
    ///
    /// Returns `false` if the actor is not processing or already has a waiting
    /// message; the caller then still owns `message`.
    pub fn set_waiting_message(&self, actor: ActorId, message: MessageRef) -> bool {
        match self.lock().get_mut(&actor) {
            Some(state) if state.waiting.is_none() => {
                state.waiting = Some(message);
                true
            }
            _ => false,
        }
    }

    /// Peek at the waiting message without taking it
    #[must_use]
    pub fn waiting_message(&self, actor: ActorId) -> Option<MessageRef> {
        self.lock().get(&actor).and_then(|state| state.waiting)
    }

    /// Detach the waiting message. Each message is handed out exactly once.
    pub fn clear_waiting_message(&self, actor: ActorId) -> Option<MessageRef> {
        self.lock()
            .get_mut(&actor)
            .and_then(|state| state.waiting.take())
    }

    /// Increment the escalating wait-notice counter, returning the new level.
    pub fn bump_warning(&self, actor: ActorId) -> Option<u32> {
        self.lock().get_mut(&actor).map(|state| {
            state.warnings += 1;
            state.warnings
        })
    }

    /// Cancel the in-flight operation of `actor`, if any.
    pub fn cancel(&self, actor: ActorId) -> bool {
        match self.lock().get(&actor) {
            Some(state) => {
                state.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Force-clear flags that have sat in one phase longer than `max_age`.
    ///
    /// Queued flags are never swept; their age counts from the moment a worker
    /// picks them up. Swept operations are cancelled; the returned waiting
    /// messages are orphaned and should be deleted by the caller.
    pub fn sweep_stale(&self, max_age: Duration) -> Vec<(ActorId, Option<MessageRef>)> {
        let now = Instant::now();
        let mut active = self.lock();
        let stale: Vec<ActorId> = active
            .iter()
            .filter(|(_, state)| {
                state.phase != Phase::Queued && now.duration_since(state.since) > max_age
            })
            .map(|(actor, _)| *actor)
            .collect();

        stale
            .into_iter()
            .filter_map(|actor| {
                active.remove(&actor).map(|state| {
                    state.cancel.cancel();
                    warn!(actor = %actor, "Stale processing flag cleared");
                    (actor, state.waiting)
                })
            })
            .collect()
    }

    /// Number of actors with an operation in flight
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.lock().len()
    }
}

/// Owned claim on an actor's processing flag.
#[derive(Debug)]
pub struct ProcessingTicket {
    guard: Arc<ProcessingGuard>,
    actor: ActorId,
    generation: u64,
    cancel: CancellationToken,
    released: bool,
}

impl ProcessingTicket {
    /// Actor this ticket belongs to
    #[must_use]
    pub const fn actor(&self) -> ActorId {
        self.actor
    }

    /// Token cancelled by `/cancel` or the stale-flag sweep
    #[must_use]
    pub const fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Record that the operation entered the worker queue
    pub fn mark_queued(&self) {
        self.guard.set_phase(self.actor, self.generation, Phase::Queued);
    }

    /// Record that a worker started the operation; restarts the stale clock
    pub fn mark_running(&self) {
        self.guard.set_phase(self.actor, self.generation, Phase::Running);
    }

    /// Release the flag and take the waiting message, if still attached.
    pub fn finish(mut self) -> Option<MessageRef> {
        self.released = true;
        self.guard.end_generation(self.actor, self.generation)
    }
}

impl Drop for ProcessingTicket {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Some(message) = self.guard.end_generation(self.actor, self.generation) {
            warn!(
                actor = %self.actor,
                message_id = message.message_id,
                "Ticket dropped with a waiting message attached"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ChatId;

    const ACTOR: ActorId = ActorId(1);
    const WAITING: MessageRef = MessageRef {
        chat: ChatId(10),
        message_id: 5,
    };

    #[test]
    fn start_is_exclusive_until_end() {
        let guard = ProcessingGuard::new();
        assert!(guard.start_processing(ACTOR));
        assert!(!guard.start_processing(ACTOR));
        assert!(guard.is_processing(ACTOR));

        guard.end_processing(ACTOR);
        guard.end_processing(ACTOR);
        assert!(!guard.is_processing(ACTOR));
        assert!(guard.start_processing(ACTOR));
    }

    #[test]
    fn waiting_message_is_handed_out_once() {
        let guard = ProcessingGuard::new();
        assert!(!guard.set_waiting_message(ACTOR, WAITING));

        guard.start_processing(ACTOR);
        assert!(guard.set_waiting_message(ACTOR, WAITING));
        assert!(!guard.set_waiting_message(ACTOR, WAITING));
        assert_eq!(guard.waiting_message(ACTOR), Some(WAITING));

        assert_eq!(guard.clear_waiting_message(ACTOR), Some(WAITING));
        assert_eq!(guard.clear_waiting_message(ACTOR), None);
        assert_eq!(guard.end_processing(ACTOR), None);
    }

    #[test]
    fn dropped_ticket_releases_flag() {
        let guard = Arc::new(ProcessingGuard::new());
        {
            let ticket = guard.try_acquire(ACTOR).expect("idle actor");
            assert!(guard.try_acquire(ACTOR).is_none());
            assert_eq!(ticket.actor(), ACTOR);
        }
        assert!(!guard.is_processing(ACTOR));
    }

    #[test]
    fn finish_returns_waiting_message() {
        let guard = Arc::new(ProcessingGuard::new());
        let ticket = guard.try_acquire(ACTOR).expect("idle actor");
        guard.set_waiting_message(ACTOR, WAITING);

        assert_eq!(ticket.finish(), Some(WAITING));
        assert!(!guard.is_processing(ACTOR));
    }

    #[test]
    fn stale_ticket_does_not_clear_newer_flag() {
        let guard = Arc::new(ProcessingGuard::new());
        let old = guard.try_acquire(ACTOR).expect("idle actor");
        // Force-clear, then a new operation starts
        guard.end_processing(ACTOR);
        let _new = guard.try_acquire(ACTOR).expect("flag was cleared");

        drop(old);
        assert!(guard.is_processing(ACTOR));
    }

    #[test]
    fn cancel_reaches_ticket_token() {
        let guard = Arc::new(ProcessingGuard::new());
        let ticket = guard.try_acquire(ACTOR).expect("idle actor");
        assert!(guard.cancel(ACTOR));
        assert!(ticket.cancellation().is_cancelled());
        assert!(!guard.cancel(ActorId(2)));
    }

    #[test]
    fn bump_warning_counts_up() {
        let guard = ProcessingGuard::new();
        assert_eq!(guard.bump_warning(ACTOR), None);
        guard.start_processing(ACTOR);
        assert_eq!(guard.bump_warning(ACTOR), Some(1));
        assert_eq!(guard.bump_warning(ACTOR), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_stale_clears_old_flags_and_returns_orphans() {
        let guard = Arc::new(ProcessingGuard::new());
        let ticket = guard.try_acquire(ACTOR).expect("idle actor");
        guard.set_waiting_message(ACTOR, WAITING);

        tokio::time::advance(Duration::from_secs(120)).await;
        guard.start_processing(ActorId(2));

        let swept = guard.sweep_stale(Duration::from_secs(60));
        assert_eq!(swept, vec![(ACTOR, Some(WAITING))]);
        assert!(ticket.cancellation().is_cancelled());
        assert_eq!(guard.active_count(), 1);

        // The late ticket finds nothing to release
        assert_eq!(ticket.finish(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_flags_are_not_swept() {
        let guard = Arc::new(ProcessingGuard::new());
        let ticket = guard.try_acquire(ACTOR).expect("idle actor");
        ticket.mark_queued();
        assert_eq!(guard.phase(ACTOR), Some(Phase::Queued));

        tokio::time::advance(Duration::from_secs(1000)).await;
        assert!(guard.sweep_stale(Duration::from_secs(300)).is_empty());
        assert!(!ticket.cancellation().is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn running_age_counts_from_pickup() {
        let guard = Arc::new(ProcessingGuard::new());
        let ticket = guard.try_acquire(ACTOR).expect("idle actor");
        ticket.mark_queued();
        tokio::time::advance(Duration::from_secs(250)).await;

        ticket.mark_running();
        assert_eq!(guard.phase(ACTOR), Some(Phase::Running));
        tokio::time::advance(Duration::from_secs(100)).await;
        assert!(guard.sweep_stale(Duration::from_secs(300)).is_empty());

        tokio::time::advance(Duration::from_secs(201)).await;
        assert_eq!(guard.sweep_stale(Duration::from_secs(300)), vec![(ACTOR, None)]);
        assert!(ticket.cancellation().is_cancelled());
    }

    #[test]
    fn stale_ticket_cannot_change_newer_phase() {
        let guard = Arc::new(ProcessingGuard::new());
        let old = guard.try_acquire(ACTOR).expect("idle actor");
        guard.end_processing(ACTOR);
        let _new = guard.try_acquire(ACTOR).expect("flag was cleared");

        old.mark_running();
        assert_eq!(guard.phase(ACTOR), Some(Phase::Acquired));
    }
}
