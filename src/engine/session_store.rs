//! Keyed, mutex-protected flow sessions
//!
//! Each flow kind owns one [`KeyedSessionStore`]. A session is a singleton per
//! actor within its store and is only mutated through read-modify-write under
//! the store's lock.

use crate::gateway::MessageRef;
use crate::ActorId;
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::time::Instant;

/// Payload of a multi-step flow.
pub trait FlowState: Clone + Send + Sync + 'static {
    /// Stage enum of the flow
    type Stage: Copy + Eq + Debug + Send + Sync + 'static;

    /// Flow name used in logs
    const KIND: &'static str;
}

/// One in-flight flow of kind `F` for one actor.
#[derive(Debug, Clone)]
pub struct Session<F: FlowState> {
    /// Current stage
    pub stage: F::Stage,
    /// Flow payload collected so far
    pub data: F,
    /// When the session was created
    pub created_at: Instant,
    /// Last stage transition or payload change
    pub updated_at: Instant,
    /// Message edited in place as the flow advances
    pub anchor: Option<MessageRef>,
}

/// Whether [`KeyedSessionStore::update_or_remove`] keeps the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Keep the session
    Keep,
    /// Delete the session under the same lock
    Remove,
}

/// Map of actor to session for one flow kind.
#[derive(Debug)]
pub struct KeyedSessionStore<F: FlowState> {
    sessions: Mutex<HashMap<ActorId, Session<F>>>,
}

impl<F: FlowState> Default for KeyedSessionStore<F> {
    fn default() -> Self {
        Self::new()
    }
}

impl<F: FlowState> KeyedSessionStore<F> {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ActorId, Session<F>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start a flow, replacing any session of this kind the actor had.
    pub fn create(&self, actor: ActorId, stage: F::Stage, data: F) {
        let now = Instant::now();
        let replaced = self.lock().insert(
            actor,
            Session {
                stage,
                data,
                created_at: now,
                updated_at: now,
                anchor: None,
            },
        );
        if replaced.is_some() {
            tracing::debug!(actor = %actor, kind = F::KIND, "Session replaced");
        }
    }

    /// Snapshot of the actor's session
    #[must_use]
    pub fn get(&self, actor: ActorId) -> Option<Session<F>> {
        self.lock().get(&actor).cloned()
    }

    /// Apply `f` to the session under the lock and bump its update time.
    ///
    /// Returns `None` without calling `f` if there is no session.
    pub fn update<R>(&self, actor: ActorId, f: impl FnOnce(&mut Session<F>) -> R) -> Option<R> {
        let mut sessions = self.lock();
        let session = sessions.get_mut(&actor)?;
        let result = f(session);
        session.updated_at = Instant::now();
        Some(result)
    }

    /// Like [`Self::update`], but `f` decides whether the session survives.
    pub fn update_or_remove<R>(
        &self,
        actor: ActorId,
        f: impl FnOnce(&mut Session<F>) -> (R, Disposition),
    ) -> Option<R> {
        let mut sessions = self.lock();
        let session = sessions.get_mut(&actor)?;
        let (result, disposition) = f(session);
        match disposition {
            Disposition::Keep => session.updated_at = Instant::now(),
            Disposition::Remove => {
                sessions.remove(&actor);
            }
        }
        Some(result)
    }

    /// Attach the message edited in place by this flow.
    pub fn set_anchor(&self, actor: ActorId, anchor: MessageRef) -> bool {
        self.update(actor, |session| session.anchor = Some(anchor))
            .is_some()
    }

    /// Remove and return the actor's session
    pub fn delete(&self, actor: ActorId) -> Option<Session<F>> {
        self.lock().remove(&actor)
    }

    /// Whether the actor has a session of this kind
    #[must_use]
    pub fn contains(&self, actor: ActorId) -> bool {
        self.lock().contains_key(&actor)
    }

    /// Delete sessions not updated within `idle_timeout`.
    pub fn sweep(&self, idle_timeout: Duration) -> usize {
        let now = Instant::now();
        let mut sessions = self.lock();
        let before = sessions.len();
        sessions.retain(|_, session| now.duration_since(session.updated_at) <= idle_timeout);
        before - sessions.len()
    }

    /// Number of active sessions
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether there are no sessions
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Object-safe view of a session store, used by the reaper and `/cancel`.
pub trait Sweepable: Send + Sync {
    /// Flow name
    fn kind(&self) -> &'static str;
    /// Delete idle sessions, returning how many were removed
    fn sweep(&self, idle_timeout: Duration) -> usize;
    /// Number of active sessions
    fn len(&self) -> usize;
    /// Whether there are no sessions
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
    /// Drop the actor's session, returning whether one existed
    fn discard(&self, actor: ActorId) -> bool;
}

impl<F: FlowState> Sweepable for KeyedSessionStore<F> {
    fn kind(&self) -> &'static str {
        F::KIND
    }

    fn sweep(&self, idle_timeout: Duration) -> usize {
        Self::sweep(self, idle_timeout)
    }

    fn len(&self) -> usize {
        Self::len(self)
    }

    fn discard(&self, actor: ActorId) -> bool {
        self.delete(actor).is_some()
    }
}
