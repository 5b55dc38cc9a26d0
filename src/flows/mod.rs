//! Multi-step flows
//!
//! Each flow is a [`FlowState`] payload with its own stage enum and a pure
//! `advance` transition run inside [`KeyedSessionStore::update_or_remove`].
//! Side effects of a finished flow are performed by the dispatcher after the
//! store lock is released.

/// Administrator login
pub mod admin_auth;
/// Order checkout
pub mod checkout;
/// Stock adjustment
pub mod inventory;
/// Delayed reminder
pub mod reminder;
/// Language preference wizard
pub mod wizard;

use crate::engine::session_store::{Disposition, FlowState, KeyedSessionStore, Session, Sweepable};
use crate::gateway::{Locale, MessageRef};
use crate::ActorId;
use std::sync::Arc;

pub use admin_auth::AdminAuth;
pub use checkout::Checkout;
pub use inventory::InventoryAdjust;
pub use reminder::ReminderSetup;
pub use wizard::ConfigWizard;

/// Result of feeding one input to a flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<O> {
    /// Input accepted, ask the next question
    Prompt(String),
    /// Input rejected, ask again
    Retry(String),
    /// Flow finished with an outcome
    Done(O),
    /// Flow ended without an outcome
    Abort(String),
}

impl<O> Step<O> {
    /// Whether the session should be removed after this step
    #[must_use]
    pub const fn disposition(&self) -> Disposition {
        match self {
            Self::Prompt(_) | Self::Retry(_) => Disposition::Keep,
            Self::Done(_) | Self::Abort(_) => Disposition::Remove,
        }
    }

    /// Split into the outcome of a finished flow or the text to show the actor
    ///
    /// # Errors
    ///
    /// `Err` carries the prompt, retry or abort text of an unfinished step.
    pub fn into_outcome(self) -> Result<O, String> {
        match self {
            Self::Done(outcome) => Ok(outcome),
            Self::Prompt(text) | Self::Retry(text) | Self::Abort(text) => Err(text),
        }
    }
}

/// Pick the text for `locale`
#[must_use]
pub const fn tr(locale: Locale, en: &'static str, ru: &'static str) -> &'static str {
    match locale {
        Locale::En => en,
        Locale::Ru => ru,
    }
}

/// Interpret a yes/no answer in either language
#[must_use]
pub fn parse_yes_no(input: &str) -> Option<bool> {
    match input.trim().to_lowercase().as_str() {
        "yes" | "y" | "ok" | "да" | "д" | "ага" => Some(true),
        "no" | "n" | "нет" | "н" => Some(false),
        _ => None,
    }
}

/// Feed one input to the actor's session, removing it if the step ends the flow.
///
/// Also returns the session's anchor message. `None` if the actor has no
/// session of this kind.
pub fn drive<F, O>(
    store: &KeyedSessionStore<F>,
    actor: ActorId,
    advance: impl FnOnce(&mut Session<F>) -> Step<O>,
) -> Option<(Step<O>, Option<MessageRef>)>
where
    F: FlowState,
{
    store.update_or_remove(actor, |session| {
        let step = advance(session);
        let disposition = step.disposition();
        ((step, session.anchor), disposition)
    })
}

/// One session store per flow kind
#[derive(Debug, Clone, Default)]
pub struct FlowStores {
    /// Checkout sessions
    pub checkout: Arc<KeyedSessionStore<Checkout>>,
    /// Settings wizard sessions
    pub wizard: Arc<KeyedSessionStore<ConfigWizard>>,
    /// Admin login sessions
    pub admin_auth: Arc<KeyedSessionStore<AdminAuth>>,
    /// Stock adjustment sessions
    pub inventory: Arc<KeyedSessionStore<InventoryAdjust>>,
    /// Reminder sessions
    pub reminder: Arc<KeyedSessionStore<ReminderSetup>>,
}

impl FlowStores {
    /// Create empty stores
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All stores as sweepable views, in routing priority order
    #[must_use]
    pub fn sweepables(&self) -> Vec<Arc<dyn Sweepable>> {
        vec![
            Arc::clone(&self.admin_auth) as Arc<dyn Sweepable>,
            Arc::clone(&self.inventory) as Arc<dyn Sweepable>,
            Arc::clone(&self.reminder) as Arc<dyn Sweepable>,
            Arc::clone(&self.wizard) as Arc<dyn Sweepable>,
            Arc::clone(&self.checkout) as Arc<dyn Sweepable>,
        ]
    }

    /// Drop every session of the actor, returning how many existed
    pub fn discard_all(&self, actor: ActorId) -> usize {
        self.sweepables()
            .iter()
            .filter(|store| store.discard(actor))
            .count()
    }

    /// Sessions across all kinds
    #[must_use]
    pub fn total(&self) -> usize {
        self.sweepables().iter().map(|store| store.len()).sum()
    }
}
