//! Inbound event routing
//!
//! Every event is handled in its own task. Commands come first, then the
//! actor's active flow session, and anything else becomes an AI-backed turn
//! submitted to the worker pool.

use super::admin_grants::AdminGrants;
use super::commands::Command;
use super::views;
use crate::engine::{
    CacheKey, FlowState, KeyedSessionStore, PendingApprovals, ProcessingGuard, Request,
    ResponseCache, Session, SubmitError, WorkerPool,
};
use crate::flows::{admin_auth, checkout, drive, inventory, reminder, wizard, FlowStores};
use crate::gateway::{ChatId, InboundEvent, Locale, MessageRef, MessagingGateway};
use crate::ActorId;
use anyhow::Result;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Shared components the dispatcher routes to
#[derive(Clone)]
pub struct DispatcherDeps {
    /// Outbound messaging
    pub gateway: Arc<dyn MessagingGateway>,
    /// Executes AI-backed turns
    pub pool: Arc<WorkerPool>,
    /// Per-actor processing flags
    pub guard: Arc<ProcessingGuard>,
    /// Flow session stores
    pub flows: FlowStores,
    /// Orders waiting for `/approve`
    pub approvals: PendingApprovals,
    /// Admin rights
    pub admins: AdminGrants,
    /// Reply cache, reported by `/stats`
    pub cache: Option<Arc<ResponseCache<CacheKey, String>>>,
}

/// Dispatcher behaviour knobs
#[derive(Debug, Clone, Default)]
pub struct DispatcherConfig {
    /// Password expected by `/admin`; login is disabled when unset
    pub admin_password: Option<String>,
    /// Upper bound of `/remind` delays, minutes
    pub max_reminder_delay_mins: u64,
    /// Bound on concurrently handled events; unbounded when unset
    pub max_in_flight: Option<usize>,
    /// Bot username, for commands addressed as `/cmd@bot`
    pub bot_name: String,
}

/// Routes inbound events to commands, flows or the worker pool.
pub struct Dispatcher {
    deps: DispatcherDeps,
    config: DispatcherConfig,
    preferences: Cache<ActorId, Locale>,
    in_flight: Option<Arc<Semaphore>>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    /// Create a dispatcher. `shutdown` stops scheduled reminders.
    #[must_use]
    pub fn new(deps: DispatcherDeps, config: DispatcherConfig, shutdown: CancellationToken) -> Self {
        let preferences = Cache::builder()
            .max_capacity(100_000)
            .time_to_idle(Duration::from_secs(30 * 24 * 3600))
            .build();
        let in_flight = config
            .max_in_flight
            .map(|limit| Arc::new(Semaphore::new(limit.max(1))));
        Self {
            deps,
            config,
            preferences,
            in_flight,
            shutdown,
        }
    }

    /// Handle `event` in a new task.
    pub fn spawn_event(self: &Arc<Self>, event: InboundEvent) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let _permit = match &this.in_flight {
                Some(semaphore) => match Arc::clone(semaphore).acquire_owned().await {
                    Ok(permit) => Some(permit),
                    Err(_) => return,
                },
                None => None,
            };
            let actor = event.actor;
            if let Err(e) = this.handle_event(event).await {
                error!(actor = %actor, "Event handling failed: {e:#}");
            }
        })
    }

    /// Route one event.
    ///
    /// # Errors
    ///
    /// Returns an error if a reply cannot be delivered.
    pub async fn handle_event(&self, event: InboundEvent) -> Result<()> {
        let locale = self.locale_for(&event).await;
        let text = event.text.trim();
        debug!(actor = %event.actor, chars = text.chars().count(), "Inbound event");

        if text.starts_with('/') {
            return match Command::from_text(text, &self.config.bot_name) {
                Some(command) => self.handle_command(command, &event, locale).await,
                None => self.say(event.chat, views::help_text(locale)).await,
            };
        }

        if self.advance_flow(&event, locale).await? {
            return Ok(());
        }

        self.start_ai_turn(event, locale).await
    }

    async fn locale_for(&self, event: &InboundEvent) -> Locale {
        match self.preferences.get(&event.actor).await {
            Some(locale) => locale,
            None => Locale::from_language_code(event.language_code.as_deref()),
        }
    }

    async fn say(&self, chat: ChatId, text: &str) -> Result<()> {
        self.deps.gateway.send_text(chat, text).await?;
        Ok(())
    }

    /// Final message of a flow: edit the anchor in place, or send a new message.
    async fn finish(&self, chat: ChatId, anchor: Option<MessageRef>, text: &str) -> Result<()> {
        if let Some(anchor) = anchor {
            match self.deps.gateway.edit_text(anchor, text).await {
                Ok(()) => return Ok(()),
                Err(e) => debug!("Anchor edit failed, sending instead: {e}"),
            }
        }
        self.say(chat, text).await
    }

    async fn open_flow<F: FlowState + Default>(
        &self,
        store: &KeyedSessionStore<F>,
        event: &InboundEvent,
        stage: F::Stage,
        prompt: impl FnOnce(&Session<F>) -> String,
    ) -> Result<()> {
        self.deps.flows.discard_all(event.actor);
        store.create(event.actor, stage, F::default());
        let Some(session) = store.get(event.actor) else {
            return Ok(());
        };
        let sent = self.deps.gateway.send_text(event.chat, &prompt(&session)).await?;
        store.set_anchor(event.actor, sent);
        debug!(actor = %event.actor, kind = F::KIND, "Flow started");
        Ok(())
    }

    async fn handle_command(&self, command: Command, event: &InboundEvent, locale: Locale) -> Result<()> {
        let (actor, chat) = (event.actor, event.chat);
        let flows = &self.deps.flows;
        info!(actor = %actor, ?command, "Command");

        match command {
            Command::Start => {
                self.say(chat, &views::welcome_text(locale, &event.display_name))
                    .await
            }
            Command::Help => self.say(chat, views::help_text(locale)).await,
            Command::Cancel => {
                let sessions = flows.discard_all(actor);
                let operation = self.deps.guard.cancel(actor);
                self.say(chat, views::cancel_text(locale, sessions > 0 || operation))
                    .await
            }
            Command::Checkout => {
                self.open_flow(&flows.checkout, event, checkout::CheckoutStage::AwaitingItem, |s| {
                    checkout::prompt(s, locale)
                })
                .await
            }
            Command::Settings => {
                self.open_flow(&flows.wizard, event, wizard::WizardStage::AwaitingLocale, |s| {
                    wizard::prompt(s, locale)
                })
                .await
            }
            Command::Admin => {
                if self.admin_password().is_none() {
                    return self.say(chat, views::admin_disabled_text(locale)).await;
                }
                self.open_flow(
                    &flows.admin_auth,
                    event,
                    admin_auth::AdminAuthStage::AwaitingPassword,
                    |_| admin_auth::prompt(locale),
                )
                .await
            }
            Command::Logout => {
                self.deps.admins.revoke(actor).await;
                self.say(chat, views::admin_revoked_text(locale)).await
            }
            Command::Stock => {
                if !self.deps.admins.is_admin(actor).await {
                    return self.say(chat, views::admin_only_text(locale)).await;
                }
                self.open_flow(&flows.inventory, event, inventory::InventoryStage::AwaitingSku, |s| {
                    inventory::prompt(s, locale)
                })
                .await
            }
            Command::Remind => {
                self.open_flow(
                    &flows.reminder,
                    event,
                    reminder::ReminderStage::AwaitingText,
                    |s| reminder::prompt(s.stage, locale),
                )
                .await
            }
            Command::Approve(id) => self.approve(event, locale, &id).await,
            Command::Stats => {
                if !self.deps.admins.is_admin(actor).await {
                    return self.say(chat, views::admin_only_text(locale)).await;
                }
                let cache = self
                    .deps
                    .cache
                    .as_ref()
                    .map(|cache| cache.stats())
                    .unwrap_or_default();
                let text = views::stats_text(
                    &self.deps.pool.stats(),
                    self.deps.pool.queue_len(),
                    self.deps.guard.active_count(),
                    flows.total(),
                    &cache,
                );
                self.say(chat, &text).await
            }
        }
    }

    fn admin_password(&self) -> Option<&str> {
        self.config
            .admin_password
            .as_deref()
            .filter(|password| !password.is_empty())
    }

    async fn approve(&self, event: &InboundEvent, locale: Locale, id: &str) -> Result<()> {
        if !self.deps.admins.is_admin(event.actor).await {
            return self.say(event.chat, views::admin_only_text(locale)).await;
        }
        let Some(approval) = self.deps.approvals.take(id).await else {
            return self.say(event.chat, views::approval_missing_text(locale)).await;
        };

        info!(admin = %event.actor, approval = %approval.id, customer = %approval.actor, "Order approved");
        let customer_locale = self
            .preferences
            .get(&approval.actor)
            .await
            .unwrap_or_default();
        if let Err(e) = self
            .deps
            .gateway
            .send_text(
                approval.chat,
                &views::order_approved_text(customer_locale, &approval.summary),
            )
            .await
        {
            warn!(customer = %approval.actor, "Failed to notify customer: {e}");
        }
        self.say(
            event.chat,
            &views::order_approved_text(locale, &approval.summary),
        )
        .await
    }

    /// Feed the event to the actor's active flow. Returns `false` if none is active.
    async fn advance_flow(&self, event: &InboundEvent, locale: Locale) -> Result<bool> {
        let (actor, chat) = (event.actor, event.chat);
        let input = event.text.as_str();
        let flows = &self.deps.flows;

        if let Some(password) = self.admin_password() {
            if let Some((step, anchor)) = drive(&flows.admin_auth, actor, |session| {
                admin_auth::advance(session, input, password, locale)
            }) {
                match step.into_outcome() {
                    Ok(()) => {
                        self.deps.admins.grant(actor).await;
                        self.finish(chat, anchor, views::admin_granted_text(locale)).await?;
                    }
                    Err(text) => self.say(chat, &text).await?,
                }
                return Ok(true);
            }
        }

        if let Some((step, anchor)) = drive(&flows.inventory, actor, |session| {
            inventory::advance(session, input, locale)
        }) {
            match step.into_outcome() {
                Ok(adjustment) => {
                    info!(actor = %actor, sku = %adjustment.sku, delta = adjustment.delta, "Stock adjustment recorded");
                    let text = views::adjustment_logged_text(locale, &adjustment.sku, adjustment.delta);
                    self.finish(chat, anchor, &text).await?;
                }
                Err(text) => self.say(chat, &text).await?,
            }
            return Ok(true);
        }

        let max_delay = self.config.max_reminder_delay_mins;
        if let Some((step, anchor)) = drive(&flows.reminder, actor, |session| {
            reminder::advance(session, input, max_delay, locale)
        }) {
            match step.into_outcome() {
                Ok(scheduled) => {
                    let mins = scheduled.delay.as_secs() / 60;
                    self.schedule_reminder(actor, chat, scheduled);
                    self.finish(chat, anchor, &views::reminder_scheduled_text(locale, mins))
                        .await?;
                }
                Err(text) => self.say(chat, &text).await?,
            }
            return Ok(true);
        }

        if let Some((step, anchor)) = drive(&flows.wizard, actor, |session| {
            wizard::advance(session, input, locale)
        }) {
            match step.into_outcome() {
                Ok(picked) => {
                    self.preferences.insert(actor, picked).await;
                    self.finish(chat, anchor, views::locale_saved_text(picked)).await?;
                }
                Err(text) => self.say(chat, &text).await?,
            }
            return Ok(true);
        }

        if let Some((step, anchor)) = drive(&flows.checkout, actor, |session| {
            checkout::advance(session, input, locale)
        }) {
            match step.into_outcome() {
                Ok(order) => self.submit_order(event, locale, anchor, &order).await?,
                Err(text) => self.say(chat, &text).await?,
            }
            return Ok(true);
        }

        Ok(false)
    }

    async fn submit_order(
        &self,
        event: &InboundEvent,
        locale: Locale,
        anchor: Option<MessageRef>,
        order: &checkout::Order,
    ) -> Result<()> {
        let summary = order.summary();
        let id = self
            .deps
            .approvals
            .insert(event.actor, event.chat, summary.clone())
            .await;

        let notice = views::order_for_admin_text(&id, &event.display_name, &summary);
        for admin_chat in self.deps.admins.notification_chats() {
            if let Err(e) = self.deps.gateway.send_text(ChatId(admin_chat), &notice).await {
                warn!(admin_chat, "Failed to notify admin: {e}");
            }
        }

        self.finish(event.chat, anchor, &views::order_submitted_text(locale, &id))
            .await
    }

    fn schedule_reminder(&self, actor: ActorId, chat: ChatId, reminder: reminder::Reminder) {
        let gateway = Arc::clone(&self.deps.gateway);
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = shutdown.cancelled() => {
                    debug!(actor = %actor, "Reminder dropped on shutdown");
                }
                () = tokio::time::sleep(reminder.delay) => {
                    if let Err(e) = gateway.send_text(chat, &views::reminder_fired_text(&reminder.text)).await {
                        warn!(actor = %actor, "Failed to deliver reminder: {e}");
                    }
                }
            }
        });
    }

    async fn start_ai_turn(&self, event: InboundEvent, locale: Locale) -> Result<()> {
        let InboundEvent {
            actor,
            chat,
            display_name,
            text,
            ..
        } = event;

        let Some(ticket) = self.deps.guard.try_acquire(actor) else {
            debug!(actor = %actor, "Turn rejected, previous one still in flight");
            return self.say(chat, views::busy_text(locale)).await;
        };

        match self
            .deps
            .gateway
            .send_text(chat, views::waiting_text(locale))
            .await
        {
            Ok(waiting) => {
                if !self.deps.guard.set_waiting_message(actor, waiting) {
                    self.delete_quietly(waiting).await;
                }
            }
            Err(e) => warn!(actor = %actor, "Failed to send waiting message: {e}"),
        }

        let request = Request::new(actor, display_name, text, chat, locale).with_ticket(ticket);
        if let Err(SubmitError { reason, request }) = self.deps.pool.submit(request) {
            let waiting = self.deps.guard.clear_waiting_message(actor);
            // Dropping the request releases the processing flag
            drop(request);
            if let Some(waiting) = waiting {
                self.delete_quietly(waiting).await;
            }
            return self.say(chat, &views::error_text(locale, &reason)).await;
        }
        Ok(())
    }

    async fn delete_quietly(&self, message: MessageRef) {
        if let Err(e) = self.deps.gateway.delete_message(message).await {
            debug!("Failed to delete message: {e}");
        }
    }
}
