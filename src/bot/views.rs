//! User-facing engine texts
//!
//! Every [`EngineError`] maps to its own short message in each locale.

use crate::engine::{CacheStats, PoolStatsSnapshot};
use crate::error::EngineError;
use crate::flows::tr;
use crate::gateway::Locale;

/// Message shown for a failed or rejected AI turn
#[must_use]
pub fn error_text(locale: Locale, err: &EngineError) -> String {
    let text = match err {
        EngineError::RateLimited => tr(
            locale,
            "⏳ Too many messages, please slow down.",
            "⏳ Слишком много сообщений, подождите немного.",
        ),
        EngineError::QueueFull => tr(
            locale,
            "🚦 The assistant is busy right now. Please try again in a minute.",
            "🚦 Ассистент сейчас перегружен. Попробуйте через минуту.",
        ),
        EngineError::ShuttingDown => tr(
            locale,
            "🔧 The bot is restarting. Please try again shortly.",
            "🔧 Бот перезапускается. Попробуйте чуть позже.",
        ),
        EngineError::Timeout => tr(
            locale,
            "⌛ The assistant took too long to answer. Please try again.",
            "⌛ Ассистент отвечал слишком долго. Попробуйте ещё раз.",
        ),
        EngineError::Canceled => tr(locale, "⛔ Request cancelled.", "⛔ Запрос отменён."),
        EngineError::Upstream(_) => tr(
            locale,
            "❌ The assistant is unavailable. Please try again later.",
            "❌ Ассистент недоступен. Попробуйте позже.",
        ),
        EngineError::InternalPanic(_) => tr(
            locale,
            "💥 Something went wrong on our side.",
            "💥 Что-то пошло не так на нашей стороне.",
        ),
    };
    text.to_string()
}

/// Text of the waiting message, escalated by `level`
#[must_use]
pub fn wait_notice(locale: Locale, level: u32) -> String {
    match (locale, level) {
        (_, 0) => waiting_text(locale).to_string(),
        (Locale::En, 1) => "⏳ Still thinking...".to_string(),
        (Locale::Ru, 1) => "⏳ Всё ещё думаю...".to_string(),
        (Locale::En, _) => format!("⏳ This is taking longer than usual ({level})... /cancel to stop."),
        (Locale::Ru, _) => format!("⏳ Это занимает больше времени, чем обычно ({level})... /cancel чтобы остановить."),
    }
}

/// Initial waiting message
#[must_use]
pub const fn waiting_text(locale: Locale) -> &'static str {
    tr(locale, "⏳ Thinking...", "⏳ Думаю...")
}

/// Reply to a turn sent while another one is in flight
#[must_use]
pub const fn busy_text(locale: Locale) -> &'static str {
    tr(
        locale,
        "⏳ Still working on your previous message. Send /cancel to stop it.",
        "⏳ Ещё обрабатываю предыдущее сообщение. Отправьте /cancel, чтобы остановить.",
    )
}

/// Greeting for `/start`
#[must_use]
pub fn welcome_text(locale: Locale, name: &str) -> String {
    match locale {
        Locale::En => format!("👋 Hi, {name}! Ask me about our products, or use /checkout to order."),
        Locale::Ru => format!("👋 Привет, {name}! Спросите меня о товарах или оформите заказ через /checkout."),
    }
}

/// Reply to `/cancel`
#[must_use]
pub const fn cancel_text(locale: Locale, anything: bool) -> &'static str {
    if anything {
        tr(locale, "✅ Cancelled.", "✅ Отменено.")
    } else {
        tr(locale, "Nothing to cancel.", "Нечего отменять.")
    }
}

/// Reply to admin-only commands from non-admins
#[must_use]
pub const fn admin_only_text(locale: Locale) -> &'static str {
    tr(
        locale,
        "🔒 Admins only. Use /admin to log in.",
        "🔒 Только для администраторов. Войдите через /admin.",
    )
}

/// Reply to `/admin` when no password is configured
#[must_use]
pub const fn admin_disabled_text(locale: Locale) -> &'static str {
    tr(locale, "Admin login is disabled.", "Вход администратора отключён.")
}

/// Admin login succeeded
#[must_use]
pub const fn admin_granted_text(locale: Locale) -> &'static str {
    tr(locale, "🔓 Admin mode enabled.", "🔓 Режим администратора включён.")
}

/// Reply to `/logout`
#[must_use]
pub const fn admin_revoked_text(locale: Locale) -> &'static str {
    tr(locale, "🔒 Admin mode disabled.", "🔒 Режим администратора выключен.")
}

/// Customer confirmation of a submitted order
#[must_use]
pub fn order_submitted_text(locale: Locale, id: &str) -> String {
    match locale {
        Locale::En => format!("📦 Order {id} sent for approval."),
        Locale::Ru => format!("📦 Заказ {id} отправлен на подтверждение."),
    }
}

/// Admin notification about a new order
#[must_use]
pub fn order_for_admin_text(id: &str, customer: &str, summary: &str) -> String {
    format!("🛒 New order {id} from {customer}:\n{summary}\n\n/approve {id}")
}

/// Customer notification once an admin approved the order
#[must_use]
pub fn order_approved_text(locale: Locale, summary: &str) -> String {
    match locale {
        Locale::En => format!("✅ Your order was approved: {summary}"),
        Locale::Ru => format!("✅ Ваш заказ подтверждён: {summary}"),
    }
}

/// `/approve` with an unknown or expired id
#[must_use]
pub const fn approval_missing_text(locale: Locale) -> &'static str {
    tr(
        locale,
        "No pending order with that id (it may have expired).",
        "Нет ожидающего заказа с таким номером (возможно, истёк срок).",
    )
}

/// Confirmation of a stored language preference
#[must_use]
pub const fn locale_saved_text(locale: Locale) -> &'static str {
    tr(locale, "✅ Language saved.", "✅ Язык сохранён.")
}

/// Confirmation of a logged stock adjustment
#[must_use]
pub fn adjustment_logged_text(locale: Locale, sku: &str, delta: i64) -> String {
    match locale {
        Locale::En => format!("📝 Stock change {delta:+} for {sku} recorded."),
        Locale::Ru => format!("📝 Изменение остатка {delta:+} для {sku} записано."),
    }
}

/// Confirmation of a scheduled reminder
#[must_use]
pub fn reminder_scheduled_text(locale: Locale, mins: u64) -> String {
    match locale {
        Locale::En => format!("⏰ Reminder set for {mins} min from now."),
        Locale::Ru => format!("⏰ Напоминание через {mins} мин."),
    }
}

/// Text delivered when a reminder fires
#[must_use]
pub fn reminder_fired_text(text: &str) -> String {
    format!("⏰ {text}")
}

/// Reply to `/help`
#[must_use]
pub const fn help_text(locale: Locale) -> &'static str {
    tr(
        locale,
        "Just write to ask about products.\n\
         /checkout - place an order\n\
         /settings - language\n\
         /remind - set a reminder\n\
         /cancel - stop the current action\n\
         /admin - admin login\n\
         /logout - leave admin mode",
        "Просто напишите, чтобы спросить о товарах.\n\
         /checkout - оформить заказ\n\
         /settings - язык\n\
         /remind - напоминание\n\
         /cancel - отменить текущее действие\n\
         /admin - вход администратора\n\
         /logout - выход из режима администратора",
    )
}

/// Engine statistics for `/stats`
#[must_use]
pub fn stats_text(
    pool: &PoolStatsSnapshot,
    queue_len: usize,
    active: usize,
    sessions: usize,
    cache: &CacheStats,
) -> String {
    format!(
        "📊 Engine\n\
         queue: {queue_len}, in flight: {active}, sessions: {sessions}\n\
         submitted: {}, rejected: {}\n\
         completed: {}, rate limited: {}, timed out: {}, cancelled: {}, failed: {}, panicked: {}\n\
         cache: {} entries, {} hits / {} misses",
        pool.submitted,
        pool.rejected,
        pool.completed,
        pool.rate_limited,
        pool.timed_out,
        pool.canceled,
        pool.failed,
        pool.panicked,
        cache.entries,
        cache.hits,
        cache.misses,
    )
}
