//! Password login that grants admin mode for a limited time.

use super::{tr, Step};
use crate::engine::session_store::{FlowState, Session};
use crate::gateway::Locale;

/// Wrong passwords allowed before the login is aborted
pub const MAX_ATTEMPTS: u32 = 3;

/// Admin login progress
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdminAuth {
    /// Wrong passwords entered so far
    pub attempts: u32,
}

/// Admin login stages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdminAuthStage {
    /// Waiting for the password
    AwaitingPassword,
}

impl FlowState for AdminAuth {
    type Stage = AdminAuthStage;
    const KIND: &'static str = "admin_auth";
}

/// Password request
#[must_use]
pub fn prompt(locale: Locale) -> String {
    tr(locale, "Enter the admin password:", "Введите пароль администратора:").to_string()
}

/// Check one password attempt against `expected`
pub fn advance(
    session: &mut Session<AdminAuth>,
    input: &str,
    expected: &str,
    locale: Locale,
) -> Step<()> {
    match session.stage {
        AdminAuthStage::AwaitingPassword => {
            if !expected.is_empty() && input.trim() == expected {
                return Step::Done(());
            }

            session.data.attempts += 1;
            let left = MAX_ATTEMPTS.saturating_sub(session.data.attempts);
            if left == 0 {
                return Step::Abort(
                    tr(locale, "Too many wrong attempts.", "Слишком много неверных попыток.")
                        .to_string(),
                );
            }
            match locale {
                Locale::En => Step::Retry(format!("Wrong password, {left} attempt(s) left.")),
                Locale::Ru => Step::Retry(format!("Неверный пароль, осталось попыток: {left}.")),
            }
        }
    }
}
