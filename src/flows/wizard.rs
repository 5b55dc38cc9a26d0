//! Language preference wizard.

use super::{parse_yes_no, tr, Step};
use crate::engine::session_store::{FlowState, Session};
use crate::gateway::Locale;

/// Choice collected by the settings wizard
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigWizard {
    /// Locale picked in the first step
    pub locale: Option<Locale>,
}

/// Wizard stages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WizardStage {
    /// Waiting for a language name or code
    AwaitingLocale,
    /// Waiting for yes/no on the picked language
    AwaitingConfirmation,
}

impl FlowState for ConfigWizard {
    type Stage = WizardStage;
    const KIND: &'static str = "config_wizard";
}

/// Question asked at the current stage
#[must_use]
pub fn prompt(session: &Session<ConfigWizard>, locale: Locale) -> String {
    match (session.stage, session.data.locale) {
        (WizardStage::AwaitingConfirmation, Some(picked)) => match locale {
            Locale::En => format!("Switch language to \"{}\"? (yes/no)", picked.code()),
            Locale::Ru => format!("Переключить язык на \"{}\"? (да/нет)", picked.code()),
        },
        _ => tr(
            locale,
            "Choose a language: en / ru",
            "Выберите язык: en / ru",
        )
        .to_string(),
    }
}

/// Apply one answer to the wizard. Completes with the chosen locale.
pub fn advance(session: &mut Session<ConfigWizard>, input: &str, locale: Locale) -> Step<Locale> {
    match session.stage {
        WizardStage::AwaitingLocale => match Locale::parse(input) {
            Some(picked) => {
                session.data.locale = Some(picked);
                session.stage = WizardStage::AwaitingConfirmation;
                Step::Prompt(prompt(session, locale))
            }
            None => Step::Retry(
                tr(locale, "Unknown language. Use en or ru.", "Неизвестный язык. Введите en или ru.")
                    .to_string(),
            ),
        },
        WizardStage::AwaitingConfirmation => match (parse_yes_no(input), session.data.locale) {
            (Some(true), Some(picked)) => Step::Done(picked),
            (Some(true), None) | (Some(false), _) => {
                Step::Abort(tr(locale, "Settings unchanged.", "Настройки не изменены.").to_string())
            }
            (None, _) => Step::Retry(
                tr(locale, "Please answer yes or no.", "Ответьте, пожалуйста, да или нет.").to_string(),
            ),
        },
    }
}
