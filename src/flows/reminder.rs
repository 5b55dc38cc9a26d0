//! Delayed reminder: text, then a delay such as `30m` or `2h`.

use super::{tr, Step};
use crate::engine::session_store::{FlowState, Session};
use crate::gateway::Locale;
use lazy_regex::regex_captures;
use std::time::Duration;

const MAX_TEXT_CHARS: usize = 500;

/// Reminder being set up
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReminderSetup {
    /// What to remind about
    pub text: Option<String>,
}

/// Reminder stages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderStage {
    /// Waiting for the reminder text
    AwaitingText,
    /// Waiting for the delay such as `30m` or `2h`
    AwaitingDelay,
}

impl FlowState for ReminderSetup {
    type Stage = ReminderStage;
    const KIND: &'static str = "reminder";
}

/// Reminder ready to be scheduled
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reminder {
    /// Text sent when the reminder fires
    pub text: String,
    /// Delay from now
    pub delay: Duration,
}

/// Question asked at the current stage
#[must_use]
pub fn prompt(stage: ReminderStage, locale: Locale) -> String {
    match stage {
        ReminderStage::AwaitingText => {
            tr(locale, "What should I remind you about?", "О чём напомнить?").to_string()
        }
        ReminderStage::AwaitingDelay => tr(
            locale,
            "In how long? e.g. 15, 30m or 2h",
            "Через сколько? Например 15, 30m или 2h",
        )
        .to_string(),
    }
}

/// Parse `N`, `Nm` or `Nh` into minutes
fn parse_delay_mins(input: &str) -> Option<u64> {
    let (_, amount, unit) = regex_captures!(r"^(\d{1,6})\s*([mhмч]?)$"i, input.trim())?;
    let amount: u64 = amount.parse().ok()?;
    match unit.to_lowercase().as_str() {
        "h" | "ч" => amount.checked_mul(60),
        _ => Some(amount),
    }
}

/// Apply one answer. Delays are limited to `1..=max_delay_mins` minutes.
pub fn advance(
    session: &mut Session<ReminderSetup>,
    input: &str,
    max_delay_mins: u64,
    locale: Locale,
) -> Step<Reminder> {
    let input = input.trim();
    match session.stage {
        ReminderStage::AwaitingText => {
            if input.is_empty() || input.chars().count() > MAX_TEXT_CHARS {
                return Step::Retry(
                    tr(locale, "The text must be 1-500 characters.", "Текст: от 1 до 500 символов.")
                        .to_string(),
                );
            }
            session.data.text = Some(input.to_string());
            session.stage = ReminderStage::AwaitingDelay;
            Step::Prompt(prompt(session.stage, locale))
        }
        ReminderStage::AwaitingDelay => {
            let Some(text) = session.data.text.clone() else {
                return Step::Abort(
                    tr(locale, "Nothing to remind about.", "Нечего напоминать.").to_string(),
                );
            };
            match parse_delay_mins(input) {
                Some(mins) if (1..=max_delay_mins).contains(&mins) => Step::Done(Reminder {
                    text,
                    delay: Duration::from_secs(mins * 60),
                }),
                _ => match locale {
                    Locale::En => Step::Retry(format!(
                        "Enter a delay between 1 and {max_delay_mins} minutes."
                    )),
                    Locale::Ru => Step::Retry(format!(
                        "Укажите задержку от 1 до {max_delay_mins} минут."
                    )),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::session_store::KeyedSessionStore;
    use crate::ActorId;

    const ACTOR: ActorId = ActorId(4);

    #[test]
    fn delay_units() {
        assert_eq!(parse_delay_mins("15"), Some(15));
        assert_eq!(parse_delay_mins("30m"), Some(30));
        assert_eq!(parse_delay_mins("2H"), Some(120));
        assert_eq!(parse_delay_mins("2ч"), Some(120));
        assert_eq!(parse_delay_mins("soon"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn reminder_completes_within_bounds() {
        let store = KeyedSessionStore::new();
        store.create(ACTOR, ReminderStage::AwaitingText, ReminderSetup::default());
        let feed = |input: &str| {
            store
                .update(ACTOR, |session| advance(session, input, 60, Locale::En))
                .expect("session exists")
        };

        assert!(matches!(feed("call the supplier"), Step::Prompt(_)));
        assert!(matches!(feed("2h"), Step::Retry(_)));
        assert_eq!(
            feed("45m"),
            Step::Done(Reminder {
                text: "call the supplier".to_string(),
                delay: Duration::from_secs(45 * 60),
            })
        );
    }
}
