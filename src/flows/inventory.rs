//! Admin stock adjustment: SKU, signed delta and confirmation.

use super::{parse_yes_no, tr, Step};
use crate::engine::session_store::{FlowState, Session};
use crate::gateway::Locale;
use lazy_regex::regex_is_match;

/// Stock adjustment being prepared by an admin
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InventoryAdjust {
    /// Normalized SKU
    pub sku: Option<String>,
    /// Signed change in units
    pub delta: Option<i64>,
}

/// Adjustment stages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InventoryStage {
    /// Waiting for the SKU
    AwaitingSku,
    /// Waiting for a signed quantity such as `+5` or `-2`
    AwaitingDelta,
    /// Waiting for yes/no
    AwaitingConfirmation,
}

impl FlowState for InventoryAdjust {
    type Stage = InventoryStage;
    const KIND: &'static str = "inventory";
}

/// Confirmed adjustment, handed to the catalog service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adjustment {
    /// Normalized SKU
    pub sku: String,
    /// Signed change in units
    pub delta: i64,
}

/// Question asked at the current stage
#[must_use]
pub fn prompt(session: &Session<InventoryAdjust>, locale: Locale) -> String {
    match session.stage {
        InventoryStage::AwaitingSku => tr(locale, "SKU?", "Артикул?").to_string(),
        InventoryStage::AwaitingDelta => tr(
            locale,
            "Change in stock, e.g. +5 or -2:",
            "Изменение остатка, например +5 или -2:",
        )
        .to_string(),
        InventoryStage::AwaitingConfirmation => {
            let sku = session.data.sku.as_deref().unwrap_or_default();
            let delta = session.data.delta.unwrap_or_default();
            match locale {
                Locale::En => format!("Apply {delta:+} to {sku}? (yes/no)"),
                Locale::Ru => format!("Применить {delta:+} к {sku}? (да/нет)"),
            }
        }
    }
}

fn parse_delta(input: &str) -> Option<i64> {
    let input = input.trim();
    let unsigned = input.strip_prefix('+').unwrap_or(input);
    unsigned.parse::<i64>().ok().filter(|delta| *delta != 0)
}

/// Apply one answer to the adjustment
pub fn advance(
    session: &mut Session<InventoryAdjust>,
    input: &str,
    locale: Locale,
) -> Step<Adjustment> {
    let input = input.trim();
    match session.stage {
        InventoryStage::AwaitingSku => {
            if !regex_is_match!(r"^[A-Za-z0-9_-]{1,32}$", input) {
                return Step::Retry(
                    tr(
                        locale,
                        "A SKU is up to 32 letters, digits, '-' or '_'.",
                        "Артикул: до 32 букв, цифр, '-' или '_'.",
                    )
                    .to_string(),
                );
            }
            session.data.sku = Some(input.to_uppercase());
            session.stage = InventoryStage::AwaitingDelta;
            Step::Prompt(prompt(session, locale))
        }
        InventoryStage::AwaitingDelta => match parse_delta(input) {
            Some(delta) => {
                session.data.delta = Some(delta);
                session.stage = InventoryStage::AwaitingConfirmation;
                Step::Prompt(prompt(session, locale))
            }
            None => Step::Retry(
                tr(locale, "Enter a non-zero whole number.", "Введите ненулевое целое число.")
                    .to_string(),
            ),
        },
        InventoryStage::AwaitingConfirmation => {
            match (parse_yes_no(input), &session.data.sku, session.data.delta) {
                (Some(true), Some(sku), Some(delta)) => Step::Done(Adjustment {
                    sku: sku.clone(),
                    delta,
                }),
                (Some(_), _, _) => Step::Abort(
                    tr(locale, "Adjustment discarded.", "Изменение отменено.").to_string(),
                ),
                (None, _, _) => Step::Retry(
                    tr(locale, "Please answer yes or no.", "Ответьте, пожалуйста, да или нет.")
                        .to_string(),
                ),
            }
        }
    }
}
