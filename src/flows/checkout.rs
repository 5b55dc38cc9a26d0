//! Order checkout: item, quantity, address and confirmation.

use super::{parse_yes_no, tr, Step};
use crate::engine::session_store::{FlowState, KeyedSessionStore, Session};
use crate::engine::suggestion::{Suggestion, SuggestionHandler};
use crate::gateway::{ChatId, Locale};
use crate::ActorId;

const MAX_ITEM_CHARS: usize = 100;
const MAX_QUANTITY: u32 = 99;
const MIN_ADDRESS_CHARS: usize = 5;

/// Order details collected so far
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Checkout {
    /// Product name
    pub item: Option<String>,
    /// Price quoted by the assistant, if the flow started from a suggestion
    pub price: Option<String>,
    /// Number of units
    pub quantity: Option<u32>,
    /// Delivery address
    pub address: Option<String>,
}

/// Checkout stages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckoutStage {
    /// The assistant suggested a product; waiting for yes/no
    SuggestionOffered,
    /// Waiting for the product name
    AwaitingItem,
    /// Waiting for the number of units
    AwaitingQuantity,
    /// Waiting for the delivery address
    AwaitingAddress,
    /// Waiting for the final yes/no
    AwaitingConfirmation,
}

impl FlowState for Checkout {
    type Stage = CheckoutStage;
    const KIND: &'static str = "checkout";
}

/// A confirmed order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    /// Product name
    pub item: String,
    /// Quoted price, if known
    pub price: Option<String>,
    /// Number of units
    pub quantity: u32,
    /// Delivery address
    pub address: String,
}

impl Order {
    /// One-line description for admins and the customer
    #[must_use]
    pub fn summary(&self) -> String {
        let price = self
            .price
            .as_deref()
            .map(|price| format!(" ({price})"))
            .unwrap_or_default();
        format!("{} x {}{price} -> {}", self.quantity, self.item, self.address)
    }
}

impl Checkout {
    fn order(&self) -> Option<Order> {
        Some(Order {
            item: self.item.clone()?,
            price: self.price.clone(),
            quantity: self.quantity?,
            address: self.address.clone()?,
        })
    }
}

/// Question asked when the session enters `stage`
#[must_use]
pub fn prompt(session: &Session<Checkout>, locale: Locale) -> String {
    match session.stage {
        CheckoutStage::SuggestionOffered => {
            let item = session.data.item.as_deref().unwrap_or_default();
            let price = session.data.price.as_deref().unwrap_or_default();
            match locale {
                Locale::En => format!("Would you like to order {item} for {price}? (yes/no)"),
                Locale::Ru => format!("Оформить заказ: {item} за {price}? (да/нет)"),
            }
        }
        CheckoutStage::AwaitingItem => {
            tr(locale, "What would you like to order?", "Что вы хотите заказать?").to_string()
        }
        CheckoutStage::AwaitingQuantity => {
            tr(locale, "How many? (1-99)", "Сколько штук? (1-99)").to_string()
        }
        CheckoutStage::AwaitingAddress => {
            tr(locale, "Delivery address?", "Адрес доставки?").to_string()
        }
        CheckoutStage::AwaitingConfirmation => {
            let summary = session
                .data
                .order()
                .map(|order| order.summary())
                .unwrap_or_default();
            match locale {
                Locale::En => format!("Confirm order: {summary}? (yes/no)"),
                Locale::Ru => format!("Подтвердить заказ: {summary}? (да/нет)"),
            }
        }
    }
}

fn yes_no_retry(locale: Locale) -> String {
    tr(locale, "Please answer yes or no.", "Ответьте, пожалуйста, да или нет.").to_string()
}

fn move_to(session: &mut Session<Checkout>, stage: CheckoutStage, locale: Locale) -> Step<Order> {
    session.stage = stage;
    Step::Prompt(prompt(session, locale))
}

/// Apply one answer to the checkout
pub fn advance(session: &mut Session<Checkout>, input: &str, locale: Locale) -> Step<Order> {
    let input = input.trim();
    match session.stage {
        CheckoutStage::SuggestionOffered => match parse_yes_no(input) {
            Some(true) => move_to(session, CheckoutStage::AwaitingQuantity, locale),
            Some(false) => Step::Abort(tr(locale, "Maybe next time.", "Может быть, в другой раз.").to_string()),
            None => Step::Retry(yes_no_retry(locale)),
        },
        CheckoutStage::AwaitingItem => {
            if input.is_empty() || input.chars().count() > MAX_ITEM_CHARS {
                return Step::Retry(
                    tr(locale, "Please name one product.", "Назовите, пожалуйста, один товар.")
                        .to_string(),
                );
            }
            session.data.item = Some(input.to_string());
            move_to(session, CheckoutStage::AwaitingQuantity, locale)
        }
        CheckoutStage::AwaitingQuantity => match input.parse::<u32>() {
            Ok(quantity) if (1..=MAX_QUANTITY).contains(&quantity) => {
                session.data.quantity = Some(quantity);
                move_to(session, CheckoutStage::AwaitingAddress, locale)
            }
            _ => Step::Retry(
                tr(locale, "Enter a number from 1 to 99.", "Введите число от 1 до 99.").to_string(),
            ),
        },
        CheckoutStage::AwaitingAddress => {
            if input.chars().count() < MIN_ADDRESS_CHARS {
                return Step::Retry(
                    tr(locale, "That address looks too short.", "Адрес слишком короткий.")
                        .to_string(),
                );
            }
            session.data.address = Some(input.to_string());
            move_to(session, CheckoutStage::AwaitingConfirmation, locale)
        }
        CheckoutStage::AwaitingConfirmation => match parse_yes_no(input) {
            Some(true) => match session.data.order() {
                Some(order) => Step::Done(order),
                None => Step::Abort(
                    tr(locale, "The order is incomplete, please start over.", "Заказ неполный, начните заново.")
                        .to_string(),
                ),
            },
            Some(false) => {
                Step::Abort(tr(locale, "Order cancelled.", "Заказ отменён.").to_string())
            }
            None => Step::Retry(yes_no_retry(locale)),
        },
    }
}

impl SuggestionHandler for KeyedSessionStore<Checkout> {
    fn on_suggestion(
        &self,
        actor: ActorId,
        _chat: ChatId,
        suggestion: Suggestion,
        locale: Locale,
    ) -> Option<String> {
        self.create(
            actor,
            CheckoutStage::SuggestionOffered,
            Checkout {
                item: Some(suggestion.item),
                price: Some(suggestion.price),
                ..Checkout::default()
            },
        );
        self.get(actor).map(|session| prompt(&session, locale))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ACTOR: ActorId = ActorId(1);

    fn run(store: &KeyedSessionStore<Checkout>, input: &str) -> Step<Order> {
        crate::flows::drive(store, ACTOR, |session| advance(session, input, Locale::En))
            .map(|(step, _)| step)
            .expect("session exists")
    }

    #[tokio::test(start_paused = true)]
    async fn manual_checkout_completes() {
        let store = KeyedSessionStore::new();
        store.create(ACTOR, CheckoutStage::AwaitingItem, Checkout::default());

        assert!(matches!(run(&store, "Green tea"), Step::Prompt(_)));
        assert!(matches!(run(&store, "0"), Step::Retry(_)));
        assert!(matches!(run(&store, "2"), Step::Prompt(_)));
        assert!(matches!(run(&store, "x"), Step::Retry(_)));
        let Step::Prompt(confirm) = run(&store, "1 Main Street") else {
            panic!("expected confirmation prompt");
        };
        assert!(confirm.contains("2 x Green tea -> 1 Main Street"));

        let step = run(&store, "yes");
        assert_eq!(
            step,
            Step::Done(Order {
                item: "Green tea".to_string(),
                price: None,
                quantity: 2,
                address: "1 Main Street".to_string(),
            })
        );
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn suggestion_opens_offer_and_decline_aborts() {
        let store = KeyedSessionStore::new();
        let prompt = store
            .on_suggestion(
                ACTOR,
                ChatId(1),
                Suggestion {
                    item: "Mug".to_string(),
                    price: "5 EUR".to_string(),
                },
                Locale::En,
            )
            .expect("prompt");
        assert!(prompt.contains("Mug for 5 EUR"));

        assert!(matches!(run(&store, "perhaps"), Step::Retry(_)));
        assert!(matches!(run(&store, "no"), Step::Abort(_)));
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn accepted_suggestion_skips_item_question() {
        let store = KeyedSessionStore::new();
        store.on_suggestion(
            ACTOR,
            ChatId(1),
            Suggestion {
                item: "Mug".to_string(),
                price: "5 EUR".to_string(),
            },
            Locale::Ru,
        );

        assert!(matches!(run(&store, "да"), Step::Prompt(_)));
        let session = store.get(ACTOR).expect("session exists");
        assert_eq!(session.stage, CheckoutStage::AwaitingQuantity);
        assert_eq!(session.data.item.as_deref(), Some("Mug"));
    }

    #[test]
    fn summary_includes_price_when_known() {
        let order = Order {
            item: "Mug".to_string(),
            price: Some("5 EUR".to_string()),
            quantity: 1,
            address: "Home".to_string(),
        };
        assert_eq!(order.summary(), "1 x Mug (5 EUR) -> Home");
    }
}
