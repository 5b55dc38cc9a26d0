//! Detection of single-item product suggestions in AI replies

use crate::gateway::{ChatId, Locale};
use crate::ActorId;
use lazy_regex::lazy_regex;

static RE_SUGGESTION: lazy_regex::Lazy<regex::Regex> =
    lazy_regex!(r"(?mi)^\s*SUGGEST:\s*(?P<item>[^|\n]+?)\s*\|\s*(?P<price>[^|\n]+?)\s*$");

/// Product the responder recommended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
    /// Product name
    pub item: String,
    /// Price as written by the responder
    pub price: String,
}

/// Extract a suggestion from a reply.
///
/// The reply must contain exactly one `SUGGEST: <item> | <price>` line;
/// replies listing several products are not treated as suggestions.
#[must_use]
pub fn parse_suggestion(reply: &str) -> Option<Suggestion> {
    let mut matches = RE_SUGGESTION.captures_iter(reply);
    let captures = matches.next()?;
    if matches.next().is_some() {
        return None;
    }
    Some(Suggestion {
        item: captures["item"].to_string(),
        price: captures["price"].to_string(),
    })
}

/// Receives suggestions detected by pool workers.
pub trait SuggestionHandler: Send + Sync {
    /// Open a follow-up flow for the suggestion.
    ///
    /// Returns a prompt to send to the actor, if any.
    fn on_suggestion(
        &self,
        actor: ActorId,
        chat: ChatId,
        suggestion: Suggestion,
        locale: Locale,
    ) -> Option<String>;
}
