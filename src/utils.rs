//! Utility functions for text processing and Telegram API retries.

use std::fmt::Display;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::warn;
use unicode_segmentation::UnicodeSegmentation;

/// Splits plain text into parts of at most `max_length` bytes.
///
/// Breaks fall on word boundaries; a single word longer than the limit is cut
/// between grapheme clusters, so multi-byte characters are never split.
///
/// # Examples
///
/// ```
/// use oxide_shop::utils::split_long_message;
/// let long_msg = "A very long message...\n".repeat(300);
/// let parts = split_long_message(&long_msg, 4000);
/// assert!(parts.len() > 1);
/// ```
#[must_use]
pub fn split_long_message(message: &str, max_length: usize) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();

    let mut flush = |current: &mut String| {
        let part = current.trim_end();
        if !part.is_empty() {
            parts.push(part.to_string());
        }
        current.clear();
    };

    for segment in message.split_word_bounds() {
        if current.len() + segment.len() > max_length {
            flush(&mut current);
        }
        // No leading whitespace at the start of a part
        if current.is_empty() && segment.trim().is_empty() {
            continue;
        }
        if segment.len() <= max_length {
            current.push_str(segment);
            continue;
        }
        for grapheme in segment.graphemes(true) {
            if current.len() + grapheme.len() > max_length {
                flush(&mut current);
            }
            current.push_str(grapheme);
        }
    }
    flush(&mut current);

    parts
}

/// Safely truncates a string to a maximum character length (not bytes).
///
/// # Examples
///
/// ```
/// use oxide_shop::utils::truncate_str;
/// let s = "Привет, мир!";
/// assert_eq!(truncate_str(s, 6), "Привет");
/// ```
pub fn truncate_str(s: impl AsRef<str>, max_chars: usize) -> String {
    let s = s.as_ref();
    if s.chars().count() <= max_chars {
        return s.to_string();
    }
    s.char_indices()
        .nth(max_chars)
        .map_or_else(|| s.to_string(), |(pos, _)| s[..pos].to_string())
}

/// Normalizes free text for use as a cache key.
///
/// Lowercases, trims and collapses runs of whitespace, so "Red  Shoes?" and
/// "red shoes?" hit the same entry.
///
/// # Examples
///
/// ```
/// use oxide_shop::utils::normalize_input;
/// assert_eq!(normalize_input("  Red \n Shoes "), "red shoes");
/// ```
#[must_use]
pub fn normalize_input(text: &str) -> String {
    text.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Retry a Telegram API operation with exponential backoff.
///
/// The retry strategy uses exponential backoff with jitter to avoid thundering herd:
/// - Initial delay: 500ms
/// - Max delay: 4s
/// - Max attempts: 3 (constants in `config.rs`)
///
/// # Errors
///
/// Returns the last error if all attempts fail.
pub async fn retry_telegram_operation<F, Fut, T, E>(operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: Display,
{
    use crate::config::{
        TELEGRAM_API_INITIAL_BACKOFF_MS, TELEGRAM_API_MAX_BACKOFF_MS, TELEGRAM_API_MAX_RETRIES,
    };

    let retry_strategy = ExponentialBackoff::from_millis(TELEGRAM_API_INITIAL_BACKOFF_MS)
        .max_delay(Duration::from_millis(TELEGRAM_API_MAX_BACKOFF_MS))
        .map(jitter)
        .take(TELEGRAM_API_MAX_RETRIES);

    Retry::spawn(retry_strategy, operation).await.map_err(|e| {
        warn!(
            "Telegram API operation failed after {} attempts: {}",
            TELEGRAM_API_MAX_RETRIES, e
        );
        e
    })
}
