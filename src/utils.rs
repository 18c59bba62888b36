//! Utility functions for text splitting and retrying Telegram operations.

use anyhow::Result;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;
use tracing::warn;
use unicode_segmentation::UnicodeSegmentation;

/// Splits a message into parts of at most `max_chars` characters.
///
/// Breaks after the last newline inside the window when there is one,
/// otherwise cuts between grapheme clusters so emoji and accented letters
/// survive. Concatenating the parts gives back the message, minus any part
/// that would only hold whitespace.
///
/// # Examples
///
/// ```
/// use permiso_bot::utils::split_long_message;
/// let long_msg = "A very long message...\n".repeat(300);
/// let parts = split_long_message(&long_msg, 3500);
/// assert!(parts.len() > 1);
/// assert!(parts.iter().all(|p| p.chars().count() <= 3500));
/// ```
#[must_use]
pub fn split_long_message(message: &str, max_chars: usize) -> Vec<String> {
    if message.is_empty() || max_chars == 0 {
        return Vec::new();
    }

    if message.chars().count() <= max_chars {
        return vec![message.to_string()];
    }

    let mut parts = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0;

    for grapheme in message.graphemes(true) {
        let width = grapheme.chars().count();
        if current_chars + width > max_chars && !current.is_empty() {
            let at_newline = grapheme == "\n" || grapheme == "\r\n";
            match current.rfind('\n') {
                // Keep the tail after the last newline for the next part
                Some(pos) if pos > 0 && !at_newline => {
                    let tail = current.split_off(pos + 1);
                    parts.push(std::mem::replace(&mut current, tail));
                    current_chars = current.chars().count();
                }
                _ => {
                    parts.push(std::mem::take(&mut current));
                    current_chars = 0;
                }
            }
            if current_chars + width > max_chars && !current.is_empty() {
                parts.push(std::mem::take(&mut current));
                current_chars = 0;
            }
        }
        current.push_str(grapheme);
        current_chars += width;
    }

    if !current.is_empty() {
        parts.push(current);
    }

    // Telegram rejects blank messages
    parts.retain(|p| !p.trim().is_empty());
    parts
}

/// Safely truncates a string to a maximum character length (not bytes).
///
/// # Examples
///
/// ```
/// use permiso_bot::utils::truncate_str;
/// let s = "Señal de stop";
/// assert_eq!(truncate_str(s, 5), "Señal");
/// ```
pub fn truncate_str(s: impl AsRef<str>, max_chars: usize) -> String {
    let s = s.as_ref();
    s.char_indices()
        .nth(max_chars)
        .map_or_else(|| s.to_string(), |(pos, _)| s[..pos].to_string())
}

/// Formats an elapsed duration the way timing lines show it (`1.23s`).
#[must_use]
pub fn format_secs(elapsed: Duration) -> String {
    format!("{:.2}s", elapsed.as_secs_f64())
}

/// Retry a Telegram API operation with exponential backoff.
///
/// Used for file operations (`get_file` + `download_file`) that may fail on
/// transient network errors:
/// - Initial delay: 500ms
/// - Max delay: 4s
/// - Max attempts: 3
///
/// # Errors
///
/// Returns the last error if all attempts fail.
///
/// # Examples
///
/// ```no_run
/// use permiso_bot::utils::retry_telegram_operation;
/// use anyhow::Result;
///
/// async fn download_file() -> Result<Vec<u8>> {
///     Ok(vec![])
/// }
///
/// # async fn example() -> Result<()> {
/// let buffer = retry_telegram_operation(|| async {
///     download_file().await
/// }).await?;
/// # Ok(())
/// # }
/// ```
pub async fn retry_telegram_operation<F, Fut, T>(operation: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_truncate_str_unicode() {
        let s = "¿Qué señal?";
        assert_eq!(truncate_str(s, 4), "¿Qué");
        assert_eq!(truncate_str(s, 50), "¿Qué señal?");
    }

    #[test]
    fn test_short_message_untouched() {
        assert_eq!(split_long_message("hola", 10), vec!["hola"]);
        assert!(split_long_message("", 10).is_empty());
    }

    #[test]
    fn test_split_prefers_newlines() {
        let input = "Line 1\nLine 2\nLine 3";
        let parts = split_long_message(input, 13);
        assert_eq!(parts, vec!["Line 1\nLine 2", "\nLine 3"]);
    }

    #[test]
    fn test_split_keeps_every_character() {
        let input = "Give way.\nNo parking here.\nStop.";
        let parts = split_long_message(input, 15);
        assert_eq!(parts, vec!["Give way.\n", "No parking here", ".\nStop."]);
        assert_eq!(parts.concat(), input);
        assert!(parts.iter().all(|p| p.chars().count() <= 15));
    }

    #[test]
    fn test_split_very_long_line() {
        let input = "a".repeat(10_000);
        let parts = split_long_message(&input, 3500);
        assert_eq!(parts.len(), 3);
        assert!(parts.iter().all(|p| p.chars().count() <= 3500));
        assert_eq!(parts.concat(), input);
    }

    #[test]
    fn test_split_unicode_graphemes() {
        let input = "🚦".repeat(5000);
        let parts = split_long_message(&input, 3500);
        assert_eq!(parts.len(), 2);
        assert!(parts.iter().all(|p| p.chars().all(|c| c == '🚦')));
    }

    #[test]
    fn test_format_secs() {
        assert_eq!(format_secs(Duration::from_millis(1234)), "1.23s");
        assert_eq!(format_secs(Duration::ZERO), "0.00s");
    }

    #[tokio::test]
    async fn test_retry_recovers_from_transient_error() {
        let attempts = AtomicUsize::new(0);
        let result = retry_telegram_operation(|| {
            let n = attempts.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    anyhow::bail!("connection reset");
                }
                Ok(n)
            }
        })
        .await
        .expect("second attempt succeeds");
        assert_eq!(result, 1);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }
}
