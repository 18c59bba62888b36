//! Replies that survive Telegram flood control.
//!
//! A `RetryAfter` answer waits out the requested delay plus one second, any
//! other failure waits one second. After the last retry one more plain
//! attempt is made and its error is returned to the caller.

use super::transport::ChatTransport;
use crate::config::REPLY_MAX_ATTEMPTS;
use std::time::Duration;
use teloxide::RequestError;
use tracing::{error, warn};

/// Delay before retrying after `err`
#[must_use]
pub fn retry_delay(err: &RequestError) -> Duration {
    match err {
        RequestError::RetryAfter(secs) => secs.duration() + Duration::from_secs(1),
        _ => Duration::from_secs(1),
    }
}

/// Send `text` into `chat`, retrying as described in the module docs.
///
/// # Errors
///
/// Returns the error of the final attempt.
pub async fn reply_resilient<C>(chat: &C, text: &str) -> Result<(), RequestError>
where
    C: ChatTransport + ?Sized,
{
    for attempt in 1..=REPLY_MAX_ATTEMPTS {
        match chat.send_text(text).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                let delay = chat.retry_delay(&e);
                if matches!(e, RequestError::RetryAfter(_)) {
                    warn!("Flood control on reply, waiting {}s", delay.as_secs());
                } else {
                    error!("Failed to reply (attempt {attempt}): {e}");
                }
                tokio::time::sleep(delay).await;
            }
        }
    }
    chat.send_text(text).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::transport::testing::RecordingChat;
    use teloxide::types::{ChatId, Seconds};

    fn migrated() -> RequestError {
        RequestError::MigrateToChatId(ChatId(-100_123))
    }

    #[test]
    fn test_retry_after_adds_one_second() {
        let err = RequestError::RetryAfter(Seconds::from_seconds(7));
        assert_eq!(retry_delay(&err), Duration::from_secs(8));
    }

    #[test]
    fn test_other_errors_wait_one_second() {
        assert_eq!(retry_delay(&migrated()), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_first_attempt_succeeds() -> Result<(), RequestError> {
        let chat = RecordingChat::default();
        reply_resilient(&chat, "hola").await?;
        assert_eq!(chat.attempts(), 1);
        assert_eq!(chat.sent(), vec!["hola"]);
        assert!(chat.delays().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_recovers_after_flood_control() -> Result<(), RequestError> {
        let chat = RecordingChat::default().failing_with(vec![
            RequestError::RetryAfter(Seconds::from_seconds(3)),
            migrated(),
        ]);
        reply_resilient(&chat, "hola").await?;
        assert_eq!(chat.attempts(), 3);
        assert_eq!(chat.sent(), vec!["hola"]);
        assert_eq!(
            chat.delays(),
            vec![Duration::from_secs(4), Duration::from_secs(1)]
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_final_attempt_error_propagates() {
        let chat = RecordingChat::default()
            .failing_with(vec![migrated(); REPLY_MAX_ATTEMPTS + 1]);
        let result = reply_resilient(&chat, "hola").await;
        assert!(matches!(result, Err(RequestError::MigrateToChatId(_))));
        assert_eq!(chat.attempts(), REPLY_MAX_ATTEMPTS + 1);
        assert_eq!(chat.delays().len(), REPLY_MAX_ATTEMPTS);
        assert!(chat.sent().is_empty());
    }

    #[tokio::test]
    async fn test_last_chance_attempt_can_succeed() -> Result<(), RequestError> {
        let chat = RecordingChat::default().failing_with(vec![migrated(); REPLY_MAX_ATTEMPTS]);
        reply_resilient(&chat, "hola").await?;
        assert_eq!(chat.attempts(), REPLY_MAX_ATTEMPTS + 1);
        assert_eq!(chat.sent(), vec!["hola"]);
        Ok(())
    }
}
