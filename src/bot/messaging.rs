//! Long reply delivery.

use super::resilient::reply_resilient;
use super::transport::ChatTransport;
use crate::config::REPLY_CHUNK_CHARS;
use crate::utils;
use anyhow::Result;

/// Sends `text` as consecutive messages of at most [`REPLY_CHUNK_CHARS`]
/// characters, preferring line breaks as split points.
///
/// # Errors
///
/// Returns an error if any part fails to send after retries.
pub async fn send_long_message<C>(chat: &C, text: &str) -> Result<()>
where
    C: ChatTransport + ?Sized,
{
    for part in utils::split_long_message(text, REPLY_CHUNK_CHARS) {
        reply_resilient(chat, &part).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bot::transport::testing::RecordingChat;

    #[tokio::test]
    async fn test_long_text_sent_in_order() -> Result<()> {
        let chat = RecordingChat::default();
        let text = format!("{}\n{}", "a".repeat(REPLY_CHUNK_CHARS), "tail");
        send_long_message(&chat, &text).await?;

        let sent = chat.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent.concat(), text);
        Ok(())
    }
}
