//! The chat a handler answers into.
//!
//! Handlers only talk to [`ChatTransport`]; [`TelegramChat`] is the live
//! implementation bound to one incoming message.

use super::resilient::retry_delay;
use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use teloxide::net::Download;
use teloxide::prelude::*;
use teloxide::types::{ChatId, FileId, MessageId, ReplyParameters};
use teloxide::RequestError;

/// Outgoing side of one conversation
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send `text` once, without retrying
    async fn send_text(&self, text: &str) -> Result<(), RequestError>;

    /// Fetch a file, returning its bytes and Telegram file path
    async fn download(&self, file_id: &FileId) -> Result<(Vec<u8>, String)>;

    /// Pause before resending after `err`
    fn retry_delay(&self, err: &RequestError) -> Duration {
        retry_delay(err)
    }
}

/// Replies threaded to the message that triggered the handler
pub struct TelegramChat {
    bot: Bot,
    chat_id: ChatId,
    reply_to: MessageId,
}

impl TelegramChat {
    /// Bind replies to the chat and message of `msg`
    #[must_use]
    pub fn new(bot: Bot, msg: &Message) -> Self {
        Self {
            bot,
            chat_id: msg.chat.id,
            reply_to: msg.id,
        }
    }

    /// Chat the replies go to
    #[must_use]
    pub const fn chat_id(&self) -> ChatId {
        self.chat_id
    }

    fn reply_request(&self, text: &str) -> <Bot as Requester>::SendMessage {
        self.bot
            .send_message(self.chat_id, text)
            .reply_parameters(ReplyParameters::new(self.reply_to).allow_sending_without_reply())
    }
}

#[async_trait]
impl ChatTransport for TelegramChat {
    async fn send_text(&self, text: &str) -> Result<(), RequestError> {
        self.reply_request(text).await.map(|_| ())
    }

    async fn download(&self, file_id: &FileId) -> Result<(Vec<u8>, String)> {
        let file = self.bot.get_file(file_id.clone()).await?;
        let mut buf = Vec::new();
        self.bot.download_file(&file.path, &mut buf).await?;
        Ok((buf, file.path))
    }
}
