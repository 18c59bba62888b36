//! Command and screenshot handlers.

use super::messaging::send_long_message;
use super::resilient::reply_resilient;
use super::state::AppState;
use super::transport::{ChatTransport, TelegramChat};
use crate::config::PARSE_TIMEOUT_SECS;
use crate::question::{build_rag_query, format_result};
use crate::rag::RagError;
use crate::rate_limit::{RateDecision, Usage};
use crate::utils::{format_secs, retry_telegram_operation};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use teloxide::prelude::*;
use teloxide::types::{FileId, PhotoSize};
use teloxide::utils::command::BotCommands;
use thiserror::Error;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Reply to `/start`
pub const START_TEXT: &str =
    "Send me a screenshot (photo or file) and I will extract the question and options.";
/// Reply to anything that is neither a command nor an image
pub const NOT_AN_IMAGE: &str = "Please send an image (photo or file).";
/// Sent once the screenshot is on disk
pub const PROCESSING: &str = "Processing the screenshot. This can take a moment...";
/// Sent when the vision output was usable
pub const PARSED_OK: &str = "Screenshot parsed successfully.";
/// Sent before the RAG answer is computed
pub const RUNNING_RAG: &str = "Running RAG...";
/// Sent when a stage exceeds its time limit
pub const TIMED_OUT: &str = "Timed out while processing. Try again in a minute.";

/// Supported commands
#[derive(BotCommands, Clone, Debug, PartialEq, Eq)]
#[command(rename_rule = "lowercase", description = "Available commands:")]
pub enum Command {
    /// Welcome message
    #[command(description = "show the welcome message")]
    Start,
    /// Usage instructions
    #[command(description = "explain how to use the bot")]
    Help,
    /// Today's quota
    #[command(description = "show how many screenshots you have left today")]
    Usage,
}

#[derive(Debug, Error)]
#[error("{stage} timed out after {secs}s")]
struct StageTimeout {
    stage: &'static str,
    secs: u64,
}

/// Telegram user id of the sender, 0 for anonymous senders
#[must_use]
pub fn get_user_id_safe(msg: &Message) -> i64 {
    msg.from.as_ref().map_or(0, |u| u.id.0.cast_signed())
}

/// File id of the screenshot carried by `msg`: the largest photo size or an
/// `image/*` document.
#[must_use]
pub fn image_file_id(msg: &Message) -> Option<FileId> {
    if let Some(photo) = msg.photo().and_then(<[PhotoSize]>::last) {
        return Some(photo.file.id.clone());
    }
    msg.document()
        .filter(|doc| {
            doc.mime_type
                .as_ref()
                .is_some_and(|m| m.essence_str().starts_with("image/"))
        })
        .map(|doc| doc.file.id.clone())
}

/// Extension for a stored screenshot, taken from the Telegram file path
#[must_use]
pub fn screenshot_extension(telegram_path: &str) -> String {
    Path::new(telegram_path)
        .extension()
        .and_then(|e| e.to_str())
        .filter(|e| !e.is_empty())
        .map_or_else(|| ".jpg".to_string(), |e| format!(".{e}"))
}

/// Reply for a user whose quota is used up
#[must_use]
pub fn limit_message(limit: u32, resets_at: DateTime<Utc>) -> String {
    format!(
        "Daily limit of {limit} screenshots reached. Try again after {} UTC.",
        resets_at.format("%H:%M")
    )
}

/// Reply to `/usage`
#[must_use]
pub fn usage_message(usage: Usage) -> String {
    if usage.exempt || usage.limit == 0 {
        return format!(
            "Screenshots today: {}. No daily limit applies to you.",
            usage.used
        );
    }
    format!(
        "Screenshots today: {}/{}. Remaining: {}.",
        usage.used,
        usage.limit,
        usage.limit.saturating_sub(usage.used)
    )
}

/// Final reply text: the parsed question with its timing, followed by the
/// RAG answer and its timing when one was produced.
///
/// # Examples
///
/// ```
/// use permiso_bot::bot::handlers::compose_reply;
/// use std::time::Duration;
///
/// let reply = compose_reply("Question: Q?", Duration::from_millis(1500), None);
/// assert_eq!(reply, "Question: Q?\n\nTiming: parse=1.50s");
/// ```
#[must_use]
pub fn compose_reply(parsed: &str, parse_elapsed: Duration, rag: Option<(&str, Duration)>) -> String {
    let mut reply = format!("{parsed}\n\nTiming: parse={}", format_secs(parse_elapsed));
    if let Some((answer, rag_elapsed)) = rag {
        reply.push_str(&format!(
            "\n\n---\n\nRAG Answer:\n{answer}\n\nTiming: rag={}",
            format_secs(rag_elapsed)
        ));
    }
    reply
}

fn is_timeout(err: &anyhow::Error) -> bool {
    err.downcast_ref::<StageTimeout>().is_some()
        || matches!(err.downcast_ref::<RagError>(), Some(RagError::Timeout { .. }))
}

/// Handle a recognised command
///
/// # Errors
///
/// Returns an error if the reply cannot be sent or usage cannot be read.
pub async fn handle_command(bot: Bot, msg: Message, cmd: Command, state: Arc<AppState>) -> Result<()> {
    let chat = TelegramChat::new(bot, &msg);
    let text = match cmd {
        Command::Start => START_TEXT.to_string(),
        Command::Help => format!(
            "{START_TEXT}\n\nEach screenshot counts towards your daily quota.\n\n{}",
            Command::descriptions()
        ),
        Command::Usage => {
            let usage = state.rate_limiter.usage(get_user_id_safe(&msg)).await?;
            usage_message(usage)
        }
    };
    reply_resilient(&chat, &text).await?;
    Ok(())
}

/// Handle any non-command message: screenshots go through the pipeline,
/// everything else gets a hint.
///
/// # Errors
///
/// Returns an error only if the final error reply cannot be sent.
pub async fn handle_message(bot: Bot, msg: Message, state: Arc<AppState>) -> Result<()> {
    let chat = TelegramChat::new(bot, &msg);
    let Some(file_id) = image_file_id(&msg) else {
        reply_resilient(&chat, NOT_AN_IMAGE).await?;
        return Ok(());
    };

    let user_id = get_user_id_safe(&msg);
    info!("Received image from user {user_id} in chat {}", chat.chat_id());
    handle_screenshot(&chat, user_id, &file_id, &state).await
}

async fn handle_screenshot(
    chat: &dyn ChatTransport,
    user_id: i64,
    file_id: &FileId,
    state: &AppState,
) -> Result<()> {
    match state.rate_limiter.check_and_increment(user_id).await {
        Ok(RateDecision::Limited { limit, resets_at }) => {
            info!("User {user_id} reached the daily limit of {limit}");
            reply_resilient(chat, &limit_message(limit, resets_at)).await?;
            return Ok(());
        }
        Ok(RateDecision::Allowed { used, remaining }) => {
            debug!("User {user_id} request {used} today, remaining {remaining:?}");
        }
        Err(e) => error!("Rate limit check failed for user {user_id}, allowing request: {e}"),
    }

    if let Err(e) = process_screenshot(chat, file_id, state).await {
        let text = if is_timeout(&e) {
            error!("Timed out while processing: {e:#}");
            TIMED_OUT.to_string()
        } else {
            error!("Failed to handle image: {e:#}");
            format!("Error while processing: {e}")
        };
        reply_resilient(chat, &text).await?;
    }
    Ok(())
}

async fn download_screenshot(
    chat: &dyn ChatTransport,
    file_id: &FileId,
    dir: &Path,
) -> Result<PathBuf> {
    let (bytes, telegram_path) = retry_telegram_operation(|| chat.download(file_id)).await?;

    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create {}", dir.display()))?;
    let save_path = dir.join(format!(
        "{}{}",
        Uuid::new_v4().simple(),
        screenshot_extension(&telegram_path)
    ));
    tokio::fs::write(&save_path, bytes)
        .await
        .with_context(|| format!("failed to write {}", save_path.display()))?;

    info!("Downloaded image to {}", save_path.display());
    Ok(save_path)
}

async fn process_screenshot(
    chat: &dyn ChatTransport,
    file_id: &FileId,
    state: &AppState,
) -> Result<()> {
    let save_path = download_screenshot(chat, file_id, &state.settings.screenshots_dir).await?;
    reply_resilient(chat, PROCESSING).await?;

    info!("Parsing screenshot");
    let started = Instant::now();
    let outcome = tokio::time::timeout(
        Duration::from_secs(PARSE_TIMEOUT_SECS),
        state.parser.parse_file(&save_path),
    )
    .await
    .map_err(|_| StageTimeout {
        stage: "parse",
        secs: PARSE_TIMEOUT_SECS,
    })??;
    let parse_elapsed = started.elapsed();
    let parsed_text = format_result(&outcome);

    let Some(question) = outcome.question() else {
        send_long_message(chat, &parsed_text).await?;
        return Ok(());
    };
    reply_resilient(chat, PARSED_OK).await?;

    let rag_answer = match &state.rag {
        Some(rag) => {
            reply_resilient(chat, RUNNING_RAG).await?;
            rag.engine().await?;

            info!("Querying RAG");
            let started = Instant::now();
            let answer = rag.answer(&build_rag_query(question)).await?;
            Some((answer.text, started.elapsed()))
        }
        None => None,
    };

    let reply = compose_reply(
        &parsed_text,
        parse_elapsed,
        rag_answer.as_ref().map(|(text, elapsed)| (text.as_str(), *elapsed)),
    );
    send_long_message(chat, &reply).await
}
