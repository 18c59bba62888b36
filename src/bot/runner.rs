//! Dispatcher setup for polling and webhook deployments.

use super::handlers::{handle_command, handle_message, Command};
use super::state::AppState;
use crate::config::{BotMode, Settings};
use crate::llm::build_vision_model;
use crate::question::ScreenshotParser;
use crate::rag::RagService;
use crate::rate_limit::RateLimiter;
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use teloxide::update_listeners::{webhooks, Polling};
use teloxide::RequestError;
use tracing::{debug, error, info};

/// Wire the services the handlers depend on.
///
/// # Errors
///
/// Returns an error when the vision key is missing, the screenshot directory
/// cannot be created or the usage store cannot be opened.
pub fn build_state(settings: Arc<Settings>) -> Result<Arc<AppState>> {
    std::fs::create_dir_all(&settings.screenshots_dir).with_context(|| {
        format!("failed to create {}", settings.screenshots_dir.display())
    })?;

    let vision = Arc::new(build_vision_model(&settings)?);
    let parser = ScreenshotParser::new(vision, settings.parsed_output_dir.clone());
    let rate_limiter = RateLimiter::from_settings(&settings)?;
    if settings.daily_request_limit == 0 {
        info!("Daily request limit disabled");
    } else {
        info!(
            "Daily request limit: {} screenshots per user",
            settings.daily_request_limit
        );
    }

    let rag = settings.enable_rag.then(|| RagService::new(Arc::clone(&settings)));
    info!("RAG {}", if rag.is_some() { "enabled" } else { "disabled" });

    Ok(AppState::new(settings, parser, rate_limiter, rag))
}

/// Update routing: commands first, every other message to the screenshot handler
#[must_use]
pub fn schema() -> UpdateHandler<RequestError> {
    Update::filter_message()
        .branch(
            dptree::entry()
                .filter_command::<Command>()
                .endpoint(on_command),
        )
        .branch(dptree::endpoint(on_message))
}

async fn on_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    state: Arc<AppState>,
) -> Result<(), RequestError> {
    if let Err(e) = handle_command(bot, msg, cmd, state).await {
        error!("Command error: {e:#}");
    }
    respond(())
}

async fn on_message(bot: Bot, msg: Message, state: Arc<AppState>) -> Result<(), RequestError> {
    if let Err(e) = Box::pin(handle_message(bot, msg, state)).await {
        error!("Message handler error: {e:#}");
    }
    respond(())
}

/// Run the bot until Ctrl-C.
///
/// # Errors
///
/// Returns an error if the token or webhook configuration is invalid, the
/// services cannot be built or the webhook listener cannot start.
pub async fn run_bot(settings: Arc<Settings>) -> Result<()> {
    let bot = Bot::new(settings.require_telegram_token()?);
    let mode = settings.bot_mode();
    let state = build_state(Arc::clone(&settings))?;

    let mut dispatcher = Dispatcher::builder(bot.clone(), schema())
        .dependencies(dptree::deps![state])
        .default_handler(|upd| async move {
            debug!("Unhandled update: {:?}", upd.id);
        })
        .error_handler(LoggingErrorHandler::with_custom_text(
            "An error has occurred in the dispatcher",
        ))
        .enable_ctrlc_handler()
        .build();

    match mode {
        BotMode::Polling => {
            info!("Bot is running (polling)...");
            let listener = Polling::builder(bot).drop_pending_updates().build();
            dispatcher
                .dispatch_with_listener(
                    listener,
                    LoggingErrorHandler::with_custom_text("An error from the update listener"),
                )
                .await;
        }
        BotMode::Webhook => {
            let url = settings
                .webhook_endpoint()?
                .parse::<reqwest::Url>()
                .context("invalid webhook URL")?;
            let address = SocketAddr::from(([0, 0, 0, 0], settings.port));
            info!("Bot is running (webhook on {address})...");
            let listener = webhooks::axum(
                bot,
                webhooks::Options::new(address, url).drop_pending_updates(),
            )
            .await
            .context("failed to start webhook listener")?;
            dispatcher
                .dispatch_with_listener(
                    listener,
                    LoggingErrorHandler::with_custom_text("An error from the update listener"),
                )
                .await;
        }
    }

    info!("Bot stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_state_requires_vision_key() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = Settings {
            screenshots_dir: dir.path().join("shots"),
            rate_limit_db: dir.path().join("usage.db"),
            xai_api_key: None,
            ..Settings::default()
        };
        assert!(build_state(Arc::new(settings)).is_err());
    }

    #[test]
    fn test_build_state_with_rag_disabled() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = Settings {
            screenshots_dir: dir.path().join("shots"),
            rate_limit_db: dir.path().join("usage.db"),
            xai_api_key: Some("xai-test".to_string()),
            enable_rag: false,
            ..Settings::default()
        };
        let state = build_state(Arc::new(settings)).expect("state");
        assert!(state.rag.is_none());
        assert!(dir.path().join("shots").is_dir());
    }
}
