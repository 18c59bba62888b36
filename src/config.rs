//! Configuration and settings management
//!
//! Loads settings from environment variables and defines timing constants.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::PathBuf;

/// How the bot receives updates from Telegram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BotMode {
    /// Long polling (`getUpdates`)
    Polling,
    /// HTTPS webhook served by the bot itself
    Webhook,
}

/// LLM backend used to answer questions in the RAG step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LlmProviderKind {
    /// xAI Grok through its OpenAI-compatible endpoint
    Grok,
    /// Groq cloud
    Groq,
    /// Local Ollama server (OpenAI-compatible `/v1`)
    Ollama,
}

impl LlmProviderKind {
    /// Resolve a provider from its `LLM_PROVIDER` name.
    ///
    /// Anything unrecognised falls back to Ollama.
    ///
    /// # Examples
    ///
    /// ```
    /// use permiso_bot::config::LlmProviderKind;
    ///
    /// assert_eq!(LlmProviderKind::from_name("GROK"), LlmProviderKind::Grok);
    /// assert_eq!(LlmProviderKind::from_name("whatever"), LlmProviderKind::Ollama);
    /// ```
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "grok" => Self::Grok,
            "groq" => Self::Groq,
            _ => Self::Ollama,
        }
    }
}

/// Application settings loaded from environment variables
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Settings {
    /// Telegram Bot API token
    #[serde(default)]
    pub telegram_bot_token: String,
    /// `polling` or `webhook`
    #[serde(default = "default_bot_mode")]
    pub bot_mode: String,
    /// Public https base URL of the webhook deployment
    pub webhook_url: Option<String>,
    /// Path component the webhook listens on
    #[serde(default = "default_webhook_path")]
    pub webhook_path: String,
    /// Port for the webhook listener
    #[serde(default = "default_port")]
    pub port: u16,
    /// Where downloaded screenshots are stored
    #[serde(default = "default_screenshots_dir")]
    pub screenshots_dir: PathBuf,
    /// Where parsed `.json` / `.txt` results are written
    #[serde(default = "default_parsed_output_dir")]
    pub parsed_output_dir: PathBuf,

    /// xAI API key (vision model, Grok answers)
    pub xai_api_key: Option<String>,
    /// OpenAI API key (embeddings, Grok fallback)
    pub openai_api_key: Option<String>,
    /// Groq API key
    pub groq_api_key: Option<String>,

    /// Vision model used to read screenshots
    #[serde(default = "default_vision_model")]
    pub vision_model: String,
    /// Base URL of the vision API
    #[serde(default = "default_vision_api_base")]
    pub vision_api_base: String,

    /// Answer parsed questions with retrieval
    #[serde(default)]
    pub enable_rag: bool,
    /// `grok`, `groq` or `ollama`
    #[serde(default = "default_llm_provider")]
    pub llm_provider: String,
    /// Grok model id
    #[serde(default = "default_grok_model")]
    pub grok_model: String,
    /// Grok context window in tokens
    #[serde(default = "default_grok_context_window")]
    pub grok_context_window: usize,
    /// Groq model id
    #[serde(default = "default_groq_model")]
    pub groq_model: String,
    /// Ollama model id
    #[serde(default = "default_ollama_model")]
    pub ollama_model: String,
    /// Ollama OpenAI-compatible base URL
    #[serde(default = "default_ollama_base_url")]
    pub ollama_base_url: String,

    /// Embedding model id
    #[serde(default = "default_embeddings_model")]
    pub embeddings_model: String,
    /// Base URL of the embeddings API
    #[serde(default = "default_embeddings_api_base")]
    pub embeddings_api_base: String,

    /// Directory holding the index snapshot
    #[serde(default = "default_persist_dir")]
    pub persist_dir: PathBuf,
    /// Corpus directory the index is built from
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Refuse to build the index at runtime
    #[serde(default = "default_true")]
    pub prebuilt_index: bool,
    /// Number of chunks retrieved per query
    #[serde(default = "default_rag_top_k")]
    pub rag_top_k: usize,
    /// `compact` or `refine`
    #[serde(default = "default_rag_response_mode")]
    pub rag_response_mode: String,
    /// Minimum cosine similarity a chunk needs to be used
    #[serde(default)]
    pub rag_similarity_cutoff: f32,

    /// Screenshots per user per UTC day, 0 disables the limit
    #[serde(default = "default_daily_request_limit")]
    pub daily_request_limit: u32,
    /// SQLite file holding the daily counters
    #[serde(default = "default_rate_limit_db")]
    pub rate_limit_db: PathBuf,
    /// Users the daily limit does not apply to
    #[serde(rename = "rate_limit_exempt_users")]
    pub rate_limit_exempt_users_str: Option<String>,
}

fn default_bot_mode() -> String {
    "polling".to_string()
}

fn default_webhook_path() -> String {
    "/webhook".to_string()
}

const fn default_port() -> u16 {
    8080
}

fn default_screenshots_dir() -> PathBuf {
    PathBuf::from("./screenshots")
}

fn default_parsed_output_dir() -> PathBuf {
    PathBuf::from("driving_data/parsed")
}

fn default_vision_model() -> String {
    "grok-4".to_string()
}

fn default_vision_api_base() -> String {
    XAI_API_BASE.to_string()
}

fn default_llm_provider() -> String {
    "ollama".to_string()
}

fn default_grok_model() -> String {
    "grok-4-0709".to_string()
}

const fn default_grok_context_window() -> usize {
    128_000
}

fn default_groq_model() -> String {
    "llama-3.3-70b-versatile".to_string()
}

fn default_ollama_model() -> String {
    "llama3.2".to_string()
}

fn default_ollama_base_url() -> String {
    "http://localhost:11434/v1".to_string()
}

fn default_embeddings_model() -> String {
    "text-embedding-3-small".to_string()
}

fn default_embeddings_api_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_persist_dir() -> PathBuf {
    PathBuf::from("./storage")
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("driving_data")
}

const fn default_true() -> bool {
    true
}

const fn default_rag_top_k() -> usize {
    2
}

fn default_rag_response_mode() -> String {
    "compact".to_string()
}

const fn default_daily_request_limit() -> u32 {
    20
}

fn default_rate_limit_db() -> PathBuf {
    PathBuf::from("./usage.sqlite3")
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            telegram_bot_token: String::new(),
            bot_mode: default_bot_mode(),
            webhook_url: None,
            webhook_path: default_webhook_path(),
            port: default_port(),
            screenshots_dir: default_screenshots_dir(),
            parsed_output_dir: default_parsed_output_dir(),
            xai_api_key: None,
            openai_api_key: None,
            groq_api_key: None,
            vision_model: default_vision_model(),
            vision_api_base: default_vision_api_base(),
            enable_rag: false,
            llm_provider: default_llm_provider(),
            grok_model: default_grok_model(),
            grok_context_window: default_grok_context_window(),
            groq_model: default_groq_model(),
            ollama_model: default_ollama_model(),
            ollama_base_url: default_ollama_base_url(),
            embeddings_model: default_embeddings_model(),
            embeddings_api_base: default_embeddings_api_base(),
            persist_dir: default_persist_dir(),
            data_dir: default_data_dir(),
            prebuilt_index: true,
            rag_top_k: default_rag_top_k(),
            rag_response_mode: default_rag_response_mode(),
            rag_similarity_cutoff: 0.0,
            daily_request_limit: default_daily_request_limit(),
            rate_limit_db: default_rate_limit_db(),
            rate_limit_exempt_users_str: None,
        }
    }
}

impl Settings {
    /// Create new settings by loading from environment and files
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use permiso_bot::config::Settings;
    ///
    /// let settings = Settings::new().expect("Failed to load configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
            // Local overrides, not checked into git
            .add_source(File::with_name("config/local").required(false))
            // Environment::default() maps UPPER_SNAKE_CASE to snake_case,
            // ignore_empty treats empty env vars as unset
            .add_source(Environment::default().ignore_empty(true))
            .build()?;

        s.try_deserialize()
    }

    /// Returns the Telegram token, failing when it was not configured
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Message` if `TELEGRAM_BOT_TOKEN` is unset.
    pub fn require_telegram_token(&self) -> Result<&str, ConfigError> {
        if self.telegram_bot_token.trim().is_empty() {
            return Err(ConfigError::Message(
                "Missing TELEGRAM_BOT_TOKEN in environment.".to_string(),
            ));
        }
        Ok(&self.telegram_bot_token)
    }

    /// Update delivery mode; anything other than `webhook` polls
    #[must_use]
    pub fn bot_mode(&self) -> BotMode {
        if self.bot_mode.trim().eq_ignore_ascii_case("webhook") {
            BotMode::Webhook
        } else {
            BotMode::Polling
        }
    }

    /// Provider used for RAG answers
    #[must_use]
    pub fn llm_provider(&self) -> LlmProviderKind {
        LlmProviderKind::from_name(&self.llm_provider)
    }

    /// Full webhook URL registered with Telegram
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Message` unless `WEBHOOK_URL` is an https URL.
    pub fn webhook_endpoint(&self) -> Result<String, ConfigError> {
        let base = self.webhook_url.as_deref().unwrap_or_default().trim();
        if !base.starts_with("https://") {
            return Err(ConfigError::Message(
                "WEBHOOK_URL must be set to your https Cloud Run URL.".to_string(),
            ));
        }
        let path = self.webhook_path.trim().trim_start_matches('/');
        let path = if path.is_empty() { "webhook" } else { path };
        Ok(format!("{}/{path}", base.trim_end_matches('/')))
    }

    /// Returns a set of Telegram IDs that bypass the daily limit
    #[must_use]
    pub fn rate_limit_exempt_users(&self) -> HashSet<i64> {
        self.rate_limit_exempt_users_str
            .as_ref()
            .map(|s| {
                s.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
                    .filter(|token| !token.is_empty())
                    .filter_map(|id| id.parse::<i64>().ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// xAI OpenAI-compatible API base
pub const XAI_API_BASE: &str = "https://api.x.ai/v1";
/// Groq OpenAI-compatible API base
pub const GROQ_API_BASE: &str = "https://api.groq.com/openai/v1";

/// Timeout for reading one screenshot with the vision model
pub const PARSE_TIMEOUT_SECS: u64 = 120;
/// Timeout for the one-time query engine initialisation
pub const RAG_INIT_TIMEOUT_SECS: u64 = 90;
/// Timeout for a single RAG query
pub const RAG_QUERY_TIMEOUT_SECS: u64 = 120;

/// Replies longer than this are sent in several messages
pub const REPLY_CHUNK_CHARS: usize = 3500;
/// Attempts made by `reply_resilient` before giving up
pub const REPLY_MAX_ATTEMPTS: usize = 3;

/// Retries for Telegram file operations
pub const TELEGRAM_API_MAX_RETRIES: usize = 3;
/// Initial backoff for Telegram file operations
pub const TELEGRAM_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Backoff ceiling for Telegram file operations
pub const TELEGRAM_API_MAX_BACKOFF_MS: u64 = 4000;

/// Vision request output budget
pub const VISION_MAX_TOKENS: u32 = 1200;
/// Screenshots are read deterministically
pub const VISION_TEMPERATURE: f32 = 0.0;
/// Answer output budget for the RAG step
pub const RAG_MAX_TOKENS: u32 = 1024;
/// Context window assumed for providers that do not declare one
pub const DEFAULT_CONTEXT_WINDOW: usize = 8192;

/// Default HTTP timeout for LLM requests
pub const LLM_HTTP_TIMEOUT_SECS: u64 = 180;

/// Get LLM HTTP timeout from env or default.
///
/// Environment variable: `LLM_HTTP_TIMEOUT_SECS`.
#[must_use]
pub fn get_llm_http_timeout_secs() -> u64 {
    std::env::var("LLM_HTTP_TIMEOUT_SECS")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(LLM_HTTP_TIMEOUT_SECS)
}
