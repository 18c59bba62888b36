//! LLM providers
//!
//! Three seams are used by the rest of the crate: chat completion for RAG
//! answers, vision for reading screenshots and embeddings for retrieval.
//! Every backend is OpenAI-compatible, so the provider is chosen purely by
//! base URL, key and model id.

mod common;
/// OpenAI-compatible embedding provider
pub mod embeddings;
mod http_utils;
/// Chat completion and vision providers
pub mod providers;

use async_trait::async_trait;
use thiserror::Error;

pub use embeddings::EmbeddingProvider;
pub use providers::{
    build_answer_model, build_embedder, build_vision_model, OpenAiCompatProvider, VisionProvider,
};

/// Errors that can occur during LLM operations
#[derive(Debug, Error)]
pub enum LlmError {
    /// Error returned by the provider's API
    #[error("API error: {0}")]
    ApiError(String),
    /// Error during network communication
    #[error("Network error: {0}")]
    NetworkError(String),
    /// Error during JSON serialization or deserialization
    #[error("JSON error: {0}")]
    JsonError(String),
    /// Missing provider configuration or API key
    #[error("{0}")]
    MissingConfig(String),
    /// Rate limit exceeded (429), optionally with a wait time
    #[error("Rate limit exceeded: {message} (wait: {wait_secs:?}s)")]
    RateLimit {
        /// Retry-After duration in seconds, if provided by the server
        wait_secs: Option<u64>,
        /// Error message from the server
        message: String,
    },
    /// Any other unexpected error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

/// Text completion backend used for RAG answers
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CompletionModel: Send + Sync {
    /// Complete a single user prompt
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;

    /// Context window in tokens
    fn context_window(&self) -> usize;

    /// Human-readable `provider/model` label for logs
    fn label(&self) -> String;
}

/// Vision backend used to read screenshots
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait VisionModel: Send + Sync {
    /// Run `prompt` against one image and return the raw model text
    async fn analyze_image(
        &self,
        image_bytes: Vec<u8>,
        mime_type: &str,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, LlmError>;
}

/// Embedding backend used to index and query the corpus
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, one vector per input in order
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, LlmError>;

    /// Model id stored alongside the index
    fn model_name(&self) -> String;
}
