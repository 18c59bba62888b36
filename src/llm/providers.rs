use super::common::{build_openai_messages, extract_openai_response};
use super::http_utils::{self, extract_text_content, send_json_request};
use super::{CompletionModel, EmbeddingProvider, LlmError, VisionModel};
use crate::config::{
    LlmProviderKind, Settings, DEFAULT_CONTEXT_WINDOW, GROQ_API_BASE, RAG_MAX_TOKENS,
    XAI_API_BASE,
};
use async_openai::{config::OpenAIConfig, types::chat::CreateChatCompletionRequestArgs, Client};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::Client as HttpClient;
use serde_json::json;
use tracing::debug;

/// Sampling temperature for RAG answers
const ANSWER_TEMPERATURE: f32 = 0.1;
/// Context window of the Groq-hosted Llama models
const GROQ_CONTEXT_WINDOW: usize = 128_000;

/// Chat completion against any OpenAI-compatible endpoint (Grok, Groq, Ollama)
pub struct OpenAiCompatProvider {
    client: Client<OpenAIConfig>,
    provider: &'static str,
    model: String,
    context_window: usize,
}

impl OpenAiCompatProvider {
    /// Create a provider for an arbitrary OpenAI-compatible base URL
    #[must_use]
    pub fn new(
        provider: &'static str,
        api_base: &str,
        api_key: String,
        model: String,
        context_window: usize,
    ) -> Self {
        let config = OpenAIConfig::new()
            .with_api_key(api_key)
            .with_api_base(api_base.trim_end_matches('/'));
        Self {
            client: Client::with_config(config),
            provider,
            model,
            context_window,
        }
    }

    /// Build the provider selected by `LLM_PROVIDER`
    ///
    /// # Errors
    ///
    /// Returns `LlmError::MissingConfig` when the selected provider has no API key.
    pub fn from_settings(settings: &Settings) -> Result<Self, LlmError> {
        match settings.llm_provider() {
            LlmProviderKind::Grok => {
                let api_key = non_empty(settings.xai_api_key.as_deref())
                    .or_else(|| non_empty(settings.openai_api_key.as_deref()))
                    .ok_or_else(|| {
                        LlmError::MissingConfig(
                            "Missing XAI_API_KEY for Grok. Set XAI_API_KEY in your environment."
                                .to_string(),
                        )
                    })?;
                Ok(Self::new(
                    "grok",
                    XAI_API_BASE,
                    api_key,
                    settings.grok_model.clone(),
                    settings.grok_context_window,
                ))
            }
            LlmProviderKind::Groq => {
                let api_key = non_empty(settings.groq_api_key.as_deref()).ok_or_else(|| {
                    LlmError::MissingConfig("Missing GROQ_API_KEY for Groq.".to_string())
                })?;
                Ok(Self::new(
                    "groq",
                    GROQ_API_BASE,
                    api_key,
                    settings.groq_model.clone(),
                    GROQ_CONTEXT_WINDOW,
                ))
            }
            // Ollama ignores the key but the client requires one
            LlmProviderKind::Ollama => Ok(Self::new(
                "ollama",
                &settings.ollama_base_url,
                "ollama".to_string(),
                settings.ollama_model.clone(),
                DEFAULT_CONTEXT_WINDOW,
            )),
        }
    }
}

#[async_trait]
impl CompletionModel for OpenAiCompatProvider {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError> {
        let messages = build_openai_messages("", prompt)?;

        let request = CreateChatCompletionRequestArgs::default()
            .model(self.model.as_str())
            .messages(messages)
            .max_tokens(RAG_MAX_TOKENS)
            .temperature(ANSWER_TEMPERATURE)
            .build()
            .map_err(|e| LlmError::Unknown(e.to_string()))?;

        debug!(provider = self.provider, model = %self.model, "Sending completion request");

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e| LlmError::ApiError(e.to_string()))?;

        extract_openai_response(&response)
    }

    fn context_window(&self) -> usize {
        self.context_window
    }

    fn label(&self) -> String {
        format!("{}/{}", self.provider, self.model)
    }
}

/// Vision model reached through raw OpenAI-style JSON (`image_url` content parts)
pub struct VisionProvider {
    http_client: HttpClient,
    api_key: String,
    api_base: String,
    model: String,
}

impl VisionProvider {
    /// Create a new vision provider instance
    #[must_use]
    pub fn new(api_key: String, api_base: String, model: String) -> Self {
        Self {
            http_client: http_utils::create_http_client(),
            api_key,
            api_base,
            model,
        }
    }

    fn request_body(
        &self,
        image_bytes: &[u8],
        mime_type: &str,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> serde_json::Value {
        let image_base64 = BASE64.encode(image_bytes);
        let data_url = format!("data:{mime_type};base64,{image_base64}");

        json!({
            "model": self.model,
            "messages": [
                {
                    "role": "user",
                    "content": [
                        {"type": "text", "text": prompt},
                        {
                            "type": "image_url",
                            "image_url": {"url": data_url, "detail": "high"}
                        }
                    ]
                }
            ],
            "max_tokens": max_tokens,
            "temperature": temperature
        })
    }
}

#[async_trait]
impl VisionModel for VisionProvider {
    async fn analyze_image(
        &self,
        image_bytes: Vec<u8>,
        mime_type: &str,
        prompt: &str,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.api_base.trim_end_matches('/'));
        let body = self.request_body(&image_bytes, mime_type, prompt, max_tokens, temperature);

        debug!(model = %self.model, bytes = image_bytes.len(), "Sending vision request");

        let auth = format!("Bearer {}", self.api_key);
        let res_json = send_json_request(&self.http_client, &url, &body, Some(&auth)).await?;
        let content = extract_text_content(&res_json, &["choices", "0", "message", "content"])?;
        Ok(content.trim().to_string())
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(ToString::to_string)
}

/// Build the answer model selected by `LLM_PROVIDER`
///
/// # Errors
///
/// Returns `LlmError::MissingConfig` when the provider's key is not set.
pub fn build_answer_model(settings: &Settings) -> Result<OpenAiCompatProvider, LlmError> {
    OpenAiCompatProvider::from_settings(settings)
}

/// Build the vision model used to read screenshots
///
/// # Errors
///
/// Returns `LlmError::MissingConfig` when `XAI_API_KEY` is not set.
pub fn build_vision_model(settings: &Settings) -> Result<VisionProvider, LlmError> {
    let api_key = non_empty(settings.xai_api_key.as_deref()).ok_or_else(|| {
        LlmError::MissingConfig("Missing XAI_API_KEY for the vision model.".to_string())
    })?;
    Ok(VisionProvider::new(
        api_key,
        settings.vision_api_base.clone(),
        settings.vision_model.clone(),
    ))
}

/// Build the embedding provider used by the index
///
/// # Errors
///
/// Returns `LlmError::MissingConfig` when `OPENAI_API_KEY` is not set.
pub fn build_embedder(settings: &Settings) -> Result<EmbeddingProvider, LlmError> {
    let api_key = non_empty(settings.openai_api_key.as_deref()).ok_or_else(|| {
        LlmError::MissingConfig("Missing OPENAI_API_KEY for OpenAI embeddings.".to_string())
    })?;
    Ok(EmbeddingProvider::new(
        api_key,
        settings.embeddings_api_base.clone(),
        settings.embeddings_model.clone(),
    ))
}
