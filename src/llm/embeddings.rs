//! OpenAI-compatible embedding provider.

use super::{http_utils, Embedder, LlmError};
use async_trait::async_trait;
use serde::Deserialize;

/// Inputs sent per `/embeddings` request
const EMBEDDING_BATCH_SIZE: usize = 64;

#[derive(Deserialize)]
struct EmbeddingData {
    index: Option<usize>,
    embedding: Vec<f32>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

/// Universal OpenAI-compatible embedding provider.
pub struct EmbeddingProvider {
    http_client: reqwest::Client,
    api_key: String,
    api_base: String,
    model: String,
}

impl EmbeddingProvider {
    /// Create a new embedding provider instance.
    #[must_use]
    pub fn new(api_key: String, api_base: String, model: String) -> Self {
        Self {
            http_client: http_utils::create_http_client(),
            api_key,
            api_base,
            model,
        }
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, LlmError> {
        let url = format!("{}/embeddings", self.api_base.trim_end_matches('/'));

        let body = serde_json::json!({
            "model": self.model,
            "input": batch
        });

        let auth = format!("Bearer {}", self.api_key);
        let value = http_utils::send_json_request(&self.http_client, &url, &body, Some(&auth)).await?;
        let parsed: EmbeddingResponse =
            serde_json::from_value(value).map_err(|e| LlmError::JsonError(e.to_string()))?;

        order_embeddings(parsed.data, batch.len())
    }
}

/// Restores input order and checks that every input got a vector.
fn order_embeddings(data: Vec<EmbeddingData>, expected: usize) -> Result<Vec<Vec<f32>>, LlmError> {
    if data.len() != expected {
        return Err(LlmError::ApiError(format!(
            "Embedding API returned {} vectors for {expected} inputs",
            data.len()
        )));
    }

    let mut indexed: Vec<(usize, Vec<f32>)> = data
        .into_iter()
        .enumerate()
        .map(|(pos, d)| (d.index.unwrap_or(pos), d.embedding))
        .collect();
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, embedding)| embedding).collect())
}

#[async_trait]
impl Embedder for EmbeddingProvider {
    async fn embed(&self, texts: Vec<String>) -> Result<Vec<Vec<f32>>, LlmError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(EMBEDDING_BATCH_SIZE) {
            vectors.extend(self.embed_batch(batch).await?);
        }
        Ok(vectors)
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_embeddings_sorts_by_index() {
        let data = vec![
            EmbeddingData {
                index: Some(1),
                embedding: vec![1.0],
            },
            EmbeddingData {
                index: Some(0),
                embedding: vec![0.0],
            },
        ];
        let ordered = order_embeddings(data, 2).expect("two vectors");
        assert_eq!(ordered, vec![vec![0.0], vec![1.0]]);
    }

    #[test]
    fn test_order_embeddings_count_mismatch() {
        let data = vec![EmbeddingData {
            index: None,
            embedding: vec![0.5],
        }];
        assert!(order_embeddings(data, 3).is_err());
    }
}
