//! Retrieval and answer synthesis over a [`VectorIndex`].

use super::index::{ScoredChunk, VectorIndex};
use super::RagError;
use crate::config::RAG_MAX_TOKENS;
use crate::llm::{CompletionModel, Embedder, LlmError};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Answer returned when nothing relevant was retrieved
pub const EMPTY_RESPONSE: &str = "Empty Response";

/// Rough characters per token for prompt packing
const CHARS_PER_TOKEN: usize = 4;

/// Tokens kept free for the template itself
const TEMPLATE_RESERVE_TOKENS: usize = 256;

/// How retrieved chunks are turned into an answer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseMode {
    /// Pack as many chunks per prompt as the context window allows
    Compact,
    /// One chunk per prompt, refining the previous answer
    Refine,
}

impl ResponseMode {
    /// Parse `RAG_RESPONSE_MODE`, falling back to compact
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "compact" => Self::Compact,
            "refine" => Self::Refine,
            other => {
                warn!("Unknown RAG response mode '{other}', using compact");
                Self::Compact
            }
        }
    }
}

/// Synthesised answer and the chunks it was built from
#[derive(Debug, Clone)]
pub struct RagAnswer {
    /// Answer text
    pub text: String,
    /// Retrieved chunks, best first
    pub sources: Vec<ScoredChunk>,
}

impl fmt::Display for RagAnswer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

fn qa_prompt(context: &str, query: &str) -> String {
    format!(
        "Context information is below.\n\
         ---------------------\n\
         {context}\n\
         ---------------------\n\
         Given the context information and not prior knowledge, answer the query.\n\
         Query: {query}\n\
         Answer: "
    )
}

fn refine_prompt(query: &str, existing: &str, context: &str) -> String {
    format!(
        "The original query is as follows: {query}\n\
         We have provided an existing answer: {existing}\n\
         We have the opportunity to refine the existing answer (only if needed) with some more context below.\n\
         ------------\n\
         {context}\n\
         ------------\n\
         Given the new context, refine the original answer to better answer the query. \
         If the context isn't useful, return the original answer.\n\
         Refined Answer: "
    )
}

/// Groups chunk texts so each group fits `budget_chars`; an oversized chunk
/// gets a group of its own.
fn pack_chunks(chunks: &[ScoredChunk], budget_chars: usize) -> Vec<String> {
    let mut packs: Vec<String> = Vec::new();
    let mut current = String::new();
    for chunk in chunks {
        let needed = if current.is_empty() {
            chunk.text.chars().count()
        } else {
            current.chars().count() + 2 + chunk.text.chars().count()
        };
        if !current.is_empty() && needed > budget_chars {
            packs.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push_str("\n\n");
        }
        current.push_str(&chunk.text);
    }
    if !current.is_empty() {
        packs.push(current);
    }
    packs
}

/// Query engine: embed, search, filter, synthesise
pub struct QueryEngine {
    index: Arc<VectorIndex>,
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn CompletionModel>,
    top_k: usize,
    similarity_cutoff: f32,
    mode: ResponseMode,
}

impl QueryEngine {
    /// Create an engine over a loaded index
    #[must_use]
    pub fn new(
        index: Arc<VectorIndex>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn CompletionModel>,
    ) -> Self {
        Self {
            index,
            embedder,
            llm,
            top_k: 2,
            similarity_cutoff: 0.0,
            mode: ResponseMode::Compact,
        }
    }

    /// Number of chunks retrieved per query
    #[must_use]
    pub const fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Minimum cosine similarity a chunk needs to be used
    #[must_use]
    pub const fn with_similarity_cutoff(mut self, cutoff: f32) -> Self {
        self.similarity_cutoff = cutoff;
        self
    }

    /// Response synthesis mode
    #[must_use]
    pub const fn with_mode(mut self, mode: ResponseMode) -> Self {
        self.mode = mode;
        self
    }

    /// The underlying index
    #[must_use]
    pub fn index(&self) -> &VectorIndex {
        &self.index
    }

    /// Chunks relevant to `query`, best first, at or above the cutoff.
    ///
    /// # Errors
    ///
    /// Returns `RagError::Llm` when the query cannot be embedded and
    /// `RagError::DimensionMismatch` when the embedder disagrees with the index.
    pub async fn retrieve(&self, query: &str) -> Result<Vec<ScoredChunk>, RagError> {
        let vectors = self.embedder.embed(vec![query.to_string()]).await?;
        let query_vec = vectors.into_iter().next().ok_or_else(|| {
            RagError::Llm(LlmError::ApiError(
                "Embedding API returned no vector for the query".to_string(),
            ))
        })?;

        let hits = self.index.search(&query_vec, self.top_k)?;
        let total = hits.len();
        let kept: Vec<ScoredChunk> = hits
            .into_iter()
            .filter(|hit| hit.score >= self.similarity_cutoff)
            .collect();
        debug!(
            "Retrieved {total} chunks, {} above cutoff {}",
            kept.len(),
            self.similarity_cutoff
        );
        Ok(kept)
    }

    /// Answer `query` from the retrieved chunks.
    ///
    /// Returns [`EMPTY_RESPONSE`] without calling the model when nothing
    /// relevant was retrieved.
    ///
    /// # Errors
    ///
    /// Propagates retrieval and completion errors.
    pub async fn query(&self, query: &str) -> Result<RagAnswer, RagError> {
        let sources = self.retrieve(query).await?;
        if sources.is_empty() {
            info!("No chunks retrieved, returning empty response");
            return Ok(RagAnswer {
                text: EMPTY_RESPONSE.to_string(),
                sources,
            });
        }

        let contexts = match self.mode {
            ResponseMode::Compact => pack_chunks(&sources, self.context_budget_chars()),
            ResponseMode::Refine => sources.iter().map(|c| c.text.clone()).collect(),
        };

        let mut answer: Option<String> = None;
        for context in &contexts {
            let prompt = match &answer {
                None => qa_prompt(context, query),
                Some(existing) => refine_prompt(query, existing, context),
            };
            let response = self.llm.complete(&prompt).await?;
            answer = Some(response);
        }

        info!(
            "Answered with {} ({} prompts, {} chunks)",
            self.llm.label(),
            contexts.len(),
            sources.len()
        );
        Ok(RagAnswer {
            text: answer.unwrap_or_else(|| EMPTY_RESPONSE.to_string()),
            sources,
        })
    }

    fn context_budget_chars(&self) -> usize {
        let reserved = RAG_MAX_TOKENS as usize + TEMPLATE_RESERVE_TOKENS;
        self.llm
            .context_window()
            .saturating_sub(reserved)
            .max(TEMPLATE_RESERVE_TOKENS)
            * CHARS_PER_TOKEN
    }
}
