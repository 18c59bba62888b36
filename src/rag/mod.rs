//! Retrieval-augmented answering over the theory corpus.
//!
//! Documents under `DATA_DIR` are chunked, embedded and kept in a
//! [`VectorIndex`] snapshot under `PERSIST_DIR`. [`RagService`] owns the
//! query engine for the bot and initialises it on first use.

mod chunker;
mod document;
mod engine;
mod index;
mod loader;

pub use chunker::{chunk_text, ChunkConfig};
pub use document::{corpus_fingerprint, load_documents, Document};
pub use engine::{QueryEngine, RagAnswer, ResponseMode, EMPTY_RESPONSE};
pub use index::{cosine_similarity, IndexEntry, ScoredChunk, VectorIndex, SNAPSHOT_FILE};
pub use loader::{build_query_engine, load_or_build_index, rebuild_index};

use crate::config::{Settings, RAG_INIT_TIMEOUT_SECS, RAG_QUERY_TIMEOUT_SECS};
use crate::llm::LlmError;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::OnceCell;
use tracing::info;

/// Errors raised while loading the index or answering a query
#[derive(Debug, Error)]
pub enum RagError {
    /// Snapshot missing while runtime builds are disabled
    #[error(
        "Prebuilt index not found at {0}. Build it locally and include the storage directory in the image."
    )]
    MissingPrebuiltIndex(String),
    /// No usable documents in the corpus directory
    #[error("No documents found in {0}")]
    EmptyCorpus(String),
    /// Filesystem failure
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path that failed
        path: String,
        /// Underlying error
        source: std::io::Error,
    },
    /// Snapshot could not be encoded or decoded
    #[error("Invalid index snapshot: {0}")]
    Snapshot(String),
    /// Snapshot embedded with a different model than configured
    #[error("Index was built with embedding model {indexed}, but {configured} is configured")]
    ModelMismatch {
        /// Model stored in the snapshot
        indexed: String,
        /// Model from `EMBEDDINGS_MODEL`
        configured: String,
    },
    /// Vectors of different lengths
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension of the index
        expected: usize,
        /// Dimension received
        actual: usize,
    },
    /// Embedder answered a batch with the wrong number of vectors
    #[error("Embedder returned {actual} vectors for {expected} chunks")]
    EmbeddingCount {
        /// Chunks sent
        expected: usize,
        /// Vectors received
        actual: usize,
    },
    /// Embedding or completion failure
    #[error(transparent)]
    Llm(#[from] LlmError),
    /// Initialisation or query exceeded its time limit
    #[error("RAG {stage} timed out after {secs}s")]
    Timeout {
        /// `init` or `query`
        stage: &'static str,
        /// Limit that was exceeded
        secs: u64,
    },
    /// Blocking task failed to complete
    #[error("Background task failed: {0}")]
    Task(String),
}

/// Lazily initialised query engine shared across handlers
pub struct RagService {
    settings: Arc<Settings>,
    engine: OnceCell<Arc<QueryEngine>>,
}

impl RagService {
    /// Service that builds its engine from `settings` on first use
    #[must_use]
    pub fn new(settings: Arc<Settings>) -> Self {
        Self {
            settings,
            engine: OnceCell::new(),
        }
    }

    /// Service around an already constructed engine
    #[must_use]
    pub fn with_engine(settings: Arc<Settings>, engine: QueryEngine) -> Self {
        Self {
            settings,
            engine: OnceCell::new_with(Some(Arc::new(engine))),
        }
    }

    /// Whether the engine has been initialised
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.engine.initialized()
    }

    /// The query engine, initialising it once.
    ///
    /// A failed or timed out initialisation is retried on the next call.
    ///
    /// # Errors
    ///
    /// Returns `RagError::Timeout` after `RAG_INIT_TIMEOUT_SECS` or the
    /// initialisation error.
    pub async fn engine(&self) -> Result<Arc<QueryEngine>, RagError> {
        let engine = self
            .engine
            .get_or_try_init(|| async {
                info!("Initialising RAG query engine");
                let engine = tokio::time::timeout(
                    Duration::from_secs(RAG_INIT_TIMEOUT_SECS),
                    build_query_engine(&self.settings),
                )
                .await
                .map_err(|_| RagError::Timeout {
                    stage: "init",
                    secs: RAG_INIT_TIMEOUT_SECS,
                })??;
                Ok::<_, RagError>(Arc::new(engine))
            })
            .await?;
        Ok(Arc::clone(engine))
    }

    /// Answer `query`, initialising the engine if needed.
    ///
    /// # Errors
    ///
    /// Returns `RagError::Timeout` after `RAG_QUERY_TIMEOUT_SECS` or any
    /// engine error.
    pub async fn answer(&self, query: &str) -> Result<RagAnswer, RagError> {
        let engine = self.engine().await?;
        tokio::time::timeout(
            Duration::from_secs(RAG_QUERY_TIMEOUT_SECS),
            engine.query(query),
        )
        .await
        .map_err(|_| RagError::Timeout {
            stage: "query",
            secs: RAG_QUERY_TIMEOUT_SECS,
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockCompletionModel, MockEmbedder};

    async fn engine_with(answer: &'static str) -> QueryEngine {
        let mut embedder = MockEmbedder::new();
        embedder.expect_model_name().returning(|| "m".to_string());
        embedder
            .expect_embed()
            .returning(|texts| Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect()));

        let mut llm = MockCompletionModel::new();
        llm.expect_complete()
            .returning(move |_| Ok(answer.to_string()));
        llm.expect_context_window().return_const(8192usize);
        llm.expect_label().returning(|| "mock/model".to_string());

        let docs = vec![Document {
            source: "rules.txt".to_string(),
            text: "Overtaking on the right is forbidden.".to_string(),
        }];
        let index = VectorIndex::build(&docs, &ChunkConfig::default(), &embedder)
            .await
            .expect("index");
        QueryEngine::new(Arc::new(index), Arc::new(embedder), Arc::new(llm))
    }

    #[test]
    fn test_missing_prebuilt_message() {
        let err = RagError::MissingPrebuiltIndex("./storage".to_string());
        assert_eq!(
            err.to_string(),
            "Prebuilt index not found at ./storage. Build it locally and include the storage directory in the image."
        );
    }

    #[tokio::test]
    async fn test_service_with_engine_answers() -> Result<(), RagError> {
        let engine = engine_with("B) 90 km/h").await;
        let service = RagService::with_engine(Arc::new(Settings::default()), engine);
        assert!(service.is_ready());

        let answer = service.answer("What is the limit?").await?;
        assert_eq!(answer.to_string(), "B) 90 km/h");
        assert_eq!(answer.sources.len(), 1);
        assert_eq!(answer.sources[0].source, "rules.txt");
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_init_is_retried() {
        let settings = Settings {
            openai_api_key: None,
            ..Settings::default()
        };
        let service = RagService::new(Arc::new(settings));
        assert!(matches!(
            service.engine().await,
            Err(RagError::Llm(LlmError::MissingConfig(_)))
        ));
        assert!(!service.is_ready());
        assert!(service.engine().await.is_err());
    }
}
