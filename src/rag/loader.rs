//! Index load/build against the configured directories.

use super::document::{corpus_fingerprint, load_documents};
use super::engine::{QueryEngine, ResponseMode};
use super::index::VectorIndex;
use super::{ChunkConfig, RagError};
use crate::config::Settings;
use crate::llm::{build_answer_model, build_embedder, Embedder};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

async fn blocking<T, F>(f: F) -> Result<T, RagError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, RagError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RagError::Task(e.to_string()))?
}

async fn build_and_persist(
    data_dir: PathBuf,
    persist_dir: PathBuf,
    embedder: &dyn Embedder,
) -> Result<VectorIndex, RagError> {
    info!("Building index from {}", data_dir.display());
    let documents = blocking(move || load_documents(&data_dir)).await?;
    let index = VectorIndex::build(&documents, &ChunkConfig::default(), embedder).await?;

    let dir = persist_dir.clone();
    let index = blocking(move || index.persist(&dir).map(|()| index)).await?;
    info!(
        "Index with {} chunks persisted to {}",
        index.len(),
        persist_dir.display()
    );
    Ok(index)
}

/// Load the snapshot from `PERSIST_DIR`, or build it from `DATA_DIR`.
///
/// With `PREBUILT_INDEX` set a missing snapshot is an error instead of a
/// build. A loaded snapshot must have been embedded with the configured
/// model; a corpus that changed since the build only logs a warning.
///
/// # Errors
///
/// Returns `RagError::MissingPrebuiltIndex`, `RagError::ModelMismatch` or any
/// load/build error.
pub async fn load_or_build_index(
    settings: &Settings,
    embedder: &dyn Embedder,
) -> Result<VectorIndex, RagError> {
    let persist_dir = settings.persist_dir.clone();
    let data_dir = settings.data_dir.clone();

    if !VectorIndex::snapshot_path(&persist_dir).exists() {
        if settings.prebuilt_index {
            return Err(RagError::MissingPrebuiltIndex(
                persist_dir.display().to_string(),
            ));
        }
        return build_and_persist(data_dir, persist_dir, embedder).await;
    }

    let dir = persist_dir.clone();
    let index = blocking(move || VectorIndex::load(&dir)).await?;
    info!(
        "Loaded index with {} chunks from {} (built {})",
        index.len(),
        persist_dir.display(),
        index.created_at().format("%Y-%m-%d %H:%M UTC")
    );

    let configured = embedder.model_name();
    if index.embed_model() != configured {
        return Err(RagError::ModelMismatch {
            indexed: index.embed_model().to_string(),
            configured,
        });
    }

    match blocking(move || load_documents(&data_dir)).await {
        Ok(documents) if corpus_fingerprint(&documents) != index.corpus_fingerprint() => {
            warn!("Corpus changed since the index was built; run `theory-cli rebuild` to refresh it");
        }
        Ok(_) => {}
        Err(e) => debug!("Corpus not checked against the index: {e}"),
    }

    Ok(index)
}

/// Delete `PERSIST_DIR` and build a fresh index from `DATA_DIR`.
///
/// # Errors
///
/// Returns an error if the old snapshot cannot be removed or the build fails.
pub async fn rebuild_index(
    settings: &Settings,
    embedder: &dyn Embedder,
) -> Result<VectorIndex, RagError> {
    let persist_dir = settings.persist_dir.clone();
    let dir = persist_dir.clone();
    blocking(move || {
        if dir.exists() {
            std::fs::remove_dir_all(&dir).map_err(|e| RagError::Io {
                path: dir.display().to_string(),
                source: e,
            })?;
        }
        Ok(())
    })
    .await?;

    build_and_persist(settings.data_dir.clone(), persist_dir, embedder).await
}

/// Wire embedder, answer model and index into a [`QueryEngine`].
///
/// # Errors
///
/// Returns `RagError::Llm` for missing provider keys and any index error.
pub async fn build_query_engine(settings: &Settings) -> Result<QueryEngine, RagError> {
    let embedder: Arc<dyn Embedder> = Arc::new(build_embedder(settings)?);
    let llm = Arc::new(build_answer_model(settings)?);
    let index = load_or_build_index(settings, embedder.as_ref()).await?;

    Ok(QueryEngine::new(Arc::new(index), embedder, llm)
        .with_top_k(settings.rag_top_k)
        .with_similarity_cutoff(settings.rag_similarity_cutoff)
        .with_mode(ResponseMode::from_name(&settings.rag_response_mode)))
}
