//! In-memory vector index with a JSON snapshot.

use super::chunker::{chunk_text, ChunkConfig};
use super::document::{corpus_fingerprint, Document};
use super::RagError;
use crate::llm::Embedder;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Snapshot file name inside the persist directory
pub const SNAPSHOT_FILE: &str = "index.json";

/// Snapshot layout version
const FORMAT_VERSION: u32 = 1;

/// One embedded chunk
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexEntry {
    /// `{source}#{n}`
    pub id: String,
    /// Corpus file the chunk came from
    pub source: String,
    /// Chunk text
    pub text: String,
    /// Embedding vector
    pub embedding: Vec<f32>,
}

/// A retrieved chunk with its cosine similarity
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredChunk {
    /// Corpus file the chunk came from
    pub source: String,
    /// Chunk text
    pub text: String,
    /// Cosine similarity to the query
    pub score: f32,
}

/// Embedded corpus, searchable by cosine similarity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorIndex {
    version: u32,
    embed_model: String,
    dimension: usize,
    corpus_fingerprint: String,
    created_at: DateTime<Utc>,
    entries: Vec<IndexEntry>,
}

/// Cosine similarity, `None` for mismatched or zero-length vectors
#[must_use]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

impl VectorIndex {
    /// Chunk and embed `documents`.
    ///
    /// # Errors
    ///
    /// Returns `RagError::EmptyCorpus` when no chunks were produced,
    /// `RagError::Llm` when embedding fails, `RagError::EmbeddingCount` when
    /// the batch does not hold one vector per chunk and
    /// `RagError::DimensionMismatch` when the vectors vary in length.
    pub async fn build(
        documents: &[Document],
        config: &ChunkConfig,
        embedder: &dyn Embedder,
    ) -> Result<Self, RagError> {
        let mut pending: Vec<(String, String, String)> = Vec::new();
        for doc in documents {
            for (n, chunk) in chunk_text(&doc.text, config).into_iter().enumerate() {
                pending.push((format!("{}#{n}", doc.source), doc.source.clone(), chunk));
            }
        }
        if pending.is_empty() {
            return Err(RagError::EmptyCorpus("no chunks".to_string()));
        }

        info!(
            "Embedding {} chunks from {} documents with {}",
            pending.len(),
            documents.len(),
            embedder.model_name()
        );
        let texts: Vec<String> = pending.iter().map(|(_, _, text)| text.clone()).collect();
        let vectors = embedder.embed(texts).await?;
        if vectors.len() != pending.len() {
            return Err(RagError::EmbeddingCount {
                expected: pending.len(),
                actual: vectors.len(),
            });
        }

        let dimension = vectors.first().map_or(0, Vec::len);
        let mut entries = Vec::with_capacity(pending.len());
        for ((id, source, text), embedding) in pending.into_iter().zip(vectors) {
            if embedding.len() != dimension {
                return Err(RagError::DimensionMismatch {
                    expected: dimension,
                    actual: embedding.len(),
                });
            }
            entries.push(IndexEntry {
                id,
                source,
                text,
                embedding,
            });
        }

        Ok(Self {
            version: FORMAT_VERSION,
            embed_model: embedder.model_name(),
            dimension,
            corpus_fingerprint: corpus_fingerprint(documents),
            created_at: Utc::now(),
            entries,
        })
    }

    /// Top `top_k` entries by cosine similarity, best first.
    ///
    /// Equal scores keep insertion order.
    ///
    /// # Errors
    ///
    /// Returns `RagError::DimensionMismatch` when the query vector does not
    /// match the index.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<ScoredChunk>, RagError> {
        if query.len() != self.dimension {
            return Err(RagError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let mut scored: Vec<(usize, f32)> = self
            .entries
            .iter()
            .enumerate()
            .map(|(pos, entry)| {
                (
                    pos,
                    cosine_similarity(query, &entry.embedding).unwrap_or(0.0),
                )
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1));

        Ok(scored
            .into_iter()
            .take(top_k)
            .filter_map(|(pos, score)| {
                self.entries.get(pos).map(|entry| ScoredChunk {
                    source: entry.source.clone(),
                    text: entry.text.clone(),
                    score,
                })
            })
            .collect())
    }

    /// Path of the snapshot inside `dir`
    #[must_use]
    pub fn snapshot_path(dir: &Path) -> PathBuf {
        dir.join(SNAPSHOT_FILE)
    }

    /// Write the snapshot into `dir`, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns `RagError::Io` or `RagError::Snapshot` on failure.
    pub fn persist(&self, dir: &Path) -> Result<(), RagError> {
        std::fs::create_dir_all(dir).map_err(|e| RagError::Io {
            path: dir.display().to_string(),
            source: e,
        })?;

        let path = Self::snapshot_path(dir);
        let tmp = dir.join(format!("{SNAPSHOT_FILE}.tmp"));
        let json = serde_json::to_vec(self).map_err(|e| RagError::Snapshot(e.to_string()))?;
        std::fs::write(&tmp, json).map_err(|e| RagError::Io {
            path: tmp.display().to_string(),
            source: e,
        })?;
        std::fs::rename(&tmp, &path).map_err(|e| RagError::Io {
            path: path.display().to_string(),
            source: e,
        })?;

        debug!("Persisted {} entries to {}", self.entries.len(), path.display());
        Ok(())
    }

    /// Read the snapshot from `dir`.
    ///
    /// # Errors
    ///
    /// Returns `RagError::Io` when the file cannot be read and
    /// `RagError::Snapshot` when it is malformed or of another version.
    pub fn load(dir: &Path) -> Result<Self, RagError> {
        let path = Self::snapshot_path(dir);
        let bytes = std::fs::read(&path).map_err(|e| RagError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let index: Self = serde_json::from_slice(&bytes)
            .map_err(|e| RagError::Snapshot(format!("{}: {e}", path.display())))?;
        if index.version != FORMAT_VERSION {
            return Err(RagError::Snapshot(format!(
                "unsupported snapshot version {} in {}",
                index.version,
                path.display()
            )));
        }
        Ok(index)
    }

    /// Embedding model the index was built with
    #[must_use]
    pub fn embed_model(&self) -> &str {
        &self.embed_model
    }

    /// Vector dimension
    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.dimension
    }

    /// Fingerprint of the corpus at build time
    #[must_use]
    pub fn corpus_fingerprint(&self) -> &str {
        &self.corpus_fingerprint
    }

    /// Build time
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Number of chunks
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index holds no chunks
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockEmbedder;

    fn axis_embedder() -> MockEmbedder {
        let mut embedder = MockEmbedder::new();
        embedder
            .expect_model_name()
            .returning(|| "axis-embed".to_string());
        embedder.expect_embed().returning(|texts| {
            Ok(texts
                .iter()
                .map(|t| {
                    if t.contains("speed") {
                        vec![1.0, 0.0]
                    } else if t.contains("sign") {
                        vec![0.0, 1.0]
                    } else {
                        vec![0.7, 0.7]
                    }
                })
                .collect())
        });
        embedder
    }

    fn docs() -> Vec<Document> {
        vec![
            Document {
                source: "a.txt".to_string(),
                text: "speed limits in towns".to_string(),
            },
            Document {
                source: "b.txt".to_string(),
                text: "sign shapes".to_string(),
            },
            Document {
                source: "c.txt".to_string(),
                text: "general rules".to_string(),
            },
        ]
    }

    #[test]
    fn test_cosine_similarity() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]), Some(1.0));
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]), Some(0.0));
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), None);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), None);
    }

    #[tokio::test]
    async fn test_build_and_search() -> Result<(), RagError> {
        let index = VectorIndex::build(&docs(), &ChunkConfig::default(), &axis_embedder()).await?;
        assert_eq!(index.len(), 3);
        assert_eq!(index.dimension(), 2);
        assert_eq!(index.embed_model(), "axis-embed");

        let hits = index.search(&[1.0, 0.0], 2)?;
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].source, "a.txt");
        assert_eq!(hits[1].source, "c.txt");
        assert!(hits[0].score > hits[1].score);
        Ok(())
    }

    #[tokio::test]
    async fn test_ties_keep_insertion_order() -> Result<(), RagError> {
        let index = VectorIndex::build(&docs(), &ChunkConfig::default(), &axis_embedder()).await?;
        // a and b score the same against the diagonal
        let hits = index.search(&[1.0, 1.0], 3)?;
        assert_eq!(hits[0].source, "c.txt");
        assert_eq!(hits[1].source, "a.txt");
        assert_eq!(hits[2].source, "b.txt");
        Ok(())
    }

    #[tokio::test]
    async fn test_short_embedding_batch_rejected() {
        let mut embedder = MockEmbedder::new();
        embedder
            .expect_model_name()
            .returning(|| "short-embed".to_string());
        embedder.expect_embed().returning(|texts| {
            Ok(texts.iter().skip(1).map(|_| vec![1.0, 0.0]).collect())
        });

        let result = VectorIndex::build(&docs(), &ChunkConfig::default(), &embedder).await;
        assert!(matches!(
            result,
            Err(RagError::EmbeddingCount {
                expected: 3,
                actual: 2
            })
        ));
    }

    #[test]
    fn test_nan_scores_sort_totally() {
        let entry = |source: &str, embedding: Vec<f32>| IndexEntry {
            id: format!("{source}#0"),
            source: source.to_string(),
            text: source.to_string(),
            embedding,
        };
        let index = VectorIndex {
            version: FORMAT_VERSION,
            embed_model: "axis-embed".to_string(),
            dimension: 2,
            corpus_fingerprint: String::new(),
            created_at: Utc::now(),
            entries: vec![
                entry("nan.txt", vec![f32::NAN, 1.0]),
                entry("a.txt", vec![1.0, 0.0]),
                entry("b.txt", vec![0.0, 1.0]),
            ],
        };

        let hits = index.search(&[1.0, 0.0], 3).expect("search");
        let finite: Vec<&str> = hits
            .iter()
            .filter(|h| !h.score.is_nan())
            .map(|h| h.source.as_str())
            .collect();
        assert_eq!(finite, vec!["a.txt", "b.txt"]);
        assert_eq!(hits.len(), 3);
    }

    #[tokio::test]
    async fn test_search_dimension_mismatch() -> Result<(), RagError> {
        let index = VectorIndex::build(&docs(), &ChunkConfig::default(), &axis_embedder()).await?;
        assert!(matches!(
            index.search(&[1.0, 0.0, 0.0], 1),
            Err(RagError::DimensionMismatch {
                expected: 2,
                actual: 3
            })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn test_persist_and_load() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let index = VectorIndex::build(&docs(), &ChunkConfig::default(), &axis_embedder()).await?;
        index.persist(dir.path())?;
        assert!(dir.path().join(SNAPSHOT_FILE).exists());
        assert!(!dir.path().join("index.json.tmp").exists());

        let loaded = VectorIndex::load(dir.path())?;
        assert_eq!(loaded.len(), 3);
        assert_eq!(loaded.corpus_fingerprint(), index.corpus_fingerprint());
        assert_eq!(loaded.created_at(), index.created_at());
        Ok(())
    }

    #[test]
    fn test_load_malformed_snapshot() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join(SNAPSHOT_FILE), "not json")?;
        assert!(matches!(
            VectorIndex::load(dir.path()),
            Err(RagError::Snapshot(_))
        ));
        Ok(())
    }
}
