//! Corpus loading.

use super::RagError;
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

/// File extensions read into the corpus
const TEXT_EXTENSIONS: [&str; 3] = ["txt", "md", "markdown"];

/// One corpus file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Path relative to the corpus root, `/`-separated
    pub source: String,
    /// Full file contents
    pub text: String,
}

/// Loads every text document under `dir`, sorted by relative path.
///
/// Files with other extensions (PDFs, parsed `.json`) are skipped; blank
/// files are ignored.
///
/// # Errors
///
/// Returns `RagError::Io` when the directory or a file cannot be read and
/// `RagError::EmptyCorpus` when nothing usable was found.
pub fn load_documents(dir: &Path) -> Result<Vec<Document>, RagError> {
    let mut documents = Vec::new();

    for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name() {
        let entry = entry.map_err(|e| RagError::Io {
            path: dir.display().to_string(),
            source: e.into(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let is_text = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| TEXT_EXTENSIONS.contains(&e.to_lowercase().as_str()));
        if !is_text {
            debug!("Skipping non-text corpus file {}", path.display());
            continue;
        }

        let text = std::fs::read_to_string(path).map_err(|e| RagError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        if text.trim().is_empty() {
            continue;
        }

        let source = path
            .strip_prefix(dir)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        documents.push(Document { source, text });
    }

    if documents.is_empty() {
        return Err(RagError::EmptyCorpus(dir.display().to_string()));
    }

    documents.sort_by(|a, b| a.source.cmp(&b.source));
    Ok(documents)
}

/// SHA-256 over every document's source and contents, hex encoded.
#[must_use]
pub fn corpus_fingerprint(documents: &[Document]) -> String {
    let mut hasher = Sha256::new();
    for doc in documents {
        hasher.update(doc.source.as_bytes());
        hasher.update([0u8]);
        hasher.update(doc.text.as_bytes());
        hasher.update([0u8]);
    }
    hasher
        .finalize()
        .iter()
        .fold(String::with_capacity(64), |mut out, byte| {
            let _ = write!(out, "{byte:02x}");
            out
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_documents_filters_and_sorts() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        std::fs::create_dir_all(dir.path().join("parsed"))?;
        std::fs::write(dir.path().join("manual.md"), "# Señales\nStop means stop.")?;
        std::fs::write(dir.path().join("parsed").join("q1.txt"), "Question: speed?")?;
        std::fs::write(dir.path().join("parsed").join("q1.json"), "{}")?;
        std::fs::write(dir.path().join("blank.txt"), "   \n")?;
        std::fs::write(dir.path().join("scan.pdf"), "%PDF")?;

        let docs = load_documents(dir.path())?;
        let sources: Vec<_> = docs.iter().map(|d| d.source.as_str()).collect();
        assert_eq!(sources, vec!["manual.md", "parsed/q1.txt"]);
        Ok(())
    }

    #[test]
    fn test_empty_corpus() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        std::fs::write(dir.path().join("scan.pdf"), "%PDF")?;
        assert!(matches!(
            load_documents(dir.path()),
            Err(RagError::EmptyCorpus(_))
        ));
        Ok(())
    }

    #[test]
    fn test_missing_dir_is_io_error() {
        assert!(matches!(
            load_documents(Path::new("/definitely/not/here")),
            Err(RagError::Io { .. })
        ));
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let a = vec![Document {
            source: "a.txt".to_string(),
            text: "one".to_string(),
        }];
        let b = vec![Document {
            source: "a.txt".to_string(),
            text: "two".to_string(),
        }];
        assert_eq!(corpus_fingerprint(&a).len(), 64);
        assert_eq!(corpus_fingerprint(&a), corpus_fingerprint(&a));
        assert_ne!(corpus_fingerprint(&a), corpus_fingerprint(&b));
    }
}
