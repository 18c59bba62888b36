//! Screenshot → vision model → parsed question, with results persisted for the corpus.

use super::extract::parse_model_output;
use super::format::render_corpus_text;
use super::model::ParseOutcome;
use crate::config::{VISION_MAX_TOKENS, VISION_TEMPERATURE};
use crate::llm::VisionModel;
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use walkdir::WalkDir;

/// Instructions sent together with every screenshot
pub const SYSTEM_PROMPT: &str = r#"You are an expert DGT Permiso B instructor. The user is preparing for the official English theory exam.

Analyze the screenshot and return ONLY valid JSON:

{
  "question": "full question translated to natural English",
  "options": ["A) ...", "B) ...", "C) ...", "D) ..."],   // translated
  "correct": "C",   // or null
  "explanation": "full explanation translated to clear, natural English",
  "sign_description": "description of any road sign in English"
}
"#;

/// Extensions picked up by batch parsing
const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// MIME type for a screenshot path, JPEG unless the extension says otherwise.
#[must_use]
pub fn mime_for_path(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_lowercase)
        .as_deref()
    {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("gif") => "image/gif",
        _ => "image/jpeg",
    }
}

/// Reads screenshots with a vision model and writes `{stem}.json` / `{stem}.txt`
pub struct ScreenshotParser {
    vision: Arc<dyn VisionModel>,
    output_dir: PathBuf,
}

impl ScreenshotParser {
    /// Create a parser writing its results into `output_dir`
    #[must_use]
    pub fn new(vision: Arc<dyn VisionModel>, output_dir: PathBuf) -> Self {
        Self { vision, output_dir }
    }

    /// Directory results are written to
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Parse one screenshot file.
    ///
    /// Model output that is not valid JSON yields `ParseOutcome::Failed`
    /// rather than an error; that outcome is persisted as well.
    ///
    /// # Errors
    ///
    /// Returns an error if the image cannot be read, the vision request fails
    /// or the results cannot be written.
    pub async fn parse_file(&self, image_path: &Path) -> Result<ParseOutcome> {
        info!("Processing: {}", image_path.display());

        let image_bytes = tokio::fs::read(image_path)
            .await
            .with_context(|| format!("failed to read {}", image_path.display()))?;

        let raw = self
            .vision
            .analyze_image(
                image_bytes,
                mime_for_path(image_path),
                SYSTEM_PROMPT,
                VISION_MAX_TOKENS,
                VISION_TEMPERATURE,
            )
            .await?;

        let outcome = parse_model_output(&raw);
        if let ParseOutcome::Failed { error, .. } = &outcome {
            warn!("Vision output for {} unusable: {error}", image_path.display());
        }

        self.persist(image_path, &outcome).await?;
        Ok(outcome)
    }

    async fn persist(&self, image_path: &Path, outcome: &ParseOutcome) -> Result<()> {
        let stem = image_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("screenshot");

        tokio::fs::create_dir_all(&self.output_dir)
            .await
            .with_context(|| format!("failed to create {}", self.output_dir.display()))?;

        let json_path = self.output_dir.join(format!("{stem}.json"));
        let json = serde_json::to_string_pretty(&outcome.to_json())?;
        tokio::fs::write(&json_path, json)
            .await
            .with_context(|| format!("failed to write {}", json_path.display()))?;

        let txt_path = self.output_dir.join(format!("{stem}.txt"));
        tokio::fs::write(&txt_path, render_corpus_text(outcome))
            .await
            .with_context(|| format!("failed to write {}", txt_path.display()))?;

        info!("Saved: {stem}.json and .txt");
        Ok(())
    }

    /// Parse every screenshot directly inside `folder`, in path order.
    ///
    /// A failing file is logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the folder cannot be listed.
    pub async fn parse_folder(&self, folder: &Path) -> Result<Vec<(PathBuf, ParseOutcome)>> {
        let images = collect_images(folder)?;
        info!("Found {} screenshots to process...", images.len());

        let mut results = Vec::with_capacity(images.len());
        for path in images {
            match self.parse_file(&path).await {
                Ok(outcome) => results.push((path, outcome)),
                Err(e) => warn!("Skipping {}: {e:#}", path.display()),
            }
        }
        Ok(results)
    }
}

/// Screenshot files directly inside `folder`, sorted by path
///
/// # Errors
///
/// Returns an error if the folder cannot be read.
pub fn collect_images(folder: &Path) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    for entry in WalkDir::new(folder).min_depth(1).max_depth(1) {
        let entry = entry.with_context(|| format!("failed to list {}", folder.display()))?;
        let is_image = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| IMAGE_EXTENSIONS.contains(&e.to_lowercase().as_str()));
        if entry.file_type().is_file() && is_image {
            images.push(entry.into_path());
        }
    }
    images.sort();
    Ok(images)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{LlmError, MockVisionModel};
    use mockall::predicate::*;

    #[test]
    fn test_mime_for_path() {
        assert_eq!(mime_for_path(Path::new("a.PNG")), "image/png");
        assert_eq!(mime_for_path(Path::new("a.jpeg")), "image/jpeg");
        assert_eq!(mime_for_path(Path::new("noext")), "image/jpeg");
    }

    #[tokio::test]
    async fn test_parse_file_persists_results() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let image = dir.path().join("shot1.png");
        std::fs::write(&image, b"png-bytes")?;

        let mut vision = MockVisionModel::new();
        vision
            .expect_analyze_image()
            .with(
                eq(b"png-bytes".to_vec()),
                eq("image/png"),
                always(),
                eq(VISION_MAX_TOKENS),
                always(),
            )
            .times(1)
            .returning(|_, _, _, _, _| {
                Ok("```json\n{\"question\": \"Q?\", \"options\": [\"A) 1\"], \"correct\": \"A\"}\n```"
                    .to_string())
            });

        let out = dir.path().join("parsed");
        let parser = ScreenshotParser::new(Arc::new(vision), out.clone());
        let outcome = parser.parse_file(&image).await?;

        assert_eq!(outcome.question().map(|q| q.question.as_str()), Some("Q?"));
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(out.join("shot1.json"))?)?;
        assert_eq!(json["correct"], "A");
        let txt = std::fs::read_to_string(out.join("shot1.txt"))?;
        assert!(txt.contains("Correct answer: A"));
        Ok(())
    }

    #[tokio::test]
    async fn test_parse_file_unparseable_output() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let image = dir.path().join("blurry.jpg");
        std::fs::write(&image, b"jpg")?;

        let mut vision = MockVisionModel::new();
        vision
            .expect_analyze_image()
            .returning(|_, _, _, _, _| Ok("I cannot read this image".to_string()));

        let parser = ScreenshotParser::new(Arc::new(vision), dir.path().join("out"));
        let outcome = parser.parse_file(&image).await?;
        assert!(matches!(outcome, ParseOutcome::Failed { ref raw, .. } if raw == "I cannot read this image"));
        assert!(dir.path().join("out").join("blurry.json").exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_vision_error_propagates() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let image = dir.path().join("x.jpg");
        std::fs::write(&image, b"jpg")?;

        let mut vision = MockVisionModel::new();
        vision
            .expect_analyze_image()
            .returning(|_, _, _, _, _| Err(LlmError::NetworkError("offline".to_string())));

        let parser = ScreenshotParser::new(Arc::new(vision), dir.path().join("out"));
        assert!(parser.parse_file(&image).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn test_parse_folder_sorted_images_only() -> Result<()> {
        let dir = tempfile::tempdir()?;
        for name in ["b.png", "a.jpg", "notes.txt", "c.JPEG"] {
            std::fs::write(dir.path().join(name), b"data")?;
        }

        let images = collect_images(dir.path())?;
        let names: Vec<_> = images
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
            .collect();
        assert_eq!(names, vec!["a.jpg", "b.png", "c.JPEG"]);

        let mut vision = MockVisionModel::new();
        vision
            .expect_analyze_image()
            .times(3)
            .returning(|_, _, _, _, _| Ok("{\"question\": \"Q\"}".to_string()));
        let parser = ScreenshotParser::new(Arc::new(vision), dir.path().join("parsed"));
        let results = parser.parse_folder(dir.path()).await?;
        assert_eq!(results.len(), 3);
        Ok(())
    }
}
