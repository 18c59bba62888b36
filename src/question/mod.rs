//! Question extraction from screenshots.
//!
//! The vision model is asked for a fixed JSON shape; everything downstream
//! (chat reply, corpus text, RAG query) is derived from [`ParseOutcome`].

mod extract;
mod format;
mod model;
/// Vision-model driven screenshot parsing
pub mod parser;

pub use extract::{extract_json_payload, parse_model_output, PARSE_FAILURE};
pub use format::{build_rag_query, format_result, render_corpus_text, NOTHING_EXTRACTED};
pub use model::{ParseOutcome, ParsedQuestion};
pub use parser::ScreenshotParser;
