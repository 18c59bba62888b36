#![deny(missing_docs)]
//! Permiso B theory assistant.
//!
//! Extracts multiple-choice driving-theory questions from screenshots with a
//! vision LLM and optionally answers them with retrieval over the official
//! exam corpus.

/// Telegram transport: handlers, resilient replies, runner.
pub mod bot;
/// Configuration management.
pub mod config;
/// LLM providers: chat completion, vision, embeddings.
pub mod llm;
/// Screenshot parsing and result formatting.
pub mod question;
/// Retrieval-augmented answering over the exam corpus.
pub mod rag;
/// Per-user daily request limits.
pub mod rate_limit;
/// Utility functions.
pub mod utils;
