//! Paragraph-aware text splitting.
//!
//! Chunks are built from whole paragraphs where possible. Consecutive chunks
//! share a short overlap so an answer spanning a boundary is still retrievable.

// lazy_regex! uses once_cell internally
#![allow(clippy::non_std_lazy_statics)]

use lazy_regex::lazy_regex;

/// Match 3+ consecutive newlines
static RE_MULTI_NEWLINE: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"\n{3,}");

/// Match a paragraph break (blank line, possibly with spaces)
static RE_PARAGRAPH_BREAK: lazy_regex::Lazy<regex::Regex> = lazy_regex!(r"\n[ \t]*\n");

/// Chunk sizing, in characters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    /// Upper bound for a chunk
    pub max_chars: usize,
    /// Characters repeated from the end of the previous chunk
    pub overlap_chars: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            max_chars: 1500,
            overlap_chars: 150,
        }
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// Last `n` characters of `s`, starting at a word boundary when possible
fn overlap_tail(s: &str, n: usize) -> &str {
    let len = char_len(s);
    if n == 0 || len == 0 {
        return "";
    }
    if n >= len {
        return s;
    }
    let start = s
        .char_indices()
        .nth(len - n)
        .map_or(0, |(pos, _)| pos);
    let tail = &s[start..];
    match tail.find(char::is_whitespace) {
        Some(ws) => tail[ws..].trim_start(),
        None => tail,
    }
}

/// Splits an oversized paragraph into overlapping windows
fn hard_split(paragraph: &str, config: &ChunkConfig) -> Vec<String> {
    let chars: Vec<char> = paragraph.chars().collect();
    let step = config
        .max_chars
        .saturating_sub(config.overlap_chars)
        .max(1);

    let mut pieces = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + config.max_chars).min(chars.len());
        pieces.push(chars[start..end].iter().collect::<String>().trim().to_string());
        if end == chars.len() {
            break;
        }
        start += step;
    }
    pieces.retain(|p| !p.is_empty());
    pieces
}

/// Splits `text` into retrieval chunks.
///
/// # Examples
///
/// ```
/// use permiso_bot::rag::{chunk_text, ChunkConfig};
///
/// let chunks = chunk_text("First rule.\n\nSecond rule.", &ChunkConfig::default());
/// assert_eq!(chunks, vec!["First rule.\n\nSecond rule."]);
/// ```
#[must_use]
pub fn chunk_text(text: &str, config: &ChunkConfig) -> Vec<String> {
    let normalized = text.replace("\r\n", "\n");
    let normalized = RE_MULTI_NEWLINE.replace_all(&normalized, "\n\n");

    let mut chunks: Vec<String> = Vec::new();
    let mut current = String::new();

    for paragraph in RE_PARAGRAPH_BREAK.split(&normalized) {
        let paragraph = paragraph.trim();
        if paragraph.is_empty() {
            continue;
        }

        if char_len(paragraph) > config.max_chars {
            if !current.is_empty() {
                chunks.push(std::mem::take(&mut current));
            }
            chunks.extend(hard_split(paragraph, config));
            continue;
        }

        if current.is_empty() {
            current = paragraph.to_string();
            continue;
        }

        if char_len(&current) + 2 + char_len(paragraph) <= config.max_chars {
            current.push_str("\n\n");
            current.push_str(paragraph);
            continue;
        }

        let tail = overlap_tail(&current, config.overlap_chars).to_string();
        chunks.push(std::mem::take(&mut current));
        if !tail.is_empty() && char_len(&tail) + 2 + char_len(paragraph) <= config.max_chars {
            current = format!("{tail}\n\n{paragraph}");
        } else {
            current = paragraph.to_string();
        }
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}
