//! Text layouts produced from parsed questions.

use super::model::{ParseOutcome, ParsedQuestion};

/// Reply used when the model returned an empty object
pub const NOTHING_EXTRACTED: &str = "No useful text could be extracted from the image.";

/// Instruction header of every RAG query
const RAG_QUERY_HEADER: [&str; 2] = [
    "Analyze the driver's theory test question (Spanish Permiso B / DGT).",
    "Select the correct option and briefly explain why.",
];

/// Renders a parse outcome as the chat reply.
///
/// # Examples
///
/// ```
/// use permiso_bot::question::{format_result, ParseOutcome, ParsedQuestion};
///
/// let outcome = ParseOutcome::Parsed(ParsedQuestion {
///     question: "Who has priority?".to_string(),
///     options: vec!["A) Me".to_string(), "B) You".to_string()],
///     correct: Some("B".to_string()),
///     ..ParsedQuestion::default()
/// });
/// assert_eq!(
///     format_result(&outcome),
///     "Question: Who has priority?\n\nA) Me\nB) You\n\nCorrect answer: B"
/// );
/// ```
#[must_use]
pub fn format_result(outcome: &ParseOutcome) -> String {
    let question = match outcome {
        ParseOutcome::Failed { error, raw } => {
            return format!("Error: {error}\n\nRaw output:\n{raw}");
        }
        ParseOutcome::Parsed(question) => question,
    };

    let mut lines: Vec<String> = Vec::new();

    let text = question.question.trim();
    if !text.is_empty() {
        lines.push(format!("Question: {text}"));
    }

    if !question.options.is_empty() {
        lines.push(String::new());
        lines.extend(question.options.iter().cloned());
    }

    if let Some(correct) = question.correct.as_deref().filter(|c| !c.is_empty()) {
        lines.push(String::new());
        lines.push(format!("Correct answer: {correct}"));
    }

    let explanation = question.explanation.trim();
    if !explanation.is_empty() {
        lines.push(String::new());
        lines.push("Explanation:".to_string());
        lines.push(explanation.to_string());
    }

    let sign = question.sign_description.trim();
    if !sign.is_empty() {
        lines.push(String::new());
        lines.push(format!("Sign: {sign}"));
    }

    if lines.is_empty() {
        return NOTHING_EXTRACTED.to_string();
    }

    lines.join("\n")
}

/// Plain-text companion written next to the JSON so the corpus can index it.
#[must_use]
pub fn render_corpus_text(outcome: &ParseOutcome) -> String {
    let default_question = ParsedQuestion::default();
    let question = outcome.question().unwrap_or(&default_question);

    let mut out = format!("Question: {}\n\n", question.question);
    for option in &question.options {
        out.push_str(option);
        out.push('\n');
    }
    out.push_str(&format!(
        "\nCorrect answer: {}\n",
        question.correct.as_deref().unwrap_or("Not indicated")
    ));
    out.push_str(&format!("\nExplanation:\n{}\n", question.explanation));
    if !question.sign_description.is_empty() {
        out.push_str(&format!("\nSign: {}\n", question.sign_description));
    }
    out
}

/// Builds the retrieval query for a parsed question.
///
/// # Examples
///
/// ```
/// use permiso_bot::question::{build_rag_query, ParsedQuestion};
///
/// let query = build_rag_query(&ParsedQuestion {
///     question: " Can I overtake here? ".to_string(),
///     ..ParsedQuestion::default()
/// });
/// assert!(query.ends_with("Question: Can I overtake here?"));
/// ```
#[must_use]
pub fn build_rag_query(question: &ParsedQuestion) -> String {
    let mut lines: Vec<&str> = RAG_QUERY_HEADER.to_vec();
    lines.push("");
    let question_line = format!("Question: {}", question.question.trim());
    lines.push(&question_line);
    if !question.options.is_empty() {
        lines.push("");
        lines.extend(question.options.iter().map(String::as_str));
    }
    lines.join("\n").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full_question() -> ParsedQuestion {
        ParsedQuestion {
            question: "What does this sign mean?".to_string(),
            options: vec![
                "A) No entry".to_string(),
                "B) One way".to_string(),
                "C) Stop".to_string(),
            ],
            correct: Some("A".to_string()),
            explanation: "  Red circle with a white bar forbids entry.  ".to_string(),
            sign_description: "Red circle, horizontal white bar".to_string(),
        }
    }

    #[test]
    fn test_full_layout() {
        let text = format_result(&ParseOutcome::Parsed(full_question()));
        assert_eq!(
            text,
            "Question: What does this sign mean?\n\n\
             A) No entry\nB) One way\nC) Stop\n\n\
             Correct answer: A\n\n\
             Explanation:\nRed circle with a white bar forbids entry.\n\n\
             Sign: Red circle, horizontal white bar"
        );
    }

    #[test]
    fn test_sections_skipped_when_empty() {
        let question = ParsedQuestion {
            options: vec!["A) Yes".to_string()],
            correct: Some(String::new()),
            ..ParsedQuestion::default()
        };
        assert_eq!(format_result(&ParseOutcome::Parsed(question)), "\nA) Yes");
    }

    #[test]
    fn test_nothing_extracted() {
        let text = format_result(&ParseOutcome::Parsed(ParsedQuestion::default()));
        assert_eq!(text, NOTHING_EXTRACTED);
    }

    #[test]
    fn test_error_layout() {
        let outcome = ParseOutcome::Failed {
            error: "Failed to parse JSON".to_string(),
            raw: "garbage".to_string(),
        };
        assert_eq!(
            format_result(&outcome),
            "Error: Failed to parse JSON\n\nRaw output:\ngarbage"
        );
    }

    #[test]
    fn test_corpus_text() {
        let text = render_corpus_text(&ParseOutcome::Parsed(full_question()));
        assert!(text.starts_with("Question: What does this sign mean?\n\nA) No entry\n"));
        assert!(text.contains("\nCorrect answer: A\n"));
        assert!(text.ends_with("\nSign: Red circle, horizontal white bar\n"));

        let bare = render_corpus_text(&ParseOutcome::Parsed(ParsedQuestion::default()));
        assert!(bare.contains("Correct answer: Not indicated"));
        assert!(!bare.contains("Sign:"));
    }

    #[test]
    fn test_rag_query_layout() {
        let query = build_rag_query(&full_question());
        assert_eq!(
            query,
            "Analyze the driver's theory test question (Spanish Permiso B / DGT).\n\
             Select the correct option and briefly explain why.\n\n\
             Question: What does this sign mean?\n\n\
             A) No entry\nB) One way\nC) Stop"
        );
    }
}
