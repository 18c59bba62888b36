use super::model::{ParseOutcome, ParsedQuestion};
use serde_json::Value;

const JSON_FENCE: &str = "```json";
const FENCE: &str = "```";

/// Error reported when the model reply is not a JSON object
pub const PARSE_FAILURE: &str = "Failed to parse JSON";

/// Strips Markdown code fences around a JSON reply.
///
/// A ```` ```json ```` fence wins over a bare fence; in both cases the text up
/// to the next closing fence is kept.
///
/// # Examples
///
/// ```
/// use permiso_bot::question::extract_json_payload;
///
/// assert_eq!(extract_json_payload("```json\n{\"a\": 1}\n```"), "{\"a\": 1}");
/// assert_eq!(extract_json_payload("  {\"a\": 1} "), "{\"a\": 1}");
/// ```
#[must_use]
pub fn extract_json_payload(raw: &str) -> &str {
    let raw = raw.trim();
    if let Some((_, rest)) = raw.split_once(JSON_FENCE) {
        return rest.split(FENCE).next().unwrap_or(rest).trim();
    }
    if raw.contains(FENCE) {
        return raw.split(FENCE).nth(1).unwrap_or_default().trim();
    }
    raw
}

/// Interprets the vision model's reply.
///
/// An object carrying its own `"error"` key is reported as a failure with the
/// accompanying `"raw"` text.
#[must_use]
pub fn parse_model_output(raw: &str) -> ParseOutcome {
    let payload = extract_json_payload(raw);

    let failed = || ParseOutcome::Failed {
        error: PARSE_FAILURE.to_string(),
        raw: payload.to_string(),
    };

    let Ok(Value::Object(map)) = serde_json::from_str::<Value>(payload) else {
        return failed();
    };

    if let Some(error) = map.get("error") {
        let error = match error {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let raw = map
            .get("raw")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        return ParseOutcome::Failed { error, raw };
    }

    match serde_json::from_value::<ParsedQuestion>(Value::Object(map)) {
        Ok(question) => ParseOutcome::Parsed(question),
        Err(_) => failed(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_json() {
        let outcome = parse_model_output(r#"{"question": "Max speed?", "options": ["A) 90"]}"#);
        let q = outcome.question().expect("parsed");
        assert_eq!(q.question, "Max speed?");
        assert_eq!(q.options, vec!["A) 90"]);
    }

    #[test]
    fn test_json_fence_with_trailing_text() {
        let raw = "Here you go:\n```json\n{\"question\": \"Q\"}\n```\nHope it helps";
        assert_eq!(extract_json_payload(raw), "{\"question\": \"Q\"}");
        assert!(matches!(parse_model_output(raw), ParseOutcome::Parsed(_)));
    }

    #[test]
    fn test_bare_fence() {
        let raw = "```\n{\"question\": \"Q\"}\n```";
        assert_eq!(extract_json_payload(raw), "{\"question\": \"Q\"}");
    }

    #[test]
    fn test_invalid_json_keeps_payload() {
        let outcome = parse_model_output("```json\nnot json\n```");
        assert_eq!(
            outcome,
            ParseOutcome::Failed {
                error: PARSE_FAILURE.to_string(),
                raw: "not json".to_string(),
            }
        );
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(matches!(
            parse_model_output("[1, 2, 3]"),
            ParseOutcome::Failed { .. }
        ));
    }

    #[test]
    fn test_error_object_reported() {
        let outcome = parse_model_output(r#"{"error": "unreadable image", "raw": "blurry"}"#);
        assert_eq!(
            outcome,
            ParseOutcome::Failed {
                error: "unreadable image".to_string(),
                raw: "blurry".to_string(),
            }
        );
    }
}
