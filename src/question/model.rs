use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A theory-test question as read from a screenshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedQuestion {
    /// Question text, translated to English
    #[serde(default, deserialize_with = "lenient_string")]
    pub question: String,
    /// Answer options (`A) ...`), non-string entries are dropped
    #[serde(default, deserialize_with = "string_items")]
    pub options: Vec<String>,
    /// Letter of the correct option when the screenshot shows it
    #[serde(default, deserialize_with = "optional_scalar")]
    pub correct: Option<String>,
    /// Explanation shown by the test app, if any
    #[serde(default, deserialize_with = "lenient_string")]
    pub explanation: String,
    /// Description of a road sign in the image
    #[serde(default, deserialize_with = "lenient_string")]
    pub sign_description: String,
}

/// Result of interpreting a vision-model reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// The reply held a usable JSON object
    Parsed(ParsedQuestion),
    /// The reply could not be used
    Failed {
        /// What went wrong
        error: String,
        /// Model output as received
        raw: String,
    },
}

impl ParseOutcome {
    /// The parsed question, if any
    #[must_use]
    pub const fn question(&self) -> Option<&ParsedQuestion> {
        match self {
            Self::Parsed(q) => Some(q),
            Self::Failed { .. } => None,
        }
    }

    /// JSON document persisted next to the screenshot result
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Parsed(q) => serde_json::to_value(q).unwrap_or(Value::Null),
            Self::Failed { error, raw } => serde_json::json!({ "error": error, "raw": raw }),
        }
    }
}

/// `null` and non-strings become empty, strings pass through
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => s,
        _ => String::new(),
    })
}

fn string_items<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|item| match item {
                Value::String(s) => Some(s),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    })
}

/// Strings stay as-is, numbers and booleans are stringified, `null` is absent
fn optional_scalar<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(s) => Some(s),
        Value::Bool(b) => Some(if b { "True" } else { "False" }.to_string()),
        other @ Value::Number(_) => Some(other.to_string()),
        Value::Array(_) | Value::Object(_) => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lenient_fields() {
        let q: ParsedQuestion = serde_json::from_str(
            r#"{"question": "Q?", "options": ["A) x", 3, null, "B) y"], "correct": 2, "explanation": null}"#,
        )
        .expect("valid json");
        assert_eq!(q.question, "Q?");
        assert_eq!(q.options, vec!["A) x", "B) y"]);
        assert_eq!(q.correct.as_deref(), Some("2"));
        assert_eq!(q.explanation, "");
        assert_eq!(q.sign_description, "");
    }

    #[test]
    fn test_missing_fields_default() {
        let q: ParsedQuestion = serde_json::from_str("{}").expect("valid json");
        assert_eq!(q, ParsedQuestion::default());
    }

    #[test]
    fn test_failed_outcome_json() {
        let outcome = ParseOutcome::Failed {
            error: "Failed to parse JSON".to_string(),
            raw: "nope".to_string(),
        };
        assert_eq!(outcome.to_json()["raw"], "nope");
        assert!(outcome.question().is_none());
    }
}
