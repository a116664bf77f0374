//! Legacy termination: a turn without tool calls whose text is a JSON
//! completion payload. `final_response` is the supported way to finish; this
//! only recognizes models that answer with the payload as plain text.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a finished run reports to the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalPayload {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub next_steps: Vec<String>,
}

impl TerminalPayload {
    pub fn from_text(text: impl Into<String>) -> Self {
        Self {
            message: text.into(),
            summary: None,
            next_steps: vec![],
        }
    }
}

const TERMINAL_MARKERS: &[&str] = &["final_response", "complete", "completed", "done"];

/// Recognized shapes:
/// `{"final_response": {"message": ...}}` or an object with a `type`/`status`
/// of `final_response`, `complete` or `done` next to a `message`.
/// Code fences around the object are ignored.
pub fn parse_terminal(text: &str) -> Option<TerminalPayload> {
    let value: Value = serde_json::from_str(extract_json_object(text)?).ok()?;
    let object = value.as_object()?;

    if let Some(inner) = object.get("final_response") {
        return payload_from(inner);
    }

    let marker = ["type", "status"]
        .iter()
        .filter_map(|key| object.get(*key).and_then(Value::as_str))
        .any(|v| TERMINAL_MARKERS.contains(&v.to_ascii_lowercase().as_str()));
    if marker {
        return payload_from(&value);
    }
    None
}

fn payload_from(value: &Value) -> Option<TerminalPayload> {
    let message = value.get("message")?.as_str()?.to_string();
    let summary = value
        .get("summary")
        .and_then(Value::as_str)
        .map(str::to_string);
    let next_steps = value
        .get("next_steps")
        .or_else(|| value.get("nextSteps"))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    Some(TerminalPayload {
        message,
        summary,
        next_steps,
    })
}

/// The outermost `{ ... }` span, after stripping markdown fences.
pub(crate) fn extract_json_object(text: &str) -> Option<&str> {
    let trimmed = strip_code_fence(text.trim());
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    (end > start).then(|| &trimmed[start..=end])
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the language tag line.
    let rest = rest.split_once('\n').map_or(rest, |(_, body)| body);
    rest.trim_end().strip_suffix("```").unwrap_or(rest).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_final_response() {
        let payload = parse_terminal(
            r#"{"final_response": {"message": "Table X added", "next_steps": ["run migrations"]}}"#,
        )
        .unwrap();
        assert_eq!(payload.message, "Table X added");
        assert_eq!(payload.next_steps, vec!["run migrations"]);
    }

    #[test]
    fn test_fenced_status_payload() {
        let text = "```json\n{\"status\": \"complete\", \"message\": \"done\", \"summary\": \"1 file\"}\n```";
        let payload = parse_terminal(text).unwrap();
        assert_eq!(payload.message, "done");
        assert_eq!(payload.summary.as_deref(), Some("1 file"));
    }

    #[test]
    fn test_plain_text_and_non_terminal_json_are_ignored() {
        assert!(parse_terminal("Sure, the table is called X.").is_none());
        assert!(parse_terminal(r#"{"status": "working", "message": "hold on"}"#).is_none());
        assert!(parse_terminal(r#"{"type": "done"}"#).is_none());
        assert!(parse_terminal("{not json}").is_none());
    }
}
