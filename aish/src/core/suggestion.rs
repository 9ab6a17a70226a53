//! Decoding of model responses into command suggestions.
//!
//! The model is asked for a bare JSON object but frequently wraps it in a
//! markdown fence or surrounds it with prose. Decoding accepts all three shapes;
//! anything else is a hard failure for the turn.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The next shell step proposed by the model.
///
/// Field names follow the JSON contract given to the model. Unknown fields are
/// ignored; every field listed here is required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandSuggestion {
    /// Shell text to run, passed verbatim to the interpreter.
    #[serde(rename = "command")]
    pub command_text: String,
    /// Short explanation of what the command does.
    #[serde(rename = "reason")]
    pub rationale: String,
    /// Whether this command completes the request.
    pub is_final: bool,
    /// Whether the model must see this command's output to choose the next step.
    #[serde(rename = "needs_output")]
    pub needs_output_for_next_step: bool,
    /// Whether the command may run without interactive confirmation.
    #[serde(rename = "safe")]
    pub safe_to_auto_run: bool,
}

/// Why a model response could not be turned into a [`CommandSuggestion`].
#[derive(Debug, Error)]
pub enum SuggestionError {
    #[error("response contains no JSON payload")]
    NoPayload,
    #[error("failed to decode command suggestion: {0}")]
    Decode(#[from] serde_json::Error),
    #[error("command suggestion has an empty command")]
    EmptyCommand,
}

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```([A-Za-z0-9_-]*)[ \t]*\r?\n?(.*?)```").expect("fence regex should be valid")
});

/// Decode a raw model response.
///
/// Candidate payloads are tried in order: `json`-tagged fenced blocks, other
/// fenced blocks, the whole trimmed text if it is a JSON object, then the
/// outermost `{ ... }` span inside surrounding prose. The first candidate that
/// decodes wins; otherwise the last candidate's error is returned.
pub fn parse_suggestion(raw: &str) -> Result<CommandSuggestion, SuggestionError> {
    let mut last_error = SuggestionError::NoPayload;
    for payload in payload_candidates(raw) {
        match decode(payload) {
            Ok(suggestion) => return Ok(suggestion),
            Err(err) => last_error = err,
        }
    }
    Err(last_error)
}

fn decode(payload: &str) -> Result<CommandSuggestion, SuggestionError> {
    let suggestion: CommandSuggestion = serde_json::from_str(payload)?;
    if suggestion.command_text.trim().is_empty() {
        return Err(SuggestionError::EmptyCommand);
    }
    Ok(suggestion)
}

fn payload_candidates(raw: &str) -> Vec<&str> {
    let mut tagged = Vec::new();
    let mut untagged = Vec::new();
    for caps in FENCE_RE.captures_iter(raw) {
        let body = caps.get(2).map_or("", |m| m.as_str().trim());
        if body.is_empty() {
            continue;
        }
        let lang = caps.get(1).map_or("", |m| m.as_str());
        if lang.eq_ignore_ascii_case("json") {
            tagged.push(body);
        } else {
            untagged.push(body);
        }
    }

    let mut candidates = tagged;
    candidates.extend(untagged);

    let trimmed = raw.trim();
    if trimmed.starts_with('{') {
        candidates.push(trimmed);
    }
    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        candidates.push(&trimmed[start..=end]);
    }

    candidates.dedup();
    candidates
}

#[cfg(test)]
mod tests {
    use super::*;

    const BARE: &str = r#"{"safe": true, "command": "ls -la", "reason": "list files", "is_final": true, "needs_output": false}"#;

    #[test]
    fn parses_bare_json() {
        let suggestion = parse_suggestion(BARE).expect("parse");
        assert_eq!(suggestion.command_text, "ls -la");
        assert_eq!(suggestion.rationale, "list files");
        assert!(suggestion.is_final);
        assert!(!suggestion.needs_output_for_next_step);
        assert!(suggestion.safe_to_auto_run);
    }

    #[test]
    fn parses_json_fenced_block() {
        let raw = format!("```json\n{BARE}\n```");
        let suggestion = parse_suggestion(&raw).expect("parse");
        assert_eq!(suggestion.command_text, "ls -la");
    }

    #[test]
    fn parses_untagged_fence_with_prose_around_it() {
        let raw = format!("Here is the next step:\n```\n{BARE}\n```\nLet me know.");
        let suggestion = parse_suggestion(&raw).expect("parse");
        assert_eq!(suggestion.command_text, "ls -la");
    }

    #[test]
    fn parses_object_embedded_in_prose() {
        let raw = format!("Sure! {BARE} Hope that helps.");
        let suggestion = parse_suggestion(&raw).expect("parse");
        assert!(suggestion.is_final);
    }

    #[test]
    fn object_followed_by_prose_decodes() {
        let raw = format!("{BARE} Hope that helps.");
        let suggestion = parse_suggestion(&raw).expect("parse");
        assert_eq!(suggestion.command_text, "ls -la");
    }

    #[test]
    fn json_fence_wins_over_earlier_shell_fence() {
        let raw = format!("Step:\n```bash\nls\n```\n```json\n{BARE}\n```");
        let suggestion = parse_suggestion(&raw).expect("parse");
        assert_eq!(suggestion.command_text, "ls -la");
    }

    #[test]
    fn undecodable_fence_falls_back_to_object_in_prose() {
        let raw = format!("```\nnot json\n```\nUse this instead: {BARE}");
        let suggestion = parse_suggestion(&raw).expect("parse");
        assert!(suggestion.safe_to_auto_run);
    }

    #[test]
    fn ignores_unknown_fields() {
        let raw = r#"{"safe": false, "command": "rm -rf build", "reason": "clean", "is_final": false, "needs_output": true, "confidence": 0.9}"#;
        let suggestion = parse_suggestion(raw).expect("parse");
        assert!(!suggestion.safe_to_auto_run);
        assert!(suggestion.needs_output_for_next_step);
    }

    #[test]
    fn missing_required_field_is_a_decode_error() {
        let raw = r#"{"safe": true, "command": "ls", "reason": "list", "is_final": true}"#;
        let err = parse_suggestion(raw).unwrap_err();
        assert!(matches!(err, SuggestionError::Decode(_)));
        assert!(err.to_string().contains("needs_output"));
    }

    #[test]
    fn empty_command_is_rejected() {
        let raw = r#"{"safe": true, "command": "  ", "reason": "", "is_final": true, "needs_output": false}"#;
        assert!(matches!(
            parse_suggestion(raw),
            Err(SuggestionError::EmptyCommand)
        ));
    }

    #[test]
    fn prose_without_payload_is_rejected() {
        assert!(matches!(
            parse_suggestion("I cannot help with that."),
            Err(SuggestionError::NoPayload)
        ));
        assert!(matches!(
            parse_suggestion("   "),
            Err(SuggestionError::NoPayload)
        ));
    }

    #[test]
    fn truncated_json_is_a_decode_error() {
        let raw = r#"{"safe": true, "command": "ls""#;
        assert!(matches!(
            parse_suggestion(raw),
            Err(SuggestionError::Decode(_))
        ));
    }
}
