//! Recover a JSON document from free-form agent output.
//!
//! Agents are asked for JSON but routinely wrap it in prose or markdown
//! fences. Candidates are tried in a fixed order and the first one that
//! parses wins.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use thiserror::Error;

static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)```(?:json)?\s*(.*?)```").expect("valid fence pattern"));

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("agent output did not contain valid JSON")]
    NoJsonFound,
}

/// Parse the first JSON value found in `text`.
///
/// Candidate order:
/// 1. the body of the first fenced code block (optionally tagged `json`);
/// 2. the whole text, trimmed;
/// 3. the outermost balanced `{...}` span and the outermost balanced `[...]`
///    span, object first unless the array span strictly contains it.
pub fn extract_json(text: &str) -> Result<Value, ExtractError> {
    candidates(text)
        .into_iter()
        .filter(|candidate| !candidate.trim().is_empty())
        .find_map(|candidate| serde_json::from_str(candidate.trim()).ok())
        .ok_or(ExtractError::NoJsonFound)
}

fn candidates(text: &str) -> Vec<&str> {
    let mut out = Vec::with_capacity(4);
    if let Some(body) = FENCED_BLOCK.captures(text).and_then(|caps| caps.get(1)) {
        out.push(body.as_str());
    }
    out.push(text.trim());

    let object = balanced_span(text, '{', '}');
    let array = balanced_span(text, '[', ']');
    match (object, array) {
        (Some(obj), Some(arr)) if arr.0 < obj.0 && obj.1 < arr.1 => {
            out.push(&text[arr.0..arr.1]);
            out.push(&text[obj.0..obj.1]);
        }
        (obj, arr) => {
            out.extend(obj.map(|(start, end)| &text[start..end]));
            out.extend(arr.map(|(start, end)| &text[start..end]));
        }
    }
    out
}

/// Byte range of the first balanced `open`..`close` span, ignoring delimiters
/// inside JSON string literals.
fn balanced_span(text: &str, open: char, close: char) -> Option<(usize, usize)> {
    let start = text.find(open)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some((start, start + offset + ch.len_utf8()));
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn reads_fenced_json_block() {
        let text = "Here you go:\n```json\n{\"pass\": true}\n```\nThanks!";
        assert_eq!(extract_json(text), Ok(json!({"pass": true})));
    }

    #[test]
    fn reads_untagged_fence() {
        let text = "```\n[1, 2]\n```";
        assert_eq!(extract_json(text), Ok(json!([1, 2])));
    }

    #[test]
    fn reads_plain_json() {
        assert_eq!(extract_json("  {\"a\": 1}\n"), Ok(json!({"a": 1})));
    }

    #[test]
    fn finds_object_embedded_in_prose() {
        let text = "Verdict follows {\"pass\": false, \"reasoning\": [\"a } in text\"]} done.";
        assert_eq!(
            extract_json(text),
            Ok(json!({"pass": false, "reasoning": ["a } in text"]}))
        );
    }

    #[test]
    fn array_enclosing_the_first_object_is_tried_before_it() {
        let text = "stories: [{\"id\": 1}, {\"id\": 2}] end";
        assert_eq!(extract_json(text), Ok(json!([{"id": 1}, {"id": 2}])));
    }

    #[test]
    fn object_span_is_tried_before_a_disjoint_array() {
        assert_eq!(
            extract_json("sizes [1, 2] then {\"a\": 1} done"),
            Ok(json!({"a": 1}))
        );
        assert_eq!(
            extract_json("note {\"a\": 1} then [1, 2]"),
            Ok(json!({"a": 1}))
        );
    }

    #[test]
    fn handles_escaped_quotes_in_strings() {
        let text = "result => {\"msg\": \"say \\\"hi\\\" {\"} trailing";
        assert_eq!(extract_json(text), Ok(json!({"msg": "say \"hi\" {"})));
    }

    #[test]
    fn falls_back_when_fence_is_not_json() {
        let text = "```\nnot json\n```\n{\"ok\": true}";
        assert_eq!(extract_json(text), Ok(json!({"ok": true})));
    }

    #[test]
    fn reports_missing_json() {
        assert_eq!(extract_json("no structured data here"), Err(ExtractError::NoJsonFound));
        assert_eq!(extract_json(""), Err(ExtractError::NoJsonFound));
        assert_eq!(extract_json("{unbalanced"), Err(ExtractError::NoJsonFound));
    }
}
