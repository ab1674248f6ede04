//! Shared deterministic types for ccagent core logic.
//!
//! Stories are kept as the raw JSON objects they were loaded from. Fields this
//! crate never interprets survive a load/save cycle untouched and in their
//! original order; only `passes` and `completed_at` are ever written.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One backlog work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Story {
    fields: Map<String, Value>,
}

impl Story {
    pub fn from_fields(fields: Map<String, Value>) -> Self {
        Self { fields }
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    pub fn id(&self) -> Option<&Value> {
        self.fields.get("id")
    }

    /// Id as an ordering key; `None` when missing or not a finite number.
    pub fn numeric_id(&self) -> Option<f64> {
        finite(self.fields.get("id"))
    }

    /// Id rendered for prompts, progress lines and commit messages.
    pub fn id_label(&self) -> String {
        match self.fields.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Null) | None => "?".to_string(),
            Some(other) => other.to_string(),
        }
    }

    pub fn title(&self) -> &str {
        self.fields
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn description(&self) -> Option<&str> {
        self.fields
            .get("description")
            .and_then(Value::as_str)
            .filter(|text| !text.trim().is_empty())
    }

    pub fn acceptance(&self) -> Vec<String> {
        string_list(self.fields.get("acceptance"))
    }

    pub fn constitutional_refs(&self) -> Vec<String> {
        string_list(self.fields.get("constitutional_refs"))
    }

    /// Priority as an ordering key; `None` when missing or not a finite number.
    pub fn priority(&self) -> Option<f64> {
        finite(self.fields.get("priority"))
    }

    pub fn passes(&self) -> bool {
        matches!(self.fields.get("passes"), Some(Value::Bool(true)))
    }

    pub fn completed_at(&self) -> Option<&str> {
        self.fields.get("completed_at").and_then(Value::as_str)
    }

    /// Mark the story as passed. `completed_at` is only stamped the first time.
    pub fn mark_passed(&mut self, completed_at: &str) {
        self.fields.insert("passes".to_string(), Value::Bool(true));
        if self.completed_at().is_none() {
            self.fields.insert(
                "completed_at".to_string(),
                Value::String(completed_at.to_string()),
            );
        }
    }
}

fn finite(value: Option<&Value>) -> Option<f64> {
    value.and_then(Value::as_f64).filter(|n| n.is_finite())
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };
    items
        .iter()
        .map(|item| match item {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        })
        .collect()
}

/// Which diff the validator evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiffSource {
    Staged,
    WorkingTree,
    LatestCommit,
    NoChanges,
}

impl DiffSource {
    pub fn describe(self) -> &'static str {
        match self {
            DiffSource::Staged => "staged changes",
            DiffSource::WorkingTree => "working tree changes",
            DiffSource::LatestCommit => "latest commit",
            DiffSource::NoChanges => "no changes detected",
        }
    }
}

impl fmt::Display for DiffSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// A single rule the validator says the diff broke.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub reference: String,
    pub explanation: String,
}

/// Normalized validator judgment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verdict {
    pub pass: bool,
    pub reasoning: Vec<String>,
    pub violations: Vec<Violation>,
    pub amendment_suggestion: String,
    pub source: DiffSource,
}

impl Verdict {
    pub fn first_reason(&self) -> Option<&str> {
        self.reasoning
            .iter()
            .map(String::as_str)
            .find(|reason| !reason.trim().is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn story(value: Value) -> Story {
        serde_json::from_value(value).expect("story")
    }

    #[test]
    fn non_numeric_keys_have_no_ordering_value() {
        let s = story(json!({"id": "seven", "priority": "high"}));
        assert_eq!(s.numeric_id(), None);
        assert_eq!(s.priority(), None);
        assert_eq!(s.id_label(), "seven");
    }

    #[test]
    fn only_literal_true_counts_as_passed() {
        assert!(story(json!({"passes": true})).passes());
        assert!(!story(json!({"passes": "yes"})).passes());
        assert!(!story(json!({})).passes());
    }

    #[test]
    fn mark_passed_keeps_first_completion_time() {
        let mut s = story(json!({"id": 1, "completed_at": "2024-01-01T00:00:00.000Z"}));
        s.mark_passed("2025-06-01T00:00:00.000Z");
        assert!(s.passes());
        assert_eq!(s.completed_at(), Some("2024-01-01T00:00:00.000Z"));
    }

    #[test]
    fn mark_passed_preserves_field_order() {
        let mut s = story(json!({"zeta": 1, "id": 2, "passes": false, "alpha": 3}));
        s.mark_passed("now");
        let keys: Vec<&str> = s.fields().keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["zeta", "id", "passes", "alpha", "completed_at"]);
    }

    #[test]
    fn first_reason_skips_blank_entries() {
        let verdict = Verdict {
            pass: false,
            reasoning: vec!["  ".to_string(), "missing tests".to_string()],
            violations: Vec::new(),
            amendment_suggestion: String::new(),
            source: DiffSource::Staged,
        };
        assert_eq!(verdict.first_reason(), Some("missing tests"));
    }
}
