//! Init draft model: the governance package an agent proposes from a project
//! description, normalized into a predictable shape before review.

use anyhow::{Result, bail};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::core::types::Story;

/// Rule files every draft must supply.
pub const REQUIRED_FILES: [&str; 4] = [
    "constitution/CONSTITUTION.md",
    "constitution/invariants.md",
    "constitution/architecture.md",
    "constitution/conventions.md",
];

/// Human-reviewable summary of the two top rule levels.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Review {
    pub l1_principles: Vec<Value>,
    pub l2_objectives: Vec<Value>,
}

/// A normalized init draft.
///
/// `files` maps project-relative paths to file contents. `prd` is the backlog
/// document to write; its `stories` array has already been normalized.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Draft {
    pub review: Review,
    pub files: Map<String, Value>,
    pub prd: Map<String, Value>,
}

impl Draft {
    pub fn stories(&self) -> Vec<Story> {
        match self.prd.get("stories") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(Value::as_object)
                .cloned()
                .map(Story::from_fields)
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn story_count(&self) -> usize {
        self.prd
            .get("stories")
            .and_then(Value::as_array)
            .map_or(0, Vec::len)
    }

    /// Files with string contents, in draft order.
    pub fn file_entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.files
            .iter()
            .filter_map(|(path, content)| content.as_str().map(|text| (path.as_str(), text)))
    }

    pub fn principle_lines(&self) -> Vec<String> {
        display_lines(&self.review.l1_principles)
    }

    pub fn objective_lines(&self) -> Vec<String> {
        display_lines(&self.review.l2_objectives)
    }
}

fn display_lines(items: &[Value]) -> Vec<String> {
    items
        .iter()
        .map(|item| match item {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        })
        .collect()
}

/// Coerce arbitrary agent JSON into a [`Draft`].
///
/// Missing or mistyped sections become empty; every story is rebuilt with the
/// seven backlog fields, filling gaps from its position in the list.
pub fn normalize_draft(raw: &Value) -> Draft {
    let review = object_field(raw, "review");
    let files = object_field(raw, "files");
    let mut prd = object_field(raw, "prd");

    let stories = match prd.get("stories") {
        Some(Value::Array(items)) => normalize_stories(items),
        _ => Vec::new(),
    };
    prd.insert("stories".to_string(), Value::Array(stories));

    Draft {
        review: Review {
            l1_principles: array_field(&review, "l1_principles"),
            l2_objectives: array_field(&review, "l2_objectives"),
        },
        files,
        prd,
    }
}

fn normalize_stories(items: &[Value]) -> Vec<Value> {
    items
        .iter()
        .enumerate()
        .map(|(index, raw)| {
            let position = index as u64 + 1;
            let field = |name: &str| raw.get(name).filter(|value| !value.is_null());

            let mut story = Map::new();
            story.insert(
                "id".to_string(),
                field("id")
                    .filter(|value| value.is_number() || value.is_string())
                    .cloned()
                    .unwrap_or_else(|| Value::from(position)),
            );
            story.insert(
                "title".to_string(),
                Value::String(
                    field("title")
                        .and_then(text_of)
                        .unwrap_or_else(|| format!("Story {position}")),
                ),
            );
            story.insert(
                "description".to_string(),
                Value::String(field("description").and_then(text_of).unwrap_or_default()),
            );
            story.insert(
                "acceptance".to_string(),
                Value::Array(array_of(field("acceptance"))),
            );
            story.insert(
                "constitutional_refs".to_string(),
                Value::Array(array_of(field("constitutional_refs"))),
            );
            story.insert(
                "priority".to_string(),
                field("priority")
                    .filter(|value| value.as_f64().is_some_and(f64::is_finite))
                    .cloned()
                    .unwrap_or_else(|| Value::from(position)),
            );
            story.insert(
                "passes".to_string(),
                Value::Bool(field("passes").is_some_and(truthy)),
            );
            Value::Object(story)
        })
        .collect()
}

/// Reject drafts that cannot be written as a working project.
pub fn validate_draft(draft: &Draft) -> Result<()> {
    if draft.review.l1_principles.is_empty() {
        bail!("Init draft missing review.l1_principles");
    }
    if draft.review.l2_objectives.is_empty() {
        bail!("Init draft missing review.l2_objectives");
    }
    for path in REQUIRED_FILES {
        let present = draft
            .files
            .get(path)
            .and_then(Value::as_str)
            .is_some_and(|text| !text.is_empty());
        if !present {
            bail!("Init draft missing file content: {path}");
        }
    }
    if draft.story_count() == 0 {
        bail!("Init draft missing prd stories");
    }

    let stories = draft.stories();
    for (index, story) in stories.iter().enumerate() {
        if stories[..index].iter().any(|earlier| earlier.id() == story.id()) {
            bail!("Init draft has duplicate story id: {}", story.id_label());
        }
    }
    Ok(())
}

fn object_field(value: &Value, name: &str) -> Map<String, Value> {
    value
        .get(name)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

fn array_field(map: &Map<String, Value>, name: &str) -> Vec<Value> {
    array_of(map.get(name))
}

fn array_of(value: Option<&Value>) -> Vec<Value> {
    value.and_then(Value::as_array).cloned().unwrap_or_default()
}

/// Text of a truthy value; non-strings are rendered as JSON.
fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        other if truthy(other) && !other.is_string() => Some(other.to_string()),
        _ => None,
    }
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(flag) => *flag,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(text) => !text.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn complete_files() -> Value {
        json!({
            "constitution/CONSTITUTION.md": "# Constitution",
            "constitution/invariants.md": "# Invariants",
            "constitution/architecture.md": "# Architecture",
            "constitution/conventions.md": "# Conventions",
        })
    }

    #[test]
    fn fills_story_defaults_from_position() {
        let draft = normalize_draft(&json!({
            "prd": {"project": "demo", "stories": [
                {"title": "First", "priority": "high", "passes": "yes", "extra": 1},
                {"id": 10, "title": "", "acceptance": "not a list"},
            ]}
        }));

        let stories = draft.prd["stories"].as_array().expect("stories");
        assert_eq!(
            stories[0],
            json!({
                "id": 1,
                "title": "First",
                "description": "",
                "acceptance": [],
                "constitutional_refs": [],
                "priority": 1,
                "passes": true,
            })
        );
        assert_eq!(stories[1]["id"], json!(10));
        assert_eq!(stories[1]["title"], json!("Story 2"));
        assert_eq!(stories[1]["priority"], json!(2));
        assert_eq!(stories[1]["passes"], json!(false));
        assert_eq!(draft.prd["project"], json!("demo"));
    }

    #[test]
    fn mistyped_story_fields_become_backlog_types() {
        let draft = normalize_draft(&json!({
            "prd": {"stories": [
                {"id": true, "title": 42, "description": ["x"]},
                {"id": {"n": 2}, "title": false, "description": 0},
            ]}
        }));

        let stories = draft.prd["stories"].as_array().expect("stories");
        assert_eq!(stories[0]["id"], json!(1));
        assert_eq!(stories[0]["title"], json!("42"));
        assert_eq!(stories[0]["description"], json!("[\"x\"]"));
        assert_eq!(stories[1]["id"], json!(2));
        assert_eq!(stories[1]["title"], json!("Story 2"));
        assert_eq!(stories[1]["description"], json!(""));
    }

    #[test]
    fn tolerates_non_object_input() {
        let draft = normalize_draft(&json!(["not", "a", "draft"]));
        assert!(draft.review.l1_principles.is_empty());
        assert!(draft.files.is_empty());
        assert_eq!(draft.story_count(), 0);
    }

    #[test]
    fn validation_messages_follow_section_order() {
        let mut raw = json!({});
        let err = validate_draft(&normalize_draft(&raw)).expect_err("empty draft");
        assert_eq!(err.to_string(), "Init draft missing review.l1_principles");

        raw["review"] = json!({"l1_principles": ["Simple"], "l2_objectives": ["Ship"]});
        raw["files"] = json!({"constitution/CONSTITUTION.md": "# C"});
        let err = validate_draft(&normalize_draft(&raw)).expect_err("missing files");
        assert_eq!(
            err.to_string(),
            "Init draft missing file content: constitution/invariants.md"
        );

        raw["files"] = complete_files();
        let err = validate_draft(&normalize_draft(&raw)).expect_err("no stories");
        assert_eq!(err.to_string(), "Init draft missing prd stories");

        raw["prd"] = json!({"stories": [{"title": "Only"}]});
        validate_draft(&normalize_draft(&raw)).expect("valid draft");
    }

    #[test]
    fn rejects_duplicate_story_ids() {
        let raw = json!({
            "review": {"l1_principles": ["a"], "l2_objectives": ["b"]},
            "files": complete_files(),
            "prd": {"stories": [{"id": 1}, {"id": 1}]},
        });
        let err = validate_draft(&normalize_draft(&raw)).expect_err("duplicate");
        assert!(err.to_string().contains("duplicate story id: 1"));
    }

    #[test]
    fn review_lines_render_non_strings() {
        let draft = normalize_draft(&json!({
            "review": {"l1_principles": ["Keep it small", 42], "l2_objectives": []}
        }));
        assert_eq!(draft.principle_lines(), vec!["Keep it small", "42"]);
    }
}
