//! Backlog (`prd.json`) load/save with schema validation.
//!
//! A backlog is stored either as a bare array of stories or as an object with
//! a `stories` array plus arbitrary sibling fields. The shape is captured once
//! at load time and reproduced on save; siblings round-trip untouched.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use jsonschema::validator_for;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::selector;
use crate::core::types::Story;
use crate::io::files::write_atomic;

const BACKLOG_SCHEMA: &str = include_str!("../../schemas/backlog.schema.json");

#[derive(Debug, Error)]
pub enum BacklogError {
    #[error(
        "Invalid prd.json format: expected an array or object with a stories array ({detail})"
    )]
    InvalidFormat { detail: String },
}

/// Original top-level shape of the backlog document.
#[derive(Debug, Clone, PartialEq)]
pub enum BacklogShape {
    /// `[ {story}, ... ]`
    Bare,
    /// `{ ..., "stories": [...], ... }`; holds every field as loaded.
    Wrapped(Map<String, Value>),
}

/// In-memory backlog plus the shape it was loaded from.
#[derive(Debug, Clone, PartialEq)]
pub struct Backlog {
    shape: BacklogShape,
    pub stories: Vec<Story>,
}

impl Backlog {
    /// Validate and split a parsed document into shape + stories.
    pub fn from_value(value: Value) -> Result<Self> {
        validate_shape(&value)?;
        match value {
            Value::Array(items) => Ok(Self {
                shape: BacklogShape::Bare,
                stories: stories_from(items)?,
            }),
            Value::Object(mut envelope) => {
                let items = match envelope.get_mut("stories").map(Value::take) {
                    Some(Value::Array(items)) => items,
                    _ => {
                        return Err(BacklogError::InvalidFormat {
                            detail: "stories is not an array".to_string(),
                        }
                        .into());
                    }
                };
                Ok(Self {
                    shape: BacklogShape::Wrapped(envelope),
                    stories: stories_from(items)?,
                })
            }
            _ => Err(BacklogError::InvalidFormat {
                detail: "top-level value is neither array nor object".to_string(),
            }
            .into()),
        }
    }

    /// Document in its original shape with the current stories.
    pub fn to_value(&self) -> Result<Value> {
        let stories = serde_json::to_value(&self.stories).context("serialize stories")?;
        Ok(match &self.shape {
            BacklogShape::Bare => stories,
            BacklogShape::Wrapped(envelope) => {
                let mut doc = envelope.clone();
                doc.insert("stories".to_string(), stories);
                Value::Object(doc)
            }
        })
    }

    /// Pretty JSON as written to disk (two-space indent, trailing newline).
    pub fn snapshot(&self) -> Result<String> {
        let mut buf =
            serde_json::to_string_pretty(&self.to_value()?).context("serialize backlog")?;
        buf.push('\n');
        Ok(buf)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("read backlog {}", path.display()))?;
        let value: Value = serde_json::from_str(&contents)
            .with_context(|| format!("parse backlog {}", path.display()))?;
        let backlog = Self::from_value(value)
            .with_context(|| format!("load backlog {}", path.display()))?;
        warn_duplicate_ids(&backlog.stories);
        debug!(
            stories = backlog.stories.len(),
            remaining = backlog.remaining(),
            "loaded backlog"
        );
        Ok(backlog)
    }

    /// Write the backlog back in its original shape.
    ///
    /// Returns `false` without touching the file when its content is already
    /// identical.
    pub fn save(&self, path: &Path) -> Result<bool> {
        let buf = self.snapshot()?;
        if fs::read_to_string(path).is_ok_and(|existing| existing == buf) {
            debug!(path = %path.display(), "backlog unchanged, skipping write");
            return Ok(false);
        }
        write_atomic(path, &buf).with_context(|| format!("save backlog {}", path.display()))?;
        Ok(true)
    }

    pub fn next_index(&self) -> Option<usize> {
        selector::select_next(&self.stories)
    }

    pub fn remaining(&self) -> usize {
        selector::remaining(&self.stories)
    }

    pub fn completed(&self) -> usize {
        self.stories.len() - self.remaining()
    }
}

fn stories_from(items: Vec<Value>) -> Result<Vec<Story>> {
    items
        .into_iter()
        .map(|item| match item {
            Value::Object(fields) => Ok(Story::from_fields(fields)),
            other => Err(anyhow!(BacklogError::InvalidFormat {
                detail: format!("story is not an object: {other}"),
            })),
        })
        .collect()
}

fn validate_shape(value: &Value) -> Result<()> {
    let schema: Value = serde_json::from_str(BACKLOG_SCHEMA).context("parse backlog schema")?;
    let compiled =
        validator_for(&schema).map_err(|err| anyhow!("invalid backlog schema: {}", err))?;
    if compiled.is_valid(value) {
        return Ok(());
    }
    let messages = compiled
        .iter_errors(value)
        .map(|err| {
            let path = err.instance_path().as_str();
            let at = if path.is_empty() { "(root)" } else { path };
            format!("{at}: {}", err.masked())
        })
        .collect::<Vec<_>>();
    Err(BacklogError::InvalidFormat {
        detail: messages.join("; "),
    }
    .into())
}

fn warn_duplicate_ids(stories: &[Story]) {
    for (index, story) in stories.iter().enumerate() {
        if story.id().is_some()
            && stories[..index].iter().any(|earlier| earlier.id() == story.id())
        {
            warn!(id = %story.id_label(), "duplicate story id in backlog");
        }
    }
}
