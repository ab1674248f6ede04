//! Constitutional check: ask an agent whether the current diff breaks the rules.
//!
//! The check never changes the worktree or backlog. It picks the first
//! non-empty diff among staged changes, working-tree changes and the latest
//! commit, and auto-passes when there is nothing to look at.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::core::extract::extract_json;
use crate::core::text::short_text;
use crate::core::types::{DiffSource, Verdict, Violation};
use crate::io::agent::{Agent, InvokeOptions};
use crate::io::constitution::load_constitution;
use crate::io::git::Git;
use crate::io::layout::ProjectPaths;
use crate::io::prompt::render_check_prompt;

const NO_DIFF_REASON: &str = "No diff found to validate.";
const DISPLAY_LIMIT: usize = 260;

/// Produces a verdict for the current state of the worktree.
pub trait Validator {
    fn validate(&self) -> Result<Verdict>;
}

impl<V: Validator + ?Sized> Validator for &V {
    fn validate(&self) -> Result<Verdict> {
        (**self).validate()
    }
}

/// Validator that asks a coding agent to judge the diff against the constitution.
pub struct ConstitutionCheck<'a, A: Agent> {
    agent: &'a A,
    git: Git,
    constitution_dir: PathBuf,
}

impl<'a, A: Agent> ConstitutionCheck<'a, A> {
    pub fn new(agent: &'a A, paths: &ProjectPaths) -> Self {
        Self {
            agent,
            git: Git::new(&paths.root),
            constitution_dir: paths.constitution_dir.clone(),
        }
    }

    pub fn with_git(mut self, git: Git) -> Self {
        self.git = git;
        self
    }
}

impl<A: Agent> Validator for ConstitutionCheck<'_, A> {
    #[instrument(skip_all)]
    fn validate(&self) -> Result<Verdict> {
        if !self.git.is_repo()? {
            bail!("Current directory is not a git repository");
        }
        let constitution = load_constitution(&self.constitution_dir)?;
        let (source, diff) = select_diff(&self.git)?;
        debug!(%source, diff_bytes = diff.len(), "selected diff");

        if diff.trim().is_empty() {
            info!("no diff to validate, passing");
            return Ok(Verdict {
                pass: true,
                reasoning: vec![NO_DIFF_REASON.to_string()],
                violations: Vec::new(),
                amendment_suggestion: String::new(),
                source,
            });
        }

        let prompt = render_check_prompt(source, &constitution, &diff)?;
        let raw = self.agent.invoke(
            &prompt,
            &InvokeOptions {
                workdir: self.git.workdir(),
                auto_approve: false,
            },
        )?;
        let value = extract_json(&raw).context("parse validator verdict")?;
        let verdict = normalize_verdict(&value, source);
        info!(pass = verdict.pass, violations = verdict.violations.len(), "verdict");
        Ok(verdict)
    }
}

/// First non-empty diff: staged, then working tree, then the latest commit.
pub fn select_diff(git: &Git) -> Result<(DiffSource, String)> {
    let staged = git.diff_staged()?;
    if !staged.trim().is_empty() {
        return Ok((DiffSource::Staged, staged));
    }
    let working = git.diff_working()?;
    if !working.trim().is_empty() {
        return Ok((DiffSource::WorkingTree, working));
    }
    let latest = git.latest_commit_patch()?;
    if !latest.trim().is_empty() {
        return Ok((DiffSource::LatestCommit, latest));
    }
    Ok((DiffSource::NoChanges, String::new()))
}

/// Coerce a raw validator reply into a [`Verdict`].
///
/// Anything but a `result` of "PASS" (case-insensitive, trimmed) is a fail.
/// Missing lists become empty and a missing suggestion becomes empty text.
pub fn normalize_verdict(raw: &Value, source: DiffSource) -> Verdict {
    let pass = raw
        .get("result")
        .and_then(Value::as_str)
        .is_some_and(|result| result.trim().eq_ignore_ascii_case("PASS"));

    let reasoning = raw
        .get("reasoning")
        .and_then(Value::as_array)
        .map(|items| items.iter().map(text_of).collect())
        .unwrap_or_default();

    let violations = raw
        .get("violations")
        .and_then(Value::as_array)
        .map(|items| items.iter().map(violation_of).collect())
        .unwrap_or_default();

    let amendment_suggestion = raw
        .get("amendment_suggestion")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    Verdict {
        pass,
        reasoning,
        violations,
        amendment_suggestion,
        source,
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn violation_of(value: &Value) -> Violation {
    match value {
        Value::Object(fields) => Violation {
            reference: fields.get("reference").map(text_of).unwrap_or_default(),
            explanation: fields.get("explanation").map(text_of).unwrap_or_default(),
        },
        other => Violation {
            reference: String::new(),
            explanation: text_of(other),
        },
    }
}

/// Operator-facing summary of a verdict.
pub fn render_verdict(verdict: &Verdict) -> String {
    let status = if verdict.pass { "PASS" } else { "FAIL" };
    let mut lines = vec![format!("{status} ({})", verdict.source)];

    if !verdict.reasoning.is_empty() {
        lines.push("Reasoning:".to_string());
        for (idx, reason) in verdict.reasoning.iter().enumerate() {
            lines.push(format!("  {}. {}", idx + 1, short_text(reason, DISPLAY_LIMIT)));
        }
    }

    if !verdict.violations.is_empty() {
        lines.push("Violations:".to_string());
        for (idx, violation) in verdict.violations.iter().enumerate() {
            let reference = non_empty(&violation.reference, "unknown reference");
            let explanation = non_empty(&violation.explanation, "no explanation provided");
            lines.push(format!(
                "  {}. {reference}: {}",
                idx + 1,
                short_text(explanation, DISPLAY_LIMIT)
            ));
        }
    }

    if !verdict.amendment_suggestion.is_empty() {
        lines.push(format!(
            "Amendment suggestion: {}",
            short_text(&verdict.amendment_suggestion, DISPLAY_LIMIT)
        ));
    }
    lines.join("\n")
}

fn non_empty<'a>(value: &'a str, fallback: &'a str) -> &'a str {
    if value.trim().is_empty() {
        fallback
    } else {
        value
    }
}
