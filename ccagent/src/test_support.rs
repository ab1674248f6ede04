//! Test-only helpers: throwaway git repositories and scripted collaborators.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use serde_json::Value;

use crate::check::Validator;
use crate::core::types::{DiffSource, Verdict};
use crate::io::agent::{Agent, AgentError, InvokeOptions};
use crate::io::files::write_text;
use crate::io::git::{Git, GitError, Worktree};
use crate::io::layout::ProjectPaths;
use crate::io::process::{RunOptions, run_command};

/// Git repository in a temp dir with an identity and one empty root commit.
pub struct TestRepo {
    dir: tempfile::TempDir,
}

impl TestRepo {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir()?;
        let repo = Self { dir };
        repo.git_cmd(&["init", "-q"])?;
        repo.git_cmd(&["config", "user.name", "ccagent tests"])?;
        repo.git_cmd(&["config", "user.email", "tests@example.com"])?;
        repo.git_cmd(&["config", "commit.gpgsign", "false"])?;
        repo.git_cmd(&["commit", "-q", "--allow-empty", "-m", "root"])?;
        Ok(repo)
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn git(&self) -> Git {
        Git::new(self.path())
    }

    pub fn write(&self, rel: &str, contents: &str) -> Result<()> {
        write_text(&self.path().join(rel), contents)
    }

    pub fn read(&self, rel: &str) -> Result<String> {
        Ok(fs::read_to_string(self.path().join(rel))?)
    }

    pub fn commit_all(&self, message: &str) -> Result<()> {
        self.git().commit_all(message)
    }

    pub fn last_commit_message(&self) -> Result<String> {
        Ok(self.git_cmd(&["log", "-1", "--format=%s"])?.trim().to_string())
    }

    pub fn commit_count(&self) -> Result<usize> {
        Ok(self.git_cmd(&["rev-list", "--count", "HEAD"])?.trim().parse()?)
    }

    /// Commit subjects, newest first.
    pub fn commit_subjects(&self) -> Result<Vec<String>> {
        Ok(self
            .git_cmd(&["log", "--format=%s"])?
            .lines()
            .map(str::to_string)
            .collect())
    }

    fn git_cmd(&self, args: &[&str]) -> Result<String> {
        Ok(run_command("git", args, &RunOptions::in_dir(self.path()))?.stdout)
    }
}

/// Write a one-file constitution and a backlog under `paths.root`.
pub fn seed_project(paths: &ProjectPaths, backlog: &Value) -> Result<()> {
    write_text(
        &paths.constitution_dir.join("CONSTITUTION.md"),
        "# Constitution\n\nKeep functions small.\n",
    )?;
    let mut text = serde_json::to_string_pretty(backlog)?;
    text.push('\n');
    write_text(&paths.backlog, &text)
}

pub fn passing_verdict() -> Verdict {
    Verdict {
        pass: true,
        reasoning: vec!["consistent with the constitution".to_string()],
        violations: Vec::new(),
        amendment_suggestion: String::new(),
        source: DiffSource::Staged,
    }
}

pub fn failing_verdict(reason: &str) -> Verdict {
    Verdict {
        pass: false,
        reasoning: vec![reason.to_string()],
        ..passing_verdict()
    }
}

/// One canned agent turn: optional file edits plus a reply or a failure.
#[derive(Debug, Clone)]
pub struct ScriptedTurn {
    writes: Vec<(String, String)>,
    reply: std::result::Result<String, String>,
}

impl ScriptedTurn {
    pub fn reply(text: &str) -> Self {
        Self {
            writes: Vec::new(),
            reply: Ok(text.to_string()),
        }
    }

    pub fn fail(detail: &str) -> Self {
        Self {
            writes: Vec::new(),
            reply: Err(detail.to_string()),
        }
    }

    /// Write `contents` to `rel` (under the invocation workdir) before replying.
    pub fn writing(mut self, rel: &str, contents: &str) -> Self {
        self.writes.push((rel.to_string(), contents.to_string()));
        self
    }
}

/// Agent that plays back [`ScriptedTurn`]s and records every prompt.
#[derive(Debug, Default)]
pub struct ScriptedAgent {
    turns: RefCell<VecDeque<ScriptedTurn>>,
    prompts: RefCell<Vec<String>>,
}

impl ScriptedAgent {
    pub fn new(turns: Vec<ScriptedTurn>) -> Self {
        Self {
            turns: RefCell::new(turns.into()),
            prompts: RefCell::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }
}

impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        "scripted"
    }

    fn invoke(&self, prompt: &str, opts: &InvokeOptions<'_>) -> Result<String> {
        self.prompts.borrow_mut().push(prompt.to_string());
        let turn = self
            .turns
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted agent has no turns left"))?;
        for (rel, contents) in &turn.writes {
            write_text(&opts.workdir.join(rel), contents)?;
        }
        turn.reply.map_err(|detail| {
            AgentError::Failed {
                program: "scripted".to_string(),
                status: 1,
                detail,
            }
            .into()
        })
    }
}

/// Validator that returns queued verdicts; `Err` entries become check errors.
#[derive(Debug, Default)]
pub struct ScriptedValidator {
    verdicts: RefCell<VecDeque<std::result::Result<Verdict, String>>>,
    calls: Cell<usize>,
}

impl ScriptedValidator {
    pub fn new(verdicts: Vec<std::result::Result<Verdict, String>>) -> Self {
        Self {
            verdicts: RefCell::new(verdicts.into()),
            calls: Cell::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.get()
    }
}

impl Validator for ScriptedValidator {
    fn validate(&self) -> Result<Verdict> {
        self.calls.set(self.calls.get() + 1);
        match self.verdicts.borrow_mut().pop_front() {
            Some(Ok(verdict)) => Ok(verdict),
            Some(Err(msg)) => Err(anyhow!(msg)),
            None => Err(anyhow!("scripted validator has no verdicts left")),
        }
    }
}

/// In-memory [`Worktree`] that records what the build loop asked of it.
#[derive(Debug)]
pub struct FakeWorktree {
    repo: bool,
    dirty: Cell<bool>,
    changes: RefCell<VecDeque<bool>>,
    fail_commits_matching: Option<String>,
    reverts: Cell<usize>,
    stages: Cell<usize>,
    commits: RefCell<Vec<String>>,
}

impl Default for FakeWorktree {
    fn default() -> Self {
        Self {
            repo: true,
            dirty: Cell::new(false),
            changes: RefCell::new(VecDeque::new()),
            fail_commits_matching: None,
            reverts: Cell::new(0),
            stages: Cell::new(0),
            commits: RefCell::new(Vec::new()),
        }
    }
}

impl FakeWorktree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn not_a_repo(mut self) -> Self {
        self.repo = false;
        self
    }

    /// Start with uncommitted changes.
    pub fn dirty(self) -> Self {
        self.dirty.set(true);
        self
    }

    /// Answers for successive post-agent change checks; exhausted means "no changes".
    pub fn with_changes(self, answers: impl IntoIterator<Item = bool>) -> Self {
        self.changes.borrow_mut().extend(answers);
        self
    }

    /// Reject commits whose message contains `needle`.
    pub fn fail_commits_matching(mut self, needle: &str) -> Self {
        self.fail_commits_matching = Some(needle.to_string());
        self
    }

    pub fn reverts(&self) -> usize {
        self.reverts.get()
    }

    pub fn stages(&self) -> usize {
        self.stages.get()
    }

    pub fn commits(&self) -> Vec<String> {
        self.commits.borrow().clone()
    }
}

impl Worktree for FakeWorktree {
    fn is_repo(&self) -> Result<bool> {
        Ok(self.repo)
    }

    fn has_changes(&self) -> Result<bool> {
        Ok(self.changes.borrow_mut().pop_front().unwrap_or(false))
    }

    fn is_clean(&self) -> Result<bool> {
        Ok(!self.dirty.get())
    }

    fn stage_all(&self) -> Result<()> {
        self.stages.set(self.stages.get() + 1);
        Ok(())
    }

    fn revert(&self) -> Result<()> {
        self.reverts.set(self.reverts.get() + 1);
        self.dirty.set(false);
        Ok(())
    }

    fn commit_all(&self, message: &str) -> Result<()> {
        if let Some(needle) = &self.fail_commits_matching
            && message.contains(needle.as_str())
        {
            return Err(GitError::CommitFailed {
                detail: "pre-commit hook rejected the commit".to_string(),
            }
            .into());
        }
        self.commits.borrow_mut().push(message.to_string());
        self.dirty.set(false);
        Ok(())
    }

    fn short_head(&self) -> Result<String> {
        Ok(format!("fake{:03}", self.commits.borrow().len()))
    }
}

/// Write an executable `/bin/sh` script standing in for an agent binary.
#[cfg(unix)]
pub fn write_script(dir: &Path, name: &str, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}")).expect("write script");
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod script");
    path
}
