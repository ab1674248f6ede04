//! Git adapter for ccagent commands.
//!
//! Git is the transaction boundary of the build loop: a clean worktree is the
//! checkpoint, `revert` rolls an attempt back, `commit_all` makes it durable.
//! The loop only sees the narrow [`Worktree`] trait; [`Git`] implements it with
//! `git` subprocess calls.

use std::path::{Path, PathBuf};

use anyhow::{Result, anyhow};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::io::process::{CommandOutput, DEFAULT_OUTPUT_LIMIT_BYTES, RunOptions, run_command};

#[derive(Debug, Error)]
pub enum GitError {
    #[error("git commit failed: {detail}")]
    CommitFailed { detail: String },
}

/// Version-control operations the build loop depends on.
pub trait Worktree {
    fn is_repo(&self) -> Result<bool>;
    /// True when anything is staged, modified, or untracked.
    fn has_changes(&self) -> Result<bool>;
    fn is_clean(&self) -> Result<bool> {
        Ok(!self.has_changes()?)
    }
    fn stage_all(&self) -> Result<()>;
    /// Discard every uncommitted change, untracked files included.
    fn revert(&self) -> Result<()>;
    /// Stage everything and commit; fails with [`GitError::CommitFailed`].
    fn commit_all(&self, message: &str) -> Result<()>;
    fn short_head(&self) -> Result<String>;
}

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
    output_limit_bytes: usize,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
        }
    }

    pub fn with_output_limit(mut self, bytes: usize) -> Self {
        self.output_limit_bytes = bytes;
        self
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// True iff `git rev-parse --is-inside-work-tree` succeeds and says so.
    pub fn is_repo(&self) -> Result<bool> {
        let out = self.run(&["rev-parse", "--is-inside-work-tree"])?;
        Ok(out.success() && out.stdout.trim() == "true")
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "--untracked-files=all"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    pub fn has_changes(&self) -> Result<bool> {
        Ok(!self.status_porcelain()?.is_empty())
    }

    /// Hard reset to HEAD, then remove untracked files and directories.
    #[instrument(skip_all)]
    pub fn revert(&self) -> Result<()> {
        info!("discarding uncommitted changes");
        self.run_checked(&["reset", "--hard", "HEAD"])?;
        self.run_checked(&["clean", "-fd"])?;
        Ok(())
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// Commit whatever is staged. A rejected commit is [`GitError::CommitFailed`].
    #[instrument(skip_all)]
    pub fn commit(&self, message: &str) -> Result<()> {
        debug!("committing staged changes");
        let out = self.run(&["commit", "-m", message])?;
        if !out.success() {
            let detail = out.diagnostic().to_string();
            warn!(exit_code = out.status, %detail, "commit rejected");
            return Err(GitError::CommitFailed { detail }.into());
        }
        Ok(())
    }

    pub fn commit_all(&self, message: &str) -> Result<()> {
        self.add_all()?;
        self.commit(message)
    }

    /// Abbreviated hash of HEAD.
    pub fn short_head(&self) -> Result<String> {
        Ok(self.run_capture(&["rev-parse", "--short", "HEAD"])?.trim().to_string())
    }

    pub fn diff_staged(&self) -> Result<String> {
        Ok(self.run(&["diff", "--cached"])?.stdout)
    }

    pub fn diff_working(&self) -> Result<String> {
        Ok(self.run(&["diff"])?.stdout)
    }

    pub fn latest_commit_patch(&self) -> Result<String> {
        Ok(self.run(&["show", "--format=", "--patch", "-1"])?.stdout)
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        Ok(self.run_checked(args)?.stdout)
    }

    fn run_checked(&self, args: &[&str]) -> Result<CommandOutput> {
        run_command("git", args, &self.options())
    }

    fn run(&self, args: &[&str]) -> Result<CommandOutput> {
        run_command("git", args, &self.options().allow_failure())
    }

    fn options(&self) -> RunOptions<'_> {
        RunOptions::in_dir(&self.workdir).output_limit(self.output_limit_bytes)
    }
}

impl Worktree for Git {
    fn is_repo(&self) -> Result<bool> {
        Git::is_repo(self)
    }

    fn has_changes(&self) -> Result<bool> {
        Git::has_changes(self)
    }

    fn stage_all(&self) -> Result<()> {
        self.add_all()
    }

    fn revert(&self) -> Result<()> {
        Git::revert(self)
    }

    fn commit_all(&self, message: &str) -> Result<()> {
        Git::commit_all(self, message)
    }

    fn short_head(&self) -> Result<String> {
        Git::short_head(self)
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 || !line.is_char_boundary(3) {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once(" -> ") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}
