//! The build loop behind `ccagent build`.
//!
//! Each iteration takes the next unfinished story, lets the agent implement
//! it, and either commits the result or rolls the worktree back:
//!
//! ```text
//! SELECT -> IMPLEMENT -> DETECT_CHANGE -> VALIDATE -> ACCEPT | ROLLBACK
//! ```
//!
//! A clean worktree is the checkpoint between iterations. Every recoverable
//! failure ends in `revert()`, so the next iteration starts from the last
//! accepted commit. Progress lines are buffered in memory (a revert would
//! discard unflushed edits to the tracked log) and flushed on acceptance and
//! before returning.

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::check::Validator;
use crate::core::text::{safe_title, short_text};
use crate::core::types::Story;
use crate::io::agent::{Agent, InvokeOptions};
use crate::io::backlog::Backlog;
use crate::io::constitution::load_constitution;
use crate::io::git::Worktree;
use crate::io::layout::ProjectPaths;
use crate::io::progress::{ProgressLog, timestamp};
use crate::io::prompt::{StoryPromptInput, render_story_prompt};

pub const TRACK_PROGRESS_MESSAGE: &str = "ccagent: track progress log";
pub const RECORD_PROGRESS_MESSAGE: &str = "ccagent: record build progress";

#[derive(Debug, Error)]
pub enum BuildError {
    /// The project is not in a state the loop can start from.
    #[error("{0}")]
    PreconditionFailed(String),
    #[error("Build stopped: {remaining} stories incomplete after {max_iterations} iterations.")]
    IterationsExhausted { remaining: usize, max_iterations: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildConfig {
    pub max_iterations: u32,
    /// Persisted progress lines included in each story prompt.
    pub progress_tail_lines: usize,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            progress_tail_lines: 80,
        }
    }
}

/// Operator-facing notifications, one or two per iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IterationEvent {
    Started {
        iteration: u32,
        max_iterations: u32,
        story_id: String,
        title: String,
    },
    AgentFailed {
        iteration: u32,
        error: String,
    },
    NoChanges {
        iteration: u32,
        story_id: String,
    },
    CheckErrored {
        iteration: u32,
        error: String,
    },
    Rejected {
        iteration: u32,
        story_id: String,
        reason: String,
    },
    Committed {
        iteration: u32,
        story_id: String,
        commit: String,
    },
}

/// Summary of a finished build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    pub completed: usize,
    pub total: usize,
    pub iterations_run: u32,
}

/// Commit message for an accepted story.
pub fn commit_message(story: &Story) -> String {
    format!(
        "ccagent: complete story {} {}",
        story.id_label(),
        safe_title(story.title())
    )
}

/// Run the build loop until the backlog is done or iterations run out.
///
/// Fails with [`BuildError::PreconditionFailed`] before any iteration when the
/// project is not a clean repository with a constitution and backlog, and with
/// [`BuildError::IterationsExhausted`] when stories remain at the end. Any
/// other error (including a rejected commit) aborts the run.
#[instrument(skip_all, fields(max_iterations = config.max_iterations))]
pub fn run_build<A, W, V, F>(
    paths: &ProjectPaths,
    agent: &A,
    worktree: &W,
    validator: &V,
    config: &BuildConfig,
    on_event: F,
) -> Result<BuildOutcome>
where
    A: Agent,
    W: Worktree,
    V: Validator,
    F: FnMut(&IterationEvent),
{
    check_preconditions(paths, worktree)?;

    let mut backlog = Backlog::load(&paths.backlog)?;
    if backlog.remaining() == 0 {
        info!("backlog already complete");
        return Ok(BuildOutcome {
            completed: backlog.completed(),
            total: backlog.stories.len(),
            iterations_run: 0,
        });
    }

    let log = paths.progress_log();
    if log.ensure_exists()? && !worktree.is_clean()? {
        debug!("committing new progress log");
        worktree
            .commit_all(TRACK_PROGRESS_MESSAGE)
            .context("commit new progress log")?;
    }

    let constitution = load_constitution(&paths.constitution_dir)?;
    let mut run = BuildRun {
        paths,
        agent,
        worktree,
        validator,
        config,
        constitution,
        log,
        buffer: Vec::new(),
        iterations_run: 0,
    };

    let result = run.iterate(&mut backlog, on_event);
    let flushed = run.flush();
    result?;
    flushed?;

    backlog.save(&paths.backlog)?;
    if !worktree.is_clean()? {
        worktree
            .commit_all(RECORD_PROGRESS_MESSAGE)
            .context("commit build progress")?;
    }

    let remaining = backlog.remaining();
    if remaining > 0 {
        warn!(remaining, "iterations exhausted");
        return Err(BuildError::IterationsExhausted {
            remaining,
            max_iterations: config.max_iterations,
        }
        .into());
    }

    Ok(BuildOutcome {
        completed: backlog.completed(),
        total: backlog.stories.len(),
        iterations_run: run.iterations_run,
    })
}

fn check_preconditions<W: Worktree>(paths: &ProjectPaths, worktree: &W) -> Result<()> {
    let fail = |msg: &str| -> Result<()> {
        Err(BuildError::PreconditionFailed(msg.to_string()).into())
    };

    if !worktree.is_repo()? {
        return fail("Current directory is not a git repository");
    }
    if !worktree.is_clean()? {
        return fail(
            "Build requires a clean git worktree (including untracked files). \
             Commit, stash, or remove local changes first.",
        );
    }
    if !paths.constitution_dir.is_dir() {
        return fail("Missing constitution/ directory. Run `ccagent init` first.");
    }
    if !paths.backlog.is_file() {
        return fail("Missing prd.json. Run `ccagent init` first.");
    }
    Ok(())
}

/// Mutable state of one `run_build` invocation.
struct BuildRun<'a, A, W, V> {
    paths: &'a ProjectPaths,
    agent: &'a A,
    worktree: &'a W,
    validator: &'a V,
    config: &'a BuildConfig,
    constitution: String,
    log: ProgressLog,
    buffer: Vec<String>,
    iterations_run: u32,
}

impl<A: Agent, W: Worktree, V: Validator> BuildRun<'_, A, W, V> {
    fn iterate<F: FnMut(&IterationEvent)>(
        &mut self,
        backlog: &mut Backlog,
        mut on_event: F,
    ) -> Result<()> {
        let max_iterations = self.config.max_iterations;
        for iteration in 1..=max_iterations {
            let Some(index) = backlog.next_index() else {
                break;
            };
            self.iterations_run = iteration;
            let story = backlog.stories[index].clone();
            let story_id = story.id_label();
            info!(iteration, story = %story_id, "starting iteration");

            self.record(
                iteration,
                format!("start story {story_id} ({})", story.title()),
            );
            on_event(&IterationEvent::Started {
                iteration,
                max_iterations,
                story_id: story_id.clone(),
                title: story.title().to_string(),
            });

            // IMPLEMENT
            let prompt = self.story_prompt(&story, backlog)?;
            let invoke = InvokeOptions {
                workdir: &self.paths.root,
                auto_approve: true,
            };
            if let Err(err) = self.agent.invoke(&prompt, &invoke) {
                let error = format!("{err:#}");
                warn!(iteration, %error, "agent execution failed");
                self.record(
                    iteration,
                    format!("agent execution failed ({})", short_text(&error, 300)),
                );
                self.worktree.revert()?;
                on_event(&IterationEvent::AgentFailed { iteration, error });
                continue;
            }

            // DETECT_CHANGE
            if !self.worktree.has_changes()? {
                self.record(
                    iteration,
                    format!("no code changes produced for story {story_id}"),
                );
                on_event(&IterationEvent::NoChanges {
                    iteration,
                    story_id,
                });
                continue;
            }

            // VALIDATE
            self.worktree.stage_all()?;
            let verdict = match self.validator.validate() {
                Ok(verdict) => verdict,
                Err(err) => {
                    let error = format!("{err:#}");
                    warn!(iteration, %error, "check errored");
                    self.record(
                        iteration,
                        format!("check errored ({})", short_text(&error, 300)),
                    );
                    self.worktree.revert()?;
                    on_event(&IterationEvent::CheckErrored { iteration, error });
                    continue;
                }
            };
            if !verdict.pass {
                let reason = verdict
                    .first_reason()
                    .unwrap_or("no reason provided")
                    .to_string();
                info!(iteration, story = %story_id, %reason, "story rejected");
                self.record(
                    iteration,
                    format!("FAIL story {story_id} - {}", short_text(&reason, 280)),
                );
                self.worktree.revert()?;
                on_event(&IterationEvent::Rejected {
                    iteration,
                    story_id,
                    reason,
                });
                continue;
            }

            // ACCEPT
            backlog.stories[index].mark_passed(&timestamp());
            self.record(
                iteration,
                format!("PASS story {story_id} ({})", story.title()),
            );
            self.flush()?;
            backlog.save(&self.paths.backlog)?;
            self.worktree
                .commit_all(&commit_message(&story))
                .with_context(|| format!("Failed to commit story {story_id}"))?;
            let commit = self.worktree.short_head()?;
            info!(iteration, story = %story_id, %commit, "story committed");
            on_event(&IterationEvent::Committed {
                iteration,
                story_id,
                commit,
            });
        }
        Ok(())
    }

    fn story_prompt(&self, story: &Story, backlog: &Backlog) -> Result<String> {
        let persisted = self.log.tail(self.config.progress_tail_lines)?;
        let buffered = self.buffer.join("\n");
        let progress = [persisted, buffered]
            .into_iter()
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        let snapshot = backlog.snapshot()?;
        render_story_prompt(&StoryPromptInput {
            story,
            constitution: &self.constitution,
            backlog: &snapshot,
            progress: &progress,
        })
    }

    fn record(&mut self, iteration: u32, event: String) {
        self.buffer
            .push(format!("[{}] iteration {iteration}: {event}", timestamp()));
    }

    fn flush(&mut self) -> Result<()> {
        if self.buffer.is_empty() {
            return Ok(());
        }
        self.log.append_all(&self.buffer)?;
        self.buffer.clear();
        Ok(())
    }
}
