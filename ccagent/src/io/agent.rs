//! Agent abstraction for coding-agent invocation.
//!
//! The [`Agent`] trait decouples the workflows from the actual agent backend.
//! [`CliAgent`] shells out to `codex` or `claude`; tests use scripted agents
//! that return predetermined replies without spawning processes.

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::io::process::{DEFAULT_OUTPUT_LIMIT_BYTES, RunOptions, run_command};

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Agent prompt cannot be empty")]
    EmptyPrompt,
    #[error("{program} failed ({status}): {detail}")]
    Failed {
        program: String,
        status: i32,
        detail: String,
    },
    #[error("{program} returned no output")]
    EmptyOutput { program: String },
}

/// Supported agent backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
#[value(rename_all = "lowercase")]
pub enum AgentKind {
    #[default]
    Codex,
    Claude,
}

impl AgentKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AgentKind::Codex => "codex",
            AgentKind::Claude => "claude",
        }
    }

    /// Backend arguments; the prompt itself is written to stdin.
    pub fn args(self, auto_approve: bool) -> Vec<&'static str> {
        match self {
            AgentKind::Codex => {
                let mut args = vec!["exec"];
                if auto_approve {
                    args.push("--full-auto");
                }
                args.push("-");
                args
            }
            AgentKind::Claude => {
                let mut args = vec!["-p"];
                if auto_approve {
                    args.push("--dangerously-skip-permissions");
                }
                args
            }
        }
    }
}

impl fmt::Display for AgentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-call invocation settings.
#[derive(Debug, Clone, Copy)]
pub struct InvokeOptions<'a> {
    /// Directory the agent runs in (and may modify).
    pub workdir: &'a Path,
    /// Let the agent edit files and run commands without asking.
    pub auto_approve: bool,
}

/// An opaque coding agent: prompt in, text out.
pub trait Agent {
    /// Short backend name for operator messages.
    fn name(&self) -> &str;

    /// Run the agent once. Fails with [`AgentError`] on a blank prompt, a
    /// nonzero exit, or empty output.
    fn invoke(&self, prompt: &str, opts: &InvokeOptions<'_>) -> Result<String>;
}

impl<A: Agent + ?Sized> Agent for &A {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn invoke(&self, prompt: &str, opts: &InvokeOptions<'_>) -> Result<String> {
        (**self).invoke(prompt, opts)
    }
}

/// Agent backed by a command-line tool.
#[derive(Debug, Clone)]
pub struct CliAgent {
    kind: AgentKind,
    program: String,
    output_limit_bytes: usize,
}

impl CliAgent {
    pub fn new(kind: AgentKind, program: impl Into<String>) -> Self {
        Self {
            kind,
            program: program.into(),
            output_limit_bytes: DEFAULT_OUTPUT_LIMIT_BYTES,
        }
    }

    pub fn with_output_limit(mut self, bytes: usize) -> Self {
        self.output_limit_bytes = bytes;
        self
    }
}

impl Agent for CliAgent {
    fn name(&self) -> &str {
        self.kind.as_str()
    }

    #[instrument(skip_all, fields(agent = %self.kind, prompt_bytes = prompt.len()))]
    fn invoke(&self, prompt: &str, opts: &InvokeOptions<'_>) -> Result<String> {
        if prompt.trim().is_empty() {
            return Err(AgentError::EmptyPrompt.into());
        }

        info!(workdir = %opts.workdir.display(), "invoking agent");
        let args = self.kind.args(opts.auto_approve);
        let run = RunOptions::in_dir(opts.workdir)
            .stdin(prompt.as_bytes())
            .output_limit(self.output_limit_bytes)
            .allow_failure();
        let output = run_command(&self.program, &args, &run)
            .with_context(|| format!("run {}", self.program))?;

        if !output.success() {
            let detail = match output.diagnostic() {
                "" => "Unknown agent failure".to_string(),
                text => text.to_string(),
            };
            warn!(exit_code = output.status, "agent failed");
            return Err(AgentError::Failed {
                program: self.program.clone(),
                status: output.status,
                detail,
            }
            .into());
        }

        let text = match output.stdout.trim() {
            "" => output.stderr.trim(),
            text => text,
        };
        if text.is_empty() {
            return Err(AgentError::EmptyOutput {
                program: self.program.clone(),
            }
            .into());
        }
        debug!(output_bytes = text.len(), "agent completed");
        Ok(text.to_string())
    }
}
