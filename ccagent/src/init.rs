//! The `ccagent init` workflow: draft a charter with the agent, let the
//! operator steer it, then lock it to disk.

use std::io::{BufRead, Write};

use anyhow::{Context, Result, bail};
use tracing::{debug, info, instrument};

use crate::core::draft::{Draft, normalize_draft, validate_draft};
use crate::core::extract::extract_json;
use crate::core::text::{is_approval, short_text};
use crate::io::agent::{Agent, InvokeOptions};
use crate::io::backlog::Backlog;
use crate::io::layout::{ProjectPaths, ensure_init_target, write_draft};
use crate::io::prompt::render_init_prompt;

const DEFAULT_FEEDBACK: &str = "Refine clarity and strengthen invariants.";
const REVIEW_LINE_LIMIT: usize = 200;

/// Operator response to a draft.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SteeringReply {
    Lock,
    Revise(String),
}

/// Decides whether a draft is locked or revised.
pub trait Steering {
    /// Called before each agent call.
    fn on_drafting(&mut self, _round: usize, _agent: &str) {}

    fn respond(&mut self, draft: &Draft, round: usize) -> Result<SteeringReply>;
}

/// Interprets free-form operator text: approval phrases lock, anything else
/// (blank included) revises.
pub fn interpret_reply(reply: &str) -> SteeringReply {
    if is_approval(reply) {
        return SteeringReply::Lock;
    }
    let feedback = reply.trim();
    if feedback.is_empty() {
        SteeringReply::Revise(DEFAULT_FEEDBACK.to_string())
    } else {
        SteeringReply::Revise(feedback.to_string())
    }
}

/// Terminal steering: prints the L1/L2 review and reads replies from stdin.
#[derive(Debug)]
pub struct ConsoleSteering<R, W> {
    input: R,
    output: W,
    interactive: bool,
}

impl ConsoleSteering<std::io::StdinLock<'static>, std::io::Stdout> {
    pub fn stdio(interactive: bool) -> Self {
        Self::new(std::io::stdin().lock(), std::io::stdout(), interactive)
    }
}

impl<R: BufRead, W: Write> ConsoleSteering<R, W> {
    pub fn new(input: R, output: W, interactive: bool) -> Self {
        Self {
            input,
            output,
            interactive,
        }
    }

    fn print_review(&mut self, draft: &Draft, round: usize) -> Result<()> {
        writeln!(self.output, "\nDraft {round}: L1 + L2 review")?;
        writeln!(self.output, "L1 Principles:")?;
        for (idx, line) in draft.principle_lines().iter().enumerate() {
            writeln!(self.output, "  {}. {}", idx + 1, short_text(line, REVIEW_LINE_LIMIT))?;
        }
        writeln!(self.output, "L2 Objectives:")?;
        for (idx, line) in draft.objective_lines().iter().enumerate() {
            writeln!(self.output, "  {}. {}", idx + 1, short_text(line, REVIEW_LINE_LIMIT))?;
        }
        Ok(())
    }
}

impl<R: BufRead, W: Write> Steering for ConsoleSteering<R, W> {
    fn on_drafting(&mut self, round: usize, agent: &str) {
        // operator output only; a closed stdout surfaces on the next write
        let _ = writeln!(self.output, "Generating draft {round} with {agent}...");
    }

    fn respond(&mut self, draft: &Draft, round: usize) -> Result<SteeringReply> {
        self.print_review(draft, round)?;
        if !self.interactive {
            writeln!(self.output, "Non-interactive mode detected; locking first draft.")?;
            return Ok(SteeringReply::Lock);
        }

        write!(
            self.output,
            "\nEnter steering feedback, or type \"build it\" / \"looks good\" to lock: "
        )?;
        self.output.flush()?;

        let mut line = String::new();
        let read = self.input.read_line(&mut line).context("read steering input")?;
        if read == 0 {
            bail!("steering input closed before the draft was approved");
        }
        Ok(interpret_reply(&line))
    }
}

#[derive(Debug, Clone)]
pub struct InitRequest {
    pub description: String,
    /// Replace an existing `constitution/` and `prd.json`.
    pub force: bool,
}

#[derive(Debug, Clone)]
pub struct InitOutcome {
    pub draft: Draft,
    pub rounds: usize,
}

/// Generate drafts until the steering locks one, then write it.
///
/// The init target is checked before the first agent call so an existing
/// charter is never clobbered (or paid for) without `force`.
#[instrument(skip_all, fields(force = request.force))]
pub fn run_init<A: Agent, S: Steering>(
    paths: &ProjectPaths,
    agent: &A,
    steering: &mut S,
    request: &InitRequest,
) -> Result<InitOutcome> {
    let description = request.description.trim();
    if description.is_empty() {
        bail!("Description is required: ccagent init \"<description>\"");
    }
    ensure_init_target(paths, request.force)?;

    let invoke = InvokeOptions {
        workdir: &paths.root,
        auto_approve: false,
    };
    let mut feedback: Option<String> = None;
    let mut previous: Option<Draft> = None;
    let mut round = 0;

    let draft = loop {
        round += 1;
        steering.on_drafting(round, agent.name());
        let prompt = render_init_prompt(description, feedback.as_deref(), previous.as_ref())?;
        let raw = agent.invoke(&prompt, &invoke)?;
        let value = extract_json(&raw).context("parse init draft")?;
        let draft = normalize_draft(&value);
        validate_draft(&draft)?;
        Backlog::from_value(serde_json::Value::Object(draft.prd.clone()))
            .context("Init draft backlog is not loadable")?;
        debug!(round, stories = draft.story_count(), "draft ready");

        match steering.respond(&draft, round)? {
            SteeringReply::Lock => break draft,
            SteeringReply::Revise(text) => {
                info!(round, "revising draft");
                feedback = Some(text);
                previous = Some(draft);
            }
        }
    };

    write_draft(paths, &draft, request.force)?;
    info!(rounds = round, stories = draft.story_count(), "constitution locked");
    Ok(InitOutcome {
        draft,
        rounds: round,
    })
}
