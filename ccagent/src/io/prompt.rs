//! Prompt rendering for the story, check, and init protocols.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;

use crate::core::draft::{Draft, REQUIRED_FILES};
use crate::core::types::{DiffSource, Story};

const STORY_TEMPLATE: &str = include_str!("prompts/story.md");
const CHECK_TEMPLATE: &str = include_str!("prompts/check.md");
const INIT_TEMPLATE: &str = include_str!("prompts/init.md");

/// Story fields as shown to the implementing agent.
#[derive(Debug, Clone, Serialize)]
struct StoryContext {
    id: String,
    title: String,
    description: Option<String>,
    refs: Vec<String>,
    acceptance: Vec<String>,
}

impl StoryContext {
    fn from_story(story: &Story) -> Self {
        Self {
            id: story.id_label(),
            title: story.title().to_string(),
            description: story.description().map(str::to_string),
            refs: story.constitutional_refs(),
            acceptance: story.acceptance(),
        }
    }
}

/// Everything the implementing agent sees for one iteration.
#[derive(Debug, Clone, Copy)]
pub struct StoryPromptInput<'a> {
    pub story: &'a Story,
    pub constitution: &'a str,
    /// Backlog serialized in its on-disk shape.
    pub backlog: &'a str,
    /// Persisted progress tail plus this run's buffered lines.
    pub progress: &'a str,
}

/// Template engine wrapper around minijinja.
struct PromptEngine {
    env: Environment<'static>,
}

impl PromptEngine {
    fn new() -> Result<Self> {
        let mut env = Environment::new();
        env.add_template("story", STORY_TEMPLATE)
            .context("load story template")?;
        env.add_template("check", CHECK_TEMPLATE)
            .context("load check template")?;
        env.add_template("init", INIT_TEMPLATE)
            .context("load init template")?;
        Ok(Self { env })
    }

    fn render<S: Serialize>(&self, name: &str, ctx: S) -> Result<String> {
        let template = self.env.get_template(name)?;
        template
            .render(ctx)
            .with_context(|| format!("render {name} prompt"))
    }
}

pub fn render_story_prompt(input: &StoryPromptInput<'_>) -> Result<String> {
    PromptEngine::new()?.render(
        "story",
        context! {
            story => StoryContext::from_story(input.story),
            constitution => input.constitution,
            backlog => input.backlog.trim_end(),
            progress => input.progress.trim(),
        },
    )
}

pub fn render_check_prompt(source: DiffSource, constitution: &str, diff: &str) -> Result<String> {
    PromptEngine::new()?.render(
        "check",
        context! {
            source => source.describe(),
            constitution => constitution,
            diff => diff,
        },
    )
}

/// Draft-generation prompt. `previous` and `feedback` are set on revisions.
pub fn render_init_prompt(
    description: &str,
    feedback: Option<&str>,
    previous: Option<&Draft>,
) -> Result<String> {
    let previous_draft = previous
        .map(serde_json::to_string_pretty)
        .transpose()
        .context("serialize previous draft")?;
    PromptEngine::new()?.render(
        "init",
        context! {
            description => description,
            feedback => feedback.map(str::trim).filter(|s| !s.is_empty()),
            previous_draft => previous_draft,
            required_files => REQUIRED_FILES,
        },
    )
}
