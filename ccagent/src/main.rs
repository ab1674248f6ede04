//! Constitutional coding loop CLI.
//!
//! `init` drafts and locks `constitution/` plus `prd.json`, `build` works the
//! backlog one story per iteration under git checkpoints, and `check` judges
//! the current diff against the constitution.

use std::io::IsTerminal;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use ccagent::check::{ConstitutionCheck, Validator, render_verdict};
use ccagent::core::text::short_text;
use ccagent::exit_codes;
use ccagent::init::{ConsoleSteering, InitRequest, run_init};
use ccagent::io::agent::{AgentKind, CliAgent};
use ccagent::io::config::{CcagentConfig, load_config};
use ccagent::io::git::Git;
use ccagent::io::layout::{ProjectPaths, written_files};
use ccagent::logging;
use ccagent::looping::{BuildConfig, BuildError, IterationEvent, run_build};

#[derive(Parser)]
#[command(
    name = "ccagent",
    version,
    about = "Constitutional coding loop for command-line coding agents"
)]
struct Cli {
    /// Project root containing `constitution/` and `prd.json`.
    #[arg(short = 'C', long, global = true, default_value = ".")]
    workdir: PathBuf,

    /// Config file. Defaults to `<workdir>/ccagent.toml`.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Draft a constitution and backlog with the agent, steer, then lock.
    Init {
        /// What the project should be.
        description: Vec<String>,
        #[arg(long, ignore_case = true)]
        agent: Option<AgentKind>,
        /// Lock the first draft without prompting.
        #[arg(short, long)]
        yes: bool,
        /// Replace an existing `constitution/` and `prd.json`.
        #[arg(short, long)]
        force: bool,
    },
    /// Implement backlog stories until done or out of iterations.
    Build {
        #[arg(long, ignore_case = true)]
        agent: Option<AgentKind>,
        #[arg(short = 'n', long, value_parser = clap::value_parser!(u32).range(1..))]
        iterations: Option<u32>,
    },
    /// Judge the current diff against the constitution (exit 0 = PASS).
    Check {
        #[arg(long, ignore_case = true)]
        agent: Option<AgentKind>,
        /// Print the verdict as JSON.
        #[arg(long)]
        json: bool,
    },
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            let code = match err.downcast_ref::<BuildError>() {
                Some(BuildError::IterationsExhausted { .. }) => exit_codes::INCOMPLETE,
                _ => exit_codes::FAIL,
            };
            std::process::exit(code);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let paths = ProjectPaths::new(&cli.workdir);
    let config_path = cli.config.clone().unwrap_or_else(|| paths.config.clone());
    let config = load_config(&config_path)?;

    match cli.command {
        Command::Init {
            description,
            agent,
            yes,
            force,
        } => cmd_init(&paths, &config, agent, description.join(" "), yes, force),
        Command::Build { agent, iterations } => cmd_build(&paths, &config, agent, iterations),
        Command::Check { agent, json } => cmd_check(&paths, &config, agent, json),
    }
}

fn make_agent(config: &CcagentConfig, flag: Option<AgentKind>) -> CliAgent {
    let kind = flag.unwrap_or(config.agent);
    CliAgent::new(kind, config.program_for(kind)).with_output_limit(config.output_limit_bytes)
}

fn make_git(paths: &ProjectPaths, config: &CcagentConfig) -> Git {
    Git::new(&paths.root).with_output_limit(config.output_limit_bytes)
}

fn cmd_init(
    paths: &ProjectPaths,
    config: &CcagentConfig,
    agent: Option<AgentKind>,
    description: String,
    yes: bool,
    force: bool,
) -> Result<i32> {
    let agent = make_agent(config, agent);
    let interactive = !yes && std::io::stdin().is_terminal() && std::io::stdout().is_terminal();
    let mut steering = ConsoleSteering::stdio(interactive);

    let outcome = run_init(paths, &agent, &mut steering, &InitRequest { description, force })?;

    println!("\nConstitution locked and written to:");
    for file in written_files(&outcome.draft) {
        println!("  - {file}");
    }
    Ok(exit_codes::OK)
}

fn cmd_build(
    paths: &ProjectPaths,
    config: &CcagentConfig,
    agent: Option<AgentKind>,
    iterations: Option<u32>,
) -> Result<i32> {
    let agent = make_agent(config, agent);
    let git = make_git(paths, config);
    let validator = ConstitutionCheck::new(&agent, paths).with_git(git.clone());
    let build = BuildConfig {
        max_iterations: iterations.unwrap_or(config.max_iterations),
        progress_tail_lines: config.progress_tail_lines,
    };

    let outcome = run_build(paths, &agent, &git, &validator, &build, print_event)?;
    println!(
        "Build complete: {}/{} stories passed.",
        outcome.completed, outcome.total
    );
    Ok(exit_codes::OK)
}

fn cmd_check(
    paths: &ProjectPaths,
    config: &CcagentConfig,
    agent: Option<AgentKind>,
    json: bool,
) -> Result<i32> {
    let agent = make_agent(config, agent);
    let verdict = ConstitutionCheck::new(&agent, paths)
        .with_git(make_git(paths, config))
        .validate()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&verdict)?);
    } else {
        println!("{}", render_verdict(&verdict));
    }
    Ok(if verdict.pass {
        exit_codes::OK
    } else {
        exit_codes::FAIL
    })
}

fn print_event(event: &IterationEvent) {
    match event {
        IterationEvent::Started {
            iteration,
            max_iterations,
            story_id,
            title,
        } => println!(
            "Iteration {iteration}/{max_iterations}: story {story_id} - {}",
            short_text(title, 120)
        ),
        IterationEvent::AgentFailed { iteration, .. } => {
            println!("Iteration {iteration}: agent execution failed, retrying.");
        }
        IterationEvent::NoChanges {
            iteration,
            story_id,
        } => println!("Iteration {iteration}: no changes produced, retrying story {story_id}."),
        IterationEvent::CheckErrored { iteration, .. } => {
            println!("Iteration {iteration}: constitutional check errored, reverted.");
        }
        IterationEvent::Rejected {
            iteration,
            story_id,
            ..
        } => println!("Iteration {iteration}: constitutional FAIL for story {story_id}, reverted."),
        IterationEvent::Committed {
            iteration,
            story_id,
            commit,
        } => println!("Iteration {iteration}: committed story {story_id} as {commit}."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_init_joins_description_words() {
        let cli = Cli::parse_from(["ccagent", "init", "a", "todo", "app", "--yes"]);
        match cli.command {
            Command::Init {
                description,
                yes,
                force,
                agent,
            } => {
                assert_eq!(description.join(" "), "a todo app");
                assert!(yes);
                assert!(!force);
                assert_eq!(agent, None);
            }
            _ => panic!("expected init"),
        }
    }

    #[test]
    fn parse_agent_case_insensitively() {
        let cli = Cli::parse_from(["ccagent", "check", "--agent", "Claude"]);
        assert!(matches!(
            cli.command,
            Command::Check {
                agent: Some(AgentKind::Claude),
                json: false
            }
        ));
    }

    #[test]
    fn parse_build_with_global_workdir() {
        let cli = Cli::parse_from(["ccagent", "build", "-n", "3", "-C", "proj"]);
        assert_eq!(cli.workdir, PathBuf::from("proj"));
        assert!(matches!(
            cli.command,
            Command::Build {
                iterations: Some(3),
                agent: None
            }
        ));
    }

    #[test]
    fn zero_iterations_is_rejected() {
        assert!(Cli::try_parse_from(["ccagent", "build", "--iterations", "0"]).is_err());
    }

    #[test]
    fn unknown_agent_is_rejected() {
        assert!(Cli::try_parse_from(["ccagent", "build", "--agent", "gemini"]).is_err());
    }
}
