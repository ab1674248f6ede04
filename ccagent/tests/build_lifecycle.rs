//! Build loop against real git repositories with scripted agents.

use std::fs;

use ccagent::check::ConstitutionCheck;
use ccagent::io::layout::ProjectPaths;
use ccagent::io::progress::PROGRESS_HEADER;
use ccagent::looping::{BuildConfig, BuildError, BuildOutcome, run_build};
use ccagent::test_support::{
    ScriptedAgent, ScriptedTurn, ScriptedValidator, TestRepo, failing_verdict, passing_verdict,
    seed_project,
};
use serde_json::{Value, json};

fn project(backlog: Value) -> (TestRepo, ProjectPaths) {
    let repo = TestRepo::new().expect("repo");
    let paths = ProjectPaths::new(repo.path());
    seed_project(&paths, &backlog).expect("seed");
    repo.commit_all("seed project").expect("commit");
    (repo, paths)
}

fn iterations(max_iterations: u32) -> BuildConfig {
    BuildConfig {
        max_iterations,
        ..BuildConfig::default()
    }
}

fn saved_backlog(paths: &ProjectPaths) -> Value {
    serde_json::from_str(&fs::read_to_string(&paths.backlog).expect("read")).expect("json")
}

fn progress(paths: &ProjectPaths) -> String {
    fs::read_to_string(&paths.progress).expect("progress")
}

#[test]
fn accepted_story_is_committed_and_marked_passed() {
    let (repo, paths) = project(json!({
        "stories": [{"id": 1, "title": "Add greeting", "priority": 1, "passes": false}]
    }));
    let agent = ScriptedAgent::new(vec![
        ScriptedTurn::reply("implemented").writing("src/greet.rs", "pub fn hi() {}\n"),
    ]);
    let validator = ScriptedValidator::new(vec![Ok(passing_verdict())]);

    let outcome = run_build(&paths, &agent, &repo.git(), &validator, &iterations(10), |_| {})
        .expect("build");

    assert_eq!(
        outcome,
        BuildOutcome {
            completed: 1,
            total: 1,
            iterations_run: 1
        }
    );
    assert_eq!(
        repo.commit_subjects().expect("log"),
        vec![
            "ccagent: complete story 1 add-greeting",
            "ccagent: track progress log",
            "seed project",
            "root",
        ]
    );
    assert!(!repo.git().has_changes().expect("status"));

    let backlog = saved_backlog(&paths);
    assert_eq!(backlog["stories"][0]["passes"], json!(true));
    assert!(backlog["stories"][0]["completed_at"].is_string());
    assert_eq!(repo.read("src/greet.rs").expect("read"), "pub fn hi() {}\n");
    assert!(progress(&paths).contains("iteration 1: PASS story 1 (Add greeting)"));
}

#[test]
fn tracked_progress_log_leaves_only_the_story_commit() {
    let repo = TestRepo::new().expect("repo");
    let paths = ProjectPaths::new(repo.path());
    seed_project(&paths, &json!([{"id": 7, "title": "Add greeting"}])).expect("seed");
    fs::write(&paths.progress, PROGRESS_HEADER).expect("progress");
    repo.commit_all("seed project").expect("commit");
    let before = repo.commit_count().expect("count");
    let agent = ScriptedAgent::new(vec![
        ScriptedTurn::reply("implemented").writing("src/greet.rs", "pub fn hi() {}\n"),
    ]);
    let validator = ScriptedValidator::new(vec![Ok(passing_verdict())]);

    run_build(&paths, &agent, &repo.git(), &validator, &iterations(3), |_| {}).expect("build");

    assert_eq!(repo.commit_count().expect("count"), before + 1);
    let subjects = repo.commit_subjects().expect("log");
    assert_eq!(subjects[0], "ccagent: complete story 7 add-greeting");
    assert_eq!(subjects[1], "seed project");
    assert!(!repo.git().has_changes().expect("status"));
    assert!(progress(&paths).starts_with(PROGRESS_HEADER));
}

#[test]
fn agent_failure_reverts_and_retries_same_story() {
    let (repo, paths) = project(json!([{"id": 1, "title": "Greet", "priority": 1}]));
    let agent = ScriptedAgent::new(vec![
        ScriptedTurn::fail("boom").writing("partial.txt", "half done\n"),
        ScriptedTurn::reply("done").writing("greet.txt", "hello\n"),
    ]);
    let validator = ScriptedValidator::new(vec![Ok(passing_verdict())]);

    let outcome = run_build(&paths, &agent, &repo.git(), &validator, &iterations(2), |_| {})
        .expect("build");

    assert_eq!(outcome.completed, 1);
    assert_eq!(outcome.iterations_run, 2);
    assert!(!repo.path().join("partial.txt").exists());
    let prompts = agent.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts.iter().all(|prompt| prompt.contains("- Story ID: 1")));
    assert!(
        progress(&paths)
            .contains("iteration 1: agent execution failed (scripted failed (1): boom)")
    );
}

#[test]
fn no_change_is_logged_without_commit() {
    let (repo, paths) = project(json!([{"id": 1, "title": "Greet"}]));
    let agent = ScriptedAgent::new(vec![ScriptedTurn::reply("nothing needed")]);
    let validator = ScriptedValidator::new(Vec::new());

    let err = run_build(&paths, &agent, &repo.git(), &validator, &iterations(1), |_| {})
        .expect_err("exhausted");

    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::IterationsExhausted { remaining: 1, .. })
    ));
    assert_eq!(validator.calls(), 0);
    let subjects = repo.commit_subjects().expect("log");
    assert_eq!(subjects[0], "ccagent: record build progress");
    assert!(!subjects.iter().any(|subject| subject.contains("complete story")));
    assert!(progress(&paths).contains("iteration 1: no code changes produced for story 1"));
    assert_eq!(saved_backlog(&paths)[0]["passes"], json!(null));
}

#[test]
fn rejected_story_is_reverted_with_reason_logged() {
    let (repo, paths) = project(json!([{"id": 1, "title": "Greet"}]));
    let agent = ScriptedAgent::new(vec![
        ScriptedTurn::reply("done").writing("greet.rs", "fn greet() {}\n"),
    ]);
    let validator = ScriptedValidator::new(vec![Ok(failing_verdict("missing tests"))]);

    run_build(&paths, &agent, &repo.git(), &validator, &iterations(1), |_| {})
        .expect_err("exhausted");

    assert!(!repo.path().join("greet.rs").exists());
    assert!(!repo.git().has_changes().expect("status"));
    assert!(progress(&paths).contains("iteration 1: FAIL story 1 - missing tests"));
}

#[test]
fn exhausted_iterations_report_remaining_and_persist_backlog() {
    let (repo, paths) = project(json!([
        {"id": 1, "title": "One", "passes": false},
        {"id": 2, "title": "Two", "passes": false},
    ]));
    let agent = ScriptedAgent::new(vec![
        ScriptedTurn::reply("no-op"),
        ScriptedTurn::reply("no-op"),
    ]);
    let validator = ScriptedValidator::new(Vec::new());

    let err = run_build(&paths, &agent, &repo.git(), &validator, &iterations(2), |_| {})
        .expect_err("exhausted");

    assert_eq!(
        err.to_string(),
        "Build stopped: 2 stories incomplete after 2 iterations."
    );
    let backlog = saved_backlog(&paths);
    assert_eq!(backlog[0]["passes"], json!(false));
    assert_eq!(backlog[1]["passes"], json!(false));
    assert!(!repo.git().has_changes().expect("status"));
}

#[test]
fn bare_backlog_stays_bare_after_update() {
    let (repo, paths) = project(json!([{"id": 1, "title": "Greet"}]));
    let agent = ScriptedAgent::new(vec![ScriptedTurn::reply("done").writing("greet.txt", "hi\n")]);
    let validator = ScriptedValidator::new(vec![Ok(passing_verdict())]);

    run_build(&paths, &agent, &repo.git(), &validator, &iterations(1), |_| {}).expect("build");

    let backlog = saved_backlog(&paths);
    assert!(backlog.is_array());
    assert_eq!(backlog[0]["passes"], json!(true));
}

#[test]
fn wrapped_backlog_keeps_sibling_fields_in_place() {
    let (repo, paths) = project(json!({
        "project": "demo",
        "version": 3,
        "stories": [{"id": 1, "title": "Greet", "priority": 2}],
        "notes": {"owner": "ops"},
    }));
    let agent = ScriptedAgent::new(vec![ScriptedTurn::reply("done").writing("greet.txt", "hi\n")]);
    let validator = ScriptedValidator::new(vec![Ok(passing_verdict())]);

    run_build(&paths, &agent, &repo.git(), &validator, &iterations(1), |_| {}).expect("build");

    let text = fs::read_to_string(&paths.backlog).expect("read");
    assert!(text.starts_with("{\n  \"project\": \"demo\",\n  \"version\": 3,\n  \"stories\": ["));
    assert!(text.ends_with("  \"notes\": {\n    \"owner\": \"ops\"\n  }\n}\n"));
    let backlog = saved_backlog(&paths);
    let story = backlog["stories"][0].as_object().expect("story");
    let keys: Vec<&str> = story.keys().map(String::as_str).collect();
    assert_eq!(keys, vec!["id", "title", "priority", "passes", "completed_at"]);
}

#[test]
fn complete_backlog_touches_nothing() {
    let (repo, paths) = project(json!([{"id": 1, "title": "Done", "passes": true}]));
    let before = repo.commit_count().expect("count");
    let agent = ScriptedAgent::new(Vec::new());
    let validator = ScriptedValidator::new(Vec::new());

    let outcome = run_build(&paths, &agent, &repo.git(), &validator, &iterations(5), |_| {})
        .expect("build");

    assert_eq!(outcome.iterations_run, 0);
    assert_eq!(repo.commit_count().expect("count"), before);
    assert!(agent.prompts().is_empty());
    assert!(!paths.progress.exists());
}

#[test]
fn untracked_file_blocks_the_build() {
    let (repo, paths) = project(json!([{"id": 1, "title": "Greet"}]));
    repo.write("scratch.txt", "wip\n").expect("write");
    let agent = ScriptedAgent::new(Vec::new());

    let err = run_build(
        &paths,
        &agent,
        &repo.git(),
        &ScriptedValidator::new(Vec::new()),
        &iterations(1),
        |_| {},
    )
    .expect_err("dirty");

    assert!(matches!(
        err.downcast_ref::<BuildError>(),
        Some(BuildError::PreconditionFailed(_))
    ));
    assert!(repo.path().join("scratch.txt").exists());
    assert!(agent.prompts().is_empty());
}

#[test]
fn constitution_check_sees_staged_new_files() {
    let (repo, paths) = project(json!([{"id": 1, "title": "Greet"}]));
    let agent = ScriptedAgent::new(vec![
        ScriptedTurn::reply("done").writing("src/greet.rs", "pub fn hi() {}\n"),
        ScriptedTurn::reply("```json\n{\"result\": \"PASS\", \"reasoning\": [\"fine\"]}\n```"),
    ]);
    let validator = ConstitutionCheck::new(&agent, &paths);

    let outcome = run_build(&paths, &agent, &repo.git(), &validator, &iterations(1), |_| {})
        .expect("build");

    assert_eq!(outcome.completed, 1);
    let prompts = agent.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[1].contains("Diff source: staged changes"));
    assert!(prompts[1].contains("+pub fn hi() {}"));
    assert!(prompts[1].contains("Keep functions small."));
}
