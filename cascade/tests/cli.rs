//! CLI tests: spawn the `cascade` binary against a temp project and check
//! exit codes and on-disk effects.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use cascade::exit_codes;
use cascade::io::init::{InitOptions, WorkflowPaths, init_workflow};
use cascade::io::session_store::load_session;

const PLAN: &str = "\
### Task A1: First
### Task A2: Second
### Task B1: Third
";

fn cascade(root: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_cascade"))
        .arg("--root")
        .arg(root)
        .args(args)
        .output()
        .expect("run cascade")
}

fn initialized() -> (tempfile::TempDir, WorkflowPaths) {
    let temp = tempfile::tempdir().expect("tempdir");
    let paths = init_workflow(temp.path(), &InitOptions { force: false }).expect("init");
    fs::write(temp.path().join(".cascade/planning.md"), PLAN).expect("write plan");
    (temp, paths)
}

#[test]
fn init_creates_layout_and_refuses_second_run() {
    let temp = tempfile::tempdir().expect("tempdir");

    let out = cascade(temp.path(), &["init"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    let paths = WorkflowPaths::new(temp.path());
    assert!(paths.config_path.is_file());
    assert!(paths.handshake_path.is_file());
    assert!(temp.path().join(".cascade/planning.md").is_file());

    let out = cascade(temp.path(), &["init"]);
    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&out.stderr).contains("already exists"));
}

#[test]
fn commands_require_init() {
    let temp = tempfile::tempdir().expect("tempdir");
    let out = cascade(temp.path(), &["status"]);
    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&out.stderr).contains("cascade init"));
}

#[test]
fn phases_is_a_dry_run() {
    let (temp, paths) = initialized();

    let out = cascade(temp.path(), &["phases"]);

    assert_eq!(out.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("3 tasks in 2 phases"));
    assert!(stdout.contains("(A1, A2)"));
    assert!(!paths.session_path.exists());
}

#[test]
fn analyze_then_skip_and_reset() {
    let (temp, paths) = initialized();

    let out = cascade(temp.path(), &["analyze"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    let session = load_session(&paths.session_path).expect("load").expect("session");
    assert_eq!(session.phases.len(), 2);
    assert_eq!(session.total_tasks, 3);

    let out = cascade(temp.path(), &["skip", "B"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    let session = load_session(&paths.session_path).expect("load").expect("session");
    assert_eq!(session.phases[1].state.as_str(), "skipped");
    // Auto-cascade starts the remaining pending phase.
    assert_eq!(session.phases[0].state.as_str(), "waiting");
    assert!(paths.command_path.is_file());

    let out = cascade(temp.path(), &["retry", "A"]);
    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&out.stderr).contains("invalid_state"));

    let out = cascade(temp.path(), &["reset"]);
    assert_eq!(out.status.code(), Some(exit_codes::OK));
    let archived = fs::read_dir(&paths.history_dir).expect("history").count();
    assert_eq!(archived, 1);
}

#[test]
fn analyze_without_tasks_fails() {
    let (temp, _paths) = initialized();
    fs::write(temp.path().join(".cascade/planning.md"), "# Empty plan\n").expect("write");

    let out = cascade(temp.path(), &["analyze"]);

    assert_eq!(out.status.code(), Some(exit_codes::INVALID));
    assert!(String::from_utf8_lossy(&out.stderr).contains("no_tasks_parsed"));
}

#[test]
fn status_json_is_the_session() {
    let (temp, _paths) = initialized();
    cascade(temp.path(), &["analyze"]);

    let out = cascade(temp.path(), &["status", "--json"]);

    assert_eq!(out.status.code(), Some(exit_codes::OK));
    let session: serde_json::Value = serde_json::from_slice(&out.stdout).expect("json");
    assert_eq!(session["state"], "ready");
}
