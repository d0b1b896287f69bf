//! End-to-end workflow runs driven by the background monitor.
//!
//! The agent is simulated by writing status records; tests and commits use
//! scripted fakes so no external programs are needed.

use std::fs;
use std::time::Duration;

use cascade::controller::MonitorMode;
use cascade::core::types::{PhaseState, TestOutcome, WorkflowState};
use cascade::io::handshake::read_status;
use cascade::test_support::{
    RecordingCommitter, ScriptedTestRunner, TestWorkspace, all_phases, wait_until,
};

const TIMEOUT: Duration = Duration::from_secs(10);

const PLAN: &str = "\
# Plan

## Phase A: Data layer

### Task A1: Add schema
Create the tables.

### Task A2: Add queries
Write the queries.

## Phase B: API

### Task B1: Add endpoint
Expose the queries.
";

#[test]
fn two_phases_complete_with_tests_and_commits() {
    let ws = TestWorkspace::new();
    let tests = ScriptedTestRunner::passing();
    let committer = RecordingCommitter::default();
    let controller = ws.controller_with(
        MonitorMode::Background,
        ws.collaborators(tests.clone(), committer.clone()),
        |cfg| {
            cfg.tests.enabled = true;
            cfg.commit.enabled = true;
        },
    );
    fs::write(ws.plan_path(), PLAN).expect("write plan");
    controller.analyze_plan_file().expect("analyze");
    controller.start().expect("start");

    ws.agent_completes(Some("A"), &["db/schema.sql"]);
    assert!(wait_until(TIMEOUT, || {
        let session = controller.status();
        session.current_phase_index == Some(1)
            && session.state == WorkflowState::WaitingForAgent
    }));
    let command = fs::read_to_string(&ws.paths().command_path).expect("command");
    assert!(command.contains("Execute Phase B (2 of 2)"));

    ws.agent_completes(Some("B"), &["src/api.rs"]);
    assert!(wait_until(TIMEOUT, || controller.status().state == WorkflowState::Completed));

    let session = controller.status();
    assert!(all_phases(&session, PhaseState::Completed));
    assert_eq!(session.completed_tasks, 3);
    assert_eq!(session.commits, vec!["sha-1", "sha-2"]);
    assert_eq!(session.phases[1].files_modified, vec!["src/api.rs"]);
    assert!(session.phases.iter().all(|phase| {
        phase.test_result.as_ref().map(|result| result.outcome) == Some(TestOutcome::Pass)
    }));
    assert_eq!(tests.calls(), 2);
    assert_eq!(
        committer.messages(),
        vec!["cascade: phase A (A1, A2)", "cascade: phase B (B1)"]
    );
    controller.shutdown();
}

#[test]
fn retry_ceiling_stops_automatic_retries() {
    let ws = TestWorkspace::new();
    let controller = ws.controller_with(
        MonitorMode::Background,
        ws.default_collaborators(),
        |cfg| cfg.max_retries = 1,
    );
    controller.analyze("### Task A1: Flaky\n").expect("analyze");
    controller.start().expect("start");

    ws.agent_fails(Some("A"), &["compile error"]);
    assert!(wait_until(TIMEOUT, || {
        let session = controller.status();
        session.phases[0].retry_count == 1 && session.state == WorkflowState::WaitingForAgent
    }));

    ws.agent_fails(Some("A"), &["still broken"]);
    assert!(wait_until(TIMEOUT, || {
        controller.status().state == WorkflowState::Error && !controller.retry_scheduled()
    }));

    let session = controller.status();
    assert_eq!(session.phases[0].state, PhaseState::Error);
    assert_eq!(session.phases[0].retry_count, 1);
    assert_eq!(session.errors.len(), 2);
    assert_eq!(
        controller.retry("A").unwrap_err().kind(),
        "retry_ceiling_exceeded"
    );
    controller.shutdown();
}

#[test]
fn resumed_controller_picks_up_completion_written_while_down() {
    let ws = TestWorkspace::new();
    let first = ws.controller(MonitorMode::Manual);
    first.analyze(PLAN).expect("analyze");
    first.start().expect("start");
    drop(first);

    ws.agent_completes(Some("A"), &[]);

    let second = ws.controller(MonitorMode::Background);
    assert_eq!(second.status().state, WorkflowState::WaitingForAgent);
    second.resume_monitoring();

    assert!(wait_until(TIMEOUT, || {
        let session = second.status();
        session.phases[0].state == PhaseState::Completed
            && session.phases[1].state == PhaseState::Waiting
    }));
    let record = read_status(&ws.paths().handshake_path)
        .expect("read")
        .expect("record");
    assert_eq!(record.current_phase.as_deref(), Some("B"));
    second.shutdown();
}

#[test]
fn pause_during_phase_stops_at_boundary() {
    let ws = TestWorkspace::new();
    let controller = ws.controller(MonitorMode::Background);
    controller.analyze(PLAN).expect("analyze");
    controller.start().expect("start");
    controller.pause().expect("pause");

    ws.agent_completes(Some("A"), &[]);
    assert!(wait_until(TIMEOUT, || controller.status().state == WorkflowState::Paused));
    assert_eq!(controller.status().phases[1].state, PhaseState::Pending);

    let session = controller.resume().expect("resume");
    assert_eq!(session.phases[1].state, PhaseState::Waiting);
    controller.shutdown();
}

#[test]
fn reset_while_waiting_discards_late_completion() {
    let ws = TestWorkspace::new();
    let controller = ws.controller(MonitorMode::Background);
    controller.analyze(PLAN).expect("analyze");
    let before = controller.start().expect("start");

    let after = controller.reset().expect("reset");
    ws.agent_completes(Some("A"), &[]);
    std::thread::sleep(Duration::from_millis(200));

    let session = controller.status();
    assert_ne!(session.id, before.id);
    assert_eq!(session.id, after.id);
    assert_eq!(session.state, WorkflowState::Idle);
    controller.shutdown();
}
