//! Test-only builders and scripted collaborators.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use chrono::Utc;
use tempfile::TempDir;

use crate::controller::{Collaborators, Controller, MonitorMode};
use crate::core::types::{HandshakeState, PhaseState, TestOutcome, WorkflowState};
use crate::io::command::{CommandEmitter, CommandRequest, MarkdownEmitter};
use crate::io::config::CascadeConfig;
use crate::io::context::WorkflowContext;
use crate::io::git::{CommitRequest, Committer};
use crate::io::handshake::{StatusRecord, write_status};
use crate::io::init::{InitOptions, WorkflowPaths, init_workflow};
use crate::io::test_runner::{TestRequest, TestRunner};
use crate::session::{Phase, Session, Task, TestResult};

/// Task whose phase letter is the first character of `id`.
pub fn task(id: &str, tokens: usize) -> Task {
    let letter = id.chars().next().unwrap_or('A');
    task_in(id, letter, tokens)
}

pub fn task_in(id: &str, letter: char, tokens: usize) -> Task {
    Task {
        id: id.to_string(),
        title: format!("{id} title"),
        content: format!("### Task {id}: {id} title"),
        phase_letter: letter,
        line_start: 1,
        line_end: 1,
        estimated_tokens: tokens,
    }
}

pub fn phase_with_tasks(id: &str, tasks: Vec<Task>) -> Phase {
    Phase::new(id, tasks)
}

/// Session over `phases` with consistent task totals.
pub fn session_with_phases(phases: Vec<Phase>) -> Session {
    let mut session = Session::new("/project", "/project/.cascade/planning.md");
    session.total_tasks = phases.iter().map(|phase| phase.tasks.len()).sum();
    session.state = if phases.is_empty() {
        WorkflowState::Idle
    } else {
        WorkflowState::Ready
    };
    session.phases = phases;
    session
}

/// Poll `predicate` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if predicate() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
}

/// Test runner that replays scripted outcomes, then passes.
#[derive(Clone, Default)]
pub struct ScriptedTestRunner {
    outcomes: Arc<Mutex<VecDeque<TestOutcome>>>,
    calls: Arc<AtomicUsize>,
}

impl ScriptedTestRunner {
    pub fn passing() -> Self {
        Self::default()
    }

    pub fn with_outcomes(outcomes: Vec<TestOutcome>) -> Self {
        Self {
            outcomes: Arc::new(Mutex::new(outcomes.into())),
            calls: Arc::default(),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TestRunner for ScriptedTestRunner {
    fn run(&self, request: &TestRequest) -> Result<TestResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .outcomes
            .lock()
            .expect("outcomes lock")
            .pop_front()
            .unwrap_or(TestOutcome::Pass);
        Ok(TestResult {
            outcome,
            summary: format!("scripted {outcome:?} for phase {}", request.phase_id),
            finished_at: Utc::now(),
        })
    }
}

/// Committer that records messages and hands out `sha-1`, `sha-2`, ...
#[derive(Clone, Default)]
pub struct RecordingCommitter {
    messages: Arc<Mutex<Vec<String>>>,
}

impl RecordingCommitter {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().expect("messages lock").clone()
    }
}

impl Committer for RecordingCommitter {
    fn commit(&self, request: &CommitRequest) -> Result<Option<String>> {
        let mut messages = self.messages.lock().expect("messages lock");
        messages.push(request.message.clone());
        Ok(Some(format!("sha-{}", messages.len())))
    }
}

/// Emitter whose writes always fail.
pub struct FailingEmitter;

impl CommandEmitter for FailingEmitter {
    fn emit(&self, request: &CommandRequest<'_>) -> Result<PathBuf> {
        Err(anyhow!(
            "no space left writing {}",
            request.paths.command_path.display()
        ))
    }
}

/// Initialized project in a temp dir with zero delays and a fast poll.
pub struct TestWorkspace {
    temp: TempDir,
    paths: WorkflowPaths,
}

impl TestWorkspace {
    pub fn new() -> Self {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = init_workflow(temp.path(), &InitOptions { force: false }).expect("init");
        Self { temp, paths }
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    pub fn paths(&self) -> &WorkflowPaths {
        &self.paths
    }

    pub fn config(&self) -> CascadeConfig {
        CascadeConfig {
            poll_interval_ms: 20,
            cascade_delay_ms: 0,
            retry_delay_ms: 0,
            ..CascadeConfig::default()
        }
    }

    pub fn plan_path(&self) -> PathBuf {
        self.root().join(&self.config().plan_file)
    }

    pub fn context(&self, tweak: impl FnOnce(&mut CascadeConfig)) -> WorkflowContext {
        let mut config = self.config();
        tweak(&mut config);
        WorkflowContext::new(self.paths.clone(), config)
    }

    pub fn collaborators(
        &self,
        tests: impl TestRunner + 'static,
        committer: impl Committer + 'static,
    ) -> Collaborators {
        Collaborators {
            emitter: Box::new(MarkdownEmitter::new()),
            tests: Box::new(tests),
            committer: Box::new(committer),
        }
    }

    pub fn default_collaborators(&self) -> Collaborators {
        self.collaborators(ScriptedTestRunner::passing(), RecordingCommitter::default())
    }

    pub fn controller(&self, mode: MonitorMode) -> Arc<Controller> {
        self.controller_with(mode, self.default_collaborators(), |_| {})
    }

    pub fn controller_with(
        &self,
        mode: MonitorMode,
        collaborators: Collaborators,
        tweak: impl FnOnce(&mut CascadeConfig),
    ) -> Arc<Controller> {
        Controller::open_with(self.context(tweak), collaborators, mode).expect("open controller")
    }

    /// Write the status record an agent writes after finishing a phase.
    pub fn agent_completes(&self, phase_id: Option<&str>, files: &[&str]) {
        self.agent_writes(agent_record(HandshakeState::Completed, phase_id, files, &[]));
    }

    pub fn agent_fails(&self, phase_id: Option<&str>, errors: &[&str]) {
        self.agent_writes(agent_record(HandshakeState::Error, phase_id, &[], errors));
    }

    pub fn agent_writes(&self, record: StatusRecord) {
        write_status(&self.paths.handshake_path, &record).expect("write status");
    }
}

impl Default for TestWorkspace {
    fn default() -> Self {
        Self::new()
    }
}

/// Deterministic record, so identical writes hash identically.
fn agent_record(
    state: HandshakeState,
    phase_id: Option<&str>,
    files: &[&str],
    errors: &[&str],
) -> StatusRecord {
    StatusRecord {
        state,
        current_phase: phase_id.map(str::to_string),
        phases_completed: Vec::new(),
        files_modified: files.iter().map(|f| (*f).to_string()).collect(),
        errors: errors.iter().map(|e| (*e).to_string()).collect(),
        last_updated: None,
    }
}

/// True once every phase of `session` is in `state`.
pub fn all_phases(session: &Session, state: PhaseState) -> bool {
    session.phases.iter().all(|phase| phase.state == state)
}
