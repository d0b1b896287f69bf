//! Workflow controller: the phase/workflow state machine.
//!
//! One `Controller` owns the session for a project. Every read-modify-write of
//! the session happens under a single mutex and is persisted before the lock is
//! released. Tests, commits and the cascade/retry delays run on the monitor
//! thread with the lock released; when the lock is re-acquired the session id
//! and phase state are checked again so a concurrent reset or pause wins.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::thread;

use anyhow::{Context, anyhow};
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use crate::core::extract::extract_tasks;
use crate::core::invariants::validate_session;
use crate::core::selector::{is_exhausted, next_pending_phase};
use crate::core::split::split_into_phases;
use crate::core::types::{HandshakeState, PhaseState, TestOutcome, WorkflowState};
use crate::error::CascadeError;
use crate::io::activity::{ActivityEntry, ActivityLevel, ActivityLog};
use crate::io::command::{CommandEmitter, CommandRequest, MarkdownEmitter};
use crate::io::config::{CascadeConfig, write_config};
use crate::io::context::WorkflowContext;
use crate::io::git::{CommitRequest, Committer, GitCommitter, phase_commit_message};
use crate::io::handshake::{HandshakeWatcher, Poll, StatusRecord, read_status, write_status};
use crate::io::session_store::{archive_session, load_session, write_session};
use crate::io::test_runner::{CommandTestRunner, TestRequest, TestRunner, skipped_result};
use crate::monitor::{self, MonitorHandle};
use crate::session::{Phase, Session, TestResult};

type OpResult<T> = Result<T, CascadeError>;

/// External collaborators, swappable for scripted fakes in tests.
pub struct Collaborators {
    pub emitter: Box<dyn CommandEmitter>,
    pub tests: Box<dyn TestRunner>,
    pub committer: Box<dyn Committer>,
}

impl Collaborators {
    pub fn production() -> Self {
        Self {
            emitter: Box::new(MarkdownEmitter::new()),
            tests: Box::new(CommandTestRunner),
            committer: Box::new(GitCommitter),
        }
    }
}

/// Whether arming a phase starts the background monitor thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorMode {
    Background,
    /// The caller drives [`Controller::poll_handshake`] itself.
    Manual,
}

/// Work captured under the lock and finished after it is released.
#[derive(Debug, Clone)]
struct Ticket {
    session_id: String,
    phase_idx: usize,
    phase_id: String,
    task_ids: Vec<String>,
    attempt: u32,
}

/// The plan file as currently on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanView {
    pub path: PathBuf,
    pub exists: bool,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AfterCompletion {
    Cascade,
    Hold,
}

pub struct Controller {
    this: Weak<Controller>,
    ctx: WorkflowContext,
    /// Leaf lock: never held while taking another.
    config: RwLock<CascadeConfig>,
    collaborators: Collaborators,
    mode: MonitorMode,
    session: Mutex<Session>,
    watcher: Mutex<HandshakeWatcher>,
    monitor: Mutex<Option<MonitorHandle>>,
    activity: ActivityLog,
    retry_scheduled: AtomicBool,
}

impl Controller {
    /// Load (or create) the session for `ctx` and recover from an interrupted run.
    pub fn open(ctx: WorkflowContext, collaborators: Collaborators) -> OpResult<Arc<Self>> {
        Self::open_with(ctx, collaborators, MonitorMode::Background)
    }

    pub fn open_with(
        ctx: WorkflowContext,
        collaborators: Collaborators,
        mode: MonitorMode,
    ) -> OpResult<Arc<Self>> {
        let loaded = load_session(&ctx.paths.session_path)?;
        let fresh = loaded.is_none();
        let mut session =
            loaded.unwrap_or_else(|| Session::new(ctx.root(), ctx.plan_path()));

        let violations = validate_session(&session, ctx.config.max_retries);
        if !violations.is_empty() {
            return Err(CascadeError::invalid_state(format!(
                "session snapshot {} violates invariants:\n- {}",
                ctx.paths.session_path.display(),
                violations.join("\n- ")
            )));
        }
        let recovered = recover_interrupted(&mut session);
        if fresh || recovered {
            session.updated_at = Utc::now();
            write_session(&ctx.paths.session_path, &session)
                .map_err(CascadeError::SessionPersistenceFailure)?;
        }
        info!(session_id = %session.id, state = %session.state, recovered, "session opened");

        let watcher = HandshakeWatcher::new(&ctx.paths.handshake_path);
        let activity = ActivityLog::open(&ctx.paths.activity_path);
        let config = RwLock::new(ctx.config.clone());
        Ok(Arc::new_cyclic(|this| Self {
            this: this.clone(),
            ctx,
            config,
            collaborators,
            mode,
            session: Mutex::new(session),
            watcher: Mutex::new(watcher),
            monitor: Mutex::new(None),
            activity,
            retry_scheduled: AtomicBool::new(false),
        }))
    }

    pub fn context(&self) -> &WorkflowContext {
        &self.ctx
    }

    /// Settings in effect now. Starts as `context().config`.
    pub fn config(&self) -> CascadeConfig {
        self.config
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Turn auto-cascade on or off and save it to `.cascade/config.toml`.
    ///
    /// A workflow already holding in `running` is not started by enabling it.
    #[instrument(skip(self))]
    pub fn set_auto_cascade(&self, enabled: bool) -> OpResult<CascadeConfig> {
        let updated = {
            let mut config = self.config.write().unwrap_or_else(PoisonError::into_inner);
            let mut updated = config.clone();
            updated.auto_cascade = enabled;
            write_config(&self.ctx.paths.config_path, &updated).context("save config")?;
            *config = updated.clone();
            updated
        };
        info!(enabled, "auto-cascade updated");
        let label = if enabled { "enabled" } else { "disabled" };
        self.activity
            .push(ActivityLevel::Info, format!("Auto-cascade {label}"));
        Ok(updated)
    }

    pub fn status(&self) -> Session {
        self.lock_session().clone()
    }

    pub fn plan(&self) -> OpResult<PlanView> {
        let path = self.lock_session().plan_path.clone();
        let content = read_plan(&path)?;
        Ok(PlanView {
            exists: content.is_some(),
            content: content.unwrap_or_default(),
            path,
        })
    }

    pub fn modified_files(&self) -> Vec<String> {
        self.lock_session().modified_files()
    }

    pub fn activity(&self) -> Vec<ActivityEntry> {
        self.activity.entries()
    }

    /// Current handshake record on disk, if any.
    pub fn handshake(&self) -> OpResult<Option<StatusRecord>> {
        Ok(read_status(&self.ctx.paths.handshake_path)?)
    }

    /// True while an automatic retry is waiting out its delay.
    pub fn retry_scheduled(&self) -> bool {
        self.retry_scheduled.load(Ordering::SeqCst)
    }

    /// Start the monitor if the loaded session is waiting on the agent.
    ///
    /// The watcher starts without a prior hash, so a completion written while
    /// no process was watching is picked up on the first poll.
    pub fn resume_monitoring(&self) {
        if self.lock_session().state == WorkflowState::WaitingForAgent {
            self.ensure_monitor();
        }
    }

    /// Stop and join the monitor thread.
    pub fn shutdown(&self) {
        let handle = self.lock_monitor().take();
        if let Some(handle) = handle {
            handle.stop();
        }
    }

    // ── Operations ────────────────────────────────────────────────────────

    /// Extract tasks from `plan_text` and replace the phase list.
    ///
    /// When nothing parses the workflow returns to `idle` with its previous
    /// phases untouched.
    #[instrument(skip_all)]
    pub fn analyze(&self, plan_text: &str) -> OpResult<Session> {
        let mut session = self.lock_session();
        self.analyze_locked(&mut session, plan_text)?;
        Ok(session.clone())
    }

    /// Read the session's plan file and analyze it.
    pub fn analyze_plan_file(&self) -> OpResult<Session> {
        let plan_path = self.lock_session().plan_path.clone();
        let Some(text) = read_plan(&plan_path)? else {
            return Err(CascadeError::PlanNotFound(plan_path));
        };
        self.analyze(&text)
    }

    /// Arm the first pending phase, or complete the workflow when none remain.
    #[instrument(skip_all)]
    pub fn start(&self) -> OpResult<Session> {
        let mut session = self.lock_session();
        self.start_locked(&mut session)?;
        Ok(session.clone())
    }

    /// Arm a specific pending phase.
    #[instrument(skip_all, fields(phase_id = %phase_id))]
    pub fn start_phase(&self, phase_id: &str) -> OpResult<Session> {
        let mut session = self.lock_session();
        self.start_phase_locked(&mut session, phase_id)?;
        Ok(session.clone())
    }

    #[instrument(skip_all, fields(phase_id = %phase_id))]
    pub fn skip(&self, phase_id: &str) -> OpResult<Session> {
        let mut session = self.lock_session();
        let idx = phase_index(&session, phase_id)?;
        set_phase(&mut session.phases[idx], PhaseState::Skipped)?;
        session.phases[idx].completed_at = Some(Utc::now());
        self.persist(&mut session)?;
        self.activity
            .push(ActivityLevel::Warning, format!("Phase {phase_id} skipped"));
        info!(phase_id, "phase skipped");

        let auto_cascade = self.config().auto_cascade;
        let startable = matches!(
            session.state,
            WorkflowState::Ready | WorkflowState::Running | WorkflowState::Error
        );
        if startable && auto_cascade && !session.paused {
            self.start_locked(&mut session)?;
        } else if session.state == WorkflowState::Error {
            set_workflow(&mut session, WorkflowState::Ready)?;
            self.persist(&mut session)?;
        }
        Ok(session.clone())
    }

    #[instrument(skip_all, fields(phase_id = %phase_id))]
    pub fn retry(&self, phase_id: &str) -> OpResult<Session> {
        let mut session = self.lock_session();
        self.retry_locked(&mut session, phase_id)?;
        Ok(session.clone())
    }

    /// Mark the phase the agent is working on as complete, as if the agent had
    /// reported it. Tests, commit and cascade run on the caller's thread.
    #[instrument(skip_all, fields(phase_id = %phase_id))]
    pub fn complete_phase(&self, phase_id: &str, files_modified: Vec<String>) -> OpResult<Session> {
        {
            let session = self.lock_session();
            let idx = phase_index(&session, phase_id)?;
            let waiting = session.state == WorkflowState::WaitingForAgent
                && session.current_phase_index == Some(idx)
                && session.phases[idx].state == PhaseState::Waiting;
            if !waiting {
                return Err(CascadeError::invalid_state(format!(
                    "phase {phase_id} is not waiting on the agent"
                )));
            }
        }
        self.handle_completion(&StatusRecord::completed(phase_id, files_modified))?;
        Ok(self.status())
    }

    /// Set the paused flag. The agent and the monitor keep running and
    /// automatic retries still happen; the workflow stops at the next phase
    /// boundary.
    pub fn pause(&self) -> OpResult<Session> {
        let mut session = self.lock_session();
        if !session.state.is_active() {
            return Err(CascadeError::invalid_state(format!(
                "nothing to pause while {}",
                session.state
            )));
        }
        if !session.paused {
            session.paused = true;
            self.persist(&mut session)?;
            self.activity.push(ActivityLevel::Info, "Workflow paused");
        }
        Ok(session.clone())
    }

    pub fn resume(&self) -> OpResult<Session> {
        let mut session = self.lock_session();
        if !session.paused {
            return Err(CascadeError::invalid_state("workflow is not paused"));
        }
        session.paused = false;
        self.activity.push(ActivityLevel::Info, "Workflow resumed");
        if session.state == WorkflowState::Paused {
            set_workflow(&mut session, WorkflowState::Running)?;
            self.persist(&mut session)?;
            self.start_locked(&mut session)?;
        } else {
            self.persist(&mut session)?;
        }
        Ok(session.clone())
    }

    /// Archive the session to `.cascade/history/` and start over with an empty one.
    #[instrument(skip_all)]
    pub fn reset(&self) -> OpResult<Session> {
        let mut session = self.lock_session();
        let archive = archive_session(&self.ctx.paths.history_dir, &session)
            .map_err(CascadeError::SessionPersistenceFailure)?;
        self.write_handshake(&StatusRecord::idle())?;
        *session = Session::new(self.ctx.root(), self.ctx.plan_path());
        self.persist(&mut session)?;
        self.activity.clear();
        self.activity.push(
            ActivityLevel::Info,
            format!(
                "Session reset; previous session archived to {}",
                self.ctx.paths.relative(&archive).display()
            ),
        );
        info!(session_id = %session.id, "session reset");
        Ok(session.clone())
    }

    /// Poll the handshake once and dispatch any change.
    pub fn poll_handshake(&self) {
        let poll = self.lock_watcher().poll();
        match poll {
            Ok(Poll::Unchanged) => {}
            Ok(Poll::Invalid(reason)) => self.activity.push(
                ActivityLevel::Warning,
                format!("Ignored invalid status record: {reason}"),
            ),
            Ok(Poll::Changed(record)) => {
                if let Err(err) = self.on_handshake(record) {
                    error!(err = %err, kind = err.kind(), "handshake handling failed");
                    self.activity.push(ActivityLevel::Error, err.to_string());
                }
            }
            Err(err) => warn!(err = %format!("{err:#}"), "failed to poll status record"),
        }
    }

    // ── Handshake handling ────────────────────────────────────────────────

    fn on_handshake(&self, record: StatusRecord) -> OpResult<()> {
        match record.state {
            HandshakeState::Completed => self.handle_completion(&record),
            HandshakeState::Error => self.handle_agent_error(&record),
            HandshakeState::Idle | HandshakeState::Running => {
                debug!(state = ?record.state, "status record needs no action");
                Ok(())
            }
        }
    }

    #[instrument(skip_all, fields(current_phase = ?record.current_phase))]
    fn handle_completion(&self, record: &StatusRecord) -> OpResult<()> {
        let ticket = {
            let mut session = self.lock_session();
            let Some(idx) = accept_record(&session, record) else {
                return Ok(());
            };
            set_phase(&mut session.phases[idx], PhaseState::Testing)?;
            set_workflow(&mut session, WorkflowState::Testing)?;
            self.persist(&mut session)?;
            let ticket = ticket_for(&session, idx);
            self.activity.push(
                ActivityLevel::Info,
                format!("Phase {} reported complete", ticket.phase_id),
            );
            ticket
        };

        let test_result = self.run_tests(&ticket);
        let commit = self.run_commit(&ticket);

        let next = {
            let mut session = self.lock_session();
            if !still_current(&session, &ticket, PhaseState::Testing) {
                info!(phase_id = %ticket.phase_id, "session changed during tests; dropping result");
                return Ok(());
            }
            let outcome = test_result.outcome;
            {
                let phase = &mut session.phases[ticket.phase_idx];
                phase.test_result = Some(test_result);
                phase.files_modified = record.files_modified.clone();
                phase.commit = commit.as_ref().ok().cloned().flatten();
                set_phase(phase, PhaseState::Completed)?;
                phase.completed_at = Some(Utc::now());
            }
            match commit {
                Ok(Some(sha)) => session.commits.push(sha),
                Ok(None) => {}
                Err(message) => session.record_error(Some(&ticket.phase_id), message),
            }
            session.recount_completed_tasks();
            set_workflow(&mut session, WorkflowState::Running)?;
            let next = if session.paused {
                set_workflow(&mut session, WorkflowState::Paused)?;
                AfterCompletion::Hold
            } else if self.config().auto_cascade {
                AfterCompletion::Cascade
            } else {
                AfterCompletion::Hold
            };
            self.persist(&mut session)?;
            self.activity.push(
                ActivityLevel::Success,
                format!(
                    "Phase {} completed ({}/{} tasks, tests {:?})",
                    ticket.phase_id, session.completed_tasks, session.total_tasks, outcome
                ),
            );
            info!(phase_id = %ticket.phase_id, ?next, "phase completed");
            next
        };

        if next == AfterCompletion::Cascade {
            self.cascade(&ticket.session_id)?;
        }
        Ok(())
    }

    fn cascade(&self, session_id: &str) -> OpResult<()> {
        thread::sleep(self.config().cascade_delay());
        let mut session = self.lock_session();
        if session.id != session_id || session.state != WorkflowState::Running {
            debug!("session changed before cascade; not starting next phase");
            return Ok(());
        }
        if session.paused {
            set_workflow(&mut session, WorkflowState::Paused)?;
            return self.persist(&mut session);
        }
        self.write_handshake(&StatusRecord::idle())?;
        let started = self.start_locked(&mut session);
        started.or_else(|err| self.fail_workflow(&mut session, err))
    }

    #[instrument(skip_all, fields(current_phase = ?record.current_phase))]
    fn handle_agent_error(&self, record: &StatusRecord) -> OpResult<()> {
        let retry = {
            let mut session = self.lock_session();
            let Some(idx) = accept_record(&session, record) else {
                return Ok(());
            };
            let phase_id = session.phases[idx].id.clone();
            let reported = CascadeError::AgentReportedError {
                phase_id: phase_id.clone(),
                message: record.error_message(),
            };
            {
                let phase = &mut session.phases[idx];
                phase.last_error = Some(record.error_message());
                phase.files_modified = record.files_modified.clone();
                set_phase(phase, PhaseState::Error)?;
            }
            session.record_error(Some(&phase_id), reported.to_string());
            set_workflow(&mut session, WorkflowState::Error)?;

            let retry_count = session.phases[idx].retry_count;
            let max_retries = self.config().max_retries;
            let retry_due = retry_count < max_retries;
            if retry_due {
                self.retry_scheduled.store(true, Ordering::SeqCst);
            }
            if let Err(err) = self.persist(&mut session) {
                self.retry_scheduled.store(false, Ordering::SeqCst);
                return Err(err);
            }
            warn!(%phase_id, retry_count, max_retries, "agent reported error");
            self.activity.push(ActivityLevel::Error, reported.to_string());
            if retry_count >= max_retries {
                self.activity.push(
                    ActivityLevel::Warning,
                    format!("Phase {phase_id} reached the retry ceiling; skip it or reset"),
                );
            }
            retry_due.then(|| ticket_for(&session, idx))
        };

        let Some(ticket) = retry else {
            return Ok(());
        };
        thread::sleep(self.config().retry_delay());
        let mut session = self.lock_session();
        self.retry_scheduled.store(false, Ordering::SeqCst);
        if !still_current(&session, &ticket, PhaseState::Error)
            || session.state != WorkflowState::Error
        {
            debug!(phase_id = %ticket.phase_id, "automatic retry superseded");
            return Ok(());
        }
        let retried = self.retry_locked(&mut session, &ticket.phase_id);
        retried.or_else(|err| self.fail_workflow(&mut session, err))
    }

    fn run_tests(&self, ticket: &Ticket) -> TestResult {
        let tests = self.config().tests;
        if !tests.enabled {
            return skipped_result();
        }
        let request = TestRequest::from_config(
            &tests,
            &ticket.phase_id,
            self.ctx.root().to_path_buf(),
            self.ctx.paths.test_log_path(&ticket.phase_id, ticket.attempt),
        );
        match self.collaborators.tests.run(&request) {
            Ok(result) => result,
            Err(err) => {
                warn!(err = %format!("{err:#}"), "test runner failed");
                TestResult {
                    outcome: TestOutcome::Fail,
                    summary: format!("test runner failed: {err:#}"),
                    finished_at: Utc::now(),
                }
            }
        }
    }

    /// `Err` carries a message for the error history; it never fails the phase.
    fn run_commit(&self, ticket: &Ticket) -> Result<Option<String>, String> {
        let commit = self.config().commit;
        if !commit.enabled {
            return Ok(None);
        }
        let task_ids: Vec<&str> = ticket.task_ids.iter().map(String::as_str).collect();
        let request = CommitRequest {
            workdir: self.ctx.root().to_path_buf(),
            message: phase_commit_message(&ticket.phase_id, &task_ids),
            push: commit.push,
            remote: commit.remote,
        };
        self.collaborators.committer.commit(&request).map_err(|err| {
            warn!(err = %format!("{err:#}"), "commit failed");
            format!("commit for phase {} failed: {err:#}", ticket.phase_id)
        })
    }

    // ── Locked helpers ────────────────────────────────────────────────────

    fn analyze_locked(&self, session: &mut Session, plan_text: &str) -> OpResult<()> {
        if !matches!(session.state, WorkflowState::Idle | WorkflowState::Ready) {
            return Err(CascadeError::invalid_state(format!(
                "cannot analyze while {}",
                session.state
            )));
        }
        set_workflow(session, WorkflowState::Analyzing)?;

        let tasks = extract_tasks(plan_text);
        if tasks.is_empty() {
            set_workflow(session, WorkflowState::Idle)?;
            self.persist(session)?;
            self.activity
                .push(ActivityLevel::Warning, CascadeError::NoTasksParsed.to_string());
            return Err(CascadeError::NoTasksParsed);
        }

        session.phases = split_into_phases(&tasks, self.config().split_limits());
        session.current_phase_index = None;
        session.total_tasks = tasks.len();
        session.completed_tasks = 0;
        session.paused = false;
        session.started_at = None;
        session.completed_at = None;
        set_workflow(session, WorkflowState::Ready)?;
        self.persist(session)?;

        let message = format!(
            "Plan analyzed: {} tasks in {} phases",
            session.total_tasks,
            session.phases.len()
        );
        info!(tasks = session.total_tasks, phases = session.phases.len(), "plan analyzed");
        self.activity.push(ActivityLevel::Info, message);
        Ok(())
    }

    fn start_locked(&self, session: &mut Session) -> OpResult<()> {
        ensure_startable(session)?;
        if let Some(idx) = next_pending_phase(&session.phases) {
            return self.arm_phase(session, idx);
        }
        if !is_exhausted(&session.phases) {
            let open: Vec<&str> = session
                .phases
                .iter()
                .filter(|phase| !phase.state.is_terminal())
                .map(|phase| phase.id.as_str())
                .collect();
            return Err(CascadeError::invalid_state(format!(
                "no pending phase; retry or skip phase(s) {}",
                open.join(", ")
            )));
        }
        if session.state != WorkflowState::Running {
            set_workflow(session, WorkflowState::Running)?;
        }
        set_workflow(session, WorkflowState::Completed)?;
        session.completed_at = Some(Utc::now());
        self.persist(session)?;
        info!(session_id = %session.id, "workflow completed");
        self.activity.push(ActivityLevel::Success, "All phases complete");
        Ok(())
    }

    fn start_phase_locked(&self, session: &mut Session, phase_id: &str) -> OpResult<()> {
        ensure_startable(session)?;
        let idx = phase_index(session, phase_id)?;
        let state = session.phases[idx].state;
        if state != PhaseState::Pending {
            return Err(CascadeError::invalid_state(format!(
                "phase {phase_id} is {state}; only pending phases can be started"
            )));
        }
        self.arm_phase(session, idx)
    }

    fn retry_locked(&self, session: &mut Session, phase_id: &str) -> OpResult<()> {
        let idx = phase_index(session, phase_id)?;
        let max_retries = self.config().max_retries;
        let phase = &mut session.phases[idx];
        if phase.state != PhaseState::Error {
            return Err(CascadeError::invalid_state(format!(
                "phase {phase_id} is {}; only failed phases can be retried",
                phase.state
            )));
        }
        if phase.retry_count >= max_retries {
            return Err(CascadeError::RetryCeilingExceeded {
                phase_id: phase_id.to_string(),
                max_retries,
            });
        }
        phase.retry_count += 1;
        phase.last_error = None;
        set_phase(phase, PhaseState::Pending)?;
        let attempt = phase.retry_count;
        self.persist(session)?;
        self.activity.push(
            ActivityLevel::Info,
            format!("Retrying phase {phase_id} (attempt {attempt} of {max_retries})"),
        );
        self.start_phase_locked(session, phase_id)
    }

    /// Pending phase → waiting, workflow → waiting_for_agent.
    fn arm_phase(&self, session: &mut Session, idx: usize) -> OpResult<()> {
        let phase_id = session.phases[idx].id.clone();
        let now = Utc::now();
        if session.state != WorkflowState::Running {
            set_workflow(session, WorkflowState::Running)?;
        }
        set_phase(&mut session.phases[idx], PhaseState::Running)?;
        session.phases[idx].started_at = Some(now);
        session.phases[idx].completed_at = None;
        session.current_phase_index = Some(idx);
        session.started_at.get_or_insert(now);

        if let Err(source) = self.emit_phase(session, idx) {
            let err = CascadeError::PhaseArtifactWriteFailure {
                phase_id: phase_id.clone(),
                source,
            };
            let message = err.to_string();
            error!(%phase_id, err = %message, "could not arm phase");
            session.phases[idx].last_error = Some(message.clone());
            set_phase(&mut session.phases[idx], PhaseState::Error)?;
            session.record_error(Some(&phase_id), message.clone());
            set_workflow(session, WorkflowState::Error)?;
            self.persist(session)?;
            self.activity.push(ActivityLevel::Error, message);
            return Err(err);
        }

        set_phase(&mut session.phases[idx], PhaseState::Waiting)?;
        set_workflow(session, WorkflowState::WaitingForAgent)?;
        self.persist(session)?;
        let phase = &session.phases[idx];
        info!(%phase_id, tasks = phase.tasks.len(), attempt = phase.retry_count, "phase armed");
        self.activity.push(
            ActivityLevel::Info,
            format!(
                "Phase {phase_id} started ({} tasks: {})",
                phase.tasks.len(),
                phase.task_ids().join(", ")
            ),
        );
        self.ensure_monitor();
        Ok(())
    }

    /// Write the command artifacts and arm the handshake for `phases[idx]`.
    fn emit_phase(&self, session: &Session, idx: usize) -> anyhow::Result<()> {
        let phase = &session.phases[idx];
        let previous_error = previous_error(session, phase);
        self.collaborators
            .emitter
            .emit(&CommandRequest {
                paths: &self.ctx.paths,
                session_id: &session.id,
                phase,
                phase_number: idx + 1,
                total_phases: session.phases.len(),
                previous_error,
            })
            .context("emit command artifacts")?;
        let record = StatusRecord::running(&phase.id, session.completed_phase_ids());
        self.write_handshake_raw(&record)
            .context("arm status record")
    }

    /// Move to `error` for failures that happen after a phase resolved.
    fn fail_workflow(&self, session: &mut Session, err: CascadeError) -> OpResult<()> {
        if matches!(
            err,
            CascadeError::SessionPersistenceFailure(_) | CascadeError::PhaseArtifactWriteFailure { .. }
        ) {
            return Err(err);
        }
        if session.state.can_transition_to(WorkflowState::Error) {
            session.record_error(None, err.to_string());
            set_workflow(session, WorkflowState::Error)?;
            self.persist(session)?;
        }
        Err(err)
    }

    fn persist(&self, session: &mut Session) -> OpResult<()> {
        session.updated_at = Utc::now();
        write_session(&self.ctx.paths.session_path, session).map_err(|err| {
            error!(err = %format!("{err:#}"), "session persistence failed");
            CascadeError::SessionPersistenceFailure(err)
        })
    }

    fn write_handshake(&self, record: &StatusRecord) -> OpResult<()> {
        self.write_handshake_raw(record)
            .context("write status record")
            .map_err(CascadeError::Internal)
    }

    /// Write the record and mark it observed so the monitor does not dispatch it.
    fn write_handshake_raw(&self, record: &StatusRecord) -> anyhow::Result<()> {
        let mut watcher = self.lock_watcher();
        let written = write_status(&self.ctx.paths.handshake_path, record)?;
        watcher.remember(written.as_bytes());
        Ok(())
    }

    fn ensure_monitor(&self) {
        if self.mode == MonitorMode::Manual {
            return;
        }
        let mut slot = self.lock_monitor();
        if slot.as_ref().is_some_and(MonitorHandle::is_running) {
            return;
        }
        match monitor::spawn(self.this.clone(), self.config().poll_interval()) {
            Ok(handle) => *slot = Some(handle),
            Err(err) => {
                error!(err = %err, "failed to start monitor thread");
                self.activity
                    .push(ActivityLevel::Error, format!("Monitor failed to start: {err}"));
            }
        }
    }

    fn lock_session(&self) -> MutexGuard<'_, Session> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_watcher(&self) -> MutexGuard<'_, HandshakeWatcher> {
        self.watcher.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_monitor(&self) -> MutexGuard<'_, Option<MonitorHandle>> {
        self.monitor.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn set_workflow(session: &mut Session, to: WorkflowState) -> OpResult<()> {
    let from = session.state;
    if !from.can_transition_to(to) {
        return Err(CascadeError::InvalidTransition { from, to });
    }
    debug!(%from, %to, "workflow transition");
    session.state = to;
    Ok(())
}

fn set_phase(phase: &mut Phase, to: PhaseState) -> OpResult<()> {
    let from = phase.state;
    if !from.can_transition_to(to) {
        return Err(CascadeError::InvalidPhaseTransition {
            phase_id: phase.id.clone(),
            from,
            to,
        });
    }
    debug!(phase_id = %phase.id, %from, %to, "phase transition");
    phase.state = to;
    Ok(())
}

fn phase_index(session: &Session, phase_id: &str) -> OpResult<usize> {
    session
        .phase_index(phase_id)
        .ok_or_else(|| CascadeError::PhaseNotFound(phase_id.to_string()))
}

fn ensure_startable(session: &Session) -> OpResult<()> {
    if session.phases.is_empty() {
        return Err(CascadeError::invalid_state(
            "no phases to run; analyze a plan first",
        ));
    }
    if !matches!(
        session.state,
        WorkflowState::Ready | WorkflowState::Running | WorkflowState::Paused | WorkflowState::Error
    ) {
        return Err(CascadeError::invalid_state(format!(
            "cannot start while {}",
            session.state
        )));
    }
    Ok(())
}

/// Index of the active phase if `record` applies to it.
///
/// A record without `current_phase` applies to the active phase; one naming a
/// different phase is ignored.
fn accept_record(session: &Session, record: &StatusRecord) -> Option<usize> {
    if session.state != WorkflowState::WaitingForAgent {
        debug!(state = %session.state, "status record ignored outside waiting_for_agent");
        return None;
    }
    let idx = session.current_phase_index?;
    let phase = session.phases.get(idx)?;
    if phase.state != PhaseState::Waiting {
        return None;
    }
    match record.current_phase.as_deref() {
        Some(named) if named != phase.id => {
            warn!(named, active = %phase.id, "status record names a different phase; ignored");
            None
        }
        _ => Some(idx),
    }
}

fn ticket_for(session: &Session, idx: usize) -> Ticket {
    let phase = &session.phases[idx];
    Ticket {
        session_id: session.id.clone(),
        phase_idx: idx,
        phase_id: phase.id.clone(),
        task_ids: phase.tasks.iter().map(|task| task.id.clone()).collect(),
        attempt: phase.retry_count,
    }
}

fn still_current(session: &Session, ticket: &Ticket, expected: PhaseState) -> bool {
    session.id == ticket.session_id
        && session
            .phases
            .get(ticket.phase_idx)
            .is_some_and(|phase| phase.id == ticket.phase_id && phase.state == expected)
}

/// Plan text, or `None` when the file does not exist.
fn read_plan(path: &Path) -> OpResult<Option<String>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(Some(text)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(anyhow!(err)
            .context(format!("read plan {}", path.display()))
            .into()),
    }
}

/// Most recent recorded failure for a phase that is being retried.
fn previous_error<'a>(session: &'a Session, phase: &Phase) -> Option<&'a str> {
    if phase.retry_count == 0 {
        return None;
    }
    session
        .errors
        .iter()
        .rev()
        .find(|record| record.phase_id.as_deref() == Some(phase.id.as_str()))
        .map(|record| record.message.as_str())
}

/// Repair states that only exist while this process is mid-operation.
///
/// Returns true when the session was changed.
fn recover_interrupted(session: &mut Session) -> bool {
    let active = session.current_phase_index;
    match session.state {
        WorkflowState::Testing => {
            // Tests were cut off; wait for the agent's record again.
            if let Some(phase) = active.and_then(|idx| session.phases.get_mut(idx))
                && phase.state == PhaseState::Testing
            {
                phase.state = PhaseState::Waiting;
            }
            session.state = WorkflowState::WaitingForAgent;
            true
        }
        WorkflowState::Analyzing => {
            session.state = if session.phases.is_empty() {
                WorkflowState::Idle
            } else {
                WorkflowState::Ready
            };
            true
        }
        WorkflowState::Running => match active.and_then(|idx| session.phases.get_mut(idx)) {
            Some(phase) if phase.state == PhaseState::Running => {
                // Arming was interrupted; the artifacts are re-emitted on start.
                phase.state = PhaseState::Pending;
                true
            }
            _ => false,
        },
        _ => false,
    }
}
