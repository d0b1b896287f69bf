//! Task, Phase, and Session entities persisted in `.cascade/session.json`.

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::types::{PhaseState, TestOutcome, WorkflowState};

/// Smallest unit of planned work, extracted from a `### Task A1: ...` header.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    pub id: String,
    pub title: String,
    /// Header line through the end of the task body.
    pub content: String,
    /// Letter from the plan author's grouping (`A` for `A1`).
    pub phase_letter: char,
    /// 1-based, inclusive.
    pub line_start: usize,
    /// 1-based, inclusive.
    pub line_end: usize,
    pub estimated_tokens: usize,
}

/// Result of the test command run after a phase completes.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestResult {
    pub outcome: TestOutcome,
    pub summary: String,
    pub finished_at: DateTime<Utc>,
}

/// A batch of tasks executed as one unit against the agent.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Phase {
    pub id: String,
    pub tasks: Vec<Task>,
    pub state: PhaseState,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub test_result: Option<TestResult>,
    pub files_modified: Vec<String>,
    pub retry_count: u32,
    /// Commit created after this phase completed, if any.
    pub commit: Option<String>,
}

impl Phase {
    pub fn new(id: impl Into<String>, tasks: Vec<Task>) -> Self {
        Self {
            id: id.into(),
            tasks,
            state: PhaseState::Pending,
            started_at: None,
            completed_at: None,
            last_error: None,
            test_result: None,
            files_modified: Vec::new(),
            retry_count: 0,
            commit: None,
        }
    }

    pub fn estimated_tokens(&self) -> usize {
        self.tasks.iter().map(|task| task.estimated_tokens).sum()
    }

    pub fn task_ids(&self) -> Vec<&str> {
        self.tasks.iter().map(|task| task.id.as_str()).collect()
    }
}

/// Entry in the session's error history.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorRecord {
    pub phase_id: Option<String>,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Full persisted state of one workflow run.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub project_path: PathBuf,
    pub plan_path: PathBuf,
    pub phases: Vec<Phase>,
    pub current_phase_index: Option<usize>,
    pub state: WorkflowState,
    pub paused: bool,
    pub total_tasks: usize,
    pub completed_tasks: usize,
    pub errors: Vec<ErrorRecord>,
    pub commits: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// Fresh, empty session with a newly generated id.
    pub fn new(project_path: impl Into<PathBuf>, plan_path: impl Into<PathBuf>) -> Self {
        let now = Utc::now();
        Self {
            id: generate_session_id(now),
            created_at: now,
            project_path: project_path.into(),
            plan_path: plan_path.into(),
            phases: Vec::new(),
            current_phase_index: None,
            state: WorkflowState::Idle,
            paused: false,
            total_tasks: 0,
            completed_tasks: 0,
            errors: Vec::new(),
            commits: Vec::new(),
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    pub fn phase_index(&self, phase_id: &str) -> Option<usize> {
        self.phases.iter().position(|phase| phase.id == phase_id)
    }

    /// Files reported across all phases, sorted and deduplicated.
    pub fn modified_files(&self) -> Vec<String> {
        let files: BTreeSet<&str> = self
            .phases
            .iter()
            .flat_map(|phase| phase.files_modified.iter().map(String::as_str))
            .collect();
        files.into_iter().map(str::to_string).collect()
    }

    pub fn current_phase(&self) -> Option<&Phase> {
        self.current_phase_index.and_then(|idx| self.phases.get(idx))
    }

    pub fn completed_phase_ids(&self) -> Vec<String> {
        self.phases
            .iter()
            .filter(|phase| phase.state == PhaseState::Completed)
            .map(|phase| phase.id.clone())
            .collect()
    }

    /// Recount `completed_tasks` from phase states.
    pub fn recount_completed_tasks(&mut self) {
        self.completed_tasks = self
            .phases
            .iter()
            .filter(|phase| phase.state == PhaseState::Completed)
            .map(|phase| phase.tasks.len())
            .sum();
    }

    pub fn record_error(&mut self, phase_id: Option<&str>, message: impl Into<String>) {
        self.errors.push(ErrorRecord {
            phase_id: phase_id.map(str::to_string),
            message: message.into(),
            at: Utc::now(),
        });
    }
}

fn generate_session_id(now: DateTime<Utc>) -> String {
    format!(
        "session-{}-{:04x}",
        now.format("%Y%m%d_%H%M%S"),
        rand::random::<u16>()
    )
}
