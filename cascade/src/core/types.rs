//! Closed state enumerations for workflows, phases, and the handshake record.
//!
//! Every state change in the controller goes through `can_transition_to`, so an
//! illegal edge is rejected at the boundary instead of being written to disk.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Workflow-level state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    /// No analyzed plan.
    Idle,
    /// Plan extraction and splitting in progress.
    Analyzing,
    /// Phases exist and the workflow has not been started.
    Ready,
    /// Selecting or arming the next phase.
    Running,
    /// A phase is armed; waiting on the agent's handshake write.
    WaitingForAgent,
    /// Agent reported completion; tests and commit are running.
    Testing,
    /// The active phase resolved while paused; nothing cascades until resume.
    Paused,
    /// A phase failed or an internal error occurred.
    Error,
    /// All phases are completed or skipped.
    Completed,
}

impl WorkflowState {
    /// Legal workflow transitions.
    ///
    /// ```text
    /// idle → analyzing
    /// ready → analyzing | running
    /// analyzing → ready | idle
    /// running → waiting_for_agent | paused | error | completed
    /// waiting_for_agent → testing | error
    /// testing → running | error
    /// paused → running
    /// error → running | ready
    /// ```
    pub fn can_transition_to(self, to: WorkflowState) -> bool {
        matches!(
            (self, to),
            (Self::Idle, Self::Analyzing)
                | (Self::Ready, Self::Analyzing)
                | (Self::Ready, Self::Running)
                | (Self::Analyzing, Self::Ready)
                | (Self::Analyzing, Self::Idle)
                | (Self::Running, Self::WaitingForAgent)
                | (Self::Running, Self::Paused)
                | (Self::Running, Self::Error)
                | (Self::Running, Self::Completed)
                | (Self::WaitingForAgent, Self::Testing)
                | (Self::WaitingForAgent, Self::Error)
                | (Self::Testing, Self::Running)
                | (Self::Testing, Self::Error)
                | (Self::Paused, Self::Running)
                | (Self::Error, Self::Running)
                | (Self::Error, Self::Ready)
        )
    }

    /// States in which a phase may be in flight or awaiting a decision.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            Self::Running | Self::WaitingForAgent | Self::Testing | Self::Error
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Analyzing => "analyzing",
            Self::Ready => "ready",
            Self::Running => "running",
            Self::WaitingForAgent => "waiting_for_agent",
            Self::Testing => "testing",
            Self::Paused => "paused",
            Self::Error => "error",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle state of a single phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseState {
    Pending,
    Running,
    Waiting,
    Testing,
    Completed,
    Error,
    Skipped,
}

impl PhaseState {
    /// Legal phase transitions.
    ///
    /// ```text
    /// pending → running | skipped
    /// running → waiting | error
    /// waiting → testing | error
    /// testing → completed | error
    /// error → pending | skipped
    /// ```
    pub fn can_transition_to(self, to: PhaseState) -> bool {
        matches!(
            (self, to),
            (Self::Pending, Self::Running)
                | (Self::Pending, Self::Skipped)
                | (Self::Running, Self::Waiting)
                | (Self::Running, Self::Error)
                | (Self::Waiting, Self::Testing)
                | (Self::Waiting, Self::Error)
                | (Self::Testing, Self::Completed)
                | (Self::Testing, Self::Error)
                | (Self::Error, Self::Pending)
                | (Self::Error, Self::Skipped)
        )
    }

    /// Completed or skipped phases never change again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Skipped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Waiting => "waiting",
            Self::Testing => "testing",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for PhaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// State field of the handshake record shared with the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HandshakeState {
    Idle,
    Running,
    Completed,
    Error,
}

/// Outcome of the configured test command for a completed phase.
///
/// Stored on the phase for reporting only; it never drives state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestOutcome {
    Pass,
    Fail,
    /// Tests disabled or not configured.
    Skipped,
}
