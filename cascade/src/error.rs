//! Error taxonomy for controller operations.
//!
//! Adapters under `io` return `anyhow::Result`; the controller maps their
//! failures into one of these variants so the control surface can report a
//! stable `kind` without string matching.

use std::path::PathBuf;

use thiserror::Error;

use crate::core::types::{PhaseState, WorkflowState};

#[derive(Debug, Error)]
pub enum CascadeError {
    #[error("plan file not found: {}", .0.display())]
    PlanNotFound(PathBuf),

    #[error("no tasks parsed: the plan has no `### Task <Letter><Digits>: <Title>` headers")]
    NoTasksParsed,

    #[error("failed to write command artifact for phase {phase_id}: {source:#}")]
    PhaseArtifactWriteFailure {
        phase_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("agent reported error in phase {phase_id}: {message}")]
    AgentReportedError { phase_id: String, message: String },

    #[error("failed to persist session: {0:#}")]
    SessionPersistenceFailure(#[source] anyhow::Error),

    #[error("phase {phase_id} reached the retry ceiling ({max_retries})")]
    RetryCeilingExceeded { phase_id: String, max_retries: u32 },

    #[error("invalid workflow transition {from} -> {to}")]
    InvalidTransition {
        from: WorkflowState,
        to: WorkflowState,
    },

    #[error("invalid phase transition for {phase_id}: {from} -> {to}")]
    InvalidPhaseTransition {
        phase_id: String,
        from: PhaseState,
        to: PhaseState,
    },

    #[error("phase not found: {0}")]
    PhaseNotFound(String),

    #[error("{0}")]
    InvalidState(String),

    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl CascadeError {
    /// Stable identifier reported by the control surface.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::PlanNotFound(_) => "plan_not_found",
            Self::NoTasksParsed => "no_tasks_parsed",
            Self::PhaseArtifactWriteFailure { .. } => "phase_artifact_write_failure",
            Self::AgentReportedError { .. } => "agent_reported_error",
            Self::SessionPersistenceFailure(_) => "session_persistence_failure",
            Self::RetryCeilingExceeded { .. } => "retry_ceiling_exceeded",
            Self::InvalidTransition { .. } | Self::InvalidPhaseTransition { .. } => {
                "invalid_transition"
            }
            Self::PhaseNotFound(_) => "phase_not_found",
            Self::InvalidState(_) => "invalid_state",
            Self::Internal(_) => "internal",
        }
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState(message.into())
    }
}
