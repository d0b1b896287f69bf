//! Typed control operations shared by the CLI and the HTTP server.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::controller::Controller;
use crate::error::CascadeError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ControlOp {
    /// Analyze `plan_text`, or the session's plan file when absent.
    Analyze {
        #[serde(default)]
        plan_text: Option<String>,
    },
    Start,
    StartPhase {
        phase_id: String,
    },
    Skip {
        phase_id: String,
    },
    Retry {
        phase_id: String,
    },
    /// Report the waiting phase complete on the agent's behalf.
    CompletePhase {
        phase_id: String,
        #[serde(default)]
        files_modified: Vec<String>,
    },
    Pause,
    Resume,
    Reset,
    Status,
}

impl ControlOp {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Analyze { .. } => "analyze",
            Self::Start => "start",
            Self::StartPhase { .. } => "start_phase",
            Self::Skip { .. } => "skip",
            Self::Retry { .. } => "retry",
            Self::CompletePhase { .. } => "complete_phase",
            Self::Pause => "pause",
            Self::Resume => "resume",
            Self::Reset => "reset",
            Self::Status => "status",
        }
    }
}

/// `{ success, data?, error?, kind? }`; for control ops `data` is the session after the op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl ControlResponse {
    pub fn ok(data: &impl Serialize) -> Self {
        match serde_json::to_value(data) {
            Ok(data) => Self {
                success: true,
                data: Some(data),
                error: None,
                kind: None,
            },
            Err(err) => Self::failure(&CascadeError::Internal(err.into())),
        }
    }

    pub fn failure(err: &CascadeError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(err.to_string()),
            kind: Some(err.kind().to_string()),
        }
    }
}

/// Run `op` against `controller`. Blocks for as long as the operation does.
pub fn dispatch(controller: &Controller, op: ControlOp) -> ControlResponse {
    let name = op.name();
    let result = match op {
        ControlOp::Analyze { plan_text: Some(text) } => controller.analyze(&text),
        ControlOp::Analyze { plan_text: None } => controller.analyze_plan_file(),
        ControlOp::Start => controller.start(),
        ControlOp::StartPhase { phase_id } => controller.start_phase(&phase_id),
        ControlOp::Skip { phase_id } => controller.skip(&phase_id),
        ControlOp::Retry { phase_id } => controller.retry(&phase_id),
        ControlOp::CompletePhase {
            phase_id,
            files_modified,
        } => controller.complete_phase(&phase_id, files_modified),
        ControlOp::Pause => controller.pause(),
        ControlOp::Resume => controller.resume(),
        ControlOp::Reset => controller.reset(),
        ControlOp::Status => Ok(controller.status()),
    };
    match result {
        Ok(session) => {
            info!(op = name, state = %session.state, "control op succeeded");
            ControlResponse::ok(&session)
        }
        Err(err) => {
            warn!(op = name, kind = err.kind(), err = %err, "control op failed");
            ControlResponse::failure(&err)
        }
    }
}
