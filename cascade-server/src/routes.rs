//! HTTP route handlers for the control API.
//!
//! Every workflow POST maps 1:1 onto a [`ControlOp`] and returns the
//! `{ success, data?, error?, kind? }` body from [`dispatch`].

use axum::Router;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, post};
use cascade::control::{ControlOp, ControlResponse, dispatch};
use cascade::controller::{Controller, PlanView};
use cascade::error::CascadeError;
use cascade::io::activity::ActivityEntry;
use cascade::io::config::CascadeConfig;
use cascade::io::handshake::StatusRecord;
use cascade::session::{ErrorRecord, Phase, Session};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::error;

use crate::state::AppState;

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/session", get(get_session))
        .route("/phases", get(get_phases))
        .route("/errors", get(get_errors))
        .route("/activity", get(get_activity))
        .route("/handshake", get(get_handshake))
        .route("/plan", get(get_plan))
        .route("/modified-files", get(get_modified_files))
        .route("/config", get(get_config).post(post_config))
        .route("/analyze", post(post_analyze))
        .route("/start", post(post_start))
        .route("/pause", post(post_pause))
        .route("/resume", post(post_resume))
        .route("/reset", post(post_reset))
        .route("/phases/{id}/skip", post(post_skip))
        .route("/phases/{id}/retry", post(post_retry))
        .route("/phases/{id}/start", post(post_start_phase))
        .route("/phases/{id}/complete", post(post_complete_phase))
}

type ControlReply = (StatusCode, Json<ControlResponse>);

async fn health() -> &'static str {
    "ok"
}

async fn get_session(State(state): State<AppState>) -> Result<Json<Session>, StatusCode> {
    read(&state, Controller::status).await.map(Json)
}

async fn get_phases(State(state): State<AppState>) -> Result<Json<Vec<Phase>>, StatusCode> {
    read(&state, |controller| controller.status().phases)
        .await
        .map(Json)
}

async fn get_errors(State(state): State<AppState>) -> Result<Json<Vec<ErrorRecord>>, StatusCode> {
    read(&state, |controller| controller.status().errors)
        .await
        .map(Json)
}

async fn get_activity(
    State(state): State<AppState>,
) -> Result<Json<Vec<ActivityEntry>>, StatusCode> {
    read(&state, Controller::activity).await.map(Json)
}

/// GET /api/handshake - current status record, 404 before one exists.
async fn get_handshake(State(state): State<AppState>) -> Result<Json<StatusRecord>, StatusCode> {
    match read(&state, Controller::handshake).await? {
        Ok(Some(record)) => Ok(Json(record)),
        Ok(None) => Err(StatusCode::NOT_FOUND),
        Err(err) => {
            error!(err = %err, "failed to read status record");
            Err(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// GET /api/plan - plan text; `exists` is false when the file is missing.
async fn get_plan(State(state): State<AppState>) -> Result<Json<PlanView>, StatusCode> {
    read(&state, Controller::plan)
        .await?
        .map(Json)
        .map_err(|err| {
            error!(err = %err, "failed to read plan");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

async fn get_modified_files(State(state): State<AppState>) -> Result<Json<Vec<String>>, StatusCode> {
    read(&state, Controller::modified_files).await.map(Json)
}

async fn get_config(State(state): State<AppState>) -> Result<Json<CascadeConfig>, StatusCode> {
    read(&state, Controller::config).await.map(Json)
}

#[derive(Debug, Default, Deserialize)]
struct ConfigUpdate {
    #[serde(default)]
    auto_cascade: Option<bool>,
}

/// POST /api/config - `{ "auto_cascade": bool }`; data is the config after the update.
async fn post_config(State(state): State<AppState>, body: Bytes) -> ControlReply {
    let update: ConfigUpdate = match parse_body(&body) {
        Ok(update) => update,
        Err(reply) => return reply,
    };
    let result = read(&state, move |controller| match update.auto_cascade {
        Some(enabled) => controller.set_auto_cascade(enabled),
        None => Ok(controller.config()),
    })
    .await;
    let response = match result {
        Ok(Ok(config)) => ControlResponse::ok(&config),
        Ok(Err(err)) => ControlResponse::failure(&err),
        Err(_) => ControlResponse::failure(&CascadeError::Internal(anyhow::anyhow!(
            "config task failed"
        ))),
    };
    (status_for(&response), Json(response))
}

#[derive(Debug, Default, Deserialize)]
struct AnalyzeBody {
    #[serde(default)]
    plan_text: Option<String>,
}

/// POST /api/analyze - optional `{ "plan_text": "..." }`; without it the plan file is read.
async fn post_analyze(State(state): State<AppState>, body: Bytes) -> ControlReply {
    let body: AnalyzeBody = match parse_body(&body) {
        Ok(body) => body,
        Err(reply) => return reply,
    };
    run_op(
        state,
        ControlOp::Analyze {
            plan_text: body.plan_text,
        },
    )
    .await
}

async fn post_start(State(state): State<AppState>) -> ControlReply {
    run_op(state, ControlOp::Start).await
}

async fn post_pause(State(state): State<AppState>) -> ControlReply {
    run_op(state, ControlOp::Pause).await
}

async fn post_resume(State(state): State<AppState>) -> ControlReply {
    run_op(state, ControlOp::Resume).await
}

async fn post_reset(State(state): State<AppState>) -> ControlReply {
    run_op(state, ControlOp::Reset).await
}

async fn post_skip(State(state): State<AppState>, Path(id): Path<String>) -> ControlReply {
    run_op(state, ControlOp::Skip { phase_id: id }).await
}

async fn post_retry(State(state): State<AppState>, Path(id): Path<String>) -> ControlReply {
    run_op(state, ControlOp::Retry { phase_id: id }).await
}

async fn post_start_phase(State(state): State<AppState>, Path(id): Path<String>) -> ControlReply {
    run_op(state, ControlOp::StartPhase { phase_id: id }).await
}

#[derive(Debug, Default, Deserialize)]
struct CompleteBody {
    #[serde(default)]
    files_modified: Vec<String>,
}

/// POST /api/phases/{id}/complete - optional `{ "files_modified": [...] }`.
async fn post_complete_phase(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Bytes,
) -> ControlReply {
    let body: CompleteBody = match parse_body(&body) {
        Ok(body) => body,
        Err(reply) => return reply,
    };
    run_op(
        state,
        ControlOp::CompletePhase {
            phase_id: id,
            files_modified: body.files_modified,
        },
    )
    .await
}

/// An empty body means defaults; anything else must be valid JSON.
fn parse_body<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, ControlReply> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|err| {
        let response = ControlResponse {
            success: false,
            data: None,
            error: Some(format!("invalid request body: {err}")),
            kind: Some("invalid_request".to_string()),
        };
        (StatusCode::BAD_REQUEST, Json(response))
    })
}

/// Controller calls block on the session lock and on disk, so they leave the runtime.
async fn read<T, F>(state: &AppState, f: F) -> Result<T, StatusCode>
where
    F: FnOnce(&Controller) -> T + Send + 'static,
    T: Send + 'static,
{
    let controller = state.controller.clone();
    tokio::task::spawn_blocking(move || f(controller.as_ref()))
        .await
        .map_err(|err| {
            error!(err = %err, "controller task failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

async fn run_op(state: AppState, op: ControlOp) -> ControlReply {
    let response = match read(&state, move |controller| dispatch(controller, op)).await {
        Ok(response) => response,
        Err(_) => ControlResponse {
            success: false,
            data: None,
            error: Some("control task failed".to_string()),
            kind: Some("internal".to_string()),
        },
    };
    (status_for(&response), Json(response))
}

/// HTTP status for a control response, keyed on its error kind.
fn status_for(response: &ControlResponse) -> StatusCode {
    if response.success {
        return StatusCode::OK;
    }
    match response.kind.as_deref() {
        Some("phase_not_found" | "plan_not_found") => StatusCode::NOT_FOUND,
        Some("no_tasks_parsed") => StatusCode::UNPROCESSABLE_ENTITY,
        Some("invalid_state" | "invalid_transition" | "retry_ceiling_exceeded") => {
            StatusCode::CONFLICT
        }
        Some("invalid_request") => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
