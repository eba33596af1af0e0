/// Execution trigger and audit trail endpoints
///
/// Manual triggers go through the same compare-and-set dispatch path as the
/// periodic sweep, so a manual trigger racing the scheduler can never start
/// a second concurrent execution. Failed executions stay queryable with
/// their error payload and the node they died at.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::api::AppState;
use crate::error::EngineError;
use crate::workflow::execution::Execution;

type ApiError = (StatusCode, Json<Value>);

fn error_body(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

/// Create execution routes
pub fn create_execution_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows/{id}/execute", post(trigger_execution))
        .route("/api/workflows/{id}/executions", get(list_executions))
        .route("/api/executions/{id}", get(get_execution))
        .route("/api/scheduler/sweep", post(run_sweep))
}

/// POST /api/workflows/{id}/execute: synchronous manual trigger
async fn trigger_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Execution>, ApiError> {
    match state.scheduler.dispatch(id).await {
        Ok(execution) => Ok(Json(execution)),
        Err(e) => Err(map_engine_error(e)),
    }
}

/// GET /api/workflows/{id}/executions
async fn list_executions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let executions = state
        .storage
        .list_executions(id)
        .await
        .map_err(|e| error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(json!({ "executions": executions })))
}

/// GET /api/executions/{id}
async fn get_execution(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Execution>, ApiError> {
    match state.storage.get_execution(id).await {
        Ok(Some(execution)) => Ok(Json(execution)),
        Ok(None) => Err(error_body(StatusCode::NOT_FOUND, "execution not found")),
        Err(e) => Err(error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

/// POST /api/scheduler/sweep: run one trigger sweep immediately. Fired
/// workflows are dispatched in the background, same as the periodic sweep.
async fn run_sweep(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let fired = state
        .scheduler
        .sweep()
        .await
        .map_err(|e| error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(json!({ "triggered": fired })))
}

fn map_engine_error(e: EngineError) -> ApiError {
    let status = match &e {
        EngineError::NotFound(_) => StatusCode::NOT_FOUND,
        EngineError::AlreadyRunning(_) | EngineError::NotDispatchable(_) => StatusCode::CONFLICT,
        EngineError::Grant(_) => StatusCode::FORBIDDEN,
        EngineError::Structural(_) | EngineError::NodeConfig { .. } | EngineError::Resolution(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_body(status, e.to_string())
}
