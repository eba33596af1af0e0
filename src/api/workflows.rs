/// Workflow management REST API endpoints
///
/// CRUD plus lifecycle operations (activate/deactivate). Graphs are
/// validated at creation time (structural problems are rejected here, not
/// discovered mid-execution) and every change hot-reloads the registry.
/// Creation registers the workflow's trigger with the onchain automation
/// registry; deletion deregisters it first and warns about orphans.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post, put},
    Router,
};
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::api::AppState;
use crate::provider::types::UpkeepRegistration;
use crate::workflow::registry::CompiledWorkflow;
use crate::workflow::types::{
    CompareOp, Edge, Node, TriggerSpec, TriggerType, Workflow, WorkflowStatus,
};

/// Request body for workflow creation
#[derive(Debug, Deserialize)]
pub struct CreateWorkflowRequest {
    pub user_id: Uuid,
    pub sca_address: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub trigger_type: TriggerType,
    pub trigger_config: Value,
    pub nodes: Vec<Node>,
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub max_retries: Option<i32>,
}

/// Request body for workflow updates (simple property updates only; graph
/// changes go through delete + recreate to keep upkeep registration honest)
#[derive(Debug, Deserialize)]
pub struct UpdateWorkflowRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub user_id: Option<Uuid>,
}

type ApiError = (StatusCode, Json<Value>);

fn error_body(status: StatusCode, message: impl Into<String>) -> ApiError {
    (status, Json(json!({ "error": message.into() })))
}

/// Create the workflow management routes
pub fn create_workflow_routes() -> Router<AppState> {
    Router::new()
        .route("/api/workflows", post(create_workflow))
        .route("/api/workflows", get(list_workflows))
        .route("/api/workflows/{id}", get(get_workflow))
        .route("/api/workflows/{id}", put(update_workflow))
        .route("/api/workflows/{id}", delete(delete_workflow))
        .route("/api/workflows/{id}/activate", post(activate_workflow))
        .route("/api/workflows/{id}/deactivate", post(deactivate_workflow))
}

/// POST /api/workflows
async fn create_workflow(
    State(state): State<AppState>,
    Json(payload): Json<CreateWorkflowRequest>,
) -> Result<(StatusCode, Json<Workflow>), ApiError> {
    if payload.name.is_empty() {
        return Err(error_body(StatusCode::BAD_REQUEST, "name must not be empty"));
    }

    let mut workflow = Workflow::new(
        payload.user_id,
        payload.sca_address,
        payload.name,
        payload.trigger_type,
        payload.trigger_config,
        payload.nodes,
        payload.edges,
    );
    workflow.description = payload.description;
    if let Some(max_retries) = payload.max_retries {
        workflow.max_retries = max_retries;
    }

    // Validate graph and trigger once, at the boundary.
    let compiled = CompiledWorkflow::compile(workflow.clone())
        .map_err(|e| error_body(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;

    initialize_schedule(&mut workflow, &compiled.trigger);

    // Price triggers are mirrored into the onchain automation registry so
    // the trigger also fires without our poller. Registration failure
    // leaves the workflow inactive with the error recorded.
    if let TriggerSpec::Price(cfg) = &compiled.trigger {
        let registration = UpkeepRegistration {
            workflow_id: workflow.id.to_string(),
            trigger_source: cfg.asset.clone(),
            trigger_direction: match cfg.operator {
                CompareOp::Gt | CompareOp::Ge => 0,
                _ => 1,
            },
            trigger_target_value: (cfg.value * 1e8) as i128,
        };

        match state.provider.register_upkeep(&registration).await {
            Ok(receipt) => {
                tracing::info!(
                    "🔗 Workflow {} registered onchain: upkeep {}, tx {}",
                    workflow.id,
                    receipt.upkeep_id,
                    receipt.transaction_hash
                );
                workflow.upkeep_id = Some(receipt.upkeep_id);
                workflow.registration_tx_hash = Some(receipt.transaction_hash);
                workflow.is_active = true;
                workflow.status = WorkflowStatus::Active;
            }
            Err(e) => {
                tracing::error!("❌ Onchain registration failed for {}: {}", workflow.id, e);
                workflow.last_error_message = Some(e.to_string());
                workflow.last_error_at = Some(Utc::now());
            }
        }
    } else {
        workflow.is_active = true;
        workflow.status = WorkflowStatus::Active;
    }

    state
        .storage
        .save_workflow(&workflow)
        .await
        .map_err(|e| error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    state
        .registry
        .reload_workflow(workflow.id)
        .await
        .map_err(|e| error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    tracing::info!("🔥 Created workflow {} ({})", workflow.id, workflow.name);
    Ok((StatusCode::CREATED, Json(workflow)))
}

/// GET /api/workflows?user_id=...
async fn list_workflows(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let workflows = state
        .storage
        .list_workflows(query.user_id)
        .await
        .map_err(|e| error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(json!({ "workflows": workflows })))
}

/// GET /api/workflows/{id}
async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Workflow>, ApiError> {
    match state.storage.get_workflow(id).await {
        Ok(Some(workflow)) => Ok(Json(workflow)),
        Ok(None) => Err(error_body(StatusCode::NOT_FOUND, "workflow not found")),
        Err(e) => Err(error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

/// PUT /api/workflows/{id}
async fn update_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateWorkflowRequest>,
) -> Result<Json<Workflow>, ApiError> {
    let mut workflow = state
        .storage
        .get_workflow(id)
        .await
        .map_err(|e| error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or_else(|| error_body(StatusCode::NOT_FOUND, "workflow not found"))?;

    if let Some(name) = payload.name {
        if name.is_empty() {
            return Err(error_body(StatusCode::BAD_REQUEST, "name must not be empty"));
        }
        workflow.name = name;
    }
    if let Some(description) = payload.description {
        workflow.description = Some(description);
    }
    workflow.updated_at = Utc::now();

    state
        .storage
        .save_workflow(&workflow)
        .await
        .map_err(|e| error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    state
        .registry
        .reload_workflow(workflow.id)
        .await
        .map_err(|e| error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok(Json(workflow))
}

/// DELETE /api/workflows/{id}
///
/// Deregisters the upkeep first; a failure there does not block deletion
/// but is logged loudly since the upkeep may keep consuming resources.
async fn delete_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let workflow = state
        .storage
        .get_workflow(id)
        .await
        .map_err(|e| error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or_else(|| error_body(StatusCode::NOT_FOUND, "workflow not found"))?;

    if let Some(upkeep_id) = &workflow.upkeep_id {
        if let Err(e) = state.provider.deregister_upkeep(upkeep_id).await {
            tracing::warn!(
                "⚠️ ORPHANED UPKEEP: workflow {} deleted but upkeep {} may still be active onchain: {}",
                id,
                upkeep_id,
                e
            );
        }
    }

    state.registry.remove_workflow(id);
    let deleted = state
        .storage
        .delete_workflow(id)
        .await
        .map_err(|e| error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    if deleted {
        tracing::info!("🗑️ Deleted workflow {}", id);
        Ok(Json(json!({ "message": "workflow deleted" })))
    } else {
        Err(error_body(StatusCode::NOT_FOUND, "workflow not found"))
    }
}

/// POST /api/workflows/{id}/activate
async fn activate_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Workflow>, ApiError> {
    let mut workflow = state
        .storage
        .get_workflow(id)
        .await
        .map_err(|e| error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or_else(|| error_body(StatusCode::NOT_FOUND, "workflow not found"))?;

    let trigger = TriggerSpec::parse(workflow.trigger_type, &workflow.trigger_config)
        .map_err(|e| error_body(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))?;

    workflow.is_active = true;
    workflow.status = WorkflowStatus::Active;
    workflow.current_retry_count = 0;
    initialize_schedule(&mut workflow, &trigger);
    workflow.updated_at = Utc::now();

    state
        .storage
        .save_workflow(&workflow)
        .await
        .map_err(|e| error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(workflow))
}

/// POST /api/workflows/{id}/deactivate
///
/// Prevents future triggers; an in-flight execution runs to completion.
async fn deactivate_workflow(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Workflow>, ApiError> {
    let mut workflow = state
        .storage
        .get_workflow(id)
        .await
        .map_err(|e| error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or_else(|| error_body(StatusCode::NOT_FOUND, "workflow not found"))?;

    workflow.is_active = false;
    if !workflow.is_running() {
        workflow.status = WorkflowStatus::Paused;
    }
    workflow.updated_at = Utc::now();

    state
        .storage
        .save_workflow(&workflow)
        .await
        .map_err(|e| error_body(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;
    Ok(Json(workflow))
}

/// Seed next_check_at for schedule triggers so the sweep knows when the
/// workflow is due
fn initialize_schedule(workflow: &mut Workflow, trigger: &TriggerSpec) {
    if let TriggerSpec::Schedule(cfg) = trigger {
        workflow.next_check_at = match (cfg.start_at, cfg.interval_minutes) {
            (Some(start_at), _) => Some(start_at),
            (None, Some(minutes)) => Some(Utc::now() + Duration::minutes(minutes as i64)),
            (None, None) => None,
        };
    }
}
