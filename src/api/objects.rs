/// Workflow object REST API endpoints
///
/// Submission, inspection and operator restarts of workflow objects, plus the
/// review endpoints that render and resolve halted actions.

use crate::{
    api::{ApiError, AppState},
    runtime::{
        actions::{RenderedAction, ResolveOutcome, ResolveRequest},
        engine::RestartPoint,
        scheduler::{Dispatch, DispatchOutcome},
    },
    service::SubmitOutcome,
    workflow::types::{NewObject, ObjectStatus, WorkflowObject},
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::{json, Value};

/// `?dispatch=inline|deferred`, deferred when absent
#[derive(Debug, Default, Deserialize)]
pub struct DispatchQuery {
    pub dispatch: Option<Dispatch>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct RestartRequest {
    /// Defaults to re-running the task at the saved position
    pub restart: Option<RestartPoint>,
    pub dispatch: Option<Dispatch>,
}

/// Create object management routes
pub fn create_object_routes() -> Router<AppState> {
    Router::new()
        .route("/api/objects", post(submit_object).get(list_objects))
        .route("/api/objects/{id}", get(get_object))
        .route("/api/objects/{id}/action", get(get_action))
        .route("/api/objects/{id}/resolve", post(resolve_action))
        .route("/api/objects/{id}/restart", post(restart_object))
        .route("/api/objects/{id}/audit", get(get_audit))
        .route("/api/scheduler/stats", get(scheduler_stats))
}

fn accepted_or_ok(outcome: &DispatchOutcome) -> StatusCode {
    match outcome {
        DispatchOutcome::Queued => StatusCode::ACCEPTED,
        _ => StatusCode::OK,
    }
}

/// Create an object and start its workflow
///
/// POST /api/objects
/// Body: { "workflow_kind": "article", "data": {...}, "parent_id": null }
async fn submit_object(
    State(state): State<AppState>,
    Query(query): Query<DispatchQuery>,
    Json(payload): Json<NewObject>,
) -> Result<(StatusCode, Json<SubmitOutcome>), ApiError> {
    let dispatch = query.dispatch.unwrap_or(Dispatch::Deferred);
    let outcome = state.holdingpen.submit(payload, dispatch).await?;
    Ok((accepted_or_ok(&outcome.continuation), Json(outcome)))
}

/// List objects, newest first
///
/// GET /api/objects?status=ERROR
async fn list_objects(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Value>, ApiError> {
    let status = query
        .status
        .as_deref()
        .map(str::parse::<ObjectStatus>)
        .transpose()
        .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e))?;

    let objects = state
        .holdingpen
        .storage
        .list(status)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({ "objects": objects })))
}

/// GET /api/objects/{id}
async fn get_object(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<WorkflowObject>, ApiError> {
    match state.holdingpen.storage.get(id).await {
        Ok(Some(object)) => Ok(Json(object)),
        Ok(None) => Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("object {} not found", id),
        )),
        Err(e) => Err(ApiError::internal(e)),
    }
}

/// Render the pending action of a halted object
///
/// GET /api/objects/{id}/action
async fn get_action(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<RenderedAction>, ApiError> {
    Ok(Json(state.holdingpen.actions.render(id).await?))
}

/// Resolve a halted action
///
/// POST /api/objects/{id}/resolve
/// Body: { "action": "hep_approval", "user_id": "...", "decision_value": "accept", "reason": "..." }
/// Returns 202 when the continuation is queued, 200 when it ran inline
async fn resolve_action(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<ResolveRequest>,
) -> Result<(StatusCode, Json<ResolveOutcome>), ApiError> {
    let outcome = state.holdingpen.actions.resolve(id, payload).await?;
    Ok((accepted_or_ok(&outcome.continuation), Json(outcome)))
}

/// Operator restart
///
/// POST /api/objects/{id}/restart
/// Body: { "restart": "restart_current" | "continue_next" | "from_beginning" }
async fn restart_object(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<RestartRequest>,
) -> Result<(StatusCode, Json<DispatchOutcome>), ApiError> {
    let restart = payload.restart.unwrap_or(RestartPoint::RestartCurrent);
    let dispatch = payload.dispatch.unwrap_or(Dispatch::Deferred);

    let outcome = state.holdingpen.restart(id, restart, dispatch).await?;
    Ok((accepted_or_ok(&outcome), Json(outcome)))
}

/// GET /api/objects/{id}/audit
async fn get_audit(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let entries = state
        .holdingpen
        .audit
        .entries_for(id)
        .await
        .map_err(ApiError::internal)?;
    Ok(Json(json!({ "entries": entries })))
}

/// GET /api/scheduler/stats
async fn scheduler_stats(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "stats": state.holdingpen.scheduler.stats(),
        "in_flight": state.holdingpen.scheduler.in_flight(),
    }))
}
