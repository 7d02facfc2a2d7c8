use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::api::rest::Actor;
use crate::engine::dispatch;
use crate::error::AppError;
use crate::models::task::{TaskAssignment, TaskDecision, TaskKind};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tasks", post(assign_task).get(list_tasks))
        .route("/tasks/:id/respond", post(respond_to_task).put(respond_to_task))
        .route("/tasks/:id/complete", post(complete_task))
}

#[derive(Deserialize)]
pub struct AssignTaskRequest {
    pub rider_id: String,
    pub kind: TaskKind,
    pub tracking_no: String,
    #[serde(default)]
    pub destination: String,
    #[serde(default = "default_estimated_minutes")]
    pub estimated_minutes: u32,
}

fn default_estimated_minutes() -> u32 {
    30
}

#[derive(Deserialize)]
pub struct RespondRequest {
    pub rider_id: String,
    pub decision: TaskDecision,
}

#[derive(Deserialize)]
pub struct CompleteRequest {
    pub rider_id: String,
}

#[derive(Deserialize)]
pub struct TaskListQuery {
    pub rider_id: String,
}

async fn assign_task(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(payload): Json<AssignTaskRequest>,
) -> Result<Json<Value>, AppError> {
    if payload.tracking_no.trim().is_empty() {
        return Err(AppError::BadRequest("tracking_no cannot be empty".to_string()));
    }

    let task = dispatch::assign_task(
        &state,
        &payload.rider_id,
        payload.kind,
        payload.tracking_no,
        payload.destination,
        payload.estimated_minutes,
        actor.or_system(),
    )
    .await?;

    Ok(Json(json!({
        "success": true,
        "task_id": task.id,
        "assignment": task,
    })))
}

async fn respond_to_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<RespondRequest>,
) -> Result<Json<Value>, AppError> {
    let task =
        dispatch::respond_to_task(&state, id, &payload.rider_id, payload.decision).await?;
    Ok(Json(json!({ "success": true, "assignment": task })))
}

async fn complete_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<CompleteRequest>,
) -> Result<Json<Value>, AppError> {
    let result = dispatch::complete_task(&state, id, &payload.rider_id).await?;
    Ok(Json(json!({
        "success": true,
        "assignment": result.assignment,
        "ledger": result.ledger,
        "already_completed": result.already_completed,
        "queued_for_reconciliation": result.queued_for_reconciliation,
    })))
}

async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TaskListQuery>,
) -> Result<Json<Vec<TaskAssignment>>, AppError> {
    Ok(Json(state.dispatch.tasks_for_rider(&query.rider_id).await?))
}
