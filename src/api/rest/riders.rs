use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::post;
use axum::Json;
use axum::Router;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::api::rest::Actor;
use crate::engine::dispatch;
use crate::error::AppError;
use crate::models::location::LocationView;
use crate::models::rider::{Rider, RiderAction};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/riders", post(create_rider).get(list_riders))
        .route("/riders/:id/action", post(force_rider_state))
}

#[derive(Deserialize)]
pub struct CreateRiderRequest {
    /// Operator-issued work id, e.g. `MDY1209251`.
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub phone: String,
}

#[derive(Deserialize)]
pub struct RiderActionRequest {
    pub action: RiderAction,
}

/// Rider as the dashboard sees it: account state plus the latest
/// location view when one exists.
#[derive(Serialize)]
struct RiderWithLocation {
    #[serde(flatten)]
    rider: Rider,
    location: Option<LocationView>,
}

async fn create_rider(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateRiderRequest>,
) -> Result<Json<Value>, AppError> {
    if payload.id.trim().is_empty() {
        return Err(AppError::BadRequest("id cannot be empty".to_string()));
    }
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }

    let rider = state
        .dispatch
        .insert_rider(Rider::new(
            payload.id.trim().to_string(),
            payload.name,
            payload.phone,
        ))
        .await?;

    Ok(Json(json!({ "success": true, "rider": rider })))
}

async fn list_riders(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<RiderWithLocation>>, AppError> {
    let now = Utc::now();
    let stale_after = Duration::seconds(state.config.stale_after_secs as i64);

    let mut out = Vec::new();
    for rider in state.dispatch.list_riders().await? {
        let location = state
            .locations
            .get_location(&rider.id)
            .await?
            .map(|rec| rec.view(now, stale_after));
        out.push(RiderWithLocation { rider, location });
    }

    Ok(Json(out))
}

async fn force_rider_state(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    actor: Actor,
    Json(payload): Json<RiderActionRequest>,
) -> Result<Json<Value>, AppError> {
    let rider =
        dispatch::force_rider_state(&state, &id, payload.action, &actor.or_system()).await?;
    Ok(Json(json!({ "success": true, "rider": rider })))
}
