use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::post;
use axum::Json;
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::engine::ingest::{self, LocationReport};
use crate::error::AppError;
use crate::models::location::LocationView;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/locations", post(report_location).get(get_locations))
}

#[derive(Deserialize)]
pub struct LocationQuery {
    /// Comma-separated rider ids; all known riders when absent.
    pub rider_ids: Option<String>,
}

async fn report_location(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LocationReport>,
) -> Result<Json<Value>, AppError> {
    let record = ingest::report_location(&state, payload).await?;
    Ok(Json(json!({ "success": true, "location": record })))
}

async fn get_locations(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LocationQuery>,
) -> Result<Json<Vec<LocationView>>, AppError> {
    let rider_ids = query.rider_ids.map(|raw| {
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect::<Vec<_>>()
    });

    Ok(Json(ingest::get_locations(&state, rider_ids).await?))
}
