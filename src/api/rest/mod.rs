pub mod locations;
pub mod reconcile;
pub mod riders;
pub mod tasks;
pub mod ws;

use std::sync::Arc;

use axum::async_trait;
use axum::extract::{FromRequestParts, State};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::Serialize;
use tower_http::cors::CorsLayer;

use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(riders::router())
        .merge(tasks::router())
        .merge(locations::router())
        .merge(reconcile::router())
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/ws", get(ws::ws_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Actor identity from the `x-actor` header, attached to every
/// mutating call for audit logging. Authentication itself lives in the
/// excluded outer layer.
pub struct Actor(pub Option<String>);

impl Actor {
    pub fn or_system(self) -> String {
        self.0.unwrap_or_else(|| "system".to_string())
    }
}

#[async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Actor {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let actor = parts
            .headers
            .get("x-actor")
            .and_then(|v| v.to_str().ok())
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty());
        Ok(Actor(actor))
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    riders: usize,
    tasks: usize,
    packages: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> Result<Json<HealthResponse>, crate::error::AppError> {
    Ok(Json(HealthResponse {
        status: "ok",
        riders: state.dispatch.list_riders().await?.len(),
        tasks: state.dispatch.task_count().await?,
        packages: state.ledger.list_packages().await?.len(),
    }))
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err).into_response(),
    }
}
