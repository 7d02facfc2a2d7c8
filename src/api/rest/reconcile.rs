use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde_json::{json, Value};

use crate::api::rest::Actor;
use crate::engine::reconcile::{self, AuditReport, HealOptions};
use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/reconcile/audit", get(audit))
        .route("/reconcile/heal", post(heal))
}

async fn audit(State(state): State<Arc<AppState>>) -> Result<Json<AuditReport>, AppError> {
    Ok(Json(reconcile::audit(&state).await?))
}

/// Corrective writes require a named actor; who is allowed to call
/// this is the outer auth layer's problem, but the audit trail needs
/// an identity.
async fn heal(
    State(state): State<Arc<AppState>>,
    actor: Actor,
    Json(options): Json<HealOptions>,
) -> Result<Json<Value>, AppError> {
    let Some(actor) = actor.0 else {
        return Err(AppError::Forbidden(
            "heal requires an x-actor identity".to_string(),
        ));
    };

    let report = reconcile::heal(&state, options, &actor).await?;
    Ok(Json(json!({ "success": true, "applied": report })))
}
