use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use chrono::Utc;
use courier_core::api::rest::router;
use courier_core::config::Config;
use courier_core::models::ledger::{FinanceStatus, ManifestLink, Package, PackageStatus};
use courier_core::state::AppState;
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use tower::ServiceExt;

fn setup() -> (axum::Router, Arc<AppState>) {
    let state = Arc::new(AppState::new(Config::default()));
    (router(state.clone()), state)
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-actor", "dispatcher")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

async fn body_string(response: axum::response::Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn seed_rider(app: &axum::Router, id: &str) {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/riders",
            json!({ "id": id, "name": format!("rider {id}"), "phone": "09111" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

async fn seed_package(state: &AppState, tracking_no: &str, status: PackageStatus) {
    state
        .ledger
        .insert_package(Package {
            tracking_no: tracking_no.to_string(),
            status,
            fee: dec!(1500),
            destination: "Hledan".to_string(),
            receiver: "Daw Mya".to_string(),
            biz: None,
            note: None,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
}

async fn assign_task(app: &axum::Router, rider_id: &str, tracking_no: &str) -> Value {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/tasks",
            json!({
                "rider_id": rider_id,
                "kind": "delivery",
                "tracking_no": tracking_no,
                "destination": "Hledan",
                "estimated_minutes": 25
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    body_json(response).await
}

#[tokio::test]
async fn health_returns_ok() {
    let (app, _state) = setup();
    let response = app.oneshot(get_request("/health")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["riders"], 0);
    assert_eq!(body["tasks"], 0);
    assert_eq!(body["packages"], 0);
}

#[tokio::test]
async fn metrics_returns_prometheus_format() {
    let (app, _state) = setup();
    let response = app.oneshot(get_request("/metrics")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_string(response).await;
    assert!(body.contains("retry_queue_depth"));
}

#[tokio::test]
async fn create_rider_returns_rider() {
    let (app, _state) = setup();
    let response = app
        .oneshot(json_request(
            "POST",
            "/riders",
            json!({ "id": "MDY1209251", "name": "Ko Zaw", "phone": "09111" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["rider"]["id"], "MDY1209251");
    assert_eq!(body["rider"]["status"], "offline");
    assert_eq!(body["rider"]["today_orders"], 0);
    assert_eq!(body["rider"]["active"], true);
}

#[tokio::test]
async fn create_rider_empty_name_returns_400() {
    let (app, _state) = setup();
    let response = app
        .oneshot(json_request(
            "POST",
            "/riders",
            json!({ "id": "R1", "name": "  " }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn duplicate_rider_returns_400() {
    let (app, _state) = setup();
    seed_rider(&app, "R1").await;

    let response = app
        .oneshot(json_request(
            "POST",
            "/riders",
            json!({ "id": "R1", "name": "again" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn report_location_out_of_range_returns_400() {
    let (app, _state) = setup();
    let response = app
        .oneshot(json_request(
            "POST",
            "/locations",
            json!({ "rider_id": "R1", "lat": 91.0, "lng": 96.09 }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let body = body_json(response).await;
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn reported_location_is_retrievable() {
    let (app, _state) = setup();
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/locations",
            json!({
                "rider_id": "R1",
                "lat": 21.95,
                "lng": 96.09,
                "battery": 80
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["location"]["source"], "reported");
    assert_eq!(body["location"]["out_of_order"], false);

    let response = app
        .oneshot(get_request("/locations?rider_ids=R1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let records = body.as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["rider_id"], "R1");
    assert_eq!(records[0]["lat"], 21.95);
    assert_eq!(records[0]["lng"], 96.09);
    assert_eq!(records[0]["stale"], false);
}

#[tokio::test]
async fn known_rider_without_report_gets_synthesized_placeholder() {
    let (app, _state) = setup();
    seed_rider(&app, "R1").await;

    let response = app.oneshot(get_request("/locations")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let records = body.as_array().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["rider_id"], "R1");
    assert_eq!(records[0]["source"], "synthesized");
}

#[tokio::test]
async fn assign_accept_complete_posts_ledger() {
    let (app, state) = setup();
    seed_rider(&app, "R1").await;
    seed_package(&state, "T-1001", PackageStatus::InTransit).await;

    let assigned = assign_task(&app, "R1", "T-1001").await;
    assert_eq!(assigned["success"], true);
    assert_eq!(assigned["assignment"]["status"], "pending");
    let task_id = assigned["task_id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/tasks/{task_id}/respond"),
            json!({ "rider_id": "R1", "decision": "accept" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["assignment"]["status"], "accepted");

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/tasks/{task_id}/complete"),
            json!({ "rider_id": "R1" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["already_completed"], false);
    assert_eq!(body["queued_for_reconciliation"], false);
    assert_eq!(body["ledger"]["package_status"], "delivered");
    assert_eq!(body["ledger"]["finance_status"], "posted");

    let package = state.ledger.get_package("T-1001").await.unwrap().unwrap();
    assert_eq!(package.status, PackageStatus::Delivered);

    let rows = state.ledger.finances_for_tracking("T-1001").await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].status, FinanceStatus::Posted);
    assert_eq!(rows[0].amount, dec!(1500));

    // Rider is back online with counters bumped.
    let response = app.oneshot(get_request("/riders")).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body[0]["status"], "online");
    assert_eq!(body[0]["today_orders"], 1);
}

#[tokio::test]
async fn busy_rider_cannot_take_second_task() {
    let (app, _state) = setup();
    seed_rider(&app, "R1").await;
    assign_task(&app, "R1", "T-2002").await;

    let response = app
        .oneshot(json_request(
            "POST",
            "/tasks",
            json!({
                "rider_id": "R1",
                "kind": "pickup",
                "tracking_no": "T-2003"
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn assign_to_unknown_rider_returns_404() {
    let (app, _state) = setup();
    let response = app
        .oneshot(json_request(
            "POST",
            "/tasks",
            json!({
                "rider_id": "ghost",
                "kind": "delivery",
                "tracking_no": "T-1"
            }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn reject_flow_returns_rider_to_online() {
    let (app, _state) = setup();
    seed_rider(&app, "R1").await;

    let assigned = assign_task(&app, "R1", "T-2002").await;
    let task_id = assigned["task_id"].as_str().unwrap().to_string();

    let response = app.clone().oneshot(get_request("/riders")).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body[0]["status"], "busy");

    let response = app
        .clone()
        .oneshot(json_request(
            "PUT",
            &format!("/tasks/{task_id}/respond"),
            json!({ "rider_id": "R1", "decision": "reject" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["assignment"]["status"], "rejected");

    let response = app.clone().oneshot(get_request("/riders")).await.unwrap();
    let body = body_json(response).await;
    assert_eq!(body[0]["status"], "online");
    assert!(body[0]["current_task"].is_null());

    // Terminal task no longer accepts a response.
    let response = app
        .oneshot(json_request(
            "POST",
            &format!("/tasks/{task_id}/respond"),
            json!({ "rider_id": "R1", "decision": "accept" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn respond_by_wrong_rider_returns_403() {
    let (app, _state) = setup();
    seed_rider(&app, "R1").await;
    seed_rider(&app, "R2").await;

    let assigned = assign_task(&app, "R1", "T-2002").await;
    let task_id = assigned["task_id"].as_str().unwrap().to_string();

    let response = app
        .oneshot(json_request(
            "POST",
            &format!("/tasks/{task_id}/respond"),
            json!({ "rider_id": "R2", "decision": "accept" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn task_history_lists_newest_first() {
    let (app, _state) = setup();
    seed_rider(&app, "R1").await;

    let first = assign_task(&app, "R1", "T-1").await;
    let task_id = first["task_id"].as_str().unwrap().to_string();
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            &format!("/tasks/{task_id}/respond"),
            json!({ "rider_id": "R1", "decision": "reject" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assign_task(&app, "R1", "T-2").await;

    let response = app
        .oneshot(get_request("/tasks?rider_id=R1"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let tasks = body.as_array().unwrap();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0]["tracking_no"], "T-2");
    assert_eq!(tasks[1]["tracking_no"], "T-1");
}

#[tokio::test]
async fn force_offline_clears_task_and_frees_rider() {
    let (app, _state) = setup();
    seed_rider(&app, "R1").await;
    let assigned = assign_task(&app, "R1", "T-2002").await;
    let task_id = assigned["task_id"].as_str().unwrap().to_string();

    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/riders/R1/action",
            json!({ "action": "force_offline" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    assert_eq!(body["rider"]["status"], "offline");
    assert!(body["rider"]["current_task"].is_null());

    let response = app
        .oneshot(get_request("/tasks?rider_id=R1"))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body[0]["id"], task_id.as_str());
    assert_eq!(body[0]["status"], "rejected");
}

#[tokio::test]
async fn audit_reports_and_clears_missing_manifest() {
    let (app, state) = setup();
    seed_package(&state, "T-7001", PackageStatus::InTransit).await;

    let response = app
        .clone()
        .oneshot(get_request("/reconcile/audit"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["missing_manifest"], json!(["T-7001"]));
    assert_eq!(body["missing_finance"], json!(["T-7001"]));

    state
        .ledger
        .insert_manifest_link(ManifestLink {
            tracking_no: "T-7001".to_string(),
            shipment_id: "SHP-1".to_string(),
        })
        .await
        .unwrap();

    let response = app
        .oneshot(get_request("/reconcile/audit"))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["missing_manifest"], json!([]));
}

#[tokio::test]
async fn heal_requires_actor_identity() {
    let (app, _state) = setup();
    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/reconcile/heal")
                .header("content-type", "application/json")
                .body(Body::from("{}"))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn heal_repairs_missing_finance_idempotently() {
    let (app, state) = setup();
    seed_package(&state, "T-8001", PackageStatus::Ordered).await;

    let response = app
        .clone()
        .oneshot(json_request("POST", "/reconcile/heal", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["applied"]["inserted_missing"], 1);

    let response = app
        .oneshot(json_request("POST", "/reconcile/heal", json!({})))
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["applied"]["inserted_missing"], 0);
    assert_eq!(state.ledger.list_finances().await.unwrap().len(), 1);
}
