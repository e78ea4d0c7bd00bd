//! Operator endpoints over the in-memory stores and compensation ledgers.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use crate::state::AppState;

pub async fn compensation_stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    let stats = state.service.reconciler.ledger.stats().await;
    Json(json!({ "success": true, "stats": stats }))
}

pub async fn compensation_report(State(state): State<AppState>) -> Json<serde_json::Value> {
    let report = state.service.reconciler.ledger.report().await;
    Json(json!({ "success": true, "report": report }))
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    /// One of `email`, `registry`, `partial`.
    pub kind: String,
    pub id: String,
}

pub async fn compensation_resolve(
    State(state): State<AppState>,
    Json(request): Json<ResolveRequest>,
) -> Response {
    match state
        .service
        .reconciler
        .ledger
        .resolve(&request.kind, &request.id)
        .await
    {
        Some(item) => {
            Json(json!({ "success": true, "id": request.id, "item": item })).into_response()
        }
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "success": false,
                "code": "COMPENSATION_NOT_FOUND",
                "error": format!("no {} entry with id {}", request.kind, request.id),
            })),
        )
            .into_response(),
    }
}

pub async fn order_stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    let stats = state.service.reconciler.orders.stats().await;
    Json(json!({ "success": true, "stats": stats }))
}

pub async fn queue_stats(State(state): State<AppState>) -> Json<serde_json::Value> {
    let stats = state.service.reconciler.queue.stats().await;
    Json(json!({ "success": true, "stats": stats }))
}
