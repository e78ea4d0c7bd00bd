//! Route table.

mod admin;
mod payment;
mod webhook;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/payment/services", get(payment::list_services))
        .route(
            "/api/payment/services/{service_id}",
            get(payment::get_service),
        )
        .route("/api/payment/create-session", post(payment::create_session))
        .route("/api/payment/verify/{reference}", get(payment::verify))
        .route("/api/payment/webhooks/epayco", post(webhook::epayco_webhook))
        .route(
            "/api/payment/admin/compensation/stats",
            get(admin::compensation_stats),
        )
        .route(
            "/api/payment/admin/compensation/report",
            get(admin::compensation_report),
        )
        .route(
            "/api/payment/admin/compensation/resolve",
            post(admin::compensation_resolve),
        )
        .route("/api/payment/admin/orders/stats", get(admin::order_stats))
        .route("/api/payment/admin/queue/stats", get(admin::queue_stats))
        .with_state(state)
}

async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
