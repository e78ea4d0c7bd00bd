//! Processor webhook intake.
//!
//! The contract with the processor is a flat 200 once the source is
//! accepted: malformed bodies, failed signatures and fulfillment errors all
//! acknowledge identically. Anything else either turns the endpoint into a
//! validity oracle or makes the processor redeliver forever.

use std::net::SocketAddr;

use axum::extract::rejection::FormRejection;
use axum::extract::{ConnectInfo, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use rasi_reconciler::{WebhookDisposition, WebhookEvent};
use serde_json::json;

use crate::allowlist;
use crate::state::AppState;

pub async fn epayco_webhook(
    State(state): State<AppState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    form: Result<Form<WebhookEvent>, FormRejection>,
) -> Response {
    let config = &state.service.config;
    let source_ip = allowlist::client_ip(&headers, remote);

    if config.validate_source_ip && !allowlist::is_authorized(&source_ip, config.allow_local_sources)
    {
        tracing::error!(
            source_ip = %source_ip,
            user_agent = headers
                .get("user-agent")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("unknown"),
            alert = "UNAUTHORIZED_WEBHOOK_SOURCE",
            severity = "HIGH",
            "webhook from unauthorized source"
        );
        if !config.allow_local_sources {
            return (
                StatusCode::FORBIDDEN,
                Json(json!({ "error": "Forbidden", "message": "IP not authorized" })),
            )
                .into_response();
        }
        tracing::warn!(source_ip = %source_ip, "development mode, unauthorized source allowed");
    }

    let event = match form {
        Ok(Form(event)) => event,
        Err(rejection) => {
            tracing::error!(
                source_ip = %source_ip,
                error = %rejection,
                "unparseable webhook body acknowledged"
            );
            return acknowledge(None);
        }
    };

    let transaction_id = event.transaction_id.clone();
    let disposition = state
        .service
        .reconciler
        .handle_webhook(event, Some(&source_ip))
        .await;

    match disposition {
        WebhookDisposition::Processed => {
            tracing::info!(transaction_id = %transaction_id, "webhook processed")
        }
        WebhookDisposition::Queued => {
            tracing::info!(transaction_id = %transaction_id, "webhook queued")
        }
        WebhookDisposition::Recorded => {
            tracing::info!(transaction_id = %transaction_id, "webhook outcome recorded")
        }
        WebhookDisposition::Compensated => {
            tracing::warn!(transaction_id = %transaction_id, "webhook compensated")
        }
        WebhookDisposition::Discarded(reason) => {
            tracing::warn!(transaction_id = %transaction_id, reason, "webhook discarded")
        }
    }

    acknowledge(Some(&transaction_id))
}

fn acknowledge(transaction_id: Option<&str>) -> Response {
    let mut body = json!({
        "success": true,
        "message": "Notification received",
    });
    if let Some(id) = transaction_id.filter(|id| !id.is_empty()) {
        body["transaction_id"] = json!(id);
    }
    (StatusCode::OK, Json(body)).into_response()
}
