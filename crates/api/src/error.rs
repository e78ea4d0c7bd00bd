//! HTTP error mapping for checkout and verification endpoints.
//!
//! Webhook intake never goes through this type; it acknowledges with 200
//! regardless of outcome so the processor cannot be used as an oracle.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rasi_reconciler::ReconcileError;
use serde_json::json;

pub struct ApiError(pub ReconcileError);

impl From<ReconcileError> for ApiError {
    fn from(err: ReconcileError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ReconcileError::Validation { .. } => StatusCode::BAD_REQUEST,
            ReconcileError::ServiceNotFound(_) => StatusCode::NOT_FOUND,
            ReconcileError::Authenticity { .. } => StatusCode::FORBIDDEN,
            ReconcileError::Gateway(_) | ReconcileError::Http(_) => StatusCode::BAD_GATEWAY,
            ReconcileError::RateSource(_)
            | ReconcileError::Fulfillment { .. }
            | ReconcileError::Notification(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self.0, code = self.0.code(), "request failed");
        } else {
            tracing::warn!(error = %self.0, code = self.0.code(), "request rejected");
        }

        let mut body = json!({
            "success": false,
            "error": self.0.to_string(),
            "code": self.0.code(),
        });
        if let ReconcileError::Validation {
            correct_amount: Some(amount),
            ..
        } = &self.0
        {
            body["correct_amount"] = json!(amount);
        }

        (status, Json(body)).into_response()
    }
}
