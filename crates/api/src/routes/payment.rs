//! Checkout, catalog and verification endpoints.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use rasi_reconciler::{active_services, find_service, CheckoutRequest, ReconcileError};
use serde_json::json;

use crate::error::ApiError;
use crate::state::AppState;

pub async fn list_services() -> Json<serde_json::Value> {
    Json(json!({
        "success": true,
        "services": active_services(),
    }))
}

pub async fn get_service(Path(service_id): Path<String>) -> Response {
    match find_service(&service_id) {
        Some(service) => Json(json!({ "success": true, "service": service })).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({
                "success": false,
                "code": "SERVICE_NOT_FOUND",
                "error": format!("service not found or inactive: {service_id}"),
            })),
        )
            .into_response(),
    }
}

// Missing or unparsable fields (user id, billing period, ...) come back as
// a 400 with the same shape as the domain validation errors.
fn invalid_body(rejection: JsonRejection) -> ApiError {
    ApiError::from(ReconcileError::validation(
        "INVALID_REQUEST_BODY",
        rejection.body_text(),
    ))
}

pub async fn create_session(
    State(state): State<AppState>,
    request: Result<Json<CheckoutRequest>, JsonRejection>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let Json(request) = request.map_err(invalid_body)?;
    let response = state.service.reconciler.checkout(request).await?;
    Ok(Json(json!({
        "success": true,
        "order_id": response.order_id,
        "session_id": response.session_id,
        "token": response.token,
        "amount_cop_cents": response.amount_cop_cents,
        "amount_usd": response.amount_usd,
        "rate": response.rate,
    })))
}

pub async fn verify(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<Response, ApiError> {
    match state.service.reconciler.verify(&reference).await? {
        Some(record) => {
            Ok(Json(json!({ "success": true, "payment": record })).into_response())
        }
        None => Ok((
            StatusCode::NOT_FOUND,
            Json(json!({
                "success": false,
                "code": "PAYMENT_NOT_FOUND",
                "error": format!("no transaction found for {reference}"),
            })),
        )
            .into_response()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_without_billing_period_maps_to_400() {
        let body = br#"{
            "service_id": "rasi-assistant",
            "user_id": "user-7",
            "name": "Ana",
            "email": "ana@example.com",
            "phone": "3001234567",
            "amount_cop_cents": 8000000
        }"#;
        let rejection = Json::<CheckoutRequest>::from_bytes(body).unwrap_err();

        let response = invalid_body(rejection).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn unknown_billing_period_is_rejected() {
        let body = br#"{
            "service_id": "rasi-assistant",
            "user_id": "user-7",
            "period": "weekly",
            "name": "Ana",
            "email": "ana@example.com",
            "phone": "3001234567",
            "amount_cop_cents": 8000000
        }"#;
        assert!(Json::<CheckoutRequest>::from_bytes(body).is_err());
    }
}
