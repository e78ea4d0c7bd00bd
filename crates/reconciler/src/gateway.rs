//! Payment processor client.
//!
//! Two surfaces: the authenticated Apify API for creating checkout sessions,
//! and the unauthenticated validation API for looking a transaction up by
//! reference. Apify tokens are valid for fifteen minutes; the cache keeps
//! them for fourteen so a token is never used inside its final minute.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use tokio_retry::strategy::ExponentialBackoff;

use crate::config::PaymentConfig;
use crate::error::{ReconcileError, ReconcileResult};
use crate::pricing::BillingPeriod;

/// Cached token lifetime, one minute under the processor's fifteen.
pub const TOKEN_TTL: Duration = Duration::from_secs(14 * 60);
/// A stale-token 401 is retried at most this many times after a refresh.
const MAX_AUTH_RETRIES: usize = 2;

#[derive(Debug, Clone, Serialize)]
pub struct SessionRequest {
    pub order_id: String,
    pub service_id: String,
    pub service_name: String,
    pub description: String,
    pub amount_cop_cents: i64,
    pub period: BillingPeriod,
    pub customer_email: String,
}

#[derive(Debug, Clone)]
pub struct GatewaySession {
    pub session_id: String,
    /// Checkout token the frontend opens the processor widget with, when
    /// the processor issues one separately from the session id.
    pub token: Option<String>,
    pub raw: Value,
}

/// Transaction detail from the validation API, in webhook field shape.
#[derive(Debug, Clone)]
pub struct GatewayTransaction {
    pub reference: String,
    pub transaction_id: String,
    pub response: String,
    pub amount: Option<f64>,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_session(&self, request: &SessionRequest) -> ReconcileResult<GatewaySession>;
    async fn transaction_by_reference(
        &self,
        reference: &str,
    ) -> ReconcileResult<Option<GatewayTransaction>>;
}

pub struct ApifyGateway {
    client: reqwest::Client,
    public_key: String,
    private_key: String,
    apify_url: String,
    validation_url: String,
    test_mode: bool,
    merchant_name: String,
    response_url: Option<String>,
    confirmation_url: Option<String>,
    token: RwLock<Option<(String, OffsetDateTime)>>,
}

impl ApifyGateway {
    pub fn new(config: &PaymentConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            public_key: config.public_key.clone(),
            private_key: config.private_key.clone(),
            apify_url: config.apify_url.trim_end_matches('/').to_string(),
            validation_url: config.validation_url.trim_end_matches('/').to_string(),
            test_mode: config.test_mode,
            merchant_name: config.merchant_name.clone(),
            response_url: config.response_url.clone(),
            confirmation_url: config.confirmation_url.clone(),
            token: RwLock::new(None),
        }
    }

    async fn cached_token(&self) -> Option<String> {
        let ttl = time::Duration::try_from(TOKEN_TTL).unwrap_or(time::Duration::minutes(14));
        let token = self.token.read().await;
        token.as_ref().and_then(|(value, fetched_at)| {
            (OffsetDateTime::now_utc() - *fetched_at < ttl).then(|| value.clone())
        })
    }

    async fn login(&self) -> ReconcileResult<String> {
        let response = self
            .client
            .post(format!("{}/login", self.apify_url))
            .basic_auth(&self.public_key, Some(&self.private_key))
            .timeout(Duration::from_secs(10))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ReconcileError::Gateway(format!(
                "processor login returned {status}"
            )));
        }

        let body: Value = response.json().await?;
        let token = body
            .get("token")
            .and_then(|t| t.as_str())
            .ok_or_else(|| ReconcileError::Gateway("login response missing token".into()))?
            .to_string();

        *self.token.write().await = Some((token.clone(), OffsetDateTime::now_utc()));
        tracing::debug!("processor token refreshed");
        Ok(token)
    }

    async fn token(&self) -> ReconcileResult<String> {
        match self.cached_token().await {
            Some(token) => Ok(token),
            None => self.login().await,
        }
    }

    fn session_body(&self, request: &SessionRequest) -> Value {
        serde_json::json!({
            "name": request.service_name,
            "description": request.description,
            "currency": "cop",
            "amount": format!("{:.2}", request.amount_cop_cents as f64 / 100.0),
            "lang": "es",
            "test": self.test_mode,
            "merchant_name": self.merchant_name,
            "response": self.response_url,
            "confirmation": self.confirmation_url,
            "email": request.customer_email,
            "extra1": request.order_id,
            "extra2": request.service_id,
            "extra3": request.period.as_str(),
            "extra4": request.customer_email,
            "extra5": request.service_name,
        })
    }
}

#[async_trait]
impl PaymentGateway for ApifyGateway {
    async fn create_session(&self, request: &SessionRequest) -> ReconcileResult<GatewaySession> {
        let body = self.session_body(request);
        let mut backoff = ExponentialBackoff::from_millis(500).take(MAX_AUTH_RETRIES);

        for attempt in 0..=MAX_AUTH_RETRIES {
            let token = self.token().await?;
            let response = self
                .client
                .post(format!("{}/payment/session/create", self.apify_url))
                .bearer_auth(&token)
                .timeout(Duration::from_secs(10))
                .json(&body)
                .send()
                .await?;

            let status = response.status();
            if status == reqwest::StatusCode::UNAUTHORIZED && attempt < MAX_AUTH_RETRIES {
                tracing::warn!(attempt, "processor rejected token, refreshing and retrying");
                *self.token.write().await = None;
                if let Some(delay) = backoff.next() {
                    tokio::time::sleep(delay).await;
                }
                continue;
            }
            if !status.is_success() {
                return Err(ReconcileError::Gateway(format!(
                    "session creation returned {status}"
                )));
            }

            let raw: Value = response.json().await?;
            let session_id = raw
                .pointer("/data/sessionId")
                .and_then(|v| v.as_str())
                .ok_or_else(|| {
                    ReconcileError::Gateway("session response missing data.sessionId".into())
                })?
                .to_string();

            let token = raw
                .pointer("/data/token")
                .and_then(|v| v.as_str())
                .map(str::to_string);

            tracing::info!(
                order_id = %request.order_id,
                session_id = %session_id,
                "checkout session created"
            );
            return Ok(GatewaySession {
                session_id,
                token,
                raw,
            });
        }

        Err(ReconcileError::Gateway(
            "session creation exhausted auth retries".into(),
        ))
    }

    async fn transaction_by_reference(
        &self,
        reference: &str,
    ) -> ReconcileResult<Option<GatewayTransaction>> {
        let response = self
            .client
            .get(format!("{}/reference/{reference}", self.validation_url))
            .timeout(Duration::from_secs(10))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let status = response.status();
        if !status.is_success() {
            return Err(ReconcileError::Gateway(format!(
                "validation API returned {status}"
            )));
        }

        let body: Value = response.json().await?;
        if body.get("success").and_then(|s| s.as_bool()) != Some(true) {
            return Ok(None);
        }
        let data = match body.get("data") {
            Some(data) if !data.is_null() => data,
            _ => return Ok(None),
        };

        Ok(Some(GatewayTransaction {
            reference: data
                .get("x_ref_payco")
                .map(value_to_string)
                .unwrap_or_else(|| reference.to_string()),
            transaction_id: data
                .get("x_transaction_id")
                .map(value_to_string)
                .unwrap_or_default(),
            response: data
                .get("x_response")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string(),
            amount: data.get("x_amount").and_then(|v| v.as_f64()),
        }))
    }
}

/// The validation API mixes numeric and string encodings for ids.
fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    fn config_for(server: &mockito::Server) -> PaymentConfig {
        let mut config = PaymentConfig::for_tests();
        config.apify_url = server.url();
        config.validation_url = server.url();
        config
    }

    fn request() -> SessionRequest {
        SessionRequest {
            order_id: "ord-1".into(),
            service_id: "rasi-assistant".into(),
            service_name: "Rasi Assistant".into(),
            description: "Rasi Assistant (monthly)".into(),
            amount_cop_cents: 8_000_000,
            period: BillingPeriod::Monthly,
            customer_email: "ana@example.com".into(),
        }
    }

    #[tokio::test]
    async fn session_creation_logs_in_once_and_reuses_the_token() {
        let mut server = mockito::Server::new_async().await;
        let login = server
            .mock("POST", "/login")
            .with_status(200)
            .with_body(r#"{"token":"tok-1"}"#)
            .expect(1)
            .create_async()
            .await;
        let create = server
            .mock("POST", "/payment/session/create")
            .match_header("authorization", "Bearer tok-1")
            .with_status(200)
            .with_body(r#"{"data":{"sessionId":"sess-1"}}"#)
            .expect(2)
            .create_async()
            .await;

        let gateway = ApifyGateway::new(&config_for(&server));
        let first = gateway.create_session(&request()).await.unwrap();
        let second = gateway.create_session(&request()).await.unwrap();

        assert_eq!(first.session_id, "sess-1");
        assert_eq!(second.session_id, "sess-1");
        login.assert_async().await;
        create.assert_async().await;
    }

    #[tokio::test]
    async fn stale_token_is_refreshed_after_a_401() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/login")
            .with_status(200)
            .with_body(r#"{"token":"tok-fresh"}"#)
            .expect(1)
            .create_async()
            .await;
        let rejected = server
            .mock("POST", "/payment/session/create")
            .match_header("authorization", "Bearer tok-stale")
            .with_status(401)
            .expect(1)
            .create_async()
            .await;
        let accepted = server
            .mock("POST", "/payment/session/create")
            .match_header("authorization", "Bearer tok-fresh")
            .with_status(200)
            .with_body(r#"{"data":{"sessionId":"sess-2"}}"#)
            .create_async()
            .await;

        let gateway = ApifyGateway::new(&config_for(&server));
        *gateway.token.write().await = Some(("tok-stale".into(), OffsetDateTime::now_utc()));

        let session = gateway.create_session(&request()).await.unwrap();
        assert_eq!(session.session_id, "sess-2");
        rejected.assert_async().await;
        accepted.assert_async().await;
    }

    #[tokio::test]
    async fn lookup_maps_found_transactions() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/reference/ref-1")
            .with_status(200)
            .with_body(
                r#"{"success":true,"data":{"x_ref_payco":"ref-1","x_transaction_id":123456,"x_response":"Aceptada","x_amount":80000.0}}"#,
            )
            .create_async()
            .await;

        let gateway = ApifyGateway::new(&config_for(&server));
        let tx = gateway.transaction_by_reference("ref-1").await.unwrap().unwrap();

        assert_eq!(tx.transaction_id, "123456");
        assert_eq!(tx.response, "Aceptada");
        assert_eq!(tx.amount, Some(80000.0));
    }

    #[tokio::test]
    async fn lookup_maps_missing_transactions_to_none() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/reference/ref-gone")
            .with_status(200)
            .with_body(r#"{"success":false,"data":null}"#)
            .create_async()
            .await;

        let gateway = ApifyGateway::new(&config_for(&server));
        assert!(gateway.transaction_by_reference("ref-gone").await.unwrap().is_none());
    }
}
