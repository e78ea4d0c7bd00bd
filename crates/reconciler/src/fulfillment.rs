//! Post-payment fulfillment collaborators.
//!
//! After a payment is confirmed the reconciler records the transaction,
//! notifies the customer, and for credential-based services provisions a
//! SaaS account. Each concern sits behind a trait so tests can observe or
//! fail individual steps.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ReconcileError, ReconcileResult};
use crate::pricing::BillingPeriod;

/// Payload for the customer's payment-confirmation email.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationEmail {
    pub customer_name: String,
    pub service_name: String,
    pub amount_cop_cents: i64,
    pub reference: String,
    pub transaction_id: String,
}

/// Row appended to the durable transaction registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub transaction_id: String,
    pub reference: String,
    pub order_id: String,
    pub service_id: String,
    pub service_name: String,
    pub amount_cop_cents: i64,
    pub currency: String,
    pub customer_email: String,
    pub status: String,
    #[serde(with = "time::serde::rfc3339")]
    pub recorded_at: time::OffsetDateTime,
}

/// Provisioning request for credential-based services.
#[derive(Debug, Clone, Serialize)]
pub struct SaasRegistration {
    pub order_id: String,
    pub service_id: String,
    pub service_name: String,
    pub email: String,
    pub name: String,
    pub phone: String,
    pub period: BillingPeriod,
    pub amount_usd: i64,
    /// Opaque signup payload collected at checkout, forwarded verbatim.
    pub registration_data: Value,
}

/// Request for a pre-provisioned credential slot (credential-flow orders
/// that carry no signup payload).
#[derive(Debug, Clone, Serialize)]
pub struct CredentialAssignment {
    pub order_id: String,
    pub email: String,
    pub phone: String,
    pub period: BillingPeriod,
}

#[async_trait]
pub trait SaasRegistrar: Send + Sync {
    async fn register(&self, request: &SaasRegistration) -> ReconcileResult<Value>;
}

#[async_trait]
pub trait FulfillmentRegistry: Send + Sync {
    async fn record_transaction(&self, record: &TransactionRecord) -> ReconcileResult<()>;

    /// Hand out one of the registry's pre-provisioned credential sets.
    async fn assign_credentials(&self, request: &CredentialAssignment) -> ReconcileResult<Value>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_payment_confirmation(
        &self,
        to: &str,
        email: &ConfirmationEmail,
    ) -> ReconcileResult<()>;
}

const REGISTRATION_TIMEOUT: Duration = Duration::from_secs(15);

/// Registers SaaS accounts against the provisioning service over HTTP.
pub struct HttpSaasRegistrar {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSaasRegistrar {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl SaasRegistrar for HttpSaasRegistrar {
    async fn register(&self, request: &SaasRegistration) -> ReconcileResult<Value> {
        if request.email.trim().is_empty()
            || request.name.trim().is_empty()
            || request.service_id.trim().is_empty()
        {
            return Err(ReconcileError::Fulfillment {
                step: "saas_registration",
                message: "registration requires email, name and service id".into(),
            });
        }

        tracing::info!(
            order_id = %request.order_id,
            service_id = %request.service_id,
            "registering SaaS account"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(REGISTRATION_TIMEOUT)
            .json(request)
            .send()
            .await
            .map_err(|e| ReconcileError::Fulfillment {
                step: "saas_registration",
                message: format!("registration request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ReconcileError::Fulfillment {
                step: "saas_registration",
                message: format!("registration service returned {status}"),
            });
        }

        let body: Value = response.json().await.map_err(|e| ReconcileError::Fulfillment {
            step: "saas_registration",
            message: format!("registration response unreadable: {e}"),
        })?;
        tracing::info!(order_id = %request.order_id, "SaaS account registered");
        Ok(body)
    }
}

/// Talks to the registry service over HTTP. The registry keeps the durable
/// purchase log and the pool of pre-provisioned credentials.
pub struct HttpFulfillmentRegistry {
    client: reqwest::Client,
    base_url: String,
}

impl HttpFulfillmentRegistry {
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }
}

#[async_trait]
impl FulfillmentRegistry for HttpFulfillmentRegistry {
    async fn record_transaction(&self, record: &TransactionRecord) -> ReconcileResult<()> {
        let response = self
            .client
            .post(format!("{}/transactions", self.base_url))
            .timeout(Duration::from_secs(10))
            .json(record)
            .send()
            .await
            .map_err(|e| ReconcileError::Fulfillment {
                step: "register_purchase",
                message: format!("registry request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ReconcileError::Fulfillment {
                step: "register_purchase",
                message: format!("registry returned {status}"),
            });
        }
        tracing::debug!(transaction_id = %record.transaction_id, "purchase registered");
        Ok(())
    }

    async fn assign_credentials(&self, request: &CredentialAssignment) -> ReconcileResult<Value> {
        let response = self
            .client
            .post(format!("{}/credentials/assign", self.base_url))
            .timeout(Duration::from_secs(10))
            .json(request)
            .send()
            .await
            .map_err(|e| ReconcileError::Fulfillment {
                step: "assign_credentials",
                message: format!("credential assignment request failed: {e}"),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ReconcileError::Fulfillment {
                step: "assign_credentials",
                message: format!("credential assignment returned {status}"),
            });
        }

        let body: Value = response.json().await.map_err(|e| ReconcileError::Fulfillment {
            step: "assign_credentials",
            message: format!("credential assignment response unreadable: {e}"),
        })?;
        tracing::info!(order_id = %request.order_id, "credentials assigned from pool");
        Ok(body)
    }
}

/// Sends confirmation emails through the notification service over HTTP.
pub struct HttpNotifier {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpNotifier {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl Notifier for HttpNotifier {
    async fn send_payment_confirmation(
        &self,
        to: &str,
        email: &ConfirmationEmail,
    ) -> ReconcileResult<()> {
        let payload = serde_json::json!({
            "to": to,
            "template": "payment_confirmation",
            "data": email,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .timeout(Duration::from_secs(10))
            .json(&payload)
            .send()
            .await
            .map_err(|e| ReconcileError::Notification(format!("email request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ReconcileError::Notification(format!(
                "notification service returned {status}"
            )));
        }
        Ok(())
    }
}
