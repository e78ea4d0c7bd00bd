// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Cross-module scenarios for the reconciliation pipeline:
//! - webhook authenticity with real SHA-256 digests
//! - redelivery and out-of-order delivery
//! - queue expiry feeding the compensation ledger

use std::sync::Arc;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::config::PaymentConfig;
use crate::error::ReconcileResult;
use crate::event::WebhookEvent;
use crate::fulfillment::{
    ConfirmationEmail, CredentialAssignment, FulfillmentRegistry, Notifier, SaasRegistrar,
    SaasRegistration, TransactionRecord,
};
use crate::gateway::{GatewaySession, GatewayTransaction, PaymentGateway, SessionRequest};
use crate::pricing::PriceGuard;
use crate::rates::{CurrencyConverter, RateSource};
use crate::reconciler::{PaymentReconciler, WebhookDisposition};
use crate::status::PaymentState;

struct FixedRate(f64);

#[async_trait]
impl RateSource for FixedRate {
    async fn usd_cop_rate(&self) -> ReconcileResult<f64> {
        Ok(self.0)
    }
}

struct StubGateway;

#[async_trait]
impl PaymentGateway for StubGateway {
    async fn create_session(&self, _request: &SessionRequest) -> ReconcileResult<GatewaySession> {
        Ok(GatewaySession {
            session_id: "sess-1".into(),
            token: None,
            raw: serde_json::json!({}),
        })
    }

    async fn transaction_by_reference(
        &self,
        _reference: &str,
    ) -> ReconcileResult<Option<GatewayTransaction>> {
        Ok(None)
    }
}

struct StubRegistrar;

#[async_trait]
impl SaasRegistrar for StubRegistrar {
    async fn register(&self, _request: &SaasRegistration) -> ReconcileResult<serde_json::Value> {
        Ok(serde_json::json!({}))
    }
}

struct StubRegistry;

#[async_trait]
impl FulfillmentRegistry for StubRegistry {
    async fn record_transaction(&self, _record: &TransactionRecord) -> ReconcileResult<()> {
        Ok(())
    }

    async fn assign_credentials(
        &self,
        _request: &CredentialAssignment,
    ) -> ReconcileResult<serde_json::Value> {
        Ok(serde_json::json!({}))
    }
}

struct StubNotifier;

#[async_trait]
impl Notifier for StubNotifier {
    async fn send_payment_confirmation(
        &self,
        _to: &str,
        _email: &ConfirmationEmail,
    ) -> ReconcileResult<()> {
        Ok(())
    }
}

fn reconciler_with(config: PaymentConfig) -> PaymentReconciler {
    let converter = Arc::new(CurrencyConverter::new(Arc::new(FixedRate(4000.0)), 4200.0));
    PaymentReconciler::new(
        config,
        PriceGuard::new(converter),
        Arc::new(StubGateway),
        Arc::new(StubRegistrar),
        Arc::new(StubRegistry),
        Arc::new(StubNotifier),
    )
}

fn sign(event: &mut WebhookEvent, private_key: &str) {
    let payload = format!(
        "{}^{}^{}^{}^{}^{}",
        event.cust_id_client,
        private_key,
        event.reference_id,
        event.transaction_id,
        event.amount,
        event.currency_code
    );
    event.signature = hex::encode(Sha256::digest(payload.as_bytes()));
}

fn accepted_event(order_id: &str, reference: &str) -> WebhookEvent {
    WebhookEvent {
        transaction_id: "123456".into(),
        reference_id: reference.into(),
        amount: "80000".into(),
        currency_code: "COP".into(),
        customer_email: Some("ana@example.com".into()),
        response: "Aceptada".into(),
        order_id: Some(order_id.to_string()),
        service_id: Some("rasi-assistant".into()),
        service_name: Some("Rasi Assistant".into()),
        cust_id_client: "901234".into(),
        ..WebhookEvent::default()
    }
}

async fn checkout(reconciler: &PaymentReconciler) -> String {
    reconciler
        .checkout(crate::reconciler::CheckoutRequest {
            service_id: "rasi-assistant".into(),
            user_id: "user-7".into(),
            period: crate::pricing::BillingPeriod::Monthly,
            name: "Ana".into(),
            email: "ana@example.com".into(),
            phone: "3001234567".into(),
            amount_cop_cents: 8_000_000,
            registration_data: Some(serde_json::json!({"company": "Clinica Norte"})),
        })
        .await
        .unwrap()
        .order_id
}

mod authenticity {
    use super::*;

    #[tokio::test]
    async fn correctly_signed_webhook_is_processed() {
        let config = PaymentConfig::for_tests();
        assert!(config.validate_signature);
        let private_key = config.private_key.clone();
        let reconciler = reconciler_with(config);
        let order_id = checkout(&reconciler).await;

        let mut event = accepted_event(&order_id, "ref-1");
        sign(&mut event, &private_key);

        assert_eq!(
            reconciler.handle_webhook(event, Some("52.10.20.30")).await,
            WebhookDisposition::Processed
        );
    }

    #[tokio::test]
    async fn amount_tampering_after_signing_is_discarded() {
        let config = PaymentConfig::for_tests();
        let private_key = config.private_key.clone();
        let reconciler = reconciler_with(config);
        let order_id = checkout(&reconciler).await;

        let mut event = accepted_event(&order_id, "ref-1");
        sign(&mut event, &private_key);
        event.amount = "1".into();

        assert_eq!(
            reconciler.handle_webhook(event, None).await,
            WebhookDisposition::Discarded("INVALID_SIGNATURE")
        );
        assert!(reconciler.orders.get(&order_id).await.is_some());
    }

    #[tokio::test]
    async fn signature_check_can_be_disabled_for_sandbox() {
        let mut config = PaymentConfig::for_tests();
        config.validate_signature = false;
        let reconciler = reconciler_with(config);
        let order_id = checkout(&reconciler).await;

        // Unsigned event still passes in sandbox mode.
        let event = accepted_event(&order_id, "ref-1");
        assert_eq!(
            reconciler.handle_webhook(event, None).await,
            WebhookDisposition::Processed
        );
    }
}

mod delivery_order {
    use super::*;

    fn sandbox() -> PaymentConfig {
        let mut config = PaymentConfig::for_tests();
        config.validate_signature = false;
        config
    }

    #[tokio::test]
    async fn redelivered_accepted_webhook_is_acknowledged_without_requeueing() {
        let reconciler = reconciler_with(sandbox());
        let order_id = checkout(&reconciler).await;

        let first = reconciler
            .handle_webhook(accepted_event(&order_id, "ref-1"), None)
            .await;
        assert_eq!(first, WebhookDisposition::Processed);

        // The order is gone, but the redelivery must not end up queued
        // waiting for it.
        let second = reconciler
            .handle_webhook(accepted_event(&order_id, "ref-1"), None)
            .await;
        assert_eq!(second, WebhookDisposition::Recorded);
        assert_eq!(reconciler.queue.stats().await.queued, 0);
    }

    #[tokio::test]
    async fn stale_pending_after_acceptance_does_not_downgrade() {
        let reconciler = reconciler_with(sandbox());
        let order_id = checkout(&reconciler).await;

        reconciler
            .handle_webhook(accepted_event(&order_id, "ref-1"), None)
            .await;

        let mut pending = accepted_event(&order_id, "ref-1");
        pending.response = "Pendiente".into();
        reconciler.handle_webhook(pending, None).await;

        assert_eq!(
            reconciler.statuses.by_reference("ref-1").await.unwrap().state,
            PaymentState::Accepted
        );
    }

    #[tokio::test]
    async fn pending_then_accepted_converges_on_accepted() {
        let reconciler = reconciler_with(sandbox());
        let order_id = checkout(&reconciler).await;

        let mut pending = accepted_event(&order_id, "ref-1");
        pending.response = "Pendiente".into();
        reconciler.handle_webhook(pending, None).await;
        assert_eq!(
            reconciler.statuses.by_reference("ref-1").await.unwrap().state,
            PaymentState::Pending
        );

        reconciler
            .handle_webhook(accepted_event(&order_id, "ref-1"), None)
            .await;
        assert_eq!(
            reconciler.statuses.by_reference("ref-1").await.unwrap().state,
            PaymentState::Accepted
        );
    }
}

mod queue_expiry {
    use super::*;

    #[tokio::test]
    async fn exhausted_retries_land_in_the_compensation_ledger() {
        let mut config = PaymentConfig::for_tests();
        config.validate_signature = false;
        let reconciler = reconciler_with(config);

        // Accepted payment for an order that never arrives.
        reconciler
            .handle_webhook(accepted_event("ord-ghost", "ref-ghost"), None)
            .await;
        for _ in 0..crate::queue::MAX_RETRIES {
            reconciler.queue.record_attempt("ref-ghost").await;
        }

        reconciler.process_retry_queue().await;

        assert_eq!(reconciler.queue.stats().await.queued, 0);
        let report = reconciler.ledger.report().await;
        assert_eq!(report.partial_transactions.len(), 1);
        assert_eq!(report.partial_transactions[0].failed_step, "order_lookup");
        assert_eq!(report.partial_transactions[0].completed_steps, vec!["payment"]);
        assert_eq!(report.partial_transactions[0].amount_cop_cents, 8_000_000);
    }
}
