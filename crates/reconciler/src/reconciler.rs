//! Payment reconciliation orchestrator.
//!
//! Ties the stores, the price guard and the fulfillment collaborators into
//! the three entry points the HTTP layer exposes: checkout, webhook intake
//! and verification. Webhook intake never propagates an error upward; every
//! failure past authenticity is compensated and acknowledged so the
//! processor does not re-deliver forever.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::catalog::{find_service, FlowType};
use crate::compensation::CompensationLedger;
use crate::config::PaymentConfig;
use crate::error::{ReconcileError, ReconcileResult};
use crate::event::{mask_email, ResponseStatus, WebhookEvent};
use crate::fulfillment::{
    ConfirmationEmail, CredentialAssignment, FulfillmentRegistry, Notifier, SaasRegistrar,
    SaasRegistration, TransactionRecord,
};
use crate::gateway::{PaymentGateway, SessionRequest};
use crate::orders::{Customer, OrderStore, PendingOrder};
use crate::pricing::{BillingPeriod, PriceGuard};
use crate::queue::{QueuedWebhook, WebhookRetryQueue};
use crate::signature;
use crate::status::{paid_until, PaymentState, PaymentStatusRecord, PaymentStatusStore};

const STEP_PAYMENT: &str = "payment";
const STEP_REGISTER: &str = "register_purchase";
const STEP_SAAS: &str = "saas_registration";
const STEP_ASSIGN: &str = "assign_credentials";
const STEP_EMAIL: &str = "send_email";

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutRequest {
    pub service_id: String,
    pub user_id: String,
    pub period: BillingPeriod,
    pub name: String,
    pub email: String,
    pub phone: String,
    /// Client-side price, in COP centavos. Advisory; verified server-side.
    pub amount_cop_cents: i64,
    /// Signup payload for credential-flow services that want a fresh SaaS
    /// account. Left out, the order draws from the pre-provisioned pool.
    #[serde(default)]
    pub registration_data: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckoutResponse {
    pub order_id: String,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    pub amount_cop_cents: i64,
    pub amount_usd: i64,
    pub rate: f64,
}

/// What intake decided to do with a webhook. The HTTP layer acknowledges
/// with 200 in every case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookDisposition {
    /// Accepted payment, fulfillment completed.
    Processed,
    /// Accepted payment whose order is not stored yet; parked for retry.
    Queued,
    /// Pending or rejected outcome recorded.
    Recorded,
    /// Fulfillment failed partway; a compensation entry holds the details.
    Compensated,
    /// Failed authenticity or shape checks; dropped without side effects.
    Discarded(&'static str),
}

pub struct PaymentReconciler {
    config: PaymentConfig,
    price_guard: PriceGuard,
    pub orders: Arc<OrderStore>,
    pub queue: Arc<WebhookRetryQueue>,
    pub ledger: Arc<CompensationLedger>,
    pub statuses: Arc<PaymentStatusStore>,
    gateway: Arc<dyn PaymentGateway>,
    registrar: Arc<dyn SaasRegistrar>,
    registry: Arc<dyn FulfillmentRegistry>,
    notifier: Arc<dyn Notifier>,
}

impl PaymentReconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: PaymentConfig,
        price_guard: PriceGuard,
        gateway: Arc<dyn PaymentGateway>,
        registrar: Arc<dyn SaasRegistrar>,
        registry: Arc<dyn FulfillmentRegistry>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            config,
            price_guard,
            orders: Arc::new(OrderStore::new()),
            queue: Arc::new(WebhookRetryQueue::new()),
            ledger: Arc::new(CompensationLedger::new()),
            statuses: Arc::new(PaymentStatusStore::new()),
            gateway,
            registrar,
            registry,
            notifier,
        }
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    /// Validate a checkout request, price it from the catalog, open a
    /// processor session and store the pending order.
    pub async fn checkout(&self, request: CheckoutRequest) -> ReconcileResult<CheckoutResponse> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(ReconcileError::validation("MISSING_FIELD", "name is required"));
        }
        let user_id = request.user_id.trim();
        if user_id.is_empty() || user_id.contains(char::is_whitespace) {
            return Err(ReconcileError::validation("MISSING_FIELD", "userId is required"));
        }
        if !valid_email(&request.email) {
            return Err(ReconcileError::validation("INVALID_EMAIL", "email is not valid"));
        }
        let phone = normalize_phone(&request.phone).ok_or_else(|| {
            ReconcileError::validation(
                "INVALID_PHONE",
                "phone must be a ten-digit Colombian mobile number",
            )
        })?;

        let service = find_service(&request.service_id)
            .ok_or_else(|| ReconcileError::ServiceNotFound(request.service_id.clone()))?;

        let quote = self
            .price_guard
            .verify(&request.service_id, request.period, request.amount_cop_cents)
            .await?;

        let created_at = OffsetDateTime::now_utc();
        let millis = created_at.unix_timestamp_nanos() / 1_000_000;
        let order_id = format!("ORD-{millis}-{user_id}");
        let order = PendingOrder {
            order_id: order_id.clone(),
            service_id: service.id.to_string(),
            service_name: service.name.to_string(),
            period: request.period,
            amount_usd: quote.amount_usd,
            amount_cop_cents: quote.amount_cop_cents,
            rate: quote.rate,
            customer: Customer {
                name: name.to_string(),
                email: request.email.trim().to_string(),
                phone,
            },
            registration_data: request
                .registration_data
                .clone()
                .filter(|_| service.flow_type == FlowType::Credentials),
            created_at,
        };

        // Stored before the session opens so the confirmation webhook can
        // never observe a session without its order.
        self.orders.put(order.clone()).await;

        let session = match self
            .gateway
            .create_session(&SessionRequest {
                order_id: order_id.clone(),
                service_id: order.service_id.clone(),
                service_name: order.service_name.clone(),
                description: format!("{} ({})", order.service_name, request.period.as_str()),
                amount_cop_cents: quote.amount_cop_cents,
                period: request.period,
                customer_email: order.customer.email.clone(),
            })
            .await
        {
            Ok(session) => session,
            Err(e) => {
                self.orders.remove(&order_id).await;
                return Err(e);
            }
        };

        Ok(CheckoutResponse {
            order_id,
            session_id: session.session_id,
            token: session.token,
            amount_cop_cents: quote.amount_cop_cents,
            amount_usd: quote.amount_usd,
            rate: quote.rate,
        })
    }

    /// Webhook intake. Authenticity failures are discarded; everything past
    /// that point is acknowledged even when fulfillment fails.
    pub async fn handle_webhook(
        &self,
        event: WebhookEvent,
        source_ip: Option<&str>,
    ) -> WebhookDisposition {
        if !signature::validate_integrity(&event) {
            signature::log_invalid_attempt(&event, "integrity", source_ip);
            return WebhookDisposition::Discarded("INVALID_INTEGRITY");
        }
        if self.config.validate_signature
            && !signature::validate_signature(&event, &self.config.private_key)
        {
            signature::log_invalid_attempt(&event, "signature", source_ip);
            return WebhookDisposition::Discarded("INVALID_SIGNATURE");
        }

        match event.status() {
            ResponseStatus::Accepted => self.handle_accepted(event).await,
            ResponseStatus::Pending => {
                self.record_outcome(&event, PaymentState::Pending).await;
                WebhookDisposition::Recorded
            }
            ResponseStatus::Rejected | ResponseStatus::Failed => {
                self.record_outcome(&event, PaymentState::Rejected).await;
                if let Some(order_id) = &event.order_id {
                    self.orders.remove(order_id).await;
                }
                WebhookDisposition::Recorded
            }
            // Integrity validation rules this out; kept as a guard.
            ResponseStatus::Unknown => WebhookDisposition::Discarded("UNKNOWN_STATUS"),
        }
    }

    async fn handle_accepted(&self, event: WebhookEvent) -> WebhookDisposition {
        // At-least-once delivery: a reference already fulfilled is
        // acknowledged again without re-running any step.
        if let Some(existing) = self.statuses.by_reference(&event.reference_id).await {
            if existing.state == PaymentState::Accepted {
                tracing::info!(
                    reference = %event.reference_id,
                    "duplicate delivery of a fulfilled payment"
                );
                return WebhookDisposition::Recorded;
            }
        }

        let Some(order_id) = event.order_id.clone().filter(|id| !id.is_empty()) else {
            tracing::error!(
                reference = %event.reference_id,
                transaction_id = %event.transaction_id,
                alert = "MISSING_ORDER_ID",
                severity = "HIGH",
                "accepted payment carries no order correlation id"
            );
            return WebhookDisposition::Discarded("MISSING_ORDER_ID");
        };

        match self.orders.get(&order_id).await {
            Some(order) => match self.process_accepted(&order, &event).await {
                Ok(()) => WebhookDisposition::Processed,
                Err(e) => {
                    tracing::error!(
                        order_id = %order_id,
                        reference = %event.reference_id,
                        error = %e,
                        "fulfillment incomplete, compensation recorded"
                    );
                    WebhookDisposition::Compensated
                }
            },
            None => {
                self.queue.enqueue(event, order_id).await;
                WebhookDisposition::Queued
            }
        }
    }

    /// Run the fulfillment steps for a confirmed payment. The payment itself
    /// is the first completed step; the flow-specific provisioning step is
    /// blocking and stops before the email on failure, leaving the order for
    /// the sweep. Only the email is compensated without blocking.
    async fn process_accepted(
        &self,
        order: &PendingOrder,
        event: &WebhookEvent,
    ) -> ReconcileResult<()> {
        let mut completed: Vec<String> = vec![STEP_PAYMENT.to_string()];
        let amount_cop_cents = order.amount_cop_cents;

        let flow = find_service(&order.service_id)
            .map(|s| s.flow_type)
            .unwrap_or(FlowType::Contact);
        match flow {
            FlowType::Credentials => match &order.registration_data {
                Some(data) => {
                    let registration = SaasRegistration {
                        order_id: order.order_id.clone(),
                        service_id: order.service_id.clone(),
                        service_name: order.service_name.clone(),
                        email: order.customer.email.clone(),
                        name: order.customer.name.clone(),
                        phone: order.customer.phone.clone(),
                        period: order.period,
                        amount_usd: order.amount_usd,
                        registration_data: data.clone(),
                    };
                    if let Err(e) = self.registrar.register(&registration).await {
                        self.compensate_fulfillment(order, event, &completed, STEP_SAAS, &e)
                            .await;
                        // The order stays stored; the sweep is the backstop.
                        return Err(e);
                    }
                    completed.push(STEP_SAAS.to_string());
                }
                None => {
                    let assignment = CredentialAssignment {
                        order_id: order.order_id.clone(),
                        email: order.customer.email.clone(),
                        phone: order.customer.phone.clone(),
                        period: order.period,
                    };
                    if let Err(e) = self.registry.assign_credentials(&assignment).await {
                        self.ledger
                            .record_failed_registry_write(
                                self.transaction_record(order, event),
                                &e.to_string(),
                            )
                            .await;
                        self.compensate_fulfillment(order, event, &completed, STEP_ASSIGN, &e)
                            .await;
                        return Err(e);
                    }
                    completed.push(STEP_ASSIGN.to_string());
                }
            },
            FlowType::Contact | FlowType::Chatbot => {
                let record = self.transaction_record(order, event);
                if let Err(e) = self.registry.record_transaction(&record).await {
                    self.ledger
                        .record_failed_registry_write(record, &e.to_string())
                        .await;
                    self.compensate_fulfillment(order, event, &completed, STEP_REGISTER, &e)
                        .await;
                    return Err(e);
                }
                completed.push(STEP_REGISTER.to_string());
            }
        }

        let email = ConfirmationEmail {
            customer_name: order.customer.name.clone(),
            service_name: order.service_name.clone(),
            amount_cop_cents,
            reference: event.reference_id.clone(),
            transaction_id: event.transaction_id.clone(),
        };
        match self
            .notifier
            .send_payment_confirmation(&order.customer.email, &email)
            .await
        {
            Ok(()) => completed.push(STEP_EMAIL.to_string()),
            Err(e) => {
                // Not blocking: fulfillment is done and the retry task owns
                // the email. The partial entry keeps the trail auditable.
                self.ledger
                    .record_failed_email(&order.customer.email, email, &e.to_string())
                    .await;
                self.compensate_fulfillment(order, event, &completed, STEP_EMAIL, &e)
                    .await;
            }
        }

        self.statuses
            .upsert(PaymentStatusRecord {
                transaction_id: event.transaction_id.clone(),
                reference: event.reference_id.clone(),
                order_id: Some(order.order_id.clone()),
                service_id: Some(order.service_id.clone()),
                state: PaymentState::Accepted,
                reason: None,
                amount_cop_cents: Some(amount_cop_cents),
                paid_until: Some(paid_until(order.period, OffsetDateTime::now_utc())),
                updated_at: OffsetDateTime::now_utc(),
            })
            .await;

        self.orders.remove(&order.order_id).await;
        self.queue.resolve(&event.reference_id).await;

        tracing::info!(
            order_id = %order.order_id,
            reference = %event.reference_id,
            email = %mask_email(&order.customer.email),
            steps = ?completed,
            "payment fulfilled"
        );
        Ok(())
    }

    fn transaction_record(&self, order: &PendingOrder, event: &WebhookEvent) -> TransactionRecord {
        TransactionRecord {
            transaction_id: event.transaction_id.clone(),
            reference: event.reference_id.clone(),
            order_id: order.order_id.clone(),
            service_id: order.service_id.clone(),
            service_name: order.service_name.clone(),
            amount_cop_cents: order.amount_cop_cents,
            currency: event.currency_code.clone(),
            customer_email: order.customer.email.clone(),
            status: "accepted".to_string(),
            recorded_at: OffsetDateTime::now_utc(),
        }
    }

    async fn compensate_fulfillment(
        &self,
        order: &PendingOrder,
        event: &WebhookEvent,
        completed: &[String],
        failed_step: &'static str,
        error: &ReconcileError,
    ) {
        self.ledger
            .record_partial_transaction(
                &event.transaction_id,
                &event.reference_id,
                &order.order_id,
                &order.service_id,
                &order.customer.email,
                order.amount_cop_cents,
                completed.to_vec(),
                failed_step,
                &error.to_string(),
                self.config.needs_refund(failed_step),
            )
            .await;
    }

    async fn record_outcome(&self, event: &WebhookEvent, state: PaymentState) {
        // A late pending or rejected delivery never downgrades a payment
        // that already completed fulfillment.
        if let Some(existing) = self.statuses.by_reference(&event.reference_id).await {
            if existing.state == PaymentState::Accepted {
                tracing::warn!(
                    reference = %event.reference_id,
                    incoming = ?state,
                    "ignoring stale outcome for a fulfilled payment"
                );
                return;
            }
        }
        self.statuses
            .upsert(PaymentStatusRecord {
                transaction_id: event.transaction_id.clone(),
                reference: event.reference_id.clone(),
                order_id: event.order_id.clone(),
                service_id: event.service_id.clone(),
                state,
                reason: event.response_reason.clone(),
                amount_cop_cents: event
                    .parsed_amount()
                    .map(|a| (a * 100.0).round() as i64),
                paid_until: None,
                updated_at: OffsetDateTime::now_utc(),
            })
            .await;
    }

    /// One pass of the retry task: expire overdue entries into the
    /// compensation ledger, then re-check the rest against the order store.
    pub async fn process_retry_queue(&self) {
        for expired in self.queue.expire_overdue().await {
            self.compensate_expired(&expired).await;
        }

        for queued in self.queue.due_items().await {
            match self.orders.get(&queued.order_id).await {
                Some(order) => {
                    let resolved = self.queue.resolve(&queued.event.reference_id).await;
                    if !resolved {
                        continue;
                    }
                    if let Err(e) = self.process_accepted(&order, &queued.event).await {
                        tracing::error!(
                            order_id = %queued.order_id,
                            error = %e,
                            "queued webhook fulfillment incomplete"
                        );
                    }
                }
                None => self.queue.record_attempt(&queued.event.reference_id).await,
            }
        }
    }

    async fn compensate_expired(&self, expired: &QueuedWebhook) {
        self.ledger
            .record_partial_transaction(
                &expired.event.transaction_id,
                &expired.event.reference_id,
                &expired.order_id,
                expired.event.service_id.as_deref().unwrap_or(""),
                expired.event.customer_email.as_deref().unwrap_or(""),
                expired
                    .event
                    .parsed_amount()
                    .map(|a| (a * 100.0).round() as i64)
                    .unwrap_or(0),
                vec![STEP_PAYMENT.to_string()],
                "order_lookup",
                "confirmed payment never matched a stored order",
                self.config.needs_refund("order_lookup"),
            )
            .await;
    }

    /// Check a payment by reference or transaction id, falling back to the
    /// processor's validation API when the local store has no record.
    pub async fn verify(&self, reference: &str) -> ReconcileResult<Option<PaymentStatusRecord>> {
        if let Some(record) = self.statuses.by_reference(reference).await {
            return Ok(Some(record));
        }
        if let Some(record) = self.statuses.by_transaction(reference).await {
            return Ok(Some(record));
        }

        let Some(tx) = self.gateway.transaction_by_reference(reference).await? else {
            return Ok(None);
        };
        let Some(state) = PaymentState::from_response(ResponseStatus::parse(&tx.response)) else {
            tracing::warn!(
                reference,
                response = %tx.response,
                "processor returned an unrecognized transaction state"
            );
            return Ok(None);
        };

        let record = PaymentStatusRecord {
            transaction_id: tx.transaction_id,
            reference: tx.reference,
            order_id: None,
            service_id: None,
            state,
            reason: None,
            amount_cop_cents: tx.amount.map(|a| (a * 100.0).round() as i64),
            paid_until: None,
            updated_at: OffsetDateTime::now_utc(),
        };
        self.statuses.upsert(record.clone()).await;
        Ok(Some(record))
    }
}

fn valid_email(email: &str) -> bool {
    let email = email.trim();
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.is_empty()
        && domain.contains('.')
        && !domain.starts_with('.')
        && !domain.ends_with('.')
        && !email.contains(char::is_whitespace)
}

/// Colombian mobile numbers: ten digits starting with 3, spaces tolerated.
fn normalize_phone(phone: &str) -> Option<String> {
    let digits: String = phone.chars().filter(|c| !c.is_whitespace()).collect();
    (digits.len() == 10 && digits.starts_with('3') && digits.chars().all(|c| c.is_ascii_digit()))
        .then_some(digits)
}
