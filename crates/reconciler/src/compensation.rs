//! Compensation ledgers for partial fulfillment failures.
//!
//! A confirmed payment may still fail one of its fulfillment steps. Nothing
//! here is rolled back; the failure is recorded with everything needed to
//! finish the job by hand or by the retry task, and the operator is alerted
//! at a severity matching how much of the flow completed.

use std::collections::HashMap;
use std::sync::Arc;

use rand::distr::Alphanumeric;
use rand::Rng;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::event::mask_email;
use crate::fulfillment::{ConfirmationEmail, Notifier, TransactionRecord};

/// Confirmation emails are retried at most this many times.
pub const MAX_EMAIL_RETRIES: u32 = 5;
/// How often the email retry task runs.
pub const EMAIL_RETRY_INTERVAL: std::time::Duration = std::time::Duration::from_secs(5 * 60);

fn compensation_id(kind: &str) -> String {
    let millis = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
    let suffix: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(9)
        .map(char::from)
        .collect();
    format!("{kind}-{millis}-{suffix}")
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedEmail {
    pub id: String,
    pub to: String,
    pub email: ConfirmationEmail,
    pub error: String,
    pub retry_count: u32,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone, Serialize)]
pub struct FailedRegistryWrite {
    pub id: String,
    pub record: TransactionRecord,
    pub error: String,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// A confirmed payment whose fulfillment stopped partway through.
#[derive(Debug, Clone, Serialize)]
pub struct PartialTransaction {
    pub id: String,
    pub transaction_id: String,
    pub reference: String,
    pub order_id: String,
    pub service_id: String,
    pub customer_email: String,
    pub amount_cop_cents: i64,
    pub completed_steps: Vec<String>,
    pub failed_step: String,
    pub error: String,
    pub needs_refund: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// An entry handed back to the operator when it is resolved.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum ResolvedEntry {
    Email(FailedEmail),
    RegistryWrite(FailedRegistryWrite),
    Partial(PartialTransaction),
}

#[derive(Debug, Serialize)]
pub struct CompensationStats {
    pub failed_emails: usize,
    pub failed_registry_writes: usize,
    pub partial_transactions: usize,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct CompensationReport {
    pub failed_emails: Vec<FailedEmail>,
    pub failed_registry_writes: Vec<FailedRegistryWrite>,
    pub partial_transactions: Vec<PartialTransaction>,
}

#[derive(Debug, Default, Serialize)]
pub struct EmailRetryOutcome {
    pub attempted: usize,
    pub delivered: usize,
    pub still_failing: usize,
    pub abandoned: usize,
}

#[derive(Default)]
pub struct CompensationLedger {
    emails: RwLock<HashMap<String, FailedEmail>>,
    registry_writes: RwLock<HashMap<String, FailedRegistryWrite>>,
    partials: RwLock<HashMap<String, PartialTransaction>>,
}

impl CompensationLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record_failed_email(
        &self,
        to: &str,
        email: ConfirmationEmail,
        error: &str,
    ) -> String {
        let id = compensation_id("EMAIL");
        tracing::error!(
            compensation_id = %id,
            to = %mask_email(to),
            error,
            alert = "EMAIL_DELIVERY_FAILED",
            severity = "HIGH",
            "confirmation email failed, queued for retry"
        );
        self.emails.write().await.insert(
            id.clone(),
            FailedEmail {
                id: id.clone(),
                to: to.to_string(),
                email,
                error: error.to_string(),
                retry_count: 0,
                created_at: OffsetDateTime::now_utc(),
            },
        );
        id
    }

    pub async fn record_failed_registry_write(
        &self,
        record: TransactionRecord,
        error: &str,
    ) -> String {
        let id = compensation_id("SHEET");
        tracing::error!(
            compensation_id = %id,
            transaction_id = %record.transaction_id,
            error,
            alert = "REGISTRY_WRITE_FAILED",
            severity = "HIGH",
            "transaction registry write failed"
        );
        self.registry_writes.write().await.insert(
            id.clone(),
            FailedRegistryWrite {
                id: id.clone(),
                record,
                error: error.to_string(),
                created_at: OffsetDateTime::now_utc(),
            },
        );
        id
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn record_partial_transaction(
        &self,
        transaction_id: &str,
        reference: &str,
        order_id: &str,
        service_id: &str,
        customer_email: &str,
        amount_cop_cents: i64,
        completed_steps: Vec<String>,
        failed_step: &str,
        error: &str,
        needs_refund: bool,
    ) -> String {
        let id = compensation_id("PARTIAL");
        tracing::error!(
            compensation_id = %id,
            transaction_id,
            order_id,
            failed_step,
            completed = ?completed_steps,
            needs_refund,
            alert = "PARTIAL_TRANSACTION",
            severity = "CRITICAL",
            "payment confirmed but fulfillment incomplete"
        );
        self.partials.write().await.insert(
            id.clone(),
            PartialTransaction {
                id: id.clone(),
                transaction_id: transaction_id.to_string(),
                reference: reference.to_string(),
                order_id: order_id.to_string(),
                service_id: service_id.to_string(),
                customer_email: customer_email.to_string(),
                amount_cop_cents,
                completed_steps,
                failed_step: failed_step.to_string(),
                error: error.to_string(),
                needs_refund,
                created_at: OffsetDateTime::now_utc(),
            },
        );
        id
    }

    /// Retry every outstanding email under the attempt cap. Delivered
    /// entries leave the ledger.
    pub async fn retry_failed_emails(&self, notifier: &Arc<dyn Notifier>) -> EmailRetryOutcome {
        let pending: Vec<FailedEmail> = {
            let emails = self.emails.read().await;
            emails
                .values()
                .filter(|e| e.retry_count < MAX_EMAIL_RETRIES)
                .cloned()
                .collect()
        };

        let mut outcome = EmailRetryOutcome {
            attempted: pending.len(),
            ..EmailRetryOutcome::default()
        };

        for entry in pending {
            match notifier.send_payment_confirmation(&entry.to, &entry.email).await {
                Ok(()) => {
                    self.emails.write().await.remove(&entry.id);
                    tracing::info!(
                        compensation_id = %entry.id,
                        to = %mask_email(&entry.to),
                        "queued confirmation email delivered"
                    );
                    outcome.delivered += 1;
                }
                Err(err) => {
                    let mut emails = self.emails.write().await;
                    if let Some(e) = emails.get_mut(&entry.id) {
                        e.retry_count += 1;
                        e.error = err.to_string();
                        if e.retry_count >= MAX_EMAIL_RETRIES {
                            tracing::error!(
                                compensation_id = %e.id,
                                to = %mask_email(&e.to),
                                retries = e.retry_count,
                                alert = "EMAIL_RETRIES_EXHAUSTED",
                                severity = "CRITICAL",
                                "confirmation email abandoned after retry cap"
                            );
                            outcome.abandoned += 1;
                        } else {
                            outcome.still_failing += 1;
                        }
                    }
                }
            }
        }
        outcome
    }

    /// Resolve a ledger entry: remove it and hand it back. `kind` is one of
    /// `email`, `registry`, `partial`. Unknown kinds and ids return `None`.
    pub async fn resolve(&self, kind: &str, id: &str) -> Option<ResolvedEntry> {
        let entry = match kind {
            "email" => self.emails.write().await.remove(id).map(ResolvedEntry::Email),
            "registry" => self
                .registry_writes
                .write()
                .await
                .remove(id)
                .map(ResolvedEntry::RegistryWrite),
            "partial" => self
                .partials
                .write()
                .await
                .remove(id)
                .map(ResolvedEntry::Partial),
            _ => None,
        };
        if entry.is_some() {
            tracing::info!(kind, id, "compensation entry resolved");
        }
        entry
    }

    pub async fn stats(&self) -> CompensationStats {
        let emails = self.emails.read().await.len();
        let writes = self.registry_writes.read().await.len();
        let partials = self.partials.read().await.len();

        CompensationStats {
            failed_emails: emails,
            failed_registry_writes: writes,
            partial_transactions: partials,
            total: emails + writes + partials,
        }
    }

    /// Full dump of the outstanding entries for the operator endpoint.
    pub async fn report(&self) -> CompensationReport {
        CompensationReport {
            failed_emails: self.emails.read().await.values().cloned().collect(),
            failed_registry_writes: self
                .registry_writes
                .read()
                .await
                .values()
                .cloned()
                .collect(),
            partial_transactions: self.partials.read().await.values().cloned().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::error::{ReconcileError, ReconcileResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn sample_email() -> ConfirmationEmail {
        ConfirmationEmail {
            customer_name: "Ana".into(),
            service_name: "Rasi Assistant".into(),
            amount_cop_cents: 8_000_000,
            reference: "ref-1".into(),
            transaction_id: "123456".into(),
        }
    }

    struct AlwaysFails;

    #[async_trait]
    impl Notifier for AlwaysFails {
        async fn send_payment_confirmation(
            &self,
            _to: &str,
            _email: &ConfirmationEmail,
        ) -> ReconcileResult<()> {
            Err(ReconcileError::Notification("smtp down".into()))
        }
    }

    struct SucceedsAfter {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Notifier for SucceedsAfter {
        async fn send_payment_confirmation(
            &self,
            _to: &str,
            _email: &ConfirmationEmail,
        ) -> ReconcileResult<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(ReconcileError::Notification("smtp down".into()))
            } else {
                Ok(())
            }
        }
    }

    #[test]
    fn ids_carry_the_kind_prefix() {
        let id = compensation_id("PARTIAL");
        assert!(id.starts_with("PARTIAL-"));
        assert_eq!(id.split('-').count(), 3);
    }

    #[tokio::test]
    async fn retry_delivers_and_clears_the_entry() {
        let ledger = CompensationLedger::new();
        ledger
            .record_failed_email("ana@example.com", sample_email(), "smtp down")
            .await;

        let notifier: Arc<dyn Notifier> = Arc::new(SucceedsAfter {
            failures: 0,
            calls: AtomicU32::new(0),
        });
        let outcome = ledger.retry_failed_emails(&notifier).await;

        assert_eq!(outcome.delivered, 1);
        assert_eq!(ledger.stats().await.total, 0);
        assert!(ledger.report().await.failed_emails.is_empty());
    }

    #[tokio::test]
    async fn retry_cap_abandons_the_email() {
        let ledger = CompensationLedger::new();
        ledger
            .record_failed_email("ana@example.com", sample_email(), "smtp down")
            .await;

        let notifier: Arc<dyn Notifier> = Arc::new(AlwaysFails);
        for _ in 0..MAX_EMAIL_RETRIES - 1 {
            let outcome = ledger.retry_failed_emails(&notifier).await;
            assert_eq!(outcome.still_failing + outcome.abandoned, 1);
        }
        let last = ledger.retry_failed_emails(&notifier).await;
        assert_eq!(last.abandoned, 1);

        // Past the cap nothing is attempted anymore.
        let after = ledger.retry_failed_emails(&notifier).await;
        assert_eq!(after.attempted, 0);
    }

    #[tokio::test]
    async fn resolve_removes_the_entry_and_returns_it() {
        let ledger = CompensationLedger::new();
        let id = ledger
            .record_partial_transaction(
                "123456",
                "ref-1",
                "ORD-1700000000000-user-7",
                "rasi-assistant",
                "ana@example.com",
                8_000_000,
                vec!["payment".into()],
                "saas_registration",
                "registration service returned 500",
                false,
            )
            .await;

        assert_eq!(ledger.stats().await.total, 1);
        match ledger.resolve("partial", &id).await {
            Some(ResolvedEntry::Partial(partial)) => {
                assert_eq!(partial.id, id);
                assert_eq!(partial.failed_step, "saas_registration");
            }
            other => panic!("unexpected resolution: {other:?}"),
        }
        assert_eq!(ledger.stats().await.total, 0);
        assert!(ledger.report().await.partial_transactions.is_empty());

        // Already gone; resolving twice or with a bad kind finds nothing.
        assert!(ledger.resolve("partial", &id).await.is_none());
        assert!(ledger.resolve("partial", "PARTIAL-0-missing").await.is_none());
        assert!(ledger.resolve("bogus", &id).await.is_none());
    }

    #[tokio::test]
    async fn report_lists_outstanding_entries() {
        let ledger = CompensationLedger::new();
        let email_id = ledger
            .record_failed_email("ana@example.com", sample_email(), "smtp down")
            .await;
        ledger.resolve("email", &email_id).await;

        let record = TransactionRecord {
            transaction_id: "123456".into(),
            reference: "ref-1".into(),
            order_id: "ORD-1700000000000-user-7".into(),
            service_id: "rasi-assistant".into(),
            service_name: "Rasi Assistant".into(),
            amount_cop_cents: 8_000_000,
            currency: "COP".into(),
            customer_email: "ana@example.com".into(),
            status: "accepted".into(),
            recorded_at: OffsetDateTime::now_utc(),
        };
        ledger.record_failed_registry_write(record, "registry returned 502").await;

        let report = ledger.report().await;
        assert!(report.failed_emails.is_empty());
        assert_eq!(report.failed_registry_writes.len(), 1);
    }
}
