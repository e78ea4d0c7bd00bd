//! Queryable record of reconciled payment outcomes.

use std::collections::HashMap;

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::event::ResponseStatus;
use crate::pricing::BillingPeriod;

/// Terminal or in-flight state of a payment, as exposed to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentState {
    Accepted,
    Pending,
    Rejected,
}

impl PaymentState {
    /// Failed transactions are reported as rejected; the distinction only
    /// matters inside the reconciler.
    pub fn from_response(status: ResponseStatus) -> Option<Self> {
        match status {
            ResponseStatus::Accepted => Some(Self::Accepted),
            ResponseStatus::Pending => Some(Self::Pending),
            ResponseStatus::Rejected | ResponseStatus::Failed => Some(Self::Rejected),
            ResponseStatus::Unknown => None,
        }
    }
}

pub const DEFAULT_REJECTION_REASON: &str = "Error en la transacción";

#[derive(Debug, Clone, Serialize)]
pub struct PaymentStatusRecord {
    pub transaction_id: String,
    pub reference: String,
    pub order_id: Option<String>,
    pub service_id: Option<String>,
    pub state: PaymentState,
    pub reason: Option<String>,
    pub amount_cop_cents: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[serde(with = "time::serde::rfc3339::option")]
    pub paid_until: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Subscription horizon for an accepted payment.
pub fn paid_until(period: BillingPeriod, from: OffsetDateTime) -> OffsetDateTime {
    match period {
        BillingPeriod::Monthly => from + time::Duration::days(30),
        BillingPeriod::Annual => from + time::Duration::days(365),
    }
}

/// Records keyed by processor transaction id, with a secondary index by
/// payment reference so either identifier resolves a lookup.
#[derive(Default)]
pub struct PaymentStatusStore {
    records: RwLock<HashMap<String, PaymentStatusRecord>>,
    by_reference: RwLock<HashMap<String, String>>,
}

impl PaymentStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn upsert(&self, mut record: PaymentStatusRecord) {
        record.updated_at = OffsetDateTime::now_utc();
        if record.state == PaymentState::Rejected && record.reason.is_none() {
            record.reason = Some(DEFAULT_REJECTION_REASON.to_string());
        }
        tracing::info!(
            transaction_id = %record.transaction_id,
            reference = %record.reference,
            state = ?record.state,
            "payment status recorded"
        );
        self.by_reference
            .write()
            .await
            .insert(record.reference.clone(), record.transaction_id.clone());
        self.records
            .write()
            .await
            .insert(record.transaction_id.clone(), record);
    }

    pub async fn by_transaction(&self, transaction_id: &str) -> Option<PaymentStatusRecord> {
        self.records.read().await.get(transaction_id).cloned()
    }

    pub async fn by_reference(&self, reference: &str) -> Option<PaymentStatusRecord> {
        let transaction_id = self.by_reference.read().await.get(reference).cloned()?;
        self.by_transaction(&transaction_id).await
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}
