//! Retry queue for webhooks that arrived before their checkout order.
//!
//! ePayco delivers at least once and in no particular order, so a confirmed
//! payment can hit the webhook endpoint while the order write is still in
//! flight. Such webhooks wait here and are retried until the order shows up,
//! up to five minutes or ten attempts, whichever comes first.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::event::WebhookEvent;

/// How often queued webhooks are re-checked.
pub const RETRY_INTERVAL: Duration = Duration::from_secs(30);
/// A webhook waits at most this long for its order.
pub const MAX_WAIT: Duration = Duration::from_secs(5 * 60);
/// Attempt cap, independent of the wait limit.
pub const MAX_RETRIES: u32 = 10;

#[derive(Debug, Clone)]
pub struct QueuedWebhook {
    pub event: WebhookEvent,
    pub order_id: String,
    pub enqueued_at: OffsetDateTime,
    pub retries: u32,
}

impl QueuedWebhook {
    fn is_expired(&self, now: OffsetDateTime, max_wait: time::Duration) -> bool {
        self.retries >= MAX_RETRIES || now - self.enqueued_at > max_wait
    }
}

#[derive(Debug, Serialize)]
pub struct QueueStats {
    pub queued: usize,
    pub max_retries_seen: u32,
    pub oldest_age_secs: Option<i64>,
}

/// Keyed by payment reference so a redelivered webhook replaces rather than
/// duplicates its earlier copy.
#[derive(Default)]
pub struct WebhookRetryQueue {
    entries: RwLock<HashMap<String, QueuedWebhook>>,
}

impl WebhookRetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn enqueue(&self, event: WebhookEvent, order_id: String) {
        let reference = event.reference_id.clone();
        let mut entries = self.entries.write().await;
        if entries.contains_key(&reference) {
            tracing::debug!(reference = %reference, "webhook already queued, ignoring redelivery");
            return;
        }
        tracing::info!(
            reference = %reference,
            order_id = %order_id,
            queued = entries.len() + 1,
            "webhook queued awaiting order"
        );
        entries.insert(
            reference,
            QueuedWebhook {
                event,
                order_id,
                enqueued_at: OffsetDateTime::now_utc(),
                retries: 0,
            },
        );
    }

    /// Remove and return every entry past its wait or retry limit.
    pub async fn expire_overdue(&self) -> Vec<QueuedWebhook> {
        let now = OffsetDateTime::now_utc();
        let max_wait = time::Duration::try_from(MAX_WAIT).unwrap_or(time::Duration::minutes(5));

        let mut entries = self.entries.write().await;
        let expired_keys: Vec<String> = entries
            .iter()
            .filter(|(_, q)| q.is_expired(now, max_wait))
            .map(|(k, _)| k.clone())
            .collect();

        let mut expired = Vec::with_capacity(expired_keys.len());
        for key in expired_keys {
            if let Some(q) = entries.remove(&key) {
                tracing::error!(
                    reference = %key,
                    order_id = %q.order_id,
                    retries = q.retries,
                    waited_secs = (now - q.enqueued_at).whole_seconds(),
                    alert = "WEBHOOK_EXPIRED",
                    severity = "HIGH",
                    "queued webhook expired without finding its order"
                );
                expired.push(q);
            }
        }
        expired
    }

    /// Snapshot of everything still waiting, for a retry pass.
    pub async fn due_items(&self) -> Vec<QueuedWebhook> {
        self.entries.read().await.values().cloned().collect()
    }

    /// Drop an entry whose order was found and processed.
    pub async fn resolve(&self, reference: &str) -> bool {
        let removed = self.entries.write().await.remove(reference).is_some();
        if removed {
            tracing::info!(reference, "queued webhook resolved");
        }
        removed
    }

    /// Count a retry attempt that did not find the order.
    pub async fn record_attempt(&self, reference: &str) {
        if let Some(q) = self.entries.write().await.get_mut(reference) {
            q.retries += 1;
            tracing::debug!(
                reference,
                retries = q.retries,
                max = MAX_RETRIES,
                "order still missing for queued webhook"
            );
        }
    }

    pub async fn stats(&self) -> QueueStats {
        let now = OffsetDateTime::now_utc();
        let entries = self.entries.read().await;
        QueueStats {
            queued: entries.len(),
            max_retries_seen: entries.values().map(|q| q.retries).max().unwrap_or(0),
            oldest_age_secs: entries
                .values()
                .map(|q| (now - q.enqueued_at).whole_seconds())
                .max(),
        }
    }
}
