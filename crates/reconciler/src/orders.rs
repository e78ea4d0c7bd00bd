//! Memory-resident store of checkout orders awaiting their webhook.
//!
//! Orders live at most thirty minutes. The sweep runs periodically and doubles
//! as the backstop for orders whose webhook arrived but whose fulfillment
//! failed before the order was released.

use std::collections::HashMap;
use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::event::mask_email;
use crate::pricing::BillingPeriod;

/// Orders older than this are abandoned and swept.
pub const ORDER_TTL: Duration = Duration::from_secs(30 * 60);
/// How often the sweep task runs.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Serialize)]
pub struct Customer {
    pub name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PendingOrder {
    pub order_id: String,
    pub service_id: String,
    pub service_name: String,
    pub period: BillingPeriod,
    pub amount_usd: i64,
    pub amount_cop_cents: i64,
    pub rate: f64,
    pub customer: Customer,
    /// Signup payload carried by credential-flow orders that need a fresh
    /// SaaS account. Absent for pre-provisioned credentials and other flows.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration_data: Option<serde_json::Value>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl PendingOrder {
    fn age(&self, now: OffsetDateTime) -> time::Duration {
        now - self.created_at
    }
}

#[derive(Debug, Serialize)]
pub struct OrderStats {
    pub total: usize,
    pub by_service: HashMap<String, usize>,
    pub oldest_age_secs: Option<i64>,
}

#[derive(Default)]
pub struct OrderStore {
    orders: RwLock<HashMap<String, PendingOrder>>,
}

impl OrderStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put(&self, order: PendingOrder) {
        tracing::info!(
            order_id = %order.order_id,
            service_id = %order.service_id,
            email = %mask_email(&order.customer.email),
            "order stored"
        );
        self.orders.write().await.insert(order.order_id.clone(), order);
    }

    pub async fn get(&self, order_id: &str) -> Option<PendingOrder> {
        self.orders.read().await.get(order_id).cloned()
    }

    /// Release an order after successful fulfillment.
    pub async fn remove(&self, order_id: &str) -> Option<PendingOrder> {
        let removed = self.orders.write().await.remove(order_id);
        if removed.is_some() {
            tracing::info!(order_id, "order released");
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.orders.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.orders.read().await.is_empty()
    }

    /// Delete every order past the TTL. Orders with a negative age mean the
    /// host clock moved backwards; those are deleted too rather than kept
    /// forever.
    pub async fn sweep_expired(&self) -> usize {
        let now = OffsetDateTime::now_utc();
        let ttl = time::Duration::try_from(ORDER_TTL).unwrap_or(time::Duration::minutes(30));

        let mut orders = self.orders.write().await;
        let expired: Vec<String> = orders
            .values()
            .filter(|o| {
                let age = o.age(now);
                age > ttl || age < time::Duration::ZERO
            })
            .map(|o| o.order_id.clone())
            .collect();

        for order_id in &expired {
            if let Some(order) = orders.remove(order_id) {
                tracing::warn!(
                    order_id = %order.order_id,
                    service_id = %order.service_id,
                    email = %mask_email(&order.customer.email),
                    age_secs = order.age(now).whole_seconds(),
                    "expired order swept"
                );
            }
        }

        if !expired.is_empty() {
            tracing::info!(swept = expired.len(), remaining = orders.len(), "order sweep complete");
        }
        expired.len()
    }

    pub async fn stats(&self) -> OrderStats {
        let now = OffsetDateTime::now_utc();
        let orders = self.orders.read().await;

        let mut by_service: HashMap<String, usize> = HashMap::new();
        for order in orders.values() {
            *by_service.entry(order.service_id.clone()).or_default() += 1;
        }

        let oldest_age_secs = orders
            .values()
            .map(|o| o.age(now).whole_seconds())
            .max();

        OrderStats {
            total: orders.len(),
            by_service,
            oldest_age_secs,
        }
    }
}
