//! Processor-agnostic webhook event model.
//!
//! The processor posts url-encoded `x_`-prefixed fields; this maps them onto
//! a typed event. `amount` stays a raw string because the signature digest
//! covers the amount exactly as the processor formatted it.

use serde::{Deserialize, Serialize};

/// Transaction outcome reported by the processor.
///
/// The wire values are the processor's Spanish status words, compared
/// case-insensitively. Anything else parses to `Unknown`, which fails the
/// integrity check but is still handled conservatively downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseStatus {
    Accepted,
    Pending,
    Rejected,
    Failed,
    Unknown,
}

impl ResponseStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.to_lowercase().as_str() {
            "aceptada" => Self::Accepted,
            "pendiente" => Self::Pending,
            "rechazada" => Self::Rejected,
            "fallida" => Self::Failed,
            _ => Self::Unknown,
        }
    }
}

/// A payment notification delivered by the processor.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WebhookEvent {
    #[serde(rename = "x_transaction_id", default)]
    pub transaction_id: String,
    /// Processor-side reference id, the secondary correlation key.
    #[serde(rename = "x_ref_payco", default)]
    pub reference_id: String,
    /// Amount exactly as formatted by the processor.
    #[serde(rename = "x_amount", default)]
    pub amount: String,
    #[serde(rename = "x_currency_code", default)]
    pub currency_code: String,
    #[serde(rename = "x_customer_email", default)]
    pub customer_email: Option<String>,
    #[serde(rename = "x_customer_movil", default)]
    pub customer_phone: Option<String>,
    #[serde(rename = "x_response", default)]
    pub response: String,
    #[serde(rename = "x_response_reason_text", default)]
    pub response_reason: Option<String>,
    /// Merchant correlation id round-tripped through the processor
    /// (supplied as `extra1` at session-creation time).
    #[serde(rename = "x_extra1", default)]
    pub order_id: Option<String>,
    #[serde(rename = "x_extra2", default)]
    pub service_id: Option<String>,
    #[serde(rename = "x_extra5", default)]
    pub service_name: Option<String>,
    #[serde(rename = "x_signature", default)]
    pub signature: String,
    #[serde(rename = "x_cust_id_cliente", default)]
    pub cust_id_client: String,
}

impl WebhookEvent {
    pub fn status(&self) -> ResponseStatus {
        ResponseStatus::parse(&self.response)
    }

    /// Amount parsed for validation; the raw string is kept for signing.
    pub fn parsed_amount(&self) -> Option<f64> {
        self.amount.trim().parse::<f64>().ok()
    }
}

/// Mask an email for logs, keeping only the tail for correlation.
pub fn mask_email(email: &str) -> String {
    let tail: String = email
        .chars()
        .rev()
        .take(10)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("***{tail}")
}
