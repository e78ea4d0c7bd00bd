//! Error taxonomy for the reconciliation core.
//!
//! Checkout-path errors are specific and surfaced to the caller; webhook-path
//! errors are logged and swallowed behind the generic acknowledgment.

use thiserror::Error;

pub type ReconcileResult<T> = Result<T, ReconcileError>;

#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Client input malformed, incomplete, or failing the price check.
    /// Never retried automatically; `code` is echoed to the caller.
    #[error("{message}")]
    Validation {
        code: &'static str,
        message: String,
        /// Set for `PRICE_MISMATCH` so the client can self-correct.
        correct_amount: Option<i64>,
    },

    #[error("service not found or inactive: {0}")]
    ServiceNotFound(String),

    /// Bad signature, failed integrity check, or unauthorized source IP.
    /// Acknowledged to the processor as generic success, never surfaced.
    #[error("webhook failed authenticity check: {reason}")]
    Authenticity { reason: &'static str },

    /// Payment processor API failure (login, session creation, lookup).
    #[error("payment gateway error: {0}")]
    Gateway(String),

    /// Currency conversion failed with no usable rate at all.
    #[error("currency conversion error: {0}")]
    RateSource(String),

    /// Registration / credential issuance / registry write failure.
    /// Aborts the remaining webhook steps for this event.
    #[error("fulfillment step '{step}' failed: {message}")]
    Fulfillment { step: &'static str, message: String },

    /// Email delivery failure. Recorded for retry, never propagated past
    /// the reconciler once the entitlement exists.
    #[error("notification error: {0}")]
    Notification(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl ReconcileError {
    pub fn validation(code: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            code,
            message: message.into(),
            correct_amount: None,
        }
    }

    /// Error code surfaced in API responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { code, .. } => code,
            Self::ServiceNotFound(_) => "SERVICE_NOT_FOUND",
            Self::Authenticity { .. } => "AUTHENTICITY",
            Self::Gateway(_) => "GATEWAY_ERROR",
            Self::RateSource(_) => "CURRENCY_CONVERSION_ERROR",
            Self::Fulfillment { .. } => "FULFILLMENT_ERROR",
            Self::Notification(_) => "NOTIFICATION_ERROR",
            Self::Http(_) => "UPSTREAM_ERROR",
        }
    }
}
