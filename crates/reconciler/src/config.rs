//! Environment-driven configuration for the payment core.

use std::collections::HashSet;
use std::env;

use crate::error::{ReconcileError, ReconcileResult};

/// Configuration for the payment gateway and webhook validation.
///
/// Signature and source-IP validation are explicit flags, never inferred
/// from other settings: the processor's sandbox generates unreliable
/// signatures, so test deployments must opt out deliberately.
#[derive(Debug, Clone)]
pub struct PaymentConfig {
    /// Gateway API public key (Basic-auth username for the token login).
    pub public_key: String,
    /// Gateway API private key; also the webhook signature secret.
    pub private_key: String,
    /// Merchant customer id as it appears in webhook `x_cust_id_cliente`.
    pub cust_id_client: String,
    /// Base URL of the gateway's session API.
    pub apify_url: String,
    /// Base URL of the gateway's transaction-validation API.
    pub validation_url: String,
    /// Sandbox mode: sessions are created as test transactions.
    pub test_mode: bool,
    /// Verify the SHA-256 webhook signature. Disabled only in sandbox
    /// deployments where the processor's test signatures are known bad.
    pub validate_signature: bool,
    /// Reject webhooks from IPs outside the processor's published list.
    pub validate_source_ip: bool,
    /// Allow loopback webhook sources (local development).
    pub allow_local_sources: bool,
    /// Fallback USD→COP rate when the rate API and cache are both unusable.
    pub default_usd_cop_rate: f64,
    pub merchant_name: String,
    pub frontend_url: String,
    /// Optional return/confirmation URLs forwarded to the gateway session.
    pub response_url: Option<String>,
    pub confirmation_url: Option<String>,
    /// Fulfillment steps whose failure flags the partial transaction as
    /// refund-requiring. Empty by default: the historical policy never set
    /// `needs_refund`, operators opt in per step.
    pub refund_required_steps: HashSet<String>,
}

fn required(name: &str) -> ReconcileResult<String> {
    env::var(name).map_err(|_| {
        ReconcileError::validation("CONFIG", format!("missing environment variable {name}"))
    })
}

fn flag(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(v) => v == "true" || v == "1",
        Err(_) => default,
    }
}

impl PaymentConfig {
    pub fn from_env() -> ReconcileResult<Self> {
        let test_mode = flag("EPAYCO_TEST_MODE", false);
        let production = env::var("APP_ENV").map(|v| v == "production").unwrap_or(false);

        Ok(Self {
            public_key: required("EPAYCO_PUBLIC_KEY")?,
            private_key: required("EPAYCO_PRIVATE_KEY")?,
            cust_id_client: required("EPAYCO_CUST_ID")?,
            apify_url: env::var("EPAYCO_APIFY_URL")
                .unwrap_or_else(|_| "https://apify.epayco.co".to_string()),
            validation_url: env::var("EPAYCO_VALIDATION_URL")
                .unwrap_or_else(|_| "https://secure.epayco.co/validation/v1".to_string()),
            test_mode,
            // Sandbox signatures are unreliable; otherwise on in production
            // or when explicitly requested.
            validate_signature: !test_mode && (production || flag("VALIDATE_SIGNATURE", false)),
            validate_source_ip: flag("VALIDATE_SOURCE_IP", true),
            allow_local_sources: !production,
            default_usd_cop_rate: env::var("DEFAULT_USD_COP_RATE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4200.0),
            merchant_name: env::var("MERCHANT_NAME").unwrap_or_else(|_| "Rasi".to_string()),
            frontend_url: env::var("FRONTEND_URL")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),
            response_url: env::var("EPAYCO_RESPONSE_URL").ok(),
            confirmation_url: env::var("EPAYCO_CONFIRMATION_URL").ok(),
            refund_required_steps: env::var("REFUND_REQUIRED_STEPS")
                .map(|v| {
                    v.split(',')
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
        })
    }

    /// Whether a failure at `step` leaves the customer owed a refund.
    ///
    /// The historical default is `false` for every step even when the
    /// entitlement was never granted; operators override per step.
    pub fn needs_refund(&self, step: &str) -> bool {
        self.refund_required_steps.contains(step)
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            public_key: "pub_test".to_string(),
            private_key: "priv_test".to_string(),
            cust_id_client: "901234".to_string(),
            apify_url: "http://localhost:0".to_string(),
            validation_url: "http://localhost:0".to_string(),
            test_mode: false,
            validate_signature: true,
            validate_source_ip: false,
            allow_local_sources: true,
            default_usd_cop_rate: 4200.0,
            merchant_name: "Rasi".to_string(),
            frontend_url: "http://localhost:5173".to_string(),
            response_url: None,
            confirmation_url: None,
            refund_required_steps: HashSet::new(),
        }
    }
}
