//! Webhook authenticity and integrity validation.
//!
//! Integrity runs first and is purely structural; the signature check then
//! proves the event originated from the processor. The caller always
//! acknowledges the request as processed regardless of the result, so a
//! forger learns nothing from the response.

use sha2::{Digest, Sha256};

use crate::event::{ResponseStatus, WebhookEvent};

/// Structural validation: required fields present and well-formed.
///
/// Fails closed on anything outside the four known status words.
pub fn validate_integrity(event: &WebhookEvent) -> bool {
    if event.transaction_id.is_empty()
        || event.amount.is_empty()
        || event.response.is_empty()
        || event.reference_id.is_empty()
    {
        tracing::error!("webhook incomplete - missing critical fields");
        return false;
    }

    if !event.transaction_id.chars().all(|c| c.is_ascii_digit()) {
        tracing::error!(
            transaction_id = %event.transaction_id,
            "invalid transaction_id format"
        );
        return false;
    }

    match event.parsed_amount() {
        Some(amount) if amount > 0.0 => {}
        _ => {
            tracing::error!(amount = %event.amount, "invalid amount in webhook");
            return false;
        }
    }

    if event.status() == ResponseStatus::Unknown {
        tracing::error!(response = %event.response, "invalid response status");
        return false;
    }

    true
}

/// Verify the webhook signature.
///
/// The processor signs `cust_id^private_key^reference^transaction^amount^
/// currency` with SHA-256; the comparison is case-insensitive on the hex.
pub fn validate_signature(event: &WebhookEvent, private_key: &str) -> bool {
    if event.cust_id_client.is_empty()
        || event.reference_id.is_empty()
        || event.transaction_id.is_empty()
        || event.amount.is_empty()
        || event.currency_code.is_empty()
        || event.signature.is_empty()
    {
        tracing::error!("missing fields required for signature validation");
        return false;
    }

    let signed = format!(
        "{}^{}^{}^{}^{}^{}",
        event.cust_id_client,
        private_key,
        event.reference_id,
        event.transaction_id,
        event.amount,
        event.currency_code
    );

    let expected = hex::encode(Sha256::digest(signed.as_bytes()));
    let valid = expected.eq_ignore_ascii_case(&event.signature);

    if !valid {
        // Full event metadata for fraud analysis; the response to the
        // caller stays indistinguishable from success.
        tracing::error!(
            transaction_id = %event.transaction_id,
            reference_id = %event.reference_id,
            amount = %event.amount,
            severity = "HIGH",
            "invalid webhook signature - possible fraud attempt"
        );
    }

    valid
}

/// Record an invalid webhook attempt for security analysis.
pub fn log_invalid_attempt(event: &WebhookEvent, reason: &str, source_ip: Option<&str>) {
    tracing::error!(
        reason = %reason,
        transaction_id = %event.transaction_id,
        reference_id = %event.reference_id,
        amount = %event.amount,
        source_ip = source_ip.unwrap_or("unknown"),
        severity = "HIGH",
        "invalid webhook attempt detected"
    );
}
