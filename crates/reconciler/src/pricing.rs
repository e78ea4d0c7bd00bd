//! Server-side price authority.
//!
//! Client-submitted amounts are advisory only. Every charge is re-derived
//! from the service catalog here, and a mismatch rejects the request with
//! the correct amount attached so the frontend can self-correct.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::catalog::find_service;
use crate::error::{ReconcileError, ReconcileResult};
use crate::rates::CurrencyConverter;

/// Annual plans carry a 10 percent discount over twelve monthly payments.
pub const ANNUAL_DISCOUNT: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingPeriod {
    #[default]
    Monthly,
    Annual,
}

impl BillingPeriod {
    pub fn as_str(self) -> &'static str {
        match self {
            BillingPeriod::Monthly => "monthly",
            BillingPeriod::Annual => "annual",
        }
    }
}

/// A price derived from the catalog, in both currencies.
#[derive(Debug, Clone, Copy)]
pub struct QuotedPrice {
    pub amount_usd: i64,
    pub amount_cop_cents: i64,
    pub rate: f64,
}

pub struct PriceGuard {
    converter: Arc<CurrencyConverter>,
}

impl PriceGuard {
    pub fn new(converter: Arc<CurrencyConverter>) -> Self {
        Self { converter }
    }

    /// The whole-unit USD price the catalog dictates for a service and period.
    pub fn authoritative_usd(service_id: &str, period: BillingPeriod) -> ReconcileResult<i64> {
        let service = find_service(service_id)
            .ok_or_else(|| ReconcileError::ServiceNotFound(service_id.to_string()))?;

        let usd = match period {
            BillingPeriod::Monthly => service.monthly_price,
            BillingPeriod::Annual => {
                (service.monthly_price as f64 * 12.0 * ANNUAL_DISCOUNT).round() as i64
            }
        };
        Ok(usd)
    }

    /// Derive the authoritative price in COP centavos at the current rate.
    pub async fn quote(
        &self,
        service_id: &str,
        period: BillingPeriod,
    ) -> ReconcileResult<QuotedPrice> {
        let amount_usd = Self::authoritative_usd(service_id, period)?;
        let rate = self.converter.usd_cop_rate().await;
        let amount_cop_cents = (amount_usd as f64 * rate * 100.0).round() as i64;
        Ok(QuotedPrice {
            amount_usd,
            amount_cop_cents,
            rate,
        })
    }

    /// Fail-closed check of a submitted COP amount against the catalog price.
    pub async fn verify(
        &self,
        service_id: &str,
        period: BillingPeriod,
        submitted_cop_cents: i64,
    ) -> ReconcileResult<QuotedPrice> {
        let quote = self.quote(service_id, period).await?;
        if submitted_cop_cents != quote.amount_cop_cents {
            tracing::warn!(
                service_id,
                period = period.as_str(),
                submitted_cop_cents,
                expected_cop_cents = quote.amount_cop_cents,
                alert = "PRICE_MISMATCH",
                severity = "HIGH",
                "submitted amount does not match catalog price"
            );
            return Err(ReconcileError::Validation {
                code: "PRICE_MISMATCH",
                message: format!(
                    "submitted amount {} does not match expected {} for {} ({})",
                    submitted_cop_cents,
                    quote.amount_cop_cents,
                    service_id,
                    period.as_str()
                ),
                correct_amount: Some(quote.amount_cop_cents),
            });
        }
        Ok(quote)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use crate::rates::RateSource;
    use async_trait::async_trait;

    struct FixedRate(f64);

    #[async_trait]
    impl RateSource for FixedRate {
        async fn usd_cop_rate(&self) -> ReconcileResult<f64> {
            Ok(self.0)
        }
    }

    fn guard(rate: f64) -> PriceGuard {
        PriceGuard::new(Arc::new(CurrencyConverter::new(
            Arc::new(FixedRate(rate)),
            4200.0,
        )))
    }

    #[test]
    fn annual_price_applies_ten_percent_discount() {
        // 20 * 12 * 0.9 = 216, 15 * 12 * 0.9 = 162
        assert_eq!(
            PriceGuard::authoritative_usd("rasi-assistant", BillingPeriod::Annual).unwrap(),
            216
        );
        assert_eq!(
            PriceGuard::authoritative_usd("rasi-autocitas", BillingPeriod::Annual).unwrap(),
            162
        );
    }

    #[test]
    fn monthly_price_comes_straight_from_catalog() {
        assert_eq!(
            PriceGuard::authoritative_usd("rasi-assistant", BillingPeriod::Monthly).unwrap(),
            20
        );
    }

    #[test]
    fn unknown_service_is_rejected() {
        let err = PriceGuard::authoritative_usd("rasi-nope", BillingPeriod::Monthly).unwrap_err();
        assert!(matches!(err, ReconcileError::ServiceNotFound(_)));
    }

    #[tokio::test]
    async fn verify_accepts_the_exact_catalog_amount() {
        let guard = guard(4000.0);
        // 20 USD * 4000 COP/USD * 100 = 8_000_000 centavos
        let quote = guard
            .verify("rasi-assistant", BillingPeriod::Monthly, 8_000_000)
            .await
            .unwrap();
        assert_eq!(quote.amount_usd, 20);
    }

    #[tokio::test]
    async fn verify_rejects_mismatch_with_correct_amount() {
        let guard = guard(4000.0);
        let err = guard
            .verify("rasi-assistant", BillingPeriod::Monthly, 7_999_999)
            .await
            .unwrap_err();
        match err {
            ReconcileError::Validation {
                code,
                correct_amount,
                ..
            } => {
                assert_eq!(code, "PRICE_MISMATCH");
                assert_eq!(correct_amount, Some(8_000_000));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
