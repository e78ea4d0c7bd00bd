//! USD→COP currency conversion with a cached, bounded external rate.
//!
//! The external rate API is untrusted input: a bad deploy on their side must
//! not let us charge a customer 10x the real price. Rates outside the
//! historical band are discarded, unusual day-over-day swings are flagged,
//! and the fallback chain is last-known-valid rate, then configured default.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::error::{ReconcileError, ReconcileResult};

/// Historically reasonable COP-per-USD band; anything outside is treated as
/// a rate-source error rather than a market move.
pub const RATE_MIN: f64 = 3500.0;
pub const RATE_MAX: f64 = 5500.0;
/// Day-over-day variation above this is alerted on but still used.
pub const MAX_DAILY_VARIATION: f64 = 0.05;
/// Cached rate time-to-live.
pub const RATE_TTL: Duration = Duration::from_secs(3600);

/// External source of the USD→COP exchange rate.
#[async_trait]
pub trait RateSource: Send + Sync {
    async fn usd_cop_rate(&self) -> ReconcileResult<f64>;
}

/// exchangerate-api.com client.
pub struct ExchangeRateApi {
    client: reqwest::Client,
    base_url: String,
}

impl ExchangeRateApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
        }
    }
}

impl Default for ExchangeRateApi {
    fn default() -> Self {
        Self::new("https://api.exchangerate-api.com")
    }
}

#[async_trait]
impl RateSource for ExchangeRateApi {
    async fn usd_cop_rate(&self) -> ReconcileResult<f64> {
        let url = format!("{}/v4/latest/USD", self.base_url);
        let response = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(5))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ReconcileError::RateSource(format!(
                "rate API returned {}",
                response.status()
            )));
        }

        let body: serde_json::Value = response.json().await?;
        body.get("rates")
            .and_then(|r| r.get("COP"))
            .and_then(|v| v.as_f64())
            .ok_or_else(|| ReconcileError::RateSource("rate API response missing rates.COP".into()))
    }
}

#[derive(Default)]
struct RateCache {
    /// TTL-bounded current rate.
    current: Option<(f64, OffsetDateTime)>,
    /// Last rate that passed the range check; survives TTL expiry.
    last_valid: Option<f64>,
}

/// Converts USD amounts to COP with caching and safety bounds.
pub struct CurrencyConverter {
    source: Arc<dyn RateSource>,
    cache: RwLock<RateCache>,
    default_rate: f64,
}

impl CurrencyConverter {
    pub fn new(source: Arc<dyn RateSource>, default_rate: f64) -> Self {
        Self {
            source,
            cache: RwLock::new(RateCache::default()),
            default_rate,
        }
    }

    /// Current USD→COP rate. Never fails: falls back through the cache and
    /// the configured default, alerting on every anomaly.
    pub async fn usd_cop_rate(&self) -> f64 {
        let now = OffsetDateTime::now_utc();

        {
            let cache = self.cache.read().await;
            if let Some((rate, fetched_at)) = cache.current {
                if now - fetched_at < RATE_TTL {
                    tracing::debug!(rate, "using cached USD/COP rate");
                    return rate;
                }
            }
        }

        match self.source.usd_cop_rate().await {
            Ok(rate) if (RATE_MIN..=RATE_MAX).contains(&rate) => {
                let mut cache = self.cache.write().await;
                if let Some(last) = cache.last_valid {
                    let variation = ((rate - last) / last).abs();
                    if variation > MAX_DAILY_VARIATION {
                        tracing::warn!(
                            old_rate = last,
                            new_rate = rate,
                            variation_pct = variation * 100.0,
                            alert = "UNUSUAL_VARIATION",
                            severity = "MEDIUM",
                            "unusual exchange-rate variation"
                        );
                    }
                }
                cache.current = Some((rate, now));
                cache.last_valid = Some(rate);
                tracing::info!(rate, "USD/COP rate fetched from API");
                rate
            }
            Ok(rate) => {
                tracing::error!(
                    rate,
                    min = RATE_MIN,
                    max = RATE_MAX,
                    alert = "OUT_OF_RANGE",
                    severity = "HIGH",
                    "exchange rate outside expected range"
                );
                self.fallback_rate().await
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    alert = "API_DOWN",
                    severity = "HIGH",
                    "rate API unreachable"
                );
                self.fallback_rate().await
            }
        }
    }

    async fn fallback_rate(&self) -> f64 {
        let cache = self.cache.read().await;
        match cache.last_valid {
            Some(rate) => {
                tracing::warn!(rate, "using last known valid USD/COP rate");
                rate
            }
            None => {
                tracing::warn!(rate = self.default_rate, "using default USD/COP rate");
                self.default_rate
            }
        }
    }

    /// Convert a whole-unit USD amount to COP centavos.
    pub async fn usd_to_cop_cents(&self, amount_usd: i64) -> ReconcileResult<i64> {
        if amount_usd <= 0 {
            return Err(ReconcileError::RateSource(format!(
                "invalid amount for conversion: {amount_usd}"
            )));
        }

        if amount_usd > 10_000 {
            tracing::warn!(
                amount_usd,
                alert = "HIGH_AMOUNT_CONVERSION",
                severity = "MEDIUM",
                "unusually high conversion amount"
            );
        }

        let rate = self.usd_cop_rate().await;
        let cents = (amount_usd as f64 * rate * 100.0).round() as i64;
        tracing::debug!(amount_usd, rate, amount_cop_cents = cents, "currency conversion");
        Ok(cents)
    }

    /// Drop the TTL-bounded rate so the next read refetches.
    pub async fn invalidate(&self) {
        self.cache.write().await.current = None;
    }

    /// Last rate that passed validation, for diagnostics.
    pub async fn last_valid_rate(&self) -> Option<f64> {
        self.cache.read().await.last_valid
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FixedRate(f64);

    #[async_trait]
    impl RateSource for FixedRate {
        async fn usd_cop_rate(&self) -> ReconcileResult<f64> {
            Ok(self.0)
        }
    }

    struct FailingSource;

    #[async_trait]
    impl RateSource for FailingSource {
        async fn usd_cop_rate(&self) -> ReconcileResult<f64> {
            Err(ReconcileError::RateSource("down".into()))
        }
    }

    struct CountingSource {
        rate: f64,
        calls: AtomicU32,
    }

    #[async_trait]
    impl RateSource for CountingSource {
        async fn usd_cop_rate(&self) -> ReconcileResult<f64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.rate)
        }
    }

    #[tokio::test]
    async fn in_range_rate_is_used_and_cached() {
        let source = Arc::new(CountingSource {
            rate: 4000.0,
            calls: AtomicU32::new(0),
        });
        let converter = CurrencyConverter::new(source.clone(), 4200.0);

        assert_eq!(converter.usd_cop_rate().await, 4000.0);
        assert_eq!(converter.usd_cop_rate().await, 4000.0);
        assert_eq!(source.calls.load(Ordering::SeqCst), 1, "second read hits cache");
    }

    #[tokio::test]
    async fn out_of_range_rate_falls_back_to_default() {
        let converter = CurrencyConverter::new(Arc::new(FixedRate(9000.0)), 4200.0);
        assert_eq!(converter.usd_cop_rate().await, 4200.0);
        assert_eq!(converter.last_valid_rate().await, None);
    }

    #[tokio::test]
    async fn api_failure_falls_back_to_last_valid() {
        let converter = CurrencyConverter::new(Arc::new(FixedRate(4100.0)), 4200.0);
        assert_eq!(converter.usd_cop_rate().await, 4100.0);

        // Swap in a failing source behind the same cache.
        let converter = CurrencyConverter {
            source: Arc::new(FailingSource),
            cache: RwLock::new(RateCache {
                current: None,
                last_valid: Some(4100.0),
            }),
            default_rate: 4200.0,
        };
        assert_eq!(converter.usd_cop_rate().await, 4100.0);
    }

    #[tokio::test]
    async fn api_failure_with_empty_cache_uses_default() {
        let converter = CurrencyConverter::new(Arc::new(FailingSource), 4200.0);
        assert_eq!(converter.usd_cop_rate().await, 4200.0);
    }

    #[tokio::test]
    async fn conversion_rounds_to_nearest_centavo() {
        let converter = CurrencyConverter::new(Arc::new(FixedRate(4000.5)), 4200.0);
        // 20 USD * 4000.5 = 80_010 COP = 8_001_000 centavos
        assert_eq!(converter.usd_to_cop_cents(20).await.unwrap(), 8_001_000);
    }

    #[tokio::test]
    async fn conversion_rejects_non_positive_amounts() {
        let converter = CurrencyConverter::new(Arc::new(FixedRate(4000.0)), 4200.0);
        assert!(converter.usd_to_cop_cents(0).await.is_err());
        assert!(converter.usd_to_cop_cents(-5).await.is_err());
    }
}
