//! Payment reconciliation core.
//!
//! Reconciles an out-of-order, at-least-once webhook stream from the payment
//! processor against checkout orders held in memory. Confirmed payments run
//! a fulfillment pipeline whose partial failures land in compensation
//! ledgers instead of being rolled back; money is never left silently
//! unaccounted for.

pub mod catalog;
pub mod compensation;
pub mod config;
pub mod error;
pub mod event;
pub mod fulfillment;
pub mod gateway;
pub mod orders;
pub mod pricing;
pub mod queue;
pub mod rates;
pub mod reconciler;
pub mod signature;
pub mod status;

#[cfg(test)]
mod edge_case_tests;

use std::env;
use std::sync::Arc;

pub use catalog::{active_services, find_service, FlowType, Service};
pub use config::PaymentConfig;
pub use error::{ReconcileError, ReconcileResult};
pub use event::{mask_email, ResponseStatus, WebhookEvent};
pub use pricing::{BillingPeriod, PriceGuard};
pub use reconciler::{CheckoutRequest, CheckoutResponse, PaymentReconciler, WebhookDisposition};
pub use status::{PaymentState, PaymentStatusRecord};

use fulfillment::{HttpFulfillmentRegistry, HttpNotifier, HttpSaasRegistrar};
use gateway::ApifyGateway;
use rates::{CurrencyConverter, ExchangeRateApi};

/// Everything the HTTP layer and the background tasks share.
pub struct ReconcilerService {
    pub config: PaymentConfig,
    pub converter: Arc<CurrencyConverter>,
    pub reconciler: Arc<PaymentReconciler>,
}

fn required_url(name: &str) -> ReconcileResult<String> {
    env::var(name).map_err(|_| {
        ReconcileError::validation("CONFIG", format!("missing environment variable {name}"))
    })
}

impl ReconcilerService {
    /// Build the full service from the environment, with real HTTP
    /// collaborators. Fails fast on missing configuration.
    pub fn from_env() -> ReconcileResult<Self> {
        let config = PaymentConfig::from_env()?;
        let converter = Arc::new(CurrencyConverter::new(
            Arc::new(ExchangeRateApi::default()),
            config.default_usd_cop_rate,
        ));

        let gateway = Arc::new(ApifyGateway::new(&config));
        let registrar = Arc::new(HttpSaasRegistrar::new(required_url("SAAS_REGISTRATION_URL")?));
        let registry = Arc::new(HttpFulfillmentRegistry::new(required_url(
            "FULFILLMENT_REGISTRY_URL",
        )?));
        let notifier = Arc::new(HttpNotifier::new(required_url("NOTIFICATION_URL")?));

        let reconciler = Arc::new(PaymentReconciler::new(
            config.clone(),
            PriceGuard::new(converter.clone()),
            gateway,
            registrar,
            registry,
            notifier,
        ));

        Ok(Self {
            config,
            converter,
            reconciler,
        })
    }
}
