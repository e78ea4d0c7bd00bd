//! Service catalog.
//!
//! Canonical prices live here, in the backend: the client-submitted amount
//! is only ever compared against these, never trusted.

use serde::Serialize;

/// Fulfillment path for a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowType {
    /// Manual follow-up after purchase.
    Contact,
    /// Automated account provisioning with issued credentials.
    Credentials,
    /// Automated purchase registration.
    Chatbot,
}

impl FlowType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowType::Contact => "contact",
            FlowType::Credentials => "credentials",
            FlowType::Chatbot => "chatbot",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Service {
    pub id: &'static str,
    pub name: &'static str,
    /// Canonical monthly price in whole units of `currency`.
    pub monthly_price: i64,
    pub currency: &'static str,
    pub description: &'static str,
    pub flow_type: FlowType,
    pub active: bool,
}

const SERVICES: &[Service] = &[
    Service {
        id: "rasi-autocitas",
        name: "Rasi Autocitas",
        monthly_price: 15,
        currency: "USD",
        description: "Appointment management with automated WhatsApp and email reminders.",
        flow_type: FlowType::Contact,
        active: true,
    },
    Service {
        id: "rasi-assistant",
        name: "Rasi Assistant",
        monthly_price: 20,
        currency: "USD",
        description: "Intelligent assistant with immediate access credentials.",
        flow_type: FlowType::Credentials,
        active: true,
    },
    Service {
        id: "rasi-chatbot",
        name: "Rasi Chatbot",
        monthly_price: 225,
        currency: "USD",
        description: "Conversational chatbot for WhatsApp, Instagram and Telegram.",
        flow_type: FlowType::Chatbot,
        active: true,
    },
];

/// Look up an active service by id.
pub fn find_service(service_id: &str) -> Option<&'static Service> {
    SERVICES
        .iter()
        .find(|s| s.id == service_id && s.active)
}

/// All active services, for the catalog endpoint.
pub fn active_services() -> Vec<&'static Service> {
    SERVICES.iter().filter(|s| s.active).collect()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn known_services_are_active() {
        for id in ["rasi-autocitas", "rasi-assistant", "rasi-chatbot"] {
            assert!(find_service(id).is_some(), "{id} should resolve");
        }
    }

    #[test]
    fn unknown_service_is_absent() {
        assert!(find_service("rasi-unknown").is_none());
    }

    #[test]
    fn assistant_uses_credentials_flow() {
        let svc = find_service("rasi-assistant").unwrap();
        assert_eq!(svc.flow_type, FlowType::Credentials);
        assert_eq!(svc.monthly_price, 20);
        assert_eq!(svc.currency, "USD");
    }
}
