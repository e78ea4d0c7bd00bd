//! Webhook source-IP allowlist.
//!
//! The processor publishes the addresses its webhooks originate from; the
//! webhook route checks the caller against that list before anything else.
//! Development deployments warn and continue so local testing with forged
//! sources stays possible.

use std::net::SocketAddr;

use axum::http::HeaderMap;

/// Published webhook source addresses. Prefix entries cover whole ranges.
const AUTHORIZED_SOURCES: &[&str] = &[
    "181.49.176.18",
    "181.49.176.19",
    "181.49.50.",
    "190.131.241.",
];

const LOCAL_SOURCES: &[&str] = &["127.0.0.1", "::1", "localhost"];

/// Resolve the caller's address, trusting proxy headers when present.
pub fn client_ip(headers: &HeaderMap, remote: SocketAddr) -> String {
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return normalize(first);
            }
        }
    }
    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        return normalize(real_ip.trim());
    }
    normalize(&remote.ip().to_string())
}

/// Strip the IPv4-mapped IPv6 prefix.
fn normalize(ip: &str) -> String {
    ip.strip_prefix("::ffff:").unwrap_or(ip).to_string()
}

pub fn is_authorized(ip: &str, allow_local: bool) -> bool {
    if allow_local && LOCAL_SOURCES.contains(&ip) {
        return true;
    }
    AUTHORIZED_SOURCES
        .iter()
        .any(|source| ip == *source || (source.ends_with('.') && ip.starts_with(source)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn published_addresses_are_authorized() {
        assert!(is_authorized("181.49.176.18", false));
        assert!(is_authorized("181.49.50.77", false));
        assert!(is_authorized("190.131.241.3", false));
    }

    #[test]
    fn unknown_addresses_are_rejected() {
        assert!(!is_authorized("52.10.20.30", false));
        assert!(!is_authorized("181.49.176.200", false));
    }

    #[test]
    fn loopback_is_only_allowed_in_development() {
        assert!(is_authorized("127.0.0.1", true));
        assert!(!is_authorized("127.0.0.1", false));
    }

    #[test]
    fn forwarded_header_takes_the_first_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "181.49.176.18, 10.0.0.1".parse().unwrap(),
        );
        let remote: SocketAddr = "10.0.0.1:9999".parse().unwrap();
        assert_eq!(client_ip(&headers, remote), "181.49.176.18");
    }

    #[test]
    fn mapped_ipv6_is_normalized() {
        let headers = HeaderMap::new();
        let remote: SocketAddr = "[::ffff:127.0.0.1]:9999".parse().unwrap();
        assert_eq!(client_ip(&headers, remote), "127.0.0.1");
    }
}
