//! Caller identification from HTTP requests.

use axum::http::{HeaderMap, HeaderName};
use std::net::SocketAddr;

/// Address used when no header or peer information is available.
pub const UNKNOWN_ADDRESS: &str = "unknown";

/// Extract the caller address used for address-based limiting.
///
/// Checks `X-Forwarded-For` (first entry) for reverse proxy setups, then
/// `X-Real-IP`, then the connection's peer IP. The value is not validated
/// as an IP address.
pub fn extract_client_address(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = xff.split(',').next().map(str::trim) {
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    if let Some(real_ip) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        let real_ip = real_ip.trim();
        if !real_ip.is_empty() {
            return real_ip.to_string();
        }
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_ADDRESS.to_string())
}

/// Extract the caller's API token, or an empty string if none was sent.
pub fn extract_token(headers: &HeaderMap, header: &HeaderName) -> String {
    headers
        .get(header)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn peer() -> Option<SocketAddr> {
        Some("192.168.1.1:1234".parse().unwrap())
    }

    #[test]
    fn test_forwarded_for_takes_first_entry() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.1, 198.51.100.1"),
        );
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.9"));

        assert_eq!(extract_client_address(&headers, peer()), "203.0.113.1");
    }

    #[test]
    fn test_real_ip_fallback() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("198.51.100.9"));

        assert_eq!(extract_client_address(&headers, peer()), "198.51.100.9");
    }

    #[test]
    fn test_peer_fallback() {
        let headers = HeaderMap::new();

        assert_eq!(extract_client_address(&headers, peer()), "192.168.1.1");
        assert_eq!(extract_client_address(&headers, None), UNKNOWN_ADDRESS);
    }

    #[test]
    fn test_blank_forwarded_for_is_ignored() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static(" , 10.0.0.1"));

        assert_eq!(extract_client_address(&headers, peer()), "192.168.1.1");
    }

    #[test]
    fn test_extract_token() {
        let header = HeaderName::from_static("api_key");
        let mut headers = HeaderMap::new();
        assert_eq!(extract_token(&headers, &header), "");

        headers.insert(header.clone(), HeaderValue::from_static("abc123"));
        assert_eq!(extract_token(&headers, &header), "abc123");
    }
}
