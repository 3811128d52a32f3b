//! Header manipulation.
//!
//! # Responsibilities
//! - Resolve the client IP behind proxies
//! - Strip hop-by-hop headers in both directions
//! - Set X-Forwarded-For on proxied requests
//!
//! # Design Decisions
//! - The first *valid* address in X-Forwarded-For wins; garbage entries are
//!   skipped rather than trusted
//! - X-Forwarded-For is replaced, not appended, so clients cannot spoof a
//!   chain through us

use std::net::IpAddr;

use hyper::header::{HeaderMap, HeaderName, HeaderValue};

use crate::http::request::HttpRequest;

/// Placeholder when no address can be determined.
pub const UNKNOWN_IP: &str = "UNKNOWN_IP";

pub const X_FORWARDED_FOR: &str = "x-forwarded-for";
pub const X_REAL_IP: &str = "x-real-ip";

/// Headers that describe a single transport hop and must not be forwarded.
/// `host` and `content-length` are rewritten by the client for the new hop.
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

/// Client address: X-Forwarded-For, then X-Real-IP, then the socket peer.
pub fn client_ip(request: &HttpRequest) -> String {
    if let Some(forwarded) = request.header(X_FORWARDED_FOR) {
        if let Some(ip) = forwarded
            .split(',')
            .map(str::trim)
            .find_map(|part| part.parse::<IpAddr>().ok())
        {
            return ip.to_string();
        }
    }

    if let Some(ip) = request
        .header(X_REAL_IP)
        .and_then(|v| v.trim().parse::<IpAddr>().ok())
    {
        return ip.to_string();
    }

    request
        .peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| UNKNOWN_IP.to_string())
}

pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// Copy end-to-end headers only.
pub fn end_to_end_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !is_hop_by_hop(name) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

/// Replace X-Forwarded-For with the resolved client address.
pub fn set_forwarded_for(headers: &mut HeaderMap, client_ip: &str) {
    if let Ok(value) = HeaderValue::from_str(client_ip) {
        headers.insert(HeaderName::from_static(X_FORWARDED_FOR), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hyper::Method;

    #[test]
    fn client_ip_precedence() {
        let peer = "10.0.0.9:5555".parse().unwrap();

        let forwarded = HttpRequest::builder(Method::GET, "/")
            .header("X-Forwarded-For", "garbage, 203.0.113.7, 10.0.0.1")
            .header("X-Real-IP", "198.51.100.2")
            .peer_addr(peer)
            .build();
        assert_eq!(client_ip(&forwarded), "203.0.113.7");

        let real = HttpRequest::builder(Method::GET, "/")
            .header("X-Real-IP", "198.51.100.2")
            .peer_addr(peer)
            .build();
        assert_eq!(client_ip(&real), "198.51.100.2");

        let direct = HttpRequest::builder(Method::GET, "/").peer_addr(peer).build();
        assert_eq!(client_ip(&direct), "10.0.0.9");

        let unknown = HttpRequest::builder(Method::GET, "/").build();
        assert_eq!(client_ip(&unknown), UNKNOWN_IP);
    }

    #[test]
    fn hop_by_hop_removed() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("host", HeaderValue::from_static("example.com"));
        headers.insert("x-custom", HeaderValue::from_static("yes"));

        let filtered = end_to_end_headers(&headers);
        assert_eq!(filtered.len(), 1);
        assert_eq!(filtered["x-custom"], "yes");
    }
}
