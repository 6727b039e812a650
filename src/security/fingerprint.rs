//! Client fingerprint resolution
//!
//! Derives the identity used as the rate limiting key from request headers.
//! Precedence: `x-client-ip` (set by the trusted upstream proxy), then the first
//! hop of `x-forwarded-for`, then the peer socket address, then `"unknown"`.
//! Header values longer than `MAX_FINGERPRINT_LEN` are ignored.

use axum::http::HeaderMap;
use std::fmt;
use std::net::SocketAddr;

pub const CLIENT_IP_HEADER: &str = "x-client-ip";
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Longest accepted header identity; a textual IPv6 address needs at most 45 bytes
pub const MAX_FINGERPRINT_LEN: usize = 64;

/// Fallback identity when neither headers nor the socket address are available
pub const UNKNOWN_FINGERPRINT: &str = "unknown";

/// Which rule produced a fingerprint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FingerprintSource {
    ClientIpHeader,
    ForwardedFor,
    PeerAddress,
    Unknown,
}

impl FingerprintSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            FingerprintSource::ClientIpHeader => "x-client-ip",
            FingerprintSource::ForwardedFor => "x-forwarded-for",
            FingerprintSource::PeerAddress => "peer",
            FingerprintSource::Unknown => "unknown",
        }
    }
}

/// Per-request client identity. Never persisted in raw form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientFingerprint {
    value: String,
    source: FingerprintSource,
}

impl ClientFingerprint {
    pub fn as_str(&self) -> &str {
        &self.value
    }

    pub fn source(&self) -> FingerprintSource {
        self.source
    }

    /// True when the identity came from a header set by the proxy
    pub fn is_from_headers(&self) -> bool {
        matches!(
            self.source,
            FingerprintSource::ClientIpHeader | FingerprintSource::ForwardedFor
        )
    }
}

impl fmt::Display for ClientFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

/// Resolve the fingerprint for a request. Always returns a value.
pub fn resolve_fingerprint(headers: &HeaderMap, peer: Option<SocketAddr>) -> ClientFingerprint {
    if let Some(ip) =
        header_value(headers, CLIENT_IP_HEADER).filter(|v| v.len() <= MAX_FINGERPRINT_LEN)
    {
        return ClientFingerprint {
            value: ip.to_string(),
            source: FingerprintSource::ClientIpHeader,
        };
    }

    // "client, proxy1, proxy2": the leftmost entry is the original client
    if let Some(first_hop) = header_value(headers, FORWARDED_FOR_HEADER)
        .and_then(|list| list.split(',').next())
        .map(str::trim)
        .filter(|hop| !hop.is_empty() && hop.len() <= MAX_FINGERPRINT_LEN)
    {
        return ClientFingerprint {
            value: first_hop.to_string(),
            source: FingerprintSource::ForwardedFor,
        };
    }

    match peer {
        Some(addr) => ClientFingerprint {
            value: addr.ip().to_string(),
            source: FingerprintSource::PeerAddress,
        },
        None => ClientFingerprint {
            value: UNKNOWN_FINGERPRINT.to_string(),
            source: FingerprintSource::Unknown,
        },
    }
}

fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|h| h.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_client_ip_header_wins() {
        let h = headers(&[
            ("x-client-ip", "198.51.100.7"),
            ("x-forwarded-for", "203.0.113.9, 10.0.0.1"),
        ]);
        let fp = resolve_fingerprint(&h, Some("192.0.2.1:4000".parse().unwrap()));
        assert_eq!(fp.as_str(), "198.51.100.7");
        assert_eq!(fp.source(), FingerprintSource::ClientIpHeader);
    }

    #[test]
    fn test_first_forwarded_hop_is_used() {
        let h = headers(&[("x-forwarded-for", " 203.0.113.9 , 10.0.0.1, 10.0.0.2")]);
        let fp = resolve_fingerprint(&h, None);
        assert_eq!(fp.as_str(), "203.0.113.9");
        assert!(fp.is_from_headers());
    }

    #[test]
    fn test_blank_headers_fall_through() {
        let h = headers(&[("x-client-ip", "   "), ("x-forwarded-for", ", 10.0.0.1")]);
        let fp = resolve_fingerprint(&h, Some("192.0.2.1:4000".parse().unwrap()));
        assert_eq!(fp.as_str(), "192.0.2.1");
        assert_eq!(fp.source(), FingerprintSource::PeerAddress);
    }

    #[test]
    fn test_oversized_header_values_are_ignored() {
        let long = "a".repeat(MAX_FINGERPRINT_LEN + 1);
        let mut h = HeaderMap::new();
        h.insert("x-client-ip", HeaderValue::from_str(&long).unwrap());
        h.insert(
            "x-forwarded-for",
            HeaderValue::from_str(&format!("{}, 10.0.0.1", long)).unwrap(),
        );

        let fp = resolve_fingerprint(&h, Some("192.0.2.1:4000".parse().unwrap()));
        assert_eq!(fp.as_str(), "192.0.2.1");
        assert_eq!(fp.source(), FingerprintSource::PeerAddress);
    }

    #[test]
    fn test_unknown_when_nothing_available() {
        let fp = resolve_fingerprint(&HeaderMap::new(), None);
        assert_eq!(fp.as_str(), UNKNOWN_FINGERPRINT);
        assert_eq!(fp.source(), FingerprintSource::Unknown);
        assert!(!fp.is_from_headers());
    }
}
