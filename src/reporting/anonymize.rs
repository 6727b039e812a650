//! Address anonymization
//!
//! Offending addresses are never stored. Instead they are turned into a SHA-256
//! token over `address ‖ hour bucket ‖ secret salt`: stable within one UTC hour so
//! violations aggregate, unlinkable across hours, and not invertible without the salt.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Returned by `coarse_address` for identities that are not IP addresses
pub const UNKNOWN_COARSE_ADDRESS: &str = "unknown";

/// Hour-granularity bucket used to scope anonymized ids
pub fn hour_bucket(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H").to_string()
}

/// Address with its low-order part zeroed, kept for operational triage.
/// IPv4 loses the last octet, IPv6 loses the interface identifier (low 64 bits).
pub fn coarse_address(raw: &str) -> String {
    match raw.trim().parse::<IpAddr>().map(|addr| addr.to_canonical()) {
        Ok(IpAddr::V4(ip)) => {
            let [a, b, c, _] = ip.octets();
            Ipv4Addr::new(a, b, c, 0).to_string()
        }
        Ok(IpAddr::V6(ip)) => {
            let masked = u128::from(ip) & !(u64::MAX as u128);
            Ipv6Addr::from(masked).to_string()
        }
        Err(_) => UNKNOWN_COARSE_ADDRESS.to_string(),
    }
}

#[derive(Clone)]
pub struct AnonymizingHasher {
    salt: String,
}

impl AnonymizingHasher {
    pub fn new(salt: impl Into<String>) -> Self {
        Self { salt: salt.into() }
    }

    /// One-way token for `raw` in the hour bucket containing `at`
    pub fn anonymize(&self, raw: &str, at: DateTime<Utc>) -> String {
        let mut hasher = Sha256::new();
        hasher.update(raw.as_bytes());
        hasher.update(hour_bucket(at).as_bytes());
        hasher.update(self.salt.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}

// keep the salt out of debug output
impl std::fmt::Debug for AnonymizingHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnonymizingHasher")
            .field("salt", &"<redacted>")
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 14, h, m, 0).unwrap()
    }

    #[test]
    fn test_same_bucket_yields_same_id() {
        let hasher = AnonymizingHasher::new("pepper");
        let first = hasher.anonymize("198.51.100.7", at(9, 1));
        let second = hasher.anonymize("198.51.100.7", at(9, 59));
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
        assert!(first.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_different_buckets_yield_different_ids() {
        let hasher = AnonymizingHasher::new("pepper");
        assert_ne!(
            hasher.anonymize("198.51.100.7", at(9, 59)),
            hasher.anonymize("198.51.100.7", at(10, 0))
        );
    }

    #[test]
    fn test_salt_and_address_change_the_id() {
        let a = AnonymizingHasher::new("pepper");
        let b = AnonymizingHasher::new("paprika");
        assert_ne!(a.anonymize("198.51.100.7", at(9, 0)), b.anonymize("198.51.100.7", at(9, 0)));
        assert_ne!(a.anonymize("198.51.100.7", at(9, 0)), a.anonymize("198.51.100.8", at(9, 0)));
        assert!(!a.anonymize("198.51.100.7", at(9, 0)).contains("198.51"));
    }

    #[test]
    fn test_hour_bucket_format() {
        assert_eq!(hour_bucket(at(9, 30)), "2024-03-14T09");
    }

    #[test]
    fn test_coarse_address() {
        assert_eq!(coarse_address("198.51.100.7"), "198.51.100.0");
        assert_eq!(coarse_address("2001:db8:1:2:3:4:5:6"), "2001:db8:1:2::");
        assert_eq!(coarse_address("::ffff:203.0.113.9"), "203.0.113.0");
        assert_eq!(coarse_address("unknown"), UNKNOWN_COARSE_ADDRESS);
    }

    #[test]
    fn test_debug_hides_salt() {
        let hasher = AnonymizingHasher::new("pepper");
        assert!(!format!("{:?}", hasher).contains("pepper"));
    }
}
