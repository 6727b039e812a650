//! Allowlist matching
//!
//! Entries are either a single address (`10.1.2.3`) or an inclusive range
//! (`10.0.0.0-10.0.0.255`). Range bounds are compared as integers, never as
//! strings, so `9.0.0.1` does not fall inside `10.0.0.0-10.0.0.255`.

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Errors raised while loading the allowlist
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowlistError {
    InvalidAddress(String),
    MixedFamilies(String),
    ReversedRange(String),
}

impl fmt::Display for AllowlistError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AllowlistError::InvalidAddress(entry) => {
                write!(f, "Invalid address in allowlist entry '{}'", entry)
            }
            AllowlistError::MixedFamilies(entry) => {
                write!(f, "Range '{}' mixes IPv4 and IPv6 bounds", entry)
            }
            AllowlistError::ReversedRange(entry) => {
                write!(f, "Range '{}' starts after it ends", entry)
            }
        }
    }
}

impl std::error::Error for AllowlistError {}

/// A single allowlist entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowlistEntry {
    Single(IpAddr),
    V4Range { start: u32, end: u32 },
    V6Range { start: u128, end: u128 },
}

impl AllowlistEntry {
    pub fn contains(&self, addr: &IpAddr) -> bool {
        match (self, addr) {
            (AllowlistEntry::Single(entry), _) => entry == addr,
            (AllowlistEntry::V4Range { start, end }, IpAddr::V4(ip)) => {
                let value = u32::from(*ip);
                *start <= value && value <= *end
            }
            (AllowlistEntry::V6Range { start, end }, IpAddr::V6(ip)) => {
                let value = u128::from(*ip);
                *start <= value && value <= *end
            }
            _ => false,
        }
    }
}

impl FromStr for AllowlistEntry {
    type Err = AllowlistError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let entry = raw.trim();

        let Some((start, end)) = entry.split_once('-') else {
            return parse_addr(entry, entry).map(AllowlistEntry::Single);
        };

        match (parse_addr(start, entry)?, parse_addr(end, entry)?) {
            (IpAddr::V4(start), IpAddr::V4(end)) => {
                let (start, end) = (u32::from(start), u32::from(end));
                if start > end {
                    return Err(AllowlistError::ReversedRange(entry.to_string()));
                }
                Ok(AllowlistEntry::V4Range { start, end })
            }
            (IpAddr::V6(start), IpAddr::V6(end)) => {
                let (start, end) = (u128::from(start), u128::from(end));
                if start > end {
                    return Err(AllowlistError::ReversedRange(entry.to_string()));
                }
                Ok(AllowlistEntry::V6Range { start, end })
            }
            _ => Err(AllowlistError::MixedFamilies(entry.to_string())),
        }
    }
}

/// Immutable set of exempt identities, loaded once at start-up
#[derive(Debug, Clone, Default)]
pub struct Allowlist {
    entries: Vec<AllowlistEntry>,
}

impl Allowlist {
    /// Parse a comma-separated list of addresses and ranges. Blank items are skipped.
    pub fn parse(csv: &str) -> Result<Self, AllowlistError> {
        let entries = csv
            .split(',')
            .map(str::trim)
            .filter(|item| !item.is_empty())
            .map(AllowlistEntry::from_str)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { entries })
    }

    /// Whether a resolved identity is exempt from limiting.
    /// Identities that are not IP addresses never match.
    pub fn is_allowed(&self, identity: &str) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let Ok(addr) = identity.trim().parse::<IpAddr>() else {
            return false;
        };
        let addr = addr.to_canonical();
        self.entries.iter().any(|entry| entry.contains(&addr))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_addr(value: &str, entry: &str) -> Result<IpAddr, AllowlistError> {
    value
        .trim()
        .parse::<IpAddr>()
        .map(|addr| addr.to_canonical())
        .map_err(|_| AllowlistError::InvalidAddress(entry.to_string()))
}
