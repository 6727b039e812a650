//! # Rate Limiter Module
//!
//! This module tracks request counts per client fingerprint over fixed time
//! windows and decides whether each request is allowed or denied.
//!
//! ## Features
//!
//! - **Fixed Window Counting**: Each fingerprint gets a window that starts with its first
//!   request and resets once the configured window size has elapsed
//! - **Retry Hints**: Denied requests carry the time remaining until the window resets
//! - **Sharded State**: Windows live in a `DashMap`, so unrelated fingerprints do not
//!   serialize on a single lock
//! - **Memory Management**: `sweep_expired` drops windows that have already elapsed, and
//!   the number of tracked fingerprints is capped
//!
//! ## Window Semantics
//!
//! A window is expired once `now - window_start >= window`. Inside a live window the
//! count is incremented on every request and the request is denied once the count
//! exceeds the limit. Fixed windows admit a burst of up to `2 * limit` requests
//! straddling a boundary, so limits should be sized with that in mind.
//!
//! ## Capacity
//!
//! Fingerprints come from client-controlled headers, so a caller rotating values could
//! otherwise create one window per request for a whole window length. Once
//! `max_windows` fingerprints are tracked, fingerprints seen for the first time are
//! counted together in a single overflow window until sweeping frees room. The table
//! therefore holds at most `max_windows + 1` entries, give or take concurrent inserts.
//!
//! ## Thread Safety
//!
//! The read-modify-write on a window happens while the map's entry guard is held,
//! so concurrent requests for one fingerprint can never lose an increment.

use dashmap::DashMap;
use tokio::time::{Duration, Instant};
use tracing::debug;

/// Default cap on tracked fingerprints
pub const DEFAULT_MAX_WINDOWS: usize = 100_000;

/// Shared key for fingerprints first seen while the table is full.
/// Not a valid address, so it can never collide with a resolved client.
pub const OVERFLOW_FINGERPRINT: &str = "<overflow>";

///////////////////////////////////////////////////////////////////////////////
//****                         Public Structs                            ****//
///////////////////////////////////////////////////////////////////////////////

/// Counting state for a single fingerprint
#[derive(Debug, Clone, Copy)]
pub struct RateWindow {
    pub window_start: Instant,
    pub count: u32,
}

impl RateWindow {
    fn is_expired(&self, now: Instant, window: Duration) -> bool {
        now.saturating_duration_since(self.window_start) >= window
    }
}

/// Outcome of a single `check`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Zero when allowed
    pub retry_after: Duration,
    /// Requests seen in the current window, including this one
    pub count: u32,
}

impl RateDecision {
    fn allow(count: u32) -> Self {
        Self {
            allowed: true,
            retry_after: Duration::ZERO,
            count,
        }
    }

    pub fn retry_after_ms(&self) -> u64 {
        u64::try_from(self.retry_after.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Fixed-window request counter keyed by client fingerprint
#[derive(Debug)]
pub struct RateWindowStore {
    windows: DashMap<String, RateWindow>,
    limit: u32,
    window: Duration,
    max_windows: usize,
}

impl RateWindowStore {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self::with_max_windows(limit, window, DEFAULT_MAX_WINDOWS)
    }

    pub fn with_max_windows(limit: u32, window: Duration, max_windows: usize) -> Self {
        Self {
            windows: DashMap::new(),
            limit,
            window,
            max_windows: max_windows.max(1),
        }
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Count a request for `fingerprint` and decide whether it is allowed
    pub fn check(&self, fingerprint: &str) -> RateDecision {
        self.check_at(fingerprint, Instant::now())
    }

    /// Same as `check`, with the clock supplied by the caller
    pub fn check_at(&self, fingerprint: &str, now: Instant) -> RateDecision {
        let tracked = self.windows.contains_key(fingerprint);
        let key = if tracked || self.windows.len() < self.max_windows {
            fingerprint
        } else {
            debug!(
                fingerprint = %fingerprint,
                max_windows = self.max_windows,
                "Rate window table full, counting in overflow window"
            );
            OVERFLOW_FINGERPRINT
        };

        let mut entry = self
            .windows
            .entry(key.to_string())
            .or_insert(RateWindow {
                window_start: now,
                count: 0,
            });

        if entry.count == 0 || entry.is_expired(now, self.window) {
            entry.window_start = now;
            entry.count = 1;
            return RateDecision::allow(1);
        }

        entry.count = entry.count.saturating_add(1);

        if entry.count > self.limit {
            let reset_at = entry.window_start + self.window;
            let retry_after = reset_at.saturating_duration_since(now);
            debug!(
                fingerprint = %key,
                count = entry.count,
                limit = self.limit,
                retry_after_ms = retry_after.as_millis() as u64,
                "Rate window exhausted"
            );
            return RateDecision {
                allowed: false,
                retry_after,
                count: entry.count,
            };
        }

        RateDecision::allow(entry.count)
    }

    /// Current window for a fingerprint, if one is tracked
    pub fn window_for(&self, fingerprint: &str) -> Option<RateWindow> {
        self.windows.get(fingerprint).map(|w| *w)
    }

    /// Drop every window that has already elapsed, returning how many were removed
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Instant::now())
    }

    pub fn sweep_expired_at(&self, now: Instant) -> usize {
        let before = self.windows.len();
        let window = self.window;
        self.windows.retain(|_, w| !w.is_expired(now, window));
        before.saturating_sub(self.windows.len())
    }

    /// Number of fingerprints currently tracked
    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

///////////////////////////////////////////////////////////////////////////////
//****                              Tests                                ****//
///////////////////////////////////////////////////////////////////////////////
