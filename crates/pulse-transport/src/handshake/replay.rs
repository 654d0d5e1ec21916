//! # Handshake Replay Cache
//!
//! Rejects stale challenges and signatures that were already accepted.
//!
//! - Challenges are valid from `now - max_age` to `now + max_future_skew`
//! - Accepted signatures are remembered for twice `max_age`
//! - Expired signatures are garbage-collected periodically, bounding memory

use crate::error::HandshakeError;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::collections::HashMap;
use std::time::Duration;

/// Time-bounded set of accepted handshake signatures.
#[derive(Debug)]
pub struct ReplayCache {
    /// Signature -> challenge timestamp.
    seen: HashMap<String, DateTime<Utc>>,
    max_age: Duration,
    max_future_skew: Duration,
    gc_interval: Duration,
    last_gc: DateTime<Utc>,
}

impl ReplayCache {
    pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(60);
    pub const DEFAULT_MAX_FUTURE_SKEW: Duration = Duration::from_secs(10);
    pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(10);

    #[must_use]
    pub fn new() -> Self {
        Self::with_window(Self::DEFAULT_MAX_AGE, Self::DEFAULT_MAX_FUTURE_SKEW)
    }

    #[must_use]
    pub fn with_window(max_age: Duration, max_future_skew: Duration) -> Self {
        Self {
            seen: HashMap::new(),
            max_age,
            max_future_skew,
            gc_interval: Self::DEFAULT_GC_INTERVAL,
            last_gc: Utc::now(),
        }
    }

    /// Checks freshness, then records the signature.
    ///
    /// The timestamp check runs first so that stale frames never touch the
    /// cache.
    pub fn validate_and_add(
        &mut self,
        signature: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<(), HandshakeError> {
        let now = Utc::now();
        self.check_window(timestamp, now)?;

        if now - self.last_gc > to_chrono(self.gc_interval) {
            self.garbage_collect(now);
            self.last_gc = now;
        }

        let key = signature.trim().to_ascii_lowercase();
        if self.seen.contains_key(&key) {
            return Err(HandshakeError::Replayed);
        }
        self.seen.insert(key, timestamp);
        Ok(())
    }

    fn check_window(&self, timestamp: DateTime<Utc>, now: DateTime<Utc>) -> Result<(), HandshakeError> {
        let age = now - timestamp;
        if age > to_chrono(self.max_age) {
            return Err(HandshakeError::Expired {
                age_secs: age.num_seconds(),
                max_age_secs: self.max_age.as_secs(),
            });
        }
        let ahead = timestamp - now;
        if ahead > to_chrono(self.max_future_skew) {
            return Err(HandshakeError::FromFuture {
                ahead_secs: ahead.num_seconds(),
                max_skew_secs: self.max_future_skew.as_secs(),
            });
        }
        Ok(())
    }

    #[must_use]
    pub fn contains(&self, signature: &str) -> bool {
        self.seen.contains_key(&signature.trim().to_ascii_lowercase())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Drops signatures whose challenge can no longer pass the window check.
    fn garbage_collect(&mut self, now: DateTime<Utc>) {
        let threshold = now - to_chrono(self.max_age.saturating_mul(2));
        self.seen.retain(|_, ts| *ts > threshold);
    }
}

impl Default for ReplayCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Out-of-range windows are capped at a century so date arithmetic cannot
/// overflow.
fn to_chrono(duration: Duration) -> ChronoDuration {
    ChronoDuration::from_std(duration)
        .unwrap_or_else(|_| ChronoDuration::days(36_500))
        .min(ChronoDuration::days(36_500))
}
