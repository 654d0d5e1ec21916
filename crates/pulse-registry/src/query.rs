//! Registry filters and partial updates.

use chrono::{DateTime, Utc};
use pulse_types::{Intent, Metadata, Pulse, PulseStatus};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Conjunctive filter over stored pulses. Unset fields match everything.
/// Ranges are inclusive.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PulseQuery {
    pub origin: Option<String>,
    pub target: Option<String>,
    pub intent: Option<Intent>,
    pub status: Option<PulseStatus>,
    pub min_coherence: Option<f64>,
    pub max_coherence: Option<f64>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
}

impl PulseQuery {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = Some(origin.into());
        self
    }

    #[must_use]
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    #[must_use]
    pub fn intent(mut self, intent: Intent) -> Self {
        self.intent = Some(intent);
        self
    }

    #[must_use]
    pub fn status(mut self, status: PulseStatus) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn coherence_between(mut self, min: f64, max: f64) -> Self {
        self.min_coherence = Some(min);
        self.max_coherence = Some(max);
        self
    }

    #[must_use]
    pub fn time_between(mut self, since: DateTime<Utc>, until: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self.until = Some(until);
        self
    }

    /// True if `pulse` satisfies every set criterion.
    #[must_use]
    pub fn matches(&self, pulse: &Pulse) -> bool {
        self.origin.as_deref().map_or(true, |o| pulse.origin == o)
            && self.target.as_deref().map_or(true, |t| pulse.target == t)
            && self.intent.map_or(true, |i| pulse.intent == i)
            && self.status.map_or(true, |s| pulse.status == s)
            && self.min_coherence.map_or(true, |m| pulse.coherence >= m)
            && self.max_coherence.map_or(true, |m| pulse.coherence <= m)
            && self.since.map_or(true, |s| pulse.timestamp >= s)
            && self.until.map_or(true, |u| pulse.timestamp <= u)
    }
}

/// Partial update merged into a stored pulse. `id` and `timestamp` are
/// immutable; metadata keys are merged rather than replaced.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PulseUpdate {
    pub origin: Option<String>,
    pub target: Option<String>,
    pub topic: Option<String>,
    pub intent: Option<Intent>,
    pub payload: Option<Value>,
    pub coherence: Option<f64>,
    pub status: Option<PulseStatus>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl PulseUpdate {
    /// An update that only sets coherence.
    pub fn coherence(value: f64) -> Self {
        Self {
            coherence: Some(value),
            ..Self::default()
        }
    }

    /// An update that only moves the status.
    pub fn status(status: PulseStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_types::PulseDraft;

    fn pulse(origin: &str, intent: Intent, coherence: f64) -> Pulse {
        PulseDraft::new("t")
            .origin(origin)
            .target("core")
            .intent(intent)
            .coherence(coherence)
            .finish(1.0)
    }

    #[test]
    fn test_empty_query_matches_all() {
        assert!(PulseQuery::new().matches(&pulse("a", Intent::Query, 0.1)));
    }

    #[test]
    fn test_criteria_are_conjunctive() {
        let q = PulseQuery::new().origin("a").intent(Intent::Query);
        assert!(q.matches(&pulse("a", Intent::Query, 0.5)));
        assert!(!q.matches(&pulse("a", Intent::Update, 0.5)));
        assert!(!q.matches(&pulse("b", Intent::Query, 0.5)));
    }

    #[test]
    fn test_coherence_range_inclusive() {
        let q = PulseQuery::new().coherence_between(0.5, 0.8);
        assert!(q.matches(&pulse("a", Intent::Update, 0.5)));
        assert!(q.matches(&pulse("a", Intent::Update, 0.8)));
        assert!(!q.matches(&pulse("a", Intent::Update, 0.81)));
    }

    #[test]
    fn test_time_range() {
        let p = pulse("a", Intent::Update, 0.5);
        let before = p.timestamp - chrono::Duration::seconds(1);
        let after = p.timestamp + chrono::Duration::seconds(1);
        assert!(PulseQuery::new().time_between(before, after).matches(&p));
        assert!(!PulseQuery::new().time_between(after, after).matches(&p));
    }
}
