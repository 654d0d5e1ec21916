//! # Pulse
//!
//! The atomic unit of communication and its intent/status vocabulary.
//!
//! A [`Pulse`] is always fully populated. Producers describe what they want to
//! send with a [`PulseDraft`], and the bus fills the missing `id` and
//! `timestamp` at emission time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

/// Open string-keyed metadata carried by every pulse.
pub type Metadata = BTreeMap<String, Value>;

/// Unique pulse identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PulseId(String);

impl PulseId {
    /// Generates a fresh random identifier.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("pulse_{}", Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PulseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PulseId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for PulseId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// What the sender wants the receiver to do with a pulse.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Intent {
    #[default]
    Update,
    Query,
    Create,
    Govern,
    Reflect,
}

impl Intent {
    /// Every intent, in declaration order.
    pub const ALL: [Intent; 5] = [
        Intent::Update,
        Intent::Query,
        Intent::Create,
        Intent::Govern,
        Intent::Reflect,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Intent::Update => "update",
            Intent::Query => "query",
            Intent::Create => "create",
            Intent::Govern => "govern",
            Intent::Reflect => "reflect",
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a pulse.
///
/// Transitions are one-directional: `Active -> Decayed -> Terminated`.
/// The derived ordering follows that direction.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum PulseStatus {
    #[default]
    Active,
    Decayed,
    Terminated,
}

impl PulseStatus {
    pub const ALL: [PulseStatus; 3] = [
        PulseStatus::Active,
        PulseStatus::Decayed,
        PulseStatus::Terminated,
    ];

    /// Returns true if moving from `self` to `next` never goes backward.
    #[must_use]
    pub fn can_transition_to(self, next: PulseStatus) -> bool {
        next >= self
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PulseStatus::Active => "active",
            PulseStatus::Decayed => "decayed",
            PulseStatus::Terminated => "terminated",
        }
    }
}

impl fmt::Display for PulseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Clamps a coherence value into `[0, 1]`. NaN becomes 0.
#[must_use]
pub fn clamp_coherence(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// A fully populated pulse.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pulse {
    pub id: PulseId,
    pub origin: String,
    pub target: String,
    pub topic: String,
    pub intent: Intent,
    pub payload: Value,
    pub coherence: f64,
    pub status: PulseStatus,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Pulse {
    /// Sets coherence, clamping into `[0, 1]`.
    pub fn set_coherence(&mut self, value: f64) {
        self.coherence = clamp_coherence(value);
    }

    /// Applies a status transition. Backward transitions are refused and
    /// leave the status untouched.
    pub fn transition(&mut self, next: PulseStatus) -> bool {
        if self.status.can_transition_to(next) {
            self.status = next;
            true
        } else {
            false
        }
    }
}

/// A pulse under construction. Absent `id`, `timestamp` and `coherence`
/// are filled in when the draft is emitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PulseDraft {
    #[serde(default)]
    pub id: Option<PulseId>,
    #[serde(default)]
    pub origin: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub intent: Intent,
    #[serde(default)]
    pub payload: Value,
    #[serde(default)]
    pub coherence: Option<f64>,
    #[serde(default)]
    pub status: PulseStatus,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl PulseDraft {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn id(mut self, id: impl Into<PulseId>) -> Self {
        self.id = Some(id.into());
        self
    }

    #[must_use]
    pub fn origin(mut self, origin: impl Into<String>) -> Self {
        self.origin = origin.into();
        self
    }

    #[must_use]
    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = target.into();
        self
    }

    #[must_use]
    pub fn intent(mut self, intent: Intent) -> Self {
        self.intent = intent;
        self
    }

    #[must_use]
    pub fn payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    #[must_use]
    pub fn coherence(mut self, coherence: f64) -> Self {
        self.coherence = Some(coherence);
        self
    }

    #[must_use]
    pub fn status(mut self, status: PulseStatus) -> Self {
        self.status = status;
        self
    }

    #[must_use]
    pub fn timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    #[must_use]
    pub fn meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Completes the draft. `provisional` is used when no coherence was set.
    #[must_use]
    pub fn finish(self, provisional: f64) -> Pulse {
        Pulse {
            id: self.id.unwrap_or_else(PulseId::generate),
            origin: self.origin,
            target: self.target,
            topic: self.topic,
            intent: self.intent,
            payload: self.payload,
            coherence: clamp_coherence(self.coherence.unwrap_or(provisional)),
            status: self.status,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            metadata: self.metadata,
        }
    }
}

impl From<Pulse> for PulseDraft {
    fn from(pulse: Pulse) -> Self {
        Self {
            id: Some(pulse.id),
            origin: pulse.origin,
            target: pulse.target,
            topic: pulse.topic,
            intent: pulse.intent,
            payload: pulse.payload,
            coherence: Some(pulse.coherence),
            status: pulse.status,
            timestamp: Some(pulse.timestamp),
            metadata: pulse.metadata,
        }
    }
}
