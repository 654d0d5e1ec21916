//! # Wire Frames
//!
//! JSON frames exchanged by the transport.
//!
//! - Relayed mode carries a bare [`WirePulse`] per frame.
//! - Direct mode carries a [`DirectFrame`] envelope tagged by `type`; only
//!   `pulse_event` frames contain a pulse.
//!
//! Peers in the wild send `source` instead of `origin` and timestamps without
//! an offset, so decoding is deliberately lenient about both.

use crate::pulse::{Intent, Metadata, Pulse, PulseDraft, PulseId, PulseStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A pulse as it travels on the wire. Everything the emitter can fill in
/// later is optional.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WirePulse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<PulseId>,
    #[serde(default, alias = "source")]
    pub origin: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub topic: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coherence: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PulseStatus>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "lenient_timestamp::deserialize"
    )]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
}

impl WirePulse {
    /// Converts the frame into a draft, ready to be completed by an emitter.
    #[must_use]
    pub fn into_draft(self) -> PulseDraft {
        PulseDraft {
            id: self.id,
            origin: self.origin,
            target: self.target,
            topic: self.topic,
            intent: self.intent.unwrap_or_default(),
            payload: self.payload,
            coherence: self.coherence,
            status: self.status.unwrap_or_default(),
            timestamp: self.timestamp,
            metadata: self.metadata.unwrap_or_default(),
        }
    }
}

impl From<PulseDraft> for WirePulse {
    fn from(draft: PulseDraft) -> Self {
        Self {
            id: draft.id,
            origin: draft.origin,
            target: draft.target,
            topic: draft.topic,
            intent: Some(draft.intent),
            payload: draft.payload,
            coherence: draft.coherence,
            status: Some(draft.status),
            timestamp: draft.timestamp,
            metadata: if draft.metadata.is_empty() {
                None
            } else {
                Some(draft.metadata)
            },
        }
    }
}

impl From<&Pulse> for WirePulse {
    fn from(pulse: &Pulse) -> Self {
        Self {
            id: Some(pulse.id.clone()),
            origin: pulse.origin.clone(),
            target: pulse.target.clone(),
            topic: pulse.topic.clone(),
            intent: Some(pulse.intent),
            payload: pulse.payload.clone(),
            coherence: Some(pulse.coherence),
            status: Some(pulse.status),
            timestamp: Some(pulse.timestamp),
            metadata: if pulse.metadata.is_empty() {
                None
            } else {
                Some(pulse.metadata.clone())
            },
        }
    }
}

/// Acknowledgement returned by a direct-mode counterpart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PulseAck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validated: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handlers_called: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// Direct-mode envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DirectFrame {
    PulseEvent(WirePulse),
    PulseAck(PulseAck),
    Error {
        #[serde(default)]
        message: String,
    },
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<String>,
    },
}

impl DirectFrame {
    pub fn ping() -> Self {
        DirectFrame::Ping {
            timestamp: Some(Utc::now().to_rfc3339()),
        }
    }

    pub fn pong() -> Self {
        DirectFrame::Pong {
            timestamp: Some(Utc::now().to_rfc3339()),
        }
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            DirectFrame::PulseEvent(_) => "pulse_event",
            DirectFrame::PulseAck(_) => "pulse_ack",
            DirectFrame::Error { .. } => "error",
            DirectFrame::Ping { .. } => "ping",
            DirectFrame::Pong { .. } => "pong",
        }
    }
}

/// Parses a wire timestamp: RFC 3339, offset-less ISO 8601 (read as UTC) or
/// epoch milliseconds.
pub fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    lenient_timestamp::parse(value)
}

mod lenient_timestamp {
    use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
    use serde::{Deserialize, Deserializer};
    use serde_json::Value;

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Option::<Value>::deserialize(deserializer)?;
        Ok(raw.and_then(|value| parse(&value)))
    }

    pub(crate) fn parse(value: &Value) -> Option<DateTime<Utc>> {
        match value {
            Value::String(s) => DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .ok()
                .or_else(|| {
                    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
                        .ok()
                        .map(|naive| Utc.from_utc_datetime(&naive))
                }),
            Value::Number(n) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
            _ => None,
        }
    }
}
