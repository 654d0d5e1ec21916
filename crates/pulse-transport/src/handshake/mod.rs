//! # Handshake
//!
//! Signed challenge exchanged as the first frame of every authenticated
//! connection.
//!
//! ```text
//! client                                         server
//!   │  {"message": {origin, target, timestamp},     │
//!   │   "signature": hex(sha256(canonical+secret))} │
//!   │ ─────────────────────────────────────────────►│ recompute, compare
//!   │                                               │
//!   │◄──────────── {"type": "handshake_ok", ...}    │ match
//!   │◄──────────── close 4003                       │ mismatch (no reconnect)
//!   │◄──────────── close 4004                       │ policy gate refused
//!   │◄──────────── close 4001                       │ malformed frame
//! ```

pub mod authenticator;
pub mod client;
pub mod replay;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use authenticator::{AuthenticatedPeer, Authenticator, AuthenticatorConfig, PolicyGate};
pub use client::{build_request, perform_handshake};
pub use replay::ReplayCache;

/// Handshake frame missing required fields.
pub const CLOSE_MISSING_FIELDS: u16 = 4001;
/// Signature mismatch, stale or replayed challenge. Clients must not retry.
pub const CLOSE_AUTH_FAILED: u16 = 4003;
/// Valid signature, refused by policy. Clients reconnect normally.
pub const CLOSE_POLICY_REJECTED: u16 = 4004;

/// `type` of a successful handshake reply.
pub const HANDSHAKE_OK: &str = "handshake_ok";

/// The signed part of a handshake request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub origin: String,
    pub target: String,
    pub timestamp: String,
}

impl Challenge {
    pub fn new(origin: impl Into<String>, target: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            origin: origin.into(),
            target: target.into(),
            timestamp: at.to_rfc3339_opts(SecondsFormat::Micros, true),
        }
    }
}

/// First frame sent by the client.
///
/// `message` stays a raw JSON value: the server verifies the message as the
/// client sent it, extra fields included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub message: Value,
    pub signature: String,
}

/// Server reply on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandshakeOk {
    #[serde(rename = "type")]
    pub kind: String,
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

impl HandshakeOk {
    pub fn new(client_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            kind: HANDSHAKE_OK.to_string(),
            client_id: client_id.into(),
            session_id: Some(session_id.into()),
        }
    }
}
