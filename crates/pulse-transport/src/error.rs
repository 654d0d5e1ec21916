//! Transport and handshake errors.

use crate::handshake::{CLOSE_AUTH_FAILED, CLOSE_MISSING_FIELDS, CLOSE_POLICY_REJECTED};
use pulse_types::SigningError;
use thiserror::Error;

/// Why a handshake was refused. Each variant maps to one close code.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// The first frame lacked a required field or could not be parsed.
    #[error("Handshake frame missing or malformed field: {0}")]
    MissingFields(String),

    /// The signature did not match the challenge.
    #[error("Invalid handshake signature")]
    InvalidSignature,

    /// The challenge timestamp is older than the accepted window.
    #[error("Handshake challenge expired ({age_secs}s old, limit {max_age_secs}s)")]
    Expired { age_secs: i64, max_age_secs: u64 },

    /// The challenge timestamp is too far in the future.
    #[error("Handshake challenge from the future ({ahead_secs}s ahead, limit {max_skew_secs}s)")]
    FromFuture { ahead_secs: i64, max_skew_secs: u64 },

    /// The signature was already used inside the validity window.
    #[error("Handshake signature replayed")]
    Replayed,

    /// The signature was valid but the policy gate refused the peer.
    #[error("Handshake rejected by policy: {0}")]
    PolicyRejected(String),
}

impl HandshakeError {
    /// Close code sent to the peer for this failure.
    #[must_use]
    pub fn close_code(&self) -> u16 {
        match self {
            HandshakeError::MissingFields(_) => CLOSE_MISSING_FIELDS,
            HandshakeError::InvalidSignature
            | HandshakeError::Expired { .. }
            | HandshakeError::FromFuture { .. }
            | HandshakeError::Replayed => CLOSE_AUTH_FAILED,
            HandshakeError::PolicyRejected(_) => CLOSE_POLICY_REJECTED,
        }
    }

    /// Short label for metrics.
    #[must_use]
    pub fn outcome(&self) -> &'static str {
        match self {
            HandshakeError::MissingFields(_) => "missing_fields",
            HandshakeError::InvalidSignature => "invalid_signature",
            HandshakeError::Expired { .. } | HandshakeError::FromFuture { .. } => "stale",
            HandshakeError::Replayed => "replayed",
            HandshakeError::PolicyRejected(_) => "policy_rejected",
        }
    }
}

/// Errors surfaced by the transport. Never raised from `emit`.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Invalid transport settings.
    #[error("Invalid transport configuration: {0}")]
    Config(String),

    /// Called outside a Tokio runtime.
    #[error("No Tokio runtime available")]
    NoRuntime,

    /// Dialing the endpoint failed.
    #[error("Failed to connect: {0}")]
    Connect(String),

    /// The peer closed the stream.
    #[error("Connection closed (code {code:?})")]
    Closed { code: Option<u16> },

    /// The handshake did not complete in time.
    #[error("Handshake timed out")]
    HandshakeTimeout,

    /// The handshake reply was not understood.
    #[error("Unexpected handshake reply: {0}")]
    UnexpectedReply(String),

    /// Server-side handshake refusal.
    #[error(transparent)]
    Handshake(#[from] HandshakeError),

    /// Signing the challenge failed.
    #[error(transparent)]
    Signing(#[from] SigningError),

    /// WebSocket I/O error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Frame encoding failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl TransportError {
    /// Close code attached to the error, if any.
    #[must_use]
    pub fn close_code(&self) -> Option<u16> {
        match self {
            TransportError::Closed { code } => *code,
            TransportError::Handshake(e) => Some(e.close_code()),
            _ => None,
        }
    }

    /// True if the connection loop must not retry after this error.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, TransportError::Config(_) | TransportError::Signing(_))
            || self.close_code() == Some(CLOSE_AUTH_FAILED)
    }
}
