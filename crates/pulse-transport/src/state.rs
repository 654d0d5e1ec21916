//! Observable connection state and transport events.

use crate::config::TransportMode;
use pulse_types::Pulse;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Lifecycle of a connection.
///
/// `Failed` is a terminal `Disconnected`: the loop has stopped and only a new
/// `connect()` restarts it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Failed,
}

impl ConnectionState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == ConnectionState::Failed
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Snapshot published on the transport's `watch` channel.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub mode: TransportMode,
    pub state: ConnectionState,
    /// Reconnects scheduled since the last successful connection.
    pub reconnect_attempts: u32,
    pub authenticated: bool,
    /// Identity confirmed by the server's handshake reply.
    pub client_id: Option<String>,
}

/// Notable transport occurrences, broadcast to any listener.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Connected,
    Authenticated { client_id: String },
    Disconnected { code: Option<u16> },
    /// Closed with 4004. The normal reconnect policy still applies.
    PolicyRejected,
    /// Closed with 4003. The transport will not reconnect.
    AuthenticationRejected,
    ReconnectScheduled { attempt: u32, delay: Duration },
    /// The loop stopped for good.
    Terminated,
    EmitDropped { topic: String },
    RemoteError { message: String },
    Acknowledged { event_id: Option<String> },
}

/// What happened to one `emit` call.
#[derive(Debug, Clone, PartialEq)]
pub enum EmitOutcome {
    /// Local mode: dispatched on the in-process bus.
    Delivered(Pulse),
    /// Handed to the open stream.
    Sent,
    /// Not connected; discarded.
    Dropped,
}

impl EmitOutcome {
    #[must_use]
    pub fn is_dropped(&self) -> bool {
        matches!(self, EmitOutcome::Dropped)
    }
}
