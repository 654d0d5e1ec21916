//! # Pulse Transport
//!
//! Moves pulses between a process and its counterpart.
//!
//! | Mode | Carrier | Frame |
//! |------|---------|-------|
//! | `local` | in-process [`PulseBus`](pulse_bus::PulseBus) | none |
//! | `direct` | WebSocket to a peer | [`DirectFrame`](pulse_types::DirectFrame) envelope |
//! | `relayed` | WebSocket to `<base>/ws/mesh/<topic>` | bare [`WirePulse`](pulse_types::WirePulse) |
//!
//! Network modes optionally open with a signed handshake (see [`handshake`]).
//! Lost connections are retried after a fixed delay up to a ceiling; a 4003
//! close stops retrying for good.
//!
//! ```rust,ignore
//! let transport = PulseTransport::new(
//!     TransportConfig::direct("ws://127.0.0.1:8765")
//!         .with_auth(ClientAuth::new("mirror", "core", secret)),
//! );
//! transport.connect(|pulse| println!("{}", pulse.topic))?;
//! transport.emit(PulseDraft::new("mirror.update"));
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod config;
mod connection;
pub mod error;
pub mod handshake;
pub mod state;
pub mod transport;

pub use config::{
    ClientAuth, TransportConfig, TransportMode, DEFAULT_HANDSHAKE_TIMEOUT,
    DEFAULT_HEARTBEAT_INTERVAL, DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_DELAY,
    RELAY_PATH,
};
pub use connection::{MessageHandler, INBOUND_DEFAULT_COHERENCE};
pub use error::{HandshakeError, TransportError};
pub use handshake::{
    AuthenticatedPeer, Authenticator, AuthenticatorConfig, PolicyGate, CLOSE_AUTH_FAILED,
    CLOSE_MISSING_FIELDS, CLOSE_POLICY_REJECTED,
};
pub use state::{ConnectionState, ConnectionStatus, EmitOutcome, TransportEvent};
pub use transport::PulseTransport;

/// Buffered transport events per listener before the oldest are skipped.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;
