//! Transport configuration.

use crate::error::TransportError;
use pulse_types::SignatureScheme;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Default delay between reconnect attempts.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(3000);

/// Default number of reconnects before the transport gives up.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Default time allowed for the handshake reply.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

/// Default heartbeat period.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Path prefix of relay endpoints.
pub const RELAY_PATH: &str = "/ws/mesh/";

/// How a transport reaches its peers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// In-process bus, no network.
    #[default]
    Local,
    /// One full-duplex stream carrying typed envelopes.
    Direct,
    /// Topic-routing relay carrying bare pulses.
    Relayed,
}

impl TransportMode {
    pub fn as_str(self) -> &'static str {
        match self {
            TransportMode::Local => "local",
            TransportMode::Direct => "direct",
            TransportMode::Relayed => "relayed",
        }
    }
}

impl fmt::Display for TransportMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransportMode {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(TransportMode::Local),
            "direct" => Ok(TransportMode::Direct),
            "relayed" | "relay" | "mesh" => Ok(TransportMode::Relayed),
            other => Err(TransportError::Config(format!("unknown transport mode '{other}'"))),
        }
    }
}

/// Credentials the client presents in its handshake.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientAuth {
    /// Identity sent as the challenge `origin`.
    pub origin: String,
    /// Intended counterpart, sent as the challenge `target`.
    pub target: String,
    pub shared_secret: String,
    #[serde(default)]
    pub scheme: SignatureScheme,
}

impl ClientAuth {
    pub fn new(
        origin: impl Into<String>,
        target: impl Into<String>,
        shared_secret: impl Into<String>,
    ) -> Self {
        Self {
            origin: origin.into(),
            target: target.into(),
            shared_secret: shared_secret.into(),
            scheme: SignatureScheme::default(),
        }
    }

    #[must_use]
    pub fn with_scheme(mut self, scheme: SignatureScheme) -> Self {
        self.scheme = scheme;
        self
    }
}

impl fmt::Debug for ClientAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientAuth")
            .field("origin", &self.origin)
            .field("target", &self.target)
            .field("shared_secret", &"<redacted>")
            .field("scheme", &self.scheme)
            .finish()
    }
}

/// Transport settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransportConfig {
    pub mode: TransportMode,
    /// Stream URL in direct mode, relay base URL in relayed mode.
    pub endpoint: String,
    /// Topic path joined to the relay base URL.
    pub relay_topic: String,
    pub reconnect_delay: Duration,
    pub max_reconnect_attempts: u32,
    pub handshake_timeout: Duration,
    /// `None` disables heartbeats.
    pub heartbeat_interval: Option<Duration>,
    /// `None` skips the handshake.
    pub auth: Option<ClientAuth>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            mode: TransportMode::Local,
            endpoint: String::new(),
            relay_topic: "pulse".to_string(),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            heartbeat_interval: Some(DEFAULT_HEARTBEAT_INTERVAL),
            auth: None,
        }
    }
}

impl TransportConfig {
    pub fn local() -> Self {
        Self::default()
    }

    pub fn direct(url: impl Into<String>) -> Self {
        Self {
            mode: TransportMode::Direct,
            endpoint: url.into(),
            ..Self::default()
        }
    }

    pub fn relayed(base_url: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            mode: TransportMode::Relayed,
            endpoint: base_url.into(),
            relay_topic: topic.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_auth(mut self, auth: ClientAuth) -> Self {
        self.auth = Some(auth);
        self
    }

    #[must_use]
    pub fn with_reconnect(mut self, delay: Duration, max_attempts: u32) -> Self {
        self.reconnect_delay = delay;
        self.max_reconnect_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_heartbeat(mut self, interval: Option<Duration>) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// URL the connection loop dials.
    pub fn endpoint_url(&self) -> Result<String, TransportError> {
        let endpoint = self.endpoint.trim();
        match self.mode {
            TransportMode::Local => Err(TransportError::Config(
                "local transport has no endpoint".to_string(),
            )),
            _ if endpoint.is_empty() => Err(TransportError::Config(format!(
                "{} transport requires an endpoint",
                self.mode
            ))),
            _ if !(endpoint.starts_with("ws://") || endpoint.starts_with("wss://")) => Err(
                TransportError::Config(format!("endpoint '{endpoint}' is not a ws:// or wss:// URL")),
            ),
            TransportMode::Direct => Ok(endpoint.to_string()),
            TransportMode::Relayed => {
                let topic = self.relay_topic.trim_matches('/');
                if topic.is_empty() {
                    return Err(TransportError::Config(
                        "relayed transport requires a topic".to_string(),
                    ));
                }
                Ok(format!("{}{RELAY_PATH}{topic}", endpoint.trim_end_matches('/')))
            }
        }
    }
}
