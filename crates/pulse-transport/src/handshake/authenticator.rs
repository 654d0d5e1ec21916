//! # Server-Side Authenticator
//!
//! Verifies the first frame of an incoming connection.
//!
//! ## Checks, in order
//!
//! 1. Frame shape: `message` object with `origin` (or `source`) and a
//!    parseable `timestamp`, plus a `signature` string. Failure: 4001.
//! 2. Signature recomputed over `message` and compared in constant time.
//!    Failure: 4003.
//! 3. Freshness window and replay cache. Failure: 4003.
//! 4. `handshake_ok` is sent, then the policy gate runs. Failure: 4004.

use super::replay::ReplayCache;
use super::{HandshakeOk, CLOSE_MISSING_FIELDS};
use crate::error::{HandshakeError, TransportError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use pulse_telemetry::HANDSHAKE_OUTCOMES;
use pulse_types::{parse_timestamp, security, SignatureScheme};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Second gate, consulted after the signature checks pass.
#[async_trait]
pub trait PolicyGate: Send + Sync {
    /// `Err` carries the refusal reason sent with the 4004 close.
    async fn check(&self, peer: &AuthenticatedPeer) -> Result<(), String>;
}

/// Identity established by a successful handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedPeer {
    pub client_id: String,
    pub target: String,
    pub challenge_timestamp: DateTime<Utc>,
    pub session_id: String,
}

/// Authenticator settings.
#[derive(Clone)]
pub struct AuthenticatorConfig {
    pub shared_secret: String,
    pub scheme: SignatureScheme,
    pub max_age: Duration,
    pub max_future_skew: Duration,
    /// Time allowed for the first frame to arrive.
    pub handshake_timeout: Duration,
}

impl AuthenticatorConfig {
    pub fn new(shared_secret: impl Into<String>) -> Self {
        Self {
            shared_secret: shared_secret.into(),
            scheme: SignatureScheme::default(),
            max_age: ReplayCache::DEFAULT_MAX_AGE,
            max_future_skew: ReplayCache::DEFAULT_MAX_FUTURE_SKEW,
            handshake_timeout: Duration::from_secs(5),
        }
    }
}

impl fmt::Debug for AuthenticatorConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticatorConfig")
            .field("shared_secret", &"<redacted>")
            .field("scheme", &self.scheme)
            .field("max_age", &self.max_age)
            .field("max_future_skew", &self.max_future_skew)
            .field("handshake_timeout", &self.handshake_timeout)
            .finish()
    }
}

/// Verifies handshake requests and owns the replay cache.
pub struct Authenticator {
    config: AuthenticatorConfig,
    replay: Mutex<ReplayCache>,
    policy: Option<Arc<dyn PolicyGate>>,
}

impl Authenticator {
    pub fn new(config: AuthenticatorConfig) -> Self {
        let replay = ReplayCache::with_window(config.max_age, config.max_future_skew);
        Self {
            config,
            replay: Mutex::new(replay),
            policy: None,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: Arc<dyn PolicyGate>) -> Self {
        self.policy = Some(policy);
        self
    }

    /// Runs checks 1 to 3 against a raw first frame.
    pub fn verify(&self, raw: &str) -> Result<AuthenticatedPeer, HandshakeError> {
        let request: Value = serde_json::from_str(raw)
            .map_err(|_| HandshakeError::MissingFields("frame is not JSON".to_string()))?;

        let message = request
            .get("message")
            .filter(|m| m.is_object())
            .ok_or_else(|| missing("message"))?;
        let signature = request
            .get("signature")
            .and_then(Value::as_str)
            .ok_or_else(|| missing("signature"))?;
        let client_id = message
            .get("origin")
            .or_else(|| message.get("source"))
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| missing("origin"))?;
        let timestamp = message
            .get("timestamp")
            .and_then(parse_timestamp)
            .ok_or_else(|| missing("timestamp"))?;
        let target = message
            .get("target")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let valid = security::verify(
            message,
            signature,
            self.config.shared_secret.as_bytes(),
            self.config.scheme,
        )
        .unwrap_or(false);
        if !valid {
            return Err(HandshakeError::InvalidSignature);
        }

        self.replay.lock().validate_and_add(signature, timestamp)?;

        Ok(AuthenticatedPeer {
            client_id: client_id.to_string(),
            target: target.to_string(),
            challenge_timestamp: timestamp,
            session_id: Uuid::new_v4().to_string(),
        })
    }

    /// Runs the policy gate, if one is installed.
    pub async fn check_policy(&self, peer: &AuthenticatedPeer) -> Result<(), HandshakeError> {
        match &self.policy {
            Some(policy) => policy
                .check(peer)
                .await
                .map_err(HandshakeError::PolicyRejected),
            None => Ok(()),
        }
    }

    /// Authenticates a freshly accepted stream.
    ///
    /// On failure the stream has already been closed with the matching code.
    pub async fn accept<S>(&self, ws: &mut WebSocketStream<S>) -> Result<AuthenticatedPeer, TransportError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let raw = match tokio::time::timeout(self.config.handshake_timeout, first_frame(ws)).await {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                warn!("Handshake frame not received in time");
                close_with(ws, CLOSE_MISSING_FIELDS, "handshake timeout").await;
                return Err(TransportError::HandshakeTimeout);
            }
        };

        let peer = match self.verify(&raw) {
            Ok(peer) => peer,
            Err(e) => {
                self.reject(ws, &e).await;
                return Err(e.into());
            }
        };

        let reply = HandshakeOk::new(&peer.client_id, &peer.session_id);
        ws.send(Message::text(serde_json::to_string(&reply)?)).await?;

        if let Err(e) = self.check_policy(&peer).await {
            self.reject(ws, &e).await;
            return Err(e.into());
        }

        HANDSHAKE_OUTCOMES.with_label_values(&["ok"]).inc();
        info!(client_id = %peer.client_id, session_id = %peer.session_id, "Handshake accepted");
        Ok(peer)
    }

    async fn reject<S>(&self, ws: &mut WebSocketStream<S>, e: &HandshakeError)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        HANDSHAKE_OUTCOMES.with_label_values(&[e.outcome()]).inc();
        match e {
            HandshakeError::PolicyRejected(reason) => {
                warn!(reason = %reason, "Handshake rejected by policy");
            }
            HandshakeError::MissingFields(field) => {
                warn!(field = %field, "Malformed handshake frame");
            }
            other => error!(error = %other, "Handshake authentication failed"),
        }
        close_with(ws, e.close_code(), &e.to_string()).await;
    }
}

impl fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Authenticator")
            .field("config", &self.config)
            .field("policy", &self.policy.is_some())
            .finish()
    }
}

fn missing(field: &str) -> HandshakeError {
    HandshakeError::MissingFields(field.to_string())
}

/// Reads until the first data frame.
async fn first_frame<S>(ws: &mut WebSocketStream<S>) -> Result<String, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(message) = ws.next().await {
        match message? {
            Message::Text(text) => return Ok(text.as_str().to_string()),
            Message::Binary(bytes) => return Ok(String::from_utf8_lossy(&bytes).into_owned()),
            Message::Close(frame) => {
                return Err(TransportError::Closed {
                    code: frame.map(|f| u16::from(f.code)),
                })
            }
            _ => {}
        }
    }
    Err(TransportError::Closed { code: None })
}

/// How long a closing server waits for the peer's close reply.
const CLOSE_LINGER: Duration = Duration::from_secs(1);

/// Sends a close frame with an application code, then waits briefly for the
/// peer's reply so the code is read before the socket goes away. Errors are
/// ignored; the peer may already be gone.
pub(crate) async fn close_with<S>(ws: &mut WebSocketStream<S>, code: u16, reason: &str)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let frame = CloseFrame {
        code: CloseCode::from(code),
        reason: reason.to_string().into(),
    };
    if ws.close(Some(frame)).await.is_err() {
        return;
    }
    let drain = async { while let Some(Ok(_)) = ws.next().await {} };
    let _ = tokio::time::timeout(CLOSE_LINGER, drain).await;
}
