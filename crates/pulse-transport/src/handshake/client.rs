//! Client side of the handshake.

use super::{Challenge, HandshakeOk, HandshakeRequest, HANDSHAKE_OK};
use crate::config::ClientAuth;
use crate::error::TransportError;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use pulse_types::security::{self, SigningError};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::debug;

/// Builds a freshly timestamped, signed request.
pub fn build_request(auth: &ClientAuth) -> Result<HandshakeRequest, SigningError> {
    let challenge = Challenge::new(&auth.origin, &auth.target, Utc::now());
    let signature = security::sign(&challenge, auth.shared_secret.as_bytes(), auth.scheme)?;
    Ok(HandshakeRequest {
        message: serde_json::to_value(&challenge)?,
        signature,
    })
}

/// Sends the signed request and waits for `handshake_ok`.
///
/// A close frame received instead of the reply is returned as
/// [`TransportError::Closed`] carrying the server's code.
pub async fn perform_handshake<S>(
    ws: &mut WebSocketStream<S>,
    auth: &ClientAuth,
    timeout: Duration,
) -> Result<HandshakeOk, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let request = build_request(auth)?;
    ws.send(Message::text(serde_json::to_string(&request)?))
        .await?;
    debug!(origin = %auth.origin, target = %auth.target, "Handshake sent");

    tokio::time::timeout(timeout, await_reply(ws))
        .await
        .map_err(|_| TransportError::HandshakeTimeout)?
}

async fn await_reply<S>(ws: &mut WebSocketStream<S>) -> Result<HandshakeOk, TransportError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    while let Some(message) = ws.next().await {
        match message? {
            Message::Text(text) => {
                let reply: HandshakeOk = serde_json::from_str(text.as_str())
                    .map_err(|_| TransportError::UnexpectedReply(text.as_str().to_string()))?;
                if reply.kind != HANDSHAKE_OK {
                    return Err(TransportError::UnexpectedReply(text.as_str().to_string()));
                }
                return Ok(reply);
            }
            Message::Close(frame) => {
                return Err(TransportError::Closed {
                    code: frame.map(|f| u16::from(f.code)),
                });
            }
            _ => {}
        }
    }
    Err(TransportError::Closed { code: None })
}
