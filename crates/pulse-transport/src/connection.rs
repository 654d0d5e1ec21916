//! Connection loop for the network modes.
//!
//! One task per `connect()`: dial, optionally handshake, pump frames until
//! the stream ends, then apply the reconnect policy. The delay between
//! attempts is fixed.

use crate::config::{TransportConfig, TransportMode};
use crate::error::TransportError;
use crate::handshake::{perform_handshake, CLOSE_AUTH_FAILED, CLOSE_POLICY_REJECTED};
use crate::state::{ConnectionState, ConnectionStatus, TransportEvent};
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use pulse_telemetry::{FRAMES_RECEIVED, RECONNECT_ATTEMPTS};
use pulse_types::{DirectFrame, Pulse, WirePulse};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{Interval, MissedTickBehavior};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// Coherence given to inbound frames that carry none.
pub const INBOUND_DEFAULT_COHERENCE: f64 = 1.0;

/// Callback receiving inbound pulses.
pub type MessageHandler = Arc<dyn Fn(Pulse) + Send + Sync>;

/// State shared between a transport handle and its connection task.
pub(crate) struct Shared {
    pub(crate) mode: TransportMode,
    pub(crate) status: watch::Sender<ConnectionStatus>,
    pub(crate) events: broadcast::Sender<TransportEvent>,
    /// Present only while connected.
    pub(crate) outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    pub(crate) handler: RwLock<Option<MessageHandler>>,
    pub(crate) last_seen: Mutex<Option<Instant>>,
}

impl Shared {
    pub(crate) fn new(mode: TransportMode) -> Self {
        let (status, _) = watch::channel(ConnectionStatus {
            mode,
            ..ConnectionStatus::default()
        });
        let (events, _) = broadcast::channel(crate::EVENT_CHANNEL_CAPACITY);
        Self {
            mode,
            status,
            events,
            outbound: Mutex::new(None),
            handler: RwLock::new(None),
            last_seen: Mutex::new(None),
        }
    }

    pub(crate) fn set_state(&self, state: ConnectionState) {
        self.status.send_modify(|s| s.state = state);
    }

    /// Applies `f` unless shutdown has been signalled. The flag is read under
    /// the status lock and `disconnect` raises it before writing its own
    /// status, so a loop that is shutting down never overwrites it.
    pub(crate) fn modify_live<F>(&self, shutdown: &watch::Receiver<bool>, f: F) -> bool
    where
        F: FnOnce(&mut ConnectionStatus),
    {
        self.status.send_if_modified(|s| {
            if *shutdown.borrow() {
                return false;
            }
            f(s);
            true
        })
    }

    pub(crate) fn state(&self) -> ConnectionState {
        self.status.borrow().state
    }

    pub(crate) fn publish(&self, event: TransportEvent) {
        let _ = self.events.send(event);
    }

    /// Calls the handler without holding the lock, so the handler may
    /// disconnect.
    pub(crate) fn deliver(&self, pulse: Pulse) {
        let handler = self.handler.read().clone();
        if let Some(handler) = handler {
            handler(pulse);
        }
    }

    fn touch(&self) {
        *self.last_seen.lock() = Some(Instant::now());
    }
}

/// Runs until shutdown, a fatal close, or the reconnect ceiling.
pub(crate) async fn run_loop(
    shared: Arc<Shared>,
    config: TransportConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut attempts: u32 = 0;

    loop {
        let started = shared.modify_live(&shutdown, |s| {
            s.state = ConnectionState::Connecting;
            s.reconnect_attempts = attempts;
        });
        if !started {
            break;
        }

        let outcome = run_session(&shared, &config, &mut shutdown, &mut attempts).await;

        shared.outbound.lock().take();
        let live = shared.modify_live(&shutdown, |s| {
            s.state = ConnectionState::Disconnected;
            s.authenticated = false;
        });
        if !live {
            break;
        }

        let code = match &outcome {
            Ok(code) => *code,
            Err(e) => e.close_code(),
        };
        match &outcome {
            Ok(_) => info!(mode = %config.mode, code = ?code, "Connection closed"),
            Err(e) => warn!(mode = %config.mode, error = %e, "Connection failed"),
        }
        shared.publish(TransportEvent::Disconnected { code });

        if code == Some(CLOSE_POLICY_REJECTED) {
            warn!("Connection rejected by policy; reconnect policy applies");
            shared.publish(TransportEvent::PolicyRejected);
        }

        let fatal = matches!(&outcome, Err(e) if e.is_fatal()) || code == Some(CLOSE_AUTH_FAILED);
        if fatal {
            if code == Some(CLOSE_AUTH_FAILED) {
                error!("Authentication rejected by server; not reconnecting");
                shared.publish(TransportEvent::AuthenticationRejected);
            }
            terminate(&shared, &shutdown);
            break;
        }

        if attempts >= config.max_reconnect_attempts {
            warn!(
                attempts,
                max = config.max_reconnect_attempts,
                "Reconnect attempts exhausted"
            );
            terminate(&shared, &shutdown);
            break;
        }

        attempts += 1;
        if !shared.modify_live(&shutdown, |s| s.reconnect_attempts = attempts) {
            break;
        }
        RECONNECT_ATTEMPTS.inc();
        shared.publish(TransportEvent::ReconnectScheduled {
            attempt: attempts,
            delay: config.reconnect_delay,
        });
        info!(
            attempt = attempts,
            delay_ms = config.reconnect_delay.as_millis() as u64,
            "Reconnect scheduled"
        );

        tokio::select! {
            _ = tokio::time::sleep(config.reconnect_delay) => {}
            _ = shutdown.changed() => break,
        }
    }

    debug!(mode = %config.mode, "Connection loop exited");
}

fn terminate(shared: &Shared, shutdown: &watch::Receiver<bool>) {
    if shared.modify_live(shutdown, |s| s.state = ConnectionState::Failed) {
        shared.publish(TransportEvent::Terminated);
    }
}

/// One connection from dial to close. `Ok` carries the peer's close code.
async fn run_session(
    shared: &Shared,
    config: &TransportConfig,
    shutdown: &mut watch::Receiver<bool>,
    attempts: &mut u32,
) -> Result<Option<u16>, TransportError> {
    let url = config.endpoint_url()?;

    let (mut ws, _) = tokio::select! {
        result = connect_async(url.as_str()) => {
            result.map_err(|e| TransportError::Connect(e.to_string()))?
        }
        _ = shutdown.changed() => return Ok(None),
    };

    if let Some(auth) = &config.auth {
        let reply = perform_handshake(&mut ws, auth, config.handshake_timeout).await?;
        info!(client_id = %reply.client_id, "Handshake accepted");
        let client_id = reply.client_id.clone();
        if shared.modify_live(shutdown, |s| {
            s.authenticated = true;
            s.client_id = Some(client_id);
        }) {
            shared.publish(TransportEvent::Authenticated {
                client_id: reply.client_id,
            });
        }
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    *shared.outbound.lock() = Some(tx);
    let connected = shared.modify_live(shutdown, |s| {
        s.state = ConnectionState::Connected;
        s.reconnect_attempts = 0;
    });
    if !connected {
        shared.outbound.lock().take();
        let _ = ws.close(None).await;
        return Ok(None);
    }

    *attempts = 0;
    shared.touch();
    shared.publish(TransportEvent::Connected);
    info!(url = %url, mode = %config.mode, "Transport connected");

    let (mut write, mut read) = ws.split();
    let mut heartbeat = config.heartbeat_interval.map(|period| {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                let _ = write.send(Message::Close(None)).await;
                return Ok(None);
            }
            Some(message) = rx.recv() => {
                write.send(message).await?;
            }
            _ = tick(&mut heartbeat) => {
                write.send(heartbeat_frame(config.mode)?).await?;
            }
            inbound = read.next() => match inbound {
                Some(Ok(Message::Text(text))) => {
                    if let Some(reply) = handle_text(shared, config.mode, text.as_str())? {
                        write.send(reply).await?;
                    }
                }
                Some(Ok(Message::Binary(bytes))) => {
                    if let Some(text) = binary_text(&bytes) {
                        if let Some(reply) = handle_text(shared, config.mode, text)? {
                            write.send(reply).await?;
                        }
                    }
                }
                Some(Ok(Message::Ping(data))) => {
                    shared.touch();
                    write.send(Message::Pong(data)).await?;
                }
                Some(Ok(Message::Pong(_))) => shared.touch(),
                Some(Ok(Message::Close(frame))) => {
                    return Ok(frame.map(|f| u16::from(f.code)));
                }
                Some(Ok(Message::Frame(_))) => {}
                Some(Err(e)) => return Err(e.into()),
                None => return Ok(None),
            },
        }
    }
}

async fn tick(heartbeat: &mut Option<Interval>) {
    match heartbeat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

/// Direct peers get a `ping` envelope; relays only understand bare pulses,
/// so they get a WebSocket ping.
fn heartbeat_frame(mode: TransportMode) -> Result<Message, TransportError> {
    match mode {
        TransportMode::Direct => Ok(Message::text(serde_json::to_string(&DirectFrame::ping())?)),
        _ => Ok(Message::Ping(Default::default())),
    }
}

/// Binary frames carry the same JSON as text frames. Invalid UTF-8 is
/// dropped rather than repaired.
fn binary_text(bytes: &[u8]) -> Option<&str> {
    match std::str::from_utf8(bytes) {
        Ok(text) => Some(text),
        Err(e) => {
            warn!(error = %e, len = bytes.len(), "Ignoring binary frame that is not UTF-8");
            None
        }
    }
}

/// Handles one inbound text frame. Returns a frame to send back, if any.
pub(crate) fn handle_text(
    shared: &Shared,
    mode: TransportMode,
    text: &str,
) -> Result<Option<Message>, TransportError> {
    shared.touch();
    match mode {
        TransportMode::Relayed => {
            match serde_json::from_str::<WirePulse>(text) {
                Ok(wire) => {
                    FRAMES_RECEIVED.with_label_values(&["relayed", "pulse"]).inc();
                    shared.deliver(wire.into_draft().finish(INBOUND_DEFAULT_COHERENCE));
                }
                Err(e) => warn!(error = %e, "Ignoring undecodable relay frame"),
            }
            Ok(None)
        }
        _ => {
            let frame = match serde_json::from_str::<DirectFrame>(text) {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "Ignoring undecodable direct frame");
                    return Ok(None);
                }
            };
            FRAMES_RECEIVED
                .with_label_values(&["direct", frame.kind()])
                .inc();

            match frame {
                DirectFrame::PulseEvent(wire) => {
                    shared.deliver(wire.into_draft().finish(INBOUND_DEFAULT_COHERENCE));
                    Ok(None)
                }
                DirectFrame::PulseAck(ack) => {
                    debug!(
                        event_id = ?ack.event_id,
                        topic = ?ack.topic,
                        handlers_called = ?ack.handlers_called,
                        "Pulse acknowledged"
                    );
                    shared.publish(TransportEvent::Acknowledged {
                        event_id: ack.event_id,
                    });
                    Ok(None)
                }
                DirectFrame::Error { message } => {
                    warn!(message = %message, "Remote error");
                    shared.publish(TransportEvent::RemoteError { message });
                    Ok(None)
                }
                DirectFrame::Ping { .. } => Ok(Some(Message::text(serde_json::to_string(
                    &DirectFrame::pong(),
                )?))),
                DirectFrame::Pong { .. } => Ok(None),
            }
        }
    }
}
