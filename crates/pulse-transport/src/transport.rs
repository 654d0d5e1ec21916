//! The public transport handle.

use crate::config::{TransportConfig, TransportMode};
use crate::connection::{self, MessageHandler, Shared};
use crate::error::TransportError;
use crate::state::{ConnectionState, ConnectionStatus, EmitOutcome, TransportEvent};
use chrono::Utc;
use parking_lot::Mutex;
use pulse_bus::{PulseBus, PulseEmitter, Subscription, WILDCARD};
use pulse_telemetry::EMITS_DROPPED;
use pulse_types::{DirectFrame, Pulse, PulseDraft, PulseId, WirePulse};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

struct Session {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Session {
    fn is_live(&self) -> bool {
        !self.task.is_finished() && !*self.shutdown.borrow()
    }
}

/// Moves pulses between this process and its counterpart.
///
/// In local mode pulses go through an in-process bus. The network modes run
/// a background connection loop on the current Tokio runtime.
///
/// `emit` never fails: while disconnected it drops the pulse and reports
/// [`EmitOutcome::Dropped`].
pub struct PulseTransport {
    config: TransportConfig,
    shared: Arc<Shared>,
    bus: Option<Arc<PulseBus>>,
    emitter: Option<Arc<dyn PulseEmitter>>,
    local_subscription: Mutex<Option<Subscription>>,
    session: Mutex<Option<Session>>,
}

impl PulseTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self {
            shared: Arc::new(Shared::new(config.mode)),
            config,
            bus: None,
            emitter: None,
            local_subscription: Mutex::new(None),
            session: Mutex::new(None),
        }
    }

    /// Local mode only: the bus inbound pulses are read from, and emitted on
    /// unless an emitter is set.
    #[must_use]
    pub fn with_local_bus(mut self, bus: Arc<PulseBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Local mode only: routes `emit` through another emitter, for instance a
    /// context that also records pulses.
    #[must_use]
    pub fn with_emitter(mut self, emitter: Arc<dyn PulseEmitter>) -> Self {
        self.emitter = Some(emitter);
        self
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn mode(&self) -> TransportMode {
        self.config.mode
    }

    /// Starts delivering inbound pulses to `on_message`.
    ///
    /// Network modes spawn the connection loop and return immediately; watch
    /// [`status`](Self::status) or [`subscribe_events`](Self::subscribe_events)
    /// for progress. Calling `connect` while a loop is running only replaces
    /// the handler.
    pub fn connect<F>(&self, on_message: F) -> Result<(), TransportError>
    where
        F: Fn(Pulse) + Send + Sync + 'static,
    {
        let handler: MessageHandler = Arc::new(on_message);

        if self.config.mode == TransportMode::Local {
            return self.connect_local(handler);
        }

        self.config.endpoint_url()?;
        let runtime = Handle::try_current().map_err(|_| TransportError::NoRuntime)?;

        *self.shared.handler.write() = Some(handler);

        let mut session = self.session.lock();
        if session.as_ref().is_some_and(Session::is_live) {
            debug!(mode = %self.config.mode, "Connection loop already running; handler replaced");
            return Ok(());
        }
        // A loop still winding down must not clear the new session's stream.
        if let Some(stale) = session.take() {
            stale.task.abort();
        }

        let (shutdown, shutdown_rx) = watch::channel(false);
        self.shared.status.send_modify(|s| {
            s.state = ConnectionState::Connecting;
            s.reconnect_attempts = 0;
            s.authenticated = false;
            s.client_id = None;
        });
        let task = runtime.spawn(connection::run_loop(
            Arc::clone(&self.shared),
            self.config.clone(),
            shutdown_rx,
        ));
        *session = Some(Session { shutdown, task });

        info!(mode = %self.config.mode, endpoint = %self.config.endpoint, "Transport connecting");
        Ok(())
    }

    fn connect_local(&self, handler: MessageHandler) -> Result<(), TransportError> {
        let bus = self
            .bus
            .as_ref()
            .ok_or_else(|| TransportError::Config("local transport requires a bus".to_string()))?;

        *self.shared.handler.write() = Some(handler);

        let mut subscription = self.local_subscription.lock();
        if subscription.is_none() {
            let shared = Arc::clone(&self.shared);
            *subscription = Some(bus.on(WILDCARD, move |pulse: &Pulse| {
                shared.deliver(pulse.clone());
            }));
        }
        drop(subscription);

        if self.shared.state() != ConnectionState::Connected {
            self.shared.set_state(ConnectionState::Connected);
            self.shared.publish(TransportEvent::Connected);
            info!("Local transport attached to bus");
        }
        Ok(())
    }

    /// Sends one pulse. Never blocks and never fails.
    pub fn emit(&self, mut draft: PulseDraft) -> EmitOutcome {
        if self.config.mode == TransportMode::Local {
            let emitter: Option<&dyn PulseEmitter> = match (&self.emitter, &self.bus) {
                (Some(emitter), _) => Some(emitter.as_ref()),
                (None, Some(bus)) => Some(bus.as_ref()),
                (None, None) => None,
            };
            return match emitter {
                Some(emitter) => EmitOutcome::Delivered(emitter.emit(draft)),
                None => self.drop_emit(&draft.topic, "no local bus"),
            };
        }

        if self.shared.state() != ConnectionState::Connected {
            return self.drop_emit(&draft.topic, "not connected");
        }

        draft.id.get_or_insert_with(PulseId::generate);
        draft.timestamp.get_or_insert_with(Utc::now);
        let topic = draft.topic.clone();
        let wire = WirePulse::from(draft);
        let encoded = match self.config.mode {
            TransportMode::Direct => serde_json::to_string(&DirectFrame::PulseEvent(wire)),
            _ => serde_json::to_string(&wire),
        };
        let text = match encoded {
            Ok(text) => text,
            Err(e) => {
                warn!(topic = %topic, error = %e, "Failed to encode pulse");
                return self.drop_emit(&topic, "encoding failed");
            }
        };

        let sent = self
            .shared
            .outbound
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(Message::text(text)).is_ok());
        if sent {
            EmitOutcome::Sent
        } else {
            self.drop_emit(&topic, "stream closed")
        }
    }

    fn drop_emit(&self, topic: &str, reason: &str) -> EmitOutcome {
        warn!(mode = %self.config.mode, topic = %topic, reason, "Dropping pulse");
        EMITS_DROPPED
            .with_label_values(&[self.config.mode.as_str()])
            .inc();
        self.shared.publish(TransportEvent::EmitDropped {
            topic: topic.to_string(),
        });
        EmitOutcome::Dropped
    }

    /// Closes the connection and forgets the handler. Idempotent, and safe
    /// to call from inside the handler.
    pub fn disconnect(&self) {
        *self.shared.handler.write() = None;
        let subscription = self.local_subscription.lock().take();
        drop(subscription);

        if let Some(session) = self.session.lock().as_ref() {
            let _ = session.shutdown.send(true);
        }
        self.shared.outbound.lock().take();

        let was_active = self.shared.status.send_if_modified(|s| {
            let changed = s.state != ConnectionState::Disconnected || s.authenticated;
            s.state = ConnectionState::Disconnected;
            s.authenticated = false;
            s.reconnect_attempts = 0;
            changed
        });
        if was_active {
            info!(mode = %self.config.mode, "Transport disconnected");
            self.shared
                .publish(TransportEvent::Disconnected { code: None });
        }
    }

    /// Waits for the connection loop to exit. Returns at once in local mode.
    pub async fn join(&self) {
        let session = self.session.lock().take();
        if let Some(session) = session {
            let _ = session.task.await;
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.shared.status.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.shared.status.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<TransportEvent> {
        self.shared.events.subscribe()
    }

    /// When the counterpart was last heard from.
    pub fn last_seen(&self) -> Option<Instant> {
        *self.shared.last_seen.lock()
    }

    /// Waits until the status satisfies `predicate`. `None` on timeout.
    pub async fn wait_for<P>(&self, timeout: Duration, mut predicate: P) -> Option<ConnectionStatus>
    where
        P: FnMut(&ConnectionStatus) -> bool,
    {
        let mut rx = self.watch_status();
        let waited = tokio::time::timeout(timeout, async {
            rx.wait_for(|status| predicate(status))
                .await
                .map(|status| status.clone())
                .ok()
        })
        .await;
        waited.ok().flatten()
    }

    /// Waits until the connection reaches `state`.
    pub async fn wait_for_state(
        &self,
        state: ConnectionState,
        timeout: Duration,
    ) -> Option<ConnectionStatus> {
        self.wait_for(timeout, |status| status.state == state).await
    }
}

impl Drop for PulseTransport {
    fn drop(&mut self) {
        if let Some(session) = self.session.get_mut().as_ref() {
            let _ = session.shutdown.send(true);
        }
    }
}

impl std::fmt::Debug for PulseTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PulseTransport")
            .field("mode", &self.config.mode)
            .field("endpoint", &self.config.endpoint)
            .field("status", &*self.shared.status.borrow())
            .finish_non_exhaustive()
    }
}
