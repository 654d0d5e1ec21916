//! # Transport Flows
//!
//! A real client transport against the in-process relay.
//!
//! ## Flows Tested:
//!
//! 1. **Handshake**: `handshake_ok` then traffic both ways
//! 2. **4003**: authentication failure stops the transport for good
//! 3. **4004**: policy rejection follows the normal reconnect policy
//! 4. **4001**: silent client closed by the server's handshake timeout
//! 5. **Reconnect ceiling**: fixed delay, ten attempts, then terminal
//! 6. **Relayed mode**: `/ws/mesh/<topic>` addressing and bare frames
//! 7. **Direct envelope**: ping/pong, ack, remote error, heartbeat
//! 8. **Disconnect**: drops later emits, safe inside a handler, always wins
//!    against a connection that is still coming up

#[cfg(test)]
mod tests {
    use crate::harness::{
        events_until, next_event, recv_within, unused_ws_url, TestRelay, WAIT,
    };
    use pulse_runtime::OriginAllowList;
    use pulse_transport::{
        Authenticator, AuthenticatorConfig, ClientAuth, ConnectionState, EmitOutcome,
        PulseTransport, TransportConfig, TransportEvent, CLOSE_AUTH_FAILED,
        CLOSE_MISSING_FIELDS, CLOSE_POLICY_REJECTED,
    };
    use pulse_types::{DirectFrame, Pulse, PulseDraft};
    use serde_json::{json, Value};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    const SECRET: &str = "integration-secret";
    const FAST: Duration = Duration::from_millis(20);

    // =========================================================================
    // FIXTURES
    // =========================================================================

    fn authenticator(secret: &str) -> Authenticator {
        Authenticator::new(AuthenticatorConfig::new(secret))
    }

    fn direct(relay: &TestRelay) -> TransportConfig {
        TransportConfig::direct(relay.ws_url())
            .with_heartbeat(None)
            .with_reconnect(FAST, 3)
    }

    fn connect_collecting(transport: &PulseTransport) -> mpsc::UnboundedReceiver<Pulse> {
        let (tx, rx) = mpsc::unbounded_channel();
        transport
            .connect(move |pulse| {
                let _ = tx.send(pulse);
            })
            .unwrap();
        rx
    }

    async fn connected(transport: &PulseTransport) {
        transport
            .wait_for_state(ConnectionState::Connected, WAIT)
            .await
            .expect("transport did not connect");
    }

    // =========================================================================
    // HANDSHAKE OUTCOMES
    // =========================================================================

    #[tokio::test]
    async fn test_authenticated_direct_round_trip() {
        let (relay, mut inbound) = TestRelay::start(Some(authenticator(SECRET))).await.unwrap();
        let transport = PulseTransport::new(
            direct(&relay).with_auth(ClientAuth::new("mirror", "core", SECRET)),
        );
        let mut events = transport.subscribe_events();
        let mut received = connect_collecting(&transport);

        connected(&transport).await;
        let status = transport.status();
        assert!(status.authenticated);
        assert_eq!(status.client_id.as_deref(), Some("mirror"));
        assert_eq!(
            next_event(&mut events, |e| matches!(e, TransportEvent::Authenticated { .. })).await,
            Some(TransportEvent::Authenticated {
                client_id: "mirror".to_string()
            })
        );

        // Outbound: a pulse_event envelope with id and timestamp filled in.
        let outcome = transport.emit(
            PulseDraft::new("mirror.update")
                .origin("mirror")
                .target("core")
                .payload(json!({"n": 1})),
        );
        assert_eq!(outcome, EmitOutcome::Sent);

        let frame: DirectFrame =
            serde_json::from_str(&recv_within(&mut inbound).await.unwrap()).unwrap();
        let DirectFrame::PulseEvent(wire) = frame else {
            panic!("expected pulse_event, got {frame:?}");
        };
        assert_eq!(wire.topic, "mirror.update");
        assert_eq!(wire.payload, json!({"n": 1}));
        assert!(wire.id.is_some());
        assert!(wire.timestamp.is_some());
        assert_eq!(relay.peers()[0].client_id, "mirror");

        // Inbound: only the pulse reaches the handler.
        relay.push(
            json!({
                "type": "pulse_event",
                "origin": "core",
                "target": "mirror",
                "topic": "core.reply",
                "payload": {"ok": true},
                "coherence": 0.9
            })
            .to_string(),
        );
        let pulse = recv_within(&mut received).await.unwrap();
        assert_eq!(pulse.topic, "core.reply");
        assert_eq!(pulse.origin, "core");
        assert_eq!(pulse.coherence, 0.9);

        transport.disconnect();
        transport.join().await;
        assert_eq!(transport.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_wrong_secret_is_fatal() {
        let (relay, _inbound) = TestRelay::start(Some(authenticator(SECRET))).await.unwrap();
        let transport = PulseTransport::new(
            direct(&relay).with_auth(ClientAuth::new("mirror", "core", "not-the-secret")),
        );
        let mut events = transport.subscribe_events();
        let _received = connect_collecting(&transport);

        let seen = events_until(&mut events, |e| *e == TransportEvent::Terminated).await;

        assert!(seen.contains(&TransportEvent::Disconnected {
            code: Some(CLOSE_AUTH_FAILED)
        }));
        assert!(seen.contains(&TransportEvent::AuthenticationRejected));
        assert_eq!(seen.last(), Some(&TransportEvent::Terminated));
        assert!(!seen
            .iter()
            .any(|e| matches!(e, TransportEvent::ReconnectScheduled { .. })));
        assert!(!seen.contains(&TransportEvent::Connected));

        tokio::time::timeout(WAIT, transport.join()).await.unwrap();
        assert_eq!(transport.state(), ConnectionState::Failed);
        assert_eq!(relay.connections(), 1);
    }

    #[tokio::test]
    async fn test_policy_rejection_reconnects() {
        let gate = Arc::new(OriginAllowList::new(["core"]));
        let (relay, _inbound) =
            TestRelay::start(Some(authenticator(SECRET).with_policy(gate))).await.unwrap();
        let transport = PulseTransport::new(
            direct(&relay).with_auth(ClientAuth::new("mirror", "core", SECRET)),
        );
        let mut events = transport.subscribe_events();
        let _received = connect_collecting(&transport);

        let seen = events_until(&mut events, |e| {
            matches!(e, TransportEvent::ReconnectScheduled { .. })
        })
        .await;

        assert!(seen.contains(&TransportEvent::Disconnected {
            code: Some(CLOSE_POLICY_REJECTED)
        }));
        assert!(seen.contains(&TransportEvent::PolicyRejected));
        assert!(!seen.contains(&TransportEvent::AuthenticationRejected));
        assert_eq!(
            seen.last(),
            Some(&TransportEvent::ReconnectScheduled {
                attempt: 1,
                delay: FAST
            })
        );

        // The retry reaches the server again.
        assert!(next_event(&mut events, |e| *e == TransportEvent::Connected)
            .await
            .is_some());
        assert!(relay.connections() >= 2);

        transport.disconnect();
        transport.join().await;
    }

    #[tokio::test]
    async fn test_silent_client_closed_with_missing_fields() {
        let mut config = AuthenticatorConfig::new(SECRET);
        config.handshake_timeout = Duration::from_millis(100);
        let (relay, _inbound) = TestRelay::start(Some(Authenticator::new(config))).await.unwrap();

        // No auth configured: the client never sends a handshake frame.
        let transport = PulseTransport::new(direct(&relay));
        let mut events = transport.subscribe_events();
        let _received = connect_collecting(&transport);

        assert!(next_event(&mut events, |e| {
            *e == TransportEvent::Disconnected {
                code: Some(CLOSE_MISSING_FIELDS),
            }
        })
        .await
        .is_some());
        assert!(next_event(&mut events, |e| matches!(
            e,
            TransportEvent::ReconnectScheduled { attempt: 1, .. }
        ))
        .await
        .is_some());

        transport.disconnect();
        transport.join().await;
    }

    // =========================================================================
    // RECONNECT POLICY
    // =========================================================================

    #[tokio::test]
    async fn test_reconnect_ceiling_then_terminal() {
        let url = unused_ws_url().await.unwrap();
        let transport = PulseTransport::new(
            TransportConfig::direct(url)
                .with_heartbeat(None)
                .with_reconnect(Duration::from_millis(5), 10),
        );
        let mut events = transport.subscribe_events();
        let _received = connect_collecting(&transport);

        let seen = events_until(&mut events, |e| *e == TransportEvent::Terminated).await;

        let attempts: Vec<u32> = seen
            .iter()
            .filter_map(|e| match e {
                TransportEvent::ReconnectScheduled { attempt, .. } => Some(*attempt),
                _ => None,
            })
            .collect();
        assert_eq!(attempts, (1..=10).collect::<Vec<_>>());
        assert_eq!(seen.last(), Some(&TransportEvent::Terminated));

        let status = transport.status();
        assert_eq!(status.state, ConnectionState::Failed);
        assert_eq!(status.reconnect_attempts, 10);
        assert!(transport.emit(PulseDraft::new("late")).is_dropped());
    }

    #[tokio::test]
    async fn test_server_close_reconnects_and_resets_attempts() {
        let (relay, _inbound) = TestRelay::start(None).await.unwrap();
        let transport = PulseTransport::new(direct(&relay));
        let mut events = transport.subscribe_events();
        let _received = connect_collecting(&transport);
        connected(&transport).await;

        relay.close_all(4000);

        assert!(next_event(&mut events, |e| {
            *e == TransportEvent::Disconnected { code: Some(4000) }
        })
        .await
        .is_some());
        assert!(next_event(&mut events, |e| matches!(
            e,
            TransportEvent::ReconnectScheduled { attempt: 1, .. }
        ))
        .await
        .is_some());
        assert!(next_event(&mut events, |e| *e == TransportEvent::Connected)
            .await
            .is_some());

        assert_eq!(relay.connections(), 2);
        assert_eq!(transport.status().reconnect_attempts, 0);
        transport.disconnect();
    }

    // =========================================================================
    // FRAMES
    // =========================================================================

    #[tokio::test]
    async fn test_relayed_mode_addresses_mesh_topic_with_bare_frames() {
        let (relay, mut inbound) = TestRelay::start(None).await.unwrap();
        let transport = PulseTransport::new(
            TransportConfig::relayed(relay.ws_url(), "mirror").with_heartbeat(None),
        );
        let mut received = connect_collecting(&transport);
        connected(&transport).await;

        assert_eq!(relay.paths(), vec!["/ws/mesh/mirror".to_string()]);

        transport.emit(PulseDraft::new("mirror.update").origin("mirror"));
        let frame: Value = serde_json::from_str(&recv_within(&mut inbound).await.unwrap()).unwrap();
        assert!(frame.get("type").is_none());
        assert_eq!(frame["topic"], "mirror.update");
        assert_eq!(frame["origin"], "mirror");

        relay.push(
            json!({"source": "scribe", "topic": "scribe.update", "payload": {"line": 3}})
                .to_string(),
        );
        let pulse = recv_within(&mut received).await.unwrap();
        assert_eq!(pulse.origin, "scribe");
        assert_eq!(pulse.topic, "scribe.update");
        assert!(pulse.id.as_str().starts_with("pulse_"));

        transport.disconnect();
    }

    #[tokio::test]
    async fn test_direct_control_frames() {
        let (relay, mut inbound) = TestRelay::start(None).await.unwrap();
        let transport = PulseTransport::new(direct(&relay));
        let mut events = transport.subscribe_events();
        let mut received = connect_collecting(&transport);
        connected(&transport).await;

        relay.push(r#"{"type": "ping"}"#);
        let reply: DirectFrame =
            serde_json::from_str(&recv_within(&mut inbound).await.unwrap()).unwrap();
        assert!(matches!(reply, DirectFrame::Pong { .. }));

        relay.push(
            json!({"type": "pulse_ack", "event_id": "e1", "validated": true, "handlers_called": 3})
                .to_string(),
        );
        assert_eq!(
            next_event(&mut events, |e| matches!(e, TransportEvent::Acknowledged { .. })).await,
            Some(TransportEvent::Acknowledged {
                event_id: Some("e1".to_string())
            })
        );

        relay.push(json!({"type": "error", "message": "bad frame"}).to_string());
        assert_eq!(
            next_event(&mut events, |e| matches!(e, TransportEvent::RemoteError { .. })).await,
            Some(TransportEvent::RemoteError {
                message: "bad frame".to_string()
            })
        );

        assert!(received.try_recv().is_err());
        assert!(transport.last_seen().is_some());
        transport.disconnect();
    }

    #[tokio::test]
    async fn test_heartbeat_sends_ping_envelope() {
        let (relay, mut inbound) = TestRelay::start(None).await.unwrap();
        let transport = PulseTransport::new(
            direct(&relay).with_heartbeat(Some(Duration::from_millis(50))),
        );
        let _received = connect_collecting(&transport);
        connected(&transport).await;

        let frame: DirectFrame =
            serde_json::from_str(&recv_within(&mut inbound).await.unwrap()).unwrap();
        assert!(matches!(frame, DirectFrame::Ping { .. }));
        transport.disconnect();
    }

    // =========================================================================
    // DISCONNECT
    // =========================================================================

    #[tokio::test]
    async fn test_emit_after_disconnect_is_dropped() {
        let (relay, _inbound) = TestRelay::start(None).await.unwrap();
        let transport = PulseTransport::new(direct(&relay));
        let mut events = transport.subscribe_events();
        let _received = connect_collecting(&transport);
        connected(&transport).await;

        transport.disconnect();
        transport.disconnect();

        assert!(transport.emit(PulseDraft::new("gone")).is_dropped());
        assert_eq!(
            next_event(&mut events, |e| matches!(e, TransportEvent::EmitDropped { .. })).await,
            Some(TransportEvent::EmitDropped {
                topic: "gone".to_string()
            })
        );
        tokio::time::timeout(WAIT, transport.join()).await.unwrap();
        assert_eq!(transport.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_inside_handler() {
        let (relay, _inbound) = TestRelay::start(None).await.unwrap();
        let transport = Arc::new(PulseTransport::new(direct(&relay)));
        let (tx, mut received) = mpsc::unbounded_channel();
        let weak = Arc::downgrade(&transport);
        transport
            .connect(move |pulse: Pulse| {
                let _ = tx.send(pulse.topic);
                if let Some(transport) = weak.upgrade() {
                    transport.disconnect();
                }
            })
            .unwrap();
        connected(&transport).await;

        for topic in ["first", "second"] {
            relay.push(json!({"type": "pulse_event", "topic": topic, "payload": {}}).to_string());
        }

        assert_eq!(recv_within(&mut received).await.as_deref(), Some("first"));
        tokio::time::timeout(WAIT, transport.join()).await.unwrap();
        assert!(received.try_recv().is_err());
        assert_eq!(transport.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_disconnect_wins_against_connecting_loop() {
        let (relay, _inbound) = TestRelay::start(None).await.unwrap();
        let transport = PulseTransport::new(direct(&relay));

        for round in 0..300u64 {
            transport.connect(|_| {}).unwrap();

            // Land the disconnect at varying points of dial and setup.
            let until = std::time::Instant::now() + Duration::from_micros(round * 37 % 1000);
            while std::time::Instant::now() < until {
                std::hint::spin_loop();
            }

            transport.disconnect();
            tokio::time::timeout(WAIT, transport.join()).await.unwrap();
            assert_eq!(
                transport.state(),
                ConnectionState::Disconnected,
                "round {round} left the transport {:?}",
                transport.status()
            );
            assert!(!transport.is_connected());
        }
    }
}
