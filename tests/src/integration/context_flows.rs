//! # Context Flows
//!
//! Bus, Registry and Transport sharing one `PulseContext`.
//!
//! ## Flows Tested:
//!
//! 1. **Remote → validator → context**: inbound frames become canonical
//!    only when the validator accepts them
//! 2. **Provisional → authoritative coherence**: heuristic score at emit,
//!    external score via `update`, drift between them
//! 3. **Capacity**: hysteresis eviction through the context
//! 4. **Metrics**: counters visible in the exposition text

#[cfg(test)]
mod tests {
    use crate::harness::{recv_within, TestRelay, WAIT};
    use pulse_registry::{PulseQuery, PulseUpdate, RegistryConfig, Trend};
    use pulse_runtime::{OriginAllowList, PulseConfig, PulseContext};
    use pulse_transport::{ConnectionState, EmitOutcome, PulseTransport, TransportConfig};
    use pulse_types::{Intent, Pulse, PulseDraft, PulseId, PulseStatus};
    use serde_json::json;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn context(registry: RegistryConfig) -> PulseContext {
        let config = PulseConfig {
            registry,
            ..PulseConfig::default()
        };
        PulseContext::new(&config)
    }

    // =========================================================================
    // REMOTE TRAFFIC
    // =========================================================================

    #[tokio::test]
    async fn test_remote_pulses_pass_validator_into_context() {
        let ctx = Arc::new(
            context(RegistryConfig::for_testing())
                .with_validator(Arc::new(OriginAllowList::new(["core"]))),
        );
        let (tx, mut dispatched) = mpsc::unbounded_channel();
        let _sub = ctx.bus().on("*", move |p: &Pulse| {
            let _ = tx.send(p.clone());
        });

        let (relay, _inbound) = TestRelay::start(None).await.unwrap();
        let transport = PulseTransport::new(
            TransportConfig::direct(relay.ws_url()).with_heartbeat(None),
        );
        transport.connect(ctx.ingest_handler()).unwrap();
        transport
            .wait_for_state(ConnectionState::Connected, WAIT)
            .await
            .unwrap();

        for (id, origin) in [("pulse_a", "core"), ("pulse_b", "ghost"), ("pulse_c", "core")] {
            relay.push(
                json!({
                    "type": "pulse_event",
                    "id": id,
                    "origin": origin,
                    "target": "mirror",
                    "topic": "core.update",
                    "payload": {},
                    "coherence": 0.7
                })
                .to_string(),
            );
        }

        let first = recv_within(&mut dispatched).await.unwrap();
        let second = recv_within(&mut dispatched).await.unwrap();
        assert_eq!(first.id.as_str(), "pulse_a");
        assert_eq!(second.id.as_str(), "pulse_c");
        assert_eq!(first.coherence, 0.7);

        assert_eq!(ctx.registry_len(), 2);
        assert!(ctx.get(&PulseId::from("pulse_b")).is_none());
        assert_eq!(ctx.query(&PulseQuery::new().origin("core")).len(), 2);

        transport.disconnect();
    }

    // =========================================================================
    // LOCAL CONVERSATION
    // =========================================================================

    #[test]
    fn test_provisional_then_authoritative_coherence() {
        let ctx = Arc::new(context(RegistryConfig::for_testing()));
        let core = ctx.local_transport();
        let mirror = ctx.local_transport();

        let (tx, rx) = std::sync::mpsc::channel();
        let tx = parking_lot::Mutex::new(tx);
        mirror
            .connect(move |p| {
                let _ = tx.lock().send(p.topic);
            })
            .unwrap();
        core.connect(|_| {}).unwrap();

        let EmitOutcome::Delivered(request) = core.emit(
            PulseDraft::new("query.balance")
                .origin("core")
                .target("mirror")
                .intent(Intent::Query),
        ) else {
            panic!("local emit must deliver");
        };
        let EmitOutcome::Delivered(reply) = mirror.emit(
            PulseDraft::new("query.balance.reply")
                .origin("mirror")
                .target("core")
                .intent(Intent::Reflect),
        ) else {
            panic!("local emit must deliver");
        };
        let EmitOutcome::Delivered(unrelated) = core.emit(PulseDraft::new("weather")) else {
            panic!("local emit must deliver");
        };

        assert_eq!(request.coherence, 1.0);
        assert_eq!(reply.coherence, 0.85);
        assert_eq!(unrelated.coherence, 0.3);
        assert_eq!(
            rx.try_iter().collect::<Vec<_>>(),
            vec!["query.balance", "query.balance.reply", "weather"]
        );

        // External scorer overrides the heuristic.
        ctx.update(&reply.id, PulseUpdate::coherence(0.95)).unwrap();
        ctx.update(&unrelated.id, PulseUpdate::status(PulseStatus::Terminated))
            .unwrap();

        let drift = ctx.get_coherence_drift(&reply.id).unwrap();
        assert!((drift.drift - 0.1).abs() < 1e-9);
        assert_eq!(drift.trend, Trend::Increasing);

        let drifting = ctx.get_pulses_with_drift(5.0);
        assert_eq!(drifting.len(), 1);
        assert_eq!(drifting[0].pulse_id, reply.id);

        let stats = ctx.get_statistics();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.by_status[&PulseStatus::Terminated], 1);
        assert_eq!(stats.by_intent[&Intent::Query], 1);
        assert_eq!(stats.by_intent[&Intent::Update], 1);
    }

    // =========================================================================
    // CAPACITY
    // =========================================================================

    #[test]
    fn test_capacity_hysteresis_through_context() {
        let ctx = context(RegistryConfig::for_testing());

        for i in 0..150 {
            ctx.emit(PulseDraft::new(format!("load.{i}")));
        }
        assert_eq!(ctx.registry_len(), 135);

        for i in 150..164 {
            ctx.emit(PulseDraft::new(format!("load.{i}")));
        }
        assert_eq!(ctx.registry_len(), 149);

        ctx.emit(PulseDraft::new("load.164"));
        assert_eq!(ctx.registry_len(), 135);

        // The bus log is bounded independently.
        assert_eq!(ctx.bus().get_log().len(), 165);
    }

    // =========================================================================
    // METRICS
    // =========================================================================

    #[test]
    fn test_metrics_exposition() {
        pulse_telemetry::register_metrics().unwrap();
        pulse_telemetry::register_metrics().unwrap();

        let ctx = context(RegistryConfig::for_testing());
        ctx.emit(PulseDraft::new("metered"));

        let text = pulse_telemetry::encode_metrics().unwrap();
        assert!(text.contains("pulse_bus_pulses_emitted_total"));
        assert!(text.contains("pulse_registry_pulses"));
    }
}
