//! # Pulse Context
//!
//! The Bus/Registry pair shared by every component of a process.
//!
//! ## Thread Safety
//!
//! - `emit`, `register` and `update` pass through one re-entrant write gate,
//!   so mutations are serialized while a handler may still emit from inside
//!   a dispatch
//! - Registry reads take the `RwLock` read side and run concurrently with
//!   each other, never with a mutation
//! - The registry lock is released before handlers run

use crate::validator::PulseValidator;
use crate::PulseConfig;
use parking_lot::{ReentrantMutex, RwLock};
use pulse_bus::{PulseBus, PulseEmitter};
use pulse_registry::{DriftReport, PulseQuery, PulseRegistry, PulseUpdate, RegistryStatistics};
use pulse_transport::{PulseTransport, TransportConfig};
use pulse_types::{Pulse, PulseDraft, PulseId};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

/// An inbound pulse refused by the validator.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("pulse {id} rejected: {reason}")]
pub struct PulseRejected {
    pub id: PulseId,
    pub reason: String,
}

/// One Bus and one Registry, kept consistent.
///
/// Every pulse emitted through the context is registered before any handler
/// sees it.
pub struct PulseContext {
    bus: Arc<PulseBus>,
    registry: RwLock<PulseRegistry>,
    write_gate: ReentrantMutex<()>,
    validator: Option<Arc<dyn PulseValidator>>,
}

impl PulseContext {
    pub fn new(config: &PulseConfig) -> Self {
        info!(
            log_capacity = config.bus.log_capacity,
            max_pulses = config.registry.max_pulses,
            peak_pulses = config.registry.peak_len(),
            "Creating pulse context"
        );
        Self {
            bus: Arc::new(PulseBus::with_capacity(config.bus.log_capacity)),
            registry: RwLock::new(PulseRegistry::new(config.registry.clone())),
            write_gate: ReentrantMutex::new(()),
            validator: None,
        }
    }

    /// Consults `validator` for every ingested pulse.
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn PulseValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    pub fn bus(&self) -> &Arc<PulseBus> {
        &self.bus
    }

    /// Emits on the bus and records the pulse.
    pub fn emit(&self, draft: PulseDraft) -> Pulse {
        let _gate = self.write_gate.lock();
        self.bus.emit_with(draft, |pulse| {
            self.registry.write().register(pulse.clone());
        })
    }

    /// Entry point for inbound transport traffic.
    ///
    /// The pulse keeps its id and coherence. A pulse refused by the validator
    /// is neither dispatched nor registered.
    pub fn ingest(&self, pulse: Pulse) -> Result<Pulse, PulseRejected> {
        if let Some(validator) = &self.validator {
            if let Err(reason) = validator.validate(&pulse) {
                warn!(id = %pulse.id, topic = %pulse.topic, reason = %reason, "Inbound pulse rejected");
                return Err(PulseRejected {
                    id: pulse.id,
                    reason,
                });
            }
        }
        debug!(id = %pulse.id, origin = %pulse.origin, "Inbound pulse accepted");
        Ok(self.emit(PulseDraft::from(pulse)))
    }

    /// Records a pulse without dispatching it.
    pub fn register(&self, pulse: Pulse) -> bool {
        let _gate = self.write_gate.lock();
        self.registry.write().register(pulse)
    }

    /// Applies an authoritative update, typically a coherence score.
    pub fn update(&self, id: &PulseId, update: PulseUpdate) -> Option<Pulse> {
        let _gate = self.write_gate.lock();
        self.registry.write().update(id, update)
    }

    pub fn get(&self, id: &PulseId) -> Option<Pulse> {
        self.registry.read().get(id).cloned()
    }

    pub fn query(&self, query: &PulseQuery) -> Vec<Pulse> {
        self.registry.read().query(query).into_iter().cloned().collect()
    }

    pub fn get_coherence_drift(&self, id: &PulseId) -> Option<DriftReport> {
        self.registry.read().get_coherence_drift(id)
    }

    pub fn get_pulses_with_drift(&self, min_percent: f64) -> Vec<DriftReport> {
        self.registry.read().get_pulses_with_drift(min_percent)
    }

    pub fn get_average_coherence(&self) -> f64 {
        self.registry.read().get_average_coherence()
    }

    pub fn get_statistics(&self) -> RegistryStatistics {
        self.registry.read().get_statistics()
    }

    pub fn registry_len(&self) -> usize {
        self.registry.read().len()
    }

    /// Runs `f` under the registry read lock. `f` must not emit.
    pub fn with_registry<R>(&self, f: impl FnOnce(&PulseRegistry) -> R) -> R {
        f(&self.registry.read())
    }

    /// Handler that feeds a network transport's inbound pulses into
    /// [`ingest`](Self::ingest).
    pub fn ingest_handler(self: &Arc<Self>) -> impl Fn(Pulse) + Send + Sync + 'static {
        let context = Arc::downgrade(self);
        move |pulse| {
            if let Some(context) = context.upgrade() {
                let _ = context.ingest(pulse);
            }
        }
    }

    /// Local-mode transport over this context's bus. Emits are recorded.
    pub fn local_transport(self: &Arc<Self>) -> PulseTransport {
        PulseTransport::new(TransportConfig::local())
            .with_local_bus(Arc::clone(&self.bus))
            .with_emitter(Arc::clone(self) as Arc<dyn PulseEmitter>)
    }
}

impl Default for PulseContext {
    fn default() -> Self {
        Self::new(&PulseConfig::default())
    }
}

impl PulseEmitter for PulseContext {
    fn emit(&self, draft: PulseDraft) -> Pulse {
        PulseContext::emit(self, draft)
    }
}
