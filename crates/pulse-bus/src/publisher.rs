//! # Pulse Bus
//!
//! The publishing side of the bus and the dispatch loop.
//!
//! Emission is synchronous: `emit` returns after every matching handler has
//! run on the caller's thread. Each emit notifies four groups in order, and
//! each group is snapshotted just before it is walked, so handlers may
//! subscribe or unsubscribe from inside a callback.

use crate::coherence::{CoherenceStrategy, TopicHeuristic};
use crate::subscriber::{HandlerEntry, PulseHandler, SubscriberTable, Subscription};
use crate::{component_pattern, DEFAULT_LOG_CAPACITY, WILDCARD};
use parking_lot::{Mutex, RwLock};
use pulse_telemetry::{HistogramTimer, BUS_DELIVERIES, BUS_DISPATCH_DURATION, PULSES_EMITTED};
use pulse_types::{Pulse, PulseDraft};
use serde_json::Value;
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, trace};

/// Anything that turns drafts into emitted pulses.
///
/// The transport's local mode and the runtime context both emit through
/// this trait so that callers need not know which one they hold.
pub trait PulseEmitter: Send + Sync {
    /// Completes and publishes a draft, returning the emitted pulse.
    fn emit(&self, draft: PulseDraft) -> Pulse;
}

/// In-process pub/sub bus.
pub struct PulseBus {
    /// Pattern -> handlers. Shared with `Subscription` handles via `Weak`.
    subscribers: Arc<SubscriberTable>,

    /// Most recent pulses, oldest first.
    log: Mutex<VecDeque<Pulse>>,

    /// Maximum replay log length.
    log_capacity: usize,

    strategy: RwLock<Arc<dyn CoherenceStrategy>>,

    next_subscription_id: AtomicU64,

    /// Total pulses emitted since construction.
    events_emitted: AtomicU64,
}

impl PulseBus {
    /// Create a bus with the default log capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }

    /// Create a bus that keeps at most `log_capacity` pulses for replay.
    #[must_use]
    pub fn with_capacity(log_capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(RwLock::new(HashMap::new())),
            log: Mutex::new(VecDeque::with_capacity(log_capacity.min(DEFAULT_LOG_CAPACITY))),
            log_capacity,
            strategy: RwLock::new(Arc::new(TopicHeuristic)),
            next_subscription_id: AtomicU64::new(1),
            events_emitted: AtomicU64::new(0),
        }
    }

    /// Replace the provisional coherence strategy.
    pub fn set_coherence_strategy(&self, strategy: Arc<dyn CoherenceStrategy>) {
        *self.strategy.write() = strategy;
    }

    /// Register `handler` on `pattern`.
    ///
    /// Patterns are an exact topic, `*` for every pulse, or `<name>:*` for
    /// every pulse whose origin or target is `<name>`. The same handler may
    /// be registered more than once; each registration is notified.
    pub fn on<F>(&self, pattern: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&Pulse) + Send + Sync + 'static,
    {
        self.on_handler(pattern, Arc::new(handler))
    }

    /// Register an already shared handler.
    pub fn on_handler(&self, pattern: impl Into<String>, handler: PulseHandler) -> Subscription {
        let pattern = pattern.into();
        let id = self.next_subscription_id.fetch_add(1, Ordering::Relaxed);

        self.subscribers
            .write()
            .entry(pattern.clone())
            .or_default()
            .push(HandlerEntry { id, handler });

        debug!(pattern = %pattern, id, "New subscription created");

        Subscription::new(pattern, id, Arc::downgrade(&self.subscribers))
    }

    /// Emit a draft.
    ///
    /// Fills the id and timestamp if absent, assigns a provisional coherence
    /// if none was given, appends to the replay log and notifies subscribers.
    pub fn emit(&self, draft: PulseDraft) -> Pulse {
        self.emit_with(draft, |_| {})
    }

    /// Like [`emit`](Self::emit), running `before_dispatch` on the completed
    /// pulse after it is logged and before any handler sees it.
    pub fn emit_with<F>(&self, draft: PulseDraft, before_dispatch: F) -> Pulse
    where
        F: FnOnce(&Pulse),
    {
        let _timer = HistogramTimer::new(&BUS_DISPATCH_DURATION);

        let pulse = {
            let mut log = self.log.lock();
            let provisional = match draft.coherence {
                Some(_) => 1.0,
                None => self.strategy.read().score(&draft, log.back()),
            };
            let pulse = draft.finish(provisional);
            if self.log_capacity > 0 {
                while log.len() >= self.log_capacity {
                    log.pop_front();
                }
                log.push_back(pulse.clone());
            }
            pulse
        };

        self.events_emitted.fetch_add(1, Ordering::Relaxed);
        PULSES_EMITTED.inc();
        before_dispatch(&pulse);

        let delivered = self.dispatch(&pulse);
        trace!(
            id = %pulse.id,
            topic = %pulse.topic,
            coherence = pulse.coherence,
            delivered,
            "Pulse emitted"
        );
        pulse
    }

    /// Emit a pulse on `topic` with `payload`, taking the remaining fields
    /// from `overrides`.
    pub fn send(&self, topic: impl Into<String>, payload: Value, overrides: PulseDraft) -> Pulse {
        let draft = PulseDraft {
            topic: topic.into(),
            payload,
            ..overrides
        };
        self.emit(draft)
    }

    /// Snapshot of the replay log, oldest first.
    #[must_use]
    pub fn get_log(&self) -> Vec<Pulse> {
        self.log.lock().iter().cloned().collect()
    }

    /// Empty the replay log. Subscriptions are untouched.
    pub fn clear_log(&self) {
        self.log.lock().clear();
    }

    /// The most recent `limit` logged pulses, optionally restricted to one
    /// topic. Oldest first.
    #[must_use]
    pub fn history(&self, topic: Option<&str>, limit: usize) -> Vec<Pulse> {
        let log = self.log.lock();
        let mut recent: Vec<Pulse> = log
            .iter()
            .rev()
            .filter(|p| topic.map_or(true, |t| p.topic == t))
            .take(limit)
            .cloned()
            .collect();
        recent.reverse();
        recent
    }

    /// Patterns that currently have at least one handler.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.subscribers.read().keys().cloned().collect();
        topics.sort();
        topics
    }

    /// Number of handlers on `pattern`, or across all patterns.
    #[must_use]
    pub fn subscriber_count(&self, pattern: Option<&str>) -> usize {
        let table = self.subscribers.read();
        match pattern {
            Some(p) => table.get(p).map_or(0, Vec::len),
            None => table.values().map(Vec::len).sum(),
        }
    }

    /// Total pulses emitted since construction. Not reset by `clear_log`.
    #[must_use]
    pub fn events_emitted(&self) -> u64 {
        self.events_emitted.load(Ordering::Relaxed)
    }

    /// Maximum replay log length.
    #[must_use]
    pub fn log_capacity(&self) -> usize {
        self.log_capacity
    }

    /// Runs the four notification passes. Returns the number of handler
    /// invocations.
    fn dispatch(&self, pulse: &Pulse) -> usize {
        let mut seen = HashSet::with_capacity(4);
        let mut delivered = 0;

        for key in pass_keys(pulse) {
            // A key reached by two passes (origin == target) is notified once.
            if !seen.insert(key.clone()) {
                continue;
            }
            let snapshot: Vec<HandlerEntry> = match self.subscribers.read().get(&key) {
                Some(entries) => entries.clone(),
                None => continue,
            };
            for entry in snapshot {
                let handler = &entry.handler;
                if catch_unwind(AssertUnwindSafe(|| handler(pulse))).is_err() {
                    error!(
                        pattern = %key,
                        id = %pulse.id,
                        "Subscriber panicked; continuing dispatch"
                    );
                }
                delivered += 1;
            }
        }

        BUS_DELIVERIES.inc_by(delivered as f64);
        delivered
    }
}

impl Default for PulseBus {
    fn default() -> Self {
        Self::new()
    }
}

impl PulseEmitter for PulseBus {
    fn emit(&self, draft: PulseDraft) -> Pulse {
        PulseBus::emit(self, draft)
    }
}

impl<T: PulseEmitter + ?Sized> PulseEmitter for Arc<T> {
    fn emit(&self, draft: PulseDraft) -> Pulse {
        (**self).emit(draft)
    }
}

/// Dispatch keys in notification order: exact topic, global wildcard,
/// origin wildcard, target wildcard. Empty origin or target adds no key.
fn pass_keys(pulse: &Pulse) -> Vec<String> {
    let mut keys = Vec::with_capacity(4);
    if !pulse.topic.is_empty() {
        keys.push(pulse.topic.clone());
    }
    keys.push(WILDCARD.to_string());
    if !pulse.origin.is_empty() {
        keys.push(component_pattern(&pulse.origin));
    }
    if !pulse.target.is_empty() {
        keys.push(component_pattern(&pulse.target));
    }
    keys
}
