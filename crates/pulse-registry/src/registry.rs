//! # Pulse Registry - Indexed Store with Drift Tracking
//!
//! ## Data Structures
//!
//! - `entries`: O(1) lookup by pulse id, each entry owning its coherence series
//! - `next_seq`: insertion counter breaking timestamp ties during eviction
//!
//! ## Invariants
//!
//! - Stored coherence is always in `[0, 1]`.
//! - Status only moves forward (`active -> decayed -> terminated`).
//! - Every stored pulse has a non-empty coherence series; evicting a pulse
//!   drops its series.

use crate::config::RegistryConfig;
use crate::drift::{CoherenceSeries, DriftReport};
use crate::query::{PulseQuery, PulseUpdate};
use crate::statistics::RegistryStatistics;
use chrono::Utc;
use pulse_telemetry::{REGISTRY_EVICTIONS, REGISTRY_SIZE};
use pulse_types::{clamp_coherence, Pulse, PulseId};
use std::collections::HashMap;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
struct Entry {
    pulse: Pulse,
    series: CoherenceSeries,
    seq: u64,
}

/// Pulse store keyed by id.
///
/// Not internally synchronized; wrap it in a lock to share it (see
/// `pulse-runtime`).
#[derive(Debug)]
pub struct PulseRegistry {
    config: RegistryConfig,
    entries: HashMap<PulseId, Entry>,
    next_seq: u64,
}

impl PulseRegistry {
    /// Creates an empty registry.
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            entries: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Creates a registry with default configuration.
    pub fn with_defaults() -> Self {
        Self::new(RegistryConfig::default())
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &PulseId) -> bool {
        self.entries.contains_key(id)
    }

    /// Stores a pulse and seeds its coherence series.
    ///
    /// Returns `false` and leaves the store untouched if the id is already
    /// present. May trigger one eviction batch.
    pub fn register(&mut self, mut pulse: Pulse) -> bool {
        if self.entries.contains_key(&pulse.id) {
            warn!(id = %pulse.id, "Duplicate pulse id ignored");
            return false;
        }

        pulse.set_coherence(pulse.coherence);
        let series = CoherenceSeries::seeded(pulse.timestamp, pulse.coherence);
        let seq = self.next_seq;
        self.next_seq += 1;

        debug!(id = %pulse.id, topic = %pulse.topic, "Pulse registered");
        self.entries.insert(pulse.id.clone(), Entry { pulse, series, seq });

        if self.entries.len() >= self.config.high_water_mark()
            && self.entries.len() > self.config.max_pulses
        {
            self.evict_oldest();
        }

        REGISTRY_SIZE.set(self.entries.len() as f64);
        true
    }

    /// Merges `update` into the stored pulse.
    ///
    /// Coherence is clamped and, if it changed, appended to the series.
    /// Backward status transitions are ignored. Returns the merged pulse, or
    /// `None` if the id is unknown.
    pub fn update(&mut self, id: &PulseId, update: PulseUpdate) -> Option<Pulse> {
        let entry = self.entries.get_mut(id)?;
        let pulse = &mut entry.pulse;

        if let Some(origin) = update.origin {
            pulse.origin = origin;
        }
        if let Some(target) = update.target {
            pulse.target = target;
        }
        if let Some(topic) = update.topic {
            pulse.topic = topic;
        }
        if let Some(intent) = update.intent {
            pulse.intent = intent;
        }
        if let Some(payload) = update.payload {
            pulse.payload = payload;
        }
        if let Some(status) = update.status {
            if !pulse.transition(status) {
                warn!(
                    id = %id,
                    from = %pulse.status,
                    to = %status,
                    "Backward status transition ignored"
                );
            }
        }
        pulse.metadata.extend(update.metadata);

        if let Some(value) = update.coherence {
            let clamped = clamp_coherence(value);
            if clamped != pulse.coherence {
                pulse.coherence = clamped;
                entry.series.push(Utc::now(), clamped);
            }
        }

        Some(entry.pulse.clone())
    }

    pub fn get(&self, id: &PulseId) -> Option<&Pulse> {
        self.entries.get(id).map(|e| &e.pulse)
    }

    /// Linear scan, ordered by timestamp then insertion.
    pub fn query(&self, query: &PulseQuery) -> Vec<&Pulse> {
        let mut matched: Vec<&Entry> = self
            .entries
            .values()
            .filter(|e| query.matches(&e.pulse))
            .collect();
        matched.sort_by(|a, b| (a.pulse.timestamp, a.seq).cmp(&(b.pulse.timestamp, b.seq)));
        matched.into_iter().map(|e| &e.pulse).collect()
    }

    /// Coherence history of one pulse.
    pub fn series(&self, id: &PulseId) -> Option<&CoherenceSeries> {
        self.entries.get(id).map(|e| &e.series)
    }

    pub fn get_coherence_drift(&self, id: &PulseId) -> Option<DriftReport> {
        self.entries.get(id).map(|e| e.series.report(id))
    }

    /// Reports whose `|drift_percent| >= min_percent`, largest first.
    pub fn get_pulses_with_drift(&self, min_percent: f64) -> Vec<DriftReport> {
        let threshold = min_percent.abs();
        let mut reports: Vec<DriftReport> = self
            .entries
            .iter()
            .map(|(id, e)| e.series.report(id))
            .filter(|r| r.drift_percent.abs() >= threshold)
            .collect();
        reports.sort_by(|a, b| b.drift_percent.abs().total_cmp(&a.drift_percent.abs()));
        reports
    }

    /// Mean stored coherence, 0 when empty.
    pub fn get_average_coherence(&self) -> f64 {
        if self.entries.is_empty() {
            return 0.0;
        }
        let sum: f64 = self.entries.values().map(|e| e.pulse.coherence).sum();
        sum / self.entries.len() as f64
    }

    pub fn get_statistics(&self) -> RegistryStatistics {
        RegistryStatistics::collect(self.entries.values().map(|e| &e.pulse))
    }

    /// Removes every pulse and series.
    pub fn clear(&mut self) {
        let removed = self.entries.len();
        self.entries.clear();
        REGISTRY_SIZE.set(0.0);
        info!(removed, "Registry cleared");
    }

    /// Removes one batch of the oldest pulses by timestamp.
    fn evict_oldest(&mut self) -> usize {
        let batch = self.config.eviction_batch(self.entries.len());

        let mut by_age: Vec<(chrono::DateTime<Utc>, u64, PulseId)> = self
            .entries
            .iter()
            .map(|(id, e)| (e.pulse.timestamp, e.seq, id.clone()))
            .collect();
        by_age.sort_unstable_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        for (_, _, id) in by_age.into_iter().take(batch) {
            self.entries.remove(&id);
        }

        REGISTRY_EVICTIONS.inc_by(batch as f64);
        warn!(
            evicted = batch,
            remaining = self.entries.len(),
            max_pulses = self.config.max_pulses,
            "Registry over capacity, evicted oldest pulses"
        );
        batch
    }
}

impl Default for PulseRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
