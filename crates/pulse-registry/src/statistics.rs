//! Aggregate registry statistics.

use pulse_types::{Intent, Pulse, PulseStatus};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Lowest and highest stored coherence. Both 0 for an empty registry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CoherenceRange {
    pub min: f64,
    pub max: f64,
}

/// Registry snapshot. `by_intent` and `by_status` always list every variant.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegistryStatistics {
    pub total: usize,
    pub by_status: BTreeMap<PulseStatus, usize>,
    pub by_intent: BTreeMap<Intent, usize>,
    pub avg_coherence: f64,
    pub coherence_range: CoherenceRange,
}

impl RegistryStatistics {
    pub(crate) fn collect<'a>(pulses: impl Iterator<Item = &'a Pulse>) -> Self {
        let mut by_status: BTreeMap<PulseStatus, usize> =
            PulseStatus::ALL.iter().map(|s| (*s, 0)).collect();
        let mut by_intent: BTreeMap<Intent, usize> =
            Intent::ALL.iter().map(|i| (*i, 0)).collect();

        let mut total = 0usize;
        let mut sum = 0.0;
        let mut range: Option<CoherenceRange> = None;

        for pulse in pulses {
            total += 1;
            sum += pulse.coherence;
            *by_status.entry(pulse.status).or_default() += 1;
            *by_intent.entry(pulse.intent).or_default() += 1;
            range = Some(match range {
                None => CoherenceRange {
                    min: pulse.coherence,
                    max: pulse.coherence,
                },
                Some(r) => CoherenceRange {
                    min: r.min.min(pulse.coherence),
                    max: r.max.max(pulse.coherence),
                },
            });
        }

        Self {
            total,
            by_status,
            by_intent,
            avg_coherence: if total == 0 { 0.0 } else { sum / total as f64 },
            coherence_range: range.unwrap_or_default(),
        }
    }
}
