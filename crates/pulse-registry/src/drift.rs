//! Coherence history and drift.
//!
//! Every registered pulse owns a [`CoherenceSeries`]: the registration value
//! followed by one sample per coherence-changing update. Drift compares the
//! last sample with the first.

use chrono::{DateTime, Utc};
use pulse_types::PulseId;
use serde::{Deserialize, Serialize};

/// Drift percentage beyond which a series counts as moving.
pub const TREND_THRESHOLD_PERCENT: f64 = 5.0;

/// One coherence measurement.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoherenceSample {
    pub timestamp: DateTime<Utc>,
    pub coherence: f64,
}

/// Direction of a drift.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

impl Trend {
    /// Classifies a drift percentage.
    #[must_use]
    pub fn from_percent(drift_percent: f64) -> Self {
        if drift_percent > TREND_THRESHOLD_PERCENT {
            Trend::Increasing
        } else if drift_percent < -TREND_THRESHOLD_PERCENT {
            Trend::Decreasing
        } else {
            Trend::Stable
        }
    }
}

/// Ordered coherence samples for one pulse. Never empty.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CoherenceSeries {
    samples: Vec<CoherenceSample>,
}

impl CoherenceSeries {
    /// Seeds a series with the registration sample.
    pub fn seeded(timestamp: DateTime<Utc>, coherence: f64) -> Self {
        Self {
            samples: vec![CoherenceSample {
                timestamp,
                coherence,
            }],
        }
    }

    pub fn push(&mut self, timestamp: DateTime<Utc>, coherence: f64) {
        self.samples.push(CoherenceSample {
            timestamp,
            coherence,
        });
    }

    pub fn samples(&self) -> &[CoherenceSample] {
        &self.samples
    }

    pub fn first(&self) -> f64 {
        self.samples.first().map_or(0.0, |s| s.coherence)
    }

    pub fn last(&self) -> f64 {
        self.samples.last().map_or(0.0, |s| s.coherence)
    }

    /// `last - first`.
    pub fn drift(&self) -> f64 {
        self.last() - self.first()
    }

    /// `drift / first * 100`, or 0 when the first sample is 0.
    pub fn drift_percent(&self) -> f64 {
        let first = self.first();
        if first == 0.0 {
            0.0
        } else {
            self.drift() / first * 100.0
        }
    }

    pub fn report(&self, pulse_id: &PulseId) -> DriftReport {
        let drift_percent = self.drift_percent();
        DriftReport {
            pulse_id: pulse_id.clone(),
            initial_coherence: self.first(),
            current_coherence: self.last(),
            drift: self.drift(),
            drift_percent,
            trend: Trend::from_percent(drift_percent),
            samples: self.samples.len(),
        }
    }
}

/// Drift summary for one pulse.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DriftReport {
    pub pulse_id: PulseId,
    pub initial_coherence: f64,
    pub current_coherence: f64,
    pub drift: f64,
    pub drift_percent: f64,
    pub trend: Trend,
    /// Number of samples in the series.
    pub samples: usize,
}
