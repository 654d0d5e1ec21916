//! Registry configuration.

use serde::{Deserialize, Serialize};

/// Capacity and eviction settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Nominal capacity. The store may grow to [`peak_len`](Self::peak_len)
    /// before a batch brings it back under.
    pub max_pulses: usize,
    /// Share of the store removed by one eviction batch.
    pub eviction_fraction: f64,
    /// Eviction fires once the store reaches `max_pulses * high_water_fraction`.
    pub high_water_fraction: f64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_pulses: 10_000,
            eviction_fraction: 0.1,
            high_water_fraction: 1.5,
        }
    }
}

impl RegistryConfig {
    /// Creates a small config for testing.
    pub fn for_testing() -> Self {
        Self {
            max_pulses: 100,
            ..Default::default()
        }
    }

    /// Store size at which an eviction batch runs. Always above `max_pulses`.
    #[must_use]
    pub fn high_water_mark(&self) -> usize {
        let scaled = ceil_tolerant(self.max_pulses as f64 * self.high_water_fraction.max(1.0));
        scaled.max(self.max_pulses.saturating_add(1))
    }

    /// Largest store size reachable without an eviction, one below the
    /// high-water mark. This, not `max_pulses`, bounds memory.
    #[must_use]
    pub fn peak_len(&self) -> usize {
        self.high_water_mark() - 1
    }

    /// Number of pulses one batch removes from a store of `len`.
    #[must_use]
    pub fn eviction_batch(&self, len: usize) -> usize {
        let fraction = self.eviction_fraction.clamp(0.0, 1.0);
        ceil_tolerant(len as f64 * fraction).clamp(1, len.max(1))
    }
}

/// `ceil` that treats values within rounding noise of an integer as that
/// integer, so `150 * 0.1` yields 15 rather than 16.
fn ceil_tolerant(value: f64) -> usize {
    let rounded = value.round();
    if (value - rounded).abs() < 1e-9 {
        rounded as usize
    } else {
        value.ceil() as usize
    }
}
