//! # Pulse Registry
//!
//! Canonical store for pulses, with per-pulse coherence history.
//!
//! ## Capacity
//!
//! The registry holds `max_pulses` nominally. Once the store reaches the
//! high-water mark (`max_pulses * high_water_fraction`, 1.5x by default) one
//! batch of the oldest pulses by timestamp is removed: 10% of the store by
//! default. With `max_pulses = 100` the 150th registration evicts 15 and
//! leaves 135.
//!
//! ## Drift
//!
//! `drift = last - first`, `drift_percent = drift / first * 100`, and the
//! trend is `increasing` above +5%, `decreasing` below -5%.

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod config;
pub mod drift;
pub mod query;
pub mod registry;
pub mod statistics;

pub use config::RegistryConfig;
pub use drift::{CoherenceSample, CoherenceSeries, DriftReport, Trend};
pub use query::{PulseQuery, PulseUpdate};
pub use registry::PulseRegistry;
pub use statistics::{CoherenceRange, RegistryStatistics};
