//! # Pulse Bus - In-Process Pub/Sub
//!
//! Routes pulses between components living in the same process.
//!
//! ## Routing
//!
//! ```text
//!   emit(draft) ──► complete + log ──► 1. exact topic subscribers
//!                                      2. "*" subscribers
//!                                      3. "<origin>:*" subscribers
//!                                      4. "<target>:*" subscribers
//! ```
//!
//! Dispatch is synchronous and happens on the emitting thread. A handler
//! that panics is logged and skipped; the remaining handlers still run.
//!
//! ## Replay Log
//!
//! The last [`DEFAULT_LOG_CAPACITY`] pulses are kept for inspection and are
//! the input to provisional coherence scoring (see [`coherence`]).

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod coherence;
pub mod publisher;
pub mod subscriber;

pub use coherence::{CoherenceStrategy, FixedCoherence, TopicHeuristic};
pub use publisher::{PulseBus, PulseEmitter};
pub use subscriber::{PulseHandler, Subscription};

/// Default number of pulses kept in the replay log.
pub const DEFAULT_LOG_CAPACITY: usize = 1000;

/// Pattern matching every pulse. Also the suffix of origin/target patterns.
pub const WILDCARD: &str = "*";

/// Builds the `<name>:*` pattern for a component.
#[must_use]
pub fn component_pattern(name: &str) -> String {
    format!("{name}:{WILDCARD}")
}
