//! # Pulse Types Crate
//!
//! The message model shared by every layer of the messaging core.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: the `Pulse` value type, its intent/status
//!   vocabulary and its wire representations are defined here only.
//! - **Clamped Coherence**: every constructor and setter clamps coherence
//!   into `[0, 1]`.
//! - **One Signing Implementation**: the handshake client and server both
//!   sign through [`security`], so the canonical form cannot drift apart.

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod pulse;
pub mod security;
pub mod wire;

pub use pulse::{clamp_coherence, Intent, Metadata, Pulse, PulseDraft, PulseId, PulseStatus};
pub use security::{SignatureScheme, SigningError};
pub use wire::{parse_timestamp, DirectFrame, PulseAck, WirePulse};
