//! # Integration Tests
//!
//! End-to-end flows across the messaging core.
//!
//! - `transport_flows`: handshake outcomes, reconnect policy and frame
//!   handling against a live relay
//! - `context_flows`: Bus, Registry and Transport working through one
//!   shared context

pub mod context_flows;
pub mod transport_flows;
