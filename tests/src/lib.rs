//! # Pulse Test Suite
//!
//! Unified test crate containing:
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── src/
//! │   ├── harness.rs        # In-process WebSocket relay on 127.0.0.1:0
//! │   └── integration/      # Cross-crate flows
//! │       ├── transport_flows.rs
//! │       └── context_flows.rs
//! └── benches/
//!     └── pulse_benchmarks.rs
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p pulse-tests
//!
//! # By category
//! cargo test -p pulse-tests integration::transport_flows::
//!
//! # Benchmarks
//! cargo bench -p pulse-tests
//! ```

pub mod harness;
pub mod integration;
