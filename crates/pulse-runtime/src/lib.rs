//! # Pulse Runtime
//!
//! Assembles the messaging core for one process: a [`PulseContext`] holding
//! the shared Bus/Registry pair, a [`PulseConfig`] read from the
//! environment, and the validators guarding inbound traffic.
//!
//! ```rust,ignore
//! let config = PulseConfig::from_env()?;
//! let _telemetry = pulse_telemetry::init_telemetry(config.telemetry.clone())?;
//! let context = Arc::new(PulseContext::new(&config));
//!
//! let transport = PulseTransport::new(config.transport.clone());
//! transport.connect(context.ingest_handler())?;
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod config;
pub mod context;
pub mod validator;

pub use config::{BusConfig, ConfigError, PulseConfig, SecurityConfig, DEVELOPMENT_SECRET};
pub use context::{PulseContext, PulseRejected};
pub use validator::{OriginAllowList, PulseValidator};
