//! Pass/fail policy hooks.
//!
//! A [`PulseValidator`] decides whether an inbound pulse may become
//! canonical. [`OriginAllowList`] serves both as a validator and as the
//! handshake's [`PolicyGate`], so one list governs connections and traffic.

use async_trait::async_trait;
use parking_lot::RwLock;
use pulse_transport::{AuthenticatedPeer, PolicyGate};
use pulse_types::Pulse;
use std::collections::HashSet;

/// Per-pulse policy check. `Err` carries the refusal reason.
pub trait PulseValidator: Send + Sync {
    fn validate(&self, pulse: &Pulse) -> Result<(), String>;
}

impl<F> PulseValidator for F
where
    F: Fn(&Pulse) -> Result<(), String> + Send + Sync,
{
    fn validate(&self, pulse: &Pulse) -> Result<(), String> {
        self(pulse)
    }
}

/// Admits only known component names.
#[derive(Debug, Default)]
pub struct OriginAllowList {
    allowed: RwLock<HashSet<String>>,
}

impl OriginAllowList {
    pub fn new<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed: RwLock::new(origins.into_iter().map(Into::into).collect()),
        }
    }

    pub fn allow(&self, origin: impl Into<String>) {
        self.allowed.write().insert(origin.into());
    }

    pub fn revoke(&self, origin: &str) -> bool {
        self.allowed.write().remove(origin)
    }

    pub fn is_allowed(&self, origin: &str) -> bool {
        self.allowed.read().contains(origin)
    }

    fn admit(&self, origin: &str) -> Result<(), String> {
        if self.is_allowed(origin) {
            Ok(())
        } else {
            Err(format!("origin '{origin}' is not allowed"))
        }
    }
}

impl PulseValidator for OriginAllowList {
    fn validate(&self, pulse: &Pulse) -> Result<(), String> {
        self.admit(&pulse.origin)
    }
}

#[async_trait]
impl PolicyGate for OriginAllowList {
    async fn check(&self, peer: &AuthenticatedPeer) -> Result<(), String> {
        self.admit(&peer.client_id)
    }
}
