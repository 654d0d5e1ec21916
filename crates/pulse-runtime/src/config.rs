//! # Pulse Configuration
//!
//! One struct per layer, all with working defaults, assembled from `PULSE_*`
//! environment variables.
//!
//! ## Security Requirements
//!
//! - `shared_secret` MUST NOT be empty or the development default in
//!   production; see [`PulseConfig::validate_for_production`].

use pulse_registry::RegistryConfig;
use pulse_telemetry::TelemetryConfig;
use pulse_transport::{AuthenticatorConfig, ClientAuth, TransportConfig, TransportMode};
use pulse_types::SignatureScheme;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Secret used when none is configured. Refused by production validation.
pub const DEVELOPMENT_SECRET: &str = "pulse-development-secret";

/// Configuration errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error(
        "SECURITY VIOLATION: shared secret is empty or the development default. \
         Set PULSE_SHARED_SECRET."
    )]
    InsecureSharedSecret,

    #[error("Invalid value '{value}' for {key}")]
    InvalidValue { key: &'static str, value: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Complete configuration of one process.
#[derive(Debug, Clone, Default)]
pub struct PulseConfig {
    pub telemetry: TelemetryConfig,
    pub bus: BusConfig,
    pub registry: RegistryConfig,
    /// `auth` is filled from `security` when a client identity is configured.
    pub transport: TransportConfig,
    pub security: SecurityConfig,
}

/// Bus settings.
#[derive(Debug, Clone, PartialEq)]
pub struct BusConfig {
    /// Pulses kept in the replay log.
    pub log_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            log_capacity: pulse_bus::DEFAULT_LOG_CAPACITY,
        }
    }
}

/// Handshake secret and freshness window, shared by client and server.
#[derive(Clone, PartialEq)]
pub struct SecurityConfig {
    pub shared_secret: String,
    pub scheme: SignatureScheme,
    pub max_age: Duration,
    pub max_future_skew: Duration,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            shared_secret: DEVELOPMENT_SECRET.to_string(), // MUST be overridden in production
            scheme: SignatureScheme::default(),
            max_age: Duration::from_secs(60),
            max_future_skew: Duration::from_secs(10),
        }
    }
}

impl fmt::Debug for SecurityConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SecurityConfig")
            .field("shared_secret", &"<redacted>")
            .field("scheme", &self.scheme)
            .field("max_age", &self.max_age)
            .field("max_future_skew", &self.max_future_skew)
            .finish()
    }
}

impl PulseConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `PULSE_LOG_CAPACITY`: Bus replay log size (default: 1000)
    /// - `PULSE_REGISTRY_MAX_PULSES`: Nominal registry size (default: 10000).
    ///   The store grows to `ceil(max * high_water_fraction) - 1` pulses
    ///   (14999 at the defaults) before a batch evicts
    /// - `PULSE_REGISTRY_EVICTION_FRACTION`: Share evicted per batch (default: 0.1)
    /// - `PULSE_REGISTRY_HIGH_WATER_FRACTION`: Multiple of max pulses at which
    ///   eviction fires (default: 1.5)
    /// - `PULSE_TRANSPORT_MODE`: `local`, `direct` or `relayed` (default: local)
    /// - `PULSE_ENDPOINT`: Stream URL or relay base URL
    /// - `PULSE_RELAY_TOPIC`: Relay topic path (default: pulse)
    /// - `PULSE_RECONNECT_DELAY_MS`: Fixed reconnect delay (default: 3000)
    /// - `PULSE_MAX_RECONNECT_ATTEMPTS`: Reconnect ceiling (default: 10)
    /// - `PULSE_HANDSHAKE_TIMEOUT_MS`: Handshake reply timeout (default: 5000)
    /// - `PULSE_HEARTBEAT_INTERVAL_SECS`: Heartbeat period, 0 disables (default: 30)
    /// - `PULSE_SHARED_SECRET`: Handshake secret
    /// - `PULSE_SIGNATURE_SCHEME`: `sha256` or `hmac-sha256` (default: sha256)
    /// - `PULSE_HANDSHAKE_MAX_AGE_SECS`: Oldest accepted challenge (default: 60)
    /// - `PULSE_HANDSHAKE_MAX_SKEW_SECS`: Furthest-future challenge (default: 10)
    /// - `PULSE_CLIENT_ORIGIN` / `PULSE_CLIENT_TARGET`: Handshake identity;
    ///   the transport authenticates only when an origin is set
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup<L>(lookup: L) -> Result<Self, ConfigError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let mut config = Self {
            telemetry: TelemetryConfig::from_env(),
            ..Self::default()
        };

        if let Some(v) = var("PULSE_LOG_CAPACITY") {
            config.bus.log_capacity = parse("PULSE_LOG_CAPACITY", &v)?;
        }

        if let Some(v) = var("PULSE_REGISTRY_MAX_PULSES") {
            config.registry.max_pulses = parse("PULSE_REGISTRY_MAX_PULSES", &v)?;
        }
        if let Some(v) = var("PULSE_REGISTRY_EVICTION_FRACTION") {
            config.registry.eviction_fraction = parse("PULSE_REGISTRY_EVICTION_FRACTION", &v)?;
        }
        if let Some(v) = var("PULSE_REGISTRY_HIGH_WATER_FRACTION") {
            config.registry.high_water_fraction =
                parse("PULSE_REGISTRY_HIGH_WATER_FRACTION", &v)?;
        }

        if let Some(v) = var("PULSE_TRANSPORT_MODE") {
            config.transport.mode =
                TransportMode::from_str(&v).map_err(|_| ConfigError::InvalidValue {
                    key: "PULSE_TRANSPORT_MODE",
                    value: v.clone(),
                })?;
        }
        if let Some(v) = var("PULSE_ENDPOINT") {
            config.transport.endpoint = v;
        }
        if let Some(v) = var("PULSE_RELAY_TOPIC") {
            config.transport.relay_topic = v;
        }
        if let Some(v) = var("PULSE_RECONNECT_DELAY_MS") {
            config.transport.reconnect_delay =
                Duration::from_millis(parse("PULSE_RECONNECT_DELAY_MS", &v)?);
        }
        if let Some(v) = var("PULSE_MAX_RECONNECT_ATTEMPTS") {
            config.transport.max_reconnect_attempts = parse("PULSE_MAX_RECONNECT_ATTEMPTS", &v)?;
        }
        if let Some(v) = var("PULSE_HANDSHAKE_TIMEOUT_MS") {
            config.transport.handshake_timeout =
                Duration::from_millis(parse("PULSE_HANDSHAKE_TIMEOUT_MS", &v)?);
        }
        if let Some(v) = var("PULSE_HEARTBEAT_INTERVAL_SECS") {
            let secs: u64 = parse("PULSE_HEARTBEAT_INTERVAL_SECS", &v)?;
            config.transport.heartbeat_interval = (secs > 0).then(|| Duration::from_secs(secs));
        }

        if let Some(v) = var("PULSE_SHARED_SECRET") {
            config.security.shared_secret = v;
        }
        if let Some(v) = var("PULSE_SIGNATURE_SCHEME") {
            config.security.scheme =
                SignatureScheme::from_name(&v).ok_or_else(|| ConfigError::InvalidValue {
                    key: "PULSE_SIGNATURE_SCHEME",
                    value: v.clone(),
                })?;
        }
        if let Some(v) = var("PULSE_HANDSHAKE_MAX_AGE_SECS") {
            config.security.max_age =
                Duration::from_secs(parse("PULSE_HANDSHAKE_MAX_AGE_SECS", &v)?);
        }
        if let Some(v) = var("PULSE_HANDSHAKE_MAX_SKEW_SECS") {
            config.security.max_future_skew =
                Duration::from_secs(parse("PULSE_HANDSHAKE_MAX_SKEW_SECS", &v)?);
        }

        if let Some(origin) = var("PULSE_CLIENT_ORIGIN") {
            let target = var("PULSE_CLIENT_TARGET").unwrap_or_default();
            config.transport.auth = Some(config.client_auth(origin, target));
        }

        config.validate()?;
        Ok(config)
    }

    /// Client credentials signed with this configuration's secret and scheme.
    pub fn client_auth(&self, origin: impl Into<String>, target: impl Into<String>) -> ClientAuth {
        ClientAuth::new(origin, target, self.security.shared_secret.clone())
            .with_scheme(self.security.scheme)
    }

    /// Server-side settings matching this configuration.
    pub fn authenticator_config(&self) -> AuthenticatorConfig {
        AuthenticatorConfig {
            scheme: self.security.scheme,
            max_age: self.security.max_age,
            max_future_skew: self.security.max_future_skew,
            handshake_timeout: self.transport.handshake_timeout,
            ..AuthenticatorConfig::new(self.security.shared_secret.clone())
        }
    }

    /// Structural checks that hold in every environment.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bus.log_capacity == 0 {
            return Err(ConfigError::Invalid("bus log capacity must be positive".into()));
        }
        if self.registry.max_pulses == 0 {
            return Err(ConfigError::Invalid("registry max_pulses must be positive".into()));
        }
        let fraction = self.registry.eviction_fraction;
        if !(fraction > 0.0 && fraction <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "eviction fraction {fraction} is outside (0, 1]"
            )));
        }
        if !(self.registry.high_water_fraction >= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "high-water fraction {} is below 1",
                self.registry.high_water_fraction
            )));
        }
        if self.transport.mode != TransportMode::Local {
            self.transport
                .endpoint_url()
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        Ok(())
    }

    /// Validate configuration for production readiness.
    ///
    /// # Returns
    ///
    /// Returns `Err` if:
    /// - any structural check fails
    /// - the shared secret is empty or [`DEVELOPMENT_SECRET`]
    pub fn validate_for_production(&self) -> Result<(), ConfigError> {
        self.validate()?;
        let secret = self.security.shared_secret.trim();
        if secret.is_empty() || secret == DEVELOPMENT_SECRET {
            return Err(ConfigError::InsecureSharedSecret);
        }
        if let Some(auth) = &self.transport.auth {
            if auth.shared_secret.trim().is_empty() || auth.shared_secret == DEVELOPMENT_SECRET {
                return Err(ConfigError::InsecureSharedSecret);
            }
        }
        Ok(())
    }
}

fn parse<T: FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}
