//! Prometheus metrics for the messaging core.
//!
//! All metrics follow the naming convention: `pulse_<component>_<metric>_<unit>`
//!
//! Collectors are process-wide statics registered into [`REGISTRY`] on first
//! use of [`register_metrics`]; incrementing an unregistered collector is
//! harmless, it is just not exported.

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts,
    Registry, TextEncoder,
};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // BUS METRICS
    // =========================================================================

    /// Total pulses emitted on any bus
    pub static ref PULSES_EMITTED: Counter = Counter::new(
        "pulse_bus_pulses_emitted_total",
        "Total number of pulses emitted on the bus"
    ).expect("metric creation failed");

    /// Total handler invocations across all notification passes
    pub static ref BUS_DELIVERIES: Counter = Counter::new(
        "pulse_bus_deliveries_total",
        "Total number of handler invocations"
    ).expect("metric creation failed");

    /// Time spent dispatching one emit to all passes
    pub static ref BUS_DISPATCH_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "pulse_bus_dispatch_duration_seconds",
            "Time spent notifying subscribers for one emit"
        ).buckets(exponential_buckets(0.00001, 2.0, 16).expect("valid buckets"))
    ).expect("metric creation failed");

    // =========================================================================
    // REGISTRY METRICS
    // =========================================================================

    /// Current number of stored pulses
    pub static ref REGISTRY_SIZE: Gauge = Gauge::new(
        "pulse_registry_pulses",
        "Number of pulses currently held by the registry"
    ).expect("metric creation failed");

    /// Pulses removed by capacity eviction
    pub static ref REGISTRY_EVICTIONS: Counter = Counter::new(
        "pulse_registry_evicted_total",
        "Total number of pulses removed by capacity eviction"
    ).expect("metric creation failed");

    // =========================================================================
    // TRANSPORT METRICS
    // =========================================================================

    /// Emits dropped because the transport was not connected
    pub static ref EMITS_DROPPED: CounterVec = CounterVec::new(
        Opts::new("pulse_transport_emits_dropped_total", "Emits dropped while disconnected"),
        &["mode"]
    ).expect("metric creation failed");

    /// Inbound frames by mode and kind
    pub static ref FRAMES_RECEIVED: CounterVec = CounterVec::new(
        Opts::new("pulse_transport_frames_received_total", "Inbound frames by mode and kind"),
        &["mode", "kind"]
    ).expect("metric creation failed");

    /// Reconnect attempts scheduled
    pub static ref RECONNECT_ATTEMPTS: Counter = Counter::new(
        "pulse_transport_reconnect_attempts_total",
        "Total reconnect attempts scheduled"
    ).expect("metric creation failed");

    /// Handshake outcomes (ok, missing_fields, invalid_signature, policy_rejected)
    pub static ref HANDSHAKE_OUTCOMES: CounterVec = CounterVec::new(
        Opts::new("pulse_handshake_outcomes_total", "Handshake outcomes by result"),
        &["outcome"]
    ).expect("metric creation failed");
}

/// Register all metrics with the global registry. Registering twice is not
/// an error.
pub fn register_metrics() -> Result<(), TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Bus
        Box::new(PULSES_EMITTED.clone()),
        Box::new(BUS_DELIVERIES.clone()),
        Box::new(BUS_DISPATCH_DURATION.clone()),
        // Registry
        Box::new(REGISTRY_SIZE.clone()),
        Box::new(REGISTRY_EVICTIONS.clone()),
        // Transport
        Box::new(EMITS_DROPPED.clone()),
        Box::new(FRAMES_RECEIVED.clone()),
        Box::new(RECONNECT_ATTEMPTS.clone()),
        Box::new(HANDSHAKE_OUTCOMES.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(())
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Timer guard for automatic histogram observation.
pub struct HistogramTimer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl HistogramTimer {
    /// Start a new timer for the given histogram.
    pub fn new(histogram: &Histogram) -> Self {
        Self {
            histogram: histogram.clone(),
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        self.histogram.observe(self.start.elapsed().as_secs_f64());
    }
}
