//! # Pulse Benchmarks
//!
//! | Component | Operation | Expectation |
//! |-----------|-----------|-------------|
//! | Bus | emit with four-pass dispatch | microseconds, linear in handlers |
//! | Registry | register under eviction pressure | amortized O(1) between batches |
//! | Signing | canonicalize + sign handshake challenge | microseconds |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use pulse_bus::PulseBus;
use pulse_registry::{PulseRegistry, RegistryConfig};
use pulse_types::{security, PulseDraft, SignatureScheme};
use serde_json::json;
use std::time::Duration;

// ============================================================================
// BUS
// ============================================================================

fn bench_bus_emit(c: &mut Criterion) {
    let mut group = c.benchmark_group("bus-emit");
    group.measurement_time(Duration::from_secs(5));

    for handlers in [0usize, 4, 32] {
        let bus = PulseBus::new();
        let subscriptions: Vec<_> = (0..handlers)
            .map(|i| match i % 4 {
                0 => bus.on("core.update", |p| {
                    black_box(p.coherence);
                }),
                1 => bus.on("*", |p| {
                    black_box(p.coherence);
                }),
                2 => bus.on("core:*", |p| {
                    black_box(p.coherence);
                }),
                _ => bus.on("mirror:*", |p| {
                    black_box(p.coherence);
                }),
            })
            .collect();

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(BenchmarkId::new("handlers", handlers), &handlers, |b, _| {
            b.iter(|| {
                bus.emit(black_box(
                    PulseDraft::new("core.update")
                        .origin("core")
                        .target("mirror")
                        .payload(json!({"n": 1})),
                ))
            })
        });
        drop(subscriptions);
    }

    group.finish();
}

// ============================================================================
// REGISTRY
// ============================================================================

fn bench_registry_register(c: &mut Criterion) {
    let mut group = c.benchmark_group("registry-register");
    group.measurement_time(Duration::from_secs(5));

    for max_pulses in [100usize, 10_000] {
        let mut registry = PulseRegistry::new(RegistryConfig {
            max_pulses,
            ..RegistryConfig::default()
        });

        group.throughput(Throughput::Elements(1));
        group.bench_with_input(
            BenchmarkId::new("max_pulses", max_pulses),
            &max_pulses,
            |b, _| {
                b.iter(|| {
                    registry.register(black_box(PulseDraft::new("load").finish(0.5)))
                })
            },
        );
    }

    group.finish();
}

// ============================================================================
// SIGNING
// ============================================================================

fn bench_handshake_signing(c: &mut Criterion) {
    let mut group = c.benchmark_group("handshake-signing");
    let challenge = json!({
        "origin": "mirror",
        "target": "core",
        "timestamp": "2024-05-01T12:00:00.000000Z"
    });

    for scheme in [SignatureScheme::Sha256Concat, SignatureScheme::HmacSha256] {
        group.bench_function(format!("{scheme:?}"), |b| {
            b.iter(|| security::sign(black_box(&challenge), b"bench-secret", scheme))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_bus_emit,
    bench_registry_register,
    bench_handshake_signing
);
criterion_main!(benches);
