#![forbid(unsafe_code)]

//! Handshake and transport counters. `MetricsSink` is the seam the driver and
//! transport pipeline record through; `PrometheusMetrics` is the default
//! registry-backed implementation, and `NoopMetrics` is for tests that don't
//! care about counters.

use once_cell::sync::Lazy;
use prometheus::{IntCounter, Registry};

use crate::handshake_state::Pattern;

pub trait MetricsSink: Send + Sync {
    fn handshake_success(&self, pattern: Pattern);
    fn handshake_error(&self);
    fn packet_encrypted(&self);
    fn packet_decrypted(&self);
    fn decrypt_error(&self);
}

static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

fn register(name: &str, help: &str) -> IntCounter {
    let counter = IntCounter::new(name, help).expect("counter name/help are static and valid");
    REGISTRY
        .register(Box::new(counter.clone()))
        .expect("counter is registered exactly once");
    counter
}

struct Counters {
    handshake_successes: IntCounter,
    xx_pattern_successes: IntCounter,
    ik_handshake_successes: IntCounter,
    xxfallback_handshake_successes: IntCounter,
    handshake_errors: IntCounter,
    encrypted_packets: IntCounter,
    decrypted_packets: IntCounter,
    decrypt_errors: IntCounter,
}

static COUNTERS: Lazy<Counters> = Lazy::new(|| Counters {
    handshake_successes: register(
        "libp2p_noise_xxhandshake_successes_total",
        "completed handshakes, any pattern (XX, IK, or XXfallback)",
    ),
    xx_pattern_successes: register(
        "libp2p_noise_xxhandshake_pattern_xx_successes_total",
        "completed handshakes that used plain Noise_XX",
    ),
    ik_handshake_successes: register(
        "libp2p_noise_ikhandshake_successes_total",
        "completed Noise_IK handshakes",
    ),
    xxfallback_handshake_successes: register(
        "libp2p_noise_xxfallbackhandshake_successes_total",
        "completed Noise_XXfallback handshakes",
    ),
    handshake_errors: register(
        "libp2p_noise_xxhandshake_error_total",
        "handshakes that failed before a secure channel was established",
    ),
    encrypted_packets: register(
        "libp2p_noise_encrypted_packets_total",
        "transport records sealed for sending",
    ),
    decrypted_packets: register(
        "libp2p_noise_decrypted_packets_total",
        "transport records opened successfully",
    ),
    decrypt_errors: register(
        "libp2p_noise_decrypt_errors_total",
        "transport records that failed AEAD decryption",
    ),
});

/// Registers (on first use) and increments the shared Prometheus counters.
#[derive(Clone, Copy, Default)]
pub struct PrometheusMetrics;

impl PrometheusMetrics {
    pub fn registry() -> &'static Registry {
        &REGISTRY
    }
}

impl MetricsSink for PrometheusMetrics {
    fn handshake_success(&self, pattern: Pattern) {
        // Every completed handshake counts toward the spec-mandated total,
        // regardless of which pattern it completed under; the per-pattern
        // counters below are an additional breakdown, not a replacement.
        COUNTERS.handshake_successes.inc();
        match pattern {
            Pattern::Xx => COUNTERS.xx_pattern_successes.inc(),
            Pattern::Ik => COUNTERS.ik_handshake_successes.inc(),
            Pattern::XxFallback => COUNTERS.xxfallback_handshake_successes.inc(),
        }
    }

    fn handshake_error(&self) {
        COUNTERS.handshake_errors.inc();
    }

    fn packet_encrypted(&self) {
        COUNTERS.encrypted_packets.inc();
    }

    fn packet_decrypted(&self) {
        COUNTERS.decrypted_packets.inc();
    }

    fn decrypt_error(&self) {
        COUNTERS.decrypt_errors.inc();
    }
}

#[derive(Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn handshake_success(&self, _pattern: Pattern) {}
    fn handshake_error(&self) {}
    fn packet_encrypted(&self) {}
    fn packet_decrypted(&self) {}
    fn decrypt_error(&self) {}
}
