//! Prometheus metrics for the key lifecycle.
//!
//! Counters and histograms register lazily in the default registry.

use once_cell::sync::Lazy;
use prometheus::{CounterVec, HistogramVec, register_counter_vec, register_histogram_vec};

/// Keys generated counter.
pub static KEYS_GENERATED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "jwks_keys_generated_total",
        "Total number of keys generated",
        &["algorithm", "key_use"]
    )
    .expect("Failed to register keys_generated metric")
});

/// Rotations counter, by trigger (missing, expired, revoked, algorithm_changed, forced).
pub static KEY_ROTATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "jwks_key_rotations_total",
        "Total number of key rotations",
        &["key_use", "trigger"]
    )
    .expect("Failed to register key_rotations metric")
});

/// Revocations counter.
pub static KEYS_REVOKED: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "jwks_keys_revoked_total",
        "Total number of keys revoked",
        &["reason"]
    )
    .expect("Failed to register keys_revoked metric")
});

/// Token validations counter.
pub static TOKEN_VALIDATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "jwks_token_validations_total",
        "Total number of token validations",
        &["status", "error_type"]
    )
    .expect("Failed to register token_validations metric")
});

/// Key generation latency histogram.
pub static KEY_GENERATION_LATENCY: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "jwks_key_generation_seconds",
        "Key generation latency in seconds",
        &["algorithm"],
        vec![0.0005, 0.001, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .expect("Failed to register key_generation_latency metric")
});

/// Store operations counter.
pub static STORE_OPERATIONS: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "jwks_store_operations_total",
        "Total number of key store operations",
        &["backend", "operation", "status"]
    )
    .expect("Failed to register store_operations metric")
});

/// Record a generated key.
pub fn record_key_generated(algorithm: &str, key_use: &str, duration_secs: f64) {
    KEYS_GENERATED.with_label_values(&[algorithm, key_use]).inc();
    KEY_GENERATION_LATENCY
        .with_label_values(&[algorithm])
        .observe(duration_secs);
}

/// Record a rotation of the current key.
pub fn record_rotation(key_use: &str, trigger: &str) {
    KEY_ROTATIONS.with_label_values(&[key_use, trigger]).inc();
}

/// Record a revocation.
pub fn record_key_revoked(reason: &str) {
    KEYS_REVOKED.with_label_values(&[reason]).inc();
}

/// Record a token validation outcome.
pub fn record_token_validation(status: &str, error_type: &str) {
    TOKEN_VALIDATIONS
        .with_label_values(&[status, error_type])
        .inc();
}

/// Record a store operation outcome.
pub fn record_store_operation(backend: &str, operation: &str, status: &str) {
    STORE_OPERATIONS
        .with_label_values(&[backend, operation, status])
        .inc();
}
