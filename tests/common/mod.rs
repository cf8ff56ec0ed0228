//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;
pub mod mock_helpers;

use std::time::Duration;

use boardlink::config::EngineConfig;

/// Create a test timeout duration
pub fn test_timeout() -> Duration {
    Duration::from_millis(100)
}

/// Engine config with short round trip bounds so timeouts resolve quickly
pub fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.timeouts.allocation_ms = test_timeout().as_millis() as u64;
    config.timeouts.register_read_ms = test_timeout().as_millis() as u64;
    config
}

/// Route engine logs to the test output; honors `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}
