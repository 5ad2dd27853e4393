use std::sync::LazyLock;

use prometheus::{
    Encoder,
    Registry,
    TextEncoder,
};

const ALLOWED_SUFFIXES: &[&str] = &[
    // Always use `_seconds` for time.
    "_seconds",
    "_bytes",
    "_points",
    "_buckets",
    "_queries",
    "_errors",
    "_operations",
    // Generic unit-less count.
    "_total",
    "_info",
];

pub const REGISTRY_NAMESPACE: &str = "metrics_store";

pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(|| {
    Registry::new_custom(Some(REGISTRY_NAMESPACE.to_owned()), None)
        .expect("Failed to initialize Prometheus metrics registry")
});

/// Validates a declared metric name. Panics on names without a unit suffix so
/// that mistakes surface the first time the metric is touched in tests.
pub fn metric_name(name: &str) -> String {
    assert!(
        name.bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'_'),
        "Metric {name} must be lower_snake_case"
    );
    assert!(
        ALLOWED_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)),
        "Metric {name} doesn't end with a unit suffix in {ALLOWED_SUFFIXES:?}"
    );
    name.to_owned()
}

/// Render every registered metric in the Prometheus text exposition format.
pub fn encode_registry() -> anyhow::Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&METRICS_REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
