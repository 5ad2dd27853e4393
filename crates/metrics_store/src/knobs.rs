//! Tunable defaults for the metrics store.
//!
//! Each knob can be overridden with an environment variable of the same name.
//! Explicit `MetricsStorageConfigOverrides` take precedence over knobs.
#![deny(missing_docs)]

use std::{
    sync::LazyLock,
    time::Duration,
};

use cmd_util::env::{
    env_config,
    env_config_millis,
};

/// Number of pending points that forces a synchronous flush inside `write`.
/// Lower values bound buffer memory at the cost of more frequent aggregation.
pub static METRICS_MAX_BATCH_SIZE: LazyLock<usize> =
    LazyLock::new(|| env_config("METRICS_MAX_BATCH_SIZE", 1000));

/// Period of the background flush + prune task. Zero or negative disables the
/// task, leaving flushes to the batch threshold and to queries.
pub static METRICS_FLUSH_INTERVAL: LazyLock<Duration> =
    LazyLock::new(|| env_config_millis("METRICS_FLUSH_INTERVAL_MS", 10_000));

/// Run `rollup` for every tier with a downstream tier after each flush.
pub static METRICS_AUTO_ROLLUP: LazyLock<bool> =
    LazyLock::new(|| env_config("METRICS_AUTO_ROLLUP", false));

/// Maximum raw values kept per (project, metric, bucket) for percentile
/// estimation.
pub static METRICS_SAMPLE_CAP: LazyLock<usize> =
    LazyLock::new(|| env_config("METRICS_SAMPLE_CAP", 1000));

/// Upper bound on the number of slots in a single query's time series.
pub static METRICS_MAX_QUERY_SERIES_POINTS: LazyLock<usize> =
    LazyLock::new(|| env_config("METRICS_MAX_QUERY_SERIES_POINTS", 10_000));
