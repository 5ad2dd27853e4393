//! In-memory metrics aggregation and query engine.
//!
//! Raw [`MetricPoint`]s are buffered by the engine and periodically folded
//! into fixed-width time buckets, one per (project, service, environment,
//! metric name, label set, bucket start). Each bucket keeps count, sum, min and
//! max, so aggregation is independent of arrival order. Alongside the buckets
//! a bounded reservoir of raw values per (project, metric, bucket start)
//! backs p50/p95/p99 estimates.
//!
//! # Implementation notes
//! Buckets live in a persistent ordered map keyed by [`BucketKey`], whose
//! field order puts project and metric name first so lookups for one metric
//! at one time are a prefix range scan. A secondary index on
//! `(bucket_time, key)` makes retention a scan from the front. Queries
//! clone the store (structurally shared, so the clone is cheap) and compute
//! outside of the lock.
//!
//! Retention is driven by the configured tiers. Only the finest tier is
//! materialized in memory; queries re-bucket it to any coarser
//! [`AggregationInterval`].

mod aggregator;
mod clock;
pub mod config;
mod error;
mod interval;
pub mod knobs;
mod memory;
mod metrics;
mod query;
mod retention;
mod sampler;
mod storage;
mod store;
mod types;

#[cfg(any(test, feature = "testing"))]
pub use crate::clock::ManualClock;
pub use crate::{
    aggregator::{
        label_set_hash,
        BucketAggregator,
        BucketKey,
        EMPTY_LABEL_HASH,
    },
    clock::{
        Clock,
        SystemClock,
    },
    config::{
        MetricsStorageConfig,
        MetricsStorageConfigOverrides,
        Tier,
    },
    error::MetricsError,
    interval::AggregationInterval,
    memory::InMemoryMetricsStorage,
    query::{
        execute_query,
        MetricQuery,
    },
    retention::{
        coarsen_buckets,
        prune_cutoff,
        RollupOptions,
    },
    sampler::{
        percentile,
        PercentileSampler,
        Percentiles,
        Reservoir,
        SampleKey,
    },
    storage::MetricsStorage,
    store::BucketStore,
    types::{
        Labels,
        MetricBucket,
        MetricPoint,
        MetricResult,
        MetricStats,
        PartitionInfo,
        SeriesPoint,
        StoreStats,
        TimeRange,
        TimestampMs,
    },
};
