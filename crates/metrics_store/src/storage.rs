use async_trait::async_trait;

use crate::{
    config::MetricsStorageConfig,
    interval::AggregationInterval,
    query::MetricQuery,
    retention::RollupOptions,
    types::{
        MetricBucket,
        MetricPoint,
        MetricResult,
        PartitionInfo,
        TimestampMs,
    },
    MetricsError,
};

/// Contract shared by every metrics backend.
///
/// Writes are buffered and become visible to reads once flushed. `query` and
/// `get_bucket` flush first, so a caller always observes its own writes.
/// Implementations must be safe to call from many tasks at once.
#[async_trait]
pub trait MetricsStorage: Send + Sync + 'static {
    /// Buffer a batch of points. Fails without buffering anything if any point
    /// has a non-finite value, or if the storage is closed.
    async fn write(&self, points: Vec<MetricPoint>) -> Result<(), MetricsError>;

    async fn query(&self, query: MetricQuery) -> Result<Vec<MetricResult>, MetricsError>;

    /// First bucket in key order for `(project_id, name)` at the bucket
    /// containing `ts`, across services, environments and label sets.
    async fn get_bucket(
        &self,
        project_id: &str,
        name: &str,
        ts: TimestampMs,
    ) -> Result<Option<MetricBucket>, MetricsError>;

    /// Materialize `options.destination` from `options.source`. Returns the
    /// number of destination buckets written.
    async fn rollup(&self, options: RollupOptions) -> Result<u64, MetricsError> {
        options.validate()?;
        Ok(0)
    }

    /// Delete data outside each tier's retention. Returns the number of
    /// buckets deleted.
    async fn prune(&self) -> Result<u64, MetricsError>;

    /// Physical partitions, optionally restricted to one tier. Backends
    /// without physical partitioning return an empty list.
    async fn list_partitions(
        &self,
        _tier: Option<AggregationInterval>,
    ) -> Result<Vec<PartitionInfo>, MetricsError> {
        Ok(vec![])
    }

    fn config(&self) -> &MetricsStorageConfig;

    /// Aggregate every pending point. A no-op when nothing is pending.
    async fn flush(&self) -> Result<(), MetricsError>;

    /// Stop background work, flush what is pending and release state.
    /// Closing twice is a no-op.
    async fn close(&self) -> Result<(), MetricsError>;
}
