//! Retention cutoffs and tier rollup.
//!
//! The in-memory engine only stores the finest tier, so pruning uses the
//! shortest finite retention across tiers and rollup has nothing to do. A
//! persistent backend that keeps raw and coarse tiers separately can use
//! [`coarsen_buckets`] to compute destination-tier rows. The output is a pure
//! function of its input keyed by destination bucket identity, so writing it
//! with upsert semantics makes repeated rollups over the same range
//! idempotent.
use std::collections::BTreeMap;

use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    aggregator::BucketKey,
    config::MetricsStorageConfig,
    interval::AggregationInterval,
    types::{
        MetricBucket,
        TimeRange,
        TimestampMs,
    },
    MetricsError,
};

/// Buckets starting strictly before the returned time are expired. `None`
/// when every tier keeps data forever.
pub fn prune_cutoff(config: &MetricsStorageConfig, now: TimestampMs) -> Option<TimestampMs> {
    let retention = config.min_retention()?;
    let retention_ms = i64::try_from(retention.as_millis()).unwrap_or(i64::MAX);
    Some(now.saturating_sub(retention_ms))
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RollupOptions {
    pub source: AggregationInterval,
    pub destination: AggregationInterval,
    /// Restrict to source buckets starting within this range.
    pub range: Option<TimeRange>,
}

impl RollupOptions {
    pub fn new(source: AggregationInterval, destination: AggregationInterval) -> Self {
        Self {
            source,
            destination,
            range: None,
        }
    }

    pub fn with_range(mut self, range: TimeRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn validate(&self) -> Result<(), MetricsError> {
        if self.destination <= self.source {
            return Err(MetricsError::InvalidRollup {
                from: self.source,
                to: self.destination,
            });
        }
        if let Some(range) = self.range {
            if range.end < range.start {
                return Err(MetricsError::InvalidTimeRange {
                    start: range.start,
                    end: range.end,
                });
            }
        }
        Ok(())
    }
}

/// Re-aggregate source-tier buckets into destination-tier buckets.
pub fn coarsen_buckets<'a>(
    buckets: impl IntoIterator<Item = &'a MetricBucket>,
    options: &RollupOptions,
) -> Result<BTreeMap<BucketKey, MetricBucket>, MetricsError> {
    options.validate()?;
    let mut rolled_up: BTreeMap<BucketKey, MetricBucket> = BTreeMap::new();
    for bucket in buckets {
        if let Some(range) = options.range {
            if !range.contains(bucket.bucket_time) {
                continue;
            }
        }
        let bucket_time = options.destination.truncate(bucket.bucket_time);
        let key = BucketKey {
            bucket_time,
            ..BucketKey::for_bucket(bucket)
        };
        match rolled_up.get_mut(&key) {
            Some(existing) => existing.merge(bucket),
            None => {
                let coarse = MetricBucket {
                    bucket_time,
                    ..bucket.clone()
                };
                rolled_up.insert(key, coarse);
            },
        }
    }
    Ok(rolled_up)
}
