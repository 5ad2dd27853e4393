use std::collections::BTreeMap;

use serde::{
    Deserialize,
    Serialize,
};

use crate::interval::AggregationInterval;

/// Milliseconds since the Unix epoch.
pub type TimestampMs = i64;

/// Key-value metadata attached to a point. Iteration order has no meaning for
/// bucket identity: see [`crate::aggregator::label_set_hash`].
pub type Labels = BTreeMap<String, String>;

/// One raw observation, consumed once by the aggregator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricPoint {
    pub project_id: String,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub environment: String,
    pub name: String,
    #[serde(default)]
    pub labels: Labels,
    pub value: f64,
    pub timestamp: TimestampMs,
}

impl MetricPoint {
    pub fn new(
        project_id: impl Into<String>,
        name: impl Into<String>,
        value: f64,
        timestamp: TimestampMs,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            service: String::new(),
            environment: String::new(),
            name: name.into(),
            labels: Labels::new(),
            value,
            timestamp,
        }
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = service.into();
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = environment.into();
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Aggregate over one time window for one (project, service, environment,
/// name, label set) key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricBucket {
    pub project_id: String,
    pub service: String,
    pub environment: String,
    pub name: String,
    pub bucket_time: TimestampMs,
    pub count: u64,
    pub sum: f64,
    pub min: f64,
    pub max: f64,
    pub labels: Labels,
    pub label_hash: String,
}

impl MetricBucket {
    pub fn avg(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        self.sum / self.count as f64
    }

    pub(crate) fn record(&mut self, value: f64) {
        self.count += 1;
        self.sum += value;
        self.min = self.min.min(value);
        self.max = self.max.max(value);
    }

    /// Fold another bucket's statistics into this one. Used when coarsening
    /// buckets into a wider interval.
    pub(crate) fn merge(&mut self, other: &MetricBucket) {
        self.count += other.count;
        self.sum += other.sum;
        self.min = self.min.min(other.min);
        self.max = self.max.max(other.max);
    }
}

/// Closed time interval `[start, end]`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: TimestampMs,
    pub end: TimestampMs,
}

impl TimeRange {
    pub fn new(start: TimestampMs, end: TimestampMs) -> Self {
        Self { start, end }
    }

    /// Inclusive on both ends, so a bucket exactly at `end` is part of this
    /// range and also of a range starting at `end`.
    pub fn contains(&self, ts: TimestampMs) -> bool {
        self.start <= ts && ts <= self.end
    }
}

/// One slot of a query's output series.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesPoint {
    pub timestamp: TimestampMs,
    pub count: u64,
    pub sum: f64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
}

impl SeriesPoint {
    pub(crate) fn empty(timestamp: TimestampMs) -> Self {
        Self {
            timestamp,
            ..Default::default()
        }
    }

    pub(crate) fn add(&mut self, bucket: &MetricBucket) {
        if self.count == 0 {
            self.min = bucket.min;
            self.max = bucket.max;
        } else {
            self.min = self.min.min(bucket.min);
            self.max = self.max.max(bucket.max);
        }
        self.count += bucket.count;
        self.sum += bucket.sum;
        self.avg = self.sum / self.count as f64;
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricStats {
    pub count: u64,
    pub sum: f64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

impl MetricStats {
    /// Zeroed stats with min/max at their +inf/-inf sentinels.
    pub(crate) fn new() -> Self {
        Self {
            count: 0,
            sum: 0.0,
            avg: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
            p50: 0.0,
            p95: 0.0,
            p99: 0.0,
        }
    }

    pub(crate) fn add(&mut self, bucket: &MetricBucket) {
        self.count += bucket.count;
        self.sum += bucket.sum;
        self.min = self.min.min(bucket.min);
        self.max = self.max.max(bucket.max);
    }
}

/// One metric name, or one group within it, answering a query.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricResult {
    pub name: String,
    /// Group-by label values for this group. Empty for ungrouped queries.
    pub group: Labels,
    pub series: Vec<SeriesPoint>,
    pub stats: MetricStats,
}

/// Operational description of a physical partition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartitionInfo {
    pub tier: AggregationInterval,
    pub range: TimeRange,
    pub approximate_rows: u64,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub pending_points: usize,
    pub buckets: usize,
    pub sample_keys: usize,
}
