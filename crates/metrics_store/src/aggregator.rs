//! Folds raw points into fixed-width buckets.
//!
//! Buckets live in a persistent ordered map so readers can take an O(1)
//! snapshot and scan it without holding the writer lock. Alongside the
//! primary map we keep an index ordered by bucket start, which makes pruning
//! proportional to the number of expired buckets.
use imbl::{
    OrdMap,
    OrdSet,
};

use crate::{
    interval::AggregationInterval,
    types::{
        MetricBucket,
        MetricPoint,
        TimestampMs,
    },
};

/// Label hash for points without labels.
pub const EMPTY_LABEL_HASH: &str = "_empty_";

/// Identity of a bucket. Field order puts `(project_id, name, bucket_time)`
/// first so lookups by that prefix are a range scan.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BucketKey {
    pub project_id: String,
    pub name: String,
    pub bucket_time: TimestampMs,
    pub service: String,
    pub environment: String,
    pub label_hash: String,
}

impl BucketKey {
    pub fn for_point(point: &MetricPoint, bucket_time: TimestampMs) -> Self {
        Self {
            project_id: point.project_id.clone(),
            name: point.name.clone(),
            bucket_time,
            service: point.service.clone(),
            environment: point.environment.clone(),
            label_hash: label_set_hash(&point.labels),
        }
    }

    pub fn for_bucket(bucket: &MetricBucket) -> Self {
        Self {
            project_id: bucket.project_id.clone(),
            name: bucket.name.clone(),
            bucket_time: bucket.bucket_time,
            service: bucket.service.clone(),
            environment: bucket.environment.clone(),
            label_hash: bucket.label_hash.clone(),
        }
    }

    /// Smallest key with the given prefix.
    fn prefix_start(project_id: &str, name: &str, bucket_time: TimestampMs) -> Self {
        Self {
            project_id: project_id.to_owned(),
            name: name.to_owned(),
            bucket_time,
            service: String::new(),
            environment: String::new(),
            label_hash: String::new(),
        }
    }
}

/// Deterministic identity for a label set: `key=value` pairs sorted by key
/// and joined with `,`.
pub fn label_set_hash<'a>(labels: impl IntoIterator<Item = (&'a String, &'a String)>) -> String {
    let mut pairs: Vec<_> = labels.into_iter().collect();
    if pairs.is_empty() {
        return EMPTY_LABEL_HASH.to_string();
    }
    pairs.sort();
    pairs
        .into_iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join(",")
}

#[derive(Clone)]
pub struct BucketAggregator {
    interval: AggregationInterval,
    buckets: OrdMap<BucketKey, MetricBucket>,
    bucket_by_start: OrdSet<(TimestampMs, BucketKey)>,
}

impl BucketAggregator {
    pub fn new(interval: AggregationInterval) -> Self {
        Self {
            interval,
            buckets: OrdMap::new(),
            bucket_by_start: OrdSet::new(),
        }
    }

    pub fn interval(&self) -> AggregationInterval {
        self.interval
    }

    pub fn bucket_time(&self, ts: TimestampMs) -> TimestampMs {
        self.interval.truncate(ts)
    }

    /// Fold one point into its bucket, creating the bucket on first sight.
    /// Returns true if a new bucket was created.
    ///
    /// Count, min and max are commutative, so the resulting bucket does not
    /// depend on the order in which points for the same key arrive.
    pub fn aggregate(&mut self, point: &MetricPoint) -> bool {
        let bucket_time = self.bucket_time(point.timestamp);
        let key = BucketKey::for_point(point, bucket_time);
        if let Some(bucket) = self.buckets.get_mut(&key) {
            bucket.record(point.value);
            return false;
        }
        let bucket = MetricBucket {
            project_id: point.project_id.clone(),
            service: point.service.clone(),
            environment: point.environment.clone(),
            name: point.name.clone(),
            bucket_time,
            count: 1,
            sum: point.value,
            min: point.value,
            max: point.value,
            labels: point.labels.clone(),
            label_hash: key.label_hash.clone(),
        };
        self.bucket_by_start.insert((bucket_time, key.clone()));
        self.buckets.insert(key, bucket);
        true
    }

    pub fn get(&self, key: &BucketKey) -> Option<&MetricBucket> {
        self.buckets.get(key)
    }

    /// First bucket (in key order) for a project and metric at a bucket time,
    /// across all services, environments and label sets.
    pub fn first_matching(
        &self,
        project_id: &str,
        name: &str,
        bucket_time: TimestampMs,
    ) -> Option<&MetricBucket> {
        let start = BucketKey::prefix_start(project_id, name, bucket_time);
        self.buckets
            .range(start..)
            .next()
            .filter(|(key, _)| {
                key.project_id == project_id && key.name == name && key.bucket_time == bucket_time
            })
            .map(|(_, bucket)| bucket)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricBucket> {
        self.buckets.values()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Remove every bucket whose start is strictly before `cutoff`, returning
    /// the removed keys.
    pub fn prune_before(&mut self, cutoff: TimestampMs) -> Vec<BucketKey> {
        let expired: Vec<(TimestampMs, BucketKey)> = self
            .bucket_by_start
            .iter()
            .take_while(|(bucket_time, _)| *bucket_time < cutoff)
            .cloned()
            .collect();
        let mut removed = Vec::with_capacity(expired.len());
        for entry in expired {
            self.bucket_by_start.remove(&entry);
            let (_, key) = entry;
            self.buckets.remove(&key);
            removed.push(key);
        }
        removed
    }

    pub fn clear(&mut self) {
        self.buckets = OrdMap::new();
        self.bucket_by_start = OrdSet::new();
    }

    #[cfg(test)]
    pub fn consistency_check(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.buckets.len() == self.bucket_by_start.len());
        for (bucket_time, key) in self.bucket_by_start.iter() {
            let bucket = self
                .buckets
                .get(key)
                .ok_or_else(|| anyhow::anyhow!("Index points to missing bucket {key:?}"))?;
            anyhow::ensure!(bucket.bucket_time == *bucket_time);
            anyhow::ensure!(key.bucket_time == *bucket_time);
            anyhow::ensure!(BucketKey::for_bucket(bucket) == *key);
        }
        for bucket in self.buckets.values() {
            anyhow::ensure!(bucket.bucket_time == self.interval.truncate(bucket.bucket_time));
            anyhow::ensure!(bucket.count > 0);
        }
        Ok(())
    }
}
