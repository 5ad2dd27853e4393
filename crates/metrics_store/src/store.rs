use crate::{
    aggregator::BucketAggregator,
    interval::AggregationInterval,
    sampler::{
        PercentileSampler,
        SampleKey,
    },
    types::{
        MetricPoint,
        TimestampMs,
    },
};

/// Buckets plus the percentile samples that share their lifetime. Cloning is
/// cheap and yields an isolated snapshot.
#[derive(Clone)]
pub struct BucketStore {
    buckets: BucketAggregator,
    samples: PercentileSampler,
}

impl BucketStore {
    pub fn new(interval: AggregationInterval, sample_cap: usize, sample_seed: Option<u64>) -> Self {
        Self {
            buckets: BucketAggregator::new(interval),
            samples: PercentileSampler::new(sample_cap, sample_seed),
        }
    }

    /// Aggregate a drained batch. Returns the number of buckets created.
    pub fn ingest(&mut self, points: &[MetricPoint]) -> usize {
        let mut created = 0;
        for point in points {
            if self.buckets.aggregate(point) {
                created += 1;
            }
            let key = SampleKey {
                project_id: point.project_id.clone(),
                name: point.name.clone(),
                bucket_time: self.buckets.bucket_time(point.timestamp),
            };
            self.samples.observe(key, point.value);
        }
        created
    }

    pub fn buckets(&self) -> &BucketAggregator {
        &self.buckets
    }

    pub fn samples(&self) -> &PercentileSampler {
        &self.samples
    }

    /// Delete buckets and sample reservoirs strictly older than `cutoff`.
    /// Returns the number of buckets deleted.
    pub fn prune_before(&mut self, cutoff: TimestampMs) -> u64 {
        let removed = self.buckets.prune_before(cutoff);
        let removed_samples = self.samples.prune_before(cutoff);
        tracing::trace!(
            "Pruned {} buckets and {removed_samples} sample keys before {cutoff}",
            removed.len()
        );
        removed.len() as u64
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
        self.samples.clear();
    }
}
