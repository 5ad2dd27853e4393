//! Bounded-memory percentile estimation.
//!
//! Samples are keyed by `(project, metric, bucket_time)`, deliberately coarser
//! than the bucket key, so the number of reservoirs grows with metrics and
//! time rather than with label cardinality. Each reservoir holds at most
//! `cap` values; past the cap we apply reservoir sampling so every observed
//! value is equally likely to be retained.
use imbl::OrdMap;
use rand::{
    Rng,
    SeedableRng,
};
use rand_chacha::ChaCha8Rng;

use crate::types::TimestampMs;

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SampleKey {
    pub project_id: String,
    pub name: String,
    pub bucket_time: TimestampMs,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Reservoir {
    values: Vec<f64>,
    /// Values observed so far, including ones not retained.
    seen: u64,
}

impl Reservoir {
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn seen(&self) -> u64 {
        self.seen
    }

    fn observe(&mut self, value: f64, cap: usize, rng: &mut impl Rng) {
        self.seen += 1;
        if self.values.len() < cap {
            self.values.push(value);
            return;
        }
        // Draw from `[0, seen]` and keep the value only if it lands on an
        // existing slot.
        let index = rng.random_range(0..=self.seen);
        if let Some(slot) = usize::try_from(index)
            .ok()
            .and_then(|i| self.values.get_mut(i))
        {
            *slot = value;
        }
    }
}

#[derive(Clone)]
pub struct PercentileSampler {
    cap: usize,
    rng: ChaCha8Rng,
    reservoirs: OrdMap<SampleKey, Reservoir>,
}

impl PercentileSampler {
    pub fn new(cap: usize, seed: Option<u64>) -> Self {
        let seed = seed.unwrap_or_else(|| rand::rng().random());
        Self {
            cap,
            rng: ChaCha8Rng::seed_from_u64(seed),
            reservoirs: OrdMap::new(),
        }
    }

    pub fn observe(&mut self, key: SampleKey, value: f64) {
        if let Some(reservoir) = self.reservoirs.get_mut(&key) {
            reservoir.observe(value, self.cap, &mut self.rng);
            return;
        }
        let mut reservoir = Reservoir::default();
        reservoir.observe(value, self.cap, &mut self.rng);
        self.reservoirs.insert(key, reservoir);
    }

    pub fn reservoir(&self, key: &SampleKey) -> Option<&Reservoir> {
        self.reservoirs.get(key)
    }

    /// All retained values for a metric across every bucket time.
    pub fn samples_for(&self, project_id: &str, name: &str) -> Vec<f64> {
        let start = SampleKey {
            project_id: project_id.to_owned(),
            name: name.to_owned(),
            bucket_time: TimestampMs::MIN,
        };
        let end = SampleKey {
            bucket_time: TimestampMs::MAX,
            ..start.clone()
        };
        self.reservoirs
            .range(start..=end)
            .flat_map(|(_, reservoir)| reservoir.values.iter().copied())
            .collect()
    }

    /// Drop reservoirs whose bucket time is strictly before `cutoff`.
    pub fn prune_before(&mut self, cutoff: TimestampMs) -> usize {
        let expired: Vec<SampleKey> = self
            .reservoirs
            .keys()
            .filter(|key| key.bucket_time < cutoff)
            .cloned()
            .collect();
        for key in &expired {
            self.reservoirs.remove(key);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.reservoirs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reservoirs.is_empty()
    }

    pub fn clear(&mut self) {
        self.reservoirs = OrdMap::new();
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Percentiles {
    pub p50: f64,
    pub p95: f64,
    pub p99: f64,
}

impl Percentiles {
    /// Nearest-rank percentiles. An empty sample yields zeros.
    pub fn from_samples(mut samples: Vec<f64>) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        samples.sort_by(f64::total_cmp);
        Self {
            p50: percentile(&samples, 50.0),
            p95: percentile(&samples, 95.0),
            p99: percentile(&samples, 99.0),
        }
    }
}

/// `sorted[ceil(p / 100 * n) - 1]`, clamped to a valid index. `sorted` must be
/// ascending. An empty slice yields 0.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    let rank = (p / 100.0 * n as f64).ceil() as usize;
    sorted[rank.saturating_sub(1).min(n - 1)]
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{
        percentile,
        PercentileSampler,
        Percentiles,
        SampleKey,
    };

    fn key(bucket_time: i64) -> SampleKey {
        SampleKey {
            project_id: "p1".to_string(),
            name: "latency".to_string(),
            bucket_time,
        }
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let sorted: Vec<f64> = (1..=100).map(|v| v as f64).collect();
        assert_eq!(percentile(&sorted, 50.0), 50.0);
        assert_eq!(percentile(&sorted, 95.0), 95.0);
        assert_eq!(percentile(&sorted, 99.0), 99.0);
        assert_eq!(percentile(&sorted, 0.0), 1.0);
        assert_eq!(percentile(&sorted, 100.0), 100.0);

        let single = [42.0];
        assert_eq!(percentile(&single, 50.0), 42.0);
        assert_eq!(percentile(&single, 99.0), 42.0);

        assert_eq!(percentile(&[], 50.0), 0.0);
        assert_eq!(percentile(&[], 99.0), 0.0);
    }

    #[test]
    fn test_empty_samples_are_zero() {
        assert_eq!(Percentiles::from_samples(vec![]), Percentiles::default());
    }

    #[test]
    fn test_under_cap_keeps_everything() {
        let mut sampler = PercentileSampler::new(10, Some(0));
        for v in 0..10 {
            sampler.observe(key(0), v as f64);
        }
        let reservoir = sampler.reservoir(&key(0)).expect("reservoir exists");
        assert_eq!(reservoir.values().len(), 10);
        assert_eq!(reservoir.seen(), 10);
    }

    #[test]
    fn test_cap_bounds_memory() {
        let mut sampler = PercentileSampler::new(100, Some(1));
        for v in 0..10_000 {
            sampler.observe(key(0), v as f64);
        }
        let reservoir = sampler.reservoir(&key(0)).expect("reservoir exists");
        assert_eq!(reservoir.values().len(), 100);
        assert_eq!(reservoir.seen(), 10_000);
        // Later values must have had a chance to replace early ones.
        assert!(reservoir.values().iter().any(|v| *v >= 100.0));
    }

    #[test]
    fn test_seeded_sampling_is_reproducible() {
        let run = |seed| {
            let mut sampler = PercentileSampler::new(16, Some(seed));
            for v in 0..1000 {
                sampler.observe(key(0), v as f64);
            }
            sampler.samples_for("p1", "latency")
        };
        assert_eq!(run(7), run(7));
    }

    #[test]
    fn test_samples_for_spans_bucket_times() {
        let mut sampler = PercentileSampler::new(10, Some(0));
        sampler.observe(key(0), 1.0);
        sampler.observe(key(60_000), 2.0);
        sampler.observe(
            SampleKey {
                name: "other".to_string(),
                ..key(0)
            },
            3.0,
        );
        let mut samples = sampler.samples_for("p1", "latency");
        samples.sort_by(f64::total_cmp);
        assert_eq!(samples, vec![1.0, 2.0]);
        assert!(sampler.samples_for("p2", "latency").is_empty());
    }

    #[test]
    fn test_prune_before() {
        let mut sampler = PercentileSampler::new(10, Some(0));
        sampler.observe(key(0), 1.0);
        sampler.observe(key(60_000), 2.0);
        assert_eq!(sampler.prune_before(60_000), 1);
        assert_eq!(sampler.len(), 1);
        assert_eq!(sampler.samples_for("p1", "latency"), vec![2.0]);
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 64, failure_persistence: None, .. ProptestConfig::default() })]

        #[test]
        fn proptest_percentiles_monotonic(
            values in prop::collection::vec(-1e6f64..1e6, 1..500),
        ) {
            let p = Percentiles::from_samples(values);
            prop_assert!(p.p50 <= p.p95);
            prop_assert!(p.p95 <= p.p99);
        }
    }
}
