//! Range queries over a bucket snapshot.
//!
//! A query scans every bucket, keeps the ones matching its filters and time
//! range, groups them by metric name (and optionally by label values), and
//! places each bucket into a gap-filled output series at slot
//! `floor((bucket_time - range.start) / interval)`.
use std::collections::{
    BTreeMap,
    HashMap,
};

use regex::Regex;
use serde::Deserialize;

use crate::{
    interval::AggregationInterval,
    sampler::Percentiles,
    store::BucketStore,
    types::{
        Labels,
        MetricBucket,
        MetricResult,
        MetricStats,
        SeriesPoint,
        TimeRange,
    },
    MetricsError,
};

#[derive(Clone, Debug, PartialEq)]
pub struct MetricQuery {
    pub project_id: String,
    pub service: Option<String>,
    pub environment: Option<String>,
    /// Exact name, or a glob where `*` matches any run of characters.
    pub name: Option<String>,
    /// Every entry must be present on the bucket with an equal value.
    pub labels: Option<Labels>,
    pub group_by: Option<Vec<String>>,
    pub range: TimeRange,
    /// Defaults to the storage tier's interval.
    pub interval: Option<AggregationInterval>,
    pub limit: Option<usize>,
}

impl MetricQuery {
    pub fn new(project_id: impl Into<String>, range: TimeRange) -> Self {
        Self {
            project_id: project_id.into(),
            service: None,
            environment: None,
            name: None,
            labels: None,
            group_by: None,
            range,
            interval: None,
            limit: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels
            .get_or_insert_with(Labels::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_group_by(mut self, keys: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.group_by = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_interval(mut self, interval: AggregationInterval) -> Self {
        self.interval = Some(interval);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl TryFrom<serde_json::Value> for MetricQuery {
    type Error = MetricsError;

    fn try_from(value: serde_json::Value) -> Result<Self, Self::Error> {
        #[derive(Debug, Deserialize)]
        #[serde(rename_all = "camelCase", deny_unknown_fields)]
        struct MetricQueryInner {
            project_id: String,
            service: Option<String>,
            environment: Option<String>,
            name: Option<String>,
            labels: Option<Labels>,
            group_by: Option<Vec<String>>,
            range: TimeRange,
            interval: Option<String>,
            limit: Option<usize>,
        }
        let parsed: MetricQueryInner = serde_json::from_value(value)
            .map_err(|e| MetricsError::InvalidQuery(e.to_string()))?;
        let interval = parsed
            .interval
            .as_deref()
            .map(AggregationInterval::parse)
            .transpose()?;
        Ok(Self {
            project_id: parsed.project_id,
            service: parsed.service,
            environment: parsed.environment,
            name: parsed.name,
            labels: parsed.labels,
            group_by: parsed.group_by,
            range: parsed.range,
            interval,
            limit: parsed.limit,
        })
    }
}

#[derive(Debug)]
enum NamePattern {
    Any,
    Exact(String),
    Glob(Regex),
}

impl NamePattern {
    fn compile(pattern: Option<&str>) -> Result<Self, MetricsError> {
        let Some(pattern) = pattern else {
            return Ok(Self::Any);
        };
        if !pattern.contains('*') {
            return Ok(Self::Exact(pattern.to_owned()));
        }
        let body = pattern
            .split('*')
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*");
        let regex = Regex::new(&format!("^{body}$"))
            .map_err(|e| MetricsError::InvalidQuery(format!("Invalid name pattern: {e}")))?;
        Ok(Self::Glob(regex))
    }

    fn matches(&self, name: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Exact(expected) => expected == name,
            Self::Glob(regex) => regex.is_match(name),
        }
    }
}

fn matches_filters(query: &MetricQuery, pattern: &NamePattern, bucket: &MetricBucket) -> bool {
    if bucket.project_id != query.project_id {
        return false;
    }
    if let Some(service) = &query.service {
        if &bucket.service != service {
            return false;
        }
    }
    if let Some(environment) = &query.environment {
        if &bucket.environment != environment {
            return false;
        }
    }
    if !pattern.matches(&bucket.name) {
        return false;
    }
    if let Some(labels) = &query.labels {
        let all_match = labels
            .iter()
            .all(|(key, value)| bucket.labels.get(key) == Some(value));
        if !all_match {
            return false;
        }
    }
    query.range.contains(bucket.bucket_time)
}

/// Group identity: the metric name alone, or the name followed by
/// `{key=value,...}` in group-by order. Missing labels render as empty values.
fn group_key(bucket: &MetricBucket, group_by: &[String]) -> (String, Labels) {
    if group_by.is_empty() {
        return (bucket.name.clone(), Labels::new());
    }
    let mut group = Labels::new();
    let mut parts = Vec::with_capacity(group_by.len());
    for key in group_by {
        let value = bucket.labels.get(key).cloned().unwrap_or_default();
        parts.push(format!("{key}={value}"));
        group.insert(key.clone(), value);
    }
    (format!("{}{{{}}}", bucket.name, parts.join(",")), group)
}

/// Number of output slots needed to cover `range` at `width_ms`. A range of
/// zero length still has one slot.
fn num_slots(range: TimeRange, width_ms: i64) -> u64 {
    let span = (range.end as i128 - range.start as i128).max(0);
    let width = width_ms as i128;
    let slots = (span + width - 1) / width;
    slots.clamp(1, u64::MAX as i128) as u64
}

/// Run `query` against a snapshot. The caller is responsible for flushing
/// pending points into `store` first.
pub fn execute_query(
    store: &BucketStore,
    query: &MetricQuery,
    default_interval: AggregationInterval,
    max_series_points: usize,
) -> Result<Vec<MetricResult>, MetricsError> {
    if query.project_id.is_empty() {
        return Err(MetricsError::InvalidQuery(
            "projectId is required".to_string(),
        ));
    }
    let range = query.range;
    if range.end < range.start {
        return Err(MetricsError::InvalidTimeRange {
            start: range.start,
            end: range.end,
        });
    }
    let interval = query.interval.unwrap_or(default_interval);
    let width_ms = interval.width_ms();
    let slots = num_slots(range, width_ms);
    if slots > max_series_points as u64 {
        return Err(MetricsError::InvalidQuery(format!(
            "Query would produce {slots} points at {interval}, more than the limit of \
             {max_series_points}"
        )));
    }
    let pattern = NamePattern::compile(query.name.as_deref())?;
    let group_by = query.group_by.as_deref().unwrap_or_default();

    let mut groups: BTreeMap<String, MetricResult> = BTreeMap::new();
    for bucket in store.buckets().iter() {
        if !matches_filters(query, &pattern, bucket) {
            continue;
        }
        let (key, group) = group_key(bucket, group_by);
        let result = groups.entry(key).or_insert_with(|| MetricResult {
            name: bucket.name.clone(),
            group,
            series: (0..slots as i64)
                .map(|i| SeriesPoint::empty(range.start.saturating_add(i * width_ms)))
                .collect(),
            stats: MetricStats::new(),
        });

        let offset = bucket.bucket_time as i128 - range.start as i128;
        let slot = usize::try_from(offset.div_euclid(width_ms as i128))
            .map_err(anyhow::Error::from)?;
        // The inclusive end can place a bucket one slot past the prefilled
        // series.
        while result.series.len() <= slot {
            let timestamp = range
                .start
                .saturating_add(result.series.len() as i64 * width_ms);
            result.series.push(SeriesPoint::empty(timestamp));
        }
        result.series[slot].add(bucket);
        result.stats.add(bucket);
    }

    let mut percentiles_by_name: HashMap<String, Percentiles> = HashMap::new();
    let mut results = Vec::with_capacity(groups.len());
    for (_, mut result) in groups {
        let percentiles = *percentiles_by_name
            .entry(result.name.clone())
            .or_insert_with_key(|name| {
                Percentiles::from_samples(store.samples().samples_for(&query.project_id, name))
            });
        let stats = &mut result.stats;
        if stats.count > 0 {
            stats.avg = stats.sum / stats.count as f64;
        }
        stats.p50 = percentiles.p50;
        stats.p95 = percentiles.p95;
        stats.p99 = percentiles.p99;
        if stats.min.is_infinite() {
            stats.min = 0.0;
        }
        if stats.max.is_infinite() {
            stats.max = 0.0;
        }
        results.push(result);
    }

    if let Some(limit) = query.limit {
        results.truncate(limit);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::{
        execute_query,
        num_slots,
        MetricQuery,
        NamePattern,
    };
    use crate::{
        interval::AggregationInterval,
        store::BucketStore,
        types::{
            MetricPoint,
            TimeRange,
        },
        MetricsError,
    };

    const MINUTE: i64 = 60_000;
    const MAX_POINTS: usize = 10_000;

    fn store_with(points: &[MetricPoint]) -> BucketStore {
        let mut store = BucketStore::new(AggregationInterval::OneMinute, 1000, Some(0));
        store.ingest(points);
        store
    }

    fn run(store: &BucketStore, query: &MetricQuery) -> Result<Vec<super::MetricResult>, MetricsError> {
        execute_query(store, query, AggregationInterval::OneMinute, MAX_POINTS)
    }

    #[test]
    fn test_name_pattern() -> anyhow::Result<()> {
        let glob = NamePattern::compile(Some("http.*.latency"))?;
        assert!(glob.matches("http.get.latency"));
        assert!(glob.matches("http..latency"));
        assert!(!glob.matches("httpXget.latency"));
        assert!(!glob.matches("http.get.latency.p99"));

        let exact = NamePattern::compile(Some("http.latency"))?;
        assert!(exact.matches("http.latency"));
        assert!(!exact.matches("httpXlatency"));

        let prefix = NamePattern::compile(Some("db_*"))?;
        assert!(prefix.matches("db_reads"));
        assert!(!prefix.matches("cache_reads"));
        assert!(NamePattern::compile(None)?.matches("anything"));
        Ok(())
    }

    #[test]
    fn test_num_slots() {
        assert_eq!(num_slots(TimeRange::new(0, 15 * MINUTE), 5 * MINUTE), 3);
        assert_eq!(num_slots(TimeRange::new(0, 16 * MINUTE), 5 * MINUTE), 4);
        assert_eq!(num_slots(TimeRange::new(0, 0), MINUTE), 1);
    }

    #[test]
    fn test_five_minute_series_is_gap_filled() -> anyhow::Result<()> {
        let store = store_with(&[
            MetricPoint::new("p1", "latency", 10.0, MINUTE),
            MetricPoint::new("p1", "latency", 30.0, 2 * MINUTE),
            MetricPoint::new("p1", "latency", 20.0, 11 * MINUTE),
        ]);
        let query = MetricQuery::new("p1", TimeRange::new(0, 15 * MINUTE))
            .with_name("latency")
            .with_interval(AggregationInterval::FiveMinutes);
        let results = run(&store, &query)?;
        assert_eq!(results.len(), 1);
        let series = &results[0].series;
        assert_eq!(series.len(), 3);
        assert_eq!(
            series.iter().map(|p| p.timestamp).collect::<Vec<_>>(),
            vec![0, 5 * MINUTE, 10 * MINUTE]
        );
        assert_eq!(series[0].count, 2);
        assert_eq!(series[0].sum, 40.0);
        assert_eq!(series[0].avg, 20.0);
        assert_eq!(series[0].min, 10.0);
        assert_eq!(series[0].max, 30.0);
        assert_eq!(series[1].count, 0);
        assert_eq!(series[1].avg, 0.0);
        assert_eq!(series[2].count, 1);

        let stats = &results[0].stats;
        assert_eq!(stats.count, 3);
        assert_eq!(stats.sum, 60.0);
        assert_eq!(stats.avg, 20.0);
        assert_eq!(stats.min, 10.0);
        assert_eq!(stats.max, 30.0);
        assert_eq!(stats.p50, 20.0);
        assert_eq!(stats.p95, 30.0);
        assert_eq!(stats.p99, 30.0);
        Ok(())
    }

    #[test]
    fn test_inclusive_end_extends_series() -> anyhow::Result<()> {
        let store = store_with(&[MetricPoint::new("p1", "latency", 1.0, 15 * MINUTE)]);
        let query = MetricQuery::new("p1", TimeRange::new(0, 15 * MINUTE))
            .with_interval(AggregationInterval::FiveMinutes);
        let results = run(&store, &query)?;
        assert_eq!(results[0].series.len(), 4);
        assert_eq!(results[0].series[3].timestamp, 15 * MINUTE);
        assert_eq!(results[0].series[3].count, 1);

        // The same bucket is also visible to a query starting at that instant.
        let next = MetricQuery::new("p1", TimeRange::new(15 * MINUTE, 30 * MINUTE));
        assert_eq!(run(&store, &next)?[0].stats.count, 1);
        Ok(())
    }

    #[test]
    fn test_filters() -> anyhow::Result<()> {
        let store = store_with(&[
            MetricPoint::new("p1", "latency", 1.0, 0)
                .with_service("api")
                .with_environment("prod")
                .with_label("region", "us"),
            MetricPoint::new("p1", "latency", 2.0, 0)
                .with_service("worker")
                .with_environment("prod")
                .with_label("region", "eu"),
            MetricPoint::new("p1", "errors", 3.0, 0).with_service("api"),
            MetricPoint::new("p2", "latency", 4.0, 0).with_service("api"),
            MetricPoint::new("p1", "latency", 5.0, 10 * MINUTE).with_service("api"),
        ]);
        let range = TimeRange::new(0, 5 * MINUTE);
        let count = |query: MetricQuery| -> anyhow::Result<u64> {
            Ok(run(&store, &query)?.iter().map(|r| r.stats.count).sum())
        };
        assert_eq!(count(MetricQuery::new("p1", range))?, 3);
        assert_eq!(count(MetricQuery::new("p1", range).with_service("api"))?, 2);
        assert_eq!(
            count(MetricQuery::new("p1", range).with_environment("prod"))?,
            2
        );
        assert_eq!(count(MetricQuery::new("p1", range).with_name("lat*"))?, 2);
        assert_eq!(
            count(MetricQuery::new("p1", range).with_label("region", "us"))?,
            1
        );
        assert_eq!(
            count(MetricQuery::new("p1", range).with_label("missing", "x"))?,
            0
        );
        assert_eq!(count(MetricQuery::new("p2", range))?, 1);
        assert_eq!(count(MetricQuery::new("p1", TimeRange::new(0, 20 * MINUTE)))?, 4);
        Ok(())
    }

    #[test]
    fn test_group_by() -> anyhow::Result<()> {
        let store = store_with(&[
            MetricPoint::new("p1", "latency", 1.0, 0).with_label("region", "us"),
            MetricPoint::new("p1", "latency", 2.0, 0).with_label("region", "eu"),
            MetricPoint::new("p1", "latency", 3.0, MINUTE).with_label("region", "us"),
            MetricPoint::new("p1", "latency", 4.0, MINUTE),
        ]);
        let query = MetricQuery::new("p1", TimeRange::new(0, 5 * MINUTE)).with_group_by(["region"]);
        let results = run(&store, &query)?;
        let groups: Vec<_> = results
            .iter()
            .map(|r| (r.group.get("region").cloned().unwrap_or_default(), r.stats.count))
            .collect();
        assert_eq!(
            groups,
            vec![
                ("eu".to_string(), 1),
                ("us".to_string(), 2),
                // `latency{region=}` sorts after the named groups.
                ("".to_string(), 1),
            ]
        );
        assert!(results.iter().all(|r| r.name == "latency"));
        Ok(())
    }

    #[test]
    fn test_limit_and_empty_results() -> anyhow::Result<()> {
        let store = store_with(&[
            MetricPoint::new("p1", "a", 1.0, 0),
            MetricPoint::new("p1", "b", 1.0, 0),
            MetricPoint::new("p1", "c", 1.0, 0),
        ]);
        let query = MetricQuery::new("p1", TimeRange::new(0, MINUTE)).with_limit(2);
        assert_eq!(run(&store, &query)?.len(), 2);

        let missing = MetricQuery::new("p1", TimeRange::new(0, MINUTE)).with_name("nope");
        assert!(run(&store, &missing)?.is_empty());
        let empty_range = MetricQuery::new("p1", TimeRange::new(60 * MINUTE, 70 * MINUTE));
        assert!(run(&store, &empty_range)?.is_empty());
        Ok(())
    }

    #[test]
    fn test_range_at_end_of_time() -> anyhow::Result<()> {
        let store = store_with(&[MetricPoint::new("p1", "latency", 1.0, i64::MAX)]);
        let start = i64::MAX - 2 * MINUTE;
        let results = run(&store, &MetricQuery::new("p1", TimeRange::new(start, i64::MAX)))?;
        assert_eq!(results.len(), 1);
        let series = &results[0].series;
        assert_eq!(series.iter().map(|p| p.count).sum::<u64>(), 1);
        assert!(series.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        Ok(())
    }

    #[test]
    fn test_invalid_queries() {
        let store = store_with(&[]);
        let err = run(&store, &MetricQuery::new("p1", TimeRange::new(10, 5))).unwrap_err();
        assert!(matches!(err, MetricsError::InvalidTimeRange { .. }));
        let err = run(&store, &MetricQuery::new("", TimeRange::new(0, 5))).unwrap_err();
        assert!(matches!(err, MetricsError::InvalidQuery(_)));
        let huge = MetricQuery::new("p1", TimeRange::new(0, i64::MAX));
        let err = run(&store, &huge).unwrap_err();
        assert!(matches!(err, MetricsError::InvalidQuery(_)));
    }

    #[test]
    fn test_query_from_json() -> anyhow::Result<()> {
        let query = MetricQuery::try_from(serde_json::json!({
            "projectId": "p1",
            "name": "http.*",
            "groupBy": ["region"],
            "range": { "start": 0, "end": 900000 },
            "interval": "5m",
            "limit": 10,
        }))?;
        assert_eq!(
            query,
            MetricQuery::new("p1", TimeRange::new(0, 900_000))
                .with_name("http.*")
                .with_group_by(["region"])
                .with_interval(AggregationInterval::FiveMinutes)
                .with_limit(10)
        );

        let err = MetricQuery::try_from(serde_json::json!({
            "projectId": "p1",
            "range": { "start": 0, "end": 1 },
            "interval": "2m",
        }))
        .unwrap_err();
        assert!(matches!(err, MetricsError::UnknownInterval(_)));

        let err = MetricQuery::try_from(serde_json::json!({ "range": { "start": 0, "end": 1 } }))
            .unwrap_err();
        assert!(matches!(err, MetricsError::InvalidQuery(_)));
        Ok(())
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 48, failure_persistence: None, .. ProptestConfig::default() })]

        #[test]
        fn proptest_groups_partition_counts(
            samples in prop::collection::vec(
                (0usize..3, 0usize..3, 0i64..(30 * MINUTE), -100i32..100),
                1..60,
            ),
        ) {
            let regions = ["us", "eu", "ap"];
            let points: Vec<_> = samples
                .iter()
                .map(|(region, host, ts, value)| {
                    MetricPoint::new("p1", "latency", *value as f64, *ts)
                        .with_label("region", regions[*region])
                        .with_label("host", format!("h{host}"))
                })
                .collect();
            let store = store_with(&points);
            let range = TimeRange::new(5 * MINUTE, 25 * MINUTE);
            let ungrouped = run(&store, &MetricQuery::new("p1", range)).unwrap();
            let grouped = run(&store, &MetricQuery::new("p1", range).with_group_by(["region", "host"])).unwrap();
            let total: u64 = ungrouped.iter().map(|r| r.stats.count).sum();
            let grouped_total: u64 = grouped.iter().map(|r| r.stats.count).sum();
            prop_assert_eq!(total, grouped_total);
            let expected = points.iter().filter(|p| range.contains(AggregationInterval::OneMinute.truncate(p.timestamp))).count() as u64;
            prop_assert_eq!(total, expected);
            for result in grouped.iter().chain(ungrouped.iter()) {
                prop_assert!(result.stats.min <= result.stats.avg);
                prop_assert!(result.stats.avg <= result.stats.max);
                prop_assert!(result.stats.p50 <= result.stats.p95);
                prop_assert!(result.stats.p95 <= result.stats.p99);
            }
        }
    }
}
