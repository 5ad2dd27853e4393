//! The in-memory metrics engine.
//!
//! Writers append to a pending buffer under its own lock. Flushing drains the
//! buffer and aggregates the batch into the bucket store while holding the
//! store lock, so a flush is never observed half applied. Queries flush first
//! and then compute over a clone of the store, which is cheap because the
//! store is built from persistent maps.
//!
//! Lock order is always `store` before `pending`.
use std::{
    mem,
    sync::{
        Arc,
        Weak,
    },
    time::Duration,
};

use anyhow::Context;
use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::{
    task::JoinHandle,
    time::MissedTickBehavior,
};

use crate::{
    clock::{
        Clock,
        SystemClock,
    },
    config::{
        MetricsStorageConfig,
        MetricsStorageConfigOverrides,
    },
    interval::AggregationInterval,
    knobs::METRICS_MAX_QUERY_SERIES_POINTS,
    metrics::{
        flush_timer,
        log_bucket_count,
        log_buckets_pruned,
        log_flush,
        log_pending_points,
        log_points_ingested,
        log_points_rejected,
        query_timer,
    },
    query::{
        execute_query,
        MetricQuery,
    },
    retention::{
        prune_cutoff,
        RollupOptions,
    },
    storage::MetricsStorage,
    store::BucketStore,
    types::{
        MetricBucket,
        MetricPoint,
        MetricResult,
        StoreStats,
        TimestampMs,
    },
    MetricsError,
};

struct Pending {
    points: Vec<MetricPoint>,
    closed: bool,
}

struct Inner {
    config: MetricsStorageConfig,
    interval: AggregationInterval,
    max_query_series_points: usize,
    clock: Arc<dyn Clock>,
    pending: Mutex<Pending>,
    store: Mutex<BucketStore>,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl Inner {
    /// Aggregate everything pending. Returns the number of points drained.
    fn flush(&self, forced: bool) -> usize {
        let drained = {
            let mut store = self.store.lock();
            let points = mem::take(&mut self.pending.lock().points);
            if points.is_empty() {
                return 0;
            }
            let _timer = flush_timer();
            let created = store.ingest(&points);
            log_pending_points(0);
            log_points_ingested(points.len());
            log_bucket_count(store.buckets().len());
            log_flush(forced);
            tracing::debug!(
                "Flushed {} metric points ({created} new buckets, {} total)",
                points.len(),
                store.buckets().len()
            );
            points.len()
        };
        if self.config.auto_rollup {
            self.auto_rollup();
        }
        drained
    }

    fn auto_rollup(&self) {
        for tier in &self.config.tiers {
            let Some(destination) = tier.rollup_to else {
                continue;
            };
            if let Err(e) = self.rollup(&RollupOptions::new(tier.interval, destination)) {
                tracing::error!(
                    "Automatic rollup from {} to {destination} failed: {e:#}",
                    tier.interval
                );
            }
        }
    }

    /// Only the finest tier is stored, and its buckets already carry
    /// everything a coarser query needs, so there is nothing to materialize.
    fn rollup(&self, options: &RollupOptions) -> Result<u64, MetricsError> {
        options.validate()?;
        tracing::trace!(
            "Skipping rollup from {} to {}: buckets are aggregated in memory",
            options.source,
            options.destination
        );
        Ok(0)
    }

    fn prune(&self) -> u64 {
        let Some(cutoff) = prune_cutoff(&self.config, self.clock.now_ms()) else {
            return 0;
        };
        let removed = {
            let mut store = self.store.lock();
            let removed = store.prune_before(cutoff);
            log_bucket_count(store.buckets().len());
            removed
        };
        if removed > 0 {
            log_buckets_pruned(removed);
            tracing::info!("Pruned {removed} metric buckets older than {cutoff}");
        }
        removed
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(handle) = self.maintenance.get_mut().take() {
            handle.abort();
        }
    }
}

/// Flush and prune on a fixed period until the engine is dropped or closed.
async fn go_maintain(inner: Weak<Inner>, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    interval.tick().await;
    loop {
        interval.tick().await;
        let Some(inner) = inner.upgrade() else {
            tracing::debug!("Metrics store dropped, stopping maintenance");
            return;
        };
        inner.flush(false);
        inner.prune();
    }
}

/// Cheap to clone: clones share the same buffer and buckets.
#[derive(Clone)]
pub struct InMemoryMetricsStorage {
    inner: Arc<Inner>,
}

impl InMemoryMetricsStorage {
    /// Create an engine from a complete config. A non-zero `flush_interval`
    /// spawns the maintenance task, which requires a tokio runtime.
    pub fn new(config: MetricsStorageConfig) -> Result<Self, MetricsError> {
        Self::new_with_clock(config, Arc::new(SystemClock))
    }

    /// Create an engine from the knob defaults merged with `overrides`.
    pub fn with_overrides(overrides: MetricsStorageConfigOverrides) -> Result<Self, MetricsError> {
        Self::new(MetricsStorageConfig::default().with_overrides(overrides))
    }

    pub fn new_with_clock(
        config: MetricsStorageConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, MetricsError> {
        config.validate()?;
        let interval = config.storage_interval()?;
        let flush_interval = config.flush_interval;
        let store = BucketStore::new(interval, config.sample_cap, config.sample_seed);
        let inner = Arc::new(Inner {
            config,
            interval,
            max_query_series_points: *METRICS_MAX_QUERY_SERIES_POINTS,
            clock,
            pending: Mutex::new(Pending {
                points: Vec::new(),
                closed: false,
            }),
            store: Mutex::new(store),
            maintenance: Mutex::new(None),
        });
        if !flush_interval.is_zero() {
            let runtime = tokio::runtime::Handle::try_current()
                .context("Periodic flushing requires a tokio runtime")?;
            let handle = runtime.spawn(go_maintain(Arc::downgrade(&inner), flush_interval));
            *inner.maintenance.lock() = Some(handle);
        }
        tracing::debug!(
            "Created in-memory metrics store at {interval} granularity, flushing every \
             {flush_interval:?}"
        );
        Ok(Self { inner })
    }

    pub fn stats(&self) -> StoreStats {
        let store = self.inner.store.lock();
        let pending = self.inner.pending.lock();
        StoreStats {
            pending_points: pending.points.len(),
            buckets: store.buckets().len(),
            sample_keys: store.samples().len(),
        }
    }
}

#[async_trait]
impl MetricsStorage for InMemoryMetricsStorage {
    async fn write(&self, points: Vec<MetricPoint>) -> Result<(), MetricsError> {
        if let Some(point) = points.iter().find(|p| !p.value.is_finite()) {
            log_points_rejected(points.len());
            return Err(MetricsError::NonFiniteValue {
                name: point.name.clone(),
                value: point.value,
            });
        }
        if let Some(point) = points
            .iter()
            .find(|p| !AggregationInterval::supports(p.timestamp))
        {
            log_points_rejected(points.len());
            return Err(MetricsError::TimestampOutOfRange {
                name: point.name.clone(),
                timestamp: point.timestamp,
            });
        }
        let batch_full = {
            let mut pending = self.inner.pending.lock();
            if pending.closed {
                log_points_rejected(points.len());
                return Err(MetricsError::Closed);
            }
            pending.points.extend(points);
            log_pending_points(pending.points.len());
            pending.points.len() >= self.inner.config.max_batch_size
        };
        if batch_full {
            tracing::debug!(
                "Pending metric points reached {}, flushing",
                self.inner.config.max_batch_size
            );
            self.inner.flush(true);
        }
        Ok(())
    }

    async fn query(&self, query: MetricQuery) -> Result<Vec<MetricResult>, MetricsError> {
        self.inner.flush(false);
        let snapshot = self.inner.store.lock().clone();
        let _timer = query_timer();
        execute_query(
            &snapshot,
            &query,
            self.inner.interval,
            self.inner.max_query_series_points,
        )
    }

    async fn get_bucket(
        &self,
        project_id: &str,
        name: &str,
        ts: TimestampMs,
    ) -> Result<Option<MetricBucket>, MetricsError> {
        self.inner.flush(false);
        let bucket_time = self.inner.interval.truncate(ts);
        let store = self.inner.store.lock();
        Ok(store
            .buckets()
            .first_matching(project_id, name, bucket_time)
            .cloned())
    }

    async fn rollup(&self, options: RollupOptions) -> Result<u64, MetricsError> {
        self.inner.rollup(&options)
    }

    async fn prune(&self) -> Result<u64, MetricsError> {
        self.inner.flush(false);
        Ok(self.inner.prune())
    }

    fn config(&self) -> &MetricsStorageConfig {
        &self.inner.config
    }

    async fn flush(&self) -> Result<(), MetricsError> {
        self.inner.flush(false);
        Ok(())
    }

    async fn close(&self) -> Result<(), MetricsError> {
        {
            let mut pending = self.inner.pending.lock();
            if pending.closed {
                return Ok(());
            }
            pending.closed = true;
        }
        let handle = self.inner.maintenance.lock().take();
        if let Some(handle) = handle {
            handle.abort();
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    return Err(anyhow::Error::from(e)
                        .context("Metrics maintenance task failed")
                        .into());
                }
            }
        }
        self.inner.flush(false);
        self.inner.store.lock().clear();
        log_bucket_count(0);
        tracing::info!("Closed in-memory metrics store");
        Ok(())
    }
}
