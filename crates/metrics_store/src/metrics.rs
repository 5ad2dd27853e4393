use instrumentation::{
    log_counter,
    log_gauge,
    register_counter_metric,
    register_gauge_metric,
    register_histogram_metric,
    Timer,
};

register_counter_metric!(
    POINTS_INGESTED_TOTAL,
    "Number of metric points aggregated into buckets"
);
register_counter_metric!(
    POINTS_REJECTED_TOTAL,
    "Number of metric points rejected at write time"
);
register_counter_metric!(FLUSHES_TOTAL, "Number of non-empty flushes");
register_counter_metric!(
    FORCED_FLUSHES_TOTAL,
    "Number of flushes triggered by the pending batch reaching its size limit"
);
register_histogram_metric!(FLUSH_SECONDS, "Time to aggregate a pending batch");
register_gauge_metric!(
    PENDING_POINTS_TOTAL,
    "Number of points buffered and not yet aggregated"
);
register_gauge_metric!(BUCKETS_TOTAL, "Number of aggregated buckets held in memory");
register_counter_metric!(BUCKETS_PRUNED_TOTAL, "Number of buckets deleted by retention");
register_counter_metric!(QUERIES_TOTAL, "Number of range queries executed");
register_histogram_metric!(QUERY_SECONDS, "Time to execute a range query");

pub fn log_points_ingested(count: usize) {
    log_counter(&POINTS_INGESTED_TOTAL, count as u64);
}

pub fn log_points_rejected(count: usize) {
    log_counter(&POINTS_REJECTED_TOTAL, count as u64);
}

pub fn log_flush(forced: bool) {
    log_counter(&FLUSHES_TOTAL, 1);
    if forced {
        log_counter(&FORCED_FLUSHES_TOTAL, 1);
    }
}

pub fn flush_timer() -> Timer {
    Timer::new(&FLUSH_SECONDS)
}

pub fn log_pending_points(count: usize) {
    log_gauge(&PENDING_POINTS_TOTAL, count as f64);
}

pub fn log_bucket_count(count: usize) {
    log_gauge(&BUCKETS_TOTAL, count as f64);
}

pub fn log_buckets_pruned(count: u64) {
    log_counter(&BUCKETS_PRUNED_TOTAL, count);
}

pub fn query_timer() -> Timer {
    log_counter(&QUERIES_TOTAL, 1);
    Timer::new(&QUERY_SECONDS)
}
