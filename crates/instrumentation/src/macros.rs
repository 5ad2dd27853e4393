pub use paste::paste;
pub use prometheus;

/// Register an integer counter with the process registry and store it in a
/// static variable. The reported metric name is the lower_snake_case version
/// of the declared variable name.
#[macro_export]
macro_rules! register_counter_metric {
    ($VIS:vis $NAME:ident, $HELP:literal $(,)?) => {
        $VIS static $NAME: std::sync::LazyLock<$crate::prometheus::IntCounter> =
            std::sync::LazyLock::new(|| {
                $crate::paste! {
                    let name = $crate::metric_name(stringify!([<$NAME:lower>]));
                }
                $crate::prometheus::register_int_counter_with_registry!(
                    name,
                    $HELP,
                    $crate::METRICS_REGISTRY
                )
                .expect("Metric initialization failed")
            });
    };
}

/// Register a floating-point gauge with the process registry and store it in
/// a static variable.
#[macro_export]
macro_rules! register_gauge_metric {
    ($VIS:vis $NAME:ident, $HELP:literal $(,)?) => {
        $VIS static $NAME: std::sync::LazyLock<$crate::prometheus::Gauge> =
            std::sync::LazyLock::new(|| {
                $crate::paste! {
                    let name = $crate::metric_name(stringify!([<$NAME:lower>]));
                }
                $crate::prometheus::register_gauge_with_registry!(
                    name,
                    $HELP,
                    $crate::METRICS_REGISTRY
                )
                .expect("Metric initialization failed")
            });
    };
}

/// Register a histogram with the process registry and store it in a static
/// variable. Uses the Prometheus default buckets, which suit latencies
/// reported in seconds.
#[macro_export]
macro_rules! register_histogram_metric {
    ($VIS:vis $NAME:ident, $HELP:literal $(,)?) => {
        $VIS static $NAME: std::sync::LazyLock<$crate::prometheus::Histogram> =
            std::sync::LazyLock::new(|| {
                $crate::paste! {
                    let name = $crate::metric_name(stringify!([<$NAME:lower>]));
                }
                $crate::prometheus::register_histogram_with_registry!(
                    name,
                    $HELP,
                    $crate::METRICS_REGISTRY
                )
                .expect("Metric initialization failed")
            });
    };
}
