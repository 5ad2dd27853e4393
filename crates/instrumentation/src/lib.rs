//! Process-wide Prometheus registry and helpers for instrumenting crates.
//!
//! Conventions, following [Prometheus's naming guide](https://prometheus.io/docs/practices/naming/):
//!
//! 1. Metric names are the lower_snake_case version of the static declared
//!    with one of the `register_*_metric!` macros, prefixed by the registry
//!    namespace.
//! 2. Names end in a unit suffix (see `ALLOWED_SUFFIXES`). Use `_seconds` for
//!    time and `_total` for unit-less counts.
//! 3. Each instrumented crate keeps its metrics in a `metrics` module exposing
//!    high-level `log_*` functions rather than raw collectors.

mod macros;
mod registry;
mod reporting;
mod timer;

pub use crate::{
    macros::*,
    registry::{
        encode_registry,
        metric_name,
        METRICS_REGISTRY,
        REGISTRY_NAMESPACE,
    },
    reporting::{
        get_desc,
        log_counter,
        log_distribution,
        log_gauge,
    },
    timer::Timer,
};
