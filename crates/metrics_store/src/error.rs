use crate::{
    interval::AggregationInterval,
    types::TimestampMs,
};

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("Non-finite value {value} for metric {name}")]
    NonFiniteValue { name: String, value: f64 },

    #[error("Timestamp {timestamp} for metric {name} is outside the supported range")]
    TimestampOutOfRange { name: String, timestamp: TimestampMs },

    #[error("Unknown aggregation interval: {0:?}")]
    UnknownInterval(String),

    #[error("Invalid time range: {end} < {start}")]
    InvalidTimeRange {
        start: TimestampMs,
        end: TimestampMs,
    },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Invalid storage config: {0}")]
    InvalidConfig(String),

    #[error("Cannot roll up {from} into {to}: destination must be coarser")]
    InvalidRollup {
        from: AggregationInterval,
        to: AggregationInterval,
    },

    #[error("Metrics storage is closed")]
    Closed,

    /// Connection or IO failure in a persistent backend. Pending points must be
    /// left intact when a flush fails with this error.
    #[error("Storage backend error: {0:#}")]
    Storage(anyhow::Error),

    #[error(transparent)]
    InternalError(#[from] anyhow::Error),
}

impl MetricsError {
    /// Errors caused by caller input, as opposed to engine state or backend
    /// failures.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            MetricsError::NonFiniteValue { .. }
                | MetricsError::TimestampOutOfRange { .. }
                | MetricsError::UnknownInterval(..)
                | MetricsError::InvalidTimeRange { .. }
                | MetricsError::InvalidQuery(..)
                | MetricsError::InvalidRollup { .. }
        )
    }
}
