use std::{
    str::FromStr,
    time::Duration,
};

use serde::{
    Deserialize,
    Serialize,
};
use strum::{
    Display,
    EnumIter,
    EnumString,
    IntoEnumIterator,
};

use crate::{
    types::TimestampMs,
    MetricsError,
};

const MINUTE_MS: i64 = 60 * 1000;

/// Fixed bucket width, used both as a storage tier granularity and for
/// query-time re-bucketing.
#[derive(
    Copy,
    Clone,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
    EnumIter,
    Serialize,
    Deserialize,
)]
pub enum AggregationInterval {
    #[strum(serialize = "1m")]
    #[serde(rename = "1m")]
    OneMinute,
    #[strum(serialize = "5m")]
    #[serde(rename = "5m")]
    FiveMinutes,
    #[strum(serialize = "15m")]
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[strum(serialize = "1h")]
    #[serde(rename = "1h")]
    OneHour,
    #[strum(serialize = "6h")]
    #[serde(rename = "6h")]
    SixHours,
    #[strum(serialize = "1d")]
    #[serde(rename = "1d")]
    OneDay,
}

impl AggregationInterval {
    pub const fn width_ms(&self) -> i64 {
        match self {
            Self::OneMinute => MINUTE_MS,
            Self::FiveMinutes => 5 * MINUTE_MS,
            Self::FifteenMinutes => 15 * MINUTE_MS,
            Self::OneHour => 60 * MINUTE_MS,
            Self::SixHours => 6 * 60 * MINUTE_MS,
            Self::OneDay => 24 * 60 * MINUTE_MS,
        }
    }

    pub fn width(&self) -> Duration {
        Duration::from_millis(self.width_ms() as u64)
    }

    /// Start of the window containing `ts`, rounding toward negative infinity.
    /// Saturates at `i64::MIN` for timestamps whose window starts before it;
    /// see [`Self::supports`].
    pub fn truncate(&self, ts: TimestampMs) -> TimestampMs {
        self.checked_truncate(ts).unwrap_or(TimestampMs::MIN)
    }

    pub fn checked_truncate(&self, ts: TimestampMs) -> Option<TimestampMs> {
        ts.div_euclid(self.width_ms()).checked_mul(self.width_ms())
    }

    /// Whether `ts` has a representable window start at every interval, so
    /// points at `ts` can be stored and rolled up to any tier.
    pub fn supports(ts: TimestampMs) -> bool {
        Self::iter().all(|interval| interval.checked_truncate(ts).is_some())
    }

    /// Strict parse used at API boundaries: unknown widths are a validation
    /// error, never a fallback to a default.
    pub fn parse(s: &str) -> Result<Self, MetricsError> {
        Self::from_str(s).map_err(|_| MetricsError::UnknownInterval(s.to_owned()))
    }
}
