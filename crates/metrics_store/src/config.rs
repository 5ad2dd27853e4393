use std::time::Duration;

use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    interval::AggregationInterval,
    knobs,
    MetricsError,
};

const HOUR: Duration = Duration::from_secs(60 * 60);
const DAY: Duration = Duration::from_secs(24 * 60 * 60);

/// Retention and granularity policy for one level of storage.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tier {
    pub interval: AggregationInterval,
    /// `None` keeps buckets forever.
    pub retention: Option<Duration>,
    /// Coarser tier that this tier's buckets are rolled up into.
    pub rollup_to: Option<AggregationInterval>,
}

impl Tier {
    pub fn new(interval: AggregationInterval, retention: Option<Duration>) -> Self {
        Self {
            interval,
            retention,
            rollup_to: None,
        }
    }

    pub fn with_rollup_to(mut self, rollup_to: AggregationInterval) -> Self {
        self.rollup_to = Some(rollup_to);
        self
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsStorageConfig {
    /// Ordered finest to coarsest.
    pub tiers: Vec<Tier>,
    pub max_batch_size: usize,
    /// `Duration::ZERO` disables the background task.
    pub flush_interval: Duration,
    pub auto_rollup: bool,
    pub sample_cap: usize,
    /// Seed for reservoir sampling. Random when unset.
    pub sample_seed: Option<u64>,
}

impl Default for MetricsStorageConfig {
    fn default() -> Self {
        Self {
            tiers: vec![
                Tier::new(AggregationInterval::OneMinute, Some(DAY))
                    .with_rollup_to(AggregationInterval::OneHour),
                Tier::new(AggregationInterval::OneHour, Some(30 * DAY))
                    .with_rollup_to(AggregationInterval::OneDay),
                Tier::new(AggregationInterval::OneDay, None),
            ],
            max_batch_size: *knobs::METRICS_MAX_BATCH_SIZE,
            flush_interval: *knobs::METRICS_FLUSH_INTERVAL,
            auto_rollup: *knobs::METRICS_AUTO_ROLLUP,
            sample_cap: *knobs::METRICS_SAMPLE_CAP,
            sample_seed: None,
        }
    }
}

/// Caller-supplied settings layered over the defaults.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsStorageConfigOverrides {
    pub tiers: Option<Vec<Tier>>,
    pub max_batch_size: Option<usize>,
    pub flush_interval: Option<Duration>,
    pub auto_rollup: Option<bool>,
    pub sample_cap: Option<usize>,
    pub sample_seed: Option<u64>,
}

impl MetricsStorageConfig {
    pub fn with_overrides(self, overrides: MetricsStorageConfigOverrides) -> Self {
        Self {
            tiers: overrides.tiers.unwrap_or(self.tiers),
            max_batch_size: overrides.max_batch_size.unwrap_or(self.max_batch_size),
            flush_interval: overrides.flush_interval.unwrap_or(self.flush_interval),
            auto_rollup: overrides.auto_rollup.unwrap_or(self.auto_rollup),
            sample_cap: overrides.sample_cap.unwrap_or(self.sample_cap),
            sample_seed: overrides.sample_seed.or(self.sample_seed),
        }
    }

    pub fn validate(&self) -> Result<(), MetricsError> {
        if self.tiers.is_empty() {
            return Err(MetricsError::InvalidConfig(
                "at least one tier is required".to_string(),
            ));
        }
        for pair in self.tiers.windows(2) {
            let (prev, tier) = (&pair[0], &pair[1]);
            if tier.interval <= prev.interval {
                return Err(MetricsError::InvalidConfig(format!(
                    "tiers must be ordered finest to coarsest: {} follows {}",
                    tier.interval, prev.interval
                )));
            }
            if let Some(retention) = tier.retention {
                if retention < prev.interval.width() {
                    return Err(MetricsError::InvalidConfig(format!(
                        "retention {retention:?} of tier {} is shorter than the {} bucket width \
                         of the previous tier",
                        tier.interval, prev.interval
                    )));
                }
            }
        }
        for tier in &self.tiers {
            let Some(rollup_to) = tier.rollup_to else {
                continue;
            };
            if rollup_to <= tier.interval {
                return Err(MetricsError::InvalidConfig(format!(
                    "tier {} rolls up into {rollup_to}, which is not coarser",
                    tier.interval
                )));
            }
            if !self.tiers.iter().any(|t| t.interval == rollup_to) {
                return Err(MetricsError::InvalidConfig(format!(
                    "tier {} rolls up into {rollup_to}, which is not configured",
                    tier.interval
                )));
            }
        }
        if self.max_batch_size == 0 {
            return Err(MetricsError::InvalidConfig(
                "max_batch_size must be positive".to_string(),
            ));
        }
        if self.sample_cap == 0 {
            return Err(MetricsError::InvalidConfig(
                "sample_cap must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Width that raw points are aggregated into.
    pub fn storage_interval(&self) -> Result<AggregationInterval, MetricsError> {
        self.tiers
            .first()
            .map(|tier| tier.interval)
            .ok_or_else(|| MetricsError::InvalidConfig("at least one tier is required".to_string()))
    }

    /// Shortest finite retention across tiers, or `None` if every tier keeps
    /// data forever.
    pub fn min_retention(&self) -> Option<Duration> {
        self.tiers.iter().filter_map(|tier| tier.retention).min()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pretty_assertions::assert_eq;

    use super::{
        MetricsStorageConfig,
        MetricsStorageConfigOverrides,
        Tier,
        DAY,
        HOUR,
    };
    use crate::{
        interval::AggregationInterval,
        MetricsError,
    };

    #[test]
    fn test_default_config_is_valid() -> anyhow::Result<()> {
        let config = MetricsStorageConfig::default();
        config.validate()?;
        assert_eq!(config.storage_interval()?, AggregationInterval::OneMinute);
        assert_eq!(config.min_retention(), Some(DAY));
        Ok(())
    }

    #[test]
    fn test_overrides_merge() {
        let overrides = MetricsStorageConfigOverrides {
            max_batch_size: Some(5),
            sample_seed: Some(7),
            tiers: Some(vec![Tier::new(AggregationInterval::FiveMinutes, None)]),
            ..Default::default()
        };
        let defaults = MetricsStorageConfig::default();
        let config = defaults.clone().with_overrides(overrides);
        assert_eq!(config.max_batch_size, 5);
        assert_eq!(config.sample_seed, Some(7));
        assert_eq!(config.flush_interval, defaults.flush_interval);
        assert_eq!(config.sample_cap, defaults.sample_cap);
        assert_eq!(
            config.tiers,
            vec![Tier::new(AggregationInterval::FiveMinutes, None)]
        );
        assert_eq!(config.min_retention(), None);
    }

    #[test]
    fn test_rejects_unordered_tiers() {
        let config = MetricsStorageConfig::default().with_overrides(
            MetricsStorageConfigOverrides {
                tiers: Some(vec![
                    Tier::new(AggregationInterval::OneHour, Some(DAY)),
                    Tier::new(AggregationInterval::OneMinute, Some(DAY)),
                ]),
                ..Default::default()
            },
        );
        assert!(matches!(
            config.validate(),
            Err(MetricsError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_retention_shorter_than_previous_width() {
        let config = MetricsStorageConfig::default().with_overrides(
            MetricsStorageConfigOverrides {
                tiers: Some(vec![
                    Tier::new(AggregationInterval::OneHour, Some(DAY)),
                    Tier::new(AggregationInterval::OneDay, Some(Duration::from_secs(60))),
                ]),
                ..Default::default()
            },
        );
        assert!(matches!(
            config.validate(),
            Err(MetricsError::InvalidConfig(_))
        ));

        // The first tier has no predecessor, so zero retention is allowed.
        let config = MetricsStorageConfig::default().with_overrides(
            MetricsStorageConfigOverrides {
                tiers: Some(vec![Tier::new(
                    AggregationInterval::OneMinute,
                    Some(Duration::ZERO),
                )]),
                ..Default::default()
            },
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_rollup_target() {
        let config = MetricsStorageConfig::default().with_overrides(
            MetricsStorageConfigOverrides {
                tiers: Some(vec![
                    Tier::new(AggregationInterval::OneMinute, Some(HOUR))
                        .with_rollup_to(AggregationInterval::SixHours),
                    Tier::new(AggregationInterval::OneHour, None),
                ]),
                ..Default::default()
            },
        );
        assert!(matches!(
            config.validate(),
            Err(MetricsError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_rejects_zero_batch_size() {
        let config =
            MetricsStorageConfig::default().with_overrides(MetricsStorageConfigOverrides {
                max_batch_size: Some(0),
                ..Default::default()
            });
        assert!(matches!(
            config.validate(),
            Err(MetricsError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_config_serializes() -> anyhow::Result<()> {
        let config = MetricsStorageConfig::default();
        let json = serde_json::to_value(&config)?;
        assert_eq!(json["tiers"][0]["interval"], serde_json::json!("1m"));
        let parsed: MetricsStorageConfig = serde_json::from_value(json)?;
        assert_eq!(parsed, config);
        Ok(())
    }
}
