//! Configuration for the quiesce thrasher.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::error::ConfigError;
use crate::shutdown::secs_to_duration;

/// Upper bound for the fraction of wall-clock time spent quiesced.
pub const MAX_QUIESCE_FACTOR: f64 = 0.5;

/// Lower bound for the fraction of wall-clock time spent quiesced.
pub const MIN_QUIESCE_FACTOR: f64 = 0.005;

/// A quiesce factor that was moved into range at construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FactorClamp {
    pub requested: f64,
    pub effective: f64,
}

/// Raw, unvalidated actor settings as they appear in a scenario definition.
///
/// Every field is optional; missing fields take the defaults of
/// [`ActorConfig::default`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActorSettings {
    pub quiesce_timeout: Option<u64>,
    pub quiesce_factor: Option<f64>,
    pub min_quiesce: Option<u64>,
    pub max_quiesce: Option<u64>,
    pub initial_delay: Option<u64>,
    pub path: Option<String>,
    pub seed: Option<u64>,
}

impl ActorSettings {
    /// Read settings from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let load_err = |reason: String| ConfigError::Load {
            path: path.display().to_string(),
            reason,
        };
        let raw = std::fs::read_to_string(path).map_err(|e| load_err(e.to_string()))?;
        serde_json::from_str(&raw).map_err(|e| load_err(e.to_string()))
    }

    /// Fill in defaults and validate.
    pub fn build(self) -> Result<ActorConfig, ConfigError> {
        let defaults = ActorConfig::default();
        ActorConfig::new(
            self.quiesce_timeout.unwrap_or(defaults.quiesce_timeout),
            self.quiesce_factor.unwrap_or(defaults.quiesce_factor),
            self.min_quiesce.unwrap_or(defaults.min_quiesce),
            self.max_quiesce.unwrap_or(defaults.max_quiesce),
            self.initial_delay.unwrap_or(defaults.initial_delay),
        )
        .map(|config| {
            config
                .with_path(self.path.unwrap_or(defaults.path))
                .with_seed(self.seed)
        })
        .and_then(|config| config.validate().map(|()| config))
    }
}

/// Immutable per-actor configuration.
///
/// All durations are in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct ActorConfig {
    /// Command-level deadline for the quiesce request.
    pub quiesce_timeout: u64,

    /// Fraction of a full cycle spent quiesced, within
    /// `[MIN_QUIESCE_FACTOR, MAX_QUIESCE_FACTOR]`.
    pub quiesce_factor: f64,

    /// Inclusive lower bound of a single quiesce.
    pub min_quiesce: u64,

    /// Inclusive upper bound of a single quiesce.
    pub max_quiesce: u64,

    /// Delay before the first cycle.
    pub initial_delay: u64,

    /// Path to quiesce.
    pub path: String,

    /// Seed for the duration model; `None` draws from the process RNG.
    pub seed: Option<u64>,

    factor_clamp: Option<FactorClamp>,
}

impl Default for ActorConfig {
    fn default() -> Self {
        Self {
            quiesce_timeout: 30,
            quiesce_factor: 0.1,
            min_quiesce: 10,
            max_quiesce: 60,
            initial_delay: 120,
            path: "/".to_string(),
            seed: None,
            factor_clamp: None,
        }
    }
}

impl ActorConfig {
    /// Create a validated configuration.
    ///
    /// An out-of-range `quiesce_factor` is clamped with a warning rather than
    /// rejected; the adjustment is available via [`ActorConfig::factor_clamp`].
    pub fn new(
        quiesce_timeout: u64,
        quiesce_factor: f64,
        min_quiesce: u64,
        max_quiesce: u64,
        initial_delay: u64,
    ) -> Result<Self, ConfigError> {
        if !quiesce_factor.is_finite() {
            return Err(ConfigError::NonFiniteFactor(quiesce_factor));
        }

        let effective = quiesce_factor.clamp(MIN_QUIESCE_FACTOR, MAX_QUIESCE_FACTOR);
        let factor_clamp = if effective != quiesce_factor {
            warn!(
                requested = quiesce_factor,
                effective, "Quiesce factor out of range, clamping"
            );
            Some(FactorClamp {
                requested: quiesce_factor,
                effective,
            })
        } else {
            None
        };

        let config = Self {
            quiesce_timeout,
            quiesce_factor: effective,
            min_quiesce,
            max_quiesce,
            initial_delay,
            path: "/".to_string(),
            seed: None,
            factor_clamp,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// The clamp applied to the requested factor, if any.
    pub fn factor_clamp(&self) -> Option<FactorClamp> {
        self.factor_clamp
    }

    /// Check every invariant: finite in-range factor, `min_quiesce <=
    /// max_quiesce` and a non-empty path.
    ///
    /// Called by [`ActorConfig::new`]; call it again after editing fields or
    /// using the builder methods.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.quiesce_factor.is_finite() {
            return Err(ConfigError::NonFiniteFactor(self.quiesce_factor));
        }
        if !(MIN_QUIESCE_FACTOR..=MAX_QUIESCE_FACTOR).contains(&self.quiesce_factor) {
            return Err(ConfigError::FactorOutOfRange(self.quiesce_factor));
        }
        if self.min_quiesce > self.max_quiesce {
            return Err(ConfigError::QuiesceBounds {
                min: self.min_quiesce,
                max: self.max_quiesce,
            });
        }
        if self.path.is_empty() {
            return Err(ConfigError::EmptyPath);
        }
        Ok(())
    }

    /// Grace window added to the quiesce expiration for issuing the release.
    pub fn release_grace(&self) -> Duration {
        Duration::from_secs(60)
    }

    /// Active (unquiesced) wait that keeps the quiesced share at the factor.
    ///
    /// Saturates at `Duration::MAX` for bounds too large to represent.
    pub fn active_wait(&self, quiesce_secs: f64) -> Duration {
        secs_to_duration(quiesce_secs / self.quiesce_factor - quiesce_secs)
    }
}

/// Quiesce thrasher driver configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the cluster CLI binary.
    pub ceph_bin: String,

    /// Cluster name passed to the CLI.
    pub cluster: String,

    /// Filesystems to thrash; empty means every filesystem in the cluster.
    pub filesystems: Vec<String>,

    /// Per-actor settings.
    pub actor: ActorConfig,

    /// How long to run before stopping; `None` runs until interrupted.
    pub run_for: Option<Duration>,

    /// Deadline applied to one-shot commands.
    pub one_shot_timeout: Duration,

    /// Interval between steady-state polls before starting.
    pub steady_poll_interval: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::duration::DurationModel;
    use rstest::rstest;

    #[test]
    fn test_actor_config_default() {
        let config = ActorConfig::default();
        assert_eq!(config.quiesce_timeout, 30);
        assert_eq!(config.quiesce_factor, 0.1);
        assert_eq!(config.min_quiesce, 10);
        assert_eq!(config.max_quiesce, 60);
        assert_eq!(config.initial_delay, 120);
        assert_eq!(config.path, "/");
        assert!(config.factor_clamp().is_none());
    }

    #[rstest]
    #[case(0.9, 0.5)]
    #[case(0.0001, 0.005)]
    #[case(-1.0, 0.005)]
    fn test_factor_clamped(#[case] requested: f64, #[case] effective: f64) {
        let config = ActorConfig::new(30, requested, 10, 60, 0).unwrap();
        assert_eq!(config.quiesce_factor, effective);
        assert_eq!(
            config.factor_clamp(),
            Some(FactorClamp {
                requested,
                effective
            })
        );
    }

    #[rstest]
    #[case(0.5)]
    #[case(0.005)]
    #[case(0.25)]
    fn test_factor_in_range_untouched(#[case] factor: f64) {
        let config = ActorConfig::new(30, factor, 10, 60, 0).unwrap();
        assert_eq!(config.quiesce_factor, factor);
        assert!(config.factor_clamp().is_none());
    }

    #[test]
    fn test_rejects_inverted_bounds() {
        let err = ActorConfig::new(30, 0.1, 61, 60, 0).unwrap_err();
        assert_eq!(err, ConfigError::QuiesceBounds { min: 61, max: 60 });
    }

    #[test]
    fn test_rejects_nan_factor() {
        assert!(matches!(
            ActorConfig::new(30, f64::NAN, 10, 60, 0),
            Err(ConfigError::NonFiniteFactor(_))
        ));
    }

    #[test]
    fn test_active_wait() {
        let config = ActorConfig::new(30, 0.5, 10, 10, 0).unwrap();
        assert_eq!(config.active_wait(10.0), Duration::from_secs(10));

        let config = ActorConfig::new(30, 0.1, 10, 10, 0).unwrap();
        assert_eq!(config.active_wait(10.0), Duration::from_secs(90));
    }

    #[test]
    fn test_settings_fill_defaults() {
        let settings: ActorSettings =
            serde_json::from_str(r#"{"min_quiesce": 5, "quiesce_factor": 0.9, "seed": 7}"#)
                .unwrap();
        let config = settings.build().unwrap();
        assert_eq!(config.min_quiesce, 5);
        assert_eq!(config.max_quiesce, 60);
        assert_eq!(config.quiesce_factor, MAX_QUIESCE_FACTOR);
        assert_eq!(config.seed, Some(7));
    }

    #[test]
    fn test_settings_reject_unknown_field() {
        let parsed: Result<ActorSettings, _> = serde_json::from_str(r#"{"max_quiesec": 5}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_settings_reject_empty_path() {
        let settings = ActorSettings {
            path: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(settings.build().unwrap_err(), ConfigError::EmptyPath);
    }

    #[test]
    fn test_active_wait_saturates_for_huge_bounds() {
        let huge = 100_000_000_000_000_000;
        let config = ActorConfig::new(30, 0.005, huge, huge, 0).unwrap();
        let mut model = DurationModel::new(config.min_quiesce, config.max_quiesce, Some(1));

        assert_eq!(config.active_wait(model.next_duration()), Duration::MAX);
    }

    #[test]
    fn test_validate_catches_edited_fields() {
        let mut config = ActorConfig::default();
        assert!(config.validate().is_ok());

        config.min_quiesce = 90;
        assert_eq!(
            config.validate().unwrap_err(),
            ConfigError::QuiesceBounds { min: 90, max: 60 }
        );

        let mut config = ActorConfig::default();
        config.quiesce_factor = 0.9;
        assert_eq!(
            config.validate().unwrap_err(),
            ConfigError::FactorOutOfRange(0.9)
        );

        let config = ActorConfig::default().with_path("");
        assert_eq!(config.validate().unwrap_err(), ConfigError::EmptyPath);
    }
}
