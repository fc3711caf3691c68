//! Configuration for the metrics core.
//!
//! Every section has serde defaults so a partial TOML file (or none at all)
//! yields a working configuration. [`CoreConfig::validate`] rejects values
//! that would make the statistics meaningless.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::actions::{ActionType, Role};
use crate::cache::{MetricKind, WindowSpec};
use crate::error::{CoreError, Result};

/// Main configuration for the metrics core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Deadline for a single cache-miss computation in milliseconds.
    pub compute_timeout_ms: u64,
    pub cache: CacheConfig,
    pub velocity: VelocityConfig,
    pub prediction: PredictionConfig,
    pub actions: ActionConfig,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            compute_timeout_ms: 2_000,
            cache: CacheConfig::default(),
            velocity: VelocityConfig::default(),
            prediction: PredictionConfig::default(),
            actions: ActionConfig::default(),
        }
    }
}

impl CoreConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: CoreConfig = toml::from_str(contents)
            .map_err(|e| CoreError::InvalidConfiguration(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            CoreError::InvalidConfiguration(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn compute_timeout(&self) -> Duration {
        Duration::from_millis(self.compute_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.compute_timeout_ms == 0 {
            return Err(invalid("compute_timeout_ms must be positive"));
        }
        self.cache.validate()?;
        self.velocity.validate()?;
        self.prediction.validate()?;
        self.actions.validate()
    }
}

fn invalid(message: impl Into<String>) -> CoreError {
    CoreError::InvalidConfiguration(message.into())
}

fn check_level(name: &str, level: f64) -> Result<()> {
    if level > 0.0 && level < 1.0 {
        Ok(())
    } else {
        Err(invalid(format!("{name} must be inside (0, 1), got {level}")))
    }
}

fn check_positive(name: &str, value: f64) -> Result<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(invalid(format!("{name} must be positive, got {value}")))
    }
}

/// Cache TTL policy and bus sizing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL used for metric kinds without an explicit entry.
    pub default_ttl_secs: u64,
    /// Buffered invalidation events per subscriber before it lags.
    pub broadcast_capacity: usize,
    /// How often the maintenance task drops expired entries.
    pub sweep_interval_secs: u64,
    /// Per metric kind TTL. Volatile metrics get short TTLs.
    pub ttl_secs: BTreeMap<MetricKind, u64>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_ttl_secs: 300,
            broadcast_capacity: 256,
            sweep_interval_secs: 300,
            ttl_secs: BTreeMap::from([
                (MetricKind::Velocity, 60),
                (MetricKind::Prediction, 300),
                (MetricKind::CompletionHistory, 3_600),
            ]),
        }
    }
}

impl CacheConfig {
    pub fn ttl_for(&self, kind: MetricKind) -> Duration {
        let secs = self
            .ttl_secs
            .get(&kind)
            .copied()
            .unwrap_or(self.default_ttl_secs);
        Duration::from_secs(secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.default_ttl_secs == 0 || self.ttl_secs.values().any(|ttl| *ttl == 0) {
            return Err(invalid("cache TTLs must be positive"));
        }
        if self.broadcast_capacity == 0 {
            return Err(invalid("cache.broadcast_capacity must be positive"));
        }
        if self.sweep_interval_secs == 0 {
            return Err(invalid("cache.sweep_interval_secs must be positive"));
        }
        Ok(())
    }
}

/// Velocity and confidence band parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VelocityConfig {
    /// Window used when callers do not name one.
    pub default_window_days: u32,
    /// Fewer events than this inside the window is low-signal.
    pub min_samples: usize,
    /// Observed span shorter than this (days) is low-signal.
    pub min_span_days: f64,
    /// Sample count from which the normal approximation is trusted.
    pub normal_min_samples: usize,
    /// Widening factor for heuristic bands.
    pub heuristic_multiplier: f64,
    pub confidence_level: f64,
    /// EMA smoothing factor for daily totals.
    pub ema_alpha: f64,
    /// How far back the store is queried for best-effort rates.
    pub history_lookback_days: u32,
}

impl Default for VelocityConfig {
    fn default() -> Self {
        Self {
            default_window_days: 14,
            min_samples: 5,
            min_span_days: 3.0,
            normal_min_samples: 10,
            heuristic_multiplier: 2.0,
            confidence_level: 0.95,
            ema_alpha: 0.2,
            history_lookback_days: 365,
        }
    }
}

impl VelocityConfig {
    pub fn default_window(&self) -> WindowSpec {
        WindowSpec::Trailing {
            days: self.default_window_days,
        }
    }

    fn validate(&self) -> Result<()> {
        self.default_window().validate()?;
        if self.min_samples == 0 {
            return Err(invalid("velocity.min_samples must be at least 1"));
        }
        if !(self.min_span_days.is_finite() && self.min_span_days >= 0.0) {
            return Err(invalid("velocity.min_span_days must be non-negative"));
        }
        if self.normal_min_samples < 2 {
            return Err(invalid("velocity.normal_min_samples must be at least 2"));
        }
        if !(self.heuristic_multiplier.is_finite() && self.heuristic_multiplier >= 1.0) {
            return Err(invalid("velocity.heuristic_multiplier must be >= 1"));
        }
        check_level("velocity.confidence_level", self.confidence_level)?;
        if !(self.ema_alpha > 0.0 && self.ema_alpha <= 1.0) {
            return Err(invalid("velocity.ema_alpha must be inside (0, 1]"));
        }
        if self.history_lookback_days == 0 {
            return Err(invalid("velocity.history_lookback_days must be positive"));
        }
        Ok(())
    }
}

/// Weights of the four prediction factors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FactorWeights {
    pub historical: f64,
    pub class_velocity: f64,
    pub engagement: f64,
    pub complexity: f64,
}

impl Default for FactorWeights {
    fn default() -> Self {
        Self {
            historical: 1.0,
            class_velocity: 0.25,
            engagement: 0.3,
            complexity: 0.2,
        }
    }
}

/// Completion prediction model parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PredictionConfig {
    /// Prior completion time before any factor adjusts it.
    pub baseline_hours: f64,
    /// Completion samples needed before history is trusted.
    pub min_history_samples: usize,
    pub min_predicted_hours: f64,
    /// Completion durations outside this range are discarded as outliers.
    pub history_min_hours: f64,
    pub history_max_hours: f64,
    /// Class XP per day considered typical.
    pub reference_class_velocity: f64,
    /// Effort units of a typical assignment.
    pub reference_complexity_units: f64,
    /// Days of inactivity after which recency stops mattering more.
    pub recency_horizon_days: f64,
    /// Window over which engagement frequency is measured.
    pub engagement_window_days: u32,
    /// Spread as a fraction of the baseline when history is too thin.
    pub heuristic_spread: f64,
    /// Spread widening applied to low-signal predictions.
    pub low_signal_spread_multiplier: f64,
    pub confidence_level: f64,
    /// Assignments older than this are flagged as aging.
    pub aging_days: u32,
    pub weights: FactorWeights,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            baseline_hours: 24.0,
            min_history_samples: 5,
            min_predicted_hours: 0.5,
            history_min_hours: 0.1,
            history_max_hours: 48.0,
            reference_class_velocity: 50.0,
            reference_complexity_units: 3.0,
            recency_horizon_days: 7.0,
            engagement_window_days: 14,
            heuristic_spread: 0.5,
            low_signal_spread_multiplier: 2.0,
            confidence_level: 0.9,
            aging_days: 14,
            weights: FactorWeights::default(),
        }
    }
}

impl PredictionConfig {
    pub fn engagement_window(&self) -> WindowSpec {
        WindowSpec::Trailing {
            days: self.engagement_window_days,
        }
    }

    fn validate(&self) -> Result<()> {
        check_positive("prediction.baseline_hours", self.baseline_hours)?;
        check_positive("prediction.min_predicted_hours", self.min_predicted_hours)?;
        check_positive(
            "prediction.reference_class_velocity",
            self.reference_class_velocity,
        )?;
        check_positive(
            "prediction.reference_complexity_units",
            self.reference_complexity_units,
        )?;
        check_positive("prediction.recency_horizon_days", self.recency_horizon_days)?;
        check_positive("prediction.heuristic_spread", self.heuristic_spread)?;
        check_level("prediction.confidence_level", self.confidence_level)?;
        self.engagement_window().validate()?;

        let weights = &self.weights;
        for (name, weight) in [
            ("historical", weights.historical),
            ("class_velocity", weights.class_velocity),
            ("engagement", weights.engagement),
            ("complexity", weights.complexity),
        ] {
            if !weight.is_finite() {
                return Err(invalid(format!(
                    "prediction.weights.{name} must be finite"
                )));
            }
        }
        if !(self.history_min_hours >= 0.0 && self.history_min_hours < self.history_max_hours) {
            return Err(invalid(
                "prediction.history_min_hours must be below history_max_hours",
            ));
        }
        if !(self.low_signal_spread_multiplier.is_finite()
            && self.low_signal_spread_multiplier >= 1.0)
        {
            return Err(invalid(
                "prediction.low_signal_spread_multiplier must be >= 1",
            ));
        }
        Ok(())
    }
}

/// Quick action dispatcher settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionConfig {
    /// How long a duplicate request waits for the original to finish.
    pub wait_timeout_ms: u64,
    /// Deadline for a collaborator call; exceeding it fails the action.
    pub action_timeout_ms: u64,
    /// Record log location. Defaults to the data directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_log: Option<PathBuf>,
    /// Minimum role overrides on top of the built-in policy table.
    pub policy: BTreeMap<ActionType, Role>,
}

impl Default for ActionConfig {
    fn default() -> Self {
        Self {
            wait_timeout_ms: 5_000,
            action_timeout_ms: 10_000,
            record_log: None,
            policy: BTreeMap::new(),
        }
    }
}

impl ActionConfig {
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_millis(self.action_timeout_ms)
    }

    /// Configured record log, or the default under the data directory
    pub fn record_log_path(&self) -> PathBuf {
        self.record_log
            .clone()
            .unwrap_or_else(cadence_paths::record_log_path)
    }

    fn validate(&self) -> Result<()> {
        if self.action_timeout_ms == 0 {
            return Err(invalid("actions.action_timeout_ms must be positive"));
        }
        Ok(())
    }
}
