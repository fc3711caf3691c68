//! Velocity, band and ETA result types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::EntityRef;

/// How a confidence band was derived
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BandMethod {
    /// Normal approximation over daily totals
    NormalApprox,
    /// Wilson score interval for a proportion
    Wilson,
    /// Widened rule-of-thumb band for small samples; not statistically rigorous
    Heuristic,
}

impl BandMethod {
    pub fn is_rigorous(&self) -> bool {
        !matches!(self, Self::Heuristic)
    }
}

/// Interval bracketing a point estimate
///
/// Only ever handed out inside its parent estimate.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceBand {
    pub lower: f64,
    pub upper: f64,
    pub method: BandMethod,
    pub confidence_level: f64,
}

impl ConfidenceBand {
    pub fn contains(&self, value: f64) -> bool {
        self.lower <= value && value <= self.upper
    }

    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }
}

/// Coarse trust grade shown next to an estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceGrade {
    High,
    Medium,
    Low,
    None,
}

impl ConfidenceGrade {
    /// Grade from the coefficient of variation of daily progress
    pub fn from_variation(coefficient_of_variation: f64) -> Self {
        if !coefficient_of_variation.is_finite() {
            Self::None
        } else if coefficient_of_variation < 0.3 {
            Self::High
        } else if coefficient_of_variation < 0.6 {
            Self::Medium
        } else if coefficient_of_variation < 1.0 {
            Self::Low
        } else {
            Self::None
        }
    }
}

/// Rate of progress over a window
///
/// When `low_signal` is set the rate and band are advisory and must be shown
/// as "insufficient data".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VelocityResult {
    pub rate_per_day: f64,
    pub sample_count: usize,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub low_signal: bool,
    /// Exponential moving average of daily totals
    pub ema_per_day: f64,
    pub band: ConfidenceBand,
    pub grade: ConfidenceGrade,
}

/// Velocity of one entity in a bulk query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityVelocity {
    pub entity: EntityRef,
    pub velocity: VelocityResult,
}

/// Projected time to reach a target amount
///
/// `eta = None` means no finite projection exists.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EtaProjection {
    pub eta: Option<DateTime<Utc>>,
    /// ETA at the band's upper rate
    pub earliest: Option<DateTime<Utc>>,
    /// ETA at the band's lower rate; `None` when that rate is not positive
    pub latest: Option<DateTime<Utc>>,
    /// Copied from the velocity it was projected from
    pub low_signal: bool,
}

impl EtaProjection {
    pub fn unavailable(low_signal: bool) -> Self {
        Self {
            eta: None,
            earliest: None,
            latest: None,
            low_signal,
        }
    }
}
