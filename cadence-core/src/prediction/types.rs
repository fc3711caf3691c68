//! Prediction inputs and results

use std::collections::{BTreeMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::ProgressEvent;
use crate::velocity::{ConfidenceBand, ConfidenceGrade};

const SECS_PER_HOUR: f64 = 3600.0;
const MS_PER_DAY: f64 = 86_400_000.0;

/// One of the adjustments applied to the baseline completion time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionFactor {
    HistoricalCompletion,
    ClassVelocity,
    Engagement,
    Complexity,
}

impl PredictionFactor {
    pub const ALL: [PredictionFactor; 4] = [
        Self::HistoricalCompletion,
        Self::ClassVelocity,
        Self::Engagement,
        Self::Complexity,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HistoricalCompletion => "historical_completion",
            Self::ClassVelocity => "class_velocity",
            Self::Engagement => "engagement",
            Self::Complexity => "complexity",
        }
    }
}

/// Condition worth surfacing to a teacher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskFlag {
    /// Assigned long ago and still open
    AssignmentAging,
    PastDueDate,
    LowEngagement,
    /// Less likely than not to finish on time
    LowProbability,
}

/// Summary of historical completion durations for one bucket
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionStats {
    pub median_hours: Option<f64>,
    pub p80_hours: Option<f64>,
    pub std_dev_hours: Option<f64>,
    pub sample_size: usize,
}

impl CompletionStats {
    pub fn empty() -> Self {
        Self {
            median_hours: None,
            p80_hours: None,
            std_dev_hours: None,
            sample_size: 0,
        }
    }

    /// Summarise durations, discarding those outside `[min_hours, max_hours]`
    pub fn from_durations(durations: &[Duration], min_hours: f64, max_hours: f64) -> Self {
        let hours: Vec<f64> = durations
            .iter()
            .map(|d| d.as_secs_f64() / SECS_PER_HOUR)
            .filter(|h| (min_hours..=max_hours).contains(h))
            .collect();
        if hours.is_empty() {
            return Self::empty();
        }
        Self {
            median_hours: crate::stats::median(&hours),
            p80_hours: crate::stats::percentile_cont(&hours, 0.8),
            std_dev_hours: crate::stats::sample_std_dev(&hours),
            sample_size: hours.len(),
        }
    }
}

/// How actively a student has been working recently
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EngagementSignal {
    /// Distinct calendar days with activity inside the window
    pub active_days: u32,
    pub window_days: u32,
    /// `None` when nothing was recorded
    pub days_since_last_activity: Option<f64>,
}

impl EngagementSignal {
    /// Derive the signal from a student's events up to `now`
    pub fn from_events(events: &[ProgressEvent], window_days: u32, now: DateTime<Utc>) -> Self {
        let window_start = now - chrono::Duration::days(i64::from(window_days));
        let days: HashSet<_> = events
            .iter()
            .filter(|e| e.at >= window_start && e.at <= now)
            .map(|e| e.at.date_naive())
            .collect();
        let last = events.iter().map(|e| e.at).filter(|at| *at <= now).max();

        Self {
            active_days: (days.len() as u32).min(window_days),
            window_days,
            days_since_last_activity: last
                .map(|at| (now - at).num_milliseconds() as f64 / MS_PER_DAY),
        }
    }

    pub fn has_activity(&self) -> bool {
        self.days_since_last_activity.is_some()
    }

    /// Fraction of days in the window with activity
    pub fn active_ratio(&self) -> f64 {
        if self.window_days == 0 {
            return 0.0;
        }
        f64::from(self.active_days) / f64::from(self.window_days)
    }
}

/// Completion estimate for one student on one assignment
///
/// `eta = None` means the model cannot predict: there is no history for the
/// bucket and no activity for the student.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub assignment_id: String,
    pub student_id: String,
    pub eta: Option<DateTime<Utc>>,
    pub probability_on_time: f64,
    /// Wilson band around `probability_on_time`
    pub probability_band: ConfidenceBand,
    /// Weighted contribution of each factor in hours
    pub factors: BTreeMap<PredictionFactor, f64>,
    pub baseline_hours: f64,
    pub predicted_hours: f64,
    pub completion_band: ConfidenceBand,
    pub based_on_samples: usize,
    pub confidence: ConfidenceGrade,
    pub risk_flags: Vec<RiskFlag>,
    pub low_signal: bool,
}

impl PredictionResult {
    pub fn has_risk(&self, flag: RiskFlag) -> bool {
        self.risk_flags.contains(&flag)
    }

    /// Sum of all factor contributions
    pub fn total_adjustment_hours(&self) -> f64 {
        self.factors.values().sum()
    }
}
