//! Weighted multi-factor completion prediction.
//!
//! Every factor is expressed in hours relative to the configured baseline so
//! the contributions in a [`PredictionResult`] add up to the distance between
//! the baseline and the prediction (before the lower floor is applied).

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::types::{
    CompletionStats, EngagementSignal, PredictionFactor, PredictionResult, RiskFlag,
};
use crate::config::PredictionConfig;
use crate::error::{CoreError, Result};
use crate::stats;
use crate::store::AssignmentContext;
use crate::velocity::{BandMethod, ConfidenceBand, ConfidenceGrade, VelocityResult};

const MS_PER_HOUR: f64 = 3_600_000.0;

/// Spread never collapses below this many hours
const MIN_SPREAD_HOURS: f64 = 0.25;

/// Below this share of active days a student counts as disengaged
const LOW_ENGAGEMENT_RATIO: f64 = 0.2;

fn hours_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds() as f64 / MS_PER_HOUR
}

/// Everything the model looks at for one prediction
#[derive(Debug, Clone, Copy)]
pub struct PredictionInput<'a> {
    pub assignment: &'a AssignmentContext,
    pub history: &'a CompletionStats,
    pub class_velocity: &'a VelocityResult,
    pub engagement: &'a EngagementSignal,
}

pub struct PredictionEngine {
    config: PredictionConfig,
    z: f64,
}

impl PredictionEngine {
    pub fn new(config: PredictionConfig) -> Result<Self> {
        let z = stats::two_sided_z(config.confidence_level).ok_or_else(|| {
            CoreError::InvalidConfiguration(format!(
                "prediction.confidence_level must be inside (0, 1), got {}",
                config.confidence_level
            ))
        })?;
        Ok(Self { config, z })
    }

    pub fn config(&self) -> &PredictionConfig {
        &self.config
    }

    /// Summarise raw durations with the configured outlier bounds
    pub fn completion_stats(&self, durations: &[Duration]) -> CompletionStats {
        CompletionStats::from_durations(
            durations,
            self.config.history_min_hours,
            self.config.history_max_hours,
        )
    }

    pub fn predict(&self, input: PredictionInput<'_>, now: DateTime<Utc>) -> PredictionResult {
        let config = &self.config;
        let PredictionInput {
            assignment,
            history,
            class_velocity,
            engagement,
        } = input;
        let baseline = config.baseline_hours;

        let factors = self.factors(input);
        let predicted_hours = (baseline + factors.values().sum::<f64>()).max(config.min_predicted_hours);

        let low_signal = history.sample_size < config.min_history_samples
            || class_velocity.low_signal
            || !engagement.has_activity();

        let can_predict = history.sample_size > 0 || engagement.has_activity();
        let eta = if can_predict {
            let start = assignment.started_at.unwrap_or(now);
            let millis = (predicted_hours * MS_PER_HOUR) as i64;
            chrono::Duration::try_milliseconds(millis)
                .and_then(|d| start.checked_add_signed(d))
                .map(|at| at.max(now))
        } else {
            None
        };

        let mut spread = match history.std_dev_hours {
            Some(sd) if history.sample_size >= 2 => sd,
            _ => baseline * config.heuristic_spread,
        };
        if low_signal {
            spread *= config.low_signal_spread_multiplier;
        }
        let spread = spread.max(MIN_SPREAD_HOURS);

        let completion_band = ConfidenceBand {
            lower: (predicted_hours - self.z * spread).max(0.0),
            upper: predicted_hours + self.z * spread,
            method: if low_signal || history.sample_size < 2 {
                BandMethod::Heuristic
            } else {
                BandMethod::NormalApprox
            },
            confidence_level: config.confidence_level,
        };

        let probability_on_time = match (assignment.due_at, eta) {
            (None, _) => 1.0,
            (Some(due), None) => {
                if now > due {
                    0.0
                } else {
                    0.5
                }
            }
            (Some(due), Some(eta)) => stats::normal_cdf(hours_between(eta, due) / spread),
        };
        let (lower, upper) =
            stats::wilson_interval(probability_on_time, history.sample_size, self.z);
        let probability_band = ConfidenceBand {
            lower,
            upper,
            method: BandMethod::Wilson,
            confidence_level: config.confidence_level,
        };

        let confidence = if low_signal || history.sample_size < 3 {
            ConfidenceGrade::Low
        } else if history.sample_size >= 10 {
            ConfidenceGrade::High
        } else {
            ConfidenceGrade::Medium
        };

        let mut risk_flags = Vec::new();
        // An ETA clamped to now means the estimate says the work is done
        let predicted_done = eta.is_some_and(|at| at <= now);
        if !predicted_done
            && hours_between(assignment.assigned_at, now) > f64::from(config.aging_days) * 24.0
        {
            risk_flags.push(RiskFlag::AssignmentAging);
        }
        if assignment.due_at.is_some_and(|due| due < now) {
            risk_flags.push(RiskFlag::PastDueDate);
        }
        if self.is_disengaged(engagement) {
            risk_flags.push(RiskFlag::LowEngagement);
        }
        if probability_on_time < 0.5 {
            risk_flags.push(RiskFlag::LowProbability);
        }

        PredictionResult {
            assignment_id: assignment.assignment_id.clone(),
            student_id: assignment.student_id.clone(),
            eta,
            probability_on_time,
            probability_band,
            factors,
            baseline_hours: baseline,
            predicted_hours,
            completion_band,
            based_on_samples: history.sample_size,
            confidence,
            risk_flags,
            low_signal,
        }
    }

    fn factors(&self, input: PredictionInput<'_>) -> BTreeMap<PredictionFactor, f64> {
        let config = &self.config;
        let weights = &config.weights;
        let baseline = config.baseline_hours;

        let historical = input
            .history
            .median_hours
            .map_or(0.0, |median| median - baseline);

        let reference_rate = config.reference_class_velocity;
        let class_velocity = ((reference_rate - input.class_velocity.rate_per_day)
            / reference_rate)
            .clamp(-1.0, 1.0)
            * baseline;

        let recency = input
            .engagement
            .days_since_last_activity
            .map_or(1.0, |days| (days / config.recency_horizon_days).min(1.0));
        let engagement = (recency - input.engagement.active_ratio()) * baseline;

        let reference_units = config.reference_complexity_units;
        let complexity =
            (input.assignment.complexity_units - reference_units) / reference_units * baseline;

        BTreeMap::from([
            (PredictionFactor::HistoricalCompletion, weights.historical * historical),
            (PredictionFactor::ClassVelocity, weights.class_velocity * class_velocity),
            (PredictionFactor::Engagement, weights.engagement * engagement),
            (PredictionFactor::Complexity, weights.complexity * complexity),
        ])
    }

    fn is_disengaged(&self, engagement: &EngagementSignal) -> bool {
        match engagement.days_since_last_activity {
            None => true,
            Some(days) => {
                days >= self.config.recency_horizon_days
                    || engagement.active_ratio() < LOW_ENGAGEMENT_RATIO
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration as ChronoDuration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 10, 9, 0, 0).unwrap()
    }

    fn engine() -> PredictionEngine {
        PredictionEngine::new(PredictionConfig::default()).unwrap()
    }

    fn assignment(due_in_hours: Option<i64>) -> AssignmentContext {
        AssignmentContext {
            assignment_id: "a1".to_string(),
            class_id: "c1".to_string(),
            student_id: "s1".to_string(),
            complexity_units: 3.0,
            complexity_bucket: "medium".to_string(),
            assigned_at: now() - ChronoDuration::days(2),
            started_at: None,
            due_at: due_in_hours.map(|h| now() + ChronoDuration::hours(h)),
            completed_at: None,
        }
    }

    fn class_velocity(rate: f64, low_signal: bool) -> VelocityResult {
        VelocityResult {
            rate_per_day: rate,
            sample_count: 40,
            window_start: now() - ChronoDuration::days(14),
            window_end: now(),
            low_signal,
            ema_per_day: rate,
            band: ConfidenceBand {
                lower: rate * 0.9,
                upper: rate * 1.1,
                method: BandMethod::NormalApprox,
                confidence_level: 0.95,
            },
            grade: ConfidenceGrade::High,
        }
    }

    fn engaged() -> EngagementSignal {
        EngagementSignal {
            active_days: 7,
            window_days: 14,
            days_since_last_activity: Some(0.0),
        }
    }

    fn idle() -> EngagementSignal {
        EngagementSignal {
            active_days: 0,
            window_days: 14,
            days_since_last_activity: None,
        }
    }

    fn history(hours: &[f64]) -> CompletionStats {
        let durations: Vec<Duration> = hours
            .iter()
            .map(|h| Duration::from_secs_f64(h * 3600.0))
            .collect();
        engine().completion_stats(&durations)
    }

    #[test]
    fn factors_add_up_to_the_prediction() {
        let engine = engine();
        let history = history(&[10.0, 12.0, 14.0, 16.0, 18.0]);
        let velocity = class_velocity(50.0, false);
        let engagement = engaged();
        let assignment = assignment(Some(48));

        let result = engine.predict(
            PredictionInput {
                assignment: &assignment,
                history: &history,
                class_velocity: &velocity,
                engagement: &engagement,
            },
            now(),
        );

        let historical = result.factors[&PredictionFactor::HistoricalCompletion];
        assert!((historical - -10.0).abs() < 1e-9);
        assert!(result.factors[&PredictionFactor::ClassVelocity].abs() < 1e-9);
        assert!((result.factors[&PredictionFactor::Engagement] - -3.6).abs() < 1e-9);
        assert!(result.factors[&PredictionFactor::Complexity].abs() < 1e-9);

        assert!((result.predicted_hours - 10.4).abs() < 1e-9);
        assert!(
            (result.baseline_hours + result.total_adjustment_hours() - result.predicted_hours)
                .abs()
                < 1e-9
        );
        assert!(!result.low_signal);
        assert_eq!(result.confidence, ConfidenceGrade::Medium);
        assert_eq!(result.based_on_samples, 5);
    }

    #[test]
    fn nothing_to_go_on_cannot_predict() {
        let engine = engine();
        let history = CompletionStats::empty();
        let velocity = class_velocity(50.0, false);
        let engagement = idle();

        let upcoming = assignment(Some(24));
        let result = engine.predict(
            PredictionInput {
                assignment: &upcoming,
                history: &history,
                class_velocity: &velocity,
                engagement: &engagement,
            },
            now(),
        );
        assert!(result.eta.is_none());
        assert_eq!(result.probability_on_time, 0.5);
        assert!(result.low_signal);
        assert_eq!(result.confidence, ConfidenceGrade::Low);
        assert_eq!(result.probability_band.lower, 0.0);
        assert_eq!(result.probability_band.upper, 1.0);

        let overdue = assignment(Some(-2));
        let result = engine.predict(
            PredictionInput {
                assignment: &overdue,
                history: &history,
                class_velocity: &velocity,
                engagement: &engagement,
            },
            now(),
        );
        assert_eq!(result.probability_on_time, 0.0);
        assert!(result.has_risk(RiskFlag::PastDueDate));
        assert!(result.has_risk(RiskFlag::LowProbability));
    }

    #[test]
    fn no_deadline_is_always_on_time() {
        let engine = engine();
        let history = history(&[5.0, 6.0, 7.0]);
        let velocity = class_velocity(50.0, false);
        let engagement = engaged();
        let open_ended = assignment(None);

        let result = engine.predict(
            PredictionInput {
                assignment: &open_ended,
                history: &history,
                class_velocity: &velocity,
                engagement: &engagement,
            },
            now(),
        );
        assert_eq!(result.probability_on_time, 1.0);
        assert!(!result.has_risk(RiskFlag::LowProbability));
        assert!(result.eta.is_some());
    }

    #[test]
    fn wider_spread_regresses_toward_even_odds() {
        let engine = engine();
        let velocity = class_velocity(50.0, false);
        let engagement = engaged();
        let assignment = assignment(Some(20));

        let tight = history(&[10.0, 10.5, 11.0, 11.5, 12.0, 11.0]);
        let loose = history(&[2.0, 6.0, 11.0, 16.0, 20.0, 11.0]);
        let predict = |history: &CompletionStats| {
            engine.predict(
                PredictionInput {
                    assignment: &assignment,
                    history,
                    class_velocity: &velocity,
                    engagement: &engagement,
                },
                now(),
            )
        };

        let tight = predict(&tight);
        let loose = predict(&loose);
        assert!(tight.probability_on_time > 0.5);
        assert!(loose.probability_on_time > 0.5);
        assert!(loose.probability_on_time < tight.probability_on_time);
        assert!(loose.completion_band.width() > tight.completion_band.width());
    }

    #[test]
    fn slow_class_and_idle_student_push_eta_out() {
        let engine = engine();
        let history = history(&[10.0, 12.0, 14.0, 16.0, 18.0]);
        let assignment = assignment(Some(48));

        let fast = class_velocity(50.0, false);
        let slow = class_velocity(10.0, false);
        let active = engaged();
        let stale = EngagementSignal {
            active_days: 1,
            window_days: 14,
            days_since_last_activity: Some(9.0),
        };

        let baseline = engine.predict(
            PredictionInput {
                assignment: &assignment,
                history: &history,
                class_velocity: &fast,
                engagement: &active,
            },
            now(),
        );
        let worse = engine.predict(
            PredictionInput {
                assignment: &assignment,
                history: &history,
                class_velocity: &slow,
                engagement: &stale,
            },
            now(),
        );

        assert!(worse.predicted_hours > baseline.predicted_hours);
        assert!(worse.eta > baseline.eta);
        assert!(worse.factors[&PredictionFactor::ClassVelocity] > 0.0);
        assert!(worse.has_risk(RiskFlag::LowEngagement));
        assert!(!baseline.has_risk(RiskFlag::LowEngagement));
    }

    #[test]
    fn prediction_is_floored() {
        let engine = engine();
        let history = history(&[0.2, 0.2, 0.3, 0.2, 0.2]);
        let velocity = class_velocity(200.0, false);
        let engagement = EngagementSignal {
            active_days: 14,
            window_days: 14,
            days_since_last_activity: Some(0.0),
        };
        let mut easy = assignment(Some(48));
        easy.complexity_units = 0.5;

        let result = engine.predict(
            PredictionInput {
                assignment: &easy,
                history: &history,
                class_velocity: &velocity,
                engagement: &engagement,
            },
            now(),
        );
        assert_eq!(result.predicted_hours, engine.config().min_predicted_hours);
        assert!(result.completion_band.lower >= 0.0);
    }

    #[test]
    fn eta_never_precedes_now() {
        let engine = engine();
        let history = history(&[2.0, 3.0, 4.0, 3.0, 2.5]);
        let velocity = class_velocity(50.0, false);
        let engagement = engaged();
        let mut started = assignment(Some(48));
        started.started_at = Some(now() - ChronoDuration::days(3));

        let result = engine.predict(
            PredictionInput {
                assignment: &started,
                history: &history,
                class_velocity: &velocity,
                engagement: &engagement,
            },
            now(),
        );
        assert_eq!(result.eta, Some(now()));
    }

    #[test]
    fn old_assignment_predicted_done_is_not_aging() {
        let engine = engine();
        let history = history(&[2.0, 3.0, 4.0, 3.0, 2.5]);
        let velocity = class_velocity(50.0, false);
        let engagement = engaged();
        let mut old = assignment(None);
        old.assigned_at = now() - ChronoDuration::days(20);
        old.started_at = Some(now() - ChronoDuration::days(19));

        let done = engine.predict(
            PredictionInput {
                assignment: &old,
                history: &history,
                class_velocity: &velocity,
                engagement: &engagement,
            },
            now(),
        );
        assert_eq!(done.eta, Some(now()));
        assert!(!done.has_risk(RiskFlag::AssignmentAging));

        old.started_at = None;
        let unstarted = engine.predict(
            PredictionInput {
                assignment: &old,
                history: &history,
                class_velocity: &velocity,
                engagement: &engagement,
            },
            now(),
        );
        assert!(unstarted.eta.is_some_and(|at| at > now()));
        assert!(unstarted.has_risk(RiskFlag::AssignmentAging));
    }

    #[test]
    fn low_signal_class_velocity_marks_prediction() {
        let engine = engine();
        let history = history(&[10.0, 12.0, 14.0, 16.0, 18.0, 11.0, 13.0, 15.0, 17.0, 12.0]);
        let velocity = class_velocity(50.0, true);
        let engagement = engaged();
        let mut old = assignment(Some(48));
        old.assigned_at = now() - ChronoDuration::days(20);

        let result = engine.predict(
            PredictionInput {
                assignment: &old,
                history: &history,
                class_velocity: &velocity,
                engagement: &engagement,
            },
            now(),
        );
        assert!(result.low_signal);
        assert_eq!(result.confidence, ConfidenceGrade::Low);
        assert_eq!(result.completion_band.method, BandMethod::Heuristic);
        assert!(result.has_risk(RiskFlag::AssignmentAging));
        assert!(result.probability_band.contains(result.probability_on_time));
    }
}
