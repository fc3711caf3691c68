//! Velocity and confidence engine.
//!
//! Rates are duration-normalised: total progress divided by the observed
//! span in days, so idle days pull the rate down. Bands come from daily
//! totals across that span, with empty days counted as zero.

use chrono::{DateTime, Duration, Utc};

use super::types::{BandMethod, ConfidenceBand, ConfidenceGrade, EtaProjection, VelocityResult};
use crate::cache::WindowSpec;
use crate::config::VelocityConfig;
use crate::error::{CoreError, Result};
use crate::stats;
use crate::types::ProgressEvent;

const MS_PER_DAY: f64 = 86_400_000.0;

/// Rates never divide by less than one day.
const MIN_RATE_SPAN_DAYS: f64 = 1.0;

fn days_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    (end - start).num_milliseconds() as f64 / MS_PER_DAY
}

fn add_days(at: DateTime<Utc>, days: f64) -> Option<DateTime<Utc>> {
    if !days.is_finite() || days < 0.0 {
        return None;
    }
    let millis = days * MS_PER_DAY;
    if millis > i64::MAX as f64 {
        return None;
    }
    at.checked_add_signed(Duration::try_milliseconds(millis as i64)?)
}

/// Computes [`VelocityResult`]s from ordered progress events
#[derive(Debug, Clone)]
pub struct VelocityEngine {
    config: VelocityConfig,
    z: f64,
}

impl VelocityEngine {
    pub fn new(config: VelocityConfig) -> Result<Self> {
        let z = stats::two_sided_z(config.confidence_level).ok_or_else(|| {
            CoreError::InvalidConfiguration(format!(
                "velocity.confidence_level must be inside (0, 1), got {}",
                config.confidence_level
            ))
        })?;
        Ok(Self { config, z })
    }

    pub fn config(&self) -> &VelocityConfig {
        &self.config
    }

    /// Estimate velocity over `window` ending at `now`.
    ///
    /// `history` should hold every event the caller has for the entity, not
    /// just the window: low-signal estimates fall back to the full history.
    /// Events after `now` are ignored.
    pub fn estimate(
        &self,
        history: &[ProgressEvent],
        window: WindowSpec,
        now: DateTime<Utc>,
    ) -> VelocityResult {
        let history: Vec<&ProgressEvent> = history.iter().filter(|e| e.at <= now).collect();
        let first_ever = history.iter().map(|e| e.at).min();

        let window_start = window.start(now).or(first_ever).unwrap_or(now);
        let observed_start = first_ever.map_or(window_start, |first| first.max(window_start));
        let in_window: Vec<&ProgressEvent> = history
            .iter()
            .copied()
            .filter(|e| e.at >= window_start)
            .collect();
        let sample_count = in_window.len();
        let observed_span = days_between(observed_start, now);

        if sample_count == 0 {
            return VelocityResult {
                rate_per_day: 0.0,
                sample_count: 0,
                window_start,
                window_end: now,
                low_signal: true,
                ema_per_day: 0.0,
                band: self.heuristic_band(0.0, None),
                grade: ConfidenceGrade::None,
            };
        }

        let low_signal =
            sample_count < self.config.min_samples || observed_span < self.config.min_span_days;

        // Low-signal estimates use everything available rather than nothing.
        let (basis, basis_start) = match (low_signal, first_ever) {
            (true, Some(first)) => (history.as_slice(), first),
            _ => (in_window.as_slice(), observed_start),
        };
        let basis_span = days_between(basis_start, now).max(MIN_RATE_SPAN_DAYS);
        let total: f64 = basis.iter().map(|e| e.magnitude).sum();
        let rate = total / basis_span;

        let daily = daily_totals(basis, basis_start, now);
        let daily_sd = stats::sample_std_dev(&daily);
        let standard_error = daily_sd.map(|sd| sd / (daily.len() as f64).sqrt());

        let band = if !low_signal && sample_count >= self.config.normal_min_samples {
            match standard_error {
                Some(se) => ConfidenceBand {
                    lower: rate - self.z * se,
                    upper: rate + self.z * se,
                    method: BandMethod::NormalApprox,
                    confidence_level: self.config.confidence_level,
                },
                None => self.heuristic_band(rate, None),
            }
        } else {
            self.heuristic_band(rate, standard_error)
        };

        let grade = match (low_signal, daily_sd) {
            (false, Some(sd)) if rate > 0.0 => ConfidenceGrade::from_variation(sd / rate),
            _ => ConfidenceGrade::None,
        };

        VelocityResult {
            rate_per_day: rate,
            sample_count,
            window_start,
            window_end: now,
            low_signal,
            ema_per_day: self.ema(&daily_totals(&in_window, observed_start, now)),
            band,
            grade,
        }
    }

    /// Project when `remaining` more progress will be reached.
    ///
    /// A non-positive rate can never produce a finite ETA, whatever the band
    /// says. A target that is already met projects to `now`.
    pub fn project_eta(
        &self,
        velocity: &VelocityResult,
        remaining: f64,
        now: DateTime<Utc>,
    ) -> EtaProjection {
        let rate = velocity.rate_per_day;
        if rate.is_nan() || rate <= 0.0 || !remaining.is_finite() {
            return EtaProjection::unavailable(velocity.low_signal);
        }
        if remaining <= 0.0 {
            return EtaProjection {
                eta: Some(now),
                earliest: Some(now),
                latest: Some(now),
                low_signal: velocity.low_signal,
            };
        }

        let at_rate = |r: f64| {
            if r > 0.0 {
                add_days(now, remaining / r)
            } else {
                None
            }
        };
        EtaProjection {
            eta: at_rate(rate),
            earliest: at_rate(velocity.band.upper.max(rate)),
            latest: at_rate(velocity.band.lower.min(rate)),
            low_signal: velocity.low_signal,
        }
    }

    fn heuristic_band(&self, rate: f64, standard_error: Option<f64>) -> ConfidenceBand {
        let spread = standard_error.map_or(0.0, |se| self.z * se).max(rate.abs());
        let half_width = self.config.heuristic_multiplier * spread;
        ConfidenceBand {
            lower: rate - half_width,
            upper: rate + half_width,
            method: BandMethod::Heuristic,
            confidence_level: self.config.confidence_level,
        }
    }

    fn ema(&self, daily: &[f64]) -> f64 {
        let alpha = self.config.ema_alpha;
        let mut values = daily.iter();
        let Some(first) = values.next() else {
            return 0.0;
        };
        values.fold(*first, |ema, x| alpha * x + (1.0 - alpha) * ema)
    }
}

/// Sum events into one bucket per day from `start` to `now`
fn daily_totals(events: &[&ProgressEvent], start: DateTime<Utc>, now: DateTime<Utc>) -> Vec<f64> {
    let span = days_between(start, now).max(MIN_RATE_SPAN_DAYS);
    let buckets = span.ceil() as usize;
    let mut totals = vec![0.0; buckets];
    for event in events {
        let index = days_between(start, event.at).floor().max(0.0) as usize;
        totals[index.min(buckets - 1)] += event.magnitude;
    }
    totals
}
