//! Cached values and their bookkeeping

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use super::key::{MetricKey, MetricKind};
use crate::prediction::{CompletionStats, PredictionResult};
use crate::velocity::VelocityResult;

/// Any value the cache can hold
///
/// Confidence bands travel inside their parent estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "metric", content = "value")]
pub enum ComputedMetric {
    Velocity(VelocityResult),
    Prediction(PredictionResult),
    CompletionHistory(CompletionStats),
}

impl ComputedMetric {
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Velocity(_) => MetricKind::Velocity,
            Self::Prediction(_) => MetricKind::Prediction,
            Self::CompletionHistory(_) => MetricKind::CompletionHistory,
        }
    }

    pub fn as_velocity(&self) -> Option<&VelocityResult> {
        match self {
            Self::Velocity(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_prediction(&self) -> Option<&PredictionResult> {
        match self {
            Self::Prediction(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_completion_history(&self) -> Option<&CompletionStats> {
        match self {
            Self::CompletionHistory(s) => Some(s),
            _ => None,
        }
    }
}

/// A live cache entry
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: MetricKey,
    pub value: ComputedMetric,
    pub computed_at: DateTime<Utc>,
    pub ttl: Duration,
    pub version: u64,
    expires_at: Instant,
}

impl CacheEntry {
    pub(crate) fn new(
        key: MetricKey,
        value: ComputedMetric,
        computed_at: DateTime<Utc>,
        ttl: Duration,
        version: u64,
    ) -> Self {
        Self {
            key,
            value,
            computed_at,
            ttl,
            version,
            expires_at: Instant::now() + ttl,
        }
    }

    pub fn is_expired_at(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    /// Time left before the entry expires
    pub fn remaining_ttl(&self) -> Duration {
        self.expires_at.saturating_duration_since(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prediction::CompletionStats;
    use crate::store::CompletionBucket;

    #[tokio::test(start_paused = true)]
    async fn entry_expires_after_ttl() {
        let key = MetricKey::completion_history(&CompletionBucket::new("c1", "short"));
        let entry = CacheEntry::new(
            key,
            ComputedMetric::CompletionHistory(CompletionStats::empty()),
            Utc::now(),
            Duration::from_secs(10),
            1,
        );

        assert!(!entry.is_expired_at(Instant::now()));
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(entry.is_expired_at(Instant::now()));
        assert_eq!(entry.remaining_ttl(), Duration::ZERO);
    }

    #[test]
    fn computed_metric_reports_kind() {
        let metric = ComputedMetric::CompletionHistory(CompletionStats::empty());
        assert_eq!(metric.kind(), MetricKind::CompletionHistory);
        assert!(metric.as_velocity().is_none());
        assert!(metric.as_completion_history().is_some());
    }
}
