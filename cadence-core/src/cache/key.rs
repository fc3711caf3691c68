//! Metric keys, windows and key prefixes

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::store::CompletionBucket;
use crate::types::{EntityRef, EntityType};

/// Longest trailing window accepted
pub const MAX_WINDOW_DAYS: u32 = 366;

/// Observation window for a metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum WindowSpec {
    /// The last `days` days up to now
    Trailing { days: u32 },
    /// Everything the store has
    Lifetime,
}

impl WindowSpec {
    /// Validated trailing window
    pub fn trailing(days: u32) -> Result<Self, CoreError> {
        let window = Self::Trailing { days };
        window.validate()?;
        Ok(window)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        match *self {
            Self::Trailing { days } if days == 0 || days > MAX_WINDOW_DAYS => {
                Err(CoreError::InvalidConfiguration(format!(
                    "window must be between 1 and {MAX_WINDOW_DAYS} days, got {days}"
                )))
            }
            _ => Ok(()),
        }
    }

    /// Nominal start of the window; `None` for lifetime windows
    pub fn start(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match *self {
            Self::Trailing { days } => Some(now - Duration::days(i64::from(days))),
            Self::Lifetime => None,
        }
    }
}

impl fmt::Display for WindowSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trailing { days } => write!(f, "{days}d"),
            Self::Lifetime => f.write_str("all"),
        }
    }
}

impl FromStr for WindowSpec {
    type Err = CoreError;

    /// Accepts `14d`, `14` or `all`/`lifetime`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        if s == "all" || s == "lifetime" {
            return Ok(Self::Lifetime);
        }
        let digits = s.strip_suffix('d').unwrap_or(&s);
        let days: u32 = digits.parse().map_err(|_| {
            CoreError::InvalidConfiguration(format!("malformed window spec: '{s}'"))
        })?;
        Self::trailing(days)
    }
}

/// Coarse metric family, used for TTL policy and prefixes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Velocity,
    Prediction,
    CompletionHistory,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Velocity => "velocity",
            Self::Prediction => "prediction",
            Self::CompletionHistory => "completion_history",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which metric of an entity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "name")]
pub enum MetricName {
    Velocity,
    CompletionPrediction { assignment_id: String },
    CompletionHistory { complexity_bucket: String },
}

impl MetricName {
    pub fn kind(&self) -> MetricKind {
        match self {
            Self::Velocity => MetricKind::Velocity,
            Self::CompletionPrediction { .. } => MetricKind::Prediction,
            Self::CompletionHistory { .. } => MetricKind::CompletionHistory,
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Velocity => f.write_str("velocity"),
            Self::CompletionPrediction { assignment_id } => write!(f, "prediction/{assignment_id}"),
            Self::CompletionHistory { complexity_bucket } => {
                write!(f, "completion_history/{complexity_bucket}")
            }
        }
    }
}

/// Cache index and invalidation topic: `(entity, metric, window)`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetricKey {
    entity: EntityRef,
    metric: MetricName,
    window: WindowSpec,
}

impl MetricKey {
    pub fn new(entity: EntityRef, metric: MetricName, window: WindowSpec) -> Self {
        Self {
            entity,
            metric,
            window,
        }
    }

    pub fn velocity(entity: EntityRef, window: WindowSpec) -> Self {
        Self::new(entity, MetricName::Velocity, window)
    }

    pub fn prediction(student_id: &str, assignment_id: &str, window: WindowSpec) -> Self {
        Self::new(
            EntityRef::student(student_id),
            MetricName::CompletionPrediction {
                assignment_id: assignment_id.to_string(),
            },
            window,
        )
    }

    pub fn completion_history(bucket: &CompletionBucket) -> Self {
        Self::new(
            EntityRef::class(&bucket.class_id),
            MetricName::CompletionHistory {
                complexity_bucket: bucket.complexity_bucket.clone(),
            },
            WindowSpec::Lifetime,
        )
    }

    pub fn entity(&self) -> &EntityRef {
        &self.entity
    }

    pub fn metric(&self) -> &MetricName {
        &self.metric
    }

    pub fn window(&self) -> WindowSpec {
        self.window
    }

    pub fn kind(&self) -> MetricKind {
        self.metric.kind()
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.entity, self.metric, self.window)
    }
}

/// Hierarchical prefix over metric keys
///
/// Levels are entity type, entity id, metric kind. A level can only be set
/// when every level above it is set, which the constructors enforce.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct KeyPrefix {
    entity_type: Option<EntityType>,
    entity_id: Option<String>,
    metric: Option<MetricKind>,
}

impl KeyPrefix {
    /// Matches every key
    pub fn all() -> Self {
        Self::default()
    }

    pub fn entity_type(entity_type: EntityType) -> Self {
        Self {
            entity_type: Some(entity_type),
            ..Self::default()
        }
    }

    pub fn entity(entity: &EntityRef) -> Self {
        Self {
            entity_type: Some(entity.entity_type),
            entity_id: Some(entity.id.clone()),
            metric: None,
        }
    }

    pub fn metric(entity: &EntityRef, metric: MetricKind) -> Self {
        Self {
            metric: Some(metric),
            ..Self::entity(entity)
        }
    }

    pub fn matches(&self, key: &MetricKey) -> bool {
        self.entity_type.is_none_or(|t| t == key.entity.entity_type)
            && self.entity_id.as_ref().is_none_or(|id| *id == key.entity.id)
            && self.metric.is_none_or(|m| m == key.kind())
    }

    /// Whether some key could match both prefixes
    pub fn overlaps(&self, other: &KeyPrefix) -> bool {
        fn compatible<T: PartialEq>(a: &Option<T>, b: &Option<T>) -> bool {
            match (a, b) {
                (Some(a), Some(b)) => a == b,
                _ => true,
            }
        }
        compatible(&self.entity_type, &other.entity_type)
            && compatible(&self.entity_id, &other.entity_id)
            && compatible(&self.metric, &other.metric)
    }
}

impl From<&MetricKey> for KeyPrefix {
    fn from(key: &MetricKey) -> Self {
        KeyPrefix::metric(&key.entity, key.kind())
    }
}

impl fmt::Display for KeyPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(entity_type) = self.entity_type {
            write!(f, "{entity_type}:")?;
        }
        if let Some(id) = &self.entity_id {
            write!(f, "{id}:")?;
        }
        if let Some(metric) = self.metric {
            write!(f, "{metric}:")?;
        }
        f.write_str("*")
    }
}
