//! Shared domain primitives

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Kind of entity a metric is computed for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Student,
    Class,
    School,
}

impl EntityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Class => "class",
            Self::School => "school",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "student" => Ok(Self::Student),
            "class" | "classroom" => Ok(Self::Class),
            "school" => Ok(Self::School),
            other => Err(CoreError::InvalidConfiguration(format!(
                "unknown entity type: {other}"
            ))),
        }
    }
}

/// A concrete entity: `student:s1`, `class:c7`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub entity_type: EntityType,
    pub id: String,
}

impl EntityRef {
    pub fn new(entity_type: EntityType, id: impl Into<String>) -> Self {
        Self {
            entity_type,
            id: id.into(),
        }
    }

    pub fn student(id: impl Into<String>) -> Self {
        Self::new(EntityType::Student, id)
    }

    pub fn class(id: impl Into<String>) -> Self {
        Self::new(EntityType::Class, id)
    }

    pub fn school(id: impl Into<String>) -> Self {
        Self::new(EntityType::School, id)
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.entity_type, self.id)
    }
}

impl FromStr for EntityRef {
    type Err = CoreError;

    /// Parses `type:id`, e.g. `student:s1`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s.split_once(':').ok_or_else(|| {
            CoreError::InvalidConfiguration(format!("entity must look like type:id, got '{s}'"))
        })?;
        if id.is_empty() {
            return Err(CoreError::InvalidConfiguration(format!(
                "entity id is empty in '{s}'"
            )));
        }
        Ok(Self::new(kind.parse()?, id))
    }
}

/// Kind of raw historical record held by the metric store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// Experience points gained
    XpGain,
    /// Spaced-repetition review session logged
    ReviewSession,
    /// Assignment submission
    Submission,
}

/// One timestamped progress record
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub at: DateTime<Utc>,
    pub magnitude: f64,
}

impl ProgressEvent {
    pub fn new(at: DateTime<Utc>, magnitude: f64) -> Self {
        Self { at, magnitude }
    }
}

/// Half-open time range `[start, end]`; `start = None` means unbounded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end,
        }
    }

    pub fn until(end: DateTime<Utc>) -> Self {
        Self { start: None, end }
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.start.is_none_or(|start| at >= start) && at <= self.end
    }
}
