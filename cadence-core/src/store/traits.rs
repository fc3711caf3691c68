//! Read contract for raw historical records

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::types::{EventKind, ProgressEvent, TimeRange};

/// Group of assignments whose completion times are comparable
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompletionBucket {
    pub class_id: String,
    pub complexity_bucket: String,
}

impl CompletionBucket {
    pub fn new(class_id: impl Into<String>, complexity_bucket: impl Into<String>) -> Self {
        Self {
            class_id: class_id.into(),
            complexity_bucket: complexity_bucket.into(),
        }
    }
}

impl fmt::Display for CompletionBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.class_id, self.complexity_bucket)
    }
}

/// Where a student stands on an assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    NotStarted,
    InProgress,
    Completed,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
        }
    }
}

impl fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the store knows about one student's assignment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignmentContext {
    pub assignment_id: String,
    pub class_id: String,
    pub student_id: String,
    /// Estimated effort units
    pub complexity_units: f64,
    pub complexity_bucket: String,
    pub assigned_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl AssignmentContext {
    pub fn bucket(&self) -> CompletionBucket {
        CompletionBucket::new(&self.class_id, &self.complexity_bucket)
    }

    pub fn status(&self) -> AssignmentStatus {
        match (self.started_at, self.completed_at) {
            (_, Some(_)) => AssignmentStatus::Completed,
            (Some(_), None) => AssignmentStatus::InProgress,
            (None, None) => AssignmentStatus::NotStarted,
        }
    }

    /// Past its due date and not completed
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.completed_at.is_none() && self.due_at.is_some_and(|due| due < now)
    }

    /// Time from start (or assignment, if never started) to completion
    pub fn completion_time(&self) -> Option<Duration> {
        let completed = self.completed_at?;
        (completed - self.started_at.unwrap_or(self.assigned_at))
            .to_std()
            .ok()
    }
}

/// Read-only access to historical learning records
///
/// Implementations must return events ordered by timestamp.
#[async_trait]
pub trait MetricStore: Send + Sync {
    /// Progress events for one entity inside a time range
    async fn query_events(
        &self,
        entity_id: &str,
        kind: EventKind,
        range: TimeRange,
    ) -> Result<Vec<ProgressEvent>, StoreError>;

    /// Completion durations of finished assignments in a bucket
    async fn query_completion_history(
        &self,
        bucket: &CompletionBucket,
    ) -> Result<Vec<Duration>, StoreError>;

    /// Assignment details for a student, `None` if unknown
    async fn query_assignment(
        &self,
        assignment_id: &str,
        student_id: &str,
    ) -> Result<Option<AssignmentContext>, StoreError>;

    /// Every student assignment in a class, ordered by assignment then student
    async fn query_class_assignments(
        &self,
        class_id: &str,
    ) -> Result<Vec<AssignmentContext>, StoreError>;
}
