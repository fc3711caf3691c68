//! In-memory MetricStore implementation
//!
//! Backs tests and the CLI's fixture mode. Supports simulated outages and
//! latency so callers can exercise timeout and retry paths.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::traits::{AssignmentContext, CompletionBucket, MetricStore};
use crate::error::StoreError;
use crate::types::{EventKind, ProgressEvent, TimeRange};

/// Serializable snapshot used to seed a [`MemoryMetricStore`]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreFixture {
    pub events: Vec<FixtureEvent>,
    pub completion_history: Vec<FixtureHistory>,
    pub assignments: Vec<AssignmentContext>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureEvent {
    pub entity_id: String,
    #[serde(default = "default_event_kind")]
    pub kind: EventKind,
    pub at: DateTime<Utc>,
    pub magnitude: f64,
}

fn default_event_kind() -> EventKind {
    EventKind::XpGain
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixtureHistory {
    pub class_id: String,
    pub complexity_bucket: String,
    pub hours: Vec<f64>,
}

/// Thread-safe in-memory store of learning records
#[derive(Default)]
pub struct MemoryMetricStore {
    events: RwLock<HashMap<(String, EventKind), Vec<ProgressEvent>>>,
    history: RwLock<HashMap<CompletionBucket, Vec<Duration>>>,
    assignments: RwLock<HashMap<(String, String), AssignmentContext>>,
    unavailable: AtomicBool,
    latency_ms: AtomicU64,
    queries: AtomicU64,
}

impl MemoryMetricStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from a fixture snapshot
    pub async fn from_fixture(fixture: StoreFixture) -> Self {
        let store = Self::new();
        for event in fixture.events {
            store
                .add_event(
                    &event.entity_id,
                    event.kind,
                    ProgressEvent::new(event.at, event.magnitude),
                )
                .await;
        }
        for history in fixture.completion_history {
            let bucket = CompletionBucket::new(history.class_id, history.complexity_bucket);
            let durations = history
                .hours
                .iter()
                .filter(|h| h.is_finite() && **h >= 0.0)
                .map(|h| Duration::from_secs_f64(h * 3600.0))
                .collect();
            store.set_completion_history(bucket, durations).await;
        }
        for assignment in fixture.assignments {
            store.put_assignment(assignment).await;
        }
        store
    }

    /// Record an event, keeping the per-entity list ordered by time
    pub async fn add_event(&self, entity_id: &str, kind: EventKind, event: ProgressEvent) {
        let mut events = self.events.write().await;
        let list = events.entry((entity_id.to_string(), kind)).or_default();
        let pos = list.partition_point(|e| e.at <= event.at);
        list.insert(pos, event);
    }

    pub async fn set_completion_history(&self, bucket: CompletionBucket, durations: Vec<Duration>) {
        self.history.write().await.insert(bucket, durations);
    }

    pub async fn put_assignment(&self, assignment: AssignmentContext) {
        let key = (
            assignment.assignment_id.clone(),
            assignment.student_id.clone(),
        );
        self.assignments.write().await.insert(key, assignment);
    }

    /// Simulate an outage: every query fails with `StoreError::Unavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Add artificial latency to every query
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Number of queries served so far
    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::SeqCst)
    }

    async fn before_query(&self) -> Result<(), StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(
                "memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl MetricStore for MemoryMetricStore {
    async fn query_events(
        &self,
        entity_id: &str,
        kind: EventKind,
        range: TimeRange,
    ) -> Result<Vec<ProgressEvent>, StoreError> {
        self.before_query().await?;
        if range.start.is_some_and(|start| start > range.end) {
            return Err(StoreError::InvalidQuery(format!(
                "time range starts after it ends: {:?}",
                range
            )));
        }

        let events = self.events.read().await;
        Ok(events
            .get(&(entity_id.to_string(), kind))
            .map(|list| {
                list.iter()
                    .filter(|e| range.contains(e.at))
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn query_completion_history(
        &self,
        bucket: &CompletionBucket,
    ) -> Result<Vec<Duration>, StoreError> {
        self.before_query().await?;
        Ok(self
            .history
            .read()
            .await
            .get(bucket)
            .cloned()
            .unwrap_or_default())
    }

    async fn query_assignment(
        &self,
        assignment_id: &str,
        student_id: &str,
    ) -> Result<Option<AssignmentContext>, StoreError> {
        self.before_query().await?;
        Ok(self
            .assignments
            .read()
            .await
            .get(&(assignment_id.to_string(), student_id.to_string()))
            .cloned())
    }

    async fn query_class_assignments(
        &self,
        class_id: &str,
    ) -> Result<Vec<AssignmentContext>, StoreError> {
        self.before_query().await?;
        let assignments = self.assignments.read().await;
        let mut found: Vec<AssignmentContext> = assignments
            .values()
            .filter(|a| a.class_id == class_id)
            .cloned()
            .collect();
        found.sort_by(|a, b| {
            a.assignment_id
                .cmp(&b.assignment_id)
                .then_with(|| a.student_id.cmp(&b.student_id))
        });
        Ok(found)
    }
}
