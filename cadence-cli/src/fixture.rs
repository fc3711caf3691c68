//! Offline evaluation against a JSON snapshot of learning records

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use cadence_core::{
    Collaborators, CoreConfig, ManualClock, MemoryCollaborators, MemoryMetricStore,
    MemoryRecordLog, MetricsCore, StoreFixture,
};
use chrono::{DateTime, Utc};
use tracing::debug;

pub fn read(path: &Path) -> Result<StoreFixture> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read fixture {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("Failed to parse fixture {}", path.display()))
}

/// A metrics core over the fixture, frozen at `now`
///
/// Quick actions run against in-memory collaborators and are not persisted.
pub async fn open(path: &Path, config: CoreConfig, now: Option<DateTime<Utc>>) -> Result<MetricsCore> {
    let fixture = read(path)?;
    debug!(
        events = fixture.events.len(),
        assignments = fixture.assignments.len(),
        "Loaded fixture"
    );
    let store = MemoryMetricStore::from_fixture(fixture).await;
    let core = MetricsCore::init(
        config,
        Arc::new(store),
        Collaborators::shared(Arc::new(MemoryCollaborators::new())),
        Arc::new(MemoryRecordLog::new()),
        Arc::new(ManualClock::new(now.unwrap_or_else(Utc::now))),
    )
    .await?;
    Ok(core)
}
