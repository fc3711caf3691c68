//! cadence-core: learning-analytics metrics core
//!
//! This crate computes and serves the aggregate metrics behind teacher and
//! student dashboards:
//!
//! - **Metric cache** - [`MetricCache`] with TTL entries, versioned writes and
//!   prefix invalidation, plus [`Subscription`] streams of change events
//! - **Velocity** - [`VelocityEngine`] for progress rates, confidence bands,
//!   low-signal detection and ETA projection
//! - **Prediction** - [`PredictionEngine`] for assignment completion estimates
//!   with attributable factors and an on-time probability, plus at-risk
//!   ranking and assignment funnels per class
//! - **Quick actions** - [`Dispatcher`] for authorized, idempotent actions
//!   against the spaced-repetition subsystem
//! - **Query surface** - [`MetricsCore`] wiring all of the above to a
//!   [`MetricStore`]
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use cadence_core::{
//!     Collaborators, CoreConfig, EntityRef, MemoryCollaborators, MemoryMetricStore,
//!     MemoryRecordLog, MetricsCore, SystemClock,
//! };
//!
//! async fn example() -> cadence_core::Result<()> {
//!     let core = MetricsCore::init(
//!         CoreConfig::default(),
//!         Arc::new(MemoryMetricStore::new()),
//!         Collaborators::shared(Arc::new(MemoryCollaborators::new())),
//!         Arc::new(MemoryRecordLog::new()),
//!         Arc::new(SystemClock),
//!     )
//!     .await?;
//!
//!     let velocity = core.get_velocity(&EntityRef::student("s1"), None).await?;
//!     println!("{:.2}/day (low signal: {})", velocity.rate_per_day, velocity.low_signal);
//!
//!     core.shutdown().await
//! }
//! ```
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────── MetricsCore ────────────────────────────┐
//! │                                                                     │
//! │  get_velocity / get_prediction          dispatch_action             │
//! │          │                                    │                     │
//! │          ▼                                    ▼                     │
//! │   ┌─────────────┐  miss   ┌────────────┐  ┌────────────┐            │
//! │   │ MetricCache │───────▶│  Engines   │  │ Dispatcher │──▶ RecordLog│
//! │   └─────────────┘         └────────────┘  └────────────┘            │
//! │     │        ▲                  │               │                   │
//! │     │        └── invalidate ────┼───────────────┘                   │
//! │     ▼                           ▼                                   │
//! │  Subscriptions              MetricStore                             │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

pub mod actions;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod prediction;
pub mod service;
pub mod stats;
pub mod store;
pub mod types;
pub mod velocity;

// Re-export key types for convenience
pub use actions::{
    AccessPolicy, ActionStatus, ActionType, Collaborators, Dispatcher, JsonlRecordLog,
    MemoryCollaborators, MemoryRecordLog, QuickActionRecord, QuickActionRequest, RecordLog, Role,
    WaitMode,
};
pub use cache::{
    CacheStats, ChangeCause, Invalidated, KeyPrefix, MetricCache, MetricKey, MetricKind,
    Subscription, WindowSpec,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ActionConfig, CacheConfig, CoreConfig, PredictionConfig, VelocityConfig};
pub use error::{CollaboratorError, CoreError, Result, StoreError};
pub use prediction::{
    AtRiskStudent, ClassAssignmentMetrics, PredictionEngine, PredictionResult, RiskFlag,
};
pub use service::MetricsCore;
pub use store::{
    AssignmentContext, AssignmentStatus, CompletionBucket, MemoryMetricStore, MetricStore,
    StoreFixture,
};
pub use types::{EntityRef, EntityType, EventKind, ProgressEvent, TimeRange};
pub use velocity::{EntityVelocity, EtaProjection, VelocityEngine, VelocityResult};
