//! The metrics query surface
//!
//! [`MetricsCore`] owns the cache, the engines and the dispatcher. Reads go
//! cache first; a miss computes from the store under the configured deadline
//! and stores the result only if nothing invalidated the key meanwhile.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use futures_util::future::try_join_all;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::actions::{
    Collaborators, Dispatcher, QuickActionRecord, QuickActionRequest, RecordLog, WaitMode,
};
use crate::cache::{
    CacheStats, ComputedMetric, KeyPrefix, MetricCache, MetricKey, Subscription, WindowSpec,
};
use crate::clock::Clock;
use crate::config::CoreConfig;
use crate::error::{CoreError, Result};
use crate::prediction::{
    AtRiskStudent, ClassAssignmentMetrics, CompletionStats, EngagementSignal, PredictionEngine,
    PredictionInput, PredictionResult, rank_at_risk, summarize_class,
};
use crate::store::{AssignmentContext, CompletionBucket, MetricStore};
use crate::types::{EntityRef, EventKind, TimeRange};
use crate::velocity::{EntityVelocity, EtaProjection, VelocityEngine, VelocityResult};

/// Long-lived metrics service
pub struct MetricsCore {
    config: CoreConfig,
    store: Arc<dyn MetricStore>,
    cache: Arc<MetricCache>,
    velocity: VelocityEngine,
    prediction: PredictionEngine,
    dispatcher: Dispatcher,
    clock: Arc<dyn Clock>,
    shutdown: CancellationToken,
    maintenance: Mutex<Option<JoinHandle<()>>>,
}

impl MetricsCore {
    /// Validate configuration, load action records and start maintenance
    pub async fn init(
        config: CoreConfig,
        store: Arc<dyn MetricStore>,
        collaborators: Collaborators,
        record_log: Arc<dyn RecordLog>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;
        let velocity = VelocityEngine::new(config.velocity.clone())?;
        let prediction = PredictionEngine::new(config.prediction.clone())?;
        let cache = Arc::new(MetricCache::new(config.cache.clone(), clock.clone()));
        let dispatcher = Dispatcher::open(
            &config.actions,
            collaborators,
            record_log,
            clock.clone(),
            Some(cache.clone()),
        )
        .await?;

        let shutdown = CancellationToken::new();
        let maintenance = spawn_maintenance(
            cache.clone(),
            config.cache.sweep_interval(),
            shutdown.clone(),
        );
        info!(
            compute_timeout_ms = config.compute_timeout_ms,
            "Metrics core started"
        );

        Ok(Self {
            config,
            store,
            cache,
            velocity,
            prediction,
            dispatcher,
            clock,
            shutdown,
            maintenance: Mutex::new(Some(maintenance)),
        })
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<MetricCache> {
        &self.cache
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    // ==================== Metrics ====================

    /// Velocity over `window`, or the configured default window
    pub async fn get_velocity(
        &self,
        entity: &EntityRef,
        window: Option<WindowSpec>,
    ) -> Result<VelocityResult> {
        let window = window.unwrap_or_else(|| self.config.velocity.default_window());
        window.validate()?;
        let key = MetricKey::velocity(entity.clone(), window);

        let value = self
            .cached_or_compute(&key, async {
                self.compute_velocity(entity, window)
                    .await
                    .map(ComputedMetric::Velocity)
            })
            .await?;
        match value {
            ComputedMetric::Velocity(result) => Ok(result),
            other => Err(unexpected(&key, &other)),
        }
    }

    /// Velocity of several entities over one window
    ///
    /// Each entity goes through the cache like a single query. Duplicates are
    /// computed once; results follow the first-seen order of `entities`.
    pub async fn get_bulk_velocity(
        &self,
        entities: &[EntityRef],
        window: Option<WindowSpec>,
    ) -> Result<Vec<EntityVelocity>> {
        if let Some(window) = window {
            window.validate()?;
        }
        let mut seen = HashSet::with_capacity(entities.len());
        let unique: Vec<&EntityRef> = entities.iter().filter(|e| seen.insert(*e)).collect();

        let results = try_join_all(unique.into_iter().map(|entity| async move {
            let velocity = self.get_velocity(entity, window).await?;
            Ok::<_, CoreError>(EntityVelocity {
                entity: entity.clone(),
                velocity,
            })
        }))
        .await?;
        debug!(requested = entities.len(), computed = results.len(), "Bulk velocity");
        Ok(results)
    }

    /// Projected date for `remaining` more progress at the current velocity
    pub async fn get_eta(
        &self,
        entity: &EntityRef,
        window: Option<WindowSpec>,
        remaining: f64,
    ) -> Result<EtaProjection> {
        let velocity = self.get_velocity(entity, window).await?;
        Ok(self
            .velocity
            .project_eta(&velocity, remaining, self.clock.now()))
    }

    pub async fn get_completion_history(&self, bucket: &CompletionBucket) -> Result<CompletionStats> {
        let key = MetricKey::completion_history(bucket);
        let value = self
            .cached_or_compute(&key, async {
                let durations = self.store.query_completion_history(bucket).await?;
                Ok(ComputedMetric::CompletionHistory(
                    self.prediction.completion_stats(&durations),
                ))
            })
            .await?;
        match value {
            ComputedMetric::CompletionHistory(stats) => Ok(stats),
            other => Err(unexpected(&key, &other)),
        }
    }

    /// Completion prediction for one student's assignment
    pub async fn get_prediction(
        &self,
        assignment_id: &str,
        student_id: &str,
    ) -> Result<PredictionResult> {
        let window = self.config.prediction.engagement_window();
        let key = MetricKey::prediction(student_id, assignment_id, window);

        let value = self
            .cached_or_compute(&key, async {
                self.compute_prediction(assignment_id, student_id, window)
                    .await
                    .map(ComputedMetric::Prediction)
            })
            .await?;
        match value {
            ComputedMetric::Prediction(result) => Ok(result),
            other => Err(unexpected(&key, &other)),
        }
    }

    /// Student assignments of a class that need attention, riskiest first
    pub async fn get_at_risk_students(
        &self,
        class_id: &str,
        limit: usize,
    ) -> Result<Vec<AtRiskStudent>> {
        let assignments = self.class_assignments(class_id).await?;
        let ranked = rank_at_risk(&assignments, self.clock.now(), limit);
        debug!(
            class_id,
            scanned = assignments.len(),
            at_risk = ranked.len(),
            "Ranked at-risk students"
        );
        Ok(ranked)
    }

    /// Assignment funnel of a class: status counts, completion and risk
    pub async fn get_class_assignment_metrics(
        &self,
        class_id: &str,
    ) -> Result<ClassAssignmentMetrics> {
        let assignments = self.class_assignments(class_id).await?;
        if assignments.is_empty() {
            return Err(CoreError::NotFound(format!("assignments for class {class_id}")));
        }

        let velocity = self.get_velocity(&EntityRef::class(class_id), None).await?;
        let durations: Vec<Duration> = assignments
            .iter()
            .filter_map(AssignmentContext::completion_time)
            .collect();
        let completion = self.prediction.completion_stats(&durations);
        Ok(summarize_class(
            class_id,
            &assignments,
            completion,
            &velocity,
            self.clock.now(),
        ))
    }

    async fn class_assignments(&self, class_id: &str) -> Result<Vec<AssignmentContext>> {
        self.within_deadline(format!("assignments of class {class_id}"), async {
            Ok(self.store.query_class_assignments(class_id).await?)
        })
        .await
    }

    async fn within_deadline<T, F>(&self, what: impl fmt::Display, work: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let limit = self.config.compute_timeout();
        match tokio::time::timeout(limit, work).await {
            Ok(result) => result,
            Err(_) => {
                let elapsed_ms = limit.as_millis() as u64;
                warn!(%what, timeout_ms = elapsed_ms, "Metric computation timed out");
                Err(CoreError::ComputeTimeout {
                    what: what.to_string(),
                    elapsed_ms,
                })
            }
        }
    }

    async fn cached_or_compute<F>(&self, key: &MetricKey, compute: F) -> Result<ComputedMetric>
    where
        F: Future<Output = Result<ComputedMetric>>,
    {
        if let Some(entry) = self.cache.get(key) {
            return Ok(entry.value);
        }

        // Dropped on error, which releases the key
        let ticket = self.cache.begin(key);
        let value = self.within_deadline(key, compute).await?;

        let ttl = self.cache.ttl_for(key.kind());
        if self.cache.put_if_current(ticket, value.clone(), ttl).is_none() {
            debug!(%key, "Computed metric superseded, returning without caching");
        }
        Ok(value)
    }

    async fn compute_velocity(
        &self,
        entity: &EntityRef,
        window: WindowSpec,
    ) -> Result<VelocityResult> {
        let now = self.clock.now();
        let range = match window {
            WindowSpec::Lifetime => TimeRange::until(now),
            WindowSpec::Trailing { days } => {
                let lookback = days.max(self.config.velocity.history_lookback_days);
                TimeRange::new(now - ChronoDuration::days(i64::from(lookback)), now)
            }
        };
        let events = self
            .store
            .query_events(&entity.id, EventKind::XpGain, range)
            .await?;
        let result = self.velocity.estimate(&events, window, now);
        debug!(
            %entity,
            %window,
            rate = result.rate_per_day,
            samples = result.sample_count,
            low_signal = result.low_signal,
            "Computed velocity"
        );
        Ok(result)
    }

    async fn compute_prediction(
        &self,
        assignment_id: &str,
        student_id: &str,
        window: WindowSpec,
    ) -> Result<PredictionResult> {
        let assignment = self
            .store
            .query_assignment(assignment_id, student_id)
            .await?
            .ok_or_else(|| {
                CoreError::NotFound(format!(
                    "assignment {assignment_id} for student {student_id}"
                ))
            })?;

        let history = self.get_completion_history(&assignment.bucket()).await?;
        let class_velocity = self
            .get_velocity(&EntityRef::class(&assignment.class_id), None)
            .await?;

        let now = self.clock.now();
        let window_days = match window {
            WindowSpec::Trailing { days } => days,
            WindowSpec::Lifetime => self.config.prediction.engagement_window_days,
        };
        let range = TimeRange::new(now - ChronoDuration::days(i64::from(window_days)), now);
        let events = self
            .store
            .query_events(student_id, EventKind::XpGain, range)
            .await?;
        let engagement = EngagementSignal::from_events(&events, window_days, now);

        let result = self.prediction.predict(
            PredictionInput {
                assignment: &assignment,
                history: &history,
                class_velocity: &class_velocity,
                engagement: &engagement,
            },
            now,
        );
        debug!(
            assignment_id,
            student_id,
            predicted_hours = result.predicted_hours,
            probability = result.probability_on_time,
            low_signal = result.low_signal,
            "Computed prediction"
        );
        Ok(result)
    }

    // ==================== Quick Actions ====================

    pub async fn dispatch_action(&self, request: QuickActionRequest) -> Result<QuickActionRecord> {
        self.dispatcher.dispatch(request).await
    }

    pub async fn dispatch_action_with(
        &self,
        request: QuickActionRequest,
        mode: WaitMode,
    ) -> Result<QuickActionRecord> {
        self.dispatcher.dispatch_with(request, mode).await
    }

    /// Every known quick action record, latest state per key
    pub fn action_records(&self) -> Vec<QuickActionRecord> {
        self.dispatcher.records()
    }

    // ==================== Notifications ====================

    /// Changes to any metric of `entity`
    pub fn subscribe_metric_changes(&self, entity: &EntityRef) -> Subscription {
        self.cache.subscribe(KeyPrefix::entity(entity))
    }

    /// Underlying data for `entity` changed; drop its cached metrics
    pub fn notify_data_changed(&self, entity: &EntityRef) -> usize {
        let removed = self.cache.invalidate(&KeyPrefix::entity(entity));
        debug!(%entity, removed, "Data change notified");
        removed
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Stop maintenance, end subscriptions and flush the record log
    pub async fn shutdown(&self) -> Result<()> {
        self.shutdown.cancel();
        self.cache.shutdown();

        let handle = self
            .maintenance
            .lock()
            .ok()
            .and_then(|mut maintenance| maintenance.take());
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            warn!(error = %e, "Cache maintenance task ended abnormally");
        }

        self.dispatcher.flush().await?;
        info!("Metrics core stopped");
        Ok(())
    }
}

impl Drop for MetricsCore {
    fn drop(&mut self) {
        self.shutdown.cancel();
        self.cache.shutdown();
    }
}

fn unexpected(key: &MetricKey, value: &ComputedMetric) -> CoreError {
    CoreError::IntegrityViolation(format!(
        "cache entry {key} holds a {} metric",
        value.kind()
    ))
}

fn spawn_maintenance(
    cache: Arc<MetricCache>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately
        ticker.tick().await;
        debug!(interval_secs = interval.as_secs(), "Cache maintenance started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Cache maintenance received shutdown signal");
                    break;
                }
                _ = ticker.tick() => {
                    cache.sweep_expired();
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{
        ActionStatus, ActionType, MemoryCollaborators, MemoryRecordLog, Role,
    };
    use crate::cache::ChangeCause;
    use crate::clock::ManualClock;
    use crate::store::{AssignmentContext, MemoryMetricStore};
    use crate::types::ProgressEvent;
    use chrono::{DateTime, TimeZone, Utc};
    use tokio_stream::StreamExt;

    fn day0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 5, 1, 0, 0, 0).unwrap()
    }

    struct Fixture {
        core: MetricsCore,
        store: Arc<MemoryMetricStore>,
        collaborators: Arc<MemoryCollaborators>,
    }

    async fn fixture_with(config: CoreConfig) -> Fixture {
        let store = Arc::new(MemoryMetricStore::new());
        let collaborators = Arc::new(MemoryCollaborators::new());
        let clock = Arc::new(ManualClock::new(day0() + ChronoDuration::days(14)));
        let core = MetricsCore::init(
            config,
            store.clone(),
            Collaborators::shared(collaborators.clone()),
            Arc::new(MemoryRecordLog::new()),
            clock,
        )
        .await
        .unwrap();
        Fixture {
            core,
            store,
            collaborators,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(CoreConfig::default()).await
    }

    async fn seed_sparse_student(store: &MemoryMetricStore) {
        for day in [0, 1, 13] {
            store
                .add_event(
                    "s1",
                    EventKind::XpGain,
                    ProgressEvent::new(day0() + ChronoDuration::days(day), 10.0),
                )
                .await;
        }
    }

    // ==================== Velocity Tests ====================

    #[tokio::test]
    async fn velocity_is_computed_once_then_cached() {
        let f = fixture().await;
        seed_sparse_student(&f.store).await;
        let student = EntityRef::student("s1");

        let first = f.core.get_velocity(&student, None).await.unwrap();
        assert!(first.low_signal);
        assert!((first.rate_per_day - 30.0 / 14.0).abs() < 1e-9);

        let queries = f.store.query_count();
        let second = f.core.get_velocity(&student, None).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(f.store.query_count(), queries);
        assert_eq!(f.core.cache_stats().hits, 1);
    }

    #[tokio::test]
    async fn data_change_forces_recompute() {
        let f = fixture().await;
        seed_sparse_student(&f.store).await;
        let student = EntityRef::student("s1");

        f.core.get_velocity(&student, None).await.unwrap();
        f.store
            .add_event(
                "s1",
                EventKind::XpGain,
                ProgressEvent::new(day0() + ChronoDuration::days(13), 40.0),
            )
            .await;
        assert_eq!(f.core.notify_data_changed(&student), 1);

        let updated = f.core.get_velocity(&student, None).await.unwrap();
        assert!((updated.rate_per_day - 70.0 / 14.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn eta_is_none_without_progress() {
        let f = fixture().await;
        let eta = f
            .core
            .get_eta(&EntityRef::student("nobody"), None, 100.0)
            .await
            .unwrap();
        assert!(eta.eta.is_none());
    }

    #[tokio::test]
    async fn store_outage_surfaces_as_upstream_unavailable() {
        let f = fixture().await;
        f.store.set_unavailable(true);
        let err = f
            .core
            .get_velocity(&EntityRef::student("s1"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::UpstreamUnavailable(_)));
        assert!(err.is_retryable());
        assert_eq!(f.core.cache_stats().entries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_store_times_out_and_caches_nothing() {
        let config = CoreConfig {
            compute_timeout_ms: 100,
            ..CoreConfig::default()
        };
        let f = fixture_with(config).await;
        f.store.set_latency(Duration::from_secs(1));

        let err = f
            .core
            .get_velocity(&EntityRef::student("s1"), None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::ComputeTimeout { .. }));
        assert_eq!(f.core.cache_stats().entries, 0);
    }

    #[tokio::test]
    async fn invalid_window_is_rejected() {
        let f = fixture().await;
        let err = f
            .core
            .get_velocity(&EntityRef::student("s1"), Some(WindowSpec::Trailing { days: 0 }))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfiguration(_)));
    }

    // ==================== Prediction Tests ====================

    #[tokio::test]
    async fn prediction_for_unknown_assignment_is_not_found() {
        let f = fixture().await;
        let err = f.core.get_prediction("a404", "s1").await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn failed_lookups_leave_no_cache_state() {
        let f = fixture().await;
        for n in 0..50 {
            let assignment = format!("missing-{n}");
            assert!(f.core.get_prediction(&assignment, "s1").await.is_err());
        }

        let window = f.core.config().prediction.engagement_window();
        let key = MetricKey::prediction("s1", "missing-0", window);
        assert_eq!(f.core.cache().version(&key), 0);
        assert_eq!(f.core.cache_stats().tracked_keys, 0);
        assert_eq!(f.core.cache_stats().entries, 0);
    }

    #[tokio::test]
    async fn prediction_uses_history_and_is_cached() {
        let f = fixture().await;
        seed_sparse_student(&f.store).await;
        let now = day0() + ChronoDuration::days(14);
        f.store
            .put_assignment(AssignmentContext {
                assignment_id: "a1".to_string(),
                class_id: "c1".to_string(),
                student_id: "s1".to_string(),
                complexity_units: 3.0,
                complexity_bucket: "medium".to_string(),
                assigned_at: now - ChronoDuration::days(1),
                started_at: None,
                due_at: Some(now + ChronoDuration::days(3)),
                completed_at: None,
            })
            .await;
        f.store
            .set_completion_history(
                CompletionBucket::new("c1", "medium"),
                [10.0, 12.0, 14.0, 16.0, 18.0, 100.0]
                    .iter()
                    .map(|h| Duration::from_secs_f64(h * 3600.0))
                    .collect(),
            )
            .await;

        let prediction = f.core.get_prediction("a1", "s1").await.unwrap();
        assert_eq!(prediction.based_on_samples, 5);
        assert!(prediction.eta.is_some());
        assert!((0.0..=1.0).contains(&prediction.probability_on_time));

        let again = f.core.get_prediction("a1", "s1").await.unwrap();
        assert_eq!(prediction, again);

        let history = f
            .core
            .get_completion_history(&CompletionBucket::new("c1", "medium"))
            .await
            .unwrap();
        assert_eq!(history.median_hours, Some(14.0));
    }

    // ==================== Class View Tests ====================

    fn class_assignment(student: &str, assigned_days_ago: i64) -> AssignmentContext {
        let now = day0() + ChronoDuration::days(14);
        AssignmentContext {
            assignment_id: "a1".to_string(),
            class_id: "c1".to_string(),
            student_id: student.to_string(),
            complexity_units: 2.0,
            complexity_bucket: "medium".to_string(),
            assigned_at: now - ChronoDuration::days(assigned_days_ago),
            started_at: None,
            due_at: None,
            completed_at: None,
        }
    }

    #[tokio::test]
    async fn bulk_velocity_reuses_cache_and_dedupes() {
        let f = fixture().await;
        seed_sparse_student(&f.store).await;
        let s1 = EntityRef::student("s1");
        let s2 = EntityRef::student("s2");
        let single = f.core.get_velocity(&s1, None).await.unwrap();

        let queries = f.store.query_count();
        let bulk = f
            .core
            .get_bulk_velocity(&[s1.clone(), s2.clone(), s1.clone()], None)
            .await
            .unwrap();
        assert_eq!(bulk.len(), 2);
        assert_eq!(bulk[0].entity, s1);
        assert_eq!(bulk[0].velocity, single);
        assert_eq!(bulk[1].entity, s2);
        assert_eq!(bulk[1].velocity.sample_count, 0);
        assert_eq!(f.store.query_count(), queries + 1);

        assert!(f.core.get_bulk_velocity(&[], None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn bulk_velocity_rejects_invalid_window() {
        let f = fixture().await;
        let err = f
            .core
            .get_bulk_velocity(
                &[EntityRef::student("s1")],
                Some(WindowSpec::Trailing { days: 0 }),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidConfiguration(_)));
        assert_eq!(f.store.query_count(), 0);
    }

    #[tokio::test]
    async fn at_risk_students_are_ranked_for_the_class() {
        let f = fixture().await;
        let now = day0() + ChronoDuration::days(14);
        let mut overdue = class_assignment("s1", 9);
        overdue.due_at = Some(now - ChronoDuration::days(1));
        let mut elsewhere = class_assignment("s9", 30);
        elsewhere.class_id = "c2".to_string();
        for assignment in [
            class_assignment("s2", 12),
            overdue,
            class_assignment("s3", 1),
            elsewhere,
        ] {
            f.store.put_assignment(assignment).await;
        }

        let ranked = f.core.get_at_risk_students("c1", 10).await.unwrap();
        let students: Vec<&str> = ranked.iter().map(|r| r.student_id.as_str()).collect();
        assert_eq!(students, vec!["s1", "s2"]);
        assert_eq!(ranked[0].risk_score, 21);
        assert_eq!(ranked[0].days_overdue, Some(1));

        assert!(f.core.get_at_risk_students("c9", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn class_metrics_summarize_the_funnel() {
        let f = fixture().await;
        let now = day0() + ChronoDuration::days(14);
        let mut done = class_assignment("s1", 10);
        done.started_at = Some(now - ChronoDuration::days(3));
        done.completed_at = Some(now - ChronoDuration::days(2));
        let mut started = class_assignment("s2", 2);
        started.started_at = Some(now - ChronoDuration::hours(6));
        for assignment in [done, started, class_assignment("s3", 8)] {
            f.store.put_assignment(assignment).await;
        }

        let metrics = f.core.get_class_assignment_metrics("c1").await.unwrap();
        assert_eq!(metrics.total_assignments, 1);
        assert_eq!(metrics.student_assignments, 3);
        assert_eq!(metrics.completed, 1);
        assert_eq!(metrics.in_progress, 1);
        assert_eq!(metrics.not_started, 1);
        assert_eq!(metrics.at_risk, 1);
        assert_eq!(metrics.completion.sample_size, 1);
        assert_eq!(metrics.completion.median_hours, Some(24.0));

        let err = f.core.get_class_assignment_metrics("c9").await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn class_views_surface_store_outage() {
        let f = fixture().await;
        f.store.set_unavailable(true);
        let err = f.core.get_at_risk_students("c1", 10).await.unwrap_err();
        assert!(matches!(err, CoreError::UpstreamUnavailable(_)));
    }

    // ==================== Action Tests ====================

    #[tokio::test]
    async fn session_start_notifies_subscribers() {
        let f = fixture().await;
        seed_sparse_student(&f.store).await;
        let student = EntityRef::student("s1");
        f.core.get_velocity(&student, None).await.unwrap();

        let mut changes = f.core.subscribe_metric_changes(&student);
        let record = f
            .core
            .dispatch_action(QuickActionRequest::new(
                "k1",
                ActionType::StartSession,
                Role::Student,
                "s1",
                "s1",
            ))
            .await
            .unwrap();
        assert_eq!(record.status, ActionStatus::Succeeded);
        assert_eq!(f.collaborators.sessions_started(), 1);

        let event = changes.next().await.unwrap();
        assert_eq!(event.cause, ChangeCause::Invalidated);
        assert_eq!(f.core.cache_stats().entries, 0);
    }

    #[tokio::test]
    async fn shutdown_ends_subscriptions() {
        let f = fixture().await;
        let mut changes = f.core.subscribe_metric_changes(&EntityRef::class("c1"));
        f.core.shutdown().await.unwrap();
        assert!(changes.next().await.is_none());
    }
}
