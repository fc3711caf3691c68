//! Versioned TTL cache with prefix invalidation
//!
//! All state transitions happen under one mutex, and events are published
//! while it is held, so subscribers see versions of a key in order. The
//! per-key version counter outlives the entry itself: an invalidated key keeps
//! its last version and the next put continues from there.
//!
//! Computations register themselves through a [`ComputeTicket`] for as long
//! as they run. A miss that never produces a value leaves nothing behind once
//! its ticket is dropped.
//!
//! There is no size-based eviction. The key space is bounded by the active
//! entities times a handful of metrics; an unbounded entity population would
//! need an LRU on top.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::entry::{CacheEntry, ComputedMetric};
use super::events::{ChangeCause, Invalidated, KeyScope, SubscriberGuard, Subscription};
use super::key::{KeyPrefix, MetricKey, MetricKind};
use crate::clock::Clock;
use crate::config::CacheConfig;

/// Snapshot of cache counters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub subscribers: usize,
    /// Keys with a live entry, a retained version or a running computation
    pub tracked_keys: usize,
}

/// Proof of which version a computation started from
///
/// Handed back to [`MetricCache::put_if_current`]; if the key moved on in the
/// meantime the result is not stored. Dropping the ticket without storing
/// releases the key.
#[derive(Debug)]
pub struct ComputeTicket {
    key: MetricKey,
    version: u64,
    owner: Option<Weak<Mutex<CacheState>>>,
}

impl Drop for ComputeTicket {
    fn drop(&mut self) {
        if let Some(owner) = self.owner.take()
            && let Some(state) = owner.upgrade()
        {
            let mut state = state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            state.release(&self.key);
        }
    }
}

impl ComputeTicket {
    pub fn key(&self) -> &MetricKey {
        &self.key
    }

    pub fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Default)]
struct CacheState {
    entries: HashMap<MetricKey, CacheEntry>,
    /// Last version handed out per key, kept after the entry is removed
    versions: HashMap<MetricKey, u64>,
    /// Outstanding tickets per key
    computing: HashMap<MetricKey, usize>,
}

impl CacheState {
    fn release(&mut self, key: &MetricKey) {
        if let Some(count) = self.computing.get_mut(key) {
            *count -= 1;
            if *count == 0 {
                self.computing.remove(key);
            }
        }
    }

    fn tracked_keys(&self) -> usize {
        let mut keys: Vec<&MetricKey> = self
            .versions
            .keys()
            .chain(self.entries.keys())
            .chain(self.computing.keys())
            .collect();
        keys.sort();
        keys.dedup();
        keys.len()
    }
}

pub struct MetricCache {
    state: Arc<Mutex<CacheState>>,
    tx: broadcast::Sender<Invalidated>,
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    root: CancellationToken,
    hits: AtomicU64,
    misses: AtomicU64,
    subscribers: Arc<AtomicUsize>,
}

impl MetricCache {
    pub fn new(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let (tx, _) = broadcast::channel(config.broadcast_capacity.max(1));
        Self {
            state: Arc::new(Mutex::new(CacheState::default())),
            tx,
            config,
            clock,
            root: CancellationToken::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            subscribers: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Configured TTL for a metric kind
    pub fn ttl_for(&self, kind: MetricKind) -> Duration {
        self.config.ttl_for(kind)
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Look up a live entry; never computes
    pub fn get(&self, key: &MetricKey) -> Option<CacheEntry> {
        let mut state = self.lock();
        let expired = match state.entries.get(key) {
            Some(entry) if !entry.is_expired_at(Instant::now()) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!(%key, version = entry.version, "Cache hit");
                return Some(entry.clone());
            }
            Some(_) => true,
            None => false,
        };

        self.misses.fetch_add(1, Ordering::Relaxed);
        if expired {
            state.entries.remove(key);
            debug!(%key, "Cache entry expired");
        } else {
            debug!(%key, "Cache miss");
        }
        None
    }

    /// Store a value unconditionally and return its version
    pub fn put(&self, key: MetricKey, value: ComputedMetric, ttl: Duration) -> u64 {
        let mut state = self.lock();
        self.store_locked(&mut state, key, value, ttl)
    }

    /// Record the version a computation for `key` starts from
    ///
    /// The key counts as known to [`invalidate`](Self::invalidate) until the
    /// ticket is stored or dropped.
    pub fn begin(&self, key: &MetricKey) -> ComputeTicket {
        let mut state = self.lock();
        let version = state.versions.get(key).copied().unwrap_or(0);
        *state.computing.entry(key.clone()).or_insert(0) += 1;
        ComputeTicket {
            key: key.clone(),
            version,
            owner: Some(Arc::downgrade(&self.state)),
        }
    }

    /// Store a computed value unless the key changed since [`begin`](Self::begin)
    ///
    /// Returns the new version, or `None` when the result was superseded.
    pub fn put_if_current(
        &self,
        mut ticket: ComputeTicket,
        value: ComputedMetric,
        ttl: Duration,
    ) -> Option<u64> {
        let mut state = self.lock();
        if ticket.owner.take().is_some() {
            state.release(&ticket.key);
        }
        let current = state.versions.get(&ticket.key).copied().unwrap_or(0);
        if current != ticket.version {
            debug!(
                key = %ticket.key,
                started_at = ticket.version,
                current,
                "Discarding superseded computation"
            );
            return None;
        }
        Some(self.store_locked(&mut state, ticket.key.clone(), value, ttl))
    }

    fn store_locked(
        &self,
        state: &mut CacheState,
        key: MetricKey,
        value: ComputedMetric,
        ttl: Duration,
    ) -> u64 {
        let version = state.versions.entry(key.clone()).or_insert(0);
        *version += 1;
        let version = *version;

        let now = self.clock.now();
        state.entries.insert(
            key.clone(),
            CacheEntry::new(key.clone(), value, now, ttl, version),
        );
        debug!(%key, version, ttl_secs = ttl.as_secs(), "Cached metric");

        // No receivers is fine
        let _ = self.tx.send(Invalidated {
            scope: KeyScope::Exact(key),
            version,
            cause: ChangeCause::Recomputed,
            at: now,
        });
        version
    }

    /// Drop every entry under `prefix` and notify subscribers
    ///
    /// Every key the cache knows under the prefix gets its version bumped:
    /// live entries, retained versions and running computations, so the
    /// latter are discarded when they finish. When no
    /// known key matches, a single prefix-wide event is published instead.
    /// Returns the number of live entries removed.
    pub fn invalidate(&self, prefix: &KeyPrefix) -> usize {
        let mut state = self.lock();
        let now = self.clock.now();

        let mut keys: Vec<MetricKey> = state
            .versions
            .keys()
            .chain(state.computing.keys())
            .filter(|key| prefix.matches(key))
            .cloned()
            .collect();
        keys.sort();
        keys.dedup();

        if keys.is_empty() {
            debug!(%prefix, "Invalidated prefix with no known keys");
            let _ = self.tx.send(Invalidated {
                scope: KeyScope::Prefix(prefix.clone()),
                version: 0,
                cause: ChangeCause::Invalidated,
                at: now,
            });
            return 0;
        }

        let mut removed = 0;
        for key in keys {
            if state.entries.remove(&key).is_some() {
                removed += 1;
            }
            let version = state.versions.entry(key.clone()).or_insert(0);
            *version += 1;
            let _ = self.tx.send(Invalidated {
                scope: KeyScope::Exact(key),
                version: *version,
                cause: ChangeCause::Invalidated,
                at: now,
            });
        }
        debug!(%prefix, removed, "Invalidated prefix");
        removed
    }

    /// Last version handed out for `key`, 0 if never seen
    pub fn version(&self, key: &MetricKey) -> u64 {
        self.lock().versions.get(key).copied().unwrap_or(0)
    }

    /// Stream of events overlapping `prefix`
    pub fn subscribe(&self, prefix: KeyPrefix) -> Subscription {
        let rx = self.tx.subscribe();
        debug!(%prefix, "New cache subscription");
        Subscription::new(
            prefix,
            rx,
            self.root.child_token(),
            self.clock.clone(),
            SubscriberGuard::new(self.subscribers.clone()),
        )
    }

    /// Remove expired entries, returning how many were dropped
    pub fn sweep_expired(&self) -> usize {
        let mut state = self.lock();
        let now = Instant::now();
        let before = state.entries.len();
        state.entries.retain(|_, entry| !entry.is_expired_at(now));
        let swept = before - state.entries.len();
        if swept > 0 {
            debug!(swept, "Swept expired cache entries");
        }
        swept
    }

    pub fn stats(&self) -> CacheStats {
        let (entries, tracked_keys) = {
            let state = self.lock();
            (state.entries.len(), state.tracked_keys())
        };
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheStats {
            entries,
            hits,
            misses,
            hit_rate: if lookups == 0 {
                0.0
            } else {
                hits as f64 / lookups as f64
            },
            subscribers: self.subscribers.load(Ordering::SeqCst),
            tracked_keys,
        }
    }

    /// End every subscription
    pub fn shutdown(&self) {
        self.root.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.root.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::prediction::CompletionStats;
    use crate::store::CompletionBucket;
    use crate::types::EntityRef;
    use crate::cache::WindowSpec;
    use tokio_stream::StreamExt;

    fn cache() -> MetricCache {
        MetricCache::new(CacheConfig::default(), Arc::new(SystemClock))
    }

    fn small_cache(capacity: usize) -> MetricCache {
        let config = CacheConfig {
            broadcast_capacity: capacity,
            ..CacheConfig::default()
        };
        MetricCache::new(config, Arc::new(SystemClock))
    }

    fn velocity_key(student: &str) -> MetricKey {
        MetricKey::velocity(EntityRef::student(student), WindowSpec::Trailing { days: 14 })
    }

    fn value(samples: usize) -> ComputedMetric {
        ComputedMetric::CompletionHistory(CompletionStats {
            median_hours: Some(2.0),
            p80_hours: Some(3.0),
            std_dev_hours: None,
            sample_size: samples,
        })
    }

    const TTL: Duration = Duration::from_secs(60);

    // ==================== Get/Put Tests ====================

    #[tokio::test]
    async fn put_then_get_hits() {
        let cache = cache();
        let key = velocity_key("s1");

        assert!(cache.get(&key).is_none());
        let version = cache.put(key.clone(), value(1), TTL);
        assert_eq!(version, 1);

        let entry = cache.get(&key).unwrap();
        assert_eq!(entry.version, 1);
        assert_eq!(entry.value, value(1));

        let stats = cache.stats();
        assert_eq!(stats.entries, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
    }

    #[tokio::test(start_paused = true)]
    async fn entry_expires_after_its_ttl() {
        let cache = cache();
        let key = velocity_key("s1");
        cache.put(key.clone(), value(1), Duration::from_secs(5));

        assert!(cache.get(&key).is_some());
        tokio::time::advance(Duration::from_secs(6)).await;
        assert!(cache.get(&key).is_none());
        assert_eq!(cache.stats().entries, 0);
    }

    #[tokio::test]
    async fn overwrite_bumps_version() {
        let cache = cache();
        let key = velocity_key("s1");
        assert_eq!(cache.put(key.clone(), value(1), TTL), 1);
        assert_eq!(cache.put(key.clone(), value(2), TTL), 2);
        assert_eq!(cache.get(&key).unwrap().value, value(2));
    }

    // ==================== Versioning Tests ====================

    #[tokio::test]
    async fn version_survives_invalidation() {
        let cache = cache();
        let key = velocity_key("s1");
        cache.put(key.clone(), value(1), TTL);

        let removed = cache.invalidate(&KeyPrefix::entity(&EntityRef::student("s1")));
        assert_eq!(removed, 1);
        assert_eq!(cache.version(&key), 2);
        assert!(cache.get(&key).is_none());

        assert_eq!(cache.put(key.clone(), value(1), TTL), 3);
    }

    #[tokio::test]
    async fn late_compute_after_invalidation_is_discarded() {
        let cache = cache();
        let key = velocity_key("s1");

        let ticket = cache.begin(&key);
        cache.invalidate(&KeyPrefix::entity(&EntityRef::student("s1")));

        assert_eq!(cache.put_if_current(ticket, value(1), TTL), None);
        assert!(cache.get(&key).is_none());
    }

    #[tokio::test]
    async fn abandoned_compute_leaves_no_trace() {
        let cache = cache();
        let key = velocity_key("s1");

        let ticket = cache.begin(&key);
        assert_eq!(cache.stats().tracked_keys, 1);
        drop(ticket);

        assert_eq!(cache.stats().tracked_keys, 0);
        assert_eq!(cache.version(&key), 0);
    }

    #[tokio::test]
    async fn running_compute_is_invalidated_after_sibling_ticket_drops() {
        let cache = cache();
        let key = velocity_key("s1");

        let kept = cache.begin(&key);
        drop(cache.begin(&key));
        cache.invalidate(&KeyPrefix::entity(&EntityRef::student("s1")));

        assert_eq!(cache.put_if_current(kept, value(1), TTL), None);
        assert_eq!(cache.version(&key), 1);
        assert_eq!(cache.stats().tracked_keys, 1);
    }

    #[tokio::test]
    async fn current_ticket_is_stored() {
        let cache = cache();
        let key = velocity_key("s1");

        let ticket = cache.begin(&key);
        assert_eq!(ticket.version(), 0);
        assert_eq!(cache.put_if_current(ticket, value(1), TTL), Some(1));
        assert!(cache.get(&key).is_some());
    }

    #[tokio::test]
    async fn newer_put_wins_over_older_ticket() {
        let cache = cache();
        let key = velocity_key("s1");

        let slow = cache.begin(&key);
        let fast = cache.begin(&key);
        assert_eq!(cache.put_if_current(fast, value(2), TTL), Some(1));
        assert_eq!(cache.put_if_current(slow, value(1), TTL), None);
        assert_eq!(cache.get(&key).unwrap().value, value(2));
    }

    // ==================== Invalidation Tests ====================

    #[tokio::test]
    async fn invalidate_only_touches_matching_keys() {
        let cache = cache();
        let s1 = velocity_key("s1");
        let s2 = velocity_key("s2");
        cache.put(s1.clone(), value(1), TTL);
        cache.put(s2.clone(), value(1), TTL);

        cache.invalidate(&KeyPrefix::entity(&EntityRef::student("s1")));
        assert!(cache.get(&s1).is_none());
        assert!(cache.get(&s2).is_some());
        assert_eq!(cache.version(&s2), 1);
    }

    #[tokio::test]
    async fn invalidate_publishes_exact_event_per_key() {
        let cache = cache();
        let week = MetricKey::velocity(EntityRef::student("s1"), WindowSpec::Trailing { days: 7 });
        let fortnight = velocity_key("s1");
        cache.put(week.clone(), value(1), TTL);
        cache.put(fortnight.clone(), value(1), TTL);

        let mut sub = cache.subscribe(KeyPrefix::entity(&EntityRef::student("s1")));
        cache.invalidate(&KeyPrefix::entity(&EntityRef::student("s1")));

        let mut seen = Vec::new();
        for _ in 0..2 {
            let event = sub.next().await.unwrap();
            assert_eq!(event.cause, ChangeCause::Invalidated);
            assert_eq!(event.version, 2);
            seen.push(event.scope);
        }
        assert!(seen.contains(&KeyScope::Exact(week)));
        assert!(seen.contains(&KeyScope::Exact(fortnight)));
    }

    #[tokio::test]
    async fn invalidating_unknown_prefix_still_notifies() {
        let cache = cache();
        let prefix = KeyPrefix::entity(&EntityRef::student("s9"));
        let mut sub = cache.subscribe(prefix.clone());

        assert_eq!(cache.invalidate(&prefix), 0);
        let event = sub.next().await.unwrap();
        assert_eq!(event.scope, KeyScope::Prefix(prefix));
        assert_eq!(event.version, 0);
    }

    // ==================== Subscription Tests ====================

    #[tokio::test]
    async fn subscription_filters_by_prefix() {
        let cache = cache();
        let mut sub = cache.subscribe(KeyPrefix::entity(&EntityRef::student("s2")));

        cache.put(velocity_key("s1"), value(1), TTL);
        cache.put(velocity_key("s2"), value(1), TTL);

        let event = sub.next().await.unwrap();
        assert_eq!(event.scope, KeyScope::Exact(velocity_key("s2")));
        assert_eq!(event.cause, ChangeCause::Recomputed);
        assert_eq!(event.version, 1);
    }

    #[tokio::test]
    async fn cancelled_subscription_ends() {
        let cache = cache();
        let mut sub = cache.subscribe(KeyPrefix::all());
        assert_eq!(cache.stats().subscribers, 1);

        sub.cancel();
        cache.put(velocity_key("s1"), value(1), TTL);
        assert!(sub.next().await.is_none());

        drop(sub);
        assert_eq!(cache.stats().subscribers, 0);
    }

    #[tokio::test]
    async fn cancelling_one_subscription_leaves_others() {
        let cache = cache();
        let first = cache.subscribe(KeyPrefix::all());
        let mut second = cache.subscribe(KeyPrefix::all());

        first.cancel();
        cache.put(velocity_key("s1"), value(1), TTL);
        assert!(second.next().await.is_some());
        assert!(cache.get(&velocity_key("s1")).is_some());
    }

    #[tokio::test]
    async fn shutdown_ends_all_subscriptions() {
        let cache = cache();
        let mut first = cache.subscribe(KeyPrefix::all());
        let mut second = cache.subscribe(KeyPrefix::entity(&EntityRef::class("c1")));

        let waiter = tokio::spawn(async move { second.next().await });
        cache.shutdown();

        assert!(first.next().await.is_none());
        assert!(waiter.await.unwrap().is_none());
        assert!(cache.is_shut_down());
    }

    #[tokio::test]
    async fn lagging_subscriber_gets_resync() {
        let cache = small_cache(2);
        let prefix = KeyPrefix::entity(&EntityRef::student("s1"));
        let mut sub = cache.subscribe(prefix.clone());

        for _ in 0..5 {
            cache.put(velocity_key("s1"), value(1), TTL);
        }

        let event = sub.next().await.unwrap();
        assert_eq!(event.cause, ChangeCause::Resync);
        assert_eq!(event.scope, KeyScope::Prefix(prefix));

        // Remaining buffered events still arrive in version order
        let next = sub.next().await.unwrap();
        assert_eq!(next.version, 4);
    }

    // ==================== Maintenance Tests ====================

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_only_expired_entries() {
        let cache = cache();
        let history = MetricKey::completion_history(&CompletionBucket::new("c1", "short"));
        cache.put(velocity_key("s1"), value(1), Duration::from_secs(5));
        cache.put(history.clone(), value(1), Duration::from_secs(3600));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert_eq!(cache.sweep_expired(), 1);
        assert_eq!(cache.stats().entries, 1);
        assert!(cache.get(&history).is_some());
    }
}
