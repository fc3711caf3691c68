//! Invalidation events and subscription streams

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_stream::Stream;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::warn;

use super::key::{KeyPrefix, MetricKey};
use crate::clock::Clock;

/// What an invalidation event covers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "scope", content = "target")]
pub enum KeyScope {
    /// One key
    Exact(MetricKey),
    /// Everything under a prefix
    Prefix(KeyPrefix),
}

impl KeyScope {
    pub fn overlaps(&self, prefix: &KeyPrefix) -> bool {
        match self {
            Self::Exact(key) => prefix.matches(key),
            Self::Prefix(scope) => scope.overlaps(prefix),
        }
    }
}

/// Why an event was published
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeCause {
    /// A fresh value was stored
    Recomputed,
    /// Underlying data changed; the value was dropped
    Invalidated,
    /// The subscriber fell behind and missed events; refetch the whole prefix
    Resync,
}

/// Notification that cached metrics changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invalidated {
    pub scope: KeyScope,
    /// Version of the key after the change; 0 for prefix-wide events
    pub version: u64,
    pub cause: ChangeCause,
    pub at: DateTime<Utc>,
}

/// Decrements the live subscriber count when dropped
pub(crate) struct SubscriberGuard(Arc<AtomicUsize>);

impl SubscriberGuard {
    pub(crate) fn new(count: Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(count)
    }
}

impl Drop for SubscriberGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Stream of [`Invalidated`] events overlapping a prefix
///
/// Ends when cancelled, when the cache shuts down, or when the cache is
/// dropped.
pub struct Subscription {
    prefix: KeyPrefix,
    inner: BroadcastStream<Invalidated>,
    token: CancellationToken,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    clock: Arc<dyn Clock>,
    done: bool,
    _guard: SubscriberGuard,
}

impl Subscription {
    pub(crate) fn new(
        prefix: KeyPrefix,
        rx: broadcast::Receiver<Invalidated>,
        token: CancellationToken,
        clock: Arc<dyn Clock>,
        guard: SubscriberGuard,
    ) -> Self {
        Self {
            prefix,
            inner: BroadcastStream::new(rx),
            cancelled: Box::pin(token.clone().cancelled_owned()),
            token,
            clock,
            done: false,
            _guard: guard,
        }
    }

    pub fn prefix(&self) -> &KeyPrefix {
        &self.prefix
    }

    /// Stop the stream; pending and future polls return `None`
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Token that cancels this subscription only
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Stream for Subscription {
    type Item = Invalidated;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        if this.cancelled.as_mut().poll(cx).is_ready() {
            this.done = true;
            return Poll::Ready(None);
        }

        loop {
            match Pin::new(&mut this.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) => {
                    if event.scope.overlaps(&this.prefix) {
                        return Poll::Ready(Some(event));
                    }
                }
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(missed)))) => {
                    warn!(prefix = %this.prefix, missed, "Subscriber lagged, sending resync");
                    return Poll::Ready(Some(Invalidated {
                        scope: KeyScope::Prefix(this.prefix.clone()),
                        version: 0,
                        cause: ChangeCause::Resync,
                        at: this.clock.now(),
                    }));
                }
                Poll::Ready(None) => {
                    this.done = true;
                    return Poll::Ready(None);
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EntityRef;
    use crate::cache::WindowSpec;

    #[test]
    fn exact_scope_overlaps_matching_prefix() {
        let key = MetricKey::velocity(EntityRef::student("s1"), WindowSpec::Lifetime);
        let scope = KeyScope::Exact(key);
        assert!(scope.overlaps(&KeyPrefix::entity(&EntityRef::student("s1"))));
        assert!(!scope.overlaps(&KeyPrefix::entity(&EntityRef::student("s2"))));
    }

    #[test]
    fn prefix_scope_overlaps_broader_and_narrower_prefixes() {
        let scope = KeyScope::Prefix(KeyPrefix::entity(&EntityRef::class("c1")));
        assert!(scope.overlaps(&KeyPrefix::all()));
        assert!(scope.overlaps(&KeyPrefix::metric(
            &EntityRef::class("c1"),
            crate::cache::MetricKind::Velocity
        )));
        assert!(!scope.overlaps(&KeyPrefix::entity(&EntityRef::class("c2"))));
    }

    #[test]
    fn guard_tracks_subscriber_count() {
        let count = Arc::new(AtomicUsize::new(0));
        let first = SubscriberGuard::new(count.clone());
        let second = SubscriberGuard::new(count.clone());
        assert_eq!(count.load(Ordering::SeqCst), 2);
        drop(first);
        drop(second);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
