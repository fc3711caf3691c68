//! Metric cache and change notifications
//!
//! [`MetricCache`] holds computed metrics keyed by [`MetricKey`] and
//! publishes an [`Invalidated`] event for every change. Dashboards follow
//! changes through [`Subscription`] streams filtered by [`KeyPrefix`].

mod entry;
mod events;
mod key;
mod metric_cache;

pub use entry::{CacheEntry, ComputedMetric};
pub use events::{ChangeCause, Invalidated, KeyScope, Subscription};
pub use key::{KeyPrefix, MAX_WINDOW_DAYS, MetricKey, MetricKind, MetricName, WindowSpec};
pub use metric_cache::{CacheStats, ComputeTicket, MetricCache};
