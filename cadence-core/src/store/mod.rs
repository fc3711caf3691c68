//! Metric store contract and the in-memory implementation

mod memory;
mod traits;

pub use memory::{MemoryMetricStore, StoreFixture};
pub use traits::{AssignmentContext, AssignmentStatus, CompletionBucket, MetricStore};
