//! Assignment completion prediction and class risk views

mod engine;
mod risk;
mod types;

pub use engine::{PredictionEngine, PredictionInput};
pub use risk::{
    AtRiskStudent, ClassAssignmentMetrics, DEFAULT_AT_RISK_LIMIT, assess, rank_at_risk,
    summarize_class,
};
pub use types::{CompletionStats, EngagementSignal, PredictionFactor, PredictionResult, RiskFlag};
