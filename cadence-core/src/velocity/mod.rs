//! Velocity estimation and ETA projection

mod engine;
mod types;

pub use engine::VelocityEngine;
pub use types::{
    BandMethod, ConfidenceBand, ConfidenceGrade, EntityVelocity, EtaProjection, VelocityResult,
};
