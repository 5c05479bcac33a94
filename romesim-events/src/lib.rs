//! Poisson-rate particle-track event generation: dead-time/time-walk
//! splines, pluggable charge integration, and trigger emission.

pub mod charge_model;
pub mod error;
pub mod generator;
pub mod spline;

pub use charge_model::{BoxOverlapChargeModel, ChargeModel, Track};
pub use error::{Error, Result};
pub use generator::{
    ChargeDistributionSource, ChargeSample, EventGenerator, GeneratedBatch, GeneratorConfig, TriggerMode,
};
pub use spline::Spline;
