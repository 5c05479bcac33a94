//! Ties the event queue to an ordered set of detectors, one tick at a time.

pub mod driver;
pub mod error;

pub use driver::{Simulation, SimulationBuilder, Tick};
pub use error::{Error, Result};
