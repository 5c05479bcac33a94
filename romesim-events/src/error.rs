use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq)]
pub enum Error {
    #[error("event rate must be positive, got {0}")]
    NonPositiveRate(f64),

    #[error("spline control points must be sorted by ascending charge")]
    UnsortedControlPoints,

    #[error("trigger probability must lie in [0, 1], got {0}")]
    InvalidTriggerProbability(f64),
}
