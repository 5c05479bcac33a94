use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error, PartialEq)]
pub enum Error {
    #[error("OneByOneReadout on {0:?} requires exactly one child cell, found {1}")]
    OneByOneChildCount(String, usize),

    #[error("OneByOneReadout on {0:?} requires matching buffer capacity (self={1}, child={2})")]
    OneByOneCapacityMismatch(String, usize, usize),

    #[error("address {0:?} duplicated among siblings of {1:?}")]
    DuplicateAddress(i64, String),
}
