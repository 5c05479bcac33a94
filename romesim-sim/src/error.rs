use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("detector {name:?} failed its clock-up at tick {tick}: {source}")]
    ClockUp { name: String, tick: i64, #[source] source: romesim_detector::Error },
}
