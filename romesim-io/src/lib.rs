//! Append-only textual hit-log I/O: the accepted/lost hit streams described
//! in spec §6, shared between both logs.

pub mod error;
pub mod reader;
pub mod writer;

pub use error::{Error, Result};
pub use reader::{load_hit_log, parse_hit_log, LoadedHitLog};
pub use writer::HitLogWriter;
