//! The readout-cell tree and its pluggable buffer / child-read / pixel-read
//! strategy objects.
//!
//! Strategies are tagged-variant enums owned by value inside the
//! [`cell::ReadoutCell`] they govern rather than a base-class hierarchy with
//! back-pointers to the owner: a policy is taken out of its slot, handed a
//! `&mut ReadoutCell` for the duration of the call, and put back. This
//! keeps the tree parent-less (children are owned by value, enumerated
//! downward only) and avoids any cyclic references.

pub mod buffer;
pub mod cell;
pub mod child_read;
pub mod error;
pub mod pixel_read;

pub use buffer::BufferPolicy;
pub use cell::{Children, PixelGeometry, ReadoutCell};
pub use child_read::ChildReadPolicy;
pub use error::{Error, Result};
pub use pixel_read::{EdgeMode, LogicOp, PixelLogic, PixelReadPolicy, PixelTerm};
