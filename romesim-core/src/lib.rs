//! Foundational types for the readout-cell engine: geometry, the hit record
//! and its text form, and the leaf pixel sensor.

pub mod hit;
pub mod pixel;
pub mod vec3;

pub use hit::{FieldMap, Hit, LostKind};
pub use pixel::{Admission, Pixel};
pub use vec3::{overlap_volume, Vec3};
