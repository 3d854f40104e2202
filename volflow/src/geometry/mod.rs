//! Physical-space geometry primitives.
//!
//! - [`Vec3D`] / [`IntVec3D`]: physical and voxel vectors
//! - [`BBox3D`]: axis-aligned box in physical units, with pad, crop,
//!   translate, intersect and snap-to-grid
//! - [`SnapMode`]: grid alignment direction
//!
//! Everything here is an immutable value type; every transform returns a
//! new value.

mod bbox;
mod error;
mod vec3d;

pub use bbox::{BBox3D, SnapMode};
pub use error::DomainError;
pub use vec3d::{as_integral, IntVec3D, Vec3D, INTEGRAL_EPSILON};
