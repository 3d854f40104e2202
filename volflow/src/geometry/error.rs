//! Error types for spatial geometry operations.

use super::vec3d::Vec3D;
use thiserror::Error;

/// Errors raised by bounding-box and spatial-index operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DomainError {
    /// Bounds do not land on voxel boundaries at the given resolution.
    #[error("Bounds {bbox} are not integral at resolution {resolution}")]
    NonIntegerBounds { bbox: String, resolution: Vec3D },

    /// Two boxes share no region, not even a face.
    #[error("Bounding boxes {a} and {b} are disjoint")]
    Disjoint { a: String, b: String },

    /// An operation combined indices at different resolutions.
    #[error("Resolution mismatch: {left} vs {right}")]
    ResolutionMismatch { left: Vec3D, right: Vec3D },

    /// A resolution component is zero, negative or not finite.
    #[error("Invalid resolution {0}")]
    InvalidResolution(Vec3D),
}
