//! Error types for tensor operations.

use super::interpolate::InterpolationMode;
use super::LayerType;
use crate::geometry::IntVec3D;
use thiserror::Error;

/// Errors raised by tensor manipulation and resampling.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TensorError {
    /// Resampling would produce a fractional output size.
    #[error("Scaling size {size} by {scale} along axis {axis} gives a non-integer size")]
    NonIntegerShape { axis: usize, size: usize, scale: f64 },

    /// A scale factor is zero, negative or not finite.
    #[error("Invalid scale factor {0}")]
    InvalidScale(f64),

    /// Area resampling only averages whole blocks of input voxels.
    #[error("Mode {mode} requires an integer downsampling factor, got scale {scale}")]
    NonIntegerFactor { mode: InterpolationMode, scale: f64 },

    /// Area resampling cannot create new voxels.
    #[error("Mode {mode} cannot upsample (scale {scale})")]
    Upsample { mode: InterpolationMode, scale: f64 },

    /// The mode does not suit the data's semantic type.
    #[error("Interpolation mode {mode} is not allowed for {layer_type} data")]
    ModeNotAllowed {
        mode: InterpolationMode,
        layer_type: LayerType,
    },

    /// A crop or sub-region lies outside the tensor.
    #[error("Region offset {offset} size {size} does not fit in spatial shape {shape}")]
    OutOfRange {
        offset: IntVec3D,
        size: IntVec3D,
        shape: IntVec3D,
    },

    /// Two tensors that must agree in shape do not.
    #[error("Shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
}
