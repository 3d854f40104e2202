//! Error types for index tiling.

use crate::geometry::{DomainError, IntVec3D};
use thiserror::Error;

/// Errors raised when configuring a chunker or tiling an index.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ChunkerError {
    /// Chunk or step size has a zero or negative component.
    #[error("Chunk size {chunk_size} and step size {step_size} must be positive")]
    NonPositiveSize {
        chunk_size: IntVec3D,
        step_size: IntVec3D,
    },

    /// Step is larger than the chunk, which would leave gaps.
    #[error("Step size {step_size} exceeds chunk size {chunk_size}")]
    StepExceedsChunk {
        chunk_size: IntVec3D,
        step_size: IntVec3D,
    },

    /// Overlap between neighbouring chunks cannot be split evenly.
    #[error("Chunk size {chunk_size} minus step size {step_size} must be even along every axis")]
    OddOverlap {
        chunk_size: IntVec3D,
        step_size: IntVec3D,
    },

    /// The index extent is not a multiple of the step size.
    #[error(
        "Index {index} with shape {shape} is not divisible by step size {step_size}; \
         nearest aligned alternatives: expand to {expanded} or shrink to {shrunk}"
    )]
    NotDivisible {
        index: String,
        shape: IntVec3D,
        step_size: IntVec3D,
        expanded: String,
        shrunk: String,
    },

    /// Underlying geometric failure.
    #[error(transparent)]
    Domain(#[from] DomainError),
}
