//! Error types for storage backends.

use crate::geometry::{DomainError, IntVec3D};
use crate::layer::LayerError;
use crate::precomputed::PrecomputedError;
use crate::tensor::TensorError;
use std::io;
use thiserror::Error;

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors raised by backend IO and grid queries.
#[derive(Debug, Error)]
pub enum BackendError {
    /// Storage format failure.
    #[error(transparent)]
    Precomputed(#[from] PrecomputedError),

    /// Geometric failure.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Tensor assembly failure.
    #[error(transparent)]
    Tensor(#[from] TensorError),

    /// The volume has no info document and none was specified.
    #[error("Backend {0} has no info document")]
    MissingInfo(String),

    /// Written data does not match the index it is written to.
    #[error("Data shape {actual:?} does not match expected shape {expected:?}")]
    DataShape {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// The index does not coincide with the backend's chunk grid.
    #[error(
        "Index {index} is not chunk-aligned with {backend} \
         (voxel offset {voxel_offset}, chunk size {chunk_size}); \
         nearest chunk-aligned indices: expanded {expanded}, shrunk {shrunk}"
    )]
    ChunkAlignment {
        backend: String,
        index: String,
        voxel_offset: IntVec3D,
        chunk_size: IntVec3D,
        expanded: String,
        shrunk: String,
    },

    /// Sub-layers of a layer set disagree on a grid query.
    #[error("Layers of {backend} disagree on {query}: {values}")]
    Inconsistent {
        backend: String,
        query: String,
        values: String,
    },

    /// A layer set has no layers.
    #[error("Layer set has no layers")]
    EmptyLayerSet,

    /// Data was written for a name the layer set does not have.
    #[error("Layer set has no layer named '{0}'")]
    UnknownLayer(String),

    /// A sub-layer of a layer set failed.
    #[error("Layer '{name}' failed: {source}")]
    Layer {
        name: String,
        #[source]
        source: Box<LayerError>,
    },
}

impl BackendError {
    /// Returns true for failures that may succeed when retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Precomputed(PrecomputedError::Io { source, .. }) => is_transient_io(source),
            Self::Layer { source, .. } => source.is_transient(),
            _ => false,
        }
    }
}

/// I/O error kinds treated as retryable.
pub fn is_transient_io(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::TimedOut
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::BrokenPipe
    )
}
