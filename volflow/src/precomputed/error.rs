//! Error types for the precomputed volume format.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::geometry::{DomainError, IntVec3D};
use crate::tensor::TensorError;

/// Result type for precomputed-format operations.
pub type PrecomputedResult<T> = Result<T, PrecomputedError>;

/// Errors raised while reading or writing info documents and chunks.
#[derive(Debug, Error)]
pub enum PrecomputedError {
    /// Filesystem failure.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The info document could not be parsed or serialized.
    #[error("Invalid info document at {path}: {source}")]
    InvalidInfo {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// No info document exists and none can be derived.
    #[error("No info document at {0} and no specification to create one")]
    MissingInfo(PathBuf),

    /// The existing info document differs from the requested one.
    #[error("Info document at {path} differs from the requested one; use overwrite or merge mode")]
    InfoMismatch { path: PathBuf },

    /// No scale at the requested resolution.
    #[error("No scale with resolution {resolution} in {path}")]
    ScaleNotFound { path: PathBuf, resolution: String },

    /// The scale encoding cannot be read.
    #[error("Unsupported encoding '{0}'; only 'raw' is supported")]
    UnsupportedEncoding(String),

    /// A chunk file has the wrong number of bytes.
    #[error("Chunk {name} has {actual} bytes, expected {expected}")]
    ChunkSize {
        name: String,
        expected: usize,
        actual: usize,
    },

    /// A scale declares a chunk size with a zero or negative component.
    #[error("Scale {key} has invalid chunk size {chunk_size}")]
    InvalidChunkSize { key: String, chunk_size: IntVec3D },

    /// A write only partially covers a native chunk.
    #[error("Write region {region} is not aligned to the chunk grid of scale {scale}")]
    UnalignedWrite { region: String, scale: String },

    /// A field required to build a scale was not provided.
    #[error("Missing '{field}' for resolution {resolution}")]
    MissingField { field: String, resolution: String },

    /// Geometric failure.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Chunk data could not be assembled.
    #[error(transparent)]
    Tensor(#[from] TensorError),
}

impl PrecomputedError {
    /// Wraps an I/O error with the path it concerns.
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
