//! Error types for layers.

use crate::backend::BackendError;
use crate::geometry::DomainError;
use crate::registry::RegistryError;
use crate::tensor::TensorError;
use thiserror::Error;

/// Result type for layer operations.
pub type LayerResult<T> = Result<T, LayerError>;

/// Errors raised by layer reads, writes and construction.
#[derive(Debug, Error)]
pub enum LayerError {
    /// Write attempted on a read-only layer.
    #[error("Layer {0} is read-only")]
    Readonly(String),

    /// Data does not match the index it is written to.
    #[error("Data shape {actual:?} does not match index shape {expected:?}")]
    DataShape {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Tensor(#[from] TensorError),

    /// Inconsistent layer options.
    #[error("Invalid layer configuration: {0}")]
    Config(String),

    /// Layer description could not be built.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

impl LayerError {
    /// Returns true for failures that may succeed when retried.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Backend(e) => e.is_transient(),
            _ => false,
        }
    }
}
