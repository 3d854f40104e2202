//! Error types for the chunked-execution driver.

use crate::backend::BackendError;
use crate::executor::{QueueError, TaskError, TaskId};
use crate::geometry::IntVec3D;
use crate::index::ChunkerError;
use crate::layer::LayerError;
use thiserror::Error;

/// Errors raised while planning or running a chunked flow.
#[derive(Debug, Error)]
pub enum FlowError {
    /// Inconsistent flow parameters.
    #[error("Invalid flow configuration: {0}")]
    Config(String),

    /// The step does not land on the destination's native chunk grid.
    #[error(
        "Step size {step_size} is not a multiple of chunk size {chunk_size} of {layer}; \
         nearest valid step sizes are {smaller} and {larger}"
    )]
    StepNotChunkMultiple {
        layer: String,
        step_size: IntVec3D,
        chunk_size: IntVec3D,
        smaller: IntVec3D,
        larger: IntVec3D,
    },

    #[error(transparent)]
    Chunker(#[from] ChunkerError),

    #[error(transparent)]
    Layer(#[from] LayerError),

    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Queue(QueueError),

    /// Task arguments could not be encoded.
    #[error("Failed to encode task arguments: {0}")]
    Encode(#[from] serde_json::Error),

    /// A chunk task failed permanently.
    #[error("Task {task_id} ({operation}) failed: {error}")]
    TaskFailed {
        task_id: TaskId,
        operation: String,
        #[source]
        error: TaskError,
    },
}

impl From<QueueError> for FlowError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::TaskFailed {
                task_id,
                operation,
                error,
            } => Self::TaskFailed {
                task_id,
                operation,
                error,
            },
            other => Self::Queue(other),
        }
    }
}
