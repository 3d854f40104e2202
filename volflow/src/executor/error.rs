//! Error types for execution queues.

use super::task::{TaskError, TaskId};
use thiserror::Error;

/// Errors raised by queues and the operation registry.
#[derive(Debug, Clone, Error)]
pub enum QueueError {
    /// A task failed permanently or exhausted its retries.
    #[error("Task {task_id} ({operation}) failed: {error}")]
    TaskFailed {
        task_id: TaskId,
        operation: String,
        #[source]
        error: TaskError,
    },

    /// No sub-queue name contains all of a task's tags.
    #[error("No queue from {queues:?} matches all tags {tags:?}")]
    NoMatchingQueue {
        tags: Vec<String>,
        queues: Vec<String>,
    },

    /// Two operations share a name.
    #[error("Operation '{0}' is already registered")]
    DuplicateOperation(String),
}
