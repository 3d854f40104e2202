//! Tasks, operations and execution queues.
//!
//! A [`Task`] names an operation registered in an [`OperationRegistry`] and
//! carries its JSON arguments. Tasks are pushed to an [`ExecutionQueue`],
//! which later reports a [`TaskOutcome`] per task id.
//!
//! - [`LocalExecutionQueue`] executes synchronously on the caller's thread
//!   and retries transient failures under a [`RetryPolicy`].
//! - [`ExecutionMultiQueue`] routes tasks to named sub-queues by tag.

mod error;
mod multi_queue;
mod operation;
mod policy;
mod queue;
mod task;

pub use error::QueueError;
pub use multi_queue::ExecutionMultiQueue;
pub use operation::{FnOperation, Operation, OperationRegistry};
pub use policy::{
    RetryPolicy, DEFAULT_BACKOFF_MULTIPLIER, DEFAULT_INITIAL_DELAY_MS, DEFAULT_MAX_ATTEMPTS,
    DEFAULT_MAX_DELAY_SECS,
};
pub use queue::{
    ExecutionQueue, LocalExecutionQueue, LocalQueueConfig, OutcomeMap, LOCAL_QUEUE_NAME,
};
pub use task::{Task, TaskError, TaskId, TaskOutcome, TaskStatus};
