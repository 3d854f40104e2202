//! Task model.
//!
//! A [`Task`] is an immutable description of one unit of work: the name of
//! a registered operation, its JSON arguments and routing tags. Executing a
//! task records a [`TaskOutcome`] and moves its [`TaskStatus`] along
//!
//! ```text
//! Pending ──► Running ──► Success
//!                │
//!                ├──► TransientError ──► Running (retry)
//!                │
//!                └──► PermanentError
//! ```

use super::operation::OperationRegistry;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Globally unique task identifier (UUID v4).
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl TaskId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a task.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Running,
    Success,
    TransientError,
    PermanentError,
}

impl TaskStatus {
    /// Returns true for `Success` and `PermanentError`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Success | Self::PermanentError)
    }
}

/// Error raised by an operation.
///
/// Transient errors are retried according to the queue's policy.
#[derive(Clone, Debug)]
pub struct TaskError {
    message: String,
    transient: bool,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl TaskError {
    /// Creates a permanent error.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: false,
            source: None,
        }
    }

    /// Creates a transient (retryable) error.
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            transient: true,
            source: None,
        }
    }

    /// Attaches a source error.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// The same error, marked permanent.
    pub fn into_permanent(mut self) -> Self {
        self.transient = false;
        self
    }

    pub fn is_transient(&self) -> bool {
        self.transient
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for TaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as &_)
    }
}

/// Result of one execution of a task.
#[derive(Clone, Debug)]
pub struct TaskOutcome {
    pub status: TaskStatus,
    pub return_value: Option<Value>,
    pub exception: Option<TaskError>,
    pub execution_secs: f64,
    /// Transient failures seen before this execution.
    pub retry_count: u32,
}

/// One unit of work.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Task {
    pub id: TaskId,
    pub operation_id: String,
    pub args: Value,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(skip)]
    pub status: TaskStatus,
    #[serde(default)]
    pub curr_retry: u32,
    #[serde(skip)]
    pub outcome: Option<TaskOutcome>,
}

impl Task {
    /// Creates a pending task running `operation_id` with `args`.
    pub fn new(operation_id: impl Into<String>, args: Value) -> Self {
        Self {
            id: TaskId::new(),
            operation_id: operation_id.into(),
            args,
            tags: BTreeSet::new(),
            status: TaskStatus::Pending,
            curr_retry: 0,
            outcome: None,
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Runs the task once and records its outcome.
    ///
    /// A task naming an unregistered operation fails permanently.
    pub fn execute(&mut self, operations: &OperationRegistry) -> &TaskOutcome {
        self.status = TaskStatus::Running;
        debug!(task_id = %self.id, operation = %self.operation_id, retry = self.curr_retry, "Executing task");
        let start = Instant::now();

        let result = match operations.get(&self.operation_id) {
            Some(operation) => operation.run(&self.args),
            None => Err(TaskError::new(format!(
                "No operation registered as '{}'",
                self.operation_id
            ))),
        };
        let execution_secs = start.elapsed().as_secs_f64();

        let (status, return_value, exception) = match result {
            Ok(value) => (TaskStatus::Success, Some(value), None),
            Err(e) if e.is_transient() => (TaskStatus::TransientError, None, Some(e)),
            Err(e) => (TaskStatus::PermanentError, None, Some(e)),
        };
        debug!(
            task_id = %self.id,
            status = ?status,
            elapsed_ms = (execution_secs * 1000.0) as u64,
            "Task finished"
        );
        self.status = status;
        self.outcome.insert(TaskOutcome {
            status,
            return_value,
            exception,
            execution_secs,
            retry_count: self.curr_retry,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::operation::FnOperation;
    use serde_json::json;
    use std::sync::Arc;

    fn registry() -> OperationRegistry {
        let mut ops = OperationRegistry::new();
        ops.register(Arc::new(FnOperation::new("double", |args: &Value| {
            let v = args["v"].as_i64().ok_or_else(|| TaskError::new("missing v"))?;
            Ok(json!(v * 2))
        })))
        .unwrap();
        ops.register(Arc::new(FnOperation::new("flaky", |_: &Value| {
            Err(TaskError::transient("timeout"))
        })))
        .unwrap();
        ops
    }

    #[test]
    fn test_task_ids_unique() {
        assert_ne!(TaskId::new(), TaskId::new());
    }

    #[test]
    fn test_execute_success() {
        let mut task = Task::new("double", json!({"v": 21}));
        assert_eq!(task.status, TaskStatus::Pending);
        let outcome = task.execute(&registry()).clone();
        assert_eq!(outcome.status, TaskStatus::Success);
        assert_eq!(outcome.return_value, Some(json!(42)));
        assert_eq!(task.status, TaskStatus::Success);
    }

    #[test]
    fn test_execute_errors() {
        let ops = registry();
        let mut flaky = Task::new("flaky", Value::Null);
        assert_eq!(flaky.execute(&ops).status, TaskStatus::TransientError);
        assert!(!flaky.status.is_terminal());

        let mut bad_args = Task::new("double", json!({}));
        assert_eq!(bad_args.execute(&ops).status, TaskStatus::PermanentError);

        let mut unknown = Task::new("nope", Value::Null);
        let outcome = unknown.execute(&ops);
        assert_eq!(outcome.status, TaskStatus::PermanentError);
        assert!(outcome.exception.as_ref().unwrap().message().contains("nope"));
    }

    #[test]
    fn test_task_serde_skips_runtime_state() {
        let task = Task::new("double", json!({"v": 1})).with_tags(["gpu"]);
        let value = serde_json::to_value(&task).unwrap();
        assert!(value.get("status").is_none());
        assert!(value.get("outcome").is_none());
        let back: Task = serde_json::from_value(value).unwrap();
        assert_eq!(back.id, task.id);
        assert_eq!(back.tags, task.tags);
        assert_eq!(back.status, TaskStatus::Pending);
    }

    #[test]
    fn test_task_error_source() {
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        let err = TaskError::transient("read failed").with_source(io);
        assert!(std::error::Error::source(&err).is_some());
        assert!(!err.clone().into_permanent().is_transient());
    }
}
