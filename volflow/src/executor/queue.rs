//! Execution queue contract and the in-process queue.
//!
//! An [`ExecutionQueue`] accepts tasks and later reports their outcomes.
//! Any implementation must report a terminal outcome for a task at most
//! once, and never before the task's operation has completed.
//!
//! [`LocalExecutionQueue`] runs tasks synchronously inside
//! `pull_task_outcomes`, in push order, on the calling thread.

use super::error::QueueError;
use super::operation::OperationRegistry;
use super::policy::{RetryPolicy, DEFAULT_MAX_ATTEMPTS};
use super::task::{Task, TaskId, TaskOutcome, TaskStatus};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Default name of the local queue.
pub const LOCAL_QUEUE_NAME: &str = "local_execution";

/// Outcomes keyed by task id.
pub type OutcomeMap = HashMap<TaskId, TaskOutcome>;

/// Push/pull surface shared by all queues.
pub trait ExecutionQueue: Send {
    /// Name used for tag routing.
    fn name(&self) -> &str;

    /// Accepts tasks for execution.
    fn push_tasks(&mut self, tasks: Vec<Task>) -> Result<(), QueueError>;

    /// Returns outcomes that became available, at most `max_num`, spending
    /// at most about `max_time` waiting.
    fn pull_task_outcomes(
        &mut self,
        max_num: usize,
        max_time: Duration,
    ) -> Result<OutcomeMap, QueueError>;

    /// Hands out up to `max_num` tasks for a worker to execute.
    fn pull_tasks(&mut self, max_num: usize) -> Result<Vec<Task>, QueueError>;
}

/// Configuration of [`LocalExecutionQueue`].
#[derive(Clone, Debug, PartialEq)]
pub struct LocalQueueConfig {
    pub name: String,
    /// Governs retries of transient failures.
    pub retry_policy: RetryPolicy,
}

impl Default for LocalQueueConfig {
    fn default() -> Self {
        Self {
            name: LOCAL_QUEUE_NAME.to_string(),
            retry_policy: RetryPolicy::fixed(DEFAULT_MAX_ATTEMPTS, Duration::ZERO),
        }
    }
}

impl LocalQueueConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }
}

/// Synchronous, single-threaded queue.
///
/// Each pulled task is executed until it settles: transient failures are
/// retried in a loop under the retry policy. A permanent failure, including
/// exhausted retries, stops the pull and is returned as
/// [`QueueError::TaskFailed`] instead of as an outcome. Outcomes of tasks
/// that completed earlier in the same pull are returned first; the failure
/// is then raised by the next pull, before any further task runs.
pub struct LocalExecutionQueue {
    config: LocalQueueConfig,
    operations: Arc<OperationRegistry>,
    backlog: VecDeque<Task>,
    failure: Option<QueueError>,
}

impl LocalExecutionQueue {
    pub fn new(operations: Arc<OperationRegistry>) -> Self {
        Self::with_config(operations, LocalQueueConfig::default())
    }

    pub fn with_config(operations: Arc<OperationRegistry>, config: LocalQueueConfig) -> Self {
        Self {
            config,
            operations,
            backlog: VecDeque::new(),
            failure: None,
        }
    }

    /// Number of tasks not yet executed.
    pub fn len(&self) -> usize {
        self.backlog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.backlog.is_empty()
    }

    /// Runs `task` until it settles.
    fn run_to_completion(&self, task: &mut Task) -> Result<TaskOutcome, QueueError> {
        loop {
            let outcome = task.execute(&self.operations).clone();
            match outcome.status {
                TaskStatus::Success => return Ok(outcome),
                TaskStatus::TransientError => {
                    task.curr_retry += 1;
                    match self.config.retry_policy.delay_for_attempt(task.curr_retry) {
                        Some(delay) => {
                            warn!(
                                task_id = %task.id,
                                retry = task.curr_retry,
                                error = %outcome.exception.as_ref().map(|e| e.message()).unwrap_or(""),
                                "Transient task failure, retrying"
                            );
                            if !delay.is_zero() {
                                std::thread::sleep(delay);
                            }
                        }
                        None => {
                            warn!(task_id = %task.id, attempts = task.curr_retry, "Task retries exhausted");
                            task.status = TaskStatus::PermanentError;
                            return Err(self.failure(task, outcome));
                        }
                    }
                }
                _ => return Err(self.failure(task, outcome)),
            }
        }
    }

    fn failure(&self, task: &Task, outcome: TaskOutcome) -> QueueError {
        let error = outcome
            .exception
            .map(|e| e.into_permanent())
            .unwrap_or_else(|| super::task::TaskError::new("task failed without an error"));
        QueueError::TaskFailed {
            task_id: task.id.clone(),
            operation: task.operation_id.clone(),
            error,
        }
    }
}

impl ExecutionQueue for LocalExecutionQueue {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn push_tasks(&mut self, tasks: Vec<Task>) -> Result<(), QueueError> {
        debug!(queue = %self.config.name, count = tasks.len(), "Queued tasks");
        self.backlog.extend(tasks);
        Ok(())
    }

    fn pull_task_outcomes(
        &mut self,
        max_num: usize,
        _max_time: Duration,
    ) -> Result<OutcomeMap, QueueError> {
        if let Some(failure) = self.failure.take() {
            return Err(failure);
        }
        let mut outcomes = OutcomeMap::new();
        while outcomes.len() < max_num {
            let Some(mut task) = self.backlog.pop_front() else {
                break;
            };
            match self.run_to_completion(&mut task) {
                Ok(outcome) => {
                    outcomes.insert(task.id.clone(), outcome);
                }
                Err(failure) if outcomes.is_empty() => return Err(failure),
                Err(failure) => {
                    debug!(
                        task_id = %task.id,
                        completed = outcomes.len(),
                        "Deferring task failure behind completed outcomes"
                    );
                    self.failure = Some(failure);
                    break;
                }
            }
        }
        Ok(outcomes)
    }

    fn pull_tasks(&mut self, _max_num: usize) -> Result<Vec<Task>, QueueError> {
        Ok(Vec::new())
    }
}
