//! Tag-routing queue composed of named sub-queues.
//!
//! A task goes to the first sub-queue whose name contains every one of the
//! task's tags as a substring. Pulls visit the sub-queues in declared order
//! and stop once `max_num` results are collected or `max_time` has elapsed.

use super::error::QueueError;
use super::queue::{ExecutionQueue, OutcomeMap};
use super::task::Task;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::debug;

/// Router over several [`ExecutionQueue`]s.
pub struct ExecutionMultiQueue {
    name: String,
    queues: Vec<Box<dyn ExecutionQueue>>,
}

impl ExecutionMultiQueue {
    pub fn new(queues: Vec<Box<dyn ExecutionQueue>>) -> Self {
        let name = queues
            .iter()
            .map(|q| q.name())
            .collect::<Vec<_>>()
            .join("_");
        Self { name, queues }
    }

    /// Index of the sub-queue that accepts `task`.
    fn route(&self, task: &Task) -> Option<usize> {
        self.queues
            .iter()
            .position(|q| task.tags.iter().all(|tag| q.name().contains(tag.as_str())))
    }

    fn queue_names(&self) -> Vec<String> {
        self.queues.iter().map(|q| q.name().to_string()).collect()
    }
}

impl fmt::Debug for ExecutionMultiQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionMultiQueue")
            .field("queues", &self.queue_names())
            .finish()
    }
}

impl ExecutionQueue for ExecutionMultiQueue {
    fn name(&self) -> &str {
        &self.name
    }

    /// Routes every task before pushing any, so a routing failure leaves all
    /// sub-queues untouched.
    fn push_tasks(&mut self, tasks: Vec<Task>) -> Result<(), QueueError> {
        let mut batches: Vec<Vec<Task>> = self.queues.iter().map(|_| Vec::new()).collect();
        for task in tasks {
            let Some(target) = self.route(&task) else {
                return Err(QueueError::NoMatchingQueue {
                    tags: task.tags.iter().cloned().collect(),
                    queues: self.queue_names(),
                });
            };
            batches[target].push(task);
        }

        for (queue, batch) in self.queues.iter_mut().zip(batches) {
            if batch.is_empty() {
                continue;
            }
            debug!(queue = %queue.name(), count = batch.len(), "Routed tasks");
            queue.push_tasks(batch)?;
        }
        Ok(())
    }

    fn pull_task_outcomes(
        &mut self,
        max_num: usize,
        max_time: Duration,
    ) -> Result<OutcomeMap, QueueError> {
        let start = Instant::now();
        let mut outcomes = OutcomeMap::new();
        for queue in &mut self.queues {
            if outcomes.len() >= max_num {
                break;
            }
            let remaining_time = max_time.saturating_sub(start.elapsed());
            outcomes.extend(queue.pull_task_outcomes(max_num - outcomes.len(), remaining_time)?);
            if start.elapsed() >= max_time {
                break;
            }
        }
        Ok(outcomes)
    }

    fn pull_tasks(&mut self, max_num: usize) -> Result<Vec<Task>, QueueError> {
        let mut tasks = Vec::new();
        for queue in &mut self.queues {
            if tasks.len() >= max_num {
                break;
            }
            tasks.extend(queue.pull_tasks(max_num - tasks.len())?);
        }
        Ok(tasks)
    }
}
