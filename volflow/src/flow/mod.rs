//! Chunked-execution driver.
//!
//! [`ChunkedFlow::run`] turns one region-wide operation into independent
//! chunk tasks:
//!
//! 1. align the target index to the destination's native chunk grid, or
//!    reject it
//! 2. tile it with a [`VolumetricIndexChunker`]
//! 3. push one task per tile to the queue, tagged for routing
//! 4. poll outcomes until every task has settled
//!
//! Any permanent failure aborts the run. Writes already committed by other
//! chunks are left in place; each chunk's write is confined to its own core,
//! so rerunning the flow completes it.

mod config;
mod error;
mod operation;

pub use config::{
    Alignment, ChunkedFlowConfig, DEFAULT_POLL_INTERVAL_MS, DEFAULT_PULL_MAX_NUM,
    DEFAULT_PULL_MAX_TIME_MS,
};
pub use error::FlowError;
pub use operation::{ChunkOutput, ChunkTaskArgs, DstLayer, VolumetricCallableOperation};

use crate::backend::Backend;
use crate::executor::{ExecutionQueue, Task, TaskError, TaskId, TaskStatus};
use crate::geometry::IntVec3D;
use crate::index::{VolumetricIndex, VolumetricIndexChunker};
use crate::layer::{LayerBuilder, LayerSpec, VolumetricLayer};
use crate::tensor::Tensor;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Summary of a completed flow.
#[derive(Clone, Debug)]
pub struct FlowReport {
    /// Tasks dispatched.
    pub num_tasks: usize,
    pub elapsed: Duration,
    /// Return value of every task.
    pub return_values: HashMap<TaskId, Value>,
}

/// Runs an operation over a region, one task per chunk.
#[derive(Clone, Debug)]
pub struct ChunkedFlow {
    config: ChunkedFlowConfig,
}

impl ChunkedFlow {
    pub fn new(config: ChunkedFlowConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChunkedFlowConfig {
        &self.config
    }

    /// Builds the chunk tasks for `idx` without dispatching them.
    ///
    /// Returns the tasks together with the aligned index they cover.
    pub fn plan(
        &self,
        layers: &LayerBuilder,
        operation_id: &str,
        idx: &VolumetricIndex,
        inputs: &BTreeMap<String, LayerSpec>,
        dst: &DstLayer,
    ) -> Result<(VolumetricIndex, Vec<Task>), FlowError> {
        self.config.validate()?;
        let chunker =
            VolumetricIndexChunker::new(self.config.chunk_size, self.config.step_size)?;

        let dst_layers = self.build_dst(layers, dst)?;
        let idx = self.align(&dst_layers, idx)?;
        self.check_step(&dst_layers, &idx)?;

        let tiling = chunker.tile(&idx)?;
        let read_pad = tiling.overlap_margin() + self.config.crop_pad;
        let mut tasks = Vec::with_capacity(tiling.len());
        for i in 0..tiling.len() {
            let Some(core) = tiling.core(i) else {
                break;
            };
            let args = ChunkTaskArgs {
                idx: core,
                read_pad,
                inputs: inputs.clone(),
                dst: dst.clone(),
            };
            let task = Task::new(operation_id, serde_json::to_value(&args)?)
                .with_tags(self.config.tags.iter().cloned());
            tasks.push(task);
        }
        debug!(
            idx = %idx.pformat(),
            counts = %tiling.counts(),
            read_pad = %read_pad,
            "Planned chunk tasks"
        );
        Ok((idx, tasks))
    }

    /// Runs `operation_id` over `idx` and waits for every chunk.
    pub fn run(
        &self,
        queue: &mut dyn ExecutionQueue,
        layers: &LayerBuilder,
        operation_id: &str,
        idx: &VolumetricIndex,
        inputs: BTreeMap<String, LayerSpec>,
        dst: DstLayer,
    ) -> Result<FlowReport, FlowError> {
        let start = Instant::now();
        let (idx, tasks) = self.plan(layers, operation_id, idx, &inputs, &dst)?;
        let num_tasks = tasks.len();
        let mut pending: HashSet<TaskId> = tasks.iter().map(|t| t.id.clone()).collect();

        info!(
            operation = operation_id,
            queue = %queue.name(),
            idx = %idx.pformat(),
            num_tasks,
            "Dispatching chunk tasks"
        );
        queue.push_tasks(tasks)?;

        let mut return_values = HashMap::with_capacity(num_tasks);
        while !pending.is_empty() {
            let outcomes =
                queue.pull_task_outcomes(self.config.pull_max_num, self.config.pull_max_time)?;
            if outcomes.is_empty() {
                std::thread::sleep(self.config.poll_interval);
                continue;
            }
            for (task_id, outcome) in outcomes {
                if !outcome.status.is_terminal() || !pending.contains(&task_id) {
                    continue;
                }
                pending.remove(&task_id);
                if outcome.status == TaskStatus::PermanentError {
                    let error = outcome.exception.unwrap_or_else(|| {
                        TaskError::new("task reported failure without an error")
                    });
                    return Err(FlowError::TaskFailed {
                        task_id,
                        operation: operation_id.to_string(),
                        error,
                    });
                }
                return_values.insert(task_id, outcome.return_value.unwrap_or(Value::Null));
            }
            info!(
                operation = operation_id,
                completed = num_tasks - pending.len(),
                total = num_tasks,
                "Flow progress"
            );
        }

        let elapsed = start.elapsed();
        info!(
            operation = operation_id,
            num_tasks,
            elapsed_ms = elapsed.as_millis() as u64,
            "Flow complete"
        );
        Ok(FlowReport {
            num_tasks,
            elapsed,
            return_values,
        })
    }

    fn build_dst(
        &self,
        layers: &LayerBuilder,
        dst: &DstLayer,
    ) -> Result<Vec<VolumetricLayer>, FlowError> {
        let specs = dst.specs();
        if specs.is_empty() {
            return Err(FlowError::Config("destination layer set is empty".into()));
        }
        specs
            .into_iter()
            .map(|(_, spec)| layers.build(spec).map_err(FlowError::from))
            .collect()
    }

    /// Snaps or validates `idx` against every destination's chunk grid.
    fn align(
        &self,
        dst_layers: &[VolumetricLayer],
        idx: &VolumetricIndex,
    ) -> Result<VolumetricIndex, FlowError> {
        let mut idx = idx.clone();
        if let (Some(mode), Some(first)) = (self.config.alignment.snap_mode(), dst_layers.first()) {
            let snapped = first.backend().get_chunk_aligned_index(&idx, mode)?;
            if snapped != idx {
                info!(
                    from = %idx.pformat(),
                    to = %snapped.pformat(),
                    mode = %mode,
                    "Aligned target index to destination chunks"
                );
            }
            idx = snapped;
        }
        for layer in dst_layers {
            layer.backend().assert_idx_is_chunk_aligned(&idx)?;
        }
        Ok(idx)
    }

    /// Requires the step to cover whole destination chunks.
    fn check_step(
        &self,
        dst_layers: &[VolumetricLayer],
        idx: &VolumetricIndex,
    ) -> Result<(), FlowError> {
        let step = self.config.step_size;
        for layer in dst_layers {
            let backend: &Arc<dyn Backend<Data = Tensor>> = layer.backend();
            let chunk = backend.get_chunk_size(idx.resolution())?;
            if (0..3).all(|i| step[i] % chunk[i] == 0) {
                continue;
            }
            let smaller = IntVec3D(std::array::from_fn(|i| {
                (step[i] / chunk[i]).max(1) * chunk[i]
            }));
            let larger = IntVec3D(std::array::from_fn(|i| {
                ((step[i] + chunk[i] - 1) / chunk[i]) * chunk[i]
            }));
            return Err(FlowError::StepNotChunkMultiple {
                layer: backend.name(),
                step_size: step,
                chunk_size: chunk,
                smaller,
                larger,
            });
        }
        Ok(())
    }
}
