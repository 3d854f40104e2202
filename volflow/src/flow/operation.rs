//! Per-chunk volumetric operation.
//!
//! A chunk task carries [`ChunkTaskArgs`]: the chunk's core index, how much
//! context to read around it, and descriptions of the input and destination
//! layers. [`VolumetricCallableOperation`] rebuilds those layers, reads the
//! padded region, applies a user function and writes the result cropped back
//! to the core. Cores of one tiling are disjoint, so concurrent chunks never
//! write the same voxels.

use crate::executor::{Operation, TaskError};
use crate::geometry::IntVec3D;
use crate::index::VolumetricIndex;
use crate::layer::{build_layer_set, LayerBuilder, LayerError, LayerSpec};
use crate::tensor::{crop, Tensor};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Where a chunk's result is written.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "layers", rename_all = "snake_case")]
pub enum DstLayer {
    /// One layer receiving a single tensor.
    Single(LayerSpec),
    /// Named layers receiving a map of tensors.
    Set(BTreeMap<String, LayerSpec>),
}

impl DstLayer {
    /// Every destination description, with its name for sets.
    pub fn specs(&self) -> Vec<(Option<&str>, &LayerSpec)> {
        match self {
            Self::Single(spec) => vec![(None, spec)],
            Self::Set(specs) => specs.iter().map(|(k, v)| (Some(k.as_str()), v)).collect(),
        }
    }
}

/// Serialized arguments of one chunk task.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChunkTaskArgs {
    /// Region written by the task.
    pub idx: VolumetricIndex,
    /// Voxels read on each side of `idx` and cropped from the result.
    pub read_pad: IntVec3D,
    pub inputs: BTreeMap<String, LayerSpec>,
    pub dst: DstLayer,
}

/// Result of a chunk function.
#[derive(Clone, Debug, PartialEq)]
pub enum ChunkOutput {
    Single(Tensor),
    Set(BTreeMap<String, Tensor>),
}

impl From<Tensor> for ChunkOutput {
    fn from(data: Tensor) -> Self {
        Self::Single(data)
    }
}

impl From<BTreeMap<String, Tensor>> for ChunkOutput {
    fn from(data: BTreeMap<String, Tensor>) -> Self {
        Self::Set(data)
    }
}

/// Converts a layer failure, keeping its retry classification.
pub(crate) fn layer_task_error(context: &str, err: LayerError) -> TaskError {
    let message = format!("{}: {}", context, err);
    let task_err = if err.is_transient() {
        TaskError::transient(message)
    } else {
        TaskError::new(message)
    };
    task_err.with_source(err)
}

/// Operation applying `func` to every chunk of a flow.
///
/// `func` receives the padded read index and the input data keyed by input
/// name. It must return data shaped like the padded index.
pub struct VolumetricCallableOperation<F> {
    name: String,
    func: F,
    layers: Arc<LayerBuilder>,
}

impl<F> VolumetricCallableOperation<F>
where
    F: Fn(&VolumetricIndex, &BTreeMap<String, Tensor>) -> Result<ChunkOutput, TaskError>
        + Send
        + Sync,
{
    pub fn new(name: impl Into<String>, func: F, layers: Arc<LayerBuilder>) -> Self {
        Self {
            name: name.into(),
            func,
            layers,
        }
    }

    fn read_inputs(
        &self,
        args: &ChunkTaskArgs,
        read_idx: &VolumetricIndex,
    ) -> Result<BTreeMap<String, Tensor>, TaskError> {
        let mut data = BTreeMap::new();
        for (name, spec) in &args.inputs {
            let layer = self
                .layers
                .build(spec)
                .map_err(|e| layer_task_error(&format!("building input '{}'", name), e))?;
            let tensor = layer
                .read(read_idx)
                .map_err(|e| layer_task_error(&format!("reading input '{}'", name), e))?;
            data.insert(name.clone(), tensor);
        }
        Ok(data)
    }

    fn write_output(&self, args: &ChunkTaskArgs, output: ChunkOutput) -> Result<(), TaskError> {
        match (&args.dst, output) {
            (DstLayer::Single(spec), ChunkOutput::Single(data)) => {
                let cropped = crop(&data, args.read_pad)
                    .map_err(|e| layer_task_error("cropping result", e.into()))?;
                let layer = self
                    .layers
                    .build(spec)
                    .map_err(|e| layer_task_error("building destination", e))?;
                layer
                    .write(&args.idx, cropped)
                    .map_err(|e| layer_task_error("writing destination", e))
            }
            (DstLayer::Set(specs), ChunkOutput::Set(data)) => {
                let mut layers = BTreeMap::new();
                for (name, spec) in specs {
                    let layer = self.layers.build(spec).map_err(|e| {
                        layer_task_error(&format!("building destination '{}'", name), e)
                    })?;
                    layers.insert(name.clone(), layer);
                }
                let mut cropped = BTreeMap::new();
                for (name, tensor) in data {
                    let tensor = crop(&tensor, args.read_pad)
                        .map_err(|e| layer_task_error("cropping result", e.into()))?;
                    cropped.insert(name, tensor);
                }
                build_layer_set(layers, false)
                    .write(&args.idx, cropped)
                    .map_err(|e| layer_task_error("writing destination set", e))
            }
            (DstLayer::Single(_), ChunkOutput::Set(_)) => Err(TaskError::new(
                "operation returned named tensors for a single destination layer",
            )),
            (DstLayer::Set(_), ChunkOutput::Single(_)) => Err(TaskError::new(
                "operation returned a single tensor for a destination layer set",
            )),
        }
    }
}

impl<F> Operation for VolumetricCallableOperation<F>
where
    F: Fn(&VolumetricIndex, &BTreeMap<String, Tensor>) -> Result<ChunkOutput, TaskError>
        + Send
        + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, args: &Value) -> Result<Value, TaskError> {
        let args: ChunkTaskArgs = serde_json::from_value(args.clone())
            .map_err(|e| TaskError::new(format!("invalid chunk task arguments: {}", e)))?;
        let read_idx = args.idx.padded(args.read_pad);
        debug!(operation = %self.name, idx = %args.idx.pformat(), "Processing chunk");

        let inputs = self.read_inputs(&args, &read_idx)?;
        let output = (self.func)(&read_idx, &inputs)?;
        self.write_output(&args, output)?;
        serde_json::to_value(&args.idx)
            .map_err(|e| TaskError::new("failed to encode chunk index").with_source(e))
    }
}
