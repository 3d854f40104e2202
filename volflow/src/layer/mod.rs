//! Backend-agnostic layers.
//!
//! A [`Layer`] wraps a [`Backend`](crate::backend::Backend) with an index
//! processing pipeline and read/write data processing pipelines:
//!
//! ```text
//! read:  idx ──► index_procs ──► backend.read ──► read_procs ──► data
//! write: idx ──► index_procs ──► write_procs(data) ──► backend.write
//! ```
//!
//! Layers are rebuilt inside tasks from serializable [`LayerSpec`]s through
//! a [`LayerBuilder`].

mod build;
mod error;
mod pipeline;
mod processor;
mod spec;

pub use build::{build_layer_set, build_volumetric_layer, VolumetricLayerOptions};
pub use error::{LayerError, LayerResult};
pub use pipeline::{Layer, LayerData, VolumetricLayer, VolumetricLayerSet};
pub use processor::{
    DataFn, DataProcessor, IndexFn, IndexProcessor, IoMode, VolDataInterpolator,
    VolIdxResolutionAdjuster, VolIdxTranslator,
};
pub use spec::{LayerBuilder, LayerSpec, ARRAY_STORE_TYPE, PRECOMPUTED_TYPE};
