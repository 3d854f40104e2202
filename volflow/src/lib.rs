//! Volflow - chunked, fault-tolerant processing of large volumetric datasets.
//!
//! The crate splits a 3-D region into chunk-sized tasks, runs them through
//! pluggable execution queues with retry semantics, and lets each task read
//! and write a sub-region of a volume through a backend-agnostic layer.
//!
//! # Architecture
//!
//! ```text
//! VolumetricIndex ──► VolumetricIndexChunker ──► ChunkedFlow ──► Task per chunk
//!                                                    │
//!                                                    ▼
//!                                             ExecutionQueue (local / multi)
//!                                                    │
//!                                                    ▼
//!                            Layer ──► index processors ──► Backend ──► data processors
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use volflow::backend::BackendCache;
//! use volflow::executor::{LocalExecutionQueue, OperationRegistry};
//! use volflow::flow::{ChunkedFlow, ChunkedFlowConfig, DstLayer, VolumetricCallableOperation};
//! use volflow::layer::LayerBuilder;
//!
//! let layers = Arc::new(LayerBuilder::new(Arc::new(BackendCache::default())));
//! let mut registry = OperationRegistry::new();
//! registry.register(Arc::new(VolumetricCallableOperation::new("copy", copy_fn, layers.clone())))?;
//!
//! let mut queue = LocalExecutionQueue::new(Arc::new(registry));
//! let flow = ChunkedFlow::new(ChunkedFlowConfig::new(IntVec3D::new(64, 64, 16)));
//! flow.run(&mut queue, &layers, "copy", &idx, inputs, DstLayer::Single(dst))?;
//! ```

pub mod backend;
pub mod config;
pub mod executor;
pub mod flow;
pub mod geometry;
pub mod index;
pub mod layer;
pub mod logging;
pub mod precomputed;
pub mod registry;
pub mod tensor;

pub use geometry::{BBox3D, DomainError, IntVec3D, SnapMode, Vec3D};
pub use index::{ChunkTiling, VolumetricIndex, VolumetricIndexChunker};
pub use tensor::Tensor;
