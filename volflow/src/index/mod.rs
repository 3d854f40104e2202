//! Spatial indices and tilings.
//!
//! - [`VolumetricIndex`]: a region at a resolution
//! - [`VolumetricIndexChunker`] / [`ChunkTiling`]: chunk grids over a region,
//!   optionally overlapping
//! - [`VolumetricStepIndexer`]: strided sample windows that round the region
//!   down instead of rejecting it

mod chunker;
mod error;
mod step_indexer;
mod volumetric;

pub use chunker::{ChunkTiling, ChunkTilingIter, VolumetricIndexChunker};
pub use error::ChunkerError;
pub use step_indexer::VolumetricStepIndexer;
pub use volumetric::VolumetricIndex;
