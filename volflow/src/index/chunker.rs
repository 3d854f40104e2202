//! Splitting an index into a grid of chunk-sized tiles.
//!
//! The chunker lays a grid of step-sized *cores* over the parent region and
//! pads each core by half the overlap, so every tile has exactly the chunk
//! size and neighbouring tiles overlap by `chunk_size - step_size` voxels.
//! Cores partition the parent exactly; tiles along the border reach past it
//! by the overlap margin.
//!
//! # Ordering
//!
//! Tiles are numbered with x varying fastest, then y, then z:
//!
//! ```text
//! i = ix + nx * (iy + ny * iz)
//! ```
//!
//! The order depends only on the parent index and the chunk parameters.

use super::error::ChunkerError;
use super::volumetric::VolumetricIndex;
use crate::geometry::{IntVec3D, SnapMode};
use serde::{Deserialize, Serialize};
use std::iter::FusedIterator;

/// Chunk and step sizes, in voxels at the parent's resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumetricIndexChunker {
    chunk_size: IntVec3D,
    step_size: IntVec3D,
}

impl VolumetricIndexChunker {
    /// Creates a chunker.
    ///
    /// Both sizes must be positive, the step may not exceed the chunk, and
    /// the overlap `chunk_size - step_size` must be even along each axis so
    /// that it splits evenly between the two sides of a core.
    pub fn new(chunk_size: IntVec3D, step_size: IntVec3D) -> Result<Self, ChunkerError> {
        if !chunk_size.is_positive() || !step_size.is_positive() {
            return Err(ChunkerError::NonPositiveSize {
                chunk_size,
                step_size,
            });
        }
        let overlap = chunk_size - step_size;
        if !overlap.is_non_negative() {
            return Err(ChunkerError::StepExceedsChunk {
                chunk_size,
                step_size,
            });
        }
        if overlap.0.iter().any(|o| o % 2 != 0) {
            return Err(ChunkerError::OddOverlap {
                chunk_size,
                step_size,
            });
        }
        Ok(Self {
            chunk_size,
            step_size,
        })
    }

    /// Creates a chunker whose tiles do not overlap.
    pub fn non_overlapping(chunk_size: IntVec3D) -> Result<Self, ChunkerError> {
        Self::new(chunk_size, chunk_size)
    }

    /// Tile size in voxels.
    pub fn chunk_size(&self) -> IntVec3D {
        self.chunk_size
    }

    /// Distance between neighbouring tiles in voxels.
    pub fn step_size(&self) -> IntVec3D {
        self.step_size
    }

    /// Padding added to each side of a core to reach the chunk size.
    pub fn overlap_margin(&self) -> IntVec3D {
        (self.chunk_size - self.step_size).zip_map(IntVec3D::splat(2), |a, b| a / b)
    }

    /// Tiles `idx`.
    ///
    /// The parent extent must be an exact multiple of the step size. When it
    /// is not, the error names the nearest expanded and shrunk regions that
    /// would tile cleanly.
    pub fn tile(&self, idx: &VolumetricIndex) -> Result<ChunkTiling, ChunkerError> {
        let shape = idx.shape();
        let divisible = (0..3).all(|i| shape[i] % self.step_size[i] == 0);
        if !divisible {
            let start = idx.start();
            return Err(ChunkerError::NotDivisible {
                index: idx.pformat(),
                shape,
                step_size: self.step_size,
                expanded: idx
                    .snapped(start, self.step_size, SnapMode::Expand)
                    .pformat(),
                shrunk: idx
                    .snapped(start, self.step_size, SnapMode::Shrink)
                    .pformat(),
            });
        }
        let counts = IntVec3D(std::array::from_fn(|i| {
            (shape[i] / self.step_size[i]).max(0)
        }));
        Ok(ChunkTiling {
            parent: idx.clone(),
            step_size: self.step_size,
            margin: self.overlap_margin(),
            counts,
        })
    }
}

/// The tiles of one parent index.
///
/// Random access and iteration are both pure functions of the parent and the
/// chunker parameters, so a tiling can be walked repeatedly.
#[derive(Clone, Debug)]
pub struct ChunkTiling {
    parent: VolumetricIndex,
    step_size: IntVec3D,
    margin: IntVec3D,
    counts: IntVec3D,
}

impl ChunkTiling {
    /// Number of tiles.
    pub fn len(&self) -> usize {
        self.counts.volume() as usize
    }

    /// Returns true if the parent has no volume.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Tiles along x, y and z.
    pub fn counts(&self) -> IntVec3D {
        self.counts
    }

    /// The region tiled.
    pub fn parent(&self) -> &VolumetricIndex {
        &self.parent
    }

    /// Padding between a tile and its core on each side.
    pub fn overlap_margin(&self) -> IntVec3D {
        self.margin
    }

    /// Grid position of tile `i`.
    pub fn grid_position(&self, i: usize) -> Option<IntVec3D> {
        if i >= self.len() {
            return None;
        }
        let i = i as i64;
        let [nx, ny, _] = self.counts.0;
        Some(IntVec3D::new(i % nx, (i / nx) % ny, i / (nx * ny)))
    }

    /// Step-sized core of tile `i`. Cores partition the parent.
    pub fn core(&self, i: usize) -> Option<VolumetricIndex> {
        let pos = self.grid_position(i)?;
        let start = pos * self.step_size;
        Some(
            self.parent
                .translated_start(start)
                .translated_end(start + self.step_size - self.parent.shape()),
        )
    }

    /// Tile `i`: its core padded by the overlap margin.
    pub fn get(&self, i: usize) -> Option<VolumetricIndex> {
        self.core(i).map(|core| core.padded(self.margin))
    }

    /// Iterates the tiles in order.
    pub fn iter(&self) -> ChunkTilingIter<'_> {
        ChunkTilingIter {
            tiling: self,
            next: 0,
        }
    }
}

impl<'a> IntoIterator for &'a ChunkTiling {
    type Item = VolumetricIndex;
    type IntoIter = ChunkTilingIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the tiles of a [`ChunkTiling`].
#[derive(Clone, Debug)]
pub struct ChunkTilingIter<'a> {
    tiling: &'a ChunkTiling,
    next: usize,
}

impl Iterator for ChunkTilingIter<'_> {
    type Item = VolumetricIndex;

    fn next(&mut self) -> Option<Self::Item> {
        let tile = self.tiling.get(self.next)?;
        self.next += 1;
        Some(tile)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.tiling.len().saturating_sub(self.next);
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for ChunkTilingIter<'_> {}

impl FusedIterator for ChunkTilingIter<'_> {}
