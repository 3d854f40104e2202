//! Region IO over one scale's chunk grid.
//!
//! [`ScaleVolume`] turns voxel-region reads and writes into chunk-file
//! operations. Chunks along the far edge of the dataset are clipped to the
//! dataset bounds; chunks that were never written read as zeros.
//!
//! # Chunk Cache
//!
//! An optional moka cache holds decoded chunks, weighted by their size in
//! bytes. Writes refresh the cached copy of every chunk they touch.

use super::chunk::{chunk_name, read_chunk_file, write_chunk_file};
use super::error::{PrecomputedError, PrecomputedResult};
use super::info::{DataType, PrecomputedInfo, ScaleEntry, RAW_ENCODING};
use crate::geometry::{IntVec3D, Vec3D};
use crate::tensor::{extract, paste, spatial_shape, zeros, Tensor, TensorError};
use moka::sync::Cache;
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::trace;

/// Bytes per element of a decoded chunk.
const TENSOR_ELEMENT_BYTES: usize = std::mem::size_of::<f64>();

/// One chunk of the grid: its voxel range clipped to the dataset.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct ChunkCell {
    start: IntVec3D,
    end: IntVec3D,
}

impl ChunkCell {
    fn shape(&self) -> IntVec3D {
        self.end - self.start
    }

    fn name(&self) -> String {
        chunk_name(self.start, self.end)
    }
}

/// Reads and writes voxel regions of one scale.
pub struct ScaleVolume {
    root: PathBuf,
    scale: ScaleEntry,
    data_type: DataType,
    num_channels: usize,
    compress: bool,
    chunk_cache: Option<Cache<String, Arc<Tensor>>>,
}

impl ScaleVolume {
    /// Opens the scale at `resolution` of the volume at `root`.
    pub fn open(
        root: &Path,
        info: &PrecomputedInfo,
        resolution: Vec3D,
    ) -> PrecomputedResult<Self> {
        let scale = info.require_scale(resolution, root)?.clone();
        if scale.encoding != RAW_ENCODING {
            return Err(PrecomputedError::UnsupportedEncoding(scale.encoding));
        }
        let chunk_size = scale.chunk_size();
        if !chunk_size.is_positive() {
            return Err(PrecomputedError::InvalidChunkSize {
                key: scale.key,
                chunk_size,
            });
        }
        Ok(Self {
            root: root.to_path_buf(),
            scale,
            data_type: info.data_type,
            num_channels: info.num_channels,
            compress: false,
            chunk_cache: None,
        })
    }

    /// Gzip chunks on write.
    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    /// Keeps up to `max_bytes` of decoded chunks in memory.
    pub fn with_chunk_cache(mut self, max_bytes: u64) -> Self {
        let cache = Cache::builder()
            .weigher(|_key: &String, value: &Arc<Tensor>| -> u32 {
                (value.len() * TENSOR_ELEMENT_BYTES).min(u32::MAX as usize) as u32
            })
            .max_capacity(max_bytes)
            .build();
        self.chunk_cache = Some(cache);
        self
    }

    /// The scale description.
    pub fn scale(&self) -> &ScaleEntry {
        &self.scale
    }

    /// Channels per voxel.
    pub fn num_channels(&self) -> usize {
        self.num_channels
    }

    /// First voxel of the dataset.
    pub fn voxel_offset(&self) -> IntVec3D {
        self.scale.voxel_offset
    }

    /// Native chunk shape.
    pub fn chunk_size(&self) -> IntVec3D {
        self.scale.chunk_size()
    }

    /// Dataset extent in voxels.
    pub fn size(&self) -> IntVec3D {
        self.scale.size
    }

    /// Drops every cached chunk.
    pub fn clear_cache(&self) {
        if let Some(cache) = &self.chunk_cache {
            cache.invalidate_all();
        }
    }

    /// Drops cached chunks overlapping voxels `[start, start + shape)`.
    pub fn evict_region(&self, start: IntVec3D, shape: IntVec3D) {
        if let Some(cache) = &self.chunk_cache {
            for cell in self.cells_overlapping(start, start + shape) {
                cache.invalidate(&cell.name());
            }
        }
    }

    /// Bytes of decoded chunks currently cached.
    pub fn cached_bytes(&self) -> u64 {
        self.chunk_cache
            .as_ref()
            .map(|c| {
                c.run_pending_tasks();
                c.weighted_size()
            })
            .unwrap_or(0)
    }

    fn chunk_path(&self, cell: &ChunkCell) -> PathBuf {
        self.root.join(&self.scale.key).join(cell.name())
    }

    /// Grid cells overlapping `[start, end)`, clipped to the dataset.
    fn cells_overlapping(&self, start: IntVec3D, end: IntVec3D) -> Vec<ChunkCell> {
        let offset = self.voxel_offset();
        let chunk = self.chunk_size();
        let limit = offset + self.size();
        let mut ranges: [Vec<(i64, i64)>; 3] = Default::default();
        for axis in 0..3 {
            let lo = start[axis].max(offset[axis]);
            let hi = end[axis].min(limit[axis]);
            if lo >= hi {
                return Vec::new();
            }
            let first = (lo - offset[axis]).div_euclid(chunk[axis]);
            let last = (hi - offset[axis] - 1).div_euclid(chunk[axis]);
            ranges[axis] = (first..=last)
                .map(|i| {
                    let s = offset[axis] + i * chunk[axis];
                    (s, (s + chunk[axis]).min(limit[axis]))
                })
                .collect();
        }
        let mut cells = Vec::new();
        for &(z0, z1) in &ranges[2] {
            for &(y0, y1) in &ranges[1] {
                for &(x0, x1) in &ranges[0] {
                    cells.push(ChunkCell {
                        start: IntVec3D::new(x0, y0, z0),
                        end: IntVec3D::new(x1, y1, z1),
                    });
                }
            }
        }
        cells
    }

    fn load_chunk(&self, cell: &ChunkCell) -> PrecomputedResult<Arc<Tensor>> {
        let name = cell.name();
        if let Some(hit) = self.chunk_cache.as_ref().and_then(|c| c.get(&name)) {
            return Ok(hit);
        }
        let shape = cell
            .shape()
            .to_usize()
            .unwrap_or([0, 0, 0]);
        let data = read_chunk_file(&self.chunk_path(cell), self.data_type, self.num_channels, shape)?
            .unwrap_or_else(|| zeros(self.num_channels, shape));
        let data = Arc::new(data);
        if let Some(cache) = &self.chunk_cache {
            cache.insert(name, data.clone());
        }
        Ok(data)
    }

    fn store_chunk(&self, cell: &ChunkCell, data: Tensor) -> PrecomputedResult<()> {
        write_chunk_file(&self.chunk_path(cell), &data, self.data_type, self.compress)?;
        if let Some(cache) = &self.chunk_cache {
            cache.insert(cell.name(), Arc::new(data));
        }
        Ok(())
    }

    /// Reads voxels `[start, start + shape)`.
    ///
    /// Voxels outside the dataset read as zero.
    pub fn read_region(&self, start: IntVec3D, shape: IntVec3D) -> PrecomputedResult<Tensor> {
        let end = start + shape;
        let cells = self.cells_overlapping(start, end);
        trace!(key = %self.scale.key, chunks = cells.len(), "Reading region");

        let loaded = cells
            .par_iter()
            .map(|cell| self.load_chunk(cell).map(|data| (*cell, data)))
            .collect::<PrecomputedResult<Vec<_>>>()?;

        let dims = shape.to_usize().unwrap_or([0, 0, 0]);
        let mut out = zeros(self.num_channels, dims);
        for (cell, data) in loaded {
            let lo = cell.start.zip_map(start, i64::max);
            let hi = cell.end.zip_map(end, i64::min);
            let part = extract(&data, lo - cell.start, hi - lo)?;
            paste(&mut out, &part, lo - start)?;
        }
        Ok(out)
    }

    /// Writes `data` with its origin at voxel `start`.
    ///
    /// Voxels outside the dataset are dropped. A chunk only partly covered
    /// by the region is read, patched and rewritten when
    /// `allow_partial_chunks` is set, and rejected otherwise.
    pub fn write_region(
        &self,
        start: IntVec3D,
        data: &Tensor,
        allow_partial_chunks: bool,
    ) -> PrecomputedResult<()> {
        if data.dim().0 != self.num_channels {
            return Err(PrecomputedError::Tensor(TensorError::ShapeMismatch {
                expected: vec![self.num_channels],
                actual: vec![data.dim().0],
            }));
        }
        let end = start + spatial_shape(data);
        let cells = self.cells_overlapping(start, end);
        trace!(key = %self.scale.key, chunks = cells.len(), "Writing region");

        cells.par_iter().try_for_each(|cell| {
            let lo = cell.start.zip_map(start, i64::max);
            let hi = cell.end.zip_map(end, i64::min);
            let covered = lo == cell.start && hi == cell.end;
            let part = extract(data, lo - start, hi - lo)?;
            let chunk = if covered {
                part
            } else if allow_partial_chunks {
                let mut existing = self.load_chunk(cell)?.as_ref().clone();
                paste(&mut existing, &part, lo - cell.start)?;
                existing
            } else {
                return Err(PrecomputedError::UnalignedWrite {
                    region: format!("{} -> {}", start, end),
                    scale: self.scale.key.clone(),
                });
            };
            self.store_chunk(cell, chunk)
        })
    }
}
