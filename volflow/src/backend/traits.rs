//! The backend capability set.
//!
//! A [`Backend`] is one storage technology's implementation of volumetric
//! IO over its native chunk grid. Layers, the backend cache and the
//! chunked-execution driver depend only on this trait.

use super::error::{BackendError, BackendResult};
use crate::geometry::{IntVec3D, SnapMode, Vec3D};
use crate::index::VolumetricIndex;
use crate::tensor::{paste, zeros, LayerType, Tensor};

/// Volumetric storage with a native chunk grid per resolution.
pub trait Backend: Send + Sync {
    /// What a read returns and a write accepts.
    type Data;

    /// Identifies the storage location.
    fn name(&self) -> String;

    /// Reads the region `idx`. Parts outside the dataset read as zero.
    fn read(&self, idx: &VolumetricIndex) -> BackendResult<Self::Data>;

    /// Writes `data` to the region `idx`.
    fn write(&self, idx: &VolumetricIndex, data: &Self::Data) -> BackendResult<()>;

    /// First voxel of the dataset at `resolution`.
    fn get_voxel_offset(&self, resolution: Vec3D) -> BackendResult<IntVec3D>;

    /// Native chunk shape at `resolution`.
    fn get_chunk_size(&self, resolution: Vec3D) -> BackendResult<IntVec3D>;

    /// Dataset extent in voxels at `resolution`.
    fn get_dataset_size(&self, resolution: Vec3D) -> BackendResult<IntVec3D>;

    /// Semantic type of the stored data.
    fn layer_type(&self) -> BackendResult<LayerType> {
        Ok(LayerType::Image)
    }

    /// Dataset region at `resolution`.
    fn get_bounds(&self, resolution: Vec3D) -> BackendResult<VolumetricIndex> {
        let offset = self.get_voxel_offset(resolution)?;
        let size = self.get_dataset_size(resolution)?;
        Ok(VolumetricIndex::from_coords(
            offset,
            offset + size,
            resolution,
        )?)
    }

    /// `idx` snapped to the native chunk grid.
    fn get_chunk_aligned_index(
        &self,
        idx: &VolumetricIndex,
        mode: SnapMode,
    ) -> BackendResult<VolumetricIndex> {
        let offset = self.get_voxel_offset(idx.resolution())?;
        let chunk_size = self.get_chunk_size(idx.resolution())?;
        Ok(idx.snapped(offset, chunk_size, mode))
    }

    /// Fails unless `idx` lies on the native chunk grid.
    ///
    /// The error names the nearest expanded and shrunk aligned indices.
    fn assert_idx_is_chunk_aligned(&self, idx: &VolumetricIndex) -> BackendResult<()> {
        let expanded = self.get_chunk_aligned_index(idx, SnapMode::Expand)?;
        let shrunk = self.get_chunk_aligned_index(idx, SnapMode::Shrink)?;
        if *idx == expanded || *idx == shrunk {
            return Ok(());
        }
        Err(BackendError::ChunkAlignment {
            backend: self.name(),
            index: idx.pformat(),
            voxel_offset: self.get_voxel_offset(idx.resolution())?,
            chunk_size: self.get_chunk_size(idx.resolution())?,
            expanded: expanded.pformat(),
            shrunk: shrunk.pformat(),
        })
    }
}

/// Reads `idx` through `read_inner`, which only ever sees the part of `idx`
/// inside `bounds`, and zero-fills the rest.
pub(crate) fn read_zero_filled(
    idx: &VolumetricIndex,
    bounds: &VolumetricIndex,
    num_channels: usize,
    read_inner: impl FnOnce(&VolumetricIndex) -> BackendResult<Tensor>,
) -> BackendResult<Tensor> {
    let shape = idx.shape().to_usize().unwrap_or([0, 0, 0]);
    if !idx.intersects(bounds) {
        return Ok(zeros(num_channels, shape));
    }
    let inner = idx.intersection(bounds)?;
    let data = read_inner(&inner)?;
    if inner == *idx {
        return Ok(data);
    }
    let mut out = zeros(num_channels, shape);
    paste(&mut out, &data, inner.start() - idx.start())?;
    Ok(out)
}

/// Checks that `data` fits `idx` with `num_channels` channels.
pub(crate) fn check_data_shape(
    idx: &VolumetricIndex,
    data: &Tensor,
    num_channels: usize,
) -> BackendResult<()> {
    let shape = idx.shape().to_usize().unwrap_or([0, 0, 0]);
    let expected = vec![num_channels, shape[0], shape[1], shape[2]];
    if data.shape() != expected.as_slice() {
        return Err(BackendError::DataShape {
            expected,
            actual: data.shape().to_vec(),
        });
    }
    Ok(())
}
