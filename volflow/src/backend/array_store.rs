//! Multiscale array store backend with cached scale handles.
//!
//! Handles are opened lazily, one per `(path, resolution)`, and kept in a
//! shared [`BackendCache`]. Each handle carries its own bounded chunk cache.
//! Writes always read, patch and rewrite partially covered chunks while
//! holding the handle's write lock.

use super::cache::{BackendCache, ScaleHandle, DEFAULT_HANDLE_CACHE_BYTES};
use super::error::{BackendError, BackendResult};
use super::precomputed::BackendChanges;
use super::traits::{check_data_shape, read_zero_filled, Backend};
use crate::geometry::{IntVec3D, Vec3D};
use crate::index::VolumetricIndex;
use crate::precomputed::{InfoExistsMode, InfoSpec, PrecomputedInfo, ScaleVolume};
use crate::tensor::{LayerType, Tensor};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Type B backend: resolution-keyed handles through a shared cache.
#[derive(Clone)]
pub struct ArrayStoreBackend {
    path: PathBuf,
    cache: Arc<BackendCache>,
    handle_cache_bytes: u64,
    compress: bool,
}

impl std::fmt::Debug for ArrayStoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArrayStoreBackend")
            .field("path", &self.path)
            .field("handle_cache_bytes", &self.handle_cache_bytes)
            .field("compress", &self.compress)
            .finish()
    }
}

impl ArrayStoreBackend {
    /// Opens the store at `path`, reconciling its info document with
    /// `info_spec` first.
    ///
    /// Cached handles of `path` are dropped when the document changes.
    pub fn new(
        path: impl Into<PathBuf>,
        cache: Arc<BackendCache>,
        info_spec: &InfoSpec,
        on_info_exists: InfoExistsMode,
    ) -> BackendResult<Self> {
        let path = path.into();
        let backend = Self {
            path,
            cache,
            handle_cache_bytes: DEFAULT_HANDLE_CACHE_BYTES,
            compress: false,
        };
        if info_spec.update_info(&backend.path, on_info_exists)? {
            backend.cache.invalidate(&backend.name());
        }
        if PrecomputedInfo::read(&backend.path)?.is_none() {
            return Err(BackendError::MissingInfo(backend.name()));
        }
        Ok(backend)
    }

    /// Opens an existing store as is.
    pub fn open(path: impl Into<PathBuf>, cache: Arc<BackendCache>) -> BackendResult<Self> {
        Self::new(path, cache, &InfoSpec::new(), InfoExistsMode::ExpectSame)
    }

    /// Chunk cache budget of handles this backend opens.
    pub fn with_handle_cache_bytes(mut self, bytes: u64) -> Self {
        self.handle_cache_bytes = bytes;
        self
    }

    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn handle(&self, resolution: Vec3D) -> BackendResult<Arc<ScaleHandle>> {
        self.cache.get_or_open(&self.name(), resolution, || {
            let info = PrecomputedInfo::read(&self.path)?
                .ok_or_else(|| BackendError::MissingInfo(self.name()))?;
            let volume = ScaleVolume::open(&self.path, &info, resolution)?
                .with_compression(self.compress)
                .with_chunk_cache(self.handle_cache_bytes);
            Ok(ScaleHandle::new(volume, info.layer_type, self.handle_cache_bytes))
        })
    }

    /// Drops this store's cached handles and their chunks.
    pub fn clear_cache(&self) -> usize {
        self.cache.invalidate(&self.name())
    }

    /// Returns a backend for a store whose document is this one's with
    /// `changes` applied, dropping cached handles of both locations.
    pub fn with_changes(&self, changes: &BackendChanges) -> BackendResult<Self> {
        let spec = changes.to_info_spec(&self.path);
        let target = changes.target(&self.path);
        let changed = Self::new(target, self.cache.clone(), &spec, InfoExistsMode::Overwrite)?
            .with_handle_cache_bytes(self.handle_cache_bytes)
            .with_compression(self.compress);
        let dropped = self.clear_cache() + changed.clear_cache();
        debug!(from = %self.name(), to = %changed.name(), dropped, "Applied backend changes");
        Ok(changed)
    }
}

impl Backend for ArrayStoreBackend {
    type Data = Tensor;

    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn read(&self, idx: &VolumetricIndex) -> BackendResult<Tensor> {
        let handle = self.handle(idx.resolution())?;
        let volume = handle.volume();
        let bounds = VolumetricIndex::from_coords(
            volume.voxel_offset(),
            volume.voxel_offset() + volume.size(),
            idx.resolution(),
        )?;
        read_zero_filled(idx, &bounds, volume.num_channels(), |inner| {
            Ok(volume.read_region(inner.start(), inner.shape())?)
        })
    }

    fn write(&self, idx: &VolumetricIndex, data: &Tensor) -> BackendResult<()> {
        let handle = self.handle(idx.resolution())?;
        check_data_shape(idx, data, handle.volume().num_channels())?;
        let _guard = handle.lock_writes();
        handle.volume().write_region(idx.start(), data, true)?;
        Ok(())
    }

    fn get_voxel_offset(&self, resolution: Vec3D) -> BackendResult<IntVec3D> {
        Ok(self.handle(resolution)?.volume().voxel_offset())
    }

    fn get_chunk_size(&self, resolution: Vec3D) -> BackendResult<IntVec3D> {
        Ok(self.handle(resolution)?.volume().chunk_size())
    }

    fn get_dataset_size(&self, resolution: Vec3D) -> BackendResult<IntVec3D> {
        Ok(self.handle(resolution)?.volume().size())
    }

    fn layer_type(&self) -> BackendResult<LayerType> {
        Ok(PrecomputedInfo::read(&self.path)?
            .ok_or_else(|| BackendError::MissingInfo(self.name()))?
            .layer_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::precomputed::ScaleEntry;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use serde_json::json;
    use tempfile::TempDir;

    fn res() -> Vec3D {
        Vec3D::new(4.0, 4.0, 40.0)
    }

    fn spec(chunk: IntVec3D) -> InfoSpec {
        let scale = ScaleEntry::new(res(), IntVec3D::ZERO, IntVec3D::new(16, 16, 8), chunk);
        InfoSpec::new()
            .with_field_override("type", json!("image"))
            .with_field_override("data_type", json!("uint8"))
            .with_field_override("num_channels", json!(1))
            .with_field_override("scales", json!([scale]))
    }

    fn idx(s: [i64; 3], e: [i64; 3]) -> VolumetricIndex {
        VolumetricIndex::from_coords(IntVec3D(s), IntVec3D(e), res()).unwrap()
    }

    #[test]
    fn test_handles_are_cached() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(BackendCache::new(1 << 30));
        let backend = ArrayStoreBackend::new(
            dir.path(),
            cache.clone(),
            &spec(IntVec3D::splat(8)),
            InfoExistsMode::ExpectSame,
        )
        .unwrap();
        assert_eq!(backend.get_chunk_size(res()).unwrap(), IntVec3D::splat(8));
        assert!(cache.contains(&backend.name(), res()));
        assert_eq!(backend.clear_cache(), 1);
        assert!(!cache.contains(&backend.name(), res()));
    }

    #[test]
    fn test_unaligned_write_is_read_modify_write() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(BackendCache::default());
        let backend = ArrayStoreBackend::new(
            dir.path(),
            cache,
            &spec(IntVec3D::splat(8)),
            InfoExistsMode::ExpectSame,
        )
        .unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let data = Tensor::from_shape_fn((1, 5, 3, 2), |_| rng.random_range(0..=255u8) as f64);
        let i = idx([3, 1, 2], [8, 4, 4]);
        backend.write(&i, &data).unwrap();
        assert_eq!(backend.read(&i).unwrap(), data);
        assert_eq!(backend.read(&idx([0, 0, 0], [1, 1, 1])).unwrap()[[0, 0, 0, 0]], 0.0);
    }

    #[test]
    fn test_with_changes_invalidates() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(BackendCache::default());
        let backend = ArrayStoreBackend::new(
            dir.path(),
            cache.clone(),
            &spec(IntVec3D::splat(8)),
            InfoExistsMode::ExpectSame,
        )
        .unwrap();
        backend.get_chunk_size(res()).unwrap();
        let changed = backend
            .with_changes(&BackendChanges::new().with_chunk_size(res(), IntVec3D::splat(4)))
            .unwrap();
        assert!(!cache.contains(&backend.name(), res()));
        assert_eq!(changed.get_chunk_size(res()).unwrap(), IntVec3D::splat(4));
        assert_eq!(backend.get_chunk_size(res()).unwrap(), IntVec3D::splat(4));
    }

    #[test]
    fn test_reconcile_invalidates_stale_handles() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(BackendCache::default());
        let first = ArrayStoreBackend::new(
            dir.path(),
            cache.clone(),
            &spec(IntVec3D::splat(8)),
            InfoExistsMode::ExpectSame,
        )
        .unwrap();
        first.get_chunk_size(res()).unwrap();
        let second = ArrayStoreBackend::new(
            dir.path(),
            cache,
            &spec(IntVec3D::splat(4)),
            InfoExistsMode::Overwrite,
        )
        .unwrap();
        assert_eq!(second.get_chunk_size(res()).unwrap(), IntVec3D::splat(4));
    }
}
