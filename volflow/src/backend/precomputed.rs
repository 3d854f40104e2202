//! Chunked array store backend driven by an info document.
//!
//! Every query reads the volume's info document, so grid parameters always
//! reflect what is on disk. Writes that cover native chunks only partially
//! are rejected unless `enforce_chunk_aligned_writes` is turned off, in
//! which case the affected chunks are read, patched and rewritten.

use super::cache::BackendCache;
use super::error::{BackendError, BackendResult};
use super::traits::{check_data_shape, read_zero_filled, Backend};
use crate::geometry::{IntVec3D, Vec3D};
use crate::index::VolumetricIndex;
use crate::precomputed::{InfoExistsMode, InfoSpec, PrecomputedInfo, ScaleVolume};
use crate::tensor::{LayerType, Tensor};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Grid changes applied by `with_changes`.
///
/// Each field is optional; unset fields keep the current value.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BackendChanges {
    /// Location of the new volume. Defaults to the current one.
    pub name: Option<PathBuf>,
    /// New voxel offset at a resolution.
    pub voxel_offset: Option<(Vec3D, IntVec3D)>,
    /// New chunk size at a resolution.
    pub chunk_size: Option<(Vec3D, IntVec3D)>,
}

impl BackendChanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_name(mut self, name: impl Into<PathBuf>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_voxel_offset(mut self, resolution: Vec3D, voxel_offset: IntVec3D) -> Self {
        self.voxel_offset = Some((resolution, voxel_offset));
        self
    }

    pub fn with_chunk_size(mut self, resolution: Vec3D, chunk_size: IntVec3D) -> Self {
        self.chunk_size = Some((resolution, chunk_size));
        self
    }

    /// Info specification that rewrites the document at `current` with
    /// these changes.
    pub(crate) fn to_info_spec(&self, current: &Path) -> InfoSpec {
        let mut spec = InfoSpec::new().with_reference_path(current);
        if let Some((resolution, offset)) = self.voxel_offset {
            spec = spec.with_voxel_offset(resolution, offset);
        }
        if let Some((resolution, chunk)) = self.chunk_size {
            spec = spec.with_chunk_size(resolution, chunk);
        }
        spec
    }

    /// Target path of the changed backend.
    pub(crate) fn target(&self, current: &Path) -> PathBuf {
        self.name.clone().unwrap_or_else(|| current.to_path_buf())
    }
}

/// Type A backend: a precomputed volume on the local filesystem.
///
/// When given the shared [`BackendCache`], document rewrites drop the cached
/// handles of the path and writes drop the cached chunks they touch, so
/// array store backends over the same path never serve stale data.
#[derive(Clone)]
pub struct PrecomputedBackend {
    path: PathBuf,
    info_spec: InfoSpec,
    on_info_exists: InfoExistsMode,
    enforce_chunk_aligned_writes: bool,
    compress: bool,
    cache: Option<Arc<BackendCache>>,
}

impl fmt::Debug for PrecomputedBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrecomputedBackend")
            .field("path", &self.path)
            .field("on_info_exists", &self.on_info_exists)
            .field("enforce_chunk_aligned_writes", &self.enforce_chunk_aligned_writes)
            .field("compress", &self.compress)
            .field("shares_cache", &self.cache.is_some())
            .finish()
    }
}

impl PrecomputedBackend {
    /// Opens the volume at `path`, first reconciling its info document
    /// with `info_spec`.
    ///
    /// Fails if the volume ends up without a document.
    pub fn new(
        path: impl Into<PathBuf>,
        info_spec: InfoSpec,
        on_info_exists: InfoExistsMode,
    ) -> BackendResult<Self> {
        Self::create(path.into(), info_spec, on_info_exists, None)
    }

    /// Like [`PrecomputedBackend::new`], keeping `cache` coherent with
    /// everything this backend writes.
    pub fn with_shared_cache(
        path: impl Into<PathBuf>,
        cache: Arc<BackendCache>,
        info_spec: InfoSpec,
        on_info_exists: InfoExistsMode,
    ) -> BackendResult<Self> {
        Self::create(path.into(), info_spec, on_info_exists, Some(cache))
    }

    fn create(
        path: PathBuf,
        info_spec: InfoSpec,
        on_info_exists: InfoExistsMode,
        cache: Option<Arc<BackendCache>>,
    ) -> BackendResult<Self> {
        let backend = Self {
            path,
            info_spec,
            on_info_exists,
            enforce_chunk_aligned_writes: true,
            compress: false,
            cache,
        };
        if backend.info_spec.update_info(&backend.path, on_info_exists)? {
            debug!(path = %backend.path.display(), "Wrote info document");
            if let Some(cache) = &backend.cache {
                cache.invalidate(&backend.name());
            }
        }
        backend.load_info()?;
        Ok(backend)
    }

    /// Opens an existing volume as is.
    pub fn open(path: impl Into<PathBuf>) -> BackendResult<Self> {
        Self::new(path, InfoSpec::new(), InfoExistsMode::ExpectSame)
    }

    pub fn with_enforce_chunk_aligned_writes(mut self, enforce: bool) -> Self {
        self.enforce_chunk_aligned_writes = enforce;
        self
    }

    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn info_spec(&self) -> &InfoSpec {
        &self.info_spec
    }

    pub fn on_info_exists(&self) -> InfoExistsMode {
        self.on_info_exists
    }

    /// Reads the current info document.
    pub fn load_info(&self) -> BackendResult<PrecomputedInfo> {
        PrecomputedInfo::read(&self.path)?.ok_or_else(|| BackendError::MissingInfo(self.name()))
    }

    fn open_scale(&self, resolution: Vec3D) -> BackendResult<ScaleVolume> {
        let info = self.load_info()?;
        Ok(ScaleVolume::open(&self.path, &info, resolution)?.with_compression(self.compress))
    }

    /// Returns a backend for a volume whose document is this one's with
    /// `changes` applied. The new document overwrites any existing one.
    pub fn with_changes(&self, changes: &BackendChanges) -> BackendResult<Self> {
        let spec = changes.to_info_spec(&self.path);
        let target = changes.target(&self.path);
        Ok(Self::create(target, spec, InfoExistsMode::Overwrite, self.cache.clone())?
            .with_enforce_chunk_aligned_writes(self.enforce_chunk_aligned_writes)
            .with_compression(self.compress))
    }
}

impl Backend for PrecomputedBackend {
    type Data = Tensor;

    fn name(&self) -> String {
        self.path.display().to_string()
    }

    fn read(&self, idx: &VolumetricIndex) -> BackendResult<Tensor> {
        let volume = self.open_scale(idx.resolution())?;
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
        let volume = self.open_scale(idx.resolution())?;
        check_data_shape(idx, data, volume.num_channels())?;
        volume.write_region(idx.start(), data, !self.enforce_chunk_aligned_writes)?;
        if let Some(cache) = &self.cache {
            cache.evict_region(&self.name(), idx.resolution(), idx.start(), idx.shape());
        }
        Ok(())
    }

    fn get_voxel_offset(&self, resolution: Vec3D) -> BackendResult<IntVec3D> {
        let info = self.load_info()?;
        Ok(info.require_scale(resolution, &self.path)?.voxel_offset)
    }

    fn get_chunk_size(&self, resolution: Vec3D) -> BackendResult<IntVec3D> {
        let info = self.load_info()?;
        Ok(info.require_scale(resolution, &self.path)?.chunk_size())
    }

    fn get_dataset_size(&self, resolution: Vec3D) -> BackendResult<IntVec3D> {
        let info = self.load_info()?;
        Ok(info.require_scale(resolution, &self.path)?.size)
    }

    fn layer_type(&self) -> BackendResult<LayerType> {
        Ok(self.load_info()?.layer_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::ArrayStoreBackend;
    use crate::precomputed::{DataType, PrecomputedError, ScaleEntry};
    use crate::tensor::zeros;
    use ndarray::Array4;
    use serde_json::json;
    use tempfile::TempDir;

    fn res() -> Vec3D {
        Vec3D::new(4.0, 4.0, 40.0)
    }

    fn spec() -> InfoSpec {
        let scale = ScaleEntry::new(res(), IntVec3D::ZERO, IntVec3D::new(16, 16, 8), IntVec3D::new(8, 8, 4));
        InfoSpec::new()
            .with_field_override("type", json!("image"))
            .with_field_override("data_type", json!("float32"))
            .with_field_override("num_channels", json!(1))
            .with_field_override("scales", json!([scale]))
    }

    fn idx(s: [i64; 3], e: [i64; 3]) -> VolumetricIndex {
        VolumetricIndex::from_coords(IntVec3D(s), IntVec3D(e), res()).unwrap()
    }

    #[test]
    fn test_missing_info() {
        let dir = TempDir::new().unwrap();
        let err = PrecomputedBackend::open(dir.path().join("vol")).unwrap_err();
        assert!(matches!(err, BackendError::MissingInfo(_)));
    }

    #[test]
    fn test_grid_queries() {
        let dir = TempDir::new().unwrap();
        let backend = PrecomputedBackend::new(dir.path(), spec(), InfoExistsMode::ExpectSame).unwrap();
        assert_eq!(backend.get_chunk_size(res()).unwrap(), IntVec3D::new(8, 8, 4));
        assert_eq!(backend.get_voxel_offset(res()).unwrap(), IntVec3D::ZERO);
        assert_eq!(backend.get_bounds(res()).unwrap(), idx([0, 0, 0], [16, 16, 8]));
        assert!(matches!(
            backend.get_chunk_size(Vec3D::new(8.0, 8.0, 40.0)),
            Err(BackendError::Precomputed(PrecomputedError::ScaleNotFound { .. }))
        ));
    }

    #[test]
    fn test_aligned_write_read() {
        let dir = TempDir::new().unwrap();
        let backend = PrecomputedBackend::new(dir.path(), spec(), InfoExistsMode::ExpectSame).unwrap();
        let i = idx([0, 8, 0], [16, 16, 8]);
        let data = Array4::from_shape_fn((1, 16, 8, 8), |(_, x, y, z)| (x + 2 * y + 3 * z) as f64);
        backend.write(&i, &data).unwrap();
        assert_eq!(backend.read(&i).unwrap(), data);
    }

    #[test]
    fn test_read_beyond_bounds_zero_padded() {
        let dir = TempDir::new().unwrap();
        let backend = PrecomputedBackend::new(dir.path(), spec(), InfoExistsMode::ExpectSame).unwrap();
        let data = Array4::from_elem((1, 16, 16, 8), 5.0);
        backend.write(&idx([0, 0, 0], [16, 16, 8]), &data).unwrap();
        let out = backend.read(&idx([-4, 0, 0], [4, 4, 4])).unwrap();
        assert_eq!(out.dim(), (1, 8, 4, 4));
        assert_eq!(out[[0, 0, 0, 0]], 0.0);
        assert_eq!(out[[0, 4, 0, 0]], 5.0);
    }

    #[test]
    fn test_unaligned_write_rules() {
        let dir = TempDir::new().unwrap();
        let backend = PrecomputedBackend::new(dir.path(), spec(), InfoExistsMode::ExpectSame).unwrap();
        let i = idx([2, 2, 0], [6, 6, 4]);
        let data = Array4::from_elem((1, 4, 4, 4), 1.0);
        assert!(matches!(
            backend.write(&i, &data),
            Err(BackendError::Precomputed(PrecomputedError::UnalignedWrite { .. }))
        ));
        let relaxed = backend.clone().with_enforce_chunk_aligned_writes(false);
        relaxed.write(&i, &data).unwrap();
        assert_eq!(relaxed.read(&i).unwrap(), data);
    }

    #[test]
    fn test_data_shape_mismatch() {
        let dir = TempDir::new().unwrap();
        let backend = PrecomputedBackend::new(dir.path(), spec(), InfoExistsMode::ExpectSame).unwrap();
        let err = backend
            .write(&idx([0, 0, 0], [8, 8, 4]), &zeros(1, [8, 8, 8]))
            .unwrap_err();
        assert!(matches!(err, BackendError::DataShape { .. }));
    }

    #[test]
    fn test_with_changes() {
        let dir = TempDir::new().unwrap();
        let backend = PrecomputedBackend::new(dir.path().join("a"), spec(), InfoExistsMode::ExpectSame).unwrap();
        let changed = backend
            .with_changes(
                &BackendChanges::new()
                    .with_name(dir.path().join("b"))
                    .with_chunk_size(res(), IntVec3D::new(4, 4, 4))
                    .with_voxel_offset(res(), IntVec3D::new(4, 0, 0)),
            )
            .unwrap();
        assert_eq!(changed.get_chunk_size(res()).unwrap(), IntVec3D::new(4, 4, 4));
        assert_eq!(changed.get_voxel_offset(res()).unwrap(), IntVec3D::new(4, 0, 0));
        assert_eq!(backend.get_chunk_size(res()).unwrap(), IntVec3D::new(8, 8, 4));
        assert_eq!(changed.load_info().unwrap().data_type, DataType::Float32);
    }

    #[test]
    fn test_document_rewrite_refreshes_array_store_handles() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(BackendCache::default());
        let store =
            ArrayStoreBackend::new(dir.path(), cache.clone(), &spec(), InfoExistsMode::ExpectSame)
                .unwrap();
        assert_eq!(store.get_chunk_size(res()).unwrap(), IntVec3D::new(8, 8, 4));

        let rewritten = PrecomputedBackend::with_shared_cache(
            dir.path(),
            cache.clone(),
            InfoSpec::new()
                .with_reference_path(dir.path())
                .with_chunk_size(res(), IntVec3D::splat(4)),
            InfoExistsMode::Overwrite,
        )
        .unwrap();
        assert_eq!(rewritten.get_chunk_size(res()).unwrap(), IntVec3D::splat(4));
        assert_eq!(store.get_chunk_size(res()).unwrap(), IntVec3D::splat(4));

        let changed = rewritten
            .with_changes(&BackendChanges::new().with_chunk_size(res(), IntVec3D::splat(8)))
            .unwrap();
        assert_eq!(changed.get_chunk_size(res()).unwrap(), IntVec3D::splat(8));
        assert_eq!(store.get_chunk_size(res()).unwrap(), IntVec3D::splat(8));
    }

    #[test]
    fn test_write_visible_to_array_store_on_same_path() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(BackendCache::default());
        let direct =
            PrecomputedBackend::with_shared_cache(dir.path(), cache.clone(), spec(), InfoExistsMode::ExpectSame)
                .unwrap();
        let store = ArrayStoreBackend::open(dir.path(), cache).unwrap();
        let i = idx([0, 0, 0], [8, 8, 4]);
        assert_eq!(store.read(&i).unwrap()[[0, 0, 0, 0]], 0.0);

        direct.write(&i, &Array4::from_elem((1, 8, 8, 4), 9.0)).unwrap();
        assert_eq!(store.read(&i).unwrap()[[0, 3, 3, 3]], 9.0);
    }
}
