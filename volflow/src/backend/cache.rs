//! Process-wide cache of open scale handles.
//!
//! [`BackendCache`] holds one [`ScaleHandle`] per `(path, resolution)`.
//! Handles are weighted by the byte budget of their chunk cache, so the
//! total budget bounds how many stay open. The cache is an explicit service
//! object: construct it once and share it through an `Arc`.
//!
//! Opening a handle reads the volume's info document, so callers that
//! rewrite a document must call [`BackendCache::invalidate`] for its path.

use super::error::BackendResult;
use crate::geometry::{IntVec3D, Vec3D};
use crate::precomputed::ScaleVolume;
use crate::tensor::LayerType;
use dashmap::DashMap;
use moka::notification::RemovalCause;
use moka::sync::Cache;
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Default total budget for all handles' chunk caches (1 GiB).
pub const DEFAULT_BACKEND_CACHE_BYTES: u64 = 1024 * 1024 * 1024;

/// Default chunk cache budget per handle (128 MiB).
pub const DEFAULT_HANDLE_CACHE_BYTES: u64 = 128 * 1024 * 1024;

type HandleKey = (String, String);

/// An open scale of one volume.
pub struct ScaleHandle {
    volume: ScaleVolume,
    write_lock: Mutex<()>,
    layer_type: LayerType,
    budget_bytes: u64,
}

impl ScaleHandle {
    /// Wraps an opened scale whose chunk cache holds up to `budget_bytes`.
    pub fn new(volume: ScaleVolume, layer_type: LayerType, budget_bytes: u64) -> Self {
        Self {
            volume,
            write_lock: Mutex::new(()),
            layer_type,
            budget_bytes,
        }
    }

    pub fn volume(&self) -> &ScaleVolume {
        &self.volume
    }

    pub fn layer_type(&self) -> LayerType {
        self.layer_type
    }

    /// Serializes read-modify-write cycles on this handle.
    pub fn lock_writes(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock()
    }
}

/// Bounded LRU of open scale handles keyed by `(path, resolution)`.
pub struct BackendCache {
    handles: Cache<HandleKey, Arc<ScaleHandle>>,
    by_path: Arc<DashMap<String, HashSet<String>>>,
    max_bytes: u64,
}

impl BackendCache {
    /// Creates a cache whose handles' chunk caches total at most `max_bytes`.
    pub fn new(max_bytes: u64) -> Self {
        let by_path: Arc<DashMap<String, HashSet<String>>> = Arc::new(DashMap::new());
        let index = by_path.clone();
        let handles = Cache::builder()
            .weigher(|_key: &HandleKey, handle: &Arc<ScaleHandle>| -> u32 {
                handle.budget_bytes.min(u32::MAX as u64) as u32
            })
            .max_capacity(max_bytes)
            .eviction_listener(move |key: Arc<HandleKey>, _handle, cause| {
                if cause == RemovalCause::Replaced {
                    return;
                }
                let (path, resolution_key) = key.as_ref();
                index.remove_if_mut(path, |_, resolutions| {
                    resolutions.remove(resolution_key);
                    resolutions.is_empty()
                });
            })
            .build();
        Self {
            handles,
            by_path,
            max_bytes,
        }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Returns the handle for `(path, resolution)`, opening it with `open`
    /// on a miss.
    pub fn get_or_open(
        &self,
        path: &str,
        resolution: Vec3D,
        open: impl FnOnce() -> BackendResult<ScaleHandle>,
    ) -> BackendResult<Arc<ScaleHandle>> {
        let key = (path.to_string(), resolution.resolution_key());
        if let Some(handle) = self.handles.get(&key) {
            return Ok(handle);
        }
        let handle = Arc::new(open()?);
        debug!(path, resolution = %resolution, "Opened scale handle");
        self.by_path
            .entry(key.0.clone())
            .or_default()
            .insert(key.1.clone());
        self.handles.insert(key, handle.clone());
        Ok(handle)
    }

    /// Returns true if a handle for `(path, resolution)` is cached.
    pub fn contains(&self, path: &str, resolution: Vec3D) -> bool {
        self.handles
            .contains_key(&(path.to_string(), resolution.resolution_key()))
    }

    /// Drops every handle opened for `path`.
    ///
    /// Returns the number of handles dropped.
    pub fn invalidate(&self, path: &str) -> usize {
        let Some((_, keys)) = self.by_path.remove(path) else {
            return 0;
        };
        let mut dropped = 0;
        for resolution_key in keys {
            let key = (path.to_string(), resolution_key);
            if self.handles.remove(&key).is_some() {
                dropped += 1;
            }
        }
        debug!(path, dropped, "Invalidated scale handles");
        dropped
    }

    /// Drops cached chunks of `path` at `resolution` overlapping voxels
    /// `[start, start + shape)`, keeping the handle itself.
    pub fn evict_region(&self, path: &str, resolution: Vec3D, start: IntVec3D, shape: IntVec3D) {
        let key = (path.to_string(), resolution.resolution_key());
        if let Some(handle) = self.handles.get(&key) {
            let _guard = handle.lock_writes();
            handle.volume().evict_region(start, shape);
        }
    }

    /// Number of cached handles.
    pub fn len(&self) -> u64 {
        self.handles.run_pending_tasks();
        self.handles.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for BackendCache {
    fn default() -> Self {
        Self::new(DEFAULT_BACKEND_CACHE_BYTES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::precomputed::{DataType, PrecomputedInfo, ScaleEntry};
    use serde_json::Map;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn open_handle(dir: &TempDir, resolution: Vec3D) -> BackendResult<ScaleHandle> {
        let info = PrecomputedInfo {
            layer_type: LayerType::Image,
            data_type: DataType::Uint8,
            num_channels: 1,
            scales: vec![ScaleEntry::new(
                resolution,
                IntVec3D::ZERO,
                IntVec3D::splat(8),
                IntVec3D::splat(4),
            )],
            extra: Map::new(),
        };
        let volume = ScaleVolume::open(dir.path(), &info, resolution)?.with_chunk_cache(1024);
        Ok(ScaleHandle::new(volume, LayerType::Image, 1024))
    }

    #[test]
    fn test_opens_once_per_key() {
        let dir = TempDir::new().unwrap();
        let cache = BackendCache::new(1 << 20);
        let opens = AtomicUsize::new(0);
        let res = Vec3D::new(4.0, 4.0, 40.0);
        for _ in 0..3 {
            cache
                .get_or_open("vol", res, || {
                    opens.fetch_add(1, Ordering::SeqCst);
                    open_handle(&dir, res)
                })
                .unwrap();
        }
        assert_eq!(opens.load(Ordering::SeqCst), 1);
        assert!(cache.contains("vol", res));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_invalidate_drops_all_resolutions() {
        let dir = TempDir::new().unwrap();
        let cache = BackendCache::new(1 << 20);
        let fine = Vec3D::new(4.0, 4.0, 40.0);
        let coarse = Vec3D::new(8.0, 8.0, 40.0);
        cache.get_or_open("vol", fine, || open_handle(&dir, fine)).unwrap();
        cache.get_or_open("vol", coarse, || open_handle(&dir, coarse)).unwrap();
        cache.get_or_open("other", fine, || open_handle(&dir, fine)).unwrap();

        assert_eq!(cache.invalidate("vol"), 2);
        assert!(!cache.contains("vol", fine));
        assert!(cache.contains("other", fine));
        assert_eq!(cache.invalidate("vol"), 0);
    }

    #[test]
    fn test_open_failure_not_cached() {
        let cache = BackendCache::default();
        let res = Vec3D::new(4.0, 4.0, 40.0);
        let result = cache.get_or_open("vol", res, || {
            Err(crate::backend::BackendError::MissingInfo("vol".to_string()))
        });
        assert!(result.is_err());
        assert!(!cache.contains("vol", res));
    }

    #[test]
    fn test_evicted_handles_leave_path_index() {
        let dir = TempDir::new().unwrap();
        let cache = BackendCache::new(1024);
        let res = Vec3D::new(4.0, 4.0, 40.0);
        for path in ["a", "b", "c"] {
            cache.get_or_open(path, res, || open_handle(&dir, res)).unwrap();
        }
        assert_eq!(cache.len(), 1);
        let indexed: usize = cache.by_path.iter().map(|e| e.value().len()).sum();
        assert_eq!(indexed, 1);
    }

    #[test]
    fn test_evict_region_keeps_handle() {
        let dir = TempDir::new().unwrap();
        let cache = BackendCache::new(1 << 20);
        let res = Vec3D::new(4.0, 4.0, 40.0);
        let handle = cache.get_or_open("vol", res, || open_handle(&dir, res)).unwrap();
        handle
            .volume()
            .read_region(IntVec3D::ZERO, IntVec3D::splat(4))
            .unwrap();
        assert!(handle.volume().cached_bytes() > 0);
        cache.evict_region("vol", res, IntVec3D::ZERO, IntVec3D::splat(4));
        assert_eq!(handle.volume().cached_bytes(), 0);
        assert!(cache.contains("vol", res));
    }
}
