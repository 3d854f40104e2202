//! The backend-agnostic read/write facade.

use super::error::{LayerError, LayerResult};
use super::processor::{DataProcessor, IndexProcessor};
use crate::backend::Backend;
use crate::index::VolumetricIndex;
use crate::tensor::{spatial_shape, Tensor};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Data a layer can carry, with its shape convention.
pub trait LayerData: Send + Sync {
    /// Fails unless the data's spatial shape matches `idx`.
    fn check_shape(&self, idx: &VolumetricIndex) -> LayerResult<()>;
}

impl LayerData for Tensor {
    fn check_shape(&self, idx: &VolumetricIndex) -> LayerResult<()> {
        let actual = spatial_shape(self);
        if actual != idx.shape() {
            return Err(LayerError::DataShape {
                expected: idx.shape().to_array().iter().map(|v| *v as usize).collect(),
                actual: actual.to_array().iter().map(|v| *v as usize).collect(),
            });
        }
        Ok(())
    }
}

impl LayerData for BTreeMap<String, Tensor> {
    fn check_shape(&self, idx: &VolumetricIndex) -> LayerResult<()> {
        self.values().try_for_each(|t| t.check_shape(idx))
    }
}

/// A backend wrapped with index and data processing pipelines.
///
/// Reads run `index_procs` over the requested index, read the backend at
/// the result and run `read_procs` over the data. Writes run `index_procs`
/// then `write_procs` before writing the backend. Processors apply in
/// declaration order.
pub struct Layer<D> {
    backend: Arc<dyn Backend<Data = D>>,
    index_procs: Vec<Arc<dyn IndexProcessor>>,
    read_procs: Vec<Arc<dyn DataProcessor<D>>>,
    write_procs: Vec<Arc<dyn DataProcessor<D>>>,
    readonly: bool,
}

impl<D> Clone for Layer<D> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            index_procs: self.index_procs.clone(),
            read_procs: self.read_procs.clone(),
            write_procs: self.write_procs.clone(),
            readonly: self.readonly,
        }
    }
}

/// A layer over a single volume.
pub type VolumetricLayer = Layer<Tensor>;

/// A layer over a named set of volumes.
pub type VolumetricLayerSet = Layer<BTreeMap<String, Tensor>>;

impl<D: LayerData> Layer<D> {
    /// Wraps `backend` with empty pipelines.
    pub fn new(backend: Arc<dyn Backend<Data = D>>) -> Self {
        Self {
            backend,
            index_procs: Vec::new(),
            read_procs: Vec::new(),
            write_procs: Vec::new(),
            readonly: false,
        }
    }

    pub fn with_index_procs(mut self, procs: Vec<Arc<dyn IndexProcessor>>) -> Self {
        self.index_procs = procs;
        self
    }

    pub fn with_read_procs(mut self, procs: Vec<Arc<dyn DataProcessor<D>>>) -> Self {
        self.read_procs = procs;
        self
    }

    pub fn with_write_procs(mut self, procs: Vec<Arc<dyn DataProcessor<D>>>) -> Self {
        self.write_procs = procs;
        self
    }

    pub fn with_readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    pub fn backend(&self) -> &Arc<dyn Backend<Data = D>> {
        &self.backend
    }

    pub fn is_readonly(&self) -> bool {
        self.readonly
    }

    /// The index the backend sees for a request at `idx`.
    pub fn process_index(&self, idx: &VolumetricIndex) -> LayerResult<VolumetricIndex> {
        self.index_procs
            .iter()
            .try_fold(idx.clone(), |acc, proc| proc.process(&acc))
    }

    /// Reads the region `idx`.
    pub fn read(&self, idx: &VolumetricIndex) -> LayerResult<D> {
        let idx_proced = self.process_index(idx)?;
        let raw = self.backend.read(&idx_proced)?;
        self.read_procs
            .iter()
            .try_fold(raw, |data, proc| proc.process(data, idx, &idx_proced))
    }

    /// Writes `data` to the region `idx`.
    ///
    /// Data whose shape does not match `idx` is rejected before anything is
    /// written.
    pub fn write(&self, idx: &VolumetricIndex, data: D) -> LayerResult<()> {
        if self.readonly {
            return Err(LayerError::Readonly(self.backend.name()));
        }
        data.check_shape(idx)?;
        let idx_proced = self.process_index(idx)?;
        let data = self
            .write_procs
            .iter()
            .try_fold(data, |data, proc| proc.process(data, idx, &idx_proced))?;
        self.backend.write(&idx_proced, &data)?;
        Ok(())
    }
}

impl<D: LayerData> std::fmt::Debug for Layer<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layer")
            .field("backend", &self.backend.name())
            .field("index_procs", &self.index_procs.len())
            .field("read_procs", &self.read_procs.len())
            .field("write_procs", &self.write_procs.len())
            .field("readonly", &self.readonly)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{BackendError, BackendResult};
    use crate::geometry::{IntVec3D, Vec3D};
    use crate::layer::processor::{DataFn, IndexFn};
    use parking_lot::Mutex;

    /// Backend recording the indices it is asked for.
    #[derive(Default)]
    struct Recorder {
        reads: Mutex<Vec<VolumetricIndex>>,
        writes: Mutex<Vec<(VolumetricIndex, Tensor)>>,
    }

    impl Backend for Recorder {
        type Data = Tensor;

        fn name(&self) -> String {
            "recorder".to_string()
        }

        fn read(&self, idx: &VolumetricIndex) -> BackendResult<Tensor> {
            self.reads.lock().push(idx.clone());
            let s = idx.shape().to_usize().ok_or_else(|| BackendError::MissingInfo("shape".into()))?;
            Ok(Tensor::from_elem((1, s[0], s[1], s[2]), 1.0))
        }

        fn write(&self, idx: &VolumetricIndex, data: &Tensor) -> BackendResult<()> {
            self.writes.lock().push((idx.clone(), data.clone()));
            Ok(())
        }

        fn get_voxel_offset(&self, _: Vec3D) -> BackendResult<IntVec3D> {
            Ok(IntVec3D::ZERO)
        }

        fn get_chunk_size(&self, _: Vec3D) -> BackendResult<IntVec3D> {
            Ok(IntVec3D::splat(4))
        }

        fn get_dataset_size(&self, _: Vec3D) -> BackendResult<IntVec3D> {
            Ok(IntVec3D::splat(64))
        }
    }

    fn idx() -> VolumetricIndex {
        VolumetricIndex::from_coords(IntVec3D::ZERO, IntVec3D::new(4, 4, 2), Vec3D::new(4.0, 4.0, 40.0))
            .unwrap()
    }

    fn shift() -> Arc<dyn IndexProcessor> {
        Arc::new(IndexFn(|i: &VolumetricIndex| -> LayerResult<VolumetricIndex> {
            Ok(i.translated(IntVec3D::new(1, 0, 0)))
        }))
    }

    fn add(v: f64) -> Arc<dyn DataProcessor<Tensor>> {
        Arc::new(DataFn(
            move |d: Tensor, _: &VolumetricIndex, _: &VolumetricIndex| -> LayerResult<Tensor> {
                Ok(d + v)
            },
        ))
    }

    fn scale(v: f64) -> Arc<dyn DataProcessor<Tensor>> {
        Arc::new(DataFn(
            move |d: Tensor, _: &VolumetricIndex, _: &VolumetricIndex| -> LayerResult<Tensor> {
                Ok(d * v)
            },
        ))
    }

    #[test]
    fn test_read_pipeline_order() {
        let backend = Arc::new(Recorder::default());
        let layer = VolumetricLayer::new(backend.clone())
            .with_index_procs(vec![shift(), shift()])
            .with_read_procs(vec![add(1.0), scale(3.0)]);
        let out = layer.read(&idx()).unwrap();
        assert_eq!(out[[0, 0, 0, 0]], 6.0);
        assert_eq!(backend.reads.lock()[0].start(), IntVec3D::new(2, 0, 0));
    }

    #[test]
    fn test_write_pipeline() {
        let backend = Arc::new(Recorder::default());
        let layer = VolumetricLayer::new(backend.clone())
            .with_index_procs(vec![shift()])
            .with_write_procs(vec![scale(2.0), add(1.0)]);
        layer.write(&idx(), Tensor::from_elem((1, 4, 4, 2), 2.0)).unwrap();
        let writes = backend.writes.lock();
        assert_eq!(writes[0].0.start(), IntVec3D::new(1, 0, 0));
        assert_eq!(writes[0].1[[0, 3, 3, 1]], 5.0);
    }

    #[test]
    fn test_write_shape_checked() {
        let backend = Arc::new(Recorder::default());
        let layer = VolumetricLayer::new(backend.clone());
        let err = layer.write(&idx(), Tensor::zeros((1, 4, 4, 4))).unwrap_err();
        assert!(matches!(err, LayerError::DataShape { .. }));
        assert!(backend.writes.lock().is_empty());
    }

    #[test]
    fn test_readonly() {
        let layer = VolumetricLayer::new(Arc::new(Recorder::default())).with_readonly(true);
        assert!(matches!(
            layer.write(&idx(), Tensor::zeros((1, 4, 4, 2))),
            Err(LayerError::Readonly(_))
        ));
    }

    #[test]
    fn test_map_shape_check() {
        let data = BTreeMap::from([
            ("a".to_string(), Tensor::zeros((1, 4, 4, 2))),
            ("b".to_string(), Tensor::zeros((2, 4, 4, 1))),
        ]);
        assert!(matches!(data.check_shape(&idx()), Err(LayerError::DataShape { .. })));
    }
}
