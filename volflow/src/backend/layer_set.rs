//! Composite backend over a named set of volumetric layers.
//!
//! Reads fan out to every layer and return a name-to-tensor map; writes
//! fan out by key. Grid queries succeed only when all layers agree.

use super::error::{BackendError, BackendResult};
use super::traits::Backend;
use crate::geometry::{IntVec3D, Vec3D};
use crate::index::VolumetricIndex;
use crate::layer::VolumetricLayer;
use crate::tensor::{LayerType, Tensor};
use std::collections::BTreeMap;
use std::fmt::Debug;

/// Backend whose data is one tensor per named layer.
#[derive(Clone)]
pub struct LayerSetBackend {
    layers: BTreeMap<String, VolumetricLayer>,
}

impl LayerSetBackend {
    pub fn new(layers: BTreeMap<String, VolumetricLayer>) -> Self {
        Self { layers }
    }

    pub fn layers(&self) -> &BTreeMap<String, VolumetricLayer> {
        &self.layers
    }

    fn layer_error(name: &str, source: crate::layer::LayerError) -> BackendError {
        BackendError::Layer {
            name: name.to_string(),
            source: Box::new(source),
        }
    }

    /// Evaluates `query` on every layer's backend and returns the common
    /// answer.
    fn consistent<T: PartialEq + Debug>(
        &self,
        query: &str,
        f: impl Fn(&VolumetricLayer) -> BackendResult<T>,
    ) -> BackendResult<T> {
        let mut answers = Vec::with_capacity(self.layers.len());
        for (name, layer) in &self.layers {
            answers.push((name.as_str(), f(layer)?));
        }
        let mut iter = answers.iter();
        let Some((_, first)) = iter.next() else {
            return Err(BackendError::EmptyLayerSet);
        };
        if iter.all(|(_, v)| v == first) {
            let (_, value) = answers.swap_remove(0);
            return Ok(value);
        }
        let values = answers
            .iter()
            .map(|(name, v)| format!("{}={:?}", name, v))
            .collect::<Vec<_>>()
            .join(", ");
        Err(BackendError::Inconsistent {
            backend: self.name(),
            query: query.to_string(),
            values,
        })
    }
}

impl Backend for LayerSetBackend {
    type Data = BTreeMap<String, Tensor>;

    fn name(&self) -> String {
        let names: Vec<_> = self
            .layers
            .iter()
            .map(|(k, layer)| format!("{}: {}", k, layer.backend().name()))
            .collect();
        format!("LayerSet({})", names.join(", "))
    }

    fn read(&self, idx: &VolumetricIndex) -> BackendResult<Self::Data> {
        if self.layers.is_empty() {
            return Err(BackendError::EmptyLayerSet);
        }
        self.layers
            .iter()
            .map(|(name, layer)| {
                layer
                    .read(idx)
                    .map(|data| (name.clone(), data))
                    .map_err(|e| Self::layer_error(name, e))
            })
            .collect()
    }

    fn write(&self, idx: &VolumetricIndex, data: &Self::Data) -> BackendResult<()> {
        if let Some(unknown) = data.keys().find(|k| !self.layers.contains_key(*k)) {
            return Err(BackendError::UnknownLayer(unknown.clone()));
        }
        for (name, tensor) in data {
            if let Some(layer) = self.layers.get(name) {
                layer
                    .write(idx, tensor.clone())
                    .map_err(|e| Self::layer_error(name, e))?;
            }
        }
        Ok(())
    }

    fn get_voxel_offset(&self, resolution: Vec3D) -> BackendResult<IntVec3D> {
        self.consistent("voxel_offset", |l| l.backend().get_voxel_offset(resolution))
    }

    fn get_chunk_size(&self, resolution: Vec3D) -> BackendResult<IntVec3D> {
        self.consistent("chunk_size", |l| l.backend().get_chunk_size(resolution))
    }

    fn get_dataset_size(&self, resolution: Vec3D) -> BackendResult<IntVec3D> {
        self.consistent("dataset_size", |l| l.backend().get_dataset_size(resolution))
    }

    fn layer_type(&self) -> BackendResult<LayerType> {
        self.consistent("layer_type", |l| l.backend().layer_type())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::PrecomputedBackend;
    use crate::layer::{build_volumetric_layer, VolumetricLayerOptions};
    use crate::precomputed::{InfoExistsMode, InfoSpec, ScaleEntry};
    use ndarray::Array4;
    use serde_json::json;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn res() -> Vec3D {
        Vec3D::new(4.0, 4.0, 40.0)
    }

    fn layer(path: &Path, chunk: IntVec3D) -> VolumetricLayer {
        let scale = ScaleEntry::new(res(), IntVec3D::ZERO, IntVec3D::splat(8), chunk);
        let spec = InfoSpec::new()
            .with_field_override("type", json!("image"))
            .with_field_override("data_type", json!("float32"))
            .with_field_override("num_channels", json!(1))
            .with_field_override("scales", json!([scale]));
        let backend = PrecomputedBackend::new(path, spec, InfoExistsMode::ExpectSame).unwrap();
        build_volumetric_layer(Arc::new(backend), VolumetricLayerOptions::default()).unwrap()
    }

    fn idx() -> VolumetricIndex {
        VolumetricIndex::from_coords(IntVec3D::ZERO, IntVec3D::splat(8), res()).unwrap()
    }

    #[test]
    fn test_fan_out_read_write() {
        let dir = TempDir::new().unwrap();
        let set = LayerSetBackend::new(BTreeMap::from([
            ("a".to_string(), layer(&dir.path().join("a"), IntVec3D::splat(4))),
            ("b".to_string(), layer(&dir.path().join("b"), IntVec3D::splat(4))),
        ]));
        let data = BTreeMap::from([
            ("a".to_string(), Array4::from_elem((1, 8, 8, 8), 1.0)),
            ("b".to_string(), Array4::from_elem((1, 8, 8, 8), 2.0)),
        ]);
        set.write(&idx(), &data).unwrap();
        assert_eq!(set.read(&idx()).unwrap(), data);
        assert_eq!(set.get_chunk_size(res()).unwrap(), IntVec3D::splat(4));
    }

    #[test]
    fn test_unknown_key() {
        let dir = TempDir::new().unwrap();
        let set = LayerSetBackend::new(BTreeMap::from([(
            "a".to_string(),
            layer(&dir.path().join("a"), IntVec3D::splat(4)),
        )]));
        let data = BTreeMap::from([("z".to_string(), Array4::zeros((1, 8, 8, 8)))]);
        assert!(matches!(
            set.write(&idx(), &data),
            Err(BackendError::UnknownLayer(name)) if name == "z"
        ));
    }

    #[test]
    fn test_inconsistent_grid() {
        let dir = TempDir::new().unwrap();
        let set = LayerSetBackend::new(BTreeMap::from([
            ("a".to_string(), layer(&dir.path().join("a"), IntVec3D::splat(4))),
            ("b".to_string(), layer(&dir.path().join("b"), IntVec3D::splat(8))),
        ]));
        let err = set.get_chunk_size(res()).unwrap_err();
        assert!(matches!(err, BackendError::Inconsistent { .. }));
        assert!(err.to_string().contains("chunk_size"));
    }

    #[test]
    fn test_empty_set() {
        let set = LayerSetBackend::new(BTreeMap::new());
        assert!(matches!(set.get_chunk_size(res()), Err(BackendError::EmptyLayerSet)));
        assert!(matches!(set.read(&idx()), Err(BackendError::EmptyLayerSet)));
    }
}
