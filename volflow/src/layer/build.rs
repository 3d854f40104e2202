//! Layer construction helpers.

use super::error::{LayerError, LayerResult};
use super::pipeline::{VolumetricLayer, VolumetricLayerSet};
use super::processor::{
    DataProcessor, IndexProcessor, IoMode, VolDataInterpolator, VolIdxResolutionAdjuster,
};
use crate::backend::{Backend, LayerSetBackend};
use crate::geometry::Vec3D;
use crate::tensor::{InterpolationMode, Tensor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Options for [`build_volumetric_layer`].
///
/// Only the plain fields are serializable; processors are attached in code.
#[derive(Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumetricLayerOptions {
    /// Resolution the backend is always accessed at.
    pub data_resolution: Option<Vec3D>,
    /// Resampling used between requested and data resolution.
    pub interpolation_mode: Option<InterpolationMode>,
    /// Round fractional resampled shapes instead of failing.
    pub allow_shape_rounding: bool,
    pub readonly: bool,
    #[serde(skip)]
    pub index_procs: Vec<Arc<dyn IndexProcessor>>,
    #[serde(skip)]
    pub read_procs: Vec<Arc<dyn DataProcessor<Tensor>>>,
    #[serde(skip)]
    pub write_procs: Vec<Arc<dyn DataProcessor<Tensor>>>,
}

impl VolumetricLayerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accesses the backend at `resolution`, resampling with `mode`.
    pub fn with_data_resolution(mut self, resolution: Vec3D, mode: InterpolationMode) -> Self {
        self.data_resolution = Some(resolution);
        self.interpolation_mode = Some(mode);
        self
    }

    pub fn with_interpolation_mode(mut self, mode: InterpolationMode) -> Self {
        self.interpolation_mode = Some(mode);
        self
    }

    pub fn with_allow_shape_rounding(mut self, allow: bool) -> Self {
        self.allow_shape_rounding = allow;
        self
    }

    pub fn with_readonly(mut self, readonly: bool) -> Self {
        self.readonly = readonly;
        self
    }

    pub fn with_index_proc(mut self, proc: Arc<dyn IndexProcessor>) -> Self {
        self.index_procs.push(proc);
        self
    }

    pub fn with_read_proc(mut self, proc: Arc<dyn DataProcessor<Tensor>>) -> Self {
        self.read_procs.push(proc);
        self
    }

    pub fn with_write_proc(mut self, proc: Arc<dyn DataProcessor<Tensor>>) -> Self {
        self.write_procs.push(proc);
        self
    }
}

/// Builds a layer over `backend`.
///
/// With a `data_resolution`, the resolution adjuster runs after the user
/// index processors, the read interpolator before the user read processors
/// and the write interpolator after the user write processors. The
/// interpolation mode must suit the backend's layer type.
pub fn build_volumetric_layer(
    backend: Arc<dyn Backend<Data = Tensor>>,
    options: VolumetricLayerOptions,
) -> LayerResult<VolumetricLayer> {
    let VolumetricLayerOptions {
        data_resolution,
        interpolation_mode,
        allow_shape_rounding,
        readonly,
        mut index_procs,
        mut read_procs,
        mut write_procs,
    } = options;

    if let Some(mode) = interpolation_mode {
        mode.validate_for(backend.layer_type()?)?;
    }
    if let Some(resolution) = data_resolution {
        let mode = interpolation_mode.ok_or_else(|| {
            LayerError::Config(
                "data_resolution is provided, but interpolation_mode is not".to_string(),
            )
        })?;
        debug!(backend = %backend.name(), resolution = %resolution, mode = %mode, "Fixing data resolution");
        index_procs.push(Arc::new(VolIdxResolutionAdjuster::new(resolution)));
        read_procs.insert(
            0,
            Arc::new(
                VolDataInterpolator::new(mode, IoMode::Read)
                    .with_allow_shape_rounding(allow_shape_rounding),
            ),
        );
        write_procs.push(Arc::new(
            VolDataInterpolator::new(mode, IoMode::Write)
                .with_allow_shape_rounding(allow_shape_rounding),
        ));
    }

    Ok(VolumetricLayer::new(backend)
        .with_index_procs(index_procs)
        .with_read_procs(read_procs)
        .with_write_procs(write_procs)
        .with_readonly(readonly))
}

/// Builds a layer over a named set of layers.
pub fn build_layer_set(
    layers: BTreeMap<String, VolumetricLayer>,
    readonly: bool,
) -> VolumetricLayerSet {
    VolumetricLayerSet::new(Arc::new(LayerSetBackend::new(layers))).with_readonly(readonly)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::PrecomputedBackend;
    use crate::geometry::IntVec3D;
    use crate::index::VolumetricIndex;
    use crate::precomputed::{InfoExistsMode, InfoSpec, ScaleEntry};
    use crate::tensor::TensorError;
    use ndarray::Array4;
    use serde_json::json;
    use std::path::Path;
    use tempfile::TempDir;

    fn native() -> Vec3D {
        Vec3D::new(8.0, 8.0, 40.0)
    }

    fn backend(path: &Path, layer_type: &str) -> Arc<dyn Backend<Data = Tensor>> {
        let scale = ScaleEntry::new(native(), IntVec3D::ZERO, IntVec3D::new(8, 8, 2), IntVec3D::new(4, 4, 2));
        let spec = InfoSpec::new()
            .with_field_override("type", json!(layer_type))
            .with_field_override("data_type", json!("float32"))
            .with_field_override("num_channels", json!(1))
            .with_field_override("scales", json!([scale]));
        Arc::new(PrecomputedBackend::new(path, spec, InfoExistsMode::ExpectSame).unwrap())
    }

    #[test]
    fn test_resolution_requires_mode() {
        let dir = TempDir::new().unwrap();
        let mut options = VolumetricLayerOptions::new();
        options.data_resolution = Some(native());
        assert!(matches!(
            build_volumetric_layer(backend(dir.path(), "image"), options),
            Err(LayerError::Config(_))
        ));
    }

    #[test]
    fn test_segmentation_rejects_blending_mode() {
        let dir = TempDir::new().unwrap();
        let options = VolumetricLayerOptions::new()
            .with_data_resolution(native(), InterpolationMode::Linear);
        assert!(matches!(
            build_volumetric_layer(backend(dir.path(), "segmentation"), options),
            Err(LayerError::Tensor(TensorError::ModeNotAllowed { .. }))
        ));
    }

    #[test]
    fn test_data_resolution_round_trip() {
        let dir = TempDir::new().unwrap();
        let options = VolumetricLayerOptions::new()
            .with_data_resolution(native(), InterpolationMode::Nearest);
        let layer = build_volumetric_layer(backend(dir.path(), "image"), options).unwrap();

        let fine = VolumetricIndex::from_coords(
            IntVec3D::ZERO,
            IntVec3D::new(16, 16, 2),
            Vec3D::new(4.0, 4.0, 40.0),
        )
        .unwrap();
        let data = Array4::from_shape_fn((1, 16, 16, 2), |(_, x, y, _)| ((x / 2) * 10 + y / 2) as f64);
        layer.write(&fine, data.clone()).unwrap();

        let coarse = VolumetricIndex::from_coords(IntVec3D::ZERO, IntVec3D::new(8, 8, 2), native()).unwrap();
        let stored = layer.backend().read(&coarse).unwrap();
        assert_eq!(stored[[0, 3, 2, 0]], 32.0);
        assert_eq!(layer.read(&fine).unwrap(), data);
    }

    #[test]
    fn test_options_deserialize() {
        let options: VolumetricLayerOptions =
            serde_json::from_value(json!({"data_resolution": [8, 8, 40], "interpolation_mode": "img"}))
                .unwrap();
        assert_eq!(options.interpolation_mode, Some(InterpolationMode::Img));
        assert!(!options.readonly);
    }

    #[test]
    fn test_layer_set() {
        let dir = TempDir::new().unwrap();
        let a = build_volumetric_layer(backend(&dir.path().join("a"), "image"), VolumetricLayerOptions::new()).unwrap();
        let set = build_layer_set(BTreeMap::from([("a".to_string(), a)]), true);
        assert!(set.is_readonly());
        let idx = VolumetricIndex::from_coords(IntVec3D::ZERO, IntVec3D::new(4, 4, 2), native()).unwrap();
        assert_eq!(set.read(&idx).unwrap()["a"].dim(), (1, 4, 4, 2));
    }
}
