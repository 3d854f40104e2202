//! Serializable layer descriptions.
//!
//! Tasks carry [`LayerSpec`]s instead of live layers. Each worker rebuilds
//! the layers it needs through a [`LayerBuilder`], which dispatches on the
//! `@type` field and shares one [`BackendCache`] between all layers it
//! builds.
//!
//! # Built-in types
//!
//! | `@type` | Backend | Parameters |
//! |---|---|---|
//! | `precomputed` | [`PrecomputedBackend`] | `path`, `info_spec`, `on_info_exists`, `enforce_chunk_aligned_writes`, `compress` |
//! | `array_store` | [`ArrayStoreBackend`] | `path`, `info_spec`, `on_info_exists`, `handle_cache_bytes`, `compress` |
//!
//! Both also accept the fields of [`VolumetricLayerOptions`].

use super::build::{build_volumetric_layer, VolumetricLayerOptions};
use super::error::{LayerError, LayerResult};
use super::pipeline::VolumetricLayer;
use crate::backend::{
    ArrayStoreBackend, BackendCache, PrecomputedBackend, DEFAULT_HANDLE_CACHE_BYTES,
};
use crate::precomputed::{InfoExistsMode, InfoSpec};
use crate::registry::{Constructor, Registry, RegistryError, TYPE_KEY};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::Arc;

/// `@type` of the precomputed layer.
pub const PRECOMPUTED_TYPE: &str = "precomputed";

/// `@type` of the array store layer.
pub const ARRAY_STORE_TYPE: &str = "array_store";

/// A layer description: a type name and its parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LayerSpec {
    #[serde(rename = "@type")]
    pub type_name: String,
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl LayerSpec {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            params: Map::new(),
        }
    }

    /// A precomputed volume at `path`.
    pub fn precomputed(path: impl Into<PathBuf>) -> Self {
        Self::new(PRECOMPUTED_TYPE).with_path(path)
    }

    /// An array store at `path`.
    pub fn array_store(path: impl Into<PathBuf>) -> Self {
        Self::new(ARRAY_STORE_TYPE).with_path(path)
    }

    fn with_path(self, path: impl Into<PathBuf>) -> Self {
        let path: PathBuf = path.into();
        self.with_param("path", Value::String(path.display().to_string()))
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Sets every serializable field of `options`.
    pub fn with_options(mut self, options: &VolumetricLayerOptions) -> Self {
        if let Ok(Value::Object(fields)) = serde_json::to_value(options) {
            self.params.extend(fields);
        }
        self
    }

    pub fn with_info_spec(self, info_spec: &InfoSpec) -> Self {
        match serde_json::to_value(info_spec) {
            Ok(value) => self.with_param("info_spec", value),
            Err(_) => self,
        }
    }

    pub fn with_on_info_exists(self, mode: InfoExistsMode) -> Self {
        self.with_param("on_info_exists", Value::String(mode.to_string()))
    }

    /// The description as a single JSON object.
    pub fn to_value(&self) -> Value {
        let mut fields = self.params.clone();
        fields.insert(TYPE_KEY.to_string(), Value::String(self.type_name.clone()));
        Value::Object(fields)
    }
}

fn default_true() -> bool {
    true
}

fn default_handle_cache_bytes() -> u64 {
    DEFAULT_HANDLE_CACHE_BYTES
}

#[derive(Deserialize)]
struct PrecomputedParams {
    path: PathBuf,
    #[serde(default)]
    info_spec: InfoSpec,
    #[serde(default)]
    on_info_exists: InfoExistsMode,
    #[serde(default = "default_true")]
    enforce_chunk_aligned_writes: bool,
    #[serde(default)]
    compress: bool,
    #[serde(flatten)]
    options: VolumetricLayerOptions,
}

#[derive(Deserialize)]
struct ArrayStoreParams {
    path: PathBuf,
    #[serde(default)]
    info_spec: InfoSpec,
    #[serde(default)]
    on_info_exists: InfoExistsMode,
    #[serde(default = "default_handle_cache_bytes")]
    handle_cache_bytes: u64,
    #[serde(default)]
    compress: bool,
    #[serde(flatten)]
    options: VolumetricLayerOptions,
}

fn build_precomputed(params: Value, cache: &Arc<BackendCache>) -> LayerResult<VolumetricLayer> {
    let p: PrecomputedParams = serde_json::from_value(params)
        .map_err(|e| RegistryError::build(PRECOMPUTED_TYPE, e))?;
    let backend =
        PrecomputedBackend::with_shared_cache(p.path, cache.clone(), p.info_spec, p.on_info_exists)?
        .with_enforce_chunk_aligned_writes(p.enforce_chunk_aligned_writes)
        .with_compression(p.compress);
    build_volumetric_layer(Arc::new(backend), p.options)
}

fn build_array_store(params: Value, cache: &Arc<BackendCache>) -> LayerResult<VolumetricLayer> {
    let p: ArrayStoreParams = serde_json::from_value(params)
        .map_err(|e| RegistryError::build(ARRAY_STORE_TYPE, e))?;
    let backend = ArrayStoreBackend::new(p.path, cache.clone(), &p.info_spec, p.on_info_exists)?
        .with_handle_cache_bytes(p.handle_cache_bytes)
        .with_compression(p.compress);
    build_volumetric_layer(Arc::new(backend), p.options)
}

/// Rebuilds layers from their descriptions.
pub struct LayerBuilder {
    registry: Registry<VolumetricLayer, Arc<BackendCache>, LayerError>,
    cache: Arc<BackendCache>,
}

impl LayerBuilder {
    /// Creates a builder with the built-in layer types.
    pub fn new(cache: Arc<BackendCache>) -> Self {
        let mut registry = Registry::new("layer");
        // Built-in names are distinct and valid.
        let _ = registry.register(PRECOMPUTED_TYPE, build_precomputed);
        let _ = registry.register(ARRAY_STORE_TYPE, build_array_store);
        Self { registry, cache }
    }

    /// Adds a layer type.
    pub fn register(
        &mut self,
        name: &str,
        constructor: Constructor<VolumetricLayer, Arc<BackendCache>, LayerError>,
    ) -> Result<(), RegistryError> {
        self.registry.register(name, constructor)
    }

    pub fn cache(&self) -> &Arc<BackendCache> {
        &self.cache
    }

    pub fn type_names(&self) -> Vec<&str> {
        self.registry.names()
    }

    /// Builds the layer described by `spec`.
    pub fn build(&self, spec: &LayerSpec) -> LayerResult<VolumetricLayer> {
        self.registry.build(spec.to_value(), &self.cache)
    }
}

impl Default for LayerBuilder {
    fn default() -> Self {
        Self::new(Arc::new(BackendCache::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Backend;
    use crate::geometry::{IntVec3D, Vec3D};
    use crate::index::VolumetricIndex;
    use crate::precomputed::ScaleEntry;
    use crate::tensor::InterpolationMode;
    use ndarray::Array4;
    use serde_json::json;
    use tempfile::TempDir;

    fn res() -> Vec3D {
        Vec3D::new(4.0, 4.0, 40.0)
    }

    fn info_spec() -> InfoSpec {
        let scale = ScaleEntry::new(res(), IntVec3D::ZERO, IntVec3D::splat(8), IntVec3D::splat(4));
        InfoSpec::new()
            .with_field_override("type", json!("image"))
            .with_field_override("data_type", json!("uint8"))
            .with_field_override("num_channels", json!(1))
            .with_field_override("scales", json!([scale]))
    }

    #[test]
    fn test_spec_serde_shape() {
        let spec = LayerSpec::precomputed("/data/img").with_on_info_exists(InfoExistsMode::Overwrite);
        let value = serde_json::to_value(&spec).unwrap();
        assert_eq!(value["@type"], "precomputed");
        assert_eq!(value["path"], "/data/img");
        assert_eq!(value["on_info_exists"], "overwrite");
        let back: LayerSpec = serde_json::from_value(value).unwrap();
        assert_eq!(back, spec);
    }

    #[test]
    fn test_build_both_types_share_data() {
        let dir = TempDir::new().unwrap();
        let builder = LayerBuilder::default();
        let a = builder
            .build(&LayerSpec::precomputed(dir.path()).with_info_spec(&info_spec()))
            .unwrap();
        let b = builder.build(&LayerSpec::array_store(dir.path())).unwrap();

        let idx = VolumetricIndex::from_coords(IntVec3D::ZERO, IntVec3D::splat(8), res()).unwrap();
        let data = Array4::from_elem((1, 8, 8, 8), 9.0);
        a.write(&idx, data.clone()).unwrap();
        assert_eq!(b.read(&idx).unwrap(), data);
        assert!(builder.cache().contains(&b.backend().name(), res()));
    }

    #[test]
    fn test_build_with_options() {
        let dir = TempDir::new().unwrap();
        let builder = LayerBuilder::default();
        let spec = LayerSpec::precomputed(dir.path())
            .with_info_spec(&info_spec())
            .with_options(
                &VolumetricLayerOptions::new()
                    .with_data_resolution(res(), InterpolationMode::Nearest)
                    .with_readonly(true),
            );
        let layer = builder.build(&spec).unwrap();
        assert!(layer.is_readonly());
    }

    #[test]
    fn test_build_errors() {
        let builder = LayerBuilder::default();
        assert!(matches!(
            builder.build(&LayerSpec::new("zarr")),
            Err(LayerError::Registry(RegistryError::UnknownType { .. }))
        ));
        assert!(matches!(
            builder.build(&LayerSpec::new(PRECOMPUTED_TYPE)),
            Err(LayerError::Registry(RegistryError::Build { .. }))
        ));
    }
}
