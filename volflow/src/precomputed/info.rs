//! The info document describing a precomputed volume.
//!
//! The document lives at `<path>/info` and lists one entry per scale. Every
//! chunk-grid query (offset, chunk size, dataset size) is answered from it.
//! Fields this crate does not model are kept in `extra` and written back
//! unchanged.

use super::error::{PrecomputedError, PrecomputedResult};
use crate::geometry::{BBox3D, IntVec3D, Vec3D};
use crate::tensor::LayerType;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// File name of the info document inside a volume directory.
pub const INFO_FILE_NAME: &str = "info";

/// The only chunk encoding supported.
pub const RAW_ENCODING: &str = "raw";

/// Stored element type.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Uint8,
    Int8,
    Uint16,
    Int16,
    Uint32,
    Int32,
    Float32,
    Float64,
}

impl DataType {
    /// Bytes per element.
    pub fn size_bytes(&self) -> usize {
        match self {
            Self::Uint8 | Self::Int8 => 1,
            Self::Uint16 | Self::Int16 => 2,
            Self::Uint32 | Self::Int32 | Self::Float32 => 4,
            Self::Float64 => 8,
        }
    }

    /// Returns true for integer element types.
    pub fn is_integer(&self) -> bool {
        !matches!(self, Self::Float32 | Self::Float64)
    }
}

fn default_encoding() -> String {
    RAW_ENCODING.to_string()
}

/// One resolution level of a volume.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScaleEntry {
    /// Directory name of the scale's chunks.
    pub key: String,
    /// Physical size of a voxel.
    pub resolution: Vec3D,
    /// First voxel of the dataset.
    #[serde(default)]
    pub voxel_offset: IntVec3D,
    /// Dataset extent in voxels.
    pub size: IntVec3D,
    /// Chunk shapes; the first one is used.
    pub chunk_sizes: Vec<IntVec3D>,
    /// Chunk encoding.
    #[serde(default = "default_encoding")]
    pub encoding: String,
    /// Fields not modelled here.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ScaleEntry {
    /// Creates a raw-encoded scale keyed by its resolution.
    pub fn new(
        resolution: Vec3D,
        voxel_offset: IntVec3D,
        size: IntVec3D,
        chunk_size: IntVec3D,
    ) -> Self {
        Self {
            key: resolution.resolution_key(),
            resolution,
            voxel_offset,
            size,
            chunk_sizes: vec![chunk_size],
            encoding: default_encoding(),
            extra: Map::new(),
        }
    }

    /// Native chunk shape. An unchunked scale is one chunk.
    pub fn chunk_size(&self) -> IntVec3D {
        self.chunk_sizes.first().copied().unwrap_or(self.size)
    }

    /// Physical bounds of the dataset.
    pub fn bounds(&self) -> BBox3D {
        BBox3D::from_coords(
            self.voxel_offset,
            self.voxel_offset + self.size,
            self.resolution,
        )
    }

    /// Derives a scale at `resolution` covering the same physical region.
    ///
    /// Offset rounds down and size rounds up so the derived scale never
    /// loses data. Chunk sizes are kept.
    pub fn rescaled(&self, resolution: Vec3D) -> Self {
        let ratio = self.resolution / resolution;
        let start = (self.voxel_offset.to_f64() * ratio).map(f64::floor);
        let end = ((self.voxel_offset + self.size).to_f64() * ratio).map(f64::ceil);
        Self {
            key: resolution.resolution_key(),
            resolution,
            voxel_offset: start.round(),
            size: (end - start).round(),
            chunk_sizes: self.chunk_sizes.clone(),
            encoding: self.encoding.clone(),
            extra: Map::new(),
        }
    }
}

/// A volume's info document.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PrecomputedInfo {
    /// Semantic type of the data.
    #[serde(rename = "type")]
    pub layer_type: LayerType,
    /// Stored element type.
    pub data_type: DataType,
    /// Channels per voxel.
    pub num_channels: usize,
    /// Resolution levels.
    pub scales: Vec<ScaleEntry>,
    /// Fields not modelled here.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PrecomputedInfo {
    /// Location of the info document for a volume.
    pub fn info_path(path: &Path) -> PathBuf {
        path.join(INFO_FILE_NAME)
    }

    /// Reads the info document for a volume, `None` if absent.
    pub fn read(path: &Path) -> PrecomputedResult<Option<Self>> {
        match Self::read_value(path)? {
            Some(value) => Self::from_value(value, path).map(Some),
            None => Ok(None),
        }
    }

    /// Reads the info document as untyped JSON, `None` if absent.
    pub fn read_value(path: &Path) -> PrecomputedResult<Option<Value>> {
        let info_path = Self::info_path(path);
        let bytes = match fs::read(&info_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(PrecomputedError::io(info_path, e)),
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|source| PrecomputedError::InvalidInfo {
                path: info_path,
                source,
            })
    }

    /// Converts untyped JSON into an info document.
    pub fn from_value(value: Value, path: &Path) -> PrecomputedResult<Self> {
        serde_json::from_value(value).map_err(|source| PrecomputedError::InvalidInfo {
            path: Self::info_path(path),
            source,
        })
    }

    /// Writes the info document, creating the volume directory.
    pub fn write(&self, path: &Path) -> PrecomputedResult<()> {
        fs::create_dir_all(path).map_err(|e| PrecomputedError::io(path, e))?;
        let info_path = Self::info_path(path);
        let bytes =
            serde_json::to_vec_pretty(self).map_err(|source| PrecomputedError::InvalidInfo {
                path: info_path.clone(),
                source,
            })?;
        fs::write(&info_path, bytes).map_err(|e| PrecomputedError::io(info_path, e))
    }

    /// Scale at `resolution`.
    pub fn scale(&self, resolution: Vec3D) -> Option<&ScaleEntry> {
        self.scales
            .iter()
            .find(|s| s.resolution.approx_eq(&resolution))
    }

    /// Mutable scale at `resolution`.
    pub fn scale_mut(&mut self, resolution: Vec3D) -> Option<&mut ScaleEntry> {
        self.scales
            .iter_mut()
            .find(|s| s.resolution.approx_eq(&resolution))
    }

    /// Scale at `resolution`, or an error naming the volume.
    pub fn require_scale(&self, resolution: Vec3D, path: &Path) -> PrecomputedResult<&ScaleEntry> {
        self.scale(resolution)
            .ok_or_else(|| PrecomputedError::ScaleNotFound {
                path: path.to_path_buf(),
                resolution: resolution.to_string(),
            })
    }

    /// Scale with the smallest voxel volume.
    pub fn finest_scale(&self) -> Option<&ScaleEntry> {
        self.scales.iter().min_by(|a, b| {
            let va = a.resolution.0.iter().product::<f64>();
            let vb = b.resolution.0.iter().product::<f64>();
            va.total_cmp(&vb)
        })
    }

    /// Inserts `scale`, replacing any scale at the same resolution.
    pub fn upsert_scale(&mut self, scale: ScaleEntry) {
        match self.scale_mut(scale.resolution) {
            Some(existing) => *existing = scale,
            None => self.scales.push(scale),
        }
    }

    /// Orders scales from finest to coarsest.
    pub fn sort_scales(&mut self) {
        self.scales.sort_by(|a, b| {
            let va = a.resolution.0.iter().product::<f64>();
            let vb = b.resolution.0.iter().product::<f64>();
            va.total_cmp(&vb)
        });
    }

    /// Union of two documents' scales, with `newer` winning on conflicts.
    ///
    /// Top-level fields come from `newer`.
    pub fn merged_with(&self, newer: &PrecomputedInfo) -> PrecomputedInfo {
        let mut merged = newer.clone();
        for scale in &self.scales {
            if merged.scale(scale.resolution).is_none() {
                merged.scales.push(scale.clone());
            }
        }
        merged.sort_scales();
        merged
    }
}
