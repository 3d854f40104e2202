//! Declarative creation and reconciliation of info documents.
//!
//! An [`InfoSpec`] describes the document a volume should have: start from a
//! reference volume's document (or from scratch), override top-level fields,
//! add derived scales and adjust per-scale chunk grids. [`InfoSpec::update_info`]
//! then reconciles the result with whatever document already exists,
//! according to an [`InfoExistsMode`].

use super::error::{PrecomputedError, PrecomputedResult};
use super::info::PrecomputedInfo;
use crate::geometry::{IntVec3D, Vec3D};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// What to do when a volume already has a different info document.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InfoExistsMode {
    /// Fail unless the documents are identical.
    #[default]
    ExpectSame,
    /// Replace the existing document.
    Overwrite,
    /// Keep existing scales that the new document does not redefine.
    Merge,
}

impl fmt::Display for InfoExistsMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExpectSame => write!(f, "expect_same"),
            Self::Overwrite => write!(f, "overwrite"),
            Self::Merge => write!(f, "merge"),
        }
    }
}

/// How `add_scales` combines with the reference document's scales.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddScalesMode {
    /// Add to the existing scales, replacing any at the same resolution.
    #[default]
    Merge,
    /// Keep only the added scales.
    Replace,
}

/// Declarative description of an info document.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InfoSpec {
    /// Volume whose document is the starting point.
    pub reference_path: Option<PathBuf>,
    /// Top-level fields replacing those of the reference.
    pub field_overrides: Map<String, Value>,
    /// Chunk size applied to every scale.
    pub default_chunk_size: Option<IntVec3D>,
    /// Chunk size per resolution key (`"4_4_40"`).
    pub chunk_size_map: BTreeMap<String, IntVec3D>,
    /// Voxel offset applied to every scale.
    pub default_voxel_offset: Option<IntVec3D>,
    /// Voxel offset per resolution key.
    pub voxel_offset_map: BTreeMap<String, IntVec3D>,
    /// Dataset size applied to every scale.
    pub default_dataset_size: Option<IntVec3D>,
    /// Dataset size per resolution key.
    pub dataset_size_map: BTreeMap<String, IntVec3D>,
    /// Resolutions of scales to derive.
    pub add_scales: Vec<Vec3D>,
    /// Scale the added scales are derived from; defaults to the finest.
    pub add_scales_ref: Option<Vec3D>,
    /// How added scales combine with existing ones.
    pub add_scales_mode: AddScalesMode,
}

impl InfoSpec {
    /// Creates an empty specification.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts from the document of the volume at `path`.
    pub fn with_reference_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.reference_path = Some(path.into());
        self
    }

    /// Overrides a top-level field.
    pub fn with_field_override(mut self, key: impl Into<String>, value: Value) -> Self {
        self.field_overrides.insert(key.into(), value);
        self
    }

    /// Sets the chunk size of every scale.
    pub fn with_default_chunk_size(mut self, chunk_size: IntVec3D) -> Self {
        self.default_chunk_size = Some(chunk_size);
        self
    }

    /// Sets the chunk size of one scale.
    pub fn with_chunk_size(mut self, resolution: Vec3D, chunk_size: IntVec3D) -> Self {
        self.chunk_size_map
            .insert(resolution.resolution_key(), chunk_size);
        self
    }

    /// Sets the voxel offset of every scale.
    pub fn with_default_voxel_offset(mut self, voxel_offset: IntVec3D) -> Self {
        self.default_voxel_offset = Some(voxel_offset);
        self
    }

    /// Sets the voxel offset of one scale.
    pub fn with_voxel_offset(mut self, resolution: Vec3D, voxel_offset: IntVec3D) -> Self {
        self.voxel_offset_map
            .insert(resolution.resolution_key(), voxel_offset);
        self
    }

    /// Sets the dataset size of every scale.
    pub fn with_default_dataset_size(mut self, size: IntVec3D) -> Self {
        self.default_dataset_size = Some(size);
        self
    }

    /// Sets the dataset size of one scale.
    pub fn with_dataset_size(mut self, resolution: Vec3D, size: IntVec3D) -> Self {
        self.dataset_size_map.insert(resolution.resolution_key(), size);
        self
    }

    /// Derives scales at `resolutions`.
    pub fn with_added_scales(mut self, resolutions: Vec<Vec3D>, mode: AddScalesMode) -> Self {
        self.add_scales = resolutions;
        self.add_scales_mode = mode;
        self
    }

    /// Returns true if the specification describes no document.
    pub fn is_empty(&self) -> bool {
        self.reference_path.is_none() && self.field_overrides.is_empty()
    }

    /// Builds the described document.
    ///
    /// Returns `None` when neither a reference nor field overrides are given.
    pub fn make_info(&self) -> PrecomputedResult<Option<PrecomputedInfo>> {
        if self.is_empty() {
            return Ok(None);
        }
        let (mut value, origin) = match &self.reference_path {
            Some(reference) => (
                PrecomputedInfo::read_value(reference)?
                    .ok_or_else(|| PrecomputedError::MissingInfo(reference.clone()))?,
                reference.clone(),
            ),
            None => (Value::Object(Map::new()), PathBuf::from("<field_overrides>")),
        };
        if let Value::Object(fields) = &mut value {
            for (key, field) in &self.field_overrides {
                fields.insert(key.clone(), field.clone());
            }
        }
        let mut info = PrecomputedInfo::from_value(value, &origin)?;

        self.add_derived_scales(&mut info, &origin)?;
        for scale in &mut info.scales {
            let key = scale.resolution.resolution_key();
            if let Some(c) = self.chunk_size_map.get(&key).or(self.default_chunk_size.as_ref()) {
                scale.chunk_sizes = vec![*c];
            }
            if let Some(o) = self.voxel_offset_map.get(&key).or(self.default_voxel_offset.as_ref()) {
                scale.voxel_offset = *o;
            }
            if let Some(s) = self.dataset_size_map.get(&key).or(self.default_dataset_size.as_ref()) {
                scale.size = *s;
            }
        }
        for (field, map) in [
            ("chunk_size", &self.chunk_size_map),
            ("voxel_offset", &self.voxel_offset_map),
            ("dataset_size", &self.dataset_size_map),
        ] {
            if let Some(key) = map
                .keys()
                .find(|k| !info.scales.iter().any(|s| &s.resolution.resolution_key() == *k))
            {
                return Err(PrecomputedError::MissingField {
                    field: format!("scale for {}", field),
                    resolution: key.clone(),
                });
            }
        }
        info.sort_scales();
        Ok(Some(info))
    }

    fn add_derived_scales(
        &self,
        info: &mut PrecomputedInfo,
        origin: &Path,
    ) -> PrecomputedResult<()> {
        if self.add_scales.is_empty() {
            return Ok(());
        }
        let reference = match self.add_scales_ref {
            Some(resolution) => info.require_scale(resolution, origin)?.clone(),
            None => info
                .finest_scale()
                .cloned()
                .ok_or_else(|| PrecomputedError::MissingField {
                    field: "scales".to_string(),
                    resolution: "add_scales_ref".to_string(),
                })?,
        };
        if self.add_scales_mode == AddScalesMode::Replace {
            info.scales.clear();
        }
        for resolution in &self.add_scales {
            info.upsert_scale(reference.rescaled(*resolution));
        }
        Ok(())
    }

    /// Writes the described document to `path`, reconciling with any
    /// existing one.
    ///
    /// Returns `true` if a document was written.
    pub fn update_info(&self, path: &Path, mode: InfoExistsMode) -> PrecomputedResult<bool> {
        let Some(new_info) = self.make_info()? else {
            return Ok(false);
        };
        let existing = PrecomputedInfo::read(path)?;
        let to_write = match existing {
            None => new_info,
            Some(old) if old == new_info => {
                debug!(path = %path.display(), "Info document unchanged");
                return Ok(false);
            }
            Some(old) => match mode {
                InfoExistsMode::ExpectSame => {
                    return Err(PrecomputedError::InfoMismatch {
                        path: path.to_path_buf(),
                    })
                }
                InfoExistsMode::Overwrite => {
                    info!(path = %path.display(), "Overwriting info document");
                    new_info
                }
                InfoExistsMode::Merge => {
                    let merged = old.merged_with(&new_info);
                    if merged == old {
                        return Ok(false);
                    }
                    info!(
                        path = %path.display(),
                        scales = merged.scales.len(),
                        "Merging info document"
                    );
                    merged
                }
            },
        };
        to_write.write(path)?;
        Ok(true)
    }
}
