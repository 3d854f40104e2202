//! Volumetric spatial index.
//!
//! A [`VolumetricIndex`] names a region of a volume: a physical bounding box
//! plus the resolution at which it is addressed. Voxel coordinates
//! (`start`, `stop`, `shape`) are derived from those two on demand, never
//! stored.

use crate::geometry::{BBox3D, DomainError, IntVec3D, SnapMode, Vec3D};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// A bounding region at a resolution.
///
/// Construction checks that the box lands on voxel boundaries at the
/// resolution; with `allow_slice_rounding` set, bounds are instead rounded to
/// the nearest voxel when converted.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(try_from = "IndexRepr")]
pub struct VolumetricIndex {
    resolution: Vec3D,
    bbox: BBox3D,
    allow_slice_rounding: bool,
}

/// Unvalidated wire form of [`VolumetricIndex`].
#[derive(Deserialize)]
struct IndexRepr {
    resolution: Vec3D,
    bbox: BBox3D,
    #[serde(default)]
    allow_slice_rounding: bool,
}

impl TryFrom<IndexRepr> for VolumetricIndex {
    type Error = DomainError;

    fn try_from(repr: IndexRepr) -> Result<Self, Self::Error> {
        VolumetricIndex::new(repr.resolution, repr.bbox, repr.allow_slice_rounding)
    }
}

impl VolumetricIndex {
    /// Creates an index, validating the resolution and voxel alignment.
    pub fn new(
        resolution: Vec3D,
        bbox: BBox3D,
        allow_slice_rounding: bool,
    ) -> Result<Self, DomainError> {
        if resolution.0.iter().any(|r| !r.is_finite() || *r <= 0.0) {
            return Err(DomainError::InvalidResolution(resolution));
        }
        bbox.to_slices(resolution, allow_slice_rounding)?;
        Ok(Self {
            resolution,
            bbox,
            allow_slice_rounding,
        })
    }

    /// Creates an index from voxel coordinates `[start, end)` at `resolution`.
    pub fn from_coords(
        start: IntVec3D,
        end: IntVec3D,
        resolution: Vec3D,
    ) -> Result<Self, DomainError> {
        Self::new(
            resolution,
            BBox3D::from_coords(start, end, resolution),
            false,
        )
    }

    /// Resolution in physical units per voxel.
    pub fn resolution(&self) -> Vec3D {
        self.resolution
    }

    /// Physical bounding box.
    pub fn bbox(&self) -> &BBox3D {
        &self.bbox
    }

    /// Whether non-integral bounds are rounded instead of rejected.
    pub fn allow_slice_rounding(&self) -> bool {
        self.allow_slice_rounding
    }

    /// First voxel (inclusive).
    pub fn start(&self) -> IntVec3D {
        (self.bbox.start / self.resolution).round()
    }

    /// Last voxel (exclusive).
    pub fn stop(&self) -> IntVec3D {
        (self.bbox.end / self.resolution).round()
    }

    /// Extent in voxels.
    pub fn shape(&self) -> IntVec3D {
        self.stop() - self.start()
    }

    /// Extent in physical units.
    pub fn get_size(&self) -> Vec3D {
        self.bbox.size()
    }

    /// Voxel ranges along x, y and z.
    pub fn to_slices(&self) -> [Range<i64>; 3] {
        let (start, stop) = (self.start(), self.stop());
        [start[0]..stop[0], start[1]..stop[1], start[2]..stop[2]]
    }

    /// Returns true if any axis has zero extent.
    pub fn is_empty(&self) -> bool {
        self.shape().0.iter().any(|s| *s <= 0)
    }

    fn with_bbox(&self, bbox: BBox3D) -> Self {
        Self {
            resolution: self.resolution,
            bbox,
            allow_slice_rounding: self.allow_slice_rounding,
        }
    }

    /// Grows the region by `pad` voxels on every side.
    pub fn padded(&self, pad: IntVec3D) -> Self {
        self.with_bbox(self.bbox.padded(pad, self.resolution))
    }

    /// Shrinks the region by `crop` voxels on every side.
    pub fn cropped(&self, crop: IntVec3D) -> Self {
        self.with_bbox(self.bbox.cropped(crop, self.resolution))
    }

    /// Moves the region by `offset` voxels.
    pub fn translated(&self, offset: IntVec3D) -> Self {
        self.with_bbox(self.bbox.translated(offset, self.resolution))
    }

    /// Moves only the start corner by `offset` voxels.
    pub fn translated_start(&self, offset: IntVec3D) -> Self {
        self.with_bbox(self.bbox.translated_start(offset, self.resolution))
    }

    /// Moves only the end corner by `offset` voxels.
    pub fn translated_end(&self, offset: IntVec3D) -> Self {
        self.with_bbox(self.bbox.translated_end(offset, self.resolution))
    }

    /// Moves the region by `offset` voxels measured at `resolution`.
    pub fn translated_at(&self, offset: IntVec3D, resolution: Vec3D) -> Result<Self, DomainError> {
        Self::new(
            self.resolution,
            self.bbox.translated(offset, resolution),
            self.allow_slice_rounding,
        )
    }

    /// Same region addressed at another resolution.
    pub fn with_resolution(&self, resolution: Vec3D) -> Result<Self, DomainError> {
        Self::new(resolution, self.bbox, self.allow_slice_rounding)
    }

    /// Same region with a different rounding policy.
    pub fn with_allow_slice_rounding(&self, allow: bool) -> Result<Self, DomainError> {
        Self::new(self.resolution, self.bbox, allow)
    }

    fn check_resolution(&self, other: &VolumetricIndex) -> Result<(), DomainError> {
        if self.resolution.approx_eq(&other.resolution) {
            Ok(())
        } else {
            Err(DomainError::ResolutionMismatch {
                left: self.resolution,
                right: other.resolution,
            })
        }
    }

    /// Geometric intersection with an index at the same resolution.
    ///
    /// Touching regions give an empty index. Disjoint regions fail with
    /// [`DomainError::Disjoint`].
    pub fn intersection(&self, other: &VolumetricIndex) -> Result<Self, DomainError> {
        self.check_resolution(other)?;
        Ok(self.with_bbox(self.bbox.intersection(&other.bbox)?))
    }

    /// Returns true if the regions overlap with a non-empty volume.
    pub fn intersects(&self, other: &VolumetricIndex) -> bool {
        self.bbox.intersects(&other.bbox)
    }

    /// Returns true if `other` lies entirely inside this region.
    pub fn contains(&self, other: &VolumetricIndex) -> bool {
        self.bbox.contains(&other.bbox)
    }

    /// Aligns the region to a voxel grid with lines at
    /// `grid_offset + k * grid_size` (both in voxels at this resolution).
    pub fn snapped(&self, grid_offset: IntVec3D, grid_size: IntVec3D, mode: SnapMode) -> Self {
        self.with_bbox(self.bbox.snapped(
            grid_offset * self.resolution,
            grid_size * self.resolution,
            mode,
        ))
    }

    /// Human-readable form, e.g. `"[0:64, 0:64, 0:8] @ (4, 4, 40)"`.
    pub fn pformat(&self) -> String {
        let s = self.to_slices();
        format!(
            "[{}:{}, {}:{}, {}:{}] @ {}",
            s[0].start, s[0].end, s[1].start, s[1].end, s[2].start, s[2].end, self.resolution
        )
    }
}

impl PartialEq for VolumetricIndex {
    fn eq(&self, other: &Self) -> bool {
        self.resolution.approx_eq(&other.resolution)
            && self.bbox == other.bbox
            && self.allow_slice_rounding == other.allow_slice_rounding
    }
}

impl fmt::Display for VolumetricIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.pformat())
    }
}
