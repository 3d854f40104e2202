//! Axis-aligned bounding boxes in physical units.
//!
//! A [`BBox3D`] stores `start` and `end` corners in physical space
//! (typically nanometres). Conversions to voxel ranges always go through an
//! explicit resolution, so the same box can be addressed at any scale.

use super::error::DomainError;
use super::vec3d::{as_integral, IntVec3D, Vec3D, INTEGRAL_EPSILON};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;

/// Direction used when aligning a box to a grid.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapMode {
    /// Grow outward to the next grid line.
    Expand,
    /// Contract inward to the nearest grid line.
    Shrink,
}

impl fmt::Display for SnapMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Expand => write!(f, "expand"),
            Self::Shrink => write!(f, "shrink"),
        }
    }
}

/// Floor that treats values within epsilon of an integer as that integer.
fn floor_eps(value: f64) -> f64 {
    match as_integral(value) {
        Some(v) => v as f64,
        None => value.floor(),
    }
}

/// Ceil that treats values within epsilon of an integer as that integer.
fn ceil_eps(value: f64) -> f64 {
    match as_integral(value) {
        Some(v) => v as f64,
        None => value.ceil(),
    }
}

/// An axis-aligned box `[start, end)` in physical units.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct BBox3D {
    /// Minimum corner (inclusive).
    pub start: Vec3D,
    /// Maximum corner (exclusive).
    pub end: Vec3D,
}

impl BBox3D {
    /// Creates a box from its physical corners.
    pub fn new(start: Vec3D, end: Vec3D) -> Self {
        Self { start, end }
    }

    /// Creates a box from voxel coordinates at `resolution`.
    pub fn from_coords(start: IntVec3D, end: IntVec3D, resolution: Vec3D) -> Self {
        Self {
            start: start * resolution,
            end: end * resolution,
        }
    }

    /// Physical extent along each axis.
    pub fn size(&self) -> Vec3D {
        self.end - self.start
    }

    /// Returns true if any axis has zero or negative extent.
    pub fn is_empty(&self) -> bool {
        (0..3).any(|i| self.end.0[i] - self.start.0[i] <= INTEGRAL_EPSILON)
    }

    /// Converts the box to voxel ranges at `resolution`.
    ///
    /// Fails with [`DomainError::NonIntegerBounds`] when a bound does not
    /// fall on a voxel boundary, unless `allow_rounding` is set, in which
    /// case bounds are rounded to the nearest voxel.
    pub fn to_slices(
        &self,
        resolution: Vec3D,
        allow_rounding: bool,
    ) -> Result<[Range<i64>; 3], DomainError> {
        let start = self.start / resolution;
        let end = self.end / resolution;
        let convert = |v: Vec3D| -> Result<IntVec3D, DomainError> {
            match v.to_integral() {
                Some(iv) => Ok(iv),
                None if allow_rounding => Ok(v.round()),
                None => Err(DomainError::NonIntegerBounds {
                    bbox: self.to_string(),
                    resolution,
                }),
            }
        };
        let s = convert(start)?;
        let e = convert(end)?;
        Ok([s[0]..e[0], s[1]..e[1], s[2]..e[2]])
    }

    /// Grows the box by `pad` voxels at `resolution` on every side.
    pub fn padded(&self, pad: IntVec3D, resolution: Vec3D) -> Self {
        let amount = pad * resolution;
        Self {
            start: self.start - amount,
            end: self.end + amount,
        }
    }

    /// Shrinks the box by `crop` voxels at `resolution` on every side.
    pub fn cropped(&self, crop: IntVec3D, resolution: Vec3D) -> Self {
        self.padded(-crop, resolution)
    }

    /// Moves the whole box by `offset` voxels at `resolution`.
    pub fn translated(&self, offset: IntVec3D, resolution: Vec3D) -> Self {
        let amount = offset * resolution;
        Self {
            start: self.start + amount,
            end: self.end + amount,
        }
    }

    /// Moves only the start corner by `offset` voxels at `resolution`.
    pub fn translated_start(&self, offset: IntVec3D, resolution: Vec3D) -> Self {
        Self {
            start: self.start + offset * resolution,
            end: self.end,
        }
    }

    /// Moves only the end corner by `offset` voxels at `resolution`.
    pub fn translated_end(&self, offset: IntVec3D, resolution: Vec3D) -> Self {
        Self {
            start: self.start,
            end: self.end + offset * resolution,
        }
    }

    /// Returns true if the interiors of the boxes overlap.
    pub fn intersects(&self, other: &BBox3D) -> bool {
        (0..3).all(|i| {
            self.start.0[i] < other.end.0[i] - INTEGRAL_EPSILON
                && other.start.0[i] < self.end.0[i] - INTEGRAL_EPSILON
        })
    }

    /// Geometric intersection of two boxes.
    ///
    /// Touching boxes produce a zero-extent box. Boxes separated by a gap
    /// along any axis are disjoint and yield [`DomainError::Disjoint`].
    pub fn intersection(&self, other: &BBox3D) -> Result<BBox3D, DomainError> {
        let start = self.start.zip_map(other.start, f64::max);
        let end = self.end.zip_map(other.end, f64::min);
        if (0..3).any(|i| end.0[i] < start.0[i] - INTEGRAL_EPSILON) {
            return Err(DomainError::Disjoint {
                a: self.to_string(),
                b: other.to_string(),
            });
        }
        Ok(BBox3D {
            start,
            end: end.zip_map(start, f64::max),
        })
    }

    /// Returns true if `other` lies entirely inside this box.
    ///
    /// An empty box is contained by every box.
    pub fn contains(&self, other: &BBox3D) -> bool {
        if other.is_empty() {
            return true;
        }
        (0..3).all(|i| {
            self.start.0[i] <= other.start.0[i] + INTEGRAL_EPSILON
                && other.end.0[i] <= self.end.0[i] + INTEGRAL_EPSILON
        })
    }

    /// Aligns the box to a grid.
    ///
    /// The grid has lines at `grid_offset + k * grid_size` along each axis,
    /// where both are given in physical units. In [`SnapMode::Shrink`] an
    /// axis with no whole grid cell inside collapses to a zero extent at the
    /// box's own start.
    pub fn snapped(&self, grid_offset: Vec3D, grid_size: Vec3D, mode: SnapMode) -> BBox3D {
        let rel_start = (self.start - grid_offset) / grid_size;
        let rel_end = (self.end - grid_offset) / grid_size;
        let (s, e) = match mode {
            SnapMode::Expand => (rel_start.map(floor_eps), rel_end.map(ceil_eps)),
            SnapMode::Shrink => (rel_start.map(ceil_eps), rel_end.map(floor_eps)),
        };
        let mut start = s * grid_size + grid_offset;
        let mut end = e * grid_size + grid_offset;
        if mode == SnapMode::Shrink {
            // An axis with no grid cell inside collapses onto the original start.
            for i in 0..3 {
                if end.0[i] < start.0[i] {
                    start.0[i] = self.start.0[i];
                    end.0[i] = self.start.0[i];
                }
            }
        }
        BBox3D { start, end }
    }
}

impl PartialEq for BBox3D {
    fn eq(&self, other: &Self) -> bool {
        self.start.approx_eq(&other.start) && self.end.approx_eq(&other.end)
    }
}

impl fmt::Display for BBox3D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{} -> {}]", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn res() -> Vec3D {
        Vec3D::new(4.0, 4.0, 40.0)
    }

    fn bbox(s: [i64; 3], e: [i64; 3]) -> BBox3D {
        BBox3D::from_coords(IntVec3D(s), IntVec3D(e), res())
    }

    #[test]
    fn test_from_coords_and_slices() {
        let b = bbox([1, 2, 3], [11, 12, 13]);
        assert_eq!(b.start, Vec3D::new(4.0, 8.0, 120.0));
        let slices = b.to_slices(res(), false).unwrap();
        assert_eq!(slices, [1..11, 2..12, 3..13]);
    }

    #[test]
    fn test_to_slices_non_integer() {
        let b = BBox3D::new(Vec3D::new(2.0, 0.0, 0.0), Vec3D::new(8.0, 4.0, 40.0));
        let err = b.to_slices(res(), false).unwrap_err();
        assert!(matches!(err, DomainError::NonIntegerBounds { .. }));
        let rounded = b.to_slices(res(), true).unwrap();
        assert_eq!(rounded[0], 1..2);
    }

    #[test]
    fn test_pad_crop() {
        let b = bbox([10, 10, 10], [20, 20, 20]);
        let p = b.padded(IntVec3D::new(1, 2, 3), res());
        assert_eq!(p, bbox([9, 8, 7], [21, 22, 23]));
        assert_eq!(p.cropped(IntVec3D::new(1, 2, 3), res()), b);
    }

    #[test]
    fn test_translated_variants() {
        let b = bbox([0, 0, 0], [10, 10, 10]);
        let o = IntVec3D::new(5, 0, -1);
        assert_eq!(b.translated(o, res()), bbox([5, 0, -1], [15, 10, 9]));
        assert_eq!(b.translated_start(o, res()), bbox([5, 0, -1], [10, 10, 10]));
        assert_eq!(b.translated_end(o, res()), bbox([0, 0, 0], [15, 10, 9]));
    }

    #[test]
    fn test_intersection() {
        let a = bbox([0, 0, 0], [10, 10, 10]);
        let b = bbox([5, 5, 5], [15, 15, 15]);
        assert_eq!(a.intersection(&b).unwrap(), bbox([5, 5, 5], [10, 10, 10]));
        assert!(a.intersects(&b));
    }

    #[test]
    fn test_intersection_touching_is_degenerate() {
        let a = bbox([0, 0, 0], [10, 10, 10]);
        let b = bbox([10, 0, 0], [20, 10, 10]);
        let i = a.intersection(&b).unwrap();
        assert!(i.is_empty());
        assert!(!a.intersects(&b));
    }

    #[test]
    fn test_intersection_disjoint() {
        let a = bbox([0, 0, 0], [10, 10, 10]);
        let b = bbox([11, 0, 0], [20, 10, 10]);
        assert!(matches!(
            a.intersection(&b),
            Err(DomainError::Disjoint { .. })
        ));
    }

    #[test]
    fn test_contains() {
        let a = bbox([0, 0, 0], [10, 10, 10]);
        assert!(a.contains(&bbox([2, 2, 2], [10, 10, 10])));
        assert!(!a.contains(&bbox([2, 2, 2], [11, 10, 10])));
        assert!(a.contains(&bbox([50, 50, 50], [50, 50, 50])));
    }

    #[test]
    fn test_snapped_expand_and_shrink() {
        let grid_size = IntVec3D::new(8, 8, 8) * res();
        let grid_offset = IntVec3D::new(2, 0, 0) * res();
        let b = bbox([5, 3, 8], [20, 16, 17]);

        let expanded = b.snapped(grid_offset, grid_size, SnapMode::Expand);
        assert_eq!(expanded, bbox([2, 0, 8], [26, 16, 24]));

        let shrunk = b.snapped(grid_offset, grid_size, SnapMode::Shrink);
        assert_eq!(shrunk, bbox([10, 8, 8], [18, 16, 16]));
    }

    #[test]
    fn test_snapped_shrink_collapses() {
        let grid_size = IntVec3D::new(8, 8, 8) * res();
        let b = bbox([1, 0, 0], [7, 8, 8]);
        let shrunk = b.snapped(Vec3D::default(), grid_size, SnapMode::Shrink);
        assert!(shrunk.is_empty());
        assert_eq!(shrunk, bbox([1, 0, 0], [1, 8, 8]));
        for i in 0..3 {
            assert!(b.start.0[i] <= shrunk.start.0[i]);
            assert!(shrunk.end.0[i] <= b.end.0[i]);
        }
    }

    #[test]
    fn test_snapped_aligned_is_identity() {
        let grid_size = IntVec3D::new(8, 8, 8) * res();
        let b = bbox([8, 16, 0], [24, 32, 8]);
        assert_eq!(b.snapped(Vec3D::default(), grid_size, SnapMode::Expand), b);
        assert_eq!(b.snapped(Vec3D::default(), grid_size, SnapMode::Shrink), b);
    }
}
