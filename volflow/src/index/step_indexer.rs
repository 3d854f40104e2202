//! Uniformly strided sample windows over a region.
//!
//! Unlike [`VolumetricIndexChunker`](super::VolumetricIndexChunker), the step
//! indexer tolerates regions that do not tile evenly: it drops the partial
//! windows at the far end and logs the rounded-down bounds.

use super::error::ChunkerError;
use crate::geometry::{BBox3D, DomainError, IntVec3D, Vec3D};
use crate::index::VolumetricIndex;
use tracing::warn;

/// Random-access indexer of fixed-size sample windows.
#[derive(Clone, Debug)]
pub struct VolumetricStepIndexer {
    bbox: BBox3D,
    sample_size_in_unit: Vec3D,
    step_size_in_unit: Vec3D,
    index_resolution: Vec3D,
    step_limits: IntVec3D,
}

impl VolumetricStepIndexer {
    /// Creates an indexer.
    ///
    /// `sample_size` and `step_size` are voxel counts at their respective
    /// resolutions; produced indices are addressed at `index_resolution`.
    /// Sizes must be positive and resolutions positive and finite.
    pub fn new(
        bbox: BBox3D,
        sample_size: IntVec3D,
        sample_size_resolution: Vec3D,
        step_size: IntVec3D,
        step_size_resolution: Vec3D,
        index_resolution: Vec3D,
    ) -> Result<Self, ChunkerError> {
        if !sample_size.is_positive() || !step_size.is_positive() {
            return Err(ChunkerError::NonPositiveSize {
                chunk_size: sample_size,
                step_size,
            });
        }
        for resolution in [sample_size_resolution, step_size_resolution, index_resolution] {
            if resolution.0.iter().any(|r| !r.is_finite() || *r <= 0.0) {
                return Err(DomainError::InvalidResolution(resolution).into());
            }
        }
        let sample_size_in_unit = sample_size * sample_size_resolution;
        let step_size_in_unit = step_size * step_size_resolution;
        let raw = (bbox.size() - sample_size_in_unit) / step_size_in_unit + Vec3D::splat(1.0);
        let step_limits = IntVec3D(std::array::from_fn(|i| raw[i].floor().max(0.0) as i64));

        if !step_limits.to_f64().approx_eq(&raw) {
            let rounded = BBox3D::new(
                bbox.start,
                bbox.start
                    + sample_size_in_unit
                    + step_size_in_unit * (step_limits.to_f64() - Vec3D::splat(1.0)),
            );
            warn!(
                from = %bbox,
                to = %rounded,
                step = %step_size_in_unit,
                sample = %sample_size_in_unit,
                "Rounding down bounds to divide evenly by step size"
            );
        }

        Ok(Self {
            bbox,
            sample_size_in_unit,
            step_size_in_unit,
            index_resolution,
            step_limits,
        })
    }

    /// Number of windows.
    pub fn len(&self) -> usize {
        self.step_limits.volume() as usize
    }

    /// Returns true if the region is smaller than one sample.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Windows along x, y and z.
    pub fn step_limits(&self) -> IntVec3D {
        self.step_limits
    }

    /// Window `i`, x varying fastest. Out-of-range indices give `None`.
    pub fn get(&self, i: usize) -> Option<Result<VolumetricIndex, DomainError>> {
        if i >= self.len() {
            return None;
        }
        let i = i as i64;
        let [nx, ny, _] = self.step_limits.0;
        let steps = IntVec3D::new(i % nx, (i / nx) % ny, i / (nx * ny));
        let origin = self.bbox.start + self.step_size_in_unit * steps.to_f64();
        let end = origin + self.sample_size_in_unit;
        let to_voxels = |v: Vec3D| {
            IntVec3D(std::array::from_fn(|k| {
                (v[k] / self.index_resolution[k]).floor() as i64
            }))
        };
        Some(VolumetricIndex::from_coords(
            to_voxels(origin),
            to_voxels(end),
            self.index_resolution,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn res() -> Vec3D {
        Vec3D::new(4.0, 4.0, 40.0)
    }

    #[test]
    fn test_even_tiling() {
        let bbox = BBox3D::from_coords(IntVec3D::ZERO, IntVec3D::new(100, 100, 10), res());
        let indexer = VolumetricStepIndexer::new(
            bbox,
            IntVec3D::new(50, 50, 10),
            res(),
            IntVec3D::new(25, 25, 10),
            res(),
            res(),
        )
        .unwrap();
        assert_eq!(indexer.step_limits(), IntVec3D::new(3, 3, 1));
        assert_eq!(indexer.len(), 9);

        let second = indexer.get(1).unwrap().unwrap();
        assert_eq!(second.start(), IntVec3D::new(25, 0, 0));
        assert_eq!(second.shape(), IntVec3D::new(50, 50, 10));

        let fourth = indexer.get(3).unwrap().unwrap();
        assert_eq!(fourth.start(), IntVec3D::new(0, 25, 0));
        assert!(indexer.get(9).is_none());
    }

    #[test]
    fn test_rounds_down_partial_windows() {
        let bbox = BBox3D::from_coords(IntVec3D::ZERO, IntVec3D::new(110, 50, 10), res());
        let indexer = VolumetricStepIndexer::new(
            bbox,
            IntVec3D::new(50, 50, 10),
            res(),
            IntVec3D::new(50, 50, 10),
            res(),
            res(),
        )
        .unwrap();
        assert_eq!(indexer.step_limits(), IntVec3D::new(2, 1, 1));
    }

    #[test]
    fn test_index_resolution_differs() {
        let bbox = BBox3D::from_coords(IntVec3D::ZERO, IntVec3D::new(64, 64, 1), res());
        let indexer = VolumetricStepIndexer::new(
            bbox,
            IntVec3D::new(32, 32, 1),
            res(),
            IntVec3D::new(32, 32, 1),
            res(),
            Vec3D::new(8.0, 8.0, 40.0),
        )
        .unwrap();
        let last = indexer.get(3).unwrap().unwrap();
        assert_eq!(last.start(), IntVec3D::new(16, 16, 0));
        assert_eq!(last.shape(), IntVec3D::new(16, 16, 1));
    }

    #[test]
    fn test_region_smaller_than_sample() {
        let bbox = BBox3D::from_coords(IntVec3D::ZERO, IntVec3D::new(10, 10, 1), res());
        let indexer = VolumetricStepIndexer::new(
            bbox,
            IntVec3D::new(32, 32, 1),
            res(),
            IntVec3D::new(32, 32, 1),
            res(),
            res(),
        )
        .unwrap();
        assert!(indexer.is_empty());
        assert!(indexer.get(0).is_none());
    }

    #[test]
    fn test_non_positive_sizes_rejected() {
        let bbox = BBox3D::from_coords(IntVec3D::ZERO, IntVec3D::new(64, 64, 1), res());
        let build = |sample: IntVec3D, step: IntVec3D, step_res: Vec3D| {
            VolumetricStepIndexer::new(bbox, sample, res(), step, step_res, res())
        };
        assert!(matches!(
            build(IntVec3D::new(32, 32, 1), IntVec3D::new(32, 0, 1), res()),
            Err(ChunkerError::NonPositiveSize { .. })
        ));
        assert!(matches!(
            build(IntVec3D::new(-32, 32, 1), IntVec3D::new(32, 32, 1), res()),
            Err(ChunkerError::NonPositiveSize { .. })
        ));
        assert!(matches!(
            build(IntVec3D::new(32, 32, 1), IntVec3D::new(32, 32, 1), Vec3D::new(4.0, 0.0, 40.0)),
            Err(ChunkerError::Domain(DomainError::InvalidResolution(_)))
        ));
    }
}
