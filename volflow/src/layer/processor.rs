//! Index and data processors.
//!
//! Index processors map the requested index to the index the backend is
//! asked for. Data processors then convert between the backend's data and
//! what the caller asked for, given both indices. Processors are pure: they
//! must not touch shared state.

use super::error::LayerResult;
use crate::geometry::{IntVec3D, Vec3D};
use crate::index::VolumetricIndex;
use crate::tensor::{interpolate, InterpolationMode, Tensor};
use serde::{Deserialize, Serialize};

/// Maps a requested index to the index passed to the backend.
pub trait IndexProcessor: Send + Sync {
    fn process(&self, idx: &VolumetricIndex) -> LayerResult<VolumetricIndex>;
}

/// Transforms data given the requested and the processed index.
pub trait DataProcessor<D>: Send + Sync {
    fn process(
        &self,
        data: D,
        idx: &VolumetricIndex,
        idx_proced: &VolumetricIndex,
    ) -> LayerResult<D>;
}

/// Direction of data flow through a processor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IoMode {
    Read,
    Write,
}

// =============================================================================
// Index processors
// =============================================================================

/// Shifts indices by a voxel offset given at its own resolution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VolIdxTranslator {
    pub offset: IntVec3D,
    pub resolution: Vec3D,
}

impl VolIdxTranslator {
    pub fn new(offset: IntVec3D, resolution: Vec3D) -> Self {
        Self { offset, resolution }
    }
}

impl IndexProcessor for VolIdxTranslator {
    fn process(&self, idx: &VolumetricIndex) -> LayerResult<VolumetricIndex> {
        Ok(idx.translated_at(self.offset, self.resolution)?)
    }
}

/// Re-expresses indices at a fixed resolution, keeping the physical region.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VolIdxResolutionAdjuster {
    pub resolution: Vec3D,
}

impl VolIdxResolutionAdjuster {
    pub fn new(resolution: Vec3D) -> Self {
        Self { resolution }
    }
}

impl IndexProcessor for VolIdxResolutionAdjuster {
    fn process(&self, idx: &VolumetricIndex) -> LayerResult<VolumetricIndex> {
        Ok(idx.with_resolution(self.resolution)?)
    }
}

/// Wraps a closure as an index processor.
pub struct IndexFn<F>(pub F);

impl<F> IndexProcessor for IndexFn<F>
where
    F: Fn(&VolumetricIndex) -> LayerResult<VolumetricIndex> + Send + Sync,
{
    fn process(&self, idx: &VolumetricIndex) -> LayerResult<VolumetricIndex> {
        (self.0)(idx)
    }
}

// =============================================================================
// Data processors
// =============================================================================

/// Resamples data between the requested and the processed resolution.
///
/// On read, data at the processed resolution is resampled to the requested
/// one; on write, the other way around.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VolDataInterpolator {
    pub interpolation_mode: InterpolationMode,
    pub mode: IoMode,
    #[serde(default)]
    pub allow_shape_rounding: bool,
}

impl VolDataInterpolator {
    pub fn new(interpolation_mode: InterpolationMode, mode: IoMode) -> Self {
        Self {
            interpolation_mode,
            mode,
            allow_shape_rounding: false,
        }
    }

    pub fn with_allow_shape_rounding(mut self, allow: bool) -> Self {
        self.allow_shape_rounding = allow;
        self
    }

    fn scale_factor(&self, idx: &VolumetricIndex, idx_proced: &VolumetricIndex) -> [f64; 3] {
        let (num, den) = match self.mode {
            IoMode::Read => (idx_proced.resolution(), idx.resolution()),
            IoMode::Write => (idx.resolution(), idx_proced.resolution()),
        };
        (num / den).to_array()
    }
}

impl DataProcessor<Tensor> for VolDataInterpolator {
    fn process(
        &self,
        data: Tensor,
        idx: &VolumetricIndex,
        idx_proced: &VolumetricIndex,
    ) -> LayerResult<Tensor> {
        let scale = self.scale_factor(idx, idx_proced);
        if scale.iter().all(|f| (f - 1.0).abs() < f64::EPSILON) {
            return Ok(data);
        }
        Ok(interpolate(
            &data,
            scale,
            self.interpolation_mode,
            self.allow_shape_rounding,
        )?)
    }
}

/// Wraps a closure as a data processor.
pub struct DataFn<F>(pub F);

impl<D, F> DataProcessor<D> for DataFn<F>
where
    F: Fn(D, &VolumetricIndex, &VolumetricIndex) -> LayerResult<D> + Send + Sync,
{
    fn process(
        &self,
        data: D,
        idx: &VolumetricIndex,
        idx_proced: &VolumetricIndex,
    ) -> LayerResult<D> {
        (self.0)(data, idx, idx_proced)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    fn idx_at(res: Vec3D, s: [i64; 3], e: [i64; 3]) -> VolumetricIndex {
        VolumetricIndex::from_coords(IntVec3D(s), IntVec3D(e), res).unwrap()
    }

    #[test]
    fn test_translator_converts_resolution() {
        let idx = idx_at(Vec3D::new(4.0, 4.0, 40.0), [0, 0, 0], [8, 8, 1]);
        let t = VolIdxTranslator::new(IntVec3D::new(1, 0, 0), Vec3D::new(16.0, 16.0, 40.0));
        let moved = t.process(&idx).unwrap();
        assert_eq!(moved.start(), IntVec3D::new(4, 0, 0));
        assert_eq!(moved.resolution(), idx.resolution());
    }

    #[test]
    fn test_resolution_adjuster() {
        let idx = idx_at(Vec3D::new(4.0, 4.0, 40.0), [0, 0, 0], [8, 8, 1]);
        let adjusted = VolIdxResolutionAdjuster::new(Vec3D::new(8.0, 8.0, 40.0))
            .process(&idx)
            .unwrap();
        assert_eq!(adjusted.shape(), IntVec3D::new(4, 4, 1));
        assert_eq!(adjusted.bbox(), idx.bbox());
    }

    #[test]
    fn test_interpolator_directions() {
        let fine = idx_at(Vec3D::new(4.0, 4.0, 40.0), [0, 0, 0], [8, 8, 1]);
        let coarse = idx_at(Vec3D::new(8.0, 8.0, 40.0), [0, 0, 0], [4, 4, 1]);
        let read = VolDataInterpolator::new(InterpolationMode::Nearest, IoMode::Read);
        let up = read
            .process(Array4::from_elem((1, 4, 4, 1), 3.0), &fine, &coarse)
            .unwrap();
        assert_eq!(up.dim(), (1, 8, 8, 1));

        let write = VolDataInterpolator::new(InterpolationMode::Area, IoMode::Write);
        let down = write
            .process(Array4::from_elem((1, 8, 8, 1), 3.0), &fine, &coarse)
            .unwrap();
        assert_eq!(down.dim(), (1, 4, 4, 1));
        assert!(down.iter().all(|v| (*v - 3.0).abs() < 1e-12));
    }

    #[test]
    fn test_closure_processors() {
        let idx = idx_at(Vec3D::new(4.0, 4.0, 40.0), [0, 0, 0], [2, 2, 1]);
        let shift = IndexFn(|i: &VolumetricIndex| -> LayerResult<VolumetricIndex> {
            Ok(i.translated(IntVec3D::new(2, 0, 0)))
        });
        assert_eq!(shift.process(&idx).unwrap().start(), IntVec3D::new(2, 0, 0));

        let double = DataFn(
            |d: Tensor, _: &VolumetricIndex, _: &VolumetricIndex| -> LayerResult<Tensor> {
                Ok(d * 2.0)
            },
        );
        let out = double
            .process(Array4::from_elem((1, 2, 2, 1), 1.5), &idx, &idx)
            .unwrap();
        assert_eq!(out[[0, 1, 1, 0]], 3.0);
    }
}
