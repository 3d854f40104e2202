//! Dense volumetric tensors.
//!
//! All volume data moves through the crate as a [`Tensor`]: a 4-D `f64`
//! array in channel, x, y, z order. Storage formats convert to and from
//! their on-disk data type at the backend boundary.
//!
//! # Helpers
//!
//! - [`zeros`], [`spatial_shape`]
//! - [`crop`]: strip a margin from every spatial side
//! - [`extract`] / [`paste`]: copy sub-regions out of and into a tensor
//! - [`interpolate`]: separable resampling with an [`InterpolationMode`]

mod error;
mod interpolate;

pub use error::TensorError;
pub use interpolate::{interpolate, InterpolationMode};

use crate::geometry::IntVec3D;
use ndarray::{s, Array4};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Volume data, indexed `[channel, x, y, z]`.
pub type Tensor = Array4<f64>;

/// Semantic type of stored data.
///
/// Image data is continuous-valued; segmentation data holds labels that
/// must never be blended.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LayerType {
    #[default]
    Image,
    Segmentation,
}

impl fmt::Display for LayerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Image => write!(f, "image"),
            Self::Segmentation => write!(f, "segmentation"),
        }
    }
}

/// Allocates a zero tensor with `channels` channels and spatial `shape`.
pub fn zeros(channels: usize, shape: [usize; 3]) -> Tensor {
    Array4::zeros((channels, shape[0], shape[1], shape[2]))
}

/// Spatial (x, y, z) shape of a tensor.
pub fn spatial_shape(data: &Tensor) -> IntVec3D {
    let (_, x, y, z) = data.dim();
    IntVec3D::new(x as i64, y as i64, z as i64)
}

fn check_region(data: &Tensor, offset: IntVec3D, size: IntVec3D) -> Result<(), TensorError> {
    let shape = spatial_shape(data);
    let fits = offset.is_non_negative()
        && size.is_non_negative()
        && (0..3).all(|i| offset[i] + size[i] <= shape[i]);
    if fits {
        Ok(())
    } else {
        Err(TensorError::OutOfRange {
            offset,
            size,
            shape,
        })
    }
}

/// Removes `crop` voxels from both ends of every spatial axis.
pub fn crop(data: &Tensor, crop: IntVec3D) -> Result<Tensor, TensorError> {
    let size = spatial_shape(data) - crop * 2;
    extract(data, crop, size)
}

/// Copies the spatial sub-region `[offset, offset + size)` out of `data`.
pub fn extract(data: &Tensor, offset: IntVec3D, size: IntVec3D) -> Result<Tensor, TensorError> {
    check_region(data, offset, size)?;
    let [x0, y0, z0] = offset.0.map(|v| v as usize);
    let [x1, y1, z1] = (offset + size).0.map(|v| v as usize);
    Ok(data.slice(s![.., x0..x1, y0..y1, z0..z1]).to_owned())
}

/// Copies `src` into `dst` with its origin at spatial `offset`.
pub fn paste(dst: &mut Tensor, src: &Tensor, offset: IntVec3D) -> Result<(), TensorError> {
    if src.dim().0 != dst.dim().0 {
        return Err(TensorError::ShapeMismatch {
            expected: dst.shape().to_vec(),
            actual: src.shape().to_vec(),
        });
    }
    check_region(dst, offset, spatial_shape(src))?;
    let [x0, y0, z0] = offset.0.map(|v| v as usize);
    let (_, sx, sy, sz) = src.dim();
    dst.slice_mut(s![.., x0..x0 + sx, y0..y0 + sy, z0..z0 + sz])
        .assign(src);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(shape: (usize, usize, usize, usize)) -> Tensor {
        Array4::from_shape_fn(shape, |(c, x, y, z)| (c * 1000 + x * 100 + y * 10 + z) as f64)
    }

    #[test]
    fn test_spatial_shape() {
        assert_eq!(spatial_shape(&zeros(2, [3, 4, 5])), IntVec3D::new(3, 4, 5));
    }

    #[test]
    fn test_crop() {
        let data = ramp((1, 6, 6, 3));
        let cropped = crop(&data, IntVec3D::new(1, 2, 0)).unwrap();
        assert_eq!(cropped.dim(), (1, 4, 2, 3));
        assert_eq!(cropped[[0, 0, 0, 0]], 120.0);
    }

    #[test]
    fn test_crop_too_large() {
        let data = ramp((1, 4, 4, 4));
        assert!(matches!(
            crop(&data, IntVec3D::new(3, 0, 0)),
            Err(TensorError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_extract_and_paste() {
        let data = ramp((2, 4, 4, 4));
        let part = extract(&data, IntVec3D::new(1, 1, 1), IntVec3D::new(2, 2, 2)).unwrap();
        assert_eq!(part[[1, 0, 0, 0]], 1111.0);

        let mut dst = zeros(2, [4, 4, 4]);
        paste(&mut dst, &part, IntVec3D::new(2, 2, 2)).unwrap();
        assert_eq!(dst[[1, 2, 2, 2]], 1111.0);
        assert_eq!(dst[[1, 0, 0, 0]], 0.0);
    }

    #[test]
    fn test_paste_channel_mismatch() {
        let mut dst = zeros(1, [4, 4, 4]);
        let src = zeros(2, [2, 2, 2]);
        assert!(matches!(
            paste(&mut dst, &src, IntVec3D::ZERO),
            Err(TensorError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_layer_type_serde() {
        assert_eq!(serde_json::to_string(&LayerType::Segmentation).unwrap(), "\"segmentation\"");
    }
}
