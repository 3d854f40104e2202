//! Separable resampling of volume tensors.
//!
//! Each spatial axis is resampled independently, so a 3-D interpolation is
//! three 1-D passes. Channel data is never mixed.

use super::error::TensorError;
use super::{LayerType, Tensor};
use crate::geometry::as_integral;
use ndarray::{Array4, Axis};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Resampling mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpolationMode {
    /// Copy the nearest source voxel.
    Nearest,
    /// Linear interpolation between voxel centres.
    Linear,
    /// Block averaging; integer downsampling only.
    Area,
    /// Area when shrinking, linear when growing.
    Img,
    /// Area, then any non-zero value becomes one.
    Mask,
    /// Label-preserving nearest-neighbour.
    Segmentation,
}

impl InterpolationMode {
    /// Fails when the mode would blend values of the given data type.
    ///
    /// Segmentation labels only accept [`Nearest`](Self::Nearest) and
    /// [`Segmentation`](Self::Segmentation).
    pub fn validate_for(&self, layer_type: LayerType) -> Result<(), TensorError> {
        let ok = match layer_type {
            LayerType::Image => true,
            LayerType::Segmentation => matches!(self, Self::Nearest | Self::Segmentation),
        };
        if ok {
            Ok(())
        } else {
            Err(TensorError::ModeNotAllowed {
                mode: *self,
                layer_type,
            })
        }
    }
}

impl fmt::Display for InterpolationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Nearest => "nearest",
            Self::Linear => "linear",
            Self::Area => "area",
            Self::Img => "img",
            Self::Mask => "mask",
            Self::Segmentation => "segmentation",
        };
        f.write_str(name)
    }
}

impl FromStr for InterpolationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "nearest" => Ok(Self::Nearest),
            "linear" | "trilinear" => Ok(Self::Linear),
            "area" => Ok(Self::Area),
            "img" => Ok(Self::Img),
            "mask" => Ok(Self::Mask),
            "segmentation" => Ok(Self::Segmentation),
            other => Err(format!("unknown interpolation mode '{}'", other)),
        }
    }
}

/// One-dimensional resampling kernel.
#[derive(Clone, Copy, Debug)]
enum Kernel {
    Nearest,
    Linear,
    Area(usize),
}

/// Resamples `data` by `scale` along x, y and z.
///
/// Output sizes are `size * scale`. A fractional output size is an error
/// unless `allow_shape_rounding` is set, in which case it is rounded.
pub fn interpolate(
    data: &Tensor,
    scale: [f64; 3],
    mode: InterpolationMode,
    allow_shape_rounding: bool,
) -> Result<Tensor, TensorError> {
    let mut out = data.clone();
    for (i, factor) in scale.iter().copied().enumerate() {
        if !factor.is_finite() || factor <= 0.0 {
            return Err(TensorError::InvalidScale(factor));
        }
        let axis = i + 1;
        let size = out.len_of(Axis(axis));
        let target = size as f64 * factor;
        let out_len = match as_integral(target) {
            Some(v) => v as usize,
            None if allow_shape_rounding => target.round() as usize,
            None => {
                return Err(TensorError::NonIntegerShape {
                    axis: i,
                    size,
                    scale: factor,
                })
            }
        };
        if out_len == size {
            continue;
        }
        let kernel = kernel_for(mode, size, out_len, factor)?;
        out = resample_axis(&out, axis, out_len, kernel);
    }
    if mode == InterpolationMode::Mask {
        out.mapv_inplace(|v| if v > 0.0 { 1.0 } else { 0.0 });
    }
    Ok(out)
}

fn kernel_for(
    mode: InterpolationMode,
    in_len: usize,
    out_len: usize,
    scale: f64,
) -> Result<Kernel, TensorError> {
    let area = || {
        if out_len > in_len {
            return Err(TensorError::Upsample { mode, scale });
        }
        match as_integral(in_len as f64 / out_len.max(1) as f64) {
            Some(k) if in_len % out_len.max(1) == 0 => Ok(Kernel::Area(k as usize)),
            _ => Err(TensorError::NonIntegerFactor { mode, scale }),
        }
    };
    match mode {
        InterpolationMode::Nearest | InterpolationMode::Segmentation => Ok(Kernel::Nearest),
        InterpolationMode::Linear => Ok(Kernel::Linear),
        InterpolationMode::Area | InterpolationMode::Mask => area(),
        InterpolationMode::Img if out_len < in_len => area(),
        InterpolationMode::Img => Ok(Kernel::Linear),
    }
}

fn resample_axis(data: &Tensor, axis: usize, out_len: usize, kernel: Kernel) -> Tensor {
    let in_len = data.len_of(Axis(axis));
    let mut dim = [0usize; 4];
    dim.copy_from_slice(data.shape());
    dim[axis] = out_len;
    let ratio = in_len as f64 / out_len.max(1) as f64;

    let at = |idx: [usize; 4], pos: usize| -> f64 {
        let mut src = idx;
        src[axis] = pos;
        data[src]
    };

    Array4::from_shape_fn((dim[0], dim[1], dim[2], dim[3]), |(c, x, y, z)| {
        let idx = [c, x, y, z];
        let dst = idx[axis];
        match kernel {
            Kernel::Nearest => {
                let src = ((dst as f64 * ratio).floor() as usize).min(in_len - 1);
                at(idx, src)
            }
            Kernel::Linear => {
                let pos = ((dst as f64 + 0.5) * ratio - 0.5).clamp(0.0, (in_len - 1) as f64);
                let lo = pos.floor() as usize;
                let hi = (lo + 1).min(in_len - 1);
                let w = pos - lo as f64;
                at(idx, lo) * (1.0 - w) + at(idx, hi) * w
            }
            Kernel::Area(k) => {
                let sum: f64 = (dst * k..dst * k + k).map(|p| at(idx, p)).sum();
                sum / k as f64
            }
        }
    })
}
