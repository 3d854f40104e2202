//! Three-component vectors for physical and voxel coordinates.
//!
//! [`Vec3D`] carries physical quantities (nanometres, resolutions) and
//! [`IntVec3D`] carries voxel counts. Arithmetic is component-wise.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Div, Index, Mul, Neg, Sub};

/// Tolerance used when deciding whether a float is integral.
pub const INTEGRAL_EPSILON: f64 = 1e-6;

/// Returns the nearest integer when `value` is within [`INTEGRAL_EPSILON`] of it.
pub fn as_integral(value: f64) -> Option<i64> {
    let rounded = value.round();
    if (value - rounded).abs() <= INTEGRAL_EPSILON {
        Some(rounded as i64)
    } else {
        None
    }
}

/// A vector of three floats.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec3D(pub [f64; 3]);

impl Vec3D {
    /// Creates a new vector.
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self([x, y, z])
    }

    /// Creates a vector with all components set to `value`.
    pub const fn splat(value: f64) -> Self {
        Self([value; 3])
    }

    /// Returns the components as an array.
    pub fn to_array(self) -> [f64; 3] {
        self.0
    }

    /// Applies `f` to every component.
    pub fn map(self, f: impl Fn(f64) -> f64) -> Self {
        Self([f(self.0[0]), f(self.0[1]), f(self.0[2])])
    }

    /// Combines two vectors component-wise with `f`.
    pub fn zip_map(self, other: Self, f: impl Fn(f64, f64) -> f64) -> Self {
        Self([
            f(self.0[0], other.0[0]),
            f(self.0[1], other.0[1]),
            f(self.0[2], other.0[2]),
        ])
    }

    /// Component-wise approximate equality.
    pub fn approx_eq(&self, other: &Self) -> bool {
        (0..3).all(|i| (self.0[i] - other.0[i]).abs() <= INTEGRAL_EPSILON)
    }

    /// Converts to an integer vector if every component is integral.
    pub fn to_integral(self) -> Option<IntVec3D> {
        Some(IntVec3D([
            as_integral(self.0[0])?,
            as_integral(self.0[1])?,
            as_integral(self.0[2])?,
        ]))
    }

    /// Rounds every component to the nearest integer.
    pub fn round(self) -> IntVec3D {
        IntVec3D([
            self.0[0].round() as i64,
            self.0[1].round() as i64,
            self.0[2].round() as i64,
        ])
    }

    /// Key used for resolution-indexed maps, e.g. `"4_4_40"`.
    pub fn resolution_key(&self) -> String {
        format!("{}_{}_{}", self.0[0], self.0[1], self.0[2])
    }
}

impl From<[f64; 3]> for Vec3D {
    fn from(value: [f64; 3]) -> Self {
        Self(value)
    }
}

impl From<IntVec3D> for Vec3D {
    fn from(value: IntVec3D) -> Self {
        value.to_f64()
    }
}

impl Index<usize> for Vec3D {
    type Output = f64;

    fn index(&self, index: usize) -> &f64 {
        &self.0[index]
    }
}

impl Add for Vec3D {
    type Output = Vec3D;

    fn add(self, rhs: Vec3D) -> Vec3D {
        self.zip_map(rhs, |a, b| a + b)
    }
}

impl Sub for Vec3D {
    type Output = Vec3D;

    fn sub(self, rhs: Vec3D) -> Vec3D {
        self.zip_map(rhs, |a, b| a - b)
    }
}

impl Mul for Vec3D {
    type Output = Vec3D;

    fn mul(self, rhs: Vec3D) -> Vec3D {
        self.zip_map(rhs, |a, b| a * b)
    }
}

impl Mul<f64> for Vec3D {
    type Output = Vec3D;

    fn mul(self, rhs: f64) -> Vec3D {
        self.map(|a| a * rhs)
    }
}

impl Div for Vec3D {
    type Output = Vec3D;

    fn div(self, rhs: Vec3D) -> Vec3D {
        self.zip_map(rhs, |a, b| a / b)
    }
}

impl Neg for Vec3D {
    type Output = Vec3D;

    fn neg(self) -> Vec3D {
        self.map(|a| -a)
    }
}

impl fmt::Display for Vec3D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.0[0], self.0[1], self.0[2])
    }
}

/// A vector of three integers, used for voxel counts and offsets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IntVec3D(pub [i64; 3]);

impl IntVec3D {
    /// Creates a new vector.
    pub const fn new(x: i64, y: i64, z: i64) -> Self {
        Self([x, y, z])
    }

    /// Creates a vector with all components set to `value`.
    pub const fn splat(value: i64) -> Self {
        Self([value; 3])
    }

    /// The zero vector.
    pub const ZERO: IntVec3D = IntVec3D([0; 3]);

    /// Returns the components as an array.
    pub fn to_array(self) -> [i64; 3] {
        self.0
    }

    /// Converts to a float vector.
    pub fn to_f64(self) -> Vec3D {
        Vec3D([self.0[0] as f64, self.0[1] as f64, self.0[2] as f64])
    }

    /// Product of the components.
    pub fn volume(&self) -> i64 {
        self.0[0] * self.0[1] * self.0[2]
    }

    /// Returns true if every component is zero or positive.
    pub fn is_non_negative(&self) -> bool {
        self.0.iter().all(|v| *v >= 0)
    }

    /// Returns true if every component is strictly positive.
    pub fn is_positive(&self) -> bool {
        self.0.iter().all(|v| *v > 0)
    }

    /// Combines two vectors component-wise with `f`.
    pub fn zip_map(self, other: Self, f: impl Fn(i64, i64) -> i64) -> Self {
        Self([
            f(self.0[0], other.0[0]),
            f(self.0[1], other.0[1]),
            f(self.0[2], other.0[2]),
        ])
    }

    /// Converts to `usize` components, failing on negative values.
    pub fn to_usize(self) -> Option<[usize; 3]> {
        Some([
            usize::try_from(self.0[0]).ok()?,
            usize::try_from(self.0[1]).ok()?,
            usize::try_from(self.0[2]).ok()?,
        ])
    }
}

impl From<[i64; 3]> for IntVec3D {
    fn from(value: [i64; 3]) -> Self {
        Self(value)
    }
}

impl Index<usize> for IntVec3D {
    type Output = i64;

    fn index(&self, index: usize) -> &i64 {
        &self.0[index]
    }
}

impl Add for IntVec3D {
    type Output = IntVec3D;

    fn add(self, rhs: IntVec3D) -> IntVec3D {
        self.zip_map(rhs, |a, b| a + b)
    }
}

impl Sub for IntVec3D {
    type Output = IntVec3D;

    fn sub(self, rhs: IntVec3D) -> IntVec3D {
        self.zip_map(rhs, |a, b| a - b)
    }
}

impl Mul for IntVec3D {
    type Output = IntVec3D;

    fn mul(self, rhs: IntVec3D) -> IntVec3D {
        self.zip_map(rhs, |a, b| a * b)
    }
}

impl Mul<i64> for IntVec3D {
    type Output = IntVec3D;

    fn mul(self, rhs: i64) -> IntVec3D {
        Self([self.0[0] * rhs, self.0[1] * rhs, self.0[2] * rhs])
    }
}

impl Mul<Vec3D> for IntVec3D {
    type Output = Vec3D;

    fn mul(self, rhs: Vec3D) -> Vec3D {
        self.to_f64() * rhs
    }
}

impl Neg for IntVec3D {
    type Output = IntVec3D;

    fn neg(self) -> IntVec3D {
        Self([-self.0[0], -self.0[1], -self.0[2]])
    }
}

impl fmt::Display for IntVec3D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.0[0], self.0[1], self.0[2])
    }
}
