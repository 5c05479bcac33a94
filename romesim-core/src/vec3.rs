use std::ops::{Add, Index, Mul, Sub};

/// A three-component real coordinate, used for pixel/cell position and size.
///
/// The engine works in a single continuous coordinate space (micrometers and
/// timestamps are both plain `f64`/`i64`); there is no separate integer
/// variant.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const ZERO: Vec3 = Vec3 { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn dot(&self, other: &Vec3) -> f64 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    pub fn cross(&self, other: &Vec3) -> Vec3 {
        Vec3::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    pub fn norm(&self) -> f64 {
        self.dot(self).sqrt()
    }

    pub fn is_zero(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.z == 0.0
    }

    /// True iff `self`'s component is strictly greater than `other`'s on
    /// every axis.
    pub fn all_gt(&self, other: &Vec3) -> bool {
        self.x > other.x && self.y > other.y && self.z > other.z
    }

    /// True iff `self`'s component is greater than or equal to `other`'s on
    /// every axis.
    pub fn all_ge(&self, other: &Vec3) -> bool {
        self.x >= other.x && self.y >= other.y && self.z >= other.z
    }

    pub fn componentwise_min(&self, other: &Vec3) -> Vec3 {
        Vec3::new(self.x.min(other.x), self.y.min(other.y), self.z.min(other.z))
    }

    pub fn componentwise_max(&self, other: &Vec3) -> Vec3 {
        Vec3::new(self.x.max(other.x), self.y.max(other.y), self.z.max(other.z))
    }
}

impl Index<usize> for Vec3 {
    type Output = f64;

    fn index(&self, axis: usize) -> &f64 {
        match axis {
            0 => &self.x,
            1 => &self.y,
            2 => &self.z,
            _ => panic!("Vec3 index out of range: {axis}"),
        }
    }
}

impl Add for Vec3 {
    type Output = Vec3;
    fn add(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Vec3;
    fn sub(self, rhs: Vec3) -> Vec3 {
        Vec3::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f64> for Vec3 {
    type Output = Vec3;
    fn mul(self, scalar: f64) -> Vec3 {
        Vec3::new(self.x * scalar, self.y * scalar, self.z * scalar)
    }
}

/// Product of the per-axis overlap of two axis-aligned boxes, each given as
/// (low, high) corners. Zero (not negative) when the boxes don't overlap on
/// some axis.
///
/// Called pervasively by the event generator to prune pixels whose bounding
/// box cannot possibly have received any charge from a track.
pub fn overlap_volume(a_lo: Vec3, a_hi: Vec3, b_lo: Vec3, b_hi: Vec3) -> f64 {
    (0..3)
        .map(|axis| (a_hi[axis].min(b_hi[axis]) - a_lo[axis].max(b_lo[axis])).max(0.0))
        .product()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn dot_and_cross() {
        let a = Vec3::new(1.0, 0.0, 0.0);
        let b = Vec3::new(0.0, 1.0, 0.0);
        assert_relative_eq!(a.dot(&b), 0.0);
        assert_eq!(a.cross(&b), Vec3::new(0.0, 0.0, 1.0));
    }

    #[test]
    fn norm_and_zero() {
        assert!(Vec3::ZERO.is_zero());
        assert_relative_eq!(Vec3::new(3.0, 4.0, 0.0).norm(), 5.0);
    }

    #[test]
    fn overlap_volume_full_containment() {
        let a_lo = Vec3::new(0.0, 0.0, 0.0);
        let a_hi = Vec3::new(10.0, 10.0, 10.0);
        let b_lo = Vec3::new(2.0, 2.0, 2.0);
        let b_hi = Vec3::new(4.0, 4.0, 4.0);
        assert_relative_eq!(overlap_volume(a_lo, a_hi, b_lo, b_hi), 8.0);
    }

    #[test]
    fn overlap_volume_disjoint_is_zero() {
        let a_lo = Vec3::new(0.0, 0.0, 0.0);
        let a_hi = Vec3::new(1.0, 1.0, 1.0);
        let b_lo = Vec3::new(5.0, 5.0, 5.0);
        let b_hi = Vec3::new(6.0, 6.0, 6.0);
        assert_relative_eq!(overlap_volume(a_lo, a_hi, b_lo, b_hi), 0.0);
    }

    #[test]
    fn overlap_volume_touching_is_zero() {
        let a_lo = Vec3::new(0.0, 0.0, 0.0);
        let a_hi = Vec3::new(1.0, 1.0, 1.0);
        let b_lo = Vec3::new(1.0, 0.0, 0.0);
        let b_hi = Vec3::new(2.0, 1.0, 1.0);
        assert_relative_eq!(overlap_volume(a_lo, a_hi, b_lo, b_hi), 0.0);
    }
}
