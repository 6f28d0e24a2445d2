//! Single-Precision Vector Mathematics
//!
//! Small, `Copy` linear-algebra types used by every stage of the solver.
//!
//! # Types
//!
//! - `Vec3`: 3D vector (positions, velocities, normals)
//! - `Quat`: unit quaternion for orientations
//! - `Mat3`: 3x3 row-major matrix for inertia tensors and factor matrices
//! - `Transform`: rigid transform (rotation followed by translation)
//!
//! # Tolerances
//!
//! - `SMALL_NUMBER` guards divisions and normalizations
//! - `KINDA_SMALL_NUMBER` is the tie tolerance for contact point selection

use core::ops::{Add, AddAssign, Div, Index, Mul, MulAssign, Neg, Sub, SubAssign};

/// Threshold below which lengths and denominators are treated as zero
pub const SMALL_NUMBER: f32 = 1e-8;

/// Looser tolerance for near-tied distances
pub const KINDA_SMALL_NUMBER: f32 = 1e-4;

// ============================================================================
// Vec3
// ============================================================================

/// 3D vector
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vec3 {
    /// X component
    pub x: f32,
    /// Y component
    pub y: f32,
    /// Z component
    pub z: f32,
}

impl Vec3 {
    /// Zero vector
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);
    /// All ones
    pub const ONE: Self = Self::new(1.0, 1.0, 1.0);
    /// Unit X
    pub const UNIT_X: Self = Self::new(1.0, 0.0, 0.0);
    /// Unit Y
    pub const UNIT_Y: Self = Self::new(0.0, 1.0, 0.0);
    /// Unit Z
    pub const UNIT_Z: Self = Self::new(0.0, 0.0, 1.0);

    /// Create a new vector
    #[inline]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Vector with all components set to `v`
    #[inline]
    pub const fn splat(v: f32) -> Self {
        Self::new(v, v, v)
    }

    /// Unit vector along `axis` (0, 1 or 2)
    #[inline]
    pub fn axis_vector(axis: usize) -> Self {
        match axis {
            0 => Self::UNIT_X,
            1 => Self::UNIT_Y,
            _ => Self::UNIT_Z,
        }
    }

    /// Dot product
    #[inline]
    pub fn dot(self, rhs: Self) -> f32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    /// Cross product
    #[inline]
    pub fn cross(self, rhs: Self) -> Self {
        Self::new(
            self.y * rhs.z - self.z * rhs.y,
            self.z * rhs.x - self.x * rhs.z,
            self.x * rhs.y - self.y * rhs.x,
        )
    }

    /// Squared length
    #[inline]
    pub fn length_squared(self) -> f32 {
        self.dot(self)
    }

    /// Length
    #[inline]
    pub fn length(self) -> f32 {
        self.length_squared().sqrt()
    }

    /// Unit vector in the same direction, or `None` when the length is below `SMALL_NUMBER`
    #[inline]
    pub fn try_normalize(self) -> Option<Self> {
        let len = self.length();
        if len > SMALL_NUMBER {
            Some(self / len)
        } else {
            None
        }
    }

    /// Unit vector, or `fallback` for degenerate input
    #[inline]
    pub fn normalize_or(self, fallback: Self) -> Self {
        self.try_normalize().unwrap_or(fallback)
    }

    /// Unit vector, or zero for degenerate input
    #[inline]
    pub fn safe_normal(self) -> Self {
        self.normalize_or(Self::ZERO)
    }

    /// Component-wise product
    #[inline]
    pub fn mul_elem(self, rhs: Self) -> Self {
        Self::new(self.x * rhs.x, self.y * rhs.y, self.z * rhs.z)
    }

    /// Component-wise minimum
    #[inline]
    pub fn min(self, rhs: Self) -> Self {
        Self::new(self.x.min(rhs.x), self.y.min(rhs.y), self.z.min(rhs.z))
    }

    /// Component-wise maximum
    #[inline]
    pub fn max(self, rhs: Self) -> Self {
        Self::new(self.x.max(rhs.x), self.y.max(rhs.y), self.z.max(rhs.z))
    }

    /// Component-wise absolute value
    #[inline]
    pub fn abs(self) -> Self {
        Self::new(self.x.abs(), self.y.abs(), self.z.abs())
    }

    /// Largest component
    #[inline]
    pub fn max_element(self) -> f32 {
        self.x.max(self.y).max(self.z)
    }

    /// Smallest component
    #[inline]
    pub fn min_element(self) -> f32 {
        self.x.min(self.y).min(self.z)
    }

    /// Index of the largest component (ties resolve to the lower axis)
    #[inline]
    pub fn max_axis(self) -> usize {
        if self.x >= self.y && self.x >= self.z {
            0
        } else if self.y >= self.z {
            1
        } else {
            2
        }
    }

    /// Index of the smallest component
    #[inline]
    pub fn min_axis(self) -> usize {
        if self.x <= self.y && self.x <= self.z {
            0
        } else if self.y <= self.z {
            1
        } else {
            2
        }
    }

    /// Copy with one component replaced
    #[inline]
    pub fn with_axis(mut self, axis: usize, value: f32) -> Self {
        match axis {
            0 => self.x = value,
            1 => self.y = value,
            _ => self.z = value,
        }
        self
    }

    /// Product of the three components
    #[inline]
    pub fn product(self) -> f32 {
        self.x * self.y * self.z
    }

    /// True when every component is finite
    #[inline]
    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Linear interpolation
    #[inline]
    pub fn lerp(self, rhs: Self, t: f32) -> Self {
        self + (rhs - self) * t
    }
}

impl Index<usize> for Vec3 {
    type Output = f32;

    #[inline]
    fn index(&self, axis: usize) -> &f32 {
        match axis {
            0 => &self.x,
            1 => &self.y,
            2 => &self.z,
            _ => panic!("Vec3 axis {axis} out of range"),
        }
    }
}

impl Add for Vec3 {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Self;
    #[inline]
    fn mul(self, s: f32) -> Self {
        Self::new(self.x * s, self.y * s, self.z * s)
    }
}

impl Mul<Vec3> for f32 {
    type Output = Vec3;
    #[inline]
    fn mul(self, v: Vec3) -> Vec3 {
        v * self
    }
}

impl Div<f32> for Vec3 {
    type Output = Self;
    #[inline]
    fn div(self, s: f32) -> Self {
        Self::new(self.x / s, self.y / s, self.z / s)
    }
}

impl Neg for Vec3 {
    type Output = Self;
    #[inline]
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

impl AddAssign for Vec3 {
    #[inline]
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl SubAssign for Vec3 {
    #[inline]
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl MulAssign<f32> for Vec3 {
    #[inline]
    fn mul_assign(&mut self, s: f32) {
        *self = *self * s;
    }
}

// ============================================================================
// Quat
// ============================================================================

/// Quaternion (w + xi + yj + zk)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Quat {
    /// Scalar part
    pub w: f32,
    /// i component
    pub x: f32,
    /// j component
    pub y: f32,
    /// k component
    pub z: f32,
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quat {
    /// Identity rotation
    pub const IDENTITY: Self = Self::new(1.0, 0.0, 0.0, 0.0);

    /// Create a new quaternion
    #[inline]
    pub const fn new(w: f32, x: f32, y: f32, z: f32) -> Self {
        Self { w, x, y, z }
    }

    /// Pure quaternion `(v, 0)`
    #[inline]
    pub fn from_vector_part(v: Vec3) -> Self {
        Self::new(0.0, v.x, v.y, v.z)
    }

    /// Vector part
    #[inline]
    pub fn vector_part(self) -> Vec3 {
        Vec3::new(self.x, self.y, self.z)
    }

    /// Rotation of `angle` radians around `axis` (axis need not be normalized)
    pub fn from_axis_angle(axis: Vec3, angle: f32) -> Self {
        let axis = axis.normalize_or(Vec3::UNIT_X);
        let (s, c) = (angle * 0.5).sin_cos();
        Self::new(c, axis.x * s, axis.y * s, axis.z * s)
    }

    /// Rotation whose axis is `v` and whose angle is `|v|`
    pub fn from_rotation_vector(v: Vec3) -> Self {
        let angle = v.length();
        if angle <= SMALL_NUMBER {
            return Self::IDENTITY;
        }
        Self::from_axis_angle(v / angle, angle)
    }

    /// Hamilton product `self * rhs` (apply `rhs` first)
    #[inline]
    pub fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        )
    }

    /// Conjugate (inverse for unit quaternions)
    #[inline]
    pub fn conjugate(self) -> Self {
        Self::new(self.w, -self.x, -self.y, -self.z)
    }

    /// 4D dot product
    #[inline]
    pub fn dot(self, rhs: Self) -> f32 {
        self.w * rhs.w + self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    /// Squared norm
    #[inline]
    pub fn length_squared(self) -> f32 {
        self.dot(self)
    }

    /// Normalize, falling back to identity for a zero quaternion
    #[inline]
    pub fn normalize(self) -> Self {
        let len = self.length_squared().sqrt();
        if len <= SMALL_NUMBER {
            return Self::IDENTITY;
        }
        let inv = 1.0 / len;
        Self::new(self.w * inv, self.x * inv, self.y * inv, self.z * inv)
    }

    /// Rotate a vector
    #[inline]
    pub fn rotate_vec(self, v: Vec3) -> Vec3 {
        let u = self.vector_part();
        let t = u.cross(v) * 2.0;
        v + t * self.w + u.cross(t)
    }

    /// Rotate a vector by the inverse rotation
    #[inline]
    pub fn unrotate_vec(self, v: Vec3) -> Vec3 {
        self.conjugate().rotate_vec(v)
    }

    /// Rotation matrix
    pub fn to_mat3(self) -> Mat3 {
        let (w, x, y, z) = (self.w, self.x, self.y, self.z);
        Mat3::from_rows(
            [1.0 - 2.0 * (y * y + z * z), 2.0 * (x * y - w * z), 2.0 * (x * z + w * y)],
            [2.0 * (x * y + w * z), 1.0 - 2.0 * (x * x + z * z), 2.0 * (y * z - w * x)],
            [2.0 * (x * z - w * y), 2.0 * (y * z + w * x), 1.0 - 2.0 * (x * x + y * y)],
        )
    }

    /// First-order integration `q + 0.5 * (w, 0) * q * dt`, renormalized
    #[inline]
    pub fn integrate(self, angular_velocity: Vec3, dt: f32) -> Self {
        let spin = Self::from_vector_part(angular_velocity).mul(self);
        Self::new(
            self.w + spin.w * 0.5 * dt,
            self.x + spin.x * 0.5 * dt,
            self.y + spin.y * 0.5 * dt,
            self.z + spin.z * 0.5 * dt,
        )
        .normalize()
    }

    /// Angular velocity that rotates `from` into `self` over `dt`
    ///
    /// Uses the shortest arc (the quaternion sign is flipped when needed).
    pub fn angular_velocity_from(self, from: Self, dt: f32) -> Vec3 {
        let mut delta = self.mul(from.conjugate());
        if delta.w < 0.0 {
            delta = Self::new(-delta.w, -delta.x, -delta.y, -delta.z);
        }
        let sin_half = delta.vector_part().length();
        if sin_half <= SMALL_NUMBER || dt <= 0.0 {
            return delta.vector_part() * (2.0 / dt.max(SMALL_NUMBER));
        }
        let angle = 2.0 * sin_half.atan2(delta.w);
        delta.vector_part() * (angle / (sin_half * dt))
    }
}

// ============================================================================
// Mat3
// ============================================================================

/// 3x3 matrix, row-major
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Mat3 {
    /// Rows
    pub m: [[f32; 3]; 3],
}

impl Default for Mat3 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Mat3 {
    /// Zero matrix
    pub const ZERO: Self = Self { m: [[0.0; 3]; 3] };
    /// Identity matrix
    pub const IDENTITY: Self = Self {
        m: [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]],
    };

    /// Build from rows
    #[inline]
    pub const fn from_rows(r0: [f32; 3], r1: [f32; 3], r2: [f32; 3]) -> Self {
        Self { m: [r0, r1, r2] }
    }

    /// Diagonal matrix
    #[inline]
    pub const fn diagonal(x: f32, y: f32, z: f32) -> Self {
        Self::from_rows([x, 0.0, 0.0], [0.0, y, 0.0], [0.0, 0.0, z])
    }

    /// Cross-product matrix: `skew(a) * b == a.cross(b)`
    #[inline]
    pub fn skew(v: Vec3) -> Self {
        Self::from_rows([0.0, -v.z, v.y], [v.z, 0.0, -v.x], [-v.y, v.x, 0.0])
    }

    /// Matrix-vector product
    #[inline]
    pub fn mul_vec(&self, v: Vec3) -> Vec3 {
        Vec3::new(
            self.m[0][0] * v.x + self.m[0][1] * v.y + self.m[0][2] * v.z,
            self.m[1][0] * v.x + self.m[1][1] * v.y + self.m[1][2] * v.z,
            self.m[2][0] * v.x + self.m[2][1] * v.y + self.m[2][2] * v.z,
        )
    }

    /// Transpose
    #[inline]
    pub fn transpose(&self) -> Self {
        let m = &self.m;
        Self::from_rows(
            [m[0][0], m[1][0], m[2][0]],
            [m[0][1], m[1][1], m[2][1]],
            [m[0][2], m[1][2], m[2][2]],
        )
    }

    /// Scale all entries
    #[inline]
    pub fn scale(&self, s: f32) -> Self {
        let mut out = *self;
        for row in &mut out.m {
            for v in row.iter_mut() {
                *v *= s;
            }
        }
        out
    }

    /// Add `s` to the diagonal
    #[inline]
    pub fn add_diagonal(&self, s: f32) -> Self {
        let mut out = *self;
        out.m[0][0] += s;
        out.m[1][1] += s;
        out.m[2][2] += s;
        out
    }

    /// Determinant
    #[inline]
    pub fn determinant(&self) -> f32 {
        let m = &self.m;
        m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
            - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
            + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
    }

    /// Inverse, or `None` if the matrix is singular
    pub fn inverse(&self) -> Option<Self> {
        let det = self.determinant();
        if det.abs() <= SMALL_NUMBER * SMALL_NUMBER || !det.is_finite() {
            return None;
        }
        let m = &self.m;
        let inv_det = 1.0 / det;
        Some(Self::from_rows(
            [
                (m[1][1] * m[2][2] - m[1][2] * m[2][1]) * inv_det,
                (m[0][2] * m[2][1] - m[0][1] * m[2][2]) * inv_det,
                (m[0][1] * m[1][2] - m[0][2] * m[1][1]) * inv_det,
            ],
            [
                (m[1][2] * m[2][0] - m[1][0] * m[2][2]) * inv_det,
                (m[0][0] * m[2][2] - m[0][2] * m[2][0]) * inv_det,
                (m[0][2] * m[1][0] - m[0][0] * m[1][2]) * inv_det,
            ],
            [
                (m[1][0] * m[2][1] - m[1][1] * m[2][0]) * inv_det,
                (m[0][1] * m[2][0] - m[0][0] * m[2][1]) * inv_det,
                (m[0][0] * m[1][1] - m[0][1] * m[1][0]) * inv_det,
            ],
        ))
    }

    /// Similarity transform `R * self * R^T` for the rotation `q`
    #[inline]
    pub fn rotated(&self, q: Quat) -> Self {
        let r = q.to_mat3();
        r * *self * r.transpose()
    }
}

impl Mul for Mat3 {
    type Output = Self;
    #[inline]
    fn mul(self, rhs: Self) -> Self {
        let mut out = Self::ZERO;
        for i in 0..3 {
            for j in 0..3 {
                out.m[i][j] = self.m[i][0] * rhs.m[0][j]
                    + self.m[i][1] * rhs.m[1][j]
                    + self.m[i][2] * rhs.m[2][j];
            }
        }
        out
    }
}

impl Add for Mat3 {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self {
        let mut out = self;
        for i in 0..3 {
            for j in 0..3 {
                out.m[i][j] += rhs.m[i][j];
            }
        }
        out
    }
}

impl Sub for Mat3 {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        self + rhs.scale(-1.0)
    }
}

// ============================================================================
// Transform
// ============================================================================

/// Rigid transform: `world = rotation * local + translation`
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Transform {
    /// Translation
    pub translation: Vec3,
    /// Rotation
    pub rotation: Quat,
}

impl Transform {
    /// Identity transform
    pub const IDENTITY: Self = Self {
        translation: Vec3::ZERO,
        rotation: Quat::IDENTITY,
    };

    /// Create a transform
    #[inline]
    pub const fn new(translation: Vec3, rotation: Quat) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    /// Pure translation
    #[inline]
    pub const fn from_translation(translation: Vec3) -> Self {
        Self::new(translation, Quat::IDENTITY)
    }

    /// Map a local point to world space
    #[inline]
    pub fn transform_point(&self, p: Vec3) -> Vec3 {
        self.rotation.rotate_vec(p) + self.translation
    }

    /// Map a local direction to world space
    #[inline]
    pub fn transform_vector(&self, v: Vec3) -> Vec3 {
        self.rotation.rotate_vec(v)
    }

    /// Map a world point to local space
    #[inline]
    pub fn inverse_transform_point(&self, p: Vec3) -> Vec3 {
        self.rotation.unrotate_vec(p - self.translation)
    }

    /// Map a world direction to local space
    #[inline]
    pub fn inverse_transform_vector(&self, v: Vec3) -> Vec3 {
        self.rotation.unrotate_vec(v)
    }

    /// Inverse transform
    #[inline]
    pub fn inverse(&self) -> Self {
        let rotation = self.rotation.conjugate();
        Self::new(rotation.rotate_vec(-self.translation), rotation)
    }

    /// Transform taking `self`'s local space into `other`'s local space
    #[inline]
    pub fn relative_to(&self, other: &Self) -> Self {
        other.inverse() * *self
    }
}

impl Mul for Transform {
    type Output = Self;

    /// `(a * b).transform_point(p) == a.transform_point(b.transform_point(p))`
    #[inline]
    fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.transform_point(rhs.translation),
            self.rotation.mul(rhs.rotation).normalize(),
        )
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Vec3, b: Vec3, eps: f32) -> bool {
        (a - b).length() <= eps
    }

    #[test]
    fn test_vec3_cross_dot() {
        let c = Vec3::UNIT_X.cross(Vec3::UNIT_Y);
        assert_eq!(c, Vec3::UNIT_Z, "x cross y should be z");
        assert_eq!(c.dot(Vec3::UNIT_X), 0.0);
    }

    #[test]
    fn test_try_normalize_degenerate() {
        assert!(Vec3::ZERO.try_normalize().is_none());
        assert_eq!(Vec3::ZERO.normalize_or(Vec3::UNIT_X), Vec3::UNIT_X);
    }

    #[test]
    fn test_quat_rotate_matches_matrix() {
        let q = Quat::from_axis_angle(Vec3::new(1.0, 2.0, 3.0), 0.7);
        let v = Vec3::new(0.3, -1.2, 2.5);
        let by_quat = q.rotate_vec(v);
        let by_mat = q.to_mat3().mul_vec(v);
        assert!(approx(by_quat, by_mat, 1e-5), "{by_quat:?} vs {by_mat:?}");
        assert!(approx(q.unrotate_vec(by_quat), v, 1e-5));
    }

    #[test]
    fn test_mat3_inverse() {
        let m = Mat3::from_rows([2.0, 1.0, 0.0], [1.0, 3.0, 1.0], [0.0, 1.0, 4.0]);
        let inv = m.inverse().expect("matrix is invertible");
        let id = m * inv;
        for i in 0..3 {
            for j in 0..3 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert!((id.m[i][j] - expected).abs() < 1e-5);
            }
        }
        assert!(Mat3::ZERO.inverse().is_none(), "zero matrix is singular");
    }

    #[test]
    fn test_skew_is_cross() {
        let a = Vec3::new(1.0, -2.0, 0.5);
        let b = Vec3::new(0.25, 4.0, -3.0);
        assert!(approx(Mat3::skew(a).mul_vec(b), a.cross(b), 1e-6));
    }

    #[test]
    fn test_transform_roundtrip_and_compose() {
        let a = Transform::new(
            Vec3::new(1.0, 2.0, 3.0),
            Quat::from_axis_angle(Vec3::UNIT_Z, 0.5),
        );
        let b = Transform::new(
            Vec3::new(-2.0, 0.5, 0.0),
            Quat::from_axis_angle(Vec3::UNIT_X, -1.1),
        );
        let p = Vec3::new(0.4, 0.2, -0.7);
        assert!(approx(a.inverse_transform_point(a.transform_point(p)), p, 1e-5));
        assert!(approx(
            (a * b).transform_point(p),
            a.transform_point(b.transform_point(p)),
            1e-5
        ));
        assert!(approx(
            b.relative_to(&a).transform_point(p),
            a.inverse_transform_point(b.transform_point(p)),
            1e-5
        ));
    }

    #[test]
    fn test_angular_velocity_roundtrip() {
        let q0 = Quat::from_axis_angle(Vec3::UNIT_Y, 0.3);
        let w = Vec3::new(0.0, 0.0, 2.0);
        let dt = 1.0 / 60.0;
        let q1 = Quat::from_rotation_vector(w * dt).mul(q0);
        let recovered = q1.angular_velocity_from(q0, dt);
        assert!(approx(recovered, w, 1e-3), "recovered {recovered:?}");
    }
}
