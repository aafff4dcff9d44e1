//! Hamilton quaternion for attitude
//!
//! A unit quaternion `q` maps body-frame vectors to the reference frame:
//! `q.rotate_vector(v_body) == v_reference`.

use std::ops::{Add, Mul, Neg, Sub};

use nalgebra::UnitQuaternion;

use crate::types::linalg::{Matrix3, Vector3, Vector4};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Quaternion {
    w: f64,
    v: Vector3,
}

impl Quaternion {
    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self {
            w,
            v: Vector3::new(x, y, z),
        }
    }

    pub fn from_parts(w: f64, v: Vector3) -> Self {
        Self { w, v }
    }

    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    /// Components in (w, x, y, z) order
    pub fn from_vector4(v: &Vector4) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }

    pub fn to_vector4(&self) -> Vector4 {
        Vector4::new(self.w, self.v[0], self.v[1], self.v[2])
    }

    pub fn w(&self) -> f64 {
        self.w
    }

    pub fn x(&self) -> f64 {
        self.v[0]
    }

    pub fn y(&self) -> f64 {
        self.v[1]
    }

    pub fn z(&self) -> f64 {
        self.v[2]
    }

    pub fn vec(&self) -> &Vector3 {
        &self.v
    }

    pub fn conjugate(&self) -> Self {
        Self::from_parts(self.w, -self.v)
    }

    pub fn norm_squared(&self) -> f64 {
        self.w * self.w + self.v.norm_squared()
    }

    pub fn norm(&self) -> f64 {
        self.norm_squared().sqrt()
    }

    pub fn dot(&self, other: &Quaternion) -> f64 {
        self.w * other.w + self.v.dot(&other.v)
    }

    /// Unit quaternion in the same direction. The norm must be non-zero.
    pub fn normalized(&self) -> Self {
        let norm = self.norm();
        debug_assert!(norm > 0.0, "normalizing a zero quaternion");
        Self::from_parts(self.w / norm, self.v / norm)
    }

    pub fn try_normalized(&self) -> Option<Self> {
        let norm = self.norm();
        if norm.is_finite() && norm > f64::MIN_POSITIVE {
            Some(Self::from_parts(self.w / norm, self.v / norm))
        } else {
            None
        }
    }

    /// `q v q*` for a unit quaternion
    pub fn rotate_vector(&self, v: &Vector3) -> Vector3 {
        let t = 2.0 * self.v.cross(v);
        v + self.w * t + self.v.cross(&t)
    }

    /// Rotation matrix of a unit quaternion
    pub fn to_rotation_matrix(&self) -> Matrix3 {
        let (w, x, y, z) = (self.w, self.v[0], self.v[1], self.v[2]);

        let xx = x * x;
        let yy = y * y;
        let zz = z * z;
        let xy = x * y;
        let xz = x * z;
        let yz = y * z;
        let wx = w * x;
        let wy = w * y;
        let wz = w * z;

        Matrix3::new(
            1.0 - 2.0 * (yy + zz),
            2.0 * (xy - wz),
            2.0 * (xz + wy),
            2.0 * (xy + wz),
            1.0 - 2.0 * (xx + zz),
            2.0 * (yz - wx),
            2.0 * (xz - wy),
            2.0 * (yz + wx),
            1.0 - 2.0 * (xx + yy),
        )
    }

    /// Unit quaternion of a rotation matrix.
    ///
    /// The component computed from a square root is the one with the largest
    /// magnitude (trace or a diagonal term), the others are divided by it.
    pub fn from_rotation_matrix(m: &Matrix3) -> Self {
        let trace = m.trace();

        let q = if trace >= m[(0, 0)] && trace >= m[(1, 1)] && trace >= m[(2, 2)] {
            let s = 2.0 * (1.0 + trace).sqrt(); // 4w
            Self::new(
                0.25 * s,
                (m[(2, 1)] - m[(1, 2)]) / s,
                (m[(0, 2)] - m[(2, 0)]) / s,
                (m[(1, 0)] - m[(0, 1)]) / s,
            )
        } else if m[(0, 0)] >= m[(1, 1)] && m[(0, 0)] >= m[(2, 2)] {
            let s = 2.0 * (1.0 + m[(0, 0)] - m[(1, 1)] - m[(2, 2)]).sqrt(); // 4x
            Self::new(
                (m[(2, 1)] - m[(1, 2)]) / s,
                0.25 * s,
                (m[(0, 1)] + m[(1, 0)]) / s,
                (m[(0, 2)] + m[(2, 0)]) / s,
            )
        } else if m[(1, 1)] >= m[(2, 2)] {
            let s = 2.0 * (1.0 + m[(1, 1)] - m[(0, 0)] - m[(2, 2)]).sqrt(); // 4y
            Self::new(
                (m[(0, 2)] - m[(2, 0)]) / s,
                (m[(0, 1)] + m[(1, 0)]) / s,
                0.25 * s,
                (m[(1, 2)] + m[(2, 1)]) / s,
            )
        } else {
            let s = 2.0 * (1.0 + m[(2, 2)] - m[(0, 0)] - m[(1, 1)]).sqrt(); // 4z
            Self::new(
                (m[(1, 0)] - m[(0, 1)]) / s,
                (m[(0, 2)] + m[(2, 0)]) / s,
                (m[(1, 2)] + m[(2, 1)]) / s,
                0.25 * s,
            )
        };

        q.normalized()
    }

    /// Rotation by `|v|` radians about `v`
    pub fn from_rotation_vector(v: &Vector3) -> Self {
        let angle = v.norm();
        if angle < 1e-12 {
            return Self::from_parts(1.0, 0.5 * v).normalized();
        }
        let half = 0.5 * angle;
        Self::from_parts(half.cos(), v * (half.sin() / angle))
    }

    pub fn to_unit_quaternion(&self) -> UnitQuaternion<f64> {
        UnitQuaternion::from_quaternion(nalgebra::Quaternion::new(
            self.w, self.v[0], self.v[1], self.v[2],
        ))
    }

    pub fn from_unit_quaternion(q: &UnitQuaternion<f64>) -> Self {
        Self::new(q.w, q.i, q.j, q.k)
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

impl Mul for Quaternion {
    type Output = Quaternion;

    /// Hamilton product
    fn mul(self, b: Quaternion) -> Quaternion {
        let (aw, ax, ay, az) = (self.w, self.v[0], self.v[1], self.v[2]);
        let (bw, bx, by, bz) = (b.w, b.v[0], b.v[1], b.v[2]);

        Quaternion::new(
            aw * bw - ax * bx - ay * by - az * bz,
            aw * bx + ax * bw + ay * bz - az * by,
            aw * by - ax * bz + ay * bw + az * bx,
            aw * bz + ax * by - ay * bx + az * bw,
        )
    }
}

impl Mul<f64> for Quaternion {
    type Output = Quaternion;

    fn mul(self, s: f64) -> Quaternion {
        Quaternion::from_parts(self.w * s, self.v * s)
    }
}

impl Add for Quaternion {
    type Output = Quaternion;

    fn add(self, b: Quaternion) -> Quaternion {
        Quaternion::from_parts(self.w + b.w, self.v + b.v)
    }
}

impl Sub for Quaternion {
    type Output = Quaternion;

    fn sub(self, b: Quaternion) -> Quaternion {
        Quaternion::from_parts(self.w - b.w, self.v - b.v)
    }
}

impl Neg for Quaternion {
    type Output = Quaternion;

    fn neg(self) -> Quaternion {
        Quaternion::from_parts(-self.w, -self.v)
    }
}

/// Small rotation from a half-angle error vector
pub fn delta_quaternion(v: &Vector3) -> Quaternion {
    let n2 = v.norm_squared();
    if n2 <= 1.0 {
        Quaternion::from_parts((1.0 - n2).sqrt(), *v)
    } else {
        Quaternion::from_parts(1.0, *v) * (1.0 / (1.0 + n2).sqrt())
    }
}

/// Propagates `q` over `dt` with body rates `w0` at the start and `w1`
/// at the end of the interval (rates linear in between).
pub fn integrate_first_order(q: &Quaternion, w0: &Vector3, w1: &Vector3, dt: f64) -> Quaternion {
    let mean = 0.5 * (w0 + w1);
    let delta = Quaternion::from_rotation_vector(&(mean * dt))
        + Quaternion::from_parts(0.0, w0.cross(w1) * (dt * dt / 24.0));
    (*q * delta).normalized()
}

/// Vector in the body frame for a vector given in the reference frame
pub fn global_to_local(q: &Quaternion, global: &Vector3) -> Vector3 {
    q.conjugate().rotate_vector(global)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use std::f64::consts::{FRAC_PI_2, PI};

    fn sample_quaternions() -> Vec<Quaternion> {
        vec![
            Quaternion::identity(),
            Quaternion::new(0.2, -0.5, 0.7, 0.1).normalized(),
            Quaternion::new(0.01, 0.99, 0.05, -0.1).normalized(),
            Quaternion::new(0.0, 0.1, -1.0, 0.2).normalized(),
            Quaternion::new(-0.02, 0.03, 0.1, 0.98).normalized(),
            Quaternion::from_rotation_vector(&Vector3::new(PI, 0.0, 0.0)),
        ]
    }

    fn assert_same_rotation(a: &Quaternion, b: &Quaternion) {
        let d = a.dot(b).abs();
        assert_relative_eq!(d, 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_hamilton_product() {
        let i = Quaternion::new(0.0, 1.0, 0.0, 0.0);
        let j = Quaternion::new(0.0, 0.0, 1.0, 0.0);
        let k = Quaternion::new(0.0, 0.0, 0.0, 1.0);
        assert_eq!(i * j, k);
        assert_eq!(j * i, -k);
        assert_eq!(i * i, Quaternion::new(-1.0, 0.0, 0.0, 0.0));

        let a = Quaternion::new(1.0, 2.0, 3.0, 4.0);
        let b = Quaternion::new(-0.5, 0.25, 2.0, -1.0);
        let expected = a.to_unit_quaternion().into_inner() * b.to_unit_quaternion().into_inner();
        let product = (a.normalized() * b.normalized()).to_vector4();
        assert_relative_eq!(product[0], expected.w, epsilon = 1e-12);
        assert_relative_eq!(product[1], expected.i, epsilon = 1e-12);
        assert_relative_eq!(product[2], expected.j, epsilon = 1e-12);
        assert_relative_eq!(product[3], expected.k, epsilon = 1e-12);
    }

    #[test]
    fn test_rotation_matrix_round_trip() {
        for q in sample_quaternions() {
            let m = q.to_rotation_matrix();
            assert_relative_eq!(m * m.transpose(), Matrix3::identity(), epsilon = 1e-12);
            assert_relative_eq!(m.determinant(), 1.0, epsilon = 1e-12);

            let back = Quaternion::from_rotation_matrix(&m);
            assert_same_rotation(&q, &back);
        }
    }

    #[test]
    fn test_rotate_vector_matches_matrix() {
        let v = Vector3::new(0.3, -1.2, 2.5);
        for q in sample_quaternions() {
            let by_matrix = q.to_rotation_matrix() * v;
            assert_relative_eq!(q.rotate_vector(&v), by_matrix, epsilon = 1e-12);
            assert_relative_eq!(q.to_unit_quaternion() * v, by_matrix, epsilon = 1e-12);
            assert_relative_eq!(global_to_local(&q, &by_matrix), v, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_rotation_about_z() {
        let q = Quaternion::from_rotation_vector(&Vector3::new(0.0, 0.0, FRAC_PI_2));
        let v = q.rotate_vector(&Vector3::x());
        assert_relative_eq!(v, Vector3::y(), epsilon = 1e-12);
    }

    #[test]
    fn test_delta_quaternion() {
        let small = delta_quaternion(&Vector3::new(0.01, -0.02, 0.005));
        assert_relative_eq!(small.norm(), 1.0, epsilon = 1e-12);

        let large = delta_quaternion(&Vector3::new(2.0, 0.0, 0.0));
        assert_relative_eq!(large.norm(), 1.0, epsilon = 1e-12);
        assert!(large.w() > 0.0);
    }

    #[test]
    fn test_integrate_constant_rate() {
        let w = Vector3::new(0.0, 0.0, 0.5);
        let mut q = Quaternion::identity();
        for _ in 0..100 {
            q = integrate_first_order(&q, &w, &w, 0.01);
        }
        let expected = Quaternion::from_rotation_vector(&Vector3::new(0.0, 0.0, 0.5));
        assert_same_rotation(&q, &expected);
        assert_relative_eq!(q.norm(), 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_try_normalized_zero() {
        assert!(Quaternion::new(0.0, 0.0, 0.0, 0.0).try_normalized().is_none());
        assert!(Quaternion::new(2.0, 0.0, 0.0, 0.0).try_normalized().is_some());
    }
}
