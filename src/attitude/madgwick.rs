//! Madgwick gradient-descent attitude filter
//!
//! Gyro integration corrected by one normalized gradient step per sample
//! towards the attitude that explains the measured gravity direction
//! (and magnetic field for `update_marg`).

use log::debug;

use crate::attitude::quaternion::Quaternion;
use crate::error::{check_non_negative, FilterResult};
use crate::types::linalg::{check_vector, Vector3, Vector4, Vector6};

use nalgebra::{SMatrix, Vector2};

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Madgwick {
    q: Quaternion,
}

impl Default for Madgwick {
    fn default() -> Self {
        Self::new()
    }
}

impl Madgwick {
    pub fn new() -> Self {
        Self::with_attitude(Quaternion::identity())
    }

    pub fn with_attitude(q: Quaternion) -> Self {
        Self { q: q.normalized() }
    }

    pub fn attitude(&self) -> Quaternion {
        self.q
    }

    /// Gyro and accelerometer update.
    ///
    /// Accelerations with norm below `min_acceleration` [m/s²] are not a
    /// usable gravity reference; the step is then gyro integration only.
    pub fn update(
        &mut self,
        gyro: &Vector3,
        accel: &Vector3,
        beta: f64,
        dt: f64,
        min_acceleration: f64,
    ) -> FilterResult<Quaternion> {
        check_arguments(gyro, accel, beta, dt, min_acceleration)?;

        let Some(accel) = usable_acceleration(accel, min_acceleration) else {
            return Ok(self.update_gyro(gyro, dt));
        };

        let q = &self.q;
        let (w, x, y, z) = (q.w(), q.x(), q.y(), q.z());

        let f = Vector3::new(
            2.0 * (x * z - w * y) - accel.x,
            2.0 * (w * x + y * z) - accel.y,
            2.0 * (0.5 - x * x - y * y) - accel.z,
        );

        #[rustfmt::skip]
        let j_t = SMatrix::<f64, 4, 3>::new(
            -2.0 * y, 2.0 * x, 0.0,
            2.0 * z, 2.0 * w, -4.0 * x,
            -2.0 * w, 2.0 * z, -4.0 * y,
            2.0 * x, 2.0 * y, 0.0,
        );

        Ok(self.correct(gyro, &(j_t * f), beta, dt))
    }

    /// Gyro, accelerometer and magnetometer update. A zero magnetic field
    /// falls back to [`Madgwick::update`].
    pub fn update_marg(
        &mut self,
        gyro: &Vector3,
        accel: &Vector3,
        mag: &Vector3,
        beta: f64,
        dt: f64,
        min_acceleration: f64,
    ) -> FilterResult<Quaternion> {
        check_arguments(gyro, accel, beta, dt, min_acceleration)?;
        check_vector("magnetometer", mag)?;

        let Some(accel) = usable_acceleration(accel, min_acceleration) else {
            return Ok(self.update_gyro(gyro, dt));
        };
        let Some(mag) = mag.try_normalize(f64::EPSILON) else {
            return self.update(gyro, &accel, beta, dt, 0.0);
        };

        let q = &self.q;
        let (w, x, y, z) = (q.w(), q.x(), q.y(), q.z());

        // reference field in the x-z plane
        let h = q.rotate_vector(&mag);
        let bx = Vector2::new(h.x, h.y).norm();
        let bz = h.z;

        let f = Vector6::new(
            2.0 * (x * z - w * y) - accel.x,
            2.0 * (w * x + y * z) - accel.y,
            2.0 * (0.5 - x * x - y * y) - accel.z,
            2.0 * bx * (0.5 - y * y - z * z) + 2.0 * bz * (x * z - w * y) - mag.x,
            2.0 * bx * (x * y - w * z) + 2.0 * bz * (w * x + y * z) - mag.y,
            2.0 * bx * (w * y + x * z) + 2.0 * bz * (0.5 - x * x - y * y) - mag.z,
        );

        #[rustfmt::skip]
        let j_t = SMatrix::<f64, 4, 6>::new(
            -2.0 * y, 2.0 * x, 0.0,
            -2.0 * bz * y, -2.0 * bx * z + 2.0 * bz * x, 2.0 * bx * y,
            2.0 * z, 2.0 * w, -4.0 * x,
            2.0 * bz * z, 2.0 * bx * y + 2.0 * bz * w, 2.0 * bx * z - 4.0 * bz * x,
            -2.0 * w, 2.0 * z, -4.0 * y,
            -4.0 * bx * y - 2.0 * bz * w, 2.0 * bx * x + 2.0 * bz * z, 2.0 * bx * w - 4.0 * bz * y,
            2.0 * x, 2.0 * y, 0.0,
            -4.0 * bx * z + 2.0 * bz * x, -2.0 * bx * w + 2.0 * bz * y, 2.0 * bx * x,
        );

        Ok(self.correct(gyro, &(j_t * f), beta, dt))
    }

    fn rate_of_change(&self, gyro: &Vector3) -> Quaternion {
        self.q * Quaternion::from_parts(0.0, *gyro) * 0.5
    }

    fn update_gyro(&mut self, gyro: &Vector3, dt: f64) -> Quaternion {
        let q_dot = self.rate_of_change(gyro);
        self.integrate(q_dot, dt)
    }

    fn correct(&mut self, gyro: &Vector3, gradient: &Vector4, beta: f64, dt: f64) -> Quaternion {
        let Some(step) = gradient.try_normalize(f64::EPSILON) else {
            return self.update_gyro(gyro, dt);
        };
        let q_dot = self.rate_of_change(gyro) - Quaternion::from_vector4(&step) * beta;
        self.integrate(q_dot, dt)
    }

    fn integrate(&mut self, q_dot: Quaternion, dt: f64) -> Quaternion {
        if let Some(q) = (self.q + q_dot * dt).try_normalized() {
            self.q = q;
        }
        self.q
    }
}

fn check_arguments(
    gyro: &Vector3,
    accel: &Vector3,
    beta: f64,
    dt: f64,
    min_acceleration: f64,
) -> FilterResult<()> {
    check_vector("gyroscope", gyro)?;
    check_vector("accelerometer", accel)?;
    check_non_negative("beta", beta)?;
    check_non_negative("dt", dt)?;
    check_non_negative("minimum acceleration", min_acceleration)
}

fn usable_acceleration(accel: &Vector3, min_acceleration: f64) -> Option<Vector3> {
    let norm = accel.norm();
    if norm < min_acceleration || norm <= f64::EPSILON {
        debug!("acceleration {norm} below {min_acceleration}, gyro integration only");
        return None;
    }
    Some(accel / norm)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FilterError;
    use approx::assert_relative_eq;

    const G: f64 = 9.81;

    fn rotation_angle(a: &Quaternion, b: &Quaternion) -> f64 {
        2.0 * a.dot(b).abs().min(1.0).acos()
    }

    #[test]
    fn test_stationary_level() {
        let mut filter = Madgwick::new();
        for _ in 0..100 {
            filter
                .update(&Vector3::zeros(), &Vector3::new(0.0, 0.0, G), 0.1, 0.01, 1.0)
                .unwrap();
        }
        assert!(rotation_angle(&filter.attitude(), &Quaternion::identity()) < 1e-9);
    }

    #[test]
    fn test_converges_to_level() {
        let tilted = Quaternion::from_rotation_vector(&Vector3::new(0.5, 0.0, 0.0));
        let mut filter = Madgwick::with_attitude(tilted);
        for _ in 0..1000 {
            filter
                .update(&Vector3::zeros(), &Vector3::new(0.0, 0.0, G), 0.1, 0.01, 1.0)
                .unwrap();
        }
        assert!(rotation_angle(&filter.attitude(), &Quaternion::identity()) < 0.02);
    }

    #[test]
    fn test_marg_converges_in_yaw() {
        let rotated = Quaternion::from_rotation_vector(&Vector3::new(0.0, 0.0, 0.5));
        let mut filter = Madgwick::with_attitude(rotated);
        let mag = Vector3::new(20.0, 0.0, -40.0);
        for _ in 0..2000 {
            filter
                .update_marg(&Vector3::zeros(), &Vector3::new(0.0, 0.0, G), &mag, 0.1, 0.01, 1.0)
                .unwrap();
        }
        assert!(rotation_angle(&filter.attitude(), &Quaternion::identity()) < 0.02);
    }

    #[test]
    fn test_low_acceleration_uses_gyro_only() {
        let gyro = Vector3::new(0.0, 0.0, 1.0);
        let mut filter = Madgwick::new();
        let q = filter
            .update(&gyro, &Vector3::new(0.0, 0.3, 0.1), 0.5, 0.01, 1.0)
            .unwrap();

        let mut gyro_only = Madgwick::new();
        let expected = gyro_only.update_gyro(&gyro, 0.01);
        assert_eq!(q, expected);
        assert_relative_eq!(q.z(), 0.005, epsilon = 1e-6);
    }

    #[test]
    fn test_zero_vectors_stay_finite() {
        let mut filter = Madgwick::new();
        let q = filter
            .update(&Vector3::zeros(), &Vector3::zeros(), 0.1, 0.01, 0.0)
            .unwrap();
        assert_eq!(q, Quaternion::identity());

        let q = filter
            .update_marg(
                &Vector3::zeros(),
                &Vector3::new(0.0, 0.0, G),
                &Vector3::zeros(),
                0.1,
                0.01,
                1.0,
            )
            .unwrap();
        assert!(q.to_vector4().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_invalid_arguments() {
        let mut filter = Madgwick::new();
        let accel = Vector3::new(0.0, 0.0, G);
        assert!(matches!(
            filter.update(&Vector3::zeros(), &accel, -0.1, 0.01, 1.0),
            Err(FilterError::InvalidArgument(_))
        ));
        assert!(filter.update(&Vector3::zeros(), &accel, 0.1, f64::NAN, 1.0).is_err());
        assert!(filter
            .update(&Vector3::new(f64::INFINITY, 0.0, 0.0), &accel, 0.1, 0.01, 1.0)
            .is_err());
    }
}
