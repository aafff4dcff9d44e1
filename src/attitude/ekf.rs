//! Error-state EKF for attitude with gyroscope bias (MARG)
//!
//! Error State (6D):
//! [0-2]: attitude error, small body-frame rotation [rad]
//! [3-5]: gyroscope bias error [rad/s]
//!
//! The full attitude is kept as a quaternion outside the error state and
//! corrected after every update. Accelerometer and magnetometer enter as
//! unit-vector directions compared against their reference-frame values.

use log::{debug, warn};
use nalgebra::{SMatrix, SVector};

use crate::attitude::cross_matrix::{cross_matrix, cross_matrix_power};
use crate::attitude::determination::triad;
use crate::attitude::quaternion::{delta_quaternion, global_to_local, integrate_first_order, Quaternion};
use crate::error::{check_non_negative, check_positive, FilterError, FilterResult};
use crate::types::linalg::{check_vector, inverse, symmetrize, Matrix3, Matrix6, Vector3, Vector6};

/// Samples averaged before the first attitude
const INIT_COUNT: usize = 10;

/// Accepted accelerometer norm [m/s²]
const MIN_ACCELERATION: f64 = 9.0;
const MAX_ACCELERATION: f64 = 10.6;

/// Accepted magnetic field norm [μT]
const MIN_MAGNETIC_FIELD: f64 = 20.0;
const MAX_MAGNETIC_FIELD: f64 = 80.0;

/// Minimum angle sine between the magnetic field and vertical
const MIN_SIN_Z_MAG: f64 = 0.1;

const INIT_VARIANCE_ATTITUDE: f64 = 1e-2;
const INIT_VARIANCE_BIAS: f64 = 1e-4;

const SMALL_ANGLE: f64 = 1e-6;

/// One direction measurement for the update
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DirectionUpdate {
    /// Measured direction in the body frame
    pub measurement: Vector3,
    /// Same direction in the reference frame
    pub reference: Vector3,
    /// Variance per direction component [rad²]
    pub variance: f64,
}

#[derive(Clone, Debug)]
pub struct AttitudeEkf {
    q: Option<Quaternion>,

    /// Gyro bias estimate [rad/s]
    bias: Vector3,

    /// Error state covariance [6x6]
    p: Matrix6,

    /// Normalized magnetic field in the reference frame
    mag_reference: Vector3,

    acc_data: Vector3,
    mag_data: Vector3,
    init_count: usize,

    /// Update counters
    gyro_updates: u64,
    acc_updates: u64,
    mag_updates: u64,
}

impl Default for AttitudeEkf {
    fn default() -> Self {
        Self::new()
    }
}

impl AttitudeEkf {
    pub fn new() -> Self {
        Self {
            q: None,
            bias: Vector3::zeros(),
            p: Self::default_covariance(),
            mag_reference: Vector3::zeros(),
            acc_data: Vector3::zeros(),
            mag_data: Vector3::zeros(),
            init_count: 0,
            gyro_updates: 0,
            acc_updates: 0,
            mag_updates: 0,
        }
    }

    fn default_covariance() -> Matrix6 {
        Matrix6::from_diagonal(&Vector6::new(
            INIT_VARIANCE_ATTITUDE,
            INIT_VARIANCE_ATTITUDE,
            INIT_VARIANCE_ATTITUDE,
            INIT_VARIANCE_BIAS,
            INIT_VARIANCE_BIAS,
            INIT_VARIANCE_BIAS,
        ))
    }

    /// Attitude mapping body vectors to the reference frame
    pub fn attitude(&self) -> Option<Quaternion> {
        self.q
    }

    pub fn bias(&self) -> Vector3 {
        self.bias
    }

    pub fn covariance(&self) -> &Matrix6 {
        &self.p
    }

    pub fn update_counts(&self) -> (u64, u64, u64) {
        (self.gyro_updates, self.acc_updates, self.mag_updates)
    }

    /// Predict with gyro rates `w0` and `w1` at the start and end of `dt`.
    ///
    /// `variance_r` is the rate noise [rad²/s], `variance_w` the bias
    /// random walk [rad²/s³]. Ignored before initialization.
    pub fn update_gyro(
        &mut self,
        w0: &Vector3,
        w1: &Vector3,
        variance_r: f64,
        variance_w: f64,
        dt: f64,
    ) -> FilterResult<()> {
        check_vector("gyroscope", w0)?;
        check_vector("gyroscope", w1)?;
        check_non_negative("rate variance", variance_r)?;
        check_non_negative("bias variance", variance_w)?;
        check_non_negative("dt", dt)?;

        let Some(q) = self.q else {
            return Ok(());
        };

        let wb0 = w0 - self.bias;
        let wb1 = w1 - self.bias;

        self.q = Some(integrate_first_order(&q, &wb0, &wb1, dt));

        let phi = state_transition_matrix(&wb1, dt);
        let noise = noise_covariance_matrix(variance_r, variance_w, dt);
        self.p = symmetrize(&(phi * self.p * phi.transpose() + noise));

        self.gyro_updates += 1;
        Ok(())
    }

    /// Accelerometer direction update. `Ok(false)` when not initialized
    /// or the acceleration is far from gravity.
    pub fn update_acc(&mut self, a: &Vector3, variance: f64) -> FilterResult<bool> {
        check_vector("accelerometer", a)?;
        check_positive("accelerometer variance", variance)?;

        if self.q.is_none() || !acc_suitable(a.norm()) {
            return Ok(false);
        }
        self.update::<1, 3>([self.acc_direction(a, variance)])?;
        self.acc_updates += 1;
        Ok(true)
    }

    /// Magnetometer direction update. `Ok(false)` when not initialized
    /// or the field is unusable.
    pub fn update_mag(&mut self, m: &Vector3, variance: f64) -> FilterResult<bool> {
        check_vector("magnetometer", m)?;
        check_positive("magnetometer variance", variance)?;

        let Some(q) = self.q else {
            return Ok(false);
        };
        if !mag_suitable(&q.rotate_vector(m)) {
            return Ok(false);
        }
        self.update::<1, 3>([self.mag_direction(m, variance)])?;
        self.mag_updates += 1;
        Ok(true)
    }

    /// Stacked accelerometer and magnetometer update. Before the first
    /// attitude the samples are averaged for initialization.
    pub fn update_acc_mag(
        &mut self,
        a: &Vector3,
        m: &Vector3,
        a_variance: f64,
        m_variance: f64,
    ) -> FilterResult<bool> {
        check_vector("accelerometer", a)?;
        check_vector("magnetometer", m)?;
        check_positive("accelerometer variance", a_variance)?;
        check_positive("magnetometer variance", m_variance)?;

        let Some(q) = self.q else {
            self.init(a, m);
            return Ok(false);
        };

        let use_acc = acc_suitable(a.norm());
        let use_mag = mag_suitable(&q.rotate_vector(m));

        match (use_acc, use_mag) {
            (true, true) => {
                let data = [self.acc_direction(a, a_variance), self.mag_direction(m, m_variance)];
                self.update::<2, 6>(data)?;
                self.acc_updates += 1;
                self.mag_updates += 1;
            }
            (true, false) => {
                self.update::<1, 3>([self.acc_direction(a, a_variance)])?;
                self.acc_updates += 1;
            }
            (false, true) => {
                self.update::<1, 3>([self.mag_direction(m, m_variance)])?;
                self.mag_updates += 1;
            }
            (false, false) => {
                warn!("accelerometer {} and magnetometer {} not usable", a.norm(), m.norm());
                return Ok(false);
            }
        }
        Ok(true)
    }

    fn reset_init(&mut self) {
        self.acc_data = Vector3::zeros();
        self.mag_data = Vector3::zeros();
        self.init_count = 0;
    }

    fn init(&mut self, a: &Vector3, m: &Vector3) {
        let m_norm = m.norm();
        if !acc_suitable(a.norm()) || !(MIN_MAGNETIC_FIELD..=MAX_MAGNETIC_FIELD).contains(&m_norm) {
            return;
        }

        self.acc_data += a;
        self.mag_data += m;
        self.init_count += 1;
        if self.init_count < INIT_COUNT {
            return;
        }

        let references = [Vector3::z(), Vector3::y()];
        let q = match triad(&[self.acc_data, self.mag_data], &references) {
            Ok(q) => q,
            Err(error) => {
                debug!("attitude initialization failed: {error}");
                self.reset_init();
                return;
            }
        };

        let mag_reference = q.rotate_vector(&self.mag_data).normalize();
        if mag_reference.cross(&Vector3::z()).norm() < MIN_SIN_Z_MAG {
            debug!("magnetic field too close to vertical for initialization");
            self.reset_init();
            return;
        }

        debug!("attitude initialized from {} samples", self.init_count);
        self.q = Some(q);
        self.mag_reference = mag_reference;
        self.bias = Vector3::zeros();
        self.p = Self::default_covariance();
        self.reset_init();
    }

    fn acc_direction(&self, a: &Vector3, variance: f64) -> DirectionUpdate {
        DirectionUpdate {
            measurement: a.normalize(),
            reference: Vector3::z(),
            variance,
        }
    }

    fn mag_direction(&self, m: &Vector3, variance: f64) -> DirectionUpdate {
        DirectionUpdate {
            measurement: m.normalize(),
            reference: self.mag_reference,
            variance,
        }
    }

    fn update<const K: usize, const M: usize>(&mut self, data: [DirectionUpdate; K]) -> FilterResult<()> {
        const {
            assert!(M == 3 * K);
        }

        let q = self.q.ok_or(FilterError::NotInitialized)?;

        let mut z = SVector::<f64, M>::zeros();
        let mut hx = SVector::<f64, M>::zeros();
        let mut h = SMatrix::<f64, M, 6>::zeros();
        let mut r = SVector::<f64, M>::zeros();

        for (i, d) in data.iter().enumerate() {
            let predicted = global_to_local(&q, &d.reference);
            z.fixed_rows_mut::<3>(3 * i).copy_from(&d.measurement);
            hx.fixed_rows_mut::<3>(3 * i).copy_from(&predicted);
            h.fixed_view_mut::<3, 3>(3 * i, 0).copy_from(&cross_matrix(&predicted));
            r.fixed_rows_mut::<3>(3 * i).fill(d.variance);
        }

        let r = SMatrix::<f64, M, M>::from_diagonal(&r);
        let s = h * self.p * h.transpose() + r;
        let s_inv = inverse(&s).map_err(|e| FilterError::SingularCovariance(e.to_string()))?;
        let k = self.p * h.transpose() * s_inv;
        let dx = k * (z - hx);

        let dq = delta_quaternion(&(dx.fixed_rows::<3>(0) * 0.5));
        self.q = Some((q * dq).normalized());
        self.bias += dx.fixed_rows::<3>(3);

        // Joseph form
        let i_kh = Matrix6::identity() - k * h;
        self.p = symmetrize(&(i_kh * self.p * i_kh.transpose() + k * r * k.transpose()));

        Ok(())
    }
}

fn acc_suitable(norm: f64) -> bool {
    (MIN_ACCELERATION..=MAX_ACCELERATION).contains(&norm)
}

fn mag_suitable(global: &Vector3) -> bool {
    let norm = global.norm();
    (MIN_MAGNETIC_FIELD..=MAX_MAGNETIC_FIELD).contains(&norm)
        && global.cross(&Vector3::z()).norm() / norm >= MIN_SIN_Z_MAG
}

/// Error-state transition over `dt` for bias-corrected rate `w`
pub fn state_transition_matrix(w: &Vector3, dt: f64) -> Matrix6 {
    let n = w.norm();
    let theta = n * dt;
    let wx = cross_matrix(w);
    let wx2 = cross_matrix_power::<2>(w);

    let (phi_11, phi_12) = if theta < SMALL_ANGLE {
        (
            Matrix3::identity() - wx * dt + wx2 * (dt * dt / 2.0),
            -Matrix3::identity() * dt + wx * (dt * dt / 2.0) - wx2 * (dt * dt * dt / 6.0),
        )
    } else {
        let (sin, cos) = theta.sin_cos();
        let n2 = n * n;
        (
            Matrix3::identity() - wx * (sin / n) + wx2 * ((1.0 - cos) / n2),
            -Matrix3::identity() * dt + wx * ((1.0 - cos) / n2) - wx2 * ((theta - sin) / (n2 * n)),
        )
    };

    let mut phi = Matrix6::identity();
    phi.fixed_view_mut::<3, 3>(0, 0).copy_from(&phi_11);
    phi.fixed_view_mut::<3, 3>(0, 3).copy_from(&phi_12);
    phi
}

/// Discrete noise of the rate (`variance_r`) and bias (`variance_w`) processes
pub fn noise_covariance_matrix(variance_r: f64, variance_w: f64, dt: f64) -> Matrix6 {
    let q_11 = variance_r * dt + variance_w * dt * dt * dt / 3.0;
    let q_12 = -variance_w * dt * dt / 2.0;
    let q_22 = variance_w * dt;

    let mut q = Matrix6::zeros();
    q.fixed_view_mut::<3, 3>(0, 0).copy_from(&(Matrix3::identity() * q_11));
    q.fixed_view_mut::<3, 3>(0, 3).copy_from(&(Matrix3::identity() * q_12));
    q.fixed_view_mut::<3, 3>(3, 0).copy_from(&(Matrix3::identity() * q_12));
    q.fixed_view_mut::<3, 3>(3, 3).copy_from(&(Matrix3::identity() * q_22));
    q
}
