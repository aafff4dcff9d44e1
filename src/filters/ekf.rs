//! Extended Kalman filter core
//!
//! Generic over the state dimension N. Models supply the transition and
//! its Jacobian to `predict`, and an [`Linearized`] observation to `update`.

use log::debug;
use nalgebra::{Cholesky, SMatrix, SVector};

use crate::error::{FilterError, FilterResult};
use crate::filters::observation::Linearized;
use crate::filters::smooth::Prediction;
use crate::filters::update_info::{make_update_info, UpdateInfo, UpdateOptions};
use crate::types::linalg::{check_covariance, check_vector, inverse, symmetrize};

#[derive(Clone, Debug, PartialEq)]
pub struct Ekf<const N: usize> {
    x: SVector<f64, N>,
    p: SMatrix<f64, N, N>,
}

impl<const N: usize> Ekf<N> {
    pub fn new(x: SVector<f64, N>, p: SMatrix<f64, N, N>) -> FilterResult<Self> {
        check_vector("state", &x)?;
        check_covariance("covariance", &p)?;
        Ok(Self { x, p })
    }

    pub fn x(&self) -> &SVector<f64, N> {
        &self.x
    }

    pub fn p(&self) -> &SMatrix<f64, N, N> {
        &self.p
    }

    /// x = f(x), P = α²·F·P·Fᵀ + Q with F the Jacobian at the predicted state.
    ///
    /// A non-finite or non-positive-definite result is an error and leaves
    /// the filter untouched.
    pub fn predict<F, J>(
        &mut self,
        f: F,
        jacobian: J,
        q: &SMatrix<f64, N, N>,
        fading_memory_alpha: f64,
    ) -> FilterResult<()>
    where
        F: Fn(&SVector<f64, N>) -> SVector<f64, N>,
        J: Fn(&SVector<f64, N>) -> SMatrix<f64, N, N>,
    {
        self.predict_recorded(f, jacobian, q, fading_memory_alpha)?;
        Ok(())
    }

    /// [`Ekf::predict`] returning the Jacobian and predicted moments for
    /// [`crate::filters::smooth`].
    pub fn predict_recorded<F, J>(
        &mut self,
        f: F,
        jacobian: J,
        q: &SMatrix<f64, N, N>,
        fading_memory_alpha: f64,
    ) -> FilterResult<Prediction<N>>
    where
        F: Fn(&SVector<f64, N>) -> SVector<f64, N>,
        J: Fn(&SVector<f64, N>) -> SMatrix<f64, N, N>,
    {
        check_fading_memory_alpha(fading_memory_alpha)?;

        let x = f(&self.x);
        let fj = jacobian(&x);
        let alpha_2 = fading_memory_alpha * fading_memory_alpha;
        let p = symmetrize(&(fj * self.p * fj.transpose() * alpha_2 + q));

        check_vector("predicted state", &x)?;
        check_covariance("predicted covariance", &p)?;
        self.x = x;
        self.p = p;
        Ok(Prediction { f: fj, x, p })
    }

    /// Measurement update.
    ///
    /// A gated measurement returns `gated = true` and leaves the state and
    /// covariance untouched. A singular innovation covariance is an error,
    /// also leaving the filter untouched.
    pub fn update<const M: usize, O, A>(
        &mut self,
        observation: &O,
        r: &SMatrix<f64, M, M>,
        z: &SVector<f64, M>,
        add_x: A,
        options: &UpdateOptions,
    ) -> FilterResult<UpdateInfo<M>>
    where
        O: Linearized<N, M>,
        A: Fn(&SVector<f64, N>, &SVector<f64, N>) -> SVector<f64, N>,
    {
        options.check()?;
        check_vector("measurement", z)?;

        let hj = observation.jacobian(&self.x);
        let residual = observation.residual(z, &observation.h(&self.x));

        let s = hj * self.p * hj.transpose() + r;
        let s_inv = inverse(&s).map_err(|e| FilterError::SingularCovariance(e.to_string()))?;

        let info = make_update_info(residual, s, &s_inv, options);
        if info.gated {
            debug!(
                "measurement gated, normalized innovation squared {:.3}",
                info.normalized_innovation_squared
            );
            return Ok(info);
        }

        let k = match options.theta {
            Some(theta) => self.h_infinity_gain(&hj, r, theta)?,
            None => self.p * hj.transpose() * s_inv,
        };
        let x = add_x(&self.x, &(k * residual));

        // Joseph form
        let i_kh = SMatrix::<f64, N, N>::identity() - k * hj;
        let p = symmetrize(&(i_kh * self.p * i_kh.transpose() + k * r * k.transpose()));

        check_vector("updated state", &x)?;
        check_covariance("updated covariance", &p)?;
        self.x = x;
        self.p = p;

        Ok(info)
    }

    /// H-infinity gain `K = (P⁻¹ − θ·I + Hᵀ·R⁻¹·H)⁻¹·Hᵀ·R⁻¹`.
    /// With `θ = 0` this is the Kalman gain.
    fn h_infinity_gain<const M: usize>(
        &self,
        hj: &SMatrix<f64, M, N>,
        r: &SMatrix<f64, M, M>,
        theta: f64,
    ) -> FilterResult<SMatrix<f64, N, M>> {
        let p_inv = inverse(&self.p)?;
        let ht_ri = hj.transpose() * inverse(r)?;

        let m = symmetrize(&(p_inv - SMatrix::<f64, N, N>::identity() * theta + ht_ri * hj));
        if Cholesky::new(m).is_none() {
            return Err(FilterError::NotPositiveDefinite(format!(
                "H-infinity condition fails for theta {theta}"
            )));
        }

        Ok(inverse(&m)? * ht_ri)
    }
}

pub(crate) fn check_fading_memory_alpha(alpha: f64) -> FilterResult<()> {
    if alpha.is_finite() && alpha >= 1.0 {
        Ok(())
    } else {
        Err(FilterError::InvalidArgument(format!(
            "fading memory alpha must be at least 1: {alpha}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::observation::{add_x, Observation};
    use crate::types::linalg::{Matrix1, Matrix2, Vector1, Vector2};
    use approx::assert_relative_eq;

    /// Position of a [position, velocity] state
    struct PositionObservation;

    impl Observation<2, 1> for PositionObservation {
        fn h(&self, x: &Vector2) -> Vector1 {
            Vector1::new(x[0])
        }
    }

    impl Linearized<2, 1> for PositionObservation {
        fn jacobian(&self, _x: &Vector2) -> SMatrix<f64, 1, 2> {
            SMatrix::<f64, 1, 2>::new(1.0, 0.0)
        }
    }

    fn transition(dt: f64) -> Matrix2 {
        Matrix2::new(1.0, dt, 0.0, 1.0)
    }

    fn filter() -> Ekf<2> {
        Ekf::new(Vector2::new(0.0, 1.0), Matrix2::new(1.0, 0.0, 0.0, 0.25)).unwrap()
    }

    #[test]
    fn test_new_rejects_bad_covariance() {
        assert!(Ekf::new(Vector2::zeros(), Matrix2::new(1.0, 2.0, 2.0, 1.0)).is_err());
        assert!(Ekf::new(Vector2::new(f64::NAN, 0.0), Matrix2::identity()).is_err());
    }

    #[test]
    fn test_predict() {
        let mut ekf = filter();
        let f = transition(2.0);
        let q = Matrix2::new(0.1, 0.0, 0.0, 0.1);
        ekf.predict(|x| f * x, |_| f, &q, 1.0).unwrap();

        assert_relative_eq!(*ekf.x(), Vector2::new(2.0, 1.0));
        // 1 + 4·0.25 + 0.1
        assert_relative_eq!(ekf.p()[(0, 0)], 2.1, epsilon = 1e-12);
        assert_relative_eq!(ekf.p()[(0, 1)], 0.5, epsilon = 1e-12);
        assert_relative_eq!(ekf.p()[(1, 1)], 0.35, epsilon = 1e-12);
    }

    #[test]
    fn test_fading_memory() {
        let mut plain = filter();
        let mut fading = filter();
        let f = transition(1.0);
        let q = Matrix2::zeros();
        plain.predict(|x| f * x, |_| f, &q, 1.0).unwrap();
        fading.predict(|x| f * x, |_| f, &q, 1.1).unwrap();
        assert_relative_eq!(*fading.p(), plain.p() * 1.21, epsilon = 1e-12);

        assert!(fading.predict(|x| f * x, |_| f, &q, 0.9).is_err());
    }

    #[test]
    fn test_update() {
        let mut ekf = filter();
        let r = Matrix1::new(1.0);
        let info = ekf
            .update(&PositionObservation, &r, &Vector1::new(2.0), add_x, &UpdateOptions::default())
            .unwrap();

        assert!(!info.gated);
        assert_relative_eq!(info.residual[0], 2.0);
        assert_relative_eq!(info.innovation_covariance[(0, 0)], 2.0);
        assert_relative_eq!(info.normalized_innovation_squared, 2.0);
        assert_relative_eq!(ekf.x()[0], 1.0, epsilon = 1e-12);
        assert_relative_eq!(ekf.p()[(0, 0)], 0.5, epsilon = 1e-12);
        assert_relative_eq!(ekf.p()[(1, 1)], 0.25, epsilon = 1e-12);
    }

    #[test]
    fn test_gate_leaves_state_unchanged() {
        let mut ekf = filter();
        let before = ekf.clone();
        let info = ekf
            .update(
                &PositionObservation,
                &Matrix1::new(1.0),
                &Vector1::new(10.0),
                add_x,
                &UpdateOptions::gate(Some(9.0)),
            )
            .unwrap();
        assert!(info.gated);
        assert_relative_eq!(info.normalized_innovation_squared, 50.0);
        assert_eq!(ekf, before);
    }

    #[test]
    fn test_singular_innovation_covariance() {
        let mut ekf = Ekf::new(Vector2::zeros(), Matrix2::identity()).unwrap();
        // P·Hᵀ cancels a negative R exactly
        let result = ekf.update(
            &PositionObservation,
            &Matrix1::new(-1.0),
            &Vector1::new(1.0),
            add_x,
            &UpdateOptions::default(),
        );
        assert!(matches!(result, Err(FilterError::SingularCovariance(_))));
        assert_eq!(*ekf.x(), Vector2::zeros());
    }

    #[test]
    fn test_h_infinity_zero_theta_matches_kalman() {
        let mut kalman = filter();
        let mut h_infinity = filter();
        let r = Matrix1::new(0.5);
        let z = Vector1::new(1.5);

        kalman
            .update(&PositionObservation, &r, &z, add_x, &UpdateOptions::default())
            .unwrap();
        let options = UpdateOptions {
            theta: Some(0.0),
            ..UpdateOptions::default()
        };
        h_infinity
            .update(&PositionObservation, &r, &z, add_x, &options)
            .unwrap();

        assert_relative_eq!(*kalman.x(), *h_infinity.x(), epsilon = 1e-12);
        assert_relative_eq!(*kalman.p(), *h_infinity.p(), epsilon = 1e-12);
    }

    #[test]
    fn test_predict_jacobian_at_predicted_state() {
        // x' = [x0 + x1², x1], Jacobian depends on x1 after the transition
        let mut ekf = Ekf::new(Vector2::new(0.0, 1.0), Matrix2::identity()).unwrap();
        ekf.predict(
            |x| Vector2::new(x[0] + x[1] * x[1], 2.0 * x[1]),
            |x| Matrix2::new(1.0, 2.0 * x[1], 0.0, 2.0),
            &Matrix2::zeros(),
            1.0,
        )
        .unwrap();

        assert_relative_eq!(*ekf.x(), Vector2::new(1.0, 2.0));
        // F = [[1, 4], [0, 2]], F·Fᵀ = [[17, 8], [8, 4]]
        assert_relative_eq!(*ekf.p(), Matrix2::new(17.0, 8.0, 8.0, 4.0), epsilon = 1e-12);
    }

    #[test]
    fn test_predict_rejects_non_finite_result() {
        let mut ekf = filter();
        let before = ekf.clone();
        let f = transition(1.0);
        let result = ekf.predict(|x| x * f64::NAN, |_| f, &Matrix2::zeros(), 1.0);
        assert!(matches!(result, Err(FilterError::InvalidArgument(_))));
        assert_eq!(ekf, before);

        let result = ekf.predict(|x| f * x, |_| f * f64::INFINITY, &Matrix2::zeros(), 1.0);
        assert!(result.is_err());
        assert_eq!(ekf, before);
    }

    #[test]
    fn test_h_infinity_update_values() {
        // P = diag(1, 0.25), R = 0.5, θ = 0.1
        // P⁻¹ − θI + HᵀR⁻¹H = diag(2.9, 3.9), K = [2 / 2.9, 0]
        let mut ekf = filter();
        let options = UpdateOptions {
            theta: Some(0.1),
            ..UpdateOptions::default()
        };
        ekf.update(
            &PositionObservation,
            &Matrix1::new(0.5),
            &Vector1::new(1.5),
            add_x,
            &options,
        )
        .unwrap();

        let k = 2.0 / 2.9;
        assert_relative_eq!(*ekf.x(), Vector2::new(1.5 * k, 1.0), epsilon = 1e-12);
        // Joseph form: (1 − k)²·1 + k²·0.5 = 2.81 / 8.41
        let expected = Matrix2::new(2.81 / 8.41, 0.0, 0.0, 0.25);
        assert_relative_eq!(*ekf.p(), expected, epsilon = 1e-12);
        assert_relative_eq!(ekf.p()[(0, 0)], (1.0 - k).powi(2) + k * k * 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_h_infinity_inflates_covariance() {
        let mut kalman = filter();
        let mut h_infinity = filter();
        let r = Matrix1::new(0.5);
        let z = Vector1::new(1.5);

        kalman
            .update(&PositionObservation, &r, &z, add_x, &UpdateOptions::default())
            .unwrap();
        let options = UpdateOptions {
            theta: Some(0.1),
            ..UpdateOptions::default()
        };
        h_infinity
            .update(&PositionObservation, &r, &z, add_x, &options)
            .unwrap();
        assert!(h_infinity.p()[(0, 0)] > kalman.p()[(0, 0)]);

        let options = UpdateOptions {
            theta: Some(100.0),
            ..UpdateOptions::default()
        };
        assert!(matches!(
            filter().update(&PositionObservation, &r, &z, add_x, &options),
            Err(FilterError::NotPositiveDefinite(_))
        ));
    }
}
