//! Unscented Kalman filter core
//!
//! Van der Merwe scaled sigma points (`beta = 2`, `kappa = 3 - N`).
//! The predicted sigma points are kept for the next update and dropped
//! once an update changes the state; the update regenerates them from
//! `(x, P)` when missing.

use log::debug;
use nalgebra::{Cholesky, SMatrix, SVector};

use crate::error::{FilterError, FilterResult};
use crate::filters::ekf::check_fading_memory_alpha;
use crate::filters::observation::{Euclidean, Observation, StateSpace};
use crate::filters::update_info::{make_update_info, UpdateInfo, UpdateOptions};
use crate::types::linalg::{check_covariance, check_vector, inverse, is_finite, sigma_count, symmetrize};

const BETA: f64 = 2.0;

#[derive(Clone, Debug, PartialEq)]
pub struct SigmaPoints<const N: usize> {
    alpha: f64,
    lambda: f64,
    wm: Vec<f64>,
    wc: Vec<f64>,
}

impl<const N: usize> SigmaPoints<N> {
    /// `alpha` in (0, 1] sets the spread around the mean.
    pub fn new(alpha: f64) -> FilterResult<Self> {
        if !(alpha > 0.0 && alpha <= 1.0) {
            return Err(FilterError::InvalidArgument(format!(
                "sigma point alpha must be in (0, 1]: {alpha}"
            )));
        }

        let n = N as f64;
        let kappa = 3.0 - n;
        let lambda = alpha * alpha * (n + kappa) - n;

        let w = 1.0 / (2.0 * (n + lambda));
        let mut wm = vec![w; sigma_count(N)];
        let mut wc = wm.clone();
        wm[0] = lambda / (n + lambda);
        wc[0] = wm[0] + 1.0 - alpha * alpha + BETA;

        Ok(Self {
            alpha,
            lambda,
            wm,
            wc,
        })
    }

    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    pub fn wm(&self) -> &[f64] {
        &self.wm
    }

    pub fn wc(&self) -> &[f64] {
        &self.wc
    }

    /// `x`, then `x ± columns of sqrt((N + λ)·P)`
    pub fn points<S: StateSpace<N>>(
        &self,
        x: &SVector<f64, N>,
        p: &SMatrix<f64, N, N>,
        space: &S,
    ) -> FilterResult<Vec<SVector<f64, N>>> {
        let scaled = p * (N as f64 + self.lambda);
        let l = Cholesky::new(scaled)
            .ok_or_else(|| {
                FilterError::NotPositiveDefinite("sigma point covariance".to_string())
            })?
            .l();

        let mut res = Vec::with_capacity(sigma_count(N));
        res.push(*x);
        for i in 0..N {
            res.push(space.add(x, &l.column(i).into_owned()));
        }
        for i in 0..N {
            res.push(space.add(x, &(-l.column(i).into_owned())));
        }
        Ok(res)
    }
}

/// Mean and covariance of transformed points plus `noise`
fn unscented_transform<const M: usize, Mean, Residual>(
    points: &[SVector<f64, M>],
    wm: &[f64],
    wc: &[f64],
    noise: &SMatrix<f64, M, M>,
    mean: Mean,
    residual: Residual,
    fading_memory_alpha: f64,
) -> (SVector<f64, M>, SMatrix<f64, M, M>)
where
    Mean: Fn(&[SVector<f64, M>], &[f64]) -> SVector<f64, M>,
    Residual: Fn(&SVector<f64, M>, &SVector<f64, M>) -> SVector<f64, M>,
{
    let x = mean(points, wm);

    let covariance = points
        .iter()
        .zip(wc)
        .fold(SMatrix::<f64, M, M>::zeros(), |acc, (point, w)| {
            let v = residual(point, &x);
            acc + v * v.transpose() * *w
        });

    let alpha_2 = fading_memory_alpha * fading_memory_alpha;
    (x, symmetrize(&(covariance * alpha_2 + noise)))
}

#[derive(Clone, Debug, PartialEq)]
pub struct Ukf<const N: usize, S = Euclidean> {
    sigma_points: SigmaPoints<N>,
    space: S,
    sigmas_f: Option<Vec<SVector<f64, N>>>,
    x: SVector<f64, N>,
    p: SMatrix<f64, N, N>,
}

impl<const N: usize, S: StateSpace<N>> Ukf<N, S> {
    pub fn new(
        sigma_points: SigmaPoints<N>,
        space: S,
        x: SVector<f64, N>,
        p: SMatrix<f64, N, N>,
    ) -> FilterResult<Self> {
        check_vector("state", &x)?;
        check_covariance("covariance", &p)?;
        Ok(Self {
            sigma_points,
            space,
            sigmas_f: None,
            x,
            p,
        })
    }

    pub fn x(&self) -> &SVector<f64, N> {
        &self.x
    }

    pub fn p(&self) -> &SMatrix<f64, N, N> {
        &self.p
    }

    pub fn predict<F>(
        &mut self,
        f: F,
        q: &SMatrix<f64, N, N>,
        fading_memory_alpha: f64,
    ) -> FilterResult<()>
    where
        F: Fn(&SVector<f64, N>) -> SVector<f64, N>,
    {
        check_fading_memory_alpha(fading_memory_alpha)?;

        let sigmas_f: Vec<_> = self
            .sigma_points
            .points(&self.x, &self.p, &self.space)?
            .iter()
            .map(f)
            .collect();

        let (x, p) = unscented_transform(
            &sigmas_f,
            self.sigma_points.wm(),
            self.sigma_points.wc(),
            q,
            |points, weights| self.space.mean(points, weights),
            |a, b| self.space.subtract(a, b),
            fading_memory_alpha,
        );
        if !is_finite(&x) || !is_finite(&p) {
            return Err(FilterError::InvalidArgument(
                "predicted state is not finite".to_string(),
            ));
        }

        self.x = x;
        self.p = p;
        self.sigmas_f = Some(sigmas_f);
        Ok(())
    }

    /// Measurement update with the same gating contract as
    /// [`crate::filters::ekf::Ekf::update`]. `theta` is not supported.
    pub fn update<const M: usize, O>(
        &mut self,
        observation: &O,
        r: &SMatrix<f64, M, M>,
        z: &SVector<f64, M>,
        options: &UpdateOptions,
    ) -> FilterResult<UpdateInfo<M>>
    where
        O: Observation<N, M>,
    {
        options.check()?;
        if options.theta.is_some() {
            return Err(FilterError::InvalidArgument(
                "H-infinity theta is not supported by the UKF".to_string(),
            ));
        }
        check_vector("measurement", z)?;

        let sigmas_f = match &self.sigmas_f {
            Some(sigmas_f) => sigmas_f.clone(),
            None => self.sigma_points.points(&self.x, &self.p, &self.space)?,
        };
        let sigmas_h: Vec<SVector<f64, M>> = sigmas_f.iter().map(|x| observation.h(x)).collect();

        let wc = self.sigma_points.wc();
        let (z_mean, s) = unscented_transform(
            &sigmas_h,
            self.sigma_points.wm(),
            wc,
            r,
            |points, weights| observation.mean(points, weights),
            |a, b| observation.residual(a, b),
            1.0,
        );
        let s_inv = inverse(&s).map_err(|e| FilterError::SingularCovariance(e.to_string()))?;

        let p_xz = sigmas_f
            .iter()
            .zip(&sigmas_h)
            .zip(wc)
            .fold(SMatrix::<f64, N, M>::zeros(), |acc, ((sf, sh), w)| {
                let dx = self.space.subtract(sf, &self.x);
                let dz = observation.residual(sh, &z_mean);
                acc + dx * dz.transpose() * *w
            });

        let residual = observation.residual(z, &z_mean);
        let info = make_update_info(residual, s, &s_inv, options);
        if info.gated {
            debug!(
                "measurement gated, normalized innovation squared {:.3}",
                info.normalized_innovation_squared
            );
            return Ok(info);
        }

        let k = p_xz * s_inv;
        self.x = self.space.add(&self.x, &(k * residual));
        self.p = symmetrize(&(self.p - p_xz * k.transpose()));
        self.sigmas_f = None;

        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::ekf::Ekf;
    use crate::filters::observation::{add_x, Linearized};
    use crate::types::linalg::{Matrix1, Matrix2, Vector1, Vector2};
    use approx::assert_relative_eq;

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

    fn x0() -> Vector2 {
        Vector2::new(0.5, 1.0)
    }

    fn p0() -> Matrix2 {
        Matrix2::new(1.0, 0.1, 0.1, 0.25)
    }

    #[test]
    fn test_sigma_point_weights() {
        let sigma_points = SigmaPoints::<4>::new(0.5).unwrap();
        assert_eq!(sigma_points.wm().len(), 9);
        assert_relative_eq!(sigma_points.wm().iter().sum::<f64>(), 1.0, epsilon = 1e-12);
        assert_relative_eq!(
            sigma_points.wc()[0] - sigma_points.wm()[0],
            1.0 - 0.25 + 2.0,
            epsilon = 1e-12
        );

        assert!(SigmaPoints::<4>::new(0.0).is_err());
        assert!(SigmaPoints::<4>::new(1.5).is_err());
    }

    #[test]
    fn test_sigma_points_reproduce_mean_and_covariance() {
        let sigma_points = SigmaPoints::<2>::new(1.0).unwrap();
        let points = sigma_points.points(&x0(), &p0(), &Euclidean).unwrap();
        assert_eq!(points.len(), 5);
        assert_eq!(points[0], x0());

        let (x, p) = unscented_transform(
            &points,
            sigma_points.wm(),
            sigma_points.wc(),
            &Matrix2::zeros(),
            |p, w| StateSpace::<2>::mean(&Euclidean, p, w),
            |a, b| StateSpace::<2>::subtract(&Euclidean, a, b),
            1.0,
        );
        assert_relative_eq!(x, x0(), epsilon = 1e-12);
        assert_relative_eq!(p, p0(), epsilon = 1e-12);
    }

    #[test]
    fn test_not_positive_definite() {
        let sigma_points = SigmaPoints::<2>::new(1.0).unwrap();
        let p = Matrix2::new(1.0, 0.0, 0.0, -1.0);
        assert!(matches!(
            sigma_points.points(&x0(), &p, &Euclidean),
            Err(FilterError::NotPositiveDefinite(_))
        ));
    }

    #[test]
    fn test_linear_model_matches_ekf() {
        let f = Matrix2::new(1.0, 0.5, 0.0, 1.0);
        let q = Matrix2::new(0.01, 0.02, 0.02, 0.1);
        let r = Matrix1::new(0.3);
        let z = Vector1::new(1.2);

        let mut ekf = Ekf::new(x0(), p0()).unwrap();
        let mut ukf = Ukf::new(SigmaPoints::new(0.7).unwrap(), Euclidean, x0(), p0()).unwrap();

        ekf.predict(|x| f * x, |_| f, &q, 1.0).unwrap();
        ukf.predict(|x| f * x, &q, 1.0).unwrap();
        assert_relative_eq!(*ukf.x(), *ekf.x(), epsilon = 1e-10);
        assert_relative_eq!(*ukf.p(), *ekf.p(), epsilon = 1e-10);

        let ekf_info = ekf
            .update(&PositionObservation, &r, &z, add_x, &UpdateOptions::default())
            .unwrap();
        let ukf_info = ukf
            .update(&PositionObservation, &r, &z, &UpdateOptions::default())
            .unwrap();
        assert_relative_eq!(
            ukf_info.normalized_innovation_squared,
            ekf_info.normalized_innovation_squared,
            epsilon = 1e-10
        );
        assert_relative_eq!(*ukf.x(), *ekf.x(), epsilon = 1e-10);
        assert_relative_eq!(*ukf.p(), *ekf.p(), epsilon = 1e-10);

        // second update regenerates the sigma points
        let z = Vector1::new(1.3);
        ekf.update(&PositionObservation, &r, &z, add_x, &UpdateOptions::default())
            .unwrap();
        ukf.update(&PositionObservation, &r, &z, &UpdateOptions::default())
            .unwrap();
        assert_relative_eq!(*ukf.x(), *ekf.x(), epsilon = 1e-10);
        assert_relative_eq!(*ukf.p(), *ekf.p(), epsilon = 1e-10);
    }

    #[test]
    fn test_gate_leaves_state_unchanged() {
        let mut ukf = Ukf::new(SigmaPoints::new(1.0).unwrap(), Euclidean, x0(), p0()).unwrap();
        ukf.predict(|x| *x, &Matrix2::zeros(), 1.0).unwrap();
        let before = ukf.clone();

        let info = ukf
            .update(
                &PositionObservation,
                &Matrix1::new(0.1),
                &Vector1::new(100.0),
                &UpdateOptions::gate(Some(9.0)),
            )
            .unwrap();
        assert!(info.gated);
        assert_eq!(ukf, before);
    }

    #[test]
    fn test_theta_rejected() {
        let mut ukf = Ukf::new(SigmaPoints::new(1.0).unwrap(), Euclidean, x0(), p0()).unwrap();
        let options = UpdateOptions {
            theta: Some(0.1),
            ..UpdateOptions::default()
        };
        assert!(matches!(
            ukf.update(&PositionObservation, &Matrix1::new(0.1), &Vector1::new(0.0), &options),
            Err(FilterError::InvalidArgument(_))
        ));
    }
}
