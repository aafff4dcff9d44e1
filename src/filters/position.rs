//! Constant-velocity position filter
//!
//! EKF over `[px, vx, py, vy]`. Observes position and velocity; an
//! optional H-infinity `theta` makes the update robust to model error.

use nalgebra::{SMatrix, SVector};

use crate::error::{check_non_negative, FilterError, FilterResult};
use crate::filters::ekf::{check_fading_memory_alpha, Ekf};
use crate::filters::observation::{add_x, Linearized, Observation};
use crate::filters::update_info::UpdateOptions;
use crate::filters::{MeasurementKind, MeasurementUpdate, MotionFilter, Reset};
use crate::noise::NoiseModel;
use crate::types::linalg::{
    block_diagonal, make_diagonal, slice, slice_matrix, Matrix2, PositionStateMat, PositionStateVec,
    Vector2, POSITION_STATE_DIM,
};
use crate::types::Measurement;

const N: usize = POSITION_STATE_DIM;

fn transition(dt: f64) -> PositionStateMat {
    block_diagonal(&Matrix2::new(1.0, dt, 0.0, 1.0))
}

struct PositionObservation;

impl Observation<N, 2> for PositionObservation {
    fn h(&self, x: &PositionStateVec) -> Vector2 {
        slice::<0, 2, N, 2>(x)
    }
}

impl Linearized<N, 2> for PositionObservation {
    fn jacobian(&self, _x: &PositionStateVec) -> SMatrix<f64, 2, N> {
        SMatrix::<f64, 2, N>::new(
            1.0, 0.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0,
        )
    }
}

struct VelocityObservation;

impl Observation<N, 2> for VelocityObservation {
    fn h(&self, x: &PositionStateVec) -> Vector2 {
        slice::<1, 2, N, 2>(x)
    }
}

impl Linearized<N, 2> for VelocityObservation {
    fn jacobian(&self, _x: &PositionStateVec) -> SMatrix<f64, 2, N> {
        SMatrix::<f64, 2, N>::new(
            0.0, 1.0, 0.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        )
    }
}

#[derive(Clone, Debug)]
pub struct PositionFilter {
    noise: NoiseModel,
    fading_memory_alpha: f64,
    theta: Option<f64>,
    filter: Option<Ekf<N>>,
}

impl PositionFilter {
    pub fn new(noise: NoiseModel, fading_memory_alpha: f64, theta: Option<f64>) -> FilterResult<Self> {
        noise.check()?;
        check_fading_memory_alpha(fading_memory_alpha)?;
        if let Some(theta) = theta {
            check_non_negative("theta", theta)?;
        }
        Ok(Self {
            noise,
            fading_memory_alpha,
            theta,
            filter: None,
        })
    }

    fn filter(&self) -> FilterResult<&Ekf<N>> {
        self.filter.as_ref().ok_or(FilterError::NotInitialized)
    }

    fn update_with<const M: usize, O: Linearized<N, M>>(
        &mut self,
        observation: &O,
        measurement: &Measurement<M>,
        gate: Option<f64>,
    ) -> FilterResult<MeasurementUpdate> {
        let options = UpdateOptions {
            gate,
            theta: self.theta,
            likelihood: false,
        };
        let filter = self.filter.as_mut().ok_or(FilterError::NotInitialized)?;
        let info = filter.update(
            observation,
            &make_diagonal(&measurement.variance),
            &measurement.value,
            add_x,
            &options,
        )?;
        Ok(info.into())
    }
}

impl MotionFilter for PositionFilter {
    fn name(&self) -> &str {
        "position"
    }

    fn reset(&mut self, reset: &Reset) -> FilterResult<()> {
        reset.check()?;
        let (p, v) = (&reset.position, &reset.velocity);
        let (pv, vv) = (&reset.position_variance, &reset.velocity_variance);

        let x = SVector::<f64, N>::new(p.x, v.x, p.y, v.y);
        let p = make_diagonal(&SVector::<f64, N>::new(pv.x, vv.x, pv.y, vv.y));
        self.filter = Some(Ekf::new(x, p)?);
        Ok(())
    }

    fn predict(&mut self, dt: f64) -> FilterResult<()> {
        check_non_negative("dt", dt)?;
        let q = block_diagonal(&self.noise.covariance::<2>(dt)?);
        let f = transition(dt);
        let alpha = self.fading_memory_alpha;

        let filter = self.filter.as_mut().ok_or(FilterError::NotInitialized)?;
        filter.predict(|x| f * x, |_| f, &q, alpha)
    }

    fn accepts(&self, measurement: &MeasurementKind) -> bool {
        matches!(
            measurement,
            MeasurementKind::Position(_) | MeasurementKind::Velocity(_)
        )
    }

    fn update(
        &mut self,
        measurement: &MeasurementKind,
        gate: Option<f64>,
    ) -> FilterResult<MeasurementUpdate> {
        self.filter()?;
        measurement.check()?;
        match measurement {
            MeasurementKind::Position(position) => {
                self.update_with(&PositionObservation, position, gate)
            }
            MeasurementKind::Velocity(velocity) => {
                self.update_with(&VelocityObservation, velocity, gate)
            }
            other => Err(FilterError::UnsupportedMeasurement(format!(
                "{} filter cannot use {}",
                self.name(),
                other.name()
            ))),
        }
    }

    fn position(&self) -> FilterResult<Vector2> {
        Ok(slice::<0, 2, N, 2>(self.filter()?.x()))
    }

    fn position_p(&self) -> FilterResult<Matrix2> {
        Ok(slice_matrix::<0, 2, N, 2>(self.filter()?.p()))
    }

    fn velocity(&self) -> FilterResult<Vector2> {
        Ok(slice::<1, 2, N, 2>(self.filter()?.x()))
    }

    fn velocity_p(&self) -> FilterResult<Matrix2> {
        Ok(slice_matrix::<1, 2, N, 2>(self.filter()?.p()))
    }
}
