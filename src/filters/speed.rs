//! Constant-acceleration speed filter
//!
//! UKF over `[px, vx, ax, py, vy, ay]` with discrete per-axis process
//! noise. Observes position, speed and velocity.

use crate::error::{check_non_negative, FilterError, FilterResult};
use crate::filters::ekf::check_fading_memory_alpha;
use crate::filters::observation::{Euclidean, Observation};
use crate::filters::ukf::{SigmaPoints, Ukf};
use crate::filters::update_info::UpdateOptions;
use crate::filters::{stack_position_speed, MeasurementKind, MeasurementUpdate, MotionFilter, Reset};
use crate::noise::discrete_white_noise_axes;
use crate::types::linalg::{
    block_diagonal, make_diagonal, slice, slice_matrix, Matrix2, Matrix3, SpeedStateMat,
    SpeedStateVec, Vector1, Vector2, Vector3, SPEED_STATE_DIM,
};
use crate::types::Measurement;

const N: usize = SPEED_STATE_DIM;

fn transition(dt: f64) -> SpeedStateMat {
    let dt_2 = dt * dt / 2.0;
    block_diagonal(&Matrix3::new(
        1.0, dt, dt_2, //
        0.0, 1.0, dt, //
        0.0, 0.0, 1.0,
    ))
}

fn speed(x: &SpeedStateVec) -> f64 {
    x[1].hypot(x[4])
}

struct PositionObservation;

impl Observation<N, 2> for PositionObservation {
    fn h(&self, x: &SpeedStateVec) -> Vector2 {
        slice::<0, 3, N, 2>(x)
    }
}

struct PositionSpeedObservation;

impl Observation<N, 3> for PositionSpeedObservation {
    fn h(&self, x: &SpeedStateVec) -> Vector3 {
        Vector3::new(x[0], x[3], speed(x))
    }
}

struct SpeedObservation;

impl Observation<N, 1> for SpeedObservation {
    fn h(&self, x: &SpeedStateVec) -> Vector1 {
        Vector1::new(speed(x))
    }
}

struct VelocityObservation;

impl Observation<N, 2> for VelocityObservation {
    fn h(&self, x: &SpeedStateVec) -> Vector2 {
        slice::<1, 3, N, 2>(x)
    }
}

#[derive(Clone, Debug)]
pub struct SpeedFilter {
    process_variance: f64,
    fading_memory_alpha: f64,
    sigma_points: SigmaPoints<N>,
    filter: Option<Ukf<N>>,
}

impl SpeedFilter {
    /// `process_variance` is the variance of the per-step jerk impulse on
    /// each axis.
    pub fn new(
        process_variance: f64,
        fading_memory_alpha: f64,
        sigma_points_alpha: f64,
    ) -> FilterResult<Self> {
        check_non_negative("process variance", process_variance)?;
        check_fading_memory_alpha(fading_memory_alpha)?;
        Ok(Self {
            process_variance,
            fading_memory_alpha,
            sigma_points: SigmaPoints::new(sigma_points_alpha)?,
            filter: None,
        })
    }

    pub fn acceleration(&self) -> FilterResult<Vector2> {
        Ok(slice::<2, 3, N, 2>(self.filter()?.x()))
    }

    fn filter(&self) -> FilterResult<&Ukf<N>> {
        self.filter.as_ref().ok_or(FilterError::NotInitialized)
    }

    fn update_with<const M: usize, O: Observation<N, M>>(
        &mut self,
        observation: &O,
        measurement: &Measurement<M>,
        gate: Option<f64>,
    ) -> FilterResult<MeasurementUpdate> {
        let filter = self.filter.as_mut().ok_or(FilterError::NotInitialized)?;
        let info = filter.update(
            observation,
            &make_diagonal(&measurement.variance),
            &measurement.value,
            &UpdateOptions::gate(gate),
        )?;
        Ok(info.into())
    }
}

impl MotionFilter for SpeedFilter {
    fn name(&self) -> &str {
        "speed"
    }

    fn reset(&mut self, reset: &Reset) -> FilterResult<()> {
        reset.check()?;
        let (p, v, a) = (&reset.position, &reset.velocity, reset.acceleration);
        let (pv, vv, av) = (
            &reset.position_variance,
            &reset.velocity_variance,
            reset.acceleration_variance,
        );

        let x = SpeedStateVec::from_column_slice(&[p.x, v.x, a, p.y, v.y, a]);
        let p = make_diagonal(&SpeedStateVec::from_column_slice(&[pv.x, vv.x, av, pv.y, vv.y, av]));
        self.filter = Some(Ukf::new(self.sigma_points.clone(), Euclidean, x, p)?);
        Ok(())
    }

    fn predict(&mut self, dt: f64) -> FilterResult<()> {
        check_non_negative("dt", dt)?;
        let q = discrete_white_noise_axes::<3, 2, N>(dt, &Vector2::repeat(self.process_variance))?;
        let f = transition(dt);
        let alpha = self.fading_memory_alpha;

        let filter = self.filter.as_mut().ok_or(FilterError::NotInitialized)?;
        filter.predict(|x| f * x, &q, alpha)
    }

    fn accepts(&self, measurement: &MeasurementKind) -> bool {
        matches!(
            measurement,
            MeasurementKind::Position(_)
                | MeasurementKind::PositionSpeed { .. }
                | MeasurementKind::Speed(_)
                | MeasurementKind::Velocity(_)
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
            MeasurementKind::PositionSpeed { position, speed } => self.update_with(
                &PositionSpeedObservation,
                &stack_position_speed(position, speed),
                gate,
            ),
            MeasurementKind::Speed(speed) => self.update_with(&SpeedObservation, speed, gate),
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
        Ok(slice::<0, 3, N, 2>(self.filter()?.x()))
    }

    fn position_p(&self) -> FilterResult<Matrix2> {
        Ok(slice_matrix::<0, 3, N, 2>(self.filter()?.p()))
    }

    fn velocity(&self) -> FilterResult<Vector2> {
        Ok(slice::<1, 3, N, 2>(self.filter()?.x()))
    }

    fn velocity_p(&self) -> FilterResult<Matrix2> {
        Ok(slice_matrix::<1, 3, N, 2>(self.filter()?.p()))
    }
}
