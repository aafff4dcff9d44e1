//! Direction filter
//!
//! UKF over `[px, vx, py, vy, angle, angle_speed]`. The measured direction
//! of motion is the velocity direction plus a slowly drifting offset
//! `angle`, so `h_direction = atan2(vy, vx) + angle`.

use nalgebra::SVector;

use crate::attitude::angle::{circular_mean, wrap_angle};
use crate::error::{check_non_negative, FilterError, FilterResult};
use crate::filters::ekf::check_fading_memory_alpha;
use crate::filters::observation::{weighted_mean, Observation, StateSpace};
use crate::filters::ukf::{SigmaPoints, Ukf};
use crate::filters::update_info::UpdateOptions;
use crate::filters::{
    stack_position_direction, stack_position_speed, stack_position_speed_direction,
    stack_speed_direction, MeasurementKind, MeasurementUpdate, MotionFilter, Reset,
};
use crate::noise::NoiseModel;
use crate::types::linalg::{
    block_diagonal_from, make_diagonal, slice, slice_matrix, DirectionStateMat, DirectionStateVec,
    Matrix2, Vector1, Vector2, Vector3, Vector4, DIRECTION_STATE_DIM,
};
use crate::types::Measurement;

const N: usize = DIRECTION_STATE_DIM;
const ANGLE: usize = 4;

fn transition(dt: f64) -> DirectionStateMat {
    let block = Matrix2::new(1.0, dt, 0.0, 1.0);
    block_diagonal_from(&[block, block, block])
}

fn speed(x: &DirectionStateVec) -> f64 {
    x[1].hypot(x[3])
}

fn direction(x: &DirectionStateVec) -> f64 {
    x[3].atan2(x[1]) + x[ANGLE]
}

/// `a - b` with component `index` wrapped
fn wrapped_residual<const M: usize>(a: &SVector<f64, M>, b: &SVector<f64, M>, index: usize) -> SVector<f64, M> {
    let mut res = a - b;
    res[index] = wrap_angle(res[index]);
    res
}

/// Weighted mean with component `index` averaged on the circle
fn mean_with_angle<const M: usize>(points: &[SVector<f64, M>], weights: &[f64], index: usize) -> SVector<f64, M> {
    let mut res = weighted_mean(points, weights);
    res[index] = circular_mean(points.iter().zip(weights).map(|(p, w)| (p[index], *w)));
    res
}

/// State space with the angle component wrapped to (-π, π]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DirectionSpace;

impl StateSpace<N> for DirectionSpace {
    fn add(&self, a: &DirectionStateVec, b: &DirectionStateVec) -> DirectionStateVec {
        let mut res = a + b;
        res[ANGLE] = wrap_angle(res[ANGLE]);
        res
    }

    fn subtract(&self, a: &DirectionStateVec, b: &DirectionStateVec) -> DirectionStateVec {
        wrapped_residual(a, b, ANGLE)
    }

    fn mean(&self, points: &[DirectionStateVec], weights: &[f64]) -> DirectionStateVec {
        mean_with_angle(points, weights, ANGLE)
    }
}

struct PositionObservation;

impl Observation<N, 2> for PositionObservation {
    fn h(&self, x: &DirectionStateVec) -> Vector2 {
        slice::<0, 2, N, 2>(x)
    }
}

struct PositionSpeedObservation;

impl Observation<N, 3> for PositionSpeedObservation {
    fn h(&self, x: &DirectionStateVec) -> Vector3 {
        Vector3::new(x[0], x[2], speed(x))
    }
}

/// `[px, py, speed, direction]`
struct PositionSpeedDirectionObservation;

impl Observation<N, 4> for PositionSpeedDirectionObservation {
    fn h(&self, x: &DirectionStateVec) -> Vector4 {
        Vector4::new(x[0], x[2], speed(x), direction(x))
    }

    fn residual(&self, a: &Vector4, b: &Vector4) -> Vector4 {
        wrapped_residual(a, b, 3)
    }

    fn mean(&self, points: &[Vector4], weights: &[f64]) -> Vector4 {
        mean_with_angle(points, weights, 3)
    }
}

struct PositionDirectionObservation;

impl Observation<N, 3> for PositionDirectionObservation {
    fn h(&self, x: &DirectionStateVec) -> Vector3 {
        Vector3::new(x[0], x[2], direction(x))
    }

    fn residual(&self, a: &Vector3, b: &Vector3) -> Vector3 {
        wrapped_residual(a, b, 2)
    }

    fn mean(&self, points: &[Vector3], weights: &[f64]) -> Vector3 {
        mean_with_angle(points, weights, 2)
    }
}

struct SpeedDirectionObservation;

impl Observation<N, 2> for SpeedDirectionObservation {
    fn h(&self, x: &DirectionStateVec) -> Vector2 {
        Vector2::new(speed(x), direction(x))
    }

    fn residual(&self, a: &Vector2, b: &Vector2) -> Vector2 {
        wrapped_residual(a, b, 1)
    }

    fn mean(&self, points: &[Vector2], weights: &[f64]) -> Vector2 {
        mean_with_angle(points, weights, 1)
    }
}

struct DirectionObservation;

impl Observation<N, 1> for DirectionObservation {
    fn h(&self, x: &DirectionStateVec) -> Vector1 {
        Vector1::new(direction(x))
    }

    fn residual(&self, a: &Vector1, b: &Vector1) -> Vector1 {
        Vector1::new(wrap_angle(a[0] - b[0]))
    }

    fn mean(&self, points: &[Vector1], weights: &[f64]) -> Vector1 {
        Vector1::new(circular_mean(points.iter().zip(weights).map(|(p, w)| (p[0], *w))))
    }
}

struct SpeedObservation;

impl Observation<N, 1> for SpeedObservation {
    fn h(&self, x: &DirectionStateVec) -> Vector1 {
        Vector1::new(speed(x))
    }
}

struct VelocityObservation;

impl Observation<N, 2> for VelocityObservation {
    fn h(&self, x: &DirectionStateVec) -> Vector2 {
        slice::<1, 2, N, 2>(x)
    }
}

#[derive(Clone, Debug)]
pub struct DirectionFilter {
    position_noise: NoiseModel,
    angle_noise: NoiseModel,
    fading_memory_alpha: f64,
    sigma_points: SigmaPoints<N>,
    filter: Option<Ukf<N, DirectionSpace>>,
}

impl DirectionFilter {
    pub fn new(
        position_noise: NoiseModel,
        angle_noise: NoiseModel,
        fading_memory_alpha: f64,
        sigma_points_alpha: f64,
    ) -> FilterResult<Self> {
        position_noise.check()?;
        angle_noise.check()?;
        check_fading_memory_alpha(fading_memory_alpha)?;
        Ok(Self {
            position_noise,
            angle_noise,
            fading_memory_alpha,
            sigma_points: SigmaPoints::new(sigma_points_alpha)?,
            filter: None,
        })
    }

    pub fn angle_speed(&self) -> FilterResult<f64> {
        Ok(self.filter()?.x()[ANGLE + 1])
    }

    pub fn angle_speed_p(&self) -> FilterResult<f64> {
        Ok(self.filter()?.p()[(ANGLE + 1, ANGLE + 1)])
    }

    fn filter(&self) -> FilterResult<&Ukf<N, DirectionSpace>> {
        self.filter.as_ref().ok_or(FilterError::NotInitialized)
    }

    fn q(&self, dt: f64) -> FilterResult<DirectionStateMat> {
        let position = self.position_noise.covariance::<2>(dt)?;
        let angle = self.angle_noise.covariance::<2>(dt)?;
        Ok(block_diagonal_from(&[position, position, angle]))
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

impl MotionFilter for DirectionFilter {
    fn name(&self) -> &str {
        "direction"
    }

    fn reset(&mut self, reset: &Reset) -> FilterResult<()> {
        reset.check()?;
        let (p, v) = (&reset.position, &reset.velocity);
        let (pv, vv) = (&reset.position_variance, &reset.velocity_variance);

        let x = DirectionStateVec::from_column_slice(&[
            p.x,
            v.x,
            p.y,
            v.y,
            wrap_angle(reset.angle),
            reset.angle_speed,
        ]);
        let p = make_diagonal(&DirectionStateVec::from_column_slice(&[
            pv.x,
            vv.x,
            pv.y,
            vv.y,
            reset.angle_variance,
            reset.angle_speed_variance,
        ]));
        self.filter = Some(Ukf::new(self.sigma_points.clone(), DirectionSpace, x, p)?);
        Ok(())
    }

    fn predict(&mut self, dt: f64) -> FilterResult<()> {
        check_non_negative("dt", dt)?;
        let q = self.q(dt)?;
        let f = transition(dt);
        let alpha = self.fading_memory_alpha;

        let filter = self.filter.as_mut().ok_or(FilterError::NotInitialized)?;
        filter.predict(
            |x| {
                let mut res = f * x;
                res[ANGLE] = wrap_angle(res[ANGLE]);
                res
            },
            &q,
            alpha,
        )
    }

    fn accepts(&self, measurement: &MeasurementKind) -> bool {
        !measurement.has_acceleration()
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
            MeasurementKind::PositionSpeedDirection {
                position,
                speed,
                direction,
            } => self.update_with(
                &PositionSpeedDirectionObservation,
                &stack_position_speed_direction(position, speed, direction),
                gate,
            ),
            MeasurementKind::PositionDirection {
                position,
                direction,
            } => self.update_with(
                &PositionDirectionObservation,
                &stack_position_direction(position, direction),
                gate,
            ),
            MeasurementKind::SpeedDirection { speed, direction } => self.update_with(
                &SpeedDirectionObservation,
                &stack_speed_direction(speed, direction),
                gate,
            ),
            MeasurementKind::Direction(direction) => {
                self.update_with(&DirectionObservation, direction, gate)
            }
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

    fn angle(&self) -> FilterResult<Option<f64>> {
        Ok(Some(self.filter()?.x()[ANGLE]))
    }

    fn angle_p(&self) -> FilterResult<Option<f64>> {
        Ok(Some(self.filter()?.p()[(ANGLE, ANGLE)]))
    }
}
