//! Acceleration filter
//!
//! State `[px, vx, ax, py, vy, ay, angle, angle_speed, angle_r]`. The
//! acceleration sensor frame is the track frame rotated by `angle`, and
//! the measured direction of motion is `atan2(vy, vx) + angle + angle_r`.
//! Every measurement kind is one stacked update; the filter runs on either
//! the EKF or the UKF core.

use nalgebra::{SMatrix, SVector};
use serde::{Deserialize, Serialize};

use crate::attitude::angle::{circular_mean, wrap_angle};
use crate::error::{check_non_negative, FilterError, FilterResult};
use crate::filters::ekf::{check_fading_memory_alpha, Ekf};
use crate::filters::observation::{weighted_mean, Linearized, Observation, StateSpace};
use crate::filters::ukf::{SigmaPoints, Ukf};
use crate::filters::update_info::UpdateOptions;
use crate::filters::{Component, MeasurementKind, MeasurementUpdate, MotionFilter, Reset};
use crate::noise::NoiseModel;
use crate::types::linalg::{
    make_diagonal, slice, slice_matrix, AccelerationStateMat, AccelerationStateVec, Matrix2,
    Vector2, ACCELERATION_STATE_DIM,
};

const N: usize = ACCELERATION_STATE_DIM;
const ANGLE: usize = 6;
const ANGLE_SPEED: usize = 7;
const ANGLE_R: usize = 8;

fn transition(dt: f64) -> AccelerationStateMat {
    let dt_2 = dt * dt / 2.0;
    let mut f = AccelerationStateMat::identity();
    for axis in [0, 3] {
        f[(axis, axis + 1)] = dt;
        f[(axis, axis + 2)] = dt_2;
        f[(axis + 1, axis + 2)] = dt;
    }
    f[(ANGLE, ANGLE_SPEED)] = dt;
    f
}

fn wrap_angles(mut x: AccelerationStateVec) -> AccelerationStateVec {
    x[ANGLE] = wrap_angle(x[ANGLE]);
    x[ANGLE_R] = wrap_angle(x[ANGLE_R]);
    x
}

fn add_x(a: &AccelerationStateVec, b: &AccelerationStateVec) -> AccelerationStateVec {
    wrap_angles(a + b)
}

fn speed(x: &AccelerationStateVec) -> f64 {
    x[1].hypot(x[4])
}

fn direction(x: &AccelerationStateVec) -> f64 {
    x[4].atan2(x[1]) + x[ANGLE] + x[ANGLE_R]
}

/// Track-frame acceleration rotated into the sensor frame
fn measured_acceleration(x: &AccelerationStateVec) -> Vector2 {
    let (sin, cos) = x[ANGLE].sin_cos();
    let (ax, ay) = (x[2], x[5]);
    Vector2::new(ax * cos - ay * sin, ax * sin + ay * cos)
}

/// State space with both angle components wrapped to (-π, π]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct AccelerationSpace;

impl StateSpace<N> for AccelerationSpace {
    fn add(&self, a: &AccelerationStateVec, b: &AccelerationStateVec) -> AccelerationStateVec {
        add_x(a, b)
    }

    fn subtract(&self, a: &AccelerationStateVec, b: &AccelerationStateVec) -> AccelerationStateVec {
        wrap_angles(a - b)
    }

    fn mean(&self, points: &[AccelerationStateVec], weights: &[f64]) -> AccelerationStateVec {
        let mut res = weighted_mean(points, weights);
        for index in [ANGLE, ANGLE_R] {
            res[index] = circular_mean(points.iter().zip(weights).map(|(p, w)| (p[index], *w)));
        }
        res
    }
}

/// Observation of the stacked components of one measurement kind
struct StackedObservation<const M: usize> {
    components: Vec<Component>,
    /// Row of the direction component
    direction: Option<usize>,
}

impl<const M: usize> StackedObservation<M> {
    fn new(components: Vec<Component>) -> FilterResult<Self> {
        let mut rows = 0;
        let mut direction = None;
        for component in &components {
            if *component == Component::Direction {
                direction = Some(rows);
            }
            rows += component.size();
        }
        if rows != M {
            return Err(FilterError::InvalidArgument(format!(
                "stacked observation has {rows} rows, expected {M}"
            )));
        }
        Ok(Self {
            components,
            direction,
        })
    }
}

impl<const M: usize> Observation<N, M> for StackedObservation<M> {
    fn h(&self, x: &AccelerationStateVec) -> SVector<f64, M> {
        let mut res = SVector::<f64, M>::zeros();
        let mut row = 0;
        for component in &self.components {
            match component {
                Component::Position => {
                    res[row] = x[0];
                    res[row + 1] = x[3];
                }
                Component::Speed => res[row] = speed(x),
                Component::Direction => res[row] = direction(x),
                Component::Acceleration => {
                    let a = measured_acceleration(x);
                    res[row] = a.x;
                    res[row + 1] = a.y;
                }
                Component::Velocity => {
                    res[row] = x[1];
                    res[row + 1] = x[4];
                }
            }
            row += component.size();
        }
        res
    }

    fn residual(&self, a: &SVector<f64, M>, b: &SVector<f64, M>) -> SVector<f64, M> {
        let mut res = a - b;
        if let Some(i) = self.direction {
            res[i] = wrap_angle(res[i]);
        }
        res
    }

    fn mean(&self, points: &[SVector<f64, M>], weights: &[f64]) -> SVector<f64, M> {
        let mut res = weighted_mean(points, weights);
        if let Some(i) = self.direction {
            res[i] = circular_mean(points.iter().zip(weights).map(|(p, w)| (p[i], *w)));
        }
        res
    }
}

impl<const M: usize> Linearized<N, M> for StackedObservation<M> {
    fn jacobian(&self, x: &AccelerationStateVec) -> SMatrix<f64, M, N> {
        let (vx, ax, vy, ay) = (x[1], x[2], x[4], x[5]);
        let speed_2 = vx * vx + vy * vy;
        let speed = speed_2.sqrt();
        let (sin, cos) = x[ANGLE].sin_cos();

        let mut res = SMatrix::<f64, M, N>::zeros();
        let mut row = 0;
        for component in &self.components {
            match component {
                Component::Position => {
                    res[(row, 0)] = 1.0;
                    res[(row + 1, 3)] = 1.0;
                }
                Component::Speed => {
                    // undefined at rest
                    if speed > 0.0 {
                        res[(row, 1)] = vx / speed;
                        res[(row, 4)] = vy / speed;
                    }
                }
                Component::Direction => {
                    if speed_2 > 0.0 {
                        res[(row, 1)] = -vy / speed_2;
                        res[(row, 4)] = vx / speed_2;
                    }
                    res[(row, ANGLE)] = 1.0;
                    res[(row, ANGLE_R)] = 1.0;
                }
                Component::Acceleration => {
                    res[(row, 2)] = cos;
                    res[(row, 5)] = -sin;
                    res[(row, ANGLE)] = -ax * sin - ay * cos;
                    res[(row + 1, 2)] = sin;
                    res[(row + 1, 5)] = cos;
                    res[(row + 1, ANGLE)] = ax * cos - ay * sin;
                }
                Component::Velocity => {
                    res[(row, 1)] = 1.0;
                    res[(row + 1, 4)] = 1.0;
                }
            }
            row += component.size();
        }
        res
    }
}

/// Estimation core of the acceleration filter
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AccelerationCore {
    Ekf,
    Ukf { sigma_points_alpha: f64 },
}

#[derive(Clone, Debug)]
enum Core {
    Ekf(Ekf<N>),
    Ukf(Ukf<N, AccelerationSpace>),
}

impl Core {
    fn x(&self) -> &AccelerationStateVec {
        match self {
            Core::Ekf(filter) => filter.x(),
            Core::Ukf(filter) => filter.x(),
        }
    }

    fn p(&self) -> &AccelerationStateMat {
        match self {
            Core::Ekf(filter) => filter.p(),
            Core::Ukf(filter) => filter.p(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AccelerationFilter {
    name: &'static str,
    position_noise: NoiseModel,
    angle_noise: NoiseModel,
    angle_r_noise: NoiseModel,
    fading_memory_alpha: f64,
    sigma_points: Option<SigmaPoints<N>>,
    filter: Option<Core>,
}

impl AccelerationFilter {
    /// `position_noise` drives the jerk of each axis, `angle_noise` the
    /// angle rate and `angle_r_noise` the direction bias.
    pub fn new(
        core: AccelerationCore,
        position_noise: NoiseModel,
        angle_noise: NoiseModel,
        angle_r_noise: NoiseModel,
        fading_memory_alpha: f64,
    ) -> FilterResult<Self> {
        position_noise.check()?;
        angle_noise.check()?;
        angle_r_noise.check()?;
        check_fading_memory_alpha(fading_memory_alpha)?;

        let (name, sigma_points) = match core {
            AccelerationCore::Ekf => ("acceleration_ekf", None),
            AccelerationCore::Ukf { sigma_points_alpha } => (
                "acceleration_ukf",
                Some(SigmaPoints::new(sigma_points_alpha)?),
            ),
        };
        Ok(Self {
            name,
            position_noise,
            angle_noise,
            angle_r_noise,
            fading_memory_alpha,
            sigma_points,
            filter: None,
        })
    }

    pub fn acceleration(&self) -> FilterResult<Vector2> {
        Ok(slice::<2, 3, N, 2>(self.filter()?.x()))
    }

    pub fn angle_speed(&self) -> FilterResult<f64> {
        Ok(self.filter()?.x()[ANGLE_SPEED])
    }

    pub fn angle_r(&self) -> FilterResult<f64> {
        Ok(self.filter()?.x()[ANGLE_R])
    }

    pub fn angle_r_p(&self) -> FilterResult<f64> {
        Ok(self.filter()?.p()[(ANGLE_R, ANGLE_R)])
    }

    fn filter(&self) -> FilterResult<&Core> {
        self.filter.as_ref().ok_or(FilterError::NotInitialized)
    }

    fn q(&self, dt: f64) -> FilterResult<AccelerationStateMat> {
        let position = self.position_noise.covariance::<3>(dt)?;
        let angle = self.angle_noise.covariance::<2>(dt)?;
        let angle_r = self.angle_r_noise.covariance::<1>(dt)?;

        let mut q = AccelerationStateMat::zeros();
        q.fixed_view_mut::<3, 3>(0, 0).copy_from(&position);
        q.fixed_view_mut::<3, 3>(3, 3).copy_from(&position);
        q.fixed_view_mut::<2, 2>(ANGLE, ANGLE).copy_from(&angle);
        q.fixed_view_mut::<1, 1>(ANGLE_R, ANGLE_R).copy_from(&angle_r);
        Ok(q)
    }

    fn update_stacked<const M: usize>(
        &mut self,
        measurement: &MeasurementKind,
        gate: Option<f64>,
    ) -> FilterResult<MeasurementUpdate> {
        let observation = StackedObservation::<M>::new(measurement.components())?;
        let m = measurement.stack::<M>()?;
        let r = make_diagonal(&m.variance);
        let options = UpdateOptions::gate(gate);

        let filter = self.filter.as_mut().ok_or(FilterError::NotInitialized)?;
        let update = match filter {
            Core::Ekf(ekf) => ekf.update(&observation, &r, &m.value, add_x, &options)?.into(),
            Core::Ukf(ukf) => ukf.update(&observation, &r, &m.value, &options)?.into(),
        };
        Ok(update)
    }
}

impl MotionFilter for AccelerationFilter {
    fn name(&self) -> &str {
        self.name
    }

    fn reset(&mut self, reset: &Reset) -> FilterResult<()> {
        reset.check()?;
        let (p, v, a) = (&reset.position, &reset.velocity, reset.acceleration);
        let (pv, vv, av) = (
            &reset.position_variance,
            &reset.velocity_variance,
            reset.acceleration_variance,
        );

        let x = wrap_angles(AccelerationStateVec::from_column_slice(&[
            p.x,
            v.x,
            a,
            p.y,
            v.y,
            a,
            reset.angle,
            reset.angle_speed,
            reset.angle_r,
        ]));
        let p = make_diagonal(&AccelerationStateVec::from_column_slice(&[
            pv.x,
            vv.x,
            av,
            pv.y,
            vv.y,
            av,
            reset.angle_variance,
            reset.angle_speed_variance,
            reset.angle_r_variance,
        ]));

        self.filter = Some(match &self.sigma_points {
            None => Core::Ekf(Ekf::new(x, p)?),
            Some(sigma_points) => {
                Core::Ukf(Ukf::new(sigma_points.clone(), AccelerationSpace, x, p)?)
            }
        });
        Ok(())
    }

    fn predict(&mut self, dt: f64) -> FilterResult<()> {
        check_non_negative("dt", dt)?;
        let q = self.q(dt)?;
        let f = transition(dt);
        let alpha = self.fading_memory_alpha;

        match self.filter.as_mut().ok_or(FilterError::NotInitialized)? {
            Core::Ekf(ekf) => ekf.predict(|x| wrap_angles(f * x), |_| f, &q, alpha),
            Core::Ukf(ukf) => ukf.predict(|x| wrap_angles(f * x), &q, alpha),
        }
    }

    fn accepts(&self, _measurement: &MeasurementKind) -> bool {
        true
    }

    fn update(
        &mut self,
        measurement: &MeasurementKind,
        gate: Option<f64>,
    ) -> FilterResult<MeasurementUpdate> {
        self.filter()?;
        measurement.check()?;
        match measurement.dimension() {
            1 => self.update_stacked::<1>(measurement, gate),
            2 => self.update_stacked::<2>(measurement, gate),
            3 => self.update_stacked::<3>(measurement, gate),
            4 => self.update_stacked::<4>(measurement, gate),
            5 => self.update_stacked::<5>(measurement, gate),
            6 => self.update_stacked::<6>(measurement, gate),
            _ => Err(FilterError::UnsupportedMeasurement(format!(
                "{} filter cannot use {}",
                self.name(),
                measurement.name()
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

    fn angle(&self) -> FilterResult<Option<f64>> {
        Ok(Some(self.filter()?.x()[ANGLE]))
    }

    fn angle_p(&self) -> FilterResult<Option<f64>> {
        Ok(Some(self.filter()?.p()[(ANGLE, ANGLE)]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::linalg::{Vector1, Vector3};
    use crate::types::Measurement;
    use approx::assert_relative_eq;
    use std::f64::consts::PI;

    const OFFSET: f64 = 0.3;

    fn noise(variance: f64) -> NoiseModel {
        NoiseModel::Discrete { variance }
    }

    fn filter(core: AccelerationCore) -> AccelerationFilter {
        let mut filter =
            AccelerationFilter::new(core, noise(1e-4), noise(1e-8), noise(1e-10), 1.0).unwrap();
        let reset = Reset::new(
            Vector2::zeros(),
            Vector2::new(0.01, 0.01),
            Vector2::new(10.0, 2.0),
            Vector2::new(1.0, 1.0),
        )
        .with_acceleration(0.0, 4.0)
        .with_angle(0.0, 0.25);
        filter.reset(&reset).unwrap();
        filter
    }

    fn state() -> AccelerationStateVec {
        AccelerationStateVec::from_column_slice(&[1.0, 3.0, 0.5, -2.0, -1.5, 0.2, 0.7, 0.01, -0.1])
    }

    #[test]
    fn test_not_initialized() {
        let mut filter =
            AccelerationFilter::new(AccelerationCore::Ekf, noise(1.0), noise(1.0), noise(1.0), 1.0)
                .unwrap();
        assert_eq!(filter.predict(1.0), Err(FilterError::NotInitialized));
        assert_eq!(filter.position(), Err(FilterError::NotInitialized));
        assert!(AccelerationFilter::new(
            AccelerationCore::Ukf {
                sigma_points_alpha: 2.0
            },
            noise(1.0),
            noise(1.0),
            noise(1.0),
            1.0
        )
        .is_err());
    }

    #[test]
    fn test_predict_constant_acceleration() {
        for core in [
            AccelerationCore::Ekf,
            AccelerationCore::Ukf {
                sigma_points_alpha: 1.0,
            },
        ] {
            let mut filter =
                AccelerationFilter::new(core, noise(0.0), noise(0.0), noise(0.0), 1.0).unwrap();
            let reset = Reset::new(
                Vector2::new(1.0, 2.0),
                Vector2::new(1.0, 1.0),
                Vector2::new(3.0, -1.0),
                Vector2::new(1.0, 1.0),
            )
            .with_acceleration(0.5, 1.0)
            .with_angle(PI - 0.1, 0.01)
            .with_angle_speed(0.1, 1e-4);
            filter.reset(&reset).unwrap();
            filter.predict(2.0).unwrap();

            // p + v·t + a·t²/2
            assert_relative_eq!(filter.position().unwrap(), Vector2::new(8.0, 1.0), epsilon = 1e-9);
            assert_relative_eq!(filter.velocity().unwrap(), Vector2::new(4.0, 0.0), epsilon = 1e-9);
            // angle wraps past π
            assert_relative_eq!(filter.angle().unwrap().unwrap(), -PI + 0.1, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_jacobian_matches_finite_differences() {
        let observation = StackedObservation::<6>::new(vec![
            Component::Position,
            Component::Speed,
            Component::Direction,
            Component::Acceleration,
        ])
        .unwrap();
        let x = state();
        let jacobian = observation.jacobian(&x);

        let step = 1e-6;
        for j in 0..N {
            let mut plus = x;
            let mut minus = x;
            plus[j] += step;
            minus[j] -= step;
            let column = (observation.h(&plus) - observation.h(&minus)) / (2.0 * step);
            for i in 0..6 {
                assert_relative_eq!(jacobian[(i, j)], column[i], epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_stacked_observation_layout() {
        assert!(StackedObservation::<3>::new(vec![Component::Position]).is_err());

        let observation =
            StackedObservation::<3>::new(vec![Component::Speed, Component::Acceleration]).unwrap();
        assert_eq!(observation.direction, None);
        let x = state();
        let (sin, cos) = 0.7f64.sin_cos();
        assert_relative_eq!(
            observation.h(&x),
            Vector3::new(3.0f64.hypot(-1.5), 0.5 * cos - 0.2 * sin, 0.5 * sin + 0.2 * cos),
            epsilon = 1e-12
        );

        let observation =
            StackedObservation::<3>::new(vec![Component::Position, Component::Direction]).unwrap();
        assert_eq!(observation.direction, Some(2));
        let r = observation.residual(
            &Vector3::new(1.0, 1.0, PI - 0.1),
            &Vector3::new(0.0, 0.0, -PI + 0.1),
        );
        assert_relative_eq!(r, Vector3::new(1.0, 1.0, -0.2), epsilon = 1e-12);
    }

    #[test]
    fn test_space_wraps_angles() {
        let mut a = AccelerationStateVec::zeros();
        a[ANGLE] = PI - 0.1;
        a[ANGLE_R] = -PI + 0.1;
        let mut b = AccelerationStateVec::zeros();
        b[0] = 1.0;
        b[ANGLE] = 0.2;
        b[ANGLE_R] = -0.2;
        let sum = AccelerationSpace.add(&a, &b);
        assert_relative_eq!(sum[ANGLE], -PI + 0.1, epsilon = 1e-12);
        assert_relative_eq!(sum[ANGLE_R], PI - 0.1, epsilon = 1e-12);
        let diff = AccelerationSpace.subtract(&sum, &a);
        assert_relative_eq!(diff, b, epsilon = 1e-12);
    }

    #[test]
    fn test_estimates_acceleration_and_angles() {
        let v0 = Vector2::new(10.0, 2.0);
        let a = Vector2::new(1.0, 0.5);
        let (sin, cos) = OFFSET.sin_cos();
        let measured_a = Vector2::new(a.x * cos - a.y * sin, a.x * sin + a.y * cos);

        for core in [
            AccelerationCore::Ekf,
            AccelerationCore::Ukf {
                sigma_points_alpha: 1.0,
            },
        ] {
            let mut filter = filter(core);
            for i in 1..=30 {
                let t = i as f64;
                let position = v0 * t + a * (t * t / 2.0);
                let velocity = v0 + a * t;
                let kind = MeasurementKind::PositionSpeedDirectionAcceleration {
                    position: Measurement::new(position, Vector2::repeat(0.01)),
                    speed: Measurement::scalar(velocity.norm(), 0.01),
                    direction: Measurement::scalar(
                        wrap_angle(velocity.y.atan2(velocity.x) + OFFSET),
                        1e-4,
                    ),
                    acceleration: Measurement::new(measured_a, Vector2::repeat(0.01)),
                };
                filter.predict(1.0).unwrap();
                let update = filter.update(&kind, None).unwrap();
                assert_eq!(update.dimension(), 6);
            }

            let name = filter.name().to_string();
            assert_relative_eq!(filter.acceleration().unwrap(), a, epsilon = 0.05);
            assert_relative_eq!(filter.velocity().unwrap(), v0 + a * 30.0, epsilon = 0.05);
            assert!(
                (filter.angle().unwrap().unwrap() - OFFSET).abs() < 0.02,
                "{name} angle {:?}",
                filter.angle()
            );
            assert!(filter.angle_r().unwrap().abs() < 0.02, "{name}");
        }
    }

    #[test]
    fn test_every_kind_dimension() {
        let mut filter = filter(AccelerationCore::Ekf);
        filter.predict(1.0).unwrap();
        let mut m = crate::types::Measurements::at(1.0);
        m.position = Some(Measurement::new(Vector2::new(10.0, 2.0), Vector2::repeat(1.0)));
        m.speed = Some(Measurement::scalar(10.2, 1.0));
        m.direction = Some(Measurement::scalar(0.2, 0.1));
        m.acceleration = Some(Measurement::new(Vector2::zeros(), Vector2::repeat(1.0)));

        let kinds = MeasurementKind::candidates(&m);
        assert_eq!(kinds.len(), 15);
        for kind in &kinds {
            assert!(filter.accepts(kind));
            let update = filter.clone().update(kind, None).unwrap();
            assert_eq!(update.dimension(), kind.dimension(), "{}", kind.name());
        }

        let velocity = MeasurementKind::Velocity(Measurement::new(
            Vector2::new(10.0, 2.0),
            Vector2::repeat(0.1),
        ));
        let update = filter.update(&velocity, None).unwrap();
        assert_eq!(update.residual.len(), 2);
    }

    #[test]
    fn test_gate_leaves_state_unchanged() {
        let mut filter = filter(AccelerationCore::Ukf {
            sigma_points_alpha: 1.0,
        });
        filter.predict(1.0).unwrap();
        let before = (filter.position().unwrap(), filter.position_p().unwrap());
        let kind = MeasurementKind::Direction(Measurement::scalar(2.5, 1e-6));
        let update = filter.update(&kind, Some(9.0)).unwrap();
        assert!(update.gated);
        assert_eq!((filter.position().unwrap(), filter.position_p().unwrap()), before);

        let speed = MeasurementKind::Speed(Measurement {
            value: Vector1::new(1.0),
            variance: Vector1::new(-1.0),
        });
        assert!(filter.update(&speed, None).is_err());
    }
}
