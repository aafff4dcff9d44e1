//! 2D motion filters
//!
//! Generic EKF / UKF cores plus the concrete position, speed, direction
//! and acceleration filters behind the [`MotionFilter`] trait, the
//! [`Tracker`] that drives one of them from timestamped measurements, and
//! RTS smoothing of recorded EKF steps.

pub mod acceleration;
pub mod consistency;
pub mod direction;
pub mod ekf;
pub mod observation;
pub mod position;
pub mod queue;
pub mod smooth;
pub mod speed;
pub mod tracker;
pub mod ukf;
pub mod update_info;

pub use acceleration::{AccelerationCore, AccelerationFilter};
pub use consistency::{Nees, Nis, NormalizedSquared};
pub use direction::DirectionFilter;
pub use ekf::Ekf;
pub use observation::{Euclidean, Linearized, Observation, StateSpace};
pub use position::PositionFilter;
pub use queue::MeasurementQueue;
pub use speed::SpeedFilter;
pub use tracker::{TrackPoint, Tracker, TrackerSettings};
pub use ukf::{SigmaPoints, Ukf};
pub use update_info::{UpdateInfo, UpdateOptions};

use nalgebra::{DVector, SVector};
use serde::Serialize;

use crate::error::{check_finite, check_positive, FilterError, FilterResult};
use crate::types::{Matrix2, Measurement, Measurements, Vector2, Vector3, Vector4};

/// Initial state of a filter.
///
/// Position and velocity come from the caller; the remaining components
/// have defaults that the filters without them ignore.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Reset {
    pub position: Vector2,
    pub position_variance: Vector2,
    pub velocity: Vector2,
    pub velocity_variance: Vector2,
    /// Per-axis acceleration [m/s²]
    pub acceleration: f64,
    pub acceleration_variance: f64,
    /// Offset of the measured direction from the velocity direction [rad]
    pub angle: f64,
    pub angle_variance: f64,
    /// [rad/s]
    pub angle_speed: f64,
    pub angle_speed_variance: f64,
    /// Constant direction bias on top of `angle` [rad]
    pub angle_r: f64,
    pub angle_r_variance: f64,
}

impl Reset {
    pub fn new(
        position: Vector2,
        position_variance: Vector2,
        velocity: Vector2,
        velocity_variance: Vector2,
    ) -> Self {
        Self {
            position,
            position_variance,
            velocity,
            velocity_variance,
            acceleration: 0.0,
            acceleration_variance: 10.0 * 10.0,
            angle: 0.0,
            angle_variance: 100f64.to_radians().powi(2),
            angle_speed: 0.0,
            angle_speed_variance: 1f64.to_radians().powi(2),
            angle_r: 0.0,
            angle_r_variance: 10f64.to_radians().powi(2),
        }
    }

    pub fn with_acceleration(mut self, acceleration: f64, variance: f64) -> Self {
        self.acceleration = acceleration;
        self.acceleration_variance = variance;
        self
    }

    pub fn with_angle(mut self, angle: f64, variance: f64) -> Self {
        self.angle = angle;
        self.angle_variance = variance;
        self
    }

    pub fn with_angle_speed(mut self, angle_speed: f64, variance: f64) -> Self {
        self.angle_speed = angle_speed;
        self.angle_speed_variance = variance;
        self
    }

    pub fn with_angle_r(mut self, angle_r: f64, variance: f64) -> Self {
        self.angle_r = angle_r;
        self.angle_r_variance = variance;
        self
    }

    pub fn check(&self) -> FilterResult<()> {
        Measurement::new(self.position, self.position_variance).check("reset position")?;
        Measurement::new(self.velocity, self.velocity_variance).check("reset velocity")?;
        check_finite("reset acceleration", self.acceleration)?;
        check_positive("reset acceleration variance", self.acceleration_variance)?;
        check_finite("reset angle", self.angle)?;
        check_positive("reset angle variance", self.angle_variance)?;
        check_finite("reset angle speed", self.angle_speed)?;
        check_positive("reset angle speed variance", self.angle_speed_variance)?;
        check_finite("reset angle r", self.angle_r)?;
        check_positive("reset angle r variance", self.angle_r_variance)
    }
}

/// Building block of a stacked measurement, in stacking order
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Component {
    Position,
    Speed,
    Direction,
    Acceleration,
    Velocity,
}

impl Component {
    pub const fn size(self) -> usize {
        match self {
            Component::Speed | Component::Direction => 1,
            Component::Position | Component::Acceleration | Component::Velocity => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Component::Position => "position",
            Component::Speed => "speed",
            Component::Direction => "direction",
            Component::Acceleration => "acceleration",
            Component::Velocity => "velocity",
        }
    }
}

/// Measurement set for one update. Composite kinds are fused as one
/// stacked vector so that `S` keeps the cross terms.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum MeasurementKind {
    Position(Measurement<2>),
    PositionSpeed {
        position: Measurement<2>,
        speed: Measurement<1>,
    },
    PositionSpeedDirection {
        position: Measurement<2>,
        speed: Measurement<1>,
        direction: Measurement<1>,
    },
    PositionDirection {
        position: Measurement<2>,
        direction: Measurement<1>,
    },
    SpeedDirection {
        speed: Measurement<1>,
        direction: Measurement<1>,
    },
    Direction(Measurement<1>),
    Speed(Measurement<1>),
    Velocity(Measurement<2>),
    PositionSpeedDirectionAcceleration {
        position: Measurement<2>,
        speed: Measurement<1>,
        direction: Measurement<1>,
        acceleration: Measurement<2>,
    },
    PositionSpeedAcceleration {
        position: Measurement<2>,
        speed: Measurement<1>,
        acceleration: Measurement<2>,
    },
    PositionDirectionAcceleration {
        position: Measurement<2>,
        direction: Measurement<1>,
        acceleration: Measurement<2>,
    },
    PositionAcceleration {
        position: Measurement<2>,
        acceleration: Measurement<2>,
    },
    SpeedDirectionAcceleration {
        speed: Measurement<1>,
        direction: Measurement<1>,
        acceleration: Measurement<2>,
    },
    SpeedAcceleration {
        speed: Measurement<1>,
        acceleration: Measurement<2>,
    },
    DirectionAcceleration {
        direction: Measurement<1>,
        acceleration: Measurement<2>,
    },
    Acceleration(Measurement<2>),
}

/// Value and variance slices of one component
pub type Part<'a> = (Component, &'a [f64], &'a [f64]);

fn part<const N: usize>(component: Component, m: &Measurement<N>) -> Part<'_> {
    (component, m.value.as_slice(), m.variance.as_slice())
}

impl MeasurementKind {
    pub fn name(&self) -> &'static str {
        match self {
            MeasurementKind::Position(_) => "position",
            MeasurementKind::PositionSpeed { .. } => "position speed",
            MeasurementKind::PositionSpeedDirection { .. } => "position speed direction",
            MeasurementKind::PositionDirection { .. } => "position direction",
            MeasurementKind::SpeedDirection { .. } => "speed direction",
            MeasurementKind::Direction(_) => "direction",
            MeasurementKind::Speed(_) => "speed",
            MeasurementKind::Velocity(_) => "velocity",
            MeasurementKind::PositionSpeedDirectionAcceleration { .. } => {
                "position speed direction acceleration"
            }
            MeasurementKind::PositionSpeedAcceleration { .. } => "position speed acceleration",
            MeasurementKind::PositionDirectionAcceleration { .. } => {
                "position direction acceleration"
            }
            MeasurementKind::PositionAcceleration { .. } => "position acceleration",
            MeasurementKind::SpeedDirectionAcceleration { .. } => "speed direction acceleration",
            MeasurementKind::SpeedAcceleration { .. } => "speed acceleration",
            MeasurementKind::DirectionAcceleration { .. } => "direction acceleration",
            MeasurementKind::Acceleration(_) => "acceleration",
        }
    }

    /// Components in stacking order.
    pub fn parts(&self) -> Vec<Part<'_>> {
        use Component as C;
        match self {
            MeasurementKind::Position(p) => vec![part(C::Position, p)],
            MeasurementKind::PositionSpeed { position, speed } => {
                vec![part(C::Position, position), part(C::Speed, speed)]
            }
            MeasurementKind::PositionSpeedDirection {
                position,
                speed,
                direction,
            } => vec![
                part(C::Position, position),
                part(C::Speed, speed),
                part(C::Direction, direction),
            ],
            MeasurementKind::PositionDirection {
                position,
                direction,
            } => vec![part(C::Position, position), part(C::Direction, direction)],
            MeasurementKind::SpeedDirection { speed, direction } => {
                vec![part(C::Speed, speed), part(C::Direction, direction)]
            }
            MeasurementKind::Direction(d) => vec![part(C::Direction, d)],
            MeasurementKind::Speed(s) => vec![part(C::Speed, s)],
            MeasurementKind::Velocity(v) => vec![part(C::Velocity, v)],
            MeasurementKind::PositionSpeedDirectionAcceleration {
                position,
                speed,
                direction,
                acceleration,
            } => vec![
                part(C::Position, position),
                part(C::Speed, speed),
                part(C::Direction, direction),
                part(C::Acceleration, acceleration),
            ],
            MeasurementKind::PositionSpeedAcceleration {
                position,
                speed,
                acceleration,
            } => vec![
                part(C::Position, position),
                part(C::Speed, speed),
                part(C::Acceleration, acceleration),
            ],
            MeasurementKind::PositionDirectionAcceleration {
                position,
                direction,
                acceleration,
            } => vec![
                part(C::Position, position),
                part(C::Direction, direction),
                part(C::Acceleration, acceleration),
            ],
            MeasurementKind::PositionAcceleration {
                position,
                acceleration,
            } => vec![
                part(C::Position, position),
                part(C::Acceleration, acceleration),
            ],
            MeasurementKind::SpeedDirectionAcceleration {
                speed,
                direction,
                acceleration,
            } => vec![
                part(C::Speed, speed),
                part(C::Direction, direction),
                part(C::Acceleration, acceleration),
            ],
            MeasurementKind::SpeedAcceleration {
                speed,
                acceleration,
            } => vec![part(C::Speed, speed), part(C::Acceleration, acceleration)],
            MeasurementKind::DirectionAcceleration {
                direction,
                acceleration,
            } => vec![
                part(C::Direction, direction),
                part(C::Acceleration, acceleration),
            ],
            MeasurementKind::Acceleration(a) => vec![part(C::Acceleration, a)],
        }
    }

    pub fn components(&self) -> Vec<Component> {
        self.parts().into_iter().map(|(c, _, _)| c).collect()
    }

    /// Length of the stacked measurement vector
    pub fn dimension(&self) -> usize {
        self.parts().iter().map(|(c, _, _)| c.size()).sum()
    }

    pub fn has_position(&self) -> bool {
        self.parts().iter().any(|(c, _, _)| *c == Component::Position)
    }

    pub fn has_acceleration(&self) -> bool {
        self.parts().iter().any(|(c, _, _)| *c == Component::Acceleration)
    }

    /// Finite values, finite positive variances
    pub fn check(&self) -> FilterResult<()> {
        for (component, value, variance) in self.parts() {
            for v in value {
                check_finite(component.name(), *v)?;
            }
            for v in variance {
                check_positive(component.name(), *v)?;
            }
        }
        Ok(())
    }

    /// Stacked value and variance in component order
    pub fn stack<const M: usize>(&self) -> FilterResult<Measurement<M>> {
        let parts = self.parts();
        let values: Vec<f64> = parts.iter().flat_map(|(_, v, _)| v.iter().copied()).collect();
        let variances: Vec<f64> = parts.iter().flat_map(|(_, _, v)| v.iter().copied()).collect();
        if values.len() != M {
            return Err(FilterError::InvalidArgument(format!(
                "{} has {} values, expected {M}",
                self.name(),
                values.len()
            )));
        }
        Ok(Measurement::new(
            SVector::<f64, M>::from_column_slice(&values),
            SVector::<f64, M>::from_column_slice(&variances),
        ))
    }

    /// Kinds that can be formed from `measurements`, richest first. Kinds
    /// with acceleration precede the same kinds without it.
    pub fn candidates(measurements: &Measurements) -> Vec<MeasurementKind> {
        let mut res = Vec::new();
        let (position, speed, direction, acceleration) = (
            measurements.position,
            measurements.speed,
            measurements.direction,
            measurements.acceleration,
        );

        if let Some(position) = position {
            if let Some(acceleration) = acceleration {
                if let (Some(speed), Some(direction)) = (speed, direction) {
                    res.push(MeasurementKind::PositionSpeedDirectionAcceleration {
                        position,
                        speed,
                        direction,
                        acceleration,
                    });
                }
                if let Some(speed) = speed {
                    res.push(MeasurementKind::PositionSpeedAcceleration {
                        position,
                        speed,
                        acceleration,
                    });
                }
                if let Some(direction) = direction {
                    res.push(MeasurementKind::PositionDirectionAcceleration {
                        position,
                        direction,
                        acceleration,
                    });
                }
                res.push(MeasurementKind::PositionAcceleration {
                    position,
                    acceleration,
                });
            }
            if let (Some(speed), Some(direction)) = (speed, direction) {
                res.push(MeasurementKind::PositionSpeedDirection {
                    position,
                    speed,
                    direction,
                });
            }
            if let Some(speed) = speed {
                res.push(MeasurementKind::PositionSpeed { position, speed });
            }
            if let Some(direction) = direction {
                res.push(MeasurementKind::PositionDirection {
                    position,
                    direction,
                });
            }
            res.push(MeasurementKind::Position(position));
        }

        if let Some(acceleration) = acceleration {
            if let (Some(speed), Some(direction)) = (speed, direction) {
                res.push(MeasurementKind::SpeedDirectionAcceleration {
                    speed,
                    direction,
                    acceleration,
                });
            }
            if let Some(speed) = speed {
                res.push(MeasurementKind::SpeedAcceleration {
                    speed,
                    acceleration,
                });
            }
            if let Some(direction) = direction {
                res.push(MeasurementKind::DirectionAcceleration {
                    direction,
                    acceleration,
                });
            }
        }
        if let (Some(speed), Some(direction)) = (speed, direction) {
            res.push(MeasurementKind::SpeedDirection { speed, direction });
        }
        if let Some(speed) = speed {
            res.push(MeasurementKind::Speed(speed));
        }
        if let Some(direction) = direction {
            res.push(MeasurementKind::Direction(direction));
        }
        if let Some(acceleration) = acceleration {
            res.push(MeasurementKind::Acceleration(acceleration));
        }
        res
    }
}

pub(crate) fn stack_position_speed(position: &Measurement<2>, speed: &Measurement<1>) -> Measurement<3> {
    let (p, s) = (position, speed);
    Measurement::new(
        Vector3::new(p.value[0], p.value[1], s.value[0]),
        Vector3::new(p.variance[0], p.variance[1], s.variance[0]),
    )
}

pub(crate) fn stack_position_direction(
    position: &Measurement<2>,
    direction: &Measurement<1>,
) -> Measurement<3> {
    stack_position_speed(position, direction)
}

pub(crate) fn stack_position_speed_direction(
    position: &Measurement<2>,
    speed: &Measurement<1>,
    direction: &Measurement<1>,
) -> Measurement<4> {
    let (p, s, d) = (position, speed, direction);
    Measurement::new(
        Vector4::new(p.value[0], p.value[1], s.value[0], d.value[0]),
        Vector4::new(p.variance[0], p.variance[1], s.variance[0], d.variance[0]),
    )
}

pub(crate) fn stack_speed_direction(speed: &Measurement<1>, direction: &Measurement<1>) -> Measurement<2> {
    Measurement::new(
        Vector2::new(speed.value[0], direction.value[0]),
        Vector2::new(speed.variance[0], direction.variance[0]),
    )
}

/// Dimension-erased [`UpdateInfo`]
#[derive(Clone, Debug, PartialEq)]
pub struct MeasurementUpdate {
    pub residual: DVector<f64>,
    pub normalized_innovation_squared: f64,
    pub gated: bool,
}

impl MeasurementUpdate {
    pub fn dimension(&self) -> usize {
        self.residual.len()
    }
}

impl<const M: usize> From<UpdateInfo<M>> for MeasurementUpdate {
    fn from(info: UpdateInfo<M>) -> Self {
        Self {
            residual: DVector::from_column_slice(info.residual.as_slice()),
            normalized_innovation_squared: info.normalized_innovation_squared,
            gated: info.gated,
        }
    }
}

/// Filter outputs for display and run summaries
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FilterSnapshot {
    pub position: (f64, f64),
    pub position_variance: (f64, f64),
    pub velocity: (f64, f64),
    pub speed: f64,
    pub speed_variance: f64,
    pub angle: Option<f64>,
    pub angle_variance: Option<f64>,
}

/// First-order variance of `|v|`: `Jᵀ·P·J` with `J = v / |v|`.
/// At zero velocity the direction is unknown and the mean axis variance
/// is used.
pub fn compute_speed_p(velocity: &Vector2, velocity_p: &Matrix2) -> f64 {
    let speed = velocity.norm();
    if speed <= f64::EPSILON {
        return velocity_p.trace() / 2.0;
    }
    let j = velocity / speed;
    j.dot(&(velocity_p * j))
}

/// Common interface of the 2D motion filters.
///
/// Every call before [`MotionFilter::reset`] fails with `NotInitialized`.
pub trait MotionFilter: Send {
    fn name(&self) -> &str;

    fn reset(&mut self, reset: &Reset) -> FilterResult<()>;

    /// Advances the state by `dt` seconds (`dt >= 0`).
    fn predict(&mut self, dt: f64) -> FilterResult<()>;

    /// Whether [`MotionFilter::update`] handles this kind.
    fn accepts(&self, measurement: &MeasurementKind) -> bool;

    /// Fuses the measurement unless its normalized innovation squared
    /// exceeds `gate`. Kinds the filter cannot observe fail with
    /// `UnsupportedMeasurement`.
    fn update(
        &mut self,
        measurement: &MeasurementKind,
        gate: Option<f64>,
    ) -> FilterResult<MeasurementUpdate>;

    fn position(&self) -> FilterResult<Vector2>;

    fn position_p(&self) -> FilterResult<Matrix2>;

    fn velocity(&self) -> FilterResult<Vector2>;

    fn velocity_p(&self) -> FilterResult<Matrix2>;

    fn speed(&self) -> FilterResult<f64> {
        Ok(self.velocity()?.norm())
    }

    fn speed_p(&self) -> FilterResult<f64> {
        Ok(compute_speed_p(&self.velocity()?, &self.velocity_p()?))
    }

    /// Direction offset, for filters that estimate one
    fn angle(&self) -> FilterResult<Option<f64>> {
        self.position().map(|_| None)
    }

    fn angle_p(&self) -> FilterResult<Option<f64>> {
        self.position().map(|_| None)
    }

    fn snapshot(&self) -> FilterResult<FilterSnapshot> {
        let position = self.position()?;
        let position_p = self.position_p()?;
        let velocity = self.velocity()?;
        Ok(FilterSnapshot {
            position: (position.x, position.y),
            position_variance: (position_p[(0, 0)], position_p[(1, 1)]),
            velocity: (velocity.x, velocity.y),
            speed: self.speed()?,
            speed_variance: self.speed_p()?,
            angle: self.angle()?,
            angle_variance: self.angle_p()?,
        })
    }
}
