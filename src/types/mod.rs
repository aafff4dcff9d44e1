pub mod linalg;

pub use linalg::*;

use nalgebra::SVector;

use crate::error::FilterResult;

/// Measured value with per-component variance
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Measurement<const N: usize> {
    pub value: SVector<f64, N>,
    pub variance: SVector<f64, N>,
}

impl<const N: usize> Measurement<N> {
    pub fn new(value: SVector<f64, N>, variance: SVector<f64, N>) -> Self {
        Self { value, variance }
    }

    /// Finite value, finite positive variance
    pub fn check(&self, name: &str) -> FilterResult<()> {
        check_vector(name, &self.value)?;
        check_variance(name, &self.variance)
    }
}

impl Measurement<1> {
    pub fn scalar(value: f64, variance: f64) -> Self {
        Self::new(Vector1::new(value), Vector1::new(variance))
    }
}

/// Ground truth attached to simulated samples
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrueState {
    pub position: Vector2,
    pub velocity: Vector2,
    /// Offset between measured direction and velocity direction [rad]
    pub angle: f64,
}

impl TrueState {
    pub fn speed(&self) -> f64 {
        self.velocity.norm()
    }
}

/// Everything available at one timestamp
#[derive(Clone, Debug, PartialEq)]
pub struct Measurements {
    /// Time [seconds]
    pub time: f64,
    pub position: Option<Measurement<2>>,
    /// Speed [m/s]
    pub speed: Option<Measurement<1>>,
    /// Direction of motion [rad]
    pub direction: Option<Measurement<1>>,
    /// Acceleration in the sensor frame [m/s²]
    pub acceleration: Option<Measurement<2>>,
    pub truth: Option<TrueState>,
}

impl Measurements {
    pub fn at(time: f64) -> Self {
        Self {
            time,
            position: None,
            speed: None,
            direction: None,
            acceleration: None,
            truth: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measurement_check() {
        let m = Measurement::new(Vector2::new(1.0, 2.0), Vector2::new(0.1, 0.1));
        assert!(m.check("position").is_ok());

        let m = Measurement::new(Vector2::new(1.0, 2.0), Vector2::new(0.1, -0.1));
        assert!(m.check("position").is_err());

        let m = Measurement::scalar(f64::INFINITY, 1.0);
        assert!(m.check("speed").is_err());
    }
}
