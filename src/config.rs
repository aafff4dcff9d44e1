//! Filter and simulation configuration
//!
//! Loaded from JSON; every field is optional and falls back to
//! [`Default`].

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{check_non_negative, check_positive, FilterError, FilterResult};
use crate::filters::{
    AccelerationCore, AccelerationFilter, DirectionFilter, PositionFilter, SpeedFilter,
    TrackerSettings,
};
use crate::noise::NoiseModel;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub tracker: TrackerSettings,
    /// Covariance inflation per predict, at least 1
    pub fading_memory_alpha: f64,
    /// H-infinity bound for the position filter
    pub theta: Option<f64>,
    /// Sigma point spread of the UKF filters, in (0, 1]
    pub sigma_points_alpha: f64,
    pub position_noise: NoiseModel,
    pub angle_noise: NoiseModel,
    /// Per-axis jerk impulse variance of the speed filter
    pub speed_process_variance: f64,
    /// Per-axis jerk noise of the acceleration filters
    pub acceleration_noise: NoiseModel,
    /// Noise on the direction bias of the acceleration filters
    pub angle_r_noise: NoiseModel,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            tracker: TrackerSettings::default(),
            fading_memory_alpha: 1.0,
            theta: None,
            sigma_points_alpha: 1.0,
            position_noise: NoiseModel::Discrete { variance: 1.0 },
            angle_noise: NoiseModel::Discrete {
                variance: 0.001f64.to_radians().powi(2),
            },
            speed_process_variance: 1.0,
            acceleration_noise: NoiseModel::Discrete { variance: 1.0 },
            angle_r_noise: NoiseModel::Discrete {
                variance: 0.001f64.to_radians().powi(2),
            },
        }
    }
}

impl FilterConfig {
    pub fn position_filter(&self) -> FilterResult<PositionFilter> {
        PositionFilter::new(self.position_noise, self.fading_memory_alpha, self.theta)
    }

    pub fn speed_filter(&self) -> FilterResult<SpeedFilter> {
        SpeedFilter::new(
            self.speed_process_variance,
            self.fading_memory_alpha,
            self.sigma_points_alpha,
        )
    }

    pub fn direction_filter(&self) -> FilterResult<DirectionFilter> {
        DirectionFilter::new(
            self.position_noise,
            self.angle_noise,
            self.fading_memory_alpha,
            self.sigma_points_alpha,
        )
    }

    pub fn acceleration_filter(&self, core: AccelerationCore) -> FilterResult<AccelerationFilter> {
        AccelerationFilter::new(
            core,
            self.acceleration_noise,
            self.angle_noise,
            self.angle_r_noise,
            self.fading_memory_alpha,
        )
    }

    /// EKF and UKF cores of the acceleration filter
    pub fn acceleration_cores(&self) -> [AccelerationCore; 2] {
        [
            AccelerationCore::Ekf,
            AccelerationCore::Ukf {
                sigma_points_alpha: self.sigma_points_alpha,
            },
        ]
    }

    /// Builds every filter once so that invalid values fail early.
    pub fn check(&self) -> FilterResult<()> {
        self.tracker.check()?;
        self.position_filter()?;
        self.speed_filter()?;
        self.direction_filter()?;
        for core in self.acceleration_cores() {
            self.acceleration_filter(core)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub seed: u64,
    /// Track length [s]
    pub duration: f64,
    /// Sample period [s]
    pub dt: f64,
    /// Speed range [m/s]
    pub min_speed: f64,
    pub max_speed: f64,
    /// Largest turn rate [rad/s]
    pub max_turn_rate: f64,
    /// Time over which speed and turn rate targets are held [s]
    pub segment_duration: f64,
    /// Offset of the measured direction from the velocity direction [rad]
    pub direction_offset: f64,
    /// Drift rate of that offset [rad/s]
    pub direction_offset_rate: f64,
    /// Time between position fixes [s]
    pub position_interval: f64,
    pub position_sigma: f64,
    pub speed_sigma: f64,
    pub direction_sigma: f64,
    /// Acceleration noise per sensor axis [m/s²]
    pub acceleration_sigma: f64,
    /// Probability that a position fix is an outlier
    pub outlier_probability: f64,
    /// Outlier displacement [m]
    pub outlier_distance: f64,
    /// Interval between written track points [s]
    pub output_interval: f64,
    pub filter: FilterConfig,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            duration: 600.0,
            dt: 0.1,
            min_speed: 3.0,
            max_speed: 30.0,
            max_turn_rate: 10f64.to_radians(),
            segment_duration: 20.0,
            direction_offset: 10f64.to_radians(),
            direction_offset_rate: 0.01f64.to_radians(),
            position_interval: 1.0,
            position_sigma: 5.0,
            speed_sigma: 0.5,
            direction_sigma: 2f64.to_radians(),
            acceleration_sigma: 0.5,
            outlier_probability: 0.01,
            outlier_distance: 500.0,
            output_interval: 1.0,
            filter: FilterConfig::default(),
        }
    }
}

impl SimulationConfig {
    pub fn from_json_file(path: &Path) -> FilterResult<Self> {
        let file = File::open(path)?;
        let config: Self = serde_json::from_reader(BufReader::new(file))?;
        config.check()?;
        Ok(config)
    }

    pub fn from_json_str(text: &str) -> FilterResult<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.check()?;
        Ok(config)
    }

    pub fn check(&self) -> FilterResult<()> {
        check_positive("duration", self.duration)?;
        check_positive("dt", self.dt)?;
        check_non_negative("min speed", self.min_speed)?;
        check_positive("max speed", self.max_speed)?;
        if self.min_speed > self.max_speed {
            return Err(FilterError::Config(format!(
                "min speed {} exceeds max speed {}",
                self.min_speed, self.max_speed
            )));
        }
        check_non_negative("max turn rate", self.max_turn_rate)?;
        check_positive("segment duration", self.segment_duration)?;
        check_non_negative("direction offset rate", self.direction_offset_rate)?;
        check_positive("position interval", self.position_interval)?;
        check_positive("position sigma", self.position_sigma)?;
        check_positive("speed sigma", self.speed_sigma)?;
        check_positive("direction sigma", self.direction_sigma)?;
        check_positive("acceleration sigma", self.acceleration_sigma)?;
        if !(0.0..=1.0).contains(&self.outlier_probability) {
            return Err(FilterError::Config(format!(
                "outlier probability must be in [0, 1]: {}",
                self.outlier_probability
            )));
        }
        check_non_negative("outlier distance", self.outlier_distance)?;
        check_positive("output interval", self.output_interval)?;
        self.filter.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert!(FilterConfig::default().check().is_ok());
        assert!(SimulationConfig::default().check().is_ok());
    }

    #[test]
    fn test_partial_json() {
        let config = SimulationConfig::from_json_str(
            r#"{
                "seed": 7,
                "filter": {
                    "tracker": { "gate": 25.0 },
                    "position_noise": { "type": "continuous", "spectral_density": 0.5 }
                }
            }"#,
        )
        .unwrap();

        assert_eq!(config.seed, 7);
        assert_eq!(config.dt, SimulationConfig::default().dt);
        assert_eq!(config.filter.tracker.gate, Some(25.0));
        assert_eq!(config.filter.tracker.reset_dt, 10.0);
        assert_eq!(config.filter.tracker.measurement_queue_size, 1);
        assert_eq!(config.filter.acceleration_noise, FilterConfig::default().acceleration_noise);
        assert_eq!(
            config.filter.position_noise,
            NoiseModel::Continuous {
                spectral_density: 0.5
            }
        );
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            SimulationConfig::from_json_str("{ \"dt\": \"fast\" }"),
            Err(FilterError::Config(_))
        ));
        assert!(matches!(
            SimulationConfig::from_json_str("{ \"dt\": -1.0 }"),
            Err(FilterError::InvalidArgument(_))
        ));
        assert!(matches!(
            SimulationConfig::from_json_str("{ \"min_speed\": 50.0 }"),
            Err(FilterError::Config(_))
        ));
        assert!(SimulationConfig::from_json_str(
            r#"{ "filter": { "sigma_points_alpha": 2.0 } }"#
        )
        .is_err());
        assert!(SimulationConfig::from_json_str(
            r#"{ "filter": { "tracker": { "measurement_queue_size": 0 } } }"#
        )
        .is_err());
        assert!(SimulationConfig::from_json_str(r#"{ "acceleration_sigma": 0.0 }"#).is_err());
    }

    #[test]
    fn test_missing_file() {
        assert!(matches!(
            SimulationConfig::from_json_file(Path::new("/nonexistent/config.json")),
            Err(FilterError::Io(_))
        ));
    }
}
