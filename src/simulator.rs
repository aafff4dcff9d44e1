//! Synthetic planar track generator
//!
//! A vehicle holds a random target speed and turn rate per segment and
//! eases its speed toward the target. Every sample carries the true state,
//! a noisy speed, a noisy direction of motion and a noisy acceleration in
//! the sensor frame; positions arrive every `position_interval` and are
//! occasionally displaced as outliers.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use crate::attitude::angle::wrap_angle;
use crate::config::SimulationConfig;
use crate::error::{FilterError, FilterResult};
use crate::types::{Measurement, Measurements, TrueState, Vector2};

/// Largest speed change toward the segment target [m/s²]
const MAX_ACCELERATION: f64 = 1.0;

fn normal(sigma: f64) -> FilterResult<Normal<f64>> {
    Normal::new(0.0, sigma)
        .map_err(|e| FilterError::InvalidArgument(format!("noise sigma {sigma}: {e}")))
}

pub struct Simulator {
    config: SimulationConfig,
    rng: StdRng,
    position_noise: Normal<f64>,
    speed_noise: Normal<f64>,
    direction_noise: Normal<f64>,
    acceleration_noise: Normal<f64>,
}

impl Simulator {
    pub fn new(config: SimulationConfig) -> FilterResult<Self> {
        config.check()?;
        Ok(Self {
            rng: StdRng::seed_from_u64(config.seed),
            position_noise: normal(config.position_sigma)?,
            speed_noise: normal(config.speed_sigma)?,
            direction_noise: normal(config.direction_sigma)?,
            acceleration_noise: normal(config.acceleration_sigma)?,
            config,
        })
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    /// Samples from `dt` to `duration`, one per `dt`.
    pub fn run(&mut self) -> Vec<Measurements> {
        let c = self.config.clone();
        let steps = (c.duration / c.dt).floor() as usize;
        let position_every = ((c.position_interval / c.dt).round() as usize).max(1);
        let segment_steps = ((c.segment_duration / c.dt).round() as usize).max(1);

        let mut position = Vector2::zeros();
        let mut heading = self.rng.gen_range(-std::f64::consts::PI..std::f64::consts::PI);
        let mut speed = self.rng.gen_range(c.min_speed..=c.max_speed);
        let mut target_speed = speed;
        let mut turn_rate = 0.0;
        let mut velocity = Vector2::new(heading.cos(), heading.sin()) * speed;

        let mut samples = Vec::with_capacity(steps);
        for step in 1..=steps {
            let time = step as f64 * c.dt;
            if (step - 1) % segment_steps == 0 {
                target_speed = self.rng.gen_range(c.min_speed..=c.max_speed);
                turn_rate = self.rng.gen_range(-c.max_turn_rate..=c.max_turn_rate);
            }

            let max_change = MAX_ACCELERATION * c.dt;
            speed += (target_speed - speed).clamp(-max_change, max_change);
            heading = wrap_angle(heading + turn_rate * c.dt);
            let previous = velocity;
            velocity = Vector2::new(heading.cos(), heading.sin()) * speed;
            position += velocity * c.dt;

            let truth = TrueState {
                position,
                velocity,
                angle: wrap_angle(c.direction_offset + c.direction_offset_rate * time),
            };
            let mut sample = Measurements::at(time);
            sample.speed = Some(self.speed(&truth));
            sample.direction = Some(self.direction(&truth));
            sample.acceleration = Some(self.acceleration(&truth, &((velocity - previous) / c.dt)));
            if step % position_every == 0 {
                sample.position = Some(self.position(&truth));
            }
            sample.truth = Some(truth);
            samples.push(sample);
        }
        samples
    }

    fn position(&mut self, truth: &TrueState) -> Measurement<2> {
        let sigma = self.config.position_sigma;
        let mut value = truth.position
            + Vector2::new(
                self.position_noise.sample(&mut self.rng),
                self.position_noise.sample(&mut self.rng),
            );
        if self.rng.gen_bool(self.config.outlier_probability) {
            let bearing = self.rng.gen_range(-std::f64::consts::PI..std::f64::consts::PI);
            value += Vector2::new(bearing.cos(), bearing.sin()) * self.config.outlier_distance;
        }
        Measurement::new(value, Vector2::repeat(sigma * sigma))
    }

    fn speed(&mut self, truth: &TrueState) -> Measurement<1> {
        let sigma = self.config.speed_sigma;
        let value = truth.speed() + self.speed_noise.sample(&mut self.rng);
        Measurement::scalar(value.abs(), sigma * sigma)
    }

    fn direction(&mut self, truth: &TrueState) -> Measurement<1> {
        let sigma = self.config.direction_sigma;
        let course = truth.velocity.y.atan2(truth.velocity.x);
        let value = wrap_angle(course + truth.angle + self.direction_noise.sample(&mut self.rng));
        Measurement::scalar(value, sigma * sigma)
    }

    /// `acceleration` rotated by the direction offset
    fn acceleration(&mut self, truth: &TrueState, acceleration: &Vector2) -> Measurement<2> {
        let sigma = self.config.acceleration_sigma;
        let (sin, cos) = truth.angle.sin_cos();
        let (ax, ay) = (acceleration.x, acceleration.y);
        let value = Vector2::new(
            ax * cos - ay * sin + self.acceleration_noise.sample(&mut self.rng),
            ax * sin + ay * cos + self.acceleration_noise.sample(&mut self.rng),
        );
        Measurement::new(value, Vector2::repeat(sigma * sigma))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn config(seed: u64) -> SimulationConfig {
        SimulationConfig {
            seed,
            duration: 100.0,
            dt: 0.5,
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn test_sample_layout() {
        let samples = Simulator::new(config(1)).unwrap().run();
        assert_eq!(samples.len(), 200);
        assert_relative_eq!(samples[0].time, 0.5);
        assert_relative_eq!(samples[199].time, 100.0, epsilon = 1e-9);

        let positions = samples.iter().filter(|s| s.position.is_some()).count();
        assert_eq!(positions, 100);
        assert!(samples
            .iter()
            .all(|s| s.speed.is_some() && s.direction.is_some() && s.acceleration.is_some()));
        assert!(samples.windows(2).all(|w| w[1].time > w[0].time));
    }

    #[test]
    fn test_seed_is_deterministic() {
        let a = Simulator::new(config(3)).unwrap().run();
        let b = Simulator::new(config(3)).unwrap().run();
        let c = Simulator::new(config(4)).unwrap().run();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_truth_respects_limits() {
        let config = config(5);
        let samples = Simulator::new(config.clone()).unwrap().run();
        for s in &samples {
            let truth = s.truth.unwrap();
            assert!(truth.speed() >= config.min_speed - 1e-9);
            assert!(truth.speed() <= config.max_speed + 1e-9);
        }
    }

    #[test]
    fn test_single_step_segments_refresh_turn_rate() {
        let config = SimulationConfig {
            segment_duration: 0.5,
            ..config(6)
        };
        let samples = Simulator::new(config).unwrap().run();
        let heading = |s: &Measurements| {
            let v = s.truth.unwrap().velocity;
            v.y.atan2(v.x)
        };
        let turns: Vec<f64> = samples
            .windows(2)
            .map(|w| wrap_angle(heading(&w[1]) - heading(&w[0])))
            .collect();
        assert!(turns.iter().any(|t| t.abs() > 1e-6));
        assert!(turns.windows(2).any(|w| (w[1] - w[0]).abs() > 1e-6));
    }

    #[test]
    fn test_noise_matches_sigma() {
        let config = SimulationConfig {
            seed: 11,
            duration: 2000.0,
            dt: 1.0,
            outlier_probability: 0.0,
            ..SimulationConfig::default()
        };
        let samples = Simulator::new(config.clone()).unwrap().run();
        let errors: Vec<f64> = samples
            .iter()
            .filter_map(|s| Some(s.position?.value.x - s.truth?.position.x))
            .collect();
        let variance = errors.iter().map(|e| e * e).sum::<f64>() / errors.len() as f64;
        assert_relative_eq!(variance.sqrt(), config.position_sigma, max_relative = 0.1);
    }

    #[test]
    fn test_acceleration_in_sensor_frame() {
        let config = SimulationConfig {
            acceleration_sigma: 1e-9,
            direction_offset: 0.5,
            ..config(8)
        };
        let dt = config.dt;
        let samples = Simulator::new(config).unwrap().run();
        for w in samples.windows(2) {
            let (before, after) = (w[0].truth.unwrap(), w[1].truth.unwrap());
            let expected = (after.velocity - before.velocity) / dt;
            let measured = w[1].acceleration.unwrap().value;
            let (sin, cos) = after.angle.sin_cos();
            let rotated_back = Vector2::new(
                measured.x * cos + measured.y * sin,
                -measured.x * sin + measured.y * cos,
            );
            assert_relative_eq!(rotated_back, expected, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_outliers() {
        let config = SimulationConfig {
            outlier_probability: 1.0,
            outlier_distance: 1000.0,
            ..config(2)
        };
        let samples = Simulator::new(config).unwrap().run();
        for s in samples.iter().filter(|s| s.position.is_some()) {
            let error = s.position.unwrap().value - s.truth.unwrap().position;
            assert!(error.norm() > 900.0);
        }
    }
}
