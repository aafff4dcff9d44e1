//! Samples held back while a reset is due, so that the filter can start
//! with a velocity taken from the first and last queued positions.

use std::collections::VecDeque;

use crate::error::{check_positive, FilterError, FilterResult};
use crate::types::{Measurement, Measurements, Vector2};

/// Starting point computed from the queued positions
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QueueStart {
    pub time: f64,
    pub position: Measurement<2>,
    pub velocity: Measurement<2>,
}

#[derive(Clone, Debug)]
pub struct MeasurementQueue {
    /// Positions needed before a start
    capacity: usize,
    reset_dt: f64,
    samples: VecDeque<Measurements>,
}

impl MeasurementQueue {
    pub fn new(capacity: usize, reset_dt: f64) -> FilterResult<Self> {
        if capacity == 0 {
            return Err(FilterError::InvalidArgument(
                "measurement queue size must be positive".to_string(),
            ));
        }
        check_positive("reset dt", reset_dt)?;
        Ok(Self {
            capacity,
            reset_dt,
            samples: VecDeque::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn last_time(&self) -> Option<f64> {
        self.samples.back().map(|s| s.time)
    }

    fn positions(&self) -> impl Iterator<Item = (f64, &Measurement<2>)> {
        self.samples
            .iter()
            .filter_map(|s| s.position.as_ref().map(|p| (s.time, p)))
    }

    fn position_count(&self) -> usize {
        self.positions().count()
    }

    /// Adds a sample. The queue always starts with a position: samples
    /// without one are dropped while it is empty. A position arriving
    /// `reset_dt` after the previous one starts the queue over. Once more
    /// than `capacity` positions are held the oldest ones are dropped.
    pub fn push(&mut self, sample: &Measurements) {
        if sample.position.is_none() {
            if !self.samples.is_empty() {
                self.samples.push_back(sample.clone());
            }
            return;
        }

        if let Some((last, _)) = self.positions().last() {
            if sample.time - last >= self.reset_dt {
                self.samples.clear();
            }
        }
        self.samples.push_back(sample.clone());

        while self.position_count() > self.capacity {
            self.samples.pop_front();
            while self.samples.front().is_some_and(|s| s.position.is_none()) {
                self.samples.pop_front();
            }
        }
    }

    pub fn is_ready(&self) -> bool {
        self.position_count() >= self.capacity
    }

    /// First queued position with the mean velocity up to the last one,
    /// or `None` until `capacity` positions are queued. A single position
    /// gives zero velocity with `init_speed_variance` per axis.
    pub fn start(&self, init_speed_variance: f64) -> Option<QueueStart> {
        if !self.is_ready() {
            return None;
        }
        let (first_time, first) = self.positions().next()?;
        let (last_time, last) = self.positions().last()?;

        let dt = last_time - first_time;
        let velocity = if dt > 0.0 {
            Measurement::new(
                (last.value - first.value) / dt,
                (first.variance + last.variance) / (dt * dt),
            )
        } else {
            Measurement::new(Vector2::zeros(), Vector2::repeat(init_speed_variance))
        };
        Some(QueueStart {
            time: first_time,
            position: *first,
            velocity,
        })
    }

    /// Empties the queue, returning the samples after the starting one.
    pub fn take_replay(&mut self) -> Vec<Measurements> {
        self.samples.drain(..).skip(1).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn position(time: f64, x: f64, y: f64) -> Measurements {
        let mut m = Measurements::at(time);
        m.position = Some(Measurement::new(Vector2::new(x, y), Vector2::new(0.5, 1.0)));
        m
    }

    fn speed(time: f64) -> Measurements {
        let mut m = Measurements::at(time);
        m.speed = Some(Measurement::scalar(1.0, 0.1));
        m
    }

    #[test]
    fn test_invalid_arguments() {
        assert!(MeasurementQueue::new(0, 10.0).is_err());
        assert!(MeasurementQueue::new(2, 0.0).is_err());
    }

    #[test]
    fn test_leading_samples_without_position_dropped() {
        let mut queue = MeasurementQueue::new(2, 10.0).unwrap();
        queue.push(&speed(0.0));
        assert!(queue.is_empty());

        queue.push(&position(1.0, 0.0, 0.0));
        queue.push(&speed(1.5));
        assert_eq!(queue.len(), 2);
        assert!(!queue.is_ready());
        assert_eq!(queue.start(100.0), None);
        assert_eq!(queue.last_time(), Some(1.5));
    }

    #[test]
    fn test_start_velocity() {
        let mut queue = MeasurementQueue::new(3, 10.0).unwrap();
        queue.push(&position(1.0, 1.0, 2.0));
        queue.push(&speed(1.5));
        queue.push(&position(2.0, 3.0, 2.0));
        queue.push(&position(3.0, 5.0, 0.0));
        assert!(queue.is_ready());

        let start = queue.start(100.0).unwrap();
        assert_eq!(start.time, 1.0);
        assert_eq!(start.position.value, Vector2::new(1.0, 2.0));
        assert_relative_eq!(start.velocity.value, Vector2::new(2.0, -1.0));
        assert_relative_eq!(start.velocity.variance, Vector2::new(0.25, 0.5));

        let replay = queue.take_replay();
        assert_eq!(
            replay.iter().map(|s| s.time).collect::<Vec<_>>(),
            vec![1.5, 2.0, 3.0]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_single_position_start() {
        let mut queue = MeasurementQueue::new(1, 10.0).unwrap();
        queue.push(&position(4.0, 1.0, 1.0));
        let start = queue.start(9.0).unwrap();
        assert_eq!(start.velocity.value, Vector2::zeros());
        assert_eq!(start.velocity.variance, Vector2::repeat(9.0));
        assert!(queue.take_replay().is_empty());
    }

    #[test]
    fn test_oldest_positions_dropped() {
        let mut queue = MeasurementQueue::new(2, 10.0).unwrap();
        queue.push(&position(0.0, 0.0, 0.0));
        queue.push(&speed(0.5));
        queue.push(&position(1.0, 1.0, 0.0));
        queue.push(&speed(1.5));
        queue.push(&position(2.0, 3.0, 0.0));

        assert_eq!(queue.len(), 3);
        let start = queue.start(100.0).unwrap();
        assert_eq!(start.time, 1.0);
        assert_relative_eq!(start.velocity.value, Vector2::new(2.0, 0.0));
    }

    #[test]
    fn test_gap_restarts_queue() {
        let mut queue = MeasurementQueue::new(2, 5.0).unwrap();
        queue.push(&position(0.0, 0.0, 0.0));
        queue.push(&speed(3.0));
        queue.push(&position(5.0, 9.0, 9.0));
        assert_eq!(queue.len(), 1);
        assert!(!queue.is_ready());

        queue.clear();
        assert_eq!(queue.last_time(), None);
    }
}
