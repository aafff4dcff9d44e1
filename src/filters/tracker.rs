//! Drives a [`MotionFilter`] from timestamped measurements.
//!
//! The first position (or one arriving `reset_dt` after the last accepted
//! update) resets the filter. With a measurement queue longer than one,
//! samples are held until the queue has enough positions to estimate the
//! starting velocity and are then replayed. Other samples predict to their time and
//! fuse the richest measurement set the filter accepts. Ground truth, when
//! present, feeds the NEES accumulators; accepted updates following a
//! short gap feed the NIS accumulator.

use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::{check_finite, check_non_negative, check_positive, FilterError, FilterResult};
use crate::filters::consistency::{Nees, Nis};
use crate::filters::queue::MeasurementQueue;
use crate::filters::{MeasurementKind, MotionFilter, Reset};
use crate::types::{Measurement, Measurements, TrueState};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerSettings {
    /// Normalized innovation squared above which updates are rejected
    pub gate: Option<f64>,
    /// Gap since the last accepted update that forces a reset [s]
    pub reset_dt: f64,
    /// Largest update gap for which the NIS is recorded [s]
    pub linear_dt: f64,
    pub init_speed_variance: f64,
    pub init_acceleration_variance: f64,
    pub init_angle_variance: f64,
    pub init_angle_speed_variance: f64,
    /// Positions collected before a reset
    pub measurement_queue_size: usize,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            gate: None,
            reset_dt: 10.0,
            linear_dt: 2.0,
            init_speed_variance: 30.0 * 30.0,
            init_acceleration_variance: 10.0 * 10.0,
            init_angle_variance: 100f64.to_radians().powi(2),
            init_angle_speed_variance: 1f64.to_radians().powi(2),
            measurement_queue_size: 1,
        }
    }
}

impl TrackerSettings {
    pub fn check(&self) -> FilterResult<()> {
        if let Some(gate) = self.gate {
            check_non_negative("gate", gate)?;
        }
        check_positive("reset dt", self.reset_dt)?;
        check_non_negative("linear dt", self.linear_dt)?;
        check_positive("initial speed variance", self.init_speed_variance)?;
        check_positive("initial acceleration variance", self.init_acceleration_variance)?;
        check_positive("initial angle variance", self.init_angle_variance)?;
        check_positive("initial angle speed variance", self.init_angle_speed_variance)?;
        if self.measurement_queue_size == 0 {
            return Err(FilterError::InvalidArgument(
                "measurement queue size must be positive".to_string(),
            ));
        }
        Ok(())
    }

    fn reset(&self, position: &Measurement<2>, velocity: &Measurement<2>) -> Reset {
        Reset::new(
            position.value,
            position.variance,
            velocity.value,
            velocity.variance,
        )
        .with_acceleration(0.0, self.init_acceleration_variance)
        .with_angle(0.0, self.init_angle_variance)
        .with_angle_speed(0.0, self.init_angle_speed_variance)
    }
}

/// Filter output at one time
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct TrackPoint {
    pub time: f64,
    pub position: (f64, f64),
    pub position_variance: (f64, f64),
    pub speed: f64,
    pub speed_variance: f64,
    pub angle: Option<f64>,
}

pub struct Tracker<F> {
    filter: F,
    settings: TrackerSettings,
    queue: MeasurementQueue,
    last_predict_time: Option<f64>,
    last_update_time: Option<f64>,
    nees_position: Nees,
    nees_speed: Nees,
    nis: Nis,
    gated: usize,
    resets: usize,
}

impl<F: MotionFilter> Tracker<F> {
    pub fn new(filter: F, settings: TrackerSettings) -> FilterResult<Self> {
        settings.check()?;
        let queue = MeasurementQueue::new(settings.measurement_queue_size, settings.reset_dt)?;
        Ok(Self {
            filter,
            settings,
            queue,
            last_predict_time: None,
            last_update_time: None,
            nees_position: Nees::new(),
            nees_speed: Nees::new(),
            nis: Nis::new(),
            gated: 0,
            resets: 0,
        })
    }

    pub fn name(&self) -> &str {
        self.filter.name()
    }

    pub fn filter(&self) -> &F {
        &self.filter
    }

    pub fn is_empty(&self) -> bool {
        self.last_update_time.is_none()
    }

    /// Processes one sample. Returns `None` when the sample could not be
    /// used: nothing the filter accepts, or queued while a reset is due.
    pub fn update(&mut self, measurements: &Measurements) -> FilterResult<Option<TrackPoint>> {
        let time = measurements.time;
        self.check_time(time)?;

        if self.reset_due(time) {
            return self.reset_from_queue(measurements);
        }
        self.fuse(measurements)
    }

    fn reset_from_queue(&mut self, measurements: &Measurements) -> FilterResult<Option<TrackPoint>> {
        self.queue.push(measurements);
        let Some(start) = self.queue.start(self.settings.init_speed_variance) else {
            return Ok(None);
        };

        let reset = self.settings.reset(&start.position, &start.velocity);
        self.filter.reset(&reset)?;
        self.last_predict_time = Some(start.time);
        self.last_update_time = Some(start.time);
        self.resets += 1;
        debug!("{} filter reset at {:.3}", self.filter.name(), start.time);

        for sample in self.queue.take_replay() {
            self.fuse(&sample)?;
        }
        let time = measurements.time;
        if self.last_predict_time.is_some_and(|last| last < time) {
            self.predict_to(time, measurements.truth.as_ref())?;
        }
        self.point(time).map(Some)
    }

    fn fuse(&mut self, measurements: &Measurements) -> FilterResult<Option<TrackPoint>> {
        let time = measurements.time;
        let Some(kind) = MeasurementKind::candidates(measurements)
            .into_iter()
            .find(|kind| self.filter.accepts(kind))
        else {
            return Ok(None);
        };

        self.predict_to(time, measurements.truth.as_ref())?;

        let update = self.filter.update(&kind, self.settings.gate)?;
        if update.gated {
            self.gated += 1;
            debug!(
                "{} filter gated {} at {time:.3}",
                self.filter.name(),
                kind.name()
            );
            return self.point(time).map(Some);
        }

        let update_dt = self
            .last_update_time
            .map_or(f64::INFINITY, |last| time - last);
        self.last_update_time = Some(time);
        if update_dt <= self.settings.linear_dt {
            self.nis
                .add_squared(update.normalized_innovation_squared, update.dimension())?;
        }

        self.point(time).map(Some)
    }

    /// Dead reckoning to `time` without a measurement. `None` while the
    /// filter is empty or a reset is due.
    pub fn predict_only(
        &mut self,
        time: f64,
        truth: Option<&TrueState>,
    ) -> FilterResult<Option<TrackPoint>> {
        self.check_time(time)?;
        if self.reset_due(time) {
            return Ok(None);
        }
        self.predict_to(time, truth)?;
        self.point(time).map(Some)
    }

    pub fn nees_position(&self) -> &Nees {
        &self.nees_position
    }

    pub fn nees_speed(&self) -> &Nees {
        &self.nees_speed
    }

    pub fn nis(&self) -> &Nis {
        &self.nis
    }

    pub fn gated_count(&self) -> usize {
        self.gated
    }

    pub fn reset_count(&self) -> usize {
        self.resets
    }

    pub fn consistency_summary(&self) -> String {
        format!(
            "{}: NEES position {}; NEES speed {}; NIS {}",
            self.filter.name(),
            self.nees_position.summary(),
            self.nees_speed.summary(),
            self.nis.summary()
        )
    }

    fn check_time(&self, time: f64) -> FilterResult<()> {
        check_finite("time", time)?;
        let times = [self.last_predict_time, self.last_update_time, self.queue.last_time()];
        for last in times.into_iter().flatten() {
            if time <= last {
                return Err(FilterError::InvalidArgument(format!(
                    "measurement time does not increase; from {last} to {time}"
                )));
            }
        }
        Ok(())
    }

    fn reset_due(&self, time: f64) -> bool {
        match (self.last_predict_time, self.last_update_time) {
            (Some(_), Some(last_update)) => time - last_update >= self.settings.reset_dt,
            _ => true,
        }
    }

    fn predict_to(&mut self, time: f64, truth: Option<&TrueState>) -> FilterResult<()> {
        let last = self.last_predict_time.ok_or(FilterError::NotInitialized)?;
        self.filter.predict(time - last)?;
        self.last_predict_time = Some(time);
        if let Some(truth) = truth {
            self.add_nees(truth)?;
        }
        Ok(())
    }

    fn add_nees(&mut self, truth: &TrueState) -> FilterResult<()> {
        let position = self.filter.position()?;
        let position_p = self.filter.position_p()?;
        self.nees_position.add(&(truth.position - position), &position_p)?;

        let speed_p = self.filter.speed_p()?;
        if speed_p > 0.0 {
            self.nees_speed
                .add_1(truth.speed() - self.filter.speed()?, speed_p)?;
        }
        Ok(())
    }

    fn point(&self, time: f64) -> FilterResult<TrackPoint> {
        let snapshot = self.filter.snapshot()?;
        Ok(TrackPoint {
            time,
            position: snapshot.position,
            position_variance: snapshot.position_variance,
            speed: snapshot.speed,
            speed_variance: snapshot.speed_variance,
            angle: snapshot.angle,
        })
    }
}
