//! Nonlinear state estimation for planar motion and attitude
//!
//! Kalman-family filters over fixed-size `nalgebra` matrices: an EKF
//! position filter with optional H-infinity update, UKF speed and
//! direction filters, an acceleration filter on either core, RTS
//! smoothing, Madgwick and EKF attitude filters, attitude determination
//! (TRIAD, QUEST) and NEES/NIS consistency statistics.

pub mod allan;
pub mod attitude;
pub mod config;
pub mod error;
pub mod filters;
pub mod noise;
pub mod output;
pub mod simulator;
pub mod types;

pub use error::{FilterError, FilterResult};
