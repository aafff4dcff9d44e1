//! Attitude representations, determination and filters

pub mod angle;
pub mod cross_matrix;
pub mod determination;
pub mod ekf;
pub mod madgwick;
pub mod quaternion;

pub use angle::{angle_difference, circular_mean, unwrap_angle, wrap_angle};
pub use cross_matrix::{cross_matrix, cross_matrix_power};
pub use ekf::AttitudeEkf;
pub use madgwick::Madgwick;
pub use quaternion::Quaternion;
