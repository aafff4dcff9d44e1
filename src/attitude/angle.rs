use std::f64::consts::{PI, TAU};

/// Maps any angle to (-π, π] [rad]
pub fn wrap_angle(angle: f64) -> f64 {
    if angle > -PI && angle <= PI {
        return angle;
    }
    let res = (angle + PI).rem_euclid(TAU) - PI;
    if res <= -PI {
        PI
    } else {
        res
    }
}

/// Angle equivalent to `angle` closest to `reference`, so accumulated
/// headings do not jump by 2π.
pub fn unwrap_angle(reference: f64, angle: f64) -> f64 {
    reference + wrap_angle(angle - reference)
}

/// Wrapped `a - b`
pub fn angle_difference(a: f64, b: f64) -> f64 {
    wrap_angle(a - b)
}

/// Weighted mean of angles on the unit circle. Weights may be negative
/// (unscented transform), the resultant vector must be non-zero.
pub fn circular_mean(angles: impl IntoIterator<Item = (f64, f64)>) -> f64 {
    let (sin, cos) = angles
        .into_iter()
        .fold((0.0, 0.0), |(s, c), (angle, weight)| {
            (s + weight * angle.sin(), c + weight * angle.cos())
        });
    sin.atan2(cos)
}
