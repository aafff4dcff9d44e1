use std::f64::consts::TAU;

use nalgebra::{DMatrix, SMatrix, SVector};

use crate::error::{check_non_negative, FilterResult};

/// Per-update settings
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct UpdateOptions {
    /// Reject when the normalized innovation squared exceeds this value
    pub gate: Option<f64>,
    /// H-infinity performance bound (EKF only)
    pub theta: Option<f64>,
    /// Compute the measurement likelihood
    pub likelihood: bool,
}

impl UpdateOptions {
    pub fn gate(gate: Option<f64>) -> Self {
        Self {
            gate,
            ..Self::default()
        }
    }

    pub fn check(&self) -> FilterResult<()> {
        if let Some(gate) = self.gate {
            check_non_negative("gate", gate)?;
        }
        if let Some(theta) = self.theta {
            check_non_negative("theta", theta)?;
        }
        Ok(())
    }
}

/// Outcome of one measurement update
#[derive(Clone, Debug, PartialEq)]
pub struct UpdateInfo<const M: usize> {
    /// Measurement minus predicted measurement
    pub residual: SVector<f64, M>,
    /// Innovation covariance S
    pub innovation_covariance: SMatrix<f64, M, M>,
    /// rᵀ·S⁻¹·r
    pub normalized_innovation_squared: f64,
    pub likelihood: Option<f64>,
    /// Rejected by the gate; state and covariance were not changed
    pub gated: bool,
}

pub(crate) fn make_update_info<const M: usize>(
    residual: SVector<f64, M>,
    innovation_covariance: SMatrix<f64, M, M>,
    innovation_covariance_inverse: &SMatrix<f64, M, M>,
    options: &UpdateOptions,
) -> UpdateInfo<M> {
    let normalized_innovation_squared = residual.dot(&(innovation_covariance_inverse * residual));

    let likelihood = options.likelihood.then(|| {
        let norm = (TAU.powi(M as i32) * DMatrix::from_column_slice(M, M, innovation_covariance.as_slice()).determinant())
            .sqrt();
        (-0.5 * normalized_innovation_squared).exp() / norm
    });

    let gated = options
        .gate
        .is_some_and(|gate| normalized_innovation_squared > gate);

    UpdateInfo {
        residual,
        innovation_covariance,
        normalized_innovation_squared,
        likelihood,
        gated,
    }
}
