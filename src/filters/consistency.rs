//! NEES / NIS accumulators
//!
//! Each sample adds `dᵀ·P⁻¹·d` to a running sum and its dimension to the
//! degrees of freedom. A consistent filter averages close to 1 per degree
//! of freedom.

use nalgebra::{SMatrix, SVector};
use serde::Serialize;

use crate::error::{check_positive, FilterError, FilterResult};
use crate::types::linalg::inverse;

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct NormalizedSquared {
    sum: f64,
    dof: usize,
    count: usize,
}

/// Normalized estimation error squared
pub type Nees = NormalizedSquared;

/// Normalized innovation squared
pub type Nis = NormalizedSquared;

impl NormalizedSquared {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<const N: usize>(
        &mut self,
        difference: &SVector<f64, N>,
        covariance: &SMatrix<f64, N, N>,
    ) -> FilterResult<()> {
        let value = difference.dot(&(inverse(covariance)? * difference));
        self.add_squared(value, N)
    }

    /// Scalar form of [`NormalizedSquared::add`]
    pub fn add_1(&mut self, difference: f64, variance: f64) -> FilterResult<()> {
        check_positive("variance", variance)?;
        self.add_squared(difference * difference / variance, 1)
    }

    /// Already normalized value with `dof` degrees of freedom, such as the
    /// normalized innovation squared of an update.
    pub fn add_squared(&mut self, value: f64, dof: usize) -> FilterResult<()> {
        if !value.is_finite() || value < 0.0 || dof == 0 {
            return Err(FilterError::InvalidArgument(format!(
                "normalized squared value {value} with {dof} degrees of freedom"
            )));
        }
        self.sum += value;
        self.dof += dof;
        self.count += 1;
        Ok(())
    }

    /// Sum over degrees of freedom
    pub fn average(&self) -> FilterResult<f64> {
        if self.dof == 0 {
            return Err(FilterError::NoData);
        }
        Ok(self.sum / self.dof as f64)
    }

    /// Sum over samples, close to the dimension for a consistent filter
    pub fn average_per_sample(&self) -> FilterResult<f64> {
        if self.count == 0 {
            return Err(FilterError::NoData);
        }
        Ok(self.sum / self.count as f64)
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn dof(&self) -> usize {
        self.dof
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn summary(&self) -> String {
        match self.average() {
            Ok(average) => format!(
                "average {average:.3}, sum {:.3}, dof {}, samples {}",
                self.sum, self.dof, self.count
            ),
            Err(_) => "no data".to_string(),
        }
    }
}
