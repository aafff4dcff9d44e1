use thiserror::Error;

/// Filter library error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Singular matrix: {0}")]
    SingularMatrix(String),

    #[error("Singular innovation covariance: {0}")]
    SingularCovariance(String),

    #[error("Matrix is not positive definite: {0}")]
    NotPositiveDefinite(String),

    #[error("No data")]
    NoData,

    #[error("Degenerate input: {0}")]
    DegenerateInput(String),

    #[error("Filter is not initialized")]
    NotInitialized,

    #[error("Unsupported measurement: {0}")]
    UnsupportedMeasurement(String),

    #[error("No convergence: {0}")]
    NoConvergence(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result type for filter operations
pub type FilterResult<T> = Result<T, FilterError>;

impl From<std::io::Error> for FilterError {
    fn from(error: std::io::Error) -> Self {
        FilterError::Io(error.to_string())
    }
}

impl From<serde_json::Error> for FilterError {
    fn from(error: serde_json::Error) -> Self {
        FilterError::Config(error.to_string())
    }
}

/// Fails with `InvalidArgument` unless `value` is finite
pub fn check_finite(name: &str, value: f64) -> FilterResult<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(FilterError::InvalidArgument(format!("{name} is not finite: {value}")))
    }
}

/// Fails with `InvalidArgument` unless `value` is finite and not negative
pub fn check_non_negative(name: &str, value: f64) -> FilterResult<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(FilterError::InvalidArgument(format!("{name} must be finite and non-negative: {value}")))
    }
}

/// Fails with `InvalidArgument` unless `value` is finite and positive
pub fn check_positive(name: &str, value: f64) -> FilterResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(FilterError::InvalidArgument(format!("{name} must be finite and positive: {value}")))
    }
}
