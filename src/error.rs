//! Error types for the state estimator.

/// Errors raised by a single estimator step.
///
/// None of these are fatal: a failed step leaves the previously committed
/// state untouched and the caller can fall back to the prediction.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EstimatorError {
    /// A vector or matrix does not have the shape the filter was built for.
    #[error("invalid dimension for {what}: expected {expected}, got {actual}")]
    InvalidDimension {
        /// What was being checked (e.g. "measurement", "transition matrix").
        what: &'static str,
        /// Expected shape, formatted as `n` or `rows x cols`.
        expected: String,
        /// Shape actually supplied.
        actual: String,
    },

    /// `H·P·Hᵗ + R` could not be inverted.
    #[error("innovation covariance is singular")]
    SingularInnovationCovariance,

    /// `update` or `commit_prediction` was called without a preceding `predict`.
    #[error("update called before predict")]
    PredictNotCalled,

    /// The corrected state or covariance contains NaN or infinite values.
    #[error("filter produced a non-finite state or covariance")]
    NonFiniteState,

    /// A model parameter is out of range.
    #[error("invalid model parameter: {0}")]
    InvalidParameter(String),
}

impl EstimatorError {
    pub(crate) fn vector(what: &'static str, expected: usize, actual: usize) -> Self {
        EstimatorError::InvalidDimension {
            what,
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub(crate) fn matrix(what: &'static str, expected: (usize, usize), actual: (usize, usize)) -> Self {
        EstimatorError::InvalidDimension {
            what,
            expected: format!("{}x{}", expected.0, expected.1),
            actual: format!("{}x{}", actual.0, actual.1),
        }
    }

    /// True for errors after which the step can still be completed from the prediction.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            EstimatorError::SingularInnovationCovariance | EstimatorError::NonFiniteState
        )
    }
}
