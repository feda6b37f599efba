// Kalman gain and covariance helpers
//
// Pure functions over nalgebra matrices. Nothing in here touches estimator
// state; `LinearStateEstimator::update` composes them.

use nalgebra as na;
use na::DMatrix;

use crate::constants::PINV_EPSILON;
use crate::error::EstimatorError;

/// Innovation covariance `S = H·P·Hᵗ + R`
///
/// # Arguments
/// * `error_cov` - Predicted error covariance P (n×n)
/// * `observation` - Observation matrix H (m×n)
/// * `measurement_noise` - Measurement noise covariance R (m×m)
///
/// # Returns
/// S (m×m), or `InvalidDimension` if the shapes do not line up
pub fn innovation_covariance(
    error_cov: &DMatrix<f64>,
    observation: &DMatrix<f64>,
    measurement_noise: &DMatrix<f64>,
) -> Result<DMatrix<f64>, EstimatorError> {
    let n = error_cov.nrows();
    let m = observation.nrows();

    if error_cov.ncols() != n {
        return Err(EstimatorError::matrix("error covariance", (n, n), error_cov.shape()));
    }
    if observation.ncols() != n {
        return Err(EstimatorError::matrix("observation matrix", (m, n), observation.shape()));
    }
    if measurement_noise.shape() != (m, m) {
        return Err(EstimatorError::matrix(
            "measurement noise",
            (m, m),
            measurement_noise.shape(),
        ));
    }

    Ok(observation * error_cov * observation.transpose() + measurement_noise)
}

/// Kalman gain `K = P·Hᵗ·S⁻¹`
///
/// Returns a fresh matrix every call; the gain is never cached.
///
/// # Returns
/// K (n×m), or `SingularInnovationCovariance` when S has no usable inverse
pub fn compute_gain(
    error_cov: &DMatrix<f64>,
    observation: &DMatrix<f64>,
    measurement_noise: &DMatrix<f64>,
) -> Result<DMatrix<f64>, EstimatorError> {
    let s = innovation_covariance(error_cov, observation, measurement_noise)?;

    let s_inv = s
        .try_inverse()
        .ok_or(EstimatorError::SingularInnovationCovariance)?;
    if !is_finite_matrix(&s_inv) {
        return Err(EstimatorError::SingularInnovationCovariance);
    }

    Ok(error_cov * observation.transpose() * s_inv)
}

/// Kalman gain using the Moore-Penrose pseudo-inverse of S
///
/// Directions in measurement space with no information (zero singular
/// values) get zero gain, so a fully degenerate S yields `K = 0` and the
/// update leaves the prediction as is.
pub fn compute_gain_pseudo_inverse(
    error_cov: &DMatrix<f64>,
    observation: &DMatrix<f64>,
    measurement_noise: &DMatrix<f64>,
) -> Result<DMatrix<f64>, EstimatorError> {
    let s = innovation_covariance(error_cov, observation, measurement_noise)?;

    if !is_finite_matrix(&s) {
        return Err(EstimatorError::SingularInnovationCovariance);
    }
    let s_inv = s
        .pseudo_inverse(PINV_EPSILON)
        .map_err(|_| EstimatorError::SingularInnovationCovariance)?;

    Ok(error_cov * observation.transpose() * s_inv)
}

/// `(P + Pᵗ) / 2`
pub fn symmetrize(cov: &DMatrix<f64>) -> DMatrix<f64> {
    (cov + cov.transpose()) * 0.5
}

/// Largest absolute entry of `P - Pᵗ`
pub fn max_asymmetry(cov: &DMatrix<f64>) -> f64 {
    if cov.is_empty() {
        return 0.0;
    }
    (cov - cov.transpose()).amax()
}

/// Joseph-form covariance update `(I - KH)·P·(I - KH)ᵗ + K·R·Kᵗ`
///
/// Stays positive semi-definite for any gain, at the cost of two extra
/// products compared to `(I - KH)·P`.
pub fn joseph_covariance(
    error_cov: &DMatrix<f64>,
    gain: &DMatrix<f64>,
    observation: &DMatrix<f64>,
    measurement_noise: &DMatrix<f64>,
) -> DMatrix<f64> {
    let n = error_cov.nrows();
    let i_kh = DMatrix::identity(n, n) - gain * observation;
    &i_kh * error_cov * i_kh.transpose() + gain * measurement_noise * gain.transpose()
}

pub fn is_finite_matrix(m: &DMatrix<f64>) -> bool {
    m.iter().all(|v| v.is_finite())
}
