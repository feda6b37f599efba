// Linear Kalman filter state for a single tracked object

use nalgebra as na;
use na::{DMatrix, DVector};
use tracing::debug;

use super::gain::{
    compute_gain, compute_gain_pseudo_inverse, is_finite_matrix, joseph_covariance,
    max_asymmetry, symmetrize,
};
use super::model::ConstantVelocity;
use crate::error::EstimatorError;

/// Where the estimator is within the predict/update cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// `predict` ran; a prediction is waiting for a measurement.
    Predicted,
    /// The posterior is current (after construction, `update` or `commit_prediction`).
    Corrected,
}

/// How S is inverted during an update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InversionMode {
    /// Fail with `SingularInnovationCovariance` if S is not invertible.
    #[default]
    Strict,
    /// Use the Moore-Penrose pseudo-inverse; uninformative directions get zero gain.
    PseudoInverse,
}

/// Covariance update formula
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CovarianceForm {
    /// `(I - KH)·P`
    #[default]
    Simple,
    /// `(I - KH)·P·(I - KH)ᵗ + K·R·Kᵗ`
    Joseph,
}

/// Snapshot of numerical health of the posterior covariance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CovarianceHealth {
    pub max_asymmetry: f64,
    pub min_diagonal: f64,
    pub finite: bool,
}

impl CovarianceHealth {
    /// Symmetric within `tolerance`, finite and with a non-negative diagonal
    pub fn is_healthy(&self, tolerance: f64) -> bool {
        self.finite && self.max_asymmetry <= tolerance && self.min_diagonal >= 0.0
    }
}

/// Discrete-time linear Kalman filter
///
/// Owns the model matrices (F, H, Q, R) and the running state/covariance.
/// Each time step the caller runs `predict`, then either `update` with a
/// measurement or `commit_prediction` when there is none.
#[derive(Debug, Clone)]
pub struct LinearStateEstimator {
    state_dim: usize,
    measurement_dim: usize,

    // Model (fixed for the lifetime of the track)
    transition: DMatrix<f64>,        // F (n×n)
    observation: DMatrix<f64>,       // H (m×n)
    process_noise: DMatrix<f64>,     // Q (n×n)
    measurement_noise: DMatrix<f64>, // R (m×m)

    // Filter state
    state_post: DVector<f64>,
    error_cov_post: DMatrix<f64>,
    state_pre: DVector<f64>,
    error_cov_pre: DMatrix<f64>,
    phase: Phase,

    inversion: InversionMode,
    covariance_form: CovarianceForm,
}

impl LinearStateEstimator {
    /// Create an estimator with identity model matrices and a zero state
    ///
    /// `H` is the first `measurement_dim` rows of the identity; rows past
    /// `state_dim` are zero.
    pub fn new(state_dim: usize, measurement_dim: usize) -> Result<Self, EstimatorError> {
        if state_dim == 0 {
            return Err(EstimatorError::vector("state dimension", 1, 0));
        }
        if measurement_dim == 0 {
            return Err(EstimatorError::vector("measurement dimension", 1, 0));
        }

        Ok(Self {
            state_dim,
            measurement_dim,
            transition: DMatrix::identity(state_dim, state_dim),
            observation: DMatrix::identity(measurement_dim, state_dim),
            process_noise: DMatrix::identity(state_dim, state_dim),
            measurement_noise: DMatrix::identity(measurement_dim, measurement_dim),
            state_post: DVector::zeros(state_dim),
            error_cov_post: DMatrix::identity(state_dim, state_dim),
            state_pre: DVector::zeros(state_dim),
            error_cov_pre: DMatrix::identity(state_dim, state_dim),
            phase: Phase::Corrected,
            inversion: InversionMode::default(),
            covariance_form: CovarianceForm::default(),
        })
    }

    /// 2-D constant-velocity tracker: state [px, py, vx, vy], measurement [px, py]
    pub fn constant_velocity_2d(
        dt: f64,
        process_noise: f64,
        measurement_noise: f64,
    ) -> Result<Self, EstimatorError> {
        let model = ConstantVelocity::new(dt, process_noise, measurement_noise)?;
        let mut estimator = Self::new(ConstantVelocity::STATE_DIM, ConstantVelocity::MEASUREMENT_DIM)?;
        estimator.set_transition_matrix(model.transition_matrix())?;
        estimator.set_observation_matrix(model.observation_matrix())?;
        estimator.set_process_noise(model.process_noise())?;
        estimator.set_measurement_noise(model.measurement_noise())?;
        Ok(estimator)
    }

    // --- configuration ---

    pub fn set_transition_matrix(&mut self, f: DMatrix<f64>) -> Result<(), EstimatorError> {
        self.check_shape("transition matrix", &f, (self.state_dim, self.state_dim))?;
        self.transition = f;
        Ok(())
    }

    pub fn set_observation_matrix(&mut self, h: DMatrix<f64>) -> Result<(), EstimatorError> {
        self.check_shape("observation matrix", &h, (self.measurement_dim, self.state_dim))?;
        self.observation = h;
        Ok(())
    }

    pub fn set_process_noise(&mut self, q: DMatrix<f64>) -> Result<(), EstimatorError> {
        self.check_shape("process noise", &q, (self.state_dim, self.state_dim))?;
        self.process_noise = q;
        Ok(())
    }

    pub fn set_measurement_noise(&mut self, r: DMatrix<f64>) -> Result<(), EstimatorError> {
        self.check_shape(
            "measurement noise",
            &r,
            (self.measurement_dim, self.measurement_dim),
        )?;
        self.measurement_noise = r;
        Ok(())
    }

    /// Replace the prior state. Discards any pending prediction.
    pub fn set_state(&mut self, x: DVector<f64>) -> Result<(), EstimatorError> {
        if x.len() != self.state_dim {
            return Err(EstimatorError::vector("state", self.state_dim, x.len()));
        }
        self.state_post = x;
        self.phase = Phase::Corrected;
        Ok(())
    }

    /// Replace the prior covariance. Discards any pending prediction.
    pub fn set_error_covariance(&mut self, p: DMatrix<f64>) -> Result<(), EstimatorError> {
        self.check_shape("error covariance", &p, (self.state_dim, self.state_dim))?;
        self.error_cov_post = p;
        self.phase = Phase::Corrected;
        Ok(())
    }

    pub fn set_inversion_mode(&mut self, mode: InversionMode) {
        self.inversion = mode;
    }

    pub fn set_covariance_form(&mut self, form: CovarianceForm) {
        self.covariance_form = form;
    }

    pub fn with_transition_matrix(mut self, f: DMatrix<f64>) -> Result<Self, EstimatorError> {
        self.set_transition_matrix(f)?;
        Ok(self)
    }

    pub fn with_observation_matrix(mut self, h: DMatrix<f64>) -> Result<Self, EstimatorError> {
        self.set_observation_matrix(h)?;
        Ok(self)
    }

    pub fn with_process_noise(mut self, q: DMatrix<f64>) -> Result<Self, EstimatorError> {
        self.set_process_noise(q)?;
        Ok(self)
    }

    pub fn with_measurement_noise(mut self, r: DMatrix<f64>) -> Result<Self, EstimatorError> {
        self.set_measurement_noise(r)?;
        Ok(self)
    }

    pub fn with_inversion_mode(mut self, mode: InversionMode) -> Self {
        self.inversion = mode;
        self
    }

    pub fn with_covariance_form(mut self, form: CovarianceForm) -> Self {
        self.covariance_form = form;
        self
    }

    fn check_shape(
        &self,
        what: &'static str,
        m: &DMatrix<f64>,
        expected: (usize, usize),
    ) -> Result<(), EstimatorError> {
        if m.shape() != expected {
            return Err(EstimatorError::matrix(what, expected, m.shape()));
        }
        Ok(())
    }

    // --- recursion ---

    /// Propagate the posterior one step through the motion model
    ///
    /// x_pre = F·x_post
    /// P_pre = F·P_post·Fᵗ + Q
    pub fn predict(&mut self) {
        let f = &self.transition;

        self.state_pre = f * &self.state_post;
        let cov = f * &self.error_cov_post * f.transpose() + &self.process_noise;
        self.error_cov_pre = symmetrize(&cov);
        self.phase = Phase::Predicted;

        debug!(state = ?self.state_pre.as_slice(), "predicted");
    }

    /// Fuse a measurement into the pending prediction
    ///
    /// # Arguments
    /// * `measurement` - Measurement vector of length `measurement_dim`
    ///
    /// # Returns
    /// The innovation `z - H·x_pre`. On error nothing is modified, and the
    /// prediction stays available for `commit_prediction`.
    pub fn update(&mut self, measurement: &DVector<f64>) -> Result<DVector<f64>, EstimatorError> {
        if measurement.len() != self.measurement_dim {
            return Err(EstimatorError::vector(
                "measurement",
                self.measurement_dim,
                measurement.len(),
            ));
        }
        if self.phase != Phase::Predicted {
            return Err(EstimatorError::PredictNotCalled);
        }

        let h = &self.observation;
        let r = &self.measurement_noise;
        let p_pre = &self.error_cov_pre;

        let gain = match self.inversion {
            InversionMode::Strict => compute_gain(p_pre, h, r)?,
            InversionMode::PseudoInverse => compute_gain_pseudo_inverse(p_pre, h, r)?,
        };

        let innovation = measurement - h * &self.state_pre;
        let state = &self.state_pre + &gain * &innovation;

        let cov = match self.covariance_form {
            CovarianceForm::Simple => {
                (DMatrix::identity(self.state_dim, self.state_dim) - &gain * h) * p_pre
            }
            CovarianceForm::Joseph => joseph_covariance(p_pre, &gain, h, r),
        };
        let cov = symmetrize(&cov);

        if !state.iter().all(|v| v.is_finite()) || !is_finite_matrix(&cov) {
            return Err(EstimatorError::NonFiniteState);
        }

        self.state_post = state;
        self.error_cov_post = cov;
        self.phase = Phase::Corrected;

        debug!(
            state = ?self.state_post.as_slice(),
            innovation = ?innovation.as_slice(),
            "corrected"
        );

        Ok(innovation)
    }

    /// Complete the step without a measurement: the prediction becomes the posterior
    pub fn commit_prediction(&mut self) -> Result<(), EstimatorError> {
        if self.phase != Phase::Predicted {
            return Err(EstimatorError::PredictNotCalled);
        }
        self.state_post = self.state_pre.clone();
        self.error_cov_post = self.error_cov_pre.clone();
        self.phase = Phase::Corrected;
        Ok(())
    }

    // --- accessors ---

    /// Current best state estimate (x_post)
    pub fn current_estimate(&self) -> &DVector<f64> {
        &self.state_post
    }

    /// Current error covariance (P_post)
    pub fn current_uncertainty(&self) -> &DMatrix<f64> {
        &self.error_cov_post
    }

    /// Pending prediction, if `predict` ran since the last correction
    pub fn predicted_state(&self) -> Option<&DVector<f64>> {
        match self.phase {
            Phase::Predicted => Some(&self.state_pre),
            Phase::Corrected => None,
        }
    }

    pub fn predicted_covariance(&self) -> Option<&DMatrix<f64>> {
        match self.phase {
            Phase::Predicted => Some(&self.error_cov_pre),
            Phase::Corrected => None,
        }
    }

    /// First two components of the posterior, when the state has at least two
    pub fn position(&self) -> Option<[f64; 2]> {
        if self.state_dim < 2 {
            return None;
        }
        Some([self.state_post[0], self.state_post[1]])
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state_dim(&self) -> usize {
        self.state_dim
    }

    pub fn measurement_dim(&self) -> usize {
        self.measurement_dim
    }

    pub fn transition_matrix(&self) -> &DMatrix<f64> {
        &self.transition
    }

    pub fn observation_matrix(&self) -> &DMatrix<f64> {
        &self.observation
    }

    pub fn process_noise(&self) -> &DMatrix<f64> {
        &self.process_noise
    }

    pub fn measurement_noise(&self) -> &DMatrix<f64> {
        &self.measurement_noise
    }

    pub fn inversion_mode(&self) -> InversionMode {
        self.inversion
    }

    pub fn covariance_form(&self) -> CovarianceForm {
        self.covariance_form
    }

    pub fn covariance_health(&self) -> CovarianceHealth {
        let p = &self.error_cov_post;
        CovarianceHealth {
            max_asymmetry: max_asymmetry(p),
            min_diagonal: p.diagonal().iter().cloned().fold(f64::INFINITY, f64::min),
            finite: is_finite_matrix(p),
        }
    }
}
