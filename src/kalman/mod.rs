// Kalman filter module
// Linear state estimation for a single tracked object

pub mod gain;
pub mod linear;
pub mod model;

pub use gain::{compute_gain, compute_gain_pseudo_inverse, innovation_covariance, joseph_covariance, max_asymmetry, symmetrize};
pub use linear::{CovarianceForm, CovarianceHealth, InversionMode, LinearStateEstimator, Phase};
pub use model::ConstantVelocity;
