pub mod constants;
pub mod error;
pub mod kalman;
pub mod source;
pub mod tracker;
pub mod output;
pub mod config;

pub use error::EstimatorError;
pub use kalman::LinearStateEstimator;
