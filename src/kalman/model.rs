// Constant-velocity motion model for 2-D image-plane tracking

use nalgebra as na;
use na::DMatrix;

use crate::constants::{DEFAULT_MEASUREMENT_DIM, DEFAULT_STATE_DIM};
use crate::error::EstimatorError;

/// Constant-velocity model: state [px, py, vx, vy], measurement [px, py]
///
/// Velocity is in position units per `dt`. Acceleration is modelled as
/// white noise with standard deviation `process_noise`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantVelocity {
    pub dt: f64,
    pub process_noise: f64,
    pub measurement_noise: f64,
}

impl ConstantVelocity {
    pub const STATE_DIM: usize = DEFAULT_STATE_DIM;
    pub const MEASUREMENT_DIM: usize = DEFAULT_MEASUREMENT_DIM;

    pub fn new(dt: f64, process_noise: f64, measurement_noise: f64) -> Result<Self, EstimatorError> {
        if !dt.is_finite() || dt <= 0.0 {
            return Err(EstimatorError::InvalidParameter(format!(
                "dt must be positive, got {}",
                dt
            )));
        }
        if !process_noise.is_finite() || process_noise < 0.0 {
            return Err(EstimatorError::InvalidParameter(format!(
                "process noise must be non-negative, got {}",
                process_noise
            )));
        }
        if !measurement_noise.is_finite() || measurement_noise < 0.0 {
            return Err(EstimatorError::InvalidParameter(format!(
                "measurement noise must be non-negative, got {}",
                measurement_noise
            )));
        }
        Ok(Self {
            dt,
            process_noise,
            measurement_noise,
        })
    }

    /// F: px' = px + vx*dt, vx' = vx
    pub fn transition_matrix(&self) -> DMatrix<f64> {
        let mut f = DMatrix::identity(4, 4);
        f[(0, 2)] = self.dt;
        f[(1, 3)] = self.dt;
        f
    }

    /// H: position only
    pub fn observation_matrix(&self) -> DMatrix<f64> {
        DMatrix::identity(2, 4)
    }

    /// Q for piecewise white-noise acceleration
    pub fn process_noise(&self) -> DMatrix<f64> {
        let dt = self.dt;
        let mut q = DMatrix::zeros(4, 4);

        // Position-position
        q[(0, 0)] = 0.25 * dt.powi(4);
        q[(1, 1)] = 0.25 * dt.powi(4);

        // Velocity-velocity
        q[(2, 2)] = dt.powi(2);
        q[(3, 3)] = dt.powi(2);

        // Position-velocity
        q[(0, 2)] = 0.5 * dt.powi(3);
        q[(2, 0)] = 0.5 * dt.powi(3);
        q[(1, 3)] = 0.5 * dt.powi(3);
        q[(3, 1)] = 0.5 * dt.powi(3);

        // White noise, so scale by dt
        q * self.process_noise.powi(2) * dt
    }

    /// R: independent, equal variance on both axes
    pub fn measurement_noise(&self) -> DMatrix<f64> {
        DMatrix::identity(2, 2) * self.measurement_noise
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_parameters() {
        assert!(ConstantVelocity::new(0.0, 0.1, 1.0).is_err());
        assert!(ConstantVelocity::new(-1.0, 0.1, 1.0).is_err());
        assert!(ConstantVelocity::new(1.0, -0.1, 1.0).is_err());
        assert!(ConstantVelocity::new(1.0, 0.1, f64::NAN).is_err());
        assert!(ConstantVelocity::new(1.0, 0.0, 0.0).is_ok());
    }

    #[test]
    fn test_transition_matrix() {
        let model = ConstantVelocity::new(0.5, 0.1, 1.0).unwrap();
        let f = model.transition_matrix();
        let x = na::DVector::from_vec(vec![10.0, 20.0, 4.0, -2.0]);

        let x_next = f * x;

        assert!((x_next[0] - 12.0).abs() < 1e-12);
        assert!((x_next[1] - 19.0).abs() < 1e-12);
        assert!((x_next[2] - 4.0).abs() < 1e-12);
        assert!((x_next[3] + 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_process_noise() {
        let model = ConstantVelocity::new(1.0, 2.0, 1.0).unwrap();
        let q = model.process_noise();

        assert_eq!(q.shape(), (4, 4));
        for i in 0..4 {
            for j in 0..4 {
                assert!((q[(i, j)] - q[(j, i)]).abs() < 1e-12);
            }
        }
        // sigma² = 4
        assert!((q[(0, 0)] - 1.0).abs() < 1e-12);
        assert!((q[(2, 2)] - 4.0).abs() < 1e-12);
        assert!((q[(0, 2)] - 2.0).abs() < 1e-12);
        // No coupling between axes
        assert_eq!(q[(0, 1)], 0.0);
        assert_eq!(q[(0, 3)], 0.0);
    }

    #[test]
    fn test_observation_and_measurement_noise() {
        let model = ConstantVelocity::new(1.0, 0.1, 3.0).unwrap();
        let h = model.observation_matrix();
        assert_eq!(h.shape(), (2, 4));
        assert_eq!(h[(0, 0)], 1.0);
        assert_eq!(h[(1, 1)], 1.0);
        assert_eq!(h[(0, 2)], 0.0);

        let r = model.measurement_noise();
        assert_eq!(r[(0, 0)], 3.0);
        assert_eq!(r[(0, 1)], 0.0);
    }
}
