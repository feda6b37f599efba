// Single-object tracking loop
//
// Drives one estimator from one measurement source: predict every frame,
// correct when the detector saw something, coast otherwise.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::constants::SYMMETRY_TOLERANCE;
use crate::kalman::LinearStateEstimator;
use crate::output::{flush_all, OutputHandler};
use crate::source::{Frame, MeasurementSource};

/// What happened to the measurement in a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepOutcome {
    /// Measurement fused into the prediction
    Corrected,
    /// No detection; the prediction was committed
    Coasted,
    /// Detection could not be used; the prediction was committed
    Rejected,
}

impl StepOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepOutcome::Corrected => "corrected",
            StepOutcome::Coasted => "coasted",
            StepOutcome::Rejected => "rejected",
        }
    }
}

/// Estimate published after each frame
#[derive(Debug, Clone, Serialize)]
pub struct TrackEstimate {
    pub step: u64,
    pub timestamp: DateTime<Utc>,
    /// Raw detection for this frame, if any
    pub measurement: Option<Vec<f64>>,
    /// Full posterior state
    pub state: Vec<f64>,
    /// sqrt of the summed position variances
    pub position_error: f64,
    pub outcome: StepOutcome,
}

impl TrackEstimate {
    /// Estimated [px, py]
    pub fn position(&self) -> Option<[f64; 2]> {
        match self.state.as_slice() {
            [x, y, ..] => Some([*x, *y]),
            _ => None,
        }
    }

    /// Estimated [vx, vy] for the 4-state model
    pub fn velocity(&self) -> Option<[f64; 2]> {
        match self.state.as_slice() {
            [_, _, vx, vy, ..] => Some([*vx, *vy]),
            _ => None,
        }
    }
}

/// Step counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrackerStats {
    pub steps: u64,
    pub corrected: u64,
    pub coasted: u64,
    pub rejected: u64,
}

/// One estimator fed by one source
pub struct Tracker<S> {
    estimator: LinearStateEstimator,
    source: S,
    stats: TrackerStats,
}

impl<S: MeasurementSource> Tracker<S> {
    pub fn new(estimator: LinearStateEstimator, source: S) -> Self {
        Tracker {
            estimator,
            source,
            stats: TrackerStats::default(),
        }
    }

    /// Process one frame
    ///
    /// Returns `None` once the source has no more frames. A detection the
    /// estimator cannot use degrades the step to predict-only.
    pub fn step(&mut self) -> Option<TrackEstimate> {
        let frame = self.source.next_frame()?;
        self.stats.steps += 1;
        let step = self.stats.steps;

        self.estimator.predict();

        let (outcome, measurement) = match frame {
            Frame::Detected(z) => match self.estimator.update(&z) {
                Ok(innovation) => {
                    debug!(step, innovation = ?innovation.as_slice(), "Measurement fused");
                    (StepOutcome::Corrected, Some(z.as_slice().to_vec()))
                }
                Err(e) => {
                    // Unrecoverable here means the detector and the model disagree on size
                    warn!(
                        step,
                        error = %e,
                        recoverable = e.is_recoverable(),
                        "Measurement rejected, keeping prediction"
                    );
                    self.commit_prediction(step);
                    (StepOutcome::Rejected, Some(z.as_slice().to_vec()))
                }
            },
            Frame::Missed => {
                debug!(step, "No detection, coasting");
                self.commit_prediction(step);
                (StepOutcome::Coasted, None)
            }
        };

        match outcome {
            StepOutcome::Corrected => self.stats.corrected += 1,
            StepOutcome::Coasted => self.stats.coasted += 1,
            StepOutcome::Rejected => self.stats.rejected += 1,
        }

        let health = self.estimator.covariance_health();
        if !health.is_healthy(SYMMETRY_TOLERANCE) {
            warn!(step, ?health, "Error covariance lost symmetry or positivity");
        }

        Some(self.estimate(step, measurement, outcome))
    }

    fn commit_prediction(&mut self, step: u64) {
        if let Err(e) = self.estimator.commit_prediction() {
            warn!(step, error = %e, "Could not commit prediction");
        }
    }

    fn estimate(&self, step: u64, measurement: Option<Vec<f64>>, outcome: StepOutcome) -> TrackEstimate {
        let p = self.estimator.current_uncertainty();
        let dims = p.nrows().min(2);
        let variance: f64 = (0..dims).map(|i| p[(i, i)]).sum();

        TrackEstimate {
            step,
            timestamp: Utc::now(),
            measurement,
            state: self.estimator.current_estimate().as_slice().to_vec(),
            position_error: if variance < 0.0 { f64::INFINITY } else { variance.sqrt() },
            outcome,
        }
    }

    /// Process one frame and hand its estimate to every output
    ///
    /// Returns `false` once the source has no more frames.
    pub fn step_into(&mut self, outputs: &mut [Box<dyn OutputHandler>]) -> bool {
        let Some(estimate) = self.step() else {
            return false;
        };
        for output in outputs.iter_mut() {
            output.handle_estimate(&estimate);
        }
        true
    }

    /// Whether `max_steps` frames have been processed
    pub fn reached_limit(&self, max_steps: Option<u64>) -> bool {
        max_steps.map_or(false, |max| self.stats.steps >= max)
    }

    /// Run unpaced until the source ends or `max_steps` frames were processed
    pub fn run(&mut self, max_steps: Option<u64>, outputs: &mut [Box<dyn OutputHandler>]) -> TrackerStats {
        while !self.reached_limit(max_steps) && self.step_into(outputs) {}
        flush_all(outputs);
        self.stats
    }

    pub fn estimator(&self) -> &LinearStateEstimator {
        &self.estimator
    }

    pub fn stats(&self) -> TrackerStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{FixedDetector, ScriptedSource};
    use nalgebra::DMatrix;
    use std::sync::{Arc, Mutex};

    /// Collects every estimate it sees
    struct Collect(Arc<Mutex<Vec<TrackEstimate>>>);

    impl OutputHandler for Collect {
        fn handle_estimate(&mut self, estimate: &TrackEstimate) {
            if let Ok(mut v) = self.0.lock() {
                v.push(estimate.clone());
            }
        }
    }

    fn cv_estimator() -> LinearStateEstimator {
        LinearStateEstimator::constant_velocity_2d(1.0, 0.1, 0.5).unwrap()
    }

    #[test]
    fn test_step_outcomes() {
        let source = ScriptedSource::new(vec![Some([1.0, 1.0]), None, Some([3.0, 3.0])]);
        let mut tracker = Tracker::new(cv_estimator(), source);

        let first = tracker.step().unwrap();
        assert_eq!(first.step, 1);
        assert_eq!(first.outcome, StepOutcome::Corrected);
        assert_eq!(first.measurement, Some(vec![1.0, 1.0]));

        let second = tracker.step().unwrap();
        assert_eq!(second.outcome, StepOutcome::Coasted);
        assert!(second.measurement.is_none());
        // Coasting grows uncertainty
        assert!(second.position_error > first.position_error);

        let third = tracker.step().unwrap();
        assert_eq!(third.outcome, StepOutcome::Corrected);

        assert!(tracker.step().is_none());
        assert_eq!(
            tracker.stats(),
            TrackerStats {
                steps: 3,
                corrected: 2,
                coasted: 1,
                rejected: 0
            }
        );
    }

    #[test]
    fn test_degenerate_measurement_is_rejected() {
        let estimator = LinearStateEstimator::new(4, 2)
            .unwrap()
            .with_observation_matrix(DMatrix::zeros(2, 4))
            .unwrap()
            .with_measurement_noise(DMatrix::zeros(2, 2))
            .unwrap();
        let mut tracker = Tracker::new(estimator, FixedDetector::with_frames([5.0, 5.0], 3));

        let mut outputs: Vec<Box<dyn OutputHandler>> = Vec::new();
        let stats = tracker.run(None, &mut outputs);

        assert_eq!(stats.rejected, 3);
        assert!(tracker.estimator().current_estimate().iter().all(|v| v.is_finite()));
        // Each rejected step still advanced the covariance by Q
        assert!((tracker.estimator().current_uncertainty()[(0, 0)] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_wrong_measurement_size_is_rejected() {
        let estimator = LinearStateEstimator::new(4, 3).unwrap();
        let mut tracker = Tracker::new(estimator, FixedDetector::with_frames([5.0, 5.0], 1));

        let estimate = tracker.step().unwrap();
        assert_eq!(estimate.outcome, StepOutcome::Rejected);
        assert_eq!(tracker.stats().rejected, 1);
    }

    #[test]
    fn test_run_fixed_detector_converges() {
        let collected = Arc::new(Mutex::new(Vec::new()));
        let mut outputs: Vec<Box<dyn OutputHandler>> = vec![Box::new(Collect(collected.clone()))];

        let mut tracker = Tracker::new(cv_estimator(), FixedDetector::new([100.0, 100.0]));
        let stats = tracker.run(Some(60), &mut outputs);

        assert_eq!(stats.steps, 60);
        assert_eq!(stats.corrected, 60);

        let estimates = collected.lock().unwrap();
        assert_eq!(estimates.len(), 60);
        let pos = estimates[59].position().unwrap();
        assert!((pos[0] - 100.0).abs() < 0.5);
        assert!((pos[1] - 100.0).abs() < 0.5);
        let vel = estimates[59].velocity().unwrap();
        assert!(vel[0].abs() < 0.5);
    }

    #[test]
    fn test_step_into_feeds_outputs() {
        let collected = Arc::new(Mutex::new(Vec::new()));
        let mut outputs: Vec<Box<dyn OutputHandler>> = vec![Box::new(Collect(collected.clone()))];
        let mut tracker = Tracker::new(cv_estimator(), ScriptedSource::new(vec![Some([2.0, 2.0]), None]));

        assert!(!tracker.reached_limit(Some(1)));
        assert!(tracker.step_into(&mut outputs));
        assert!(tracker.reached_limit(Some(1)));
        assert!(!tracker.reached_limit(None));
        assert!(tracker.step_into(&mut outputs));
        assert!(!tracker.step_into(&mut outputs));

        let estimates = collected.lock().unwrap();
        let outcomes: Vec<_> = estimates.iter().map(|e| e.outcome).collect();
        assert_eq!(outcomes, vec![StepOutcome::Corrected, StepOutcome::Coasted]);
    }

    #[test]
    fn test_estimate_serializes() {
        let mut tracker = Tracker::new(cv_estimator(), ScriptedSource::new(vec![None]));
        let estimate = tracker.step().unwrap();

        let json = serde_json::to_value(&estimate).unwrap();
        assert_eq!(json["outcome"], "coasted");
        assert_eq!(json["step"], 1);
        assert!(json["measurement"].is_null());
        assert_eq!(json["state"].as_array().unwrap().len(), 4);
    }
}
