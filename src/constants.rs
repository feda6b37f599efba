// Shared constants for the estimator and the tracking loop

/// State dimension of the 2-D constant-velocity model: [px, py, vx, vy].
pub const DEFAULT_STATE_DIM: usize = 4;

/// Measurement dimension of a detected image position: [px, py].
pub const DEFAULT_MEASUREMENT_DIM: usize = 2;

/// Singular values below this are treated as zero when pseudo-inverting S.
pub const PINV_EPSILON: f64 = 1e-10;

/// Largest |P - Pᵗ| entry accepted as symmetric.
pub const SYMMETRY_TOLERANCE: f64 = 1e-9;

/// Position reported by the fixed stub detector.
pub const DEFAULT_FIXED_POSITION: [f64; 2] = [100.0, 100.0];

/// Frame interval of the motion model, in frames.
pub const DEFAULT_DT: f64 = 1.0;

/// Acceleration noise of the constant-velocity model (pixels / frame²).
pub const DEFAULT_PROCESS_NOISE: f64 = 0.5;

/// Detector position variance (pixels²).
pub const DEFAULT_MEASUREMENT_NOISE: f64 = 4.0;

/// Frame pacing of the run loop. 0 runs as fast as frames arrive.
pub const DEFAULT_FPS: u32 = 30;

/// Highest frame rate the paced loop accepts
pub const MAX_FPS: u32 = 1000;
