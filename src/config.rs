use clap::Parser;

use crate::constants::{
    DEFAULT_DT, DEFAULT_FPS, DEFAULT_MEASUREMENT_NOISE, DEFAULT_PROCESS_NOISE, MAX_FPS,
};

/// Visual tracker configuration
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Read detections from a file, one `x,y` per line (blank or `-` = no detection).
    #[arg(long, value_name = "FILE", conflicts_with = "fixed")]
    pub input: Option<String>,

    /// Use a stub detector that always reports this position.
    #[arg(long, value_name = "X,Y", value_parser = parse_point)]
    pub fixed: Option<[f64; 2]>,

    /// Number of frames the stub detector produces (runs forever if unset).
    #[arg(long, value_name = "N")]
    pub frames: Option<usize>,

    /// Stop after this many frames.
    #[arg(long, value_name = "N")]
    pub max_steps: Option<u64>,

    /// Frame interval of the constant-velocity model.
    #[arg(long, default_value_t = DEFAULT_DT)]
    pub dt: f64,

    /// Acceleration noise standard deviation of the motion model.
    #[arg(long, default_value_t = DEFAULT_PROCESS_NOISE)]
    pub process_noise: f64,

    /// Detector position variance.
    #[arg(long, default_value_t = DEFAULT_MEASUREMENT_NOISE)]
    pub measurement_noise: f64,

    /// Add uniform jitter of this amplitude to every detection.
    #[arg(long, default_value_t = 0.0, value_parser = parse_jitter)]
    pub jitter: f64,

    /// Seed for the jitter generator.
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Frames per second, 0 to process frames as fast as they arrive.
    #[arg(
        long,
        default_value_t = DEFAULT_FPS,
        value_parser = clap::value_parser!(u32).range(0..=MAX_FPS as i64)
    )]
    pub fps: u32,

    /// Use the Joseph-form covariance update.
    #[arg(long, default_value_t = false)]
    pub joseph: bool,

    /// Pseudo-invert a singular innovation covariance instead of skipping the update.
    #[arg(long, default_value_t = false)]
    pub pseudo_inverse: bool,

    /// Write estimates in CSV format to a local file.
    #[arg(long, value_name = "FILE")]
    pub write_csv: Vec<String>,

    /// Write estimates as JSON lines to a local file.
    #[arg(long, value_name = "FILE")]
    pub write_json: Option<String>,

    /// Do not log every estimate.
    #[arg(long, short, default_value_t = false)]
    pub quiet: bool,

    /// Verbose logging (DEBUG level)
    #[arg(long, short, default_value_t = false)]
    pub verbose: bool,
}

/// Parse `X,Y` into a point
fn parse_point(s: &str) -> Result<[f64; 2], String> {
    let (x, y) = s
        .split_once(',')
        .ok_or_else(|| format!("expected X,Y, got '{}'", s))?;
    let x = x
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid X '{}': {}", x, e))?;
    let y = y
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid Y '{}': {}", y, e))?;
    Ok([x, y])
}

/// Parse a jitter amplitude: finite and non-negative
fn parse_jitter(s: &str) -> Result<f64, String> {
    let amplitude = s
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid jitter '{}': {}", s, e))?;
    if !amplitude.is_finite() || amplitude < 0.0 {
        return Err(format!("jitter must be finite and non-negative, got {}", s));
    }
    Ok(amplitude)
}
