// Measurement sources
//
// Anything that yields, frame by frame, either a detected position or
// nothing. The tracker does not care where detections come from.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

use nalgebra::DVector;
use rand::distributions::{Distribution, Uniform};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::warn;

use crate::error::EstimatorError;

/// Detector output for one frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Object seen at this position
    Detected(DVector<f64>),
    /// No detection this frame
    Missed,
}

impl Frame {
    pub fn position(x: f64, y: f64) -> Self {
        Frame::Detected(DVector::from_vec(vec![x, y]))
    }

    pub fn measurement(&self) -> Option<&DVector<f64>> {
        match self {
            Frame::Detected(z) => Some(z),
            Frame::Missed => None,
        }
    }
}

/// Source of per-frame detections
pub trait MeasurementSource {
    /// Next frame, or `None` once the stream has ended
    fn next_frame(&mut self) -> Option<Frame>;
}

impl<S: MeasurementSource + ?Sized> MeasurementSource for Box<S> {
    fn next_frame(&mut self) -> Option<Frame> {
        (**self).next_frame()
    }
}

/// Detector stub that always reports the same position
#[derive(Debug, Clone)]
pub struct FixedDetector {
    position: [f64; 2],
    remaining: Option<usize>,
}

impl FixedDetector {
    /// Detects `position` forever
    pub fn new(position: [f64; 2]) -> Self {
        FixedDetector {
            position,
            remaining: None,
        }
    }

    /// Detects `position` for `frames` frames, then ends the stream
    pub fn with_frames(position: [f64; 2], frames: usize) -> Self {
        FixedDetector {
            position,
            remaining: Some(frames),
        }
    }
}

impl MeasurementSource for FixedDetector {
    fn next_frame(&mut self) -> Option<Frame> {
        if let Some(remaining) = self.remaining.as_mut() {
            if *remaining == 0 {
                return None;
            }
            *remaining -= 1;
        }
        Some(Frame::position(self.position[0], self.position[1]))
    }
}

/// Replays a fixed list of frames; `None` entries are missed detections
#[derive(Debug, Clone, Default)]
pub struct ScriptedSource {
    frames: VecDeque<Option<[f64; 2]>>,
}

impl ScriptedSource {
    pub fn new(frames: Vec<Option<[f64; 2]>>) -> Self {
        ScriptedSource {
            frames: frames.into(),
        }
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl MeasurementSource for ScriptedSource {
    fn next_frame(&mut self) -> Option<Frame> {
        let frame = self.frames.pop_front()?;
        Some(match frame {
            Some([x, y]) => Frame::position(x, y),
            None => Frame::Missed,
        })
    }
}

/// Reads detections as text, one frame per line
///
/// Format: `x,y` per line. An empty line or `-` is a missed detection;
/// lines starting with `#` are skipped. Lines that do not parse are
/// logged and count as missed.
pub struct CsvSource<R> {
    lines: io::Lines<R>,
    line_no: usize,
}

impl CsvSource<BufReader<File>> {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(CsvSource::new(BufReader::new(file)))
    }
}

impl<R: BufRead> CsvSource<R> {
    pub fn new(reader: R) -> Self {
        CsvSource {
            lines: reader.lines(),
            line_no: 0,
        }
    }
}

/// Parse `x,y`. Returns `None` on anything else.
fn parse_position(line: &str) -> Option<[f64; 2]> {
    let mut fields = line.split(',').map(str::trim);
    let x = fields.next()?.parse::<f64>().ok()?;
    let y = fields.next()?.parse::<f64>().ok()?;
    if fields.next().is_some() || !x.is_finite() || !y.is_finite() {
        return None;
    }
    Some([x, y])
}

impl<R: BufRead> MeasurementSource for CsvSource<R> {
    fn next_frame(&mut self) -> Option<Frame> {
        loop {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                    // The bad bytes are already consumed; carry on with the next line
                    self.line_no += 1;
                    warn!(line_no = self.line_no, "Measurement is not valid UTF-8, treating as missed");
                    return Some(Frame::Missed);
                }
                Err(e) => {
                    warn!("Failed to read measurement at line {}: {}", self.line_no + 1, e);
                    return None;
                }
            };
            self.line_no += 1;

            let line = line.trim();
            if line.starts_with('#') {
                continue;
            }
            if line.is_empty() || line == "-" {
                return Some(Frame::Missed);
            }

            return Some(match parse_position(line) {
                Some([x, y]) => Frame::position(x, y),
                None => {
                    warn!(line_no = self.line_no, line, "Malformed measurement, treating as missed");
                    Frame::Missed
                }
            });
        }
    }
}

/// Adds zero-mean uniform jitter to another source's detections
pub struct NoisySource<S> {
    inner: S,
    jitter: Option<Uniform<f64>>,
    rng: StdRng,
}

impl<S: MeasurementSource> NoisySource<S> {
    /// Jitter in `[-amplitude, amplitude]` on every component
    ///
    /// `InvalidParameter` if the amplitude is negative, NaN or infinite.
    pub fn new(inner: S, amplitude: f64, seed: u64) -> Result<Self, EstimatorError> {
        if !amplitude.is_finite() || amplitude < 0.0 {
            return Err(EstimatorError::InvalidParameter(format!(
                "jitter amplitude must be finite and non-negative, got {}",
                amplitude
            )));
        }
        Ok(NoisySource {
            inner,
            jitter: (amplitude > 0.0).then(|| Uniform::new_inclusive(-amplitude, amplitude)),
            rng: StdRng::seed_from_u64(seed),
        })
    }
}

impl<S: MeasurementSource> MeasurementSource for NoisySource<S> {
    fn next_frame(&mut self) -> Option<Frame> {
        let frame = self.inner.next_frame()?;
        let Some(jitter) = self.jitter else {
            return Some(frame);
        };
        Some(match frame {
            Frame::Detected(z) => Frame::Detected(z.map(|v| v + jitter.sample(&mut self.rng))),
            Frame::Missed => Frame::Missed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn collect<S: MeasurementSource>(mut source: S) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = source.next_frame() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_fixed_detector_limited() {
        let frames = collect(FixedDetector::with_frames([100.0, 100.0], 3));
        assert_eq!(frames.len(), 3);
        assert!(frames.iter().all(|f| *f == Frame::position(100.0, 100.0)));
    }

    #[test]
    fn test_fixed_detector_unlimited() {
        let mut source = FixedDetector::new([1.0, 2.0]);
        for _ in 0..1000 {
            assert_eq!(source.next_frame(), Some(Frame::position(1.0, 2.0)));
        }
    }

    #[test]
    fn test_scripted_source() {
        let mut source = ScriptedSource::new(vec![Some([1.0, 1.0]), None, Some([3.0, 3.0])]);
        assert_eq!(source.remaining(), 3);
        assert_eq!(source.next_frame(), Some(Frame::position(1.0, 1.0)));
        assert_eq!(source.next_frame(), Some(Frame::Missed));
        assert_eq!(source.next_frame(), Some(Frame::position(3.0, 3.0)));
        assert_eq!(source.next_frame(), None);
    }

    #[test]
    fn test_csv_source() {
        let text = "# x,y\n1.5,2.5\n\n-\n 3 , 4 \nbogus\n1,2,3\n";
        let frames = collect(CsvSource::new(Cursor::new(text)));

        assert_eq!(
            frames,
            vec![
                Frame::position(1.5, 2.5),
                Frame::Missed,
                Frame::Missed,
                Frame::position(3.0, 4.0),
                Frame::Missed,
                Frame::Missed,
            ]
        );
    }

    #[test]
    fn test_csv_source_skips_invalid_utf8_line() {
        let bytes: &[u8] = b"1,1\n\xff\xfe,2\n3,3\n";
        let frames = collect(CsvSource::new(Cursor::new(bytes)));

        assert_eq!(
            frames,
            vec![Frame::position(1.0, 1.0), Frame::Missed, Frame::position(3.0, 3.0)]
        );
    }

    #[test]
    fn test_parse_position() {
        assert_eq!(parse_position("1,2"), Some([1.0, 2.0]));
        assert_eq!(parse_position("1"), None);
        assert_eq!(parse_position("1,NaN"), None);
        assert_eq!(parse_position("a,b"), None);
    }

    #[test]
    fn test_noisy_source_bounded_and_reproducible() {
        let a = collect(NoisySource::new(FixedDetector::with_frames([10.0, 10.0], 200), 0.5, 7).unwrap());
        let b = collect(NoisySource::new(FixedDetector::with_frames([10.0, 10.0], 200), 0.5, 7).unwrap());
        assert_eq!(a, b);

        let mut sum = 0.0;
        for frame in &a {
            let z = frame.measurement().unwrap();
            assert!((z[0] - 10.0).abs() <= 0.5);
            assert!((z[1] - 10.0).abs() <= 0.5);
            sum += z[0] - 10.0;
        }
        // Zero-mean jitter
        assert!((sum / a.len() as f64).abs() < 0.1);
    }

    #[test]
    fn test_noisy_source_rejects_bad_amplitude() {
        for amplitude in [f64::INFINITY, f64::NAN, -1.0] {
            let result = NoisySource::new(FixedDetector::with_frames([1.0, 1.0], 1), amplitude, 0);
            assert!(matches!(result, Err(EstimatorError::InvalidParameter(_))));
        }
    }

    #[test]
    fn test_noisy_source_zero_amplitude_is_passthrough() {
        let frames = collect(NoisySource::new(FixedDetector::with_frames([1.0, 2.0], 2), 0.0, 0).unwrap());
        assert_eq!(frames, vec![Frame::position(1.0, 2.0), Frame::position(1.0, 2.0)]);
    }

    #[test]
    fn test_noisy_source_passes_missed_frames() {
        let source = ScriptedSource::new(vec![None, Some([0.0, 0.0])]);
        let frames = collect(NoisySource::new(source, 1.0, 1).unwrap());
        assert_eq!(frames[0], Frame::Missed);
        assert!(frames[1].measurement().is_some());
    }
}
