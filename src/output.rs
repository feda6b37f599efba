use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use tracing::{error, info};

use crate::tracker::TrackEstimate;

/// Trait for output handlers
pub trait OutputHandler: Send {
    /// Handle the estimate of one frame
    fn handle_estimate(&mut self, estimate: &TrackEstimate);

    /// Push buffered output to its destination
    fn flush(&mut self) {}
}

/// Flush every output
pub fn flush_all(outputs: &mut [Box<dyn OutputHandler>]) {
    for output in outputs.iter_mut() {
        output.flush();
    }
}

/// Header line written by `CsvOutput`
pub const CSV_HEADER: &str = "step,meas_x,meas_y,est_x,est_y,vx,vy,pos_err,outcome";

/// CSV format output
pub struct CsvOutput<W: Write> {
    writer: W,
}

impl CsvOutput<BufWriter<File>> {
    /// Create (truncate) `path` and write the header line
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::create(path)?;
        CsvOutput::new(BufWriter::new(file))
    }
}

impl<W: Write> CsvOutput<W> {
    pub fn new(mut writer: W) -> io::Result<Self> {
        writeln!(writer, "{}", CSV_HEADER)?;
        Ok(CsvOutput { writer })
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }

    /// Format: step,meas_x,meas_y,est_x,est_y,vx,vy,pos_err,outcome
    ///
    /// Missing values are left empty.
    pub fn format_row(estimate: &TrackEstimate) -> String {
        fn field(v: Option<f64>) -> String {
            v.map(|v| format!("{:.4}", v)).unwrap_or_default()
        }

        let meas = estimate.measurement.as_deref().unwrap_or(&[]);
        let pos = estimate.position();
        let vel = estimate.velocity();

        format!(
            "{},{},{},{},{},{},{},{:.4},{}",
            estimate.step,
            field(meas.first().copied()),
            field(meas.get(1).copied()),
            field(pos.map(|p| p[0])),
            field(pos.map(|p| p[1])),
            field(vel.map(|v| v[0])),
            field(vel.map(|v| v[1])),
            estimate.position_error,
            estimate.outcome.as_str(),
        )
    }
}

impl<W: Write + Send> OutputHandler for CsvOutput<W> {
    fn handle_estimate(&mut self, estimate: &TrackEstimate) {
        if let Err(e) = writeln!(self.writer, "{}", Self::format_row(estimate)) {
            error!("Failed to write CSV: {}", e);
        }
    }

    fn flush(&mut self) {
        if let Err(e) = self.writer.flush() {
            error!("Failed to flush CSV: {}", e);
        }
    }
}

/// JSON lines output, one object per estimate
pub struct JsonOutput<W: Write> {
    writer: W,
}

impl JsonOutput<BufWriter<File>> {
    pub fn create<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(JsonOutput::new(BufWriter::new(file)))
    }
}

impl<W: Write> JsonOutput<W> {
    pub fn new(writer: W) -> Self {
        JsonOutput { writer }
    }

    pub fn get_ref(&self) -> &W {
        &self.writer
    }
}

impl<W: Write + Send> OutputHandler for JsonOutput<W> {
    fn handle_estimate(&mut self, estimate: &TrackEstimate) {
        let result = serde_json::to_writer(&mut self.writer, estimate)
            .map_err(io::Error::from)
            .and_then(|_| self.writer.write_all(b"\n"));
        if let Err(e) = result {
            error!("Failed to write JSON: {}", e);
        }
    }

    fn flush(&mut self) {
        if let Err(e) = self.writer.flush() {
            error!("Failed to flush JSON: {}", e);
        }
    }
}

/// Logs every estimate at INFO level
#[derive(Debug, Default)]
pub struct LogOutput;

impl OutputHandler for LogOutput {
    fn handle_estimate(&mut self, estimate: &TrackEstimate) {
        match estimate.position() {
            Some([x, y]) => info!(
                step = estimate.step,
                outcome = estimate.outcome.as_str(),
                "Estimated position ({:.2}, {:.2}) +/- {:.2}",
                x,
                y,
                estimate.position_error
            ),
            None => info!(
                step = estimate.step,
                outcome = estimate.outcome.as_str(),
                state = ?estimate.state,
                "Estimated state"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::StepOutcome;
    use chrono::Utc;

    fn estimate(measurement: Option<Vec<f64>>, outcome: StepOutcome) -> TrackEstimate {
        TrackEstimate {
            step: 7,
            timestamp: Utc::now(),
            measurement,
            state: vec![1.0, 2.0, 0.5, -0.25],
            position_error: 0.125,
            outcome,
        }
    }

    #[test]
    fn test_csv_row() {
        let row = CsvOutput::<Vec<u8>>::format_row(&estimate(Some(vec![1.5, 2.5]), StepOutcome::Corrected));
        assert_eq!(row, "7,1.5000,2.5000,1.0000,2.0000,0.5000,-0.2500,0.1250,corrected");

        let row = CsvOutput::<Vec<u8>>::format_row(&estimate(None, StepOutcome::Coasted));
        assert_eq!(row, "7,,,1.0000,2.0000,0.5000,-0.2500,0.1250,coasted");
    }

    #[test]
    fn test_csv_output_writes_header_and_rows() {
        let mut output = CsvOutput::new(Vec::new()).unwrap();
        output.handle_estimate(&estimate(None, StepOutcome::Coasted));

        let text = String::from_utf8(output.get_ref().clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], CSV_HEADER);
        assert!(lines[1].ends_with(",coasted"));
    }

    #[test]
    fn test_json_lines() {
        let mut output = JsonOutput::new(Vec::new());
        output.handle_estimate(&estimate(Some(vec![1.5, 2.5]), StepOutcome::Corrected));
        output.handle_estimate(&estimate(None, StepOutcome::Rejected));

        let text = String::from_utf8(output.get_ref().clone()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["step"], 7);
        assert_eq!(first["outcome"], "corrected");
        assert_eq!(first["measurement"][1], 2.5);

        let second: serde_json::Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second["outcome"], "rejected");
    }
}
