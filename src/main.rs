// Visual tracker - Main Entry Point
// Copyright (C) 2024
// Licensed under AGPL v3
//
// Feeds detections from a measurement source through a constant-velocity
// Kalman filter, one frame at a time, until the source ends, the step limit
// is reached, or Ctrl+C.

use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{error, info};

use visual_track::config::Config;
use visual_track::constants::DEFAULT_FIXED_POSITION;
use visual_track::kalman::{CovarianceForm, InversionMode, LinearStateEstimator};
use visual_track::output::{flush_all, CsvOutput, JsonOutput, LogOutput, OutputHandler};
use visual_track::source::{CsvSource, FixedDetector, MeasurementSource, NoisySource};
use visual_track::tracker::Tracker;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse command-line arguments
    let config = Config::parse();

    // Initialize logging
    init_logging(config.verbose);

    info!("Starting visual tracker");

    let estimator = build_estimator(&config)?;
    let source = build_source(&config)?;
    let mut outputs = build_outputs(&config);

    let mut tracker = Tracker::new(estimator, source);
    run_loop(&mut tracker, &config, &mut outputs).await;

    let stats = tracker.stats();
    info!(
        steps = stats.steps,
        corrected = stats.corrected,
        coasted = stats.coasted,
        rejected = stats.rejected,
        "Tracker stopped"
    );
    if let Some([x, y]) = tracker.estimator().position() {
        info!("Final position estimate ({:.2}, {:.2})", x, y);
    }

    Ok(())
}

fn build_estimator(config: &Config) -> Result<LinearStateEstimator, Box<dyn std::error::Error>> {
    let estimator = LinearStateEstimator::constant_velocity_2d(
        config.dt,
        config.process_noise,
        config.measurement_noise,
    )?
    .with_covariance_form(if config.joseph {
        CovarianceForm::Joseph
    } else {
        CovarianceForm::Simple
    })
    .with_inversion_mode(if config.pseudo_inverse {
        InversionMode::PseudoInverse
    } else {
        InversionMode::Strict
    });

    info!(
        dt = config.dt,
        process_noise = config.process_noise,
        measurement_noise = config.measurement_noise,
        "Constant-velocity model"
    );
    Ok(estimator)
}

fn build_source(config: &Config) -> Result<Box<dyn MeasurementSource>, Box<dyn std::error::Error>> {
    let source: Box<dyn MeasurementSource> = match &config.input {
        Some(path) => {
            info!("Reading detections from {}", path);
            Box::new(CsvSource::open(path)?)
        }
        None => {
            let position = config.fixed.unwrap_or(DEFAULT_FIXED_POSITION);
            info!("Fixed detector at ({}, {})", position[0], position[1]);
            match config.frames {
                Some(frames) => Box::new(FixedDetector::with_frames(position, frames)),
                None => Box::new(FixedDetector::new(position)),
            }
        }
    };

    if config.jitter > 0.0 {
        info!("Adding detection jitter of +/-{}", config.jitter);
        return Ok(Box::new(NoisySource::new(source, config.jitter, config.seed)?));
    }
    Ok(source)
}

fn build_outputs(config: &Config) -> Vec<Box<dyn OutputHandler>> {
    let mut outputs: Vec<Box<dyn OutputHandler>> = Vec::new();

    if !config.quiet {
        outputs.push(Box::new(LogOutput));
    }

    // CSV Output
    for filename in &config.write_csv {
        info!("Writing CSV estimates to {}", filename);
        match CsvOutput::create(filename) {
            Ok(csv_out) => outputs.push(Box::new(csv_out)),
            Err(e) => error!("Failed to open CSV output file {}: {}", filename, e),
        }
    }

    // JSON Output
    if let Some(filename) = &config.write_json {
        info!("Writing JSON estimates to {}", filename);
        match JsonOutput::create(filename) {
            Ok(json_out) => outputs.push(Box::new(json_out)),
            Err(e) => error!("Failed to open JSON output file {}: {}", filename, e),
        }
    }

    outputs
}

/// Frame loop: one tracker step per tick
async fn run_loop<S: MeasurementSource>(
    tracker: &mut Tracker<S>,
    config: &Config,
    outputs: &mut [Box<dyn OutputHandler>],
) {
    let mut ticker = (config.fps > 0).then(|| {
        let mut interval = tokio::time::interval(Duration::from_secs_f64(1.0 / config.fps as f64));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval
    });

    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        if tracker.reached_limit(config.max_steps) {
            info!("Reached step limit of {}", tracker.stats().steps);
            break;
        }

        tokio::select! {
            result = &mut ctrl_c => {
                match result {
                    Ok(()) => info!("Received shutdown signal (Ctrl+C)"),
                    Err(err) => error!("Unable to listen for shutdown signal: {}", err),
                }
                break;
            }
            _ = next_tick(&mut ticker) => {}
        }

        if !tracker.step_into(outputs) {
            info!("Measurement stream ended");
            break;
        }
    }

    flush_all(outputs);
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => tokio::task::yield_now().await,
    }
}

/// Initialize logging subsystem
fn init_logging(verbose: bool) {
    use tracing_subscriber::fmt::format::FmtSpan;

    let subscriber = tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(false)
        .with_level(true)
        .with_span_events(if verbose {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        });

    if verbose {
        subscriber
            .with_max_level(tracing::Level::DEBUG)
            .init();
        info!("Verbose logging enabled (DEBUG level)");
    } else {
        subscriber
            .with_max_level(tracing::Level::INFO)
            .init();
    }
}
