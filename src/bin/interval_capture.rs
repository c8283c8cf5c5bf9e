// Copyright (c) 2023 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::fs;
use std::path::PathBuf;

use canonical_error::{CanonicalError, failed_precondition_error};
use clap::Parser;
use env_logger;
use imageproc::rect::Rect;
use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};

use timed_capture::abstract_camera::AbstractCamera;
use timed_capture::bayer::develop;
use timed_capture::capture_session::CaptureSession;
use timed_capture::config::CaptureConfig;
use timed_capture::roi::select_roi;
use timed_capture::select_camera::select_camera;
use timed_capture::temperature::TemperatureRecorder;
use timed_capture::temperature_log::TemperatureLog;

/// Acquires frames continuously and saves them as TIFF files at a fixed
/// cadence, optionally cropped to a region of interest and accompanied by
/// thermocouple readings logged to CSV.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about=None)]
struct Args {
    /// Capture profile (TOML). Built-in defaults are used when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory receiving the TIFF files.
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Prefix of every saved file name.
    #[arg(short, long)]
    sample_name: Option<String>,

    /// Seconds between saved frames.
    #[arg(long)]
    interval_secs: Option<f64>,

    /// Save frames whose id is a multiple of N instead of using an interval.
    #[arg(long)]
    every_nth_frame: Option<u64>,

    /// Pick a region of interest on a preview before acquiring.
    #[arg(long, conflicts_with = "no_roi")]
    select_roi: bool,

    /// Save full frames even if the profile selects a region of interest.
    #[arg(long)]
    no_roi: bool,

    /// Region of interest on the 800x600 preview as x,y,width,height.
    #[arg(long)]
    selection: Option<String>,

    /// Log temperatures alongside saved frames.
    #[arg(long)]
    temperature: bool,
}

fn load_config(args: &Args) -> Result<CaptureConfig, CanonicalError> {
    let mut config = match &args.config {
        Some(path) => CaptureConfig::load(path)?,
        None => CaptureConfig::default(),
    };
    let capture = &mut config.capture;
    if let Some(dir) = &args.output_dir {
        capture.output_dir = dir.clone();
    }
    if let Some(name) = &args.sample_name {
        capture.sample_name = name.clone();
    }
    if let Some(secs) = args.interval_secs {
        capture.interval_secs = secs;
        capture.every_nth_frame = None;
    }
    if args.every_nth_frame.is_some() {
        capture.every_nth_frame = args.every_nth_frame;
    }
    if args.select_roi || args.selection.is_some() {
        capture.select_roi = true;
    }
    if args.no_roi {
        capture.select_roi = false;
    }
    if args.selection.is_some() {
        capture.selection = args.selection.clone();
    }
    if args.temperature {
        config.temperature.enabled = true;
    }
    config.validate()?;
    Ok(config)
}

async fn choose_roi(camera: &mut (dyn AbstractCamera + Send), config: &CaptureConfig)
                    -> Result<Rect, CanonicalError> {
    let frame = camera.acquire_frame().await?;
    info!("Selecting region of interest on frame {} ({}x{})",
          frame.frame_id, frame.width, frame.height);
    let image = develop(frame)?;
    let preset = config.capture.selection()?;
    let preview_path = config.capture.preview_path();
    // Prompting blocks on stdin.
    tokio::task::spawn_blocking(move || {
        let mut stdin = std::io::stdin().lock();
        select_roi(&image, &preview_path, preset, &mut stdin)
    }).await.map_err(|e| failed_precondition_error(
        format!("Region of interest prompt failed: {}", e).as_str()))?
}

// Returns on Ctrl-C or when a line reading "c" is entered.
async fn wait_for_quit() {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Acquisition interrupted by user");
                return;
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) if line.trim() == "c" => return,
                    Ok(Some(_)) => info!("Camera is on; enter 'c' to stop"),
                    Ok(None) | Err(_) => {
                        // No usable stdin; only Ctrl-C can stop us.
                        let _ = tokio::signal::ctrl_c().await;
                        info!("Acquisition interrupted by user");
                        return;
                    }
                }
            }
        }
    }
}

async fn run(args: Args) -> Result<(), CanonicalError> {
    let config = load_config(&args)?;
    let capture = &config.capture;
    fs::create_dir_all(&capture.output_dir).map_err(|e| failed_precondition_error(
        format!("Cannot create {}: {}", capture.output_dir.display(), e).as_str()))?;

    let mut camera = select_camera(&config.camera.interface())?;
    config.camera.apply(camera.as_mut())?;

    let cadence = capture.cadence()?;
    let naming = capture.naming();
    let mut session = CaptureSession::new(&capture.output_dir, &capture.sample_name,
                                          naming, cadence);
    if capture.select_roi {
        let roi = match choose_roi(camera.as_mut(), &config).await {
            Ok(roi) => roi,
            Err(e) => {
                error!("Region of interest selection failed: {}", e);
                camera.stop_acquisition().await?;
                return Err(e);
            }
        };
        session = session.with_roi(roi);
    }
    if config.temperature.enabled {
        let csv_path = config.temperature.csv_path(capture);
        let source = config.temperature.build_source()?;
        info!("Logging temperatures from {} to {}", source.description(), csv_path.display());
        let log = TemperatureLog::open(&csv_path)?;
        session = session.with_temperature(TemperatureRecorder::new(
            source, config.temperature.samples_per_save, log));
    }

    info!("Saving {:?} frames as {}/{}_*.tiff ({:?})",
          cadence, capture.output_dir.display(), capture.sample_name, naming);
    camera.start_acquisition(session.into_callback())?;
    info!("Camera is on; press Ctrl-C or enter 'c' to stop");
    wait_for_quit().await;

    if let Err(e) = camera.stop_acquisition().await {
        warn!("Stopping acquisition: {}", e);
        return Err(e);
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    // If any thread panics, bail out.
    std::panic::set_hook(Box::new(|panic_info| {
        eprintln!("Thread panicked: {}", panic_info);
        std::process::exit(1);
    }));
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    // Exit explicitly; a pending stdin read would otherwise hold up runtime
    // shutdown.
    match run(args).await {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    }
}
