// Copyright (c) 2023 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::path::PathBuf;

use chrono::offset::Local;
use chrono::DateTime;
use clap::Parser;
use env_logger;
use log::info;

use timed_capture::bayer::develop;
use timed_capture::config::CaptureConfig;
use timed_capture::roi::{fit_within, resize_preview};
use timed_capture::select_camera::select_camera;

/// Utility program for grabbing a single colour-converted frame from the
/// camera.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about=None)]
struct Args {
    /// Output file; the format follows the extension (e.g. .tiff, .png).
    output: PathBuf,

    /// Capture profile (TOML) for camera settings.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Also write a copy scaled to fit a 1280x720 screen to this file.
    #[arg(long)]
    preview: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => CaptureConfig::load(path).unwrap(),
        None => CaptureConfig::default(),
    };
    let mut camera = select_camera(&config.camera.interface()).unwrap();
    config.camera.apply(camera.as_mut()).unwrap();

    let frame = camera.acquire_frame().await.unwrap();
    let (frame_id, readout_time) = (frame.frame_id, frame.readout_time);
    let image = develop(frame).unwrap();
    image.save(&args.output).unwrap();

    if let Some(preview_path) = &args.preview {
        let size = fit_within((image.width(), image.height()), (1280, 720));
        resize_preview(&image.to_rgb8(), size).unwrap().save(preview_path).unwrap();
        info!("Preview {}x{} written to {}", size.0, size.1, preview_path.display());
    }

    let datetime: DateTime<Local> = readout_time.into();
    info!("Frame {} ({}x{}) obtained at {} and saved to {}",
          frame_id, image.width(), image.height(),
          datetime.format("%d/%m/%Y %T"), args.output.display());
}
