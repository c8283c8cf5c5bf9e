// Copyright (c) 2023 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::{DateTime, Local};
use image::ImageFormat;
use imageproc::rect::Rect;
use log::{debug, info, warn};
use serde::Deserialize;

use crate::abstract_camera::{FrameCallback, RawFrame};
use crate::bayer::develop;
use crate::roi::crop;
use crate::save_gate::{SaveCadence, SaveGate};
use crate::temperature::TemperatureRecorder;

/// How saved frames are named within the output directory.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileNaming {
    /// `<sample>_<HH-MM-SS-micros>.tiff`, wall clock time of the save.
    Timestamp,
    /// `<sample>_<NNNNNN>.tiff`, numbering saves from zero.
    Counter,
}

/// Everything the frame callback needs between invocations. The session is
/// moved into the camera's callback, so it is only ever touched from the
/// camera's worker thread.
pub struct CaptureSession {
    output_dir: PathBuf,
    sample_name: String,
    naming: FileNaming,

    // Full-resolution crop applied before saving.
    roi: Option<Rect>,
    gate: SaveGate,
    temperature: Option<TemperatureRecorder>,

    next_index: u64,
    saved_frames: u64,
    failed_saves: u64,
}

impl CaptureSession {
    pub fn new(output_dir: &Path, sample_name: &str, naming: FileNaming,
               cadence: SaveCadence) -> Self {
        CaptureSession{output_dir: output_dir.to_path_buf(),
                       sample_name: sample_name.to_string(),
                       naming,
                       roi: None,
                       gate: SaveGate::new(cadence),
                       temperature: None,
                       next_index: 0,
                       saved_frames: 0,
                       failed_saves: 0}
    }

    pub fn with_roi(mut self, roi: Rect) -> Self {
        self.roi = Some(roi);
        self
    }

    pub fn with_temperature(mut self, recorder: TemperatureRecorder) -> Self {
        self.temperature = Some(recorder);
        self
    }

    pub fn saved_frames(&self) -> u64 {
        self.saved_frames
    }

    pub fn failed_saves(&self) -> u64 {
        self.failed_saves
    }

    fn frame_filename(&self, index: u64, wall_time: &DateTime<Local>) -> String {
        match self.naming {
            FileNaming::Timestamp => format!("{}_{}.tiff", self.sample_name,
                                             wall_time.format("%H-%M-%S-%6f")),
            FileNaming::Counter => format!("{}_{:06}.tiff", self.sample_name, index),
        }
    }

    /// Handles one arriving frame. Returns the path written, if any.
    pub fn on_frame(&mut self, frame: RawFrame) -> Option<PathBuf> {
        self.on_frame_at(frame, Instant::now(), Local::now())
    }

    fn on_frame_at(&mut self, frame: RawFrame, now: Instant, wall_time: DateTime<Local>)
                   -> Option<PathBuf> {
        let frame_id = frame.frame_id;
        if !self.gate.should_save(now, frame_id) {
            debug!("Skipping frame {}", frame_id);
            return None;
        }
        let index = self.next_index;
        self.next_index += 1;

        let image = match develop(frame) {
            Ok(image) => image,
            Err(e) => {
                warn!("Dropping frame {}: {}", frame_id, e);
                return None;
            }
        };
        let image = match &self.roi {
            Some(roi) => crop(&image, roi),
            None => image,
        };
        let path = self.output_dir.join(self.frame_filename(index, &wall_time));
        let saved = match image.save_with_format(&path, ImageFormat::Tiff) {
            Ok(()) => {
                self.saved_frames += 1;
                info!("Saved frame {} as {}", frame_id, path.display());
                Some(path)
            },
            Err(e) => {
                self.failed_saves += 1;
                warn!("Could not write {}: {}", path.display(), e);
                None
            },
        };

        if let Some(recorder) = self.temperature.as_mut() {
            if let Err(e) = recorder.record() {
                warn!("Temperature collection failed: {}", e);
            }
        }
        debug!("Frame {} processed in {:?}", frame_id, now.elapsed());
        saved
    }

    /// Hands the session to the camera as its frame callback.
    pub fn into_callback(mut self) -> FrameCallback {
        Box::new(move |frame: RawFrame| {
            self.on_frame(frame);
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::time::{Duration, SystemTime};

    use chrono::TimeZone;
    use image::{Rgb, RgbImage};

    use super::*;
    use crate::abstract_camera::PixelFormat;
    use crate::bayer::{CfaPattern, mosaic};
    use crate::temperature::SimulatedThermocouple;
    use crate::temperature_log::TemperatureLog;

    fn bayer_frame(frame_id: u64, width: u32, height: u32) -> RawFrame {
        let rgb = RgbImage::from_pixel(width, height, Rgb([120, 60, 30]));
        RawFrame{frame_id, pixel_format: PixelFormat::BayerRG8, width, height,
                 data: mosaic(&rgb, CfaPattern::Rggb),
                 readout_time: SystemTime::now()}
    }

    fn wall(second: u32, micros: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2024, 9, 4, 14, 3, second).unwrap()
            + chrono::Duration::microseconds(micros as i64)
    }

    #[test]
    fn test_interval_saves_with_timestamp_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = CaptureSession::new(
            dir.path(), "06_03", FileNaming::Timestamp,
            SaveCadence::Interval(Duration::from_secs(10)));
        let t0 = Instant::now();
        let first = session.on_frame_at(bayer_frame(1, 8, 6), t0, wall(1, 42)).unwrap();
        assert!(session.on_frame_at(bayer_frame(2, 8, 6), t0 + Duration::from_secs(3),
                                    wall(4, 0)).is_none());
        let second = session.on_frame_at(bayer_frame(3, 8, 6), t0 + Duration::from_secs(10),
                                         wall(11, 500)).unwrap();
        assert_eq!(first.file_name().unwrap(), "06_03_14-03-01-000042.tiff");
        assert_eq!(second.file_name().unwrap(), "06_03_14-03-11-000500.tiff");
        assert_eq!(session.saved_frames(), 2);

        let saved = image::open(&first).unwrap().to_rgb8();
        assert_eq!(saved.dimensions(), (8, 6));
        assert_eq!(saved.get_pixel(4, 3).0, [120, 60, 30]);
    }

    #[test]
    fn test_roi_crop_and_counter_names() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = CaptureSession::new(
            dir.path(), "s", FileNaming::Counter, SaveCadence::EveryNthFrame(2))
            .with_roi(Rect::at(2, 2).of_size(4, 2));
        let t0 = Instant::now();
        let saved: Vec<PathBuf> = (0..5)
            .filter_map(|id| session.on_frame_at(bayer_frame(id, 8, 6), t0, wall(0, 0)))
            .collect();
        let names: Vec<String> = saved.iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string()).collect();
        assert_eq!(names, vec!["s_000000.tiff", "s_000001.tiff", "s_000002.tiff"]);
        let cropped = image::open(&saved[1]).unwrap();
        assert_eq!((cropped.width(), cropped.height()), (4, 2));
    }

    #[test]
    fn test_write_failure_is_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let log = TemperatureLog::open(&dir.path().join("t.csv")).unwrap();
        let recorder = TemperatureRecorder::new(
            Box::new(SimulatedThermocouple::new(22.0, 30.0, 0.0)), 2, log);
        let mut session = CaptureSession::new(
            &dir.path().join("missing"), "s", FileNaming::Counter,
            SaveCadence::Interval(Duration::ZERO))
            .with_temperature(recorder);
        let t0 = Instant::now();
        assert!(session.on_frame_at(bayer_frame(0, 4, 4), t0, wall(0, 0)).is_none());
        assert!(session.on_frame_at(bayer_frame(1, 4, 4), t0, wall(0, 1)).is_none());
        assert_eq!(session.failed_saves(), 2);
        // Temperatures are still logged for every save attempt.
        let csv = fs::read_to_string(dir.path().join("t.csv")).unwrap();
        assert_eq!(csv.lines().count(), 1 + 4);
    }

    #[test]
    fn test_undecodable_frame_is_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = CaptureSession::new(
            dir.path(), "s", FileNaming::Counter, SaveCadence::Interval(Duration::ZERO));
        let mut frame = bayer_frame(0, 4, 4);
        frame.data.truncate(5);
        assert!(session.on_frame_at(frame, Instant::now(), wall(0, 0)).is_none());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_into_callback() {
        let dir = tempfile::tempdir().unwrap();
        let session = CaptureSession::new(
            dir.path(), "cb", FileNaming::Counter, SaveCadence::Interval(Duration::ZERO));
        let mut callback = session.into_callback();
        callback(bayer_frame(0, 4, 4));
        callback(bayer_frame(1, 4, 4));
        assert!(dir.path().join("cb_000000.tiff").exists());
        assert!(dir.path().join("cb_000001.tiff").exists());
    }
}
