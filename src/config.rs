// Copyright (c) 2023 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

// Capture profile. Each profile holds the tuning for one experiment: camera
// window and auto exposure/gain targets, save cadence, sample naming and the
// temperature source. Every field has a default so a profile only needs to
// list what differs.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use canonical_error::{CanonicalError, failed_precondition_error,
                      invalid_argument_error, not_found_error};
use log::info;
use serde::Deserialize;

use crate::abstract_camera::{AbstractCamera, AutoExposure, AutoExposureAlgorithm,
                             AutoGain, ExposureControl, Gain, GainControl,
                             RegionOfInterest, TriggerSource, frame_period};
use crate::capture_session::FileNaming;
use crate::roi::Selection;
use crate::save_gate::SaveCadence;
use crate::select_camera::CameraInterface;
use crate::temperature::{CommandSource, SimulatedThermocouple, TemperatureSource};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub camera: CameraConfig,
    pub capture: CaptureSettings,
    pub temperature: TemperatureConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraKind {
    TestPattern,
    Image,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerConfig {
    Freerun,
    Software,
    FixedRate,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub kind: CameraKind,
    /// Source image for `kind = "image"`.
    pub image_path: Option<PathBuf>,
    /// Sensor size for `kind = "test_pattern"`.
    pub pattern_width: i32,
    pub pattern_height: i32,
    pub frame_rate: f64,
    pub trigger: TriggerConfig,
    /// Sensor readout window; the whole sensor when absent.
    pub window: Option<WindowConfig>,
    pub exposure: ExposureConfig,
    pub gain: GainConfig,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct WindowConfig {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExposureConfig {
    pub auto: bool,
    pub manual_us: u64,
    pub algorithm: String,
    pub min_us: u64,
    pub max_us: u64,
    pub target: i32,
    pub rate: i32,
    pub outliers: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GainConfig {
    pub auto: bool,
    pub manual: i32,
    pub min: i32,
    pub max: i32,
    pub rate: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    pub output_dir: PathBuf,
    pub sample_name: String,
    /// Seconds between saves. Ignored when `every_nth_frame` is set.
    pub interval_secs: f64,
    pub every_nth_frame: Option<u64>,
    /// File naming; when absent, timestamps with a region of interest and a
    /// counter for full frames.
    pub naming: Option<FileNaming>,
    /// Whether to pick a region of interest before acquisition starts.
    pub select_roi: bool,
    /// Pre-chosen "x,y,width,height" on the preview; prompts when absent.
    pub selection: Option<String>,
    /// Where the preview for ROI selection is written, relative to
    /// `output_dir`.
    pub preview_file: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemperatureSourceKind {
    Simulated,
    Command,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TemperatureConfig {
    pub enabled: bool,
    pub source: TemperatureSourceKind,
    /// Program and arguments for `source = "command"`.
    pub command: Vec<String>,
    pub samples_per_save: usize,
    /// Defaults to `<output_dir>/<sample_name>_temperature.csv`.
    pub csv_path: Option<PathBuf>,
}

impl Default for CameraConfig {
    fn default() -> Self {
        CameraConfig{kind: CameraKind::TestPattern,
                     image_path: None,
                     pattern_width: 2048,
                     pattern_height: 1536,
                     frame_rate: 1.0,
                     trigger: TriggerConfig::Freerun,
                     window: None,
                     exposure: ExposureConfig::default(),
                     gain: GainConfig::default()}
    }
}

impl Default for ExposureConfig {
    fn default() -> Self {
        let auto = AutoExposure::default();
        ExposureConfig{auto: true,
                       manual_us: 100_000,
                       algorithm: "mean".to_string(),
                       min_us: auto.min.as_micros() as u64,
                       max_us: auto.max.as_micros() as u64,
                       target: auto.target,
                       rate: auto.rate,
                       outliers: auto.outliers}
    }
}

impl Default for GainConfig {
    fn default() -> Self {
        let auto = AutoGain::default();
        GainConfig{auto: true, manual: 0,
                   min: auto.min.value(), max: auto.max.value(), rate: auto.rate}
    }
}

impl Default for CaptureSettings {
    fn default() -> Self {
        CaptureSettings{output_dir: PathBuf::from("."),
                        sample_name: "sample".to_string(),
                        interval_secs: 5.0,
                        every_nth_frame: None,
                        naming: None,
                        select_roi: false,
                        selection: None,
                        preview_file: PathBuf::from("roi_preview.png")}
    }
}

impl Default for TemperatureConfig {
    fn default() -> Self {
        TemperatureConfig{enabled: false,
                          source: TemperatureSourceKind::Simulated,
                          command: Vec::new(),
                          samples_per_save: 1,
                          csv_path: None}
    }
}

fn check_percent(value: i32, what: &str) -> Result<(), CanonicalError> {
    if !(0..=100).contains(&value) {
        return Err(invalid_argument_error(
            format!("{} must be within 0..=100, got {}", what, value).as_str()));
    }
    Ok(())
}

impl CaptureConfig {
    pub fn load(path: &Path) -> Result<Self, CanonicalError> {
        let content = fs::read_to_string(path).map_err(|e| {
            let msg = format!("Cannot read config {}: {}", path.display(), e);
            if e.kind() == ErrorKind::NotFound {
                not_found_error(msg.as_str())
            } else {
                failed_precondition_error(msg.as_str())
            }
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, CanonicalError> {
        let config: CaptureConfig = toml::from_str(content)
            .map_err(|e| invalid_argument_error(
                format!("Cannot parse config: {}", e).as_str()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), CanonicalError> {
        let camera = &self.camera;
        frame_period(camera.frame_rate)?;
        if camera.kind == CameraKind::Image && camera.image_path.is_none() {
            return Err(invalid_argument_error("camera kind 'image' needs image_path"));
        }
        camera.exposure_control()?;
        camera.gain_control()?;
        self.capture.cadence()?;
        if self.capture.sample_name.is_empty() {
            return Err(invalid_argument_error("sample_name must not be empty"));
        }
        self.capture.selection()?;
        if self.temperature.enabled && self.temperature.source == TemperatureSourceKind::Command
            && self.temperature.command.is_empty()
        {
            return Err(invalid_argument_error("temperature source 'command' needs command"));
        }
        Ok(())
    }
}

impl CameraConfig {
    pub fn interface(&self) -> CameraInterface {
        match self.kind {
            CameraKind::TestPattern => CameraInterface::TestPattern{
                width: self.pattern_width, height: self.pattern_height},
            CameraKind::Image => CameraInterface::Image{
                path: self.image_path.clone().unwrap_or_default()},
        }
    }

    /// Resets the camera to its full sensor, then applies this profile's
    /// exposure, gain, trigger, frame rate and window. Returns the window in
    /// effect.
    pub fn apply(&self, camera: &mut dyn AbstractCamera)
                 -> Result<RegionOfInterest, CanonicalError> {
        let full = RegionOfInterest::full(camera.dimensions());
        camera.set_region_of_interest(full)?;
        camera.set_exposure_control(self.exposure_control()?)?;
        camera.set_gain_control(self.gain_control()?)?;
        camera.set_trigger_source(self.trigger_source())?;
        camera.set_frame_rate(self.frame_rate)?;
        let roi = match self.window() {
            Some(window) => camera.set_region_of_interest(window)?,
            None => camera.get_region_of_interest(),
        };
        info!("{}: exposure {:?}, gain {:?}, trigger {:?}, {} fps, window {:?}",
              camera.model(), camera.get_exposure_control(), camera.get_gain_control(),
              camera.get_trigger_source(), camera.get_frame_rate(), roi);
        Ok(roi)
    }

    pub fn trigger_source(&self) -> TriggerSource {
        match self.trigger {
            TriggerConfig::Freerun => TriggerSource::Freerun,
            TriggerConfig::Software => TriggerSource::Software,
            TriggerConfig::FixedRate => TriggerSource::FixedRate,
        }
    }

    pub fn window(&self) -> Option<RegionOfInterest> {
        self.window.map(|w| RegionOfInterest{capture_startpos: (w.x, w.y),
                                             capture_dimensions: (w.width, w.height)})
    }

    pub fn exposure_control(&self) -> Result<ExposureControl, CanonicalError> {
        let exposure = &self.exposure;
        if !exposure.auto {
            if exposure.manual_us == 0 {
                return Err(invalid_argument_error("manual_us must be positive"));
            }
            return Ok(ExposureControl::Manual(Duration::from_micros(exposure.manual_us)));
        }
        let algorithm = match exposure.algorithm.as_str() {
            "mean" => AutoExposureAlgorithm::Mean,
            "fit_range" => AutoExposureAlgorithm::FitRange,
            other => return Err(invalid_argument_error(
                format!("Unknown exposure algorithm '{}'", other).as_str())),
        };
        if exposure.min_us > exposure.max_us {
            return Err(invalid_argument_error(
                format!("Exposure min {}us exceeds max {}us",
                        exposure.min_us, exposure.max_us).as_str()));
        }
        check_percent(exposure.target, "exposure target")?;
        check_percent(exposure.rate, "exposure rate")?;
        check_percent(exposure.outliers, "exposure outliers")?;
        Ok(ExposureControl::Auto(AutoExposure{
            algorithm,
            min: Duration::from_micros(exposure.min_us),
            max: Duration::from_micros(exposure.max_us),
            target: exposure.target,
            rate: exposure.rate,
            outliers: exposure.outliers,
        }))
    }

    pub fn gain_control(&self) -> Result<GainControl, CanonicalError> {
        let gain = &self.gain;
        if !gain.auto {
            check_percent(gain.manual, "manual gain")?;
            return Ok(GainControl::Manual(Gain::new(gain.manual)));
        }
        check_percent(gain.min, "gain min")?;
        check_percent(gain.max, "gain max")?;
        check_percent(gain.rate, "gain rate")?;
        if gain.min > gain.max {
            return Err(invalid_argument_error(
                format!("Gain min {} exceeds max {}", gain.min, gain.max).as_str()));
        }
        Ok(GainControl::Auto(AutoGain{min: Gain::new(gain.min), max: Gain::new(gain.max),
                                      rate: gain.rate}))
    }
}

impl CaptureSettings {
    pub fn cadence(&self) -> Result<SaveCadence, CanonicalError> {
        if let Some(n) = self.every_nth_frame {
            return Ok(SaveCadence::EveryNthFrame(n));
        }
        let interval = Duration::try_from_secs_f64(self.interval_secs).map_err(
            |_| invalid_argument_error(
                format!("interval_secs must be a non-negative number of seconds, got {}",
                        self.interval_secs).as_str()))?;
        Ok(SaveCadence::Interval(interval))
    }

    pub fn naming(&self) -> FileNaming {
        self.naming.unwrap_or(if self.select_roi {
            FileNaming::Timestamp
        } else {
            FileNaming::Counter
        })
    }

    pub fn selection(&self) -> Result<Option<Selection>, CanonicalError> {
        self.selection.as_deref().map(|s| s.parse::<Selection>()).transpose()
    }

    pub fn preview_path(&self) -> PathBuf {
        self.output_dir.join(&self.preview_file)
    }
}

impl TemperatureConfig {
    pub fn csv_path(&self, capture: &CaptureSettings) -> PathBuf {
        match &self.csv_path {
            Some(path) => path.clone(),
            None => capture.output_dir.join(
                format!("{}_temperature.csv", capture.sample_name)),
        }
    }

    pub fn build_source(&self) -> Result<Box<dyn TemperatureSource>, CanonicalError> {
        match self.source {
            TemperatureSourceKind::Simulated => {
                Ok(Box::new(SimulatedThermocouple::new(23.0, 25.0, 0.1)))
            },
            TemperatureSourceKind::Command => {
                let (program, args) = self.command.split_first().ok_or_else(
                    || invalid_argument_error("temperature command is empty"))?;
                Ok(Box::new(CommandSource::new(program, args)))
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CaptureConfig::from_toml("").unwrap();
        assert_eq!(config.camera.kind, CameraKind::TestPattern);
        assert_eq!(config.camera.exposure_control().unwrap(),
                   ExposureControl::Auto(AutoExposure::default()));
        assert_eq!(config.camera.gain_control().unwrap(),
                   GainControl::Auto(AutoGain::default()));
        assert_eq!(config.capture.cadence().unwrap(),
                   SaveCadence::Interval(Duration::from_secs(5)));
        assert_eq!(config.capture.naming(), FileNaming::Counter);
        assert!(!config.temperature.enabled);
        assert_eq!(config.temperature.csv_path(&config.capture),
                   PathBuf::from("./sample_temperature.csv"));
    }

    #[test]
    fn test_full_profile() {
        let config = CaptureConfig::from_toml(r#"
            [camera]
            kind = "image"
            image_path = "frame.png"
            frame_rate = 2.5
            trigger = "software"
            window = { x = 1774, y = 672, width = 2016, height = 1828 }

            [camera.exposure]
            target = 40

            [camera.gain]
            auto = false
            manual = 10

            [capture]
            output_dir = "/data/04.09"
            sample_name = "06_03"
            every_nth_frame = 8
            naming = "counter"
            select_roi = true
            selection = "100,50,200,100"

            [temperature]
            enabled = true
            source = "command"
            command = ["daq-read", "--channel", "1"]
            samples_per_save = 4
        "#).unwrap();
        assert_eq!(config.camera.trigger_source(), TriggerSource::Software);
        assert_eq!(config.camera.window().unwrap().capture_startpos, (1774, 672));
        match config.camera.exposure_control().unwrap() {
            ExposureControl::Auto(auto) => assert_eq!(auto.target, 40),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(config.camera.gain_control().unwrap(), GainControl::Manual(Gain::new(10)));
        assert_eq!(config.capture.cadence().unwrap(), SaveCadence::EveryNthFrame(8));
        // Explicit naming wins over the region of interest default.
        assert_eq!(config.capture.naming(), FileNaming::Counter);
        assert_eq!(config.capture.selection().unwrap(),
                   Some(Selection{x: 100, y: 50, width: 200, height: 100}));
        assert_eq!(config.capture.preview_path(), PathBuf::from("/data/04.09/roi_preview.png"));
        assert_eq!(config.temperature.samples_per_save, 4);
        assert!(config.temperature.build_source().unwrap()
                .description().contains("daq-read --channel 1"));
    }

    #[test]
    fn test_invalid_profiles() {
        assert!(CaptureConfig::from_toml("[camera]\nframe_rate = 0.0").is_err());
        assert!(CaptureConfig::from_toml("[camera]\nframe_rate = 1e-30").is_err());
        assert!(CaptureConfig::from_toml("[capture]\ninterval_secs = 1e30").is_err());
        assert!(CaptureConfig::from_toml("[capture]\ninterval_secs = -1.0").is_err());
        assert!(CaptureConfig::from_toml("[camera]\nkind = \"image\"").is_err());
        assert!(CaptureConfig::from_toml("[camera]\nkind = \"usb\"").is_err());
        assert!(CaptureConfig::from_toml("[camera.gain]\nmax = 200").is_err());
        assert!(CaptureConfig::from_toml("[camera.exposure]\nmin_us = 10\nmax_us = 5").is_err());
        assert!(CaptureConfig::from_toml("[capture]\nselection = \"1,2\"").is_err());
        assert!(CaptureConfig::from_toml(
            "[temperature]\nenabled = true\nsource = \"command\"").is_err());
    }

    #[test]
    fn test_out_of_range_settings_are_errors() {
        let mut config = CaptureConfig::default();
        config.capture.interval_secs = 1e30;
        assert!(config.capture.cadence().is_err());
        assert!(config.validate().is_err());
        // A frame cadence makes the interval irrelevant.
        config.capture.every_nth_frame = Some(3);
        assert_eq!(config.capture.cadence().unwrap(), SaveCadence::EveryNthFrame(3));

        let mut config = CaptureConfig::default();
        config.camera.frame_rate = 1e-30;
        assert!(config.validate().is_err());
        let mut camera = crate::image_camera::ImageCamera::test_pattern(64, 32).unwrap();
        assert!(config.camera.apply(&mut camera).is_err());
    }

    #[test]
    fn test_naming_follows_roi_selection() {
        let config = CaptureConfig::from_toml("[capture]\nselect_roi = true").unwrap();
        assert_eq!(config.capture.naming(), FileNaming::Timestamp);
        let config = CaptureConfig::from_toml(
            "[capture]\nselect_roi = true\nnaming = \"counter\"").unwrap();
        assert_eq!(config.capture.naming(), FileNaming::Counter);
    }

    #[test]
    fn test_apply_to_camera() {
        let config = CaptureConfig::from_toml(r#"
            [camera]
            pattern_width = 256
            pattern_height = 128
            frame_rate = 4.0
            window = { x = 11, y = 20, width = 100, height = 51 }
        "#).unwrap();
        let mut camera = crate::image_camera::ImageCamera::test_pattern(256, 128).unwrap();
        let roi = config.camera.apply(&mut camera).unwrap();
        assert_eq!(roi, RegionOfInterest{capture_startpos: (10, 20),
                                         capture_dimensions: (96, 50)});
        assert_eq!(camera.get_frame_rate(), 4.0);

        // Without a window the full sensor is restored.
        let config = CaptureConfig::from_toml("").unwrap();
        let roi = config.camera.apply(&mut camera).unwrap();
        assert_eq!(roi, RegionOfInterest::full((256, 128)));
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(CaptureConfig::load(&dir.path().join("nope.toml")).is_err());
        let path = dir.path().join("profile.toml");
        fs::write(&path, "[capture]\nsample_name = \"06_03\"\n").unwrap();
        assert_eq!(CaptureConfig::load(&path).unwrap().capture.sample_name, "06_03");
    }
}
