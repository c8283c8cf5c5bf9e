// Copyright (c) 2023 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

use std::fmt;
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use canonical_error::{CanonicalError, invalid_argument_error};

/// Abstract camera gain values range from 0 to 100, inclusive. Each camera type
/// scales this gain value as needed, mapping 0 to its actual lowest gain and 100
/// to its highest gain.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Gain(i32);

impl fmt::Display for Gain {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)  // Just re-use Debug.
    }
}

impl Gain {
    pub fn new(gain: i32) -> Gain {
        assert!(gain >= 0);
        assert!(gain <= 100);
        Gain(gain)
    }

    pub fn value(&self) -> i32 {
        self.0
    }
}

/// Layout of the bytes in a RawFrame. The Bayer variants name the colour of
/// the top-left 2x2 cell in reading order, e.g. BayerRG8 is R G / G B.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PixelFormat {
    Mono8,
    BayerRG8,
    BayerGR8,
    BayerGB8,
    BayerBG8,
    Rgb8,
    Bgr8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgb8 | PixelFormat::Bgr8 => 3,
            _ => 1,
        }
    }

    pub fn is_bayer(&self) -> bool {
        matches!(self, PixelFormat::BayerRG8 | PixelFormat::BayerGR8 |
                 PixelFormat::BayerGB8 | PixelFormat::BayerBG8)
    }
}

/// Sensor readout window. Position and dimensions are in full-sensor pixels.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RegionOfInterest {
    /// (x, y) from top left.
    pub capture_startpos: (i32, i32),

    /// (width, height).
    pub capture_dimensions: (i32, i32),
}

impl RegionOfInterest {
    /// The whole sensor.
    pub fn full(dimensions: (i32, i32)) -> Self {
        RegionOfInterest{capture_startpos: (0, 0), capture_dimensions: dimensions}
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum AutoExposureAlgorithm {
    /// Drive the mean brightness towards the target.
    Mean,
    /// Fit the histogram into the available range.
    FitRange,
}

/// Parameters for camera-driven exposure control.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AutoExposure {
    pub algorithm: AutoExposureAlgorithm,
    pub min: Duration,
    pub max: Duration,
    /// Target brightness, percent of full scale.
    pub target: i32,
    /// How fast the camera converges, percent.
    pub rate: i32,
    /// Percent of outlier pixels ignored by the metering.
    pub outliers: i32,
}

impl Default for AutoExposure {
    fn default() -> Self {
        AutoExposure{algorithm: AutoExposureAlgorithm::Mean,
                     min: Duration::from_micros(23),
                     max: Duration::from_micros(9_888_888),
                     target: 25,
                     rate: 50,
                     outliers: 0}
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum ExposureControl {
    Manual(Duration),
    Auto(AutoExposure),
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AutoGain {
    pub min: Gain,
    pub max: Gain,
    pub rate: i32,
}

impl Default for AutoGain {
    fn default() -> Self {
        AutoGain{min: Gain::new(0), max: Gain::new(22), rate: 50}
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum GainControl {
    Manual(Gain),
    Auto(AutoGain),
}

/// What starts a frame exposure. The trigger selector is always "frame start".
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TriggerSource {
    Freerun,
    Software,
    FixedRate,
}

/// One frame as delivered by the camera, before colour conversion.
#[derive(Clone, Debug)]
pub struct RawFrame {
    /// Increases by one for each frame the camera produces.
    pub frame_id: u64,
    pub pixel_format: PixelFormat,
    pub width: u32,
    pub height: u32,
    /// Pixel data stored in row major order.
    pub data: Vec<u8>,
    pub readout_time: SystemTime,
}

/// Invoked by the camera for every frame during continuous acquisition. Calls
/// come from the camera's worker thread, never concurrently.
pub type FrameCallback = Box<dyn FnMut(RawFrame) + Send + 'static>;

/// AbstractCamera models a colour machine-vision camera delivering raw sensor
/// frames. This trait defines methods for obtaining information about the
/// camera, setting its operating parameters, and acquiring frames either one
/// at a time or continuously through a callback.
#[async_trait]
pub trait AbstractCamera {
    // Unchanging attributes.

    /// Returns a string identifying what kind of camera this is.
    fn model(&self) -> String;

    /// Returns the maximum (width, height) of this camera's sensor.
    fn dimensions(&self) -> (i32, i32);

    /// Format of the frames this camera delivers.
    fn pixel_format(&self) -> PixelFormat;

    // Changeable parameters that influence subsequent frames.

    fn set_exposure_control(&mut self, exposure: ExposureControl)
                            -> Result<(), CanonicalError>;
    fn get_exposure_control(&self) -> ExposureControl;

    fn set_gain_control(&mut self, gain: GainControl) -> Result<(), CanonicalError>;
    fn get_gain_control(&self) -> GainControl;

    fn set_trigger_source(&mut self, trigger: TriggerSource)
                          -> Result<(), CanonicalError>;
    fn get_trigger_source(&self) -> TriggerSource;

    /// Returns InvalidArgument unless `fps` is positive and finite.
    fn set_frame_rate(&mut self, fps: f64) -> Result<(), CanonicalError>;
    fn get_frame_rate(&self) -> f64;

    /// Default is the whole sensor. The implementation adjusts the window as
    /// needed to satisfy constraints of the camera type and returns the
    /// adjusted window. Must not be called while acquiring.
    fn set_region_of_interest(&mut self, roi: RegionOfInterest)
                              -> Result<RegionOfInterest, CanonicalError>;
    fn get_region_of_interest(&self) -> RegionOfInterest;

    // Action methods.

    /// Acquires a single frame. Returns FailedPrecondition if continuous
    /// acquisition is running.
    async fn acquire_frame(&mut self) -> Result<RawFrame, CanonicalError>;

    /// Starts continuous acquisition. `on_frame` is moved to the camera's
    /// worker and invoked once per frame until stop_acquisition().
    fn start_acquisition(&mut self, on_frame: FrameCallback)
                         -> Result<(), CanonicalError>;

    /// Stops continuous acquisition and waits for the worker to exit. No-op
    /// if acquisition is not running.
    async fn stop_acquisition(&mut self) -> Result<(), CanonicalError>;

    fn is_acquiring(&self) -> bool;
}

/// Time between frames at `fps` frames per second. Rejects rates that are not
/// positive or whose period does not fit a `Duration`.
pub fn frame_period(fps: f64) -> Result<Duration, CanonicalError> {
    if !(fps.is_finite() && fps > 0.0) {
        return Err(invalid_argument_error(
            format!("Frame rate {} is not positive", fps).as_str()));
    }
    Duration::try_from_secs_f64(1.0 / fps).map_err(|_| invalid_argument_error(
        format!("Frame rate {} is too low", fps).as_str()))
}

/// Adjusts `roi` to the sensor: clamped to `dimensions`, origin moved to even
/// coordinates so the Bayer phase is unchanged, width a multiple of 8 and
/// height a multiple of 2.
pub fn constrain_roi(roi: RegionOfInterest, dimensions: (i32, i32))
                     -> Option<RegionOfInterest> {
    let (max_width, max_height) = dimensions;
    let x = roi.capture_startpos.0.clamp(0, max_width) & !1;
    let y = roi.capture_startpos.1.clamp(0, max_height) & !1;
    let mut width = roi.capture_dimensions.0.min(max_width - x);
    let mut height = roi.capture_dimensions.1.min(max_height - y);
    width -= width.rem_euclid(8);
    height -= height.rem_euclid(2);
    if width <= 0 || height <= 0 {
        return None;
    }
    Some(RegionOfInterest{capture_startpos: (x, y),
                          capture_dimensions: (width, height)})
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constrain_roi() {
        let roi = RegionOfInterest{capture_startpos: (1775, 673),
                                   capture_dimensions: (2016, 1829)};
        let adj = constrain_roi(roi, (5496, 3672)).unwrap();
        assert_eq!(adj.capture_startpos, (1774, 672));
        assert_eq!(adj.capture_dimensions, (2016, 1828));
    }

    #[test]
    fn test_constrain_roi_clamps_to_sensor() {
        let roi = RegionOfInterest{capture_startpos: (90, -4),
                                   capture_dimensions: (100, 500)};
        let adj = constrain_roi(roi, (128, 64)).unwrap();
        assert_eq!(adj.capture_startpos, (90, 0));
        // 38 wide remains, rounded down to 32.
        assert_eq!(adj.capture_dimensions, (32, 64));

        let degenerate = RegionOfInterest{capture_startpos: (124, 0),
                                          capture_dimensions: (100, 10)};
        assert!(constrain_roi(degenerate, (128, 64)).is_none());
    }

    #[test]
    fn test_frame_period() {
        assert_eq!(frame_period(4.0).unwrap(), Duration::from_millis(250));
        assert!(frame_period(0.0).is_err());
        assert!(frame_period(-1.0).is_err());
        assert!(frame_period(f64::INFINITY).is_err());
        assert!(frame_period(1e-30).is_err());
    }

    #[test]
    #[should_panic]
    fn test_gain_range() {
        Gain::new(101);
    }
}
