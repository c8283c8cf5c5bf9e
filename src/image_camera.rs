// Fake camera that yields a fixed scene through a Bayer filter. For testing
// and dry runs without camera hardware.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use canonical_error::{CanonicalError, failed_precondition_error,
                      invalid_argument_error};
use image::{Rgb, RgbImage};
use image::imageops::crop_imm;
use log::{debug, info};
use tokio::task::JoinHandle;

use crate::abstract_camera::{AbstractCamera, AutoExposure, AutoGain,
                             ExposureControl, FrameCallback, GainControl,
                             PixelFormat, RawFrame, RegionOfInterest,
                             TriggerSource, constrain_roi, frame_period};
use crate::bayer::{CfaPattern, mosaic};

// Granularity at which the acquisition worker notices a stop request.
const STOP_POLL: Duration = Duration::from_millis(10);

pub struct ImageCamera {
    scene: Arc<RgbImage>,
    pixel_format: PixelFormat,

    exposure: ExposureControl,
    gain: GainControl,
    trigger: TriggerSource,
    frame_rate: f64,
    frame_period: Duration,
    roi: RegionOfInterest,

    // Shared with the acquisition worker.
    frame_id: Arc<AtomicU64>,
    stop_request: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,

    last_frame_time: Option<Instant>,
}

impl ImageCamera {
    pub fn new(scene: RgbImage) -> Result<Self, CanonicalError> {
        let (width, height) = scene.dimensions();
        if width < 8 || height < 2 {
            return Err(invalid_argument_error(
                format!("Scene {}x{} is too small", width, height).as_str()));
        }
        Ok(ImageCamera{scene: Arc::new(scene),
                       pixel_format: PixelFormat::BayerRG8,
                       exposure: ExposureControl::Auto(AutoExposure::default()),
                       gain: GainControl::Auto(AutoGain::default()),
                       trigger: TriggerSource::Freerun,
                       frame_rate: 10.0,
                       frame_period: Duration::from_millis(100),
                       roi: RegionOfInterest::full((width as i32, height as i32)),
                       frame_id: Arc::new(AtomicU64::new(0)),
                       stop_request: Arc::new(AtomicBool::new(false)),
                       worker: None,
                       last_frame_time: None})
    }

    /// Horizontal red ramp, vertical green ramp, constant blue.
    pub fn test_pattern(width: i32, height: i32) -> Result<Self, CanonicalError> {
        if width <= 0 || height <= 0 {
            return Err(invalid_argument_error(
                format!("Bad test pattern size {}x{}", width, height).as_str()));
        }
        let (w, h) = (width as u32, height as u32);
        let scene = RgbImage::from_fn(w, h, |x, y| {
            Rgb([(x * 255 / w) as u8, (y * 255 / h) as u8, 128])
        });
        ImageCamera::new(scene)
    }

    fn render(scene: &RgbImage, roi: &RegionOfInterest, pixel_format: PixelFormat,
              frame_id: u64) -> RawFrame {
        let (x, y) = roi.capture_startpos;
        let (width, height) = roi.capture_dimensions;
        let window = crop_imm(scene, x as u32, y as u32, width as u32, height as u32)
            .to_image();
        // The window origin is even, so the sensor's CFA phase carries over.
        let pattern = CfaPattern::from_pixel_format(pixel_format).unwrap_or(CfaPattern::Rggb);
        RawFrame{frame_id,
                 pixel_format,
                 width: window.width(),
                 height: window.height(),
                 data: mosaic(&window, pattern),
                 readout_time: SystemTime::now()}
    }

    fn worker_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }
}

/// Acquisition stops when the camera goes out of scope.
impl Drop for ImageCamera {
    fn drop(&mut self) {
        self.stop_request.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl AbstractCamera for ImageCamera {
    fn model(&self) -> String {
        "ImageCamera".to_string()
    }

    fn dimensions(&self) -> (i32, i32) {
        (self.scene.width() as i32, self.scene.height() as i32)
    }

    fn pixel_format(&self) -> PixelFormat {
        self.pixel_format
    }

    fn set_exposure_control(&mut self, exposure: ExposureControl)
                            -> Result<(), CanonicalError> {
        self.exposure = exposure;  // Scene brightness is fixed.
        Ok(())
    }
    fn get_exposure_control(&self) -> ExposureControl {
        self.exposure
    }

    fn set_gain_control(&mut self, gain: GainControl) -> Result<(), CanonicalError> {
        self.gain = gain;
        Ok(())
    }
    fn get_gain_control(&self) -> GainControl {
        self.gain
    }

    fn set_trigger_source(&mut self, trigger: TriggerSource)
                          -> Result<(), CanonicalError> {
        self.trigger = trigger;
        Ok(())
    }
    fn get_trigger_source(&self) -> TriggerSource {
        self.trigger
    }

    fn set_frame_rate(&mut self, fps: f64) -> Result<(), CanonicalError> {
        self.frame_period = frame_period(fps)?;
        self.frame_rate = fps;
        Ok(())
    }
    fn get_frame_rate(&self) -> f64 {
        self.frame_rate
    }

    fn set_region_of_interest(&mut self, roi: RegionOfInterest)
                              -> Result<RegionOfInterest, CanonicalError> {
        if self.worker_running() {
            return Err(failed_precondition_error(
                "Cannot change region of interest while acquiring"));
        }
        self.roi = constrain_roi(roi, self.dimensions()).ok_or_else(
            || invalid_argument_error(
                format!("Region of interest {:?} is empty on this sensor", roi).as_str()))?;
        Ok(self.roi)
    }
    fn get_region_of_interest(&self) -> RegionOfInterest {
        self.roi
    }

    async fn acquire_frame(&mut self) -> Result<RawFrame, CanonicalError> {
        if self.worker_running() {
            return Err(failed_precondition_error("Continuous acquisition is running"));
        }
        if let Some(last) = self.last_frame_time {
            let sleep_interval = self.frame_period.saturating_sub(last.elapsed());
            if sleep_interval > Duration::ZERO {
                tokio::time::sleep(sleep_interval).await;
            }
        }
        let frame_id = self.frame_id.fetch_add(1, Ordering::SeqCst);
        self.last_frame_time = Some(Instant::now());
        Ok(ImageCamera::render(&self.scene, &self.roi, self.pixel_format, frame_id))
    }

    fn start_acquisition(&mut self, mut on_frame: FrameCallback)
                         -> Result<(), CanonicalError> {
        if self.worker_running() {
            return Err(failed_precondition_error("Acquisition already running"));
        }
        let runtime = tokio::runtime::Handle::try_current().map_err(
            |e| failed_precondition_error(&e.to_string()))?;
        self.stop_request.store(false, Ordering::SeqCst);

        let scene = self.scene.clone();
        let roi = self.roi;
        let pixel_format = self.pixel_format;
        let period = self.frame_period;
        let frame_id = self.frame_id.clone();
        let stop_request = self.stop_request.clone();
        info!("Starting acquisition at {:.2} fps, window {:?}", self.frame_rate, roi);
        self.worker = Some(runtime.spawn_blocking(move || {
            let mut last_frame_time: Option<Instant> = None;
            while !stop_request.load(Ordering::SeqCst) {
                if let Some(last) = last_frame_time {
                    let remaining = period.saturating_sub(last.elapsed());
                    if remaining > Duration::ZERO {
                        std::thread::sleep(STOP_POLL.min(remaining));
                        continue;
                    }
                }
                last_frame_time = Some(Instant::now());
                let id = frame_id.fetch_add(1, Ordering::SeqCst);
                on_frame(ImageCamera::render(&scene, &roi, pixel_format, id));
            }
            debug!("Acquisition worker exiting");
        }));
        Ok(())
    }

    async fn stop_acquisition(&mut self) -> Result<(), CanonicalError> {
        if let Some(worker) = self.worker.take() {
            self.stop_request.store(true, Ordering::SeqCst);
            worker.await.map_err(|e| failed_precondition_error(
                format!("Acquisition worker failed: {}", e).as_str()))?;
            info!("Stopped acquisition");
        }
        Ok(())
    }

    fn is_acquiring(&self) -> bool {
        self.worker_running()
    }
}
