use std::path::PathBuf;

use canonical_error::{CanonicalError, failed_precondition_error, not_found_error};
use log::info;

use crate::abstract_camera::AbstractCamera;
use crate::image_camera::ImageCamera;

#[derive(Clone, Debug, PartialEq)]
pub enum CameraInterface {
    /// Fake camera producing a synthetic gradient scene.
    TestPattern { width: i32, height: i32 },
    /// Fake camera replaying a still image.
    Image { path: PathBuf },
}

// Opens the camera behind `camera_interface`. Each interface yields Bayer
// frames through the AbstractCamera API; a vendor SDK backed camera slots in
// here as another variant.
pub fn select_camera(camera_interface: &CameraInterface)
                     -> Result<Box<dyn AbstractCamera + Send>, CanonicalError> {
    let camera = match camera_interface {
        CameraInterface::TestPattern{width, height} => {
            ImageCamera::test_pattern(*width, *height)?
        },
        CameraInterface::Image{path} => {
            if !path.exists() {
                return Err(not_found_error(
                    format!("No image at {}", path.display()).as_str()));
            }
            let scene = image::open(path).map_err(|e| failed_precondition_error(
                format!("Cannot load {}: {}", path.display(), e).as_str()))?;
            ImageCamera::new(scene.to_rgb8())?
        },
    };
    info!("Selected {} {:?}", camera.model(), camera.dimensions());
    Ok(Box::new(camera))
}
