// Copyright (c) 2023 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

// Region of interest selection. The user picks a rectangle on a down-scaled
// preview of a full frame; the rectangle is mapped back to full-resolution
// coordinates and subsequently used to crop every saved frame.

use std::fmt;
use std::io::BufRead;
use std::path::Path;
use std::str::FromStr;

use canonical_error::{CanonicalError, failed_precondition_error,
                      invalid_argument_error};
use fast_image_resize::images::Image;
use fast_image_resize::{PixelType, Resizer};
use image::{DynamicImage, RgbImage};
use imageproc::rect::Rect;
use log::info;

/// Preview size used for selecting the region of interest.
pub const PREVIEW_SIZE: (u32, u32) = (800, 600);

/// A rectangle as selected on the preview image. A zero width or height
/// denotes a cancelled selection.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Selection {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Selection {
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{},{},{},{}", self.x, self.y, self.width, self.height)
    }
}

/// Parses "x,y,width,height"; whitespace around the numbers is allowed.
impl FromStr for Selection {
    type Err = CanonicalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(',').map(|f| f.trim()).collect();
        if fields.len() != 4 {
            return Err(invalid_argument_error(
                format!("Expected x,y,width,height but got '{}'", s).as_str()));
        }
        let mut values = [0u32; 4];
        for (value, field) in values.iter_mut().zip(fields.iter()) {
            *value = field.parse::<u32>().map_err(|e| invalid_argument_error(
                format!("Bad selection value '{}': {}", field, e).as_str()))?;
        }
        Ok(Selection{x: values[0], y: values[1], width: values[2], height: values[3]})
    }
}

/// Maps a selection made on a `preview`-sized image back onto the `full`-sized
/// image it was scaled from. Each axis is scaled by full/preview and truncated.
pub fn scale_selection(selection: &Selection, preview: (u32, u32), full: (u32, u32))
                       -> Result<Rect, CanonicalError> {
    let (preview_width, preview_height) = preview;
    if preview_width == 0 || preview_height == 0 {
        return Err(invalid_argument_error(
            format!("Preview size {}x{} is empty", preview_width, preview_height).as_str()));
    }
    if selection.is_empty() {
        return Err(invalid_argument_error(
            format!("Selection {} is empty", selection).as_str()));
    }
    let scale_x = |v: u32| (v as u64 * full.0 as u64 / preview_width as u64) as u32;
    let scale_y = |v: u32| (v as u64 * full.1 as u64 / preview_height as u64) as u32;
    let (width, height) = (scale_x(selection.width), scale_y(selection.height));
    if width == 0 || height == 0 {
        return Err(invalid_argument_error(
            format!("Selection {} vanishes when scaled from {}x{} to {}x{}",
                    selection, preview_width, preview_height, full.0, full.1).as_str()));
    }
    Ok(Rect::at(scale_x(selection.x) as i32, scale_y(selection.y) as i32)
       .of_size(width, height))
}

/// Largest size with the aspect ratio of `dimensions` that fits in `bound`.
pub fn fit_within(dimensions: (u32, u32), bound: (u32, u32)) -> (u32, u32) {
    let (width, height) = dimensions;
    if width == 0 || height == 0 {
        return (0, 0);
    }
    // Integer cross-multiplication picks the limiting axis exactly.
    if bound.0 as u64 * height as u64 <= bound.1 as u64 * width as u64 {
        (bound.0, ((height as u64 * bound.0 as u64 / width as u64) as u32).max(1))
    } else {
        (((width as u64 * bound.1 as u64 / height as u64) as u32).max(1), bound.1)
    }
}

/// Resizes to exactly `size`, without preserving aspect ratio.
pub fn resize_preview(image: &RgbImage, size: (u32, u32))
                      -> Result<RgbImage, CanonicalError> {
    let (width, height) = size;
    if width == 0 || height == 0 {
        return Err(invalid_argument_error(
            format!("Cannot resize to {}x{}", width, height).as_str()));
    }
    let src = Image::from_vec_u8(image.width(), image.height(),
                                 image.as_raw().clone(), PixelType::U8x3)
        .map_err(|e| invalid_argument_error(&e.to_string()))?;
    let mut dst = Image::new(width, height, PixelType::U8x3);
    let mut resizer = Resizer::new();
    resizer.resize(&src, &mut dst, None)
        .map_err(|e| invalid_argument_error(&e.to_string()))?;
    RgbImage::from_raw(width, height, dst.into_vec())
        .ok_or_else(|| invalid_argument_error("Resized buffer has wrong size"))
}

/// Crops `image` to `rect`, clamped to the image bounds.
pub fn crop(image: &DynamicImage, rect: &Rect) -> DynamicImage {
    let left = rect.left().max(0) as u32;
    let top = rect.top().max(0) as u32;
    image.crop_imm(left, top, rect.width(), rect.height())
}

/// Writes a PREVIEW_SIZE rendition of `image` to `preview_path` and maps a
/// selection on it back to `image` coordinates. Without a `preset` the
/// selection is read from `input` as "x,y,width,height"; an empty line
/// cancels.
pub fn select_roi<R: BufRead>(image: &DynamicImage, preview_path: &Path,
                              preset: Option<Selection>, input: &mut R)
                              -> Result<Rect, CanonicalError> {
    let preview = resize_preview(&image.to_rgb8(), PREVIEW_SIZE)?;
    preview.save(preview_path).map_err(|e| failed_precondition_error(
        format!("Cannot write preview {}: {}", preview_path.display(), e).as_str()))?;
    info!("Wrote {}x{} preview to {}", PREVIEW_SIZE.0, PREVIEW_SIZE.1,
          preview_path.display());

    let selection = match preset {
        Some(selection) => selection,
        None => {
            println!("Region of interest on {} as x,y,width,height (empty line cancels):",
                     preview_path.display());
            let mut line = String::new();
            input.read_line(&mut line).map_err(
                |e| failed_precondition_error(&e.to_string()))?;
            if line.trim().is_empty() {
                return Err(failed_precondition_error("Region of interest selection cancelled"));
            }
            line.trim().parse::<Selection>()?
        },
    };
    let rect = scale_selection(&selection, PREVIEW_SIZE, (image.width(), image.height()))?;
    info!("Selection {} on preview is {:?} on the full frame", selection, rect);
    Ok(rect)
}
