// Copyright (c) 2023 Steven Rosenthal smr@dt3.org
// See LICENSE file in root directory for license terms.

// Colour conversion of raw sensor frames. Bayer sensors record one colour per
// pixel through a 2x2 colour filter array; the missing two colours at each
// pixel are interpolated bilinearly from the nearest neighbours carrying them.
// Borders are handled by reflecting about the edge pixel (reflect-101), which
// keeps the CFA phase of the reflected neighbour.
//
// See:
// https://docs.opencv.org/4.x/de/d25/imgproc_color_conversions.html#color_convert_bayer

use canonical_error::{CanonicalError, invalid_argument_error};
use image::{DynamicImage, GrayImage, Rgb, RgbImage};
use log::debug;

use crate::abstract_camera::{PixelFormat, RawFrame};

const RED: usize = 0;
const GREEN: usize = 1;
const BLUE: usize = 2;

/// Colour filter array layout, naming the top-left 2x2 cell in reading order.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CfaPattern {
    Rggb,
    Grbg,
    Gbrg,
    Bggr,
}

impl CfaPattern {
    pub fn from_pixel_format(format: PixelFormat) -> Option<CfaPattern> {
        match format {
            PixelFormat::BayerRG8 => Some(CfaPattern::Rggb),
            PixelFormat::BayerGR8 => Some(CfaPattern::Grbg),
            PixelFormat::BayerGB8 => Some(CfaPattern::Gbrg),
            PixelFormat::BayerBG8 => Some(CfaPattern::Bggr),
            _ => None,
        }
    }

    // Index into RGB of the colour sampled at (x, y).
    fn channel_at(&self, x: usize, y: usize) -> usize {
        let cell = match self {
            CfaPattern::Rggb => [RED, GREEN, GREEN, BLUE],
            CfaPattern::Grbg => [GREEN, RED, BLUE, GREEN],
            CfaPattern::Gbrg => [GREEN, BLUE, RED, GREEN],
            CfaPattern::Bggr => [BLUE, GREEN, GREEN, RED],
        };
        cell[(y & 1) * 2 + (x & 1)]
    }
}

// Valid for -1 <= i <= n, n >= 2.
fn reflect(i: isize, n: usize) -> usize {
    let n = n as isize;
    let r = if i < 0 {
        -i
    } else if i >= n {
        2 * n - 2 - i
    } else {
        i
    };
    r as usize
}

/// Converts a single-channel Bayer mosaic to RGB by bilinear interpolation.
pub fn demosaic(data: &[u8], width: u32, height: u32, pattern: CfaPattern)
                -> Result<RgbImage, CanonicalError> {
    let (w, h) = (width as usize, height as usize);
    if w < 2 || h < 2 {
        return Err(invalid_argument_error(
            format!("Bayer frame {}x{} is smaller than one CFA cell", w, h).as_str()));
    }
    if data.len() != w * h {
        return Err(invalid_argument_error(
            format!("Bayer data length {} does not match {}x{}",
                    data.len(), w, h).as_str()));
    }
    let at = |x: isize, y: isize| -> u32 {
        data[reflect(y, h) * w + reflect(x, w)] as u32
    };

    let mut rgb_image = RgbImage::new(width, height);
    for y in 0..h {
        for x in 0..w {
            let (xi, yi) = (x as isize, y as isize);
            let own = pattern.channel_at(x, y);
            let mut rgb = [0u32; 3];
            rgb[own] = at(xi, yi);
            if own == GREEN {
                // Row and column neighbours carry the two other colours.
                let horiz = pattern.channel_at(x ^ 1, y);
                let vert = pattern.channel_at(x, y ^ 1);
                rgb[horiz] = (at(xi - 1, yi) + at(xi + 1, yi) + 1) / 2;
                rgb[vert] = (at(xi, yi - 1) + at(xi, yi + 1) + 1) / 2;
            } else {
                rgb[GREEN] = (at(xi - 1, yi) + at(xi + 1, yi) +
                              at(xi, yi - 1) + at(xi, yi + 1) + 2) / 4;
                rgb[BLUE - own] = (at(xi - 1, yi - 1) + at(xi + 1, yi - 1) +
                                   at(xi - 1, yi + 1) + at(xi + 1, yi + 1) + 2) / 4;
            }
            rgb_image.put_pixel(x as u32, y as u32,
                                Rgb([rgb[0] as u8, rgb[1] as u8, rgb[2] as u8]));
        }
    }
    Ok(rgb_image)
}

/// Samples an RGB image through the colour filter array, yielding what a Bayer
/// sensor would read out.
pub fn mosaic(rgb_image: &RgbImage, pattern: CfaPattern) -> Vec<u8> {
    let (width, height) = rgb_image.dimensions();
    let mut data = Vec::with_capacity((width * height) as usize);
    for y in 0..height {
        for x in 0..width {
            let channel = pattern.channel_at(x as usize, y as usize);
            data.push(rgb_image.get_pixel(x, y)[channel]);
        }
    }
    data
}

/// Converts a raw frame to a displayable/storable image according to its pixel
/// format. If the format cannot be converted, the data is kept as a
/// monochrome image provided it has one byte per pixel.
pub fn develop(frame: RawFrame) -> Result<DynamicImage, CanonicalError> {
    let (width, height) = (frame.width, frame.height);
    let expected_len =
        width as usize * height as usize * frame.pixel_format.bytes_per_pixel();
    let format = frame.pixel_format;

    if frame.data.len() == expected_len {
        if let Some(pattern) = CfaPattern::from_pixel_format(format) {
            match demosaic(&frame.data, width, height, pattern) {
                Ok(rgb) => return Ok(DynamicImage::ImageRgb8(rgb)),
                Err(e) => debug!("Frame {}: {}", frame.frame_id, e),
            }
        }
    }

    let mut data = frame.data;
    if data.len() == expected_len && format.bytes_per_pixel() == 3 {
        if format == PixelFormat::Bgr8 {
            for pixel in data.chunks_exact_mut(3) {
                pixel.swap(0, 2);
            }
        }
        return RgbImage::from_raw(width, height, data)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(|| invalid_argument_error("RGB buffer too small"));
    }
    if data.len() == width as usize * height as usize {
        if format != PixelFormat::Mono8 {
            debug!("Frame {}: keeping {:?} data as monochrome", frame.frame_id, format);
        }
        return GrayImage::from_raw(width, height, data)
            .map(DynamicImage::ImageLuma8)
            .ok_or_else(|| invalid_argument_error("Mono buffer too small"));
    }
    Err(invalid_argument_error(
        format!("Frame {} {:?} data length {} does not match {}x{}",
                frame.frame_id, format, data.len(), width, height).as_str()))
}
