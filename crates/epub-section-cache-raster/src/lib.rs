//! BMP raster backend for `epub-section-cache`.
//!
//! [`BmpCodec`] reads bitmap headers for the image cache and converts
//! JPEG, PNG, GIF and WebP sources into grayscale palette bitmaps no larger
//! than the requested box, keeping the aspect ratio.

#![cfg_attr(
    not(test),
    deny(
        clippy::disallowed_methods,
        clippy::expect_used,
        clippy::unwrap_used,
        clippy::panic,
        clippy::panic_in_result_fn,
        clippy::todo,
        clippy::unimplemented
    )
)]

pub mod bmp;

use core::fmt;
use std::io::{self, Read, Write};

use epub_section_cache::image_cache::{RasterCodec, RasterSize};
use epub_section_cache::path::has_any_extension;
use image::imageops::FilterType;
use image::GrayImage;

pub use bmp::{BmpInfo, PaletteBitmap};

/// Raster decode, conversion, or header failure.
#[derive(Debug)]
pub enum RasterError {
    Io(io::Error),
    /// Input ended before the header or pixel data did.
    Truncated,
    NotBitmap,
    Unsupported { bits_per_pixel: u16, compression: u32 },
    InvalidDimensions { width: u32, height: u32 },
    Decode(image::ImageError),
}

impl fmt::Display for RasterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "raster io error: {}", err),
            Self::Truncated => f.write_str("raster data truncated"),
            Self::NotBitmap => f.write_str("not a bitmap"),
            Self::Unsupported {
                bits_per_pixel,
                compression,
            } => write!(
                f,
                "unsupported bitmap: {} bpp, compression {}",
                bits_per_pixel, compression
            ),
            Self::InvalidDimensions { width, height } => {
                write!(f, "invalid raster dimensions {}x{}", width, height)
            }
            Self::Decode(err) => write!(f, "image decode failed: {}", err),
        }
    }
}

impl std::error::Error for RasterError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Decode(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for RasterError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<image::ImageError> for RasterError {
    fn from(err: image::ImageError) -> Self {
        Self::Decode(err)
    }
}

/// Output gray depth.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GrayDepth {
    /// 1 bit per pixel, black and white.
    Mono,
    /// 2 bits per pixel, four gray levels.
    Gray4,
    /// 8 bits per pixel.
    Gray256,
}

impl GrayDepth {
    pub fn bits_per_pixel(self) -> u16 {
        match self {
            Self::Mono => 1,
            Self::Gray4 => 2,
            Self::Gray256 => 8,
        }
    }

    fn levels(self) -> u16 {
        1 << self.bits_per_pixel()
    }

    fn palette(self) -> Vec<u8> {
        let top = self.levels() - 1;
        (0..=top).map(|level| (level * 255 / top) as u8).collect()
    }
}

/// Bitmap codec for the e-ink panel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BmpCodec {
    pub depth: GrayDepth,
    /// Floyd-Steinberg error diffusion when quantizing.
    pub dither: bool,
}

impl Default for BmpCodec {
    fn default() -> Self {
        Self {
            depth: GrayDepth::Gray4,
            dither: true,
        }
    }
}

impl BmpCodec {
    pub fn new(depth: GrayDepth) -> Self {
        Self {
            depth,
            ..Self::default()
        }
    }

    /// Decode `bytes`, shrink into the box and encode as a palette bitmap.
    pub fn convert_bytes(
        &self,
        bytes: &[u8],
        out: &mut dyn Write,
        max_width: u16,
        max_height: u16,
    ) -> Result<RasterSize, RasterError> {
        if max_width == 0 || max_height == 0 {
            return Err(RasterError::InvalidDimensions {
                width: u32::from(max_width),
                height: u32::from(max_height),
            });
        }
        let decoded = image::load_from_memory(bytes)?;
        let (width, height) = (decoded.width(), decoded.height());
        let fitted = if width > u32::from(max_width) || height > u32::from(max_height) {
            decoded.resize(
                u32::from(max_width),
                u32::from(max_height),
                FilterType::Triangle,
            )
        } else {
            decoded
        };
        let gray = fitted.to_luma8();
        log::debug!(
            "converted {}x{} source to {}x{} {}-bit bitmap",
            width,
            height,
            gray.width(),
            gray.height(),
            self.depth.bits_per_pixel()
        );
        let indices = quantize(&gray, self.depth.levels(), self.dither);
        let palette = self.depth.palette();
        PaletteBitmap {
            width: gray.width(),
            height: gray.height(),
            bits_per_pixel: self.depth.bits_per_pixel(),
            palette: &palette,
            indices: &indices,
        }
        .write_to(out)?;
        let size = |v: u32| u16::try_from(v).unwrap_or(u16::MAX);
        Ok(RasterSize {
            width: size(gray.width()),
            height: size(gray.height()),
        })
    }
}

impl RasterCodec for BmpCodec {
    type Error = RasterError;

    fn can_convert(&self, path: &str) -> bool {
        has_any_extension(path, &[".jpg", ".jpeg", ".png", ".gif", ".webp"])
    }

    fn parse_header(&self, input: &mut dyn Read) -> Result<RasterSize, RasterError> {
        let info = bmp::read_info(input)?;
        Ok(RasterSize {
            width: info.width,
            height: info.height,
        })
    }

    fn convert(
        &self,
        input: &mut dyn Read,
        out: &mut dyn Write,
        max_width: u16,
        max_height: u16,
    ) -> Result<(), RasterError> {
        let mut bytes = Vec::new();
        input.read_to_end(&mut bytes)?;
        self.convert_bytes(&bytes, out, max_width, max_height)?;
        Ok(())
    }
}

/// Map luma to palette indices in `levels` steps.
fn quantize(gray: &GrayImage, levels: u16, dither: bool) -> Vec<u8> {
    let width = gray.width() as usize;
    let top = i32::from(levels) - 1;
    let mut values: Vec<i32> = gray.as_raw().iter().map(|&v| i32::from(v)).collect();
    let mut indices = Vec::with_capacity(values.len());
    for i in 0..values.len() {
        let value = values[i].clamp(0, 255);
        let index = (value * top + 127) / 255;
        indices.push(index as u8);
        if !dither {
            continue;
        }
        let error = value - index * 255 / top;
        let x = i % width;
        let mut spread = |offset: usize, weight: i32| {
            if let Some(slot) = values.get_mut(offset) {
                *slot += error * weight / 16;
            }
        };
        if x + 1 < width {
            spread(i + 1, 7);
        }
        if x > 0 {
            spread(i + width - 1, 3);
        }
        spread(i + width, 5);
        if x + 1 < width {
            spread(i + width + 1, 1);
        }
    }
    indices
}
