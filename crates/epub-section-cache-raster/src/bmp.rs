//! Windows bitmap header parsing and palette bitmap writing.

use std::io::{self, Read, Write};

use crate::RasterError;

const FILE_HEADER_SIZE: u32 = 14;
const CORE_HEADER_SIZE: u32 = 12;
const INFO_HEADER_SIZE: u32 = 40;
const BI_RGB: u32 = 0;
const BI_BITFIELDS: u32 = 3;
/// 72 DPI in pixels per metre.
const PIXELS_PER_METRE: i32 = 2835;

/// Geometry read from a bitmap header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BmpInfo {
    pub width: u16,
    pub height: u16,
    pub bits_per_pixel: u16,
    /// Rows stored top row first (negative height in the header).
    pub top_down: bool,
    /// Absolute offset of the first pixel row.
    pub pixel_offset: u32,
}

impl BmpInfo {
    /// Bytes per stored row, padded to a 4-byte boundary.
    pub fn row_stride(&self) -> u64 {
        row_stride(u32::from(self.width), self.bits_per_pixel)
    }

    /// Bytes of pixel data the header promises.
    pub fn pixel_bytes(&self) -> u64 {
        self.row_stride() * u64::from(self.height)
    }
}

fn row_stride(width: u32, bits_per_pixel: u16) -> u64 {
    (u64::from(width) * u64::from(bits_per_pixel)).div_ceil(32) * 4
}

fn read_u16(raw: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([raw[at], raw[at + 1]])
}

fn read_u32(raw: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([raw[at], raw[at + 1], raw[at + 2], raw[at + 3]])
}

fn read_exact_or_truncated(input: &mut dyn Read, buf: &mut [u8]) -> Result<(), RasterError> {
    input.read_exact(buf).map_err(|err| {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            RasterError::Truncated
        } else {
            RasterError::Io(err)
        }
    })
}

fn skip(input: &mut dyn Read, count: u64) -> Result<(), RasterError> {
    let skipped = io::copy(&mut (&mut *input).take(count), &mut io::sink())?;
    if skipped < count {
        return Err(RasterError::Truncated);
    }
    Ok(())
}

/// Parse a bitmap header and check that the promised pixel data is present.
///
/// Consumes the whole bitmap from `input`.
pub fn read_info(input: &mut dyn Read) -> Result<BmpInfo, RasterError> {
    let mut file_header = [0u8; FILE_HEADER_SIZE as usize + 4];
    read_exact_or_truncated(input, &mut file_header)?;
    if &file_header[..2] != b"BM" {
        return Err(RasterError::NotBitmap);
    }
    let pixel_offset = read_u32(&file_header, 10);
    let dib_size = read_u32(&file_header, 14);

    let (width, height, planes, bits_per_pixel, compression) = match dib_size {
        CORE_HEADER_SIZE => {
            let mut core = [0u8; (CORE_HEADER_SIZE - 4) as usize];
            read_exact_or_truncated(input, &mut core)?;
            (
                i64::from(read_u16(&core, 0)),
                i64::from(read_u16(&core, 2)),
                read_u16(&core, 4),
                read_u16(&core, 6),
                BI_RGB,
            )
        }
        size if size >= INFO_HEADER_SIZE => {
            let mut info = [0u8; (INFO_HEADER_SIZE - 4) as usize];
            read_exact_or_truncated(input, &mut info)?;
            skip(input, u64::from(size - INFO_HEADER_SIZE))?;
            (
                i64::from(read_u32(&info, 0) as i32),
                i64::from(read_u32(&info, 4) as i32),
                read_u16(&info, 8),
                read_u16(&info, 10),
                read_u32(&info, 12),
            )
        }
        _ => return Err(RasterError::NotBitmap),
    };

    if planes != 1 {
        return Err(RasterError::NotBitmap);
    }
    let depth_ok = matches!(bits_per_pixel, 1 | 2 | 4 | 8 | 16 | 24 | 32);
    let compression_ok = compression == BI_RGB
        || (compression == BI_BITFIELDS && matches!(bits_per_pixel, 16 | 32));
    if !depth_ok || !compression_ok {
        return Err(RasterError::Unsupported {
            bits_per_pixel,
            compression,
        });
    }
    let invalid = || RasterError::InvalidDimensions {
        width: width.clamp(0, i64::from(u32::MAX)) as u32,
        height: height.unsigned_abs().min(u64::from(u32::MAX)) as u32,
    };
    let out_width = u16::try_from(width)
        .ok()
        .filter(|w| *w > 0)
        .ok_or_else(invalid)?;
    let out_height = u16::try_from(height.unsigned_abs())
        .ok()
        .filter(|h| *h > 0)
        .ok_or_else(invalid)?;

    let header_end = u64::from(FILE_HEADER_SIZE) + u64::from(dib_size);
    let pixel_start = u64::from(pixel_offset);
    if pixel_start < header_end {
        return Err(RasterError::NotBitmap);
    }
    skip(input, pixel_start - header_end)?;

    let info = BmpInfo {
        width: out_width,
        height: out_height,
        bits_per_pixel,
        top_down: height < 0,
        pixel_offset,
    };
    skip(input, info.pixel_bytes())?;
    Ok(info)
}

/// Palette bitmap writer: bottom-up rows of packed palette indices.
pub struct PaletteBitmap<'a> {
    pub width: u32,
    pub height: u32,
    pub bits_per_pixel: u16,
    /// Gray levels, index 0 first.
    pub palette: &'a [u8],
    /// One palette index per pixel, top row first.
    pub indices: &'a [u8],
}

impl PaletteBitmap<'_> {
    pub fn write_to(&self, out: &mut dyn Write) -> Result<(), RasterError> {
        if !matches!(self.bits_per_pixel, 1 | 2 | 4 | 8) {
            return Err(RasterError::Unsupported {
                bits_per_pixel: self.bits_per_pixel,
                compression: BI_RGB,
            });
        }
        let dims_error = RasterError::InvalidDimensions {
            width: self.width,
            height: self.height,
        };
        let pixels = u64::from(self.width) * u64::from(self.height);
        if self.width == 0 || self.height == 0 || self.indices.len() as u64 != pixels {
            return Err(dims_error);
        }
        let width = i32::try_from(self.width).map_err(|_| RasterError::InvalidDimensions {
            width: self.width,
            height: self.height,
        })?;
        let height = i32::try_from(self.height).map_err(|_| dims_error)?;

        let stride = row_stride(self.width, self.bits_per_pixel);
        let image_size = stride * u64::from(self.height);
        let palette_size = 4 * self.palette.len() as u64;
        let pixel_offset = u64::from(FILE_HEADER_SIZE + INFO_HEADER_SIZE) + palette_size;
        let file_size = u32::try_from(pixel_offset + image_size).map_err(|_| {
            RasterError::InvalidDimensions {
                width: self.width,
                height: self.height,
            }
        })?;

        let mut header = Vec::with_capacity(pixel_offset as usize);
        header.extend_from_slice(b"BM");
        header.extend_from_slice(&file_size.to_le_bytes());
        header.extend_from_slice(&0u32.to_le_bytes());
        header.extend_from_slice(&(pixel_offset as u32).to_le_bytes());
        header.extend_from_slice(&INFO_HEADER_SIZE.to_le_bytes());
        header.extend_from_slice(&width.to_le_bytes());
        header.extend_from_slice(&height.to_le_bytes());
        header.extend_from_slice(&1u16.to_le_bytes());
        header.extend_from_slice(&self.bits_per_pixel.to_le_bytes());
        header.extend_from_slice(&BI_RGB.to_le_bytes());
        header.extend_from_slice(&(image_size as u32).to_le_bytes());
        header.extend_from_slice(&PIXELS_PER_METRE.to_le_bytes());
        header.extend_from_slice(&PIXELS_PER_METRE.to_le_bytes());
        header.extend_from_slice(&(self.palette.len() as u32).to_le_bytes());
        header.extend_from_slice(&0u32.to_le_bytes());
        for &gray in self.palette {
            header.extend_from_slice(&[gray, gray, gray, 0]);
        }
        out.write_all(&header)?;

        let row_width = self.width as usize;
        let mut row = vec![0u8; stride as usize];
        for source in self.indices.chunks_exact(row_width).rev() {
            row.fill(0);
            pack_row(source, self.bits_per_pixel, &mut row);
            out.write_all(&row)?;
        }
        out.flush()?;
        Ok(())
    }
}

/// Pack palette indices MSB first.
fn pack_row(indices: &[u8], bits_per_pixel: u16, row: &mut [u8]) {
    let bits = bits_per_pixel as usize;
    let per_byte = 8 / bits;
    let mask = ((1u16 << bits) - 1) as u8;
    for (i, &index) in indices.iter().enumerate() {
        let shift = 8 - bits * (i % per_byte + 1);
        row[i / per_byte] |= (index & mask) << shift;
    }
}
