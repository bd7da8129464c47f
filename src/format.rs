//! Section cache file layout.
//!
//! ```text
//! [header: HEADER_SIZE bytes][page blob 0][page blob 1]...[lut: page_count x u32]
//! ```
//!
//! All integers are little-endian. The header carries the exact rendering
//! configuration the pages were laid out for; `page_count` and `lut_offset`
//! are written as zero first and patched once the build succeeds. Every LUT
//! entry is the absolute offset of one page blob.

use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::FormatError;

/// Current on-disk version. Any other value invalidates the file.
pub const SECTION_FILE_VERSION: u8 = 11;

/// LUT value reserved for "page write failed". Never present once finalized.
pub const LUT_SENTINEL: u32 = 0;

const VERSION_WIDTH: usize = 1;
const FONT_ID_WIDTH: usize = 4;
const LINE_COMPRESSION_WIDTH: usize = 4;
const EXTRA_SPACING_WIDTH: usize = 1;
const ALIGNMENT_WIDTH: usize = 1;
const VIEWPORT_WIDTH_WIDTH: usize = 2;
const VIEWPORT_HEIGHT_WIDTH: usize = 2;
const HYPHENATION_WIDTH: usize = 1;
const PAGE_COUNT_WIDTH: usize = 2;
const LUT_OFFSET_WIDTH: usize = 4;

/// Byte width of the render-parameter block that follows the version byte.
const PARAMS_WIDTH: usize = FONT_ID_WIDTH
    + LINE_COMPRESSION_WIDTH
    + EXTRA_SPACING_WIDTH
    + ALIGNMENT_WIDTH
    + VIEWPORT_WIDTH_WIDTH
    + VIEWPORT_HEIGHT_WIDTH
    + HYPHENATION_WIDTH;

/// Total fixed header width.
pub const HEADER_SIZE: usize = VERSION_WIDTH + PARAMS_WIDTH + PAGE_COUNT_WIDTH + LUT_OFFSET_WIDTH;

/// Offset of the `page_count` slot; `lut_offset` follows it.
pub const TAIL_OFFSET: u64 = (HEADER_SIZE - PAGE_COUNT_WIDTH - LUT_OFFSET_WIDTH) as u64;

/// Offset of the `lut_offset` slot.
pub const LUT_OFFSET_SLOT: u64 = (HEADER_SIZE - LUT_OFFSET_WIDTH) as u64;

/// Width of one LUT entry.
pub const LUT_ENTRY_WIDTH: u64 = 4;

const EXTRA_SPACING_OFFSET: u64 = (VERSION_WIDTH + FONT_ID_WIDTH + LINE_COMPRESSION_WIDTH) as u64;
const HYPHENATION_OFFSET: u64 = (VERSION_WIDTH + PARAMS_WIDTH - HYPHENATION_WIDTH) as u64;

/// Rendering configuration a section file was paginated for.
///
/// Compared field-for-field with no tolerance; `line_compression` compares
/// by bit pattern.
#[derive(Clone, Copy, Debug)]
pub struct RenderParams {
    pub font_id: i32,
    /// Line-height multiplier applied by the pager.
    pub line_compression: f32,
    pub extra_paragraph_spacing: bool,
    /// Alignment code understood by the pager (0 = justified, 1 = left, 2 = center, 3 = right).
    pub paragraph_alignment: u8,
    pub viewport_width: u16,
    pub viewport_height: u16,
    pub hyphenation_enabled: bool,
}

impl RenderParams {
    /// Defaults for a viewport, everything else at reader defaults.
    pub fn for_viewport(width: u16, height: u16) -> Self {
        Self {
            viewport_width: width,
            viewport_height: height,
            ..Self::default()
        }
    }

    fn to_bytes(self) -> [u8; PARAMS_WIDTH] {
        let mut out = [0u8; PARAMS_WIDTH];
        let mut at = 0usize;
        put(&mut out, &mut at, &self.font_id.to_le_bytes());
        put(&mut out, &mut at, &self.line_compression.to_le_bytes());
        put(&mut out, &mut at, &[self.extra_paragraph_spacing as u8]);
        put(&mut out, &mut at, &[self.paragraph_alignment]);
        put(&mut out, &mut at, &self.viewport_width.to_le_bytes());
        put(&mut out, &mut at, &self.viewport_height.to_le_bytes());
        put(&mut out, &mut at, &[self.hyphenation_enabled as u8]);
        debug_assert_eq!(at, PARAMS_WIDTH);
        out
    }

    fn from_bytes(raw: &[u8; PARAMS_WIDTH]) -> Result<Self, FormatError> {
        Ok(Self {
            font_id: i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
            line_compression: f32::from_le_bytes([raw[4], raw[5], raw[6], raw[7]]),
            extra_paragraph_spacing: decode_bool(raw[8], EXTRA_SPACING_OFFSET)?,
            paragraph_alignment: raw[9],
            viewport_width: u16::from_le_bytes([raw[10], raw[11]]),
            viewport_height: u16::from_le_bytes([raw[12], raw[13]]),
            hyphenation_enabled: decode_bool(raw[14], HYPHENATION_OFFSET)?,
        })
    }
}

impl Default for RenderParams {
    fn default() -> Self {
        Self {
            font_id: 0,
            line_compression: 1.0,
            extra_paragraph_spacing: true,
            paragraph_alignment: 0,
            viewport_width: 480,
            viewport_height: 800,
            hyphenation_enabled: false,
        }
    }
}

impl PartialEq for RenderParams {
    fn eq(&self, other: &Self) -> bool {
        self.font_id == other.font_id
            && self.line_compression.to_bits() == other.line_compression.to_bits()
            && self.extra_paragraph_spacing == other.extra_paragraph_spacing
            && self.paragraph_alignment == other.paragraph_alignment
            && self.viewport_width == other.viewport_width
            && self.viewport_height == other.viewport_height
            && self.hyphenation_enabled == other.hyphenation_enabled
    }
}

impl Eq for RenderParams {}

/// Validation-relevant header fields.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SectionHeader {
    pub version: u8,
    pub params: RenderParams,
}

fn put(out: &mut [u8], at: &mut usize, bytes: &[u8]) {
    out[*at..*at + bytes.len()].copy_from_slice(bytes);
    *at += bytes.len();
}

fn decode_bool(value: u8, offset: u64) -> Result<bool, FormatError> {
    match value {
        0 => Ok(false),
        1 => Ok(true),
        value => Err(FormatError::InvalidBool { offset, value }),
    }
}

/// Serialize a header with the given version and provisional tail fields.
pub fn encode_header(version: u8, params: &RenderParams) -> [u8; HEADER_SIZE] {
    let mut out = [0u8; HEADER_SIZE];
    let mut at = 0usize;
    put(&mut out, &mut at, &[version]);
    put(&mut out, &mut at, &params.to_bytes());
    put(&mut out, &mut at, &0u16.to_le_bytes());
    put(&mut out, &mut at, &0u32.to_le_bytes());
    debug_assert_eq!(at, HEADER_SIZE);
    out
}

/// Write the header at the start of `file` with `page_count = 0` and
/// `lut_offset = 0`. Leaves the position right after the header.
pub fn write_header<F: Write + Seek>(file: &mut F, params: &RenderParams) -> Result<(), FormatError> {
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&encode_header(SECTION_FILE_VERSION, params))?;
    Ok(())
}

/// Read the version and render parameters. Tail fields are not interpreted.
pub fn read_header<F: Read + Seek>(file: &mut F) -> Result<SectionHeader, FormatError> {
    file.seek(SeekFrom::Start(0))?;
    let mut version = [0u8; VERSION_WIDTH];
    file.read_exact(&mut version)?;
    let mut params = [0u8; PARAMS_WIDTH];
    file.read_exact(&mut params)?;
    Ok(SectionHeader {
        version: version[0],
        params: RenderParams::from_bytes(&params)?,
    })
}

/// Overwrite the `page_count` and `lut_offset` slots.
pub fn patch_tail<F: Write + Seek>(
    file: &mut F,
    page_count: u16,
    lut_offset: u32,
) -> Result<(), FormatError> {
    let mut tail = [0u8; PAGE_COUNT_WIDTH + LUT_OFFSET_WIDTH];
    tail[..PAGE_COUNT_WIDTH].copy_from_slice(&page_count.to_le_bytes());
    tail[PAGE_COUNT_WIDTH..].copy_from_slice(&lut_offset.to_le_bytes());
    file.seek(SeekFrom::Start(TAIL_OFFSET))?;
    file.write_all(&tail)?;
    Ok(())
}

pub fn read_page_count<F: Read + Seek>(file: &mut F) -> Result<u16, FormatError> {
    file.seek(SeekFrom::Start(TAIL_OFFSET))?;
    let mut raw = [0u8; PAGE_COUNT_WIDTH];
    file.read_exact(&mut raw)?;
    Ok(u16::from_le_bytes(raw))
}

pub fn read_lut_offset<F: Read + Seek>(file: &mut F) -> Result<u32, FormatError> {
    file.seek(SeekFrom::Start(LUT_OFFSET_SLOT))?;
    read_u32(file)
}

/// Read LUT entry `index` of a table starting at `lut_offset`.
pub fn read_lut_entry<F: Read + Seek>(
    file: &mut F,
    lut_offset: u32,
    index: u16,
) -> Result<u32, FormatError> {
    let at = u64::from(lut_offset) + LUT_ENTRY_WIDTH * u64::from(index);
    file.seek(SeekFrom::Start(at))?;
    read_u32(file)
}

/// Write `offsets` as the LUT at the current position and return where it
/// starts. Nothing is written when any entry is the sentinel.
pub fn write_lut<F: Write + Seek>(file: &mut F, offsets: &[u32]) -> Result<u32, FormatError> {
    if let Some(index) = offsets.iter().position(|&o| o == LUT_SENTINEL) {
        return Err(FormatError::SentinelEntry { index });
    }
    let lut_offset = to_u32_offset(file.stream_position()?)?;
    let mut raw = Vec::with_capacity(offsets.len() * LUT_ENTRY_WIDTH as usize);
    for offset in offsets {
        raw.extend_from_slice(&offset.to_le_bytes());
    }
    file.write_all(&raw)?;
    Ok(lut_offset)
}

pub(crate) fn to_u32_offset(offset: u64) -> Result<u32, FormatError> {
    u32::try_from(offset).map_err(|_| FormatError::OffsetOverflow { offset })
}

fn read_u32<F: Read>(file: &mut F) -> Result<u32, FormatError> {
    let mut raw = [0u8; 4];
    file.read_exact(&mut raw)?;
    Ok(u32::from_le_bytes(raw))
}
