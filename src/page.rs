//! Page blobs stored in section files.

use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

use crate::error::PageCodecError;

/// Upper bound for one serialized page payload.
pub const MAX_PAGE_PAYLOAD_BYTES: usize = 256 * 1024;

/// One screen of laid-out content that can be persisted to a section file.
///
/// Blobs are written back to back, so `deserialize_from` must consume exactly
/// what `serialize_to` produced.
pub trait SectionPage: Sized {
    fn serialize_to<W: Write>(&self, out: &mut W) -> Result<(), PageCodecError>;

    fn deserialize_from<R: Read>(input: &mut R) -> Result<Self, PageCodecError>;
}

/// Positioned element on a [`TextPage`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PageElement {
    /// One laid-out line. `y` is the top of the line box.
    Line {
        x: i16,
        y: i16,
        text: String,
        /// Word gap in pixels for justified lines, 0 otherwise.
        word_gap: u8,
    },
    /// A cached raster scaled into the content box.
    Image {
        x: i16,
        y: i16,
        width: u16,
        height: u16,
        /// Storage path of the cached raster.
        path: String,
    },
}

/// Reference page type produced by the flow pager.
///
/// Blob framing: `u32` payload length, `u32` CRC-32 of the payload, then the
/// postcard-encoded page.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextPage {
    pub elements: Vec<PageElement>,
}

impl TextPage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Text of every line in draw order.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.elements.iter().filter_map(|el| match el {
            PageElement::Line { text, .. } => Some(text.as_str()),
            PageElement::Image { .. } => None,
        })
    }

    pub fn image_paths(&self) -> impl Iterator<Item = &str> {
        self.elements.iter().filter_map(|el| match el {
            PageElement::Image { path, .. } => Some(path.as_str()),
            PageElement::Line { .. } => None,
        })
    }
}

impl SectionPage for TextPage {
    fn serialize_to<W: Write>(&self, out: &mut W) -> Result<(), PageCodecError> {
        let payload = postcard::to_allocvec(self).map_err(PageCodecError::Encode)?;
        if payload.len() > MAX_PAGE_PAYLOAD_BYTES {
            return Err(PageCodecError::TooLarge {
                len: payload.len(),
                limit: MAX_PAGE_PAYLOAD_BYTES,
            });
        }
        let mut blob = Vec::with_capacity(payload.len() + 8);
        blob.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        blob.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        blob.extend_from_slice(&payload);
        out.write_all(&blob)?;
        Ok(())
    }

    fn deserialize_from<R: Read>(input: &mut R) -> Result<Self, PageCodecError> {
        let mut frame = [0u8; 8];
        input.read_exact(&mut frame)?;
        let len = u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        let expected = u32::from_le_bytes([frame[4], frame[5], frame[6], frame[7]]);
        if len > MAX_PAGE_PAYLOAD_BYTES {
            return Err(PageCodecError::TooLarge {
                len,
                limit: MAX_PAGE_PAYLOAD_BYTES,
            });
        }
        let mut payload = vec![0u8; len];
        input.read_exact(&mut payload)?;
        let actual = crc32fast::hash(&payload);
        if actual != expected {
            return Err(PageCodecError::Checksum { expected, actual });
        }
        postcard::from_bytes(&payload).map_err(PageCodecError::Decode)
    }
}
