//! Error types for section cache build, load, and image resolution.

use core::fmt;
use std::io;

use crate::pager::PagerError;

/// Errors from the fixed-layout section file routines.
#[derive(Debug)]
pub enum FormatError {
    /// Underlying storage I/O failed.
    Io(io::Error),
    /// The file ended before a fixed-width field could be read.
    Truncated,
    /// A boolean header byte held something other than 0 or 1.
    InvalidBool { offset: u64, value: u8 },
    /// A lookup-table entry carried the page-write-failed sentinel.
    SentinelEntry { index: usize },
    /// A byte offset did not fit the on-disk `u32` width.
    OffsetOverflow { offset: u64 },
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "section file io: {}", err),
            Self::Truncated => write!(f, "section file truncated"),
            Self::InvalidBool { offset, value } => {
                write!(f, "invalid bool byte {} at offset {}", value, offset)
            }
            Self::SentinelEntry { index } => {
                write!(f, "lookup table entry {} is the failed-page sentinel", index)
            }
            Self::OffsetOverflow { offset } => {
                write!(f, "offset {} exceeds the u32 section file range", offset)
            }
        }
    }
}

impl std::error::Error for FormatError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for FormatError {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Self::Truncated
        } else {
            Self::Io(err)
        }
    }
}

/// Errors from serializing or deserializing one page blob.
#[derive(Debug)]
pub enum PageCodecError {
    Io(io::Error),
    /// Stored checksum does not match the payload.
    Checksum { expected: u32, actual: u32 },
    Encode(postcard::Error),
    Decode(postcard::Error),
    /// Payload length exceeds the configured blob cap.
    TooLarge { len: usize, limit: usize },
}

impl fmt::Display for PageCodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "page io: {}", err),
            Self::Checksum { expected, actual } => write!(
                f,
                "page checksum mismatch (expected={:08x} actual={:08x})",
                expected, actual
            ),
            Self::Encode(err) => write!(f, "page encode failed: {}", err),
            Self::Decode(err) => write!(f, "page decode failed: {}", err),
            Self::TooLarge { len, limit } => {
                write!(f, "page payload too large (len={} limit={})", len, limit)
            }
        }
    }
}

impl std::error::Error for PageCodecError {}

impl From<io::Error> for PageCodecError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// Section build and load error.
///
/// Cache misses are not errors; see [`crate::SectionLookup::Miss`].
#[derive(Debug)]
pub enum SectionError {
    /// Chapter bytes could not be copied to scratch storage after every retry.
    SourceStream { href: String, attempts: u32 },
    /// The pager reported failure.
    Pagination(PagerError),
    /// A page failed to serialize; the whole build is discarded.
    PageWrite { page_index: usize },
    /// The chapter produced more pages than the header can count.
    TooManyPages { count: usize },
    /// Caller asked for a page outside `[0, page_count)`.
    PageOutOfRange { index: usize, page_count: u16 },
    /// The container has no chapter at this spine index.
    ChapterNotFound { spine_index: usize },
    Format(FormatError),
    PageDecode(PageCodecError),
    Io(io::Error),
}

impl fmt::Display for SectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SourceStream { href, attempts } => write!(
                f,
                "failed to stream chapter source {} after {} attempts",
                href, attempts
            ),
            Self::Pagination(err) => write!(f, "pagination failed: {}", err),
            Self::PageWrite { page_index } => {
                write!(f, "page {} failed to serialize", page_index)
            }
            Self::TooManyPages { count } => {
                write!(f, "chapter produced {} pages (max {})", count, u16::MAX)
            }
            Self::PageOutOfRange { index, page_count } => write!(
                f,
                "page index {} out of range (page_count={})",
                index, page_count
            ),
            Self::ChapterNotFound { spine_index } => {
                write!(f, "no chapter at spine index {}", spine_index)
            }
            Self::Format(err) => write!(f, "section format: {}", err),
            Self::PageDecode(err) => write!(f, "page load failed: {}", err),
            Self::Io(err) => write!(f, "section io: {}", err),
        }
    }
}

impl std::error::Error for SectionError {}

impl From<FormatError> for SectionError {
    fn from(err: FormatError) -> Self {
        Self::Format(err)
    }
}

impl From<PageCodecError> for SectionError {
    fn from(err: PageCodecError) -> Self {
        Self::PageDecode(err)
    }
}

impl From<PagerError> for SectionError {
    fn from(err: PagerError) -> Self {
        Self::Pagination(err)
    }
}

impl From<io::Error> for SectionError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// Local, non-fatal failure to resolve one embedded image.
#[derive(Debug)]
pub enum ImageResolveError {
    /// Empty, inline-data, network, or non-image reference.
    Unsupported,
    /// Reference normalized to an empty container path.
    Unresolvable,
    /// Container could not stream the image bytes.
    Source { href: String },
    /// Format conversion failed.
    Conversion { href: String },
    /// The cached raster header could not be parsed after generation.
    InvalidRaster { path: String },
    Io(io::Error),
}

impl fmt::Display for ImageResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsupported => write!(f, "unsupported image reference"),
            Self::Unresolvable => write!(f, "image reference resolves to an empty path"),
            Self::Source { href } => write!(f, "failed to read image source {}", href),
            Self::Conversion { href } => write!(f, "failed to convert image {}", href),
            Self::InvalidRaster { path } => write!(f, "invalid cached raster {}", path),
            Self::Io(err) => write!(f, "image cache io: {}", err),
        }
    }
}

impl std::error::Error for ImageResolveError {}

impl From<io::Error> for ImageResolveError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}
