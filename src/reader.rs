//! Section cache validation and random-access page loads.

use core::fmt;
use std::io::{Seek, SeekFrom};

use crate::error::{FormatError, SectionError};
use crate::format::{self, RenderParams, HEADER_SIZE, LUT_ENTRY_WIDTH, SECTION_FILE_VERSION};
use crate::page::SectionPage;
use crate::storage::{remove_file_quiet, Storage};

/// Outcome of [`SectionReader::try_open`].
pub enum SectionLookup<'a, S: Storage> {
    /// The cache matches the requested parameters.
    Opened(SectionReader<'a, S>),
    /// Absent, stale, or unusable; rebuild.
    Miss,
}

impl<'a, S: Storage> SectionLookup<'a, S> {
    pub fn is_miss(&self) -> bool {
        matches!(self, Self::Miss)
    }

    pub fn into_reader(self) -> Option<SectionReader<'a, S>> {
        match self {
            Self::Opened(reader) => Some(reader),
            Self::Miss => None,
        }
    }
}

impl<S: Storage> fmt::Debug for SectionLookup<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Opened(reader) => f
                .debug_struct("Opened")
                .field("path", &reader.path)
                .field("page_count", &reader.page_count)
                .finish(),
            Self::Miss => f.write_str("Miss"),
        }
    }
}

enum Rejection {
    Unreadable(FormatError),
    Version(u8),
    Params,
    Unfinalized { lut_offset: u32, page_count: u16 },
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unreadable(err) => write!(f, "unreadable header: {}", err),
            Self::Version(version) => write!(
                f,
                "unknown version {} (expected {})",
                version, SECTION_FILE_VERSION
            ),
            Self::Params => f.write_str("render parameters do not match"),
            Self::Unfinalized {
                lut_offset,
                page_count,
            } => write!(
                f,
                "not finalized (lut_offset={} page_count={})",
                lut_offset, page_count
            ),
        }
    }
}

impl From<FormatError> for Rejection {
    fn from(err: FormatError) -> Self {
        Self::Unreadable(err)
    }
}

/// Opened, validated section cache.
///
/// Each page load opens the file, seeks through the lookup table, and closes
/// it again.
pub struct SectionReader<'a, S: Storage> {
    storage: &'a S,
    path: String,
    page_count: u16,
}

impl<'a, S: Storage> SectionReader<'a, S> {
    /// Open `path` if it was built with exactly `requested`.
    ///
    /// Version or parameter mismatches, unreadable headers, and files whose
    /// tail was never patched are removed and reported as a miss.
    pub fn try_open(storage: &'a S, path: &str, requested: &RenderParams) -> SectionLookup<'a, S> {
        let mut file = match storage.open_read(path) {
            Ok(file) => file,
            Err(err) => {
                log::debug!("section {} not opened: {}", path, err);
                return SectionLookup::Miss;
            }
        };
        let verdict = validate(&mut file, requested);
        drop(file);
        match verdict {
            Ok(page_count) => {
                log::debug!("section {} opened: {} pages", path, page_count);
                SectionLookup::Opened(Self {
                    storage,
                    path: path.to_string(),
                    page_count,
                })
            }
            Err(reason) => {
                log::info!("section {} rejected: {}", path, reason);
                remove_file_quiet(storage, path);
                SectionLookup::Miss
            }
        }
    }

    pub fn page_count(&self) -> u16 {
        self.page_count
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Load page `index` through the lookup table.
    pub fn load_page<P: SectionPage>(&self, index: usize) -> Result<P, SectionError> {
        let lut_index = match u16::try_from(index) {
            Ok(lut_index) if lut_index < self.page_count => lut_index,
            _ => {
                return Err(SectionError::PageOutOfRange {
                    index,
                    page_count: self.page_count,
                })
            }
        };
        let mut file = self.storage.open_read(&self.path)?;
        let lut_offset = format::read_lut_offset(&mut file)?;
        let page_offset = format::read_lut_entry(&mut file, lut_offset, lut_index)?;
        file.seek(SeekFrom::Start(u64::from(page_offset)))?;
        Ok(P::deserialize_from(&mut file)?)
    }
}

fn validate<F: std::io::Read + Seek>(
    file: &mut F,
    requested: &RenderParams,
) -> Result<u16, Rejection> {
    let header = format::read_header(file)?;
    if header.version != SECTION_FILE_VERSION {
        return Err(Rejection::Version(header.version));
    }
    if header.params != *requested {
        return Err(Rejection::Params);
    }
    let page_count = format::read_page_count(file)?;
    let lut_offset = format::read_lut_offset(file)?;
    let len = file.seek(SeekFrom::End(0)).map_err(FormatError::from)?;
    let lut_end = u64::from(lut_offset) + LUT_ENTRY_WIDTH * u64::from(page_count);
    if (lut_offset as usize) < HEADER_SIZE || lut_end > len {
        return Err(Rejection::Unfinalized {
            lut_offset,
            page_count,
        });
    }
    Ok(page_count)
}
