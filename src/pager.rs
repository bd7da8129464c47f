//! Pagination engine seam.
//!
//! The pager turns chapter markup into pages. It is driven through a single
//! entry point and reports back through injected callbacks, so the section
//! builder never sees tokenization or line breaking.

use core::fmt;
use std::io::Read;

use crate::format::RenderParams;
use crate::image_cache::ResolvedImage;
use crate::page::SectionPage;

/// What the pager paginates.
pub struct PagerInput<'a> {
    /// Storage path of the scratch copy of the chapter.
    pub source_path: &'a str,
    /// Open reader over the scratch copy.
    pub source: &'a mut dyn Read,
    /// Bytes in the scratch copy.
    pub source_len: u64,
    pub params: &'a RenderParams,
    /// Hyphenation language for this run, set right before `run`.
    pub language: Option<&'a str>,
}

/// Callbacks the pager reports through.
pub struct PagerCallbacks<'a, P> {
    /// Receives each completed page in order.
    pub on_page: &'a mut dyn FnMut(P),
    /// Passthrough for UI interaction (e.g. an "indexing" popup).
    pub on_popup: &'a mut dyn FnMut(),
    /// Resolves an image `src` to a cached raster; `None` omits the image.
    pub resolve_image: &'a mut dyn FnMut(&str) -> Option<ResolvedImage>,
}

/// Pagination failure reported by a pager.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PagerError {
    pub message: Box<str>,
}

impl PagerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into().into_boxed_str(),
        }
    }
}

impl fmt::Display for PagerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for PagerError {}

/// Pagination engine.
pub trait Pager {
    type Page: SectionPage;

    /// Paginate `input`, handing every finished page to `callbacks.on_page`.
    fn run(
        &mut self,
        input: PagerInput<'_>,
        callbacks: PagerCallbacks<'_, Self::Page>,
    ) -> Result<(), PagerError>;
}
