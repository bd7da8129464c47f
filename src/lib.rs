//! Paginated chapter cache for e-ink readers.
//!
//! A chapter's markup is paginated once per rendering configuration and the
//! resulting pages are persisted to a section file with a lookup table, so
//! any page can later be loaded with two seeks. Embedded images are resolved
//! to device-native rasters and cached next to the section files.
//!
//! ```rust,no_run
//! use epub_section_cache::{
//!     DirContainer, FlowPager, FsStorage, RenderParams, SectionCache, SectionCacheOptions,
//!     TextPage, ThreadSleeper,
//! };
//! # fn example<R: epub_section_cache::RasterCodec>(codec: &R) -> Result<(), epub_section_cache::SectionError> {
//! let storage = FsStorage::new("/sd");
//! let mut book = DirContainer::new("/sd/books/moby", ".cache/moby", vec!["text/ch1.xhtml".into()]);
//! let cache = SectionCache::new(&storage, codec, ThreadSleeper, SectionCacheOptions::default());
//! let mut pager = FlowPager::default();
//! let params = RenderParams::for_viewport(480, 800);
//! let reader = cache.open_or_build(&mut book, &mut pager, 0, &params, &mut || {})?;
//! let first: TextPage = reader.load_page(0)?;
//! # let _ = first;
//! # Ok(())
//! # }
//! ```

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

pub mod builder;
pub mod config;
pub mod container;
pub mod error;
pub mod format;
pub mod image_cache;
pub mod page;
pub mod pager;
pub mod path;
pub mod reader;
pub mod retry;
pub mod section;
pub mod storage;

#[cfg(feature = "flow-pager")]
pub mod flow_pager;

pub use builder::{BuildState, BuildSummary, SectionBuilder};
pub use config::{ImageCacheOptions, SectionCacheOptions};
pub use container::{ChapterSource, DirContainer};
pub use error::{FormatError, ImageResolveError, PageCodecError, SectionError};
pub use format::{RenderParams, SectionHeader, HEADER_SIZE, LUT_SENTINEL, SECTION_FILE_VERSION};
pub use image_cache::{ImageResolver, RasterCodec, RasterSize, ResolvedImage};
pub use page::{PageElement, SectionPage, TextPage};
pub use pager::{Pager, PagerCallbacks, PagerError, PagerInput};
pub use reader::{SectionLookup, SectionReader};
pub use retry::{RetryPolicy, Sleeper, ThreadSleeper};
pub use section::SectionCache;
pub use storage::{FsStorage, MemStorage, PendingFile, Storage};

#[cfg(feature = "flow-pager")]
pub use flow_pager::{FlowMetrics, FlowPager};
