//! Open-or-build entry point over the builder and reader.

use crate::builder::{section_path, SectionBuilder};
use crate::config::SectionCacheOptions;
use crate::container::ChapterSource;
use crate::error::{FormatError, SectionError};
use crate::format::RenderParams;
use crate::image_cache::RasterCodec;
use crate::pager::Pager;
use crate::reader::{SectionLookup, SectionReader};
use crate::retry::Sleeper;
use crate::storage::Storage;

/// Per-book section cache.
pub struct SectionCache<'a, S: Storage, R: RasterCodec, Z: Sleeper> {
    storage: &'a S,
    codec: &'a R,
    sleeper: Z,
    options: SectionCacheOptions,
}

impl<'a, S: Storage, R: RasterCodec, Z: Sleeper> SectionCache<'a, S, R, Z> {
    pub fn new(storage: &'a S, codec: &'a R, sleeper: Z, options: SectionCacheOptions) -> Self {
        Self {
            storage,
            codec,
            sleeper,
            options,
        }
    }

    pub fn options(&self) -> &SectionCacheOptions {
        &self.options
    }

    /// Open the cached section for `spine_index` without building.
    pub fn open<C: ChapterSource + ?Sized>(
        &self,
        container: &C,
        spine_index: usize,
        params: &RenderParams,
    ) -> SectionLookup<'a, S> {
        let path = section_path(container.cache_dir(), spine_index);
        SectionReader::try_open(self.storage, &path, params)
    }

    /// Open the cached section, building it first on a miss.
    pub fn open_or_build<C, P>(
        &self,
        container: &mut C,
        pager: &mut P,
        spine_index: usize,
        params: &RenderParams,
        on_popup: &mut dyn FnMut(),
    ) -> Result<SectionReader<'a, S>, SectionError>
    where
        C: ChapterSource + ?Sized,
        P: Pager,
    {
        if let SectionLookup::Opened(reader) = self.open(&*container, spine_index, params) {
            return Ok(reader);
        }
        log::debug!("section {} missing or stale, building", spine_index);
        let mut builder = SectionBuilder::new(self.storage, self.codec, &self.sleeper, self.options);
        let summary = builder.build(container, pager, spine_index, params, on_popup)?;
        match SectionReader::try_open(self.storage, &summary.path, params) {
            SectionLookup::Opened(reader) => Ok(reader),
            SectionLookup::Miss => Err(SectionError::Format(FormatError::Truncated)),
        }
    }

    /// Remove the cached section for `spine_index`. Returns whether a file
    /// was removed.
    pub fn clear<C: ChapterSource + ?Sized>(
        &self,
        container: &C,
        spine_index: usize,
    ) -> Result<bool, SectionError> {
        let path = section_path(container.cache_dir(), spine_index);
        if !self.storage.exists(&path) {
            return Ok(false);
        }
        self.storage.remove(&path)?;
        log::debug!("section {} cleared", spine_index);
        Ok(true)
    }
}
