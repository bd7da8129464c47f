//! Section cache build pipeline.
//!
//! `Idle -> StreamingSource -> Paginating -> WritingLut -> Finalized`, with
//! `Failed` reachable from every state. A failed build leaves neither the
//! section file nor the scratch copy of the chapter on storage.

use std::io::{self, Seek, Write};

use crate::config::SectionCacheOptions;
use crate::container::ChapterSource;
use crate::error::SectionError;
use crate::format::{self, to_u32_offset, RenderParams, LUT_SENTINEL};
use crate::image_cache::{ImageResolver, RasterCodec, ResolvedImage};
use crate::page::SectionPage;
use crate::pager::{Pager, PagerCallbacks, PagerInput};
use crate::path::join;
use crate::retry::Sleeper;
use crate::storage::{remove_file_quiet, PendingFile, Storage};

/// Directory under the book cache holding section files.
pub const SECTIONS_DIR: &str = "sections";

/// Storage path of the section file for `spine_index`.
pub fn section_path(cache_dir: &str, spine_index: usize) -> String {
    join(cache_dir, &format!("{}/{}.bin", SECTIONS_DIR, spine_index))
}

/// Scratch copy of the chapter markup used while paginating.
pub fn scratch_source_path(cache_dir: &str, spine_index: usize) -> String {
    join(cache_dir, &format!(".tmp_{}.html", spine_index))
}

/// Build pipeline state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildState {
    Idle,
    StreamingSource,
    Paginating,
    WritingLut,
    Finalized,
    Failed,
}

/// Result of a finalized build.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BuildSummary {
    /// Storage path of the section file.
    pub path: String,
    pub page_count: u16,
    pub lut_offset: u32,
    /// Bytes of chapter markup paginated.
    pub source_bytes: u64,
    /// Streaming attempts it took to copy the chapter.
    pub stream_attempts: u32,
}

/// Builds one section file per call.
pub struct SectionBuilder<'a, S: Storage, R: RasterCodec, Z: Sleeper> {
    storage: &'a S,
    codec: &'a R,
    sleeper: Z,
    options: SectionCacheOptions,
    state: BuildState,
}

impl<'a, S: Storage, R: RasterCodec, Z: Sleeper> SectionBuilder<'a, S, R, Z> {
    pub fn new(storage: &'a S, codec: &'a R, sleeper: Z, options: SectionCacheOptions) -> Self {
        Self {
            storage,
            codec,
            sleeper,
            options,
            state: BuildState::Idle,
        }
    }

    /// State reached by the last build (`Finalized` or `Failed`), or `Idle`.
    pub fn state(&self) -> BuildState {
        self.state
    }

    /// Paginate chapter `spine_index` for `params` and persist it.
    ///
    /// Runs to completion on the calling task; callers show their own
    /// progress indication first. `on_popup` is handed through to the pager.
    pub fn build<C, P>(
        &mut self,
        container: &mut C,
        pager: &mut P,
        spine_index: usize,
        params: &RenderParams,
        on_popup: &mut dyn FnMut(),
    ) -> Result<BuildSummary, SectionError>
    where
        C: ChapterSource + ?Sized,
        P: Pager,
    {
        self.state = BuildState::Idle;
        let result = self.run(container, pager, spine_index, params, on_popup);
        match &result {
            Ok(summary) => {
                self.transition(BuildState::Finalized);
                log::info!(
                    "section {} built: {} pages, lut at {}",
                    spine_index,
                    summary.page_count,
                    summary.lut_offset
                );
            }
            Err(err) => {
                self.transition(BuildState::Failed);
                log::warn!("section {} build failed: {}", spine_index, err);
            }
        }
        result
    }

    fn transition(&mut self, next: BuildState) {
        log::debug!("section build {:?} -> {:?}", self.state, next);
        self.state = next;
    }

    fn run<C, P>(
        &mut self,
        container: &mut C,
        pager: &mut P,
        spine_index: usize,
        params: &RenderParams,
        on_popup: &mut dyn FnMut(),
    ) -> Result<BuildSummary, SectionError>
    where
        C: ChapterSource + ?Sized,
        P: Pager,
    {
        let storage = self.storage;
        let href = container
            .chapter_href(spine_index)
            .ok_or(SectionError::ChapterNotFound { spine_index })?;
        let cache_dir = container.cache_dir().to_string();
        storage.create_dir_all(&join(&cache_dir, SECTIONS_DIR))?;
        let scratch_path = scratch_source_path(&cache_dir, spine_index);
        let path = section_path(&cache_dir, spine_index);

        self.transition(BuildState::StreamingSource);
        let scratch = PendingFile::new(storage, scratch_path.clone());
        let (source_bytes, stream_attempts) = self.stream_source(container, &href, &scratch_path)?;
        log::debug!(
            "streamed {} to {} ({} bytes)",
            href,
            scratch_path,
            source_bytes
        );

        self.transition(BuildState::Paginating);
        let pending = PendingFile::new(storage, path.clone());
        let mut file = storage.open_write(&path)?;
        format::write_header(&mut file, params)?;

        let mut lut: Vec<u32> = Vec::new();
        let language = container.preferred_language().map(str::to_string);
        let paginated = {
            let mut source = storage.open_read(&scratch_path)?;
            let resolver = ImageResolver::new(storage, self.codec, self.options.image);
            let mut on_page = |page: P::Page| {
                let offset = write_page(&mut file, &page, lut.len());
                lut.push(offset);
            };
            let mut resolve_image = |src: &str| -> Option<ResolvedImage> {
                match resolver.resolve(
                    &mut *container,
                    &href,
                    src,
                    params.viewport_width,
                    params.viewport_height,
                ) {
                    Ok(image) => Some(image),
                    Err(err) => {
                        log::warn!("image {} in {} omitted: {}", src, href, err);
                        None
                    }
                }
            };
            let input = PagerInput {
                source_path: &scratch_path,
                source: &mut source,
                source_len: source_bytes,
                params,
                language: language.as_deref(),
            };
            pager.run(
                input,
                PagerCallbacks {
                    on_page: &mut on_page,
                    on_popup: &mut *on_popup,
                    resolve_image: &mut resolve_image,
                },
            )
        };
        drop(scratch);
        paginated?;

        self.transition(BuildState::WritingLut);
        if let Some(page_index) = lut.iter().position(|&offset| offset == LUT_SENTINEL) {
            return Err(SectionError::PageWrite { page_index });
        }
        let page_count =
            u16::try_from(lut.len()).map_err(|_| SectionError::TooManyPages { count: lut.len() })?;
        let lut_offset = format::write_lut(&mut file, &lut)?;
        format::patch_tail(&mut file, page_count, lut_offset)?;
        file.flush()?;
        drop(file);
        pending.commit();

        Ok(BuildSummary {
            path,
            page_count,
            lut_offset,
            source_bytes,
            stream_attempts,
        })
    }

    fn stream_source<C: ChapterSource + ?Sized>(
        &self,
        container: &mut C,
        href: &str,
        scratch_path: &str,
    ) -> Result<(u64, u32), SectionError> {
        let storage = self.storage;
        let chunk_bytes = self.options.chunk_bytes();
        let outcome = self.options.retry.run(&self.sleeper, |attempt| {
            if attempt > 0 {
                log::warn!("retrying stream of {} (attempt {})", href, attempt + 1);
            }
            remove_file_quiet(storage, scratch_path);
            let streamed = stream_once(storage, container, href, scratch_path, chunk_bytes);
            if let Err(err) = &streamed {
                log::debug!("stream attempt {} for {} failed: {}", attempt + 1, href, err);
                remove_file_quiet(storage, scratch_path);
            }
            streamed
        });
        match outcome.result {
            Ok(bytes) => Ok((bytes, outcome.attempts)),
            Err(_) => Err(SectionError::SourceStream {
                href: href.to_string(),
                attempts: outcome.attempts,
            }),
        }
    }
}

fn stream_once<S: Storage, C: ChapterSource + ?Sized>(
    storage: &S,
    container: &mut C,
    href: &str,
    scratch_path: &str,
    chunk_bytes: usize,
) -> io::Result<u64> {
    let mut out = storage.open_write(scratch_path)?;
    let bytes = container.stream_item(href, &mut out, chunk_bytes)?;
    out.flush()?;
    Ok(bytes)
}

/// Serialize `page` at the current position and return that position, or
/// the sentinel when it could not be written.
fn write_page<F: Write + Seek, T: SectionPage>(file: &mut F, page: &T, index: usize) -> u32 {
    let position = match file.stream_position() {
        Ok(position) => position,
        Err(err) => {
            log::warn!("page {}: cannot read write position: {}", index, err);
            return LUT_SENTINEL;
        }
    };
    let position = match to_u32_offset(position) {
        Ok(position) => position,
        Err(err) => {
            log::warn!("page {}: {}", index, err);
            return LUT_SENTINEL;
        }
    };
    if let Err(err) = page.serialize_to(file) {
        log::warn!("failed to serialize page {}: {}", index, err);
        return LUT_SENTINEL;
    }
    log::debug!("page {} written at {}", index, position);
    position
}
