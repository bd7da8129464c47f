//! Embedded image resolution to cached device rasters.
//!
//! Each resolved container path maps to one raster file in the book's cache
//! directory, named by a CRC-32 of that path. The key is the path, not the
//! image bytes, so an image replaced under the same path keeps serving the
//! old raster until the cache directory is cleared.

use core::fmt;
use std::io::{Read, Write};

use crate::config::ImageCacheOptions;
use crate::container::ChapterSource;
use crate::error::ImageResolveError;
use crate::path::{directory_of, has_any_extension, join, strip_query_and_fragment};
use crate::storage::{PendingFile, Storage};

/// Pixel dimensions recovered from a raster header.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RasterSize {
    pub width: u16,
    pub height: u16,
}

/// A reference resolved to a cached raster on storage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedImage {
    /// Storage path of the cached raster.
    pub path: String,
    pub width: u16,
    pub height: u16,
}

/// Device raster backend: header probing and conversion into the native format.
pub trait RasterCodec {
    type Error: fmt::Display;

    /// Whether `path` already holds the native raster format.
    fn is_native(&self, path: &str) -> bool {
        has_any_extension(path, &[".bmp"])
    }

    /// Whether `path` names a format this codec converts.
    fn can_convert(&self, path: &str) -> bool {
        has_any_extension(path, &[".jpg", ".jpeg"])
    }

    /// Parse a native raster header.
    fn parse_header(&self, input: &mut dyn Read) -> Result<RasterSize, Self::Error>;

    /// Convert `input` into a native raster no larger than the given box.
    fn convert(
        &self,
        input: &mut dyn Read,
        out: &mut dyn Write,
        max_width: u16,
        max_height: u16,
    ) -> Result<(), Self::Error>;
}

impl<T: RasterCodec + ?Sized> RasterCodec for &T {
    type Error = T::Error;

    fn is_native(&self, path: &str) -> bool {
        (**self).is_native(path)
    }

    fn can_convert(&self, path: &str) -> bool {
        (**self).can_convert(path)
    }

    fn parse_header(&self, input: &mut dyn Read) -> Result<RasterSize, Self::Error> {
        (**self).parse_header(input)
    }

    fn convert(
        &self,
        input: &mut dyn Read,
        out: &mut dyn Write,
        max_width: u16,
        max_height: u16,
    ) -> Result<(), Self::Error> {
        (**self).convert(input, out, max_width, max_height)
    }
}

/// Resolve a raw `src` found in `chapter_href` to a normalized container path.
///
/// Query strings and fragments are dropped. Inline data, network URLs, and
/// empty references are unsupported; a leading `/` is container-root relative.
pub fn resolve_reference<C: ChapterSource + ?Sized>(
    container: &C,
    chapter_href: &str,
    raw_src: &str,
) -> Result<String, ImageResolveError> {
    let src = strip_query_and_fragment(raw_src);
    if src.is_empty() || is_inline_or_remote(src) {
        return Err(ImageResolveError::Unsupported);
    }
    let joined = match src.strip_prefix('/') {
        Some(rooted) => rooted.to_string(),
        None => format!("{}{}", directory_of(chapter_href), src),
    };
    let resolved = container.normalize_href(&joined);
    if resolved.is_empty() {
        return Err(ImageResolveError::Unresolvable);
    }
    Ok(resolved)
}

/// Cache file for a resolved path: `<cache_dir>/img_<crc32>.bmp`.
pub fn image_cache_path(cache_dir: &str, resolved: &str) -> String {
    join(cache_dir, &format!("img_{:08x}.bmp", cache_key(resolved)))
}

fn cache_key(resolved: &str) -> u32 {
    crc32fast::hash(resolved.as_bytes())
}

fn is_inline_or_remote(src: &str) -> bool {
    let starts_with = |prefix: &str| {
        src.len() >= prefix.len() && src.as_bytes()[..prefix.len()].eq_ignore_ascii_case(prefix.as_bytes())
    };
    starts_with("data:") || starts_with("http://") || starts_with("https://") || src.starts_with("//")
}

enum Regenerate {
    Copy,
    Convert,
}

/// Resolves image references against a container, converting and caching.
///
/// Holds no state between calls.
pub struct ImageResolver<'a, S: Storage, R: RasterCodec> {
    storage: &'a S,
    codec: &'a R,
    options: ImageCacheOptions,
}

impl<'a, S: Storage, R: RasterCodec> ImageResolver<'a, S, R> {
    pub fn new(storage: &'a S, codec: &'a R, options: ImageCacheOptions) -> Self {
        Self {
            storage,
            codec,
            options,
        }
    }

    /// Resolve `raw_src` from `chapter_href` to a cached raster sized for the
    /// viewport.
    pub fn resolve<C: ChapterSource + ?Sized>(
        &self,
        container: &mut C,
        chapter_href: &str,
        raw_src: &str,
        viewport_width: u16,
        viewport_height: u16,
    ) -> Result<ResolvedImage, ImageResolveError> {
        let resolved = resolve_reference(container, chapter_href, raw_src)?;
        let cache_dir = container.cache_dir().to_string();
        let cache_path = image_cache_path(&cache_dir, &resolved);

        if self.storage.exists(&cache_path) {
            match self.read_header(&cache_path) {
                Ok(size) => {
                    log::debug!("image cache hit {} -> {}", resolved, cache_path);
                    return Ok(resolved_image(cache_path, size));
                }
                Err(err) => {
                    log::warn!("removing corrupt cached image {}: {}", cache_path, err);
                    self.storage.remove(&cache_path)?;
                }
            }
        }

        let plan = if self.codec.is_native(&resolved) {
            Regenerate::Copy
        } else if self.codec.can_convert(&resolved) {
            Regenerate::Convert
        } else {
            return Err(ImageResolveError::Unsupported);
        };

        self.storage.create_dir_all(&cache_dir)?;
        let pending = PendingFile::new(self.storage, cache_path.clone());
        match plan {
            Regenerate::Copy => self.copy_native(container, &resolved, &cache_path)?,
            Regenerate::Convert => self.convert(
                container,
                &resolved,
                &cache_path,
                viewport_width,
                viewport_height,
            )?,
        }
        let size = self.read_header(&cache_path)?;
        pending.commit();
        log::debug!(
            "cached image {} -> {} ({}x{})",
            resolved,
            cache_path,
            size.width,
            size.height
        );
        Ok(resolved_image(cache_path, size))
    }

    fn read_header(&self, path: &str) -> Result<RasterSize, ImageResolveError> {
        let mut file = self.storage.open_read(path)?;
        self.codec.parse_header(&mut file).map_err(|err| {
            log::debug!("raster header parse failed for {}: {}", path, err);
            ImageResolveError::InvalidRaster {
                path: path.to_string(),
            }
        })
    }

    fn copy_native<C: ChapterSource + ?Sized>(
        &self,
        container: &mut C,
        resolved: &str,
        cache_path: &str,
    ) -> Result<(), ImageResolveError> {
        let mut out = self.storage.open_write(cache_path)?;
        container
            .stream_item(resolved, &mut out, self.options.copy_chunk_bytes.max(1))
            .map_err(|err| source_error(resolved, err))?;
        out.flush()?;
        Ok(())
    }

    fn convert<C: ChapterSource + ?Sized>(
        &self,
        container: &mut C,
        resolved: &str,
        cache_path: &str,
        viewport_width: u16,
        viewport_height: u16,
    ) -> Result<(), ImageResolveError> {
        let scratch_path = scratch_path_for(cache_path);
        let _scratch = PendingFile::new(self.storage, scratch_path.clone());
        {
            let mut staged = self.storage.open_write(&scratch_path)?;
            container
                .stream_item(resolved, &mut staged, self.options.copy_chunk_bytes.max(1))
                .map_err(|err| source_error(resolved, err))?;
            staged.flush()?;
        }

        let max_width = viewport_width.max(self.options.min_target_width);
        let max_height = viewport_height.max(self.options.min_target_height);
        let mut input = self.storage.open_read(&scratch_path)?;
        let mut out = self.storage.open_write(cache_path)?;
        self.codec
            .convert(&mut input, &mut out, max_width, max_height)
            .map_err(|err| {
                log::warn!("failed to convert {}: {}", resolved, err);
                ImageResolveError::Conversion {
                    href: resolved.to_string(),
                }
            })?;
        out.flush()?;
        Ok(())
    }
}

fn resolved_image(path: String, size: RasterSize) -> ResolvedImage {
    ResolvedImage {
        path,
        width: size.width,
        height: size.height,
    }
}

fn scratch_path_for(cache_path: &str) -> String {
    let base = cache_path.strip_suffix(".bmp").unwrap_or(cache_path);
    format!("{}.src", base)
}

fn source_error(href: &str, err: std::io::Error) -> ImageResolveError {
    log::warn!("failed to stream image {}: {}", href, err);
    ImageResolveError::Source {
        href: href.to_string(),
    }
}
