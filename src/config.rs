//! Tunables for section builds and the image cache.

use crate::retry::RetryPolicy;

/// Image resolution and conversion options.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ImageCacheOptions {
    /// Floor for the conversion target width, so tiny viewports do not
    /// collapse images.
    pub min_target_width: u16,
    /// Floor for the conversion target height.
    pub min_target_height: u16,
    /// Chunk size used when streaming image bytes out of the container.
    pub copy_chunk_bytes: usize,
}

impl Default for ImageCacheOptions {
    fn default() -> Self {
        Self {
            min_target_width: 80,
            min_target_height: 60,
            copy_chunk_bytes: 1024,
        }
    }
}

/// Section build options.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SectionCacheOptions {
    /// Retry policy for streaming chapter bytes to scratch storage.
    pub retry: RetryPolicy,
    /// Chunk size used when streaming chapter bytes.
    pub stream_chunk_bytes: usize,
    pub image: ImageCacheOptions,
}

impl Default for SectionCacheOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            stream_chunk_bytes: 1024,
            image: ImageCacheOptions::default(),
        }
    }
}

impl SectionCacheOptions {
    /// Smaller buffers for constrained targets.
    pub fn embedded() -> Self {
        Self {
            stream_chunk_bytes: 512,
            image: ImageCacheOptions {
                copy_chunk_bytes: 512,
                ..ImageCacheOptions::default()
            },
            ..Self::default()
        }
    }

    /// Chunk size with a floor of one byte.
    pub(crate) fn chunk_bytes(&self) -> usize {
        self.stream_chunk_bytes.max(1)
    }
}
