//! Chapter and resource source: the book container seen from the cache.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::PathBuf;

use crate::path::normalize_path;

/// Book container exposing chapter and image bytes by internal path.
pub trait ChapterSource {
    /// Container path of the chapter at `spine_index`.
    fn chapter_href(&self, spine_index: usize) -> Option<String>;

    /// Storage directory holding this book's caches.
    fn cache_dir(&self) -> &str;

    /// BCP-47 tag used for hyphenation, if the book declares one.
    fn preferred_language(&self) -> Option<&str>;

    /// Copy the item at `href` into `out` in `chunk_size` pieces.
    fn stream_item(&mut self, href: &str, out: &mut dyn Write, chunk_size: usize)
        -> io::Result<u64>;

    /// Normalize a container path.
    fn normalize_href(&self, path: &str) -> String {
        normalize_path(path)
    }
}

/// Container over an unpacked book directory on the host.
#[derive(Clone, Debug)]
pub struct DirContainer {
    root: PathBuf,
    cache_dir: String,
    spine: Vec<String>,
    language: Option<String>,
}

impl DirContainer {
    /// `spine` lists chapter paths relative to `root`, in reading order.
    pub fn new(root: impl Into<PathBuf>, cache_dir: impl Into<String>, spine: Vec<String>) -> Self {
        Self {
            root: root.into(),
            cache_dir: cache_dir.into(),
            spine,
            language: None,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn chapter_count(&self) -> usize {
        self.spine.len()
    }
}

impl ChapterSource for DirContainer {
    fn chapter_href(&self, spine_index: usize) -> Option<String> {
        self.spine.get(spine_index).cloned()
    }

    fn cache_dir(&self) -> &str {
        &self.cache_dir
    }

    fn preferred_language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    fn stream_item(
        &mut self,
        href: &str,
        out: &mut dyn Write,
        chunk_size: usize,
    ) -> io::Result<u64> {
        let normalized = self.normalize_href(href);
        if normalized.is_empty() {
            return Err(io::Error::new(io::ErrorKind::NotFound, href.to_string()));
        }
        let mut file = File::open(self.root.join(normalized))?;
        copy_chunked(&mut file, out, chunk_size)
    }
}

/// Copy `input` to `out` through a `chunk_size` buffer.
pub fn copy_chunked<R: Read + ?Sized>(
    input: &mut R,
    out: &mut dyn Write,
    chunk_size: usize,
) -> io::Result<u64> {
    let mut buf = vec![0u8; chunk_size.max(1)];
    let mut total = 0u64;
    loop {
        let n = match input.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        };
        out.write_all(&buf[..n])?;
        total += n as u64;
    }
    out.flush()?;
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn copy_chunked_counts_bytes() {
        let data = vec![7u8; 2500];
        let mut out = Vec::new();
        let copied = copy_chunked(&mut &data[..], &mut out, 1024).expect("copy should succeed");
        assert_eq!(copied, 2500);
        assert_eq!(out, data);
    }

    #[test]
    fn dir_container_streams_normalized_paths() {
        let root = std::env::temp_dir().join(format!(
            "epub-section-cache-container-{}",
            std::process::id()
        ));
        fs::create_dir_all(root.join("text")).expect("mkdir should succeed");
        fs::write(root.join("text/ch1.xhtml"), b"<p>hi</p>").expect("write should succeed");

        let mut book = DirContainer::new(&root, ".cache/book", vec!["text/ch1.xhtml".to_string()])
            .with_language("en-US");
        assert_eq!(book.chapter_href(0).as_deref(), Some("text/ch1.xhtml"));
        assert_eq!(book.chapter_href(1), None);
        assert_eq!(book.preferred_language(), Some("en-US"));

        let mut out = Vec::new();
        book.stream_item("text/./../text/ch1.xhtml", &mut out, 4)
            .expect("stream should succeed");
        assert_eq!(out, b"<p>hi</p>");
        assert!(book.stream_item("text/missing.xhtml", &mut out, 4).is_err());

        let _ = fs::remove_dir_all(root);
    }
}
