use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::io::{self, Cursor, Read, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use epub_section_cache::{
    ChapterSource, MemStorage, PageCodecError, PageElement, Pager, PagerCallbacks, PagerError,
    PagerInput, RasterCodec, RasterSize, ResolvedImage, SectionPage, Sleeper, Storage, TextPage,
};
use epub_section_cache_raster::{BmpCodec, RasterError};

pub const CACHE_DIR: &str = ".cache/book";

static NONCE: AtomicUsize = AtomicUsize::new(0);

/// Fresh host directory for one test.
pub fn temp_root(tag: &str) -> PathBuf {
    let nonce = NONCE.fetch_add(1, Ordering::Relaxed);
    let root = std::env::temp_dir().join(format!(
        "epub-section-cache-{}-{}-{}",
        tag,
        std::process::id(),
        nonce
    ));
    let _ = std::fs::remove_dir_all(&root);
    std::fs::create_dir_all(&root).expect("temp root should be creatable");
    root
}

/// Encode an RGB gradient in `format`.
pub fn encoded_image(width: u32, height: u32, format: image::ImageFormat) -> Vec<u8> {
    let img = image::RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
    });
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, format)
        .expect("test image should encode");
    out.into_inner()
}

pub fn jpeg(width: u32, height: u32) -> Vec<u8> {
    encoded_image(width, height, image::ImageFormat::Jpeg)
}

/// Chapter markup with `paragraphs` short paragraphs.
pub fn chapter_markup(paragraphs: usize) -> String {
    let mut out = String::from(
        "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<html xmlns=\"http://www.w3.org/1999/xhtml\">\
         <head><title>Chapter</title><style>p { margin: 0 }</style></head><body>",
    );
    for idx in 0..paragraphs {
        out.push_str(&format!(
            "<p>Paragraph {} walks the harbour road past the lighthouse and the nets.</p>",
            idx
        ));
    }
    out.push_str("</body></html>");
    out
}

/// In-memory book: spine of chapter paths plus a table of item bytes.
pub struct MapBook {
    pub spine: Vec<String>,
    pub items: BTreeMap<String, Vec<u8>>,
    pub language: Option<String>,
    /// Chapter streams that fail (after writing a partial chunk) before one
    /// succeeds.
    pub stream_failures: usize,
    pub streams: usize,
}

impl MapBook {
    pub fn new(spine: &[&str]) -> Self {
        Self {
            spine: spine.iter().map(|s| s.to_string()).collect(),
            items: BTreeMap::new(),
            language: None,
            stream_failures: 0,
            streams: 0,
        }
    }

    pub fn with_item(mut self, href: &str, bytes: impl Into<Vec<u8>>) -> Self {
        self.items.insert(href.to_string(), bytes.into());
        self
    }

    pub fn with_language(mut self, language: &str) -> Self {
        self.language = Some(language.to_string());
        self
    }

    pub fn failing_streams(mut self, count: usize) -> Self {
        self.stream_failures = count;
        self
    }
}

impl ChapterSource for MapBook {
    fn chapter_href(&self, spine_index: usize) -> Option<String> {
        self.spine.get(spine_index).cloned()
    }

    fn cache_dir(&self) -> &str {
        CACHE_DIR
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
        self.streams += 1;
        let bytes = self
            .items
            .get(href)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, href.to_string()))?;
        let is_chapter = self.spine.iter().any(|s| s == href);
        if is_chapter && self.stream_failures > 0 {
            self.stream_failures -= 1;
            out.write_all(&bytes[..bytes.len().min(chunk_size)])?;
            return Err(io::Error::other("card busy"));
        }
        out.write_all(bytes)?;
        Ok(bytes.len() as u64)
    }
}

/// Sleeper that records delays and, optionally, whether a storage path
/// existed at each delay.
#[derive(Default)]
pub struct RecordingSleeper {
    pub slept: RefCell<Vec<Duration>>,
    watch: Option<(MemStorage, String)>,
    pub watched_exists: RefCell<Vec<bool>>,
}

impl RecordingSleeper {
    pub fn watching(storage: &MemStorage, path: impl Into<String>) -> Self {
        Self {
            watch: Some((storage.clone(), path.into())),
            ..Self::default()
        }
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.slept.borrow_mut().push(duration);
        if let Some((storage, path)) = &self.watch {
            self.watched_exists.borrow_mut().push(storage.exists(path));
        }
    }
}

/// Pager step.
#[derive(Clone, Debug)]
pub enum Step {
    Page(&'static str),
    Image(&'static str),
    Popup,
    Fail(&'static str),
}

/// Pager that replays a script and records what it was handed.
#[derive(Default)]
pub struct ScriptedPager {
    pub script: Vec<Step>,
    pub runs: usize,
    pub languages: Vec<Option<String>>,
    pub sources: Vec<String>,
    pub resolved: Vec<Option<ResolvedImage>>,
}

impl ScriptedPager {
    pub fn new(script: Vec<Step>) -> Self {
        Self {
            script,
            ..Self::default()
        }
    }

    pub fn pages(texts: &[&'static str]) -> Self {
        Self::new(texts.iter().map(|t| Step::Page(*t)).collect())
    }
}

pub fn text_page(text: &str) -> TextPage {
    TextPage {
        elements: vec![PageElement::Line {
            x: 0,
            y: 0,
            text: text.to_string(),
            word_gap: 0,
        }],
    }
}

impl Pager for ScriptedPager {
    type Page = TextPage;

    fn run(
        &mut self,
        input: PagerInput<'_>,
        callbacks: PagerCallbacks<'_, TextPage>,
    ) -> Result<(), PagerError> {
        self.runs += 1;
        self.languages.push(input.language.map(str::to_string));
        let mut source = String::new();
        input
            .source
            .read_to_string(&mut source)
            .map_err(|err| PagerError::new(err.to_string()))?;
        self.sources.push(source);
        for step in &self.script {
            match step {
                Step::Page(text) => (callbacks.on_page)(text_page(text)),
                Step::Image(src) => {
                    let resolved = (callbacks.resolve_image)(src);
                    self.resolved.push(resolved);
                }
                Step::Popup => (callbacks.on_popup)(),
                Step::Fail(message) => return Err(PagerError::new(*message)),
            }
        }
        Ok(())
    }
}

/// Page type whose serialization fails when `poisoned`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BrittlePage {
    pub index: u32,
    pub poisoned: bool,
}

impl SectionPage for BrittlePage {
    fn serialize_to<W: Write>(&self, out: &mut W) -> Result<(), PageCodecError> {
        if self.poisoned {
            return Err(PageCodecError::TooLarge {
                len: usize::MAX,
                limit: 0,
            });
        }
        out.write_all(&self.index.to_le_bytes())?;
        Ok(())
    }

    fn deserialize_from<R: Read>(input: &mut R) -> Result<Self, PageCodecError> {
        let mut raw = [0u8; 4];
        input.read_exact(&mut raw)?;
        Ok(Self {
            index: u32::from_le_bytes(raw),
            poisoned: false,
        })
    }
}

/// Emits `count` pages, poisoning `poison_at`.
pub struct BrittlePager {
    pub count: u32,
    pub poison_at: Option<u32>,
}

impl Pager for BrittlePager {
    type Page = BrittlePage;

    fn run(
        &mut self,
        _input: PagerInput<'_>,
        callbacks: PagerCallbacks<'_, BrittlePage>,
    ) -> Result<(), PagerError> {
        for index in 0..self.count {
            (callbacks.on_page)(BrittlePage {
                index,
                poisoned: self.poison_at == Some(index),
            });
        }
        Ok(())
    }
}

/// [`BmpCodec`] that counts conversions.
#[derive(Default)]
pub struct CountingCodec {
    pub inner: BmpCodec,
    pub conversions: Cell<usize>,
}

impl RasterCodec for CountingCodec {
    type Error = RasterError;

    fn is_native(&self, path: &str) -> bool {
        self.inner.is_native(path)
    }

    fn can_convert(&self, path: &str) -> bool {
        self.inner.can_convert(path)
    }

    fn parse_header(&self, input: &mut dyn Read) -> Result<RasterSize, RasterError> {
        self.inner.parse_header(input)
    }

    fn convert(
        &self,
        input: &mut dyn Read,
        out: &mut dyn Write,
        max_width: u16,
        max_height: u16,
    ) -> Result<(), RasterError> {
        self.conversions.set(self.conversions.get() + 1);
        self.inner.convert(input, out, max_width, max_height)
    }
}
