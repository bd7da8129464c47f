//! Reference pager: fixed-advance text flow over streamed XHTML.
//!
//! Glyphs all advance by the same width, so lines are measured in
//! characters. Block elements end paragraphs, `<br>` ends a line, and
//! `<img>`/`<image>` references are resolved through the builder and
//! placed on their own band, scaled into the content box.

use std::io::BufReader;
use std::mem;

use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::format::RenderParams;
use crate::image_cache::ResolvedImage;
use crate::page::{PageElement, TextPage};
use crate::pager::{Pager, PagerCallbacks, PagerError, PagerInput};

const ALIGN_JUSTIFY: u8 = 0;
const ALIGN_CENTER: u8 = 2;
const ALIGN_RIGHT: u8 = 3;

/// Layout metrics for [`FlowPager`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FlowMetrics {
    /// Advance of every glyph in pixels.
    pub glyph_width: u16,
    /// Line height before `line_compression` is applied.
    pub line_height: u16,
    /// Margin on every side of the viewport.
    pub margin: u16,
    /// Gap after each paragraph when extra paragraph spacing is on.
    pub paragraph_spacing: u16,
    /// Sources at least this large trigger the popup callback once.
    pub popup_threshold_bytes: u64,
    /// Minimum characters kept on each side of a hyphenation break.
    pub min_hyphen_chars: usize,
}

impl Default for FlowMetrics {
    fn default() -> Self {
        Self {
            glyph_width: 10,
            line_height: 24,
            margin: 8,
            paragraph_spacing: 12,
            popup_threshold_bytes: 50 * 1024,
            min_hyphen_chars: 2,
        }
    }
}

/// Streaming XHTML pager producing [`TextPage`]s.
#[derive(Clone, Debug, Default)]
pub struct FlowPager {
    metrics: FlowMetrics,
}

impl FlowPager {
    pub fn new(metrics: FlowMetrics) -> Self {
        Self { metrics }
    }

    pub fn metrics(&self) -> &FlowMetrics {
        &self.metrics
    }
}

impl Pager for FlowPager {
    type Page = TextPage;

    fn run(
        &mut self,
        input: PagerInput<'_>,
        callbacks: PagerCallbacks<'_, TextPage>,
    ) -> Result<(), PagerError> {
        let PagerCallbacks {
            on_page,
            on_popup,
            resolve_image,
        } = callbacks;
        log::debug!(
            "paginating {} ({} bytes, language {:?})",
            input.source_path,
            input.source_len,
            input.language
        );
        if input.source_len >= self.metrics.popup_threshold_bytes {
            on_popup();
        }

        let mut layout = Layout::new(&self.metrics, input.params, on_page);
        let mut reader = Reader::from_reader(BufReader::new(input.source));
        reader.config_mut().trim_text(false);
        let mut buf = Vec::with_capacity(256);
        let mut skip_depth = 0usize;

        loop {
            let event = reader.read_event_into(&mut buf).map_err(|err| {
                PagerError::new(format!(
                    "xml error in {} at {}: {}",
                    input.source_path,
                    reader.buffer_position(),
                    err
                ))
            })?;
            match event {
                Event::Start(e) => {
                    let tag = local_name(&e);
                    if is_skipped(&tag) {
                        skip_depth += 1;
                    } else if skip_depth == 0 {
                        open_element(&mut layout, &tag, &e, resolve_image);
                    }
                }
                Event::Empty(e) => {
                    let tag = local_name(&e);
                    if skip_depth == 0 && !is_skipped(&tag) {
                        open_element(&mut layout, &tag, &e, resolve_image);
                        if is_block(&tag) {
                            layout.end_paragraph();
                        }
                    }
                }
                Event::End(e) => {
                    let name = e.name();
                    let tag = tag_from_bytes(name.as_ref());
                    if is_skipped(&tag) {
                        skip_depth = skip_depth.saturating_sub(1);
                    } else if skip_depth == 0 && is_block(&tag) {
                        layout.end_paragraph();
                    }
                }
                Event::Text(e) if skip_depth == 0 => {
                    let text = e
                        .decode()
                        .map_err(|err| PagerError::new(format!("text decode: {}", err)))?;
                    layout.push_text(&text);
                }
                Event::CData(e) if skip_depth == 0 => {
                    let text = reader
                        .decoder()
                        .decode(&e)
                        .map_err(|err| PagerError::new(format!("cdata decode: {}", err)))?;
                    layout.push_text(&text);
                }
                Event::GeneralRef(e) if skip_depth == 0 => {
                    let name = e
                        .decode()
                        .map_err(|err| PagerError::new(format!("entity decode: {}", err)))?;
                    match resolve_entity(&name) {
                        Some(text) => layout.push_text(&text),
                        None => log::debug!("dropping unknown entity &{};", name),
                    }
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        layout.finish();
        log::debug!("paginated {}: {} pages", input.source_path, layout.pages);
        Ok(())
    }
}

fn open_element(
    layout: &mut Layout<'_, '_>,
    tag: &str,
    e: &BytesStart<'_>,
    resolve_image: &mut dyn FnMut(&str) -> Option<ResolvedImage>,
) {
    match tag {
        "br" => layout.line_break(),
        "img" | "image" => {
            let Some(src) = image_source(e) else {
                return;
            };
            match resolve_image(&src) {
                Some(image) => layout.place_image(&image),
                None => log::debug!("image {} skipped", src),
            }
        }
        _ if is_block(tag) => layout.end_paragraph(),
        _ => {}
    }
}

fn tag_from_bytes(raw: &[u8]) -> String {
    let name = String::from_utf8_lossy(raw);
    let local = name.rsplit(':').next().unwrap_or(&name);
    local.to_ascii_lowercase()
}

fn local_name(e: &BytesStart<'_>) -> String {
    tag_from_bytes(e.name().as_ref())
}

fn is_skipped(tag: &str) -> bool {
    matches!(tag, "head" | "script" | "style" | "title")
}

fn is_block(tag: &str) -> bool {
    matches!(
        tag,
        "p" | "div"
            | "h1"
            | "h2"
            | "h3"
            | "h4"
            | "h5"
            | "h6"
            | "li"
            | "ul"
            | "ol"
            | "dl"
            | "dt"
            | "dd"
            | "blockquote"
            | "pre"
            | "section"
            | "article"
            | "aside"
            | "header"
            | "footer"
            | "figure"
            | "figcaption"
            | "table"
            | "tr"
            | "hr"
            | "body"
    )
}

fn image_source(e: &BytesStart<'_>) -> Option<String> {
    for attr in e.attributes().flatten() {
        let key = tag_from_bytes(attr.key.as_ref());
        if key == "src" || key == "href" {
            let value = String::from_utf8_lossy(&attr.value).trim().to_string();
            if !value.is_empty() {
                return Some(value);
            }
        }
    }
    None
}

fn resolve_entity(name: &str) -> Option<String> {
    let mut escaped = String::with_capacity(name.len() + 2);
    escaped.push('&');
    escaped.push_str(name);
    escaped.push(';');
    if let Ok(text) = quick_xml::escape::unescape(&escaped) {
        return Some(text.into_owned());
    }
    let ch = match name {
        "nbsp" => '\u{a0}',
        "shy" => '\u{ad}',
        "mdash" => '\u{2014}',
        "ndash" => '\u{2013}',
        "hellip" => '\u{2026}',
        "lsquo" => '\u{2018}',
        "rsquo" => '\u{2019}',
        "ldquo" => '\u{201c}',
        "rdquo" => '\u{201d}',
        _ => return None,
    };
    Some(ch.to_string())
}

fn clamp_i16(value: i32) -> i16 {
    value.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
}

struct Layout<'m, 'c> {
    metrics: &'m FlowMetrics,
    params: RenderParams,
    on_page: &'c mut dyn FnMut(TextPage),
    content_x: i32,
    content_y: i32,
    content_width: i32,
    content_height: i32,
    line_advance: i32,
    max_chars: usize,
    page: TextPage,
    cursor: i32,
    words: Vec<String>,
    line_chars: usize,
    pending: String,
    pages: usize,
}

impl<'m, 'c> Layout<'m, 'c> {
    fn new(
        metrics: &'m FlowMetrics,
        params: &RenderParams,
        on_page: &'c mut dyn FnMut(TextPage),
    ) -> Self {
        let margin = i32::from(metrics.margin);
        let content_width = (i32::from(params.viewport_width) - 2 * margin).max(1);
        let content_height = (i32::from(params.viewport_height) - 2 * margin).max(1);
        let line_advance =
            ((f32::from(metrics.line_height) * params.line_compression).round() as i32).max(1);
        let glyph = i32::from(metrics.glyph_width.max(1));
        Self {
            metrics,
            params: *params,
            on_page,
            content_x: margin,
            content_y: margin,
            content_width,
            content_height,
            line_advance,
            max_chars: (content_width / glyph).max(1) as usize,
            page: TextPage::new(),
            cursor: 0,
            words: Vec::new(),
            line_chars: 0,
            pending: String::new(),
            pages: 0,
        }
    }

    fn push_text(&mut self, text: &str) {
        for ch in text.chars() {
            if ch.is_whitespace() && ch != '\u{a0}' {
                self.commit_word();
            } else if ch != '\u{ad}' {
                self.pending.push(ch);
            }
        }
    }

    fn commit_word(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let word = mem::take(&mut self.pending);
        self.push_word(word);
    }

    fn push_word(&mut self, word: String) {
        let len = word.chars().count();
        if len > self.max_chars {
            self.push_overlong(&word);
            return;
        }
        let needed = if self.words.is_empty() { len } else { len + 1 };
        if self.line_chars + needed > self.max_chars {
            self.flush_line(false);
        }
        self.line_chars += if self.words.is_empty() { len } else { len + 1 };
        self.words.push(word);
    }

    /// Break a word wider than the line. With hyphenation on, each fragment
    /// but the last ends in `-`; otherwise the word is cut hard.
    fn push_overlong(&mut self, word: &str) {
        self.flush_line(false);
        let chars: Vec<char> = word.chars().collect();
        let hyphenate = self.params.hyphenation_enabled
            && self.max_chars >= 2
            && self.max_chars > self.metrics.min_hyphen_chars
            && chars.len() >= 2 * self.metrics.min_hyphen_chars;
        let step = if hyphenate {
            self.max_chars - 1
        } else {
            self.max_chars
        };
        let mut start = 0;
        while start < chars.len() {
            let remaining = chars.len() - start;
            if remaining <= self.max_chars {
                let tail: String = chars[start..].iter().collect();
                self.line_chars = remaining;
                self.words.push(tail);
                return;
            }
            let mut take = step;
            if hyphenate && remaining - take < self.metrics.min_hyphen_chars {
                take = remaining - self.metrics.min_hyphen_chars;
            }
            let take = take.max(1);
            let mut fragment: String = chars[start..start + take].iter().collect();
            if hyphenate {
                fragment.push('-');
            }
            self.line_chars = fragment.chars().count();
            self.words.push(fragment);
            self.flush_line(false);
            start += take;
        }
    }

    fn flush_line(&mut self, last_in_paragraph: bool) {
        if self.words.is_empty() {
            return;
        }
        let words = mem::take(&mut self.words);
        let chars = mem::replace(&mut self.line_chars, 0);
        let glyph = i32::from(self.metrics.glyph_width.max(1));
        let slack = (self.content_width - chars as i32 * glyph).max(0);
        let (x, word_gap) = match self.params.paragraph_alignment {
            ALIGN_JUSTIFY if !last_in_paragraph && words.len() > 1 => {
                let gap = slack / (words.len() as i32 - 1);
                (self.content_x, gap.clamp(0, i32::from(u8::MAX)) as u8)
            }
            ALIGN_CENTER => (self.content_x + slack / 2, 0),
            ALIGN_RIGHT => (self.content_x + slack, 0),
            _ => (self.content_x, 0),
        };
        self.ensure_room(self.line_advance);
        self.page.elements.push(PageElement::Line {
            x: clamp_i16(x),
            y: clamp_i16(self.content_y + self.cursor),
            text: words.join(" "),
            word_gap,
        });
        self.cursor += self.line_advance;
    }

    fn line_break(&mut self) {
        self.commit_word();
        if self.words.is_empty() {
            self.ensure_room(self.line_advance);
            self.cursor += self.line_advance;
        } else {
            self.flush_line(true);
        }
    }

    fn end_paragraph(&mut self) {
        self.commit_word();
        let had_line = !self.words.is_empty();
        self.flush_line(true);
        if had_line && self.params.extra_paragraph_spacing {
            self.cursor += i32::from(self.metrics.paragraph_spacing);
        }
    }

    fn place_image(&mut self, image: &ResolvedImage) {
        self.end_paragraph();
        let (width, height) = fit_into(
            i32::from(image.width),
            i32::from(image.height),
            self.content_width,
            self.content_height,
        );
        self.ensure_room(height);
        let x = self.content_x + (self.content_width - width) / 2;
        self.page.elements.push(PageElement::Image {
            x: clamp_i16(x),
            y: clamp_i16(self.content_y + self.cursor),
            width: width.clamp(0, i32::from(u16::MAX)) as u16,
            height: height.clamp(0, i32::from(u16::MAX)) as u16,
            path: image.path.clone(),
        });
        self.cursor += height;
    }

    fn ensure_room(&mut self, height: i32) {
        if self.cursor + height > self.content_height {
            self.emit_page();
        }
    }

    fn emit_page(&mut self) {
        self.cursor = 0;
        if self.page.is_empty() {
            return;
        }
        let page = mem::take(&mut self.page);
        self.pages += 1;
        (self.on_page)(page);
    }

    fn finish(&mut self) {
        self.end_paragraph();
        self.emit_page();
    }
}

/// Scale `width x height` down to fit the box, keeping the aspect ratio.
fn fit_into(width: i32, height: i32, max_width: i32, max_height: i32) -> (i32, i32) {
    let width = width.max(1);
    let height = height.max(1);
    if width <= max_width && height <= max_height {
        return (width, height);
    }
    let (w, h) = (i64::from(width), i64::from(height));
    let (mw, mh) = (i64::from(max_width), i64::from(max_height));
    if w * mh > h * mw {
        (max_width, ((h * mw) / w).max(1) as i32)
    } else {
        (((w * mh) / h).max(1) as i32, max_height)
    }
}
