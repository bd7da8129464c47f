mod common;

use std::fs;
use std::path::Path;

use common::fixtures::{chapter_markup, jpeg, temp_root};
use epub_section_cache::{
    DirContainer, FlowMetrics, FlowPager, FsStorage, PageElement, RenderParams, SectionCache,
    SectionCacheOptions, TextPage, ThreadSleeper,
};
use epub_section_cache_raster::BmpCodec;

const CACHE_DIR: &str = ".cache/harbour";

fn write_book(root: &Path, chapter: &str) {
    fs::create_dir_all(root.join("OEBPS/text")).expect("book dirs should be creatable");
    fs::create_dir_all(root.join("OEBPS/images")).expect("book dirs should be creatable");
    fs::write(root.join("OEBPS/text/ch1.xhtml"), chapter).expect("chapter should write");
    fs::write(root.join("OEBPS/images/map.jpg"), jpeg(900, 600)).expect("image should write");
}

fn load_all(
    reader: &epub_section_cache::SectionReader<'_, FsStorage>,
) -> Vec<TextPage> {
    (0..usize::from(reader.page_count()))
        .map(|index| reader.load_page(index).expect("page should load"))
        .collect()
}

#[test]
fn chapter_with_image_paginates_and_caches() {
    let root = temp_root("flow");
    let book_root = root.join("book");
    let mut chapter = chapter_markup(30);
    chapter = chapter.replace(
        "<p>Paragraph 10 ",
        "<p><img src=\"../images/map.jpg\" alt=\"map\"/></p><p>Paragraph 10 ",
    );
    write_book(&book_root, &chapter);

    let storage = FsStorage::new(root.join("sd"));
    let codec = BmpCodec::default();
    let cache = SectionCache::new(&storage, &codec, ThreadSleeper, SectionCacheOptions::default());
    let mut book = DirContainer::new(&book_root, CACHE_DIR, vec!["OEBPS/text/ch1.xhtml".into()])
        .with_language("en");
    let mut pager = FlowPager::default();
    let params = RenderParams::for_viewport(480, 800);
    let mut popups = 0;

    let reader = cache
        .open_or_build(&mut book, &mut pager, 0, &params, &mut || popups += 1)
        .expect("chapter should build");
    assert_eq!(popups, 0);
    assert!(reader.page_count() >= 2);

    let pages = load_all(&reader);
    let text: Vec<&str> = pages.iter().flat_map(|page| page.lines()).collect();
    assert!(text.iter().any(|line| line.starts_with("Paragraph 0 ")));
    assert!(!text.iter().any(|line| line.contains("margin")));
    assert!(!text.iter().any(|line| line.contains("Chapter")));

    let images: Vec<(u16, u16, String)> = pages
        .iter()
        .flat_map(|page| page.elements.iter())
        .filter_map(|el| match el {
            PageElement::Image {
                width,
                height,
                path,
                ..
            } => Some((*width, *height, path.clone())),
            PageElement::Line { .. } => None,
        })
        .collect();
    assert_eq!(images.len(), 1);
    let (width, height, path) = &images[0];
    let content_width = 480 - 2 * FlowMetrics::default().margin;
    assert!(*width <= content_width);
    let skew = (i64::from(*width) * 2 - i64::from(*height) * 3).abs();
    assert!(skew <= 3, "aspect drifted: {}x{}", width, height);
    assert!(storage.host_path(path).is_file());

    assert!(!storage.host_path(&format!("{}/.tmp_0.html", CACHE_DIR)).exists());
    assert!(cache.open(&book, 0, &params).into_reader().is_some());
    let _ = fs::remove_dir_all(root);
}

#[test]
fn large_chapter_triggers_popup_once() {
    let root = temp_root("flow-popup");
    let book_root = root.join("book");
    let chapter = chapter_markup(1200);
    assert!(chapter.len() as u64 >= FlowMetrics::default().popup_threshold_bytes);
    write_book(&book_root, &chapter);

    let storage = FsStorage::new(root.join("sd"));
    let codec = BmpCodec::default();
    let cache = SectionCache::new(&storage, &codec, ThreadSleeper, SectionCacheOptions::embedded());
    let mut book = DirContainer::new(&book_root, CACHE_DIR, vec!["OEBPS/text/ch1.xhtml".into()]);
    let mut pager = FlowPager::default();
    let params = RenderParams::for_viewport(480, 800);
    let mut popups = 0;

    let reader = cache
        .open_or_build(&mut book, &mut pager, 0, &params, &mut || popups += 1)
        .expect("chapter should build");
    assert_eq!(popups, 1);
    let last: TextPage = reader
        .load_page(usize::from(reader.page_count()) - 1)
        .expect("last page should load");
    assert!(last
        .lines()
        .any(|line| line.contains("nets.")));

    cache
        .open_or_build(&mut book, &mut pager, 0, &params, &mut || popups += 1)
        .expect("cached chapter should open");
    assert_eq!(popups, 1, "cache hit must not paginate again");
    let _ = fs::remove_dir_all(root);
}

#[test]
fn changing_line_compression_rebuilds_the_section() {
    let root = temp_root("flow-rebuild");
    let book_root = root.join("book");
    write_book(&book_root, &chapter_markup(40));

    let storage = FsStorage::new(root.join("sd"));
    let codec = BmpCodec::default();
    let cache = SectionCache::new(&storage, &codec, ThreadSleeper, SectionCacheOptions::default());
    let mut book = DirContainer::new(&book_root, CACHE_DIR, vec!["OEBPS/text/ch1.xhtml".into()]);
    let mut pager = FlowPager::default();
    let tight = RenderParams {
        line_compression: 0.8,
        ..RenderParams::for_viewport(480, 800)
    };
    let loose = RenderParams {
        line_compression: 1.6,
        ..tight
    };

    let tight_pages = cache
        .open_or_build(&mut book, &mut pager, 0, &tight, &mut || {})
        .expect("tight build should succeed")
        .page_count();
    assert!(cache.open(&book, 0, &loose).is_miss());
    let loose_pages = cache
        .open_or_build(&mut book, &mut pager, 0, &loose, &mut || {})
        .expect("loose build should succeed")
        .page_count();
    assert!(loose_pages > tight_pages);
    assert!(cache.open(&book, 0, &tight).is_miss());
    let _ = fs::remove_dir_all(root);
}
