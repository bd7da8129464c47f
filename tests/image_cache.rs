mod common;

use common::fixtures::{encoded_image, jpeg, CountingCodec, MapBook, ScriptedPager, Step, CACHE_DIR};
use epub_section_cache::image_cache::{image_cache_path, resolve_reference};
use epub_section_cache::{
    ImageCacheOptions, ImageResolveError, ImageResolver, MemStorage, RasterCodec, RenderParams,
    SectionCache, SectionCacheOptions, Storage, ThreadSleeper,
};
use epub_section_cache_raster::BmpCodec;

const CHAPTER: &str = "chapters/ch1.xhtml";

#[test]
fn references_normalize_against_the_chapter() {
    let book = MapBook::new(&[CHAPTER]);
    let resolved =
        resolve_reference(&book, CHAPTER, "pic.jpg?x=1#frag").expect("reference should resolve");
    assert_eq!(resolved, "chapters/pic.jpg");
    let up = resolve_reference(&book, CHAPTER, "./../images/./cover.jpeg")
        .expect("relative reference should resolve");
    assert_eq!(up, "images/cover.jpeg");
}

#[test]
fn inline_and_remote_images_touch_no_storage() {
    let storage = MemStorage::new();
    let codec = CountingCodec::default();
    let resolver = ImageResolver::new(&storage, &codec, ImageCacheOptions::default());
    let mut book = MapBook::new(&[CHAPTER]);

    for src in ["data:image/jpeg;base64,/9j/4AAQ", "https://example.org/a.jpg"] {
        let err = resolver
            .resolve(&mut book, CHAPTER, src, 480, 800)
            .expect_err("reference should be unsupported");
        assert!(matches!(err, ImageResolveError::Unsupported));
    }
    assert_eq!(storage.operations(), 0);
    assert_eq!(book.streams, 0);
    assert_eq!(codec.conversions.get(), 0);
}

#[test]
fn second_resolution_reuses_the_cached_raster() {
    let storage = MemStorage::new();
    let codec = CountingCodec::default();
    let resolver = ImageResolver::new(&storage, &codec, ImageCacheOptions::default());
    let mut book = MapBook::new(&[CHAPTER]).with_item("chapters/pic.jpg", jpeg(1600, 400));

    let first = resolver
        .resolve(&mut book, CHAPTER, "pic.jpg?x=1#frag", 480, 800)
        .expect("jpeg should convert");
    assert_eq!((first.width, first.height), (480, 120));
    assert_eq!(first.path, image_cache_path(CACHE_DIR, "chapters/pic.jpg"));
    assert_eq!(codec.conversions.get(), 1);
    let streams_after_first = book.streams;

    let second = resolver
        .resolve(&mut book, CHAPTER, "pic.jpg", 480, 800)
        .expect("cached raster should resolve");
    assert_eq!(second, first);
    assert_eq!(codec.conversions.get(), 1);
    assert_eq!(book.streams, streams_after_first);

    let cached = storage.file_paths();
    assert_eq!(cached, vec![first.path.clone()], "scratch copy should be gone");
}

#[test]
fn truncated_cached_raster_is_regenerated() {
    let storage = MemStorage::new();
    let codec = CountingCodec::default();
    let resolver = ImageResolver::new(&storage, &codec, ImageCacheOptions::default());
    let mut book = MapBook::new(&[CHAPTER]).with_item("chapters/pic.jpg", jpeg(200, 100));

    let first = resolver
        .resolve(&mut book, CHAPTER, "pic.jpg", 480, 800)
        .expect("jpeg should convert");
    let full = storage.read(&first.path).expect("raster should exist");
    assert!(storage.truncate(&first.path, full.len() / 2));

    let healed = resolver
        .resolve(&mut book, CHAPTER, "pic.jpg", 480, 800)
        .expect("corrupt raster should be rebuilt");
    assert_eq!(healed, first);
    assert_eq!(codec.conversions.get(), 2);
    assert_eq!(storage.read(&healed.path), Some(full));
}

#[test]
fn tiny_viewport_uses_the_minimum_box() {
    let storage = MemStorage::new();
    let codec = CountingCodec::default();
    let resolver = ImageResolver::new(&storage, &codec, ImageCacheOptions::default());
    let mut book = MapBook::new(&[CHAPTER]).with_item("chapters/wide.png", {
        encoded_image(800, 300, image::ImageFormat::Png)
    });

    let image = resolver
        .resolve(&mut book, CHAPTER, "wide.png", 20, 10)
        .expect("png should convert");
    assert_eq!((image.width, image.height), (80, 30));
}

#[test]
fn native_bitmaps_are_copied_and_measured() {
    let storage = MemStorage::new();
    let codec = CountingCodec::default();
    let mut bitmap = Vec::new();
    BmpCodec::default()
        .convert_bytes(&jpeg(64, 32), &mut bitmap, 480, 800)
        .expect("fixture bitmap should encode");
    let resolver = ImageResolver::new(&storage, &codec, ImageCacheOptions::default());
    let mut book = MapBook::new(&[CHAPTER]).with_item("images/fig.bmp", bitmap.clone());

    let image = resolver
        .resolve(&mut book, CHAPTER, "/images/fig.bmp", 480, 800)
        .expect("bmp should be copied");
    assert_eq!((image.width, image.height), (64, 32));
    assert_eq!(storage.read(&image.path), Some(bitmap));
    assert_eq!(codec.conversions.get(), 0);
}

#[test]
fn undecodable_and_unknown_images_are_omitted_from_pages() {
    let storage = MemStorage::new();
    let codec = CountingCodec::default();
    let cache = SectionCache::new(&storage, &codec, ThreadSleeper, SectionCacheOptions::default());
    let mut book = MapBook::new(&[CHAPTER])
        .with_item(CHAPTER, "<p>text</p>")
        .with_item("chapters/broken.jpg", b"not really a jpeg".to_vec())
        .with_item("chapters/fig.svg", b"<svg/>".to_vec())
        .with_item("chapters/ok.jpg", jpeg(40, 40));
    let mut pager = ScriptedPager::new(vec![
        Step::Image("broken.jpg"),
        Step::Image("fig.svg"),
        Step::Image("ok.jpg"),
        Step::Image("missing.jpg"),
        Step::Page("text"),
    ]);

    let reader = cache
        .open_or_build(&mut book, &mut pager, 0, &RenderParams::default(), &mut || {})
        .expect("image failures should not fail the build");
    assert_eq!(reader.page_count(), 1);
    assert_eq!(pager.resolved.len(), 4);
    assert!(pager.resolved[0].is_none());
    assert!(pager.resolved[1].is_none());
    let ok = pager.resolved[2].clone().expect("ok.jpg should resolve");
    assert_eq!((ok.width, ok.height), (40, 40));
    assert!(storage.exists(&ok.path));
    assert!(pager.resolved[3].is_none());

    let mut rasters: Vec<String> = storage
        .file_paths()
        .into_iter()
        .filter(|p| p.contains("img_"))
        .collect();
    rasters.sort();
    assert_eq!(rasters, vec![ok.path]);
    assert!(codec.can_convert("x.jpg"));
}
