//! Benchmarks for the conversion pipeline.
//!
//! Run with: cargo bench

use criterion::{Criterion, criterion_group, criterion_main};
use image::{GrayImage, Luma};

use xtcpress::render::FlowSettings;
use xtcpress::{
    Chapter, FontSource, Hyphenator, PageBitmap, PageRenderer, PaginationPlan, TextFlowRenderer,
    TocGeometry, encode_pages,
};

const PARAGRAPH: &str = "It was the best of times, it was the worst of times, it was the age of \
    wisdom, it was the age of foolishness, it was the epoch of belief, it was the epoch of \
    incredulity, it was the season of Light, it was the season of Darkness.";

fn sample_html(paragraphs: usize) -> String {
    format!(
        "<html><body><h1>Book the First</h1>{}</body></html>",
        format!("<p>{PARAGRAPH}</p>").repeat(paragraphs)
    )
}

fn sample_page(width: u32, height: u32) -> GrayImage {
    GrayImage::from_fn(width, height, |x, y| {
        Luma([if (x * 7 + y * 13) % 29 < 9 { 0 } else { 255 }])
    })
}

// ============================================================================
// Text Processing Benchmarks
// ============================================================================

fn bench_hyphenate(c: &mut Criterion) {
    let html = sample_html(40);
    let hyphenator = Hyphenator::for_language("en-us");

    c.bench_function("hyphenate_html", |b| {
        b.iter(|| hyphenator.hyphenate_html(&html));
    });
}

fn bench_text_flow(c: &mut Criterion) {
    let html = sample_html(40);
    let mut renderer = TextFlowRenderer::new(FontSource::Builtin, FlowSettings::default());

    c.bench_function("render_text_flow", |b| {
        b.iter(|| renderer.render(&html, 480, 770).unwrap());
    });
}

// ============================================================================
// Pagination and Encoding Benchmarks
// ============================================================================

fn bench_pagination(c: &mut Criterion) {
    let chapters: Vec<Chapter> = (0..300)
        .map(|i| Chapter::new(format!("Chapter {i}"), 1 + i % 17))
        .collect();
    let geometry = TocGeometry::new(800, 15, 15);

    c.bench_function("pagination_plan", |b| {
        b.iter(|| {
            let plan = PaginationPlan::new(&chapters, geometry, true);
            (1..=plan.total_pages())
                .filter_map(|page| plan.active_chapter(page))
                .count()
        });
    });
}

fn bench_pack(c: &mut Criterion) {
    let page = sample_page(480, 800);

    c.bench_function("pack_page", |b| {
        b.iter(|| PageBitmap::from_gray(&page));
    });
}

fn bench_encode(c: &mut Criterion) {
    let pages: Vec<PageBitmap> = (0..200)
        .map(|_| PageBitmap::from_gray(&sample_page(480, 800)))
        .collect();

    c.bench_function("encode_container", |b| {
        b.iter(|| encode_pages(&pages).unwrap());
    });
}

criterion_group!(
    benches,
    bench_hyphenate,
    bench_text_flow,
    bench_pagination,
    bench_pack,
    bench_encode
);
criterion_main!(benches);
