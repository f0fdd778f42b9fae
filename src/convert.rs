//! The EPUB to XTC pipeline.
//!
//! Conversion runs in two stages joined by an immutable [`PaginationPlan`]:
//!
//! 1. every selected chapter is hyphenated, assembled into a render document
//!    and rendered to grayscale pages;
//! 2. every global page (TOC pages first) is composed on the screen,
//!    reduced to black and white, given its footer and handed to the encoder.
//!
//! A chapter that fails to render is skipped and listed in the
//! [`ConversionReport`]; the plan is built from the surviving chapters only.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;

use image::GrayImage;
use log::{debug, info, warn};

use crate::book::Book;
use crate::chapters::{Chapter, select_book_chapters};
use crate::config::ConvertConfig;
use crate::error::{Error, Result};
use crate::hyphenate::{DictionaryProvider, EmbeddedDictionaries, Hyphenator};
use crate::overlay::OverlayRenderer;
use crate::paginate::{PageSlot, PaginationPlan};
use crate::raster::{Monochrome, PageBitmap, StandardMonochrome, ThresholdMode};
use crate::render::{DocumentBuilder, PageRenderer, TextFlowRenderer};
use crate::typeface::FontSource;
use crate::xtc::{XtcEncoder, save_atomically};

/// Pipeline stage reported to progress callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Rendering,
    Composing,
}

/// Progress callback: stage and completed fraction in `0.0..=1.0`.
pub type ProgressFn = Box<dyn FnMut(Stage, f32) + Send>;

/// Cooperative cancellation flag, checked between chapters and pages.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// A chapter left out of the output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedChapter {
    pub source_id: String,
    pub reason: String,
}

/// Summary of a finished conversion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversionReport {
    pub total_pages: usize,
    pub toc_pages: usize,
    /// Chapters present in the output, in reading order.
    pub chapters: Vec<ChapterSummary>,
    pub skipped: Vec<SkippedChapter>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterSummary {
    pub title: String,
    pub start_page: usize,
    pub pages: usize,
}

/// Stage one output: accepted chapters and their rendered pages.
struct RenderedBook {
    chapters: Vec<Chapter>,
    pages: Vec<Vec<GrayImage>>,
    skipped: Vec<SkippedChapter>,
}

/// Converts books with one configuration.
pub struct Converter {
    config: ConvertConfig,
    fonts: FontSource,
    renderer: Box<dyn PageRenderer>,
    monochrome: Box<dyn Monochrome + Send>,
    dictionaries: Box<dyn DictionaryProvider + Send>,
    progress: Option<ProgressFn>,
    cancel: CancelFlag,
}

impl std::fmt::Debug for Converter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Converter")
            .field("config", &self.config)
            .field("fonts", &self.fonts)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl Converter {
    /// Validate `config` and load its font. An unreadable font falls back to
    /// the built-in one.
    pub fn new(config: ConvertConfig) -> Result<Self> {
        config.validate()?;
        let fonts = FontSource::load_or_builtin(config.font_path());
        let renderer = Box::new(TextFlowRenderer::from_config(&config, fonts.clone()));
        Ok(Self {
            config,
            fonts,
            renderer,
            monochrome: Box::new(StandardMonochrome),
            dictionaries: Box::new(EmbeddedDictionaries),
            progress: None,
            cancel: CancelFlag::new(),
        })
    }

    pub fn with_renderer(mut self, renderer: Box<dyn PageRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn with_monochrome(mut self, monochrome: Box<dyn Monochrome + Send>) -> Self {
        self.monochrome = monochrome;
        self
    }

    pub fn with_dictionaries(mut self, dictionaries: Box<dyn DictionaryProvider + Send>) -> Self {
        self.dictionaries = dictionaries;
        self
    }

    pub fn with_progress(mut self, progress: impl FnMut(Stage, f32) + Send + 'static) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    pub fn with_cancel(mut self, cancel: CancelFlag) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &ConvertConfig {
        &self.config
    }

    /// A flag that cancels this converter's runs.
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Convert `book` into container bytes.
    pub fn convert(&mut self, book: &Book) -> Result<(Vec<u8>, ConversionReport)> {
        info!("Converting '{}'", book.metadata.title);
        let rendered = self.render_chapters(book)?;

        let plan = PaginationPlan::new(
            &rendered.chapters,
            self.config.screen().toc_geometry(),
            self.config.include_toc,
        );
        if plan.content_page_count() == 0 {
            return Err(Error::EmptyBook);
        }
        info!(
            "Planned {} pages ({} TOC, {} chapters)",
            plan.total_pages(),
            plan.toc_page_count(),
            rendered.chapters.len()
        );

        let data = self.compose_pages(&rendered, &plan)?;

        let chapters = rendered
            .chapters
            .iter()
            .zip(plan.start_pages())
            .map(|(chapter, start_page)| ChapterSummary {
                title: chapter.title.clone(),
                start_page,
                pages: chapter.rendered_page_count,
            })
            .collect();
        let report = ConversionReport {
            total_pages: plan.total_pages(),
            toc_pages: plan.toc_page_count(),
            chapters,
            skipped: rendered.skipped,
        };
        Ok((data, report))
    }

    /// Convert `book` and write the container to `path` atomically.
    pub fn convert_to_file(&mut self, book: &Book, path: impl AsRef<Path>) -> Result<ConversionReport> {
        let path = path.as_ref();
        let (data, report) = self.convert(book)?;
        save_atomically(path, &data)?;
        info!("Wrote {} pages to {}", report.total_pages, path.display());
        Ok(report)
    }

    /// Run the conversion of `book` to `output` on a worker thread.
    pub fn spawn(mut self, book: Book, output: impl Into<PathBuf>) -> ConversionHandle {
        let output = output.into();
        let cancel = self.cancel.clone();
        let thread = std::thread::spawn(move || self.convert_to_file(&book, &output));
        ConversionHandle { cancel, thread }
    }

    fn check_cancel(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            info!("Conversion cancelled");
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    fn report_progress(&mut self, stage: Stage, done: usize, total: usize) {
        if let Some(progress) = self.progress.as_mut() {
            let fraction = if total == 0 { 1.0 } else { done as f32 / total as f32 };
            progress(stage, fraction);
        }
    }

    fn render_chapters(&mut self, book: &Book) -> Result<RenderedBook> {
        let sources = select_book_chapters(book);
        let documents = DocumentBuilder::new(book, &self.config);
        let hyphenator = Hyphenator::new(documents.language(), self.dictionaries.as_ref());
        let screen = self.config.screen();
        let (width, height) = (screen.width, screen.content_height());

        info!("Rendering {} chapters", sources.len());
        let total = sources.len();
        let mut rendered = RenderedBook {
            chapters: Vec::with_capacity(total),
            pages: Vec::with_capacity(total),
            skipped: Vec::new(),
        };

        for (i, source) in sources.into_iter().enumerate() {
            self.check_cancel()?;

            let result = documents
                .build(&source, &hyphenator)
                .and_then(|html| self.renderer.render(&html, width, height));
            match result {
                Ok(pages) if !pages.is_empty() => {
                    debug!("'{}' rendered to {} pages", source.source_id, pages.len());
                    rendered.chapters.push(source.into_chapter(pages.len()));
                    rendered.pages.push(pages);
                }
                Ok(_) => {
                    warn!("Chapter '{}' rendered no pages; skipping", source.source_id);
                    rendered.skipped.push(SkippedChapter {
                        source_id: source.source_id,
                        reason: "rendered no pages".to_string(),
                    });
                }
                Err(e) => {
                    // The renderer only sees markup; name the chapter ourselves.
                    let message = match e {
                        Error::Render { message, .. } => message,
                        other => other.to_string(),
                    };
                    let e = Error::Render {
                        chapter: source.source_id.clone(),
                        message,
                    };
                    warn!("{e}; skipping");
                    rendered.skipped.push(SkippedChapter {
                        source_id: source.source_id,
                        reason: e.to_string(),
                    });
                }
            }
            self.report_progress(Stage::Rendering, i + 1, total);
        }

        Ok(rendered)
    }

    fn compose_pages(&mut self, rendered: &RenderedBook, plan: &PaginationPlan) -> Result<Vec<u8>> {
        let overlay = OverlayRenderer::new(self.config.screen(), &self.fonts);
        let toc_chunks: Vec<_> = plan.toc_chunks().collect();
        let total = plan.total_pages();
        let mut encoder = XtcEncoder::new(total)?;

        for index in 0..total {
            self.check_cancel()?;

            let mut canvas = match plan.locate(index) {
                Some(PageSlot::Toc(toc_page)) => overlay.render_toc_page(toc_chunks[toc_page]),
                Some(PageSlot::Content(entry)) => {
                    let chapter = &rendered.chapters[entry.chapter_index];
                    let page = &rendered.pages[entry.chapter_index][entry.page_within_chapter];
                    overlay.compose_content_page(
                        page,
                        ThresholdMode::for_chapter(chapter.has_embedded_image),
                        self.monochrome.as_ref(),
                    )
                }
                None => {
                    return Err(Error::PaginationNotFinalized {
                        expected: total,
                        composed: index,
                    });
                }
            };
            overlay.draw_footer(&mut canvas, index + 1, plan);
            encoder.push(&PageBitmap::from_gray(canvas.image()))?;

            self.report_progress(Stage::Composing, index + 1, total);
        }

        encoder.finish()
    }
}

/// A conversion running on a worker thread.
#[derive(Debug)]
pub struct ConversionHandle {
    cancel: CancelFlag,
    thread: JoinHandle<Result<ConversionReport>>,
}

impl ConversionHandle {
    /// Ask the conversion to stop at the next chapter or page boundary.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the conversion. A panic on the worker is resumed here.
    pub fn join(self) -> Result<ConversionReport> {
        match self.thread.join() {
            Ok(result) => result,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::book::NavPoint;
    use crate::xtc::XtcFile;
    use std::sync::Mutex;

    /// One blank page per `<p>`; fails on documents mentioning "boom".
    struct CountingRenderer;

    impl PageRenderer for CountingRenderer {
        fn render(&mut self, html: &str, width: u32, height: u32) -> Result<Vec<GrayImage>> {
            if html.contains("boom") {
                return Err(Error::Render {
                    chapter: "unknown".into(),
                    message: "renderer crashed".into(),
                });
            }
            let count = html.matches("<p>").count().max(1);
            Ok(vec![GrayImage::from_pixel(width, height, image::Luma([255])); count])
        }
    }

    const FILLER: &str = "Enough words on this page to count as a real chapter of the book.";

    fn chapter_html(title: &str, paragraphs: usize) -> String {
        format!(
            "<html><body><h1>{title}</h1>{}</body></html>",
            format!("<p>{FILLER}</p>").repeat(paragraphs)
        )
    }

    fn book(chapters: &[(&str, usize)]) -> Book {
        let mut book = Book::new();
        book.metadata.title = "Test".into();
        for (i, (title, paragraphs)) in chapters.iter().enumerate() {
            let href = format!("ch{i}.xhtml");
            book.add_resource(&href, chapter_html(title, *paragraphs).into_bytes(), "application/xhtml+xml");
            book.add_spine_item(format!("c{i}"), &href, "application/xhtml+xml");
            book.toc.push(NavPoint::new(*title, &href));
        }
        book
    }

    fn converter(config: ConvertConfig) -> Converter {
        Converter::new(config)
            .unwrap()
            .with_renderer(Box::new(CountingRenderer))
    }

    #[test]
    fn test_pages_follow_the_plan() {
        let book = book(&[("One", 2), ("Two", 1), ("Three", 3)]);
        let (data, report) = converter(ConvertConfig::default()).convert(&book).unwrap();

        assert_eq!(report.toc_pages, 1);
        assert_eq!(report.total_pages, 7);
        let starts: Vec<_> = report.chapters.iter().map(|c| c.start_page).collect();
        assert_eq!(starts, [2, 4, 5]);

        let file = XtcFile::from_bytes(data).unwrap();
        assert_eq!(file.page_count(), 7);
        assert!(file.pages().all(|p| p.unwrap().width() == 480));
    }

    #[test]
    fn test_without_toc() {
        let book = book(&[("One", 2), ("Two", 1)]);
        let (_, report) = converter(ConvertConfig::new().with_toc(false))
            .convert(&book)
            .unwrap();
        assert_eq!(report.toc_pages, 0);
        assert_eq!(report.total_pages, 3);
        assert_eq!(report.chapters[0].start_page, 1);
    }

    #[test]
    fn test_failed_chapter_is_skipped() {
        let book = book(&[("One", 2), ("boom", 1), ("Three", 1)]);
        let (_, report) = converter(ConvertConfig::default()).convert(&book).unwrap();

        assert_eq!(report.chapters.len(), 2);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].source_id, "ch1.xhtml");
        let reason = &report.skipped[0].reason;
        assert!(reason.contains("'ch1.xhtml'"), "{reason}");
        assert!(reason.contains("renderer crashed"));
        assert!(!reason.contains("unknown"));
        let starts: Vec<_> = report.chapters.iter().map(|c| c.start_page).collect();
        assert_eq!(starts, [2, 4]);
        assert_eq!(report.total_pages, 4);
    }

    #[test]
    fn test_empty_book() {
        let result = converter(ConvertConfig::default()).convert(&Book::new());
        assert!(matches!(result, Err(Error::EmptyBook)));
    }

    #[test]
    fn test_cancelled_before_start() {
        let book = book(&[("One", 1)]);
        let mut converter = converter(ConvertConfig::default());
        converter.cancel_flag().cancel();
        assert!(matches!(converter.convert(&book), Err(Error::Cancelled)));
    }

    #[test]
    fn test_progress_reaches_the_end_of_both_stages() {
        let book = book(&[("One", 1), ("Two", 1)]);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut converter = converter(ConvertConfig::default())
            .with_progress(move |stage, fraction| sink.lock().unwrap().push((stage, fraction)));

        converter.convert(&book).unwrap();
        let seen = seen.lock().unwrap();
        assert_eq!(seen.iter().filter(|(s, _)| *s == Stage::Rendering).count(), 2);
        assert_eq!(seen.last(), Some(&(Stage::Composing, 1.0)));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        assert!(matches!(
            Converter::new(ConvertConfig::new().with_screen(0, 800)),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_spawned_conversion_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.xtc");
        let handle = converter(ConvertConfig::default()).spawn(book(&[("One", 1)]), &path);

        let report = handle.join().unwrap();
        assert_eq!(report.total_pages, 2);
        assert_eq!(crate::xtc::read_xtc(&path).unwrap().page_count(), 2);
    }

    #[test]
    fn test_cancelled_spawn_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.xtc");
        let cancel = CancelFlag::new();
        cancel.cancel();

        let handle = converter(ConvertConfig::default())
            .with_cancel(cancel)
            .spawn(book(&[("One", 1)]), &path);
        assert!(matches!(handle.join(), Err(Error::Cancelled)));
        assert!(!path.exists());
    }
}
