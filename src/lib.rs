//! # xtcpress
//!
//! Convert reflowable EPUB books into XTC containers: fixed-layout, 1-bit page
//! images with a page index, as read by small e-ink readers.
//!
//! ## Features
//!
//! - Read EPUB 2/3 into a format-agnostic [`Book`]
//! - Soft hyphenation with embedded pattern dictionaries
//! - Chapter selection with TOC, heading or positional titles
//! - Paginated table of contents and per-page footer (progress bar, chapter
//!   ticks, page counter, running title)
//! - Pluggable page renderer, with a built-in text-flow renderer
//! - Read and write the XTC container
//!
//! ## Quick Start
//!
//! ```no_run
//! use xtcpress::{ConvertConfig, Converter, read_epub};
//!
//! let book = read_epub("input.epub").unwrap();
//! let mut converter = Converter::new(ConvertConfig::default()).unwrap();
//! let report = converter.convert_to_file(&book, "output.xtc").unwrap();
//! println!("{} pages", report.total_pages);
//! ```
//!
//! ## Inspecting a Container
//!
//! ```no_run
//! use xtcpress::read_xtc;
//!
//! let file = read_xtc("output.xtc").unwrap();
//! for (i, record) in file.records().iter().enumerate() {
//!     println!("page {}: {}x{}", i + 1, record.width, record.height);
//! }
//! file.export_png(0, "first-page.png").unwrap();
//! ```

pub mod book;
pub mod chapters;
pub mod config;
pub mod convert;
pub mod epub;
pub mod error;
pub mod hyphenate;
pub(crate) mod markup;
pub mod overlay;
pub mod paginate;
pub mod raster;
pub mod render;
pub mod typeface;
pub(crate) mod util;
pub mod xtc;

pub use book::{Book, Metadata, NavPoint, Resource, SpineItem};
pub use chapters::{Chapter, ChapterSource, select_book_chapters, select_chapters};
pub use config::{ConvertConfig, ScreenGeometry, TextAlign};
pub use convert::{
    CancelFlag, ChapterSummary, ConversionHandle, ConversionReport, Converter, SkippedChapter,
    Stage,
};
pub use epub::{read_epub, read_epub_from_reader};
pub use error::{Error, Result};
pub use hyphenate::{Dictionary, DictionaryProvider, EmbeddedDictionaries, Hyphenator};
pub use paginate::{PageMapEntry, PageSlot, PaginationPlan, TocEntry, TocGeometry};
pub use raster::{Monochrome, PageBitmap, StandardMonochrome, ThresholdMode};
pub use render::{PageRenderer, TextFlowRenderer};
pub use typeface::FontSource;
pub use xtc::{XtcEncoder, XtcFile, encode_pages, read_xtc, read_xtc_from_reader, write_xtc};
