//! Turning chapter documents into grayscale page images.
//!
//! Rendering is split in two: [`document`] assembles one self-contained HTML
//! document per chapter, and a [`PageRenderer`] lays that document out into
//! pages. [`TextFlowRenderer`] is the built-in renderer; anything able to
//! paginate HTML can be plugged into the converter instead.

pub mod document;
mod text_flow;

use image::GrayImage;

use crate::error::Result;

pub use document::DocumentBuilder;
pub use text_flow::{FlowSettings, TextFlowRenderer};

/// Lays out an HTML document into fixed-size pages.
pub trait PageRenderer: Send {
    /// Render `html` at `width` x `height` pixels (the content area of the
    /// screen). Pages may come back larger, for oversampling; the caller
    /// scales them down. An empty document still yields at least one page.
    fn render(&mut self, html: &str, width: u32, height: u32) -> Result<Vec<GrayImage>>;
}

impl<R: PageRenderer + ?Sized> PageRenderer for Box<R> {
    fn render(&mut self, html: &str, width: u32, height: u32) -> Result<Vec<GrayImage>> {
        (**self).render(html, width, height)
    }
}
