//! Text measurement and drawing for overlays and the text-flow renderer.
//!
//! Two kinds of face are supported: the Latin-1 bitmap fonts that ship with
//! embedded-graphics, and TrueType/OpenType fonts rasterized by fontdue.

use std::borrow::Cow;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use embedded_graphics::mono_font::iso_8859_1::{
    FONT_6X10, FONT_7X13, FONT_7X14, FONT_9X15, FONT_9X18, FONT_10X20,
};
use embedded_graphics::mono_font::{MonoFont, MonoTextStyle};
use embedded_graphics::pixelcolor::Gray8;
use embedded_graphics::prelude::*;
use embedded_graphics::text::{Baseline, Text};
use fontdue::{Font, FontSettings};

use crate::error::{Error, Result};
use crate::hyphenate::SOFT_HYPHEN;
use crate::raster::GrayCanvas;

/// Where faces come from.
#[derive(Clone, Default)]
pub enum FontSource {
    /// Bitmap fonts compiled into the binary.
    #[default]
    Builtin,
    TrueType(Arc<Font>),
}

impl fmt::Debug for FontSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Builtin => f.write_str("Builtin"),
            Self::TrueType(_) => f.write_str("TrueType"),
        }
    }
}

impl FontSource {
    /// Parse a TrueType or OpenType font.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let font = Font::from_bytes(bytes, FontSettings::default())
            .map_err(|e| Error::Font(e.to_string()))?;
        Ok(Self::TrueType(Arc::new(font)))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path)
            .map_err(|e| Error::Font(format!("{}: {e}", path.display())))?;
        Self::from_bytes(&bytes).map_err(|e| match e {
            Error::Font(msg) => Error::Font(format!("{}: {msg}", path.display())),
            other => other,
        })
    }

    /// Load `path` if given, falling back to the built-in fonts on failure.
    pub fn load_or_builtin(path: Option<&Path>) -> Self {
        let Some(path) = path else {
            return Self::Builtin;
        };
        match Self::load(path) {
            Ok(source) => {
                log::debug!("Loaded font {}", path.display());
                source
            }
            Err(e) => {
                log::warn!("{e}; using the built-in font");
                Self::Builtin
            }
        }
    }

    pub fn is_builtin(&self) -> bool {
        matches!(self, Self::Builtin)
    }

    /// A face of roughly `px` pixels.
    pub fn face(&self, px: u32) -> Typeface {
        let kind = match self {
            Self::Builtin => FaceKind::Mono(mono_font_for(px)),
            Self::TrueType(font) => FaceKind::TrueType(Arc::clone(font)),
        };
        Typeface {
            kind,
            px: px.max(1),
            bold: false,
        }
    }
}

/// Largest built-in font whose cell is not taller than `px` (smallest otherwise).
fn mono_font_for(px: u32) -> &'static MonoFont<'static> {
    match px {
        0..=12 => &FONT_6X10,
        13 => &FONT_7X13,
        14 => &FONT_7X14,
        15..=17 => &FONT_9X15,
        18..=19 => &FONT_9X18,
        _ => &FONT_10X20,
    }
}

#[derive(Clone)]
enum FaceKind {
    Mono(&'static MonoFont<'static>),
    TrueType(Arc<Font>),
}

/// A font at a fixed pixel size.
#[derive(Clone)]
pub struct Typeface {
    kind: FaceKind,
    px: u32,
    bold: bool,
}

impl fmt::Debug for Typeface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            FaceKind::Mono(font) => format!(
                "Mono({}x{})",
                font.character_size.width, font.character_size.height
            ),
            FaceKind::TrueType(_) => "TrueType".to_string(),
        };
        f.debug_struct("Typeface")
            .field("kind", &kind)
            .field("px", &self.px)
            .field("bold", &self.bold)
            .finish()
    }
}

impl Typeface {
    /// Synthesize bold by drawing every glyph twice, one pixel apart.
    pub fn with_bold(mut self, bold: bool) -> Self {
        self.bold = bold;
        self
    }

    pub fn px(&self) -> u32 {
        self.px
    }

    pub fn is_bold(&self) -> bool {
        self.bold
    }

    /// Advance width of `text` in pixels. Soft hyphens are invisible.
    pub fn measure(&self, text: &str) -> u32 {
        let width = match &self.kind {
            FaceKind::Mono(font) => {
                let cell = font.character_size.width + font.character_spacing;
                let count = latin1_text(text).chars().filter(|&c| c != SOFT_HYPHEN).count();
                count as u32 * cell
            }
            FaceKind::TrueType(font) => {
                let px = self.px as f32;
                let width: f32 = text
                    .chars()
                    .filter(|&c| c != SOFT_HYPHEN)
                    .map(|c| font.metrics(c, px).advance_width)
                    .sum();
                width.ceil() as u32
            }
        };
        if self.bold && width > 0 { width + 1 } else { width }
    }

    /// Distance between consecutive baselines at line-height 1.0.
    pub fn line_height(&self) -> u32 {
        match &self.kind {
            FaceKind::Mono(font) => font.character_size.height,
            FaceKind::TrueType(font) => font
                .horizontal_line_metrics(self.px as f32)
                .map(|m| m.new_line_size.ceil() as u32)
                .unwrap_or(self.px * 6 / 5),
        }
    }

    /// Distance from the top of a line to its baseline.
    pub fn ascent(&self) -> u32 {
        match &self.kind {
            FaceKind::Mono(font) => font.baseline,
            FaceKind::TrueType(font) => font
                .horizontal_line_metrics(self.px as f32)
                .map(|m| m.ascent.ceil() as u32)
                .unwrap_or(self.px),
        }
    }

    /// Draw `text` with the top of its line box at `top_left`. Returns the x
    /// coordinate just past the last glyph.
    pub fn draw(&self, canvas: &mut GrayCanvas, text: &str, top_left: Point, luma: u8) -> i32 {
        let end = self.draw_once(canvas, text, top_left, luma);
        if self.bold {
            self.draw_once(canvas, text, top_left + Point::new(1, 0), luma);
            end + 1
        } else {
            end
        }
    }

    fn draw_once(&self, canvas: &mut GrayCanvas, text: &str, top_left: Point, luma: u8) -> i32 {
        let visible: String = text.chars().filter(|&c| c != SOFT_HYPHEN).collect();
        match &self.kind {
            FaceKind::Mono(font) => {
                let style = MonoTextStyle::new(font, Gray8::new(luma));
                let Ok(next) =
                    Text::with_baseline(&latin1_text(&visible), top_left, style, Baseline::Top)
                        .draw(canvas);
                next.x
            }
            FaceKind::TrueType(font) => {
                let px = self.px as f32;
                let baseline = top_left.y + self.ascent() as i32;
                let mut pen = top_left.x as f32;

                for ch in visible.chars() {
                    let (metrics, coverage) = font.rasterize(ch, px);
                    let gx = pen.round() as i32 + metrics.xmin;
                    let gy = baseline - metrics.ymin - metrics.height as i32;
                    for (i, &alpha) in coverage.iter().enumerate() {
                        if alpha == 0 {
                            continue;
                        }
                        let dx = (i % metrics.width) as i32;
                        let dy = (i / metrics.width) as i32;
                        canvas.blend(gx + dx, gy + dy, luma, alpha);
                    }
                    pen += metrics.advance_width;
                }
                pen.ceil() as i32
            }
        }
    }
}

/// Fold typographic punctuation outside Latin-1 onto ASCII look-alikes so the
/// bitmap fonts do not print replacement glyphs for them.
fn latin1_text(text: &str) -> Cow<'_, str> {
    if text.chars().all(|c| (c as u32) < 0x100) {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '\u{2026}' => out.push_str("..."),
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{2032}' => out.push('\''),
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{2033}' => out.push('"'),
            '\u{2010}' | '\u{2011}' | '\u{2012}' | '\u{2013}' | '\u{2212}' => out.push('-'),
            '\u{2014}' | '\u{2015}' => out.push_str("--"),
            '\u{2022}' => out.push('\u{B7}'),
            other => out.push(other),
        }
    }
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{BLACK, WHITE};

    #[test]
    fn test_builtin_face_sizes() {
        let face = FontSource::Builtin.face(16);
        assert_eq!(face.measure("abc"), 27);
        assert_eq!(face.line_height(), 15);

        let large = FontSource::Builtin.face(24);
        assert_eq!(large.measure("a"), 10);
        assert_eq!(large.line_height(), 20);
    }

    #[test]
    fn test_soft_hyphens_are_invisible() {
        let face = FontSource::Builtin.face(20);
        assert_eq!(face.measure("hy\u{ad}phen"), face.measure("hyphen"));
    }

    #[test]
    fn test_ellipsis_measures_as_three_dots() {
        let face = FontSource::Builtin.face(20);
        assert_eq!(face.measure("\u{2026}"), face.measure("..."));
    }

    #[test]
    fn test_bold_adds_one_pixel() {
        let face = FontSource::Builtin.face(16).with_bold(true);
        assert_eq!(face.measure("ab"), 19);
        assert_eq!(face.measure(""), 0);
    }

    #[test]
    fn test_draw_marks_pixels_inside_the_line_box() {
        let face = FontSource::Builtin.face(20);
        let mut canvas = GrayCanvas::new(100, 40);
        let end = face.draw(&mut canvas, "Hi", Point::new(5, 10), BLACK);

        assert_eq!(end, 25);
        let image = canvas.image();
        let dark: Vec<(u32, u32)> = image
            .enumerate_pixels()
            .filter(|(_, _, p)| p.0[0] != WHITE)
            .map(|(x, y, _)| (x, y))
            .collect();
        assert!(!dark.is_empty());
        assert!(dark.iter().all(|&(x, y)| (5..25).contains(&x) && (10..30).contains(&y)));
    }

    #[test]
    fn test_invalid_font_bytes() {
        assert!(matches!(FontSource::from_bytes(b"not a font"), Err(Error::Font(_))));
    }

    #[test]
    fn test_missing_font_falls_back_to_builtin() {
        let source = FontSource::load_or_builtin(Some(Path::new("/nonexistent/font.ttf")));
        assert!(source.is_builtin());
    }
}
