//! Conversion settings.

use std::path::{Path, PathBuf};

#[cfg(feature = "cli")]
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::paginate::TocGeometry;

pub const DEFAULT_WIDTH: u32 = 480;
pub const DEFAULT_HEIGHT: u32 = 800;
pub const DEFAULT_FONT_SIZE: u32 = 22;
pub const DEFAULT_MARGIN: u32 = 20;
pub const DEFAULT_LINE_HEIGHT: f32 = 1.4;
pub const DEFAULT_FONT_WEIGHT: u32 = 400;
pub const DEFAULT_PADDING: u32 = 15;
pub const DEFAULT_RENDER_SCALE: f32 = 3.0;

/// Horizontal alignment of body text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "cli", derive(Serialize, Deserialize, clap::ValueEnum))]
#[cfg_attr(feature = "cli", serde(rename_all = "lowercase"))]
pub enum TextAlign {
    #[default]
    Justify,
    Left,
}

impl TextAlign {
    pub fn as_css(self) -> &'static str {
        match self {
            Self::Justify => "justify",
            Self::Left => "left",
        }
    }
}

/// Device screen and the bands reserved above and below the content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenGeometry {
    pub width: u32,
    pub height: u32,
    pub top_padding: u32,
    pub bottom_padding: u32,
}

impl ScreenGeometry {
    /// Height left for rendered content between the paddings.
    pub fn content_height(&self) -> u32 {
        self.height
            .saturating_sub(self.top_padding)
            .saturating_sub(self.bottom_padding)
    }

    pub fn toc_geometry(&self) -> TocGeometry {
        TocGeometry::new(self.height, self.top_padding, self.bottom_padding)
    }
}

/// Settings for one EPUB to XTC conversion.
///
/// Defaults target a 480x800 portrait e-ink panel.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "cli", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "cli", serde(default))]
pub struct ConvertConfig {
    pub width: u32,
    pub height: u32,
    /// Body text size in points.
    pub font_size: u32,
    /// Page margin in pixels around the text block.
    pub margin: u32,
    pub line_height: f32,
    /// CSS font weight, 100-900.
    pub font_weight: u32,
    pub top_padding: u32,
    pub bottom_padding: u32,
    pub text_align: TextAlign,
    /// TrueType/OpenType font for body text and overlays.
    pub font_path: Option<PathBuf>,
    pub include_toc: bool,
    /// Hyphenation and document language; the book's language when unset.
    pub language: Option<String>,
    /// Oversampling factor of rendered pages before they are reduced to the
    /// screen size.
    pub render_scale: f32,
}

impl Default for ConvertConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            font_size: DEFAULT_FONT_SIZE,
            margin: DEFAULT_MARGIN,
            line_height: DEFAULT_LINE_HEIGHT,
            font_weight: DEFAULT_FONT_WEIGHT,
            top_padding: DEFAULT_PADDING,
            bottom_padding: DEFAULT_PADDING,
            text_align: TextAlign::Justify,
            font_path: None,
            include_toc: true,
            language: None,
            render_scale: DEFAULT_RENDER_SCALE,
        }
    }
}

impl ConvertConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_screen(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_font_size(mut self, font_size: u32) -> Self {
        self.font_size = font_size;
        self
    }

    pub fn with_margin(mut self, margin: u32) -> Self {
        self.margin = margin;
        self
    }

    pub fn with_line_height(mut self, line_height: f32) -> Self {
        self.line_height = line_height;
        self
    }

    pub fn with_font_weight(mut self, font_weight: u32) -> Self {
        self.font_weight = font_weight;
        self
    }

    pub fn with_padding(mut self, top: u32, bottom: u32) -> Self {
        self.top_padding = top;
        self.bottom_padding = bottom;
        self
    }

    pub fn with_text_align(mut self, text_align: TextAlign) -> Self {
        self.text_align = text_align;
        self
    }

    pub fn with_font_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.font_path = Some(path.into());
        self
    }

    pub fn with_toc(mut self, include_toc: bool) -> Self {
        self.include_toc = include_toc;
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_render_scale(mut self, render_scale: f32) -> Self {
        self.render_scale = render_scale;
        self
    }

    pub fn screen(&self) -> ScreenGeometry {
        ScreenGeometry {
            width: self.width,
            height: self.height,
            top_padding: self.top_padding,
            bottom_padding: self.bottom_padding,
        }
    }

    pub fn font_path(&self) -> Option<&Path> {
        self.font_path.as_deref()
    }

    /// Reject settings no page could be produced with.
    pub fn validate(&self) -> Result<()> {
        let max = u32::from(u16::MAX);
        if self.width == 0 || self.height == 0 || self.width > max || self.height > max {
            return Err(Error::Config(format!(
                "screen size {}x{} must be between 1 and {max} pixels per side",
                self.width, self.height
            )));
        }
        if self.screen().content_height() == 0 {
            return Err(Error::Config(format!(
                "paddings {}+{} leave no room on a {} pixel high screen",
                self.top_padding, self.bottom_padding, self.height
            )));
        }
        if self.font_size == 0 {
            return Err(Error::Config("font size must be positive".into()));
        }
        if !(self.line_height.is_finite() && self.line_height > 0.0) {
            return Err(Error::Config(format!(
                "line height {} must be positive",
                self.line_height
            )));
        }
        if !(100..=900).contains(&self.font_weight) {
            return Err(Error::Config(format!(
                "font weight {} must be between 100 and 900",
                self.font_weight
            )));
        }
        if !(self.render_scale.is_finite() && (1.0..=8.0).contains(&self.render_scale)) {
            return Err(Error::Config(format!(
                "render scale {} must be between 1 and 8",
                self.render_scale
            )));
        }
        Ok(())
    }

    /// Load settings from a JSON file; missing keys keep their defaults.
    #[cfg(feature = "cli")]
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ConvertConfig::default();
        assert_eq!((config.width, config.height), (480, 800));
        assert_eq!(config.font_size, 22);
        assert_eq!(config.text_align, TextAlign::Justify);
        assert!(config.include_toc);
        assert!(config.validate().is_ok());
        assert_eq!(config.screen().content_height(), 770);
    }

    #[test]
    fn test_validate_rejects_degenerate_screens() {
        assert!(ConvertConfig::new().with_screen(0, 800).validate().is_err());
        assert!(ConvertConfig::new().with_screen(70_000, 800).validate().is_err());
        assert!(ConvertConfig::new().with_padding(400, 400).validate().is_err());
        assert!(ConvertConfig::new().with_font_weight(1000).validate().is_err());
        assert!(ConvertConfig::new().with_line_height(0.0).validate().is_err());
    }

    #[cfg(feature = "cli")]
    #[test]
    fn test_partial_json_keeps_defaults() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), r#"{"font_size": 18, "text_align": "left"}"#).unwrap();

        let config = ConvertConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.font_size, 18);
        assert_eq!(config.text_align, TextAlign::Left);
        assert_eq!(config.width, DEFAULT_WIDTH);
    }
}
