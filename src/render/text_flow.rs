//! A plain text-flow page renderer.
//!
//! Understands paragraphs, headings, line breaks, bold runs and images; CSS is
//! ignored. Lines are broken greedily, at spaces first and at soft hyphens
//! when a word does not fit, and justified except for the last line of a
//! paragraph.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use embedded_graphics::prelude::Point;
use image::imageops::{self, FilterType};
use image::{GrayImage, Luma};
use quick_xml::events::{BytesStart, Event};

use crate::config::{ConvertConfig, TextAlign};
use crate::error::Result;
use crate::hyphenate::SOFT_HYPHEN;
use crate::markup::{
    ElementStack, content_reader, is_image_tag, local_name, resolve_entity, without_raw_text,
};
use crate::raster::{BLACK, GrayCanvas};
use crate::typeface::{FontSource, Typeface};

use super::PageRenderer;

/// Layout settings in screen pixels, before oversampling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlowSettings {
    pub font_px: u32,
    pub margin: u32,
    pub line_height: f32,
    pub bold: bool,
    pub align: TextAlign,
    /// Oversampling factor for scalable fonts. Bitmap fonts always render at 1.
    pub scale: f32,
}

impl FlowSettings {
    pub fn from_config(config: &ConvertConfig) -> Self {
        Self {
            font_px: config.font_size,
            margin: config.margin,
            line_height: config.line_height,
            bold: config.font_weight >= 600,
            align: config.text_align,
            scale: config.render_scale,
        }
    }
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self::from_config(&ConvertConfig::default())
    }
}

/// Reference [`PageRenderer`] drawing text with a [`FontSource`].
#[derive(Debug, Clone)]
pub struct TextFlowRenderer {
    fonts: FontSource,
    settings: FlowSettings,
}

impl TextFlowRenderer {
    pub fn new(fonts: FontSource, settings: FlowSettings) -> Self {
        Self { fonts, settings }
    }

    pub fn from_config(config: &ConvertConfig, fonts: FontSource) -> Self {
        Self::new(fonts, FlowSettings::from_config(config))
    }

    fn scale(&self) -> f32 {
        if self.fonts.is_builtin() {
            1.0
        } else {
            self.settings.scale.max(1.0)
        }
    }
}

impl PageRenderer for TextFlowRenderer {
    fn render(&mut self, html: &str, width: u32, height: u32) -> Result<Vec<GrayImage>> {
        let scale = self.scale();
        let scaled = |v: u32| ((v as f32) * scale).round().max(1.0) as u32;

        let blocks = parse_blocks(html)?;
        let mut flow = Flow::new(
            &self.fonts,
            &self.settings,
            scale,
            scaled(width),
            scaled(height),
        );
        for block in blocks {
            match block {
                Block::Text { inlines, style } => flow.place_text(&inlines, style),
                Block::Image(image) => flow.place_image(image),
            }
        }
        Ok(flow.finish())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Word {
    text: String,
    bold: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Inline {
    Word(Word),
    Break,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BlockStyle {
    Body,
    Heading(u8),
}

impl BlockStyle {
    fn size_factor(self) -> f32 {
        match self {
            Self::Body => 1.0,
            Self::Heading(1) => 1.5,
            Self::Heading(2) => 1.3,
            Self::Heading(3) => 1.15,
            Self::Heading(_) => 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Block {
    Text { inlines: Vec<Inline>, style: BlockStyle },
    Image(GrayImage),
}

fn is_block_element(local: &[u8]) -> bool {
    matches!(
        local,
        b"p" | b"div"
            | b"li"
            | b"ul"
            | b"ol"
            | b"dl"
            | b"dd"
            | b"dt"
            | b"blockquote"
            | b"section"
            | b"article"
            | b"header"
            | b"footer"
            | b"aside"
            | b"nav"
            | b"main"
            | b"figure"
            | b"figcaption"
            | b"pre"
            | b"table"
            | b"tr"
            | b"hr"
            | b"address"
            | b"center"
            | b"body"
    )
}

fn heading_level(local: &[u8]) -> Option<u8> {
    match local {
        [b'h', level @ b'1'..=b'6'] => Some(level - b'0'),
        _ => None,
    }
}

#[derive(Default)]
struct BlockBuilder {
    blocks: Vec<Block>,
    inlines: Vec<Inline>,
    heading: Option<u8>,
    bold_depth: usize,
    pending_space: bool,
}

impl BlockBuilder {
    fn push_text(&mut self, text: &str) {
        let bold = self.bold_depth > 0;
        for ch in text.chars() {
            if ch.is_whitespace() && ch != '\u{00A0}' {
                self.pending_space = true;
                continue;
            }
            match self.inlines.last_mut() {
                Some(Inline::Word(word)) if !self.pending_space => word.text.push(ch),
                _ => self.inlines.push(Inline::Word(Word {
                    text: ch.to_string(),
                    bold,
                })),
            }
            self.pending_space = false;
        }
    }

    fn line_break(&mut self) {
        self.inlines.push(Inline::Break);
        self.pending_space = false;
    }

    fn flush(&mut self) {
        let inlines = std::mem::take(&mut self.inlines);
        if inlines.iter().any(|i| matches!(i, Inline::Word(_))) {
            let style = self.heading.map_or(BlockStyle::Body, BlockStyle::Heading);
            self.blocks.push(Block::Text { inlines, style });
        }
        self.pending_space = false;
    }

    fn image(&mut self, element: &BytesStart<'_>) {
        self.flush();
        let source = element.attributes().flatten().find_map(|attr| {
            matches!(local_name(attr.key.as_ref()), b"src" | b"href")
                .then(|| String::from_utf8_lossy(&attr.value).into_owned())
        });
        match source.as_deref().map(decode_data_uri) {
            Some(Some(image)) => self.blocks.push(Block::Image(image)),
            Some(None) => log::debug!("Skipping image that is not inline data"),
            None => {}
        }
    }
}

/// Decode a base64 `data:` URI into grayscale, compositing transparency over white.
fn decode_data_uri(uri: &str) -> Option<GrayImage> {
    let (meta, payload) = uri.strip_prefix("data:")?.split_once(',')?;
    if !meta.ends_with(";base64") {
        return None;
    }
    let bytes = STANDARD.decode(payload.trim()).ok()?;
    let decoded = match image::load_from_memory(&bytes) {
        Ok(decoded) => decoded,
        Err(e) => {
            log::warn!("Undecodable inline image: {e}");
            return None;
        }
    };

    let with_alpha = decoded.to_luma_alpha8();
    Some(GrayImage::from_fn(with_alpha.width(), with_alpha.height(), |x, y| {
        let [v, a] = with_alpha.get_pixel(x, y).0;
        let (v, a) = (u32::from(v), u32::from(a));
        Luma([((v * a + 255 * (255 - a) + 127) / 255) as u8])
    }))
}

fn parse_blocks(html: &str) -> Result<Vec<Block>> {
    let html = without_raw_text(html);
    let mut reader = content_reader(&html);
    let mut stack = ElementStack::new();
    let mut builder = BlockBuilder::default();

    loop {
        match reader.read_event()? {
            Event::Start(e) => {
                let local = local_name(e.name().as_ref()).to_ascii_lowercase();
                stack.open(e.name().as_ref());
                if stack.is_hidden() {
                    continue;
                }
                if let Some(level) = heading_level(&local) {
                    builder.flush();
                    builder.heading = Some(level);
                } else if is_block_element(&local) {
                    builder.flush();
                } else if is_image_tag(&local) {
                    builder.image(&e);
                } else if local == b"br" {
                    builder.line_break();
                } else if matches!(local.as_slice(), b"b" | b"strong") {
                    builder.bold_depth += 1;
                }
            }
            Event::Empty(e) => {
                if stack.is_hidden() {
                    continue;
                }
                let local = local_name(e.name().as_ref()).to_ascii_lowercase();
                if is_image_tag(&local) {
                    builder.image(&e);
                } else if local == b"br" {
                    builder.line_break();
                } else if is_block_element(&local) {
                    builder.flush();
                }
            }
            Event::End(e) => {
                let local = local_name(e.name().as_ref()).to_ascii_lowercase();
                let was_hidden = stack.is_hidden();
                stack.close(e.name().as_ref());
                if was_hidden {
                    continue;
                }
                if heading_level(&local).is_some() {
                    builder.flush();
                    builder.heading = None;
                } else if is_block_element(&local) {
                    builder.flush();
                } else if matches!(local.as_slice(), b"b" | b"strong") {
                    builder.bold_depth = builder.bold_depth.saturating_sub(1);
                }
            }
            Event::Text(e) if !stack.is_hidden() => {
                builder.push_text(&String::from_utf8_lossy(e.as_ref()));
            }
            Event::CData(e) if !stack.is_hidden() => {
                builder.push_text(&String::from_utf8_lossy(e.as_ref()));
            }
            Event::GeneralRef(e) if !stack.is_hidden() => {
                if let Some(ch) = resolve_entity(&String::from_utf8_lossy(e.as_ref())) {
                    builder.push_text(ch.encode_utf8(&mut [0; 4]));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    builder.flush();
    Ok(builder.blocks)
}

/// Split `word` at the last soft hyphen whose head, with a visible hyphen,
/// fits in `available` pixels.
fn split_at_soft_hyphen(face: &Typeface, word: &str, available: i32) -> Option<(String, String)> {
    word.match_indices(SOFT_HYPHEN)
        .map(|(at, _)| at)
        .rev()
        .filter(|&at| at > 0)
        .find_map(|at| {
            let head = format!("{}-", &word[..at]);
            (face.measure(&head) as i32 <= available)
                .then(|| (head, word[at + SOFT_HYPHEN.len_utf8()..].to_string()))
        })
}

/// Longest non-empty character prefix of `word` that fits `available`
/// pixels (always at least one character).
fn split_to_width(face: &Typeface, word: &str, available: i32) -> (String, String) {
    let mut end = word.chars().next().map_or(0, char::len_utf8);
    for (at, ch) in word.char_indices().skip(1) {
        if face.measure(&word[..at + ch.len_utf8()]) as i32 > available {
            break;
        }
        end = at + ch.len_utf8();
    }
    (word[..end].to_string(), word[end..].to_string())
}

struct Piece {
    text: String,
    bold: bool,
    width: i32,
}

/// Pages being filled top to bottom.
struct Flow<'a> {
    fonts: &'a FontSource,
    settings: &'a FlowSettings,
    scale: f32,
    width: u32,
    height: u32,
    pages: Vec<GrayImage>,
    canvas: GrayCanvas,
    y: i32,
    has_content: bool,
}

impl<'a> Flow<'a> {
    fn new(
        fonts: &'a FontSource,
        settings: &'a FlowSettings,
        scale: f32,
        width: u32,
        height: u32,
    ) -> Self {
        let mut flow = Self {
            fonts,
            settings,
            scale,
            width,
            height,
            pages: Vec::new(),
            canvas: GrayCanvas::new(width, height),
            y: 0,
            has_content: false,
        };
        flow.y = flow.top();
        flow
    }

    fn margin(&self) -> i32 {
        (self.settings.margin as f32 * self.scale).round() as i32
    }

    fn top(&self) -> i32 {
        self.margin()
    }

    fn bottom(&self) -> i32 {
        self.height as i32 - self.margin()
    }

    fn left(&self) -> i32 {
        self.margin()
    }

    fn text_width(&self) -> i32 {
        (self.width as i32 - 2 * self.margin()).max(1)
    }

    fn face_px(&self, style: BlockStyle) -> u32 {
        (self.settings.font_px as f32 * style.size_factor() * self.scale).round().max(1.0) as u32
    }

    fn line_advance(&self, face: &Typeface) -> i32 {
        let css = (face.px() as f32 * self.settings.line_height).round() as i32;
        css.max(face.line_height() as i32)
    }

    fn new_page(&mut self) {
        let page = std::mem::replace(&mut self.canvas, GrayCanvas::new(self.width, self.height));
        self.pages.push(page.into_image());
        self.y = self.top();
        self.has_content = false;
    }

    fn place_text(&mut self, inlines: &[Inline], style: BlockStyle) {
        let px = self.face_px(style);
        let heading = matches!(style, BlockStyle::Heading(_));
        let regular = self.fonts.face(px).with_bold(self.settings.bold || heading);
        let bold = self.fonts.face(px).with_bold(true);
        let space = regular.measure(" ") as i32;
        let align = if heading {
            None
        } else {
            Some(self.settings.align)
        };
        let text_width = self.text_width();

        if heading && self.has_content {
            self.y += px as i32;
        }

        let mut line: Vec<Piece> = Vec::new();
        let line_width = |line: &[Piece]| -> i32 {
            line.iter().map(|p| p.width).sum::<i32>() + space * (line.len() as i32 - 1).max(0)
        };

        for inline in inlines {
            let word = match inline {
                Inline::Break => {
                    self.emit_line(&mut line, &regular, &bold, space, align, false);
                    continue;
                }
                Inline::Word(word) => word,
            };
            let face = if word.bold { &bold } else { &regular };
            let mut rest = word.text.clone();

            while !rest.is_empty() {
                let used = if line.is_empty() {
                    0
                } else {
                    line_width(&line) + space
                };
                let width = face.measure(&rest) as i32;
                if used + width <= text_width {
                    line.push(Piece {
                        text: std::mem::take(&mut rest),
                        bold: word.bold,
                        width,
                    });
                    break;
                }

                if let Some((head, tail)) = split_at_soft_hyphen(face, &rest, text_width - used) {
                    let width = face.measure(&head) as i32;
                    line.push(Piece {
                        text: head,
                        bold: word.bold,
                        width,
                    });
                    self.emit_line(&mut line, &regular, &bold, space, align, true);
                    rest = tail;
                } else if !line.is_empty() {
                    self.emit_line(&mut line, &regular, &bold, space, align, true);
                } else {
                    let (head, tail) = split_to_width(face, &rest, text_width);
                    let width = face.measure(&head) as i32;
                    line.push(Piece {
                        text: head,
                        bold: word.bold,
                        width,
                    });
                    self.emit_line(&mut line, &regular, &bold, space, align, true);
                    rest = tail;
                }
            }
        }
        self.emit_line(&mut line, &regular, &bold, space, align, false);

        if !heading {
            self.y += self.line_advance(&regular) / 3;
        }
    }

    /// Draw and clear `line`. `align` of `None` centers; `justify` stretches
    /// the gaps of a justified line to the full text width.
    fn emit_line(
        &mut self,
        line: &mut Vec<Piece>,
        regular: &Typeface,
        bold: &Typeface,
        space: i32,
        align: Option<TextAlign>,
        justify: bool,
    ) {
        if line.is_empty() {
            return;
        }
        let advance = self.line_advance(regular);
        if self.has_content && self.y + advance > self.bottom() {
            self.new_page();
        }

        let gaps = line.len() as i32 - 1;
        let natural: i32 = line.iter().map(|p| p.width).sum::<i32>() + space * gaps;
        let slack = (self.text_width() - natural).max(0);

        let (mut x, gap, mut extra) = match align {
            None => (self.left() + slack / 2, space, 0),
            Some(TextAlign::Justify) if justify && gaps > 0 => {
                (self.left(), space + slack / gaps, slack % gaps)
            }
            Some(_) => (self.left(), space, 0),
        };

        let top = self.y + (advance - regular.line_height() as i32) / 2;
        for piece in line.drain(..) {
            let face = if piece.bold { bold } else { regular };
            face.draw(&mut self.canvas, &piece.text, Point::new(x, top), BLACK);
            x += piece.width + gap;
            if extra > 0 {
                x += 1;
                extra -= 1;
            }
        }

        self.y += advance;
        self.has_content = true;
    }

    fn place_image(&mut self, image: GrayImage) {
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return;
        }
        let max_w = self.text_width() as f32 * 0.95;
        let max_h = (self.bottom() - self.top()).max(1) as f32;
        let factor = self
            .scale
            .min(max_w / w as f32)
            .min(max_h / h as f32);
        let (new_w, new_h) = (
            ((w as f32 * factor).round() as u32).max(1),
            ((h as f32 * factor).round() as u32).max(1),
        );
        let image = if (new_w, new_h) == (w, h) {
            image
        } else {
            imageops::resize(&image, new_w, new_h, FilterType::Lanczos3)
        };

        let spacing = self.line_advance(&self.fonts.face(self.face_px(BlockStyle::Body))) / 2;
        if self.has_content && self.y + spacing + new_h as i32 > self.bottom() {
            self.new_page();
        }
        if self.has_content {
            self.y += spacing;
        }

        let x = self.left() + (self.text_width() - new_w as i32) / 2;
        self.canvas.paste(&image, i64::from(x), i64::from(self.y));
        self.y += new_h as i32 + spacing;
        self.has_content = true;
    }

    fn finish(mut self) -> Vec<GrayImage> {
        if self.has_content || self.pages.is_empty() {
            self.pages.push(self.canvas.into_image());
        }
        self.pages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::WHITE;
    use std::io::Cursor;

    fn renderer() -> TextFlowRenderer {
        TextFlowRenderer::new(FontSource::Builtin, FlowSettings::default())
    }

    fn is_blank(page: &GrayImage) -> bool {
        page.pixels().all(|p| p.0[0] == WHITE)
    }

    fn png_data_uri(width: u32, height: u32) -> String {
        let image = GrayImage::from_pixel(width, height, Luma([0]));
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        format!("data:image/png;base64,{}", STANDARD.encode(bytes))
    }

    #[test]
    fn test_parse_blocks() {
        let html = "<body><h1>Title</h1><p>One <b>two</b>\n three<br/>four</p><style>p{}</style></body>";
        let blocks = parse_blocks(html).unwrap();

        assert_eq!(blocks.len(), 2);
        let Block::Text { inlines, style } = &blocks[1] else {
            panic!("expected text block");
        };
        assert_eq!(*style, BlockStyle::Body);
        let words: Vec<_> = inlines
            .iter()
            .map(|i| match i {
                Inline::Word(w) => (w.text.as_str(), w.bold),
                Inline::Break => ("<br>", false),
            })
            .collect();
        assert_eq!(
            words,
            [("One", false), ("two", true), ("three", false), ("<br>", false), ("four", false)]
        );
        assert!(matches!(blocks[0], Block::Text { style: BlockStyle::Heading(1), .. }));
    }

    #[test]
    fn test_words_split_by_markup_stay_together() {
        let blocks = parse_blocks("<p>un<i>believ</i>able</p>").unwrap();
        let Block::Text { inlines, .. } = &blocks[0] else {
            panic!("expected text block");
        };
        assert_eq!(inlines.len(), 1);
    }

    #[test]
    fn test_empty_document_renders_one_blank_page() {
        let pages = renderer().render("<html><body></body></html>", 480, 770).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].dimensions(), (480, 770));
        assert!(is_blank(&pages[0]));
    }

    #[test]
    fn test_hidden_text_is_not_drawn() {
        let html = "<html><head><style>p { color: red }</style></head><body><script>x()</script></body></html>";
        let pages = renderer().render(html, 200, 200).unwrap();
        assert!(is_blank(&pages[0]));
    }

    #[test]
    fn test_long_text_flows_onto_more_pages() {
        let paragraph = "<p>lorem ipsum dolor sit amet consectetur adipiscing elit</p>".repeat(60);
        let pages = renderer()
            .render(&format!("<body>{paragraph}</body>"), 480, 770)
            .unwrap();
        assert!(pages.len() > 1);
        assert!(pages.iter().all(|p| !is_blank(p)));
    }

    #[test]
    fn test_text_stays_inside_margins() {
        let pages = renderer()
            .render("<p>supercalifragilisticexpialidocious words wrap here</p>", 200, 300)
            .unwrap();
        let page = &pages[0];
        for (x, _, p) in page.enumerate_pixels() {
            if p.0[0] != WHITE {
                assert!((20..180).contains(&x), "ink at x={x}");
            }
        }
    }

    #[test]
    fn test_inline_image_is_drawn() {
        let html = format!(r#"<body><img src="{}"/></body>"#, png_data_uri(40, 30));
        let pages = renderer().render(&html, 200, 200).unwrap();
        assert_eq!(pages.len(), 1);
        assert_eq!(pages[0].get_pixel(100, 30).0[0], BLACK);
    }

    #[test]
    fn test_broken_markup_is_an_error() {
        assert!(renderer().render("<p class=\"oops>text", 100, 100).is_err());
    }

    #[test]
    fn test_split_at_soft_hyphen() {
        let face = FontSource::Builtin.face(20);
        let word = "hy\u{ad}phen\u{ad}ation";
        assert_eq!(
            split_at_soft_hyphen(&face, word, 80),
            Some(("hy\u{ad}phen-".to_string(), "ation".to_string()))
        );
        assert_eq!(
            split_at_soft_hyphen(&face, word, 30),
            Some(("hy-".to_string(), "phen\u{ad}ation".to_string()))
        );
        assert_eq!(split_at_soft_hyphen(&face, word, 20), None);
    }

    #[test]
    fn test_split_to_width_takes_at_least_one_char() {
        let face = FontSource::Builtin.face(20);
        assert_eq!(split_to_width(&face, "abcdef", 35), ("abc".into(), "def".into()));
        assert_eq!(split_to_width(&face, "abcdef", 1), ("a".into(), "bcdef".into()));
    }
}
