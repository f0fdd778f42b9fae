//! Assembly of the standalone HTML document handed to a page renderer.
//!
//! Each chapter becomes one self-contained document: the book's stylesheets,
//! the typography overrides derived from [`ConvertConfig`], and the chapter
//! body with its images inlined as `data:` URIs.

use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use quick_xml::Writer;
use quick_xml::events::{BytesStart, Event};
use regex::Regex;

use crate::book::{Book, normalize_href};
use crate::chapters::ChapterSource;
use crate::config::ConvertConfig;
use crate::error::Result;
use crate::hyphenate::Hyphenator;
use crate::markup::{Segment, content_reader, is_image_tag, local_name, split_raw_text};
use crate::util::{join_href, parent_dir};

/// Family name the configured font is registered under.
pub const CUSTOM_FONT_FAMILY: &str = "\"CustomFont\"";

static FONT_FAMILY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"font-family\s*:\s*[^;!}]+").expect("valid font-family pattern"));

/// Point every `font-family` declaration in `css` at `family`.
pub fn rewrite_font_families(css: &str, family: &str) -> String {
    FONT_FAMILY
        .replace_all(css, format!("font-family: {family}").as_str())
        .into_owned()
}

/// Stylesheet that forces the configured typography over the book's own.
pub fn typography_css(config: &ConvertConfig) -> String {
    let (font_face, family) = match config.font_path() {
        Some(path) => {
            let url = path.to_string_lossy().replace('\\', "/");
            (
                format!("@font-face {{ font-family: {CUSTOM_FONT_FAMILY}; src: url(\"{url}\"); }}"),
                CUSTOM_FONT_FAMILY,
            )
        }
        None => (String::new(), "serif"),
    };
    let heading_weight = (config.font_weight + 200).min(900);

    format!(
        "{font_face}
@page {{ margin: 0; }}
body, p, div, span, li, blockquote, dd, dt {{
    font-family: {family} !important;
    font-size: {size}pt !important;
    font-weight: {weight} !important;
    line-height: {line_height} !important;
    text-align: {align} !important;
    color: black !important;
    overflow-wrap: break-word;
}}
body {{
    margin: 0 !important;
    padding: {margin}px !important;
    background-color: white !important;
}}
img {{ max-width: 95% !important; height: auto !important; display: block; margin: 50px auto !important; }}
h1, h2, h3 {{
    text-align: center !important;
    margin-top: 1em;
    font-weight: {heading_weight} !important;
}}
",
        size = config.font_size,
        weight = config.font_weight,
        line_height = config.line_height,
        align = config.text_align.as_css(),
        margin = config.margin,
    )
}

/// Restrict a language tag to characters safe inside an attribute.
fn sanitize_language(language: &str) -> String {
    let tag: String = language
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    if tag.is_empty() { "en".to_string() } else { tag }
}

/// Builds render documents for the chapters of one book.
#[derive(Debug)]
pub struct DocumentBuilder<'a> {
    book: &'a Book,
    language: String,
    book_css: String,
    typography_css: String,
}

impl<'a> DocumentBuilder<'a> {
    pub fn new(book: &'a Book, config: &ConvertConfig) -> Self {
        let language = config
            .language
            .clone()
            .filter(|l| !l.trim().is_empty())
            .or_else(|| Some(book.metadata.language.clone()).filter(|l| !l.trim().is_empty()))
            .unwrap_or_else(|| "en".to_string());

        let mut book_css = book.combined_css();
        if config.font_path.is_some() {
            book_css = rewrite_font_families(&book_css, CUSTOM_FONT_FAMILY);
        }

        Self {
            book,
            language: sanitize_language(&language),
            book_css,
            typography_css: typography_css(config),
        }
    }

    /// Language of the generated documents, also used for hyphenation.
    pub fn language(&self) -> &str {
        &self.language
    }

    /// The complete document for `chapter`, hyphenated by `hyphenator`.
    pub fn build(&self, chapter: &ChapterSource, hyphenator: &Hyphenator) -> Result<String> {
        let hyphenated = hyphenator.hyphenate_html(&chapter.html);
        let body = self.inline_body(&hyphenated, &chapter.source_id)?;

        Ok(format!(
            "<html lang=\"{lang}\"><head><style>/*<![CDATA[*/\n{book_css}\n/*]]>*/</style><style>/*<![CDATA[*/\n{typography}\n/*]]>*/</style></head><body>{body}</body></html>",
            lang = self.language,
            book_css = self.book_css,
            typography = self.typography_css,
        ))
    }

    /// Body markup of `html` with image references replaced by `data:` URIs.
    /// Documents without a `body` element are used whole.
    fn inline_body(&self, html: &str, source_id: &str) -> Result<String> {
        let base_dir = parent_dir(source_id);
        let mut writer = Writer::new(Vec::with_capacity(html.len()));
        let mut body: Option<(usize, Option<usize>)> = None;

        for segment in split_raw_text(html) {
            match segment {
                Segment::Markup(markup) => {
                    self.inline_markup(markup, base_dir, &mut writer, &mut body)?
                }
                Segment::RawText(raw) => writer.get_mut().extend_from_slice(raw.as_bytes()),
            }
        }

        let out = String::from_utf8(writer.into_inner())?;
        Ok(match body {
            Some((start, end)) => out[start..end.unwrap_or(out.len())].to_string(),
            None => out,
        })
    }

    /// Copy `markup` into `writer`, inlining images and recording where the
    /// body content starts and ends.
    fn inline_markup(
        &self,
        markup: &str,
        base_dir: &str,
        writer: &mut Writer<Vec<u8>>,
        body: &mut Option<(usize, Option<usize>)>,
    ) -> Result<()> {
        let mut reader = content_reader(markup);

        loop {
            let event = reader.read_event()?;
            match event {
                Event::Eof => return Ok(()),
                Event::Start(ref e) if is_image_tag(local_name(e.name().as_ref())) => {
                    writer.write_event(Event::Start(self.inline_image(e, base_dir)))?;
                }
                Event::Empty(ref e) if is_image_tag(local_name(e.name().as_ref())) => {
                    writer.write_event(Event::Empty(self.inline_image(e, base_dir)))?;
                }
                Event::Start(ref e)
                    if body.is_none() && local_name(e.name().as_ref()).eq_ignore_ascii_case(b"body") =>
                {
                    writer.write_event(event.borrow())?;
                    *body = Some((writer.get_ref().len(), None));
                }
                Event::End(ref e)
                    if local_name(e.name().as_ref()).eq_ignore_ascii_case(b"body")
                        && matches!(body, Some((_, None))) =>
                {
                    if let Some((start, _)) = *body {
                        *body = Some((start, Some(writer.get_ref().len())));
                    }
                    writer.write_event(event.borrow())?;
                }
                other => writer.write_event(other)?,
            }
        }
    }

    /// Copy of an image element whose source attribute points at inlined data.
    fn inline_image(&self, element: &BytesStart<'_>, base_dir: &str) -> BytesStart<'static> {
        let name = String::from_utf8_lossy(element.name().as_ref()).into_owned();
        let mut out = BytesStart::new(name);

        for attr in element.attributes().flatten() {
            let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
            let is_source = matches!(local_name(attr.key.as_ref()), b"src" | b"href");
            let value = String::from_utf8_lossy(&attr.value).into_owned();

            match is_source.then(|| self.data_uri(&value, base_dir)).flatten() {
                Some(uri) => out.push_attribute((key.as_str(), uri.as_str())),
                None => out.push_attribute((key.as_bytes(), value.as_bytes())),
            }
        }
        out
    }

    /// `data:` URI for an image reference relative to `base_dir`.
    fn data_uri(&self, reference: &str, base_dir: &str) -> Option<String> {
        if reference.starts_with("data:") || reference.contains("://") {
            return None;
        }

        let path = join_href(base_dir, &normalize_href(reference));
        let resource = self
            .book
            .get_resource(&path)
            .filter(|r| r.is_image())
            .or_else(|| {
                // Fall back to a unique file name match, for books with broken relative paths.
                let file_name = path.rsplit('/').next()?;
                let mut matches = self.book.resources.iter().filter(|(href, r)| {
                    r.is_image() && href.rsplit('/').next() == Some(file_name)
                });
                let (_, found) = matches.next()?;
                matches.next().is_none().then_some(found)
            });

        match resource {
            Some(resource) => Some(format!(
                "data:{};base64,{}",
                resource.media_type,
                STANDARD.encode(&resource.data)
            )),
            None => {
                log::debug!("Image '{reference}' not found in the archive");
                None
            }
        }
    }
}
