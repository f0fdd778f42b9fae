//! Deciding which spine documents become chapters, and what they are called.

use std::collections::HashMap;

use quick_xml::events::Event;

use crate::book::Book;
use crate::markup::{
    ElementStack, content_reader, is_image_tag, local_name, resolve_entity, without_raw_text,
};
use crate::util::{collapse_whitespace, decode_text};

/// Documents with less visible text than this (and no image or TOC entry) are
/// treated as filler: blank separators, cover wrappers, empty title pages.
pub const MIN_CHAPTER_TEXT: usize = 50;

/// A spine document accepted as a chapter, before rendering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChapterSource {
    /// Archive path of the content document.
    pub source_id: String,
    pub title: String,
    pub html: String,
    pub has_embedded_image: bool,
}

/// A rendered chapter. Identity is `source_id`, order is spine order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    pub source_id: String,
    pub title: String,
    pub rendered_page_count: usize,
    pub has_embedded_image: bool,
}

impl ChapterSource {
    pub fn into_chapter(self, rendered_page_count: usize) -> Chapter {
        Chapter {
            source_id: self.source_id,
            title: self.title,
            rendered_page_count,
            has_embedded_image: self.has_embedded_image,
        }
    }
}

impl Chapter {
    pub fn new(title: impl Into<String>, rendered_page_count: usize) -> Self {
        let title = title.into();
        Self {
            source_id: title.clone(),
            title,
            rendered_page_count,
            has_embedded_image: false,
        }
    }

    pub fn with_image(mut self, has_embedded_image: bool) -> Self {
        self.has_embedded_image = has_embedded_image;
        self
    }
}

/// What a single pass over a content document reveals.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DocumentScan {
    /// Visible text, trimmed, counted in characters.
    pub text_chars: usize,
    /// Collapsed text of the first non-empty `h1`/`h2`.
    pub first_heading: Option<String>,
    pub has_image: bool,
}

/// Scan a content document for visible text, its first heading and images.
///
/// Text inside non-visual elements does not count. Malformed markup stops
/// the scan; whatever was seen up to that point is reported.
pub fn scan_document(html: &str) -> DocumentScan {
    let html = without_raw_text(html);
    let mut reader = content_reader(&html);
    let mut stack = ElementStack::new();
    let mut text = String::new();
    let mut heading: Option<(Vec<u8>, String)> = None;
    let mut scan = DocumentScan::default();

    loop {
        let event = match reader.read_event() {
            Ok(event) => event,
            Err(e) => {
                log::debug!("Content scan stopped early: {e}");
                break;
            }
        };

        match event {
            Event::Start(e) => {
                let local = local_name(e.name().as_ref()).to_ascii_lowercase();
                if is_image_tag(&local) {
                    scan.has_image = true;
                }
                if scan.first_heading.is_none()
                    && heading.is_none()
                    && matches!(local.as_slice(), b"h1" | b"h2")
                {
                    heading = Some((local.clone(), String::new()));
                }
                stack.open(e.name().as_ref());
            }
            Event::Empty(e) => {
                if is_image_tag(local_name(e.name().as_ref())) {
                    scan.has_image = true;
                }
            }
            Event::End(e) => {
                let local = local_name(e.name().as_ref()).to_ascii_lowercase();
                if heading.as_ref().is_some_and(|(tag, _)| *tag == local)
                    && let Some((_, content)) = heading.take()
                {
                    let collapsed = collapse_whitespace(&content);
                    if !collapsed.is_empty() {
                        scan.first_heading = Some(collapsed);
                    }
                }
                stack.close(e.name().as_ref());
            }
            Event::Text(e) if !stack.is_hidden() => {
                let piece = String::from_utf8_lossy(e.as_ref());
                text.push_str(&piece);
                if let Some((_, content)) = heading.as_mut() {
                    content.push_str(&piece);
                }
            }
            Event::GeneralRef(e) if !stack.is_hidden() => {
                if let Some(ch) = resolve_entity(&String::from_utf8_lossy(e.as_ref())) {
                    text.push(ch);
                    if let Some((_, content)) = heading.as_mut() {
                        content.push(ch);
                    }
                }
            }
            Event::CData(e) if !stack.is_hidden() => {
                text.push_str(&String::from_utf8_lossy(e.as_ref()));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    scan.text_chars = text.trim().chars().count();
    scan
}

/// Select chapters from `(source_id, html)` units in spine order.
///
/// `toc_titles` maps source ids to their declared navigation titles; a unit
/// listed there is always kept.
pub fn select_chapters<I>(units: I, toc_titles: &HashMap<String, String>) -> Vec<ChapterSource>
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut chapters: Vec<ChapterSource> = Vec::new();

    for (source_id, html) in units {
        let declared = toc_titles.get(&source_id);
        let scan = scan_document(&html);

        if declared.is_none() && scan.text_chars < MIN_CHAPTER_TEXT && !scan.has_image {
            log::debug!(
                "Skipping '{source_id}': {} characters of text, no image",
                scan.text_chars
            );
            continue;
        }

        let title = declared
            .cloned()
            .or(scan.first_heading)
            .unwrap_or_else(|| format!("Section {}", chapters.len() + 1));

        log::debug!("Chapter {}: '{title}' from '{source_id}'", chapters.len() + 1);
        chapters.push(ChapterSource {
            source_id,
            title,
            html,
            has_embedded_image: scan.has_image,
        });
    }

    chapters
}

/// Select chapters from the content documents of `book`.
///
/// Spine items whose document is missing from the archive are skipped with a
/// warning.
pub fn select_book_chapters(book: &Book) -> Vec<ChapterSource> {
    let units = book.content_documents().filter_map(|item| {
        match book.get_resource(&item.href) {
            Some(resource) => Some((
                item.href.clone(),
                decode_text(&resource.data, None).into_owned(),
            )),
            None => {
                log::warn!("Spine item '{}' ({}) is missing from the archive", item.id, item.href);
                None
            }
        }
    });

    select_chapters(units, &book.toc_titles())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(id: &str, body: &str) -> (String, String) {
        (
            id.to_string(),
            format!("<html><head><title>Ignored title text</title></head><body>{body}</body></html>"),
        )
    }

    const LONG: &str = "It was a bright cold day in April, and the clocks were striking thirteen.";

    #[test]
    fn test_scan_ignores_head_text() {
        let scan = scan_document(&unit("a", "<p>Hi</p>").1);
        assert_eq!(scan.text_chars, 2);
        assert!(!scan.has_image);
        assert_eq!(scan.first_heading, None);
    }

    #[test]
    fn test_scan_finds_first_heading_and_images() {
        let html = r#"<body><h2> Part
            <em>One</em> </h2><h1>Later</h1><svg><image href="c.jpg"/></svg></body>"#;
        let scan = scan_document(html);
        assert_eq!(scan.first_heading.as_deref(), Some("Part One"));
        assert!(scan.has_image);
    }

    #[test]
    fn test_scan_survives_script_with_bare_angle_bracket() {
        let html = "<body><script>if (a<b) go();</script><h1>Opening</h1><p>Body</p></body>";
        let scan = scan_document(html);
        assert_eq!(scan.first_heading.as_deref(), Some("Opening"));
        assert_eq!(scan.text_chars, "OpeningBody".len());
    }

    #[test]
    fn test_empty_heading_is_ignored() {
        let scan = scan_document("<body><h1> </h1><h2>Real</h2></body>");
        assert_eq!(scan.first_heading.as_deref(), Some("Real"));
    }

    #[test]
    fn test_short_unlisted_units_are_excluded() {
        let units = vec![
            unit("blank.xhtml", "<p>   </p>"),
            unit("cover.xhtml", r#"<img src="cover.jpg"/>"#),
            unit("ch1.xhtml", &format!("<p>{LONG}</p>")),
        ];

        let chapters = select_chapters(units, &HashMap::new());
        let ids: Vec<_> = chapters.iter().map(|c| c.source_id.as_str()).collect();
        assert_eq!(ids, ["cover.xhtml", "ch1.xhtml"]);
        assert!(chapters[0].has_embedded_image);
        assert!(!chapters[1].has_embedded_image);
    }

    #[test]
    fn test_toc_listed_units_are_always_kept() {
        let mut titles = HashMap::new();
        titles.insert("dedication.xhtml".to_string(), "Dedication".to_string());

        let chapters = select_chapters(vec![unit("dedication.xhtml", "<p>For M.</p>")], &titles);
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].title, "Dedication");
    }

    #[test]
    fn test_title_resolution_order() {
        let mut titles = HashMap::new();
        titles.insert("a.xhtml".to_string(), "Declared".to_string());

        let units = vec![
            unit("a.xhtml", &format!("<h1>Heading A</h1><p>{LONG}</p>")),
            unit("b.xhtml", &format!("<h1>Heading B</h1><p>{LONG}</p>")),
            unit("c.xhtml", &format!("<p>{LONG}</p>")),
        ];

        let titles: Vec<_> = select_chapters(units, &titles)
            .into_iter()
            .map(|c| c.title)
            .collect();
        assert_eq!(titles, ["Declared", "Heading B", "Section 3"]);
    }

    #[test]
    fn test_section_numbers_count_accepted_chapters() {
        let units = vec![
            unit("skip.xhtml", "<p>x</p>"),
            unit("a.xhtml", &format!("<p>{LONG}</p>")),
        ];
        let chapters = select_chapters(units, &HashMap::new());
        assert_eq!(chapters[0].title, "Section 1");
    }

    #[test]
    fn test_into_chapter_keeps_identity() {
        let source = ChapterSource {
            source_id: "ch.xhtml".into(),
            title: "One".into(),
            html: String::new(),
            has_embedded_image: true,
        };
        let chapter = source.into_chapter(4);
        assert_eq!(chapter.source_id, "ch.xhtml");
        assert_eq!(chapter.rendered_page_count, 4);
        assert!(chapter.has_embedded_image);
    }
}
