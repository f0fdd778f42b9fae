//! Streaming helpers shared by every pass that walks an XHTML content document.
//!
//! Content documents are read with quick-xml rather than a full HTML parser:
//! EPUB requires XHTML, and a streaming reader lets the hyphenator rewrite
//! text nodes while writing every other event back untouched.

use std::borrow::Cow;

use quick_xml::Reader;

/// Extract local name from potentially namespaced XML name
pub fn local_name(name: &[u8]) -> &[u8] {
    name.iter()
        .rposition(|&b| b == b':')
        .map(|i| &name[i + 1..])
        .unwrap_or(name)
}

/// Create a reader configured for (X)HTML content documents.
///
/// Whitespace is significant in running text. End tag names are not
/// checked, and end tags without a start are accepted, so sloppy `text/html`
/// documents and slices from [`split_raw_text`] still stream through.
pub fn content_reader(content: &str) -> Reader<&[u8]> {
    let mut reader = Reader::from_str(content);
    let config = reader.config_mut();
    config.trim_text(false);
    config.check_end_names = false;
    config.allow_unmatched_ends = true;
    reader
}

/// Elements whose content is raw text rather than markup.
const RAW_TEXT_ELEMENTS: [&str; 2] = ["script", "style"];

/// A slice of a content document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Segment<'a> {
    /// Markup that can go through [`content_reader`].
    Markup(&'a str),
    /// A whole `script` or `style` element, start and end tags included.
    RawText(&'a str),
}

/// Split `html` around its `script` and `style` elements.
///
/// Their content may contain a bare `<` or `&` (`if (a<b)`, `p > a`), which
/// an XML reader would take for markup and lose track of the element nesting
/// for the rest of the document. Each such element is cut out whole, up to
/// the first matching end tag, or to the end of the input if it has none.
pub fn split_raw_text(html: &str) -> Vec<Segment<'_>> {
    let bytes = html.as_bytes();
    let mut segments = Vec::new();
    let mut start = 0;
    let mut pos = 0;

    while let Some(offset) = html[pos..].find('<') {
        let open = pos + offset;
        let rest = &html[open + 1..];
        if rest.starts_with("!--") {
            pos = rest.find("-->").map_or(html.len(), |i| open + 1 + i + 3);
            continue;
        }
        let Some(name) = raw_text_name(rest.as_bytes()) else {
            pos = open + 1;
            continue;
        };
        let Some(tag_end) = html[open..].find('>').map(|i| open + i + 1) else {
            break;
        };
        if bytes[tag_end - 2] == b'/' {
            pos = tag_end;
            continue;
        }

        let end = find_end_tag(html, tag_end, name).unwrap_or(html.len());
        if start < open {
            segments.push(Segment::Markup(&html[start..open]));
        }
        segments.push(Segment::RawText(&html[open..end]));
        start = end;
        pos = end;
    }

    if start < html.len() {
        segments.push(Segment::Markup(&html[start..]));
    }
    segments
}

/// `html` with every `script` and `style` element removed.
pub fn without_raw_text(html: &str) -> Cow<'_, str> {
    let segments = split_raw_text(html);
    if segments.iter().all(|s| matches!(s, Segment::Markup(_))) {
        return Cow::Borrowed(html);
    }
    Cow::Owned(
        segments
            .into_iter()
            .filter_map(|segment| match segment {
                Segment::Markup(markup) => Some(markup),
                Segment::RawText(_) => None,
            })
            .collect(),
    )
}

/// Raw-text element named at the start of `tag` (the bytes after `<`).
fn raw_text_name(tag: &[u8]) -> Option<&'static str> {
    RAW_TEXT_ELEMENTS.into_iter().find(|name| {
        tag.len() > name.len()
            && tag[..name.len()].eq_ignore_ascii_case(name.as_bytes())
            && matches!(tag[name.len()], b'>' | b'/' | b' ' | b'\t' | b'\r' | b'\n')
    })
}

/// Byte offset just past the `</name ...>` end tag found at or after `from`.
fn find_end_tag(html: &str, from: usize, name: &str) -> Option<usize> {
    let needle = format!("</{name}");
    let lower = html[from..].to_ascii_lowercase();
    let close = from + lower.find(&needle)?;
    Some(html[close..].find('>').map_or(html.len(), |i| close + i + 1))
}

/// Elements whose text content never reaches the page.
pub fn is_non_visual(local: &[u8]) -> bool {
    matches!(local, b"style" | b"script" | b"head" | b"title" | b"meta")
}

/// HTML void elements; in `text/html` documents they have no end tag.
fn is_void(local: &[u8]) -> bool {
    matches!(
        local,
        b"area"
            | b"base"
            | b"br"
            | b"col"
            | b"embed"
            | b"hr"
            | b"img"
            | b"input"
            | b"link"
            | b"meta"
            | b"source"
            | b"wbr"
    )
}

/// True for tags that reference an image (`<img>` or SVG `<image>`).
pub fn is_image_tag(local: &[u8]) -> bool {
    local.eq_ignore_ascii_case(b"img") || local.eq_ignore_ascii_case(b"image")
}

/// Resolve the body of a general reference (`amp`, `#160`, `#xA0`).
///
/// Covers the XML predefined entities, numeric character references and the
/// handful of HTML named entities common in ebooks.
pub fn resolve_entity(name: &str) -> Option<char> {
    if let Some(num) = name.strip_prefix('#') {
        let code = match num.strip_prefix('x').or_else(|| num.strip_prefix('X')) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => num.parse().ok()?,
        };
        return char::from_u32(code);
    }

    let ch = match name {
        "lt" => '<',
        "gt" => '>',
        "amp" => '&',
        "apos" => '\'',
        "quot" => '"',
        "nbsp" => '\u{00A0}',
        "shy" => '\u{00AD}',
        "ndash" => '\u{2013}',
        "mdash" => '\u{2014}',
        "lsquo" => '\u{2018}',
        "rsquo" => '\u{2019}',
        "ldquo" => '\u{201C}',
        "rdquo" => '\u{201D}',
        "hellip" => '\u{2026}',
        "copy" => '\u{00A9}',
        _ => return None,
    };
    Some(ch)
}

/// Open-element stack tracking whether the cursor sits inside non-visual markup.
///
/// Closing a tag pops back to its matching open tag, so a missing end tag
/// cannot leave the stack permanently "hidden".
#[derive(Debug, Default)]
pub struct ElementStack {
    names: Vec<Vec<u8>>,
    hidden: usize,
}

impl ElementStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, name: &[u8]) {
        let local = local_name(name).to_ascii_lowercase();
        if is_void(&local) {
            return;
        }
        // `head` has an optional end tag in text/html.
        if local == b"body" {
            self.close(b"head");
        }
        if is_non_visual(&local) {
            self.hidden += 1;
        }
        self.names.push(local);
    }

    pub fn close(&mut self, name: &[u8]) {
        let local = local_name(name).to_ascii_lowercase();
        if let Some(pos) = self.names.iter().rposition(|n| *n == local) {
            for name in self.names.drain(pos..) {
                if is_non_visual(&name) {
                    self.hidden -= 1;
                }
            }
        }
    }

    /// Whether text at the current position is inside `style`, `script`, `head`...
    pub fn is_hidden(&self) -> bool {
        self.hidden > 0
    }

    pub fn contains(&self, local: &[u8]) -> bool {
        self.names.iter().any(|n| n == local)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_name() {
        assert_eq!(local_name(b"dc:title"), b"title");
        assert_eq!(local_name(b"title"), b"title");
        assert_eq!(local_name(b"svg:image"), b"image");
    }

    #[test]
    fn test_resolve_entity() {
        assert_eq!(resolve_entity("amp"), Some('&'));
        assert_eq!(resolve_entity("#160"), Some('\u{00A0}'));
        assert_eq!(resolve_entity("#xA0"), Some('\u{00A0}'));
        assert_eq!(resolve_entity("nbsp"), Some('\u{00A0}'));
        assert_eq!(resolve_entity("bogus"), None);
        assert_eq!(resolve_entity("#xZZ"), None);
    }

    #[test]
    fn test_element_stack_recovers_from_unclosed_tags() {
        let mut stack = ElementStack::new();
        stack.open(b"html");
        stack.open(b"head");
        stack.open(b"meta");
        assert!(stack.is_hidden());
        stack.close(b"head");
        assert!(!stack.is_hidden());

        stack.open(b"body");
        stack.open(b"p");
        stack.open(b"span");
        stack.close(b"p");
        assert!(stack.contains(b"body"));
        assert!(!stack.contains(b"span"));
    }

    #[test]
    fn test_element_stack_body_closes_open_head() {
        let mut stack = ElementStack::new();
        stack.open(b"html");
        stack.open(b"head");
        stack.open(b"title");
        stack.close(b"title");
        stack.open(b"body");
        assert!(!stack.is_hidden());
        assert!(stack.contains(b"body"));
        assert!(!stack.contains(b"head"));
    }

    #[test]
    fn test_split_raw_text_cuts_script_and_style() {
        let html = r#"<p>a</p><script type="text/javascript">if (a<b) go();</script><p>b</p><STYLE>p > a {}</STYLE>"#;
        assert_eq!(
            split_raw_text(html),
            [
                Segment::Markup("<p>a</p>"),
                Segment::RawText(r#"<script type="text/javascript">if (a<b) go();</script>"#),
                Segment::Markup("<p>b</p>"),
                Segment::RawText("<STYLE>p > a {}</STYLE>"),
            ]
        );
    }

    #[test]
    fn test_split_raw_text_leaves_lookalikes_alone() {
        let html = r#"<scripture>x</scripture><script src="a.js"/><!-- <style> --><p>y</p>"#;
        assert_eq!(split_raw_text(html), [Segment::Markup(html)]);
        assert!(matches!(without_raw_text(html), Cow::Borrowed(_)));
    }

    #[test]
    fn test_unterminated_script_runs_to_end() {
        let html = "<p>a</p><script>var x = 1 < 2;";
        assert_eq!(
            split_raw_text(html),
            [
                Segment::Markup("<p>a</p>"),
                Segment::RawText("<script>var x = 1 < 2;"),
            ]
        );
        assert_eq!(without_raw_text("<b>x</b><style>p{}</style><i>y</i>"), "<b>x</b><i>y</i>");
    }
}
