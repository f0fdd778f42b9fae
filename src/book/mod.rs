use std::collections::HashMap;

use percent_encoding::percent_decode_str;

/// Intermediate representation of a source ebook.
/// Holds everything the converter needs from the container: metadata,
/// reading order, the declared navigation tree and raw resources.
#[derive(Debug, Clone, Default)]
pub struct Book {
    pub metadata: Metadata,
    pub spine: Vec<SpineItem>,
    pub toc: Vec<NavPoint>,
    pub resources: HashMap<String, Resource>,
}

/// Book metadata (Dublin Core subset)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metadata {
    pub title: String,
    pub authors: Vec<String>,
    pub language: String,
    pub identifier: String,
    pub publisher: Option<String>,
    pub description: Option<String>,
}

/// An item in the reading order (spine)
#[derive(Debug, Clone)]
pub struct SpineItem {
    pub id: String,
    pub href: String,
    pub media_type: String,
}

/// A navigation entry from the NCX or EPUB 3 nav document (hierarchical)
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct NavPoint {
    pub title: String,
    pub href: String,
    pub children: Vec<NavPoint>,
    /// Play order for sorting (from NCX playOrder attribute)
    pub play_order: Option<usize>,
}

impl Ord for NavPoint {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.play_order.cmp(&other.play_order)
    }
}

impl PartialOrd for NavPoint {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// A resource (content document, image, CSS, font, etc.)
#[derive(Debug, Clone)]
pub struct Resource {
    pub data: Vec<u8>,
    pub media_type: String,
}

impl Resource {
    pub fn is_image(&self) -> bool {
        self.media_type.starts_with("image/")
    }

    pub fn is_stylesheet(&self) -> bool {
        self.media_type == "text/css"
    }
}

impl Book {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a resource to the book
    pub fn add_resource(
        &mut self,
        href: impl Into<String>,
        data: Vec<u8>,
        media_type: impl Into<String>,
    ) {
        self.resources.insert(
            href.into(),
            Resource {
                data,
                media_type: media_type.into(),
            },
        );
    }

    /// Get a resource by href
    pub fn get_resource(&self, href: &str) -> Option<&Resource> {
        self.resources.get(href)
    }

    /// Add a spine item
    pub fn add_spine_item(
        &mut self,
        id: impl Into<String>,
        href: impl Into<String>,
        media_type: impl Into<String>,
    ) {
        self.spine.push(SpineItem {
            id: id.into(),
            href: href.into(),
            media_type: media_type.into(),
        });
    }

    /// Spine items that are (X)HTML content documents, in reading order.
    pub fn content_documents(&self) -> impl Iterator<Item = &SpineItem> {
        self.spine.iter().filter(|item| is_html_media_type(&item.media_type))
    }

    /// Flatten the navigation tree into an `href -> title` mapping.
    ///
    /// Fragments are stripped and hrefs percent-decoded so they compare equal
    /// to manifest hrefs. When several entries point into the same document the
    /// first one in document order names it.
    pub fn toc_titles(&self) -> HashMap<String, String> {
        fn walk(points: &[NavPoint], out: &mut HashMap<String, String>) {
            for point in points {
                let href = normalize_href(&point.href);
                let title = point.title.trim();
                if !href.is_empty() && !title.is_empty() {
                    out.entry(href).or_insert_with(|| title.to_string());
                }
                walk(&point.children, out);
            }
        }

        let mut out = HashMap::new();
        walk(&self.toc, &mut out);
        out
    }

    /// All stylesheets concatenated in href order.
    pub fn combined_css(&self) -> String {
        let mut hrefs: Vec<&String> = self
            .resources
            .iter()
            .filter(|(_, r)| r.is_stylesheet())
            .map(|(href, _)| href)
            .collect();
        hrefs.sort();

        hrefs
            .into_iter()
            .filter_map(|href| self.resources.get(href))
            .map(|r| crate::util::decode_text(&r.data, None).into_owned())
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Metadata {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.authors.push(author.into());
        self
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = language.into();
        self
    }

    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = identifier.into();
        self
    }
}

impl NavPoint {
    pub fn new(title: impl Into<String>, href: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            href: href.into(),
            children: Vec::new(),
            play_order: None,
        }
    }

    pub fn with_child(mut self, child: NavPoint) -> Self {
        self.children.push(child);
        self
    }

    pub fn with_play_order(mut self, order: usize) -> Self {
        self.play_order = Some(order);
        self
    }
}

/// Strip the fragment and percent-decode an href.
pub fn normalize_href(href: &str) -> String {
    let base = href.split('#').next().unwrap_or(href);
    percent_decode_str(base).decode_utf8_lossy().into_owned()
}

fn is_html_media_type(media_type: &str) -> bool {
    matches!(media_type, "application/xhtml+xml" | "text/html")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toc_titles_first_entry_wins() {
        let mut book = Book::new();
        book.toc = vec![
            NavPoint::new("Part One", "text/part1.xhtml")
                .with_child(NavPoint::new("Scene", "text/part1.xhtml#scene")),
            NavPoint::new("Notes on %C3%A9t%C3%A9", "text/%C3%A9t%C3%A9.xhtml"),
        ];

        let titles = book.toc_titles();
        assert_eq!(titles.get("text/part1.xhtml").map(String::as_str), Some("Part One"));
        assert!(titles.contains_key("text/été.xhtml"));
        assert_eq!(titles.len(), 2);
    }

    #[test]
    fn test_content_documents_skip_non_html() {
        let mut book = Book::new();
        book.add_spine_item("c1", "c1.xhtml", "application/xhtml+xml");
        book.add_spine_item("svg", "cover.svg", "image/svg+xml");
        book.add_spine_item("c2", "c2.html", "text/html");

        let ids: Vec<_> = book.content_documents().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["c1", "c2"]);
    }

    #[test]
    fn test_combined_css_is_sorted() {
        let mut book = Book::new();
        book.add_resource("b.css", b"p { b }".to_vec(), "text/css");
        book.add_resource("a.css", b"p { a }".to_vec(), "text/css");
        book.add_resource("img.png", vec![0x89], "image/png");

        assert_eq!(book.combined_css(), "p { a }\np { b }");
    }
}
