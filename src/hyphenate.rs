//! Soft hyphenation of body text before it is handed to the page renderer.
//!
//! Long words get U+00AD break candidates from a Liang pattern dictionary so a
//! justifying renderer can split them at line ends instead of stretching the
//! word spacing. Non-breaking spaces are turned into ordinary spaces for the
//! same reason.

use std::sync::LazyLock;

use hyphenation::{Hyphenator as _, Language, Load, Standard};
use quick_xml::Writer;
use quick_xml::escape::partial_escape;
use quick_xml::events::{BytesRef, BytesText, Event};
use regex::{Captures, Regex};

use crate::error::Result;
use crate::markup::{ElementStack, Segment, content_reader, resolve_entity, split_raw_text};

/// Invisible break candidate inserted inside words.
pub const SOFT_HYPHEN: char = '\u{00AD}';

/// Words shorter than this (in characters) are left alone.
const MIN_WORD_CHARS: usize = 6;

/// Language used when the requested one has no dictionary.
pub const DEFAULT_LANGUAGE: &str = "en-us";

static WORD: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+").expect("valid word pattern"));

/// A hyphenation dictionary: reports the byte offsets inside a word where a
/// break is allowed.
pub trait Dictionary: Send + Sync {
    fn break_points(&self, word: &str) -> Vec<usize>;
}

impl Dictionary for Standard {
    fn break_points(&self, word: &str) -> Vec<usize> {
        self.hyphenate(word).breaks
    }
}

/// Source of dictionaries keyed by language code.
pub trait DictionaryProvider {
    /// Look up the dictionary for an exact (normalized) language code.
    fn lookup(&self, language: &str) -> Option<Box<dyn Dictionary>>;
}

/// Dictionaries compiled into the binary by the `hyphenation` crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmbeddedDictionaries;

impl DictionaryProvider for EmbeddedDictionaries {
    fn lookup(&self, language: &str) -> Option<Box<dyn Dictionary>> {
        let lang = embedded_language(language)?;
        match Standard::from_embedded(lang) {
            Ok(dictionary) => Some(Box::new(dictionary)),
            Err(e) => {
                log::warn!("Hyphenation dictionary for '{language}' failed to load: {e}");
                None
            }
        }
    }
}

fn embedded_language(code: &str) -> Option<Language> {
    let lang = match code {
        "en" | "en-us" => Language::EnglishUS,
        "en-gb" | "en-au" | "en-nz" | "en-ie" => Language::EnglishGB,
        "fr" => Language::French,
        "de" | "de-de" | "de-at" => Language::German1996,
        "de-ch" => Language::GermanSwiss,
        "es" => Language::Spanish,
        "it" => Language::Italian,
        "pt" | "pt-pt" | "pt-br" => Language::Portuguese,
        "nl" => Language::Dutch,
        "ru" => Language::Russian,
        "uk" => Language::Ukrainian,
        "pl" => Language::Polish,
        "cs" => Language::Czech,
        "sk" => Language::Slovak,
        "sl" => Language::Slovenian,
        "hr" => Language::Croatian,
        "hu" => Language::Hungarian,
        "ro" => Language::Romanian,
        "sv" => Language::Swedish,
        "da" => Language::Danish,
        "nb" | "no" => Language::NorwegianBokmal,
        "nn" => Language::NorwegianNynorsk,
        "fi" => Language::Finnish,
        "ca" => Language::Catalan,
        "tr" => Language::Turkish,
        "la" => Language::Latin,
        "el" => Language::GreekMono,
        _ => return None,
    };
    Some(lang)
}

/// Normalize a BCP 47-ish code: lowercase, `_` as `-`, trimmed.
fn normalize_code(code: &str) -> String {
    code.trim().to_ascii_lowercase().replace('_', "-")
}

/// Inserts soft hyphens into text runs and XHTML documents.
pub struct Hyphenator {
    dictionary: Option<Box<dyn Dictionary>>,
}

impl std::fmt::Debug for Hyphenator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hyphenator")
            .field("has_dictionary", &self.dictionary.is_some())
            .finish()
    }
}

impl Hyphenator {
    /// Resolve the dictionary for `language` from `provider`.
    ///
    /// Tries the full tag (`en-gb`), then its primary subtag (`en`), then the
    /// default language. Without any dictionary the hyphenator is a no-op.
    pub fn new(language: &str, provider: &dyn DictionaryProvider) -> Self {
        let code = normalize_code(language);
        let primary = code.split('-').next().unwrap_or_default().to_string();

        let mut candidates = vec![code.clone()];
        if primary != code {
            candidates.push(primary);
        }

        for candidate in &candidates {
            if let Some(dictionary) = provider.lookup(candidate) {
                log::debug!("Hyphenating with '{candidate}' dictionary");
                return Self {
                    dictionary: Some(dictionary),
                };
            }
        }

        match provider.lookup(DEFAULT_LANGUAGE) {
            Some(dictionary) => {
                log::debug!(
                    "No hyphenation dictionary for '{language}', using '{DEFAULT_LANGUAGE}'"
                );
                Self {
                    dictionary: Some(dictionary),
                }
            }
            None => {
                log::warn!("No hyphenation dictionary available; text left unhyphenated");
                Self::disabled()
            }
        }
    }

    /// Hyphenator backed by the embedded dictionaries.
    pub fn for_language(language: &str) -> Self {
        Self::new(language, &EmbeddedDictionaries)
    }

    /// A hyphenator that returns every input unchanged.
    pub fn disabled() -> Self {
        Self { dictionary: None }
    }

    pub fn has_dictionary(&self) -> bool {
        self.dictionary.is_some()
    }

    /// Hyphenate a plain text run.
    ///
    /// Non-breaking spaces become ordinary spaces and every word of at least
    /// six characters receives soft hyphens at its dictionary break points.
    pub fn hyphenate_text(&self, text: &str) -> String {
        let Some(dictionary) = self.dictionary.as_deref() else {
            return text.to_string();
        };

        let clean = text.replace('\u{00A0}', " ");
        WORD.replace_all(&clean, |caps: &Captures| {
            let word = &caps[0];
            if word.chars().count() < MIN_WORD_CHARS {
                return word.to_string();
            }
            insert_soft_hyphens(word, &dictionary.break_points(word))
        })
        .into_owned()
    }

    /// Hyphenate the text nodes of an (X)HTML document.
    ///
    /// Markup is written back event by event. Text inside `style`, `script`,
    /// `head`, `title` and `meta` and whitespace-only runs are copied through
    /// byte for byte. A document that fails to parse is returned unchanged.
    pub fn hyphenate_html(&self, html: &str) -> String {
        if self.dictionary.is_none() {
            return html.to_string();
        }

        match self.rewrite_html(html) {
            Ok(out) => out,
            Err(e) => {
                log::warn!("Skipping hyphenation of unparseable document: {e}");
                html.to_string()
            }
        }
    }

    fn rewrite_html(&self, html: &str) -> Result<String> {
        let mut writer = Writer::new(Vec::with_capacity(html.len() + html.len() / 8));
        let mut stack = ElementStack::new();

        for segment in split_raw_text(html) {
            match segment {
                Segment::Markup(markup) => self.rewrite_markup(markup, &mut stack, &mut writer)?,
                Segment::RawText(raw) => writer.get_mut().extend_from_slice(raw.as_bytes()),
            }
        }
        if stack.is_hidden() {
            log::debug!("Document ends inside non-visual markup; trailing text left unhyphenated");
        }

        Ok(String::from_utf8(writer.into_inner())?)
    }

    fn rewrite_markup(
        &self,
        markup: &str,
        stack: &mut ElementStack,
        writer: &mut Writer<Vec<u8>>,
    ) -> Result<()> {
        let mut reader = content_reader(markup);
        let mut run = TextRun::default();

        loop {
            let event = reader.read_event()?;
            match &event {
                Event::Text(e) => {
                    run.push_text(&String::from_utf8_lossy(e.as_ref()));
                    continue;
                }
                Event::GeneralRef(e) => {
                    run.push_ref(&String::from_utf8_lossy(e.as_ref()));
                    continue;
                }
                _ => {}
            }

            run.flush(self, stack.is_hidden(), writer)?;

            match &event {
                Event::Start(e) => stack.open(e.name().as_ref()),
                Event::End(e) => stack.close(e.name().as_ref()),
                Event::Eof => return Ok(()),
                _ => {}
            }
            writer.write_event(event)?;
        }
    }
}

fn insert_soft_hyphens(word: &str, breaks: &[usize]) -> String {
    let mut out = String::with_capacity(word.len() + breaks.len() * SOFT_HYPHEN.len_utf8());
    let mut last = 0;
    for &at in breaks {
        if at <= last || at >= word.len() || !word.is_char_boundary(at) {
            continue;
        }
        out.push_str(&word[last..at]);
        out.push(SOFT_HYPHEN);
        last = at;
    }
    out.push_str(&word[last..]);
    out
}

/// Consecutive text and entity events between two tags.
#[derive(Default)]
struct TextRun {
    pieces: Vec<Piece>,
    /// The run exactly as it appeared in the source.
    raw: String,
}

enum Piece {
    Text(String),
    /// Entity the hyphenator cannot resolve, written back verbatim.
    Opaque(String),
}

impl TextRun {
    fn push_text(&mut self, text: &str) {
        self.raw.push_str(text);
        self.push_resolved(text);
    }

    fn push_resolved(&mut self, text: &str) {
        match self.pieces.last_mut() {
            Some(Piece::Text(existing)) => existing.push_str(text),
            _ => self.pieces.push(Piece::Text(text.to_string())),
        }
    }

    fn push_ref(&mut self, name: &str) {
        self.raw.push('&');
        self.raw.push_str(name);
        self.raw.push(';');
        match resolve_entity(name) {
            Some(ch) => self.push_resolved(ch.encode_utf8(&mut [0; 4])),
            None => self.pieces.push(Piece::Opaque(name.to_string())),
        }
    }

    fn is_blank(&self) -> bool {
        self.pieces.iter().all(|piece| match piece {
            Piece::Text(text) => text.trim().is_empty(),
            Piece::Opaque(_) => false,
        })
    }

    fn flush(
        &mut self,
        hyphenator: &Hyphenator,
        hidden: bool,
        writer: &mut Writer<Vec<u8>>,
    ) -> Result<()> {
        if self.pieces.is_empty() {
            return Ok(());
        }

        let raw = std::mem::take(&mut self.raw);
        if hidden || self.is_blank() {
            self.pieces.clear();
            writer.write_event(Event::Text(BytesText::from_escaped(raw)))?;
            return Ok(());
        }

        for piece in self.pieces.drain(..) {
            match piece {
                Piece::Text(text) => {
                    let text = hyphenator.hyphenate_text(&text);
                    writer.write_event(Event::Text(BytesText::from_escaped(partial_escape(
                        text.as_str(),
                    ))))?;
                }
                Piece::Opaque(name) => {
                    writer.write_event(Event::GeneralRef(BytesRef::new(name)))?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NoDictionaries;

    impl DictionaryProvider for NoDictionaries {
        fn lookup(&self, _language: &str) -> Option<Box<dyn Dictionary>> {
            None
        }
    }

    /// Breaks every word after its third byte; keeps tests independent of patterns.
    struct EveryThird;

    impl Dictionary for EveryThird {
        fn break_points(&self, word: &str) -> Vec<usize> {
            (3..word.len()).step_by(3).collect()
        }
    }

    struct OnlyGerman;

    impl DictionaryProvider for OnlyGerman {
        fn lookup(&self, language: &str) -> Option<Box<dyn Dictionary>> {
            (language == "de").then(|| Box::new(EveryThird) as Box<dyn Dictionary>)
        }
    }

    fn strip(text: &str) -> String {
        text.replace(SOFT_HYPHEN, "")
    }

    #[test]
    fn test_hyphenates_long_words_only() {
        let hyphenator = Hyphenator::for_language("en");
        let out = hyphenator.hyphenate_text("short hyphenation");

        assert!(out.starts_with("short "));
        assert!(out.contains(SOFT_HYPHEN));
        assert_eq!(strip(&out), "short hyphenation");
    }

    #[test]
    fn test_replaces_non_breaking_spaces() {
        let hyphenator = Hyphenator::for_language("en");
        assert_eq!(hyphenator.hyphenate_text("a\u{00A0}b"), "a b");
    }

    #[test]
    fn test_unknown_language_falls_back_to_default() {
        let hyphenator = Hyphenator::for_language("xx-YY");
        assert!(hyphenator.has_dictionary());
        assert!(hyphenator.hyphenate_text("extraordinary").contains(SOFT_HYPHEN));
    }

    #[test]
    fn test_region_tag_falls_back_to_primary_subtag() {
        let hyphenator = Hyphenator::new("de_AT", &OnlyGerman);
        assert_eq!(hyphenator.hyphenate_text("abcdefg"), "abc\u{ad}def\u{ad}g");
    }

    #[test]
    fn test_without_dictionaries_input_is_unchanged() {
        let hyphenator = Hyphenator::new("en", &NoDictionaries);
        assert!(!hyphenator.has_dictionary());
        let text = "internationalization\u{00A0}works";
        assert_eq!(hyphenator.hyphenate_text(text), text);
        assert_eq!(hyphenator.hyphenate_html("<p>x</p>"), "<p>x</p>");
    }

    #[test]
    fn test_html_skips_non_visual_text() {
        let hyphenator = Hyphenator::new("de", &OnlyGerman);
        let html = r#"<html><head><title>Titlewords</title><style>.abcdefgh{}</style></head><body class="abcdefgh"><p>abcdefg&#160;xy</p></body></html>"#;

        let out = hyphenator.hyphenate_html(html);
        assert!(out.contains("<title>Titlewords</title>"));
        assert!(out.contains(".abcdefgh{}"));
        assert!(out.contains(r#"<body class="abcdefgh">"#));
        assert!(out.contains("<p>abc\u{ad}def\u{ad}g xy</p>"));
    }

    #[test]
    fn test_html_preserves_unknown_entities_and_whitespace_runs() {
        let hyphenator = Hyphenator::new("de", &OnlyGerman);
        let html = "<div>\n  <p>abcdefg&custom;</p>\n</div>";

        let out = hyphenator.hyphenate_html(html);
        assert!(out.starts_with("<div>\n  <p>"));
        assert!(out.contains("abc\u{ad}def\u{ad}g&custom;"));
    }

    #[test]
    fn test_broken_markup_is_returned_unchanged() {
        let hyphenator = Hyphenator::new("de", &OnlyGerman);
        let html = "<p attr=\"unterminated>abcdefg";
        assert_eq!(hyphenator.hyphenate_html(html), html);
    }

    #[test]
    fn test_insert_soft_hyphens_ignores_bad_offsets() {
        assert_eq!(insert_soft_hyphens("été", &[1, 0, 99]), "été");
        assert_eq!(insert_soft_hyphens("abcd", &[2, 2]), "ab\u{ad}cd");
    }

    #[test]
    fn test_style_and_title_text_is_copied_verbatim() {
        let hyphenator = Hyphenator::new("de", &OnlyGerman);
        let style = r#"<style>p > a { font-family: "Serif Font" }</style>"#;
        let title = r#"<title>Tom's "Longwinded" Tale &amp; more</title>"#;
        let html = format!("<html><head>{title}{style}</head><body><p>abcdefg</p></body></html>");

        let out = hyphenator.hyphenate_html(&html);
        assert!(out.contains(style), "{out}");
        assert!(out.contains(title), "{out}");
        assert!(out.contains("<p>abc\u{ad}def\u{ad}g</p>"));
    }

    #[test]
    fn test_visible_quotes_are_not_escaped() {
        let hyphenator = Hyphenator::new("de", &OnlyGerman);
        let out = hyphenator.hyphenate_html(r#"<p>"abcdefg" &amp; it's &lt;x&gt;</p>"#);
        assert_eq!(out, "<p>\"abc\u{ad}def\u{ad}g\" &amp; it's &lt;x&gt;</p>");
    }

    #[test]
    fn test_script_with_bare_angle_bracket_does_not_hide_body() {
        let hyphenator = Hyphenator::new("de", &OnlyGerman);
        let script = "<script>if (a<b) { go(); }</script>";
        let html = format!("<html><body>{script}<p>abcdefg</p></body></html>");

        let out = hyphenator.hyphenate_html(&html);
        assert!(out.contains(script));
        assert!(out.contains("<p>abc\u{ad}def\u{ad}g</p>"), "{out}");
    }

    #[test]
    fn test_unclosed_head_does_not_hide_body() {
        let hyphenator = Hyphenator::new("de", &OnlyGerman);
        let html = "<html><head><title>t</title><body><p>abcdefg</p></body></html>";
        let out = hyphenator.hyphenate_html(html);
        assert!(out.contains("<p>abc\u{ad}def\u{ad}g</p>"), "{out}");
    }
}
