use quick_xml::Reader;
use quick_xml::events::Event;
use std::collections::HashMap;
use std::io::{Read, Seek};
use std::path::Path;
use zip::ZipArchive;

use crate::book::{Book, Metadata, NavPoint};
use crate::error::{Error, Result};
use crate::markup::{local_name, resolve_entity};
use crate::util::{join_href, parent_dir};

/// Parsed OPF content
struct OpfData {
    metadata: Metadata,
    /// Maps manifest id -> (href, media_type), hrefs relative to the OPF directory
    manifest: HashMap<String, (String, String)>,
    spine_ids: Vec<String>,
    ncx_href: Option<String>,
    nav_href: Option<String>,
}

/// Read an EPUB file from disk into a [`Book`].
///
/// Supports EPUB 2 and EPUB 3. Extracts metadata, spine, navigation tree
/// (NCX, or the EPUB 3 nav document when there is no NCX) and all resources.
///
/// # Example
///
/// ```no_run
/// use xtcpress::read_epub;
///
/// let book = read_epub("path/to/book.epub")?;
/// println!("Title: {}", book.metadata.title);
/// # Ok::<(), xtcpress::Error>(())
/// ```
pub fn read_epub<P: AsRef<Path>>(path: P) -> Result<Book> {
    let file = std::fs::File::open(path)?;
    read_epub_from_reader(file)
}

/// Read an EPUB from any [`Read`] + [`Seek`] source.
pub fn read_epub_from_reader<R: Read + Seek>(reader: R) -> Result<Book> {
    let mut archive = ZipArchive::new(reader)?;

    let opf_path = find_opf_path(&mut archive)?;
    let opf_dir = parent_dir(&opf_path).to_string();

    let opf_content = read_archive_file(&mut archive, &opf_path)?;
    let OpfData {
        metadata,
        manifest,
        spine_ids,
        ncx_href,
        nav_href,
    } = parse_opf(&opf_content)?;

    let mut book = Book::new();
    book.metadata = metadata;

    for (href, media_type) in manifest.values() {
        let full_path = join_href(&opf_dir, href);
        match read_archive_file_bytes(&mut archive, &full_path) {
            Ok(data) => book.add_resource(href.clone(), data, media_type.clone()),
            Err(e) => log::warn!("Skipping manifest item {href}: {e}"),
        }
    }

    for id in spine_ids {
        if let Some((href, media_type)) = manifest.get(&id) {
            book.add_spine_item(&id, href.clone(), media_type.clone());
        }
    }

    // Navigation hrefs are relative to the navigation document; rebase them
    // onto the OPF directory so they match manifest hrefs.
    if let Some(ncx_href) = ncx_href {
        let ncx_path = join_href(&opf_dir, &ncx_href);
        if let Ok(ncx_content) = read_archive_file(&mut archive, &ncx_path) {
            book.toc = parse_ncx(&ncx_content)?;
            rebase_nav(&mut book.toc, parent_dir(&ncx_href));
        }
    }

    if book.toc.is_empty()
        && let Some(nav_href) = nav_href
    {
        let nav_path = join_href(&opf_dir, &nav_href);
        if let Ok(nav_content) = read_archive_file(&mut archive, &nav_path) {
            book.toc = parse_nav(&nav_content)?;
            rebase_nav(&mut book.toc, parent_dir(&nav_href));
        }
    }

    log::debug!(
        "Read EPUB '{}': {} spine items, {} TOC entries, {} resources",
        book.metadata.title,
        book.spine.len(),
        book.toc.len(),
        book.resources.len()
    );

    Ok(book)
}

fn rebase_nav(points: &mut [NavPoint], base_dir: &str) {
    if base_dir.is_empty() {
        return;
    }
    for point in points {
        point.href = join_href(base_dir, &point.href);
        rebase_nav(&mut point.children, base_dir);
    }
}

fn find_opf_path<R: Read + Seek>(archive: &mut ZipArchive<R>) -> Result<String> {
    let container = read_archive_file(archive, "META-INF/container.xml")?;

    let mut reader = Reader::from_str(&container);
    reader.config_mut().trim_text(true);

    loop {
        match reader.read_event() {
            Ok(Event::Empty(e)) | Ok(Event::Start(e)) if e.name().as_ref() == b"rootfile" => {
                for attr in e.attributes().flatten() {
                    if attr.key.as_ref() == b"full-path" {
                        return Ok(String::from_utf8(attr.value.to_vec())?);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Xml(e)),
            _ => {}
        }
    }

    Err(Error::InvalidEpub(
        "No rootfile found in container.xml".into(),
    ))
}

fn parse_opf(content: &str) -> Result<OpfData> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    let mut metadata = Metadata::default();
    let mut manifest: HashMap<String, (String, String)> = HashMap::new();
    let mut spine_ids: Vec<String> = Vec::new();
    let mut toc_id: Option<String> = None;
    let mut nav_href: Option<String> = None;

    let mut in_metadata = false;
    let mut current_element: Option<String> = None;
    let mut buf_text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.name();
                let local_name = local_name(name.as_ref());

                match local_name {
                    b"metadata" => in_metadata = true,
                    b"title" | b"creator" | b"language" | b"identifier" | b"publisher"
                    | b"description" => {
                        if in_metadata {
                            current_element = Some(String::from_utf8_lossy(local_name).to_string());
                            buf_text.clear();
                        }
                    }
                    b"spine" => {
                        for attr in e.attributes().flatten() {
                            if attr.key.as_ref() == b"toc" {
                                toc_id = Some(String::from_utf8(attr.value.to_vec())?);
                            }
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(e)) => {
                let name = e.name();
                let local_name = local_name(name.as_ref());

                match local_name {
                    b"item" => {
                        let mut id = String::new();
                        let mut href = String::new();
                        let mut media_type = String::new();
                        let mut is_nav = false;

                        for attr in e.attributes().flatten() {
                            match attr.key.as_ref() {
                                b"id" => id = String::from_utf8(attr.value.to_vec())?,
                                b"href" => href = String::from_utf8(attr.value.to_vec())?,
                                b"media-type" => {
                                    media_type = String::from_utf8(attr.value.to_vec())?
                                }
                                b"properties" => {
                                    let props = String::from_utf8(attr.value.to_vec())?;
                                    is_nav = props.split_ascii_whitespace().any(|p| p == "nav");
                                }
                                _ => {}
                            }
                        }

                        let href = percent_encoding::percent_decode_str(&href)
                            .decode_utf8_lossy()
                            .into_owned();
                        if is_nav {
                            nav_href = Some(href.clone());
                        }
                        if !id.is_empty() {
                            manifest.insert(id, (href, media_type));
                        }
                    }
                    b"itemref" => {
                        let mut idref = None;
                        let mut linear = true;
                        for attr in e.attributes().flatten() {
                            match attr.key.as_ref() {
                                b"idref" => idref = Some(String::from_utf8(attr.value.to_vec())?),
                                b"linear" => linear = attr.value.as_ref() != b"no",
                                _ => {}
                            }
                        }
                        if let Some(idref) = idref
                            && linear
                        {
                            spine_ids.push(idref);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(e)) => {
                if current_element.is_some() {
                    buf_text.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if current_element.is_some()
                    && let Some(ch) = resolve_entity(&String::from_utf8_lossy(e.as_ref()))
                {
                    buf_text.push(ch);
                }
            }
            Ok(Event::End(e)) => {
                let name = e.name();
                let local_name = local_name(name.as_ref());

                if local_name == b"metadata" {
                    in_metadata = false;
                }

                if let Some(ref elem) = current_element {
                    let text = buf_text.trim().to_string();
                    match elem.as_str() {
                        "title" if metadata.title.is_empty() => metadata.title = text,
                        "creator" => metadata.authors.push(text),
                        "language" if metadata.language.is_empty() => metadata.language = text,
                        "identifier" if metadata.identifier.is_empty() => {
                            metadata.identifier = text
                        }
                        "publisher" => metadata.publisher = Some(text),
                        "description" => metadata.description = Some(text),
                        _ => {}
                    }
                    current_element = None;
                    buf_text.clear();
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Xml(e)),
            _ => {}
        }
    }

    let ncx_href = toc_id
        .and_then(|id| manifest.get(&id))
        .map(|(href, _)| href.clone());

    Ok(OpfData {
        metadata,
        manifest,
        spine_ids,
        ncx_href,
        nav_href,
    })
}

fn parse_ncx(content: &str) -> Result<Vec<NavPoint>> {
    let mut reader = Reader::from_str(content);
    reader.config_mut().trim_text(true);

    // State for each navPoint level, saved and restored around nested navPoints
    struct NavPointState {
        children: Vec<NavPoint>,
        text: Option<String>,
        src: Option<String>,
        play_order: Option<usize>,
    }

    let mut stack: Vec<NavPointState> = vec![NavPointState {
        children: Vec::new(),
        text: None,
        src: None,
        play_order: None,
    }];
    let mut in_text = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match local_name(e.name().as_ref()) {
                b"navPoint" => {
                    let mut play_order = None;
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"playOrder"
                            && let Ok(order_str) = String::from_utf8(attr.value.to_vec())
                        {
                            play_order = order_str.parse().ok();
                        }
                    }
                    stack.push(NavPointState {
                        children: Vec::new(),
                        text: None,
                        src: None,
                        play_order,
                    });
                }
                b"text" => in_text = true,
                _ => {}
            },
            Ok(Event::Empty(e)) => {
                if local_name(e.name().as_ref()) == b"content" {
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"src"
                            && let Some(state) = stack.last_mut()
                        {
                            state.src = Some(String::from_utf8(attr.value.to_vec())?);
                        }
                    }
                }
            }
            Ok(Event::Text(e)) => {
                if in_text && let Some(state) = stack.last_mut() {
                    let raw = String::from_utf8_lossy(e.as_ref());
                    state.text.get_or_insert_with(String::new).push_str(&raw);
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if in_text
                    && let Some(state) = stack.last_mut()
                    && let Some(ch) = resolve_entity(&String::from_utf8_lossy(e.as_ref()))
                {
                    state.text.get_or_insert_with(String::new).push(ch);
                }
            }
            Ok(Event::End(e)) => match local_name(e.name().as_ref()) {
                b"text" => in_text = false,
                b"navPoint" => {
                    if let Some(state) = stack.pop()
                        && let (Some(text), Some(src)) = (state.text, state.src)
                    {
                        let mut entry = NavPoint::new(text, src);
                        entry.children = state.children;
                        entry.play_order = state.play_order;

                        if let Some(parent) = stack.last_mut() {
                            parent.children.push(entry);
                        }
                    }
                }
                _ => {}
            },
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Xml(e)),
            _ => {}
        }
    }

    let mut entries = stack.pop().map(|s| s.children).unwrap_or_default();
    if entries.iter().all(|e| e.play_order.is_some()) {
        entries.sort();
    }
    Ok(entries)
}

/// Parse the `<nav epub:type="toc">` list of an EPUB 3 navigation document.
fn parse_nav(content: &str) -> Result<Vec<NavPoint>> {
    let mut reader = crate::markup::content_reader(content);

    // One frame per open <ol>; the pending entry is the <li> being filled.
    struct ListFrame {
        items: Vec<NavPoint>,
        pending: Option<NavPoint>,
    }

    let mut in_toc_nav = false;
    let mut nav_depth = 0usize;
    let mut lists: Vec<ListFrame> = Vec::new();
    // (is_link, href, text) for the <a> or bare <span> label being read
    let mut anchor: Option<(bool, String, String)> = None;
    let mut result = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.name();
                match local_name(name.as_ref()) {
                    b"nav" => {
                        if in_toc_nav {
                            nav_depth += 1;
                        } else {
                            let is_toc = e.attributes().flatten().any(|a| {
                                local_name(a.key.as_ref()) == b"type"
                                    && a.value.split(|b| b.is_ascii_whitespace()).any(|t| t == b"toc")
                            });
                            if is_toc {
                                in_toc_nav = true;
                                nav_depth = 0;
                            }
                        }
                    }
                    b"ol" if in_toc_nav => lists.push(ListFrame {
                        items: Vec::new(),
                        pending: None,
                    }),
                    b"li" if in_toc_nav => {
                        if let Some(frame) = lists.last_mut() {
                            frame.pending = Some(NavPoint::new("", ""));
                        }
                    }
                    b"a" if in_toc_nav => {
                        let href = e
                            .attributes()
                            .flatten()
                            .find(|a| a.key.as_ref() == b"href")
                            .map(|a| String::from_utf8_lossy(&a.value).into_owned())
                            .unwrap_or_default();
                        anchor = Some((true, href, String::new()));
                    }
                    b"span" if in_toc_nav && anchor.is_none() => {
                        anchor = Some((false, String::new(), String::new()));
                    }
                    _ => {}
                }
            }
            Ok(Event::Text(e)) => {
                if let Some((_, _, text)) = anchor.as_mut() {
                    text.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Ok(Event::GeneralRef(e)) => {
                if let Some((_, _, text)) = anchor.as_mut()
                    && let Some(ch) = resolve_entity(&String::from_utf8_lossy(e.as_ref()))
                {
                    text.push(ch);
                }
            }
            Ok(Event::End(e)) => {
                let name = e.name();
                match local_name(name.as_ref()) {
                    tag @ (b"a" | b"span") => {
                        let closes_label =
                            matches!(anchor, Some((is_link, _, _)) if is_link == (tag == b"a"));
                        if closes_label
                            && let Some((_, href, text)) = anchor.take()
                            && let Some(pending) =
                                lists.last_mut().and_then(|f| f.pending.as_mut())
                        {
                            pending.title = crate::util::collapse_whitespace(&text);
                            pending.href = href;
                        }
                    }
                    b"li" if in_toc_nav => {
                        if let Some(frame) = lists.last_mut()
                            && let Some(point) = frame.pending.take()
                        {
                            frame.items.push(point);
                        }
                    }
                    b"ol" if in_toc_nav => {
                        if let Some(frame) = lists.pop() {
                            match lists.last_mut().and_then(|f| f.pending.as_mut()) {
                                Some(parent) => parent.children.extend(frame.items),
                                None => result.extend(frame.items),
                            }
                        }
                    }
                    b"nav" if in_toc_nav => {
                        if nav_depth == 0 {
                            break;
                        }
                        nav_depth -= 1;
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(Error::Xml(e)),
            _ => {}
        }
    }

    // Headings without links (`<span>` only) carry no target of their own.
    fn prune(points: Vec<NavPoint>) -> Vec<NavPoint> {
        let mut out = Vec::new();
        for mut point in points {
            point.children = prune(std::mem::take(&mut point.children));
            if point.href.is_empty() {
                out.extend(point.children);
            } else {
                out.push(point);
            }
        }
        out
    }

    Ok(prune(result))
}

fn read_archive_file<R: Read + Seek>(archive: &mut ZipArchive<R>, path: &str) -> Result<String> {
    let bytes = read_archive_file_bytes(archive, path)?;
    Ok(crate::util::decode_text(&bytes, None).into_owned())
}

fn read_archive_file_bytes<R: Read + Seek>(
    archive: &mut ZipArchive<R>,
    path: &str,
) -> Result<Vec<u8>> {
    match archive.by_name(path) {
        Ok(mut file) => {
            let mut contents = Vec::new();
            file.read_to_end(&mut contents)?;
            return Ok(contents);
        }
        Err(zip::result::ZipError::FileNotFound) => {}
        Err(e) => return Err(e.into()),
    }

    // Fallback: the archive stores the percent-encoded form of the name
    let stored = archive
        .file_names()
        .find(|name| percent_encoding::percent_decode_str(name).decode_utf8_lossy() == path)
        .map(str::to_string)
        .ok_or(zip::result::ZipError::FileNotFound)?;

    let mut file = archive.by_name(&stored)?;
    let mut contents = Vec::new();
    file.read_to_end(&mut contents)?;
    Ok(contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ncx_nested_and_entities() {
        let ncx = r#"<?xml version="1.0"?>
<ncx xmlns="http://www.daisy.org/z3986/2005/ncx/">
  <navMap>
    <navPoint id="p2" playOrder="2">
      <navLabel><text>Tom &amp; Jerry</text></navLabel>
      <content src="ch2.xhtml"/>
    </navPoint>
    <navPoint id="p1" playOrder="1">
      <navLabel><text>Opening</text></navLabel>
      <content src="ch1.xhtml#start"/>
      <navPoint id="p1a" playOrder="3">
        <navLabel><text>Inner</text></navLabel>
        <content src="ch1.xhtml#inner"/>
      </navPoint>
    </navPoint>
  </navMap>
</ncx>"#;

        let toc = parse_ncx(ncx).unwrap();
        assert_eq!(
            toc,
            [
                NavPoint::new("Opening", "ch1.xhtml#start")
                    .with_play_order(1)
                    .with_child(NavPoint::new("Inner", "ch1.xhtml#inner").with_play_order(3)),
                NavPoint::new("Tom & Jerry", "ch2.xhtml").with_play_order(2),
            ]
        );
    }

    #[test]
    fn test_parse_nav_document() {
        let nav = r#"<?xml version="1.0" encoding="UTF-8"?>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops">
<body>
  <nav epub:type="landmarks"><ol><li><a href="cover.xhtml">Cover</a></li></ol></nav>
  <nav epub:type="toc">
    <ol>
      <li><a href="text/ch1.xhtml">Chapter
        One</a></li>
      <li><span>Part Two</span>
        <ol><li><a href="text/ch2.xhtml#s">Chapter Two</a></li></ol>
      </li>
    </ol>
  </nav>
</body>
</html>"#;

        let toc = parse_nav(nav).unwrap();
        let titles: Vec<_> = toc.iter().map(|p| p.title.as_str()).collect();
        assert_eq!(titles, ["Chapter One", "Chapter Two"]);
        assert_eq!(toc[1].href, "text/ch2.xhtml#s");
    }

    #[test]
    fn test_parse_opf_skips_non_linear_items() {
        let opf = r#"<?xml version="1.0"?>
<package xmlns="http://www.idpf.org/2007/opf" version="3.0">
  <metadata xmlns:dc="http://purl.org/dc/elements/1.1/">
    <dc:title>Sample</dc:title>
    <dc:creator>Jeanne Auteur</dc:creator>
    <dc:identifier id="uid">urn:isbn:9780000000000</dc:identifier>
    <dc:identifier>second-id</dc:identifier>
    <dc:language>fr</dc:language>
  </metadata>
  <manifest>
    <item id="nav" href="nav.xhtml" media-type="application/xhtml+xml" properties="nav"/>
    <item id="c1" href="ch%201.xhtml" media-type="application/xhtml+xml"/>
    <item id="notes" href="notes.xhtml" media-type="application/xhtml+xml"/>
  </manifest>
  <spine>
    <itemref idref="c1"/>
    <itemref idref="notes" linear="no"/>
  </spine>
</package>"#;

        let data = parse_opf(opf).unwrap();
        assert_eq!(
            data.metadata,
            Metadata::new("Sample")
                .with_author("Jeanne Auteur")
                .with_language("fr")
                .with_identifier("urn:isbn:9780000000000")
        );
        assert_eq!(data.spine_ids, ["c1"]);
        assert_eq!(data.nav_href.as_deref(), Some("nav.xhtml"));
        assert_eq!(data.manifest["c1"].0, "ch 1.xhtml");
    }
}
