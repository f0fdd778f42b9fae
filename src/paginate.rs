//! Global page numbering: table-of-contents layout, chapter start pages and
//! the map from global page index back to rendered chapter pages.

use crate::chapters::Chapter;

/// Height of a table-of-contents row in pixels.
pub const TOC_ROW_HEIGHT: i64 = 35;

/// Height reserved above the first row, before the top padding is added.
pub const TOC_HEADER_BASE: i64 = 100;

/// Screen geometry that decides how many entries fit on one TOC page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TocGeometry {
    pub screen_height: u32,
    pub top_padding: u32,
    pub bottom_padding: u32,
}

impl TocGeometry {
    pub fn new(screen_height: u32, top_padding: u32, bottom_padding: u32) -> Self {
        Self {
            screen_height,
            top_padding,
            bottom_padding,
        }
    }

    pub fn header_height(&self) -> i64 {
        TOC_HEADER_BASE + i64::from(self.top_padding)
    }

    /// Rows per TOC page; at least one even when the padding eats the screen.
    pub fn items_per_page(&self) -> usize {
        let available =
            i64::from(self.screen_height) - i64::from(self.bottom_padding) - self.header_height();
        usize::try_from(available.div_euclid(TOC_ROW_HEIGHT))
            .unwrap_or(0)
            .max(1)
    }
}

/// Page offset of each chapter's first page within the content pages.
pub fn chapter_start_offsets(page_counts: &[usize]) -> Vec<usize> {
    page_counts
        .iter()
        .scan(0usize, |running, &count| {
            let start = *running;
            *running += count;
            Some(start)
        })
        .collect()
}

/// Number of TOC pages needed for `chapters` entries.
pub fn toc_page_count(chapters: usize, items_per_page: usize) -> usize {
    chapters.div_ceil(items_per_page.max(1))
}

/// One table-of-contents line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TocEntry {
    pub title: String,
    /// 1-based global page number.
    pub start_page: usize,
}

/// Where a content page comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageMapEntry {
    pub chapter_index: usize,
    pub page_within_chapter: usize,
}

/// What occupies a global page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageSlot {
    /// The i-th table-of-contents page.
    Toc(usize),
    Content(PageMapEntry),
}

/// Immutable page layout of a whole book, computed once all chapters are
/// rendered and consulted while pages are composed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaginationPlan {
    entries: Vec<TocEntry>,
    page_map: Vec<PageMapEntry>,
    items_per_page: usize,
    toc_pages: usize,
}

impl PaginationPlan {
    /// Lay out `chapters` in order. Without a TOC no TOC pages are reserved,
    /// but the entries still drive the footer's ticks and running title.
    pub fn new(chapters: &[Chapter], geometry: TocGeometry, include_toc: bool) -> Self {
        let counts: Vec<usize> = chapters.iter().map(|c| c.rendered_page_count).collect();
        let offsets = chapter_start_offsets(&counts);

        let items_per_page = geometry.items_per_page();
        let toc_pages = if include_toc {
            toc_page_count(chapters.len(), items_per_page)
        } else {
            0
        };

        let entries = chapters
            .iter()
            .zip(&offsets)
            .map(|(chapter, offset)| TocEntry {
                title: chapter.title.clone(),
                start_page: offset + toc_pages + 1,
            })
            .collect();

        let page_map = counts
            .iter()
            .enumerate()
            .flat_map(|(chapter_index, &count)| {
                (0..count).map(move |page_within_chapter| PageMapEntry {
                    chapter_index,
                    page_within_chapter,
                })
            })
            .collect();

        Self {
            entries,
            page_map,
            items_per_page,
            toc_pages,
        }
    }

    pub fn toc_entries(&self) -> &[TocEntry] {
        &self.entries
    }

    pub fn page_map(&self) -> &[PageMapEntry] {
        &self.page_map
    }

    pub fn items_per_page(&self) -> usize {
        self.items_per_page
    }

    pub fn toc_page_count(&self) -> usize {
        self.toc_pages
    }

    pub fn content_page_count(&self) -> usize {
        self.page_map.len()
    }

    pub fn total_pages(&self) -> usize {
        self.toc_pages + self.page_map.len()
    }

    /// Start pages in chapter order.
    pub fn start_pages(&self) -> impl Iterator<Item = usize> + '_ {
        self.entries.iter().map(|e| e.start_page)
    }

    /// TOC entries grouped per TOC page. Empty when the TOC is disabled.
    pub fn toc_chunks(&self) -> impl Iterator<Item = &[TocEntry]> {
        let entries: &[TocEntry] = if self.toc_pages == 0 { &[] } else { &self.entries };
        entries.chunks(self.items_per_page)
    }

    /// What sits at 0-based global page `index`.
    pub fn locate(&self, index: usize) -> Option<PageSlot> {
        if index < self.toc_pages {
            return Some(PageSlot::Toc(index));
        }
        self.page_map
            .get(index - self.toc_pages)
            .copied()
            .map(PageSlot::Content)
    }

    /// Chapter shown on 1-based global page `page`: the last entry whose
    /// start page is not after it.
    pub fn active_chapter(&self, page: usize) -> Option<usize> {
        self.entries
            .partition_point(|e| e.start_page <= page)
            .checked_sub(1)
    }

    pub fn active_title(&self, page: usize) -> Option<&str> {
        self.active_chapter(page)
            .map(|i| self.entries[i].title.as_str())
    }
}
