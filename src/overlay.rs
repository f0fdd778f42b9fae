//! Table-of-contents pages and the navigation footer drawn on every page.

use embedded_graphics::pixelcolor::{Gray8, GrayColor};
use embedded_graphics::prelude::*;
use embedded_graphics::primitives::{Line, PrimitiveStyle, PrimitiveStyleBuilder, Rectangle};
use image::GrayImage;
use image::imageops::{self, FilterType};

use crate::config::ScreenGeometry;
use crate::paginate::{PaginationPlan, TocEntry};
use crate::raster::{BLACK, GrayCanvas, Monochrome, ThresholdMode};
use crate::typeface::{FontSource, Typeface};

pub const ELLIPSIS: char = '\u{2026}';
pub const TOC_HEADER: &str = "TABLE OF CONTENTS";

const TOC_MARGIN: i32 = 40;
const TOC_COLUMN_GAP: i32 = 20;
const TOC_ROW_HEIGHT: i32 = 35;

const FOOTER_FACE_PX: u32 = 16;
const TOC_FACE_PX: u32 = 20;
const TOC_HEADER_FACE_PX: u32 = 24;

/// Footer title budget in characters, `"| "` prefix included.
pub const FOOTER_TITLE_CHARS: usize = 35;

/// Longest character prefix of `text` that, with trailing whitespace removed
/// and an ellipsis appended, measures at most `max_width`. Text that already
/// fits is returned unchanged.
pub fn truncate_to_width(face: &Typeface, text: &str, max_width: i64) -> String {
    if i64::from(face.measure(text)) <= max_width {
        return text.to_string();
    }

    let chars: Vec<char> = text.chars().collect();
    let candidate = |n: usize| {
        let mut s: String = chars[..n].iter().collect::<String>().trim_end().to_string();
        s.push(ELLIPSIS);
        s
    };
    let fits = |n: usize| i64::from(face.measure(&candidate(n))) <= max_width;

    // First prefix length that no longer fits.
    let (mut lo, mut hi) = (0, chars.len());
    while lo < hi {
        let mid = (lo + hi) / 2;
        if fits(mid) {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }

    match lo.checked_sub(1) {
        Some(n) => candidate(n),
        None => ELLIPSIS.to_string(),
    }
}

/// Footer title: `"| title"` cut to [`FOOTER_TITLE_CHARS`] characters.
pub fn footer_title(title: &str) -> String {
    format!("| {title}").chars().take(FOOTER_TITLE_CHARS).collect()
}

/// Draws TOC pages and page footers for one screen geometry.
#[derive(Debug, Clone)]
pub struct OverlayRenderer {
    screen: ScreenGeometry,
    footer_face: Typeface,
    toc_face: Typeface,
    header_face: Typeface,
}

impl OverlayRenderer {
    pub fn new(screen: ScreenGeometry, fonts: &FontSource) -> Self {
        Self {
            screen,
            footer_face: fonts.face(FOOTER_FACE_PX),
            toc_face: fonts.face(TOC_FACE_PX),
            header_face: fonts.face(TOC_HEADER_FACE_PX),
        }
    }

    pub fn screen(&self) -> ScreenGeometry {
        self.screen
    }

    fn width(&self) -> i32 {
        self.screen.width as i32
    }

    fn height(&self) -> i32 {
        self.screen.height as i32
    }

    /// One white page listing `entries` with dot leaders and page numbers.
    pub fn render_toc_page(&self, entries: &[TocEntry]) -> GrayCanvas {
        let mut canvas = GrayCanvas::new(self.screen.width, self.screen.height);
        let width = self.width();

        let header_y = 40 + self.screen.top_padding as i32;
        let header_w = self.header_face.measure(TOC_HEADER) as i32;
        self.header_face.draw(
            &mut canvas,
            TOC_HEADER,
            Point::new((width - header_w).div_euclid(2), header_y),
            BLACK,
        );

        let rule_y = header_y + 35;
        let Ok(()) = Line::new(
            Point::new(TOC_MARGIN, rule_y),
            Point::new(width - TOC_MARGIN, rule_y),
        )
        .into_styled(PrimitiveStyle::with_stroke(Gray8::BLACK, 1))
        .draw(&mut canvas);

        let dot_w = self.toc_face.measure(".") as i32;
        let mut y = rule_y + 25;
        for entry in entries {
            let number = entry.start_page.to_string();
            let number_w = self.toc_face.measure(&number) as i32;
            let max_title_w = width - 2 * TOC_MARGIN - number_w - TOC_COLUMN_GAP;

            let title = truncate_to_width(&self.toc_face, &entry.title, i64::from(max_title_w));
            self.toc_face
                .draw(&mut canvas, &title, Point::new(TOC_MARGIN, y), BLACK);

            let title_end = TOC_MARGIN + self.toc_face.measure(&title) as i32 + 5;
            let dots_end = width - TOC_MARGIN - number_w - 10;
            if dots_end > title_end && dot_w > 0 {
                let leader = ".".repeat(((dots_end - title_end) / dot_w) as usize);
                self.toc_face
                    .draw(&mut canvas, &leader, Point::new(title_end, y), BLACK);
            }

            self.toc_face.draw(
                &mut canvas,
                &number,
                Point::new(width - TOC_MARGIN - number_w, y),
                BLACK,
            );
            y += TOC_ROW_HEIGHT;
        }

        canvas
    }

    /// All TOC pages of `plan`, in order. Empty when the TOC is disabled.
    pub fn render_toc_pages(&self, plan: &PaginationPlan) -> Vec<GrayCanvas> {
        plan.toc_chunks()
            .map(|chunk| self.render_toc_page(chunk))
            .collect()
    }

    /// Place a rendered content page below the top padding on a white
    /// screen-sized page and reduce it to black and white.
    ///
    /// Pages not already `width x content_height` are resampled to fit.
    pub fn compose_content_page(
        &self,
        rendered: &GrayImage,
        mode: ThresholdMode,
        monochrome: &dyn Monochrome,
    ) -> GrayCanvas {
        let content_height = self.screen.content_height();
        let mut canvas = GrayCanvas::new(self.screen.width, self.screen.height);

        if content_height > 0 {
            if rendered.dimensions() == (self.screen.width, content_height) {
                canvas.paste(rendered, 0, i64::from(self.screen.top_padding));
            } else {
                let resized = imageops::resize(
                    rendered,
                    self.screen.width,
                    content_height,
                    FilterType::Lanczos3,
                );
                canvas.paste(&resized, 0, i64::from(self.screen.top_padding));
            }
        }

        GrayCanvas::from_image(monochrome.convert(canvas.image(), mode))
    }

    /// Progress track, chapter ticks, page counter and running chapter title
    /// for 1-based global `page`.
    pub fn draw_footer(&self, canvas: &mut GrayCanvas, page: usize, plan: &PaginationPlan) {
        let (width, height) = (self.width(), self.height());
        let total = plan.total_pages();
        let track = i64::from(width - 20).max(0);
        let bar_top = height - 20;
        let bar_bottom = bar_top + 4;

        let track_style = PrimitiveStyleBuilder::new()
            .fill_color(Gray8::WHITE)
            .stroke_color(Gray8::BLACK)
            .stroke_width(1)
            .build();
        let Ok(()) = Rectangle::with_corners(
            Point::new(10, bar_top),
            Point::new(width - 10, bar_bottom),
        )
        .into_styled(track_style)
        .draw(canvas);

        if total > 0 {
            let total = total as i64;
            for start in plan.start_pages() {
                let x = (start as i64 - 1) * track / total + 10;
                let Ok(()) = Line::new(Point::new(x as i32, bar_top - 4), Point::new(x as i32, bar_top))
                    .into_styled(PrimitiveStyle::with_stroke(Gray8::BLACK, 1))
                    .draw(canvas);
            }

            let filled = (page as i64 * track / total) as i32;
            let Ok(()) = Rectangle::with_corners(
                Point::new(10, bar_top),
                Point::new(10 + filled, bar_bottom),
            )
            .into_styled(PrimitiveStyle::with_fill(Gray8::BLACK))
            .draw(canvas);
        }

        let text_y = height - 45;
        self.footer_face.draw(
            canvas,
            &format!("{page}/{total}"),
            Point::new(15, text_y),
            BLACK,
        );
        if let Some(title) = plan.active_title(page).filter(|t| !t.is_empty()) {
            self.footer_face
                .draw(canvas, &footer_title(title), Point::new(100, text_y), BLACK);
        }
    }
}
