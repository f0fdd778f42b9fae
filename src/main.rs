//! xtcpress - EPUB to XTC converter for e-ink readers

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::Parser;

use xtcpress::{
    ConvertConfig, Converter, Result, Stage, TextAlign, read_epub, read_xtc, select_book_chapters,
};

#[derive(Parser)]
#[command(name = "xtcpress")]
#[command(version, about = "Convert EPUB books to XTC page containers", long_about = None)]
#[command(after_help = "EXAMPLES:
    xtcpress book.epub book.xtc                 Convert with default settings
    xtcpress book.epub book.xtc --font-size 18  Smaller text
    xtcpress -i book.epub                       Show metadata and chapters
    xtcpress -i book.xtc                        Show container summary
    xtcpress book.xtc page.png --page 3         Export page 3 as PNG")]
struct Cli {
    /// Input file (EPUB, or XTC with --info / PNG export)
    #[arg(value_name = "INPUT")]
    input: PathBuf,

    /// Output file (XTC, or PNG when the input is XTC)
    #[arg(value_name = "OUTPUT", required_unless_present = "info")]
    output: Option<PathBuf>,

    /// Show book or container information without converting
    #[arg(short, long)]
    info: bool,

    /// Page to export when converting XTC to PNG (1-based)
    #[arg(long, default_value_t = 1)]
    page: usize,

    /// JSON file with conversion settings; flags override its values
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Screen width in pixels
    #[arg(long)]
    width: Option<u32>,

    /// Screen height in pixels
    #[arg(long)]
    height: Option<u32>,

    /// Body text size in points
    #[arg(long)]
    font_size: Option<u32>,

    /// Page margin in pixels
    #[arg(long)]
    margin: Option<u32>,

    #[arg(long)]
    line_height: Option<f32>,

    /// CSS font weight (100-900)
    #[arg(long)]
    font_weight: Option<u32>,

    /// Blank rows above the page content
    #[arg(long)]
    top_padding: Option<u32>,

    /// Rows reserved below the content for the footer
    #[arg(long)]
    bottom_padding: Option<u32>,

    #[arg(long, value_enum)]
    align: Option<TextAlign>,

    /// TrueType/OpenType font file
    #[arg(long, value_name = "PATH")]
    font: Option<PathBuf>,

    /// Leave out the generated table of contents
    #[arg(long)]
    no_toc: bool,

    /// Language for hyphenation, overriding the book's
    #[arg(long)]
    language: Option<String>,

    /// Suppress output messages
    #[arg(short, long)]
    quiet: bool,

    /// Log each conversion stage
    #[arg(short, long, conflicts_with = "quiet")]
    verbose: bool,
}

impl Cli {
    /// Defaults, then the config file, then explicit flags.
    fn convert_config(&self) -> Result<ConvertConfig> {
        let mut config = match &self.config {
            Some(path) => ConvertConfig::from_json_file(path)?,
            None => ConvertConfig::default(),
        };

        if let Some(width) = self.width {
            config.width = width;
        }
        if let Some(height) = self.height {
            config.height = height;
        }
        if let Some(font_size) = self.font_size {
            config.font_size = font_size;
        }
        if let Some(margin) = self.margin {
            config.margin = margin;
        }
        if let Some(line_height) = self.line_height {
            config.line_height = line_height;
        }
        if let Some(font_weight) = self.font_weight {
            config.font_weight = font_weight;
        }
        if let Some(top) = self.top_padding {
            config.top_padding = top;
        }
        if let Some(bottom) = self.bottom_padding {
            config.bottom_padding = bottom;
        }
        if let Some(align) = self.align {
            config.text_align = align;
        }
        if let Some(font) = &self.font {
            config.font_path = Some(font.clone());
        }
        if self.no_toc {
            config.include_toc = false;
        }
        if let Some(language) = &self.language {
            config.language = Some(language.clone());
        }

        config.validate()?;
        Ok(config)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { "info" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let result = if cli.info {
        show_info(&cli.input)
    } else {
        match cli.output.as_deref() {
            Some(output) if is_xtc(&cli.input) => export_page(&cli.input, output, cli.page, cli.quiet),
            Some(output) => convert(&cli, output),
            None => show_info(&cli.input),
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn is_xtc(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("xtc"))
}

fn show_info(path: &Path) -> Result<()> {
    if is_xtc(path) {
        return show_container_info(path);
    }

    let book = read_epub(path)?;
    let meta = &book.metadata;
    println!("File: {}", path.display());
    println!("Title: {}", meta.title);
    if !meta.authors.is_empty() {
        println!("Authors: {}", meta.authors.join(", "));
    }
    if !meta.language.is_empty() {
        println!("Language: {}", meta.language);
    }
    if let Some(ref publisher) = meta.publisher {
        println!("Publisher: {publisher}");
    }
    if let Some(ref desc) = meta.description {
        let desc = desc.trim();
        match desc.char_indices().nth(200) {
            Some((cut, _)) => println!("Description: {}...", &desc[..cut]),
            None => println!("Description: {desc}"),
        }
    }
    println!("Spine items: {}", book.spine.len());
    println!("TOC entries: {}", book.toc.len());
    println!("Resources: {}", book.resources.len());

    let chapters = select_book_chapters(&book);
    println!("Chapters: {}", chapters.len());
    for (i, chapter) in chapters.iter().enumerate() {
        let image = if chapter.has_embedded_image { " [image]" } else { "" };
        println!("  {:>3}. {}{image}", i + 1, chapter.title);
    }

    Ok(())
}

fn show_container_info(path: &Path) -> Result<()> {
    let file = read_xtc(path)?;
    let header = file.header();
    println!("File: {}", path.display());
    println!(
        "Version: {}.{}",
        header.version >> 8,
        header.version & 0xFF
    );
    println!("Pages: {}", file.page_count());
    println!("Index offset: {}", header.index_offset);
    println!("Data offset: {}", header.data_offset);

    let mut sizes: Vec<(u16, u16)> = file.records().iter().map(|r| (r.width, r.height)).collect();
    sizes.sort_unstable();
    sizes.dedup();
    for (width, height) in sizes {
        println!("Page size: {width}x{height}");
    }
    Ok(())
}

fn export_page(input: &Path, output: &Path, page: usize, quiet: bool) -> Result<()> {
    let file = read_xtc(input)?;
    let index = page.checked_sub(1).ok_or(xtcpress::Error::PageOutOfRange {
        page,
        total: file.page_count(),
    })?;
    file.export_png(index, output)?;
    if !quiet {
        println!("Exported page {page} to {}", output.display());
    }
    Ok(())
}

fn convert(cli: &Cli, output: &Path) -> Result<()> {
    let config = cli.convert_config()?;
    let book = read_epub(&cli.input)?;

    let mut converter = Converter::new(config)?;
    if !cli.quiet {
        let mut last = None;
        converter = converter.with_progress(move |stage, fraction| {
            let percent = (fraction * 100.0) as u32 / 10 * 10;
            if last != Some((stage, percent)) {
                last = Some((stage, percent));
                let label = match stage {
                    Stage::Rendering => "Rendering",
                    Stage::Composing => "Composing",
                };
                eprintln!("{label}: {percent}%");
            }
        });
    }

    let report = converter.convert_to_file(&book, output)?;
    if !cli.quiet {
        println!(
            "Converted {} -> {} ({} pages, {} TOC, {} chapters)",
            cli.input.display(),
            output.display(),
            report.total_pages,
            report.toc_pages,
            report.chapters.len()
        );
        for skipped in &report.skipped {
            println!("Skipped {}: {}", skipped.source_id, skipped.reason);
        }
    }
    Ok(())
}
