//! Error types for xtcpress operations.

use thiserror::Error;

/// Errors that can occur while reading a book, rendering it, or writing the container.
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("ZIP error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("XML parsing error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Invalid EPUB: {0}")]
    InvalidEpub(String),

    #[error("UTF-8 decoding error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("Failed to render chapter '{chapter}': {message}")]
    Render { chapter: String, message: String },

    #[error("Failed to load font: {0}")]
    Font(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[cfg(feature = "cli")]
    #[error("Invalid configuration file: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Book has no renderable chapters")]
    EmptyBook,

    #[error("Pagination not finalized: expected {expected} composed pages, got {composed}")]
    PaginationNotFinalized { expected: usize, composed: usize },

    #[error(
        "Page {page}: {width}x{height} bitmap needs {expected} bytes but holds {actual}"
    )]
    PageSizeMismatch {
        page: usize,
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },

    #[error("Page {page}: {width}x{height} exceeds the container's 65535x65535 limit")]
    PageTooLarge { page: usize, width: u32, height: u32 },

    #[error("Container holds at most 65535 pages, got {0}")]
    TooManyPages(usize),

    #[error("Page {page}: blob of {len} bytes does not fit a 32-bit length")]
    BlobTooLarge { page: usize, len: usize },

    #[error("Invalid XTC container: {0}")]
    InvalidXtc(String),

    #[error("Page {page} out of range (container has {total} pages)")]
    PageOutOfRange { page: usize, total: usize },

    #[error("Conversion cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;
