//! XTC writer.

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;

use crate::error::{Error, Result};
use crate::raster::PageBitmap;

use super::{
    COLOR_MODE_MONO, COMPRESSION_NONE, ContainerHeader, HEADER_LEN, INDEX_RECORD_LEN,
    IndexRecord, PAGE_PREFIX_LEN, PagePrefix, data_offset,
};

/// Accumulates page blobs for a container whose page count is fixed up front.
///
/// The count comes from the finished pagination plan; [`finish`] refuses to
/// produce a container if a different number of pages was pushed.
///
/// [`finish`]: XtcEncoder::finish
#[derive(Debug)]
pub struct XtcEncoder {
    expected: usize,
    records: Vec<IndexRecord>,
    blobs: Vec<u8>,
    next_offset: u64,
}

impl XtcEncoder {
    pub fn new(expected_pages: usize) -> Result<Self> {
        if expected_pages > usize::from(u16::MAX) {
            return Err(Error::TooManyPages(expected_pages));
        }
        Ok(Self {
            expected: expected_pages,
            records: Vec::with_capacity(expected_pages),
            blobs: Vec::new(),
            next_offset: data_offset(expected_pages),
        })
    }

    pub fn expected_pages(&self) -> usize {
        self.expected
    }

    pub fn pages_composed(&self) -> usize {
        self.records.len()
    }

    /// Append the next page.
    pub fn push(&mut self, page: &PageBitmap) -> Result<()> {
        let index = self.records.len();
        if index >= self.expected {
            return Err(Error::PaginationNotFinalized {
                expected: self.expected,
                composed: index + 1,
            });
        }

        let (width, height) = (page.width(), page.height());
        let expected_len = PageBitmap::packed_len(width, height);
        if page.data().len() != expected_len {
            return Err(Error::PageSizeMismatch {
                page: index,
                width,
                height,
                expected: expected_len,
                actual: page.data().len(),
            });
        }

        let (Ok(w), Ok(h)) = (u16::try_from(width), u16::try_from(height)) else {
            return Err(Error::PageTooLarge {
                page: index,
                width,
                height,
            });
        };

        let blob_len = PAGE_PREFIX_LEN + page.data().len();
        let (Ok(blob_len32), Ok(packed_len)) =
            (u32::try_from(blob_len), u32::try_from(page.data().len()))
        else {
            return Err(Error::BlobTooLarge {
                page: index,
                len: blob_len,
            });
        };

        let prefix = PagePrefix {
            width: w,
            height: h,
            color_mode: COLOR_MODE_MONO,
            compression: COMPRESSION_NONE,
            packed_len,
        };
        self.blobs.extend_from_slice(&prefix.to_bytes());
        self.blobs.extend_from_slice(page.data());

        self.records.push(IndexRecord {
            offset: self.next_offset,
            blob_len: blob_len32,
            width: w,
            height: h,
        });
        self.next_offset += u64::from(blob_len32);
        Ok(())
    }

    /// Assemble header, index table and blobs.
    pub fn finish(self) -> Result<Vec<u8>> {
        if self.records.len() != self.expected {
            return Err(Error::PaginationNotFinalized {
                expected: self.expected,
                composed: self.records.len(),
            });
        }

        let header = ContainerHeader::new(self.expected as u16);
        let mut out =
            Vec::with_capacity(HEADER_LEN + INDEX_RECORD_LEN * self.records.len() + self.blobs.len());
        out.extend_from_slice(&header.to_bytes());
        for record in &self.records {
            out.extend_from_slice(&record.to_bytes());
        }
        out.extend_from_slice(&self.blobs);
        Ok(out)
    }
}

/// Encode a complete page sequence.
pub fn encode_pages(pages: &[PageBitmap]) -> Result<Vec<u8>> {
    let mut encoder = XtcEncoder::new(pages.len())?;
    for page in pages {
        encoder.push(page)?;
    }
    encoder.finish()
}

/// Write pages as an XTC file. The file appears only once fully written.
pub fn write_xtc<P: AsRef<Path>>(pages: &[PageBitmap], path: P) -> Result<()> {
    let bytes = encode_pages(pages)?;
    save_atomically(path.as_ref(), &bytes)
}

/// Write pages as XTC to any [`Write`] destination.
pub fn write_xtc_to_writer<W: Write>(pages: &[PageBitmap], writer: &mut W) -> Result<()> {
    let bytes = encode_pages(pages)?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

/// Write `bytes` to a temporary file next to `path`, then rename it over
/// `path`. On failure no file is left at `path` (or the old one is kept).
pub fn save_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xtc::XtcFile;

    fn page(width: u32, height: u32, fill: u8) -> PageBitmap {
        PageBitmap::from_packed(width, height, vec![fill; PageBitmap::packed_len(width, height)])
    }

    #[test]
    fn test_layout_of_two_pages() {
        let bytes = encode_pages(&[page(10, 2, 0xFF), page(8, 1, 0x0F)]).unwrap();

        // 56 header + 2 * 16 index, then 22 + 4 and 22 + 1 bytes of blobs.
        assert_eq!(bytes.len(), 56 + 32 + 26 + 23);
        let first = IndexRecord::parse(&bytes[56..72]);
        let second = IndexRecord::parse(&bytes[72..88]);
        assert_eq!((first.offset, first.blob_len, first.width, first.height), (88, 26, 10, 2));
        assert_eq!((second.offset, second.blob_len), (114, 23));
        assert_eq!(&bytes[88..92], b"XTG\0");
        assert_eq!(bytes[bytes.len() - 1], 0x0F);
    }

    #[test]
    fn test_fewer_pages_than_planned() {
        let mut encoder = XtcEncoder::new(2).unwrap();
        encoder.push(&page(8, 8, 0)).unwrap();
        assert!(matches!(
            encoder.finish(),
            Err(Error::PaginationNotFinalized {
                expected: 2,
                composed: 1
            })
        ));
    }

    #[test]
    fn test_more_pages_than_planned() {
        let mut encoder = XtcEncoder::new(0).unwrap();
        assert!(matches!(
            encoder.push(&page(8, 8, 0)),
            Err(Error::PaginationNotFinalized { .. })
        ));
    }

    #[test]
    fn test_size_mismatch_names_the_page() {
        let pages = [page(8, 2, 0), PageBitmap::from_packed(9, 2, vec![0; 3])];
        match encode_pages(&pages) {
            Err(Error::PageSizeMismatch {
                page, expected, actual, ..
            }) => assert_eq!((page, expected, actual), (1, 4, 3)),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_page_too_large() {
        let wide = page(70_000, 1, 0);
        assert!(matches!(encode_pages(&[wide]), Err(Error::PageTooLarge { page: 0, .. })));
    }

    #[test]
    fn test_too_many_pages() {
        assert!(matches!(XtcEncoder::new(70_000), Err(Error::TooManyPages(70_000))));
    }

    #[test]
    fn test_empty_container() {
        let bytes = encode_pages(&[]).unwrap();
        assert_eq!(bytes.len(), 56);
        assert_eq!(XtcFile::from_bytes(bytes).unwrap().page_count(), 0);
    }

    #[test]
    fn test_write_xtc_replaces_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.xtc");
        std::fs::write(&path, b"old").unwrap();

        write_xtc(&[page(16, 4, 0xAA)], &path).unwrap();
        let file = crate::xtc::read_xtc(&path).unwrap();
        assert_eq!(file.page_count(), 1);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn test_failed_write_leaves_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.xtc");
        let bad = PageBitmap::from_packed(8, 8, vec![0; 3]);

        assert!(write_xtc(&[bad], &path).is_err());
        assert!(!path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_write_to_writer_matches_encode() {
        let pages = [page(8, 3, 0x55)];
        let mut out = Vec::new();
        write_xtc_to_writer(&pages, &mut out).unwrap();
        assert_eq!(out, encode_pages(&pages).unwrap());
    }
}
