//! XTC reader.

use std::io::Read;
use std::path::Path;

use crate::error::{Error, Result};
use crate::raster::PageBitmap;

use super::{
    COLOR_MODE_MONO, COMPRESSION_NONE, ContainerHeader, INDEX_RECORD_LEN, IndexRecord,
    PAGE_PREFIX_LEN, PagePrefix,
};

/// A container held in memory with its index parsed.
#[derive(Debug, Clone)]
pub struct XtcFile {
    header: ContainerHeader,
    records: Vec<IndexRecord>,
    data: Vec<u8>,
}

/// Read an XTC file from a path.
pub fn read_xtc<P: AsRef<Path>>(path: P) -> Result<XtcFile> {
    XtcFile::from_bytes(std::fs::read(path)?)
}

/// Read an XTC container from any [`Read`] source.
pub fn read_xtc_from_reader<R: Read>(mut reader: R) -> Result<XtcFile> {
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    XtcFile::from_bytes(data)
}

impl XtcFile {
    /// Parse the header and index table; every record must point inside the file.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        let header = ContainerHeader::parse(&data)?;
        let count = usize::from(header.page_count);

        let index_start = usize::try_from(header.index_offset)
            .map_err(|_| Error::InvalidXtc("index offset out of range".into()))?;
        let index_end = index_start
            .checked_add(count * INDEX_RECORD_LEN)
            .filter(|&end| end <= data.len())
            .ok_or_else(|| {
                Error::InvalidXtc(format!(
                    "index table of {count} pages at {index_start} overruns the file"
                ))
            })?;

        let records: Vec<IndexRecord> = data[index_start..index_end]
            .chunks_exact(INDEX_RECORD_LEN)
            .map(IndexRecord::parse)
            .collect();

        for (page, record) in records.iter().enumerate() {
            let end = record.offset.checked_add(u64::from(record.blob_len));
            if end.is_none_or(|end| end > data.len() as u64) {
                return Err(Error::InvalidXtc(format!(
                    "page {page}: blob at {} with {} bytes overruns the file",
                    record.offset, record.blob_len
                )));
            }
        }

        Ok(Self {
            header,
            records,
            data,
        })
    }

    pub fn header(&self) -> &ContainerHeader {
        &self.header
    }

    pub fn records(&self) -> &[IndexRecord] {
        &self.records
    }

    pub fn page_count(&self) -> usize {
        self.records.len()
    }

    /// Raw blob (prefix and packed bits) of 0-based page `index`.
    pub fn blob(&self, index: usize) -> Result<&[u8]> {
        let record = self.records.get(index).ok_or(Error::PageOutOfRange {
            page: index,
            total: self.records.len(),
        })?;
        let start = record.offset as usize;
        Ok(&self.data[start..start + record.blob_len as usize])
    }

    /// Decode 0-based page `index`, checking its prefix against the index.
    pub fn page(&self, index: usize) -> Result<PageBitmap> {
        let blob = self.blob(index)?;
        let record = self.records[index];
        let prefix = PagePrefix::parse(blob)?;

        if (prefix.width, prefix.height) != (record.width, record.height) {
            return Err(Error::InvalidXtc(format!(
                "page {index}: prefix says {}x{}, index says {}x{}",
                prefix.width, prefix.height, record.width, record.height
            )));
        }
        if prefix.color_mode != COLOR_MODE_MONO || prefix.compression != COMPRESSION_NONE {
            return Err(Error::InvalidXtc(format!(
                "page {index}: unsupported color mode {} / compression {}",
                prefix.color_mode, prefix.compression
            )));
        }

        let packed = &blob[PAGE_PREFIX_LEN..];
        let (width, height) = (u32::from(prefix.width), u32::from(prefix.height));
        let expected = PageBitmap::packed_len(width, height);
        if packed.len() != expected || prefix.packed_len as usize != expected {
            return Err(Error::InvalidXtc(format!(
                "page {index}: {width}x{height} needs {expected} packed bytes, blob holds {} (prefix says {})",
                packed.len(),
                prefix.packed_len
            )));
        }

        Ok(PageBitmap::from_packed(width, height, packed.to_vec()))
    }

    /// Decode every page in order.
    pub fn pages(&self) -> impl Iterator<Item = Result<PageBitmap>> + '_ {
        (0..self.records.len()).map(|i| self.page(i))
    }

    /// Save 0-based page `index` as a grayscale PNG.
    pub fn export_png<P: AsRef<Path>>(&self, index: usize, path: P) -> Result<()> {
        let page = self.page(index)?;
        page.to_gray()
            .save_with_format(path, image::ImageFormat::Png)?;
        Ok(())
    }
}
