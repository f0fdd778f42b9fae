//! The XTC container: a fixed header, one index record per page, then the
//! page blobs.
//!
//! All integers are little-endian. Each blob is an XTG page: a 22-byte prefix
//! followed by the packed 1-bit raster (see [`PageBitmap`]).
//!
//! [`PageBitmap`]: crate::raster::PageBitmap

mod reader;
mod writer;

pub use reader::{XtcFile, read_xtc, read_xtc_from_reader};
pub use writer::{XtcEncoder, encode_pages, save_atomically, write_xtc, write_xtc_to_writer};

use crate::error::{Error, Result};

/// "XTC\0"
pub const XTC_MAGIC: u32 = 0x0043_5458;
/// "XTG\0"
pub const XTG_MAGIC: u32 = 0x0047_5458;
pub const FORMAT_VERSION: u16 = 0x0100;

pub const HEADER_LEN: usize = 56;
pub const INDEX_RECORD_LEN: usize = 16;
pub const PAGE_PREFIX_LEN: usize = 22;

/// Color mode 0: one bit per pixel.
pub const COLOR_MODE_MONO: u8 = 0;
/// Compression 0: raw packed bits.
pub const COMPRESSION_NONE: u8 = 0;

/// Offset of the first page blob for `pages` pages.
pub fn data_offset(pages: usize) -> u64 {
    (HEADER_LEN + INDEX_RECORD_LEN * pages) as u64
}

fn le_u16(data: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([data[at], data[at + 1]])
}

fn le_u32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn le_u64(data: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[at..at + 8]);
    u64::from_le_bytes(bytes)
}

/// Container header.
///
/// ```text
///  0  u32  magic
///  4  u16  version
///  6  u16  page count
///  8  4xu8 reserved
/// 12  u32  reserved
/// 16  u64  reserved
/// 24  u64  index table offset
/// 32  u64  data section offset
/// 40  u64  reserved
/// 48  u64  reserved
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    pub version: u16,
    pub page_count: u16,
    pub index_offset: u64,
    pub data_offset: u64,
}

impl ContainerHeader {
    pub fn new(page_count: u16) -> Self {
        Self {
            version: FORMAT_VERSION,
            page_count,
            index_offset: HEADER_LEN as u64,
            data_offset: data_offset(page_count as usize),
        }
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[0..4].copy_from_slice(&XTC_MAGIC.to_le_bytes());
        out[4..6].copy_from_slice(&self.version.to_le_bytes());
        out[6..8].copy_from_slice(&self.page_count.to_le_bytes());
        out[24..32].copy_from_slice(&self.index_offset.to_le_bytes());
        out[32..40].copy_from_slice(&self.data_offset.to_le_bytes());
        out
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(Error::InvalidXtc(format!(
                "header needs {HEADER_LEN} bytes, file has {}",
                data.len()
            )));
        }
        let magic = le_u32(data, 0);
        if magic != XTC_MAGIC {
            return Err(Error::InvalidXtc(format!("bad magic {magic:#010x}")));
        }
        let version = le_u16(data, 4);
        if version >> 8 != FORMAT_VERSION >> 8 {
            return Err(Error::InvalidXtc(format!("unsupported version {version:#06x}")));
        }
        Ok(Self {
            version,
            page_count: le_u16(data, 6),
            index_offset: le_u64(data, 24),
            data_offset: le_u64(data, 32),
        })
    }
}

/// Location and size of one page blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexRecord {
    /// Absolute byte offset of the blob.
    pub offset: u64,
    pub blob_len: u32,
    pub width: u16,
    pub height: u16,
}

impl IndexRecord {
    pub fn to_bytes(&self) -> [u8; INDEX_RECORD_LEN] {
        let mut out = [0u8; INDEX_RECORD_LEN];
        out[0..8].copy_from_slice(&self.offset.to_le_bytes());
        out[8..12].copy_from_slice(&self.blob_len.to_le_bytes());
        out[12..14].copy_from_slice(&self.width.to_le_bytes());
        out[14..16].copy_from_slice(&self.height.to_le_bytes());
        out
    }

    /// Parse a record from exactly [`INDEX_RECORD_LEN`] bytes.
    pub fn parse(data: &[u8]) -> Self {
        Self {
            offset: le_u64(data, 0),
            blob_len: le_u32(data, 8),
            width: le_u16(data, 12),
            height: le_u16(data, 14),
        }
    }
}

/// The XTG prefix in front of every page's packed bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagePrefix {
    pub width: u16,
    pub height: u16,
    pub color_mode: u8,
    pub compression: u8,
    pub packed_len: u32,
}

impl PagePrefix {
    pub fn to_bytes(&self) -> [u8; PAGE_PREFIX_LEN] {
        let mut out = [0u8; PAGE_PREFIX_LEN];
        out[0..4].copy_from_slice(&XTG_MAGIC.to_le_bytes());
        out[4..6].copy_from_slice(&self.width.to_le_bytes());
        out[6..8].copy_from_slice(&self.height.to_le_bytes());
        out[8] = self.color_mode;
        out[9] = self.compression;
        out[10..14].copy_from_slice(&self.packed_len.to_le_bytes());
        out
    }

    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < PAGE_PREFIX_LEN {
            return Err(Error::InvalidXtc("page blob shorter than its prefix".into()));
        }
        let magic = le_u32(data, 0);
        if magic != XTG_MAGIC {
            return Err(Error::InvalidXtc(format!("bad page magic {magic:#010x}")));
        }
        Ok(Self {
            width: le_u16(data, 4),
            height: le_u16(data, 6),
            color_mode: data[8],
            compression: data[9],
            packed_len: le_u32(data, 10),
        })
    }
}
