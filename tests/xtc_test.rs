//! Container format tests against hand-computed byte layouts.

use std::io::Cursor;

use image::{GrayImage, Luma};
use tempfile::TempDir;
use xtcpress::{Error, PageBitmap, XtcFile, encode_pages, read_xtc, read_xtc_from_reader, write_xtc};

fn le_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn le_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes(bytes[at..at + 4].try_into().unwrap())
}

fn le_u64(bytes: &[u8], at: usize) -> u64 {
    u64::from_le_bytes(bytes[at..at + 8].try_into().unwrap())
}

/// Left half black, right half white.
fn split_page(width: u32, height: u32) -> PageBitmap {
    let image = GrayImage::from_fn(width, height, |x, _| {
        Luma([if x < width / 2 { 0 } else { 255 }])
    });
    PageBitmap::from_gray(&image)
}

#[test]
fn test_header_layout() {
    let pages = [split_page(480, 800), split_page(480, 800), split_page(12, 3)];
    let bytes = encode_pages(&pages).unwrap();

    assert_eq!(le_u32(&bytes, 0), 0x0043_5458);
    assert_eq!(le_u16(&bytes, 4), 0x0100);
    assert_eq!(le_u16(&bytes, 6), 3);
    assert!(bytes[8..24].iter().all(|&b| b == 0));
    assert_eq!(le_u64(&bytes, 24), 56);
    assert_eq!(le_u64(&bytes, 32), 56 + 3 * 16);
    assert!(bytes[40..56].iter().all(|&b| b == 0));

    // Third record: after two blobs of 22 + 60 * 800 bytes each.
    let record = 56 + 2 * 16;
    let expected_offset = 56 + 48 + 2 * (22 + 60 * 800) as u64;
    assert_eq!(le_u64(&bytes, record), expected_offset);
    assert_eq!(le_u32(&bytes, record + 8), 22 + 2 * 3);
    assert_eq!((le_u16(&bytes, record + 12), le_u16(&bytes, record + 14)), (12, 3));
    assert_eq!(bytes.len() as u64, expected_offset + 22 + 6);
}

#[test]
fn test_page_prefix_and_bits() {
    let bytes = encode_pages(&[split_page(16, 1)]).unwrap();
    let blob = &bytes[72..];

    assert_eq!(le_u32(blob, 0), 0x0047_5458);
    assert_eq!((le_u16(blob, 4), le_u16(blob, 6)), (16, 1));
    assert_eq!((blob[8], blob[9]), (0, 0));
    assert_eq!(le_u32(blob, 10), 2);
    assert!(blob[14..22].iter().all(|&b| b == 0));
    // Black is 0, white is 1, most significant bit first.
    assert_eq!(&blob[22..], &[0x00, 0xFF]);
}

#[test]
fn test_read_from_reader_and_path_agree() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("pages.xtc");
    let pages = vec![split_page(33, 9), split_page(8, 8)];

    write_xtc(&pages, &path).unwrap();
    let from_path = read_xtc(&path).unwrap();
    let from_reader = read_xtc_from_reader(Cursor::new(std::fs::read(&path).unwrap())).unwrap();

    let decoded: Vec<PageBitmap> = from_reader.pages().collect::<Result<_, _>>().unwrap();
    assert_eq!(decoded, pages);
    assert_eq!(from_path.records(), from_reader.records());
}

#[test]
fn test_bad_magic_is_rejected() {
    let mut bytes = encode_pages(&[split_page(8, 8)]).unwrap();
    bytes[0] = b'Z';
    assert!(matches!(XtcFile::from_bytes(bytes), Err(Error::InvalidXtc(_))));
}

#[test]
fn test_reencoding_is_byte_identical() {
    let pages = vec![split_page(480, 800), split_page(100, 50)];
    let first = encode_pages(&pages).unwrap();
    let decoded: Vec<PageBitmap> = XtcFile::from_bytes(first.clone())
        .unwrap()
        .pages()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(encode_pages(&decoded).unwrap(), first);
}
