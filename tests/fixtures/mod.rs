//! Image fixtures for booth tests

#![allow(dead_code)]

/// PNG file signature; enough for format detection.
pub const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

/// JPEG start-of-image marker plus JFIF header start.
pub const JPEG_HEADER: &[u8] = b"\xFF\xD8\xFF\xE0\x00\x10JFIF\x00";

/// A "photo" of exactly `len` bytes that sniffs as PNG. The `tag` byte fills
/// the body so different photos can be told apart.
pub fn png_photo(len: usize, tag: u8) -> Vec<u8> {
    assert!(len >= PNG_SIGNATURE.len());
    let mut bytes = PNG_SIGNATURE.to_vec();
    bytes.resize(len, tag);
    bytes
}

/// A small JPEG-looking photo.
pub fn jpeg_photo(len: usize) -> Vec<u8> {
    let mut bytes = JPEG_HEADER.to_vec();
    bytes.resize(len.max(JPEG_HEADER.len()), 0x42);
    bytes
}

/// Bytes that are not any known image format.
pub const NOT_AN_IMAGE: &[u8] = b"hello, this is definitely text";

/// Fixture for the live end-to-end run.
#[derive(Debug, Clone)]
pub struct BoothVisitorFixture {
    pub nickname: &'static str,
    pub expected_label: &'static str,
    pub description: &'static str,
}

pub const VISITOR_FIXTURES: &[BoothVisitorFixture] = &[
    BoothVisitorFixture {
        nickname: "guest",
        expected_label: "guest",
        description: "Plain ASCII nickname",
    },
    BoothVisitorFixture {
        nickname: "김민수",
        expected_label: "guest",
        description: "Korean nickname falls back to the placeholder",
    },
    BoothVisitorFixture {
        nickname: "Lee Ji/Woo?",
        expected_label: "Lee_JiWoo",
        description: "Spaces and path characters",
    },
];
