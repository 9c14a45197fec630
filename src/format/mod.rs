//! Container format sniffing for uploaded files.
//!
//! A recognized file extension is trusted first; otherwise the raw bytes are
//! inspected for magic signatures. Sniffing is deterministic and total: the
//! same bytes and filename always yield the same answer, and an unmatched
//! file is `None` (a terminal classification, not a transient error).

use serde::{Deserialize, Serialize};
use std::io::Cursor;
use std::path::Path;

/// Canonical format tag assigned to an uploaded file. Immutable once stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BookFormat {
    /// ZIP-based ebook package with manifest, spine and navigation (EPUB).
    Epub,
    /// Palm-database legacy ebook (MOBI/PRC).
    Mobi,
    /// Next-generation variant of the legacy family (AZW3/KF8).
    MobiNextGen,
    /// Fixed-layout document (PDF).
    Pdf,
    /// Comic archive, ZIP flavor (CBZ).
    ComicZip,
    /// Comic archive, RAR flavor (CBR).
    ComicRar,
    /// Chaptered MP4-family audio container (M4B).
    AudioM4b,
    /// Plain MP4-family audio container (M4A).
    AudioM4a,
    /// Compressed audio track (MP3).
    AudioMp3,
}

impl BookFormat {
    /// Canonical extension used when persisting the file.
    pub fn extension(&self) -> &'static str {
        match self {
            BookFormat::Epub => "epub",
            BookFormat::Mobi => "mobi",
            BookFormat::MobiNextGen => "azw3",
            BookFormat::Pdf => "pdf",
            BookFormat::ComicZip => "cbz",
            BookFormat::ComicRar => "cbr",
            BookFormat::AudioM4b => "m4b",
            BookFormat::AudioM4a => "m4a",
            BookFormat::AudioMp3 => "mp3",
        }
    }

    /// Stable string tag for persistence and logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            BookFormat::Epub => "epub",
            BookFormat::Mobi => "mobi",
            BookFormat::MobiNextGen => "mobi-next-gen",
            BookFormat::Pdf => "pdf",
            BookFormat::ComicZip => "comic-zip",
            BookFormat::ComicRar => "comic-rar",
            BookFormat::AudioM4b => "audio-m4b",
            BookFormat::AudioM4a => "audio-m4a",
            BookFormat::AudioMp3 => "audio-mp3",
        }
    }

    /// Parse a persisted tag back into a format.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "epub" => Some(BookFormat::Epub),
            "mobi" => Some(BookFormat::Mobi),
            "mobi-next-gen" => Some(BookFormat::MobiNextGen),
            "pdf" => Some(BookFormat::Pdf),
            "comic-zip" => Some(BookFormat::ComicZip),
            "comic-rar" => Some(BookFormat::ComicRar),
            "audio-m4b" => Some(BookFormat::AudioM4b),
            "audio-m4a" => Some(BookFormat::AudioM4a),
            "audio-mp3" => Some(BookFormat::AudioMp3),
            _ => None,
        }
    }

    /// True for the audio container/track formats.
    pub fn is_audio(&self) -> bool {
        matches!(
            self,
            BookFormat::AudioM4b | BookFormat::AudioM4a | BookFormat::AudioMp3
        )
    }
}

impl std::fmt::Display for BookFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Extensions accepted for upload, for caller-facing documentation.
pub const ACCEPTED_EXTENSIONS: &[&str] = &[
    "epub", "mobi", "prc", "azw", "azw3", "pdf", "cbz", "cbr", "m4b", "m4a", "mp3",
];

/// Determine the format of an upload from its filename and raw bytes.
///
/// A recognized extension wins outright; magic bytes are only consulted when
/// the extension is missing or unknown.
pub fn sniff_format(filename: &str, bytes: &[u8]) -> Option<BookFormat> {
    if let Some(format) = sniff_extension(filename) {
        return Some(format);
    }
    sniff_magic(bytes)
}

fn sniff_extension(filename: &str) -> Option<BookFormat> {
    let ext = Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())?;

    match ext.as_str() {
        "epub" => Some(BookFormat::Epub),
        "mobi" | "prc" | "azw" => Some(BookFormat::Mobi),
        "azw3" => Some(BookFormat::MobiNextGen),
        "pdf" => Some(BookFormat::Pdf),
        "cbz" => Some(BookFormat::ComicZip),
        "cbr" => Some(BookFormat::ComicRar),
        "m4b" => Some(BookFormat::AudioM4b),
        "m4a" => Some(BookFormat::AudioM4a),
        "mp3" => Some(BookFormat::AudioMp3),
        _ => None,
    }
}

fn sniff_magic(bytes: &[u8]) -> Option<BookFormat> {
    if bytes.starts_with(b"%PDF") {
        return Some(BookFormat::Pdf);
    }
    if bytes.starts_with(b"Rar!") {
        return Some(BookFormat::ComicRar);
    }
    if bytes.starts_with(b"PK\x03\x04") {
        return Some(if zip_declares_epub(bytes) {
            BookFormat::Epub
        } else {
            BookFormat::ComicZip
        });
    }
    // Palm database type/creator at offset 60.
    if bytes.len() >= 68 && &bytes[60..68] == b"BOOKMOBI" {
        return Some(BookFormat::Mobi);
    }
    if let Some(format) = sniff_mp4_brand(bytes) {
        return Some(format);
    }
    if is_mp3(bytes) {
        return Some(BookFormat::AudioMp3);
    }
    None
}

/// Open the ZIP and look for the EPUB `mimetype` entry. Invalid or truncated
/// archives simply fail the probe and fall through to the comic tag.
fn zip_declares_epub(bytes: &[u8]) -> bool {
    let Ok(mut archive) = zip::ZipArchive::new(Cursor::new(bytes)) else {
        return false;
    };
    let Ok(mut entry) = archive.by_name("mimetype") else {
        return false;
    };
    let mut declared = String::new();
    if std::io::Read::read_to_string(&mut entry, &mut declared).is_err() {
        return false;
    }
    declared.trim() == "application/epub+zip"
}

/// Inspect the `ftyp` atom's major brand to split chaptered audiobook
/// containers from plain ones.
fn sniff_mp4_brand(bytes: &[u8]) -> Option<BookFormat> {
    if bytes.len() < 12 || &bytes[4..8] != b"ftyp" {
        return None;
    }
    match &bytes[8..12] {
        b"M4B " => Some(BookFormat::AudioM4b),
        b"M4A " | b"mp42" | b"isom" | b"iso2" => Some(BookFormat::AudioM4a),
        _ => None,
    }
}

fn is_mp3(bytes: &[u8]) -> bool {
    if bytes.starts_with(b"ID3") {
        return true;
    }
    // MPEG audio frame sync: 11 set bits.
    bytes.len() >= 2 && bytes[0] == 0xFF && (bytes[1] & 0xE0) == 0xE0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn epub_bytes() -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut writer = zip::ZipWriter::new(Cursor::new(&mut buf));
            let stored = zip::write::SimpleFileOptions::default()
                .compression_method(zip::CompressionMethod::Stored);
            writer.start_file("mimetype", stored).unwrap();
            writer.write_all(b"application/epub+zip").unwrap();
            writer.finish().unwrap();
        }
        buf
    }

    fn plain_zip_bytes() -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut writer = zip::ZipWriter::new(Cursor::new(&mut buf));
            let options = zip::write::SimpleFileOptions::default();
            writer.start_file("page001.png", options).unwrap();
            writer.write_all(b"not really a png").unwrap();
            writer.finish().unwrap();
        }
        buf
    }

    #[test]
    fn test_extension_wins_over_bytes() {
        // Extension is trusted first even when the bytes disagree.
        assert_eq!(
            sniff_format("book.pdf", b"Rar!\x1a\x07\x00"),
            Some(BookFormat::Pdf)
        );
        assert_eq!(
            sniff_format("comic.cbr", b"%PDF-1.7"),
            Some(BookFormat::ComicRar)
        );
    }

    #[test]
    fn test_sniff_pdf_magic() {
        assert_eq!(
            sniff_format("upload.bin", b"%PDF-1.4 rest"),
            Some(BookFormat::Pdf)
        );
    }

    #[test]
    fn test_sniff_zip_with_epub_mimetype() {
        let bytes = epub_bytes();
        assert_eq!(sniff_format("upload", &bytes), Some(BookFormat::Epub));
    }

    #[test]
    fn test_sniff_zip_without_mimetype_is_comic() {
        let bytes = plain_zip_bytes();
        assert_eq!(sniff_format("upload", &bytes), Some(BookFormat::ComicZip));
    }

    #[test]
    fn test_sniff_bookmobi_marker() {
        let mut bytes = vec![0u8; 80];
        bytes[60..68].copy_from_slice(b"BOOKMOBI");
        assert_eq!(sniff_format("upload", &bytes), Some(BookFormat::Mobi));
    }

    #[test]
    fn test_sniff_mp4_brands() {
        let mut m4b = vec![0, 0, 0, 32];
        m4b.extend_from_slice(b"ftypM4B ");
        m4b.extend_from_slice(&[0u8; 8]);
        assert_eq!(sniff_format("upload", &m4b), Some(BookFormat::AudioM4b));

        let mut m4a = vec![0, 0, 0, 32];
        m4a.extend_from_slice(b"ftypM4A ");
        m4a.extend_from_slice(&[0u8; 8]);
        assert_eq!(sniff_format("upload", &m4a), Some(BookFormat::AudioM4a));
    }

    #[test]
    fn test_sniff_mp3() {
        assert_eq!(
            sniff_format("upload", b"ID3\x04\x00\x00\x00\x00\x00\x00"),
            Some(BookFormat::AudioMp3)
        );
        assert_eq!(
            sniff_format("upload", &[0xFF, 0xFB, 0x90, 0x00]),
            Some(BookFormat::AudioMp3)
        );
    }

    #[test]
    fn test_unrecognized_is_none() {
        assert_eq!(sniff_format("mystery.xyz", b"garbage bytes here"), None);
        assert_eq!(sniff_format("", &[]), None);
    }

    #[test]
    fn test_sniffing_is_deterministic() {
        let bytes = epub_bytes();
        let first = sniff_format("a", &bytes);
        for _ in 0..5 {
            assert_eq!(sniff_format("a", &bytes), first);
        }
    }

    #[test]
    fn test_every_accepted_extension_is_recognized() {
        for ext in ACCEPTED_EXTENSIONS {
            let filename = format!("upload.{}", ext);
            assert!(
                sniff_format(&filename, b"").is_some(),
                "extension {} not recognized",
                ext
            );
        }
    }

    #[test]
    fn test_tag_roundtrip() {
        for format in [
            BookFormat::Epub,
            BookFormat::Mobi,
            BookFormat::MobiNextGen,
            BookFormat::Pdf,
            BookFormat::ComicZip,
            BookFormat::ComicRar,
            BookFormat::AudioM4b,
            BookFormat::AudioM4a,
            BookFormat::AudioMp3,
        ] {
            assert_eq!(BookFormat::parse(format.as_str()), Some(format));
        }
    }
}
