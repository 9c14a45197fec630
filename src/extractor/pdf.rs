//! Fixed-layout document (PDF) extractor.
//!
//! Text comes from `pdf-extract`; metadata and page count from the
//! document's Info dictionary via `lopdf`. PDFs carry no chapter structure
//! we can rely on, so a text-bearing document becomes a single chapter and a
//! scanned, text-free one legitimately yields no chapters at all.

use super::models::{Chapter, ExtractedContent, ExtractedMetadata, RawCover, TocEntry};
use super::{collapse_whitespace, ExtractionIssue, FormatExtractor};
use async_trait::async_trait;
use lopdf::{Document, Object};
use std::panic::{catch_unwind, AssertUnwindSafe};

pub struct PdfExtractor;

#[async_trait]
impl FormatExtractor for PdfExtractor {
    async fn metadata(&self, bytes: &[u8]) -> Result<ExtractedMetadata, ExtractionIssue> {
        let doc = Document::load_mem(bytes)
            .map_err(|e| ExtractionIssue::new(format!("not a readable PDF: {}", e)))?;

        let page_count = doc.get_pages().len() as u32;
        let info = info_dictionary(&doc);

        Ok(ExtractedMetadata {
            title: info.as_ref().and_then(|d| info_string(d, b"Title")),
            subtitle: None,
            authors: info
                .as_ref()
                .and_then(|d| info_string(d, b"Author"))
                .map(|a| vec![a])
                .unwrap_or_default(),
            publisher: None,
            description: info.as_ref().and_then(|d| info_string(d, b"Subject")),
            language: None,
            isbn10: None,
            isbn13: None,
            page_count: Some(page_count),
            published_date: info
                .as_ref()
                .and_then(|d| info_string(d, b"CreationDate")),
        })
    }

    async fn content(&self, bytes: &[u8]) -> Result<ExtractedContent, ExtractionIssue> {
        // The extraction library panics on some malformed files; contain
        // that to an issue like any other parse failure.
        let extracted = catch_unwind(AssertUnwindSafe(|| {
            pdf_extract::extract_text_from_mem(bytes)
        }))
        .map_err(|_| ExtractionIssue::new("PDF text extraction panicked"))?
        .map_err(|e| ExtractionIssue::new(format!("PDF text extraction failed: {}", e)))?;

        let text = collapse_whitespace(&extracted);
        if text.is_empty() {
            return Ok(ExtractedContent::default());
        }

        let chapter = Chapter {
            index: 0,
            title: "Chapter 1".to_string(),
            text: text.clone(),
        };
        Ok(ExtractedContent {
            full_text: text,
            toc: vec![TocEntry {
                title: chapter.title.clone(),
                href: "#chapter-1".to_string(),
                index: 0,
            }],
            chapters: vec![chapter],
        })
    }

    async fn cover(&self, _bytes: &[u8]) -> Result<Option<RawCover>, ExtractionIssue> {
        // Rendering a page to an image is out of scope; PDFs get no cover.
        Ok(None)
    }
}

fn info_dictionary(doc: &Document) -> Option<lopdf::Dictionary> {
    let info = doc.trailer.get(b"Info").ok()?;
    match info {
        Object::Reference(id) => doc.get_dictionary(*id).ok().cloned(),
        Object::Dictionary(dict) => Some(dict.clone()),
        _ => None,
    }
}

fn info_string(dict: &lopdf::Dictionary, key: &[u8]) -> Option<String> {
    let raw = match dict.get(key).ok()? {
        Object::String(bytes, _) => bytes.clone(),
        _ => return None,
    };
    let decoded = decode_pdf_string(&raw);
    let trimmed = decoded.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// PDF text strings are UTF-16BE when they carry a BOM, PDFDocEncoding
/// (close enough to Latin-1) otherwise.
fn decode_pdf_string(raw: &[u8]) -> String {
    if raw.starts_with(&[0xFE, 0xFF]) {
        let utf16: Vec<u16> = raw[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16_lossy(&utf16)
    } else {
        raw.iter().map(|&b| b as char).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_pdf_string_utf16() {
        let mut raw = vec![0xFE, 0xFF];
        for c in "Tome".encode_utf16() {
            raw.extend_from_slice(&c.to_be_bytes());
        }
        assert_eq!(decode_pdf_string(&raw), "Tome");
    }

    #[test]
    fn test_decode_pdf_string_latin1() {
        assert_eq!(decode_pdf_string(&[0x54, 0x6F, 0x6D, 0xE9]), "Tomé");
    }

    #[tokio::test]
    async fn test_invalid_bytes_yield_issue() {
        let extractor = PdfExtractor;
        assert!(extractor.metadata(b"not a pdf").await.is_err());
    }
}
