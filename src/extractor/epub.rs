//! EPUB package extractor.

use super::models::{
    synthetic_chapter_title, Chapter, ExtractedContent, ExtractedMetadata, RawCover, TocEntry,
};
use super::{html_to_text, ExtractionIssue, FormatExtractor};
use async_trait::async_trait;
use epub::doc::EpubDoc;
use std::io::Cursor;

pub struct EpubExtractor;

type Doc = EpubDoc<Cursor<Vec<u8>>>;

fn open(bytes: &[u8]) -> Result<Doc, ExtractionIssue> {
    EpubDoc::from_reader(Cursor::new(bytes.to_vec()))
        .map_err(|e| ExtractionIssue::new(format!("not a readable EPUB: {}", e)))
}

#[async_trait]
impl FormatExtractor for EpubExtractor {
    async fn metadata(&self, bytes: &[u8]) -> Result<ExtractedMetadata, ExtractionIssue> {
        let doc = open(bytes)?;

        let authors = doc
            .metadata
            .get("creator")
            .cloned()
            .unwrap_or_default()
            .into_iter()
            .filter(|a| !a.trim().is_empty())
            .collect();

        let (isbn10, isbn13) = isbn_from_identifiers(
            doc.metadata
                .get("identifier")
                .map(|v| v.as_slice())
                .unwrap_or(&[]),
        );

        Ok(ExtractedMetadata {
            title: doc.mdata("title"),
            subtitle: None,
            authors,
            publisher: doc.mdata("publisher"),
            description: doc.mdata("description"),
            language: doc.mdata("language"),
            isbn10,
            isbn13,
            page_count: None,
            published_date: doc.mdata("date"),
        })
    }

    async fn content(&self, bytes: &[u8]) -> Result<ExtractedContent, ExtractionIssue> {
        let mut doc = open(bytes)?;

        let toc: Vec<TocEntry> = doc
            .toc
            .iter()
            .enumerate()
            .map(|(index, nav)| TocEntry {
                title: nav.label.clone(),
                href: nav.content.to_string_lossy().to_string(),
                index,
            })
            .collect();

        // The spine count bounds the loop; a hostile manifest cannot make us
        // iterate past the package's own declared reading order.
        let num_chapters = doc.get_num_pages();
        let mut chapters = Vec::new();
        for i in 0..num_chapters {
            if !doc.set_current_page(i) {
                continue;
            }
            let Some((html, _mime)) = doc.get_current_str() else {
                continue;
            };
            let text = html_to_text(&html);
            if text.is_empty() {
                continue;
            }

            // Navigation entries map to spine partitions only when the
            // counts line up; otherwise fall back to the document's own
            // heading, then to a synthetic title.
            let index = chapters.len();
            let title = if toc.len() == num_chapters {
                toc[i].title.clone()
            } else {
                first_line_heading(&text).unwrap_or_else(|| synthetic_chapter_title(index))
            };

            chapters.push(Chapter { index, title, text });
        }

        let full_text = chapters
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        Ok(ExtractedContent {
            full_text,
            chapters,
            toc,
        })
    }

    async fn cover(&self, bytes: &[u8]) -> Result<Option<RawCover>, ExtractionIssue> {
        let mut doc = open(bytes)?;
        Ok(doc
            .get_cover()
            .map(|(bytes, mime)| RawCover { bytes, mime }))
    }
}

/// A short first line is taken as the chapter's own heading.
fn first_line_heading(text: &str) -> Option<String> {
    let line = text.lines().next()?.trim();
    if !line.is_empty() && line.len() <= 120 {
        Some(line.to_string())
    } else {
        None
    }
}

fn isbn_from_identifiers(identifiers: &[String]) -> (Option<String>, Option<String>) {
    let mut isbn10 = None;
    let mut isbn13 = None;
    for raw in identifiers {
        let digits: String = raw
            .chars()
            .filter(|c| c.is_ascii_digit() || *c == 'X' || *c == 'x')
            .collect();
        match digits.len() {
            13 if digits.starts_with("978") || digits.starts_with("979") => {
                isbn13.get_or_insert(digits);
            }
            10 => {
                isbn10.get_or_insert(digits);
            }
            _ => {}
        }
    }
    (isbn10, isbn13)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_isbn_classification() {
        let ids = vec![
            "urn:uuid:1234".to_string(),
            "urn:isbn:978-1-23456-789-7".to_string(),
            "0306406152".to_string(),
        ];
        let (isbn10, isbn13) = isbn_from_identifiers(&ids);
        assert_eq!(isbn13.as_deref(), Some("9781234567897"));
        assert_eq!(isbn10.as_deref(), Some("0306406152"));
    }

    #[tokio::test]
    async fn test_invalid_bytes_degrade_to_issue() {
        let extractor = EpubExtractor;
        assert!(extractor.metadata(b"not a zip at all").await.is_err());
        assert!(extractor.content(&[]).await.is_err());
    }

    #[test]
    fn test_first_line_heading() {
        assert_eq!(
            first_line_heading("Chapter One\nBody text here."),
            Some("Chapter One".to_string())
        );
        let long = "x".repeat(200);
        assert_eq!(first_line_heading(&long), None);
    }
}
