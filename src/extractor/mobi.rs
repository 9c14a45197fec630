//! Legacy ebook (MOBI family) extractor.
//!
//! Thin adapter over the in-crate MOBI parser; the conversion pipeline uses
//! the parser directly for raw markup and images.

use super::models::{
    synthetic_chapter_title, Chapter, ExtractedContent, ExtractedMetadata, RawCover, TocEntry,
};
use super::{html_to_text, ExtractionIssue, FormatExtractor};
use crate::mobi::{ChapterStrategy, MobiDoc};
use async_trait::async_trait;

pub struct MobiExtractor;

fn parse(bytes: &[u8]) -> Result<MobiDoc, ExtractionIssue> {
    MobiDoc::parse(bytes).map_err(|e| ExtractionIssue::new(format!("MOBI parse failed: {}", e)))
}

#[async_trait]
impl FormatExtractor for MobiExtractor {
    async fn metadata(&self, bytes: &[u8]) -> Result<ExtractedMetadata, ExtractionIssue> {
        Ok(parse(bytes)?.metadata())
    }

    async fn content(&self, bytes: &[u8]) -> Result<ExtractedContent, ExtractionIssue> {
        let doc = parse(bytes)?;

        // Same strategy comparison the converter uses: whichever sub-format
        // parse yields more chapters describes the book better.
        let classic = doc.split_chapters(ChapterStrategy::Classic);
        let next_gen = doc.split_chapters(ChapterStrategy::NextGen);
        let raw = if next_gen.len() > classic.len() {
            next_gen
        } else {
            classic
        };

        let mut chapters = Vec::new();
        for raw_chapter in raw {
            let text = html_to_text(&raw_chapter.markup);
            if text.is_empty() {
                continue;
            }
            let index = chapters.len();
            let title = raw_chapter
                .title
                .unwrap_or_else(|| synthetic_chapter_title(index));
            chapters.push(Chapter { index, title, text });
        }

        let toc = chapters
            .iter()
            .map(|c| TocEntry {
                title: c.title.clone(),
                href: format!("#chapter-{}", c.index + 1),
                index: c.index,
            })
            .collect();

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
        let doc = parse(bytes)?;
        Ok(doc.cover().map(|bytes| RawCover {
            mime: image_mime(bytes).to_string(),
            bytes: bytes.to_vec(),
        }))
    }
}

fn image_mime(bytes: &[u8]) -> &'static str {
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) {
        "image/png"
    } else if bytes.starts_with(b"GIF8") {
        "image/gif"
    } else {
        "image/jpeg"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mobi::testing::MobiBuilder;

    const MARKUP: &str = "<h1>Alpha</h1><p>First.</p><mbp:pagebreak/>\
        <h1>Beta</h1><p>Second.</p>";

    #[tokio::test]
    async fn test_content_extraction() {
        let bytes = MobiBuilder::new(MARKUP).full_name("Extract Me").build();
        let extractor = MobiExtractor;
        let content = extractor.content(&bytes).await.unwrap();
        assert_eq!(content.chapters.len(), 2);
        assert_eq!(content.chapters[0].title, "Alpha");
        assert!(content.full_text.contains("First."));
        assert!(!content.full_text.contains("<h1>"));
        assert_eq!(content.toc.len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_bytes_yield_issue() {
        let extractor = MobiExtractor;
        assert!(extractor.metadata(b"junk").await.is_err());
    }
}
