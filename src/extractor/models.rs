//! Shared extraction result types.
//!
//! Every field is optional: absence means "not found", never an error. The
//! persisted book record is updated via merge so a later, poorer source can
//! never blank out a field a richer source already filled.

use serde::{Deserialize, Serialize};

/// Metadata recovered from a file's own headers and tags.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedMetadata {
    pub title: Option<String>,
    pub subtitle: Option<String>,
    /// Ordered author list.
    pub authors: Vec<String>,
    pub publisher: Option<String>,
    pub description: Option<String>,
    pub language: Option<String>,
    pub isbn10: Option<String>,
    pub isbn13: Option<String>,
    pub page_count: Option<u32>,
    pub published_date: Option<String>,
}

impl ExtractedMetadata {
    /// Merge two metadata sources, field by field.
    ///
    /// Precedence per field: `primary` wins whenever it has a value;
    /// `secondary` only fills gaps. Authors are a single ordered list, so the
    /// first non-empty list wins wholesale rather than being interleaved.
    pub fn merge_with_precedence(primary: Self, secondary: Self) -> Self {
        Self {
            title: primary.title.or(secondary.title),
            subtitle: primary.subtitle.or(secondary.subtitle),
            authors: if primary.authors.is_empty() {
                secondary.authors
            } else {
                primary.authors
            },
            publisher: primary.publisher.or(secondary.publisher),
            description: primary.description.or(secondary.description),
            language: primary.language.or(secondary.language),
            isbn10: primary.isbn10.or(secondary.isbn10),
            isbn13: primary.isbn13.or(secondary.isbn13),
            page_count: primary.page_count.or(secondary.page_count),
            published_date: primary.published_date.or(secondary.published_date),
        }
    }

    /// True when no field carries a value.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// A single chapter of extracted text. Empty text is valid (image-only
/// comics, for example).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    pub index: usize,
    pub title: String,
    pub text: String,
}

/// One entry of the source's own table of contents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TocEntry {
    pub title: String,
    /// Href or anchor into the source document.
    pub href: String,
    pub index: usize,
}

/// Extracted text content with its chapter structure.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedContent {
    /// Full concatenated text of the book.
    pub full_text: String,
    pub chapters: Vec<Chapter>,
    pub toc: Vec<TocEntry>,
}

impl ExtractedContent {
    pub fn is_empty(&self) -> bool {
        self.full_text.is_empty() && self.chapters.is_empty()
    }
}

/// A cover image as found in the source, before normalization.
#[derive(Debug, Clone)]
pub struct RawCover {
    pub bytes: Vec<u8>,
    pub mime: String,
}

/// Fallback chapter title when a navigation entry cannot be matched to a
/// content partition.
pub fn synthetic_chapter_title(index: usize) -> String {
    format!("Chapter {}", index + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(title: Option<&str>, authors: &[&str]) -> ExtractedMetadata {
        ExtractedMetadata {
            title: title.map(|s| s.to_string()),
            authors: authors.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_merge_primary_wins() {
        let primary = meta(Some("Primary"), &["A. Author"]);
        let secondary = meta(Some("Secondary"), &["B. Author"]);
        let merged = ExtractedMetadata::merge_with_precedence(primary, secondary);
        assert_eq!(merged.title.as_deref(), Some("Primary"));
        assert_eq!(merged.authors, vec!["A. Author"]);
    }

    #[test]
    fn test_merge_secondary_fills_gaps() {
        let primary = meta(None, &[]);
        let mut secondary = meta(Some("Fallback"), &["B. Author"]);
        secondary.language = Some("en".to_string());
        let merged = ExtractedMetadata::merge_with_precedence(primary, secondary);
        assert_eq!(merged.title.as_deref(), Some("Fallback"));
        assert_eq!(merged.authors, vec!["B. Author"]);
        assert_eq!(merged.language.as_deref(), Some("en"));
    }

    #[test]
    fn test_merge_never_blanks_populated_field() {
        let primary = meta(Some("Kept"), &["Kept Author"]);
        let merged =
            ExtractedMetadata::merge_with_precedence(primary, ExtractedMetadata::default());
        assert_eq!(merged.title.as_deref(), Some("Kept"));
        assert_eq!(merged.authors, vec!["Kept Author"]);
    }

    #[test]
    fn test_is_empty() {
        assert!(ExtractedMetadata::default().is_empty());
        assert!(!meta(Some("x"), &[]).is_empty());
        assert!(ExtractedContent::default().is_empty());
    }

    #[test]
    fn test_synthetic_chapter_title() {
        assert_eq!(synthetic_chapter_title(0), "Chapter 1");
        assert_eq!(synthetic_chapter_title(11), "Chapter 12");
    }
}
