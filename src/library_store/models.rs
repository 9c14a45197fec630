//! Book record model.

use crate::extractor::models::ExtractedMetadata;
use crate::format::BookFormat;
use serde::Serialize;

/// The long-lived library entry for one ingested file.
#[derive(Debug, Clone, Serialize)]
pub struct Book {
    pub id: String,
    /// Original upload filename.
    pub filename: String,
    pub format: BookFormat,
    pub size_bytes: i64,
    /// SHA-256 of the raw upload, hex. Unique across the library.
    pub content_hash: String,
    /// Relative path into blob storage.
    pub file_path: String,

    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub authors: Vec<String>,
    pub publisher: Option<String>,
    pub description: Option<String>,
    pub language: Option<String>,
    pub isbn10: Option<String>,
    pub isbn13: Option<String>,
    pub page_count: Option<u32>,
    pub published_date: Option<String>,

    /// Relative path to the normalized cover, when one was accepted.
    pub cover_path: Option<String>,
    /// Placeholder color derived from the cover, `#rrggbb`.
    pub placeholder_color: Option<String>,

    pub fulltext_indexed: bool,

    /// Unix milliseconds.
    pub created_at: i64,
    pub updated_at: i64,
}

impl Book {
    /// Title to display: extracted title, else the upload filename stem.
    pub fn display_title(&self) -> &str {
        match &self.title {
            Some(title) => title,
            None => self
                .filename
                .rsplit_once('.')
                .map(|(stem, _)| stem)
                .unwrap_or(&self.filename),
        }
    }

    /// Drop every extracted field ahead of a fresh extraction pass, as when
    /// an upload overwrites an existing record.
    pub fn clear_extracted(&mut self) {
        self.title = None;
        self.subtitle = None;
        self.authors.clear();
        self.publisher = None;
        self.description = None;
        self.language = None;
        self.isbn10 = None;
        self.isbn13 = None;
        self.page_count = None;
        self.published_date = None;
        self.cover_path = None;
        self.placeholder_color = None;
        self.fulltext_indexed = false;
    }

    /// Fold extracted metadata into the record without clobbering populated
    /// fields, unless `overwrite` was explicitly requested.
    pub fn apply_metadata(&mut self, extracted: &ExtractedMetadata, overwrite: bool) {
        let current = ExtractedMetadata {
            title: self.title.clone(),
            subtitle: self.subtitle.clone(),
            authors: self.authors.clone(),
            publisher: self.publisher.clone(),
            description: self.description.clone(),
            language: self.language.clone(),
            isbn10: self.isbn10.clone(),
            isbn13: self.isbn13.clone(),
            page_count: self.page_count,
            published_date: self.published_date.clone(),
        };
        let merged = if overwrite {
            ExtractedMetadata::merge_with_precedence(extracted.clone(), current)
        } else {
            ExtractedMetadata::merge_with_precedence(current, extracted.clone())
        };

        self.title = merged.title;
        self.subtitle = merged.subtitle;
        self.authors = merged.authors;
        self.publisher = merged.publisher;
        self.description = merged.description;
        self.language = merged.language;
        self.isbn10 = merged.isbn10;
        self.isbn13 = merged.isbn13;
        self.page_count = merged.page_count;
        self.published_date = merged.published_date;
    }
}

/// Outcome of a guarded insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertResult {
    Inserted,
    /// The unique hash constraint fired: another record with identical
    /// content already exists. Not an error, a navigable outcome.
    DuplicateHash { existing_id: String },
}
