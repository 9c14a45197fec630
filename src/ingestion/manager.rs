//! Upload orchestration.
//!
//! Flow: sniff format → content-hash dedup → store blob → insert record.
//! Small files are fully extracted before the caller's request completes;
//! large ones get a minimal record immediately and a background task fills
//! in metadata, cover and index entries afterwards. Content indexing is
//! always deferred. An upload with `overwrite` set re-runs extraction over
//! the existing record instead of rejecting the duplicate.

use super::models::{ProcessingResult, RejectReason, UploadRequest};
use crate::cover::normalize_cover;
use crate::extractor::{extractor_for, models::ExtractedContent};
use crate::format::sniff_format;
use crate::jobs::Clock;
use crate::library_store::{Book, InsertResult, LibraryStore};
use crate::search::{chunk_text, SearchIndex, CHUNK_TARGET_CHARS};
use crate::storage::BlobStorage;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct IngestionConfig {
    /// Uploads below this size are extracted synchronously.
    pub sync_threshold_bytes: u64,
    /// Uploads at or above this size skip full-text indexing.
    pub fulltext_index_threshold_bytes: u64,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            sync_threshold_bytes: 5 * 1024 * 1024,
            fulltext_index_threshold_bytes: 20 * 1024 * 1024,
        }
    }
}

/// Orchestrates the upload pipeline.
pub struct IngestionManager {
    library: Arc<dyn LibraryStore>,
    storage: Arc<dyn BlobStorage>,
    search: Arc<dyn SearchIndex>,
    clock: Arc<dyn Clock>,
    config: IngestionConfig,
}

impl IngestionManager {
    pub fn new(
        library: Arc<dyn LibraryStore>,
        storage: Arc<dyn BlobStorage>,
        search: Arc<dyn SearchIndex>,
        clock: Arc<dyn Clock>,
        config: IngestionConfig,
    ) -> Self {
        Self {
            library,
            storage,
            search,
            clock,
            config,
        }
    }

    /// Process one upload to completion (small files) or to a minimal
    /// record plus a spawned background task (large files).
    pub async fn process_upload(self: &Arc<Self>, request: UploadRequest) -> ProcessingResult {
        let started = Instant::now();
        let elapsed = |s: Instant| s.elapsed().as_millis() as u64;

        let format = match sniff_format(&request.filename, &request.bytes) {
            Some(format) => format,
            None => {
                info!("Rejecting {}: unrecognized format", request.filename);
                return ProcessingResult::rejected(
                    RejectReason::UnsupportedFormat,
                    elapsed(started),
                );
            }
        };

        // Hashing the raw bytes is the cheapest rejection path, so it runs
        // before any format-specific work.
        let content_hash = hex_digest(&request.bytes);
        match self.library.find_by_hash(&content_hash) {
            Ok(Some(existing)) if request.overwrite => {
                return self.reingest(existing, request, started).await;
            }
            Ok(Some(existing)) => {
                debug!(
                    "Duplicate upload of {} matches book {}",
                    request.filename, existing.id
                );
                return ProcessingResult::rejected(
                    RejectReason::Duplicate {
                        existing_id: existing.id,
                    },
                    elapsed(started),
                );
            }
            Ok(None) => {}
            Err(e) => {
                return ProcessingResult::rejected(
                    RejectReason::StorageFailure {
                        detail: e.to_string(),
                    },
                    elapsed(started),
                );
            }
        }

        let id = uuid::Uuid::new_v4().to_string();
        let file_path = match self
            .storage
            .store_file(&request.bytes, &id, format.extension())
            .await
        {
            Ok(path) => path,
            Err(e) => {
                return ProcessingResult::rejected(
                    RejectReason::StorageFailure {
                        detail: e.to_string(),
                    },
                    elapsed(started),
                );
            }
        };

        let now = self.clock.now_millis();
        let mut book = Book {
            id: id.clone(),
            filename: sanitize_filename(&request.filename),
            format,
            size_bytes: request.bytes.len() as i64,
            content_hash,
            file_path,
            title: None,
            subtitle: None,
            authors: Vec::new(),
            publisher: None,
            description: None,
            language: None,
            isbn10: None,
            isbn13: None,
            page_count: None,
            published_date: None,
            cover_path: None,
            placeholder_color: None,
            fulltext_indexed: false,
            created_at: now,
            updated_at: now,
        };
        // Caller-supplied fields take precedence over anything extracted.
        book.apply_metadata(&request.metadata_overrides, true);

        let deferred = request.bytes.len() as u64 >= self.config.sync_threshold_bytes;
        let mut content = None;
        if !deferred {
            content = self.enrich(&mut book, &request.bytes).await;
        }

        match self.library.insert_book(&book) {
            Ok(InsertResult::Inserted) => {}
            Ok(InsertResult::DuplicateHash { existing_id }) => {
                // Lost the race against a concurrent identical upload.
                self.storage.delete(&book.file_path).await;
                if request.overwrite {
                    if let Ok(Some(existing)) = self.library.get_book(&existing_id) {
                        return self.reingest(existing, request, started).await;
                    }
                }
                return ProcessingResult::rejected(
                    RejectReason::Duplicate { existing_id },
                    elapsed(started),
                );
            }
            Err(e) => {
                self.storage.delete(&book.file_path).await;
                return ProcessingResult::rejected(
                    RejectReason::StorageFailure {
                        detail: e.to_string(),
                    },
                    elapsed(started),
                );
            }
        }

        let manager = Arc::clone(self);
        let bytes = request.bytes;
        tokio::spawn(async move {
            manager.finish_in_background(book, bytes, deferred, content).await;
        });

        info!(
            "Ingested {} as {} ({}, deferred: {})",
            request.filename,
            id,
            format.as_str(),
            deferred
        );
        ProcessingResult::ingested(id, elapsed(started), deferred)
    }

    /// Re-run the pipeline over an already-stored book whose bytes match the
    /// upload. The record id and blob are kept; every extracted field is
    /// rebuilt from scratch, with the caller's overrides on top.
    async fn reingest(
        self: &Arc<Self>,
        mut book: Book,
        request: UploadRequest,
        started: Instant,
    ) -> ProcessingResult {
        info!("Overwriting book {} from {}", book.id, request.filename);
        book.filename = sanitize_filename(&request.filename);
        book.clear_extracted();
        book.apply_metadata(&request.metadata_overrides, true);
        book.updated_at = self.clock.now_millis();

        let deferred = request.bytes.len() as u64 >= self.config.sync_threshold_bytes;
        let mut content = None;
        if !deferred {
            content = self.enrich(&mut book, &request.bytes).await;
        }

        if let Err(e) = self.library.update_book(&book) {
            return ProcessingResult::rejected(
                RejectReason::StorageFailure {
                    detail: e.to_string(),
                },
                started.elapsed().as_millis() as u64,
            );
        }

        let id = book.id.clone();
        let manager = Arc::clone(self);
        let bytes = request.bytes;
        tokio::spawn(async move {
            manager.finish_in_background(book, bytes, deferred, content).await;
        });

        ProcessingResult::ingested(id, started.elapsed().as_millis() as u64, deferred)
    }

    /// Extract metadata and cover into the record. Returns extracted content
    /// for later indexing. Every failure here degrades to an absent field.
    async fn enrich(&self, book: &mut Book, bytes: &[u8]) -> Option<ExtractedContent> {
        let extractor = extractor_for(book.format);

        match extractor.metadata(bytes).await {
            Ok(metadata) => book.apply_metadata(&metadata, false),
            Err(issue) => debug!("Metadata extraction for {} failed: {}", book.id, issue),
        }

        match extractor.cover(bytes).await {
            Ok(Some(raw)) => match normalize_cover(&raw.bytes) {
                Ok(cover) => match self.storage.store_cover(&cover.bytes, &book.id).await {
                    Ok(path) => {
                        book.cover_path = Some(path);
                        book.placeholder_color = Some(cover.dominant_color);
                    }
                    Err(e) => warn!("Failed to store cover for {}: {}", book.id, e),
                },
                Err(rejection) => {
                    // Not an error, the image just isn't a usable cover.
                    debug!("Cover for {} rejected: {}", book.id, rejection);
                }
            },
            Ok(None) => {}
            Err(issue) => debug!("Cover extraction for {} failed: {}", book.id, issue),
        }

        match extractor.content(bytes).await {
            Ok(content) => Some(content),
            Err(issue) => {
                debug!("Content extraction for {} failed: {}", book.id, issue);
                None
            }
        }
    }

    /// Deferred half of ingestion. Yields between heavy steps so one large
    /// file cannot monopolize the runtime.
    async fn finish_in_background(
        &self,
        mut book: Book,
        bytes: Vec<u8>,
        deferred: bool,
        sync_content: Option<ExtractedContent>,
    ) {
        let content = if deferred {
            let content = self.enrich(&mut book, &bytes).await;
            tokio::task::yield_now().await;

            book.updated_at = self.clock.now_millis();
            if let Err(e) = self.library.update_book(&book) {
                warn!("Failed to persist extracted fields for {}: {}", book.id, e);
            }
            tokio::task::yield_now().await;
            content
        } else {
            sync_content
        };

        if let Err(e) = self.search.index_metadata(
            &book.id,
            book.title.as_deref(),
            book.subtitle.as_deref(),
            &book.authors,
            book.description.as_deref(),
        ) {
            warn!("Metadata indexing for {} failed: {}", book.id, e);
        }
        tokio::task::yield_now().await;

        if book.size_bytes as u64 >= self.config.fulltext_index_threshold_bytes {
            debug!("Skipping full-text indexing for oversized book {}", book.id);
            return;
        }
        let Some(content) = content else { return };

        let chunks: Vec<String> = content
            .chapters
            .iter()
            .flat_map(|chapter| chunk_text(&chapter.text, CHUNK_TARGET_CHARS))
            .collect();
        if chunks.is_empty() {
            return;
        }
        match self.search.index_content(&book.id, &chunks) {
            Ok(()) => {
                book.fulltext_indexed = true;
                book.updated_at = self.clock.now_millis();
                if let Err(e) = self.library.update_book(&book) {
                    warn!("Failed to mark {} as indexed: {}", book.id, e);
                }
            }
            Err(e) => warn!("Content indexing for {} failed: {}", book.id, e),
        }
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Strip path components and replace characters that are unsafe in records.
fn sanitize_filename(filename: &str) -> String {
    let name = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("upload");
    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' | '\0' => '_',
            _ => c,
        })
        .collect();
    if sanitized.is_empty() {
        "upload".to_string()
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_digest_is_stable() {
        let a = hex_digest(b"identical bytes");
        let b = hex_digest(b"identical bytes");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, hex_digest(b"different bytes"));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("book.epub"), "book.epub");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename("a:b?.pdf"), "a_b_.pdf");
        assert_eq!(sanitize_filename(""), "upload");
    }

    #[test]
    fn test_default_thresholds() {
        let config = IngestionConfig::default();
        assert_eq!(config.sync_threshold_bytes, 5 * 1024 * 1024);
        assert_eq!(config.fulltext_index_threshold_bytes, 20 * 1024 * 1024);
    }
}
