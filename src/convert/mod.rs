//! Legacy-ebook to EPUB conversion.
//!
//! State machine: parse → select richest parse → sanitize chapters →
//! collect images → assemble package → cleanup. Progress is tracked through
//! the job registry; a zero-chapter source fails the conversion because a
//! chapterless package is not a valid deliverable.

mod package;
mod sanitize;

pub use package::{assemble_epub, PackageChapter, PackageImage, PackageMeta, EPUB_MIMETYPE};
pub use sanitize::sanitize_chapter_markup;

use crate::extractor::{extractor_for, models::synthetic_chapter_title};
use crate::format::BookFormat;
use crate::jobs::{JobRegistry, JobUpdate};
use crate::library_store::{Book, LibraryStore};
use crate::mobi::{ChapterStrategy, MobiDoc};
use crate::storage::BlobStorage;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("Book not found: {0}")]
    BookNotFound(String),

    #[error("Format {0} cannot be converted to an ebook package")]
    UnconvertibleFormat(String),

    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),
}

pub const JOB_KIND_CONVERT: &str = "convert";

/// Runs conversions as tracked background jobs.
pub struct ConvertManager {
    library: Arc<dyn LibraryStore>,
    storage: Arc<dyn BlobStorage>,
    jobs: Arc<JobRegistry>,
}

impl ConvertManager {
    pub fn new(
        library: Arc<dyn LibraryStore>,
        storage: Arc<dyn BlobStorage>,
        jobs: Arc<JobRegistry>,
    ) -> Self {
        Self {
            library,
            storage,
            jobs,
        }
    }

    /// Start a conversion. Returns the job id to poll or subscribe to.
    pub fn request_conversion(self: &Arc<Self>, book_id: &str) -> Result<String, ConvertError> {
        let book = self
            .library
            .get_book(book_id)?
            .ok_or_else(|| ConvertError::BookNotFound(book_id.to_string()))?;
        if book.format.is_audio() {
            return Err(ConvertError::UnconvertibleFormat(
                book.format.as_str().to_string(),
            ));
        }

        let job_id = uuid::Uuid::new_v4().to_string();
        self.jobs.create(&job_id, JOB_KIND_CONVERT);
        info!("Conversion of {} started as job {}", book_id, job_id);

        let manager = Arc::clone(self);
        let job = job_id.clone();
        tokio::spawn(async move {
            manager.run_conversion(&job, book).await;
        });
        Ok(job_id)
    }

    async fn run_conversion(&self, job_id: &str, book: Book) {
        self.jobs.update(job_id, JobUpdate::Running);
        match self.convert(job_id, &book).await {
            Ok(package_path) => {
                info!("Job {} produced package {}", job_id, package_path);
                self.jobs.update(
                    job_id,
                    JobUpdate::Completed {
                        result: Some(package_path),
                    },
                );
            }
            Err(message) => {
                warn!("Job {} failed: {}", job_id, message);
                self.jobs.update(job_id, JobUpdate::Failed { error: message });
            }
        }
    }

    /// The conversion proper. Errors are plain strings because they are job
    /// payloads for end users, not values callers match on.
    async fn convert(&self, job_id: &str, book: &Book) -> Result<String, String> {
        let source_path = self.storage.resolve(&book.file_path);
        let bytes = tokio::fs::read(&source_path)
            .await
            .map_err(|e| format!("Could not read source file: {}", e))?;
        self.progress(job_id, 10);

        let (chapters, images, cover_index) = match book.format {
            BookFormat::Mobi | BookFormat::MobiNextGen => self.convert_mobi(job_id, &bytes)?,
            _ => (self.convert_via_extractor(job_id, book, &bytes).await?, Vec::new(), None),
        };
        if chapters.is_empty() {
            return Err("No chapters could be extracted from the source".to_string());
        }
        self.progress(job_id, 70);

        let meta = PackageMeta {
            identifier: uuid::Uuid::new_v4().to_string(),
            title: book.display_title().to_string(),
            authors: book.authors.clone(),
            language: book.language.clone(),
        };
        let cover_name = cover_index.map(|i| images[i].name.clone());
        let package = assemble_epub(&meta, &chapters, &images, cover_name.as_deref())
            .map_err(|e| format!("Package assembly failed: {}", e))?;
        self.progress(job_id, 90);

        let artifact_id = uuid::Uuid::new_v4().to_string();
        self.storage
            .store_file(&package, &artifact_id, BookFormat::Epub.extension())
            .await
            .map_err(|e| format!("Could not store converted package: {}", e))
    }

    /// Parse both legacy sub-formats and keep whichever yields more
    /// chapters; the loser's buffers are dropped immediately.
    fn convert_mobi(
        &self,
        job_id: &str,
        bytes: &[u8],
    ) -> Result<(Vec<PackageChapter>, Vec<PackageImage>, Option<usize>), String> {
        let doc = MobiDoc::parse(bytes).map_err(|e| format!("Could not parse source: {}", e))?;
        self.progress(job_id, 30);

        // Pagebreak-split and heading-split both run on every source; the
        // richer parse wins even when no next-gen part was detected.
        let classic = doc.split_chapters(ChapterStrategy::Classic);
        let next_gen = doc.split_chapters(ChapterStrategy::NextGen);
        let raw_chapters = if next_gen.len() > classic.len() {
            drop(classic);
            next_gen
        } else {
            classic
        };
        debug!("Job {}: {} raw chapters", job_id, raw_chapters.len());
        self.progress(job_id, 40);

        let chapters: Vec<PackageChapter> = raw_chapters
            .into_iter()
            .enumerate()
            .map(|(i, raw)| PackageChapter {
                title: raw.title.unwrap_or_else(|| synthetic_chapter_title(i)),
                body: sanitize_chapter_markup(&raw.markup),
            })
            .filter(|c| !c.body.trim().is_empty())
            .collect();
        self.progress(job_id, 60);

        let cover_index = doc
            .cover()
            .and_then(|cover| doc.images().iter().position(|img| img.as_slice() == cover));
        let images: Vec<PackageImage> = doc
            .images()
            .iter()
            .enumerate()
            .map(|(i, img)| package::package_image(i, img))
            .collect();

        Ok((chapters, images, cover_index))
    }

    /// Fallback for non-legacy sources: build chapters from extracted text.
    async fn convert_via_extractor(
        &self,
        job_id: &str,
        book: &Book,
        bytes: &[u8],
    ) -> Result<Vec<PackageChapter>, String> {
        let extractor = extractor_for(book.format);
        let content = extractor
            .content(bytes)
            .await
            .map_err(|e| format!("Content extraction failed: {}", e))?;
        self.progress(job_id, 40);

        let chapters = content
            .chapters
            .into_iter()
            .filter(|chapter| !chapter.text.trim().is_empty())
            .map(|chapter| PackageChapter {
                body: text_to_xhtml(&chapter.text),
                title: chapter.title,
            })
            .collect();
        Ok(chapters)
    }

    fn progress(&self, job_id: &str, percent: u8) {
        self.jobs.update(
            job_id,
            JobUpdate::Progress {
                percent,
                current: None,
                total: None,
            },
        );
    }
}

/// Escape plain extracted text into paragraph markup.
fn text_to_xhtml(text: &str) -> String {
    let mut out = String::with_capacity(text.len() + 64);
    for paragraph in text.split("\n\n") {
        let trimmed = paragraph.trim();
        if trimmed.is_empty() {
            continue;
        }
        out.push_str("<p>");
        out.push_str(&html_escape::encode_text(trimmed));
        out.push_str("</p>\n");
    }
    out
}
