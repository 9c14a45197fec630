//! Common test infrastructure
//!
//! Fixture builders for synthetic book files plus a fully wired pipeline
//! backed by an in-memory database and a scratch media directory.

use std::io::{Cursor, Write};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tomekeeper_server::audio_merge::AudioMergeManager;
use tomekeeper_server::convert::{assemble_epub, ConvertManager, PackageChapter, PackageMeta};
use tomekeeper_server::ingestion::{IngestionConfig, IngestionManager};
use tomekeeper_server::jobs::{Job, JobRegistry, SystemClock};
use tomekeeper_server::mobi::testing::MobiBuilder;
use tomekeeper_server::{FsBlobStorage, NoOpSearchIndex, SqliteLibraryStore};

/// A wired pipeline over temp storage. Dropping it removes the media dir.
pub struct TestPipeline {
    pub library: Arc<SqliteLibraryStore>,
    pub storage: Arc<FsBlobStorage>,
    pub jobs: Arc<JobRegistry>,
    pub ingestion: Arc<IngestionManager>,
    pub convert: Arc<ConvertManager>,
    pub merge: Arc<AudioMergeManager>,
    _media_dir: TempDir,
}

impl TestPipeline {
    pub fn new() -> Self {
        Self::with_ingestion_config(IngestionConfig::default())
    }

    pub fn with_ingestion_config(config: IngestionConfig) -> Self {
        let media_dir = TempDir::new().unwrap();
        let library = Arc::new(SqliteLibraryStore::in_memory().unwrap());
        let storage = Arc::new(FsBlobStorage::new(media_dir.path()));
        let jobs = Arc::new(JobRegistry::new(
            Arc::new(SystemClock),
            Duration::from_secs(3600),
        ));
        let ingestion = Arc::new(IngestionManager::new(
            library.clone(),
            storage.clone(),
            Arc::new(NoOpSearchIndex),
            Arc::new(SystemClock),
            config,
        ));
        let convert = Arc::new(ConvertManager::new(
            library.clone(),
            storage.clone(),
            jobs.clone(),
        ));
        let merge = Arc::new(AudioMergeManager::new(storage.clone(), jobs.clone(), 128));

        Self {
            library,
            storage,
            jobs,
            ingestion,
            convert,
            merge,
            _media_dir: media_dir,
        }
    }

    /// Poll a job until it reaches a terminal status (5s timeout).
    pub async fn wait_for_job(&self, job_id: &str) -> Job {
        for _ in 0..100 {
            if let Some(job) = self.jobs.get(job_id) {
                if job.status.is_terminal() {
                    return job;
                }
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("Job {} did not finish in time", job_id);
    }
}

/// A small valid EPUB with the given metadata and chapters.
pub fn build_epub(
    title: &str,
    authors: &[&str],
    language: &str,
    chapters: &[(&str, &str)],
) -> Vec<u8> {
    let meta = PackageMeta {
        identifier: "fixture".to_string(),
        title: title.to_string(),
        authors: authors.iter().map(|a| a.to_string()).collect(),
        language: Some(language.to_string()),
    };
    let chapters: Vec<PackageChapter> = chapters
        .iter()
        .map(|(title, body)| PackageChapter {
            title: title.to_string(),
            body: body.to_string(),
        })
        .collect();
    assemble_epub(&meta, &chapters, &[], None).unwrap()
}

/// A CBZ archive with the given page entries.
pub fn build_cbz(pages: &[(&str, &[u8])]) -> Vec<u8> {
    let mut buf = Vec::new();
    {
        let mut writer = zip::ZipWriter::new(Cursor::new(&mut buf));
        let options = zip::write::SimpleFileOptions::default();
        for (name, data) in pages {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
    }
    buf
}

/// A solid-color PNG of the given dimensions.
pub fn png_image(width: u32, height: u32, rgb: [u8; 3]) -> Vec<u8> {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb(rgb));
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, image::ImageFormat::Png).unwrap();
    out.into_inner()
}

/// A three-chapter MOBI with author metadata and a cover image.
pub fn build_mobi_with_cover() -> Vec<u8> {
    let markup = "<html><body><h1>One</h1><p>First chapter text.</p>\
        <mbp:pagebreak/><h1>Two</h1><p>Second chapter text.</p>\
        <mbp:pagebreak/><h1>Three</h1><p>Third chapter text.</p></body></html>";
    MobiBuilder::new(markup)
        .full_name("A Legacy Book")
        .exth_string(100, "Legacy Author")
        .exth_string(524, "en")
        .exth_u32(201, 0)
        .image(&png_image(120, 180, [200, 40, 40]))
        .build()
}
