//! Tomekeeper Server Library
//!
//! This library exposes the internal modules for testing and potential reuse.

pub mod audio_merge;
pub mod config;
pub mod convert;
pub mod cover;
pub mod extractor;
pub mod ffmpeg;
pub mod format;
pub mod ingestion;
pub mod jobs;
pub mod library_store;
pub mod mobi;
pub mod search;
pub mod storage;

// Re-export commonly used types for convenience
pub use format::{sniff_format, BookFormat};
pub use ingestion::{IngestionManager, ProcessingResult, UploadRequest};
pub use jobs::{JobRegistry, JobStatus, SystemClock};
pub use library_store::{Book, LibraryStore, SqliteLibraryStore};
pub use search::{NoOpSearchIndex, SearchIndex};
pub use storage::{BlobStorage, FsBlobStorage};
