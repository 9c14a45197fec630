//! Upload ingestion pipeline.

mod manager;
mod models;

pub use manager::{IngestionConfig, IngestionManager};
pub use models::{ProcessingResult, RejectReason, UploadRequest};
