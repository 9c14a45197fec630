//! Request and result types for uploads.

use crate::extractor::models::ExtractedMetadata;
use serde::Serialize;

/// One uploaded file plus caller-supplied hints.
pub struct UploadRequest {
    pub filename: String,
    pub bytes: Vec<u8>,
    /// Fields the caller already knows; these take precedence over
    /// extraction and are persisted immediately.
    pub metadata_overrides: ExtractedMetadata,
    /// Re-ingest even when the content hash already exists.
    pub overwrite: bool,
}

impl UploadRequest {
    pub fn new(filename: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            bytes,
            metadata_overrides: ExtractedMetadata::default(),
            overwrite: false,
        }
    }
}

/// Why an upload was not ingested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum RejectReason {
    /// The sniffer found no match. Terminal, not retryable.
    UnsupportedFormat,
    /// Identical bytes already in the library. A navigable outcome,
    /// not an error.
    Duplicate { existing_id: String },
    /// Blob storage or database failure.
    StorageFailure { detail: String },
}

/// Outcome of one upload.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessingResult {
    pub success: bool,
    pub id: Option<String>,
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub rejection: Option<RejectReason>,
    pub elapsed_ms: u64,
    /// True when extraction was deferred to a background task.
    pub deferred: bool,
}

impl ProcessingResult {
    pub fn ingested(id: String, elapsed_ms: u64, deferred: bool) -> Self {
        Self {
            success: true,
            id: Some(id),
            rejection: None,
            elapsed_ms,
            deferred,
        }
    }

    pub fn rejected(reason: RejectReason, elapsed_ms: u64) -> Self {
        Self {
            success: false,
            id: None,
            rejection: Some(reason),
            elapsed_ms,
            deferred: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_is_not_success() {
        let result = ProcessingResult::rejected(
            RejectReason::Duplicate {
                existing_id: "b-1".to_string(),
            },
            3,
        );
        assert!(!result.success);
        assert!(result.id.is_none());
        assert_eq!(
            result.rejection,
            Some(RejectReason::Duplicate {
                existing_id: "b-1".to_string()
            })
        );
    }
}
