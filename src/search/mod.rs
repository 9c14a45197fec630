//! Search index collaborator.
//!
//! The pipeline is the sole producer for the external search engine; it never
//! queries. Chapter text is chunked into bounded pieces before indexing.

mod chunker;

pub use chunker::{chunk_text, CHUNK_TARGET_CHARS};

use anyhow::Result;
use tracing::debug;

/// External search index interface.
pub trait SearchIndex: Send + Sync {
    fn index_metadata(
        &self,
        id: &str,
        title: Option<&str>,
        subtitle: Option<&str>,
        authors: &[String],
        description: Option<&str>,
    ) -> Result<()>;

    fn index_content(&self, id: &str, chunks: &[String]) -> Result<()>;

    fn remove_index(&self, id: &str) -> Result<()>;
}

/// A no-op index for deployments without a search engine.
pub struct NoOpSearchIndex;

impl SearchIndex for NoOpSearchIndex {
    fn index_metadata(
        &self,
        id: &str,
        _title: Option<&str>,
        _subtitle: Option<&str>,
        _authors: &[String],
        _description: Option<&str>,
    ) -> Result<()> {
        debug!("Search disabled, dropping metadata for {}", id);
        Ok(())
    }

    fn index_content(&self, id: &str, chunks: &[String]) -> Result<()> {
        debug!("Search disabled, dropping {} chunks for {}", chunks.len(), id);
        Ok(())
    }

    fn remove_index(&self, _id: &str) -> Result<()> {
        Ok(())
    }
}
