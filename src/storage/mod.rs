//! Blob storage collaborator.
//!
//! The pipeline never assumes an absolute filesystem layout: every persisted
//! path is relative to the storage root and resolved on demand.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use tracing::warn;

/// Storage for book files and covers.
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Persist file bytes under the given id, returning a relative path.
    async fn store_file(&self, bytes: &[u8], id: &str, extension: &str) -> Result<String>;

    /// Persist normalized cover bytes, returning a relative path.
    async fn store_cover(&self, bytes: &[u8], id: &str) -> Result<String>;

    /// Delete a previously stored blob. False when it was already gone.
    async fn delete(&self, relative_path: &str) -> bool;

    /// Resolve a relative path to an absolute one.
    fn resolve(&self, relative_path: &str) -> PathBuf;
}

/// Filesystem-backed blob storage rooted at the media path.
pub struct FsBlobStorage {
    root: PathBuf,
}

impl FsBlobStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn write(&self, relative: &str, bytes: &[u8]) -> Result<()> {
        let absolute = self.root.join(relative);
        if let Some(parent) = absolute.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
        fs::write(&absolute, bytes)
            .await
            .with_context(|| format!("Failed to write {:?}", absolute))
    }
}

#[async_trait]
impl BlobStorage for FsBlobStorage {
    async fn store_file(&self, bytes: &[u8], id: &str, extension: &str) -> Result<String> {
        let relative = format!("files/{}.{}", id, extension);
        self.write(&relative, bytes).await?;
        Ok(relative)
    }

    async fn store_cover(&self, bytes: &[u8], id: &str) -> Result<String> {
        let relative = format!("covers/{}.jpg", id);
        self.write(&relative, bytes).await?;
        Ok(relative)
    }

    async fn delete(&self, relative_path: &str) -> bool {
        let absolute = self.root.join(relative_path);
        match fs::remove_file(&absolute).await {
            Ok(()) => true,
            Err(e) => {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("Failed to delete blob {:?}: {}", absolute, e);
                }
                false
            }
        }
    }

    fn resolve(&self, relative_path: &str) -> PathBuf {
        self.root.join(relative_path)
    }
}
