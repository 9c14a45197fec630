use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub media_path: Option<String>,

    // Feature configs
    pub ingestion: Option<IngestionFileConfig>,
    pub merge: Option<MergeFileConfig>,
    pub jobs: Option<JobsFileConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct IngestionFileConfig {
    /// Uploads below this size are processed synchronously.
    pub sync_threshold_bytes: Option<u64>,
    /// Uploads at or above this size skip full-text indexing.
    pub fulltext_index_threshold_bytes: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct MergeFileConfig {
    /// Bitrate used when the merge has to re-encode, kbps.
    pub bitrate_kbps: Option<u32>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct JobsFileConfig {
    /// How long an unobserved finished job stays around, seconds.
    pub ttl_secs: Option<u64>,
    /// Sweep interval for evicting finished jobs, seconds.
    pub sweep_interval_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
