mod file_config;

pub use file_config::{FileConfig, IngestionFileConfig, JobsFileConfig, MergeFileConfig};

use anyhow::{bail, Result};
use std::path::PathBuf;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub media_path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    pub media_path: PathBuf,

    // Pipeline settings (with defaults)
    pub ingestion: IngestionSettings,
    pub merge: MergeSettings,
    pub jobs: JobsSettings,
}

#[derive(Debug, Clone)]
pub struct IngestionSettings {
    pub sync_threshold_bytes: u64,
    pub fulltext_index_threshold_bytes: u64,
}

impl Default for IngestionSettings {
    fn default() -> Self {
        Self {
            sync_threshold_bytes: 5 * 1024 * 1024,
            fulltext_index_threshold_bytes: 20 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MergeSettings {
    pub bitrate_kbps: u32,
}

impl Default for MergeSettings {
    fn default() -> Self {
        Self { bitrate_kbps: 128 }
    }
}

#[derive(Debug, Clone)]
pub struct JobsSettings {
    pub ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for JobsSettings {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            sweep_interval_secs: 60,
        }
    }
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        // TOML overrides CLI for each field
        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        // Validate db_dir exists
        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let media_path = file
            .media_path
            .map(PathBuf::from)
            .or_else(|| cli.media_path.clone())
            .unwrap_or_else(|| db_dir.clone());

        let ingestion_file = file.ingestion.unwrap_or_default();
        let ingestion_defaults = IngestionSettings::default();
        let ingestion = IngestionSettings {
            sync_threshold_bytes: ingestion_file
                .sync_threshold_bytes
                .unwrap_or(ingestion_defaults.sync_threshold_bytes),
            fulltext_index_threshold_bytes: ingestion_file
                .fulltext_index_threshold_bytes
                .unwrap_or(ingestion_defaults.fulltext_index_threshold_bytes),
        };

        let merge_file = file.merge.unwrap_or_default();
        let merge = MergeSettings {
            bitrate_kbps: merge_file
                .bitrate_kbps
                .unwrap_or(MergeSettings::default().bitrate_kbps),
        };

        let jobs_file = file.jobs.unwrap_or_default();
        let jobs_defaults = JobsSettings::default();
        let jobs = JobsSettings {
            ttl_secs: jobs_file.ttl_secs.unwrap_or(jobs_defaults.ttl_secs),
            sweep_interval_secs: jobs_file
                .sweep_interval_secs
                .unwrap_or(jobs_defaults.sweep_interval_secs),
        };

        Ok(Self {
            db_dir,
            media_path,
            ingestion,
            merge,
            jobs,
        })
    }

    pub fn library_db_path(&self) -> PathBuf {
        self.db_dir.join("library.db")
    }
}
