use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tomekeeper_server::audio_merge::{AudioMergeManager, MergeTrack};
use tomekeeper_server::config::{AppConfig, CliConfig, FileConfig};
use tomekeeper_server::convert::ConvertManager;
use tomekeeper_server::extractor::models::ExtractedMetadata;
use tomekeeper_server::format::ACCEPTED_EXTENSIONS;
use tomekeeper_server::ingestion::{IngestionConfig, IngestionManager, RejectReason, UploadRequest};
use tomekeeper_server::jobs::{JobRegistry, JobStatus, SystemClock};
use tomekeeper_server::{FsBlobStorage, LibraryStore, NoOpSearchIndex, SqliteLibraryStore};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Directory holding the library database.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Directory for stored book files and covers. Defaults to db_dir.
    #[clap(long, value_parser = parse_path)]
    pub media_path: Option<PathBuf>,

    /// Optional TOML config file; its values override CLI flags.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest one or more book files into the library.
    Ingest {
        /// Files to ingest.
        #[clap(required = true, value_parser = parse_path)]
        files: Vec<PathBuf>,

        /// Re-ingest files whose content already exists in the library.
        #[clap(long)]
        overwrite: bool,

        /// Title override applied before extraction.
        #[clap(long)]
        title: Option<String>,

        /// Author override applied before extraction. Repeatable.
        #[clap(long)]
        author: Vec<String>,
    },
    /// Convert an ingested legacy ebook into an EPUB package.
    Convert {
        /// Library id of the book to convert.
        book_id: String,
    },
    /// Merge audio tracks into one chaptered M4B file.
    Merge {
        /// Audio files in any order; track numbers are inferred from names.
        #[clap(required = true, value_parser = parse_path)]
        tracks: Vec<PathBuf>,

        /// Title tag for the merged container.
        #[clap(long)]
        title: Option<String>,
    },
    /// List library entries, newest first.
    List {
        #[clap(long, default_value_t = 50)]
        limit: usize,
    },
    /// Verify that ffmpeg and ffprobe are available.
    CheckTools,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    if let Command::CheckTools = cli_args.command {
        tomekeeper_server::ffmpeg::check_tools_available().await?;
        println!("ffmpeg and ffprobe are available");
        return Ok(());
    }

    let file_config = match &cli_args.config {
        Some(path) => Some(FileConfig::load(path)?),
        None => None,
    };
    let cli_config = CliConfig {
        db_dir: cli_args.db_dir.clone(),
        media_path: cli_args.media_path.clone(),
    };
    let config = AppConfig::resolve(&cli_config, file_config)?;

    info!("Opening library database at {:?}", config.library_db_path());
    let library = Arc::new(SqliteLibraryStore::open(&config.library_db_path())?);
    let storage = Arc::new(FsBlobStorage::new(&config.media_path));
    let search = Arc::new(NoOpSearchIndex);
    let clock = Arc::new(SystemClock);

    let jobs = Arc::new(JobRegistry::new(
        clock.clone(),
        Duration::from_secs(config.jobs.ttl_secs),
    ));
    let shutdown_token = CancellationToken::new();
    let _sweeper = jobs.spawn_sweeper(
        Duration::from_secs(config.jobs.sweep_interval_secs),
        shutdown_token.clone(),
    );

    match cli_args.command {
        Command::Ingest {
            files,
            overwrite,
            title,
            author,
        } => {
            let manager = Arc::new(IngestionManager::new(
                library,
                storage,
                search,
                clock,
                IngestionConfig {
                    sync_threshold_bytes: config.ingestion.sync_threshold_bytes,
                    fulltext_index_threshold_bytes: config
                        .ingestion
                        .fulltext_index_threshold_bytes,
                },
            ));
            for path in files {
                let bytes = tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("Failed to read {:?}", path))?;
                let filename = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("upload")
                    .to_string();
                let mut request = UploadRequest::new(filename.clone(), bytes);
                request.overwrite = overwrite;
                request.metadata_overrides = ExtractedMetadata {
                    title: title.clone(),
                    authors: author.clone(),
                    ..Default::default()
                };
                let result = manager.process_upload(request).await;
                match (&result.id, &result.rejection) {
                    (Some(id), _) => println!(
                        "{}: ingested as {}{}",
                        filename,
                        id,
                        if result.deferred { " (processing in background)" } else { "" }
                    ),
                    (None, Some(RejectReason::UnsupportedFormat)) => println!(
                        "{}: rejected (unsupported format; accepted extensions: {})",
                        filename,
                        ACCEPTED_EXTENSIONS.join(", ")
                    ),
                    (None, Some(reason)) => println!("{}: rejected ({:?})", filename, reason),
                    (None, None) => println!("{}: rejected", filename),
                }
            }
            // Let spawned extraction and indexing tasks drain.
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        Command::Convert { book_id } => {
            let manager = Arc::new(ConvertManager::new(library, storage, jobs.clone()));
            let job_id = manager.request_conversion(&book_id)?;
            wait_for_job(&jobs, &job_id).await?;
        }
        Command::Merge { tracks, title } => {
            tomekeeper_server::ffmpeg::check_tools_available().await?;
            let manager = Arc::new(AudioMergeManager::new(
                storage,
                jobs.clone(),
                config.merge.bitrate_kbps,
            ));
            let mut merge_tracks = Vec::with_capacity(tracks.len());
            for path in tracks {
                let bytes = tokio::fs::read(&path)
                    .await
                    .with_context(|| format!("Failed to read {:?}", path))?;
                let filename = path
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("track")
                    .to_string();
                merge_tracks.push(MergeTrack { filename, bytes });
            }
            let job_id = manager.request_merge(title, merge_tracks)?;
            wait_for_job(&jobs, &job_id).await?;
        }
        Command::List { limit } => {
            let books = library.list_books(limit)?;
            for book in books {
                println!(
                    "{}  {:24}  {:10}  {:#}  {}",
                    book.id,
                    truncate(book.display_title(), 24),
                    book.format.as_str(),
                    byte_unit::Byte::from(book.size_bytes as u64),
                    book.authors.join(", "),
                );
            }
        }
        Command::CheckTools => unreachable!(),
    }

    shutdown_token.cancel();
    Ok(())
}

/// Poll a job until it reaches a terminal status, echoing progress.
async fn wait_for_job(jobs: &Arc<JobRegistry>, job_id: &str) -> Result<()> {
    let mut last_percent = 0;
    loop {
        let Some(job) = jobs.get(job_id) else {
            bail!("Job {} disappeared", job_id);
        };
        match job.status {
            JobStatus::Completed => {
                match job.result {
                    Some(result) => println!("done: {}", result),
                    None => println!("done"),
                }
                return Ok(());
            }
            JobStatus::Error => {
                bail!(
                    "Job failed: {}",
                    job.error.unwrap_or_else(|| "unknown error".to_string())
                );
            }
            _ => {
                if job.progress_percent != last_percent {
                    last_percent = job.progress_percent;
                    match (job.current, job.total) {
                        (Some(current), Some(total)) => {
                            println!("{:3}%  ({:.0}s / {:.0}s)", last_percent, current, total)
                        }
                        _ => println!("{:3}%", last_percent),
                    }
                }
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let cut: String = text.chars().take(max_chars.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}
