//! Multi-track audio merge into one chaptered M4B container.
//!
//! Tracks are staged to a scratch directory, probed for duration and codec,
//! ordered, and handed to ffmpeg with a concat manifest and an ffmetadata
//! chapter document. Sources already in AAC are stream-copied; anything else
//! is re-encoded at a fixed bitrate. Progress comes from parsing `time=`
//! markers on ffmpeg's stderr while it runs.

mod chapters;

pub use chapters::{build_chapters, chapter_title, infer_track_number, AudioChapter};

use crate::ffmpeg::{probe_audio_file, FfmpegError};
use crate::jobs::{JobRegistry, JobUpdate};
use crate::storage::BlobStorage;
use chapters::order_tracks;
use regex::Regex;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::sync::OnceLock;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Codec of the destination container.
const DESTINATION_CODEC: &str = "aac";

pub const JOB_KIND_MERGE: &str = "merge";

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("No tracks to merge")]
    NoTracks,

    #[error(transparent)]
    Ffmpeg(#[from] FfmpegError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Store error: {0}")]
    Store(#[from] anyhow::Error),
}

/// One source track, bytes plus the name used for ordering and titling.
pub struct MergeTrack {
    pub filename: String,
    pub bytes: Vec<u8>,
}

/// Runs merges as tracked background jobs.
pub struct AudioMergeManager {
    storage: Arc<dyn BlobStorage>,
    jobs: Arc<JobRegistry>,
    /// Bitrate used when re-encoding, kbps.
    bitrate_kbps: u32,
}

impl AudioMergeManager {
    pub fn new(storage: Arc<dyn BlobStorage>, jobs: Arc<JobRegistry>, bitrate_kbps: u32) -> Self {
        Self {
            storage,
            jobs,
            bitrate_kbps,
        }
    }

    /// Start a merge. Returns the job id to poll or subscribe to.
    pub fn request_merge(
        self: &Arc<Self>,
        title: Option<String>,
        tracks: Vec<MergeTrack>,
    ) -> Result<String, MergeError> {
        if tracks.is_empty() {
            return Err(MergeError::NoTracks);
        }
        let job_id = uuid::Uuid::new_v4().to_string();
        self.jobs.create(&job_id, JOB_KIND_MERGE);
        info!("Merging {} tracks as job {}", tracks.len(), job_id);

        let manager = Arc::clone(self);
        let job = job_id.clone();
        tokio::spawn(async move {
            manager.run_merge(&job, title, tracks).await;
        });
        Ok(job_id)
    }

    async fn run_merge(&self, job_id: &str, title: Option<String>, tracks: Vec<MergeTrack>) {
        self.jobs.update(job_id, JobUpdate::Running);
        // The TempDir guard removes scratch files on every exit path.
        match self.merge(job_id, title, tracks).await {
            Ok(path) => {
                info!("Job {} produced merged audio {}", job_id, path);
                self.jobs
                    .update(job_id, JobUpdate::Completed { result: Some(path) });
            }
            Err(e) => {
                warn!("Job {} failed: {}", job_id, e);
                self.jobs.update(
                    job_id,
                    JobUpdate::Failed {
                        error: e.to_string(),
                    },
                );
            }
        }
    }

    async fn merge(
        &self,
        job_id: &str,
        title: Option<String>,
        mut tracks: Vec<MergeTrack>,
    ) -> Result<String, MergeError> {
        let scratch = tempfile::tempdir()?;
        order_tracks(&mut tracks, |t| t.filename.as_str());

        let mut staged: Vec<(String, PathBuf)> = Vec::with_capacity(tracks.len());
        for (i, track) in tracks.iter().enumerate() {
            let extension = track
                .filename
                .rsplit_once('.')
                .map(|(_, ext)| ext.to_ascii_lowercase())
                .unwrap_or_else(|| "mp3".to_string());
            let path = scratch.path().join(format!("track-{:03}.{}", i, extension));
            tokio::fs::write(&path, &track.bytes).await?;
            staged.push((track.filename.clone(), path));
        }

        let mut durations = Vec::with_capacity(staged.len());
        let mut all_destination_codec = true;
        for (filename, path) in &staged {
            let probe = probe_audio_file(path).await?;
            if probe.codec != DESTINATION_CODEC {
                all_destination_codec = false;
            }
            durations.push((filename.clone(), probe.duration_secs));
        }

        let chapter_list = build_chapters(&durations);
        let total_secs = chapter_list.last().map(|c| c.end_secs).unwrap_or(0.0);

        let manifest_path = scratch.path().join("concat.txt");
        let paths: Vec<&Path> = staged.iter().map(|(_, p)| p.as_path()).collect();
        tokio::fs::write(&manifest_path, concat_manifest(&paths)).await?;

        let metadata_path = scratch.path().join("chapters.ffmeta");
        tokio::fs::write(
            &metadata_path,
            ffmetadata_document(title.as_deref(), &chapter_list),
        )
        .await?;

        let output_path = scratch.path().join("merged.m4b");
        debug!(
            "Job {}: {} tracks, {:.1}s total, stream copy: {}",
            job_id,
            staged.len(),
            total_secs,
            all_destination_codec
        );
        self.run_ffmpeg(
            job_id,
            &manifest_path,
            &metadata_path,
            &output_path,
            all_destination_codec,
            total_secs,
        )
        .await?;

        let merged = tokio::fs::read(&output_path).await?;
        let artifact_id = uuid::Uuid::new_v4().to_string();
        let relative = self.storage.store_file(&merged, &artifact_id, "m4b").await?;
        Ok(relative)
    }

    async fn run_ffmpeg(
        &self,
        job_id: &str,
        manifest: &Path,
        metadata: &Path,
        output: &Path,
        stream_copy: bool,
        total_secs: f64,
    ) -> Result<(), MergeError> {
        let mut command = Command::new("ffmpeg");
        command
            .args(["-f", "concat", "-safe", "0", "-i"])
            .arg(manifest)
            .arg("-i")
            .arg(metadata)
            .args(["-map_metadata", "1", "-map", "0:a"]);
        if stream_copy {
            command.args(["-c:a", "copy"]);
        } else {
            command.args(["-c:a", DESTINATION_CODEC, "-b:a"]);
            command.arg(format!("{}k", self.bitrate_kbps));
        }
        command
            .args(["-f", "mp4", "-y"])
            .arg(output)
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = command.spawn()?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| FfmpegError::EncodeFailed("No stderr handle".to_string()))?;

        // Consume stderr incrementally so progress is visible before exit,
        // keeping a tail for the failure diagnostic.
        let mut tail: VecDeque<String> = VecDeque::with_capacity(20);
        let mut lines = BufReader::new(stderr).lines();
        while let Some(line) = lines.next_line().await? {
            if let Some(elapsed) = parse_progress_secs(&line) {
                let percent = if total_secs > 0.0 {
                    ((elapsed / total_secs) * 100.0).clamp(0.0, 100.0) as u8
                } else {
                    0
                };
                self.jobs.update(
                    job_id,
                    JobUpdate::Progress {
                        percent,
                        current: Some(elapsed),
                        total: Some(total_secs),
                    },
                );
            }
            if tail.len() == 20 {
                tail.pop_front();
            }
            tail.push_back(line);
        }

        let status = child.wait().await?;
        if !status.success() {
            let diagnostic: Vec<String> = tail.into_iter().collect();
            return Err(FfmpegError::EncodeFailed(diagnostic.join("\n")).into());
        }
        Ok(())
    }
}

/// Build the concat demuxer manifest. Single quotes inside paths use the
/// demuxer's quote-break escape.
fn concat_manifest(paths: &[&Path]) -> String {
    let mut out = String::new();
    for path in paths {
        let escaped = path.to_string_lossy().replace('\'', r"'\''");
        out.push_str(&format!("file '{}'\n", escaped));
    }
    out
}

/// Build an ffmetadata document with one `[CHAPTER]` block per chapter,
/// millisecond timebase.
fn ffmetadata_document(title: Option<&str>, chapters: &[AudioChapter]) -> String {
    let mut out = String::from(";FFMETADATA1\n");
    if let Some(title) = title {
        out.push_str(&format!("title={}\n", ffmetadata_escape(title)));
    }
    for chapter in chapters {
        out.push_str("[CHAPTER]\nTIMEBASE=1/1000\n");
        out.push_str(&format!("START={}\n", (chapter.start_secs * 1000.0).round() as i64));
        out.push_str(&format!("END={}\n", (chapter.end_secs * 1000.0).round() as i64));
        out.push_str(&format!("title={}\n", ffmetadata_escape(&chapter.title)));
    }
    out
}

/// Escape the characters the ffmetadata format treats specially.
fn ffmetadata_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '=' | ';' | '#' | '\\' | '\n' => {
                out.push('\\');
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

/// Parse the elapsed seconds out of an ffmpeg progress line
/// (`... time=00:03:21.45 ...`).
fn parse_progress_secs(line: &str) -> Option<f64> {
    let caps = time_regex().captures(line)?;
    let hours: f64 = caps[1].parse().ok()?;
    let minutes: f64 = caps[2].parse().ok()?;
    let seconds: f64 = caps[3].parse().ok()?;
    let fraction = caps
        .get(4)
        .and_then(|m| format!("0.{}", m.as_str()).parse::<f64>().ok())
        .unwrap_or(0.0);
    Some(hours * 3600.0 + minutes * 60.0 + seconds + fraction)
}

fn time_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"time=(\d+):(\d{2}):(\d{2})(?:\.(\d+))?").unwrap())
}
