//! ffprobe/ffmpeg process integration.
//!
//! Probing parses ffprobe's JSON output (format, streams, tags, embedded
//! chapters); the merge engine builds on the same module for encoding. Both
//! tools are expected on PATH and checked once at startup via
//! `check_tools_available`.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;

#[derive(Debug, Error)]
pub enum FfmpegError {
    #[error("ffprobe failed: {0}")]
    ProbeFailed(String),

    #[error("ffmpeg failed: {0}")]
    EncodeFailed(String),

    #[error("ffmpeg/ffprobe not available: {0}")]
    ToolMissing(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid probe output: {0}")]
    InvalidOutput(String),
}

/// Everything we read off one audio file in a single ffprobe pass.
#[derive(Debug, Clone)]
pub struct AudioProbe {
    /// Duration in seconds.
    pub duration_secs: f64,
    /// Audio codec name (e.g. "mp3", "aac").
    pub codec: String,
    /// Bitrate in kbps.
    pub bitrate_kbps: Option<i32>,
    pub sample_rate: Option<i32>,
    pub channels: Option<i32>,
    /// Container format name.
    pub format: String,
    /// Container-level tags, lowercased keys.
    pub tags: HashMap<String, String>,
    /// Embedded chapter markers (start, end, title), seconds.
    pub chapters: Vec<(f64, f64, String)>,
}

/// ffprobe JSON output structure.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: FfprobeFormat,
    streams: Vec<FfprobeStream>,
    #[serde(default)]
    chapters: Vec<FfprobeChapter>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    format_name: String,
    duration: Option<String>,
    bit_rate: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: String,
    codec_name: Option<String>,
    sample_rate: Option<String>,
    channels: Option<i32>,
    bit_rate: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeChapter {
    start_time: Option<String>,
    end_time: Option<String>,
    #[serde(default)]
    tags: HashMap<String, String>,
}

/// Probe an audio file for stream, tag and chapter information.
pub async fn probe_audio_file(path: &Path) -> Result<AudioProbe, FfmpegError> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
            "-show_chapters",
        ])
        .arg(path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(FfmpegError::ProbeFailed(stderr.to_string()));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    let probe: FfprobeOutput = serde_json::from_str(&stdout)
        .map_err(|e| FfmpegError::InvalidOutput(format!("JSON parse error: {}", e)))?;

    let audio_stream = probe
        .streams
        .iter()
        .find(|s| s.codec_type == "audio")
        .ok_or_else(|| FfmpegError::InvalidOutput("No audio stream found".to_string()))?;

    let duration_secs: f64 = probe
        .format
        .duration
        .as_ref()
        .and_then(|d| d.parse().ok())
        .unwrap_or(0.0);

    // Prefer stream bitrate, fall back to format bitrate.
    let bitrate_kbps = audio_stream
        .bit_rate
        .as_ref()
        .or(probe.format.bit_rate.as_ref())
        .and_then(|b| b.parse::<i64>().ok())
        .map(|b| (b / 1000) as i32);

    let tags = probe
        .format
        .tags
        .into_iter()
        .map(|(k, v)| (k.to_lowercase(), v))
        .collect();

    let chapters = probe
        .chapters
        .into_iter()
        .map(|c| {
            let start = c.start_time.as_deref().and_then(|s| s.parse().ok());
            let end = c.end_time.as_deref().and_then(|s| s.parse().ok());
            let title = c.tags.get("title").cloned().unwrap_or_default();
            (start.unwrap_or(0.0), end.unwrap_or(0.0), title)
        })
        .collect();

    Ok(AudioProbe {
        duration_secs,
        codec: audio_stream
            .codec_name
            .clone()
            .unwrap_or_else(|| "unknown".to_string()),
        bitrate_kbps,
        sample_rate: audio_stream
            .sample_rate
            .as_ref()
            .and_then(|sr| sr.parse().ok()),
        channels: audio_stream.channels,
        format: probe.format.format_name,
        tags,
        chapters,
    })
}

/// Extract embedded cover art (the attached picture stream), if any.
pub async fn extract_embedded_art(path: &Path) -> Result<Option<Vec<u8>>, FfmpegError> {
    let scratch = tempfile::Builder::new().suffix(".jpg").tempfile()?;

    let output = Command::new("ffmpeg")
        .arg("-i")
        .arg(path)
        .args(["-map", "0:v:0", "-frames:v", "1", "-f", "mjpeg", "-y"])
        .arg(scratch.path())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .output()
        .await?;

    if !output.status.success() {
        // No attached picture stream; absence is a valid outcome.
        return Ok(None);
    }

    let bytes = tokio::fs::read(scratch.path()).await?;
    Ok(if bytes.is_empty() { None } else { Some(bytes) })
}

/// Check that ffmpeg and ffprobe are on PATH and runnable.
pub async fn check_tools_available() -> Result<(), FfmpegError> {
    for tool in ["ffprobe", "ffmpeg"] {
        let result = Command::new(tool)
            .arg("-version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        match result {
            Ok(status) if status.success() => {}
            _ => {
                return Err(FfmpegError::ToolMissing(format!(
                    "{} not found or not working",
                    tool
                )));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_probe_json_parsing() {
        let json = r#"{
            "format": {
                "format_name": "mp3",
                "duration": "181.42",
                "bit_rate": "192000",
                "tags": {"TITLE": "Intro", "artist": "Narrator"}
            },
            "streams": [
                {"codec_type": "audio", "codec_name": "mp3",
                 "sample_rate": "44100", "channels": 2, "bit_rate": "192000"}
            ],
            "chapters": [
                {"start_time": "0.0", "end_time": "90.5", "tags": {"title": "Part 1"}}
            ]
        }"#;
        let parsed: FfprobeOutput = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.format.format_name, "mp3");
        assert_eq!(parsed.streams.len(), 1);
        assert_eq!(parsed.chapters.len(), 1);
        assert_eq!(
            parsed.chapters[0].tags.get("title").map(|s| s.as_str()),
            Some("Part 1")
        );
    }

    #[test]
    fn test_probe_json_without_chapters_field() {
        let json = r#"{
            "format": {"format_name": "wav"},
            "streams": [{"codec_type": "audio"}]
        }"#;
        let parsed: FfprobeOutput = serde_json::from_str(json).unwrap();
        assert!(parsed.chapters.is_empty());
        assert!(parsed.format.tags.is_empty());
    }
}
