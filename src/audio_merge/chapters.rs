//! Track ordering and chapter boundary synthesis.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

/// One synthesized chapter. For an ordered sequence the list is contiguous:
/// `chapters[i].end_secs == chapters[i + 1].start_secs`, and the final end
/// equals the total merged duration.
#[derive(Debug, Clone, Serialize)]
pub struct AudioChapter {
    pub index: usize,
    pub title: String,
    pub start_secs: f64,
    pub end_secs: f64,
}

/// Infer a track number from common filename patterns: a leading number
/// ("01 - Intro"), "Track 2", or a parenthesized "(3)".
pub fn infer_track_number(filename: &str) -> Option<u32> {
    let stem = file_stem(filename);
    if let Some(caps) = leading_number_regex().captures(stem) {
        return caps[1].parse().ok();
    }
    if let Some(caps) = track_word_regex().captures(stem) {
        return caps[1].parse().ok();
    }
    if let Some(caps) = parenthesized_regex().captures(stem) {
        return caps[1].parse().ok();
    }
    None
}

/// Derive a chapter title from a filename: drop the extension, then strip
/// the numeric or "Track N" prefix. Falls back to the bare stem when
/// stripping would leave nothing.
pub fn chapter_title(filename: &str) -> String {
    let stem = file_stem(filename);
    let stripped = leading_number_regex().replace(stem, "");
    let stripped = track_word_regex().replace(&stripped, "");
    let stripped = parenthesized_regex().replace(&stripped, "");
    let title = stripped.trim_matches(|c: char| c.is_whitespace() || "-_.".contains(c));
    if title.is_empty() {
        stem.trim().to_string()
    } else {
        title.to_string()
    }
}

/// Sort tracks into playback order: inferred track number first, filename
/// as the tiebreak so unnumbered sets still order deterministically.
pub fn order_tracks<T, F: Fn(&T) -> &str>(tracks: &mut [T], filename_of: F) {
    tracks.sort_by(|a, b| {
        let (na, nb) = (
            infer_track_number(filename_of(a)),
            infer_track_number(filename_of(b)),
        );
        match (na, nb) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        }
        .then_with(|| filename_of(a).cmp(filename_of(b)))
    });
}

/// Compute chapter boundaries as a prefix sum over track durations.
pub fn build_chapters(tracks: &[(String, f64)]) -> Vec<AudioChapter> {
    let mut chapters = Vec::with_capacity(tracks.len());
    let mut cursor = 0.0;
    for (index, (filename, duration)) in tracks.iter().enumerate() {
        let start_secs = cursor;
        cursor += duration;
        chapters.push(AudioChapter {
            index,
            title: chapter_title(filename),
            start_secs,
            end_secs: cursor,
        });
    }
    chapters
}

fn file_stem(filename: &str) -> &str {
    filename
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(filename)
}

fn leading_number_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\s*(\d{1,4})\s*[-._)\]]*\s*").unwrap())
}

fn track_word_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\btrack\s*(\d{1,4})\b").unwrap())
}

fn parenthesized_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\((\d{1,4})\)").unwrap())
}
