//! Audio container/track extractor (M4B, M4A, MP3).
//!
//! Stages the upload into a scratch file and reads everything through one
//! ffprobe pass: container tags become metadata, embedded chapter markers
//! become the table of contents, attached art becomes the cover.

use super::models::{
    synthetic_chapter_title, Chapter, ExtractedContent, ExtractedMetadata, RawCover, TocEntry,
};
use super::{ExtractionIssue, FormatExtractor};
use crate::ffmpeg::{self, AudioProbe};
use async_trait::async_trait;
use std::io::Write;

pub struct AudioExtractor;

async fn probe(bytes: &[u8]) -> Result<(tempfile::NamedTempFile, AudioProbe), ExtractionIssue> {
    let mut scratch = tempfile::Builder::new()
        .suffix(".audio")
        .tempfile()
        .map_err(|e| ExtractionIssue::new(format!("scratch file failed: {}", e)))?;
    scratch
        .write_all(bytes)
        .map_err(|e| ExtractionIssue::new(format!("scratch write failed: {}", e)))?;

    let probe = ffmpeg::probe_audio_file(scratch.path())
        .await
        .map_err(|e| ExtractionIssue::new(format!("audio probe failed: {}", e)))?;
    Ok((scratch, probe))
}

#[async_trait]
impl FormatExtractor for AudioExtractor {
    async fn metadata(&self, bytes: &[u8]) -> Result<ExtractedMetadata, ExtractionIssue> {
        let (_scratch, probe) = probe(bytes).await?;
        Ok(metadata_from_tags(&probe))
    }

    async fn content(&self, bytes: &[u8]) -> Result<ExtractedContent, ExtractionIssue> {
        let (_scratch, probe) = probe(bytes).await?;

        // Chapters from embedded markers; audio has no text to extract.
        let chapters: Vec<Chapter> = probe
            .chapters
            .iter()
            .enumerate()
            .map(|(index, (_, _, title))| Chapter {
                index,
                title: if title.is_empty() {
                    synthetic_chapter_title(index)
                } else {
                    title.clone()
                },
                text: String::new(),
            })
            .collect();

        let toc = chapters
            .iter()
            .zip(probe.chapters.iter())
            .map(|(c, (start, _, _))| TocEntry {
                title: c.title.clone(),
                href: format!("t={:.3}", start),
                index: c.index,
            })
            .collect();

        Ok(ExtractedContent {
            full_text: String::new(),
            chapters,
            toc,
        })
    }

    async fn cover(&self, bytes: &[u8]) -> Result<Option<RawCover>, ExtractionIssue> {
        let (scratch, _probe) = probe(bytes).await?;
        let art = ffmpeg::extract_embedded_art(scratch.path())
            .await
            .map_err(|e| ExtractionIssue::new(format!("art extraction failed: {}", e)))?;
        Ok(art.map(|bytes| RawCover {
            bytes,
            mime: "image/jpeg".to_string(),
        }))
    }
}

fn metadata_from_tags(probe: &AudioProbe) -> ExtractedMetadata {
    let tag = |key: &str| probe.tags.get(key).cloned().filter(|v| !v.is_empty());

    // Audiobook rips commonly put the author in artist and the narrator in
    // composer; album usually repeats the book title.
    ExtractedMetadata {
        title: tag("title").or_else(|| tag("album")),
        subtitle: None,
        authors: tag("artist")
            .or_else(|| tag("album_artist"))
            .map(|a| vec![a])
            .unwrap_or_default(),
        publisher: tag("publisher"),
        description: tag("comment").or_else(|| tag("description")),
        language: tag("language"),
        isbn10: None,
        isbn13: None,
        page_count: None,
        published_date: tag("date").or_else(|| tag("year")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn probe_with_tags(tags: &[(&str, &str)]) -> AudioProbe {
        AudioProbe {
            duration_secs: 100.0,
            codec: "aac".to_string(),
            bitrate_kbps: Some(128),
            sample_rate: Some(44100),
            channels: Some(2),
            format: "m4b".to_string(),
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
            chapters: Vec::new(),
        }
    }

    #[test]
    fn test_metadata_from_tags() {
        let probe = probe_with_tags(&[
            ("title", "The Long Way"),
            ("artist", "A. Narrated Author"),
            ("date", "2019"),
        ]);
        let meta = metadata_from_tags(&probe);
        assert_eq!(meta.title.as_deref(), Some("The Long Way"));
        assert_eq!(meta.authors, vec!["A. Narrated Author"]);
        assert_eq!(meta.published_date.as_deref(), Some("2019"));
    }

    #[test]
    fn test_album_fallback_for_title() {
        let probe = probe_with_tags(&[("album", "Fallback Title")]);
        let meta = metadata_from_tags(&probe);
        assert_eq!(meta.title.as_deref(), Some("Fallback Title"));
    }
}
