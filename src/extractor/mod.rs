//! Per-format metadata, content and cover extraction.
//!
//! One adapter per container format, all behind [`FormatExtractor`]. The
//! contract is lenient by design: any of the three calls may legitimately
//! come back empty (comics have no textual metadata), and structurally
//! invalid input degrades to an empty result instead of failing ingestion.
//! Callers log issues at low severity and fall back to defaults.

mod audio;
mod comic;
mod epub;
mod mobi;
pub mod models;
mod pdf;

use crate::format::BookFormat;
use async_trait::async_trait;
use models::{ExtractedContent, ExtractedMetadata, RawCover};
use thiserror::Error;

/// A recoverable extraction problem. Logged, never propagated past the
/// extraction call site.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ExtractionIssue(pub String);

impl ExtractionIssue {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Capability set every format adapter implements over raw upload bytes.
#[async_trait]
pub trait FormatExtractor: Send + Sync {
    async fn metadata(&self, bytes: &[u8]) -> Result<ExtractedMetadata, ExtractionIssue>;

    async fn content(&self, bytes: &[u8]) -> Result<ExtractedContent, ExtractionIssue>;

    async fn cover(&self, bytes: &[u8]) -> Result<Option<RawCover>, ExtractionIssue>;
}

/// Select the adapter for a sniffed format.
pub fn extractor_for(format: BookFormat) -> Box<dyn FormatExtractor> {
    match format {
        BookFormat::Epub => Box::new(epub::EpubExtractor),
        BookFormat::Mobi | BookFormat::MobiNextGen => Box::new(mobi::MobiExtractor),
        BookFormat::Pdf => Box::new(pdf::PdfExtractor),
        BookFormat::ComicZip | BookFormat::ComicRar => Box::new(comic::ComicExtractor { format }),
        BookFormat::AudioM4b | BookFormat::AudioM4a | BookFormat::AudioMp3 => {
            Box::new(audio::AudioExtractor)
        }
    }
}

/// Strip markup, scripts and styling from HTML, collapsing whitespace but
/// keeping paragraph breaks for downstream chunking.
pub(crate) fn html_to_text(html: &str) -> String {
    let without_blocks = script_style_regex().replace_all(html, " ");
    let document = scraper::Html::parse_document(&without_blocks);
    let text: String = document.root_element().text().collect::<Vec<_>>().join(" ");
    collapse_whitespace(&text)
}

/// Collapse runs of spaces and blank lines; keeps at most one empty line
/// between paragraphs.
pub(crate) fn collapse_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut blank_run = 0;
    for line in text.lines() {
        let collapsed = line.split_whitespace().collect::<Vec<_>>().join(" ");
        if collapsed.is_empty() {
            blank_run += 1;
            continue;
        }
        if !out.is_empty() {
            out.push('\n');
            if blank_run > 0 {
                out.push('\n');
            }
        }
        blank_run = 0;
        out.push_str(&collapsed);
    }
    out
}

fn script_style_regex() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| {
        regex::Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").unwrap()
    })
}
