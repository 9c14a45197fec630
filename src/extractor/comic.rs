//! Comic archive (CBZ/CBR) extractor.
//!
//! Comics carry no textual metadata by design: metadata is empty, chapters
//! are the pages themselves (with no text), and the cover is the first page
//! in filename order.

use super::models::{Chapter, ExtractedContent, ExtractedMetadata, RawCover, TocEntry};
use super::{ExtractionIssue, FormatExtractor};
use crate::format::BookFormat;
use async_trait::async_trait;
use std::io::{Cursor, Read, Write};
use std::path::Path;

const PAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "bmp"];

pub struct ComicExtractor {
    pub format: BookFormat,
}

impl ComicExtractor {
    /// Page filenames in reading order, without extracting any image data.
    fn list_pages(&self, bytes: &[u8]) -> Result<Vec<String>, ExtractionIssue> {
        let mut pages = match self.format {
            BookFormat::ComicRar => list_rar_pages(bytes)?,
            _ => list_zip_pages(bytes)?,
        };
        pages.sort();
        Ok(pages)
    }

    /// The first page's bytes, for the cover.
    fn first_page(&self, bytes: &[u8]) -> Result<Option<(String, Vec<u8>)>, ExtractionIssue> {
        let Some(first) = self.list_pages(bytes)?.into_iter().next() else {
            return Ok(None);
        };
        let data = match self.format {
            BookFormat::ComicRar => read_rar_page(bytes, &first)?,
            _ => read_zip_page(bytes, &first)?,
        };
        Ok(data.map(|d| (first, d)))
    }
}

#[async_trait]
impl FormatExtractor for ComicExtractor {
    async fn metadata(&self, _bytes: &[u8]) -> Result<ExtractedMetadata, ExtractionIssue> {
        Ok(ExtractedMetadata::default())
    }

    async fn content(&self, bytes: &[u8]) -> Result<ExtractedContent, ExtractionIssue> {
        let pages = self.list_pages(bytes)?;
        let chapters: Vec<Chapter> = pages
            .iter()
            .enumerate()
            .map(|(index, name)| Chapter {
                index,
                title: page_title(name, index),
                text: String::new(),
            })
            .collect();
        let toc = chapters
            .iter()
            .map(|c| TocEntry {
                title: c.title.clone(),
                href: pages[c.index].clone(),
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
        Ok(self.first_page(bytes)?.map(|(name, bytes)| RawCover {
            mime: mime_for_page(&name).to_string(),
            bytes,
        }))
    }
}

fn is_page(name: &str) -> bool {
    let Some(ext) = Path::new(name).extension().and_then(|e| e.to_str()) else {
        return false;
    };
    PAGE_EXTENSIONS.contains(&ext.to_lowercase().as_str())
}

fn page_title(name: &str, index: usize) -> String {
    Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .map(|s| s.to_string())
        .unwrap_or_else(|| format!("Page {}", index + 1))
}

fn mime_for_page(name: &str) -> &'static str {
    match Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        _ => "image/jpeg",
    }
}

fn list_zip_pages(bytes: &[u8]) -> Result<Vec<String>, ExtractionIssue> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ExtractionIssue::new(format!("not a readable archive: {}", e)))?;

    let mut pages = Vec::new();
    for i in 0..archive.len() {
        let Ok(entry) = archive.by_index(i) else {
            continue;
        };
        if !entry.is_dir() && is_page(entry.name()) {
            pages.push(entry.name().to_string());
        }
    }
    Ok(pages)
}

fn read_zip_page(bytes: &[u8], name: &str) -> Result<Option<Vec<u8>>, ExtractionIssue> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| ExtractionIssue::new(format!("not a readable archive: {}", e)))?;
    let Ok(mut entry) = archive.by_name(name) else {
        return Ok(None);
    };
    let mut data = Vec::new();
    entry
        .read_to_end(&mut data)
        .map_err(|e| ExtractionIssue::new(format!("corrupt archive entry: {}", e)))?;
    Ok(Some(data))
}

/// The RAR backend only reads from paths, so the upload is staged through a
/// scratch file that is removed on drop.
fn stage_rar(bytes: &[u8]) -> Result<tempfile::NamedTempFile, ExtractionIssue> {
    let mut file = tempfile::Builder::new()
        .suffix(".cbr")
        .tempfile()
        .map_err(|e| ExtractionIssue::new(format!("scratch file failed: {}", e)))?;
    file.write_all(bytes)
        .map_err(|e| ExtractionIssue::new(format!("scratch write failed: {}", e)))?;
    Ok(file)
}

fn list_rar_pages(bytes: &[u8]) -> Result<Vec<String>, ExtractionIssue> {
    let staged = stage_rar(bytes)?;
    let mut archive = unrar::Archive::new(staged.path())
        .open_for_listing()
        .map_err(|e| ExtractionIssue::new(format!("not a readable archive: {}", e)))?;

    let mut pages = Vec::new();
    while let Some(entry) = archive.next() {
        let Ok(entry) = entry else { break };
        let name = entry.filename.to_string_lossy().to_string();
        if entry.is_file() && is_page(&name) {
            pages.push(name);
        }
    }
    Ok(pages)
}

fn read_rar_page(bytes: &[u8], name: &str) -> Result<Option<Vec<u8>>, ExtractionIssue> {
    let staged = stage_rar(bytes)?;
    let mut archive = unrar::Archive::new(staged.path())
        .open_for_processing()
        .map_err(|e| ExtractionIssue::new(format!("not a readable archive: {}", e)))?;

    while let Some(header) = archive
        .read_header()
        .map_err(|e| ExtractionIssue::new(format!("corrupt archive: {}", e)))?
    {
        let matches = header.entry().filename.to_string_lossy() == name;
        archive = if matches {
            let (data, _rest) = header
                .read()
                .map_err(|e| ExtractionIssue::new(format!("corrupt archive entry: {}", e)))?;
            return Ok(Some(data));
        } else {
            header
                .skip()
                .map_err(|e| ExtractionIssue::new(format!("corrupt archive: {}", e)))?
        };
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cbz(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut buf = Vec::new();
        {
            let mut writer = zip::ZipWriter::new(Cursor::new(&mut buf));
            let options = zip::write::SimpleFileOptions::default();
            for (name, data) in entries {
                writer.start_file(*name, options).unwrap();
                writer.write_all(data).unwrap();
            }
            writer.finish().unwrap();
        }
        buf
    }

    #[tokio::test]
    async fn test_pages_sorted_by_filename() {
        let bytes = cbz(&[
            ("010.png", b"later"),
            ("001.png", b"first"),
            ("notes.txt", b"skip me"),
            ("005.png", b"middle"),
        ]);
        let extractor = ComicExtractor {
            format: BookFormat::ComicZip,
        };

        let content = extractor.content(&bytes).await.unwrap();
        assert_eq!(content.chapters.len(), 3);
        assert_eq!(content.chapters[0].title, "001");
        assert_eq!(content.chapters[2].title, "010");
        // Image-only: chapters legitimately carry no text.
        assert!(content.chapters.iter().all(|c| c.text.is_empty()));
        assert!(content.full_text.is_empty());
    }

    #[tokio::test]
    async fn test_cover_is_first_page() {
        let bytes = cbz(&[("02.jpg", b"second"), ("01.jpg", b"cover bytes")]);
        let extractor = ComicExtractor {
            format: BookFormat::ComicZip,
        };
        let cover = extractor.cover(&bytes).await.unwrap().unwrap();
        assert_eq!(cover.bytes, b"cover bytes");
        assert_eq!(cover.mime, "image/jpeg");
    }

    #[tokio::test]
    async fn test_metadata_is_empty_by_design() {
        let bytes = cbz(&[("01.png", b"x")]);
        let extractor = ComicExtractor {
            format: BookFormat::ComicZip,
        };
        assert!(extractor.metadata(&bytes).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_non_archive_bytes_degrade() {
        let extractor = ComicExtractor {
            format: BookFormat::ComicZip,
        };
        assert!(extractor.content(b"definitely not a zip").await.is_err());
    }
}
