//! Parser for the Palm-database legacy ebook family (MOBI/AZW3).
//!
//! A MOBI file is a Palm database: a 78-byte header, a record offset table,
//! and a sequence of records. Record 0 holds the PalmDoc compression header,
//! the MOBI header and the optional EXTH metadata block; records 1..N hold
//! the (possibly LZ77-compressed) book markup; later records hold images and
//! bookkeeping. One file can carry both the classic part and a
//! next-generation (KF8) part, separated at the boundary record named by
//! EXTH record 121.

mod exth;
mod palmdoc;

pub use exth::ExthRecords;

use crate::extractor::models::ExtractedMetadata;
use thiserror::Error;

/// Hard cap on records honored from the PDB offset table. Real books stay
/// far below this; it bounds parsing of hostile record counts.
const MAX_RECORDS: usize = 16_384;

#[derive(Debug, Error)]
pub enum MobiError {
    #[error("Truncated file: {0}")]
    Truncated(&'static str),

    #[error("Not a MOBI database (missing BOOKMOBI marker)")]
    NotMobi,

    #[error("Unsupported compression scheme: {0}")]
    UnsupportedCompression(u16),

    #[error("File is DRM-encrypted")]
    Encrypted,

    #[error("Malformed record table")]
    BadRecordTable,
}

/// Which of the two historical sub-formats to read chapters from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChapterStrategy {
    /// Classic MOBI: chapters are separated by `<mbp:pagebreak/>` markers.
    Classic,
    /// Next-generation part: read from the KF8 boundary when present and
    /// partition on top-level heading tags.
    NextGen,
}

/// A chapter as raw source markup, before sanitization.
#[derive(Debug, Clone)]
pub struct RawChapter {
    pub title: Option<String>,
    pub markup: String,
}

/// A fully parsed legacy ebook.
pub struct MobiDoc {
    full_name: Option<String>,
    exth: ExthRecords,
    markup: String,
    /// Markup of the next-gen part when the file carries one.
    next_gen_markup: Option<String>,
    images: Vec<Vec<u8>>,
    cover_image: Option<usize>,
}

impl MobiDoc {
    /// Parse a legacy ebook from raw bytes.
    pub fn parse(bytes: &[u8]) -> Result<Self, MobiError> {
        let records = read_record_table(bytes)?;
        let record0 = records
            .first()
            .ok_or(MobiError::Truncated("no record 0"))?;

        let header = MobiHeader::parse(record0)?;
        if header.encryption != 0 {
            return Err(MobiError::Encrypted);
        }

        let exth = ExthRecords::parse(record0, header.exth_offset());
        let markup = decode_text(&records, &header, 1, header.text_record_count)?;

        // A KF8 part starts at the boundary record named by EXTH 121; parse
        // it with its own record-0 header so its text span is honored.
        let next_gen_markup = exth
            .uint(exth::RECORD_KF8_BOUNDARY)
            .map(|b| b as usize)
            .filter(|&b| b > 0 && b < records.len())
            .and_then(|boundary| {
                let part = &records[boundary..];
                let part_header = MobiHeader::parse(part.first()?).ok()?;
                decode_text(part, &part_header, 1, part_header.text_record_count).ok()
            });

        let (images, cover_image) = collect_images(&records, &header, &exth);

        Ok(Self {
            full_name: header.full_name,
            exth,
            markup,
            next_gen_markup,
            images,
            cover_image,
        })
    }

    /// Book metadata from the EXTH block and the full-name field.
    pub fn metadata(&self) -> ExtractedMetadata {
        let isbn = self.exth.string(exth::RECORD_ISBN);
        let (isbn10, isbn13) = match isbn {
            Some(s) if s.chars().filter(|c| c.is_ascii_digit()).count() >= 13 => (None, Some(s)),
            Some(s) => (Some(s), None),
            None => (None, None),
        };

        ExtractedMetadata {
            title: self
                .exth
                .string(exth::RECORD_UPDATED_TITLE)
                .or_else(|| self.full_name.clone()),
            subtitle: None,
            authors: self.exth.strings(exth::RECORD_AUTHOR),
            publisher: self.exth.string(exth::RECORD_PUBLISHER),
            description: self.exth.string(exth::RECORD_DESCRIPTION),
            language: self.exth.string(exth::RECORD_LANGUAGE),
            isbn10,
            isbn13,
            page_count: None,
            published_date: self.exth.string(exth::RECORD_PUBDATE),
        }
    }

    /// The raw book markup of the classic part.
    pub fn markup(&self) -> &str {
        &self.markup
    }

    /// Split the book into chapters using the given strategy. Chapters whose
    /// markup is blank after splitting are dropped.
    pub fn split_chapters(&self, strategy: ChapterStrategy) -> Vec<RawChapter> {
        let parts: Vec<&str> = match strategy {
            ChapterStrategy::Classic => split_on_pagebreaks(&self.markup),
            ChapterStrategy::NextGen => {
                split_on_headings(self.next_gen_markup.as_deref().unwrap_or(&self.markup))
            }
        };

        parts
            .into_iter()
            .filter(|part| !part.trim().is_empty())
            .map(|part| RawChapter {
                title: first_heading_text(part),
                markup: part.to_string(),
            })
            .collect()
    }

    /// Image records, in source order.
    pub fn images(&self) -> &[Vec<u8>] {
        &self.images
    }

    /// The designated cover image, when EXTH names one.
    pub fn cover(&self) -> Option<&[u8]> {
        self.cover_image
            .and_then(|i| self.images.get(i))
            .map(|v| v.as_slice())
    }
}

/// Parsed fields of record 0: the PalmDoc header plus the MOBI header.
struct MobiHeader {
    compression: u16,
    text_length: u32,
    text_record_count: usize,
    encryption: u16,
    mobi_header_len: u32,
    text_encoding: u32,
    first_image_record: Option<usize>,
    extra_data_flags: u32,
    full_name: Option<String>,
}

impl MobiHeader {
    fn parse(record0: &[u8]) -> Result<Self, MobiError> {
        if record0.len() < 16 {
            return Err(MobiError::Truncated("record 0 too short"));
        }
        let compression = be_u16(record0, 0);
        let text_length = be_u32(record0, 4);
        let text_record_count = be_u16(record0, 8) as usize;
        let encryption = be_u16(record0, 12);

        if record0.len() < 0x14 || &record0[0x10..0x14] != b"MOBI" {
            // Bare PalmDoc without a MOBI header; treat everything past the
            // 16-byte header as absent.
            return Ok(Self {
                compression,
                text_length,
                text_record_count,
                encryption,
                mobi_header_len: 0,
                text_encoding: 65001,
                first_image_record: None,
                extra_data_flags: 0,
                full_name: None,
            });
        }

        // The fixed MOBI fields read below span up to offset 0x20; a record
        // that declares the magic but stops short of them is cut off.
        if record0.len() < 0x20 {
            return Err(MobiError::Truncated("MOBI header"));
        }

        let mobi_header_len = be_u32(record0, 0x14);
        let text_encoding = be_u32(record0, 0x1C);

        let first_image_record = if record0.len() >= 0x70 {
            match be_u32(record0, 0x6C) {
                0 | 0xFFFF_FFFF => None,
                idx => Some(idx as usize),
            }
        } else {
            None
        };

        // Trailing-entry flags live at 0xF2 only in the longer header
        // revisions.
        let extra_data_flags = if mobi_header_len >= 0xE4 && record0.len() >= 0xF4 {
            be_u16(record0, 0xF2) as u32
        } else {
            0
        };

        let full_name = if record0.len() >= 0x5C {
            let offset = be_u32(record0, 0x54) as usize;
            let len = be_u32(record0, 0x58) as usize;
            record0
                .get(offset..offset.saturating_add(len))
                .map(|raw| decode_encoded(raw, text_encoding))
                .filter(|s| !s.is_empty())
        } else {
            None
        };

        Ok(Self {
            compression,
            text_length,
            text_record_count,
            encryption,
            mobi_header_len,
            text_encoding,
            first_image_record,
            extra_data_flags,
            full_name,
        })
    }

    fn exth_offset(&self) -> usize {
        0x10 + self.mobi_header_len as usize
    }
}

/// Slice the PDB into its records via the offset table.
fn read_record_table(bytes: &[u8]) -> Result<Vec<&[u8]>, MobiError> {
    if bytes.len() < 78 {
        return Err(MobiError::Truncated("PDB header"));
    }
    if &bytes[60..68] != b"BOOKMOBI" {
        return Err(MobiError::NotMobi);
    }

    let num_records = be_u16(bytes, 76) as usize;
    if num_records == 0 || num_records > MAX_RECORDS {
        return Err(MobiError::BadRecordTable);
    }
    let table_end = 78 + num_records * 8;
    if bytes.len() < table_end {
        return Err(MobiError::Truncated("record offset table"));
    }

    let mut offsets = Vec::with_capacity(num_records + 1);
    for i in 0..num_records {
        offsets.push(be_u32(bytes, 78 + i * 8) as usize);
    }
    offsets.push(bytes.len());

    let mut records = Vec::with_capacity(num_records);
    for pair in offsets.windows(2) {
        let (start, end) = (pair[0], pair[1]);
        if start > end || end > bytes.len() {
            return Err(MobiError::BadRecordTable);
        }
        records.push(&bytes[start..end]);
    }
    Ok(records)
}

/// Decompress and decode the text records of one part. The loop is bounded
/// by the header's own declared record count.
fn decode_text(
    records: &[&[u8]],
    header: &MobiHeader,
    first_text_record: usize,
    count: usize,
) -> Result<String, MobiError> {
    let mut raw = Vec::with_capacity(header.text_length as usize);
    let last = (first_text_record + count).min(records.len());

    for record in &records[first_text_record.min(records.len())..last] {
        let trimmed = strip_trailing_entries(record, header.extra_data_flags);
        match header.compression {
            1 => raw.extend_from_slice(trimmed),
            2 => palmdoc::decompress_into(trimmed, &mut raw),
            other => return Err(MobiError::UnsupportedCompression(other)),
        }
    }
    raw.truncate(header.text_length as usize);

    Ok(decode_encoded(&raw, header.text_encoding))
}

/// Drop per-record trailing entries (multibyte overlap, indexing data)
/// declared by the extra-data flags word.
fn strip_trailing_entries(record: &[u8], flags: u32) -> &[u8] {
    let mut end = record.len();
    let mut flag_bits = flags >> 1;
    while flag_bits != 0 {
        if flag_bits & 1 != 0 {
            end -= trailing_entry_size(&record[..end]);
        }
        flag_bits >>= 1;
    }
    if flags & 1 != 0 && end > 0 {
        // Multibyte flag: low two bits of the final byte count extra chars.
        let extra = (record[end - 1] & 0x03) as usize + 1;
        end = end.saturating_sub(extra);
    }
    &record[..end]
}

/// Backward-encoded varint at the end of a record.
fn trailing_entry_size(record: &[u8]) -> usize {
    let mut value: usize = 0;
    for (i, &byte) in record.iter().rev().take(4).enumerate() {
        if byte & 0x80 != 0 && i > 0 {
            break;
        }
        value |= ((byte & 0x7F) as usize) << (7 * i);
        if byte & 0x80 != 0 {
            break;
        }
    }
    value.min(record.len())
}

fn decode_encoded(raw: &[u8], text_encoding: u32) -> String {
    match text_encoding {
        1252 => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(raw);
            decoded.into_owned()
        }
        _ => String::from_utf8_lossy(raw).into_owned(),
    }
}

/// Gather image records past the first-image index, skipping the
/// bookkeeping records that share that region.
fn collect_images(
    records: &[&[u8]],
    header: &MobiHeader,
    exth: &ExthRecords,
) -> (Vec<Vec<u8>>, Option<usize>) {
    let Some(first) = header.first_image_record else {
        return (Vec::new(), None);
    };

    let mut images = Vec::new();
    for record in records.iter().skip(first) {
        if record.len() < 4 {
            continue;
        }
        if matches!(&record[..4], b"FLIS" | b"FCIS" | b"SRCS" | b"BOUN")
            || record[..4] == [0xE9, 0x8E, 0x0D, 0x0A]
        {
            continue;
        }
        images.push(record.to_vec());
    }

    let cover = exth
        .uint(exth::RECORD_COVER_OFFSET)
        .map(|offset| offset as usize)
        .filter(|&offset| offset < images.len());

    (images, cover)
}

fn split_on_pagebreaks(markup: &str) -> Vec<&str> {
    let re = pagebreak_regex();
    re.split(markup).collect()
}

/// Partition on top-level h1/h2 openings, keeping each heading with the
/// part it introduces.
fn split_on_headings(markup: &str) -> Vec<&str> {
    let re = heading_regex();
    let mut parts = Vec::new();
    let mut last = 0;
    for m in re.find_iter(markup) {
        if m.start() > last {
            parts.push(&markup[last..m.start()]);
        }
        last = m.start();
    }
    parts.push(&markup[last..]);
    parts
}

fn first_heading_text(markup: &str) -> Option<String> {
    let re = heading_capture_regex();
    let captures = re.captures(markup)?;
    let inner = captures.get(1)?.as_str();
    let text = strip_tags(inner).trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn strip_tags(markup: &str) -> String {
    let mut out = String::with_capacity(markup.len());
    let mut in_tag = false;
    for c in markup.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => out.push(c),
            _ => {}
        }
    }
    out
}

fn pagebreak_regex() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"(?i)<\s*mbp:pagebreak\s*/?\s*>").unwrap())
}

fn heading_regex() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"(?i)<h[12][^>]*>").unwrap())
}

fn heading_capture_regex() -> &'static regex::Regex {
    static RE: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();
    RE.get_or_init(|| regex::Regex::new(r"(?is)<h[1-4][^>]*>(.*?)</h[1-4]>").unwrap())
}

fn be_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([bytes[offset], bytes[offset + 1]])
}

fn be_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

#[doc(hidden)]
pub mod testing {
    //! Builder for synthetic MOBI files used across the test suite.

    /// Assemble a minimal uncompressed BOOKMOBI database with the given
    /// markup, EXTH records and image records.
    pub struct MobiBuilder {
        pub markup: String,
        pub exth: Vec<(u32, Vec<u8>)>,
        pub images: Vec<Vec<u8>>,
        pub full_name: String,
    }

    impl MobiBuilder {
        pub fn new(markup: &str) -> Self {
            Self {
                markup: markup.to_string(),
                exth: Vec::new(),
                images: Vec::new(),
                full_name: "Untitled".to_string(),
            }
        }

        pub fn full_name(mut self, name: &str) -> Self {
            self.full_name = name.to_string();
            self
        }

        pub fn exth_string(mut self, record_type: u32, value: &str) -> Self {
            self.exth.push((record_type, value.as_bytes().to_vec()));
            self
        }

        pub fn exth_u32(mut self, record_type: u32, value: u32) -> Self {
            self.exth.push((record_type, value.to_be_bytes().to_vec()));
            self
        }

        pub fn image(mut self, bytes: &[u8]) -> Self {
            self.images.push(bytes.to_vec());
            self
        }

        pub fn build(self) -> Vec<u8> {
            let text = self.markup.as_bytes();

            let mut exth_block = Vec::new();
            if !self.exth.is_empty() {
                let mut body = Vec::new();
                for (record_type, data) in &self.exth {
                    body.extend_from_slice(&record_type.to_be_bytes());
                    body.extend_from_slice(&((data.len() as u32 + 8).to_be_bytes()));
                    body.extend_from_slice(data);
                }
                exth_block.extend_from_slice(b"EXTH");
                exth_block.extend_from_slice(&((body.len() as u32 + 12).to_be_bytes()));
                exth_block.extend_from_slice(&(self.exth.len() as u32).to_be_bytes());
                exth_block.extend_from_slice(&body);
            }

            // Record 0: PalmDoc header + 232-byte MOBI header + EXTH + name.
            let mobi_header_len: u32 = 232;
            let name_offset = 0x10 + mobi_header_len as usize + exth_block.len();

            let mut record0 = vec![0u8; 0x10 + mobi_header_len as usize];
            record0[0..2].copy_from_slice(&1u16.to_be_bytes()); // no compression
            record0[4..8].copy_from_slice(&(text.len() as u32).to_be_bytes());
            record0[8..10].copy_from_slice(&1u16.to_be_bytes()); // one text record
            record0[10..12].copy_from_slice(&4096u16.to_be_bytes());
            record0[12..14].copy_from_slice(&0u16.to_be_bytes()); // no encryption
            record0[0x10..0x14].copy_from_slice(b"MOBI");
            record0[0x14..0x18].copy_from_slice(&mobi_header_len.to_be_bytes());
            record0[0x1C..0x20].copy_from_slice(&65001u32.to_be_bytes()); // utf-8
            record0[0x54..0x58].copy_from_slice(&(name_offset as u32).to_be_bytes());
            record0[0x58..0x5C]
                .copy_from_slice(&(self.full_name.len() as u32).to_be_bytes());
            if self.images.is_empty() {
                record0[0x6C..0x70].copy_from_slice(&0xFFFF_FFFFu32.to_be_bytes());
            } else {
                // Images start right after the single text record.
                record0[0x6C..0x70].copy_from_slice(&2u32.to_be_bytes());
            }
            if !exth_block.is_empty() {
                record0[0x80..0x84].copy_from_slice(&0x40u32.to_be_bytes());
            }
            record0.extend_from_slice(&exth_block);
            record0.extend_from_slice(self.full_name.as_bytes());
            record0.extend_from_slice(&[0, 0]);

            let mut records: Vec<Vec<u8>> = vec![record0, text.to_vec()];
            records.extend(self.images.iter().cloned());

            // PDB shell.
            let mut out = vec![0u8; 78];
            out[..8].copy_from_slice(b"testbook");
            out[60..68].copy_from_slice(b"BOOKMOBI");
            out[76..78].copy_from_slice(&(records.len() as u16).to_be_bytes());

            let table_len = records.len() * 8;
            let mut offset = 78 + table_len;
            let mut table = Vec::with_capacity(table_len);
            for (i, record) in records.iter().enumerate() {
                table.extend_from_slice(&(offset as u32).to_be_bytes());
                table.push(0);
                table.extend_from_slice(&(i as u32).to_be_bytes()[1..]);
                offset += record.len();
            }
            out.extend_from_slice(&table);
            for record in &records {
                out.extend_from_slice(record);
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::MobiBuilder;
    use super::*;

    const MARKUP: &str = "<html><body><h1>One</h1><p>First chapter text.</p>\
        <mbp:pagebreak/><h1>Two</h1><p>Second chapter text.</p>\
        <mbp:pagebreak/><h1>Three</h1><p>Third chapter text.</p></body></html>";

    #[test]
    fn test_parse_and_metadata() {
        let bytes = MobiBuilder::new(MARKUP)
            .full_name("A Test Book")
            .exth_string(exth::RECORD_AUTHOR, "Jane Writer")
            .exth_string(exth::RECORD_PUBLISHER, "Test House")
            .exth_string(exth::RECORD_ISBN, "9781234567897")
            .exth_string(exth::RECORD_LANGUAGE, "en")
            .build();

        let doc = MobiDoc::parse(&bytes).unwrap();
        let meta = doc.metadata();
        assert_eq!(meta.title.as_deref(), Some("A Test Book"));
        assert_eq!(meta.authors, vec!["Jane Writer"]);
        assert_eq!(meta.publisher.as_deref(), Some("Test House"));
        assert_eq!(meta.isbn13.as_deref(), Some("9781234567897"));
        assert_eq!(meta.language.as_deref(), Some("en"));
    }

    #[test]
    fn test_classic_chapter_split() {
        let bytes = MobiBuilder::new(MARKUP).build();
        let doc = MobiDoc::parse(&bytes).unwrap();
        let chapters = doc.split_chapters(ChapterStrategy::Classic);
        assert_eq!(chapters.len(), 3);
        assert_eq!(chapters[0].title.as_deref(), Some("One"));
        assert_eq!(chapters[2].title.as_deref(), Some("Three"));
        assert!(chapters[1].markup.contains("Second chapter text"));
    }

    #[test]
    fn test_next_gen_split_falls_back_to_headings() {
        let bytes = MobiBuilder::new(MARKUP).build();
        let doc = MobiDoc::parse(&bytes).unwrap();
        let chapters = doc.split_chapters(ChapterStrategy::NextGen);
        // Heading-based partitioning finds the same three chapters plus the
        // leading document preamble is merged into the first split.
        assert!(chapters.len() >= 3);
    }

    #[test]
    fn test_cover_image_via_exth() {
        let jpeg = [0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3, 4];
        let bytes = MobiBuilder::new(MARKUP)
            .image(&jpeg)
            .exth_u32(exth::RECORD_COVER_OFFSET, 0)
            .build();
        let doc = MobiDoc::parse(&bytes).unwrap();
        assert_eq!(doc.images().len(), 1);
        assert_eq!(doc.cover(), Some(&jpeg[..]));
    }

    #[test]
    fn test_truncated_input_errors_cleanly() {
        assert!(matches!(
            MobiDoc::parse(b"BOOKMOBI"),
            Err(MobiError::Truncated(_))
        ));
        let mut bytes = vec![0u8; 80];
        bytes[60..68].copy_from_slice(b"TEXtREAd");
        assert!(matches!(MobiDoc::parse(&bytes), Err(MobiError::NotMobi)));
    }

    #[test]
    fn test_short_mobi_header_errors_cleanly() {
        // Record 0 carries the MOBI magic but is cut off before the fixed
        // header fields.
        let mut record0 = vec![0u8; 28];
        record0[0x10..0x14].copy_from_slice(b"MOBI");

        let mut bytes = vec![0u8; 78];
        bytes[60..68].copy_from_slice(b"BOOKMOBI");
        bytes[76..78].copy_from_slice(&1u16.to_be_bytes());
        bytes.extend_from_slice(&86u32.to_be_bytes());
        bytes.extend_from_slice(&[0, 0, 0, 0]);
        bytes.extend_from_slice(&record0);

        assert!(matches!(
            MobiDoc::parse(&bytes),
            Err(MobiError::Truncated(_))
        ));
    }

    #[test]
    fn test_hostile_record_count_is_rejected() {
        let mut bytes = vec![0u8; 100];
        bytes[60..68].copy_from_slice(b"BOOKMOBI");
        bytes[76..78].copy_from_slice(&u16::MAX.to_be_bytes());
        assert!(MobiDoc::parse(&bytes).is_err());
    }
}
