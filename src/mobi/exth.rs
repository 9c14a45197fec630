//! EXTH metadata block parsing.
//!
//! The EXTH block follows the MOBI header inside record 0 and carries typed
//! records: strings (author, publisher, ...) and big-endian integers (cover
//! offset, KF8 boundary). Unknown types are retained but ignored.

pub const RECORD_AUTHOR: u32 = 100;
pub const RECORD_PUBLISHER: u32 = 101;
pub const RECORD_DESCRIPTION: u32 = 103;
pub const RECORD_ISBN: u32 = 104;
pub const RECORD_PUBDATE: u32 = 106;
pub const RECORD_KF8_BOUNDARY: u32 = 121;
pub const RECORD_COVER_OFFSET: u32 = 201;
pub const RECORD_UPDATED_TITLE: u32 = 503;
pub const RECORD_LANGUAGE: u32 = 524;

/// All EXTH records of a file, in declaration order.
#[derive(Debug, Default)]
pub struct ExthRecords {
    records: Vec<(u32, Vec<u8>)>,
}

impl ExthRecords {
    /// Parse the EXTH block at `offset` within record 0. A missing or
    /// malformed block yields an empty set; the record count declared by the
    /// block itself bounds the loop.
    pub fn parse(record0: &[u8], offset: usize) -> Self {
        let Some(block) = record0.get(offset..) else {
            return Self::default();
        };
        if block.len() < 12 || &block[..4] != b"EXTH" {
            return Self::default();
        }

        let count = u32::from_be_bytes([block[8], block[9], block[10], block[11]]) as usize;
        let mut records = Vec::new();
        let mut pos = 12;

        for _ in 0..count {
            let Some(header) = block.get(pos..pos + 8) else {
                break;
            };
            let record_type = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
            let record_len =
                u32::from_be_bytes([header[4], header[5], header[6], header[7]]) as usize;
            if record_len < 8 {
                break;
            }
            let Some(data) = block.get(pos + 8..pos + record_len) else {
                break;
            };
            records.push((record_type, data.to_vec()));
            pos += record_len;
        }

        Self { records }
    }

    /// First record of the given type, decoded as UTF-8 text.
    pub fn string(&self, record_type: u32) -> Option<String> {
        self.records
            .iter()
            .find(|(t, _)| *t == record_type)
            .map(|(_, data)| String::from_utf8_lossy(data).trim().to_string())
            .filter(|s| !s.is_empty())
    }

    /// All records of the given type, decoded as UTF-8 text.
    pub fn strings(&self, record_type: u32) -> Vec<String> {
        self.records
            .iter()
            .filter(|(t, _)| *t == record_type)
            .map(|(_, data)| String::from_utf8_lossy(data).trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// First record of the given type as a big-endian u32.
    pub fn uint(&self, record_type: u32) -> Option<u32> {
        self.records
            .iter()
            .find(|(t, _)| *t == record_type)
            .and_then(|(_, data)| {
                let bytes: [u8; 4] = data.as_slice().try_into().ok()?;
                Some(u32::from_be_bytes(bytes))
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(records: &[(u32, &[u8])]) -> Vec<u8> {
        let mut body = Vec::new();
        for (record_type, data) in records {
            body.extend_from_slice(&record_type.to_be_bytes());
            body.extend_from_slice(&((data.len() as u32 + 8).to_be_bytes()));
            body.extend_from_slice(data);
        }
        let mut out = Vec::new();
        out.extend_from_slice(b"EXTH");
        out.extend_from_slice(&((body.len() as u32 + 12).to_be_bytes()));
        out.extend_from_slice(&(records.len() as u32).to_be_bytes());
        out.extend_from_slice(&body);
        out
    }

    #[test]
    fn test_parse_strings_and_uints() {
        let raw = block(&[
            (RECORD_AUTHOR, b"First Author"),
            (RECORD_AUTHOR, b"Second Author"),
            (RECORD_COVER_OFFSET, &3u32.to_be_bytes()),
        ]);
        let exth = ExthRecords::parse(&raw, 0);
        assert_eq!(exth.string(RECORD_AUTHOR).as_deref(), Some("First Author"));
        assert_eq!(
            exth.strings(RECORD_AUTHOR),
            vec!["First Author", "Second Author"]
        );
        assert_eq!(exth.uint(RECORD_COVER_OFFSET), Some(3));
        assert_eq!(exth.string(RECORD_PUBLISHER), None);
    }

    #[test]
    fn test_malformed_block_is_empty() {
        let exth = ExthRecords::parse(b"NOPE", 0);
        assert!(exth.string(RECORD_AUTHOR).is_none());

        // Declared count larger than the actual data stops cleanly.
        let mut raw = block(&[(RECORD_AUTHOR, b"A")]);
        raw[8..12].copy_from_slice(&99u32.to_be_bytes());
        let exth = ExthRecords::parse(&raw, 0);
        assert_eq!(exth.string(RECORD_AUTHOR).as_deref(), Some("A"));
    }

    #[test]
    fn test_offset_out_of_bounds() {
        let exth = ExthRecords::parse(b"short", 999);
        assert!(exth.string(RECORD_AUTHOR).is_none());
    }
}
