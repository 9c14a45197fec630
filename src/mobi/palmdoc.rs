//! PalmDoc LZ77 decompression.
//!
//! The scheme used by compression type 2: literal bytes, short literal runs,
//! back-references into the output window, and a space-packing shortcut for
//! ASCII.

/// Decompress one PalmDoc-compressed record, appending to `out`.
pub fn decompress_into(record: &[u8], out: &mut Vec<u8>) {
    let base = out.len();
    let mut i = 0;

    while i < record.len() {
        let byte = record[i];
        i += 1;
        match byte {
            // Literal run: the byte itself counts the following literals.
            0x01..=0x08 => {
                let n = byte as usize;
                let end = (i + n).min(record.len());
                out.extend_from_slice(&record[i..end]);
                i = end;
            }
            // Plain literal.
            0x00 | 0x09..=0x7F => out.push(byte),
            // Back-reference: 14-bit distance, 3-bit length.
            0x80..=0xBF => {
                if i >= record.len() {
                    break;
                }
                let pair = ((byte as usize) << 8) | record[i] as usize;
                i += 1;
                let distance = (pair & 0x3FFF) >> 3;
                let length = (pair & 0x07) + 3;
                if distance == 0 {
                    continue;
                }
                for _ in 0..length {
                    match out.len().checked_sub(distance) {
                        // The window never reaches into previous records.
                        Some(pos) if pos >= base => {
                            let value = out[pos];
                            out.push(value);
                        }
                        _ => break,
                    }
                }
            }
            // Space-packed ASCII: a space followed by (byte ^ 0x80).
            0xC0..=0xFF => {
                out.push(b' ');
                out.push(byte ^ 0x80);
            }
        }
    }
}

/// Compress text with the PalmDoc scheme. Used by tests to exercise the
/// decompressor against round-trip data; the production pipeline never
/// compresses.
#[cfg(test)]
pub fn compress(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;

    while i < input.len() {
        // Longest match within the 2047-byte window, length 3..=10.
        let window_start = i.saturating_sub(2047);
        let mut best_len = 0;
        let mut best_dist = 0;
        for start in window_start..i {
            let mut len = 0;
            while len < 10 && i + len < input.len() && input[start + len] == input[i + len] {
                len += 1;
            }
            if len >= 3 && len > best_len {
                best_len = len;
                best_dist = i - start;
            }
        }

        if best_len >= 3 {
            let pair = 0x8000 | ((best_dist << 3) & 0x3FF8) | (best_len - 3);
            out.push((pair >> 8) as u8);
            out.push((pair & 0xFF) as u8);
            i += best_len;
            continue;
        }

        let byte = input[i];
        if byte == b' ' && i + 1 < input.len() && (0x40..0x80).contains(&input[i + 1]) {
            out.push(input[i + 1] ^ 0x80);
            i += 2;
        } else if byte == 0x00 || (0x09..=0x7F).contains(&byte) {
            out.push(byte);
            i += 1;
        } else {
            out.push(1);
            out.push(byte);
            i += 1;
        }
    }
    out
}
