//! Bounded text chunking for the search index.

/// Target chunk size in characters.
pub const CHUNK_TARGET_CHARS: usize = 10_000;

/// Split chapter text into chunks of at most `target` characters.
///
/// Each cut prefers the nearest preceding sentence or line boundary, as long
/// as it falls within the back half of the window; otherwise the chunk is cut
/// hard at the target. Chunks are trimmed and empty ones discarded, so
/// concatenating the output reproduces the input up to boundary whitespace.
pub fn chunk_text(text: &str, target: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let remaining = chars.len() - start;
        let window = remaining.min(target);
        let cut = if remaining <= target {
            window
        } else {
            // Only a boundary in the back half of the window is worth
            // shortening the chunk for.
            match last_boundary(&chars[start..start + window]) {
                Some(at) if at >= window / 2 => at,
                _ => window,
            }
        };

        let chunk: String = chars[start..start + cut].iter().collect();
        let trimmed = chunk.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }
        start += cut;
    }

    chunks
}

/// Index just past the last sentence or line boundary in the window.
fn last_boundary(window: &[char]) -> Option<usize> {
    window
        .iter()
        .rposition(|c| matches!(c, '.' | '!' | '?' | '\n'))
        .map(|at| at + 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_one_chunk() {
        let chunks = chunk_text("A short chapter.", 100);
        assert_eq!(chunks, vec!["A short chapter."]);
    }

    #[test]
    fn test_empty_and_whitespace_produce_nothing() {
        assert!(chunk_text("", 100).is_empty());
        assert!(chunk_text("   \n\n  ", 100).is_empty());
    }

    #[test]
    fn test_prefers_sentence_boundary_in_back_half() {
        // Boundary at char 80 of a 100-char window: eligible.
        let text = format!("{}. {}", "a".repeat(78), "b".repeat(60));
        let chunks = chunk_text(&text, 100);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].ends_with('.'));
        assert!(chunks[1].chars().all(|c| c == 'b'));
    }

    #[test]
    fn test_ignores_boundary_in_front_half() {
        // A period at char 10 is too early; the cut falls at the target.
        let text = format!("{}. {}", "a".repeat(9), "b".repeat(200));
        let chunks = chunk_text(&text, 100);
        assert_eq!(chunks[0].chars().count(), 100);
    }

    #[test]
    fn test_hard_cut_without_any_boundary() {
        let text = "x".repeat(250);
        let chunks = chunk_text(&text, 100);
        assert_eq!(
            chunks.iter().map(|c| c.chars().count()).collect::<Vec<_>>(),
            vec![100, 100, 50]
        );
    }

    #[test]
    fn test_concatenation_preserves_content() {
        let text = "First sentence. Second one!\nA line.\n".repeat(40);
        let chunks = chunk_text(&text, 120);
        let rejoined: String = chunks.join("");
        let squash = |s: &str| s.chars().filter(|c| !c.is_whitespace()).collect::<String>();
        assert_eq!(squash(&rejoined), squash(&text));
    }

    #[test]
    fn test_multibyte_safe() {
        let text = "é".repeat(150);
        let chunks = chunk_text(&text, 100);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].chars().count(), 100);
    }
}
