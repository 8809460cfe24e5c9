//! Overlapping text chunking with sentence-boundary preference.

/// Largest char boundary at or below `index`.
fn floor_boundary(text: &str, mut index: usize) -> usize {
    index = index.min(text.len());
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

/// Split `text` into chunks of roughly `size` characters with `overlap`
/// characters of carry-over, preferring to cut at a sentence terminator in
/// the second half of the chunk.
pub fn chunk_text(text: &str, size: usize, overlap: usize) -> Vec<String> {
    if text.len() <= size {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < text.len() {
        let mut end = floor_boundary(text, start + size);

        if end < text.len() {
            let window = &text[start..end];
            let sentence_end = window
                .rfind(['.', '!', '?'])
                .filter(|&pos| pos > size / 2)
                .map(|pos| start + pos + 1);
            if let Some(cut) = sentence_end {
                end = cut;
            }
        }

        chunks.push(text[start..end].trim().to_string());

        if end >= text.len() {
            break;
        }
        start = floor_boundary(text, end.saturating_sub(overlap));
    }

    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = chunk_text("Hello world.", 500, 50);
        assert_eq!(chunks, vec!["Hello world."]);
    }

    #[test]
    fn test_long_text_prefers_sentence_cut() {
        let text = format!("{} End of sentence. {}", "a".repeat(300), "b".repeat(300));
        let chunks = chunk_text(&text, 400, 50);
        assert!(chunks.len() >= 2);
        assert!(chunks[0].ends_with("End of sentence."));
    }

    #[test]
    fn test_chunks_overlap() {
        let text = "x".repeat(1200);
        let chunks = chunk_text(&text, 500, 50);
        assert!(chunks.len() >= 3);
        // Overlap keeps total coverage larger than the raw length.
        let total: usize = chunks.iter().map(|c| c.len()).sum();
        assert!(total > text.len());
    }

    #[test]
    fn test_multibyte_text_does_not_split_mid_char() {
        let text = "héllo wörld. ".repeat(100);
        let chunks = chunk_text(&text, 500, 50);
        assert!(chunks.len() > 1);
        for chunk in chunks {
            // Slicing already proved boundary-safety; chunks stay valid UTF-8.
            assert!(!chunk.is_empty());
        }
    }
}
