//! Incremental sentence segmentation of streamed text.

/// Accumulates streamed text and yields complete sentences.
///
/// A sentence ends at `.`, `!` or `?`; a run of consecutive terminators
/// belongs to one boundary ("Really?!" is one sentence). The trailing
/// fragment stays buffered until the next terminator or an explicit flush.
#[derive(Debug, Default)]
pub struct SentenceBuffer {
    buffer: String,
}

fn is_terminator(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

impl SentenceBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a text delta; returns any sentences completed by it, trimmed.
    /// Whitespace-only segments are dropped.
    pub fn push(&mut self, delta: &str) -> Vec<String> {
        self.buffer.push_str(delta);

        let mut sentences = Vec::new();
        loop {
            let chars: Vec<(usize, char)> = self.buffer.char_indices().collect();
            let mut boundary = None;

            let mut i = 0;
            while i < chars.len() {
                if is_terminator(chars[i].1) {
                    // Extend over a run of terminators.
                    let mut j = i;
                    while j + 1 < chars.len() && is_terminator(chars[j + 1].1) {
                        j += 1;
                    }
                    if j + 1 < chars.len() {
                        // The run is complete: cut after its last character.
                        boundary = Some(chars[j].0 + chars[j].1.len_utf8());
                    }
                    // A run still at the end of the buffer may grow with the
                    // next delta; leave it buffered.
                    break;
                }
                i += 1;
            }

            match boundary {
                Some(cut) => {
                    let sentence: String = self.buffer.drain(..cut).collect();
                    let sentence = sentence.trim().to_string();
                    if !sentence.is_empty() {
                        sentences.push(sentence);
                    }
                }
                None => break,
            }
        }
        sentences
    }

    /// Flush the trailing fragment, if any non-whitespace remains.
    pub fn flush(&mut self) -> Option<String> {
        let fragment = std::mem::take(&mut self.buffer);
        let fragment = fragment.trim().to_string();
        if fragment.is_empty() {
            None
        } else {
            Some(fragment)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.trim().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_sentence_across_deltas() {
        let mut buf = SentenceBuffer::new();
        assert!(buf.push("Hello wor").is_empty());
        let sentences = buf.push("ld. How");
        assert_eq!(sentences, vec!["Hello world."]);
        assert!(!buf.is_empty());
    }

    #[test]
    fn test_multiple_sentences_one_delta() {
        let mut buf = SentenceBuffer::new();
        let sentences = buf.push("One. Two! Three? And then");
        assert_eq!(sentences, vec!["One.", "Two!", "Three?"]);
        assert_eq!(buf.flush(), Some("And then".to_string()));
    }

    #[test]
    fn test_consecutive_terminators_stay_together() {
        let mut buf = SentenceBuffer::new();
        let sentences = buf.push("Really?! Yes. ");
        assert_eq!(sentences, vec!["Really?!", "Yes."]);
    }

    #[test]
    fn test_terminator_run_at_end_waits_for_more() {
        let mut buf = SentenceBuffer::new();
        // "Wait..." might still grow another "." with the next delta.
        assert!(buf.push("Wait..").is_empty());
        let sentences = buf.push(". Go.");
        assert_eq!(sentences, vec!["Wait..."]);
        // "Go." ends the buffer, so its terminator run could still grow;
        // it comes out on flush.
        assert_eq!(buf.flush(), Some("Go.".to_string()));
    }

    #[test]
    fn test_flush_empty_and_whitespace() {
        let mut buf = SentenceBuffer::new();
        assert_eq!(buf.flush(), None);
        buf.push("   ");
        assert_eq!(buf.flush(), None);
    }

    #[test]
    fn test_whitespace_only_segment_not_emitted() {
        let mut buf = SentenceBuffer::new();
        let sentences = buf.push(" . Hi. ");
        assert_eq!(sentences, vec![".", "Hi."]);
    }
}
