//! Sentence segmentation of the streaming LLM response.
//!
//! Groups token fragments into speakable units so synthesis can start before
//! the generation finishes. A segment flushes on sentence-terminating
//! punctuation, on a hard length bound, or when the stream ends with a
//! non-empty remainder. One segmenter instance per turn.

/// A complete speakable unit, the unit of one TTS invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpeechSegment {
    pub turn_id: u64,
    pub segment_index: u32,
    pub text: String,
}

/// Streaming segmenter over LLM token fragments.
pub struct SentenceSegmenter {
    turn_id: u64,
    max_chars: usize,
    buf: String,
    next_index: u32,
}

impl SentenceSegmenter {
    pub fn new(turn_id: u64, max_chars: usize) -> Self {
        Self {
            turn_id,
            max_chars: max_chars.max(1),
            buf: String::new(),
            next_index: 0,
        }
    }

    /// Feed one token fragment; returns any segments that became complete.
    pub fn push(&mut self, fragment: &str) -> Vec<SpeechSegment> {
        self.buf.push_str(fragment);
        let mut out = Vec::new();
        loop {
            if let Some(end) = self.boundary() {
                let head: String = self.buf.drain(..end).collect();
                if let Some(seg) = self.make_segment(&head) {
                    out.push(seg);
                }
            } else if self.buf.chars().count() >= self.max_chars {
                let head = std::mem::take(&mut self.buf);
                if let Some(seg) = self.make_segment(&head) {
                    out.push(seg);
                }
            } else {
                break;
            }
        }
        out
    }

    /// Flush the remainder at end of stream.
    pub fn finish(&mut self) -> Option<SpeechSegment> {
        let rest = std::mem::take(&mut self.buf);
        self.make_segment(&rest)
    }

    /// Byte offset one past the earliest sentence boundary, if any.
    ///
    /// Fullwidth terminators end a sentence on their own; ASCII terminators
    /// need a following whitespace character so that `3.14` stays intact. An
    /// ASCII terminator at the end of the buffer waits for more input (or
    /// for `finish`).
    fn boundary(&self) -> Option<usize> {
        let mut iter = self.buf.char_indices().peekable();
        while let Some((i, ch)) = iter.next() {
            match ch {
                '\u{3002}' | '\u{ff1f}' | '\u{ff01}' => return Some(i + ch.len_utf8()),
                '.' | '?' | '!' => {
                    if let Some(&(_, next)) = iter.peek() {
                        if next.is_whitespace() {
                            return Some(i + 1);
                        }
                    }
                }
                _ => {}
            }
        }
        None
    }

    fn make_segment(&mut self, raw: &str) -> Option<SpeechSegment> {
        let text = collapse_whitespace(raw);
        if text.is_empty() {
            return None;
        }
        let seg = SpeechSegment {
            turn_id: self.turn_id,
            segment_index: self.next_index,
            text,
        };
        self.next_index += 1;
        Some(seg)
    }
}

/// Collapse whitespace runs to single spaces and trim.
fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(segs: &[SpeechSegment]) -> Vec<&str> {
        segs.iter().map(|s| s.text.as_str()).collect()
    }

    #[test]
    fn test_flush_on_sentence_end() {
        let mut seg = SentenceSegmenter::new(1, 180);
        assert!(seg.push("Hello").is_empty());
        assert!(seg.push(" there.").is_empty());
        let out = seg.push(" How");
        assert_eq!(texts(&out), vec!["Hello there."]);
    }

    #[test]
    fn test_finish_flushes_remainder() {
        let mut seg = SentenceSegmenter::new(1, 180);
        seg.push("trailing words");
        let last = seg.finish().unwrap();
        assert_eq!(last.text, "trailing words");
        assert!(seg.finish().is_none());
    }

    #[test]
    fn test_terminal_punctuation_flushed_by_finish() {
        let mut seg = SentenceSegmenter::new(1, 180);
        // A '.' at the very end of the stream never sees a following space.
        assert!(seg.push("Done.").is_empty());
        assert_eq!(seg.finish().unwrap().text, "Done.");
    }

    #[test]
    fn test_decimal_not_split() {
        let mut seg = SentenceSegmenter::new(1, 180);
        let out = seg.push("pi is 3.14 exactly. More");
        assert_eq!(texts(&out), vec!["pi is 3.14 exactly."]);
    }

    #[test]
    fn test_fullwidth_terminators_flush_without_whitespace() {
        let mut seg = SentenceSegmenter::new(1, 180);
        let out = seg.push("\u{4f60}\u{597d}\u{3002}\u{518d}\u{89c1}\u{ff01}");
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].text, "\u{4f60}\u{597d}\u{3002}");
        assert_eq!(out[1].text, "\u{518d}\u{89c1}\u{ff01}");
    }

    #[test]
    fn test_hard_length_bound() {
        let mut seg = SentenceSegmenter::new(1, 10);
        let out = seg.push("abcdefghijklmnop");
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].text, "abcdefghijklmnop");
    }

    #[test]
    fn test_indices_are_monotonic() {
        let mut seg = SentenceSegmenter::new(7, 180);
        let mut all = seg.push("One. Two. Three");
        if let Some(last) = seg.finish() {
            all.push(last);
        }
        assert_eq!(all.len(), 3);
        for (i, s) in all.iter().enumerate() {
            assert_eq!(s.segment_index, i as u32);
            assert_eq!(s.turn_id, 7);
        }
    }

    #[test]
    fn test_whitespace_collapsed() {
        let mut seg = SentenceSegmenter::new(1, 180);
        let out = seg.push("Hi   there.\n\nNext");
        assert_eq!(texts(&out), vec!["Hi there."]);
    }

    #[test]
    fn test_empty_fragments_produce_nothing() {
        let mut seg = SentenceSegmenter::new(1, 180);
        assert!(seg.push("").is_empty());
        assert!(seg.push("   ").is_empty());
        assert!(seg.finish().is_none());
    }

    #[test]
    fn test_question_and_exclamation() {
        let mut seg = SentenceSegmenter::new(1, 180);
        let out = seg.push("Really? Yes! Sure");
        assert_eq!(texts(&out), vec!["Really?", "Yes!"]);
    }
}
