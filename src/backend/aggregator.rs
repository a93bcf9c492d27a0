//! Sentence-level aggregation of streamed transcript fragments.
//!
//! The Gemini Live backend delivers token-sized transcription fragments
//! with no utterance boundaries. This aggregator coalesces them into
//! sentence-scale segments: flush when a fragment carries sentence-terminal
//! punctuation, after 1.5 s with no new fragments, or unconditionally on
//! shutdown. A punctuation flush always wins over a pending idle timer;
//! the owning task cancels the timer when [`FragmentOutcome::Flush`] is
//! returned.
//!
//! Invariant: every character received is flushed in exactly one segment
//! (modulo edge whitespace trimming).

use std::time::Duration;

/// Idle period after which a non-empty buffer is flushed.
pub const IDLE_FLUSH_DELAY: Duration = Duration::from_millis(1500);

/// Sentence-terminal punctuation, Latin and CJK.
const SENTENCE_ENDINGS: [char; 6] = ['.', '!', '?', '。', '？', '！'];

/// What the owning task should do after feeding a fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentOutcome {
    /// Emit this text as one segment and cancel any pending idle timer.
    Flush(String),
    /// Buffer grew; (re)arm the idle timer.
    ArmIdleTimer,
    /// Fragment was empty; nothing changed.
    Ignored,
}

/// Coalesces raw text fragments into flush-worthy segments.
///
/// Timer-free by design: the async owner drives the idle deadline and calls
/// [`flush_idle`](Self::flush_idle) when it fires.
#[derive(Debug, Default)]
pub struct SegmentAggregator {
    buffer: String,
}

impl SegmentAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one incoming fragment.
    pub fn push_fragment(&mut self, fragment: &str) -> FragmentOutcome {
        if fragment.is_empty() {
            return FragmentOutcome::Ignored;
        }

        self.buffer.push_str(fragment);

        if fragment.contains(SENTENCE_ENDINGS) {
            match self.take_buffer() {
                Some(text) => FragmentOutcome::Flush(text),
                None => FragmentOutcome::Ignored,
            }
        } else {
            FragmentOutcome::ArmIdleTimer
        }
    }

    /// Idle timer fired: flush whatever has accumulated.
    pub fn flush_idle(&mut self) -> Option<String> {
        self.take_buffer()
    }

    /// Backend shutdown: flush any non-empty remainder unconditionally.
    pub fn flush_remainder(&mut self) -> Option<String> {
        self.take_buffer()
    }

    pub fn has_pending(&self) -> bool {
        !self.buffer.trim().is_empty()
    }

    fn take_buffer(&mut self) -> Option<String> {
        let text = self.buffer.trim().to_string();
        self.buffer.clear();
        if text.is_empty() {
            None
        } else {
            Some(text)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn punctuation_triggers_flush() {
        let mut agg = SegmentAggregator::new();
        assert_eq!(agg.push_fragment("Hello"), FragmentOutcome::ArmIdleTimer);
        assert_eq!(agg.push_fragment(" world"), FragmentOutcome::ArmIdleTimer);
        assert_eq!(
            agg.push_fragment("."),
            FragmentOutcome::Flush("Hello world.".to_string())
        );
        assert!(!agg.has_pending());
    }

    #[test]
    fn cjk_punctuation_triggers_flush() {
        let mut agg = SegmentAggregator::new();
        agg.push_fragment("안녕하세요");
        assert_eq!(
            agg.push_fragment("。"),
            FragmentOutcome::Flush("안녕하세요。".to_string())
        );
    }

    #[test]
    fn idle_flush_returns_accumulated_text() {
        let mut agg = SegmentAggregator::new();
        agg.push_fragment("no punctuation here");
        assert_eq!(
            agg.flush_idle(),
            Some("no punctuation here".to_string())
        );
        assert_eq!(agg.flush_idle(), None);
    }

    #[test]
    fn empty_fragment_is_ignored() {
        let mut agg = SegmentAggregator::new();
        assert_eq!(agg.push_fragment(""), FragmentOutcome::Ignored);
        assert!(!agg.has_pending());
    }

    #[test]
    fn whitespace_only_buffer_never_flushes() {
        let mut agg = SegmentAggregator::new();
        agg.push_fragment("   ");
        assert_eq!(agg.flush_idle(), None);
        assert_eq!(agg.push_fragment(" . "), FragmentOutcome::Ignored);
    }

    #[test]
    fn remainder_flush_on_shutdown() {
        let mut agg = SegmentAggregator::new();
        agg.push_fragment("trailing words");
        assert_eq!(agg.flush_remainder(), Some("trailing words".to_string()));
        assert_eq!(agg.flush_remainder(), None);
    }

    #[test]
    fn punctuation_mid_fragment_flushes_whole_buffer() {
        let mut agg = SegmentAggregator::new();
        agg.push_fragment("first part");
        assert_eq!(
            agg.push_fragment(" done. and"),
            FragmentOutcome::Flush("first part done. and".to_string())
        );
        // Nothing held back after a flush
        assert!(!agg.has_pending());
    }

    /// Segmentation completeness: everything fed in comes out exactly once,
    /// across mixed punctuation and idle flushes.
    #[test]
    fn no_loss_no_duplication_across_flush_paths() {
        let fragments = ["the", " quick", " brown.", "fox", " jumps", "!", "over", " lazy"];
        let mut agg = SegmentAggregator::new();
        let mut emitted = Vec::new();

        for (i, frag) in fragments.iter().enumerate() {
            match agg.push_fragment(frag) {
                FragmentOutcome::Flush(text) => emitted.push(text),
                FragmentOutcome::ArmIdleTimer => {
                    // Simulate the idle timer firing mid-stream once
                    if i == 4 {
                        if let Some(text) = agg.flush_idle() {
                            emitted.push(text);
                        }
                    }
                }
                FragmentOutcome::Ignored => {}
            }
        }
        if let Some(text) = agg.flush_remainder() {
            emitted.push(text);
        }

        let rejoined = emitted.join("");
        let input: String = fragments.concat();
        // Trimming only removes edge whitespace at flush boundaries
        assert_eq!(
            rejoined.replace(' ', ""),
            input.replace(' ', ""),
            "characters lost or duplicated"
        );
        assert_eq!(emitted.len(), 4);
    }
}
