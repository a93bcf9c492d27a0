//! Finalized transcript segments emitted by the transcription backends.

use serde::Serialize;

/// One finalized, attributable unit of transcribed speech.
///
/// Both backends normalize to this shape so the rest of the pipeline is
/// backend-agnostic. Segments are immutable once emitted: the scheduler
/// consumes the text, the session recorder persists the whole thing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptSegment {
    /// Transcribed text, trimmed.
    pub text: String,
    /// Speaker label from server-side diarization, when the backend has it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker_label: Option<String>,
    /// Offset from session start in milliseconds, when the backend reports timing.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset_millis: Option<u64>,
    /// Whether this is a final result. Interim results are never emitted
    /// today, but the flag is part of the segment contract.
    pub is_final: bool,
}

impl TranscriptSegment {
    /// Build a final segment carrying only text (Gemini Live path).
    pub fn text_only(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            speaker_label: None,
            offset_millis: None,
            is_final: true,
        }
    }
}
