//! Transcript data model (spec.md Data Model: TranscriptSegment, TranscriptWord, SpeechRegion).

use serde::{Deserialize, Serialize};

/// Full result of transcribing one buffer of audio.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionResult {
    /// Full transcribed text
    pub text: String,
    /// Segments with timestamps
    pub segments: Vec<TranscriptSegment>,
    /// Detected language (ISO 639-1 code)
    pub language: Option<String>,
    /// Processing time in milliseconds
    pub processing_time_ms: u64,
    /// Real-time factor (audio_duration / processing_time)
    pub rtf: f32,
}

/// A segment of transcribed text with timing information.
///
/// Invariant: `start <= end`. `words`, when present, must be monotonic
/// and contained within `[start, end]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptSegment {
    /// Start time in milliseconds (session-global or chunk-local depending on context)
    pub start: i64,
    /// End time in milliseconds
    pub end: i64,
    /// Transcribed text
    pub text: String,
    /// Session-local speaker label ("mic", "Speaker N"); filled by the diarizer, not the engine
    pub speaker: Option<String>,
    /// Word-level timestamps
    pub words: Vec<TranscriptWord>,
    /// Confidence score (0.0 - 1.0)
    pub confidence: f32,
}

impl TranscriptSegment {
    /// True if the segment's own span and every word span are non-empty and ordered.
    pub fn is_well_formed(&self) -> bool {
        if self.start > self.end {
            return false;
        }
        let mut prev_end = self.start;
        for w in &self.words {
            if w.start > w.end || w.start < prev_end {
                return false;
            }
            prev_end = w.end;
        }
        prev_end <= self.end || self.words.is_empty()
    }
}

/// A single word with timing information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptWord {
    /// Start time in milliseconds
    pub start: i64,
    /// End time in milliseconds
    pub end: i64,
    /// The word text
    pub text: String,
    /// Confidence score (0.0 - 1.0)
    pub confidence: f32,
}

/// Speaker segment from diarization (raw clustering output, before identity attach).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeakerSegment {
    /// Start time in seconds
    pub start: f32,
    /// End time in seconds
    pub end: f32,
    /// Session-local cluster id (0, 1, 2, ...)
    pub speaker: i32,
}

/// A contiguous region of speech, in real audio-time milliseconds.
///
/// Regions separated by less than the configured silence threshold are
/// merged by the detector before being handed to the chunker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeechRegion {
    pub start_ms: i64,
    pub end_ms: i64,
}

impl SpeechRegion {
    pub fn duration_ms(&self) -> i64 {
        (self.end_ms - self.start_ms).max(0)
    }

    pub fn contains(&self, ts_ms: i64) -> bool {
        ts_ms >= self.start_ms && ts_ms <= self.end_ms
    }
}
