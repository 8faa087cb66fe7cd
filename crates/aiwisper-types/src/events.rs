//! Events pushed to the GUI shell over the RPC event stream (spec.md §6).

use serde::{Deserialize, Serialize};

use crate::TranscriptSegment;

/// Stable error kind reported alongside `Event::Error` (spec.md §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    CaptureUnavailable,
    PermissionDenied,
    ModelUnavailable,
    EngineInternal,
    Timeout,
    Busy,
    Cancelled,
    StorageIo,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum Event {
    SessionStarted {
        session_id: String,
    },
    SessionStopped {
        session_id: String,
    },
    ChunkCreated {
        session_id: String,
        chunk_index: u32,
        start_ms: i64,
        end_ms: i64,
    },
    ChunkTranscribing {
        session_id: String,
        chunk_index: u32,
    },
    ChunkTranscribed {
        session_id: String,
        chunk_index: u32,
        dialogue: Vec<TranscriptSegment>,
    },
    ChunkError {
        session_id: String,
        chunk_index: u32,
        kind: ErrorKind,
        message: String,
    },
    AudioLevel {
        mic_rms: f32,
        sys_rms: f32,
    },
    StreamingUpdate {
        text: String,
        is_confirmed: bool,
        confidence: f32,
        timestamp_ms: i64,
    },
    ModelDownloadProgress {
        model_id: String,
        progress: f64,
    },
    FullTranscriptionStarted {
        session_id: String,
        total: u32,
    },
    FullTranscriptionProgress {
        session_id: String,
        current: u32,
        total: u32,
    },
    FullTranscriptionCompleted {
        session_id: String,
    },
    FullTranscriptionCancelled {
        session_id: String,
    },
    FullTranscriptionError {
        session_id: String,
        message: String,
    },
    DiarizationEnabled,
    DiarizationDisabled,
    DiarizationStatus {
        busy: bool,
    },
    DiarizationError {
        message: String,
    },
    Error {
        kind: ErrorKind,
        message: String,
    },
}
