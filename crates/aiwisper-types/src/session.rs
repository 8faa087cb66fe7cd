//! Session and Chunk data model (spec.md §3, §6 meta.json schema).

use serde::{Deserialize, Serialize};

use crate::TranscriptSegment;

/// Lifecycle state of a recording session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Recording,
    /// Stop has been requested; pending chunk work is draining.
    Finalizing,
    Stopped,
}

/// Lifecycle state of one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStatus {
    Pending,
    Transcribing,
    Completed,
    Error,
}

/// One contiguous slice of a session's recording.
///
/// Invariant (post-finalization): for a given session, the multiset of
/// `(index, start_ms, end_ms)` is gap-free and non-overlapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub index: u32,
    pub id: String,
    pub start_ms: i64,
    pub end_ms: i64,
    pub duration_ns: u64,
    /// True when the chunk carries separate mic/sys channels (capture_system was on).
    pub stereo: bool,
    pub mic_text: String,
    pub sys_text: String,
    pub dialogue: Vec<TranscriptSegment>,
    pub status: ChunkStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Chunk {
    pub fn pending(index: u32, id: String, start_ms: i64, end_ms: i64, stereo: bool) -> Self {
        Self {
            index,
            id,
            start_ms,
            end_ms,
            duration_ns: ((end_ms - start_ms).max(0) as u64) * 1_000_000,
            stereo,
            mic_text: String::new(),
            sys_text: String::new(),
            dialogue: Vec::new(),
            status: ChunkStatus::Pending,
            error: None,
        }
    }
}

/// Compact chunk header as persisted in `meta.json`'s `chunks[]` array.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkHeader {
    pub index: u32,
    pub id: String,
    pub start_ms: i64,
    pub end_ms: i64,
    pub duration_ns: u64,
    pub status: ChunkStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&Chunk> for ChunkHeader {
    fn from(c: &Chunk) -> Self {
        Self {
            index: c.index,
            id: c.id.clone(),
            start_ms: c.start_ms,
            end_ms: c.end_ms,
            duration_ns: c.duration_ns,
            status: c.status,
            error: c.error.clone(),
        }
    }
}

/// `meta.json`: session header plus the chunk index (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionMeta {
    pub version: u32,
    pub id: String,
    pub start_time: chrono::DateTime<chrono::Utc>,
    pub status: SessionStatus,
    pub title: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub chunks: Vec<ChunkHeader>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub improved_dialogue: Option<String>,
}

pub const SESSION_META_VERSION: u32 = 1;

impl SessionMeta {
    pub fn new(id: String, title: String) -> Self {
        Self {
            version: SESSION_META_VERSION,
            id,
            start_time: chrono::Utc::now(),
            status: SessionStatus::Recording,
            title,
            tags: Vec::new(),
            chunks: Vec::new(),
            summary: None,
            improved_dialogue: None,
        }
    }
}

/// View joining a session-local speaker label to a voiceprint identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSpeaker {
    pub session_id: String,
    pub local_speaker_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voiceprint_id: Option<String>,
    pub display_name: String,
    pub segment_count: u32,
    pub total_duration_ms: i64,
}
