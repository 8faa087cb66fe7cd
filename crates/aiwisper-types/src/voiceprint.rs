//! VoicePrint data model (spec.md §3). Matching logic lives in `aiwisper-ml::voiceprint`.

use serde::{Deserialize, Serialize};

/// Which channel a voiceprint's sample was captured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoicePrintSource {
    Mic,
    Sys,
}

/// A persisted speaker embedding with a stable name.
///
/// Invariant: `‖embedding‖₂ = 1 ± 1e-6`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoicePrint {
    pub id: String,
    pub name: String,
    pub embedding: Vec<f32>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub last_seen_at: chrono::DateTime<chrono::Utc>,
    pub seen_count: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<VoicePrintSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_path: Option<String>,
}
