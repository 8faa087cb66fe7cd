//! IPC messages exchanged with the out-of-process inference worker.

use serde::{Deserialize, Serialize};

use crate::{SpeakerSegment, TranscriptionResult};

/// Worker command for IPC
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerCommand {
    Diarize { samples: Vec<f32> },
    Transcribe { samples: Vec<f32>, engine: String },
    Shutdown,
}

/// Worker response for IPC
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WorkerResponse {
    Diarization {
        segments: Vec<SpeakerSegment>,
        num_speakers: i32,
    },
    Transcription(TranscriptionResult),
    Error {
        message: String,
    },
    Ok,
}
