//! Runtime configuration (spec.md §6 Configuration).
//!
//! A `Settings` value is snapshotted and passed by value into each
//! pipeline run; live edits are staged and only take effect at the next
//! chunk boundary (spec.md §9 Design Notes).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VadMode {
    Auto,
    Compression,
    PerRegion,
    Off,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VadMethod {
    Energy,
    Neural,
    Auto,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HybridWireMode {
    Confidence,
    FullCompare,
    Parallel,
}

/// Application settings — the configuration surface that affects the core pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// "auto", "ru", "en", ...
    pub language: String,
    pub capture_system: bool,
    pub voice_isolation: bool,
    /// [0, 1]
    pub echo_cancel: f32,
    pub vad_mode: VadMode,
    pub vad_method: VadMethod,
    /// [0.3, 2.0] seconds
    pub pause_threshold_s: f32,
    pub streaming_enabled: bool,
    /// [1, 30] seconds
    pub streaming_chunk_seconds: u32,
    /// [0.5, 1.0]
    pub streaming_confirmation_threshold: f32,
    pub hybrid_enabled: bool,
    pub hybrid_secondary_engine: String,
    pub hybrid_mode: HybridWireMode,
    pub hybrid_hotwords: Vec<String>,
    pub diarization_enabled: bool,
    /// Primary transcription engine id, e.g. "ggml-large-v3-turbo"
    pub transcription_engine: String,
    #[serde(default)]
    pub audio_device_id: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            language: "auto".to_string(),
            capture_system: false,
            voice_isolation: false,
            echo_cancel: 0.0,
            vad_mode: VadMode::Auto,
            vad_method: VadMethod::Auto,
            pause_threshold_s: 0.5,
            streaming_enabled: true,
            streaming_chunk_seconds: 10,
            streaming_confirmation_threshold: 0.8,
            hybrid_enabled: false,
            hybrid_secondary_engine: String::new(),
            hybrid_mode: HybridWireMode::Confidence,
            hybrid_hotwords: Vec::new(),
            diarization_enabled: true,
            transcription_engine: "ggml-base".to_string(),
            audio_device_id: None,
        }
    }
}

impl Settings {
    /// Clamp user-editable numeric fields into the ranges spec.md §6 enumerates.
    pub fn clamped(mut self) -> Self {
        self.echo_cancel = self.echo_cancel.clamp(0.0, 1.0);
        self.pause_threshold_s = self.pause_threshold_s.clamp(0.3, 2.0);
        self.streaming_chunk_seconds = self.streaming_chunk_seconds.clamp(1, 30);
        self.streaming_confirmation_threshold =
            self.streaming_confirmation_threshold.clamp(0.5, 1.0);
        self
    }
}

/// Configuration passed to `start_recording`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureConfig {
    #[serde(default)]
    pub mic_device: Option<String>,
    pub capture_system: bool,
    pub voice_isolation: bool,
    pub echo_cancel: f32,
}
