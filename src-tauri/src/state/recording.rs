//! Recording session management
//!
//! Handles audio recording with:
//! - MP3 writing via FFmpeg
//! - ChunkBuffer for automatic segmentation
//! - Session and chunk metadata persistence
//! - Transcription of chunks during recording

use aiwisper_audio::{
    calculate_rms, is_silent, resample, AudioChannel, CaptureConfig, ChunkBuffer, Mixer,
    SegmentedMp3Writer, VadConfig,
};
use aiwisper_ml::voiceprint::VoicePrintMatcher;
use aiwisper_ml::BoundedDiarizer;
use aiwisper_types::Event;
use std::sync::mpsc;
use anyhow::Result;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

use super::event_bus::EventBus;
use super::speaker_registry::SpeakerRegistry;

/// Write `body` to `path` via a `.tmp` sibling + rename so a crash mid-write
/// never leaves a half-written `meta.json`/chunk JSON behind (spec.md §4.3).
fn write_json_atomic(path: &std::path::Path, body: &str) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, body)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Sample rate for recording. `Mixer` always outputs 16kHz mono
/// (spec.md §4.1's sample-rate invariant), so this matches its output
/// rather than the mic's native rate.
const SAMPLE_RATE: u32 = 16000;
/// Sample rate for transcription
const TRANSCRIPTION_SAMPLE_RATE: u32 = 16000;

/// Configuration for transcription during recording
#[derive(Debug, Clone)]
pub struct TranscriptionConfig {
    /// Primary model ID (e.g., "ggml-large-v3-turbo")
    pub model_id: String,
    /// Language code (e.g., "ru", "en", "auto")
    pub language: String,
    /// Enable hybrid transcription
    pub hybrid_enabled: bool,
    /// Secondary model ID for hybrid mode
    pub hybrid_secondary_model_id: String,
    /// Hotwords for improved accuracy
    pub hotwords: Vec<String>,
    /// Enable diarization for sys channel
    pub diarization_enabled: bool,
    /// Diarization provider ("coreml" for FluidAudio)
    pub diarization_provider: String,
    /// Enable the live streaming (preview) transcriber while a chunk is open
    pub streaming_enabled: bool,
    /// Rolling buffer length for the streaming transcriber, 1-30s
    pub streaming_chunk_seconds: u32,
    /// Confidence required before a prefix is reported confirmed
    pub streaming_confirmation_threshold: f32,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            model_id: "ggml-large-v3-turbo".to_string(),
            language: "ru".to_string(),
            hybrid_enabled: false,
            hybrid_secondary_model_id: String::new(),
            hotwords: Vec::new(),
            diarization_enabled: false,
            diarization_provider: String::new(),
            streaming_enabled: true,
            streaming_chunk_seconds: 10,
            streaming_confirmation_threshold: 0.8,
        }
    }
}

/// Messages sent from the capture loop to the dedicated streaming-transcriber
/// thread (spec.md §4.5/§5).
enum StreamingMsg {
    /// Newly captured mic samples at [`TRANSCRIPTION_SAMPLE_RATE`].
    Samples(Vec<f32>),
    /// The open chunk closed; discard the rolling buffer and confirmation state.
    ChunkBoundary,
    Stop,
}

/// Publish one streaming tick result to the frontend (spec.md §6).
fn emit_streaming_update(
    app_handle: &tauri::AppHandle,
    event_bus: &EventBus,
    update: aiwisper_ml::StreamingUpdate,
    fallback_confidence: f32,
) {
    #[allow(unused_imports)]
    use tauri::Emitter;

    let (text, is_confirmed, confidence) = match update {
        aiwisper_ml::StreamingUpdate::Volatile { text, confidence } => (text, false, confidence),
        aiwisper_ml::StreamingUpdate::Confirmed { text } => (text, true, fallback_confidence),
    };
    let timestamp_ms = chrono::Utc::now().timestamp_millis();

    let _ = app_handle.emit(
        "streaming_update",
        serde_json::json!({
            "text": text,
            "isConfirmed": is_confirmed,
            "confidence": confidence,
            "timestampMs": timestamp_ms,
        }),
    );
    event_bus.publish(Event::StreamingUpdate {
        text,
        is_confirmed,
        confidence,
        timestamp_ms,
    });
}

/// Dedicated task running the streaming transcriber for one recording session
/// (spec.md §5: one task per mic-derived preview stream). Ticks roughly every
/// `config.stride`, pushing mic samples received in between.
fn streaming_transcriber_thread(
    rx: mpsc::Receiver<StreamingMsg>,
    engine: std::sync::Arc<dyn aiwisper_ml::TranscriptionEngine>,
    config: aiwisper_ml::StreamingConfig,
    app_handle: tauri::AppHandle,
    event_bus: Arc<EventBus>,
) {
    let stride = config.stride;
    let confirmation_threshold = config.confirmation_threshold;
    let mut transcriber = aiwisper_ml::StreamingTranscriber::new(config, TRANSCRIPTION_SAMPLE_RATE);
    let mut last_tick = Instant::now();

    loop {
        let remaining = stride.saturating_sub(last_tick.elapsed());
        match rx.recv_timeout(remaining) {
            Ok(StreamingMsg::Samples(samples)) => {
                transcriber.push_samples(&samples);
                continue;
            }
            Ok(StreamingMsg::ChunkBoundary) => {
                transcriber.reset();
                continue;
            }
            Ok(StreamingMsg::Stop) => break,
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }

        last_tick = Instant::now();
        if let Some(_guard) = transcriber.try_begin_tick() {
            if let Some(update) = transcriber.process_tick(engine.as_ref()) {
                emit_streaming_update(&app_handle, &event_bus, update, confirmation_threshold);
            }
        }
    }
}

/// Recording session data
pub struct RecordingSession {
    pub id: String,
    pub data_dir: PathBuf,
    pub start_time: chrono::DateTime<chrono::Utc>,
    pub language: String,
    pub model_id: String,
    pub is_stereo: bool,
}

impl RecordingSession {
    /// Create a new recording session
    pub fn new(language: &str, model_id: &str, _is_stereo: bool) -> Result<Self> {
        let id = Uuid::new_v4().to_string();
        let start_time = chrono::Utc::now();

        // Get sessions directory
        let sessions_dir = dirs::data_local_dir()
            .map(|p| p.join("aiwisper").join("sessions"))
            .ok_or_else(|| anyhow::anyhow!("Could not determine data directory"))?;

        let data_dir = sessions_dir.join(&id);

        // Create session directory and chunks subdirectory
        std::fs::create_dir_all(data_dir.join("chunks"))?;

        Ok(Self {
            id,
            data_dir,
            start_time,
            language: language.to_string(),
            model_id: model_id.to_string(),
            is_stereo: false,
        })
    }

    /// Get MP3 file path
    pub fn mp3_path(&self) -> PathBuf {
        self.data_dir.join("full.mp3")
    }

    /// Get meta.json path
    pub fn meta_path(&self) -> PathBuf {
        self.data_dir.join("meta.json")
    }

    /// Get chunk file path
    pub fn chunk_path(&self, index: usize) -> PathBuf {
        self.data_dir
            .join("chunks")
            .join(format!("chunk_{:04}.json", index))
    }

    /// Save session metadata
    pub fn save_meta(
        &self,
        end_time: Option<chrono::DateTime<chrono::Utc>>,
        duration_ms: u64,
        chunks_count: usize,
    ) -> Result<()> {
        // При записи (end_time = None) используем простой формат без длительности
        // При завершении показываем длительность в минутах/секундах
        let title = if end_time.is_none() {
            format!("Запись {}", self.start_time.format("%d.%m %H:%M"))
        } else {
            let total_secs = duration_ms / 1000;
            let mins = total_secs / 60;
            let secs = total_secs % 60;
            if mins > 0 {
                format!(
                    "Запись {} · {} мин {} сек",
                    self.start_time.format("%d.%m %H:%M"),
                    mins,
                    secs
                )
            } else {
                format!(
                    "Запись {} · {} сек",
                    self.start_time.format("%d.%m %H:%M"),
                    secs
                )
            }
        };

        let meta = serde_json::json!({
            "id": self.id,
            "startTime": self.start_time.to_rfc3339(),
            "endTime": end_time.map(|t| t.to_rfc3339()),
            "status": if end_time.is_some() { "completed" } else { "recording" },
            "language": self.language,
            "model": self.model_id,
            "title": title,
            "tags": [],
            "totalDuration": duration_ms,
            "chunksCount": chunks_count,
        });

        write_json_atomic(&self.meta_path(), &serde_json::to_string_pretty(&meta)?)?;

        Ok(())
    }
}

/// Saved chunk metadata (for JSON)
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChunkMeta {
    pub id: String,
    pub index: i32,
    pub start_ms: i64,
    pub end_ms: i64,
    pub status: String,
    #[serde(default)]
    pub transcription: String,
    #[serde(default)]
    pub mic_text: Option<String>,
    #[serde(default)]
    pub sys_text: Option<String>,
    #[serde(default)]
    pub dialogue: Vec<DialogueEntry>,
    /// Stable error kind when `status == "error"` (spec.md §3, §7). The
    /// audio file is retained either way; only the transcript is missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Dialogue entry for JSON
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct DialogueEntry {
    pub start: i64,
    pub end: i64,
    pub text: String,
    #[serde(default)]
    pub speaker: String,
}

impl ChunkMeta {
    /// Create from ChunkEvent
    pub fn from_event(event: &aiwisper_audio::ChunkEvent, _session_id: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            index: event.index as i32,
            start_ms: event.start_ms,
            end_ms: event.end_ms,
            status: "pending".to_string(),
            transcription: String::new(),
            mic_text: None,
            sys_text: None,
            dialogue: Vec::new(),
            error: None,
        }
    }

    /// Mark this chunk as failed with a stable error kind, e.g.
    /// `"backpressure"` when the pipeline work queue is saturated
    /// (spec.md §4.9 step 1, §7). The pipeline continues with the next
    /// chunk; the audio file on disk is untouched.
    pub fn mark_error(&mut self, kind: &str) {
        self.status = "error".to_string();
        self.error = Some(kind.to_string());
    }

    /// Save to file
    pub fn save(&self, path: &std::path::Path) -> Result<()> {
        write_json_atomic(path, &serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Handle to control active recording
pub struct RecordingHandle {
    /// Stop flag
    pub stop_flag: Arc<AtomicBool>,
    /// Microphone mute flag
    pub mic_muted: Arc<AtomicBool>,
    /// System audio mute flag
    pub sys_muted: Arc<AtomicBool>,
    /// Join handle for recording thread
    pub join_handle: Option<std::thread::JoinHandle<RecordingResult>>,
    /// Session info
    pub session: RecordingSession,
}

/// Result of recording
pub struct RecordingResult {
    pub session_id: String,
    pub duration_ms: u64,
    pub sample_count: usize,
    pub chunks: Vec<ChunkMeta>,
}

impl RecordingHandle {
    /// Set mute state for microphone channel
    pub fn set_mic_muted(&self, muted: bool) {
        self.mic_muted.store(muted, Ordering::SeqCst);
        tracing::info!("Mic mute set to: {}", muted);
    }

    /// Set mute state for system audio channel
    pub fn set_sys_muted(&self, muted: bool) {
        self.sys_muted.store(muted, Ordering::SeqCst);
        tracing::info!("Sys mute set to: {}", muted);
    }

    /// Get current mic mute state
    pub fn is_mic_muted(&self) -> bool {
        self.mic_muted.load(Ordering::SeqCst)
    }

    /// Get current sys mute state
    pub fn is_sys_muted(&self) -> bool {
        self.sys_muted.load(Ordering::SeqCst)
    }

    /// Stop recording and get result
    pub fn stop(mut self) -> Result<RecordingResult> {
        // Signal stop
        self.stop_flag.store(true, Ordering::SeqCst);

        // Wait for thread
        let result = if let Some(handle) = self.join_handle.take() {
            handle
                .join()
                .map_err(|_| anyhow::anyhow!("Recording thread panicked"))?
        } else {
            return Err(anyhow::anyhow!("Recording already stopped"));
        };

        // Update session metadata with final state
        let end_time = chrono::Utc::now();
        self.session.save_meta(
            Some(end_time),
            result.duration_ms,
            result.chunks.len(),
        )?;

        Ok(result)
    }
}

/// Start recording session
///
/// Returns a handle to control the recording.
/// Recording runs in a separate thread due to cpal::Stream not being Send+Sync.
pub fn start_recording(
    device_id: Option<String>,
    language: &str,
    model_id: &str,
    capture_system: bool,
    transcription_config: TranscriptionConfig,
    app_handle: tauri::AppHandle,
    pipeline_pool: Arc<super::pipeline_pool::PipelinePool>,
    voiceprint_matcher: Arc<VoicePrintMatcher>,
    speaker_registry: Arc<SpeakerRegistry>,
    event_bus: Arc<EventBus>,
) -> Result<RecordingHandle> {
    // Create session (фиксируем стерео-флаг из capture_system)
    let mut session = RecordingSession::new(language, model_id, capture_system)?;
    session.is_stereo = capture_system;
    let session_id = session.id.clone();
    let mp3_path = session.mp3_path();

    // Save initial meta
    session.save_meta(None, 0, 0)?;

    // Create stop flag
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = stop_flag.clone();

    // Create mute flags
    let mic_muted = Arc::new(AtomicBool::new(false));
    let sys_muted = Arc::new(AtomicBool::new(false));
    let mic_muted_clone = mic_muted.clone();
    let sys_muted_clone = sys_muted.clone();

    // Clone for thread
    let data_dir = session.data_dir.clone();

    // Spawn recording thread
    let join_handle = std::thread::spawn(move || {
        recording_thread(
            session_id,
            mp3_path,
            data_dir,
            device_id,
            capture_system,
            stop_flag_clone,
            mic_muted_clone,
            sys_muted_clone,
            app_handle,
            transcription_config,
            pipeline_pool,
            voiceprint_matcher,
            speaker_registry,
            event_bus,
        )
    });

    Ok(RecordingHandle {
        stop_flag,
        mic_muted,
        sys_muted,
        join_handle: Some(join_handle),
        session,
    })
}

/// Recording thread function
fn recording_thread(
    session_id: String,
    _mp3_path: PathBuf,  // Теперь используется SegmentedMp3Writer с data_dir
    data_dir: PathBuf,
    device_id: Option<String>,
    capture_system: bool,
    stop_flag: Arc<AtomicBool>,
    mic_muted: Arc<AtomicBool>,
    sys_muted: Arc<AtomicBool>,
    app_handle: tauri::AppHandle,
    transcription_config: TranscriptionConfig,
    pipeline_pool: Arc<super::pipeline_pool::PipelinePool>,
    voiceprint_matcher: Arc<VoicePrintMatcher>,
    speaker_registry: Arc<SpeakerRegistry>,
    event_bus: Arc<EventBus>,
) -> RecordingResult {
    use tauri::Emitter;

    // One shared diarizer instance for the whole recording (spec.md §4.7);
    // `None` just means FluidAudio isn't available on this machine, handled
    // the same as before at each diarization call site.
    let diarizer: Option<Arc<BoundedDiarizer>> = if transcription_config.diarization_enabled
        && transcription_config.diarization_provider == "coreml"
    {
        match aiwisper_ml::get_or_create_bounded_diarizer() {
            Ok(d) => Some(d),
            Err(e) => {
                tracing::warn!("Diarizer unavailable, sys channel will use plain 'sys' label: {}", e);
                None
            }
        }
    } else {
        None
    };

    // Capture & mixer (spec.md §4.1): one surface owns mic+system capture,
    // resampling to 16kHz mono, mute gating and the rolling level meter.
    let mut mixer = Mixer::new();
    if let Err(e) = mixer.start(CaptureConfig {
        mic_device: device_id.clone(),
        capture_system,
        voice_isolation: false,
        echo_cancel: 0.0,
    }) {
        tracing::error!("Failed to start mixer: {}", e);
        return RecordingResult {
            session_id,
            duration_ms: 0,
            sample_count: 0,
            chunks: Vec::new(),
        };
    }

    // MP3 channels: 1 for mic only, 2 for stereo (mic + sys)
    let channels = if capture_system { 2 } else { 1 };

    // Create segmented MP3 writer (15 минут = 900 сек на сегмент)
    // Это предотвращает бесконечный рост памяти при длительных записях
    let mut mp3_writer = match SegmentedMp3Writer::new(&data_dir, SAMPLE_RATE, channels, "128k", 900) {
        Ok(w) => w,
        Err(e) => {
            tracing::error!("Failed to create segmented MP3 writer: {}", e);
            return RecordingResult {
                session_id,
                duration_ms: 0,
                sample_count: 0,
                chunks: Vec::new(),
            };
        }
    };

    // Канал для сигналов очистки буфера после транскрипции
    let (drain_tx, drain_rx) = mpsc::channel::<i64>();

    // Create chunk buffer with VAD config
    let vad_config = if capture_system {
        VadConfig::fixed_interval()
    } else {
        VadConfig::default()
    };
    let mut chunk_buffer = ChunkBuffer::new(vad_config, SAMPLE_RATE);

    tracing::info!(
        "Recording started: session={}, capture_system={}",
        session_id,
        capture_system
    );

    // Emit session_started event with full session info
    // Must match Session interface from frontend/src/types/session.ts
    let _ = app_handle.emit(
        "session_started",
        serde_json::json!({
            "sessionId": session_id.clone(),
            "session": {
                "id": session_id.clone(),
                "startTime": chrono::Utc::now().to_rfc3339(),
                "endTime": null,
                "status": "recording",
                "chunks": [],
                "dataDir": data_dir.to_string_lossy().to_string(),
                "totalDuration": 0,
                "title": null,
                "tags": [],
                "summary": null,
                "language": null,
                "model": null,
                "sampleCount": 0,
            }
        }),
    );
    event_bus.publish(Event::SessionStarted {
        session_id: session_id.clone(),
    });

    // Streaming (preview) transcriber (spec.md §4.5): one dedicated task fed
    // mic samples while a chunk is open, reusing the same cached primary
    // engine as closed-chunk transcription.
    let streaming_tx = if transcription_config.streaming_enabled {
        match aiwisper_ml::get_or_create_engine_cached(
            &transcription_config.model_id,
            &transcription_config.language,
        ) {
            Ok(engine) => {
                let (tx, rx) = mpsc::channel::<StreamingMsg>();
                let streaming_config = aiwisper_ml::StreamingConfig {
                    chunk_seconds: transcription_config.streaming_chunk_seconds,
                    stride: std::time::Duration::from_millis(500),
                    confirmation_threshold: transcription_config.streaming_confirmation_threshold,
                    confirmation_ticks: 2,
                };
                let bg_app_handle = app_handle.clone();
                let bg_event_bus = Arc::clone(&event_bus);
                std::thread::spawn(move || {
                    streaming_transcriber_thread(
                        rx,
                        engine,
                        streaming_config,
                        bg_app_handle,
                        bg_event_bus,
                    );
                });
                Some(tx)
            }
            Err(e) => {
                tracing::warn!("Streaming transcriber unavailable, no engine: {}", e);
                None
            }
        }
    } else {
        None
    };

    let start_time = Instant::now();
    let mut chunks: Vec<ChunkMeta> = Vec::new();
    let mut total_mic_samples: usize = 0;

    // Buffers for stereo recording (микрофон и система накапливаются до выравнивания).
    // mixer.poll() resamples/mutes/meters, but mic/sys frame lengths can still
    // differ between ticks, so we keep accumulating here before pairing them up.
    let mut sys_buffer: Vec<f32> = Vec::new();
    let mut mic_buffer: Vec<f32> = Vec::new();

    // For debug logging
    let mut loop_count: u64 = 0;

    // Счётчик итераций без новых системных данных (для детекции застоя)
    let mut sys_empty_streak: u32 = 0;
    const SYS_EMPTY_WARNING_THRESHOLD: u32 = 40; // 2 секунды (40 * 50ms)
    let mut sys_fallback_logged = false;

    // Main recording loop
    loop {
        // Check stop flag
        if stop_flag.load(Ordering::SeqCst) {
            break;
        }

        // Sleep briefly
        std::thread::sleep(std::time::Duration::from_millis(50));

        // Check mute flags
        let is_mic_muted = mic_muted.load(Ordering::Relaxed);
        let is_sys_muted = sys_muted.load(Ordering::Relaxed);
        mixer.set_channel_mute(AudioChannel::Microphone, is_mic_muted);
        mixer.set_channel_mute(AudioChannel::System, is_sys_muted);

        // Mixer (spec.md §4.1) owns capture draining, resampling to 16kHz,
        // mute zero-fill and the rolling 80ms level meter.
        let frame = mixer.poll().unwrap_or_default();
        let (mic_level_raw, sys_level_raw) = mixer.level();

        if !frame.mic.is_empty() {
            total_mic_samples += frame.mic.len();
            mic_buffer.extend_from_slice(&frame.mic);

            if let Some(tx) = &streaming_tx {
                if !is_mic_muted {
                    let _ = tx.send(StreamingMsg::Samples(frame.mic.clone()));
                }
            }
        }
        if !frame.sys.is_empty() {
            sys_buffer.extend_from_slice(&frame.sys);
        }

        // Отслеживание застоя системного аудио
        if capture_system {
            if frame.sys.is_empty() {
                sys_empty_streak += 1;
                if sys_empty_streak == SYS_EMPTY_WARNING_THRESHOLD {
                    tracing::warn!("⚠️ No system audio for {} iterations (~2 sec)! sys_buffer={}, mic_buffer={}",
                        sys_empty_streak, sys_buffer.len(), mic_buffer.len());
                }
            } else {
                sys_empty_streak = 0; // Сброс счётчика
            }
        }

        // Log every 20 iterations (1 second)
        loop_count += 1;
        if loop_count % 20 == 0 {
            tracing::info!(
                "Recording loop #{}: mic_new={}, sys_new={}, mic_buf={}, sys_buf={}, muted=({},{})",
                loop_count,
                frame.mic.len(),
                frame.sys.len(),
                mic_buffer.len(),
                sys_buffer.len(),
                is_mic_muted,
                is_sys_muted
            );
        }

        // Log mute state changes (only when they change)
        static LAST_MIC_MUTED: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(false);
        static LAST_SYS_MUTED: std::sync::atomic::AtomicBool = std::sync::atomic::AtomicBool::new(false);

        let last_mic = LAST_MIC_MUTED.swap(is_mic_muted, Ordering::Relaxed);
        let last_sys = LAST_SYS_MUTED.swap(is_sys_muted, Ordering::Relaxed);

        if last_mic != is_mic_muted || last_sys != is_sys_muted {
            tracing::info!("🔇 Mute state changed: mic_muted={}, sys_muted={}", is_mic_muted, is_sys_muted);
        }

        if capture_system {
            // FALLBACK: Если системный канал отключился или долго не отвечает,
            // генерируем тишину для системного аудио чтобы не блокировать запись
            if sys_empty_streak >= SYS_EMPTY_WARNING_THRESHOLD && sys_buffer.is_empty() && !mic_buffer.is_empty() {
                // Генерируем тишину в размере микрофонного буфера
                let silence_len = mic_buffer.len();
                sys_buffer.extend(std::iter::repeat(0.0f32).take(silence_len));

                // Логируем только первый раз после обнаружения проблемы
                if !sys_fallback_logged {
                    tracing::warn!("🔇 System audio unavailable, using silence fallback ({} samples)", silence_len);
                    sys_fallback_logged = true;
                }
            }

            // Стерео режим: пишем и обрабатываем только выровненные пары mic/sys
            let min_len = mic_buffer.len().min(sys_buffer.len());
            if min_len > 0 {
                let mic_chunk: Vec<f32> = mic_buffer.drain(..min_len).collect();
                let sys_chunk: Vec<f32> = sys_buffer.drain(..min_len).collect();

                // Mixer already zero-filled muted channels before we buffered them.
                if let Err(e) = mp3_writer.write_stereo(&mic_chunk, &sys_chunk) {
                    tracing::error!("Failed to write stereo MP3: {}", e);
                }

                // Process through chunk buffer (стерео всегда при наличии capture_system)
                chunk_buffer.process_stereo(&mic_chunk, &sys_chunk);
            }
        } else if !mic_buffer.is_empty() {
            // Моно режим: только микрофон. Mixer уже применил mute.
            let mic_chunk: Vec<f32> = mic_buffer.drain(..).collect();

            if let Err(e) = mp3_writer.write(&mic_chunk) {
                tracing::error!("Failed to write MP3: {}", e);
            }
            chunk_buffer.process(&mic_chunk);
        }

        // Check for completed chunks
        while let Some(event) = chunk_buffer.try_recv() {
            // При получении stop_flag пропускаем транскрипцию для быстрого выхода
            // Чанк всё равно сохраним со статусом pending для последующей обработки
            let is_stopping = stop_flag.load(Ordering::SeqCst);

            // The chunk that was open just closed; drop the streaming
            // transcriber's rolling buffer and confirmation state so the
            // next chunk starts from a clean preview (spec.md §4.5).
            if let Some(tx) = &streaming_tx {
                let _ = tx.send(StreamingMsg::ChunkBoundary);
            }

            let mut chunk_meta = ChunkMeta::from_event(&event, &session_id);
            let chunk_path = data_dir
                .join("chunks")
                .join(format!("chunk_{:04}.json", event.index));

            tracing::info!(
                "Chunk created: {} ({}-{} ms){}",
                event.index,
                event.start_ms,
                event.end_ms,
                if is_stopping { " [stopping, skipping transcription]" } else { "" }
            );

            // Emit chunk_created event (status: pending)
            let duration_ns = (chunk_meta.end_ms - chunk_meta.start_ms) as u64 * 1_000_000;
            let _ = app_handle.emit(
                "chunk_created",
                serde_json::json!({
                    "sessionId": session_id,
                    "chunk": {
                        "id": chunk_meta.id,
                        "index": chunk_meta.index,
                        "startMs": chunk_meta.start_ms,
                        "endMs": chunk_meta.end_ms,
                        "duration": duration_ns,
                        "status": "pending",
                        "isStereo": chunk_buffer.has_separate_channels(),
                    }
                }),
            );
            event_bus.publish(Event::ChunkCreated {
                session_id: session_id.clone(),
                chunk_index: chunk_meta.index as u32,
                start_ms: chunk_meta.start_ms,
                end_ms: chunk_meta.end_ms,
            });

            // Auto-transcribe chunk if model is available AND not stopping
            // При остановке пропускаем транскрипцию для быстрого выхода
            // ✅ Транскрипция теперь в ФОНОВОМ ПОТОКЕ, чтобы не блокировать запись и audio_level
            if !is_stopping {
                // Emit chunk_transcribing event
                let _ = app_handle.emit(
                    "chunk_transcribing",
                    serde_json::json!({
                        "sessionId": session_id,
                        "chunkId": chunk_meta.id,
                        "chunkIndex": chunk_meta.index,
                    }),
                );
                event_bus.publish(Event::ChunkTranscribing {
                    session_id: session_id.clone(),
                    chunk_index: chunk_meta.index as u32,
                });

                // Клонируем все необходимые данные для фонового потока
                let bg_chunk_meta = chunk_meta.clone();
                let bg_chunk_path = chunk_path.clone();
                let bg_session_id = session_id.clone();
                let bg_app_handle = app_handle.clone();
                let bg_transcription_config = transcription_config.clone();
                let bg_drain_tx = drain_tx.clone();
                let bg_event_bus = Arc::clone(&event_bus);
                let bg_diarizer = diarizer.clone();
                let bg_speaker_registry = Arc::clone(&speaker_registry);
                let bg_voiceprint_matcher = Arc::clone(&voiceprint_matcher);
                let chunk_end_ms = event.end_ms;

                if chunk_buffer.has_separate_channels() {
                    // Stereo mode: transcribe each channel separately
                    let mic_samples = chunk_buffer.get_mic_samples_range(event.start_ms, event.end_ms);
                    let sys_samples = chunk_buffer.get_sys_samples_range(event.start_ms, event.end_ms);
                    let sample_rate = chunk_buffer.sample_rate();

                    if !mic_samples.is_empty() || !sys_samples.is_empty() {
                        let submitted = pipeline_pool.try_submit(move || {
                            let transcribed = transcribe_chunk_stereo(
                                bg_chunk_meta,
                                &mic_samples,
                                &sys_samples,
                                sample_rate,
                                &bg_transcription_config,
                                &bg_session_id,
                                &bg_app_handle,
                                bg_diarizer.as_ref(),
                                &bg_speaker_registry,
                                &bg_voiceprint_matcher,
                            );
                            publish_chunk_transcribed(&bg_event_bus, &bg_session_id, &transcribed);
                            // Сохраняем результат транскрипции
                            if let Err(e) = transcribed.save(&bg_chunk_path) {
                                tracing::error!("Failed to save transcribed chunk: {}", e);
                            }
                            // Сигнал на очистку буфера после транскрипции
                            let _ = bg_drain_tx.send(chunk_end_ms);
                        });
                        if submitted.is_err() {
                            mark_chunk_backpressure(&mut chunk_meta, &session_id, &app_handle, &event_bus);
                            let _ = drain_tx.send(chunk_end_ms);
                        }
                    }
                } else {
                    // Mono mode
                    let chunk_samples = chunk_buffer.get_samples_range(event.start_ms, event.end_ms);
                    let sample_rate = chunk_buffer.sample_rate();

                    if !chunk_samples.is_empty() {
                        let submitted = pipeline_pool.try_submit(move || {
                            let transcribed = transcribe_chunk_samples(
                                bg_chunk_meta,
                                &chunk_samples,
                                sample_rate,
                                &bg_transcription_config,
                                &bg_session_id,
                                &bg_app_handle,
                            );
                            publish_chunk_transcribed(&bg_event_bus, &bg_session_id, &transcribed);
                            // Сохраняем результат транскрипции
                            if let Err(e) = transcribed.save(&bg_chunk_path) {
                                tracing::error!("Failed to save transcribed chunk: {}", e);
                            }
                            // Сигнал на очистку буфера после транскрипции
                            let _ = bg_drain_tx.send(chunk_end_ms);
                        });
                        if submitted.is_err() {
                            mark_chunk_backpressure(&mut chunk_meta, &session_id, &app_handle, &event_bus);
                            let _ = drain_tx.send(chunk_end_ms);
                        }
                    }
                }
            }

            // Save chunk meta
            if let Err(e) = chunk_meta.save(&chunk_path) {
                tracing::error!("Failed to save chunk meta: {}", e);
            }

            chunks.push(chunk_meta);
        }

        // Обработка сигналов очистки буфера от фоновых потоков транскрипции
        // Это критически важно для предотвращения бесконечного роста памяти
        while let Ok(drain_up_to_ms) = drain_rx.try_recv() {
            chunk_buffer.drain_processed_samples(drain_up_to_ms);
        }

        // Emit audio level (always emit, even if no samples yet).
        // mixer.level() already zeroes a muted channel's rolling RMS, so no
        // extra mute gating is needed here.
        let elapsed = start_time.elapsed().as_secs_f64();
        let mic_level = (mic_level_raw * 300.0).min(100.0);
        let sys_level_final = (sys_level_raw * 300.0).min(100.0);

        // Log first few emissions for debugging
        if loop_count <= 5 {
            tracing::info!(
                "Emitting audio-level: mic_level={:.1}, sys_level={:.1}, mic_muted={}, sys_muted={}, elapsed={:.2}s",
                mic_level,
                sys_level_final,
                is_mic_muted,
                is_sys_muted,
                elapsed
            );
        }

        let _ = app_handle.emit(
            "audio_level",
            serde_json::json!({
                "micLevel": mic_level,
                "sysLevel": sys_level_final,
                "duration": elapsed,
                "micMuted": is_mic_muted,
                "sysMuted": is_sys_muted,
            }),
        );
        event_bus.publish(Event::AudioLevel {
            mic_rms: mic_level_raw,
            sys_rms: sys_level_raw,
        });
    }

    // ===== ФИНАЛЬНАЯ ОБРАБОТКА БУФЕРОВ =====
    // После break из цикла могут остаться необработанные семплы:
    // 1. В mic_buffer/sys_buffer (невыровненные данные)
    // 2. В mixer (последние семплы, которые ещё не были вычитаны)
    tracing::info!(
        "Final buffer flush: mic_buffer={}, sys_buffer={} samples before processing",
        mic_buffer.len(),
        sys_buffer.len()
    );

    // mixer.stop() drains with a short grace period and stops both captures;
    // it can only be called once, so this is the last time we touch it.
    let final_frame = mixer.stop();
    total_mic_samples += final_frame.mic.len();
    if !final_frame.mic.is_empty() {
        mic_buffer.extend_from_slice(&final_frame.mic);
        tracing::info!(
            "Final mic samples: {}, mic_buffer now={}",
            final_frame.mic.len(),
            mic_buffer.len()
        );
    }
    if !final_frame.sys.is_empty() {
        sys_buffer.extend_from_slice(&final_frame.sys);
        tracing::info!("Final sys_buffer after drain: {} samples", sys_buffer.len());
    }

    // Обрабатываем оставшиеся выровненные данные
    if capture_system {
        let min_len = mic_buffer.len().min(sys_buffer.len());
        if min_len > 0 {
            let mic_final: Vec<f32> = mic_buffer.drain(..min_len).collect();
            let sys_final: Vec<f32> = sys_buffer.drain(..min_len).collect();

            // Записываем в MP3
            if let Err(e) = mp3_writer.write_stereo(&mic_final, &sys_final) {
                tracing::error!("Failed to write final stereo samples to MP3: {}", e);
            }

            // Передаём в chunk_buffer
            chunk_buffer.process_stereo(&mic_final, &sys_final);
            tracing::info!(
                "Final stereo samples processed: {} samples, remaining mic={}, sys={}",
                min_len,
                mic_buffer.len(),
                sys_buffer.len()
            );
        }

        // Если остались только микрофонные семплы (системный канал отстал) - добавляем тишину
        if !mic_buffer.is_empty() {
            let remaining_mic = mic_buffer.len();
            let silence = vec![0.0f32; remaining_mic];
            if let Err(e) = mp3_writer.write_stereo(&mic_buffer, &silence) {
                tracing::error!("Failed to write final mic+silence to MP3: {}", e);
            }
            chunk_buffer.process_stereo(&mic_buffer, &silence);
            mic_buffer.clear();
            tracing::info!("Final mic samples (with silence for sys): {} samples", remaining_mic);
        }
    } else {
        // Моно режим - обрабатываем только микрофон
        if !mic_buffer.is_empty() {
            if let Err(e) = mp3_writer.write(&mic_buffer) {
                tracing::error!("Failed to write final mono samples to MP3: {}", e);
            }
            chunk_buffer.process(&mic_buffer);
            tracing::info!("Final mono samples processed: {}", mic_buffer.len());
            mic_buffer.clear();
        }
    }

    tracing::info!(
        "ChunkBuffer after final processing: total_duration={}ms",
        chunk_buffer.total_duration_ms()
    );

    // Flush remaining audio as final chunk(s) (stop() can close both an open
    // speech region and a still-pending chunker tail, spec.md §4.2 trigger 3).
    // При остановке не блокируем на транскрипции - запускаем в фоне
    for event in chunk_buffer.flush_all() {
        let mut chunk_meta = ChunkMeta::from_event(&event, &session_id);
        let chunk_path = data_dir
            .join("chunks")
            .join(format!("chunk_{:04}.json", event.index));

        tracing::info!(
            "Final chunk created: {} ({}-{} ms), starting background transcription",
            event.index,
            event.start_ms,
            event.end_ms
        );

        // Emit chunk_created event (status: pending)
        let final_duration_ns = (chunk_meta.end_ms - chunk_meta.start_ms) as u64 * 1_000_000;
        let _ = app_handle.emit(
            "chunk_created",
            serde_json::json!({
                "sessionId": session_id,
                "chunk": {
                    "id": chunk_meta.id,
                    "index": chunk_meta.index,
                    "startMs": chunk_meta.start_ms,
                    "endMs": chunk_meta.end_ms,
                    "duration": final_duration_ns,
                    "status": "pending",
                    "isStereo": chunk_buffer.has_separate_channels(),
                }
            }),
        );
        event_bus.publish(Event::ChunkCreated {
            session_id: session_id.clone(),
            chunk_index: chunk_meta.index as u32,
            start_ms: chunk_meta.start_ms,
            end_ms: chunk_meta.end_ms,
        });

        // Запускаем транскрипцию финального чанка в фоновом потоке
        // чтобы не блокировать остановку записи
        let bg_chunk_meta = chunk_meta.clone();
        let bg_chunk_path = chunk_path.clone();
        let bg_session_id = session_id.clone();
        let bg_app_handle = app_handle.clone();
        let bg_transcription_config = transcription_config.clone();
        let bg_event_bus = Arc::clone(&event_bus);
        let bg_diarizer = diarizer.clone();
        let bg_speaker_registry = Arc::clone(&speaker_registry);
        let bg_voiceprint_matcher = Arc::clone(&voiceprint_matcher);

        // Отправляем событие о начале фоновой транскрипции
        let _ = app_handle.emit(
            "chunk_transcribing",
            serde_json::json!({
                "sessionId": session_id,
                "chunkId": chunk_meta.id,
                "chunkIndex": chunk_meta.index,
            }),
        );
        event_bus.publish(Event::ChunkTranscribing {
            session_id: session_id.clone(),
            chunk_index: chunk_meta.index as u32,
        });

        if chunk_buffer.has_separate_channels() {
            let mic_samples = chunk_buffer.get_mic_samples_range(event.start_ms, event.end_ms);
            let sys_samples = chunk_buffer.get_sys_samples_range(event.start_ms, event.end_ms);
            let sample_rate = chunk_buffer.sample_rate();

            if !mic_samples.is_empty() || !sys_samples.is_empty() {
                let submitted = pipeline_pool.try_submit(move || {
                    let transcribed = transcribe_chunk_stereo(
                        bg_chunk_meta,
                        &mic_samples,
                        &sys_samples,
                        sample_rate,
                        &bg_transcription_config,
                        &bg_session_id,
                        &bg_app_handle,
                        bg_diarizer.as_ref(),
                        &bg_speaker_registry,
                        &bg_voiceprint_matcher,
                    );
                    publish_chunk_transcribed(&bg_event_bus, &bg_session_id, &transcribed);
                    let _ = transcribed.save(&bg_chunk_path);
                });
                if submitted.is_err() {
                    mark_chunk_backpressure(&mut chunk_meta, &session_id, &app_handle, &event_bus);
                }
            }
        } else {
            let chunk_samples = chunk_buffer.get_samples_range(event.start_ms, event.end_ms);
            let sample_rate = chunk_buffer.sample_rate();

            if !chunk_samples.is_empty() {
                let submitted = pipeline_pool.try_submit(move || {
                    let transcribed = transcribe_chunk_samples(
                        bg_chunk_meta,
                        &chunk_samples,
                        sample_rate,
                        &bg_transcription_config,
                        &bg_session_id,
                        &bg_app_handle,
                    );
                    publish_chunk_transcribed(&bg_event_bus, &bg_session_id, &transcribed);
                    let _ = transcribed.save(&bg_chunk_path);
                });
                if submitted.is_err() {
                    mark_chunk_backpressure(&mut chunk_meta, &session_id, &app_handle, &event_bus);
                }
            }
        }

        // Сохраняем чанк со статусом pending (транскрипция в фоне обновит файл)
        let _ = chunk_meta.save(&chunk_path);
        chunks.push(chunk_meta);
    }

    // mixer was already stopped above (final_frame); just report the total.
    let sample_count = total_mic_samples;

    let duration_ms = mp3_writer.duration_ms();
    let segment_count = mp3_writer.segment_count();

    tracing::info!(
        "Recording stopped: session={}, {} samples, {} ms, {} chunks, {} MP3 segments",
        session_id,
        sample_count,
        duration_ms,
        chunks.len(),
        segment_count
    );

    // Если несколько сегментов - нужна склейка
    if segment_count > 1 {
        // Emit finalizing event
        let _ = app_handle.emit(
            "session_finalizing",
            serde_json::json!({
                "sessionId": session_id,
                "stage": "concatenating",
                "message": "Сохранение записи...",
            }),
        );

        tracing::info!("Concatenating {} MP3 segments...", segment_count);
        
        match mp3_writer.concatenate() {
            Ok(final_path) => {
                tracing::info!("MP3 segments concatenated successfully: {:?}", final_path);
            }
            Err(e) => {
                tracing::error!("Failed to concatenate MP3 segments: {}", e);
                // Сегменты остаются на диске, можно склеить позже
            }
        }
    } else {
        // Один сегмент - просто закрываем и переименовываем
        if let Err(e) = mp3_writer.concatenate() {
            tracing::error!("Failed to finalize single segment: {}", e);
        }
    }

    // Stop the streaming transcriber task now that no chunk can be open.
    if let Some(tx) = &streaming_tx {
        let _ = tx.send(StreamingMsg::Stop);
    }

    // Emit session_stopped event
    event_bus.publish(Event::SessionStopped {
        session_id: session_id.clone(),
    });
    let _ = app_handle.emit(
        "session_stopped",
        serde_json::json!({
            "sessionId": session_id,
        }),
    );

    RecordingResult {
        session_id,
        duration_ms,
        sample_count,
        chunks,
    }
}

/// Demote a chunk to `status=error, error="backpressure"` when the
/// pipeline work queue is saturated (spec.md §4.9 step 1). Mutates
/// `chunk_meta` in place (it is persisted by the caller immediately
/// after); the audio file already on disk is untouched. The session
/// continues with the next chunk (spec.md §7).
fn mark_chunk_backpressure(
    chunk_meta: &mut ChunkMeta,
    session_id: &str,
    app_handle: &tauri::AppHandle,
    event_bus: &EventBus,
) {
    use tauri::Emitter;

    tracing::warn!(
        "Chunk {} (session {}) demoted to error=backpressure: pipeline queue saturated",
        chunk_meta.index,
        session_id
    );

    chunk_meta.mark_error("backpressure");
    event_bus.publish(Event::ChunkError {
        session_id: session_id.to_string(),
        chunk_index: chunk_meta.index as u32,
        kind: aiwisper_types::ErrorKind::Busy,
        message: "backpressure".to_string(),
    });

    let _ = app_handle.emit(
        "chunk_transcribed",
        serde_json::json!({
            "sessionId": session_id,
            "chunk": {
                "id": chunk_meta.id,
                "index": chunk_meta.index,
                "status": "error",
                "error": "backpressure",
            }
        }),
    );
}

/// Publish `ChunkTranscribed`/`ChunkError` on the central bus once a
/// background transcription closure finishes (spec.md §6). The raw
/// `app_handle.emit` calls inside `transcribe_chunk_stereo`/
/// `transcribe_chunk_samples` still fire immediately for the legacy
/// frontend listeners; this is the one extra publish needed so the bus's
/// ordering tracker (`EventBus::check_ordering`) sees the full lifecycle.
fn publish_chunk_transcribed(event_bus: &EventBus, session_id: &str, chunk_meta: &ChunkMeta) {
    if chunk_meta.status == "error" {
        event_bus.publish(Event::ChunkError {
            session_id: session_id.to_string(),
            chunk_index: chunk_meta.index as u32,
            kind: aiwisper_types::ErrorKind::EngineInternal,
            message: chunk_meta
                .error
                .clone()
                .unwrap_or_else(|| "transcription failed".to_string()),
        });
        return;
    }

    let dialogue = chunk_meta
        .dialogue
        .iter()
        .map(|d| aiwisper_types::TranscriptSegment {
            start: d.start,
            end: d.end,
            text: d.text.clone(),
            speaker: if d.speaker.is_empty() {
                None
            } else {
                Some(d.speaker.clone())
            },
            words: Vec::new(),
            confidence: 1.0,
        })
        .collect();

    event_bus.publish(Event::ChunkTranscribed {
        session_id: session_id.to_string(),
        chunk_index: chunk_meta.index as u32,
        dialogue,
    });
}

/// Transcribe chunk samples and update ChunkMeta
/// This function resamples audio if needed and runs transcription
fn transcribe_chunk_samples(
    mut chunk_meta: ChunkMeta,
    samples: &[f32],
    source_sample_rate: u32,
    config: &TranscriptionConfig,
    session_id: &str,
    app_handle: &tauri::AppHandle,
) -> ChunkMeta {
    #[allow(unused_imports)]
    use tauri::Emitter;

    tracing::info!(
        "Transcribing chunk {}: {} samples @ {}Hz, model={}",
        chunk_meta.index,
        samples.len(),
        source_sample_rate,
        config.model_id
    );

    // Resample to 16kHz if needed
    let samples_16k = if source_sample_rate != TRANSCRIPTION_SAMPLE_RATE {
        resample(samples, source_sample_rate, TRANSCRIPTION_SAMPLE_RATE)
            .unwrap_or_else(|_| samples.to_vec())
    } else {
        samples.to_vec()
    };

    // Run transcription
    match transcribe_samples_sync(
        &samples_16k,
        &config.model_id,
        &config.language,
        config.hybrid_enabled,
        &config.hybrid_secondary_model_id,
        &config.hotwords,
    ) {
        Ok(segments) => {
            // Convert segments to dialogue
            let dialogue: Vec<DialogueEntry> = segments
                .into_iter()
                .map(|seg| DialogueEntry {
                    start: seg.start + chunk_meta.start_ms,
                    end: seg.end + chunk_meta.start_ms,
                    text: seg.text,
                    speaker: seg.speaker.unwrap_or_else(|| "mic".to_string()),
                })
                .collect();

            // Update chunk meta
            chunk_meta.transcription = dialogue
                .iter()
                .map(|d| d.text.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            chunk_meta.dialogue = dialogue.clone();
            chunk_meta.status = "completed".to_string();

            tracing::info!(
                "Chunk {} transcribed: {} segments, {} chars",
                chunk_meta.index,
                dialogue.len(),
                chunk_meta.transcription.len()
            );

            // Emit chunk_transcribed event
            let duration_ns = (chunk_meta.end_ms - chunk_meta.start_ms) as u64 * 1_000_000;
            let _ = app_handle.emit(
                "chunk_transcribed",
                serde_json::json!({
                    "sessionId": session_id,
                    "chunk": {
                        "id": chunk_meta.id,
                        "index": chunk_meta.index,
                        "startMs": chunk_meta.start_ms,
                        "endMs": chunk_meta.end_ms,
                        "duration": duration_ns,
                        "status": "completed",
                        "transcription": chunk_meta.transcription,
                        "dialogue": dialogue,
                        "isStereo": false,
                    }
                }),
            );
        }
        Err(e) => {
            tracing::error!("Failed to transcribe chunk {}: {}", chunk_meta.index, e);
            chunk_meta.status = "error".to_string();

            // Emit chunk_error event
            let _ = app_handle.emit(
                "chunk_error",
                serde_json::json!({
                    "sessionId": session_id,
                    "chunkId": chunk_meta.id,
                    "error": e.to_string(),
                }),
            );
        }
    }

    chunk_meta
}

/// Transcribe stereo chunk (separate mic and sys channels)
fn transcribe_chunk_stereo(
    mut chunk_meta: ChunkMeta,
    mic_samples: &[f32],
    sys_samples: &[f32],
    source_sample_rate: u32,
    config: &TranscriptionConfig,
    session_id: &str,
    app_handle: &tauri::AppHandle,
    diarizer: Option<&Arc<BoundedDiarizer>>,
    speaker_registry: &SpeakerRegistry,
    voiceprint_matcher: &VoicePrintMatcher,
) -> ChunkMeta {
    #[allow(unused_imports)]
    use tauri::Emitter;

    // Check for silent channels to avoid hallucinations like "Продолжение следует..."
    let mic_is_silent = is_silent(mic_samples, None);
    let sys_is_silent = is_silent(sys_samples, None);
    
    // Calculate RMS for debugging
    let mic_rms = calculate_rms(mic_samples);
    let sys_rms = calculate_rms(sys_samples);
    
    tracing::info!(
        "Transcribing stereo chunk {}: mic={} sys={} samples @ {}Hz, rms=(mic:{:.6}, sys:{:.6}), silent=(mic:{}, sys:{})",
        chunk_meta.index,
        mic_samples.len(),
        sys_samples.len(),
        source_sample_rate,
        mic_rms,
        sys_rms,
        mic_is_silent,
        sys_is_silent
    );

    let mut all_dialogue: Vec<DialogueEntry> = Vec::new();

    // Transcribe mic channel (skip if silent)
    if !mic_samples.is_empty() && !mic_is_silent {
        let mic_16k = if source_sample_rate != TRANSCRIPTION_SAMPLE_RATE {
            resample(mic_samples, source_sample_rate, TRANSCRIPTION_SAMPLE_RATE)
                .unwrap_or_else(|_| mic_samples.to_vec())
        } else {
            mic_samples.to_vec()
        };

        if let Ok(segments) = transcribe_samples_sync(
            &mic_16k,
            &config.model_id,
            &config.language,
            config.hybrid_enabled,
            &config.hybrid_secondary_model_id,
            &config.hotwords,
        ) {
            for seg in segments {
                all_dialogue.push(DialogueEntry {
                    start: seg.start + chunk_meta.start_ms,
                    end: seg.end + chunk_meta.start_ms,
                    text: seg.text,
                    speaker: "mic".to_string(),
                });
            }
        }
    } else if mic_is_silent {
        tracing::debug!("Skipping MIC channel for chunk {} - silent", chunk_meta.index);
    }

    // Transcribe sys channel with optional diarization (skip if silent)
    if !sys_samples.is_empty() && !sys_is_silent {
        let sys_16k = if source_sample_rate != TRANSCRIPTION_SAMPLE_RATE {
            resample(sys_samples, source_sample_rate, TRANSCRIPTION_SAMPLE_RATE)
                .unwrap_or_else(|_| sys_samples.to_vec())
        } else {
            sys_samples.to_vec()
        };

        // First transcribe
        if let Ok(segments) = transcribe_samples_sync(
            &sys_16k,
            &config.model_id,
            &config.language,
            config.hybrid_enabled,
            &config.hybrid_secondary_model_id,
            &config.hotwords,
        ) {
            // If diarization enabled, apply speaker labels
            if let Some(diarizer) = diarizer.filter(|_| {
                config.diarization_enabled && config.diarization_provider == "coreml"
            }) {
                // Run diarization on sys channel through the shared instance
                // (spec.md §4.7) and reconcile identity across chunks /
                // attach voiceprints (spec.md §4.8) before labelling.
                let mut attempt = diarizer.diarize_with_centroids(&sys_16k, TRANSCRIPTION_SAMPLE_RATE);
                // spec.md §8 S4: a `Busy` refusal is retried once after
                // 250ms before giving up (the other chunk's in-flight call
                // is expected to be done well within that window).
                if matches!(attempt, Err(aiwisper_ml::DiarizationError::Busy)) {
                    tracing::debug!("Diarizer busy, retrying once after 250ms (spec.md §8 S4)");
                    std::thread::sleep(std::time::Duration::from_millis(250));
                    attempt = diarizer.diarize_with_centroids(&sys_16k, TRANSCRIPTION_SAMPLE_RATE);
                }

                match attempt {
                    Ok((speaker_segments, centroids)) if !speaker_segments.is_empty() => {
                        tracing::info!(
                            "Diarization found {} speaker segments in sys channel",
                            speaker_segments.len()
                        );
                        let resolved =
                            speaker_registry.resolve(session_id, &centroids, voiceprint_matcher);
                        // Apply speaker labels to transcription segments
                        for seg in segments {
                            let local_id = find_speaker_for_segment(
                                seg.start as f32 / 1000.0,  // convert ms to seconds
                                seg.end as f32 / 1000.0,
                                &speaker_segments,
                            );
                            let speaker = resolved
                                .get(&local_id)
                                .map(|r| r.display_name.clone())
                                .unwrap_or_else(|| format!("Собеседник {}", local_id + 1));
                            all_dialogue.push(DialogueEntry {
                                start: seg.start + chunk_meta.start_ms,
                                end: seg.end + chunk_meta.start_ms,
                                text: seg.text,
                                speaker,
                            });
                        }
                    }
                    Ok(_) => {
                        // No diarization segments, use default "sys"
                        tracing::debug!("No diarization segments found, using 'sys'");
                        for seg in segments {
                            all_dialogue.push(DialogueEntry {
                                start: seg.start + chunk_meta.start_ms,
                                end: seg.end + chunk_meta.start_ms,
                                text: seg.text,
                                speaker: "sys".to_string(),
                            });
                        }
                    }
                    Err(aiwisper_ml::DiarizationError::Busy) => {
                        // Still busy after the retry: skip diarization for
                        // this chunk entirely rather than mislabel it "sys"
                        // (spec.md §8 S4).
                        tracing::warn!("Diarizer still busy after retry, skipping diarization for this chunk");
                        for seg in segments {
                            all_dialogue.push(DialogueEntry {
                                start: seg.start + chunk_meta.start_ms,
                                end: seg.end + chunk_meta.start_ms,
                                text: seg.text,
                                speaker: "unknown-0".to_string(),
                            });
                        }
                    }
                    Err(e) => {
                        tracing::warn!("Diarization failed, falling back to 'sys': {}", e);
                        for seg in segments {
                            all_dialogue.push(DialogueEntry {
                                start: seg.start + chunk_meta.start_ms,
                                end: seg.end + chunk_meta.start_ms,
                                text: seg.text,
                                speaker: "sys".to_string(),
                            });
                        }
                    }
                }
            } else {
                // No diarization, use simple "sys" label
                for seg in segments {
                    all_dialogue.push(DialogueEntry {
                        start: seg.start + chunk_meta.start_ms,
                        end: seg.end + chunk_meta.start_ms,
                        text: seg.text,
                        speaker: "sys".to_string(),
                    });
                }
            }
        }
    }

    // Sort by timestamp
    all_dialogue.sort_by_key(|d| d.start);

    // Update chunk meta
    chunk_meta.transcription = all_dialogue
        .iter()
        .map(|d| d.text.as_str())
        .collect::<Vec<_>>()
        .join(" ");
    chunk_meta.dialogue = all_dialogue.clone();
    chunk_meta.status = "completed".to_string();

    tracing::info!(
        "Stereo chunk {} transcribed: {} segments total",
        chunk_meta.index,
        all_dialogue.len()
    );

    // Emit chunk_transcribed event
    let stereo_duration_ns = (chunk_meta.end_ms - chunk_meta.start_ms) as u64 * 1_000_000;
    let _ = app_handle.emit(
        "chunk_transcribed",
        serde_json::json!({
            "sessionId": session_id,
            "chunk": {
                "id": chunk_meta.id,
                "index": chunk_meta.index,
                "startMs": chunk_meta.start_ms,
                "endMs": chunk_meta.end_ms,
                "duration": stereo_duration_ns,
                "status": "completed",
                "transcription": chunk_meta.transcription,
                "dialogue": all_dialogue,
                "isStereo": true,
            }
        }),
    );

    chunk_meta
}

/// Synchronous transcription (called from recording thread)
///
/// Использует глобальный кэш движков для избежания многократной загрузки модели.
fn transcribe_samples_sync(
    samples: &[f32],
    model_id: &str,
    language: &str,
    hybrid_enabled: bool,
    hybrid_secondary_model_id: &str,
    hotwords: &[String],
) -> Result<Vec<aiwisper_types::TranscriptSegment>> {
    use aiwisper_ml::{
        get_or_create_engine_cached, transcribe_vad_compressed, HybridMode, HybridTranscriber,
        HybridTranscriptionConfig, VotingConfig,
    };

    // Get primary engine from cache (or create if first time)
    let primary_engine = get_or_create_engine_cached(model_id, language)?;

    // spec.md §4.4 "VAD-compressed transcription": run the engine(s) over
    // the speech-only portion of the chunk, then map timestamps back.
    transcribe_vad_compressed(samples, TRANSCRIPTION_SAMPLE_RATE, |compressed| {
        // If hybrid enabled, create secondary engine and use HybridTranscriber
        if hybrid_enabled && !hybrid_secondary_model_id.is_empty() {
            tracing::info!(
                "Using hybrid transcription: primary={}, secondary={}",
                model_id,
                hybrid_secondary_model_id
            );

            let secondary_engine =
                match get_or_create_engine_cached(hybrid_secondary_model_id, language) {
                    Ok(e) => Some(e),
                    Err(e) => {
                        tracing::warn!(
                            "Failed to create secondary engine: {}, using primary only",
                            e
                        );
                        None
                    }
                };

            let config = HybridTranscriptionConfig {
                enabled: true,
                secondary_model_id: hybrid_secondary_model_id.to_string(),
                confidence_threshold: 0.5,
                mode: HybridMode::Parallel,
                hotwords: hotwords.to_vec(),
                voting: VotingConfig::default(),
                use_llm_for_merge: false, // Not used in recording mode
                ollama_model: String::new(),
                ollama_url: "http://localhost:11434".to_string(),
            };

            let transcriber = HybridTranscriber::new(primary_engine.clone(), secondary_engine, config);
            let result = transcriber.transcribe(compressed)?;

            tracing::info!(
                "Hybrid transcription complete: {} segments, {} improvements",
                result.segments.len(),
                result.improvements.len()
            );

            Ok(result.segments)
        } else {
            // Single engine mode: route through the out-of-process worker
            // (spec.md §0) so a native decode crash can't take the recording
            // session down with it. Hybrid mode stays in-process above since
            // HybridTranscriber needs both engines' raw output for voting,
            // which the worker's single-result protocol doesn't carry.
            match transcribe_via_worker(compressed, model_id) {
                Ok(segments) => Ok(segments),
                Err(e) => {
                    tracing::warn!(
                        "Worker transcription failed ({}), falling back to in-process engine",
                        e
                    );
                    primary_engine.transcribe_with_segments(compressed)
                }
            }
        }
    })
}

/// Run one transcription request through the isolated worker subprocess
/// (spec.md §0). Falls back to the in-process engine at the call site on
/// any error, including the worker binary being missing in dev builds.
fn transcribe_via_worker(
    samples: &[f32],
    model_id: &str,
) -> Result<Vec<aiwisper_types::TranscriptSegment>> {
    use aiwisper_types::{WorkerCommand, WorkerResponse};

    let mut manager = crate::workers::worker_manager().lock();
    let response: WorkerResponse = manager.send_command(&WorkerCommand::Transcribe {
        samples: samples.to_vec(),
        engine: model_id.to_string(),
    })?;

    match response {
        WorkerResponse::Transcription(result) => Ok(result.segments),
        WorkerResponse::Error { message } => Err(anyhow::anyhow!("worker error: {}", message)),
        other => Err(anyhow::anyhow!("unexpected worker response: {:?}", other)),
    }
}

/// Find the speaker ID for a given time range based on diarization segments
pub(crate) fn find_speaker_for_segment(
    start_sec: f32,
    end_sec: f32,
    speaker_segments: &[aiwisper_types::SpeakerSegment],
) -> i32 {
    let mid_point = (start_sec + end_sec) / 2.0;
    
    // Find segment that contains the midpoint
    for seg in speaker_segments {
        if seg.start <= mid_point && mid_point <= seg.end {
            return seg.speaker;
        }
    }
    
    // Fallback: find closest segment
    let mut closest_speaker = 0;
    let mut min_distance = f32::MAX;
    
    for seg in speaker_segments {
        let seg_mid = (seg.start + seg.end) / 2.0;
        let distance = (mid_point - seg_mid).abs();
        if distance < min_distance {
            min_distance = distance;
            closest_speaker = seg.speaker;
        }
    }
    
    closest_speaker
}
