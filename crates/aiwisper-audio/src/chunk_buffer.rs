//! Chunk buffer with VAD for automatic audio segmentation
//!
//! Накапливает аудио и нарезает на chunk'и:
//! - В режиме VAD: ищет паузы в речи (1+ сек тишины)
//! - В режиме Off: фиксированные интервалы (30 сек)
//!
//! Frame-level hysteresis here produces `SpeechRegion`s (20ms frames,
//! open/close with a silence hangover) which drive [`crate::Chunker`] —
//! the VAD detector and the chunk-boundary decision are two separate
//! concerns (spec.md §4.2), kept in two types even though both live in
//! this crate so aiwisper-ml's richer neural VAD can later replace only
//! the frame classifier without touching boundary logic.

use crate::chunker::{Chunker, ChunkerConfig, ClosedChunk};
use aiwisper_types::SpeechRegion;
use std::sync::mpsc;
use std::time::{Duration, Instant};

/// VAD режим определения пауз
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VadMode {
    /// Автоматическое определение пауз (по RMS)
    #[default]
    Auto,
    /// Фиксированные интервалы (для системного звука)
    Off,
}

/// Конфигурация VAD
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Режим VAD
    pub mode: VadMode,
    /// Задержка перед началом нарезки (первые N сек не режем)
    pub chunking_start_delay: Duration,
    /// Минимальная длина chunk'а
    pub min_chunk_duration: Duration,
    /// Максимальная длина chunk'а (принудительный разрез)
    pub max_chunk_duration: Duration,
    /// Длительность тишины для разреза
    pub silence_duration: Duration,
    /// Порог тишины (RMS ниже этого = тишина)
    pub silence_threshold: f32,
    /// Минимальная длина региона речи (spec.md §4.2: слишком короткие
    /// регионы — шумовые всплески — отбрасываются детектором, а не
    /// доходят до чанкера).
    pub min_region_ms: i64,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            mode: VadMode::Auto,
            chunking_start_delay: Duration::from_secs(60), // 60 сек перед началом нарезки
            min_chunk_duration: Duration::from_secs(30),   // минимум 30 сек
            max_chunk_duration: Duration::from_secs(300),  // максимум 5 мин
            silence_duration: Duration::from_secs(1),      // 1 сек тишины
            silence_threshold: 0.02,                       // RMS порог
            min_region_ms: 250,
        }
    }
}

impl VadConfig {
    /// Конфигурация для фиксированных интервалов (системный звук)
    pub fn fixed_interval() -> Self {
        Self {
            mode: VadMode::Off,
            chunking_start_delay: Duration::from_secs(5), // ✅ Было 60, стало 5
            min_chunk_duration: Duration::from_secs(10),   // ✅ Было 30, стало 10
            max_chunk_duration: Duration::from_secs(15),   // ✅ Было 30, стало 15
            silence_duration: Duration::from_secs(1),
            silence_threshold: 0.02,
            min_region_ms: 0,
        }
    }
}

/// Событие готовности chunk'а
#[derive(Debug, Clone)]
pub struct ChunkEvent {
    /// Начало chunk'а в миллисекундах (от начала записи)
    pub start_ms: i64,
    /// Конец chunk'а в миллисекундах
    pub end_ms: i64,
    /// Длительность
    pub duration: Duration,
    /// Индекс chunk'а
    pub index: usize,
}

/// Буфер для VAD и нарезки на chunk'и
pub struct ChunkBuffer {
    config: VadConfig,
    sample_rate: u32,

    /// Накопленные семплы (микс для моно или mic для стерео)
    accumulated: Vec<f32>,

    /// Раздельные каналы (если есть)
    mic_accumulated: Vec<f32>,
    sys_accumulated: Vec<f32>,
    has_separate_channels: bool,

    /// Счётчики
    total_samples: i64,
    emitted_samples: i64,
    chunk_count: usize,

    /// Время начала записи
    start_time: Instant,

    /// Можно ли начинать нарезку
    chunking_enabled: bool,

    /// Region-snapping chunker (spec.md §4.2) driven by the hysteresis
    /// state below.
    chunker: Chunker,
    /// Позиция в `accumulated`, до которой уже прогнан frame-hysteresis.
    vad_processed_samples: i64,
    in_region: bool,
    region_start_ms: i64,
    region_end_ms: i64,
    silence_run_ms: i64,

    /// Канал для отправки событий
    output_tx: mpsc::Sender<ChunkEvent>,
    output_rx: mpsc::Receiver<ChunkEvent>,
}

impl ChunkBuffer {
    /// Создать новый буфер
    pub fn new(config: VadConfig, sample_rate: u32) -> Self {
        let (tx, rx) = mpsc::channel();

        // Буфер на 10 минут
        let capacity = sample_rate as usize * 600;
        let chunker_config = ChunkerConfig {
            target_chunk_ms: config.min_chunk_duration.as_millis() as i64,
            max_chunk_ms: config.max_chunk_duration.as_millis() as i64,
        };

        Self {
            config,
            sample_rate,
            accumulated: Vec::with_capacity(capacity),
            mic_accumulated: Vec::with_capacity(capacity),
            sys_accumulated: Vec::with_capacity(capacity),
            has_separate_channels: false,
            total_samples: 0,
            emitted_samples: 0,
            chunk_count: 0,
            start_time: Instant::now(),
            chunking_enabled: false,
            chunker: Chunker::new(chunker_config),
            vad_processed_samples: 0,
            in_region: false,
            region_start_ms: 0,
            region_end_ms: 0,
            silence_run_ms: 0,
            output_tx: tx,
            output_rx: rx,
        }
    }

    /// Обработать моно семплы
    pub fn process(&mut self, samples: &[f32]) {
        self.accumulated.extend_from_slice(samples);
        self.total_samples += samples.len() as i64;

        // Проверяем задержку начала нарезки
        if !self.chunking_enabled {
            if self.start_time.elapsed() >= self.config.chunking_start_delay {
                self.chunking_enabled = true;
                tracing::info!(
                    "ChunkBuffer: Chunking enabled after {:?}",
                    self.start_time.elapsed()
                );
            } else {
                return;
            }
        }

        self.feed_vad();
    }

    /// Обработать стерео семплы (раздельные каналы)
    pub fn process_stereo(&mut self, mic_samples: &[f32], sys_samples: &[f32]) {
        let min_len = mic_samples.len().min(sys_samples.len());
        if min_len == 0 {
            return;
        }

        self.has_separate_channels = true;

        // Накапливаем раздельные каналы
        self.mic_accumulated
            .extend_from_slice(&mic_samples[..min_len]);
        self.sys_accumulated
            .extend_from_slice(&sys_samples[..min_len]);

        // "Unified VAD" (spec.md §4.2): берём максимум модулей каналов, а не
        // среднее, иначе речь в одном канале при тишине в другом теряет
        // половину энергии и может не пересечь порог.
        let mut mix = vec![0.0f32; min_len];
        for i in 0..min_len {
            mix[i] = mic_samples[i].abs().max(sys_samples[i].abs());
        }

        self.process(&mix);
    }

    /// Прогнать 20ms-фреймовый hysteresis-детектор по новым семплам,
    /// закрывая `SpeechRegion`ы в `self.chunker` и выпуская готовые чанки.
    fn feed_vad(&mut self) {
        let frame_samples = ((self.sample_rate as f64 * 0.02) as usize).max(1);

        loop {
            let available = self.accumulated.len() as i64 - self.vad_processed_samples;
            if available < frame_samples as i64 {
                break;
            }

            let start = self.vad_processed_samples as usize;
            let end = start + frame_samples;
            let frame_start_ms = self.vad_processed_samples * 1000 / self.sample_rate as i64;
            let rms = calculate_rms(&self.accumulated[start..end]);
            self.vad_processed_samples = end as i64;
            let frame_end_ms = self.vad_processed_samples * 1000 / self.sample_rate as i64;

            let is_speech = match self.config.mode {
                VadMode::Off => true,
                VadMode::Auto => rms >= self.config.silence_threshold,
            };

            if is_speech {
                self.silence_run_ms = 0;
                if !self.in_region {
                    self.in_region = true;
                    self.region_start_ms = frame_start_ms;
                }
                self.region_end_ms = frame_end_ms;
                if matches!(self.config.mode, VadMode::Off) {
                    // No real silence to wait for; each frame closes its own
                    // micro-region so the chunker's target/max triggers still
                    // fire on a fixed cadence.
                    self.close_region();
                }
            } else if self.in_region {
                self.silence_run_ms += frame_end_ms - frame_start_ms;
                if self.silence_run_ms >= self.config.silence_duration.as_millis() as i64 {
                    self.close_region();
                }
            }

            if let Some(closed) = self.chunker.check_wall_clock(Some(frame_end_ms)) {
                self.emit_closed_chunk(closed);
            }
        }
    }

    /// Close the currently open speech region and hand it to the chunker.
    fn close_region(&mut self) {
        let region = SpeechRegion {
            start_ms: self.region_start_ms,
            end_ms: self.region_end_ms,
        };
        self.in_region = false;
        self.silence_run_ms = 0;

        if matches!(self.config.mode, VadMode::Auto) && region.duration_ms() < self.config.min_region_ms {
            // Noise blip, not a real speech region — discard it entirely
            // rather than handing it to the chunker.
            return;
        }

        let closed = self
            .chunker
            .on_region_closed(region, Some(&self.accumulated), self.sample_rate);
        for chunk in closed {
            self.emit_closed_chunk(chunk);
        }
    }

    fn emit_closed_chunk(&mut self, chunk: ClosedChunk) {
        let duration = Duration::from_millis((chunk.end_ms - chunk.start_ms).max(0) as u64);
        let event = ChunkEvent {
            start_ms: chunk.start_ms,
            end_ms: chunk.end_ms,
            duration,
            index: self.chunk_count,
        };

        tracing::info!(
            "ChunkBuffer: Emitting chunk {} ({} - {} ms, {:?}, {} regions)",
            self.chunk_count,
            chunk.start_ms,
            chunk.end_ms,
            duration,
            chunk.regions.len()
        );

        self.chunk_count += 1;
        self.emitted_samples = (chunk.end_ms * self.sample_rate as i64 / 1000).max(self.emitted_samples);

        let _ = self.output_tx.send(event);
    }

    /// Получить канал для получения событий
    pub fn events(&self) -> &mpsc::Receiver<ChunkEvent> {
        &self.output_rx
    }

    /// Попробовать получить событие (non-blocking)
    pub fn try_recv(&self) -> Option<ChunkEvent> {
        self.output_rx.try_recv().ok()
    }

    /// Flush всё оставшееся как закрытые чанки (spec.md §4.2 trigger 3:
    /// `stop()` flush). Закрывает текущий открытый регион (даже если он
    /// короче `min_region_ms` — на стопе хвост всё равно нужен) и сливает
    /// всё, что осталось накопленным в чанкере.
    pub fn flush_all(&mut self) -> Vec<ChunkEvent> {
        let mut events = Vec::new();

        if self.in_region {
            let region = SpeechRegion {
                start_ms: self.region_start_ms,
                end_ms: self.region_end_ms,
            };
            self.in_region = false;
            self.silence_run_ms = 0;
            for chunk in self
                .chunker
                .on_region_closed(region, Some(&self.accumulated), self.sample_rate)
            {
                events.push(chunk);
            }
        }

        if let Some(chunk) = self.chunker.flush() {
            events.push(chunk);
        }

        events
            .into_iter()
            .map(|chunk| {
                let duration = Duration::from_millis((chunk.end_ms - chunk.start_ms).max(0) as u64);
                let event = ChunkEvent {
                    start_ms: chunk.start_ms,
                    end_ms: chunk.end_ms,
                    duration,
                    index: self.chunk_count,
                };
                tracing::info!(
                    "ChunkBuffer: Flushing final chunk {} ({} - {} ms, {:?})",
                    self.chunk_count,
                    chunk.start_ms,
                    chunk.end_ms,
                    duration
                );
                self.chunk_count += 1;
                self.emitted_samples =
                    (chunk.end_ms * self.sample_rate as i64 / 1000).max(self.emitted_samples);
                event
            })
            .collect()
    }

    /// Получить количество выпущенных chunk'ов
    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    /// Получить аудио семплы для указанного диапазона времени
    /// Возвращает семплы из accumulated буфера
    pub fn get_samples_range(&self, start_ms: i64, end_ms: i64) -> Vec<f32> {
        let start_sample = (start_ms * self.sample_rate as i64 / 1000) as usize;
        let end_sample = (end_ms * self.sample_rate as i64 / 1000) as usize;

        let start = start_sample.min(self.accumulated.len());
        let end = end_sample.min(self.accumulated.len());

        if start >= end {
            return Vec::new();
        }

        self.accumulated[start..end].to_vec()
    }

    /// Получить все накопленные семплы (для финальной транскрипции)
    pub fn get_all_samples(&self) -> &[f32] {
        &self.accumulated
    }

    /// Получить sample rate
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Получить общую длительность в миллисекундах
    pub fn total_duration_ms(&self) -> i64 {
        self.total_samples * 1000 / self.sample_rate as i64
    }

    /// Проверить, есть ли раздельные каналы (стерео режим)
    pub fn has_separate_channels(&self) -> bool {
        self.has_separate_channels
    }

    /// Получить mic samples для указанного диапазона (только для стерео режима)
    pub fn get_mic_samples_range(&self, start_ms: i64, end_ms: i64) -> Vec<f32> {
        if !self.has_separate_channels {
            return Vec::new();
        }

        let start_sample = (start_ms * self.sample_rate as i64 / 1000) as usize;
        let end_sample = (end_ms * self.sample_rate as i64 / 1000) as usize;

        let start = start_sample.min(self.mic_accumulated.len());
        let end = end_sample.min(self.mic_accumulated.len());

        if start >= end {
            return Vec::new();
        }

        self.mic_accumulated[start..end].to_vec()
    }

    /// Получить sys samples для указанного диапазона (только для стерео режима)
    pub fn get_sys_samples_range(&self, start_ms: i64, end_ms: i64) -> Vec<f32> {
        if !self.has_separate_channels {
            return Vec::new();
        }

        let start_sample = (start_ms * self.sample_rate as i64 / 1000) as usize;
        let end_sample = (end_ms * self.sample_rate as i64 / 1000) as usize;

        let start = start_sample.min(self.sys_accumulated.len());
        let end = end_sample.min(self.sys_accumulated.len());

        if start >= end {
            return Vec::new();
        }

        self.sys_accumulated[start..end].to_vec()
    }

    /// Сбросить буфер
    pub fn clear(&mut self) {
        self.accumulated.clear();
        self.mic_accumulated.clear();
        self.sys_accumulated.clear();
        self.total_samples = 0;
        self.emitted_samples = 0;
        self.chunk_count = 0;
        self.chunking_enabled = false;
        self.start_time = Instant::now();

        let chunker_config = ChunkerConfig {
            target_chunk_ms: self.config.min_chunk_duration.as_millis() as i64,
            max_chunk_ms: self.config.max_chunk_duration.as_millis() as i64,
        };
        self.chunker = Chunker::new(chunker_config);
        self.vad_processed_samples = 0;
        self.in_region = false;
        self.region_start_ms = 0;
        self.region_end_ms = 0;
        self.silence_run_ms = 0;
    }

    /// Удалить обработанные семплы до указанной позиции
    ///
    /// Вызывается после успешной транскрипции чанка для освобождения памяти.
    /// Это критически важно для длительных записей, чтобы буферы не росли бесконечно.
    ///
    /// # Arguments
    /// * `up_to_ms` - Временная метка в миллисекундах до которой удалить семплы
    ///
    /// # Note
    /// После вызова все временные метки в буфере остаются корректными,
    /// так как мы обновляем внутренние счётчики.
    pub fn drain_processed_samples(&mut self, up_to_ms: i64) {
        // Конвертируем миллисекунды в количество семплов
        let drain_samples = (up_to_ms * self.sample_rate as i64 / 1000) as usize;

        // Проверяем что есть что удалять
        if drain_samples == 0 {
            return;
        }

        // Удаляем из основного буфера
        let actual_drain = drain_samples.min(self.accumulated.len());
        if actual_drain > 0 {
            self.accumulated.drain(0..actual_drain);
        }

        // Удаляем из раздельных каналов если есть
        if self.has_separate_channels {
            let mic_drain = drain_samples.min(self.mic_accumulated.len());
            if mic_drain > 0 {
                self.mic_accumulated.drain(0..mic_drain);
            }

            let sys_drain = drain_samples.min(self.sys_accumulated.len());
            if sys_drain > 0 {
                self.sys_accumulated.drain(0..sys_drain);
            }
        }

        // Корректируем счётчики
        // emitted_samples - это позиция в ОРИГИНАЛЬНОМ буфере откуда мы уже выпустили чанки
        // После drain нужно сдвинуть на количество удалённых семплов
        let drain_i64 = actual_drain as i64;
        self.emitted_samples = (self.emitted_samples - drain_i64).max(0);
        self.total_samples = (self.total_samples - drain_i64).max(0);
        self.vad_processed_samples = (self.vad_processed_samples - drain_i64).max(0);

        // The chunker and any in-flight region were fed ms values relative
        // to the buffer origin we're shifting here, so rebase them by the
        // same amount or the next region would appear to start far in the
        // chunker's past.
        let drain_ms = drain_i64 * 1000 / self.sample_rate as i64;
        self.region_start_ms -= drain_ms;
        self.region_end_ms -= drain_ms;
        self.chunker.rebase(drain_ms);

        tracing::info!(
            "ChunkBuffer: drained {} samples (up to {} ms), remaining accumulated={}, mic={}, sys={}",
            actual_drain,
            up_to_ms,
            self.accumulated.len(),
            self.mic_accumulated.len(),
            self.sys_accumulated.len()
        );
    }

    /// Получить текущий размер буферов в байтах (для мониторинга памяти)
    pub fn memory_usage_bytes(&self) -> usize {
        let f32_size = std::mem::size_of::<f32>();
        (self.accumulated.capacity() + 
         self.mic_accumulated.capacity() + 
         self.sys_accumulated.capacity()) * f32_size
    }
}

/// Вычислить RMS (Root Mean Square) для определения громкости
pub fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Default RMS threshold used when `threshold` is `None`, matching
/// [`VadConfig::default`]'s `silence_threshold`.
const DEFAULT_SILENCE_THRESHOLD: f32 = 0.02;

/// Whether a block of samples is effectively silent.
pub fn is_silent(samples: &[f32], threshold: Option<f32>) -> bool {
    calculate_rms(samples) < threshold.unwrap_or(DEFAULT_SILENCE_THRESHOLD)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_calculate_rms() {
        let silence = vec![0.0f32; 100];
        assert!(calculate_rms(&silence) < 0.001);

        let loud = vec![0.5f32; 100];
        assert!(calculate_rms(&loud) > 0.4);
    }

    #[test]
    fn test_chunk_buffer_flushes_open_speech_region_on_stop() {
        let config = VadConfig {
            chunking_start_delay: Duration::from_millis(0), // No delay for test
            min_chunk_duration: Duration::from_secs(100),
            max_chunk_duration: Duration::from_secs(200),
            ..Default::default()
        };

        let mut buffer = ChunkBuffer::new(config, 16000);

        // Too short to close on target/max, but a stop() flush should still
        // emit it as a partial tail chunk (spec.md §4.2 trigger 3).
        let speech = vec![0.5f32; 16000 * 2];
        buffer.process(&speech);
        assert_eq!(buffer.chunk_count(), 0);

        let flushed = buffer.flush_all();
        assert_eq!(flushed.len(), 1);
        assert_eq!(buffer.chunk_count(), 1);
    }

    #[test]
    fn test_chunk_buffer_silence_only_emits_nothing() {
        let config = VadConfig {
            chunking_start_delay: Duration::from_millis(0),
            min_chunk_duration: Duration::from_secs(1),
            max_chunk_duration: Duration::from_secs(2),
            ..Default::default()
        };

        let mut buffer = ChunkBuffer::new(config, 16000);

        // No speech ever crosses the silence threshold, so no region opens
        // and flush_all has nothing to emit.
        let silence = vec![0.0f32; 16000 * 3];
        buffer.process(&silence);
        assert_eq!(buffer.chunk_count(), 0);
        assert!(buffer.flush_all().is_empty());
    }

    #[test]
    fn test_chunk_buffer_fixed_interval_mode_emits_without_silence() {
        let config = VadConfig::fixed_interval();
        let sample_rate = 16000;
        let mut buffer = ChunkBuffer::new(config, sample_rate);

        // VadMode::Off treats every frame as speech, so a continuous tone
        // should close chunks on its own target/max cadence without ever
        // needing a flush.
        let tone = vec![0.3f32; sample_rate as usize * 12];
        buffer.process(&tone);

        assert!(buffer.chunk_count() >= 1);
    }
}
