//! Streaming (preview) transcriber (spec.md §4.5).
//!
//! Runs only while a chunk is open: re-transcribes a rolling window of the
//! most recent mic samples every `stride`, emitting `Volatile` text that may
//! still change and `Confirmed` text once the shared prefix has been stable
//! across `confirmation_ticks` consecutive updates at or above
//! `confirmation_threshold` confidence.

use crate::traits::TranscriptionEngine;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// One tick's worth of decoding result.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamingUpdate {
    /// The tail text, which may still change on the next tick.
    Volatile { text: String, confidence: f32 },
    /// The prefix that has stabilized and crossed the confidence threshold.
    Confirmed { text: String },
}

#[derive(Debug, Clone)]
pub struct StreamingConfig {
    /// Rolling buffer length, 1-30s (spec.md §6).
    pub chunk_seconds: u32,
    pub stride: Duration,
    /// 0.5-1.0 (spec.md §6).
    pub confirmation_threshold: f32,
    /// Consecutive stable ticks required before confirming a prefix.
    pub confirmation_ticks: u32,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            chunk_seconds: 10,
            stride: Duration::from_millis(500),
            confirmation_threshold: 0.8,
            confirmation_ticks: 2,
        }
    }
}

/// Rolling buffer + stability tracker. Single-flight: a tick is dropped if
/// the previous decode hasn't returned (modeled here with `in_flight`, which
/// callers must check/set since the actual decode runs off-thread).
pub struct StreamingTranscriber {
    config: StreamingConfig,
    sample_rate: u32,
    buffer: Vec<f32>,
    in_flight: AtomicBool,
    last_text: String,
    stable_ticks: u32,
    confirmed_len_chars: usize,
}

impl StreamingTranscriber {
    pub fn new(config: StreamingConfig, sample_rate: u32) -> Self {
        Self {
            config,
            sample_rate,
            buffer: Vec::new(),
            in_flight: AtomicBool::new(false),
            last_text: String::new(),
            stable_ticks: 0,
            confirmed_len_chars: 0,
        }
    }

    /// Append newly captured mic samples, trimming to the rolling window.
    pub fn push_samples(&mut self, samples: &[f32]) {
        self.buffer.extend_from_slice(samples);
        let max_len = self.config.chunk_seconds as usize * self.sample_rate as usize;
        if self.buffer.len() > max_len {
            let drop = self.buffer.len() - max_len;
            self.buffer.drain(0..drop);
        }
    }

    /// Try to start a tick. Returns `None` if the previous tick is still
    /// in flight (the tick is dropped per spec.md §4.5 concurrency rule).
    pub fn try_begin_tick(&self) -> Option<StreamingTickGuard<'_>> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            Some(StreamingTickGuard { owner: self })
        } else {
            None
        }
    }

    pub fn buffer_snapshot(&self) -> Vec<f32> {
        self.buffer.clone()
    }

    /// Feed one tick's engine output and produce the update(s) to emit.
    /// `engine` runs a lightweight decode (caller selects fast settings).
    pub fn process_tick(&mut self, engine: &dyn TranscriptionEngine) -> Option<StreamingUpdate> {
        if self.buffer.is_empty() {
            return None;
        }

        let result = engine.transcribe(&self.buffer).ok()?;
        let text = result.text.trim().to_string();
        let confidence = if result.segments.is_empty() {
            0.0
        } else {
            result.segments.iter().map(|s| s.confidence).sum::<f32>() / result.segments.len() as f32
        };

        if text == self.last_text {
            self.stable_ticks += 1;
        } else {
            self.stable_ticks = 0;
            self.last_text = text.clone();
        }

        if self.stable_ticks + 1 >= self.config.confirmation_ticks
            && confidence >= self.config.confirmation_threshold
        {
            if text.len() > self.confirmed_len_chars {
                let confirmed_tail = text[self.confirmed_len_chars..].to_string();
                self.confirmed_len_chars = text.len();
                if !confirmed_tail.trim().is_empty() {
                    return Some(StreamingUpdate::Confirmed {
                        text: confirmed_tail,
                    });
                }
            }
        }

        Some(StreamingUpdate::Volatile { text, confidence })
    }

    /// Reset state when the chunk closes; the closed-chunk pipeline takes
    /// over with higher-quality settings.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.last_text.clear();
        self.stable_ticks = 0;
        self.confirmed_len_chars = 0;
    }
}

/// RAII guard releasing the single-flight lock when the tick finishes, even
/// on early return or panic.
pub struct StreamingTickGuard<'a> {
    owner: &'a StreamingTranscriber,
}

impl Drop for StreamingTickGuard<'_> {
    fn drop(&mut self) {
        self.owner.in_flight.store(false, Ordering::Release);
    }
}

#[allow(dead_code)]
fn _assert_send_sync()
where
    StreamingTranscriber: Send,
{
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiwisper_types::{TranscriptSegment, TranscriptionResult};
    use anyhow::Result;

    struct StubEngine {
        text: String,
        confidence: f32,
    }

    impl TranscriptionEngine for StubEngine {
        fn name(&self) -> &str {
            "stub"
        }
        fn transcribe(&self, _samples: &[f32]) -> Result<TranscriptionResult> {
            Ok(TranscriptionResult {
                text: self.text.clone(),
                segments: vec![TranscriptSegment {
                    start: 0,
                    end: 1000,
                    text: self.text.clone(),
                    speaker: None,
                    words: vec![],
                    confidence: self.confidence,
                }],
                language: None,
                processing_time_ms: 0,
                rtf: 0.0,
            })
        }
        fn transcribe_with_segments(&self, samples: &[f32]) -> Result<Vec<TranscriptSegment>> {
            Ok(self.transcribe(samples)?.segments)
        }
        fn supported_languages(&self) -> &[&str] {
            &["en"]
        }
        fn set_language(&mut self, _language: &str) -> Result<()> {
            Ok(())
        }
        fn set_hotwords(&mut self, _hotwords: &[String]) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn single_flight_drops_overlapping_tick() {
        let st = StreamingTranscriber::new(StreamingConfig::default(), 16000);
        let guard1 = st.try_begin_tick();
        assert!(guard1.is_some());
        let guard2 = st.try_begin_tick();
        assert!(guard2.is_none(), "second tick must be dropped while first in flight");
        drop(guard1);
        assert!(st.try_begin_tick().is_some());
    }

    #[test]
    fn confirms_after_stable_high_confidence_ticks() {
        let mut st = StreamingTranscriber::new(
            StreamingConfig {
                confirmation_ticks: 2,
                confirmation_threshold: 0.8,
                ..Default::default()
            },
            16000,
        );
        st.push_samples(&vec![0.1f32; 16000]);
        let engine = StubEngine {
            text: "hello".into(),
            confidence: 0.9,
        };

        let first = st.process_tick(&engine).unwrap();
        assert!(matches!(first, StreamingUpdate::Volatile { .. }));

        let second = st.process_tick(&engine).unwrap();
        assert!(matches!(second, StreamingUpdate::Confirmed { .. }));
    }

    #[test]
    fn low_confidence_never_confirms() {
        let mut st = StreamingTranscriber::new(
            StreamingConfig {
                confirmation_ticks: 1,
                confirmation_threshold: 0.8,
                ..Default::default()
            },
            16000,
        );
        st.push_samples(&vec![0.1f32; 16000]);
        let engine = StubEngine {
            text: "hello".into(),
            confidence: 0.5,
        };
        for _ in 0..5 {
            let update = st.process_tick(&engine).unwrap();
            assert!(matches!(update, StreamingUpdate::Volatile { .. }));
        }
    }

    #[test]
    fn rolling_buffer_respects_window() {
        let mut st = StreamingTranscriber::new(
            StreamingConfig {
                chunk_seconds: 1,
                ..Default::default()
            },
            16000,
        );
        st.push_samples(&vec![0.0f32; 16000 * 3]);
        assert_eq!(st.buffer_snapshot().len(), 16000);
    }
}
