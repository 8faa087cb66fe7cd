//! Capture & mixer (spec.md §4.1).
//!
//! Wraps the microphone capture ([`crate::capture::AudioCapture`]) and the
//! platform system-audio tap ([`crate::system_audio`]) behind one
//! `start`/`stop`/`level`/`set_channel_mute`/`poll` surface, resampling both
//! channels to 16 kHz mono and mixing them for the chunker.
//!
//! `poll()` is driven by an external tick (the orchestrator's capture
//! thread), the same single-dedicated-task shape used for the streaming
//! preview path, rather than a private background thread — `AudioCapture`'s
//! `cpal::Stream` already runs its own callback thread, so the mixer only
//! needs to periodically drain what's accumulated.

use crate::capture::AudioCapture;
use crate::resampling::resample;
use crate::system_audio::{
    create_capture, AudioChannel, ChannelData, SystemAudioCapture, SystemCaptureConfig,
};
use std::time::{Duration, Instant};

/// Configuration for a capture session (spec.md §4.1 `start(config)`).
#[derive(Debug, Clone, Default)]
pub struct CaptureConfig {
    pub mic_device: Option<String>,
    pub capture_system: bool,
    pub voice_isolation: bool,
    pub echo_cancel: f32,
}

#[derive(Debug, thiserror::Error)]
pub enum MixerError {
    #[error("capture unavailable: {0}")]
    CaptureUnavailable(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
}

const STARTUP_TIMEOUT: Duration = Duration::from_secs(2);
const STOP_GRACE: Duration = Duration::from_secs(5);
const LEVEL_WINDOW_MS: u64 = 80;

/// One tick's worth of mixed audio, all channels at 16 kHz mono.
#[derive(Debug, Clone, Default)]
pub struct MixedFrame {
    pub mic: Vec<f32>,
    pub sys: Vec<f32>,
    pub mixed: Vec<f32>,
}

pub struct Mixer {
    config: CaptureConfig,
    mic: Option<AudioCapture>,
    sys: Option<Box<dyn SystemAudioCapture>>,
    sys_sample_rate: u32,
    /// Output channel count on the system-audio source, for the >2-channel
    /// gain compensation rule (spec.md §4.1).
    sys_channels_hint: usize,

    mic_cursor: usize,
    mic_muted: bool,
    sys_muted: bool,
    mic_level: f32,
    sys_level: f32,
}

impl Mixer {
    pub fn new() -> Self {
        Self {
            config: CaptureConfig::default(),
            mic: None,
            sys: None,
            sys_sample_rate: 24000,
            sys_channels_hint: 2,
            mic_cursor: 0,
            mic_muted: false,
            sys_muted: false,
            mic_level: 0.0,
            sys_level: 0.0,
        }
    }

    /// Begin capture. Returns once the first mic frame arrives or the 2s
    /// startup timeout elapses (spec.md §4.1) — the timeout itself is not a
    /// failure, only a helper that never reaches READY is.
    pub fn start(&mut self, config: CaptureConfig) -> Result<(), MixerError> {
        let mut mic = AudioCapture::new(config.mic_device.as_deref())
            .map_err(|e| MixerError::CaptureUnavailable(e.to_string()))?;
        mic.start()
            .map_err(|e| MixerError::CaptureUnavailable(e.to_string()))?;

        let deadline = Instant::now() + STARTUP_TIMEOUT;
        while mic.get_samples().is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        if mic.get_samples().is_empty() {
            tracing::warn!("Mixer: no mic frame within {:?}, continuing anyway", STARTUP_TIMEOUT);
        }

        let sys = if config.capture_system {
            let sys_config = SystemCaptureConfig {
                capture_microphone: config.voice_isolation,
                ..SystemCaptureConfig::default()
            };
            self.sys_sample_rate = sys_config.sample_rate;
            let mut capture = create_capture(sys_config).map_err(|e| {
                let msg = e.to_string();
                if msg.to_lowercase().contains("permission") {
                    MixerError::PermissionDenied(msg)
                } else {
                    MixerError::CaptureUnavailable(msg)
                }
            })?;
            capture
                .start()
                .map_err(|e| MixerError::CaptureUnavailable(e.to_string()))?;
            Some(capture)
        } else {
            None
        };

        self.config = config;
        self.mic_cursor = 0;
        self.mic_muted = false;
        self.sys_muted = false;
        self.mic_level = 0.0;
        self.sys_level = 0.0;
        self.mic = Some(mic);
        self.sys = sys;
        Ok(())
    }

    /// Graceful shutdown: drain pending frames, then stop both captures.
    /// `stop()` on the underlying captures is synchronous in this
    /// in-process implementation, so the 5s grace window only bounds how
    /// long we wait for a final drain before giving up on it.
    pub fn stop(&mut self) -> MixedFrame {
        let deadline = Instant::now() + STOP_GRACE;
        let mut last = self.poll().unwrap_or_default();
        while Instant::now() < deadline {
            match self.poll() {
                Some(frame) if !frame.mic.is_empty() || !frame.sys.is_empty() => {
                    last.mic.extend(frame.mic);
                    last.sys.extend(frame.sys);
                    last.mixed.extend(frame.mixed);
                }
                _ => break,
            }
        }

        if let Some(mut mic) = self.mic.take() {
            mic.stop();
        }
        if let Some(mut sys) = self.sys.take() {
            let _ = sys.stop();
        }
        last
    }

    /// Rolling ~80ms RMS per channel for the level meter.
    pub fn level(&self) -> (f32, f32) {
        (self.mic_level, self.sys_level)
    }

    /// Gate a channel after metering: a muted channel still advances the
    /// timeline with correctly-sized zero frames (spec.md §4.1).
    pub fn set_channel_mute(&mut self, channel: AudioChannel, muted: bool) {
        match channel {
            AudioChannel::Microphone => self.mic_muted = muted,
            AudioChannel::System => self.sys_muted = muted,
        }
    }

    /// Drain whatever has accumulated since the last poll, resample both
    /// channels to 16 kHz mono, update the level meters, and mix.
    pub fn poll(&mut self) -> Option<MixedFrame> {
        let mic_16k = self.drain_mic()?;
        let sys_16k = self.drain_sys();

        if mic_16k.is_empty() && sys_16k.is_empty() {
            return None;
        }

        self.mic_level = windowed_rms(&mic_16k, 16000, LEVEL_WINDOW_MS);
        self.sys_level = windowed_rms(&sys_16k, 16000, LEVEL_WINDOW_MS);

        let mic_out = if self.mic_muted {
            vec![0.0; mic_16k.len()]
        } else {
            mic_16k
        };
        let sys_out = if self.sys_muted {
            vec![0.0; sys_16k.len()]
        } else {
            sys_16k
        };

        let mixed = mix(&mic_out, &sys_out);

        Some(MixedFrame {
            mic: mic_out,
            sys: sys_out,
            mixed,
        })
    }

    fn drain_mic(&mut self) -> Option<Vec<f32>> {
        let mic = self.mic.as_ref()?;
        let all = mic.get_samples();
        if self.mic_cursor > all.len() {
            self.mic_cursor = 0;
        }
        let delta = &all[self.mic_cursor..];
        if delta.is_empty() {
            self.mic_cursor = all.len();
            return Some(Vec::new());
        }
        let source_rate = mic.sample_rate();
        let resampled = resample(delta, source_rate, 16000).unwrap_or_default();
        self.mic_cursor = all.len();
        Some(resampled)
    }

    fn drain_sys(&mut self) -> Vec<f32> {
        let Some(sys) = self.sys.as_ref() else {
            return Vec::new();
        };

        let mut raw = Vec::new();
        while let Ok(ChannelData { samples, .. }) = sys.get_receiver().try_recv() {
            raw.extend(samples);
        }
        if raw.is_empty() {
            return Vec::new();
        }

        let mut resampled = resample(&raw, self.sys_sample_rate, 16000).unwrap_or_default();

        // Gain compensation when the source exposes more than stereo
        // output (spec.md §4.1: multiply by max(1, n_channels - 1)).
        let gain = (self.sys_channels_hint.max(1) - 1).max(1) as f32;
        if gain != 1.0 {
            for s in resampled.iter_mut() {
                *s *= gain;
            }
        }
        resampled
    }
}

impl Default for Mixer {
    fn default() -> Self {
        Self::new()
    }
}

fn windowed_rms(samples: &[f32], sample_rate: u32, window_ms: u64) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let window_samples = ((sample_rate as u64 * window_ms / 1000).max(1) as usize).min(samples.len());
    let tail = &samples[samples.len() - window_samples..];
    let sum_sq: f32 = tail.iter().map(|s| s * s).sum();
    (sum_sq / tail.len() as f32).sqrt()
}

fn mix(mic: &[f32], sys: &[f32]) -> Vec<f32> {
    if sys.is_empty() {
        return mic.to_vec();
    }
    if mic.is_empty() {
        return sys.to_vec();
    }
    let len = mic.len().min(sys.len());
    (0..len).map(|i| (mic[i] + sys[i]) / 2.0).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mix_averages_both_channels() {
        let mic = vec![1.0, 1.0, 1.0];
        let sys = vec![0.0, 0.0, 0.0];
        assert_eq!(mix(&mic, &sys), vec![0.5, 0.5, 0.5]);
    }

    #[test]
    fn mix_falls_back_to_single_channel() {
        let mic = vec![1.0, 2.0];
        assert_eq!(mix(&mic, &[]), mic);
    }

    #[test]
    fn windowed_rms_of_silence_is_zero() {
        let silence = vec![0.0f32; 16000];
        assert_eq!(windowed_rms(&silence, 16000, 80), 0.0);
    }

    #[test]
    fn windowed_rms_only_considers_tail_window() {
        let mut samples = vec![0.5f32; 16000];
        samples.extend(vec![0.0f32; 16000 * 80 / 1000]);
        // last 80ms is silence, so RMS should reflect that, not the loud head
        assert!(windowed_rms(&samples, 16000, 80) < 0.01);
    }
}
