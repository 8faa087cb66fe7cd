//! Shared types for AIWisper
//!
//! Data structures shared across the capture/transcription pipeline, the
//! session store and the RPC surface exposed to the GUI shell.

mod config;
mod device;
mod events;
mod session;
mod transcript;
mod voiceprint;
mod worker;

pub use config::*;
pub use device::*;
pub use events::*;
pub use session::*;
pub use transcript::*;
pub use voiceprint::*;
pub use worker::*;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_segment_well_formed() {
        let seg = TranscriptSegment {
            start: 0,
            end: 1000,
            text: "hi".into(),
            speaker: None,
            words: vec![TranscriptWord {
                start: 0,
                end: 500,
                text: "hi".into(),
                confidence: 0.9,
            }],
            confidence: 0.9,
        };
        assert!(seg.is_well_formed());
    }

    #[test]
    fn transcript_segment_rejects_inverted_word() {
        let seg = TranscriptSegment {
            start: 0,
            end: 1000,
            text: "hi".into(),
            speaker: None,
            words: vec![TranscriptWord {
                start: 500,
                end: 100,
                text: "hi".into(),
                confidence: 0.9,
            }],
            confidence: 0.9,
        };
        assert!(!seg.is_well_formed());
    }

    #[test]
    fn settings_clamp_ranges() {
        let s = Settings {
            echo_cancel: 5.0,
            pause_threshold_s: 10.0,
            streaming_chunk_seconds: 999,
            streaming_confirmation_threshold: 0.0,
            ..Settings::default()
        }
        .clamped();
        assert_eq!(s.echo_cancel, 1.0);
        assert_eq!(s.pause_threshold_s, 2.0);
        assert_eq!(s.streaming_chunk_seconds, 30);
        assert_eq!(s.streaming_confirmation_threshold, 0.5);
    }
}
