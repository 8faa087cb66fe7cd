//! Cross-chunk speaker identity reconciliation (spec.md §4.7's per-session
//! reconciliation, §4.8's voiceprint attach step).
//!
//! `BoundedDiarizer::diarize_with_centroids` only reconciles identity across
//! the windows of a single call; every new chunk starts its local speaker
//! numbering back at 0. This registry keeps a running set of centroids per
//! session so the same voice keeps the same label across chunks, and checks
//! each new voice against the global `VoicePrintMatcher` so a recognized
//! speaker picks up their stored name instead of a generic placeholder.

use aiwisper_ml::voiceprint::{cosine_similarity, MatchConfidence, VoicePrintMatcher};
use parking_lot::Mutex;
use std::collections::HashMap;

/// Same threshold `BoundedDiarizer` uses for its own window-to-window
/// reconciliation (spec.md §4.7).
const IDENTITY_THRESHOLD: f32 = 0.70;

struct SessionSpeaker {
    centroid: Vec<f32>,
    display_name: String,
    voiceprint_id: Option<String>,
}

#[derive(Default)]
struct SessionTrack {
    speakers: Vec<SessionSpeaker>,
}

/// The stable identity to attach to a chunk's diarized segments.
#[derive(Debug, Clone)]
pub struct ResolvedSpeaker {
    pub display_name: String,
    pub voiceprint_id: Option<String>,
}

/// Per-session running speaker identities, shared across every chunk
/// pipeline worker for the process lifetime. One instance lives in
/// `AppState` and outlives any single recording.
#[derive(Default)]
pub struct SpeakerRegistry {
    sessions: Mutex<HashMap<String, SessionTrack>>,
}

impl SpeakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve each chunk-local diarizer id (keyed by the global id
    /// `diarize_with_centroids` assigned within that one call) to a
    /// session-stable identity. A new voice is matched against `matcher`;
    /// on a `high`-confidence hit it reuses the voiceprint's name and folds
    /// this observation into the stored embedding (spec.md §4.8, §8 S6).
    /// Otherwise it gets "Собеседник {n}" with `n` counting up within this
    /// session only.
    pub fn resolve(
        &self,
        session_id: &str,
        chunk_centroids: &HashMap<i32, Vec<f32>>,
        matcher: &VoicePrintMatcher,
    ) -> HashMap<i32, ResolvedSpeaker> {
        let mut sessions = self.sessions.lock();
        let track = sessions.entry(session_id.to_string()).or_default();

        let mut resolved = HashMap::with_capacity(chunk_centroids.len());
        for (&local_id, centroid) in chunk_centroids {
            let best = track
                .speakers
                .iter()
                .enumerate()
                .map(|(i, s)| (i, cosine_similarity(centroid, &s.centroid)))
                .fold(None, |acc: Option<(usize, f32)>, (i, sim)| match acc {
                    Some((_, best_sim)) if best_sim >= sim => acc,
                    _ => Some((i, sim)),
                });

            let idx = match best {
                Some((i, sim)) if sim >= IDENTITY_THRESHOLD => {
                    // Keep tracking this session's speaker by their latest
                    // observed centroid rather than the very first one.
                    track.speakers[i].centroid = centroid.clone();
                    i
                }
                _ => {
                    let (display_name, voiceprint_id) = match matcher.match_with_auto_update(centroid)
                    {
                        Some(m) if m.confidence == MatchConfidence::High => {
                            (m.voiceprint.name.clone(), Some(m.voiceprint.id.clone()))
                        }
                        _ => (format!("Собеседник {}", track.speakers.len() + 1), None),
                    };
                    track.speakers.push(SessionSpeaker {
                        centroid: centroid.clone(),
                        display_name,
                        voiceprint_id,
                    });
                    track.speakers.len() - 1
                }
            };

            let speaker = &track.speakers[idx];
            resolved.insert(
                local_id,
                ResolvedSpeaker {
                    display_name: speaker.display_name.clone(),
                    voiceprint_id: speaker.voiceprint_id.clone(),
                },
            );
        }

        resolved
    }

    /// Drop a session's speaker tracking once it's fully torn down.
    pub fn forget_session(&self, session_id: &str) {
        self.sessions.lock().remove(session_id);
    }

    /// Rename a session's speaker so future chunks resolved from the same
    /// centroid keep using the merged label (`merge_session_speakers`
    /// command). A session with no tracked speakers yet (already stopped,
    /// or never diarized) is a no-op — the merge still applies to the
    /// persisted dialogue, which is where the command's real effect lives.
    pub fn rename_speaker(&self, session_id: &str, from_name: &str, to_name: &str) {
        if let Some(track) = self.sessions.lock().get_mut(session_id) {
            for speaker in track.speakers.iter_mut() {
                if speaker.display_name == from_name {
                    speaker.display_name = to_name.to_string();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_centroid_reuses_label_across_calls() {
        let registry = SpeakerRegistry::new();
        let dir = tempfile::tempdir().unwrap();
        let matcher = VoicePrintMatcher::new(dir.path().to_path_buf()).unwrap();

        let mut chunk1 = HashMap::new();
        chunk1.insert(0, vec![1.0, 0.0, 0.0]);
        let r1 = registry.resolve("s1", &chunk1, &matcher);
        let name1 = r1[&0].display_name.clone();

        let mut chunk2 = HashMap::new();
        chunk2.insert(0, vec![0.99, 0.01, 0.0]);
        let r2 = registry.resolve("s1", &chunk2, &matcher);
        assert_eq!(r2[&0].display_name, name1);
    }

    #[test]
    fn distinct_centroids_get_distinct_labels() {
        let registry = SpeakerRegistry::new();
        let dir = tempfile::tempdir().unwrap();
        let matcher = VoicePrintMatcher::new(dir.path().to_path_buf()).unwrap();

        let mut chunk = HashMap::new();
        chunk.insert(0, vec![1.0, 0.0, 0.0]);
        chunk.insert(1, vec![0.0, 1.0, 0.0]);
        let resolved = registry.resolve("s1", &chunk, &matcher);
        assert_ne!(resolved[&0].display_name, resolved[&1].display_name);
    }

    #[test]
    fn sessions_are_isolated() {
        let registry = SpeakerRegistry::new();
        let dir = tempfile::tempdir().unwrap();
        let matcher = VoicePrintMatcher::new(dir.path().to_path_buf()).unwrap();

        let mut chunk = HashMap::new();
        chunk.insert(0, vec![1.0, 0.0, 0.0]);
        let r1 = registry.resolve("s1", &chunk, &matcher);
        let r2 = registry.resolve("s2", &chunk, &matcher);
        assert_eq!(r1[&0].display_name, "Собеседник 1");
        assert_eq!(r2[&0].display_name, "Собеседник 1");

        registry.forget_session("s1");
        let mut chunk2 = HashMap::new();
        chunk2.insert(0, vec![0.0, 1.0, 0.0]);
        let r3 = registry.resolve("s1", &chunk2, &matcher);
        assert_eq!(r3[&0].display_name, "Собеседник 1");
    }
}
