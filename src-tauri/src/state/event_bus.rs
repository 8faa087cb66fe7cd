//! Centralized event bus (spec.md §5 ordering guarantees, §6 event stream).
//!
//! The teacher emits ad hoc `tauri::AppHandle::emit` calls from inside each
//! command handler (see `commands/session.rs::generate_summary`). This
//! module centralizes every emission through one `tokio::sync::broadcast`
//! channel, forwarded to `AppHandle::emit` at the edge by a single
//! dedicated task, so the per-session/per-chunk ordering guarantees are
//! checked in one place instead of at every call site.

use aiwisper_types::Event;
use std::collections::HashMap;
use std::sync::Arc;
use tauri::Emitter;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkPhase {
    Created,
    Transcribing,
    Done,
}

#[derive(Default)]
struct SessionTrack {
    last_created_index: Option<u32>,
    chunk_phase: HashMap<u32, ChunkPhase>,
}

/// Default channel capacity. A slow frontend can lag behind at most this
/// many events before a `Lagged` gap is reported; high because `audio_level`
/// ticks frequently relative to chunk lifecycle events.
const DEFAULT_CAPACITY: usize = 1024;

pub struct EventBus {
    tx: broadcast::Sender<Event>,
    sessions: parking_lot::Mutex<HashMap<String, SessionTrack>>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(DEFAULT_CAPACITY);
        Self {
            tx,
            sessions: parking_lot::Mutex::new(HashMap::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Publish an event. Ordering violations (spec.md §5) are logged, not
    /// rejected — the bus is a safety net over the orchestrator's own
    /// sequencing, not a second source of truth.
    pub fn publish(&self, event: Event) {
        self.check_ordering(&event);
        // A send error only means there are currently no subscribers; the
        // event is simply dropped, same as any other pub/sub bus.
        let _ = self.tx.send(event);
    }

    /// Returns `false` (after logging) when `event` violates the spec.md §5
    /// ordering guarantees for its session/chunk.
    fn check_ordering(&self, event: &Event) -> bool {
        match event {
            Event::ChunkCreated {
                session_id,
                chunk_index,
                ..
            } => {
                let mut sessions = self.sessions.lock();
                let track = sessions.entry(session_id.clone()).or_default();
                let ok = match track.last_created_index {
                    Some(last) => *chunk_index > last,
                    None => true,
                };
                if !ok {
                    tracing::warn!(
                        "EventBus: chunk_created({}) out of order for session {} (last={:?})",
                        chunk_index,
                        session_id,
                        track.last_created_index
                    );
                }
                track.last_created_index = Some(*chunk_index);
                track.chunk_phase.insert(*chunk_index, ChunkPhase::Created);
                ok
            }
            Event::ChunkTranscribing {
                session_id,
                chunk_index,
            } => self.transition(session_id, *chunk_index, ChunkPhase::Created, ChunkPhase::Transcribing),
            Event::ChunkTranscribed {
                session_id,
                chunk_index,
                ..
            } => self.transition(session_id, *chunk_index, ChunkPhase::Transcribing, ChunkPhase::Done),
            Event::ChunkError {
                session_id,
                chunk_index,
                ..
            } => self.transition(session_id, *chunk_index, ChunkPhase::Transcribing, ChunkPhase::Done),
            _ => true,
        }
    }

    fn transition(&self, session_id: &str, chunk_index: u32, expected: ChunkPhase, next: ChunkPhase) -> bool {
        let mut sessions = self.sessions.lock();
        let track = sessions.entry(session_id.to_string()).or_default();
        let current = track.chunk_phase.get(&chunk_index).copied();
        let ok = current == Some(expected);
        if !ok {
            tracing::warn!(
                "EventBus: chunk {} in session {} expected phase {:?}, was {:?}",
                chunk_index,
                session_id,
                expected,
                current
            );
        }
        track.chunk_phase.insert(chunk_index, next);
        ok
    }

    /// Drop tracking state for a session once it's fully torn down.
    pub fn forget_session(&self, session_id: &str) {
        self.sessions.lock().remove(session_id);
    }

    /// Spawn the single dedicated task that forwards every published event
    /// to the Tauri frontend via `AppHandle::emit`, using the tagged
    /// `{event, data}` shape already encoded by `Event`'s serde
    /// representation to pick the JS-side event name.
    pub fn forward_to(self: Arc<Self>, app: tauri::AppHandle) -> tokio::task::JoinHandle<()> {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => match split_event(&event) {
                        Ok((name, data)) => {
                            let _ = app.emit(&name, data);
                        }
                        Err(e) => tracing::error!("EventBus: failed to serialize event: {}", e),
                    },
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!("EventBus: frontend forwarder lagged, skipped {} events", skipped);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Splits `Event`'s `{"event": "...", "data": {...}}` serde representation
/// into the `(name, payload)` pair `AppHandle::emit` expects.
fn split_event(event: &Event) -> anyhow::Result<(String, serde_json::Value)> {
    let value = serde_json::to_value(event)?;
    let name = value
        .get("event")
        .and_then(|n| n.as_str())
        .unwrap_or("event")
        .to_string();
    let data = value.get("data").cloned().unwrap_or(serde_json::Value::Null);
    Ok((name, data))
}

#[cfg(test)]
mod tests {
    use super::*;
    use aiwisper_types::ErrorKind;

    #[test]
    fn split_event_extracts_name_and_payload() {
        let event = Event::ChunkCreated {
            session_id: "s1".into(),
            chunk_index: 0,
            start_ms: 0,
            end_ms: 1000,
        };
        let (name, data) = split_event(&event).unwrap();
        assert_eq!(name, "chunk_created");
        assert_eq!(data["session_id"], "s1");
    }

    #[test]
    fn chunk_created_must_be_strictly_increasing() {
        let bus = EventBus::new();
        assert!(bus.check_ordering(&Event::ChunkCreated {
            session_id: "s1".into(),
            chunk_index: 0,
            start_ms: 0,
            end_ms: 1000,
        }));
        assert!(bus.check_ordering(&Event::ChunkCreated {
            session_id: "s1".into(),
            chunk_index: 1,
            start_ms: 1000,
            end_ms: 2000,
        }));
        // repeating index 1 violates strict ordering
        assert!(!bus.check_ordering(&Event::ChunkCreated {
            session_id: "s1".into(),
            chunk_index: 1,
            start_ms: 1000,
            end_ms: 2000,
        }));
    }

    #[test]
    fn chunk_lifecycle_must_progress_in_order() {
        let bus = EventBus::new();
        let created = Event::ChunkCreated {
            session_id: "s1".into(),
            chunk_index: 0,
            start_ms: 0,
            end_ms: 1000,
        };
        assert!(bus.check_ordering(&created));

        // transcribed before transcribing is a violation
        let transcribed = Event::ChunkTranscribed {
            session_id: "s1".into(),
            chunk_index: 0,
            dialogue: vec![],
        };
        assert!(!bus.check_ordering(&transcribed));

        let transcribing = Event::ChunkTranscribing {
            session_id: "s1".into(),
            chunk_index: 0,
        };
        // phase is now Done (from the bad transition above) so this also
        // fails — demonstrates the tracker reflects true last-seen state.
        assert!(!bus.check_ordering(&transcribing));
    }

    #[test]
    fn error_event_passthrough_is_always_ok() {
        let bus = EventBus::new();
        assert!(bus.check_ordering(&Event::Error {
            kind: ErrorKind::EngineInternal,
            message: "boom".into(),
        }));
    }
}
