//! Session store (spec.md §4.3).
//!
//! Generalizes the teacher's ad hoc `meta.json` read-modify-write calls
//! (see `rename_session`/`update_session_tags`/`set_session_summary` in
//! `state/mod.rs`) into one atomic operation set covering create, chunk
//! append/update, dialogue replace, delete, load (with integrity-scan
//! rebuild), ordered listing and full-text search.
//!
//! Every mutation writes to a `.tmp` sibling and renames it over the target,
//! so a crash mid-write never leaves a half-written `meta.json` or chunk
//! file on disk.

use aiwisper_types::{
    Chunk, ChunkHeader, ChunkStatus, SessionMeta, SessionStatus, TranscriptSegment,
    SESSION_META_VERSION,
};
use anyhow::{anyhow, Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub struct SessionStore {
    data_dir: PathBuf,
}

/// One hit from [`SessionStore::search`].
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub session_id: String,
    pub chunk_index: u32,
    pub speaker: Option<String>,
    pub start_ms: i64,
    /// Matched text plus up to 40 characters of context on either side.
    pub snippet: String,
}

pub(crate) const SNIPPET_CONTEXT_CHARS: usize = 40;

impl SessionStore {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    fn sessions_root(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }

    fn session_dir(&self, session_id: &str) -> PathBuf {
        self.sessions_root().join(session_id)
    }

    fn meta_path(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("meta.json")
    }

    fn chunks_dir(&self, session_id: &str) -> PathBuf {
        self.session_dir(session_id).join("chunks")
    }

    fn chunk_path(&self, session_id: &str, index: u32) -> PathBuf {
        self.chunks_dir(session_id).join(format!("{:04}.json", index))
    }

    /// Create a new session directory and its initial `meta.json`.
    pub fn create_session(&self, title: impl Into<String>) -> Result<SessionMeta> {
        let id = uuid::Uuid::new_v4().to_string();
        let dir = self.session_dir(&id);
        fs::create_dir_all(dir.join("chunks")).context("creating session directory")?;

        let meta = SessionMeta::new(id.clone(), title.into());
        write_json_atomic(&self.meta_path(&id), &meta)?;
        tracing::info!("SessionStore: created session {}", id);
        Ok(meta)
    }

    /// Append a new chunk: write its full snapshot under `chunks/<NNNN>.json`
    /// and add its header to `meta.json`.
    pub fn append_chunk(&self, session_id: &str, chunk: &Chunk) -> Result<()> {
        fs::create_dir_all(self.chunks_dir(session_id))
            .context("ensuring chunks directory exists")?;
        write_json_atomic(&self.chunk_path(session_id, chunk.index), chunk)?;

        self.mutate_meta(session_id, |meta| {
            meta.chunks.retain(|c| c.index != chunk.index);
            meta.chunks.push(ChunkHeader::from(chunk));
            meta.chunks.sort_by_key(|c| c.index);
            Ok(())
        })
    }

    /// Update a chunk's transcript fields after STT/diarization completes.
    pub fn update_chunk_transcript(
        &self,
        session_id: &str,
        chunk_index: u32,
        mic_text: String,
        sys_text: String,
        dialogue: Vec<TranscriptSegment>,
        status: ChunkStatus,
        error: Option<String>,
    ) -> Result<()> {
        let path = self.chunk_path(session_id, chunk_index);
        let mut chunk = read_json::<Chunk>(&path)
            .with_context(|| format!("loading chunk {chunk_index} for session {session_id}"))?;
        chunk.mic_text = mic_text;
        chunk.sys_text = sys_text;
        chunk.dialogue = dialogue;
        chunk.status = status;
        chunk.error = error.clone();
        write_json_atomic(&path, &chunk)?;

        self.mutate_meta(session_id, |meta| {
            if let Some(header) = meta.chunks.iter_mut().find(|c| c.index == chunk_index) {
                header.status = status;
                header.error = error;
            }
            Ok(())
        })
    }

    /// Replace a chunk's dialogue only (full re-transcription path,
    /// spec.md §4.10). Writes the chunk file atomically; on any failure the
    /// previous file on disk is untouched, so a cancelled or failed
    /// re-transcription leaves the session byte-identical to before it
    /// started.
    pub fn replace_dialogue(
        &self,
        session_id: &str,
        chunk_index: u32,
        dialogue: Vec<TranscriptSegment>,
    ) -> Result<()> {
        let path = self.chunk_path(session_id, chunk_index);
        let mut chunk = read_json::<Chunk>(&path)?;
        chunk.dialogue = dialogue;
        chunk.status = ChunkStatus::Completed;
        chunk.error = None;
        write_json_atomic(&path, &chunk)?;

        self.mutate_meta(session_id, |meta| {
            if let Some(header) = meta.chunks.iter_mut().find(|c| c.index == chunk_index) {
                header.status = ChunkStatus::Completed;
                header.error = None;
            }
            Ok(())
        })
    }

    /// Delete a session's directory entirely.
    pub fn delete_session(&self, session_id: &str) -> Result<()> {
        let dir = self.session_dir(session_id);
        if dir.exists() {
            fs::remove_dir_all(&dir)
                .with_context(|| format!("removing session directory {session_id}"))?;
        }
        Ok(())
    }

    /// Load a session's header and all chunks. If `meta.json` is missing or
    /// fails to parse (abnormal termination mid-write), rebuild it from the
    /// `chunks/*.json` files present on disk and persist the rebuilt header.
    pub fn load_session(&self, session_id: &str) -> Result<(SessionMeta, Vec<Chunk>)> {
        let meta_path = self.meta_path(session_id);
        let meta = match read_json::<SessionMeta>(&meta_path) {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!(
                    "SessionStore: meta.json unreadable for {} ({}), rebuilding from chunks",
                    session_id,
                    e
                );
                let rebuilt = self.rebuild_meta_from_chunks(session_id)?;
                write_json_atomic(&meta_path, &rebuilt)?;
                rebuilt
            }
        };

        let chunks = self.load_all_chunks(session_id)?;
        Ok((meta, chunks))
    }

    /// List all sessions ordered by `start_time` descending (spec.md §4.3).
    pub fn list_sessions(&self) -> Result<Vec<SessionMeta>> {
        let root = self.sessions_root();
        if !root.exists() {
            return Ok(Vec::new());
        }

        let mut metas = Vec::new();
        for entry in fs::read_dir(&root).context("reading sessions directory")? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let session_id = entry.file_name().to_string_lossy().to_string();
            match self.load_session(&session_id) {
                Ok((meta, _)) => metas.push(meta),
                Err(e) => {
                    tracing::warn!("SessionStore: skipping unreadable session {}: {}", session_id, e);
                }
            }
        }

        metas.sort_by(|a, b| b.start_time.cmp(&a.start_time));
        Ok(metas)
    }

    /// Case-insensitive substring search over every chunk's dialogue text,
    /// returning a snippet with up to `SNIPPET_CONTEXT_CHARS` of surrounding
    /// context on each side (spec.md §4.3).
    pub fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let needle = query.to_lowercase();
        if needle.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits = Vec::new();
        for meta in self.list_sessions()? {
            let chunks = self.load_all_chunks(&meta.id)?;
            for chunk in chunks {
                for segment in &chunk.dialogue {
                    if let Some(snippet) = find_snippet(&segment.text, &needle) {
                        hits.push(SearchHit {
                            session_id: meta.id.clone(),
                            chunk_index: chunk.index,
                            speaker: segment.speaker.clone(),
                            start_ms: segment.start,
                            snippet,
                        });
                    }
                }
            }
        }
        Ok(hits)
    }

    fn load_all_chunks(&self, session_id: &str) -> Result<Vec<Chunk>> {
        let dir = self.chunks_dir(session_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut chunks = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_json::<Chunk>(&path) {
                Ok(chunk) => chunks.push(chunk),
                Err(e) => tracing::warn!("SessionStore: skipping corrupt chunk {:?}: {}", path, e),
            }
        }
        chunks.sort_by_key(|c| c.index);
        Ok(chunks)
    }

    fn rebuild_meta_from_chunks(&self, session_id: &str) -> Result<SessionMeta> {
        let chunks = self.load_all_chunks(session_id)?;
        let dir = self.session_dir(session_id);
        let start_time = fs::metadata(&dir)
            .and_then(|m| m.created())
            .map(chrono::DateTime::<chrono::Utc>::from)
            .unwrap_or_else(|_| chrono::Utc::now());

        Ok(SessionMeta {
            version: SESSION_META_VERSION,
            id: session_id.to_string(),
            start_time,
            status: SessionStatus::Stopped,
            title: session_id.to_string(),
            tags: Vec::new(),
            chunks: chunks.iter().map(ChunkHeader::from).collect(),
            summary: None,
            improved_dialogue: None,
        })
    }

    fn mutate_meta(&self, session_id: &str, f: impl FnOnce(&mut SessionMeta) -> Result<()>) -> Result<()> {
        let path = self.meta_path(session_id);
        let mut meta = read_json::<SessionMeta>(&path)
            .with_context(|| format!("loading meta.json for session {session_id}"))?;
        f(&mut meta)?;
        write_json_atomic(&path, &meta)
    }
}

/// Shared with the in-memory search fallback in `state/mod.rs`, which runs
/// this same snippet logic over the legacy Go-format session cache instead
/// of the on-disk `aiwisper_types::Chunk` layout this store reads.
pub(crate) fn find_snippet(text: &str, needle_lower: &str) -> Option<String> {
    let text_lower = text.to_lowercase();
    let byte_pos = text_lower.find(needle_lower)?;

    // Walk to character boundaries so the slice below never panics, even on
    // multi-byte (e.g. Cyrillic) text.
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let match_char_idx = chars.iter().position(|(b, _)| *b >= byte_pos).unwrap_or(0);

    let start = match_char_idx.saturating_sub(SNIPPET_CONTEXT_CHARS);
    let end = (match_char_idx + needle_lower.chars().count() + SNIPPET_CONTEXT_CHARS).min(chars.len());

    let snippet: String = chars[start..end].iter().map(|(_, c)| c).collect();
    Some(snippet)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = path.parent().ok_or_else(|| anyhow!("path has no parent: {:?}", path))?;
    fs::create_dir_all(dir)?;
    let tmp = path.with_extension("json.tmp");
    let body = serde_json::to_string_pretty(value)?;
    fs::write(&tmp, body)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (SessionStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (SessionStore::new(dir.path().to_path_buf()), dir)
    }

    #[test]
    fn create_then_load_round_trips() {
        let (store, _dir) = store();
        let meta = store.create_session("My Session").unwrap();
        let (loaded, chunks) = store.load_session(&meta.id).unwrap();
        assert_eq!(loaded.id, meta.id);
        assert_eq!(loaded.title, "My Session");
        assert!(chunks.is_empty());
    }

    #[test]
    fn append_and_update_chunk() {
        let (store, _dir) = store();
        let meta = store.create_session("s").unwrap();
        let chunk = Chunk::pending(0, "c0".into(), 0, 1000, false);
        store.append_chunk(&meta.id, &chunk).unwrap();

        store
            .update_chunk_transcript(
                &meta.id,
                0,
                "hello".into(),
                String::new(),
                vec![],
                ChunkStatus::Completed,
                None,
            )
            .unwrap();

        let (meta, chunks) = store.load_session(&meta.id).unwrap();
        assert_eq!(meta.chunks[0].status, ChunkStatus::Completed);
        assert_eq!(chunks[0].mic_text, "hello");
    }

    #[test]
    fn replace_dialogue_is_atomic_and_rollback_safe_on_bad_path() {
        let (store, _dir) = store();
        let meta = store.create_session("s").unwrap();
        let chunk = Chunk::pending(0, "c0".into(), 0, 1000, false);
        store.append_chunk(&meta.id, &chunk).unwrap();

        let segment = TranscriptSegment {
            start: 0,
            end: 500,
            text: "hi".into(),
            speaker: Some("mic".into()),
            words: vec![],
            confidence: 0.9,
        };
        store
            .replace_dialogue(&meta.id, 0, vec![segment])
            .unwrap();

        let (_, chunks) = store.load_session(&meta.id).unwrap();
        assert_eq!(chunks[0].dialogue.len(), 1);
        assert_eq!(chunks[0].dialogue[0].text, "hi");
    }

    #[test]
    fn list_sessions_orders_by_start_time_desc() {
        let (store, _dir) = store();
        let a = store.create_session("a").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = store.create_session("b").unwrap();

        let list = store.list_sessions().unwrap();
        assert_eq!(list[0].id, b.id);
        assert_eq!(list[1].id, a.id);
    }

    #[test]
    fn search_returns_context_snippet() {
        let (store, _dir) = store();
        let meta = store.create_session("s").unwrap();
        let chunk = Chunk::pending(0, "c0".into(), 0, 1000, false);
        store.append_chunk(&meta.id, &chunk).unwrap();

        let long_text = format!(
            "{}{}{}",
            "a".repeat(60),
            "genesis",
            "b".repeat(60)
        );
        let segment = TranscriptSegment {
            start: 0,
            end: 500,
            text: long_text,
            speaker: None,
            words: vec![],
            confidence: 0.9,
        };
        store.replace_dialogue(&meta.id, 0, vec![segment]).unwrap();

        let hits = store.search("genesis").unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].snippet.contains("genesis"));
        assert!(hits[0].snippet.len() < 60 + 7 + 60);
    }

    #[test]
    fn load_session_rebuilds_meta_when_missing() {
        let (store, _dir) = store();
        let meta = store.create_session("s").unwrap();
        let chunk = Chunk::pending(0, "c0".into(), 0, 1000, false);
        store.append_chunk(&meta.id, &chunk).unwrap();

        std::fs::remove_file(store.meta_path(&meta.id)).unwrap();

        let (rebuilt, chunks) = store.load_session(&meta.id).unwrap();
        assert_eq!(rebuilt.id, meta.id);
        assert_eq!(rebuilt.chunks.len(), 1);
        assert_eq!(chunks.len(), 1);
    }
}
