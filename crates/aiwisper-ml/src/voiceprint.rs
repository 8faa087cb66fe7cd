//! VoicePrint store & matcher (spec.md §4.8).
//!
//! Persisted as `speakers.json` under the data directory with atomic
//! (write-temp-then-rename) updates. Matching is cosine similarity against
//! the in-memory copy; writes go through a single `RwLock` writer while
//! reads clone out of the lock so callers never block on disk I/O.

use aiwisper_types::{VoicePrint, VoicePrintSource};
use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// Thresholds for matching (cosine similarity), spec.md §4.8.
pub const THRESHOLD_HIGH: f32 = 0.85;
pub const THRESHOLD_MEDIUM: f32 = 0.70;
pub const THRESHOLD_LOW: f32 = 0.50;
pub const THRESHOLD_MIN: f32 = 0.50;

/// Cap on the prior weight used when averaging in a new embedding observation.
const MAX_PRIOR_WEIGHT: i32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchConfidence {
    High,
    Medium,
    Low,
    None,
}

impl MatchConfidence {
    pub fn from_similarity(similarity: f32) -> Self {
        if similarity >= THRESHOLD_HIGH {
            Self::High
        } else if similarity >= THRESHOLD_MEDIUM {
            Self::Medium
        } else if similarity >= THRESHOLD_LOW {
            Self::Low
        } else {
            Self::None
        }
    }
}

impl std::fmt::Display for MatchConfidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::High => write!(f, "high"),
            Self::Medium => write!(f, "medium"),
            Self::Low => write!(f, "low"),
            Self::None => write!(f, "none"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MatchResult {
    pub voiceprint: VoicePrint,
    pub similarity: f32,
    pub confidence: MatchConfidence,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VoicePrintStore {
    version: i32,
    voiceprints: Vec<VoicePrint>,
}

impl Default for VoicePrintStore {
    fn default() -> Self {
        Self {
            version: 1,
            voiceprints: Vec::new(),
        }
    }
}

/// VoicePrint storage and matching engine.
pub struct VoicePrintMatcher {
    path: PathBuf,
    data: Arc<RwLock<VoicePrintStore>>,
}

impl VoicePrintMatcher {
    /// `data_dir`: the base data directory; `speakers.json` is created inside it.
    pub fn new(data_dir: PathBuf) -> Result<Self> {
        let path = data_dir.join("speakers.json");

        let data = if path.exists() {
            let content =
                std::fs::read_to_string(&path).context("Failed to read speakers.json")?;
            serde_json::from_str(&content).context("Failed to parse speakers.json")?
        } else {
            VoicePrintStore::default()
        };

        tracing::info!(
            "VoicePrintMatcher: loaded {} voiceprints from {:?}",
            data.voiceprints.len(),
            path
        );

        Ok(Self {
            path,
            data: Arc::new(RwLock::new(data)),
        })
    }

    /// `find_best(embedding) -> Option<Match>`: argmax cosine similarity, >= 0.50.
    pub fn find_best(&self, embedding: &[f32]) -> Option<MatchResult> {
        let data = self.data.read();

        let mut best: Option<MatchResult> = None;
        let mut best_similarity = 0.0f32;

        for vp in &data.voiceprints {
            let similarity = cosine_similarity(embedding, &vp.embedding);
            if similarity > best_similarity && similarity >= THRESHOLD_MIN {
                best_similarity = similarity;
                best = Some(MatchResult {
                    voiceprint: vp.clone(),
                    similarity,
                    confidence: MatchConfidence::from_similarity(similarity),
                });
            }
        }

        if let Some(ref m) = best {
            tracing::info!(
                "[VoicePrint] match: {} (similarity={:.2}, confidence={})",
                m.voiceprint.name,
                m.similarity,
                m.confidence
            );
        }

        best
    }

    /// All matches at or above `threshold`, sorted by similarity descending.
    pub fn find_all_matches(&self, embedding: &[f32], threshold: f32) -> Vec<MatchResult> {
        let data = self.data.read();

        let mut matches: Vec<MatchResult> = data
            .voiceprints
            .iter()
            .filter_map(|vp| {
                let similarity = cosine_similarity(embedding, &vp.embedding);
                if similarity >= threshold {
                    Some(MatchResult {
                        voiceprint: vp.clone(),
                        similarity,
                        confidence: MatchConfidence::from_similarity(similarity),
                    })
                } else {
                    None
                }
            })
            .collect();

        matches.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap());
        matches
    }

    /// `match_with_auto_update`: on a `high`-confidence match, folds the new
    /// embedding into the stored centroid before returning.
    pub fn match_with_auto_update(&self, embedding: &[f32]) -> Option<MatchResult> {
        let result = self.find_best(embedding);

        if let Some(ref m) = result {
            if m.confidence == MatchConfidence::High {
                if let Err(e) = self.update_embedding(&m.voiceprint.id, embedding) {
                    tracing::error!("[VoicePrint] failed to update embedding: {}", e);
                }
            }
        }

        result
    }

    pub fn add(
        &self,
        name: &str,
        embedding: Vec<f32>,
        source: Option<VoicePrintSource>,
    ) -> Result<VoicePrint> {
        let now = chrono::Utc::now();
        let embedding = normalize_vector(&embedding);

        let vp = VoicePrint {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.to_string(),
            embedding,
            created_at: now,
            updated_at: now,
            last_seen_at: now,
            seen_count: 1,
            source,
            sample_path: None,
        };

        {
            let mut data = self.data.write();
            data.voiceprints.push(vp.clone());
        }
        self.save()?;

        tracing::info!("[VoicePrint] added: {} ({})", vp.name, &vp.id[..8]);
        Ok(vp)
    }

    pub fn all(&self) -> Vec<VoicePrint> {
        self.data.read().voiceprints.clone()
    }

    pub fn get(&self, id: &str) -> Option<VoicePrint> {
        self.data
            .read()
            .voiceprints
            .iter()
            .find(|vp| vp.id == id)
            .cloned()
    }

    pub fn update_name(&self, id: &str, name: &str) -> Result<()> {
        {
            let mut data = self.data.write();
            let vp = data
                .voiceprints
                .iter_mut()
                .find(|vp| vp.id == id)
                .with_context(|| format!("VoicePrint not found: {id}"))?;
            vp.name = name.to_string();
            vp.updated_at = chrono::Utc::now();
        }
        self.save()
    }

    pub fn set_sample_path(&self, id: &str, path: Option<String>) -> Result<()> {
        {
            let mut data = self.data.write();
            let vp = data
                .voiceprints
                .iter_mut()
                .find(|vp| vp.id == id)
                .with_context(|| format!("VoicePrint not found: {id}"))?;
            vp.sample_path = path;
            vp.updated_at = chrono::Utc::now();
        }
        self.save()
    }

    /// Weighted average with a prior weight capped at `min(seen_count, 10)`,
    /// renormalized to unit length (spec.md §4.8, §8 S6).
    pub fn update_embedding(&self, id: &str, new_embedding: &[f32]) -> Result<()> {
        {
            let mut data = self.data.write();
            let vp = data
                .voiceprints
                .iter_mut()
                .find(|vp| vp.id == id)
                .with_context(|| format!("VoicePrint not found: {id}"))?;

            let old_weight = vp.seen_count.min(MAX_PRIOR_WEIGHT) as f32;
            let new_weight = 1.0f32;
            let total_weight = old_weight + new_weight;

            for (i, old_val) in vp.embedding.iter_mut().enumerate() {
                if let Some(&new_val) = new_embedding.get(i) {
                    *old_val = (*old_val * old_weight + new_val * new_weight) / total_weight;
                }
            }
            vp.embedding = normalize_vector(&vp.embedding);

            vp.seen_count += 1;
            let now = chrono::Utc::now();
            vp.last_seen_at = now;
            vp.updated_at = now;

            tracing::info!(
                "[VoicePrint] embedding updated: {} (seen_count={})",
                vp.name,
                vp.seen_count
            );
        }
        self.save()
    }

    pub fn delete(&self, id: &str) -> Result<()> {
        let name = {
            let mut data = self.data.write();
            let idx = data
                .voiceprints
                .iter()
                .position(|vp| vp.id == id)
                .with_context(|| format!("VoicePrint not found: {id}"))?;
            data.voiceprints.remove(idx).name
        };
        self.save()?;
        tracing::info!("[VoicePrint] deleted: {} ({})", name, &id[..8.min(id.len())]);
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.data.read().voiceprints.len()
    }

    /// Atomic write-temp-then-rename, matching the session store's convention.
    fn save(&self) -> Result<()> {
        let data = self.data.read();

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        let content = serde_json::to_string_pretty(&*data)?;
        std::fs::write(&tmp_path, content)?;
        std::fs::rename(&tmp_path, &self.path)?;

        Ok(())
    }
}

/// Cosine similarity in `[-1, 1]`; 0 for empty or mismatched-length vectors.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot: f64 = 0.0;
    let mut norm_a: f64 = 0.0;
    let mut norm_b: f64 = 0.0;

    for i in 0..a.len() {
        let av = a[i] as f64;
        let bv = b[i] as f64;
        dot += av * bv;
        norm_a += av * av;
        norm_b += bv * bv;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    (dot / (norm_a.sqrt() * norm_b.sqrt())) as f32
}

pub fn cosine_distance(a: &[f32], b: &[f32]) -> f64 {
    1.0 - cosine_similarity(a, b) as f64
}

/// Normalize a vector to unit length; returns the input unchanged if it is
/// (near) the zero vector.
fn normalize_vector(v: &[f32]) -> Vec<f32> {
    let sum_sq: f64 = v.iter().map(|&x| (x as f64) * (x as f64)).sum();

    if sum_sq < 1e-10 {
        return v.to_vec();
    }

    let norm = (1.0 / sum_sq.sqrt()) as f32;
    v.iter().map(|&x| x * norm).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_similarity_identical() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_opposite() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![-1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_similarity_symmetric() {
        let a = vec![0.3, 0.4, 0.866];
        let b = vec![0.1, 0.9, -0.2];
        assert!((cosine_similarity(&a, &b) - cosine_similarity(&b, &a)).abs() < 1e-6);
    }

    #[test]
    fn threshold_never_returns_below_min() {
        let matcher_data = VoicePrintStore {
            version: 1,
            voiceprints: vec![VoicePrint {
                id: "a".into(),
                name: "A".into(),
                embedding: vec![1.0, 0.0, 0.0],
                created_at: chrono::Utc::now(),
                updated_at: chrono::Utc::now(),
                last_seen_at: chrono::Utc::now(),
                seen_count: 1,
                source: None,
                sample_path: None,
            }],
        };
        let query = vec![0.0, 1.0, 0.0]; // orthogonal, similarity 0.0 < THRESHOLD_MIN
        let sim = cosine_similarity(&query, &matcher_data.voiceprints[0].embedding);
        assert!(sim < THRESHOLD_MIN);
    }

    #[test]
    fn normalize_vector_unit_length() {
        let v = vec![3.0, 4.0];
        let n = normalize_vector(&v);
        let len: f32 = n.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((len - 1.0).abs() < 1e-6);
    }

    #[test]
    fn confidence_bands() {
        assert_eq!(MatchConfidence::from_similarity(0.90), MatchConfidence::High);
        assert_eq!(MatchConfidence::from_similarity(0.75), MatchConfidence::Medium);
        assert_eq!(MatchConfidence::from_similarity(0.55), MatchConfidence::Low);
        assert_eq!(MatchConfidence::from_similarity(0.40), MatchConfidence::None);
    }

    #[test]
    fn weighted_average_matches_spec_example() {
        // spec.md §8 S6: seen_count=1 -> prior weight min(1,10)=1, so the
        // update is a plain (e0 + e1) / 2, renormalized.
        let dir = tempfile::tempdir().unwrap();
        let matcher = VoicePrintMatcher::new(dir.path().to_path_buf()).unwrap();
        let e0 = normalize_vector(&[1.0, 0.0, 0.0]);
        let vp = matcher.add("V", e0.clone(), None).unwrap();

        let e1 = normalize_vector(&[0.0, 1.0, 0.0]);
        matcher.update_embedding(&vp.id, &e1).unwrap();

        let updated = matcher.get(&vp.id).unwrap();
        let expected = normalize_vector(&[0.5, 0.5, 0.0]);
        for (a, b) in updated.embedding.iter().zip(expected.iter()) {
            assert!((a - b).abs() < 1e-4);
        }
        assert_eq!(updated.seen_count, 2);
    }
}
