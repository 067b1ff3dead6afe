//! Exact and near-duplicate detection over a rolling window.
//!
//! One `FingerprintStore` is owned by one collection run; its caches are
//! never shared across runs.

use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::llm::Embedder;

/// Outcome of a duplicate check.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateCheck {
    pub is_duplicate: bool,
    pub similarity: f32,
    pub matched_hash: Option<String>,
    /// Exact hash of the checked text.
    pub fingerprint: String,
    /// Embedding computed during the check, if any.
    pub embedding: Option<Vec<f32>>,
}

/// Text normalization applied before hashing: trim, collapse whitespace runs,
/// lowercase.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Deterministic content hash over normalized title and description.
/// A separator keeps ("ab", "c") and ("a", "bc") apart.
pub fn fingerprint(title: &str, description: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize(title).as_bytes());
    hasher.update([0x1f]);
    hasher.update(normalize(description).as_bytes());
    hex::encode(hasher.finalize())
}

/// Cosine similarity; 0.0 when either vector has zero norm or the
/// dimensions differ, so degenerate vectors never match.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    dot / (norm_a * norm_b)
}

pub struct FingerprintStore {
    similarity_threshold: f32,
    embedder: Option<Arc<dyn Embedder>>,
    hash_cache: HashSet<String>,
    embedding_cache: HashMap<String, Vec<f32>>,
}

impl FingerprintStore {
    pub fn new(similarity_threshold: f32, embedder: Option<Arc<dyn Embedder>>) -> Self {
        Self {
            similarity_threshold,
            embedder,
            hash_cache: HashSet::new(),
            embedding_cache: HashMap::new(),
        }
    }

    /// Whether semantic near-duplicate matching is possible.
    pub fn is_available(&self) -> bool {
        self.embedder.is_some()
    }

    pub fn similarity_threshold(&self) -> f32 {
        self.similarity_threshold
    }

    /// Classify an incoming article as new, exact duplicate, or near-duplicate.
    ///
    /// Exact matches are checked against the in-run cache and `recent_hashes`.
    /// Near-duplicates are searched in `recent_embeddings` plus embeddings
    /// accepted earlier in this run. Accepted articles are cached so that the
    /// same story found under another keyword is caught.
    pub async fn check(
        &mut self,
        title: &str,
        description: &str,
        recent_hashes: &HashSet<String>,
        recent_embeddings: &HashMap<String, Vec<f32>>,
    ) -> DuplicateCheck {
        let hash = fingerprint(title, description);

        if self.hash_cache.contains(&hash) || recent_hashes.contains(&hash) {
            return DuplicateCheck {
                is_duplicate: true,
                similarity: 1.0,
                matched_hash: Some(hash.clone()),
                fingerprint: hash,
                embedding: None,
            };
        }

        let embedding = self.embed(title, description).await;

        let mut best: Option<(&str, f32)> = None;
        if let Some(vector) = &embedding {
            let candidates = recent_embeddings.iter().chain(self.embedding_cache.iter());
            for (candidate_hash, candidate) in candidates {
                let similarity = cosine_similarity(vector, candidate);
                if best.map_or(true, |(_, s)| similarity > s) {
                    best = Some((candidate_hash.as_str(), similarity));
                }
            }
        }

        if let Some((matched, similarity)) = best {
            if similarity >= self.similarity_threshold {
                debug!(%matched, similarity, "near-duplicate detected");
                return DuplicateCheck {
                    is_duplicate: true,
                    similarity,
                    matched_hash: Some(matched.to_string()),
                    fingerprint: hash,
                    embedding,
                };
            }
        }

        let similarity = best.map(|(_, s)| s.max(0.0)).unwrap_or(0.0);
        self.hash_cache.insert(hash.clone());
        if let Some(vector) = &embedding {
            self.embedding_cache.insert(hash.clone(), vector.clone());
        }

        DuplicateCheck {
            is_duplicate: false,
            similarity,
            matched_hash: None,
            fingerprint: hash,
            embedding,
        }
    }

    /// Embedding for one article, or `None` when no backend is configured or
    /// the backend failed for this item.
    async fn embed(&self, title: &str, description: &str) -> Option<Vec<f32>> {
        let embedder = self.embedder.as_ref()?;
        let text = format!("{} {}", title.trim(), description.trim());
        match embedder.encode(&text).await {
            Ok(vector) if !vector.is_empty() => Some(vector),
            Ok(_) => {
                warn!("embedding backend returned an empty vector, using hash-only matching");
                None
            }
            Err(e) => {
                warn!(%e, "embedding failed, using hash-only matching for this article");
                None
            }
        }
    }

    pub fn clear_cache(&mut self) {
        self.hash_cache.clear();
        self.embedding_cache.clear();
    }

    pub fn cached_hashes(&self) -> usize {
        self.hash_cache.len()
    }
}
