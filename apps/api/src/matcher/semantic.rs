//! Embedding Index — semantic nearest-neighbour lookup over constant keys.
//!
//! Lets paraphrased labels ("Are you legally allowed to work in this country?") resolve
//! to a canonical key (`authorized_to_work`) without hand-written synonym tables.
//!
//! Lifecycle:
//! 1. `init()` batch-embeds every constant key once (idempotent until `invalidate()`).
//! 2. `query()` embeds one label and scans the cache by cosine similarity.
//! 3. `invalidate()` drops the cache; `rebuild()` = invalidate + init for a new key set.
//!
//! The cache is an immutable `Arc` snapshot swapped wholesale under a `RwLock`, so
//! queries never hold the lock across the embedding call and never see a half-built set.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::llm_client::{EmbeddingProvider, LlmError};
use crate::matcher::normalize::key_to_label;
use crate::matcher::{MatchResult, MatchSource};

/// One embedded constant. The value is carried so a hit is a complete answer.
#[derive(Debug, Clone)]
struct CachedKey {
    key: String,
    value: String,
    vector: Vec<f32>,
}

/// Cached keys in insertion order. Insertion order is the tie-break.
type VectorCache = Arc<Vec<CachedKey>>;

/// Cosine similarity of two vectors.
///
/// Returns exactly 0.0 for mismatched dimensions or a zero-magnitude vector.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0_f64;
    let mut mag_a = 0.0_f64;
    let mut mag_b = 0.0_f64;

    for (x, y) in a.iter().zip(b) {
        let x = f64::from(*x);
        let y = f64::from(*y);
        dot += x * y;
        mag_a += x * x;
        mag_b += y * y;
    }

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a.sqrt() * mag_b.sqrt())
}

/// Best entry in `cache` with its similarity; a later entry only wins when strictly greater.
fn best_match<'a>(query: &[f32], cache: &'a [CachedKey]) -> Option<(&'a CachedKey, f64)> {
    let mut best: Option<(&CachedKey, f64)> = None;
    for entry in cache {
        let similarity = cosine_similarity(query, &entry.vector);
        match best {
            Some((_, best_similarity)) if similarity <= best_similarity => {}
            _ => best = Some((entry, similarity)),
        }
    }
    best
}

pub struct EmbeddingIndex {
    provider: Arc<dyn EmbeddingProvider>,
    cache: RwLock<VectorCache>,
    /// Serializes builds; `true` once a build has populated the cache.
    built: Mutex<bool>,
    call_timeout: Duration,
}

impl EmbeddingIndex {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, call_timeout: Duration) -> Self {
        Self {
            provider,
            cache: RwLock::new(Arc::new(Vec::new())),
            built: Mutex::new(false),
            call_timeout,
        }
    }

    /// Batch-embeds every constant key. Subsequent calls are no-ops until `invalidate()`.
    ///
    /// Keys that receive no vector (short batch response) are simply absent from the cache.
    /// Returns the number of cached vectors.
    pub async fn init(&self, constants: &HashMap<String, String>) -> Result<usize, LlmError> {
        let mut built = self.built.lock().await;
        if *built {
            return Ok(self.len());
        }

        let mut keys: Vec<(&String, &String)> = constants.iter().collect();
        keys.sort_by(|a, b| a.0.cmp(b.0));

        if keys.is_empty() {
            warn!("No constants to embed — semantic matching disabled until reload");
            return Ok(0);
        }

        info!("Batch embedding {} constant keys...", keys.len());
        let labels: Vec<String> = keys.iter().map(|(k, _)| key_to_label(k)).collect();

        let vectors = tokio::time::timeout(self.call_timeout, self.provider.embed_batch(&labels))
            .await
            .map_err(|_| LlmError::Timeout(self.call_timeout))??;

        if vectors.len() < keys.len() {
            warn!(
                "Embedding batch returned {}/{} vectors; missing keys will not match semantically",
                vectors.len(),
                keys.len()
            );
        }

        let cache: Vec<CachedKey> = keys
            .into_iter()
            .zip(vectors)
            .map(|((key, value), vector)| CachedKey {
                key: key.clone(),
                value: value.clone(),
                vector,
            })
            .collect();
        let cached = cache.len();

        self.swap(Arc::new(cache));
        *built = true;

        info!("Cached {cached} constant embeddings");
        Ok(cached)
    }

    /// Drops every cached vector. The next `init()` rebuilds from scratch.
    pub async fn invalidate(&self) {
        let mut built = self.built.lock().await;
        self.swap(Arc::new(Vec::new()));
        *built = false;
        debug!("Embedding cache invalidated");
    }

    /// Invalidates, then builds for a new constant set.
    pub async fn rebuild(&self, constants: &HashMap<String, String>) -> Result<usize, LlmError> {
        self.invalidate().await;
        self.init(constants).await
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Finds the constant key most similar to `label`.
    ///
    /// Never fails: an empty cache, a failed or timed-out embedding call, or a best
    /// similarity below `threshold` all come back as a miss (with the best guess, if any).
    pub async fn query(&self, label: &str, threshold: f64) -> MatchResult {
        let cache = self.snapshot();
        if cache.is_empty() {
            return MatchResult::miss();
        }

        let embedding =
            match tokio::time::timeout(self.call_timeout, self.provider.embed_one(label)).await {
                Ok(Ok(v)) => v,
                Ok(Err(e)) => {
                    warn!("Failed to embed label '{label}': {e}");
                    return MatchResult::miss();
                }
                Err(_) => {
                    warn!(
                        "Embedding label '{label}' timed out after {:?}",
                        self.call_timeout
                    );
                    return MatchResult::miss();
                }
            };

        match best_match(&embedding, &cache) {
            Some((entry, similarity)) if similarity >= threshold => {
                debug!(
                    "Semantic match: '{label}' → '{}' ({similarity:.2} similarity)",
                    entry.key
                );
                MatchResult::found(
                    entry.value.clone(),
                    entry.key.clone(),
                    MatchSource::Semantic,
                    similarity,
                )
            }
            Some((entry, similarity)) => {
                debug!(
                    "No semantic match for '{label}' (best: {} @ {similarity:.2})",
                    entry.key
                );
                MatchResult::best_guess(entry.key.clone(), similarity)
            }
            None => MatchResult::miss(),
        }
    }

    /// Returns the cached vector for `key`, if any.
    pub fn cached_embedding(&self, key: &str) -> Option<Vec<f32>> {
        self.snapshot()
            .iter()
            .find(|entry| entry.key == key)
            .map(|entry| entry.vector.clone())
    }

    fn snapshot(&self) -> VectorCache {
        match self.cache.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    fn swap(&self, next: VectorCache) {
        match self.cache.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::test_support::{constants, FakeEmbedder};

    fn index(embedder: &Arc<FakeEmbedder>) -> EmbeddingIndex {
        EmbeddingIndex::new(embedder.clone(), Duration::from_secs(5))
    }

    #[test]
    fn test_cosine_identical() {
        let v = [1.0_f32, 0.0, 0.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_cosine_orthogonal() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-3);
    }

    #[test]
    fn test_cosine_opposite() {
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_cosine_mismatched_dimensions_is_exactly_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0, 0.0, 0.0]), 0.0);
    }

    #[test]
    fn test_cosine_zero_vector_is_exactly_zero() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[test]
    fn test_tie_keeps_first_inserted() {
        let entry = |key: &str, vector: Vec<f32>| CachedKey {
            key: key.to_string(),
            value: String::new(),
            vector,
        };
        let cache = vec![entry("alpha", vec![1.0, 0.0]), entry("beta", vec![2.0, 0.0])];
        let (best, similarity) = best_match(&[1.0, 0.0], &cache).unwrap();
        assert_eq!(best.key, "alpha");
        assert!((similarity - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_empty_cache_never_calls_provider() {
        let embedder = Arc::new(FakeEmbedder::new(&[("email", &[1.0, 0.0])]));
        let index = index(&embedder);

        let result = index.query("email address", 0.0).await;

        assert!(!result.is_found());
        assert_eq!(embedder.single_calls(), 0);
    }

    #[tokio::test]
    async fn test_query_finds_nearest_key_above_threshold() {
        let embedder = Arc::new(
            FakeEmbedder::new(&[
                ("authorized to work", &[1.0, 0.0, 0.0]),
                ("veteran", &[0.0, 1.0, 0.0]),
            ])
            .with_query("are you legally allowed to work here", &[0.9, 0.1, 0.0]),
        );
        let index = index(&embedder);
        let c = constants(&[("authorized_to_work", "yes"), ("veteran", "no")]);
        assert_eq!(index.init(&c).await.unwrap(), 2);

        let result = index
            .query("are you legally allowed to work here", 0.7)
            .await;

        assert!(result.is_found());
        assert_eq!(result.key(), Some("authorized_to_work"));
        assert_eq!(result.value(), Some("yes"));
        assert_eq!(result.source(), Some(MatchSource::Semantic));
        assert!(result.similarity() > 0.9);
    }

    #[tokio::test]
    async fn test_below_threshold_is_miss_with_best_guess() {
        let embedder = Arc::new(
            FakeEmbedder::new(&[("email", &[1.0, 0.0])]).with_query("cover letter", &[0.6, 0.8]),
        );
        let index = index(&embedder);
        index.init(&constants(&[("email", "a@b.c")])).await.unwrap();

        let result = index.query("cover letter", 0.7).await;

        assert!(!result.is_found());
        assert_eq!(result.key(), Some("email"));
        assert!((result.similarity() - 0.6).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_threshold_is_per_call() {
        let embedder = Arc::new(
            FakeEmbedder::new(&[("email", &[1.0, 0.0])]).with_query("contact", &[0.6, 0.8]),
        );
        let index = index(&embedder);
        index.init(&constants(&[("email", "a@b.c")])).await.unwrap();

        assert!(index.query("contact", 0.5).await.is_found());
        assert!(!index.query("contact", 0.7).await.is_found());
    }

    #[tokio::test]
    async fn test_partial_batch_caches_only_returned_vectors() {
        let embedder = Arc::new(
            FakeEmbedder::new(&[("city", &[1.0, 0.0]), ("email", &[0.0, 1.0])]).truncate_batch(1),
        );
        let index = index(&embedder);

        let cached = index
            .init(&constants(&[("email", "a@b.c"), ("city", "Houston")]))
            .await
            .unwrap();

        // Keys are embedded in sorted order, so only "city" got a vector.
        assert_eq!(cached, 1);
        assert!(index.cached_embedding("city").is_some());
        assert!(index.cached_embedding("email").is_none());
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let embedder = Arc::new(FakeEmbedder::new(&[("email", &[1.0, 0.0])]));
        let index = index(&embedder);
        let c = constants(&[("email", "a@b.c")]);

        index.init(&c).await.unwrap();
        index.init(&c).await.unwrap();

        assert_eq!(embedder.batch_calls(), 1);
        assert_eq!(index.len(), 1);
    }

    #[tokio::test]
    async fn test_failed_build_leaves_index_empty() {
        let embedder = Arc::new(FakeEmbedder::new(&[]).failing_batch());
        let index = index(&embedder);

        assert!(index.init(&constants(&[("email", "a@b.c")])).await.is_err());
        assert!(index.is_empty());
    }

    #[tokio::test]
    async fn test_query_embedding_failure_is_a_miss() {
        let embedder = Arc::new(FakeEmbedder::new(&[("email", &[1.0, 0.0])]));
        let index = index(&embedder);
        index.init(&constants(&[("email", "a@b.c")])).await.unwrap();

        // The fake fails for any query text it was not primed with.
        let result = index.query("unknown label", 0.0).await;

        assert!(!result.is_found());
        assert_eq!(embedder.single_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_query_timeout_is_a_miss() {
        let embedder = Arc::new(
            FakeEmbedder::new(&[("email", &[1.0, 0.0])])
                .with_query("email", &[1.0, 0.0])
                .with_query_delay(Duration::from_secs(60)),
        );
        let index = index(&embedder);
        index.init(&constants(&[("email", "a@b.c")])).await.unwrap();

        assert!(!index.query("email", 0.0).await.is_found());
    }

    #[tokio::test]
    async fn test_rebuild_never_leaks_stale_keys() {
        let embedder = Arc::new(
            FakeEmbedder::new(&[
                ("phone", &[1.0, 0.0]),
                ("mobile phone", &[0.9, 0.1]),
            ])
            .with_query("phone", &[1.0, 0.0]),
        );
        let index = index(&embedder);

        index.init(&constants(&[("phone", "555")])).await.unwrap();
        assert_eq!(index.query("phone", 0.5).await.key(), Some("phone"));

        let next = constants(&[("mobile_phone", "777")]);
        index.rebuild(&next).await.unwrap();

        let result = index.query("phone", 0.0).await;
        assert_eq!(result.key(), Some("mobile_phone"));
        assert!(index.cached_embedding("phone").is_none());
        assert_eq!(embedder.batch_calls(), 2);
    }

    #[tokio::test]
    async fn test_invalidate_empties_cache() {
        let embedder = Arc::new(FakeEmbedder::new(&[("email", &[1.0, 0.0])]));
        let index = index(&embedder);
        index.init(&constants(&[("email", "a@b.c")])).await.unwrap();

        index.invalidate().await;

        assert!(index.is_empty());
        assert!(!index.query("email", 0.0).await.is_found());
        assert_eq!(embedder.single_calls(), 0);
    }
}
