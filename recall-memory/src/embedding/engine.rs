//! Vector embedding engine
//!
//! High-level API for generating and caching embeddings. The model itself is
//! a black box behind [`Embedder`]; the engine may also run with no model at
//! all, in which case every call reports `EmbeddingUnavailable`.

use dashmap::DashMap;
use std::sync::Arc;

use crate::error::{MemoryError, Result};

/// Query cache entries kept before the cache is cleared wholesale
const MAX_CACHED_QUERIES: usize = 4096;

/// Text to vector function
pub trait Embedder: Send + Sync {
    /// Output dimension
    fn dimension(&self) -> usize;

    /// Embed several texts, one vector per input in the same order
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])?
            .pop()
            .ok_or_else(|| MemoryError::embedding("embedder returned no vector"))
    }
}

/// Vector embedding engine with caching
///
/// Wraps an [`Embedder`] with a DashMap cache for repeated query lookups.
pub struct VectorEngine {
    model: Option<Arc<dyn Embedder>>,
    cache: DashMap<String, Vec<f32>>,
    dimension: usize,
}

impl VectorEngine {
    pub fn new(model: Arc<dyn Embedder>) -> Self {
        let dimension = model.dimension();
        log::info!("VectorEngine ready ({}d)", dimension);
        Self {
            model: Some(model),
            cache: DashMap::new(),
            dimension,
        }
    }

    /// Engine without a model; search degrades to lexical-only
    pub fn disabled() -> Self {
        log::info!("VectorEngine running without an embedding model");
        Self {
            model: None,
            cache: DashMap::new(),
            dimension: 0,
        }
    }

    pub fn is_available(&self) -> bool {
        self.model.is_some()
    }

    fn model(&self) -> Result<&Arc<dyn Embedder>> {
        self.model
            .as_ref()
            .ok_or_else(|| MemoryError::embedding("no embedding model configured"))
    }

    /// Generate embedding with caching
    pub fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if let Some(cached) = self.cache.get(text) {
            return Ok(cached.clone());
        }

        let embedding = self.model()?.embed(text)?;
        if self.cache.len() >= MAX_CACHED_QUERIES {
            self.cache.clear();
        }
        self.cache.insert(text.to_string(), embedding.clone());
        Ok(embedding)
    }

    /// Batch embed without touching the query cache.
    ///
    /// Record texts are long and embedded once; their vectors live in the
    /// persisted vector cache instead.
    pub fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let vectors = self.model()?.embed_batch(texts)?;
        if vectors.len() != texts.len() {
            return Err(MemoryError::embedding(format!(
                "embedder returned {} vectors for {} texts",
                vectors.len(),
                texts.len()
            )));
        }
        Ok(vectors)
    }

    /// Get embedding dimension (0 when disabled)
    pub fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Calculate cosine similarity between two vectors
///
/// Mismatched lengths and zero vectors score 0.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        0.0
    } else {
        dot / (norm_a * norm_b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    impl Embedder for CountingEmbedder {
        fn dimension(&self) -> usize {
            2
        }

        fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|t| vec![t.len() as f32, 1.0]).collect())
        }
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = vec![1.0, 0.0, 0.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 0.001);
    }

    #[test]
    fn test_cosine_similarity_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 0.001);
    }

    #[test]
    fn test_cosine_similarity_mismatched() {
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_query_embeddings_cached() {
        let model = Arc::new(CountingEmbedder {
            calls: AtomicUsize::new(0),
        });
        let engine = VectorEngine::new(model.clone());

        engine.embed("sqlite busy timeout").unwrap();
        engine.embed("sqlite busy timeout").unwrap();
        assert_eq!(model.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disabled_engine_reports_unavailable() {
        let engine = VectorEngine::disabled();
        assert!(!engine.is_available());
        assert!(matches!(
            engine.embed("anything"),
            Err(MemoryError::EmbeddingUnavailable(_))
        ));
    }
}
