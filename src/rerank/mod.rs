//! Cross-encoder reranking.
//!
//! The reranker is resolved through [`RerankerCache`], a process-owned cache
//! service keyed by model name. A model that fails to load degrades the
//! search to fused order instead of erroring.

use anyhow::{anyhow, Result};
use fastembed::{RerankInitOptions, RerankerModel, TextRerank};
use moka::sync::Cache;
use std::sync::{Arc, Mutex};
use tracing::warn;

/// Scores (query, document) pairs; higher is more relevant.
pub trait Reranker: Send + Sync {
    /// One score per document, in document order.
    fn score(&self, query: &str, documents: &[&str]) -> Result<Vec<f32>>;
}

/// Known reranker models: id to fastembed model.
const RERANKER_MODELS: &[(&str, RerankerModel)] = &[
    ("jina-reranker-v1-turbo-en", RerankerModel::JINARerankerV1TurboEn),
    ("bge-reranker-base", RerankerModel::BGERerankerBase),
];

/// Cross-encoder reranker backed by fastembed.
pub struct NeuralReranker {
    model: Mutex<TextRerank>,
    model_id: String,
}

impl NeuralReranker {
    pub fn load(model_id: &str) -> Result<Self> {
        let (_, model) = RERANKER_MODELS
            .iter()
            .find(|(id, _)| *id == model_id)
            .ok_or_else(|| anyhow!("unknown reranker model '{model_id}'"))?;

        tracing::info!("loading reranker model {model_id}");
        let mut options = RerankInitOptions::default();
        options.model_name = model.clone();
        options.show_download_progress = true;
        let reranker = TextRerank::try_new(options)
            .map_err(|e| anyhow!("failed to initialize reranker '{model_id}': {e}"))?;

        Ok(Self {
            model: Mutex::new(reranker),
            model_id: model_id.to_string(),
        })
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }
}

impl Reranker for NeuralReranker {
    fn score(&self, query: &str, documents: &[&str]) -> Result<Vec<f32>> {
        if documents.is_empty() {
            return Ok(Vec::new());
        }
        let mut model = self.model.lock().unwrap();
        let results = model
            .rerank(query, documents.to_vec(), false, None)
            .map_err(|e| anyhow!("rerank failed: {e}"))?;

        // fastembed returns results sorted by score; restore document order.
        let mut scores = vec![0.0; documents.len()];
        for r in results {
            if let Some(slot) = scores.get_mut(r.index) {
                *slot = r.score;
            }
        }
        Ok(scores)
    }
}

/// Process-owned, lock-guarded cache of loaded rerankers keyed by model
/// name. Injected into the search path rather than living as module-global
/// state.
pub struct RerankerCache {
    cache: Cache<String, Arc<dyn Reranker>>,
}

impl RerankerCache {
    pub fn new() -> Self {
        Self {
            cache: Cache::new(4),
        }
    }

    /// Get the reranker for `model_id`, loading it on first use.
    /// Returns `None` (and logs) when the model cannot be loaded.
    pub fn get(&self, model_id: &str) -> Option<Arc<dyn Reranker>> {
        let loaded = self.cache.try_get_with(model_id.to_string(), || {
            NeuralReranker::load(model_id).map(|r| Arc::new(r) as Arc<dyn Reranker>)
        });
        match loaded {
            Ok(reranker) => Some(reranker),
            Err(e) => {
                warn!("failed to load reranker model '{model_id}': {e}");
                None
            }
        }
    }

    /// Pre-seed a reranker under a model name (tests, custom backends).
    pub fn insert(&self, model_id: &str, reranker: Arc<dyn Reranker>) {
        self.cache.insert(model_id.to_string(), reranker);
    }
}

impl Default for RerankerCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Reversing;

    impl Reranker for Reversing {
        fn score(&self, _query: &str, documents: &[&str]) -> Result<Vec<f32>> {
            Ok((0..documents.len()).map(|i| i as f32).collect())
        }
    }

    #[test]
    fn seeded_reranker_is_served_from_cache() {
        let cache = RerankerCache::new();
        cache.insert("stub", Arc::new(Reversing));

        let reranker = cache.get("stub").unwrap();
        let scores = reranker.score("q", &["a", "b", "c"]).unwrap();
        assert_eq!(scores, vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn unknown_model_degrades_to_none() {
        let cache = RerankerCache::new();
        assert!(cache.get("no-such-model").is_none());
    }

    #[test]
    #[ignore] // Requires model download
    fn neural_reranker_orders_by_relevance() {
        let reranker = NeuralReranker::load("jina-reranker-v1-turbo-en").unwrap();
        let docs = [
            "JWT-based stateless authentication across services",
            "slow braised vegetables with garlic and thyme",
        ];
        let scores = reranker.score("how do we authenticate users", &docs).unwrap();
        assert!(scores[0] > scores[1]);
    }
}
