//! Embedding functions.
//!
//! The engine is agnostic to how vectors are produced: everything goes
//! through [`EmbeddingFunction`]. The local implementation wraps fastembed;
//! remote providers are injected by the caller.

use anyhow::{anyhow, Result};
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::{Arc, Mutex};

use crate::config::{EmbeddingConfig, EmbeddingProvider};

/// Batch text-to-vector function supplied by the caller or loaded locally.
pub trait EmbeddingFunction: Send + Sync {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Dimensionality of the produced vectors.
    fn dimensions(&self) -> usize;
}

/// Known local models: id, fastembed model, dimensions.
const LOCAL_MODELS: &[(&str, EmbeddingModel, usize)] = &[
    ("all-MiniLM-L6-v2", EmbeddingModel::AllMiniLML6V2, 384),
    ("all-MiniLM-L12-v2", EmbeddingModel::AllMiniLML12V2, 384),
    ("bge-small-en-v1.5", EmbeddingModel::BGESmallENV15, 384),
    ("bge-base-en-v1.5", EmbeddingModel::BGEBaseENV15, 768),
    ("nomic-embed-text-v1.5", EmbeddingModel::NomicEmbedTextV15, 768),
    ("mxbai-embed-large-v1", EmbeddingModel::MxbaiEmbedLargeV1, 1024),
];

/// Model ids available for the local provider.
pub fn local_model_ids() -> Vec<&'static str> {
    LOCAL_MODELS.iter().map(|(id, _, _)| *id).collect()
}

/// Local embedding model backed by fastembed.
pub struct FastEmbedder {
    model: Mutex<TextEmbedding>,
    model_id: String,
    dimensions: usize,
}

impl FastEmbedder {
    pub fn load(model_id: &str) -> Result<Self> {
        let (_, fastembed_model, dimensions) = LOCAL_MODELS
            .iter()
            .find(|(id, _, _)| *id == model_id)
            .ok_or_else(|| {
                anyhow!(
                    "unknown local embedding model '{model_id}' (available: {})",
                    local_model_ids().join(", ")
                )
            })?;

        tracing::info!("loading embedding model {model_id} ({dimensions} dims)");
        let model = TextEmbedding::try_new(
            InitOptions::new(fastembed_model.clone()).with_show_download_progress(true),
        )
        .map_err(|e| anyhow!("failed to initialize embedding model '{model_id}': {e}"))?;

        Ok(Self {
            model: Mutex::new(model),
            model_id: model_id.to_string(),
            dimensions: *dimensions,
        })
    }

    pub fn model_id(&self) -> &str {
        &self.model_id
    }
}

impl EmbeddingFunction for FastEmbedder {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let refs: Vec<&str> = texts.iter().map(|s| s.as_str()).collect();
        let mut model = self.model.lock().unwrap();
        model
            .embed(refs, None)
            .map_err(|e| anyhow!("failed to generate embeddings: {e}"))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

/// Resolve an embedding function for a config. Remote providers must be
/// injected by the caller; only local models can be loaded here.
pub fn load_embedder(cfg: &EmbeddingConfig) -> Result<Arc<dyn EmbeddingFunction>> {
    match cfg.provider {
        EmbeddingProvider::Local => Ok(Arc::new(FastEmbedder::load(&cfg.model)?)),
        EmbeddingProvider::Remote => Err(anyhow!(
            "provider 'remote' requires a caller-supplied embedding function"
        )),
    }
}
