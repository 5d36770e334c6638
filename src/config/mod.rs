use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Per-collection configuration for docdex.
///
/// Treated as immutable once an indexer is built: a model swap installs a
/// fresh clone with new embedding settings instead of mutating shared state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Root of the document tree to index
    pub docs_path: PathBuf,

    /// Directory holding all persisted index state (collections, hash
    /// caches, keyword indexes, config.json)
    pub store_path: PathBuf,

    /// Embedding identity
    pub embedding: EmbeddingConfig,

    /// Chunking parameters
    pub chunking: ChunkingConfig,

    /// Search, fusion and rerank parameters
    pub search: SearchConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    pub provider: EmbeddingProvider,

    /// Model identifier (e.g. "all-MiniLM-L6-v2")
    pub model: String,
}

impl EmbeddingConfig {
    /// Two configs describe the same embedding space iff provider and model
    /// both match.
    pub fn same_identity(&self, other: &EmbeddingConfig) -> bool {
        self.provider == other.provider && self.model == other.model
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Local fastembed model
    Local,
    /// Caller-supplied embedding function (e.g. a remote API)
    Remote,
}

impl fmt::Display for EmbeddingProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub strategy: ChunkStrategy,

    /// Maximum chunk size in characters
    pub max_chars: usize,

    /// Overlap between fixed-size windows in characters
    pub overlap: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    /// Split at markdown headings (best for structured docs)
    Heading,
    /// Fixed-size windows with overlap
    Fixed,
    /// Heading split, oversized chunks subdivided
    Hybrid,
}

impl fmt::Display for ChunkStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Heading => write!(f, "heading"),
            Self::Fixed => write!(f, "fixed"),
            Self::Hybrid => write!(f, "hybrid"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Combine vector and keyword results via RRF
    pub hybrid: bool,

    /// RRF rank-damping constant
    pub rrf_k: f32,

    /// RRF weight for the vector result list
    pub vector_weight: f32,

    /// RRF weight for the keyword result list
    pub keyword_weight: f32,

    /// Run a cross-encoder rerank pass over the fused pool
    pub reranker_enabled: bool,

    /// Reranker model identifier
    pub reranker_model: String,

    /// Drop hits below this relevance (0-100) after all scoring
    pub min_relevance: f32,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            docs_path: PathBuf::from("docs"),
            store_path: PathBuf::from(".docdex"),
            embedding: EmbeddingConfig {
                provider: EmbeddingProvider::Local,
                model: "all-MiniLM-L6-v2".to_string(),
            },
            chunking: ChunkingConfig {
                strategy: ChunkStrategy::Heading,
                max_chars: 2000,
                overlap: 200,
            },
            search: SearchConfig {
                hybrid: true,
                rrf_k: 60.0,
                vector_weight: 1.0,
                keyword_weight: 0.7,
                reranker_enabled: false,
                reranker_model: "jina-reranker-v1-turbo-en".to_string(),
                min_relevance: 0.0,
            },
        }
    }
}

impl IndexConfig {
    /// Load a persisted config from `<dir>/config.json`, falling back to
    /// defaults when the file is missing or unreadable.
    pub fn load_from(dir: &Path) -> Self {
        let path = dir.join("config.json");
        match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!("ignoring malformed {}: {e}", path.display());
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    /// Persist this config to `<dir>/config.json`.
    pub fn save_to(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        std::fs::write(dir.join("config.json"), serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
