pub mod config;
pub mod chunker;
pub mod extract;
pub mod quality;
pub mod embed;
pub mod vectordb;
pub mod fts;
pub mod search;
pub mod rerank;
pub mod index;
pub mod migrate;

// Re-export commonly used types
pub use chunker::{Chunk, Chunker};
pub use config::{ChunkStrategy, EmbeddingProvider, IndexConfig};
pub use embed::{EmbeddingFunction, FastEmbedder};
pub use extract::{DocReader, DocWalker, TextExtractor};
pub use index::{DocsIndexer, IndexResult, IndexStats};
pub use migrate::{MigrationReport, MigrationStatus, SwapStart};
pub use quality::{Issue, QualityGate, Severity};
pub use search::ScoredChunk;
