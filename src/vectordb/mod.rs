//! Persistent vector collections (arroy + heed/LMDB).

mod collection;

pub use collection::{StoredChunk, VectorCollection, VectorHit};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

use crate::config::EmbeddingConfig;

/// Embedding identity persisted next to a collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionMeta {
    pub provider: String,
    pub model: String,
    pub dimensions: usize,
}

/// Directory of a named collection under the store root.
pub fn collection_dir(store: &Path, name: &str) -> PathBuf {
    store.join(name)
}

/// Name of the transient shadow collection used during model migration.
pub fn shadow_name(name: &str) -> String {
    format!("{name}_migration")
}

/// Directory of a collection's keyword index.
pub fn keyword_dir(store: &Path, name: &str) -> PathBuf {
    store.join(format!("{name}_keyword"))
}

/// Path of a collection's persisted path-to-content-hash map.
pub fn hashes_path(store: &Path, name: &str) -> PathBuf {
    store.join(format!("{name}_hashes.json"))
}

/// Open (or create) a collection bound to an embedding identity.
///
/// A persisted collection whose dimensionality no longer matches the
/// embedding function is wiped and recreated: the store is a derived cache
/// of the source documents, and stale vectors from another model can be
/// neither queried nor extended. Returns the collection and whether a wipe
/// happened (callers then invalidate the hash cache so the next `index_all`
/// re-embeds everything).
pub fn open_collection(
    store: &Path,
    name: &str,
    embedding: &EmbeddingConfig,
    dimensions: usize,
) -> Result<(Arc<VectorCollection>, bool)> {
    let dir = collection_dir(store, name);
    let meta_path = dir.join("meta.json");
    let mut reset = false;

    if let Ok(raw) = std::fs::read_to_string(&meta_path) {
        if let Ok(meta) = serde_json::from_str::<CollectionMeta>(&raw) {
            if meta.dimensions != dimensions {
                warn!(
                    "dimension mismatch in '{name}': stored={}d, model '{}'={}d, recreating collection",
                    meta.dimensions, embedding.model, dimensions
                );
                std::fs::remove_dir_all(&dir)?;
                reset = true;
            }
        }
    }

    std::fs::create_dir_all(&dir)?;
    let collection = VectorCollection::open(&dir, dimensions)?;

    let meta = CollectionMeta {
        provider: embedding.provider.to_string(),
        model: embedding.model.clone(),
        dimensions,
    };
    std::fs::write(&meta_path, serde_json::to_string_pretty(&meta)?)?;

    Ok((Arc::new(collection), reset))
}

/// Remove a collection directory, tolerating its absence.
pub fn delete_collection(store: &Path, name: &str) -> Result<()> {
    let dir = collection_dir(store, name);
    if dir.exists() {
        std::fs::remove_dir_all(&dir)?;
    }
    Ok(())
}
