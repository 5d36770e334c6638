use anyhow::{anyhow, Result};
use arroy::distances::Cosine;
use arroy::{Database as ArroyDatabase, Reader, Writer};
use heed::byteorder::BigEndian;
use heed::types::*;
use heed::{Database, EnvOpenOptions};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use tracing::{debug, warn};

use crate::chunker::Chunk;

/// Chunk record as persisted in the collection, carrying its arroy item id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredChunk {
    pub item_id: u32,
    pub chunk: Chunk,
}

/// An ANN hit with its raw distance.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk: Chunk,
    pub distance: f32,
}

/// One persistent embedding collection: an LMDB environment holding an arroy
/// vector index plus chunk metadata keyed by content-addressed chunk id.
///
/// Upserts are idempotent: a chunk id that already exists keeps its arroy
/// item id, so re-writing unchanged content replaces the vector in place
/// (last writer wins).
pub struct VectorCollection {
    env: heed::Env,
    vectors: ArroyDatabase<Cosine>,
    chunks: Database<Str, SerdeBincode<StoredChunk>>,
    items: Database<U32<BigEndian>, Str>,
    next_id: AtomicU32,
    dimensions: usize,
}

impl VectorCollection {
    /// Open or create a collection at `dir` (LMDB expects a directory).
    pub fn open(dir: &Path, dimensions: usize) -> Result<Self> {
        std::fs::create_dir_all(dir)?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(1024 * 1024 * 1024) // 1GB max
                .max_dbs(3)
                .open(dir)?
        };

        let mut wtxn = env.write_txn()?;
        let vectors: ArroyDatabase<Cosine> = env.create_database(&mut wtxn, Some("vectors"))?;
        let chunks: Database<Str, SerdeBincode<StoredChunk>> =
            env.create_database(&mut wtxn, Some("chunks"))?;
        let items: Database<U32<BigEndian>, Str> = env.create_database(&mut wtxn, Some("items"))?;

        // Item ids are append-only; deletions leave holes, so resume past
        // the highest id ever assigned rather than the record count.
        let next_id = items.last(&wtxn)?.map(|(id, _)| id + 1).unwrap_or(0);
        wtxn.commit()?;

        debug!("opened collection at {} (next_id: {next_id})", dir.display());

        Ok(Self {
            env,
            vectors,
            chunks,
            items,
            next_id: AtomicU32::new(next_id),
            dimensions,
        })
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Upsert chunks with their embeddings in a single transaction.
    pub fn upsert(&self, chunks: &[Chunk], embeddings: &[Vec<f32>]) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }
        if chunks.len() != embeddings.len() {
            return Err(anyhow!(
                "chunk/embedding count mismatch: {} vs {}",
                chunks.len(),
                embeddings.len()
            ));
        }

        let mut wtxn = self.env.write_txn()?;
        let writer = Writer::new(self.vectors, 0, self.dimensions);

        for (chunk, embedding) in chunks.iter().zip(embeddings) {
            if embedding.len() != self.dimensions {
                return Err(anyhow!(
                    "embedding dimension mismatch: expected {}, got {}",
                    self.dimensions,
                    embedding.len()
                ));
            }

            let item_id = match self.chunks.get(&wtxn, &chunk.id)? {
                Some(existing) => existing.item_id,
                None => self.next_id.fetch_add(1, Ordering::SeqCst),
            };

            writer.add_item(&mut wtxn, item_id, embedding)?;
            let stored = StoredChunk {
                item_id,
                chunk: chunk.clone(),
            };
            self.chunks.put(&mut wtxn, &chunk.id, &stored)?;
            self.items.put(&mut wtxn, &item_id, &chunk.id)?;
        }

        wtxn.commit()?;
        Ok(chunks.len())
    }

    /// Delete chunks by id; unknown ids are ignored.
    pub fn delete(&self, ids: &[String]) -> Result<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut wtxn = self.env.write_txn()?;
        let writer = Writer::new(self.vectors, 0, self.dimensions);

        let mut deleted = 0;
        for id in ids {
            if let Some(stored) = self.chunks.get(&wtxn, id)? {
                writer.del_item(&mut wtxn, stored.item_id)?;
                self.items.delete(&mut wtxn, &stored.item_id)?;
                self.chunks.delete(&mut wtxn, id)?;
                deleted += 1;
            }
        }

        wtxn.commit()?;
        Ok(deleted)
    }

    /// (Re)build the ANN index. Must run after writes and before searches.
    pub fn build(&self) -> Result<()> {
        let mut wtxn = self.env.write_txn()?;
        let writer = Writer::new(self.vectors, 0, self.dimensions);
        let mut rng = StdRng::seed_from_u64(rand::random());
        writer.builder(&mut rng).build(&mut wtxn)?;
        wtxn.commit()?;
        Ok(())
    }

    /// ANN search. Degrades to an empty result when the collection is empty
    /// or the index is unavailable.
    pub fn search(
        &self,
        query: &[f32],
        limit: usize,
        type_filter: Option<&str>,
    ) -> Result<Vec<VectorHit>> {
        if query.len() != self.dimensions {
            return Err(anyhow!(
                "query embedding dimension mismatch: expected {}, got {}",
                self.dimensions,
                query.len()
            ));
        }
        if limit == 0 || self.count()? == 0 {
            return Ok(Vec::new());
        }

        let rtxn = self.env.read_txn()?;
        let reader = match Reader::open(&rtxn, 0, self.vectors) {
            Ok(reader) => reader,
            Err(e) => {
                warn!("vector index unavailable: {e}");
                return Ok(Vec::new());
            }
        };

        // Filtering happens on the hit metadata, so over-fetch to keep the
        // post-filter pool at the requested size.
        let fetch = if type_filter.is_some() { limit * 3 } else { limit };
        let mut query_builder = reader.nns(fetch);
        if let Some(n_trees) = NonZeroUsize::new(reader.n_trees()) {
            if let Some(search_k) = NonZeroUsize::new(fetch * n_trees.get() * 15) {
                query_builder.search_k(search_k);
            }
        }

        let mut hits = Vec::new();
        for (item_id, distance) in query_builder.by_vector(&rtxn, query)? {
            let Some(id) = self.items.get(&rtxn, &item_id)? else {
                continue;
            };
            let Some(stored) = self.chunks.get(&rtxn, id)? else {
                continue;
            };
            if let Some(filter) = type_filter {
                if stored.chunk.doc_type != filter {
                    continue;
                }
            }
            hits.push(VectorHit {
                chunk: stored.chunk,
                distance,
            });
            if hits.len() >= limit {
                break;
            }
        }

        Ok(hits)
    }

    /// Fetch a chunk by id.
    pub fn get(&self, id: &str) -> Result<Option<Chunk>> {
        let rtxn = self.env.read_txn()?;
        Ok(self.chunks.get(&rtxn, id)?.map(|stored| stored.chunk))
    }

    /// All chunk ids currently stored.
    pub fn ids(&self) -> Result<HashSet<String>> {
        let rtxn = self.env.read_txn()?;
        let mut out = HashSet::new();
        for entry in self.chunks.iter(&rtxn)? {
            let (id, _) = entry?;
            out.insert(id.to_string());
        }
        Ok(out)
    }

    /// All stored chunks, in id order.
    pub fn all_chunks(&self) -> Result<Vec<Chunk>> {
        let rtxn = self.env.read_txn()?;
        let mut out = Vec::new();
        for entry in self.chunks.iter(&rtxn)? {
            let (_, stored) = entry?;
            out.push(stored.chunk);
        }
        Ok(out)
    }

    pub fn count(&self) -> Result<usize> {
        let rtxn = self.env.read_txn()?;
        Ok(self.chunks.len(&rtxn)? as usize)
    }

    /// Chunk counts per document type.
    pub fn type_distribution(&self) -> Result<BTreeMap<String, usize>> {
        let rtxn = self.env.read_txn()?;
        let mut out = BTreeMap::new();
        for entry in self.chunks.iter(&rtxn)? {
            let (_, stored) = entry?;
            *out.entry(stored.chunk.doc_type).or_insert(0) += 1;
        }
        Ok(out)
    }

    /// Export every chunk with its stored vector (requires a built index).
    /// Used by migration promotion to copy a collection without re-embedding.
    pub fn export(&self) -> Result<Vec<(Chunk, Vec<f32>)>> {
        if self.count()? == 0 {
            return Ok(Vec::new());
        }

        let rtxn = self.env.read_txn()?;
        let reader = Reader::open(&rtxn, 0, self.vectors)?;

        let mut out = Vec::new();
        for entry in self.chunks.iter(&rtxn)? {
            let (_, stored) = entry?;
            if let Some(vector) = reader.item_vector(&rtxn, stored.item_id)? {
                out.push((stored.chunk, vector));
            }
        }
        Ok(out)
    }
}
