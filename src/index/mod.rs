//! Diff-aware indexing pipeline and hybrid search.
//!
//! Documents -> markdown-like text -> chunks -> {vector collection, keyword
//! index}. Only files whose content hash changed are re-embedded; the
//! keyword index is cheap and rebuilt wholesale each pass.

use anyhow::{anyhow, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tracing::{info, warn};

use crate::chunker::{Chunk, Chunker};
use crate::config::IndexConfig;
use crate::embed::{load_embedder, EmbeddingFunction};
use crate::extract::{rel_path, DocReader, DocWalker, TextExtractor};
use crate::fts::KeywordIndex;
use crate::migrate::Migration;
use crate::quality::{critical_reasons, QualityGate};
use crate::rerank::RerankerCache;
use crate::search::{finalize, normalize_keyword_relevance, rrf_fuse, Candidate, ScoredChunk};
use crate::vectordb::{self, VectorCollection};

pub const DEFAULT_COLLECTION: &str = "project_docs";

/// Upsert/delete batch size: bounds memory and keeps individual store
/// transactions reasonably sized.
pub(crate) const BATCH_SIZE: usize = 5000;

/// Why a file was left out of an index pass.
#[derive(Debug, Error)]
pub enum SkipReason {
    #[error("could not extract text")]
    Unreadable,
    #[error("critical quality issues: {reasons}")]
    QualityCritical { reasons: String, content_hash: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct QualitySkip {
    pub file: String,
    pub reason: String,
}

/// Outcome of one `index_all` pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexResult {
    pub files_indexed: usize,
    pub files_changed: usize,
    pub files_skipped: usize,
    pub files_unreadable: usize,
    pub files_quality_skipped: usize,
    pub quality_skipped: Vec<QualitySkip>,
    pub chunks_upserted: usize,
    pub chunks_total: usize,
    pub chunks_removed: usize,
    /// True when the zero-files safety valve suppressed stale deletion.
    pub stale_removal_skipped: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub total_chunks: usize,
    pub type_distribution: BTreeMap<String, usize>,
    pub embedding_provider: String,
    pub embedding_model: String,
    pub chunk_strategy: String,
}

/// The live binding a search reads from: config, embedder and both indexes.
/// Cloned as a snapshot per operation; replaced as a whole under the index
/// lock, so an in-flight search finishes against whatever was bound when it
/// started.
#[derive(Clone)]
pub(crate) struct SearchState {
    pub config: Arc<IndexConfig>,
    pub embedder: Arc<dyn EmbeddingFunction>,
    pub vector: Arc<VectorCollection>,
    pub keyword: Arc<KeywordIndex>,
}

/// Shared indexing and retrieval engine for one document collection.
pub struct DocsIndexer {
    collection_name: String,
    shadow_name: String,
    pub(crate) index_lock: Arc<Mutex<()>>,
    pub(crate) state: RwLock<SearchState>,
    pub(crate) migration: Mutex<Option<Arc<Migration>>>,
    pub(crate) rerankers: Arc<RerankerCache>,
    pub(crate) extractor: Arc<dyn TextExtractor>,
    pub(crate) quality: Option<Arc<dyn QualityGate>>,
}

impl DocsIndexer {
    /// Open the default collection, loading the embedding model from config.
    pub fn new(config: IndexConfig) -> Result<Self> {
        Self::with_collection(config, DEFAULT_COLLECTION, None)
    }

    /// Open a named collection, optionally with a caller-supplied embedding
    /// function (required for remote providers).
    pub fn with_collection(
        config: IndexConfig,
        collection: &str,
        embedder: Option<Arc<dyn EmbeddingFunction>>,
    ) -> Result<Self> {
        std::fs::create_dir_all(&config.store_path)?;

        let embedder = match embedder {
            Some(embedder) => embedder,
            None => load_embedder(&config.embedding)?,
        };

        let (vector, reset) = vectordb::open_collection(
            &config.store_path,
            collection,
            &config.embedding,
            embedder.dimensions(),
        )?;
        if reset {
            // Stale hashes would mask the wipe and leave the store empty.
            let _ = std::fs::remove_file(vectordb::hashes_path(&config.store_path, collection));
        }

        // A shadow collection on disk can only be the residue of an
        // interrupted migration.
        let shadow_name = vectordb::shadow_name(collection);
        let shadow_dir = vectordb::collection_dir(&config.store_path, &shadow_name);
        if shadow_dir.exists() {
            std::fs::remove_dir_all(&shadow_dir)?;
            info!("cleaned up orphaned shadow collection '{shadow_name}'");
        }

        let keyword = Arc::new(KeywordIndex::open(vectordb::keyword_dir(
            &config.store_path,
            collection,
        )));

        Ok(Self {
            collection_name: collection.to_string(),
            shadow_name,
            index_lock: Arc::new(Mutex::new(())),
            state: RwLock::new(SearchState {
                config: Arc::new(config),
                embedder,
                vector,
                keyword,
            }),
            migration: Mutex::new(None),
            rerankers: Arc::new(RerankerCache::new()),
            extractor: Arc::new(DocReader),
            quality: None,
        })
    }

    /// Share an index lock with other writers (e.g. a sync actor).
    pub fn with_index_lock(mut self, lock: Arc<Mutex<()>>) -> Self {
        self.index_lock = lock;
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn TextExtractor>) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_quality_gate(mut self, gate: Arc<dyn QualityGate>) -> Self {
        self.quality = Some(gate);
        self
    }

    pub fn with_reranker_cache(mut self, cache: Arc<RerankerCache>) -> Self {
        self.rerankers = cache;
        self
    }

    pub fn collection_name(&self) -> &str {
        &self.collection_name
    }

    pub(crate) fn shadow_name(&self) -> &str {
        &self.shadow_name
    }

    /// The mutex serializing all structural writers for this collection.
    pub fn index_lock(&self) -> Arc<Mutex<()>> {
        Arc::clone(&self.index_lock)
    }

    /// Current configuration (the active binding's copy).
    pub fn config(&self) -> Arc<IndexConfig> {
        Arc::clone(&self.state.read().unwrap().config)
    }

    pub(crate) fn snapshot(&self) -> SearchState {
        self.state.read().unwrap().clone()
    }

    // ── Indexing ─────────────────────────────────────────

    /// Diff-aware (re-)index: only re-embeds changed or new files. Set
    /// `force` to ignore the hash cache and rebuild everything.
    pub fn index_all(&self, force: bool) -> Result<IndexResult> {
        let _guard = self.index_lock.lock().unwrap();
        let state = self.snapshot();
        let docs_path = state.config.docs_path.clone();

        if !docs_path.exists() {
            return Err(anyhow!("docs path does not exist: {}", docs_path.display()));
        }

        let existing_ids = state.vector.ids().unwrap_or_default();

        let mut force = force;
        if !force && existing_ids.is_empty() {
            // A fresh or restored store must never be left under-populated
            // by a stale hash cache.
            info!("collection empty, forcing full re-index");
            force = true;
        }

        let old_hashes = if force {
            HashMap::new()
        } else {
            self.load_file_hashes(&state)
        };
        let mut new_hashes: HashMap<String, String> = HashMap::new();

        let chunker = Chunker::from_config(&state.config.chunking);
        let mut all_chunks: Vec<Chunk> = Vec::new();
        let mut changed_chunks: Vec<Chunk> = Vec::new();
        let mut result = IndexResult::default();

        for path in DocWalker::new(&docs_path).walk() {
            let rel = rel_path(&docs_path, &path);
            match self.process_file(&chunker, &path, &rel) {
                Ok((hash, chunks)) => {
                    let unchanged = old_hashes.get(&rel) == Some(&hash);
                    new_hashes.insert(rel, hash);
                    all_chunks.extend_from_slice(&chunks);
                    result.files_indexed += 1;
                    if unchanged {
                        result.files_skipped += 1;
                    } else {
                        changed_chunks.extend(chunks);
                    }
                }
                Err(SkipReason::Unreadable) => {
                    result.files_unreadable += 1;
                }
                Err(SkipReason::QualityCritical {
                    reasons,
                    content_hash,
                }) => {
                    warn!("quality gate: skipping {rel} ({reasons})");
                    new_hashes.insert(rel.clone(), content_hash);
                    result.quality_skipped.push(QualitySkip {
                        file: rel,
                        reason: reasons,
                    });
                }
            }
        }
        result.files_changed = result.files_indexed - result.files_skipped;
        result.files_quality_skipped = result.quality_skipped.len();

        // A chunking pass may legitimately emit an id twice; last wins.
        let mut deduped_all: HashMap<String, Chunk> = HashMap::new();
        for chunk in all_chunks {
            deduped_all.insert(chunk.id.clone(), chunk);
        }
        let new_ids: HashSet<String> = deduped_all.keys().cloned().collect();

        let mut deduped_changed: HashMap<String, Chunk> = HashMap::new();
        for chunk in changed_chunks {
            deduped_changed.insert(chunk.id.clone(), chunk);
        }
        let upserts: Vec<Chunk> = deduped_changed.into_values().collect();

        upsert_chunks(&state.vector, state.embedder.as_ref(), &upserts)?;
        result.chunks_upserted = upserts.len();
        result.chunks_total = deduped_all.len();

        // Remove chunks of deleted/renamed files, unless zero files were
        // found while the store is non-empty: that pattern is a missing
        // mount or a clone that has not landed yet, not an emptied corpus.
        let mut stale: Vec<String> = existing_ids.difference(&new_ids).cloned().collect();
        if !stale.is_empty() && result.files_indexed == 0 {
            warn!(
                "safety: 0 files on disk but {} chunks in store, skipping stale removal",
                existing_ids.len()
            );
            result.stale_removal_skipped = true;
            stale.clear();
        }
        if !stale.is_empty() {
            stale.sort();
            for batch in stale.chunks(BATCH_SIZE) {
                state.vector.delete(batch)?;
            }
            result.chunks_removed = stale.len();
        }

        if result.chunks_upserted > 0 || result.chunks_removed > 0 {
            state.vector.build()?;
        }

        // Commit the hash cache only when the store's observed count is
        // consistent with what was just written; otherwise leave the old
        // cache so the next run re-embeds instead of silently under-indexing.
        let actual = state.vector.count().unwrap_or(0);
        let expected = deduped_all.len().saturating_sub(result.chunks_removed);
        if actual > 0 || expected == 0 {
            self.save_file_hashes(&state, &new_hashes)?;
        } else {
            warn!(
                "store count={actual} but expected ~{expected}, not saving hash cache \
                 (will re-embed on next run)"
            );
        }

        let corpus: Vec<&Chunk> = deduped_all.values().collect();
        state.keyword.rebuild(&corpus)?;

        info!(
            "index: {} files ({} changed, {} skipped) -> {} chunks upserted ({} stale removed)",
            result.files_indexed,
            result.files_changed,
            result.files_skipped,
            result.chunks_upserted,
            result.chunks_removed
        );
        Ok(result)
    }

    /// Chunk and upsert a single document. The keyword index catches up on
    /// the next full pass.
    pub fn index_single(&self, filepath: &str, content: &str) -> Result<usize> {
        let _guard = self.index_lock.lock().unwrap();
        let state = self.snapshot();

        let chunker = Chunker::from_config(&state.config.chunking);
        let chunks = chunker.chunk(content, filepath);
        if chunks.is_empty() {
            return Ok(0);
        }

        upsert_chunks(&state.vector, state.embedder.as_ref(), &chunks)?;
        state.vector.build()?;
        Ok(chunks.len())
    }

    /// Drop all indexed data for this collection; the next `index_all`
    /// rebuilds from scratch.
    pub fn clear_index(&self) -> Result<()> {
        let _guard = self.index_lock.lock().unwrap();
        let state = self.snapshot();
        let store = state.config.store_path.clone();

        vectordb::delete_collection(&store, &self.collection_name)?;
        let (vector, _) = vectordb::open_collection(
            &store,
            &self.collection_name,
            &state.config.embedding,
            state.embedder.dimensions(),
        )?;
        let _ = std::fs::remove_file(vectordb::hashes_path(&store, &self.collection_name));
        state.keyword.clear()?;

        self.state.write().unwrap().vector = vector;
        Ok(())
    }

    /// Extract, quality-gate and chunk one document.
    pub(crate) fn process_file(
        &self,
        chunker: &Chunker,
        path: &Path,
        rel: &str,
    ) -> Result<(String, Vec<Chunk>), SkipReason> {
        let content = self.extractor.extract(path).ok_or(SkipReason::Unreadable)?;
        let hash = content_hash(&content);

        // The gate only covers authored markdown; converted formats index
        // unconditionally.
        if let Some(gate) = &self.quality {
            let is_md = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.eq_ignore_ascii_case("md"))
                .unwrap_or(false);
            if is_md {
                if let Some(reasons) = critical_reasons(&gate.check(path, rel)) {
                    return Err(SkipReason::QualityCritical {
                        reasons,
                        content_hash: hash,
                    });
                }
            }
        }

        Ok((hash, chunker.chunk(&content, rel)))
    }

    // ── Search ───────────────────────────────────────────

    /// Hybrid search. Best-effort: an empty collection, blank query, or a
    /// failing backend yields an empty result, never an error.
    pub fn search(&self, query: &str, top_k: usize, type_filter: Option<&str>) -> Vec<ScoredChunk> {
        if query.trim().is_empty() || top_k == 0 {
            return Vec::new();
        }

        let state = self.snapshot();
        let cfg = &state.config.search;
        let use_rerank = cfg.reranker_enabled;
        let fetch_k = if use_rerank { top_k * 5 } else { top_k };

        let vector_hits: Vec<Candidate> = match state.embedder.embed(&[query.to_string()]) {
            Ok(mut embeddings) if !embeddings.is_empty() => {
                let query_embedding = embeddings.remove(0);
                match state.vector.search(&query_embedding, fetch_k, type_filter) {
                    Ok(hits) => hits
                        .into_iter()
                        .map(|h| Candidate::vector(h.chunk, h.distance))
                        .collect(),
                    Err(e) => {
                        warn!("vector search error: {e}");
                        Vec::new()
                    }
                }
            }
            Ok(_) => Vec::new(),
            Err(e) => {
                warn!("query embedding failed: {e}");
                Vec::new()
            }
        };

        let mut keyword_hits: Vec<Candidate> = Vec::new();
        if cfg.hybrid && state.keyword.exists() {
            match state.keyword.search(query, fetch_k, type_filter) {
                Ok(hits) => {
                    for hit in hits {
                        match state.vector.get(&hit.chunk_id) {
                            Ok(Some(chunk)) => {
                                keyword_hits.push(Candidate::keyword(chunk, hit.score))
                            }
                            Ok(None) => {}
                            Err(e) => warn!("keyword hit lookup failed: {e}"),
                        }
                    }
                }
                Err(e) => warn!("keyword search error: {e}"),
            }
        }
        normalize_keyword_relevance(&mut keyword_hits);

        let mut merged = if keyword_hits.is_empty() {
            vector_hits
        } else {
            let pool = if use_rerank { top_k * 4 } else { top_k };
            rrf_fuse(
                vector_hits,
                keyword_hits,
                pool,
                cfg.rrf_k,
                cfg.vector_weight,
                cfg.keyword_weight,
            )
        };

        if use_rerank && merged.len() > 1 {
            if let Some(reranker) = self.rerankers.get(&cfg.reranker_model) {
                let documents: Vec<&str> = merged.iter().map(|c| c.chunk.text.as_str()).collect();
                match reranker.score(query, &documents) {
                    Ok(scores) => {
                        for (candidate, score) in merged.iter_mut().zip(&scores) {
                            candidate.rerank_score = Some(*score);
                        }
                        merged.sort_by(|a, b| {
                            b.rerank_score
                                .partial_cmp(&a.rerank_score)
                                .unwrap_or(std::cmp::Ordering::Equal)
                        });
                    }
                    Err(e) => warn!("reranker error: {e}"),
                }
            }
        }
        merged.truncate(top_k);

        finalize(merged, cfg.min_relevance)
    }

    /// Collection statistics. Best-effort, like search.
    pub fn stats(&self) -> IndexStats {
        let state = self.snapshot();
        IndexStats {
            total_chunks: state.vector.count().unwrap_or(0),
            type_distribution: state.vector.type_distribution().unwrap_or_default(),
            embedding_provider: state.config.embedding.provider.to_string(),
            embedding_model: state.config.embedding.model.clone(),
            chunk_strategy: state.config.chunking.strategy.to_string(),
        }
    }

    // ── File hash tracking (for diff-aware reindex) ──────

    fn load_file_hashes(&self, state: &SearchState) -> HashMap<String, String> {
        let path = vectordb::hashes_path(&state.config.store_path, &self.collection_name);
        std::fs::read_to_string(&path)
            .ok()
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    fn save_file_hashes(&self, state: &SearchState, hashes: &HashMap<String, String>) -> Result<()> {
        let path = vectordb::hashes_path(&state.config.store_path, &self.collection_name);
        std::fs::write(path, serde_json::to_string(hashes)?)?;
        Ok(())
    }
}

/// Embed and upsert chunks into a collection in fixed-size batches. A
/// failure mid-run leaves already-written batches persisted.
pub(crate) fn upsert_chunks(
    vector: &VectorCollection,
    embedder: &dyn EmbeddingFunction,
    chunks: &[Chunk],
) -> Result<usize> {
    for batch in chunks.chunks(BATCH_SIZE) {
        let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
        let embeddings = embedder.embed(&texts)?;
        vector.upsert(batch, &embeddings)?;
    }
    Ok(chunks.len())
}

pub(crate) fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{HashEmbedder, RejectFiles};
    use std::fs;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn write_docs(root: &Path) {
        for dir in ["architecture", "api", "bugfix-log"] {
            fs::create_dir_all(root.join(dir)).unwrap();
        }
        fs::write(
            root.join("architecture/design.md"),
            "# Service Layout\n\n\
             ## Overview\n\
             The platform splits into an ingestion tier and a query tier, each \
             deployable independently and scaled on separate schedules.\n\n\
             ## Decisions\n\
             Ingestion owns all writes so the query tier can stay read-only and \
             cache aggressively without invalidation storms.\n",
        )
        .unwrap();
        fs::write(
            root.join("api/tokens.md"),
            "# Token API\n\n\
             ## Issuing\n\
             Clients obtain signed bearer tokens from the issuing endpoint and \
             refresh them before the advertised expiry window closes.\n",
        )
        .unwrap();
        fs::write(
            root.join("bugfix-log/2026-02-11-retry.md"),
            "# Retry storm fix\n\n\
             ## Root Cause\n\
             The sync worker retried failed pushes without backoff, hammering \
             the upstream remote until it rate-limited the whole fleet.\n\n\
             ## Solution\n\
             Exponential backoff with jitter, capped at five minutes.\n",
        )
        .unwrap();
    }

    fn test_config(tmp: &Path) -> IndexConfig {
        let mut cfg = IndexConfig::default();
        cfg.docs_path = tmp.join("docs");
        cfg.store_path = tmp.join("store");
        cfg
    }

    fn test_indexer(tmp: &Path) -> DocsIndexer {
        DocsIndexer::with_collection(
            test_config(tmp),
            DEFAULT_COLLECTION,
            Some(Arc::new(HashEmbedder::new(16))),
        )
        .unwrap()
    }

    #[test]
    fn repeat_index_upserts_nothing() {
        let tmp = tempdir().unwrap();
        write_docs(&tmp.path().join("docs"));
        let indexer = test_indexer(tmp.path());

        let first = indexer.index_all(false).unwrap();
        assert_eq!(first.files_indexed, 3);
        assert!(first.chunks_upserted > 0);
        assert_eq!(first.chunks_upserted, first.chunks_total);

        let second = indexer.index_all(false).unwrap();
        assert_eq!(second.chunks_upserted, 0);
        assert_eq!(second.chunks_removed, 0);
        assert_eq!(second.files_skipped, second.files_indexed);
    }

    #[test]
    fn changed_file_is_reembedded_alone() {
        let tmp = tempdir().unwrap();
        let docs = tmp.path().join("docs");
        write_docs(&docs);
        let indexer = test_indexer(tmp.path());
        indexer.index_all(false).unwrap();

        fs::write(
            docs.join("api/tokens.md"),
            "# Token API\n\n\
             ## Issuing\n\
             Clients obtain signed bearer tokens from the issuing endpoint and \
             refresh them before the advertised expiry window closes.\n\n\
             ## Revocation\n\
             Tokens can be revoked early through the administrative endpoint, \
             which fans the tombstone out to every edge cache.\n",
        )
        .unwrap();

        let result = indexer.index_all(false).unwrap();
        assert_eq!(result.files_changed, 1);
        assert_eq!(result.files_skipped, 2);
        assert!(result.chunks_upserted > 0);
        // The unchanged section of the rewritten file keeps its id, so the
        // only removed chunk would be one whose text actually changed.
        assert!(result.chunks_upserted <= result.chunks_total);
    }

    #[test]
    fn deleting_a_file_removes_exactly_its_chunks() {
        let tmp = tempdir().unwrap();
        let docs = tmp.path().join("docs");
        write_docs(&docs);
        let indexer = test_indexer(tmp.path());
        let first = indexer.index_all(false).unwrap();

        fs::remove_file(docs.join("bugfix-log/2026-02-11-retry.md")).unwrap();
        let second = indexer.index_all(false).unwrap();

        assert!(second.chunks_removed > 0);
        assert_eq!(second.chunks_total, first.chunks_total - second.chunks_removed);
        assert!(!second.stale_removal_skipped);

        let stats = indexer.stats();
        assert!(!stats.type_distribution.contains_key("bugfix"));
    }

    #[test]
    fn zero_files_safety_valve() {
        let tmp = tempdir().unwrap();
        let docs = tmp.path().join("docs");
        write_docs(&docs);
        let indexer = test_indexer(tmp.path());
        let first = indexer.index_all(false).unwrap();
        assert!(first.chunks_total > 0);

        // Simulate a mount that vanished: the directory exists but is empty.
        fs::remove_dir_all(&docs).unwrap();
        fs::create_dir_all(&docs).unwrap();

        let second = indexer.index_all(false).unwrap();
        assert_eq!(second.files_indexed, 0);
        assert_eq!(second.chunks_removed, 0);
        assert!(second.stale_removal_skipped);
        assert_eq!(indexer.stats().total_chunks, first.chunks_total);
    }

    #[test]
    fn empty_collection_ignores_stale_hash_cache() {
        let tmp = tempdir().unwrap();
        write_docs(&tmp.path().join("docs"));
        let total = {
            let indexer = test_indexer(tmp.path());
            indexer.index_all(false).unwrap().chunks_total
        };

        // The collection is wiped behind the indexer's back; the hash cache
        // still claims everything is indexed.
        fs::remove_dir_all(tmp.path().join("store").join(DEFAULT_COLLECTION)).unwrap();

        let indexer = test_indexer(tmp.path());
        let result = indexer.index_all(false).unwrap();
        assert_eq!(result.chunks_upserted, total);
        assert_eq!(indexer.stats().total_chunks, total);
    }

    #[test]
    fn quality_gate_skips_without_deleting() {
        let tmp = tempdir().unwrap();
        let docs = tmp.path().join("docs");
        write_docs(&docs);

        let indexer = test_indexer(tmp.path()).with_quality_gate(Arc::new(RejectFiles(vec![
            "api/tokens.md".to_string(),
        ])));
        let result = indexer.index_all(false).unwrap();

        assert_eq!(result.files_quality_skipped, 1);
        assert_eq!(result.quality_skipped[0].file, "api/tokens.md");
        assert_eq!(result.files_indexed, 2);
        assert!(docs.join("api/tokens.md").exists());
        assert!(!indexer.stats().type_distribution.contains_key("api"));
    }

    #[test]
    fn index_single_then_search() {
        let tmp = tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("docs")).unwrap();
        let indexer = test_indexer(tmp.path());

        let n = indexer
            .index_single(
                "architecture/auth.md",
                "# Auth Architecture\n\n\
                 ## Overview\n\
                 JWT-based stateless authentication is used across all the \
                 microservices, with short-lived access tokens.\n",
            )
            .unwrap();
        assert!(n > 0);

        let results = indexer.search("JWT authentication", 3, None);
        assert!(!results.is_empty());
        assert_eq!(results[0].chunk.doc_type, "architecture");
        assert!(results[0].relevance > 0.0);
    }

    #[test]
    fn search_with_type_filter() {
        let tmp = tempdir().unwrap();
        write_docs(&tmp.path().join("docs"));
        let indexer = test_indexer(tmp.path());
        indexer.index_all(false).unwrap();

        let arch = indexer.search("tier scaling deployable", 5, Some("architecture"));
        assert!(arch.iter().all(|r| r.chunk.doc_type == "architecture"));

        let bugs = indexer.search("retry backoff", 5, Some("bugfix"));
        assert!(!bugs.is_empty());
        assert!(bugs.iter().all(|r| r.chunk.doc_type == "bugfix"));
    }

    #[test]
    fn search_empty_index_returns_nothing() {
        let tmp = tempdir().unwrap();
        fs::create_dir_all(tmp.path().join("docs")).unwrap();
        let indexer = test_indexer(tmp.path());
        assert!(indexer.search("anything", 5, None).is_empty());
        assert!(indexer.search("", 5, None).is_empty());
    }

    #[test]
    fn min_relevance_filters_unrelated_hits() {
        let tmp = tempdir().unwrap();
        write_docs(&tmp.path().join("docs"));
        let mut cfg = test_config(tmp.path());
        cfg.search.min_relevance = 99.9;
        let indexer = DocsIndexer::with_collection(
            cfg,
            DEFAULT_COLLECTION,
            Some(Arc::new(HashEmbedder::new(16))),
        )
        .unwrap();
        indexer.index_all(false).unwrap();

        let results = indexer.search("unrelated walrus tuba parade", 3, None);
        assert!(results.is_empty());
    }

    #[test]
    fn clear_index_drops_everything() {
        let tmp = tempdir().unwrap();
        write_docs(&tmp.path().join("docs"));
        let indexer = test_indexer(tmp.path());
        indexer.index_all(false).unwrap();
        assert!(indexer.stats().total_chunks > 0);

        indexer.clear_index().unwrap();
        assert_eq!(indexer.stats().total_chunks, 0);
        assert!(indexer.search("token", 5, None).is_empty());
        assert!(!vectordb::hashes_path(&tmp.path().join("store"), DEFAULT_COLLECTION).exists());

        // And a fresh pass repopulates.
        let result = indexer.index_all(false).unwrap();
        assert!(result.chunks_upserted > 0);
    }

    #[test]
    fn stats_reflects_the_corpus() {
        let tmp = tempdir().unwrap();
        write_docs(&tmp.path().join("docs"));
        let indexer = test_indexer(tmp.path());
        indexer.index_all(false).unwrap();

        let stats = indexer.stats();
        assert!(stats.total_chunks > 0);
        assert_eq!(stats.embedding_model, "all-MiniLM-L6-v2");
        assert_eq!(stats.chunk_strategy, "heading");
        assert!(stats.type_distribution.contains_key("architecture"));
        assert!(stats.type_distribution.contains_key("api"));
        assert!(stats.type_distribution.contains_key("bugfix"));
    }

    #[test]
    fn end_to_end_delete_and_requery() {
        let tmp = tempdir().unwrap();
        let docs = tmp.path().join("docs");
        write_docs(&docs);
        let indexer = test_indexer(tmp.path());
        indexer.index_all(false).unwrap();

        // The topic lives only in the token API file.
        let results = indexer.search("bearer tokens expiry refresh", 3, None);
        assert!(!results.is_empty());
        assert_eq!(results[0].chunk.source, "api/tokens.md");

        fs::remove_file(docs.join("api/tokens.md")).unwrap();
        let reindex = indexer.index_all(false).unwrap();
        assert!(reindex.chunks_removed > 0);

        let results = indexer.search("bearer tokens expiry refresh", 3, None);
        assert!(results.iter().all(|r| r.chunk.source != "api/tokens.md"));
    }

    #[test]
    fn nested_repo_is_not_indexed() {
        let tmp = tempdir().unwrap();
        let docs = tmp.path().join("docs");
        write_docs(&docs);
        let nested = docs.join("vendored");
        fs::create_dir_all(nested.join(".git")).unwrap();
        fs::write(
            nested.join("README.md"),
            "# Vendored\n\nThis vendored project documentation must never be \
             indexed into the parent knowledge base.\n",
        )
        .unwrap();

        let indexer = test_indexer(tmp.path());
        let result = indexer.index_all(false).unwrap();
        assert_eq!(result.files_indexed, 3);

        let all = indexer.snapshot().vector.all_chunks().unwrap();
        assert!(all.iter().all(|c| !c.source.starts_with("vendored")));
    }

    #[test]
    fn rerank_pass_reorders_with_injected_model() {
        use crate::rerank::{Reranker, RerankerCache};

        struct FavourBugfix;
        impl Reranker for FavourBugfix {
            fn score(&self, _q: &str, docs: &[&str]) -> anyhow::Result<Vec<f32>> {
                Ok(docs
                    .iter()
                    .map(|d| if d.contains("backoff") { 0.95 } else { 0.05 })
                    .collect())
            }
        }

        let tmp = tempdir().unwrap();
        write_docs(&tmp.path().join("docs"));
        let mut cfg = test_config(tmp.path());
        cfg.search.reranker_enabled = true;
        cfg.search.reranker_model = "stub".to_string();

        let cache = Arc::new(RerankerCache::new());
        cache.insert("stub", Arc::new(FavourBugfix));

        let indexer = DocsIndexer::with_collection(
            cfg,
            DEFAULT_COLLECTION,
            Some(Arc::new(HashEmbedder::new(16))),
        )
        .unwrap()
        .with_reranker_cache(cache);
        indexer.index_all(false).unwrap();

        let results = indexer.search("worker retried failed pushes", 2, None);
        assert!(!results.is_empty());
        assert!(results[0].chunk.text.contains("backoff"));
        assert_eq!(results[0].relevance, 95.0);
    }

    #[test]
    fn unreadable_files_are_counted_not_fatal() {
        let tmp = tempdir().unwrap();
        let docs = tmp.path().join("docs");
        write_docs(&docs);
        // Invalid UTF-8 defeats the built-in reader.
        fs::write(docs.join("broken.md"), [0xff, 0xfe, 0x00, 0x41]).unwrap();

        let indexer = test_indexer(tmp.path());
        let result = indexer.index_all(false).unwrap();
        assert_eq!(result.files_unreadable, 1);
        assert_eq!(result.files_indexed, 3);
    }

    #[test]
    fn hash_cache_persists_between_instances() {
        let tmp = tempdir().unwrap();
        write_docs(&tmp.path().join("docs"));
        {
            let indexer = test_indexer(tmp.path());
            indexer.index_all(false).unwrap();
        }
        let indexer = test_indexer(tmp.path());
        let result = indexer.index_all(false).unwrap();
        assert_eq!(result.chunks_upserted, 0);
        assert_eq!(result.files_skipped, result.files_indexed);
    }

    #[test]
    fn docs_path_must_exist() {
        let tmp = tempdir().unwrap();
        let mut cfg = test_config(tmp.path());
        cfg.docs_path = PathBuf::from(tmp.path().join("missing"));
        let indexer = DocsIndexer::with_collection(
            cfg,
            DEFAULT_COLLECTION,
            Some(Arc::new(HashEmbedder::new(16))),
        )
        .unwrap();
        assert!(indexer.index_all(false).is_err());
    }
}
