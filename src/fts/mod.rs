//! Tantivy-backed keyword (BM25) index.
//!
//! Rebuilt wholesale from the full chunk set on every full index pass:
//! keyword indexing is cheap relative to embedding, so there is no diffing.
//! Searches resolve to chunk ids; payloads live in the vector collection.

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tantivy::collector::TopDocs;
use tantivy::directory::MmapDirectory;
use tantivy::query::QueryParser;
use tantivy::schema::{Field, Schema, Value, STORED, STRING, TEXT};
use tantivy::{Index, IndexReader, IndexSettings, TantivyDocument};
use tracing::warn;

use crate::chunker::Chunk;

/// A keyword match: chunk id plus its raw BM25 score.
#[derive(Debug, Clone)]
pub struct KeywordHit {
    pub chunk_id: String,
    pub score: f32,
}

struct Inner {
    index: Index,
    reader: IndexReader,
    id_field: Field,
    text_field: Field,
    doc_type_field: Field,
}

/// Keyword index over one collection's chunk corpus.
pub struct KeywordIndex {
    dir: PathBuf,
    inner: RwLock<Option<Arc<Inner>>>,
}

impl KeywordIndex {
    /// Open the index at `dir` if one was persisted; otherwise start absent.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let inner = match Self::load(&dir) {
            Ok(inner) => inner,
            Err(e) => {
                warn!("could not load keyword index at {}: {e}", dir.display());
                None
            }
        };
        Self {
            dir,
            inner: RwLock::new(inner),
        }
    }

    fn load(dir: &Path) -> Result<Option<Arc<Inner>>> {
        if !dir.join("meta.json").exists() {
            return Ok(None);
        }
        let index = Index::open_in_dir(dir)?;
        let schema = index.schema();
        let id_field = schema
            .get_field("chunk_id")
            .map_err(|_| anyhow!("missing chunk_id field"))?;
        let text_field = schema
            .get_field("text")
            .map_err(|_| anyhow!("missing text field"))?;
        let doc_type_field = schema
            .get_field("doc_type")
            .map_err(|_| anyhow!("missing doc_type field"))?;
        let reader = index.reader()?;
        Ok(Some(Arc::new(Inner {
            index,
            reader,
            id_field,
            text_field,
            doc_type_field,
        })))
    }

    /// True once a persisted corpus exists.
    pub fn exists(&self) -> bool {
        self.inner.read().unwrap().is_some()
    }

    pub fn doc_count(&self) -> usize {
        match self.inner.read().unwrap().as_ref() {
            Some(inner) => inner.reader.searcher().num_docs() as usize,
            None => 0,
        }
    }

    /// Replace the whole index with a fresh one over `chunks`.
    ///
    /// An empty chunk set leaves the previous index in place.
    pub fn rebuild(&self, chunks: &[&Chunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }

        if self.dir.exists() {
            std::fs::remove_dir_all(&self.dir)?;
        }
        std::fs::create_dir_all(&self.dir)?;

        let mut schema_builder = Schema::builder();
        let id_field = schema_builder.add_text_field("chunk_id", STRING | STORED);
        let text_field = schema_builder.add_text_field("text", TEXT);
        let doc_type_field = schema_builder.add_text_field("doc_type", STRING | STORED);
        let schema = schema_builder.build();

        let mmap_dir = MmapDirectory::open(&self.dir)?;
        let index = Index::create(mmap_dir, schema, IndexSettings::default())?;

        let mut writer = index.writer(50_000_000)?;
        for chunk in chunks {
            let mut doc = TantivyDocument::new();
            doc.add_text(id_field, &chunk.id);
            doc.add_text(text_field, &chunk.text);
            doc.add_text(doc_type_field, &chunk.doc_type);
            writer.add_document(doc)?;
        }
        writer.commit()?;

        let reader = index.reader()?;
        let inner = Arc::new(Inner {
            index,
            reader,
            id_field,
            text_field,
            doc_type_field,
        });
        *self.inner.write().unwrap() = Some(inner);
        Ok(())
    }

    /// BM25 search. An absent index silently contributes nothing.
    pub fn search(
        &self,
        query: &str,
        limit: usize,
        type_filter: Option<&str>,
    ) -> Result<Vec<KeywordHit>> {
        let Some(inner) = self.inner.read().unwrap().clone() else {
            return Ok(Vec::new());
        };

        let query_parser = QueryParser::for_index(&inner.index, vec![inner.text_field]);
        let parsed = match query_parser.parse_query(query) {
            Ok(q) => q,
            Err(_) => {
                // Strip tantivy query syntax and retry as plain terms.
                let escaped = query.replace(
                    [':', '(', ')', '[', ']', '{', '}', '^', '"', '~', '*', '?', '\\', '/'],
                    " ",
                );
                match query_parser.parse_query(&escaped) {
                    Ok(q) => q,
                    Err(e) => {
                        warn!("unparseable keyword query: {e}");
                        return Ok(Vec::new());
                    }
                }
            }
        };

        let searcher = inner.reader.searcher();
        let fetch = if type_filter.is_some() { limit * 3 } else { limit };
        let top_docs = searcher.search(&parsed, &TopDocs::with_limit(fetch.max(1)))?;

        let mut hits = Vec::new();
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            let Some(chunk_id) = doc.get_first(inner.id_field).and_then(|v| v.as_str()) else {
                continue;
            };
            if let Some(filter) = type_filter {
                let doc_type = doc.get_first(inner.doc_type_field).and_then(|v| v.as_str());
                if doc_type != Some(filter) {
                    continue;
                }
            }
            hits.push(KeywordHit {
                chunk_id: chunk_id.to_string(),
                score,
            });
            if hits.len() >= limit {
                break;
            }
        }

        Ok(hits)
    }

    /// Drop the persisted index entirely.
    pub fn clear(&self) -> Result<()> {
        *self.inner.write().unwrap() = None;
        if self.dir.exists() {
            std::fs::remove_dir_all(&self.dir)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::chunk_id;
    use tempfile::tempdir;

    fn chunk(source: &str, text: &str) -> Chunk {
        Chunk {
            id: chunk_id(source, text),
            text: text.to_string(),
            source: source.to_string(),
            heading: "intro".into(),
            heading_path: String::new(),
            doc_type: crate::chunker::detect_doc_type(source).to_string(),
            char_count: text.chars().count(),
            word_count: text.split_whitespace().count(),
            line_start: 1,
            line_end: 1,
        }
    }

    #[test]
    fn rebuild_and_search() {
        let dir = tempdir().unwrap();
        let idx = KeywordIndex::open(dir.path().join("kw"));
        assert!(!idx.exists());

        let a = chunk("api/tokens.md", "token issuance endpoint with refresh semantics");
        let b = chunk("docs/cooking.md", "slow braised vegetables with garlic and thyme");
        idx.rebuild(&[&a, &b]).unwrap();
        assert!(idx.exists());
        assert_eq!(idx.doc_count(), 2);

        let hits = idx.search("refresh token", 10, None).unwrap();
        assert!(!hits.is_empty());
        assert_eq!(hits[0].chunk_id, a.id);
    }

    #[test]
    fn rebuild_replaces_previous_corpus() {
        let dir = tempdir().unwrap();
        let idx = KeywordIndex::open(dir.path().join("kw"));

        let a = chunk("a.md", "ephemeral first generation corpus entry about caching");
        idx.rebuild(&[&a]).unwrap();

        let b = chunk("b.md", "second generation corpus entry about sharding");
        idx.rebuild(&[&b]).unwrap();

        assert_eq!(idx.doc_count(), 1);
        assert!(idx.search("caching", 10, None).unwrap().is_empty());
        assert_eq!(idx.search("sharding", 10, None).unwrap()[0].chunk_id, b.id);
    }

    #[test]
    fn empty_rebuild_keeps_old_index() {
        let dir = tempdir().unwrap();
        let idx = KeywordIndex::open(dir.path().join("kw"));
        let a = chunk("a.md", "durable corpus entry that should stay searchable");
        idx.rebuild(&[&a]).unwrap();

        idx.rebuild(&[]).unwrap();
        assert_eq!(idx.doc_count(), 1);
    }

    #[test]
    fn type_filter_applies_before_truncation() {
        let dir = tempdir().unwrap();
        let idx = KeywordIndex::open(dir.path().join("kw"));

        let a = chunk("api/auth.md", "authentication token validation flow for services");
        let b = chunk("bugfix-log/fix.md", "authentication token validation regression fix");
        idx.rebuild(&[&a, &b]).unwrap();

        let hits = idx.search("authentication token", 1, Some("bugfix")).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, b.id);
    }

    #[test]
    fn absent_index_returns_nothing() {
        let dir = tempdir().unwrap();
        let idx = KeywordIndex::open(dir.path().join("kw"));
        assert!(idx.search("anything", 10, None).unwrap().is_empty());
    }

    #[test]
    fn special_characters_fall_back_to_plain_terms() {
        let dir = tempdir().unwrap();
        let idx = KeywordIndex::open(dir.path().join("kw"));
        let a = chunk("a.md", "filter expressions use key value pairs for matching");
        idx.rebuild(&[&a]).unwrap();

        let hits = idx.search("key:value [filter]", 10, None).unwrap();
        assert!(!hits.is_empty());
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("kw");
        let a = chunk("a.md", "persisted keyword corpus entry about snapshots");
        {
            let idx = KeywordIndex::open(&path);
            idx.rebuild(&[&a]).unwrap();
        }
        let idx = KeywordIndex::open(&path);
        assert!(idx.exists());
        assert_eq!(idx.search("snapshots", 10, None).unwrap()[0].chunk_id, a.id);
    }
}
