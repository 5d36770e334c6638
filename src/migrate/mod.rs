//! Embedding-model hot-swap (background migration).
//!
//! The primary collection keeps serving searches while a shadow collection
//! is rebuilt under the new embedding function; promotion happens atomically
//! under the index lock. Cancellation is cooperative, checked once per
//! document.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{info, warn};

use crate::chunker::{Chunk, Chunker};
use crate::config::IndexConfig;
use crate::embed::{load_embedder, EmbeddingFunction};
use crate::extract::{rel_path, DocWalker};
use crate::index::{upsert_chunks, DocsIndexer, SkipReason, BATCH_SIZE};
use crate::vectordb;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationStatus {
    Running,
    Complete,
    Failed,
    Cancelled,
}

impl fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Complete => write!(f, "complete"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("migration already in progress")]
    AlreadyRunning,
    #[error("no active migration to cancel")]
    NoActiveMigration,
    #[error("failed to spawn migration worker: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Outcome of `start_model_swap`.
#[derive(Debug, Clone)]
pub enum SwapStart {
    Started(MigrationReport),
    /// Old and new identity are equal; nothing to do.
    Skipped,
}

struct Terminal {
    status: MigrationStatus,
    finished_at: Option<DateTime<Utc>>,
    error: Option<String>,
}

/// Live state of one migration attempt. Counters are updated by the worker
/// thread and read by pollers.
pub struct Migration {
    pub id: String,
    pub old_model: String,
    pub new_model: String,
    pub total_files: usize,
    started_at: DateTime<Utc>,
    files_done: AtomicUsize,
    chunks_created: AtomicUsize,
    terminal: Mutex<Terminal>,
}

impl Migration {
    fn new(old_model: String, new_model: String, total_files: usize) -> Self {
        let id = uuid::Uuid::new_v4().simple().to_string()[..12].to_string();
        Self {
            id,
            old_model,
            new_model,
            total_files,
            started_at: Utc::now(),
            files_done: AtomicUsize::new(0),
            chunks_created: AtomicUsize::new(0),
            terminal: Mutex::new(Terminal {
                status: MigrationStatus::Running,
                finished_at: None,
                error: None,
            }),
        }
    }

    pub fn status(&self) -> MigrationStatus {
        self.terminal.lock().unwrap().status
    }

    fn is_cancelled(&self) -> bool {
        self.status() == MigrationStatus::Cancelled
    }

    fn cancel(&self) {
        let mut terminal = self.terminal.lock().unwrap();
        if terminal.status == MigrationStatus::Running {
            terminal.status = MigrationStatus::Cancelled;
        }
    }

    fn finish(&self, status: MigrationStatus, error: Option<String>) {
        let mut terminal = self.terminal.lock().unwrap();
        if terminal.status == MigrationStatus::Running {
            terminal.status = status;
        }
        terminal.finished_at = Some(Utc::now());
        if error.is_some() {
            terminal.error = error;
        }
    }

    fn file_done(&self) {
        self.files_done.fetch_add(1, Ordering::Relaxed);
    }

    fn add_chunks(&self, n: usize) {
        self.chunks_created.fetch_add(n, Ordering::Relaxed);
    }

    pub fn report(&self) -> MigrationReport {
        let terminal = self.terminal.lock().unwrap();
        let files_done = self.files_done.load(Ordering::Relaxed);
        let percent = if self.total_files > 0 {
            ((files_done as f64 / self.total_files as f64) * 100.0).round() as u8
        } else {
            0
        };
        MigrationReport {
            id: self.id.clone(),
            status: terminal.status,
            old_model: self.old_model.clone(),
            new_model: self.new_model.clone(),
            total_files: self.total_files,
            files_done,
            chunks_created: self.chunks_created.load(Ordering::Relaxed),
            started_at: self.started_at,
            finished_at: terminal.finished_at,
            error: terminal.error.clone(),
            percent,
        }
    }
}

/// Point-in-time snapshot of a migration, safe to serialize and hand out.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub id: String,
    pub status: MigrationStatus,
    pub old_model: String,
    pub new_model: String,
    pub total_files: usize,
    pub files_done: usize,
    pub chunks_created: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub percent: u8,
}

impl DocsIndexer {
    /// Start a background migration to a new embedding model.
    ///
    /// The old collection keeps serving searches until the shadow is ready,
    /// then they are atomically swapped. Pass `new_embedder` to share an
    /// already-loaded embedding function (required for remote providers).
    pub fn start_model_swap(
        self: &Arc<Self>,
        new_config: IndexConfig,
        new_embedder: Option<Arc<dyn EmbeddingFunction>>,
    ) -> Result<SwapStart, MigrationError> {
        let state = self.snapshot();

        let mut slot = self.migration.lock().unwrap();
        if let Some(running) = slot.as_ref() {
            if running.status() == MigrationStatus::Running {
                return Err(MigrationError::AlreadyRunning);
            }
        }

        if state.config.embedding.same_identity(&new_config.embedding) {
            return Ok(SwapStart::Skipped);
        }

        let doc_files = if new_config.docs_path.exists() {
            DocWalker::new(&new_config.docs_path).walk()
        } else {
            Vec::new()
        };

        let migration = Arc::new(Migration::new(
            state.config.embedding.model.clone(),
            new_config.embedding.model.clone(),
            doc_files.len(),
        ));
        *slot = Some(Arc::clone(&migration));
        drop(slot);

        let this = Arc::clone(self);
        let worker_migration = Arc::clone(&migration);
        let new_config = Arc::new(new_config);
        std::thread::Builder::new()
            .name(format!("migration-{}", self.collection_name()))
            .spawn(move || {
                run_migration(this, worker_migration, new_config, new_embedder, doc_files)
            })?;

        Ok(SwapStart::Started(migration.report()))
    }

    /// Request cancellation of the running migration. The worker observes
    /// the flag at its next per-document check.
    pub fn cancel_migration(&self) -> Result<MigrationReport, MigrationError> {
        let slot = self.migration.lock().unwrap();
        match slot.as_ref() {
            Some(migration) if migration.status() == MigrationStatus::Running => {
                migration.cancel();
                Ok(migration.report())
            }
            _ => Err(MigrationError::NoActiveMigration),
        }
    }

    /// Latest migration state, if any migration was started this process.
    pub fn migration_status(&self) -> Option<MigrationReport> {
        self.migration.lock().unwrap().as_ref().map(|m| m.report())
    }
}

fn run_migration(
    indexer: Arc<DocsIndexer>,
    migration: Arc<Migration>,
    new_config: Arc<IndexConfig>,
    new_embedder: Option<Arc<dyn EmbeddingFunction>>,
    doc_files: Vec<std::path::PathBuf>,
) {
    let store = indexer.snapshot().config.store_path.clone();
    let shadow_name = indexer.shadow_name().to_string();

    if let Err(e) = migration_worker(&indexer, &migration, &new_config, new_embedder, doc_files) {
        warn!("migration {} failed: {e}", migration.id);
        migration.finish(MigrationStatus::Failed, Some(e.to_string()));
        if let Err(cleanup) = vectordb::delete_collection(&store, &shadow_name) {
            warn!("could not remove shadow collection: {cleanup}");
        }
    }
}

fn migration_worker(
    indexer: &Arc<DocsIndexer>,
    migration: &Arc<Migration>,
    new_config: &Arc<IndexConfig>,
    new_embedder: Option<Arc<dyn EmbeddingFunction>>,
    doc_files: Vec<std::path::PathBuf>,
) -> Result<()> {
    let embedder = match new_embedder {
        Some(embedder) => embedder,
        None => load_embedder(&new_config.embedding)?,
    };

    let store = indexer.snapshot().config.store_path.clone();
    let shadow_name = indexer.shadow_name().to_string();
    let docs_path = new_config.docs_path.clone();

    // Purge any pre-existing leftover before rebuilding.
    vectordb::delete_collection(&store, &shadow_name)?;
    let (shadow, _) = vectordb::open_collection(
        &store,
        &shadow_name,
        &new_config.embedding,
        embedder.dimensions(),
    )?;

    let chunker = Chunker::from_config(&new_config.chunking);
    for doc_file in &doc_files {
        if migration.is_cancelled() {
            break;
        }
        let rel = rel_path(&docs_path, doc_file);
        match indexer.process_file(&chunker, doc_file, &rel) {
            Ok((_, chunks)) => {
                if !chunks.is_empty() {
                    match upsert_chunks(&shadow, embedder.as_ref(), &chunks) {
                        Ok(n) => migration.add_chunks(n),
                        Err(e) => warn!("migration: error processing {rel}: {e}"),
                    }
                }
            }
            Err(SkipReason::Unreadable) | Err(SkipReason::QualityCritical { .. }) => {}
        }
        migration.file_done();
    }

    if migration.is_cancelled() {
        drop(shadow);
        vectordb::delete_collection(&store, &shadow_name)?;
        migration.finish(MigrationStatus::Cancelled, None);
        info!("migration {} cancelled, primary untouched", migration.id);
        return Ok(());
    }

    shadow.build()?;

    // Atomic promotion: mutually exclusive with index_all and friends.
    {
        let _guard = indexer.index_lock.lock().unwrap();

        let exported = shadow.export()?;

        vectordb::delete_collection(&store, indexer.collection_name())?;
        let (primary, _) = vectordb::open_collection(
            &store,
            indexer.collection_name(),
            &new_config.embedding,
            embedder.dimensions(),
        )?;

        // The shadow already holds vectors in the new space; copy them over
        // instead of embedding a third time.
        for batch in exported.chunks(BATCH_SIZE) {
            let (chunks, vectors): (Vec<Chunk>, Vec<Vec<f32>>) = batch.iter().cloned().unzip();
            primary.upsert(&chunks, &vectors)?;
        }
        if !exported.is_empty() {
            primary.build()?;
        }

        drop(shadow);
        vectordb::delete_collection(&store, &shadow_name)?;

        // Chunk identity does not depend on the embedding, so the hash cache
        // would claim everything is current; drop it so the next index_all
        // rehashes under the new model.
        let _ = std::fs::remove_file(vectordb::hashes_path(&store, indexer.collection_name()));

        let mut state = indexer.state.write().unwrap();
        state.config = Arc::new((**new_config).clone());
        state.embedder = embedder;
        state.vector = primary;
    }

    migration.finish(MigrationStatus::Complete, None);
    info!(
        "migration {} complete: {} files, {} chunks under '{}'",
        migration.id,
        migration.files_done.load(Ordering::Relaxed),
        migration.chunks_created.load(Ordering::Relaxed),
        migration.new_model
    );
    Ok(())
}
