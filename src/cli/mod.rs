use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use docdex::config::{ChunkStrategy, IndexConfig};
use docdex::embed::local_model_ids;
use docdex::index::DocsIndexer;
use docdex::migrate::{MigrationStatus, SwapStart};

/// Local hybrid search index for project documentation
#[derive(Parser, Debug)]
#[command(name = "docdex")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Document tree to index (defaults to ./docs)
    #[arg(long, global = true)]
    pub docs: Option<PathBuf>,

    /// Index store directory (defaults to ./.docdex)
    #[arg(long, global = true)]
    pub store: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Index the document tree (diff-aware; only changed files re-embed)
    Index {
        /// Force full re-index, ignoring the hash cache
        #[arg(short, long)]
        force: bool,

        /// Chunking strategy override (persisted for later runs)
        #[arg(long, value_enum)]
        strategy: Option<ChunkStrategy>,

        /// Output JSON for agents
        #[arg(long)]
        json: bool,
    },

    /// Search the knowledge index
    Search {
        /// Search query (e.g. "how do we rotate api tokens?")
        query: String,

        /// Maximum results to return
        #[arg(short = 'k', long, default_value = "5")]
        top_k: usize,

        /// Restrict to one document type (api, architecture, bugfix, ...)
        #[arg(long = "type")]
        doc_type: Option<String>,

        /// Output JSON for agents
        #[arg(long)]
        json: bool,
    },

    /// Show collection statistics
    Stats {
        /// Output JSON for agents
        #[arg(long)]
        json: bool,
    },

    /// Delete all indexed data for this collection
    Clear {
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },

    /// Migrate the collection to a new embedding model
    SwapModel {
        /// New local model id (see `docdex models`)
        model: String,
    },

    /// List known local embedding models
    Models,
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();

    let store = cli.store.clone().unwrap_or_else(|| PathBuf::from(".docdex"));
    let mut config = IndexConfig::load_from(&store);
    config.store_path = store.clone();
    if let Some(docs) = cli.docs {
        config.docs_path = docs;
    }

    match cli.command {
        Commands::Index {
            force,
            strategy,
            json,
        } => {
            if let Some(strategy) = strategy {
                config.chunking.strategy = strategy;
            }
            config.save_to(&store)?;
            index(config, force, json)
        }
        Commands::Search {
            query,
            top_k,
            doc_type,
            json,
        } => search(config, &query, top_k, doc_type.as_deref(), json),
        Commands::Stats { json } => stats(config, json),
        Commands::Clear { yes } => clear(config, yes),
        Commands::SwapModel { model } => swap_model(config, &model),
        Commands::Models => {
            println!("{}", "Available local embedding models:".bright_cyan());
            for id in local_model_ids() {
                println!("  {id}");
            }
            Ok(())
        }
    }
}

fn index(config: IndexConfig, force: bool, json: bool) -> Result<()> {
    let docs = config.docs_path.clone();
    let indexer = DocsIndexer::new(config)?;
    let result = indexer.index_all(force)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!("{}", "📚 Index".bright_cyan().bold());
    println!("{}", "=".repeat(60));
    println!("📂 Docs: {}", docs.display());
    println!(
        "   {} files indexed ({} changed, {} skipped)",
        result.files_indexed, result.files_changed, result.files_skipped
    );
    if result.files_unreadable > 0 {
        println!("   ⚠️  {} files unreadable", result.files_unreadable);
    }
    for skip in &result.quality_skipped {
        println!("   ⚠️  quality gate skipped {}: {}", skip.file, skip.reason);
    }
    println!(
        "   {} chunks upserted, {} total, {} stale removed",
        result.chunks_upserted, result.chunks_total, result.chunks_removed
    );
    if result.stale_removal_skipped {
        println!(
            "{}",
            "   ⚠️  0 files found on disk; stale removal skipped".yellow()
        );
    }
    println!("\n{}", "✨ Indexing complete!".bright_green().bold());
    Ok(())
}

fn search(
    config: IndexConfig,
    query: &str,
    top_k: usize,
    doc_type: Option<&str>,
    json: bool,
) -> Result<()> {
    let indexer = DocsIndexer::new(config)?;
    let results = indexer.search(query, top_k, doc_type);

    if json {
        println!("{}", serde_json::to_string_pretty(&results)?);
        return Ok(());
    }

    println!("{}", "🔍 Search Results".bright_cyan().bold());
    println!("{}", "=".repeat(60));
    println!("Query: \"{}\"", query.bright_yellow());
    println!("Found {} results\n", results.len());

    if results.is_empty() {
        println!("{}", "No matches found.".dimmed());
        println!("Try:");
        println!("  - Using different keywords");
        println!(
            "  - Running {} if the docs changed",
            "docdex index".bright_cyan()
        );
        return Ok(());
    }

    for result in &results {
        println!("{}", "─".repeat(60));
        println!("{}", format!("📄 {}", result.chunk.source).bright_green());
        let location = format!(
            "   Lines {}-{} • {} • relevance {:.1}",
            result.chunk.line_start, result.chunk.line_end, result.chunk.doc_type, result.relevance
        );
        println!("{}", location.dimmed());
        if !result.chunk.heading_path.is_empty() {
            println!("   {}", result.chunk.heading_path.bright_cyan());
        }

        let snippet: String = result.chunk.text.lines().take(3).collect::<Vec<_>>().join(" ");
        let snippet: String = snippet.chars().take(100).collect();
        println!("   {}\n", snippet.dimmed());
    }

    Ok(())
}

fn stats(config: IndexConfig, json: bool) -> Result<()> {
    let indexer = DocsIndexer::new(config)?;
    let stats = indexer.stats();

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("{}", "📊 Collection Statistics".bright_cyan().bold());
    println!("{}", "=".repeat(60));
    println!("   Total chunks: {}", stats.total_chunks);
    println!(
        "   Model: {} ({})",
        stats.embedding_model, stats.embedding_provider
    );
    println!("   Chunk strategy: {}", stats.chunk_strategy);
    if !stats.type_distribution.is_empty() {
        println!("\n{}", "By type:".bright_green());
        for (doc_type, count) in &stats.type_distribution {
            println!("   {doc_type}: {count}");
        }
    }
    Ok(())
}

fn clear(config: IndexConfig, yes: bool) -> Result<()> {
    if !yes {
        println!(
            "{}",
            "⚠️  This will delete all indexed data for this collection!".yellow()
        );
        print!("Are you sure? (y/N): ");
        use std::io::{self, Write};
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        if !input.trim().eq_ignore_ascii_case("y") {
            println!("{}", "Cancelled.".dimmed());
            return Ok(());
        }
    }

    let indexer = DocsIndexer::new(config)?;
    indexer.clear_index()?;
    println!("{}", "✅ Index cleared".green());
    Ok(())
}

fn swap_model(config: IndexConfig, model: &str) -> Result<()> {
    let store = config.store_path.clone();
    let mut new_config = config.clone();
    new_config.embedding.model = model.to_string();

    let indexer = Arc::new(DocsIndexer::new(config)?);
    let started = match indexer.start_model_swap(new_config.clone(), None) {
        Ok(SwapStart::Started(report)) => report,
        Ok(SwapStart::Skipped) => {
            println!("{}", "Same model selected, nothing to do".yellow());
            return Ok(());
        }
        Err(e) => {
            println!("{}", format!("❌ {e}").red());
            return Ok(());
        }
    };

    println!("{}", "🔄 Model Migration".bright_cyan().bold());
    println!("{}", "=".repeat(60));
    println!("   {} -> {}", started.old_model, started.new_model.bright_yellow());

    let pb = ProgressBar::new(started.total_files as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("█▓▒░ "),
    );

    let report = loop {
        let Some(report) = indexer.migration_status() else {
            break None;
        };
        pb.set_position(report.files_done as u64);
        if report.status != MigrationStatus::Running {
            break Some(report);
        }
        std::thread::sleep(Duration::from_millis(200));
    };
    pb.finish_and_clear();

    match report {
        Some(report) if report.status == MigrationStatus::Complete => {
            new_config.save_to(&store)?;
            println!(
                "{}",
                format!(
                    "✅ Migration complete: {} files, {} chunks",
                    report.files_done, report.chunks_created
                )
                .bright_green()
            );
        }
        Some(report) => {
            let error = report.error.unwrap_or_else(|| "unknown error".to_string());
            println!(
                "{}",
                format!("❌ Migration {}: {}", report.status, error).red()
            );
        }
        None => println!("{}", "❌ Migration state lost".red()),
    }
    Ok(())
}
