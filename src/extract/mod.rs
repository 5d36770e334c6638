//! Text extraction and document discovery.
//!
//! Extraction is a collaborator seam: the indexer only sees
//! `extract(path) -> Option<String>` and treats `None` as "skip this file".
//! The built-in reader covers the plain-text formats; richer formats (pdf,
//! html, docx) plug in behind the same trait.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

/// File extensions the built-in reader understands.
pub const SUPPORTED_EXTENSIONS: [&str; 6] = ["md", "txt", "json", "yaml", "yml", "csv"];

/// Turns a document file into markdown-like text.
///
/// Never errors: extraction failures degrade to `None` and are logged here,
/// not propagated.
pub trait TextExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Option<String>;
}

/// Built-in reader for plain-text document formats.
///
/// Non-markdown formats are converted to markdown-like text in memory so the
/// chunker sees one shape of input.
#[derive(Debug, Default)]
pub struct DocReader;

impl TextExtractor for DocReader {
    fn extract(&self, path: &Path) -> Option<String> {
        let ext = path.extension()?.to_str()?.to_lowercase();
        if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
            return None;
        }
        let name = path.file_name()?.to_string_lossy().to_string();

        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("could not read {}: {e}", path.display());
                return None;
            }
        };

        match ext.as_str() {
            "md" => Some(raw),
            "txt" => Some(format!("# {name}\n\n{raw}")),
            "json" => Some(read_json(&name, &raw)),
            "yaml" | "yml" => Some(format!("# {name}\n\n```yaml\n{raw}\n```")),
            "csv" => Some(read_csv(&name, &raw)),
            _ => None,
        }
    }
}

fn read_json(name: &str, raw: &str) -> String {
    let formatted = match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(value) => serde_json::to_string_pretty(&value).unwrap_or_else(|_| raw.to_string()),
        Err(_) => raw.to_string(),
    };
    format!("# {name}\n\n```json\n{formatted}\n```")
}

fn read_csv(name: &str, raw: &str) -> String {
    let mut rows = raw.lines().map(|l| l.split(',').collect::<Vec<_>>());
    let Some(header) = rows.next() else {
        return format!("# {name}\n\n(empty)");
    };

    let mut lines = Vec::new();
    lines.push(format!("| {} |", header.join(" | ")));
    lines.push(format!(
        "| {} |",
        header.iter().map(|_| "---").collect::<Vec<_>>().join(" | ")
    ));
    for row in rows {
        let mut row = row;
        row.resize(header.len(), "");
        lines.push(format!("| {} |", row[..header.len()].join(" | ")));
    }

    format!("# {name}\n\n{}", lines.join("\n"))
}

/// Enumerates supported documents under a root, sorted for deterministic
/// processing order.
///
/// Subtrees that embed their own git repository are pruned so that a nested
/// project checked out under the docs tree is never double-indexed.
pub struct DocWalker {
    root: PathBuf,
}

impl DocWalker {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn walk(&self) -> Vec<PathBuf> {
        let root = self.root.clone();
        let mut seen = BTreeSet::new();

        let walker = WalkDir::new(&self.root).into_iter().filter_entry(move |entry| {
            if entry.file_type().is_dir() && entry.path() != root {
                return !entry.path().join(".git").exists();
            }
            true
        });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("error walking docs tree: {e}");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let supported = entry
                .path()
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| SUPPORTED_EXTENSIONS.contains(&e.to_lowercase().as_str()))
                .unwrap_or(false);
            if supported {
                seen.insert(entry.path().to_path_buf());
            }
        }

        seen.into_iter().collect()
    }
}

/// Path of `file` relative to `root`, slash-separated.
pub fn rel_path(root: &Path, file: &Path) -> String {
    let rel = file.strip_prefix(root).unwrap_or(file);
    rel.to_string_lossy().replace('\\', "/")
}
