//! Document chunking.
//!
//! Chunk ids are content-based (sha256 of source + text) so they are stable
//! across reindexing regardless of section ordering.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::{ChunkStrategy, ChunkingConfig};

/// Chunks whose trimmed body is at most this many characters are discarded
/// (whitespace or heading-only noise).
pub const MIN_CHUNK_CHARS: usize = 50;

/// Known document categories, matched against the source path.
pub const DOC_TYPES: [&str; 9] = [
    "docs",
    "bugfix",
    "best-practice",
    "api",
    "architecture",
    "changelog",
    "setup",
    "readme",
    "test",
];

/// A retrievable piece of a document with its citation metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Content-addressed id: sha256(source + "\n" + text), first 16 hex chars
    pub id: String,

    /// Chunk text, prefixed with the heading path when one exists
    pub text: String,

    /// Source path relative to the docs root
    pub source: String,

    /// Nearest enclosing heading ("intro" before the first heading)
    pub heading: String,

    /// Parent headings joined with " > "
    pub heading_path: String,

    /// Detected document category
    pub doc_type: String,

    pub char_count: usize,
    pub word_count: usize,

    /// 1-based line range within the source document
    pub line_start: usize,
    pub line_end: usize,
}

/// Content-addressed chunk id, a pure function of (source, text).
pub fn chunk_id(source: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(b"\n");
    hasher.update(text.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..16].to_string()
}

/// Detect the document category from its path.
pub fn detect_doc_type(path: &str) -> &'static str {
    let p = path.to_lowercase();
    if p.contains("bugfix") || p.contains("bug-fix") {
        "bugfix"
    } else if p.contains("best-practice") || p.contains("bestpractice") {
        "best-practice"
    } else if p.contains("api") {
        "api"
    } else if p.contains("architect") {
        "architecture"
    } else if p.contains("changelog") || p.contains("release") {
        "changelog"
    } else if p.contains("setup") || p.contains("install") {
        "setup"
    } else if p.contains("readme") {
        "readme"
    } else if p.contains("test") {
        "test"
    } else {
        "docs"
    }
}

/// Splits normalized document text into content-addressed chunks.
pub struct Chunker {
    strategy: ChunkStrategy,
    max_chars: usize,
    overlap: usize,
}

impl Chunker {
    pub fn new(strategy: ChunkStrategy, max_chars: usize, overlap: usize) -> Self {
        // A window must always outgrow its overlap or the sliding cursor
        // would stall.
        let overlap = overlap.min(max_chars.saturating_sub(1));
        Self {
            strategy,
            max_chars,
            overlap,
        }
    }

    pub fn from_config(cfg: &ChunkingConfig) -> Self {
        Self::new(cfg.strategy, cfg.max_chars, cfg.overlap)
    }

    /// Chunk `text` (markdown-like) from `source` per the configured strategy.
    pub fn chunk(&self, text: &str, source: &str) -> Vec<Chunk> {
        match self.strategy {
            ChunkStrategy::Heading => self.by_heading(text, source),
            ChunkStrategy::Fixed => self.fixed_size(text, source),
            ChunkStrategy::Hybrid => self.hybrid(text, source),
        }
    }

    /// Split at `#`..`###` headings, preserving parent heading context.
    fn by_heading(&self, text: &str, source: &str) -> Vec<Chunk> {
        let mut chunks = Vec::new();
        let mut heading_stack: Vec<(usize, String)> = Vec::new();
        let mut current_lines: Vec<&str> = Vec::new();
        let mut current_heading = String::from("intro");
        let mut current_path = String::new();
        let mut chunk_start_line = 1;

        for (idx, line) in text.split('\n').enumerate() {
            let line_num = idx + 1;
            if let Some((level, title)) = parse_heading(line) {
                if !current_lines.is_empty() {
                    self.flush(
                        &mut chunks,
                        &current_lines,
                        &current_heading,
                        &current_path,
                        source,
                        chunk_start_line,
                    );
                }

                heading_stack.retain(|(l, _)| *l < level);
                heading_stack.push((level, title.to_string()));

                current_heading = title.to_string();
                current_path = heading_stack
                    .iter()
                    .map(|(_, t)| t.as_str())
                    .collect::<Vec<_>>()
                    .join(" > ");
                current_lines = vec![line];
                chunk_start_line = line_num;
            } else {
                current_lines.push(line);
            }
        }

        if !current_lines.is_empty() {
            self.flush(
                &mut chunks,
                &current_lines,
                &current_heading,
                &current_path,
                source,
                chunk_start_line,
            );
        }

        chunks
    }

    fn flush(
        &self,
        chunks: &mut Vec<Chunk>,
        lines: &[&str],
        heading: &str,
        heading_path: &str,
        source: &str,
        line_start: usize,
    ) {
        let joined = lines.join("\n");
        let raw = joined.trim();
        if raw.chars().count() <= MIN_CHUNK_CHARS {
            return;
        }
        let line_end = line_start + lines.len() - 1;
        let display = if heading_path.is_empty() {
            raw.to_string()
        } else {
            format!("[{heading_path}]\n\n{raw}")
        };
        let mut chunk = make_chunk(&display, heading, heading_path, source);
        chunk.line_start = line_start;
        chunk.line_end = line_end;
        chunks.push(chunk);
    }

    /// Sliding window of `max_chars` with `overlap` characters of
    /// back-tracking; prefers a ". " sentence boundary past the window's
    /// back half over a hard cut.
    fn fixed_size(&self, text: &str, source: &str) -> Vec<Chunk> {
        let chars: Vec<char> = text.chars().collect();
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < chars.len() {
            // Intentionally past the end on the last window; the uncapped
            // value drives the cursor advance below.
            let mut end = start + self.max_chars;
            let mut window: String = chars[start..end.min(chars.len())].iter().collect();

            if end < chars.len() {
                if let Some(byte_pos) = window.rfind(". ") {
                    let cut = window[..byte_pos].chars().count();
                    if cut > self.max_chars / 2 {
                        window = chars[start..start + cut + 1].iter().collect();
                        end = start + cut + 1;
                    }
                }
            }

            let line_start = chars[..start].iter().filter(|&&c| c == '\n').count() + 1;
            let line_end = line_start + window.matches('\n').count();

            let trimmed = window.trim();
            if trimmed.chars().count() > MIN_CHUNK_CHARS {
                let heading = format!("chunk-{}", chunks.len());
                let mut chunk = make_chunk(trimmed, &heading, "", source);
                chunk.line_start = line_start;
                chunk.line_end = line_end;
                chunks.push(chunk);
            }

            start = end.saturating_sub(self.overlap).max(start + 1);
        }

        chunks
    }

    /// Heading split, then subdivide any chunk exceeding `max_chars` with the
    /// fixed strategy. Sub-chunk ids stay a pure function of final text.
    fn hybrid(&self, text: &str, source: &str) -> Vec<Chunk> {
        let mut out = Vec::new();

        for chunk in self.by_heading(text, source) {
            if chunk.text.chars().count() > self.max_chars {
                for (i, mut sub) in self.fixed_size(&chunk.text, source).into_iter().enumerate() {
                    sub.heading = format!("{} (part {})", chunk.heading, i + 1);
                    sub.id = chunk_id(source, &sub.text);
                    out.push(sub);
                }
            } else {
                out.push(chunk);
            }
        }

        out
    }
}

fn parse_heading(line: &str) -> Option<(usize, &str)> {
    let hashes = line.bytes().take_while(|&b| b == b'#').count();
    if hashes == 0 || hashes > 3 {
        return None;
    }
    let rest = &line[hashes..];
    if !rest.starts_with(char::is_whitespace) || rest.trim().is_empty() {
        return None;
    }
    Some((hashes, rest.trim()))
}

fn make_chunk(text: &str, heading: &str, heading_path: &str, source: &str) -> Chunk {
    let text = text.trim();
    Chunk {
        id: chunk_id(source, text),
        text: text.to_string(),
        source: source.to_string(),
        heading: heading.to_string(),
        heading_path: heading_path.to_string(),
        doc_type: detect_doc_type(source).to_string(),
        char_count: text.chars().count(),
        word_count: text.split_whitespace().count(),
        line_start: 1,
        line_end: 1,
    }
}
