//! Result fusion and scoring.
//!
//! Vector and keyword result lists merge via Reciprocal Rank Fusion; raw
//! BM25 scores are normalized per batch (they are not comparable across
//! queries), and relevance is finalized on a 0-100 scale after an optional
//! rerank pass.

use serde::Serialize;
use std::collections::HashMap;

use crate::chunker::Chunk;

/// A search hit with its final relevance (0-100).
#[derive(Debug, Clone, Serialize)]
pub struct ScoredChunk {
    #[serde(flatten)]
    pub chunk: Chunk,

    /// Raw vector distance (0 for keyword-only hits)
    pub distance: f32,

    /// Final relevance, 0-100
    pub relevance: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
    Vector,
    Keyword,
}

/// A pre-fusion hit from one of the two result lists.
#[derive(Debug, Clone)]
pub(crate) struct Candidate {
    pub chunk: Chunk,
    pub origin: Origin,
    pub distance: f32,
    pub keyword_score: f32,
    pub keyword_relevance: Option<f32>,
    pub rerank_score: Option<f32>,
}

impl Candidate {
    pub fn vector(chunk: Chunk, distance: f32) -> Self {
        Self {
            chunk,
            origin: Origin::Vector,
            distance,
            keyword_score: 0.0,
            keyword_relevance: None,
            rerank_score: None,
        }
    }

    pub fn keyword(chunk: Chunk, score: f32) -> Self {
        Self {
            chunk,
            origin: Origin::Keyword,
            distance: 0.0,
            keyword_score: score,
            keyword_relevance: None,
            rerank_score: None,
        }
    }
}

pub(crate) fn round1(x: f32) -> f32 {
    (x * 10.0).round() / 10.0
}

/// Normalize raw BM25 scores to 0-100 relative to this batch's maximum.
pub(crate) fn normalize_keyword_relevance(hits: &mut [Candidate]) {
    let max = hits
        .iter()
        .map(|h| h.keyword_score)
        .filter(|s| *s > 0.0)
        .fold(0.0f32, f32::max);
    if max <= 0.0 {
        return;
    }
    for hit in hits {
        hit.keyword_relevance = Some(if hit.keyword_score > 0.0 {
            round1(hit.keyword_score / max * 100.0)
        } else {
            0.0
        });
    }
}

/// Reciprocal Rank Fusion over the two ranked lists.
///
/// Each item at 1-based rank r contributes `weight / (k + r)`; an id present
/// in both lists accumulates both contributions, so its fused rank is never
/// worse than its best single-list rank. Ties break on vector-list rank,
/// then chunk id, keeping the ordering deterministic.
pub(crate) fn rrf_fuse(
    vector_hits: Vec<Candidate>,
    keyword_hits: Vec<Candidate>,
    top_k: usize,
    k: f32,
    vector_weight: f32,
    keyword_weight: f32,
) -> Vec<Candidate> {
    struct Entry {
        candidate: Candidate,
        score: f32,
        vector_rank: usize,
    }

    let mut entries: HashMap<String, Entry> = HashMap::new();

    for (i, hit) in vector_hits.into_iter().enumerate() {
        let rank = i + 1;
        let contribution = vector_weight / (k + rank as f32);
        let entry = entries.entry(hit.chunk.id.clone()).or_insert(Entry {
            candidate: hit,
            score: 0.0,
            vector_rank: rank,
        });
        entry.score += contribution;
    }

    for (i, hit) in keyword_hits.into_iter().enumerate() {
        let rank = i + 1;
        let contribution = keyword_weight / (k + rank as f32);
        match entries.entry(hit.chunk.id.clone()) {
            std::collections::hash_map::Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                entry.score += contribution;
                // Keep the keyword relevance for display even when the
                // vector copy of the document wins.
                if entry.candidate.keyword_relevance.is_none() {
                    entry.candidate.keyword_relevance = hit.keyword_relevance;
                }
            }
            std::collections::hash_map::Entry::Vacant(vacant) => {
                vacant.insert(Entry {
                    candidate: hit,
                    score: contribution,
                    vector_rank: usize::MAX,
                });
            }
        }
    }

    let mut ranked: Vec<Entry> = entries.into_values().collect();
    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.vector_rank.cmp(&b.vector_rank))
            .then(a.candidate.chunk.id.cmp(&b.candidate.chunk.id))
    });
    ranked.truncate(top_k);
    ranked.into_iter().map(|e| e.candidate).collect()
}

/// Turn candidates into final scored hits, applying the relevance floor.
pub(crate) fn finalize(candidates: Vec<Candidate>, min_relevance: f32) -> Vec<ScoredChunk> {
    let mut out = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        let (mut relevance, distance) = match candidate.origin {
            Origin::Vector => (
                round1((1.0 - candidate.distance) * 100.0),
                candidate.distance,
            ),
            Origin::Keyword => (candidate.keyword_relevance.unwrap_or(0.0), 0.0),
        };
        if let Some(score) = candidate.rerank_score {
            relevance = round1((score * 100.0).clamp(0.0, 100.0));
        }
        if min_relevance > 0.0 && relevance < min_relevance {
            continue;
        }
        out.push(ScoredChunk {
            chunk: candidate.chunk,
            distance,
            relevance,
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::chunk_id;
    use pretty_assertions::assert_eq;

    fn chunk(source: &str, text: &str) -> Chunk {
        Chunk {
            id: chunk_id(source, text),
            text: text.to_string(),
            source: source.to_string(),
            heading: "h".into(),
            heading_path: String::new(),
            doc_type: "docs".into(),
            char_count: text.chars().count(),
            word_count: text.split_whitespace().count(),
            line_start: 1,
            line_end: 1,
        }
    }

    #[test]
    fn keyword_relevance_normalizes_to_batch_max() {
        let mut hits = vec![
            Candidate::keyword(chunk("a.md", "x"), 10.0),
            Candidate::keyword(chunk("b.md", "y"), 5.0),
            Candidate::keyword(chunk("c.md", "z"), 0.0),
        ];
        normalize_keyword_relevance(&mut hits);
        assert_eq!(hits[0].keyword_relevance, Some(100.0));
        assert_eq!(hits[1].keyword_relevance, Some(50.0));
        assert_eq!(hits[2].keyword_relevance, Some(0.0));
    }

    #[test]
    fn normalize_empty_batch_is_a_noop() {
        let mut hits: Vec<Candidate> = Vec::new();
        normalize_keyword_relevance(&mut hits);
        assert!(hits.is_empty());
    }

    #[test]
    fn fuse_weights_shift_the_winner() {
        let a = chunk("a.md", "x");
        let b = chunk("b.md", "y");
        let c = chunk("c.md", "z");
        let vector = vec![
            Candidate::vector(a.clone(), 0.1),
            Candidate::vector(b.clone(), 0.2),
        ];
        let keyword = vec![
            Candidate::keyword(b.clone(), 5.0),
            Candidate::keyword(c.clone(), 3.0),
        ];

        let fused = rrf_fuse(vector, keyword, 3, 60.0, 0.5, 1.5);
        assert_eq!(fused[0].chunk.id, b.id);
    }

    #[test]
    fn dual_presence_ranks_at_least_as_well_as_best_single_rank() {
        // b is rank 2 in the vector list and rank 1 in the keyword list;
        // fused it must come out at rank 1 or 2, and ahead of everything
        // that only trails it in both lists.
        let ids: Vec<Chunk> = (0..6)
            .map(|i| chunk(&format!("f{i}.md"), &format!("text {i}")))
            .collect();

        let vector: Vec<Candidate> = [0, 1, 2, 3]
            .iter()
            .map(|&i| Candidate::vector(ids[i].clone(), 0.1 * (i as f32 + 1.0)))
            .collect();
        let keyword: Vec<Candidate> = [1, 4, 5]
            .iter()
            .map(|&i| Candidate::keyword(ids[i].clone(), 10.0 - i as f32))
            .collect();

        let fused = rrf_fuse(vector, keyword, 6, 60.0, 1.0, 1.0);
        let fused_rank = fused.iter().position(|c| c.chunk.id == ids[1].id).unwrap() + 1;
        assert!(fused_rank <= 2, "dual-presence item fell to rank {fused_rank}");
    }

    #[test]
    fn ties_break_on_vector_rank() {
        let a = chunk("a.md", "x");
        let b = chunk("b.md", "y");
        // Same single contribution each: a from the vector list, b from the
        // keyword list, equal weights and ranks.
        let fused = rrf_fuse(
            vec![Candidate::vector(a.clone(), 0.5)],
            vec![Candidate::keyword(b.clone(), 1.0)],
            2,
            60.0,
            1.0,
            1.0,
        );
        assert_eq!(fused[0].chunk.id, a.id);
        assert_eq!(fused[1].chunk.id, b.id);
    }

    #[test]
    fn finalize_scores_by_origin() {
        let mut kw = Candidate::keyword(chunk("b.md", "y"), 5.0);
        kw.keyword_relevance = Some(62.0);
        let hits = finalize(vec![Candidate::vector(chunk("a.md", "x"), 0.25), kw], 0.0);

        assert_eq!(hits[0].relevance, 75.0);
        assert_eq!(hits[0].distance, 0.25);
        assert_eq!(hits[1].relevance, 62.0);
        assert_eq!(hits[1].distance, 0.0);
    }

    #[test]
    fn rerank_score_overrides_relevance() {
        let mut cand = Candidate::vector(chunk("a.md", "x"), 0.25);
        cand.rerank_score = Some(0.914);
        let hits = finalize(vec![cand], 0.0);
        assert_eq!(hits[0].relevance, 91.4);

        let mut wild = Candidate::vector(chunk("b.md", "y"), 0.25);
        wild.rerank_score = Some(3.2);
        let hits = finalize(vec![wild], 0.0);
        assert_eq!(hits[0].relevance, 100.0);
    }

    #[test]
    fn min_relevance_drops_low_hits() {
        let hits = finalize(
            vec![
                Candidate::vector(chunk("a.md", "x"), 0.1),
                Candidate::vector(chunk("b.md", "y"), 0.8),
            ],
            50.0,
        );
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].relevance, 90.0);
    }
}
