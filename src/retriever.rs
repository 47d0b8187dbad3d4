//! Multi-source retrieval with cross-space score fusion.
//!
//! Each source pairs one index with the embedder that produced it. Raw
//! inner-product scores from different embedding spaces are not on a
//! common scale, so merging sources goes through a calibration policy
//! before ranking.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;

use crate::document::Chunk;
use crate::embedder::{EmbedIntent, Embedder, EmbeddingSpace};
use crate::index::FlatIndex;

/// How per-source scores are put on a common scale before merging.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FusionPolicy {
    /// Reciprocal rank fusion: a hit at rank `r` contributes
    /// `1 / (k + r)`. Ignores raw score magnitudes entirely, so it is
    /// safe across arbitrary embedding spaces. The default, with k = 60.
    ReciprocalRank {
        /// Rank damping constant.
        k: f32,
    },
    /// Min-max normalization of each source's scores into `[0, 1]`.
    /// Preserves relative score shape within a source; a source whose
    /// scores are all equal maps to a constant 1.0.
    MinMax,
    /// Pass raw scores through unchanged. Only meaningful when every
    /// source shares one embedding space; across spaces it silently
    /// favors whichever model runs hotter.
    RawScore,
}

impl Default for FusionPolicy {
    fn default() -> Self {
        Self::ReciprocalRank { k: 60.0 }
    }
}

/// A fused search result.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalHit {
    /// Label of the source the chunk came from.
    pub source: String,
    /// Raw inner-product score in the source's own space.
    pub score: f32,
    /// Calibrated score used for cross-source ranking.
    pub calibrated: f32,
    /// The retrieved chunk.
    pub chunk: Chunk,
}

/// One searchable corpus: an index plus the embedder of its space.
#[derive(Debug)]
pub struct RetrievalSource {
    name: String,
    index: FlatIndex,
    embedder: Arc<dyn Embedder>,
}

impl RetrievalSource {
    /// Pairs `index` with `embedder`, refusing mismatched spaces up front
    /// so the mistake cannot surface later as silently wrong rankings.
    pub fn new(name: impl Into<String>, index: FlatIndex, embedder: Arc<dyn Embedder>) -> Result<Self> {
        let name = name.into();
        if index.space() != embedder.space() {
            bail!(
                "source {name}: index space {} does not match embedder space {}",
                index.space().model_id,
                embedder.space().model_id
            );
        }
        Ok(Self {
            name,
            index,
            embedder,
        })
    }

    /// The source's label, carried into every hit.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The embedding space this source operates in.
    pub fn space(&self) -> &EmbeddingSpace {
        self.embedder.space()
    }

    fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievalHit>> {
        let vectors = self
            .embedder
            .embed(EmbedIntent::Query, &[query])
            .with_context(|| format!("embedding query for source {}", self.name))?;
        let query_vector = vectors
            .first()
            .with_context(|| format!("embedder returned no vector for source {}", self.name))?;
        let scored = self
            .index
            .search(self.space(), query_vector, k)
            .with_context(|| format!("searching source {}", self.name))?;
        Ok(scored
            .into_iter()
            .map(|hit| RetrievalHit {
                source: self.name.clone(),
                score: hit.score,
                calibrated: hit.score,
                chunk: hit.chunk,
            })
            .collect())
    }
}

/// Merges per-source result lists into one ranking of length `k`.
///
/// Each inner list must already be sorted best-first in its own source.
/// Calibration happens per source, then everything is sorted by the
/// calibrated score descending, ties broken by source name then document
/// id so reruns produce identical output.
pub fn fuse_hits(
    per_source: Vec<Vec<RetrievalHit>>,
    policy: FusionPolicy,
    k: usize,
) -> Vec<RetrievalHit> {
    let mut fused = Vec::new();
    for mut hits in per_source {
        match policy {
            FusionPolicy::ReciprocalRank { k: damp } => {
                for (rank, hit) in hits.iter_mut().enumerate() {
                    hit.calibrated = 1.0 / (damp + rank as f32 + 1.0);
                }
            }
            FusionPolicy::MinMax => {
                let min = hits.iter().map(|h| h.score).fold(f32::INFINITY, f32::min);
                let max = hits
                    .iter()
                    .map(|h| h.score)
                    .fold(f32::NEG_INFINITY, f32::max);
                let range = max - min;
                for hit in hits.iter_mut() {
                    hit.calibrated = if range > f32::EPSILON {
                        (hit.score - min) / range
                    } else {
                        1.0
                    };
                }
            }
            FusionPolicy::RawScore => {
                for hit in hits.iter_mut() {
                    hit.calibrated = hit.score;
                }
            }
        }
        fused.extend(hits);
    }
    fused.sort_by(|a, b| {
        b.calibrated
            .partial_cmp(&a.calibrated)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.source.cmp(&b.source))
            .then_with(|| a.chunk.document_id.cmp(&b.chunk.document_id))
            .then(a.chunk.sequence_index.cmp(&b.chunk.sequence_index))
    });
    fused.truncate(k);
    fused
}

/// Searches every source and fuses the results.
#[derive(Debug)]
pub struct Retriever {
    sources: Vec<RetrievalSource>,
    policy: FusionPolicy,
}

impl Retriever {
    /// Builds a retriever over `sources` with the given fusion policy.
    pub fn new(sources: Vec<RetrievalSource>, policy: FusionPolicy) -> Self {
        Self { sources, policy }
    }

    /// The configured sources.
    pub fn sources(&self) -> &[RetrievalSource] {
        &self.sources
    }

    /// Runs `query` against every source, asking each for `k` candidates,
    /// and returns the fused top `k`. An empty query is rejected; zero
    /// sources or `k == 0` yield an empty result.
    pub fn unified_search(&self, query: &str, k: usize) -> Result<Vec<RetrievalHit>> {
        if query.trim().is_empty() {
            bail!("query must not be empty");
        }
        if k == 0 {
            return Ok(Vec::new());
        }
        let mut per_source = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            per_source.push(source.search(query, k)?);
        }
        Ok(fuse_hits(per_source, self.policy, k))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ChunkMetadata;
    use crate::embedder::HashEmbedder;

    fn chunk(id: &str, text: &str) -> Chunk {
        Chunk {
            document_id: id.to_string(),
            sequence_index: 0,
            text: text.to_string(),
            metadata: ChunkMetadata::default(),
        }
    }

    fn hit(source: &str, id: &str, score: f32) -> RetrievalHit {
        RetrievalHit {
            source: source.to_string(),
            score,
            calibrated: score,
            chunk: chunk(id, id),
        }
    }

    #[test]
    fn raw_policy_preserves_score_order() {
        let fused = fuse_hits(
            vec![vec![hit("a", "a-1", 0.9), hit("a", "a-2", 0.4)]],
            FusionPolicy::RawScore,
            10,
        );
        assert_eq!(fused[0].chunk.document_id, "a-1");
        assert_eq!(fused[1].chunk.document_id, "a-2");
        assert_eq!(fused[0].calibrated, 0.9);
    }

    #[test]
    fn reciprocal_rank_ignores_inflated_raw_scores() {
        // source "hot" reports scores an order of magnitude larger, but
        // rank fusion treats both sources' top hits identically.
        let hot = vec![hit("hot", "h-1", 250.0), hit("hot", "h-2", 240.0)];
        let cool = vec![hit("cool", "c-1", 0.82), hit("cool", "c-2", 0.71)];
        let fused = fuse_hits(vec![hot, cool], FusionPolicy::default(), 4);
        assert_eq!(fused[0].calibrated, fused[1].calibrated);
        let top_sources: Vec<&str> = fused[..2].iter().map(|h| h.source.as_str()).collect();
        assert!(top_sources.contains(&"hot"));
        assert!(top_sources.contains(&"cool"));
    }

    #[test]
    fn min_max_scales_each_source_into_unit_range() {
        let fused = fuse_hits(
            vec![
                vec![hit("a", "a-1", 10.0), hit("a", "a-2", 5.0)],
                vec![hit("b", "b-1", 0.9), hit("b", "b-2", 0.1)],
            ],
            FusionPolicy::MinMax,
            10,
        );
        for h in &fused {
            assert!((0.0..=1.0).contains(&h.calibrated));
        }
        // both source maxima calibrate to 1.0
        assert_eq!(fused[0].calibrated, 1.0);
        assert_eq!(fused[1].calibrated, 1.0);
    }

    #[test]
    fn min_max_constant_scores_map_to_one() {
        let fused = fuse_hits(
            vec![vec![hit("a", "a-1", 0.5), hit("a", "a-2", 0.5)]],
            FusionPolicy::MinMax,
            10,
        );
        assert!(fused.iter().all(|h| h.calibrated == 1.0));
    }

    #[test]
    fn fusion_truncates_to_k() {
        let fused = fuse_hits(
            vec![
                vec![hit("a", "a-1", 0.9), hit("a", "a-2", 0.8)],
                vec![hit("b", "b-1", 0.7), hit("b", "b-2", 0.6)],
            ],
            FusionPolicy::default(),
            3,
        );
        assert_eq!(fused.len(), 3);
    }

    #[test]
    fn ties_break_deterministically() {
        let once = fuse_hits(
            vec![vec![hit("b", "x", 0.5)], vec![hit("a", "x", 0.5)]],
            FusionPolicy::RawScore,
            2,
        );
        let twice = fuse_hits(
            vec![vec![hit("a", "x", 0.5)], vec![hit("b", "x", 0.5)]],
            FusionPolicy::RawScore,
            2,
        );
        assert_eq!(once[0].source, "a");
        assert_eq!(twice[0].source, "a");
    }

    #[test]
    fn source_construction_rejects_space_mismatch() {
        let index_embedder = HashEmbedder::new(16);
        let vectors = index_embedder
            .embed(EmbedIntent::Document, &["grading policy"])
            .unwrap();
        let index = FlatIndex::build(
            index_embedder.space().clone(),
            vectors,
            vec![chunk("course-0", "grading policy")],
        )
        .unwrap();
        let other = Arc::new(HashEmbedder::new(32));
        let err = RetrievalSource::new("courses", index, other).unwrap_err();
        assert!(err.to_string().contains("does not match"));
    }

    #[test]
    fn unified_search_merges_two_spaces() {
        let texts = ["grading policy details", "lecture room assignments"];
        let mut sources = Vec::new();
        for (name, dim) in [("courses", 64usize), ("faculty-rules", 32usize)] {
            let embedder = Arc::new(HashEmbedder::new(dim));
            let vectors = embedder.embed(EmbedIntent::Document, &texts).unwrap();
            let chunks = texts.iter().map(|t| chunk(name, t)).collect();
            let index = FlatIndex::build(embedder.space().clone(), vectors, chunks).unwrap();
            sources.push(RetrievalSource::new(name, index, embedder).unwrap());
        }
        let retriever = Retriever::new(sources, FusionPolicy::default());
        let hits = retriever.unified_search("grading policy", 4).unwrap();
        assert_eq!(hits.len(), 4);
        assert!(hits.iter().any(|h| h.source == "courses"));
        assert!(hits.iter().any(|h| h.source == "faculty-rules"));
        // top hits from each source are about grading
        assert!(hits[0].chunk.text.contains("grading"));
    }

    #[test]
    fn empty_query_is_rejected() {
        let retriever = Retriever::new(Vec::new(), FusionPolicy::default());
        assert!(retriever.unified_search("  ", 5).is_err());
    }
}
