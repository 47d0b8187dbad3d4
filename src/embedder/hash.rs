//! Deterministic hashing embedder for offline runs and tests.
//!
//! Tokenizes on Unicode-alphanumeric runs, hashes each token twice (FNV-1a
//! with two seeds), and scatters signed counts into a fixed-dimension
//! vector. No model weights, no network. Texts sharing tokens land near
//! each other, which is enough for pipeline tests and air-gapped demos;
//! it is not a substitute for a learned model.

use anyhow::Result;

use super::{l2_normalize, EmbedIntent, Embedder, EmbeddingSpace};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(seed: u64, token: &str) -> u64 {
    let mut hash = FNV_OFFSET ^ seed;
    for byte in token.as_bytes() {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Model-free embedder mapping token hashes into a fixed space.
pub struct HashEmbedder {
    space: EmbeddingSpace,
}

impl HashEmbedder {
    /// Builds a hashing embedder with `dimension` buckets; its model id
    /// is `hash-{dimension}-v1` so persisted indices stay self-describing.
    pub fn new(dimension: usize) -> Self {
        let dimension = dimension.max(1);
        Self {
            space: EmbeddingSpace::new(format!("hash-{dimension}-v1"), dimension),
        }
    }

    /// Builds the embedder for an already-known `hash-*` space.
    pub fn for_space(space: EmbeddingSpace) -> Self {
        Self { space }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let dim = self.space.dimension;
        let mut vector = vec![0.0f32; dim];
        for token in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let token = token.to_lowercase();
            let bucket = (fnv1a(0, &token) % dim as u64) as usize;
            // Second hash picks the sign, so collisions tend to cancel
            // instead of piling up.
            let sign = if fnv1a(0x9e37_79b9, &token) & 1 == 0 {
                1.0
            } else {
                -1.0
            };
            vector[bucket] += sign;
        }
        l2_normalize(&mut vector);
        vector
    }
}

impl Embedder for HashEmbedder {
    fn space(&self) -> &EmbeddingSpace {
        &self.space
    }

    fn embed(&self, _intent: EmbedIntent, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|text| self.embed_one(text)).collect())
    }
}
