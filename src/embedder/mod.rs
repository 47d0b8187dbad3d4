//! Embedding strategies behind one order-preserving contract.
//!
//! Every embedder is bound to exactly one [`EmbeddingSpace`] (model id +
//! dimension). Vectors from different spaces are never numerically
//! comparable; the retriever relies on the space key to keep them apart.
//! All strategies L2-normalize their output identically, so stored and
//! query vectors compare by inner product.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

pub mod hash;
pub mod openai;
pub mod server;

pub use hash::HashEmbedder;
pub use openai::OpenAiEmbedder;
pub use server::InferenceServerEmbedder;

/// Guard against dividing by zero on a degenerate all-zero embedding.
pub const NORM_EPSILON: f32 = 1e-8;

/// Key of a vector space: one embedding model configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingSpace {
    /// Model identifier (e.g. `text-embedding-3-small`,
    /// `intfloat/multilingual-e5-base`).
    pub model_id: String,
    /// Fixed vector dimension of this space.
    pub dimension: usize,
}

impl EmbeddingSpace {
    /// Builds a space key.
    pub fn new(model_id: impl Into<String>, dimension: usize) -> Self {
        Self {
            model_id: model_id.into(),
            dimension,
        }
    }
}

/// Whether a text is being embedded as stored content or as a query.
///
/// Some model families (e5) want a fixed marker prefixed per intent; this
/// is a per-embedder configuration knob, not part of the trait contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbedIntent {
    /// Content headed for the index.
    Document,
    /// A search query.
    Query,
}

/// Intent marker strings prepended before embedding.
#[derive(Debug, Clone)]
pub struct IntentPrefixes {
    /// Prefix for stored content.
    pub document: String,
    /// Prefix for queries.
    pub query: String,
}

impl IntentPrefixes {
    /// The e5 family convention.
    pub fn e5() -> Self {
        Self {
            document: "passage: ".to_string(),
            query: "query: ".to_string(),
        }
    }

    fn apply(&self, intent: EmbedIntent, text: &str) -> String {
        match intent {
            EmbedIntent::Document => format!("{}{}", self.document, text),
            EmbedIntent::Query => format!("{}{}", self.query, text),
        }
    }
}

/// Applies the optional prefix pair to a batch, yielding owned inputs.
fn prefixed_inputs(
    prefixes: Option<&IntentPrefixes>,
    intent: EmbedIntent,
    texts: &[&str],
) -> Vec<String> {
    texts
        .iter()
        .map(|text| match prefixes {
            Some(prefixes) => prefixes.apply(intent, text),
            None => (*text).to_string(),
        })
        .collect()
}

/// Order-preserving batch embedding into one fixed space.
pub trait Embedder: Send + Sync {
    /// The space every vector from this embedder belongs to.
    fn space(&self) -> &EmbeddingSpace;

    /// Embeds `texts`, returning one L2-normalized vector per input in
    /// input order, regardless of internal batching or retries.
    fn embed(&self, intent: EmbedIntent, texts: &[&str]) -> Result<Vec<Vec<f32>>>;
}

impl std::fmt::Debug for dyn Embedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedder").field("space", self.space()).finish()
    }
}

/// Scales `vector` to unit L2 norm, with an epsilon so an all-zero
/// embedding stays all-zero instead of dividing by zero.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt() + NORM_EPSILON;
    for value in vector.iter_mut() {
        *value /= norm;
    }
}

/// Checks that a provider returned vectors of the space's dimension and
/// normalizes them in place.
fn finish_batch(space: &EmbeddingSpace, mut vectors: Vec<Vec<f32>>) -> Result<Vec<Vec<f32>>> {
    for vector in &mut vectors {
        if vector.len() != space.dimension {
            bail!(
                "model {} returned a {}-dimension vector, space expects {}",
                space.model_id,
                vector.len(),
                space.dimension
            );
        }
        l2_normalize(vector);
    }
    Ok(vectors)
}

/// Connection settings shared by the embedder strategies; which strategy a
/// space uses is decided from its model id (see [`for_space`]).
#[derive(Debug, Clone)]
pub struct EmbedderSettings {
    /// OpenAI API key, required only when an OpenAI space is configured.
    pub openai_api_key: Option<String>,
    /// Base URL for OpenAI-compatible endpoints.
    pub openai_base_url: String,
    /// Base URL of the local inference server.
    pub server_base_url: String,
    /// Per-request timeout for remote calls.
    pub timeout: Duration,
    /// Retry attempts for transient failures.
    pub max_retries: usize,
    /// Max inputs per embedding request.
    pub batch_size: usize,
}

impl Default for EmbedderSettings {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_base_url: "https://api.openai.com/v1".to_string(),
            server_base_url: "http://127.0.0.1:8081".to_string(),
            timeout: Duration::from_secs(30),
            max_retries: 5,
            batch_size: 64,
        }
    }
}

/// Builds the embedder for a space, keyed off its model id:
/// `hash-*` spaces get the offline hashing embedder, `text-embedding-*`
/// spaces the OpenAI client (API key required at construction, not per
/// request), and everything else the local inference server. Models whose
/// id mentions `e5` get the passage/query prefixes that family expects.
pub fn for_space(space: &EmbeddingSpace, settings: &EmbedderSettings) -> Result<Arc<dyn Embedder>> {
    if space.model_id.starts_with("hash-") {
        return Ok(Arc::new(HashEmbedder::for_space(space.clone())));
    }
    if space.model_id.starts_with("text-embedding-") {
        let api_key = match &settings.openai_api_key {
            Some(key) if !key.trim().is_empty() => key.clone(),
            _ => bail!(
                "OPENAI_API_KEY must be set to embed in space {}",
                space.model_id
            ),
        };
        let embedder = OpenAiEmbedder::new(
            api_key,
            settings.openai_base_url.clone(),
            space.clone(),
            settings.timeout,
            settings.max_retries,
            settings.batch_size,
        )?;
        return Ok(Arc::new(embedder));
    }
    let prefixes = space.model_id.contains("e5").then(IntentPrefixes::e5);
    let embedder = InferenceServerEmbedder::new(
        settings.server_base_url.clone(),
        space.clone(),
        prefixes,
        settings.timeout,
        settings.max_retries,
        settings.batch_size,
    )?;
    Ok(Arc::new(embedder))
}
