//! Client for a local text-embeddings inference server.
//!
//! Speaks the plain `POST /embed` protocol: `{"inputs": [...]}` in,
//! a bare array of float vectors out. Works against text-embeddings-
//! inference and compatible shims.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::blocking::Client;
use serde::Serialize;

use super::{finish_batch, prefixed_inputs, EmbedIntent, Embedder, EmbeddingSpace, IntentPrefixes};

#[derive(Serialize)]
struct EmbedRequest<'a> {
    inputs: &'a [String],
}

/// Blocking client for a self-hosted embedding server, with optional
/// per-intent prefixes for model families that expect them.
pub struct InferenceServerEmbedder {
    client: Client,
    base_url: String,
    space: EmbeddingSpace,
    prefixes: Option<IntentPrefixes>,
    max_retries: usize,
    batch_size: usize,
}

impl InferenceServerEmbedder {
    /// Builds the client against `base_url`.
    pub fn new(
        base_url: String,
        space: EmbeddingSpace,
        prefixes: Option<IntentPrefixes>,
        timeout: Duration,
        max_retries: usize,
        batch_size: usize,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            space,
            prefixes,
            max_retries,
            batch_size: batch_size.max(1),
        })
    }

    fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embed", self.base_url);
        let body = EmbedRequest { inputs };
        let mut attempt = 0usize;
        loop {
            let failure = match self.client.post(&url).json(&body).send() {
                Ok(response) if response.status().is_success() => {
                    let vectors: Vec<Vec<f32>> =
                        response.json().context("failed to decode embed response")?;
                    if vectors.len() != inputs.len() {
                        bail!(
                            "embed response has {} vectors for {} inputs",
                            vectors.len(),
                            inputs.len()
                        );
                    }
                    return finish_batch(&self.space, vectors);
                }
                Ok(response) => {
                    let status = response.status();
                    if !status.is_server_error() || attempt >= self.max_retries {
                        let detail = response.text().unwrap_or_default();
                        bail!("embed request failed with {status}: {detail}");
                    }
                    anyhow!("status {status}")
                }
                Err(err) => {
                    if attempt >= self.max_retries {
                        return Err(err).context("embed request failed");
                    }
                    anyhow!(err)
                }
            };
            eprintln!("embed attempt {} failed ({failure}), retrying", attempt + 1);
            std::thread::sleep(Duration::from_millis(500 * (1 << attempt.min(5))));
            attempt += 1;
        }
    }
}

impl Embedder for InferenceServerEmbedder {
    fn space(&self) -> &EmbeddingSpace {
        &self.space
    }

    fn embed(&self, intent: EmbedIntent, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let inputs = prefixed_inputs(self.prefixes.as_ref(), intent, texts);
        let mut vectors = Vec::with_capacity(inputs.len());
        for batch in inputs.chunks(self.batch_size) {
            vectors.extend(self.embed_batch(batch)?);
        }
        Ok(vectors)
    }
}
