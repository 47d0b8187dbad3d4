//! OpenAI embeddings client.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};

use super::{finish_batch, prefixed_inputs, EmbedIntent, Embedder, EmbeddingSpace};

/// Known default dimensions for the OpenAI embedding models.
pub fn default_dimension(model_id: &str) -> Option<usize> {
    match model_id {
        "text-embedding-3-small" => Some(1536),
        "text-embedding-3-large" => Some(3072),
        "text-embedding-ada-002" => Some(1536),
        _ => None,
    }
}

#[derive(Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingItem>,
}

#[derive(Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

/// Blocking client for the `/embeddings` endpoint. Batches inputs,
/// retries transient failures with exponential backoff, and re-sorts the
/// response by its `index` field before trusting the order.
#[derive(Debug)]
pub struct OpenAiEmbedder {
    client: Client,
    base_url: String,
    space: EmbeddingSpace,
    max_retries: usize,
    batch_size: usize,
}

impl OpenAiEmbedder {
    /// Builds the client. The API key is baked into default headers so a
    /// missing credential fails here, not on the first query.
    pub fn new(
        api_key: String,
        base_url: String,
        space: EmbeddingSpace,
        timeout: Duration,
        max_retries: usize,
        batch_size: usize,
    ) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .context("API key is not a valid header value")?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            space,
            max_retries,
            batch_size: batch_size.max(1),
        })
    }

    fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        let body = EmbeddingsRequest {
            model: &self.space.model_id,
            input: inputs,
        };
        let mut attempt = 0usize;
        loop {
            let result = self.client.post(&url).json(&body).send();
            let failure = match result {
                Ok(response) if response.status().is_success() => {
                    let parsed: EmbeddingsResponse = response
                        .json()
                        .context("failed to decode embeddings response")?;
                    if parsed.data.len() != inputs.len() {
                        bail!(
                            "embeddings response has {} vectors for {} inputs",
                            parsed.data.len(),
                            inputs.len()
                        );
                    }
                    let mut items = parsed.data;
                    items.sort_by_key(|item| item.index);
                    return finish_batch(
                        &self.space,
                        items.into_iter().map(|item| item.embedding).collect(),
                    );
                }
                Ok(response) => {
                    let status = response.status();
                    let retryable =
                        status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
                    if !retryable || attempt >= self.max_retries {
                        let detail = response.text().unwrap_or_default();
                        bail!("embeddings request failed with {status}: {detail}");
                    }
                    anyhow!("status {status}")
                }
                Err(err) => {
                    if attempt >= self.max_retries {
                        return Err(err).context("embeddings request failed");
                    }
                    anyhow!(err)
                }
            };
            eprintln!(
                "embeddings attempt {} failed ({failure}), retrying",
                attempt + 1
            );
            std::thread::sleep(Duration::from_millis(500 * (1 << attempt.min(5))));
            attempt += 1;
        }
    }
}

impl Embedder for OpenAiEmbedder {
    fn space(&self) -> &EmbeddingSpace {
        &self.space
    }

    fn embed(&self, intent: EmbedIntent, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        let inputs = prefixed_inputs(None, intent, texts);
        let mut vectors = Vec::with_capacity(inputs.len());
        for batch in inputs.chunks(self.batch_size) {
            vectors.extend(self.embed_batch(batch)?);
        }
        Ok(vectors)
    }
}
