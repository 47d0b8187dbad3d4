//! Shared, immutable state behind the server and CLI front ends.
//!
//! A [`ServiceContext`] loads every configured source at startup and is
//! never mutated afterwards; reindexing means building new artifacts with
//! the indexer and restarting. A source whose artifacts are missing or
//! corrupted is reported as unloaded rather than failing startup, so one
//! bad corpus does not take down search over the others. A misconfigured
//! embedder credential, by contrast, is fatal: it would break every query
//! against that source, and silently dropping the source would hide it.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use serde::Serialize;

use crate::embedder::{self, EmbedderSettings};
use crate::index::FlatIndex;
use crate::retriever::{FusionPolicy, RetrievalHit, RetrievalSource, Retriever};

/// One source to load: a label and the directory of its artifacts.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// Label carried into hits and health reporting.
    pub name: String,
    /// Directory holding the persisted index.
    pub dir: PathBuf,
}

/// Load outcome of one configured source.
#[derive(Debug, Clone, Serialize)]
pub struct SourceStatus {
    /// Source label.
    pub name: String,
    /// Whether the source is serving queries.
    pub loaded: bool,
    /// Failure detail when not loaded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Retriever plus per-source load status, shared across requests.
#[derive(Debug)]
pub struct ServiceContext {
    retriever: Retriever,
    statuses: Vec<SourceStatus>,
}

impl ServiceContext {
    /// Loads every source in `configs`.
    ///
    /// Index artifacts that fail to load degrade that source; embedder
    /// construction errors (e.g. a missing API key for a configured
    /// OpenAI space) abort startup.
    pub fn load(
        configs: &[SourceConfig],
        settings: &EmbedderSettings,
        policy: FusionPolicy,
    ) -> Result<Self> {
        if configs.is_empty() {
            bail!("at least one source must be configured");
        }
        let mut sources = Vec::new();
        let mut statuses = Vec::new();
        for config in configs {
            let index = match FlatIndex::load(&config.dir) {
                Ok(index) => index,
                Err(err) => {
                    eprintln!(
                        "source {} unavailable ({}): {err}",
                        config.name,
                        config.dir.display()
                    );
                    statuses.push(SourceStatus {
                        name: config.name.clone(),
                        loaded: false,
                        detail: Some(err.to_string()),
                    });
                    continue;
                }
            };
            let embedder = embedder::for_space(index.space(), settings)
                .with_context(|| format!("configuring embedder for source {}", config.name))?;
            let source = RetrievalSource::new(config.name.clone(), index, embedder)?;
            sources.push(source);
            statuses.push(SourceStatus {
                name: config.name.clone(),
                loaded: true,
                detail: None,
            });
        }
        Ok(Self {
            retriever: Retriever::new(sources, policy),
            statuses,
        })
    }

    /// Searches all loaded sources.
    pub fn search(&self, query: &str, k: usize) -> Result<Vec<RetrievalHit>> {
        self.retriever.unified_search(query, k)
    }

    /// Per-source load outcomes, in configuration order.
    pub fn statuses(&self) -> &[SourceStatus] {
        &self.statuses
    }

    /// True when at least one source is serving queries.
    pub fn any_loaded(&self) -> bool {
        self.statuses.iter().any(|status| status.loaded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{Chunk, ChunkMetadata};
    use crate::embedder::{EmbedIntent, Embedder, HashEmbedder};

    fn persist_sample(dir: &std::path::Path, texts: &[&str], dim: usize) {
        let embedder = HashEmbedder::new(dim);
        let vectors = embedder.embed(EmbedIntent::Document, texts).unwrap();
        let chunks = texts
            .iter()
            .enumerate()
            .map(|(i, text)| Chunk {
                document_id: format!("course-{i}"),
                sequence_index: 0,
                text: text.to_string(),
                metadata: ChunkMetadata::default(),
            })
            .collect();
        let index = FlatIndex::build(embedder.space().clone(), vectors, chunks).unwrap();
        index.persist(dir).unwrap();
    }

    #[test]
    fn missing_source_degrades_instead_of_failing() {
        let root = tempfile::tempdir().unwrap();
        let good = root.path().join("courses");
        persist_sample(&good, &["grading by final exam"], 32);

        let configs = vec![
            SourceConfig {
                name: "courses".to_string(),
                dir: good,
            },
            SourceConfig {
                name: "faculty-rules".to_string(),
                dir: root.path().join("missing"),
            },
        ];
        let context =
            ServiceContext::load(&configs, &EmbedderSettings::default(), FusionPolicy::default())
                .unwrap();
        assert!(context.any_loaded());
        let statuses = context.statuses();
        assert!(statuses[0].loaded);
        assert!(!statuses[1].loaded);
        assert!(statuses[1].detail.is_some());

        let hits = context.search("grading", 5).unwrap();
        assert!(hits.iter().all(|hit| hit.source == "courses"));
    }

    #[test]
    fn zero_sources_is_a_configuration_error() {
        let err = ServiceContext::load(
            &[],
            &EmbedderSettings::default(),
            FusionPolicy::default(),
        )
        .unwrap_err();
        assert!(err.to_string().contains("at least one source"));
    }
}
