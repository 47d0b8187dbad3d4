//! Builds a persisted index from one source corpus.
//!
//! Reads a syllabus CSV export or a faculty-rule JSON file, chunks every
//! document, embeds the chunks on a small worker pool, and writes the
//! index artifacts into the output directory. Run once per source; the
//! server loads whatever artifact directories it is pointed at.

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use crossbeam_channel::bounded;

use campusrag::chunker::{Chunker, ChunkerConfig};
use campusrag::document::{self, Chunk, Document};
use campusrag::embedder::{self, EmbedIntent, EmbedderSettings, EmbeddingSpace};
use campusrag::index::FlatIndex;

#[derive(Parser, Debug)]
#[command(name = "campusrag-indexer", about = "Build index artifacts from a source corpus")]
struct Args {
    /// Syllabus CSV export to index.
    #[arg(long, conflicts_with = "rules_json")]
    syllabus_csv: Option<PathBuf>,

    /// Faculty-rule JSON file to index.
    #[arg(long)]
    rules_json: Option<PathBuf>,

    /// Output directory for the index artifacts.
    #[arg(long)]
    out: PathBuf,

    /// Embedding model id.
    #[arg(long, default_value = "text-embedding-3-small")]
    model: String,

    /// Embedding dimension; defaults from the model when known.
    #[arg(long)]
    dimension: Option<usize>,

    /// Maximum chunk length in characters.
    #[arg(long, default_value_t = 900)]
    max_chars: usize,

    /// Character overlap between adjacent windows.
    #[arg(long, default_value_t = 120)]
    overlap: usize,

    /// Also carry the overlap across semantic boundaries.
    #[arg(long)]
    overlap_at_boundaries: bool,

    /// Texts per embedding request.
    #[arg(long, default_value_t = 64)]
    batch_size: usize,

    /// Embedding worker threads.
    #[arg(long, default_value_t = 4)]
    workers: usize,

    /// OpenAI API key, for text-embedding-* models.
    #[arg(long, env = "OPENAI_API_KEY")]
    openai_api_key: Option<String>,

    /// Base URL for the OpenAI API.
    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1")]
    openai_base_url: String,

    /// Base URL of the local embedding server, for other models.
    #[arg(long, env = "EMBED_SERVER_URL", default_value = "http://127.0.0.1:8081")]
    server_base_url: String,
}

fn load_documents(args: &Args) -> Result<Vec<Document>> {
    match (&args.syllabus_csv, &args.rules_json) {
        (Some(path), None) => document::load_syllabus_csv(path),
        (None, Some(path)) => document::load_faculty_rules(path),
        _ => bail!("exactly one of --syllabus-csv or --rules-json is required"),
    }
}

/// Embeds chunk texts on `workers` threads, preserving chunk order by
/// re-sequencing batches through a BTreeMap keyed on batch number.
fn embed_all(
    embedder: &dyn campusrag::Embedder,
    chunks: &[Chunk],
    batch_size: usize,
    workers: usize,
) -> Result<Vec<Vec<f32>>> {
    let batch_size = batch_size.max(1);
    let workers = workers.max(1);
    let batches: Vec<(usize, &[Chunk])> = chunks.chunks(batch_size).enumerate().collect();
    let total_batches = batches.len();

    let (job_tx, job_rx) = bounded::<(usize, &[Chunk])>(workers * 2);
    let (result_tx, result_rx) = bounded::<(usize, Result<Vec<Vec<f32>>>)>(workers * 2);

    std::thread::scope(|scope| -> Result<Vec<Vec<f32>>> {
        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let result_tx = result_tx.clone();
            scope.spawn(move || {
                for (batch_no, batch) in job_rx.iter() {
                    let texts: Vec<&str> = batch.iter().map(|c| c.text.as_str()).collect();
                    let result = embedder.embed(EmbedIntent::Document, &texts);
                    if result_tx.send((batch_no, result)).is_err() {
                        break;
                    }
                }
            });
        }
        drop(job_rx);
        drop(result_tx);

        scope.spawn(move || {
            for job in batches {
                if job_tx.send(job).is_err() {
                    break;
                }
            }
        });

        let mut pending: BTreeMap<usize, Vec<Vec<f32>>> = BTreeMap::new();
        let mut first_err = None;
        for (batch_no, result) in result_rx.iter() {
            match result {
                Ok(vectors) => {
                    pending.insert(batch_no, vectors);
                    eprintln!("embedded batch {}/{total_batches}", pending.len());
                }
                Err(err) => {
                    first_err = Some(err.context(format!("embedding batch {batch_no}")));
                    break;
                }
            }
        }
        // unblock any worker stuck on a full result channel
        drop(result_rx);
        if let Some(err) = first_err {
            return Err(err);
        }
        if pending.len() != total_batches {
            bail!("embedded {} of {total_batches} batches", pending.len());
        }
        Ok(pending.into_values().flatten().collect())
    })
}

fn run(args: Args) -> Result<()> {
    let documents = load_documents(&args)?;
    eprintln!("loaded {} documents", documents.len());

    let chunker = Chunker::new(ChunkerConfig {
        max_chars: args.max_chars,
        overlap: args.overlap,
        overlap_at_boundaries: args.overlap_at_boundaries,
    });
    let chunks: Vec<Chunk> = documents
        .iter()
        .flat_map(|doc| document::chunk_document(&chunker, doc))
        .collect();
    eprintln!("chunked into {} chunks", chunks.len());

    let dimension = match args.dimension {
        Some(dimension) => dimension,
        None => embedder::openai::default_dimension(&args.model)
            .with_context(|| format!("--dimension is required for model {}", args.model))?,
    };
    let space = EmbeddingSpace::new(args.model.clone(), dimension);
    let settings = EmbedderSettings {
        openai_api_key: args.openai_api_key.clone(),
        openai_base_url: args.openai_base_url.clone(),
        server_base_url: args.server_base_url.clone(),
        batch_size: args.batch_size,
        ..EmbedderSettings::default()
    };
    let embedder = embedder::for_space(&space, &settings)?;

    let vectors = embed_all(embedder.as_ref(), &chunks, args.batch_size, args.workers)?;

    let index = FlatIndex::build(space, vectors, chunks)?;
    index.persist(&args.out)?;
    eprintln!(
        "wrote index of {} chunks to {}",
        index.len(),
        args.out.display()
    );
    Ok(())
}

fn main() -> Result<()> {
    run(Args::parse())
}

#[cfg(test)]
mod tests {
    use super::*;
    use campusrag::document::ChunkMetadata;
    use campusrag::embedder::{Embedder, HashEmbedder};

    fn chunks(n: usize) -> Vec<Chunk> {
        (0..n)
            .map(|i| Chunk {
                document_id: format!("course-{}", i / 3),
                sequence_index: i % 3,
                text: format!("section {i} covers topic number {i} in detail"),
                metadata: ChunkMetadata::default(),
            })
            .collect()
    }

    #[test]
    fn worker_pool_output_matches_sequential_embedding_order() {
        let embedder = HashEmbedder::new(16);
        let chunks = chunks(23);
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let sequential = embedder.embed(EmbedIntent::Document, &texts).unwrap();

        // small batches and more workers than batches keep scheduling busy
        let pooled = embed_all(&embedder, &chunks, 3, 4).unwrap();
        assert_eq!(pooled, sequential);
    }

    #[test]
    fn worker_pool_handles_empty_and_single_batch_input() {
        let embedder = HashEmbedder::new(8);
        assert!(embed_all(&embedder, &[], 4, 2).unwrap().is_empty());

        let chunks = chunks(2);
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        let sequential = embedder.embed(EmbedIntent::Document, &texts).unwrap();
        assert_eq!(embed_all(&embedder, &chunks, 64, 4).unwrap(), sequential);
    }
}
