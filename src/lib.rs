//! Semantic retrieval and grounded answering over course syllabi and
//! faculty regulations.
//!
//! The pipeline: [`normalizer`] canonicalizes field text, [`chunker`]
//! splits it into bounded overlapping chunks, an [`embedder`] maps chunks
//! and queries into a named vector space, [`index`] stores and scans the
//! vectors exactly, [`retriever`] fuses results across sources whose
//! spaces may differ, and [`answerer`] turns retrieved evidence into a
//! grounded answer. [`service`] wires loaded sources into one shared
//! context for the server and CLI binaries.

#![warn(missing_docs)]

pub mod answerer;
pub mod chunker;
pub mod document;
pub mod embedder;
pub mod index;
pub mod normalizer;
pub mod retriever;
pub mod service;

pub use answerer::{Answerer, AnswererConfig, NO_EVIDENCE_ANSWER};
pub use chunker::{Chunker, ChunkerConfig};
pub use document::{Chunk, ChunkMetadata, Document};
pub use embedder::{EmbedIntent, Embedder, EmbeddingSpace};
pub use index::{FlatIndex, IndexError};
pub use retriever::{FusionPolicy, RetrievalHit, Retriever};
pub use service::{ServiceContext, SourceConfig, SourceStatus};
