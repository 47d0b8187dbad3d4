//! End-to-end pipeline test: documents are chunked, embedded, indexed,
//! persisted, reloaded through the service layer, and searched across two
//! sources living in different embedding spaces.

use std::sync::Arc;

use campusrag::chunker::{Chunker, ChunkerConfig};
use campusrag::document::{chunk_document, Chunk, Document, ChunkMetadata};
use campusrag::embedder::{EmbedIntent, Embedder, EmbedderSettings, HashEmbedder};
use campusrag::index::FlatIndex;
use campusrag::retriever::FusionPolicy;
use campusrag::service::{ServiceContext, SourceConfig};

fn document(id: &str, source_label: &str, title: &str, text: &str) -> Document {
    Document {
        id: id.to_string(),
        source_label: source_label.to_string(),
        text: text.to_string(),
        metadata: ChunkMetadata {
            title: Some(title.to_string()),
            ..ChunkMetadata::default()
        },
    }
}

fn build_source(dir: &std::path::Path, documents: &[Document], dimension: usize) {
    let chunker = Chunker::new(ChunkerConfig::default());
    let chunks: Vec<Chunk> = documents
        .iter()
        .flat_map(|doc| chunk_document(&chunker, doc))
        .collect();
    let embedder = HashEmbedder::new(dimension);
    let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
    let vectors = embedder.embed(EmbedIntent::Document, &texts).unwrap();
    let index = FlatIndex::build(embedder.space().clone(), vectors, chunks).unwrap();
    index.persist(dir).unwrap();
}

fn sample_courses() -> Vec<Document> {
    vec![
        document(
            "course-0",
            "courses",
            "Constitutional Law I",
            "Constitutional Law I covers judicial review and fundamental rights. \
             Grading: final exam 70 percent, reports 30 percent.",
        ),
        document(
            "course-1",
            "courses",
            "Microeconomics",
            "Microeconomics introduces supply, demand, and market equilibrium. \
             Grading: weekly problem sets and a final exam.",
        ),
    ]
}

fn sample_rules() -> Vec<Document> {
    vec![
        document(
            "rule-0",
            "faculty-rules",
            "Examination Rules",
            "Makeup exams are granted only for documented illness. \
             Applications go to the faculty office within one week.",
        ),
        document(
            "rule-1",
            "faculty-rules",
            "Credit Transfer Rules",
            "Credits earned abroad are evaluated by the curriculum committee.",
        ),
    ]
}

#[test]
fn two_sources_in_different_spaces_serve_one_fused_search() {
    let root = tempfile::tempdir().unwrap();
    let courses_dir = root.path().join("courses");
    let rules_dir = root.path().join("rules");
    build_source(&courses_dir, &sample_courses(), 64);
    build_source(&rules_dir, &sample_rules(), 32);

    let configs = vec![
        SourceConfig {
            name: "courses".to_string(),
            dir: courses_dir,
        },
        SourceConfig {
            name: "faculty-rules".to_string(),
            dir: rules_dir,
        },
    ];
    let context = ServiceContext::load(
        &configs,
        &EmbedderSettings::default(),
        FusionPolicy::default(),
    )
    .unwrap();
    assert!(context.statuses().iter().all(|s| s.loaded));

    let hits = context.search("final exam grading", 4).unwrap();
    assert_eq!(hits.len(), 4);
    assert!(hits.iter().any(|h| h.source == "courses"));
    assert!(hits.iter().any(|h| h.source == "faculty-rules"));
    // calibrated scores are rank-based and strictly positive
    assert!(hits.iter().all(|h| h.calibrated > 0.0));
    // best course hit mentions grading
    let top_course = hits.iter().find(|h| h.source == "courses").unwrap();
    assert!(top_course.chunk.text.contains("Grading"));
}

#[test]
fn missing_source_degrades_and_search_still_works() {
    let root = tempfile::tempdir().unwrap();
    let courses_dir = root.path().join("courses");
    build_source(&courses_dir, &sample_courses(), 64);

    let configs = vec![
        SourceConfig {
            name: "courses".to_string(),
            dir: courses_dir,
        },
        SourceConfig {
            name: "faculty-rules".to_string(),
            dir: root.path().join("never-built"),
        },
    ];
    let context = ServiceContext::load(
        &configs,
        &EmbedderSettings::default(),
        FusionPolicy::default(),
    )
    .unwrap();
    assert!(context.any_loaded());
    let rules = context
        .statuses()
        .iter()
        .find(|s| s.name == "faculty-rules")
        .unwrap();
    assert!(!rules.loaded);

    let hits = context.search("makeup exam", 5).unwrap();
    assert!(hits.iter().all(|h| h.source == "courses"));
}

#[test]
fn reloaded_index_matches_in_memory_ranking() {
    let root = tempfile::tempdir().unwrap();
    let dir = root.path().join("courses");
    build_source(&dir, &sample_courses(), 64);

    let embedder = Arc::new(HashEmbedder::new(64));
    let loaded = FlatIndex::load(&dir).unwrap();
    let query = embedder
        .embed(EmbedIntent::Query, &["judicial review rights"])
        .unwrap();
    let hits = loaded.search(embedder.space(), &query[0], 1).unwrap();
    assert!(hits[0].chunk.text.contains("judicial review"));
}
