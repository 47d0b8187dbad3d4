//! Exact inner-product index with on-disk persistence.
//!
//! Vectors live in one contiguous `f32` buffer; search is a full scan.
//! For corpora in the tens of thousands of chunks this is faster and far
//! simpler than an ANN structure, and it is exact.
//!
//! On disk an index is a directory of three artifacts:
//! - `vectors.bin` — magic `CRVX`, format version, dimension, count, the
//!   raw little-endian `f32` payload, and a CRC32 of the payload;
//! - `chunks.jsonl` — one JSON chunk record per line, in vector order;
//! - `config.json` — the [`EmbeddingSpace`] the vectors belong to.
//!
//! The three artifacts are only valid together: chunk-to-vector pairing
//! is positional. All of them are written into a staging directory that
//! is renamed into place as one unit, so a crash mid-write can never mix
//! a new `vectors.bin` with a stale `chunks.jsonl`.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::document::Chunk;
use crate::embedder::EmbeddingSpace;

const MAGIC: &[u8; 4] = b"CRVX";
const FORMAT_VERSION: u32 = 1;

const VECTORS_FILE: &str = "vectors.bin";
const CHUNKS_FILE: &str = "chunks.jsonl";
const CONFIG_FILE: &str = "config.json";

/// Failures building, persisting, or loading an index.
#[derive(Debug)]
pub enum IndexError {
    /// A vector's length does not match the index's space dimension.
    DimensionMismatch {
        /// Dimension the space requires.
        expected: usize,
        /// Dimension actually supplied.
        actual: usize,
    },
    /// A query vector came from a different embedding space.
    SpaceMismatch {
        /// Model id of the index's space.
        index_model: String,
        /// Model id of the querying space.
        query_model: String,
    },
    /// A persisted artifact is malformed or internally inconsistent.
    Corrupted(String),
    /// Underlying filesystem failure.
    Io(io::Error),
}

impl fmt::Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DimensionMismatch { expected, actual } => {
                write!(f, "vector dimension {actual} does not match index dimension {expected}")
            }
            Self::SpaceMismatch {
                index_model,
                query_model,
            } => write!(
                f,
                "query embedded with {query_model} cannot search an index built with {index_model}"
            ),
            Self::Corrupted(detail) => write!(f, "index artifact is corrupted: {detail}"),
            Self::Io(err) => write!(f, "index I/O error: {err}"),
        }
    }
}

impl std::error::Error for IndexError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for IndexError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

/// One search result: a stored chunk and its raw inner-product score.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    /// Position of the chunk in the index.
    pub offset: usize,
    /// Raw inner product against the query vector.
    pub score: f32,
    /// The stored chunk.
    pub chunk: Chunk,
}

/// In-memory exact-search index over one embedding space.
#[derive(Debug)]
pub struct FlatIndex {
    space: EmbeddingSpace,
    vectors: Vec<f32>,
    chunks: Vec<Chunk>,
}

impl FlatIndex {
    /// Builds an index from parallel vectors and chunks.
    ///
    /// Every vector must have the space's dimension, and there must be
    /// exactly one chunk per vector.
    pub fn build(
        space: EmbeddingSpace,
        vectors: Vec<Vec<f32>>,
        chunks: Vec<Chunk>,
    ) -> Result<Self, IndexError> {
        if vectors.len() != chunks.len() {
            return Err(IndexError::Corrupted(format!(
                "{} vectors but {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }
        let mut flat = Vec::with_capacity(vectors.len() * space.dimension);
        for vector in &vectors {
            if vector.len() != space.dimension {
                return Err(IndexError::DimensionMismatch {
                    expected: space.dimension,
                    actual: vector.len(),
                });
            }
            flat.extend_from_slice(vector);
        }
        Ok(Self {
            space,
            vectors: flat,
            chunks,
        })
    }

    /// The embedding space this index was built in.
    pub fn space(&self) -> &EmbeddingSpace {
        &self.space
    }

    /// Number of stored chunks.
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// True when the index holds no chunks.
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    /// Scans all vectors and returns the top `k` chunks by inner product,
    /// best first. `query_space` must be the space the query vector was
    /// embedded in; asking for more results than stored chunks returns
    /// them all.
    pub fn search(
        &self,
        query_space: &EmbeddingSpace,
        query: &[f32],
        k: usize,
    ) -> Result<Vec<ScoredChunk>, IndexError> {
        if query_space != &self.space {
            return Err(IndexError::SpaceMismatch {
                index_model: self.space.model_id.clone(),
                query_model: query_space.model_id.clone(),
            });
        }
        if query.len() != self.space.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.space.dimension,
                actual: query.len(),
            });
        }
        let dim = self.space.dimension;
        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .chunks_exact(dim)
            .enumerate()
            .map(|(offset, stored)| {
                let score = stored.iter().zip(query).map(|(a, b)| a * b).sum::<f32>();
                (offset, score)
            })
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored
            .into_iter()
            .map(|(offset, score)| ScoredChunk {
                offset,
                score,
                chunk: self.chunks[offset].clone(),
            })
            .collect())
    }

    /// Writes the three artifacts into `dir`, replacing any previous
    /// index there as one unit.
    ///
    /// Everything is staged into a sibling directory first and the whole
    /// directory is renamed into place, so an interrupted rebuild either
    /// leaves the previous index untouched or leaves no loadable index at
    /// all, never new vectors paired with stale chunks.
    pub fn persist(&self, dir: &Path) -> Result<(), IndexError> {
        let name = dir
            .file_name()
            .ok_or_else(|| IndexError::Corrupted(format!("invalid index directory {dir:?}")))?
            .to_string_lossy();
        let parent = dir.parent().unwrap_or_else(|| Path::new(""));
        let staging = parent.join(format!("{name}.staging"));
        let retired = parent.join(format!("{name}.old"));

        // leftovers from an interrupted earlier persist
        if staging.exists() {
            fs::remove_dir_all(&staging)?;
        }
        if retired.exists() {
            fs::remove_dir_all(&retired)?;
        }
        fs::create_dir_all(&staging)?;

        self.write_artifacts(&staging)?;

        if dir.exists() {
            fs::rename(dir, &retired)?;
        }
        fs::rename(&staging, dir)?;
        if retired.exists() {
            fs::remove_dir_all(&retired)?;
        }
        Ok(())
    }

    fn write_artifacts(&self, dir: &Path) -> Result<(), IndexError> {
        let payload: Vec<u8> = self
            .vectors
            .iter()
            .flat_map(|value| value.to_le_bytes())
            .collect();
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&payload);
        let checksum = hasher.finalize();

        let mut writer = BufWriter::new(File::create(dir.join(VECTORS_FILE))?);
        writer.write_all(MAGIC)?;
        writer.write_all(&FORMAT_VERSION.to_le_bytes())?;
        writer.write_all(&(self.space.dimension as u32).to_le_bytes())?;
        writer.write_all(&(self.chunks.len() as u64).to_le_bytes())?;
        writer.write_all(&payload)?;
        writer.write_all(&checksum.to_le_bytes())?;
        writer.flush()?;

        let mut writer = BufWriter::new(File::create(dir.join(CHUNKS_FILE))?);
        for chunk in &self.chunks {
            let line = serde_json::to_string(chunk)
                .map_err(|err| IndexError::Corrupted(format!("chunk encode: {err}")))?;
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;

        let config = serde_json::to_string_pretty(&self.space)
            .map_err(|err| IndexError::Corrupted(format!("config encode: {err}")))?;
        fs::write(dir.join(CONFIG_FILE), config)?;
        Ok(())
    }

    /// Loads and verifies an index from `dir`.
    ///
    /// Checks the magic, format version, payload CRC, and that the vector
    /// header, config dimension, and chunk count all agree.
    pub fn load(dir: &Path) -> Result<Self, IndexError> {
        let config = fs::read_to_string(dir.join(CONFIG_FILE))?;
        let space: EmbeddingSpace = serde_json::from_str(&config)
            .map_err(|err| IndexError::Corrupted(format!("config decode: {err}")))?;

        let mut reader = BufReader::new(File::open(dir.join(VECTORS_FILE))?);
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(IndexError::Corrupted("bad magic in vectors.bin".into()));
        }
        let mut word = [0u8; 4];
        reader.read_exact(&mut word)?;
        let version = u32::from_le_bytes(word);
        if version != FORMAT_VERSION {
            return Err(IndexError::Corrupted(format!(
                "unsupported vectors.bin format version {version}"
            )));
        }
        reader.read_exact(&mut word)?;
        let dimension = u32::from_le_bytes(word) as usize;
        if dimension != space.dimension {
            return Err(IndexError::Corrupted(format!(
                "vectors.bin dimension {dimension} disagrees with config dimension {}",
                space.dimension
            )));
        }
        let mut long = [0u8; 8];
        reader.read_exact(&mut long)?;
        let count = u64::from_le_bytes(long) as usize;

        let payload_len = count
            .checked_mul(dimension)
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| IndexError::Corrupted("vector payload size overflow".into()))?;
        let mut payload = vec![0u8; payload_len];
        reader.read_exact(&mut payload)?;
        reader.read_exact(&mut word)?;
        let stored_checksum = u32::from_le_bytes(word);
        let mut hasher = crc32fast::Hasher::new();
        hasher.update(&payload);
        if hasher.finalize() != stored_checksum {
            return Err(IndexError::Corrupted("vectors.bin checksum mismatch".into()));
        }

        let vectors: Vec<f32> = payload
            .chunks_exact(4)
            .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
            .collect();

        let mut chunks = Vec::with_capacity(count);
        let reader = BufReader::new(File::open(dir.join(CHUNKS_FILE))?);
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let chunk: Chunk = serde_json::from_str(&line).map_err(|err| {
                IndexError::Corrupted(format!("chunks.jsonl line {}: {err}", line_no + 1))
            })?;
            chunks.push(chunk);
        }
        if chunks.len() != count {
            return Err(IndexError::Corrupted(format!(
                "vectors.bin declares {count} vectors but chunks.jsonl has {} records",
                chunks.len()
            )));
        }

        Ok(Self {
            space,
            vectors,
            chunks,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ChunkMetadata;

    fn chunk(id: &str, seq: usize, text: &str) -> Chunk {
        Chunk {
            document_id: id.to_string(),
            sequence_index: seq,
            text: text.to_string(),
            metadata: ChunkMetadata {
                title: Some("憲法I".to_string()),
                instructor: Some("山田 太郎".to_string()),
                source_file: Some("courses.csv".to_string()),
                ..ChunkMetadata::default()
            },
        }
    }

    fn sample_index() -> FlatIndex {
        let space = EmbeddingSpace::new("hash-3-v1", 3);
        FlatIndex::build(
            space,
            vec![
                vec![1.0, 0.0, 0.0],
                vec![0.0, 1.0, 0.0],
                vec![0.6, 0.8, 0.0],
            ],
            vec![
                chunk("course-0", 0, "grading"),
                chunk("course-0", 1, "schedule"),
                chunk("course-1", 0, "textbook"),
            ],
        )
        .unwrap()
    }

    #[test]
    fn search_ranks_by_inner_product() {
        let index = sample_index();
        let hits = index
            .search(index.space(), &[1.0, 0.0, 0.0], 2)
            .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk.text, "grading");
        assert_eq!(hits[1].chunk.text, "textbook");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn k_larger_than_index_returns_everything() {
        let index = sample_index();
        let hits = index
            .search(index.space(), &[0.0, 1.0, 0.0], 50)
            .unwrap();
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn rejects_query_from_another_space() {
        let index = sample_index();
        let other = EmbeddingSpace::new("text-embedding-3-small", 1536);
        let err = index.search(&other, &[0.0; 1536], 5).unwrap_err();
        assert!(matches!(err, IndexError::SpaceMismatch { .. }));
    }

    #[test]
    fn rejects_wrong_dimension_vector_at_build() {
        let space = EmbeddingSpace::new("hash-3-v1", 3);
        let err = FlatIndex::build(
            space,
            vec![vec![1.0, 0.0]],
            vec![chunk("course-0", 0, "grading")],
        )
        .unwrap_err();
        assert!(matches!(
            err,
            IndexError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn persist_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let index = sample_index();
        index.persist(dir.path()).unwrap();

        let loaded = FlatIndex::load(dir.path()).unwrap();
        assert_eq!(loaded.space(), index.space());
        assert_eq!(loaded.len(), 3);
        let hits = loaded
            .search(loaded.space(), &[0.6, 0.8, 0.0], 1)
            .unwrap();
        assert_eq!(hits[0].chunk.text, "textbook");
    }

    #[test]
    fn rebuild_replaces_all_artifacts_as_one_unit() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("courses");
        let space = EmbeddingSpace::new("hash-3-v1", 3);
        let first = FlatIndex::build(
            space.clone(),
            vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0]],
            vec![chunk("course-0", 0, "alpha"), chunk("course-0", 1, "beta")],
        )
        .unwrap();
        first.persist(&dir).unwrap();

        // same chunk count, pairings swapped: mixing old and new artifacts
        // would pass every load check yet serve the wrong chunk
        let second = FlatIndex::build(
            space.clone(),
            vec![vec![0.0, 1.0, 0.0], vec![1.0, 0.0, 0.0]],
            vec![chunk("course-0", 0, "alpha"), chunk("course-0", 1, "beta")],
        )
        .unwrap();
        second.persist(&dir).unwrap();

        let loaded = FlatIndex::load(&dir).unwrap();
        let hits = loaded.search(&space, &[1.0, 0.0, 0.0], 1).unwrap();
        assert_eq!(hits[0].chunk.text, "beta");
        assert!(!root.path().join("courses.staging").exists());
        assert!(!root.path().join("courses.old").exists());
    }

    #[test]
    fn persist_recovers_from_interrupted_staging() {
        let root = tempfile::tempdir().unwrap();
        let dir = root.path().join("courses");
        let staging = root.path().join("courses.staging");
        fs::create_dir_all(&staging).unwrap();
        fs::write(staging.join("vectors.bin"), b"junk").unwrap();

        sample_index().persist(&dir).unwrap();
        let loaded = FlatIndex::load(&dir).unwrap();
        assert_eq!(loaded.len(), 3);
        assert!(!staging.exists());
    }

    #[test]
    fn load_detects_corrupted_payload() {
        let dir = tempfile::tempdir().unwrap();
        sample_index().persist(dir.path()).unwrap();

        let path = dir.path().join("vectors.bin");
        let mut bytes = fs::read(&path).unwrap();
        // flip a payload byte past the 20-byte header
        bytes[24] ^= 0xff;
        fs::write(&path, bytes).unwrap();

        let err = FlatIndex::load(dir.path()).unwrap_err();
        assert!(matches!(err, IndexError::Corrupted(_)));
    }

    #[test]
    fn load_detects_chunk_count_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        sample_index().persist(dir.path()).unwrap();

        let path = dir.path().join("chunks.jsonl");
        let text = fs::read_to_string(&path).unwrap();
        let truncated: String = text.lines().take(2).map(|l| format!("{l}\n")).collect();
        fs::write(&path, truncated).unwrap();

        let err = FlatIndex::load(dir.path()).unwrap_err();
        assert!(matches!(err, IndexError::Corrupted(_)));
    }

    #[test]
    fn empty_index_persists_and_searches() {
        let dir = tempfile::tempdir().unwrap();
        let space = EmbeddingSpace::new("hash-3-v1", 3);
        let index = FlatIndex::build(space, vec![], vec![]).unwrap();
        index.persist(dir.path()).unwrap();
        let loaded = FlatIndex::load(dir.path()).unwrap();
        assert!(loaded.is_empty());
        let hits = loaded
            .search(loaded.space(), &[0.0, 0.0, 1.0], 5)
            .unwrap();
        assert!(hits.is_empty());
    }
}
