//! Per-session vector index persisted as a single JSON file.
//!
//! Layout: `<root>/<session_id>/index.json`. Each entry stores a chunk's
//! text and its embedding, the latter as base64 of little-endian `f32`
//! bytes (see [`vec_to_blob`]). Search is brute-force cosine similarity,
//! which is plenty for the few hundred chunks a single PDF produces.
//!
//! An index "exists" for a session iff its `index.json` exists.

use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::models::Chunk;

const INDEX_FILE: &str = "index.json";
const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("index I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("index at {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("{0}")]
    Mismatch(String),
}

/// A retrieved chunk with its similarity to the query.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk_index: i64,
    pub text: String,
    pub score: f32,
}

#[derive(Debug, Clone)]
struct IndexEntry {
    chunk_index: i64,
    text: String,
    vector: Vec<f32>,
}

/// In-memory form of one session's index.
#[derive(Debug, Clone)]
pub struct VectorIndex {
    session_id: String,
    model: String,
    dims: usize,
    created_at: DateTime<Utc>,
    entries: Vec<IndexEntry>,
}

impl VectorIndex {
    /// Pair chunks with their vectors. All vectors must share one
    /// dimensionality and there must be exactly one per chunk.
    pub fn build(
        session_id: &str,
        model: &str,
        chunks: &[Chunk],
        vectors: Vec<Vec<f32>>,
    ) -> Result<Self, IndexError> {
        if chunks.len() != vectors.len() {
            return Err(IndexError::Mismatch(format!(
                "{} chunks but {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }

        let dims = vectors.first().map(Vec::len).unwrap_or(0);
        if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
            return Err(IndexError::Mismatch(format!(
                "inconsistent vector dimensions: {} vs {}",
                dims,
                bad.len()
            )));
        }

        let entries = chunks
            .iter()
            .zip(vectors)
            .map(|(chunk, vector)| IndexEntry {
                chunk_index: chunk.chunk_index,
                text: chunk.text.clone(),
                vector,
            })
            .collect();

        Ok(Self {
            session_id: session_id.to_string(),
            model: model.to_string(),
            dims,
            created_at: Utc::now(),
            entries,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Top `k` entries by descending cosine similarity. Ties keep chunk order.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<ScoredChunk> {
        let mut scored: Vec<ScoredChunk> = self
            .entries
            .iter()
            .map(|e| ScoredChunk {
                chunk_index: e.chunk_index,
                text: e.text.clone(),
                score: cosine_similarity(query, &e.vector),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.chunk_index.cmp(&b.chunk_index))
        });
        scored.truncate(k);
        scored
    }
}

// ============ On-disk format ============

#[derive(Serialize, Deserialize)]
struct IndexFile {
    version: u32,
    session_id: String,
    model: String,
    dims: usize,
    created_at: DateTime<Utc>,
    entries: Vec<StoredEntry>,
}

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    chunk_index: i64,
    text: String,
    vector: String,
}

impl From<&VectorIndex> for IndexFile {
    fn from(index: &VectorIndex) -> Self {
        Self {
            version: FORMAT_VERSION,
            session_id: index.session_id.clone(),
            model: index.model.clone(),
            dims: index.dims,
            created_at: index.created_at,
            entries: index
                .entries
                .iter()
                .map(|e| StoredEntry {
                    chunk_index: e.chunk_index,
                    text: e.text.clone(),
                    vector: BASE64.encode(vec_to_blob(&e.vector)),
                })
                .collect(),
        }
    }
}

impl IndexFile {
    fn into_index(self, path: &Path) -> Result<VectorIndex, IndexError> {
        let corrupt = |reason: String| IndexError::Corrupt {
            path: path.to_path_buf(),
            reason,
        };

        if self.version != FORMAT_VERSION {
            return Err(corrupt(format!("unsupported format version {}", self.version)));
        }

        let mut entries = Vec::with_capacity(self.entries.len());
        for stored in self.entries {
            let bytes = BASE64
                .decode(stored.vector.as_bytes())
                .map_err(|e| corrupt(format!("chunk {}: {}", stored.chunk_index, e)))?;
            let vector = blob_to_vec(&bytes);
            if vector.len() != self.dims {
                return Err(corrupt(format!(
                    "chunk {} has {} dims, expected {}",
                    stored.chunk_index,
                    vector.len(),
                    self.dims
                )));
            }
            entries.push(IndexEntry {
                chunk_index: stored.chunk_index,
                text: stored.text,
                vector,
            });
        }

        Ok(VectorIndex {
            session_id: self.session_id,
            model: self.model,
            dims: self.dims,
            created_at: self.created_at,
            entries,
        })
    }
}

// ============ Store ============

/// Locates, writes, and reads session indexes under one root directory.
#[derive(Debug, Clone)]
pub struct IndexStore {
    root: PathBuf,
}

impl IndexStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory for a session, or `None` if the id is not a UUID.
    /// Session ids come from clients, so anything else could escape `root`.
    pub fn session_dir(&self, session_id: &str) -> Option<PathBuf> {
        Uuid::parse_str(session_id)
            .ok()
            .map(|id| self.root.join(id.to_string()))
    }

    fn index_path(&self, session_id: &str) -> Option<PathBuf> {
        self.session_dir(session_id).map(|dir| dir.join(INDEX_FILE))
    }

    /// Write the index, creating the session directory. Overwrites any
    /// previous index for the same session.
    pub async fn save(&self, index: &VectorIndex) -> Result<PathBuf, IndexError> {
        let dir = self
            .session_dir(&index.session_id)
            .ok_or_else(|| IndexError::Mismatch(format!("invalid session id: {}", index.session_id)))?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| IndexError::Io {
                path: dir.clone(),
                source,
            })?;

        let path = dir.join(INDEX_FILE);
        let body = serde_json::to_vec(&IndexFile::from(index)).map_err(|e| IndexError::Corrupt {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        tokio::fs::write(&path, body)
            .await
            .map_err(|source| IndexError::Io {
                path: path.clone(),
                source,
            })?;

        Ok(path)
    }

    /// Load a session's index. `Ok(None)` when it has never been built.
    pub async fn load(&self, session_id: &str) -> Result<Option<VectorIndex>, IndexError> {
        let Some(path) = self.index_path(session_id) else {
            return Ok(None);
        };

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(IndexError::Io { path, source }),
        };

        let file: IndexFile = serde_json::from_slice(&bytes).map_err(|e| IndexError::Corrupt {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        file.into_index(&path).map(Some)
    }
}
