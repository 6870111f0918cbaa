//! Core data types and the crate-wide error taxonomy.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors surfaced by the salmon-search pipeline.
///
/// Ingestion-time failures (`Upstream`, `InvalidInput`) are local to a single
/// URL and reported per item; store failures roll back their transaction
/// before surfacing; `IndexInconsistency` halts a sync call without advancing
/// the high-water mark.
#[derive(Debug, Error)]
pub enum SalmonError {
    /// The target already exists (store file on init, resource URL on save).
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Malformed input: bad URL, wrong embedding dimension, empty batch.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Lookup or delete of an id that is not in the store.
    #[error("not found: {0}")]
    NotFound(String),

    /// A collaborator (document fetch, embedding endpoint) failed.
    #[error("upstream failure: {0}")]
    Upstream(String),

    /// The vector index and the chunk table disagree in a way sync cannot
    /// repair by appending.
    #[error("index inconsistency: {0}")]
    IndexInconsistency(String),

    /// SQLite-level failure; the enclosing transaction has been rolled back.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem failure outside the database itself.
    #[error("io error: {0}")]
    Io(String),
}

impl From<reqwest::Error> for SalmonError {
    fn from(err: reqwest::Error) -> Self {
        SalmonError::Upstream(err.to_string())
    }
}

impl From<std::io::Error> for SalmonError {
    fn from(err: std::io::Error) -> Self {
        SalmonError::Io(err.to_string())
    }
}

impl From<tokio_rusqlite::Error> for SalmonError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        SalmonError::Storage(err.to_string())
    }
}

/// A persisted document: one row of the `resources` table plus its chunk
/// count for reporting.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Resource {
    pub id: i64,
    pub url: String,
    pub title: String,
    pub chunk_count: usize,
}

/// A resource assembled by the ingestion coordinator, not yet persisted.
///
/// `embeddings[i]` corresponds to `chunks[i]`; `save_resource` rejects the
/// whole value if the lengths differ or any vector has the wrong dimension.
#[derive(Clone, Debug)]
pub struct NewResource {
    pub url: String,
    pub title: String,
    pub chunks: Vec<String>,
    pub embeddings: Vec<Vec<f32>>,
}

/// Ids assigned by a successful `save_resource` call.
///
/// Chunk ids are ascending in the chunks' sequence order; the index sync
/// engine relies on that monotonicity.
#[derive(Clone, Debug)]
pub struct SavedResource {
    pub resource_id: i64,
    pub chunk_ids: Vec<i64>,
}

/// One row of the `chunks` table.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Chunk {
    pub id: i64,
    pub resource_id: i64,
    pub text: String,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub embedding: Vec<f32>,
}

/// A retrieval hit: a chunk joined to its owning resource.
///
/// `distance` is non-negative L2 distance; smaller means more similar.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkMatch {
    pub distance: f64,
    pub chunk_id: i64,
    pub chunk_text: String,
    pub resource_id: i64,
    pub resource_title: String,
    pub resource_url: String,
}
