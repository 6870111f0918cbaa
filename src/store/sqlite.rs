//! SQLite-backed relational store with a `sqlite-vec` vector table alongside.
//!
//! One [`tokio_rusqlite::Connection`] serializes all access on its worker
//! thread; every logical operation is a single `call` closure and writes run
//! inside one transaction, so partial resources never persist.

use std::mem::transmute;
use std::os::raw::c_char;
use std::path::Path;
use std::sync::OnceLock;

use tokio_rusqlite::{Connection, OptionalExtension, ffi};
use tracing::debug;

use crate::types::{Chunk, NewResource, Resource, SalmonError, SavedResource};

/// Rowid reserved for the bootstrap entry in `vss_chunks`.
///
/// SQLite assigns real chunk ids starting at 1, so the sentinel can never
/// collide with a chunk and drops out of every query that joins back to the
/// `chunks` table.
pub(crate) const SENTINEL_ROWID: i64 = 0;

/// Handle to one salmon database: `resources`, `chunks`, `vss_chunks`, and a
/// `meta` record pinning the embedding dimension.
#[derive(Clone, Debug)]
pub struct SalmonStore {
    conn: Connection,
    dimensions: usize,
}

impl SalmonStore {
    /// Creates a new database at `path` with the given embedding dimension.
    ///
    /// Fails with [`SalmonError::AlreadyExists`] when the file is already
    /// there; the dimension is fixed for the lifetime of the index and can
    /// only change by rebuilding from scratch.
    pub async fn create(path: impl AsRef<Path>, dimensions: usize) -> Result<Self, SalmonError> {
        let path = path.as_ref();
        if path.exists() {
            return Err(SalmonError::AlreadyExists(format!(
                "database already exists: {}",
                path.display()
            )));
        }
        if dimensions == 0 {
            return Err(SalmonError::InvalidInput(
                "embedding dimension must be positive".into(),
            ));
        }

        register_sqlite_vec()?;
        let conn = Connection::open(path.to_path_buf()).await?;
        let sentinel = embedding_to_blob(&vec![0.0; dimensions]);
        conn.call(move |conn| {
            let tx = conn.transaction().map_err(tokio_rusqlite::Error::Rusqlite)?;
            tx.execute_batch(
                "CREATE TABLE meta (
                     key TEXT PRIMARY KEY,
                     value INTEGER NOT NULL
                 );
                 CREATE TABLE resources (
                     id INTEGER PRIMARY KEY,
                     url TEXT NOT NULL UNIQUE,
                     title TEXT NOT NULL
                 );
                 CREATE TABLE chunks (
                     id INTEGER PRIMARY KEY,
                     chunk TEXT NOT NULL,
                     embedding BLOB NOT NULL,
                     resource_id INTEGER NOT NULL REFERENCES resources (id)
                 );",
            )
            .map_err(tokio_rusqlite::Error::Rusqlite)?;
            tx.execute(
                &format!(
                    "CREATE VIRTUAL TABLE vss_chunks USING vec0(chunk_embedding float[{dimensions}])"
                ),
                [],
            )
            .map_err(tokio_rusqlite::Error::Rusqlite)?;
            tx.execute(
                "INSERT INTO meta (key, value) VALUES ('dimensions', ?1)",
                [dimensions as i64],
            )
            .map_err(tokio_rusqlite::Error::Rusqlite)?;
            // An empty vec0 table cannot be relied on to answer KNN queries;
            // the sentinel keeps the index queryable before the first chunk.
            tx.execute(
                "INSERT INTO vss_chunks (rowid, chunk_embedding) VALUES (?1, ?2)",
                (SENTINEL_ROWID, sentinel),
            )
            .map_err(tokio_rusqlite::Error::Rusqlite)?;
            tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)?;
            Ok(())
        })
        .await?;

        debug!(path = %path.display(), dimensions, "created salmon database");
        Ok(Self { conn, dimensions })
    }

    /// Opens an existing database, reading back the recorded dimension.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, SalmonError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SalmonError::NotFound(format!(
                "database not found: {} (run `salmon init` first)",
                path.display()
            )));
        }

        register_sqlite_vec()?;
        let conn = Connection::open(path.to_path_buf()).await?;
        let dimensions = conn
            .call(|conn| {
                conn.query_row(
                    "SELECT value FROM meta WHERE key = 'dimensions'",
                    [],
                    |row| row.get::<_, i64>(0),
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await
            .map_err(|err| {
                SalmonError::Storage(format!("not a salmon database: {err}"))
            })?;

        Ok(Self {
            conn,
            dimensions: dimensions as usize,
        })
    }

    /// Embedding dimension fixed at creation time.
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub(crate) fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Cheap dedup probe on the unique URL key, called before any fetch or
    /// embedding work is spent on a URL.
    pub async fn resource_exists_by_url(&self, url: &str) -> Result<bool, SalmonError> {
        let url = url.to_string();
        let exists = self
            .conn
            .call(move |conn| {
                conn.query_row("SELECT id FROM resources WHERE url = ?1", [&url], |row| {
                    row.get::<_, i64>(0)
                })
                .optional()
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await?;
        Ok(exists.is_some())
    }

    /// Atomically persists one resource with all of its chunks.
    ///
    /// Chunk ids are assigned ascending in sequence order (the index-sync
    /// invariant). A dimension mismatch rejects the whole resource before
    /// anything is written; a duplicate URL surfaces as `AlreadyExists`.
    pub async fn save_resource(&self, resource: NewResource) -> Result<SavedResource, SalmonError> {
        if resource.chunks.len() != resource.embeddings.len() {
            return Err(SalmonError::InvalidInput(format!(
                "{} chunks but {} embeddings for {}",
                resource.chunks.len(),
                resource.embeddings.len(),
                resource.url
            )));
        }
        for embedding in &resource.embeddings {
            if embedding.len() != self.dimensions {
                return Err(SalmonError::InvalidInput(format!(
                    "embedding dimension {} does not match index dimension {}",
                    embedding.len(),
                    self.dimensions
                )));
            }
        }

        let saved = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction().map_err(tokio_rusqlite::Error::Rusqlite)?;
                tx.execute(
                    "INSERT INTO resources (url, title) VALUES (?1, ?2)",
                    (&resource.url, &resource.title),
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let resource_id = tx.last_insert_rowid();

                let mut chunk_ids = Vec::with_capacity(resource.chunks.len());
                for (text, embedding) in resource.chunks.iter().zip(&resource.embeddings) {
                    tx.execute(
                        "INSERT INTO chunks (chunk, embedding, resource_id) VALUES (?1, ?2, ?3)",
                        (text, embedding_to_blob(embedding), resource_id),
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                    chunk_ids.push(tx.last_insert_rowid());
                }

                tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(SavedResource {
                    resource_id,
                    chunk_ids,
                })
            })
            .await
            .map_err(map_unique_url)?;

        debug!(
            resource_id = saved.resource_id,
            chunks = saved.chunk_ids.len(),
            "saved resource"
        );
        Ok(saved)
    }

    /// Point lookup of a resource and its chunk count.
    pub async fn get_resource(&self, id: i64) -> Result<Resource, SalmonError> {
        let found = self
            .conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT r.id, r.url, r.title,
                            (SELECT COUNT(*) FROM chunks c WHERE c.resource_id = r.id)
                     FROM resources r
                     WHERE r.id = ?1",
                    [id],
                    |row| {
                        Ok(Resource {
                            id: row.get(0)?,
                            url: row.get(1)?,
                            title: row.get(2)?,
                            chunk_count: row.get::<_, i64>(3)? as usize,
                        })
                    },
                )
                .optional()
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await?;

        found.ok_or_else(|| SalmonError::NotFound(format!("resource {id}")))
    }

    /// Point lookup of a chunk, embedding decoded.
    pub async fn get_chunk(&self, id: i64) -> Result<Chunk, SalmonError> {
        let found = self
            .conn
            .call(move |conn| {
                conn.query_row(
                    "SELECT id, resource_id, chunk, embedding FROM chunks WHERE id = ?1",
                    [id],
                    |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, i64>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, Vec<u8>>(3)?,
                        ))
                    },
                )
                .optional()
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await?;

        let (id, resource_id, text, blob) =
            found.ok_or_else(|| SalmonError::NotFound(format!("chunk {id}")))?;
        Ok(Chunk {
            id,
            resource_id,
            text,
            embedding: blob_to_embedding(&blob)?,
        })
    }

    /// Deletes a resource, its chunks, and their vector index entries in one
    /// transaction; returns the deleted resource for reporting.
    pub async fn delete_resource(&self, id: i64) -> Result<Resource, SalmonError> {
        let deleted = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction().map_err(tokio_rusqlite::Error::Rusqlite)?;
                let resource = tx
                    .query_row(
                        "SELECT r.id, r.url, r.title,
                                (SELECT COUNT(*) FROM chunks c WHERE c.resource_id = r.id)
                         FROM resources r
                         WHERE r.id = ?1",
                        [id],
                        |row| {
                            Ok(Resource {
                                id: row.get(0)?,
                                url: row.get(1)?,
                                title: row.get(2)?,
                                chunk_count: row.get::<_, i64>(3)? as usize,
                            })
                        },
                    )
                    .optional()
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;

                let Some(resource) = resource else {
                    return Ok(None);
                };

                // Synchronous cascade: index entries go in the same
                // transaction so queries never see stale vectors.
                tx.execute(
                    "DELETE FROM vss_chunks
                     WHERE rowid IN (SELECT id FROM chunks WHERE resource_id = ?1)",
                    [id],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)?;
                tx.execute("DELETE FROM chunks WHERE resource_id = ?1", [id])
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                tx.execute("DELETE FROM resources WHERE id = ?1", [id])
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok(Some(resource))
            })
            .await?;

        deleted.ok_or_else(|| SalmonError::NotFound(format!("resource {id}")))
    }

    /// Largest chunk id in the relational store, 0 when empty.
    pub async fn max_chunk_id(&self) -> Result<i64, SalmonError> {
        let max = self
            .conn
            .call(|conn| {
                conn.query_row("SELECT COALESCE(MAX(id), 0) FROM chunks", [], |row| {
                    row.get::<_, i64>(0)
                })
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await?;
        Ok(max)
    }
}

/// Duplicate URLs hit the UNIQUE constraint; everything else is a plain
/// storage failure. `tokio-rusqlite` does not re-export the underlying error
/// enum, so the canonical constraint message is matched instead.
fn map_unique_url(err: tokio_rusqlite::Error) -> SalmonError {
    let message = err.to_string();
    if message.contains("UNIQUE constraint failed: resources.url") {
        SalmonError::AlreadyExists("resource URL already indexed".into())
    } else {
        SalmonError::Storage(message)
    }
}

/// Encodes an embedding as the little-endian f32 blob `sqlite-vec` consumes,
/// so index sync can copy rows without re-encoding.
pub(crate) fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

pub(crate) fn blob_to_embedding(blob: &[u8]) -> Result<Vec<f32>, SalmonError> {
    if blob.len() % 4 != 0 {
        return Err(SalmonError::Storage(format!(
            "embedding blob length {} is not a multiple of 4",
            blob.len()
        )));
    }
    Ok(blob
        .chunks_exact(4)
        .map(|bytes| f32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
        .collect())
}

/// Registers sqlite-vec as an auto-extension, once per process.
fn register_sqlite_vec() -> Result<(), SalmonError> {
    static REGISTRATION: OnceLock<Result<(), String>> = OnceLock::new();

    let result = REGISTRATION.get_or_init(|| unsafe {
        type SqliteExtensionInit = unsafe extern "C" fn(
            *mut ffi::sqlite3,
            *mut *const c_char,
            *const ffi::sqlite3_api_routines,
        ) -> i32;

        let init: unsafe extern "C" fn() = sqlite_vec::sqlite3_vec_init;
        let init_fn: SqliteExtensionInit =
            transmute::<unsafe extern "C" fn(), SqliteExtensionInit>(init);
        let rc = ffi::sqlite3_auto_extension(Some(init_fn));
        if rc != 0 {
            Err(format!("failed to register sqlite-vec extension (code {rc})"))
        } else {
            Ok(())
        }
    });

    result.clone().map_err(SalmonError::Storage)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedding_blob_round_trips() {
        let embedding = vec![0.0f32, 1.5, -2.25, f32::MIN_POSITIVE];
        let blob = embedding_to_blob(&embedding);
        assert_eq!(blob.len(), 16);
        assert_eq!(blob_to_embedding(&blob).unwrap(), embedding);
    }

    #[test]
    fn truncated_blob_is_rejected() {
        let err = blob_to_embedding(&[0u8, 1, 2]).unwrap_err();
        assert!(matches!(err, SalmonError::Storage(_)));
    }
}
