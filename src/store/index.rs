//! Index sync engine and KNN retrieval over the `vss_chunks` vector table.
//!
//! Sync is append-only and monotonic: it reads the index high-water mark
//! (the largest chunk id already mirrored) and inserts exactly the chunks
//! above it, in id order, inside one transaction. It never rescans or
//! re-embeds history, is idempotent, and a failed call rolls back entirely so
//! a retry resumes from the same mark.

use tracing::debug;

use crate::store::sqlite::SalmonStore;
use crate::types::{ChunkMatch, SalmonError};

/// Outcome of one [`SalmonStore::sync_index`] call.
#[derive(Clone, Copy, Debug)]
pub struct SyncReport {
    /// High-water mark observed before the sync.
    pub high_water_mark: i64,
    /// Number of chunks newly mirrored into the vector index.
    pub mirrored: usize,
}

impl SalmonStore {
    /// Largest chunk id currently mirrored into the vector index, 0 when only
    /// the bootstrap sentinel exists.
    pub async fn high_water_mark(&self) -> Result<i64, SalmonError> {
        let hwm = self
            .connection()
            .call(|conn| {
                conn.query_row(
                    "SELECT COALESCE(MAX(rowid), 0) FROM vss_chunks",
                    [],
                    |row| row.get::<_, i64>(0),
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await?;
        Ok(hwm)
    }

    /// Mirrors every chunk inserted since the last sync into the vector
    /// index.
    ///
    /// Safe to call at any time, any number of times. If the high-water mark
    /// exceeds the store's largest chunk id the index has entries the store
    /// no longer explains; that is [`SalmonError::IndexInconsistency`] and
    /// nothing is written.
    pub async fn sync_index(&self) -> Result<SyncReport, SalmonError> {
        let outcome = self
            .connection()
            .call(|conn| {
                let tx = conn.transaction().map_err(tokio_rusqlite::Error::Rusqlite)?;
                let hwm: i64 = tx
                    .query_row(
                        "SELECT COALESCE(MAX(rowid), 0) FROM vss_chunks",
                        [],
                        |row| row.get(0),
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let store_max: i64 = tx
                    .query_row("SELECT COALESCE(MAX(id), 0) FROM chunks", [], |row| {
                        row.get(0)
                    })
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;

                if hwm > store_max {
                    // Dropping the transaction rolls back; never advance past
                    // a mark the chunk table cannot account for.
                    return Ok((hwm, store_max, None));
                }

                let mirrored = tx
                    .execute(
                        "INSERT INTO vss_chunks (rowid, chunk_embedding)
                         SELECT c.id, c.embedding
                         FROM chunks c
                         WHERE c.id > ?1
                         ORDER BY c.id",
                        [hwm],
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                tx.commit().map_err(tokio_rusqlite::Error::Rusqlite)?;
                Ok((hwm, store_max, Some(mirrored)))
            })
            .await?;

        let (high_water_mark, store_max, mirrored) = outcome;
        let mirrored = mirrored.ok_or_else(|| {
            SalmonError::IndexInconsistency(format!(
                "index high-water mark {high_water_mark} exceeds max chunk id {store_max}"
            ))
        })?;

        debug!(high_water_mark, mirrored, "index sync complete");
        Ok(SyncReport {
            high_water_mark,
            mirrored,
        })
    }

    /// The `n` nearest chunks to `embedding`, ascending by distance (ties by
    /// chunk id). The same resource may appear more than once.
    pub async fn top_chunks(
        &self,
        embedding: &[f32],
        n: usize,
    ) -> Result<Vec<ChunkMatch>, SalmonError> {
        let query = self.knn_query_param(embedding, n)?;
        let matches = self
            .connection()
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "SELECT h.distance, c.id, c.chunk, r.id, r.title, r.url
                         FROM (SELECT rowid, distance
                               FROM vss_chunks
                               WHERE chunk_embedding MATCH vec_f32(?1) AND k = ?2) h
                         JOIN chunks c ON c.id = h.rowid
                         JOIN resources r ON r.id = c.resource_id
                         ORDER BY h.distance, c.id
                         LIMIT ?3",
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let rows = stmt
                    .query_map((&query.embedding_json, query.k, query.n), |row| {
                        Ok(ChunkMatch {
                            distance: row.get(0)?,
                            chunk_id: row.get(1)?,
                            chunk_text: row.get(2)?,
                            resource_id: row.get(3)?,
                            resource_title: row.get(4)?,
                            resource_url: row.get(5)?,
                        })
                    })
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;

                let mut matches = Vec::new();
                for row in rows {
                    matches.push(row.map_err(tokio_rusqlite::Error::Rusqlite)?);
                }
                Ok(matches)
            })
            .await?;
        Ok(matches)
    }

    /// The distinct resources among the `n` nearest chunks, each represented
    /// by its single best-matching chunk, ascending by that best distance.
    ///
    /// Grouping happens after the KNN pass over `n` candidates: a resource
    /// whose best chunk ranks below the top `n` is absent, and the result may
    /// hold fewer than `n` resources when several top chunks share one.
    /// Widening `n` widens the candidate pool.
    pub async fn top_resources_by_best_chunk(
        &self,
        embedding: &[f32],
        n: usize,
    ) -> Result<Vec<ChunkMatch>, SalmonError> {
        let query = self.knn_query_param(embedding, n)?;
        let matches = self
            .connection()
            .call(move |conn| {
                let mut stmt = conn
                    .prepare(
                        "WITH hits AS (SELECT rowid, distance
                                       FROM vss_chunks
                                       WHERE chunk_embedding MATCH vec_f32(?1) AND k = ?2),
                              candidates AS (SELECT h.distance AS distance,
                                                    c.id AS chunk_id,
                                                    c.chunk AS chunk,
                                                    r.id AS resource_id,
                                                    r.title AS title,
                                                    r.url AS url
                                             FROM hits h
                                             JOIN chunks c ON c.id = h.rowid
                                             JOIN resources r ON r.id = c.resource_id
                                             ORDER BY h.distance, c.id
                                             LIMIT ?3)
                         SELECT MIN(distance), chunk_id, chunk, resource_id, title, url
                         FROM candidates
                         GROUP BY resource_id
                         ORDER BY 1, chunk_id",
                    )
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;
                let rows = stmt
                    .query_map((&query.embedding_json, query.k, query.n), |row| {
                        Ok(ChunkMatch {
                            distance: row.get(0)?,
                            chunk_id: row.get(1)?,
                            chunk_text: row.get(2)?,
                            resource_id: row.get(3)?,
                            resource_title: row.get(4)?,
                            resource_url: row.get(5)?,
                        })
                    })
                    .map_err(tokio_rusqlite::Error::Rusqlite)?;

                let mut matches = Vec::new();
                for row in rows {
                    matches.push(row.map_err(tokio_rusqlite::Error::Rusqlite)?);
                }
                Ok(matches)
            })
            .await?;
        Ok(matches)
    }

    /// Validates query parameters and prepares the KNN bind values. The KNN
    /// breadth is widened by one so the rowid-0 sentinel, which the join
    /// against `chunks` discards, can never crowd out a real candidate.
    fn knn_query_param(&self, embedding: &[f32], n: usize) -> Result<KnnQuery, SalmonError> {
        if embedding.len() != self.dimensions() {
            return Err(SalmonError::InvalidInput(format!(
                "query embedding dimension {} does not match index dimension {}",
                embedding.len(),
                self.dimensions()
            )));
        }
        if n == 0 {
            return Err(SalmonError::InvalidInput(
                "requested breadth must be positive".into(),
            ));
        }
        let embedding_json = serde_json::to_string(embedding)
            .map_err(|err| SalmonError::InvalidInput(format!("unencodable embedding: {err}")))?;
        Ok(KnnQuery {
            embedding_json,
            k: n as i64 + 1,
            n: n as i64,
        })
    }
}

struct KnnQuery {
    embedding_json: String,
    k: i64,
    n: i64,
}
