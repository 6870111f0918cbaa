//! Ingestion coordinator: turn a URL into a persisted resource exactly once.
//!
//! Per URL: validate, dedup against the store, fetch and extract, split,
//! embed, save — all fetch/embed work happens before the transactional write.
//! Batches are partial-failure tolerant: one bad URL is reported and skipped,
//! never aborting the rest. The vector index is synced once before and once
//! after a batch so a query issued right after ingestion sees every new
//! chunk.

use std::sync::Arc;

use tracing::{info, warn};
use url::Url;

use crate::document::{DocumentFetcher, ExtractedText};
use crate::embeddings::EmbeddingProvider;
use crate::splitter::TextSplitter;
use crate::store::SalmonStore;
use crate::types::{NewResource, Resource, SalmonError};

/// Per-URL result of a batch ingestion.
#[derive(Clone, Debug)]
pub enum IngestOutcome {
    /// A new resource was persisted and will be searchable after sync.
    Indexed(Resource),
    /// The URL was already in the store; re-indexing is a no-op.
    SkippedDuplicate,
    /// This URL failed; the rest of the batch continued.
    Failed(String),
}

/// One line of the batch report.
#[derive(Clone, Debug)]
pub struct IngestReport {
    pub url: String,
    pub outcome: IngestOutcome,
}

/// Orchestrates dedup, fetch, split, embed and persistence.
pub struct IngestionCoordinator {
    store: SalmonStore,
    embedder: Arc<dyn EmbeddingProvider>,
    fetcher: DocumentFetcher,
    splitter: TextSplitter,
}

impl IngestionCoordinator {
    /// Builds a coordinator with the default fetcher and splitter.
    ///
    /// The provider's dimension must match the store's; a mismatch here
    /// would otherwise fail every single resource later.
    pub fn new(
        store: SalmonStore,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, SalmonError> {
        Self::with_parts(store, embedder, DocumentFetcher::new()?, TextSplitter::default())
    }

    pub fn with_parts(
        store: SalmonStore,
        embedder: Arc<dyn EmbeddingProvider>,
        fetcher: DocumentFetcher,
        splitter: TextSplitter,
    ) -> Result<Self, SalmonError> {
        if embedder.dimensions() != store.dimensions() {
            return Err(SalmonError::InvalidInput(format!(
                "provider '{}' produces {}-dimensional vectors but the index was created with {}",
                embedder.name(),
                embedder.dimensions(),
                store.dimensions()
            )));
        }
        Ok(Self {
            store,
            embedder,
            fetcher,
            splitter,
        })
    }

    /// Ingests one URL.
    ///
    /// Returns `Ok(None)` when the URL is already indexed (idempotent soft
    /// skip, decided before any network or embedding work). A malformed URL
    /// is [`SalmonError::InvalidInput`] and makes no network call.
    pub async fn ingest_url(&self, url: &str) -> Result<Option<Resource>, SalmonError> {
        let parsed = Url::parse(url)
            .map_err(|err| SalmonError::InvalidInput(format!("invalid URL {url}: {err}")))?;

        if self.store.resource_exists_by_url(parsed.as_str()).await? {
            info!(url = %parsed, "resource already indexed, skipping");
            return Ok(None);
        }

        let document = self.fetcher.fetch(&parsed).await?;
        let chunks = match document.text {
            ExtractedText::Body(body) => self.splitter.split(&body),
            ExtractedText::Synthetic(chunks) => chunks,
        };
        let embeddings = self.embedder.embed_batch(&chunks).await?;

        let title = document.title;
        let saved = self
            .store
            .save_resource(NewResource {
                url: parsed.to_string(),
                title: title.clone(),
                chunks,
                embeddings,
            })
            .await?;

        info!(
            url = %parsed,
            resource_id = saved.resource_id,
            chunks = saved.chunk_ids.len(),
            "indexed resource"
        );
        Ok(Some(Resource {
            id: saved.resource_id,
            url: parsed.to_string(),
            title,
            chunk_count: saved.chunk_ids.len(),
        }))
    }

    /// Ingests a batch of URLs, reporting per-item outcomes.
    ///
    /// The index is synced before the first URL and after the last, so
    /// queries issued after this call observe the whole batch; a reader
    /// mid-batch may see a partial prefix.
    pub async fn ingest_batch(&self, urls: &[String]) -> Result<Vec<IngestReport>, SalmonError> {
        self.store.sync_index().await?;

        let mut reports = Vec::with_capacity(urls.len());
        for url in urls {
            let outcome = match self.ingest_url(url).await {
                Ok(Some(resource)) => IngestOutcome::Indexed(resource),
                Ok(None) => IngestOutcome::SkippedDuplicate,
                Err(err) => {
                    warn!(url = %url, error = %err, "failed to ingest URL, continuing");
                    IngestOutcome::Failed(err.to_string())
                }
            };
            reports.push(IngestReport {
                url: url.clone(),
                outcome,
            });
        }

        self.store.sync_index().await?;
        Ok(reports)
    }
}
