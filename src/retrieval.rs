//! Text-level retrieval: embed a query string, then rank against the index.
//!
//! The embedding provider is an explicit capability passed in at
//! construction; there is no process-wide model handle.

use std::sync::Arc;

use crate::embeddings::EmbeddingProvider;
use crate::store::SalmonStore;
use crate::types::{ChunkMatch, SalmonError};

/// Runs the two query shapes for a text query.
pub struct Retriever {
    store: SalmonStore,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl std::fmt::Debug for Retriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retriever")
            .field("store", &self.store)
            .field("embedder", &self.embedder.name())
            .finish()
    }
}

impl Retriever {
    pub fn new(
        store: SalmonStore,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, SalmonError> {
        if embedder.dimensions() != store.dimensions() {
            return Err(SalmonError::InvalidInput(format!(
                "provider '{}' produces {}-dimensional vectors but the index was created with {}",
                embedder.name(),
                embedder.dimensions(),
                store.dimensions()
            )));
        }
        Ok(Self { store, embedder })
    }

    /// The `n` chunks closest to `query`; the same resource may repeat.
    pub async fn top_chunks(&self, query: &str, n: usize) -> Result<Vec<ChunkMatch>, SalmonError> {
        let embedding = self.embedder.embed(query).await?;
        self.store.top_chunks(&embedding, n).await
    }

    /// The distinct resources among the `n` closest chunks to `query`, each
    /// represented by its best-matching chunk.
    pub async fn top_resources(
        &self,
        query: &str,
        n: usize,
    ) -> Result<Vec<ChunkMatch>, SalmonError> {
        let embedding = self.embedder.embed(query).await?;
        self.store.top_resources_by_best_chunk(&embedding, n).await
    }
}
