//! Semantic article index over SQLite.
//!
//! ```text
//! URL ──► ingestion::IngestionCoordinator ─┬─► document::DocumentFetcher
//!                                          ├─► splitter::TextSplitter
//!                                          ├─► embeddings::EmbeddingProvider
//!                                          └─► store::SalmonStore (resources + chunks)
//!                                                        │
//!                                       store::SalmonStore::sync_index
//!                                                        ▼
//!                                              vss_chunks (sqlite-vec)
//!                                                        │
//! query text ──► retrieval::Retriever ──► top chunks / top resources
//! ```
//!
//! The relational tables are the single source of truth; the vector index is
//! a mirror that `sync_index` catches up incrementally, by chunk id, exactly
//! once per chunk.

pub mod document;
pub mod embeddings;
pub mod ingestion;
pub mod retrieval;
pub mod splitter;
pub mod store;
pub mod types;

pub use document::{DocumentFetcher, ExtractedText, FetchedDocument};
pub use embeddings::{EmbeddingProvider, MockEmbeddingProvider, OpenAiEmbeddingProvider};
pub use ingestion::{IngestOutcome, IngestReport, IngestionCoordinator};
pub use retrieval::Retriever;
pub use splitter::TextSplitter;
pub use store::{SalmonStore, SyncReport};
pub use types::{Chunk, ChunkMatch, NewResource, Resource, SalmonError, SavedResource};
