//! Durable storage: relational tables plus the vector index, kept in sync.
//!
//! ```text
//! resources ──1:N── chunks ──mirrored by id── vss_chunks (vec0)
//!                      │                          ▲
//!                      └── sync_index (id > hwm) ─┘
//! ```
//!
//! [`sqlite.rs`](sqlite) owns the connection, schema and relational CRUD;
//! [`index.rs`](index) owns the append-only index sync and the two KNN query
//! shapes. The relational tables are the single source of truth; `vss_chunks`
//! is a secondary structure that `sync_index` makes eventually-exactly mirror
//! the chunk table.

pub mod index;
pub mod sqlite;

pub use index::SyncReport;
pub use sqlite::SalmonStore;
