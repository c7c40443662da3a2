//! Infrastructure Layer
//!
//! Port implementations:
//! - `SqliteLogStore`: log tables in SQLite (trigger-populated)
//! - `TantivyIndexEngine`: full-text index on disk or in RAM
//! - in-memory log store, index and entity provider for tests and embedding

pub mod memory_entity_provider;
pub mod memory_index;
pub mod memory_log_store;

#[cfg(feature = "sqlite")]
pub mod sqlite_log_store;

#[cfg(feature = "tantivy")]
pub mod tantivy_index;

pub use memory_entity_provider::InMemoryEntityProvider;
pub use memory_index::{IndexSnapshot, InMemoryIndex};
pub use memory_log_store::InMemoryLogStore;

#[cfg(feature = "sqlite")]
pub use sqlite_log_store::SqliteLogStore;

#[cfg(feature = "tantivy")]
pub use tantivy_index::{IndexLayout, TantivyIndexEngine};
