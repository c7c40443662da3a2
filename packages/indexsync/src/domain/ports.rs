//! Ports (trait interfaces)
//!
//! Port/Adapter split for everything outside the pipeline core:
//! - `LogStore`: transactional access to the trigger-populated log tables
//! - `UpdateConsumer`: receives ordered change batches
//! - `EntityProvider`: loads current entity state by id
//! - `IndexEngine`: full-text index writes and term lookups

use super::models::{ChangeEvent, EntityDocument, EntityId, EventModelInfo, LogRow};
use crate::error::Result;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Log Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Database holding the log tables
pub trait LogStore: Send + Sync {
    /// Begin a transaction. Reads, deletes and the final commit of one poll
    /// all happen inside it.
    fn begin(&self) -> Result<Box<dyn LogTransaction + '_>>;
}

/// One open log store transaction.
///
/// Dropping a transaction without `commit` rolls it back.
pub trait LogTransaction {
    /// Rows of `model`'s log table with `sequence_id > after`, ascending,
    /// at most `limit` of them
    fn fetch_window(
        &mut self,
        model: &EventModelInfo,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<LogRow>>;

    /// Delete exactly the given rows, returning how many were removed
    fn delete_rows(&mut self, model: &EventModelInfo, sequence_ids: &[i64]) -> Result<usize>;

    fn commit(self: Box<Self>) -> Result<()>;

    fn rollback(self: Box<Self>) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Consumers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Receives every non-empty batch, whole and in sequence order.
///
/// Called synchronously from inside the poll transaction: returning an error
/// may roll the poll back (see `ConsumerFailurePolicy`).
pub trait UpdateConsumer: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn on_batch(&self, events: &[ChangeEvent]) -> Result<()>;
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Entity Provider
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Loads entities by id (ORM, SQL queries, remote service, ...)
pub trait EntityProvider: Send + Sync {
    /// Open a session scoped to one batch
    fn open(&self) -> Result<Box<dyn EntitySession + '_>>;
}

pub trait EntitySession {
    /// Current state of the entity, `None` if it no longer exists
    fn get(&mut self, entity_type: &str, id: &EntityId) -> Result<Option<EntityDocument>>;

    /// Fetch several entities at once. Missing ids are left out and the
    /// result order is unspecified.
    fn get_batch(&mut self, entity_type: &str, ids: &[EntityId]) -> Result<Vec<EntityDocument>> {
        let mut documents = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(document) = self.get(entity_type, id)? {
                documents.push(document);
            }
        }
        Ok(documents)
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Index Engine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Full-text index holding one document per root entity
pub trait IndexEngine: Send + Sync {
    /// Begin a write transaction
    fn begin(&self) -> Result<Box<dyn IndexTransaction + '_>>;

    /// Ids of `root_type` documents whose term field `field` holds `value`,
    /// paged by `first_result`/`max_results`
    fn find_ids(
        &self,
        root_type: &str,
        field: &str,
        value: &str,
        first_result: usize,
        max_results: usize,
    ) -> Result<Vec<EntityId>>;
}

/// Pending index mutations.
///
/// Nothing is visible before `commit`; dropping without `commit` rolls back.
pub trait IndexTransaction {
    fn add(&mut self, document: EntityDocument) -> Result<()>;

    /// Replace the document with the same type and id (insert if absent)
    fn update(&mut self, document: EntityDocument) -> Result<()>;

    fn delete(&mut self, entity_type: &str, id: &EntityId) -> Result<()>;

    fn commit(self: Box<Self>) -> Result<()>;

    fn rollback(self: Box<Self>) -> Result<()>;
}
