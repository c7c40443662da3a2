//! Index Updater
//!
//! Applies a batch of change events to the full-text index. Root entities
//! are rewritten or removed directly; embedded entities cascade to every
//! root document that contains them:
//!
//! ```text
//! Sorcerer#42 DELETE
//!   └─ find_ids(Place, "sorcerers.id", "42")  ─▶ [Place#7]
//!        └─ get_batch(Place, [7])             ─▶ update(Place#7)
//! ```
//!
//! One entity session and one index transaction per batch. The index is
//! committed before `on_batch` returns, so a later log rollback only causes
//! a replay, which is idempotent.

use serde::Serialize;
use std::collections::{BTreeSet, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, warn};

use crate::domain::{
    ChangeEvent, ContainmentIndex, EntityId, EntityProvider, EntitySession, EventType,
    IndexEngine, IndexTransaction, RootLookup, UpdateConsumer,
};
use crate::error::{Result, SyncError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdaterConfig {
    /// Page size for containing-root lookups and batched root loads
    pub page_size: usize,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self { page_size: 100 }
    }
}

/// Index mutations issued for one batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchOutcome {
    pub updated: usize,
    pub deleted: usize,
    /// Events for types outside every root, or for entities that vanished
    pub skipped: usize,
    /// Root documents refreshed through containment
    pub cascaded: usize,
}

#[derive(Debug, Default)]
struct Counters {
    batches: AtomicU64,
    failed_batches: AtomicU64,
    updated: AtomicU64,
    deleted: AtomicU64,
    skipped: AtomicU64,
    cascaded: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpdaterStats {
    pub batches: u64,
    pub failed_batches: u64,
    pub updated: u64,
    pub deleted: u64,
    pub skipped: u64,
    pub cascaded: u64,
}

/// Closes the entity session on every exit path
struct SessionGuard<'a> {
    session: Box<dyn EntitySession + 'a>,
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.session.close() {
            warn!(error = %err, "Failed to close entity session");
        }
    }
}

pub struct IndexUpdater {
    containment: Arc<ContainmentIndex>,
    provider: Arc<dyn EntityProvider>,
    index: Arc<dyn IndexEngine>,
    config: UpdaterConfig,
    counters: Counters,
}

impl IndexUpdater {
    pub fn new(
        containment: Arc<ContainmentIndex>,
        provider: Arc<dyn EntityProvider>,
        index: Arc<dyn IndexEngine>,
        config: UpdaterConfig,
    ) -> Result<Self> {
        if config.page_size == 0 {
            return Err(SyncError::config("page_size must be positive"));
        }
        Ok(Self {
            containment,
            provider,
            index,
            config,
            counters: Counters::default(),
        })
    }

    pub fn containment(&self) -> &ContainmentIndex {
        &self.containment
    }

    pub fn stats(&self) -> UpdaterStats {
        UpdaterStats {
            batches: self.counters.batches.load(Ordering::Relaxed),
            failed_batches: self.counters.failed_batches.load(Ordering::Relaxed),
            updated: self.counters.updated.load(Ordering::Relaxed),
            deleted: self.counters.deleted.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
            cascaded: self.counters.cascaded.load(Ordering::Relaxed),
        }
    }

    /// Apply one batch inside a single index transaction
    pub fn apply(&self, events: &[ChangeEvent]) -> Result<BatchOutcome> {
        match self.apply_inner(events) {
            Ok(outcome) => {
                self.counters.batches.fetch_add(1, Ordering::Relaxed);
                self.counters.updated.fetch_add(outcome.updated as u64, Ordering::Relaxed);
                self.counters.deleted.fetch_add(outcome.deleted as u64, Ordering::Relaxed);
                self.counters.skipped.fetch_add(outcome.skipped as u64, Ordering::Relaxed);
                self.counters.cascaded.fetch_add(outcome.cascaded as u64, Ordering::Relaxed);
                debug!(
                    events = events.len(),
                    updated = outcome.updated,
                    deleted = outcome.deleted,
                    cascaded = outcome.cascaded,
                    "Index batch committed"
                );
                Ok(outcome)
            }
            Err(err) => {
                self.counters.failed_batches.fetch_add(1, Ordering::Relaxed);
                Err(err)
            }
        }
    }

    fn apply_inner(&self, events: &[ChangeEvent]) -> Result<BatchOutcome> {
        let mut outcome = BatchOutcome::default();
        if events.is_empty() {
            return Ok(outcome);
        }

        let mut guard = SessionGuard {
            session: self.provider.open()?,
        };
        let mut tx = self.index.begin()?;

        for event in events {
            if let Err(err) = self.apply_event(event, &mut *guard.session, &mut *tx, &mut outcome) {
                error!(event = %event, error = %err, "Index update failed, rolling back index transaction");
                if let Err(rollback_err) = tx.rollback() {
                    error!(error = %rollback_err, "Index rollback failed");
                }
                return Err(err);
            }
        }

        tx.commit()?;
        Ok(outcome)
    }

    fn apply_event(
        &self,
        event: &ChangeEvent,
        session: &mut (dyn EntitySession + '_),
        tx: &mut (dyn IndexTransaction + '_),
        outcome: &mut BatchOutcome,
    ) -> Result<()> {
        let lookups = self.containment.roots_containing(&event.entity_type);
        if lookups.is_empty() {
            debug!(entity_type = %event.entity_type, "Type is not part of any index root, skipping");
            outcome.skipped += 1;
            return Ok(());
        }

        match event.event_type {
            EventType::Insert | EventType::Update => {
                let Some(entity) = session.get(&event.entity_type, &event.id)? else {
                    // A later DELETE in the log takes care of it
                    debug!(event = %event, "Entity no longer exists, skipping");
                    outcome.skipped += 1;
                    return Ok(());
                };
                for lookup in lookups {
                    if lookup.direct {
                        tx.update(entity.clone())?;
                        outcome.updated += 1;
                    }
                    self.refresh_containing_roots(lookup, &event.id, session, tx, outcome)?;
                }
            }
            EventType::Delete => {
                // Join-table rows report DELETE for owners that still exist
                let survivor = if lookups.iter().any(|lookup| lookup.direct) {
                    session.get(&event.entity_type, &event.id)?
                } else {
                    None
                };
                for lookup in lookups {
                    if lookup.direct {
                        match &survivor {
                            Some(entity) => {
                                debug!(event = %event, "Root still exists, refreshing instead of deleting");
                                tx.update(entity.clone())?;
                                outcome.updated += 1;
                            }
                            None => {
                                tx.delete(&event.entity_type, &event.id)?;
                                outcome.deleted += 1;
                            }
                        }
                    }
                    self.refresh_containing_roots(lookup, &event.id, session, tx, outcome)?;
                }
            }
        }
        Ok(())
    }

    /// Re-index every `lookup.root_type` document that embeds `id`
    fn refresh_containing_roots(
        &self,
        lookup: &RootLookup,
        id: &EntityId,
        session: &mut (dyn EntitySession + '_),
        tx: &mut (dyn IndexTransaction + '_),
        outcome: &mut BatchOutcome,
    ) -> Result<()> {
        if lookup.id_fields.is_empty() {
            return Ok(());
        }

        let term = id.to_term();
        let page_size = self.config.page_size;
        let mut root_ids = BTreeSet::new();
        for field in &lookup.id_fields {
            let mut first_result = 0;
            loop {
                let page =
                    self.index
                        .find_ids(&lookup.root_type, field, &term, first_result, page_size)?;
                let fetched = page.len();
                root_ids.extend(page);
                if fetched < page_size {
                    break;
                }
                first_result += page_size;
            }
        }

        if root_ids.is_empty() {
            return Ok(());
        }

        let root_ids: Vec<EntityId> = root_ids.into_iter().collect();
        let mut refreshed = HashSet::new();
        for chunk in root_ids.chunks(page_size) {
            let documents = session.get_batch(&lookup.root_type, chunk)?;
            for document in documents {
                if document.entity_type != lookup.root_type
                    || !chunk.contains(&document.id)
                    || !refreshed.insert(document.id.clone())
                {
                    continue;
                }
                tx.update(document)?;
                outcome.updated += 1;
                outcome.cascaded += 1;
            }
        }

        if refreshed.len() < root_ids.len() {
            debug!(
                root_type = %lookup.root_type,
                missing = root_ids.len() - refreshed.len(),
                "Containing roots no longer exist; left to their own delete events"
            );
        }
        Ok(())
    }
}

impl UpdateConsumer for IndexUpdater {
    fn name(&self) -> &str {
        "index_updater"
    }

    fn on_batch(&self, events: &[ChangeEvent]) -> Result<()> {
        self.apply(events).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EntityDocument;
    use crate::infrastructure::{InMemoryEntityProvider, InMemoryIndex};
    use pretty_assertions::assert_eq;

    fn containment() -> Arc<ContainmentIndex> {
        Arc::new(
            ContainmentIndex::builder()
                .root("Place")
                .embeds("Place", "Sorcerer", "sorcerers.id")
                .build()
                .unwrap(),
        )
    }

    fn place(id: i64, name: &str, sorcerers: &[i64]) -> EntityDocument {
        let mut document = EntityDocument::new("Place", EntityId::from(id)).field("name", name);
        for sorcerer in sorcerers {
            document = document.field("sorcerers.id", sorcerer.to_string());
        }
        document
    }

    fn updater(
        provider: &InMemoryEntityProvider,
        index: &InMemoryIndex,
        page_size: usize,
    ) -> IndexUpdater {
        IndexUpdater::new(
            containment(),
            Arc::new(provider.clone()),
            Arc::new(index.clone()),
            UpdaterConfig { page_size },
        )
        .unwrap()
    }

    fn event(entity: &str, id: i64, event_type: EventType) -> ChangeEvent {
        ChangeEvent::new(entity, EntityId::from(id), event_type)
    }

    #[test]
    fn test_root_insert_and_delete() {
        let provider = InMemoryEntityProvider::new();
        let index = InMemoryIndex::new();
        provider.put(place(7, "Hogwarts", &[]));
        let updater = updater(&provider, &index, 10);

        updater.apply(&[event("Place", 7, EventType::Insert)]).unwrap();
        assert_eq!(index.document("Place", &EntityId::from(7)), Some(place(7, "Hogwarts", &[])));

        provider.remove("Place", &EntityId::from(7));
        updater.apply(&[event("Place", 7, EventType::Delete)]).unwrap();
        assert_eq!(index.document("Place", &EntityId::from(7)), None);
    }

    #[test]
    fn test_root_delete_of_surviving_entity_refreshes_it() {
        let provider = InMemoryEntityProvider::new();
        let index = InMemoryIndex::new();
        provider.put(place(7, "Hogwarts", &[42]));
        let updater = updater(&provider, &index, 10);
        updater.apply(&[event("Place", 7, EventType::Insert)]).unwrap();

        // A place_sorcerer link row was deleted: the place itself is still there
        provider.put(place(7, "Hogwarts", &[]));
        let outcome = updater.apply(&[event("Place", 7, EventType::Delete)]).unwrap();

        assert_eq!(outcome.deleted, 0);
        assert_eq!(outcome.updated, 1);
        assert_eq!(index.document("Place", &EntityId::from(7)), Some(place(7, "Hogwarts", &[])));
    }

    #[test]
    fn test_embedded_delete_refreshes_containing_root() {
        let provider = InMemoryEntityProvider::new();
        let index = InMemoryIndex::new();
        provider.put(place(7, "Hogwarts", &[42]));
        let updater = updater(&provider, &index, 10);
        updater.apply(&[event("Place", 7, EventType::Insert)]).unwrap();

        // The sorcerer leaves; the database no longer links it to place 7
        provider.put(place(7, "Hogwarts", &[]));
        provider.remove("Sorcerer", &EntityId::from(42));
        let outcome = updater.apply(&[event("Sorcerer", 42, EventType::Delete)]).unwrap();

        assert_eq!(outcome.cascaded, 1);
        assert_eq!(outcome.deleted, 0);
        assert_eq!(
            index.document("Place", &EntityId::from(7)).unwrap().values("sorcerers.id"),
            &[] as &[String]
        );
    }

    #[test]
    fn test_cascade_pages_through_every_root() {
        let provider = InMemoryEntityProvider::new();
        let index = InMemoryIndex::new();
        let updater = updater(&provider, &index, 2);

        let inserts: Vec<ChangeEvent> = (1..=5)
            .map(|id| {
                provider.put(place(id, "shared", &[42]));
                event("Place", id, EventType::Insert)
            })
            .collect();
        updater.apply(&inserts).unwrap();

        for id in 1..=5 {
            provider.put(place(id, "renamed", &[42]));
        }
        provider.put(EntityDocument::new("Sorcerer", EntityId::from(42)).field("name", "Merlin"));
        let outcome = updater.apply(&[event("Sorcerer", 42, EventType::Update)]).unwrap();

        assert_eq!(outcome.cascaded, 5);
        for id in 1..=5 {
            assert_eq!(
                index.document("Place", &EntityId::from(id)).unwrap().values("name"),
                &["renamed".to_string()]
            );
        }
    }

    #[test]
    fn test_unrelated_type_and_vanished_entity_are_skipped() {
        let provider = InMemoryEntityProvider::new();
        let index = InMemoryIndex::new();
        let updater = updater(&provider, &index, 10);

        let outcome = updater
            .apply(&[
                event("Broomstick", 1, EventType::Update),
                event("Place", 99, EventType::Update),
            ])
            .unwrap();
        assert_eq!(outcome.skipped, 2);
        assert_eq!(index.len(), 0);
    }

    #[test]
    fn test_failure_rolls_back_whole_batch() {
        let provider = InMemoryEntityProvider::new();
        let index = InMemoryIndex::new();
        provider.put(place(1, "Hogwarts", &[]));
        provider.fail_on("Place", EntityId::from(2));
        let updater = updater(&provider, &index, 10);

        let result = updater.apply(&[
            event("Place", 1, EventType::Insert),
            event("Place", 2, EventType::Insert),
        ]);
        assert!(result.is_err());
        assert_eq!(index.len(), 0);
        assert_eq!(updater.stats().failed_batches, 1);
        assert_eq!(provider.open_sessions(), 0);
    }

    #[test]
    fn test_replay_is_idempotent() {
        let provider = InMemoryEntityProvider::new();
        let index = InMemoryIndex::new();
        provider.put(place(7, "Hogwarts", &[42]));
        let updater = updater(&provider, &index, 10);
        let batch = [
            event("Place", 7, EventType::Insert),
            event("Sorcerer", 42, EventType::Delete),
        ];

        updater.apply(&batch).unwrap();
        let first = index.snapshot();
        updater.apply(&batch).unwrap();
        assert_eq!(index.snapshot(), first);
    }
}
