//! In-Memory Entity Provider (for testing)
//!
//! Serves `EntityDocument`s from a map. Can be told to fail for one id, and
//! counts open sessions so callers can check that sessions get closed.

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::domain::{EntityDocument, EntityId, EntityProvider, EntitySession};
use crate::error::{Result, SyncError};

type EntityKey = (String, EntityId);

#[derive(Clone, Default)]
pub struct InMemoryEntityProvider {
    entities: Arc<RwLock<HashMap<EntityKey, EntityDocument>>>,
    failing: Arc<RwLock<HashSet<EntityKey>>>,
    open_sessions: Arc<AtomicUsize>,
}

impl InMemoryEntityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an entity
    pub fn put(&self, document: EntityDocument) {
        self.entities
            .write()
            .insert((document.entity_type.clone(), document.id.clone()), document);
    }

    pub fn remove(&self, entity_type: &str, id: &EntityId) -> Option<EntityDocument> {
        self.entities
            .write()
            .remove(&(entity_type.to_string(), id.clone()))
    }

    /// Make every `get` of this entity fail
    pub fn fail_on(&self, entity_type: &str, id: EntityId) {
        self.failing.write().insert((entity_type.to_string(), id));
    }

    pub fn open_sessions(&self) -> usize {
        self.open_sessions.load(Ordering::SeqCst)
    }
}

impl EntityProvider for InMemoryEntityProvider {
    fn open(&self) -> Result<Box<dyn EntitySession + '_>> {
        self.open_sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(InMemorySession {
            provider: self,
            closed: false,
        }))
    }
}

struct InMemorySession<'a> {
    provider: &'a InMemoryEntityProvider,
    closed: bool,
}

impl EntitySession for InMemorySession<'_> {
    fn get(&mut self, entity_type: &str, id: &EntityId) -> Result<Option<EntityDocument>> {
        if self.closed {
            return Err(SyncError::invalid_state("entity session already closed"));
        }
        let key = (entity_type.to_string(), id.clone());
        if self.provider.failing.read().contains(&key) {
            return Err(SyncError::entity_provider(format!(
                "failed to load {}#{}",
                entity_type, id
            )));
        }
        Ok(self.provider.entities.read().get(&key).cloned())
    }

    fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            self.provider.open_sessions.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}
