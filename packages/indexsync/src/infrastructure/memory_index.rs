//! In-Memory Index (for testing)
//!
//! BTreeMap-backed `IndexEngine`. Mutations are staged per transaction and
//! applied atomically on commit. Term lookups match field values exactly.

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::domain::{EntityDocument, EntityId, IndexEngine, IndexTransaction};
use crate::error::Result;

type DocumentKey = (String, EntityId);
pub type IndexSnapshot = BTreeMap<DocumentKey, EntityDocument>;

#[derive(Debug, Clone)]
enum Mutation {
    Upsert(EntityDocument),
    Delete(String, EntityId),
}

#[derive(Clone, Default)]
pub struct InMemoryIndex {
    documents: Arc<RwLock<IndexSnapshot>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn document(&self, entity_type: &str, id: &EntityId) -> Option<EntityDocument> {
        self.documents
            .read()
            .get(&(entity_type.to_string(), id.clone()))
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.documents.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.read().is_empty()
    }

    /// Copy of every committed document
    pub fn snapshot(&self) -> IndexSnapshot {
        self.documents.read().clone()
    }
}

impl IndexEngine for InMemoryIndex {
    fn begin(&self) -> Result<Box<dyn IndexTransaction + '_>> {
        Ok(Box::new(InMemoryIndexTransaction {
            index: self,
            staged: Vec::new(),
        }))
    }

    fn find_ids(
        &self,
        root_type: &str,
        field: &str,
        value: &str,
        first_result: usize,
        max_results: usize,
    ) -> Result<Vec<EntityId>> {
        Ok(self
            .documents
            .read()
            .values()
            .filter(|document| document.entity_type == root_type)
            .filter(|document| document.values(field).iter().any(|v| v == value))
            .skip(first_result)
            .take(max_results)
            .map(|document| document.id.clone())
            .collect())
    }
}

struct InMemoryIndexTransaction<'a> {
    index: &'a InMemoryIndex,
    staged: Vec<Mutation>,
}

impl IndexTransaction for InMemoryIndexTransaction<'_> {
    fn add(&mut self, document: EntityDocument) -> Result<()> {
        self.staged.push(Mutation::Upsert(document));
        Ok(())
    }

    fn update(&mut self, document: EntityDocument) -> Result<()> {
        self.staged.push(Mutation::Upsert(document));
        Ok(())
    }

    fn delete(&mut self, entity_type: &str, id: &EntityId) -> Result<()> {
        self.staged
            .push(Mutation::Delete(entity_type.to_string(), id.clone()));
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<()> {
        let InMemoryIndexTransaction { index, staged } = *self;
        let mut documents = index.documents.write();
        for mutation in staged {
            match mutation {
                Mutation::Upsert(document) => {
                    documents.insert((document.entity_type.clone(), document.id.clone()), document);
                }
                Mutation::Delete(entity_type, id) => {
                    documents.remove(&(entity_type, id));
                }
            }
        }
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
