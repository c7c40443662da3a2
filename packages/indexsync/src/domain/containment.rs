//! Containment Index
//!
//! Static map from an entity type to the index roots whose documents contain it,
//! and the term fields through which the containing documents can be found by
//! the embedded entity's id.
//!
//! ```text
//! Place (root) ── sorcerers ──▶ Sorcerer ── books ──▶ Book
//!
//! roots_containing("Place")    = [Place (direct)]
//! roots_containing("Sorcerer") = [Place via "sorcerers.id"]
//! roots_containing("Book")     = [Place via "sorcerers.books.id"]
//! ```
//!
//! Built once at startup, read-only afterwards.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::error::{Result, SyncError};

/// How documents of one root type are affected by changes to an entity type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootLookup {
    pub root_type: String,
    /// The entity is itself this root: mutate its own document
    pub direct: bool,
    /// Term fields of the root document holding the embedded entity's id
    pub id_fields: Vec<String>,
}

/// All roots affected by one entity type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainmentEntry {
    pub entity_type: String,
    pub roots: Vec<RootLookup>,
}

#[derive(Debug, Clone, Default)]
pub struct ContainmentIndex {
    entries: HashMap<String, ContainmentEntry>,
    root_types: Vec<String>,
}

impl ContainmentIndex {
    pub fn builder() -> ContainmentIndexBuilder {
        ContainmentIndexBuilder::default()
    }

    pub fn entry(&self, entity_type: &str) -> Option<&ContainmentEntry> {
        self.entries.get(entity_type)
    }

    /// Roots whose documents must be touched when `entity_type` changes.
    ///
    /// Empty when the type is tracked by a log table but not indexed.
    pub fn roots_containing(&self, entity_type: &str) -> &[RootLookup] {
        self.entries
            .get(entity_type)
            .map(|entry| entry.roots.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_root(&self, entity_type: &str) -> bool {
        self.root_types.iter().any(|root| root == entity_type)
    }

    pub fn root_types(&self) -> &[String] {
        &self.root_types
    }

    /// Every term field used for containment lookups, sorted
    pub fn id_fields(&self) -> BTreeSet<&str> {
        self.entries
            .values()
            .flat_map(|entry| &entry.roots)
            .flat_map(|lookup| &lookup.id_fields)
            .map(String::as_str)
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContainmentIndexBuilder {
    roots: Vec<String>,
    embeddings: Vec<(String, String, String)>,
}

impl ContainmentIndexBuilder {
    /// Declare an index root type
    pub fn root(mut self, root_type: impl Into<String>) -> Self {
        let root_type = root_type.into();
        if !self.roots.contains(&root_type) {
            self.roots.push(root_type);
        }
        self
    }

    /// Declare that documents of `root_type` embed `entity_type`, with the
    /// embedded id stored in term field `id_field`
    pub fn embeds(
        mut self,
        root_type: impl Into<String>,
        entity_type: impl Into<String>,
        id_field: impl Into<String>,
    ) -> Self {
        self.embeddings
            .push((root_type.into(), entity_type.into(), id_field.into()));
        self
    }

    pub fn build(self) -> Result<ContainmentIndex> {
        let mut entries: HashMap<String, ContainmentEntry> = HashMap::new();

        for root in &self.roots {
            entry_for(&mut entries, root).roots.push(RootLookup {
                root_type: root.clone(),
                direct: true,
                id_fields: Vec::new(),
            });
        }

        for (root, entity, field) in self.embeddings {
            if !self.roots.contains(&root) {
                return Err(SyncError::invalid_model(format!(
                    "'{}' embeds '{}' but is not a declared index root",
                    root, entity
                )));
            }
            if field.is_empty() {
                return Err(SyncError::invalid_model(format!(
                    "Embedding of '{}' in '{}' has an empty id field",
                    entity, root
                )));
            }

            let entry = entry_for(&mut entries, &entity);
            match entry.roots.iter_mut().find(|lookup| lookup.root_type == root) {
                Some(lookup) => {
                    if !lookup.id_fields.contains(&field) {
                        lookup.id_fields.push(field);
                    }
                }
                None => entry.roots.push(RootLookup {
                    root_type: root,
                    direct: false,
                    id_fields: vec![field],
                }),
            }
        }

        Ok(ContainmentIndex {
            entries,
            root_types: self.roots,
        })
    }
}

fn entry_for<'a>(
    entries: &'a mut HashMap<String, ContainmentEntry>,
    entity_type: &str,
) -> &'a mut ContainmentEntry {
    entries
        .entry(entity_type.to_string())
        .or_insert_with(|| ContainmentEntry {
            entity_type: entity_type.to_string(),
            roots: Vec::new(),
        })
}
