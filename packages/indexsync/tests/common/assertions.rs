//! Custom assertions for index state

use indexsync::infrastructure::TantivyIndexEngine;
use indexsync::{EntityDocument, EntityId};

/// Assert that a document exists and return it
pub fn assert_indexed(index: &TantivyIndexEngine, entity_type: &str, id: i64) -> EntityDocument {
    index
        .document(entity_type, &EntityId::from(id))
        .unwrap()
        .unwrap_or_else(|| panic!("Expected {entity_type}#{id} to be indexed"))
}

pub fn assert_not_indexed(index: &TantivyIndexEngine, entity_type: &str, id: i64) {
    let document = index.document(entity_type, &EntityId::from(id)).unwrap();
    assert!(
        document.is_none(),
        "Expected {entity_type}#{id} to be absent, found {document:?}"
    );
}

/// Assert the embedded sorcerer names of a place document, in stored order
pub fn assert_sorcerers(document: &EntityDocument, expected: &[&str]) {
    assert_eq!(
        document.values("sorcerers.name"),
        expected,
        "Unexpected sorcerers in {}#{}",
        document.entity_type,
        document.id
    );
}
