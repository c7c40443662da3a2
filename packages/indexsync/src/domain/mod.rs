//! Domain Layer
//!
//! Models, containment metadata and port traits. No database or index code.

pub mod containment;
pub mod models;
pub mod ports;

pub use containment::{ContainmentEntry, ContainmentIndex, ContainmentIndexBuilder, RootLookup};
pub use models::{
    ChangeEvent, EntityDocument, EntityId, EventModelInfo, EventModelInfoBuilder, EventType,
    IdColumnType, IdInfo, IdValue, LogRow, DEFAULT_EVENT_TYPE_COLUMN, DEFAULT_SEQUENCE_COLUMN,
};
pub use ports::{
    EntityProvider, EntitySession, IndexEngine, IndexTransaction, LogStore, LogTransaction,
    UpdateConsumer,
};
