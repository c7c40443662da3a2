//! Domain models for the change-capture pipeline
//!
//! - `LogRow`: one physical row of a trigger-populated log table
//! - `EventModelInfo`: static description of a log table and the ids it carries
//! - `ChangeEvent`: decoded `{entity_type, id, event_type}` unit handed to consumers
//! - `EntityDocument`: flattened, index-ready view of an entity

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

use crate::error::{Result, SyncError};

/// Default name of the sequence column in a log table
pub const DEFAULT_SEQUENCE_COLUMN: &str = "update_id";

/// Default name of the event-type discriminator column in a log table
pub const DEFAULT_EVENT_TYPE_COLUMN: &str = "event_case";

// ═══════════════════════════════════════════════════════════════════════════
// Event Type
// ═══════════════════════════════════════════════════════════════════════════

/// DML event recorded by a trigger.
///
/// The numeric code is what triggers write into the event-type column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Insert,
    Update,
    Delete,
}

impl EventType {
    pub const ALL: [EventType; 3] = [EventType::Insert, EventType::Update, EventType::Delete];

    pub fn code(&self) -> i64 {
        match self {
            EventType::Insert => 0,
            EventType::Update => 1,
            EventType::Delete => 2,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(EventType::Insert),
            1 => Some(EventType::Update),
            2 => Some(EventType::Delete),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Insert => "insert",
            EventType::Update => "update",
            EventType::Delete => "delete",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Identifiers
// ═══════════════════════════════════════════════════════════════════════════

/// A single id column value copied by a trigger
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdValue {
    Integer(i64),
    Text(String),
}

impl fmt::Display for IdValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdValue::Integer(v) => write!(f, "{}", v),
            IdValue::Text(v) => write!(f, "{}", v),
        }
    }
}

impl From<i64> for IdValue {
    fn from(value: i64) -> Self {
        IdValue::Integer(value)
    }
}

impl From<&str> for IdValue {
    fn from(value: &str) -> Self {
        IdValue::Text(value.to_string())
    }
}

impl From<String> for IdValue {
    fn from(value: String) -> Self {
        IdValue::Text(value)
    }
}

/// Entity identifier, possibly composite (one value per id column)
///
/// # Examples
///
/// ```rust
/// use indexsync::domain::EntityId;
///
/// let id = EntityId::from(42);
/// assert_eq!(id.to_string(), "42");
///
/// let composite = EntityId::new(vec![7.into(), "en".into()]);
/// assert_eq!(composite.to_string(), "7,en");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(Vec<IdValue>);

impl EntityId {
    pub fn new(values: Vec<IdValue>) -> Self {
        Self(values)
    }

    pub fn single(value: impl Into<IdValue>) -> Self {
        Self(vec![value.into()])
    }

    pub fn values(&self) -> &[IdValue] {
        &self.0
    }

    pub fn is_composite(&self) -> bool {
        self.0.len() > 1
    }

    /// Value stored in (and looked up from) index term fields
    pub fn to_term(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, value) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{}", value)?;
        }
        Ok(())
    }
}

impl From<i64> for EntityId {
    fn from(value: i64) -> Self {
        EntityId::single(value)
    }
}

impl From<&str> for EntityId {
    fn from(value: &str) -> Self {
        EntityId::single(value)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Log Rows
// ═══════════════════════════════════════════════════════════════════════════

/// One physical row of a log table.
///
/// `event_code` is kept raw: unknown codes must survive reading so they can be
/// logged and skipped instead of failing the whole window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRow {
    pub sequence_id: i64,
    pub event_code: i64,
    pub columns: BTreeMap<String, IdValue>,
}

impl LogRow {
    pub fn new(sequence_id: i64, event_code: i64) -> Self {
        Self {
            sequence_id,
            event_code,
            columns: BTreeMap::new(),
        }
    }

    pub fn with_column(mut self, name: impl Into<String>, value: impl Into<IdValue>) -> Self {
        self.columns.insert(name.into(), value.into());
        self
    }

    pub fn event_type(&self) -> Option<EventType> {
        EventType::from_code(self.event_code)
    }

    pub fn column(&self, name: &str) -> Option<&IdValue> {
        self.columns.get(name)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Event Model
// ═══════════════════════════════════════════════════════════════════════════

/// SQL type of the id columns copied into a log table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdColumnType {
    #[default]
    Integer,
    Text,
}

/// Id mapping for one entity type inside a log table
///
/// `log_columns[i]` receives `original_columns[i]` of the watched row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IdInfo {
    pub entity_type: String,
    pub log_columns: Vec<String>,
    pub original_columns: Vec<String>,
    #[serde(default)]
    pub column_type: IdColumnType,
}

impl IdInfo {
    pub fn new(
        entity_type: impl Into<String>,
        log_columns: Vec<String>,
        original_columns: Vec<String>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            log_columns,
            original_columns,
            column_type: IdColumnType::default(),
        }
    }

    /// Single-column id mapping (the common case)
    pub fn single(
        entity_type: impl Into<String>,
        log_column: impl Into<String>,
        original_column: impl Into<String>,
    ) -> Self {
        Self::new(
            entity_type,
            vec![log_column.into()],
            vec![original_column.into()],
        )
    }

    pub fn with_column_type(mut self, column_type: IdColumnType) -> Self {
        self.column_type = column_type;
        self
    }

    /// Read this entity's id out of a log row
    pub fn extract_id(&self, row: &LogRow) -> Result<EntityId> {
        let values = self
            .log_columns
            .iter()
            .map(|column| {
                row.column(column).cloned().ok_or_else(|| {
                    SyncError::database(format!(
                        "Log row {} has no value for id column '{}' ({})",
                        row.sequence_id, column, self.entity_type
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(EntityId::new(values))
    }

    /// Like `extract_id`, but `None` when any id column is NULL (absent)
    pub fn extract_optional_id(&self, row: &LogRow) -> Option<EntityId> {
        self.log_columns
            .iter()
            .map(|column| row.column(column).cloned())
            .collect::<Option<Vec<_>>>()
            .map(EntityId::new)
    }
}

fn default_sequence_column() -> String {
    DEFAULT_SEQUENCE_COLUMN.to_string()
}

fn default_event_type_column() -> String {
    DEFAULT_EVENT_TYPE_COLUMN.to_string()
}

/// Static descriptor of one log table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EventModelInfo {
    /// Log table name
    pub update_table: String,
    /// Watched table name
    pub original_table: String,
    #[serde(default = "default_sequence_column")]
    pub sequence_column: String,
    #[serde(default = "default_event_type_column")]
    pub event_type_column: String,
    /// Id mappings, in declaration order
    pub ids: Vec<IdInfo>,
}

impl EventModelInfo {
    pub fn builder(
        update_table: impl Into<String>,
        original_table: impl Into<String>,
    ) -> EventModelInfoBuilder {
        EventModelInfoBuilder {
            info: EventModelInfo {
                update_table: update_table.into(),
                original_table: original_table.into(),
                sequence_column: default_sequence_column(),
                event_type_column: default_event_type_column(),
                ids: Vec::new(),
            },
        }
    }

    /// Structural validation.
    ///
    /// A log table must always be able to identify which row changed, so a
    /// model without id mappings is rejected.
    pub fn validate(&self) -> Result<()> {
        if self.update_table.is_empty() || self.original_table.is_empty() {
            return Err(SyncError::invalid_model(
                "update_table and original_table must not be empty",
            ));
        }
        if self.ids.is_empty() {
            return Err(SyncError::invalid_model(format!(
                "Log table '{}' declares no id columns",
                self.update_table
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for reserved in [&self.sequence_column, &self.event_type_column] {
            if !seen.insert(reserved.as_str()) {
                return Err(SyncError::invalid_model(format!(
                    "Log table '{}': sequence and event type columns must differ",
                    self.update_table
                )));
            }
        }

        for info in &self.ids {
            if info.log_columns.is_empty() {
                return Err(SyncError::invalid_model(format!(
                    "Log table '{}': id mapping for '{}' has no columns",
                    self.update_table, info.entity_type
                )));
            }
            if info.log_columns.len() != info.original_columns.len() {
                return Err(SyncError::invalid_model(format!(
                    "Log table '{}': id mapping for '{}' has {} log columns but {} original columns",
                    self.update_table,
                    info.entity_type,
                    info.log_columns.len(),
                    info.original_columns.len()
                )));
            }
            for column in &info.log_columns {
                if !seen.insert(column.as_str()) {
                    return Err(SyncError::invalid_model(format!(
                        "Log table '{}': column '{}' declared twice",
                        self.update_table, column
                    )));
                }
            }
        }
        Ok(())
    }

    /// Id columns of the log table, in declaration order
    pub fn log_columns(&self) -> impl Iterator<Item = (&IdInfo, &str, &str)> {
        self.ids.iter().flat_map(|info| {
            info.log_columns
                .iter()
                .zip(info.original_columns.iter())
                .map(move |(log, original)| (info, log.as_str(), original.as_str()))
        })
    }

    /// Decode a row into one change event per id mapping (declaration order).
    ///
    /// The leading mapping identifies the changed row and must be present.
    /// Later mappings copy nullable references to related rows; a NULL there
    /// is an orphaned reference and yields no event.
    pub fn events_for(&self, row: &LogRow, event_type: EventType) -> Result<Vec<ChangeEvent>> {
        let mut events = Vec::with_capacity(self.ids.len());
        for (position, info) in self.ids.iter().enumerate() {
            let id = if position == 0 {
                info.extract_id(row)?
            } else {
                match info.extract_optional_id(row) {
                    Some(id) => id,
                    None => {
                        warn!(
                            table = %self.update_table,
                            sequence_id = row.sequence_id,
                            entity_type = %info.entity_type,
                            "Orphaned id in log row, no event for it"
                        );
                        continue;
                    }
                }
            };
            events.push(ChangeEvent::new(info.entity_type.clone(), id, event_type));
        }
        Ok(events)
    }
}

/// Builder for `EventModelInfo`
#[derive(Debug, Clone)]
pub struct EventModelInfoBuilder {
    info: EventModelInfo,
}

impl EventModelInfoBuilder {
    pub fn sequence_column(mut self, column: impl Into<String>) -> Self {
        self.info.sequence_column = column.into();
        self
    }

    pub fn event_type_column(mut self, column: impl Into<String>) -> Self {
        self.info.event_type_column = column.into();
        self
    }

    pub fn id(mut self, info: IdInfo) -> Self {
        self.info.ids.push(info);
        self
    }

    pub fn build(self) -> Result<EventModelInfo> {
        self.info.validate()?;
        Ok(self.info)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Change Events & Documents
// ═══════════════════════════════════════════════════════════════════════════

/// A decoded change, delivered to consumers in sequence order
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub entity_type: String,
    pub id: EntityId,
    pub event_type: EventType,
}

impl ChangeEvent {
    pub fn new(entity_type: impl Into<String>, id: EntityId, event_type: EventType) -> Self {
        Self {
            entity_type: entity_type.into(),
            id,
            event_type,
        }
    }
}

impl fmt::Display for ChangeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{} ({})", self.entity_type, self.id, self.event_type)
    }
}

/// Index-ready view of an entity as returned by an entity provider.
///
/// Field names use dotted paths for embedded entities (`sorcerers.id`), and
/// every field may hold several values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityDocument {
    pub entity_type: String,
    pub id: EntityId,
    #[serde(default)]
    pub fields: BTreeMap<String, Vec<String>>,
}

impl EntityDocument {
    pub fn new(entity_type: impl Into<String>, id: EntityId) -> Self {
        Self {
            entity_type: entity_type.into(),
            id,
            fields: BTreeMap::new(),
        }
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.fields.entry(name.into()).or_default().push(value.into());
        self
    }

    pub fn values(&self, name: &str) -> &[String] {
        self.fields.get(name).map(Vec::as_slice).unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn place_model() -> EventModelInfo {
        EventModelInfo::builder("place_updates", "place")
            .id(IdInfo::single("Place", "place_id", "id"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_event_type_codes() {
        for event_type in EventType::ALL {
            assert_eq!(EventType::from_code(event_type.code()), Some(event_type));
        }
        assert_eq!(EventType::from_code(7), None);
    }

    #[test]
    fn test_model_without_ids_is_rejected() {
        let err = EventModelInfo::builder("place_updates", "place")
            .build()
            .unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::InvalidModel);
        assert!(err.message.contains("no id columns"));
    }

    #[test]
    fn test_model_column_count_mismatch() {
        let err = EventModelInfo::builder("place_updates", "place")
            .id(IdInfo::new(
                "Place",
                vec!["a".to_string(), "b".to_string()],
                vec!["id".to_string()],
            ))
            .build()
            .unwrap_err();
        assert!(err.message.contains("2 log columns but 1 original"));
    }

    #[test]
    fn test_model_duplicate_column() {
        let err = EventModelInfo::builder("place_updates", "place")
            .id(IdInfo::single("Place", "update_id", "id"))
            .build()
            .unwrap_err();
        assert!(err.message.contains("declared twice"));
    }

    #[test]
    fn test_join_table_yields_one_event_per_side() {
        let model = EventModelInfo::builder("place_sorcerer_updates", "place_sorcerer")
            .id(IdInfo::single("Place", "place_id", "place_id"))
            .id(IdInfo::single("Sorcerer", "sorcerer_id", "sorcerer_id"))
            .build()
            .unwrap();

        let row = LogRow::new(9, EventType::Delete.code())
            .with_column("place_id", 7)
            .with_column("sorcerer_id", 42);

        let events = model.events_for(&row, EventType::Delete).unwrap();
        assert_eq!(
            events,
            vec![
                ChangeEvent::new("Place", EntityId::from(7), EventType::Delete),
                ChangeEvent::new("Sorcerer", EntityId::from(42), EventType::Delete),
            ]
        );
    }

    #[test]
    fn test_null_reference_yields_no_event() {
        let model = EventModelInfo::builder("sorcerer_updates", "sorcerer")
            .id(IdInfo::single("Sorcerer", "sorcerer_id", "id"))
            .id(IdInfo::single("Place", "place_id", "place_id"))
            .build()
            .unwrap();

        let row = LogRow::new(3, EventType::Insert.code()).with_column("sorcerer_id", 1);
        let events = model.events_for(&row, EventType::Insert).unwrap();
        assert_eq!(
            events,
            vec![ChangeEvent::new("Sorcerer", EntityId::from(1), EventType::Insert)]
        );

        let orphan_leading = LogRow::new(4, EventType::Insert.code()).with_column("place_id", 7);
        assert!(model.events_for(&orphan_leading, EventType::Insert).is_err());
    }

    #[test]
    fn test_missing_id_column_is_an_error() {
        let row = LogRow::new(1, 0);
        let err = place_model().events_for(&row, EventType::Insert).unwrap_err();
        assert!(err.message.contains("place_id"));
    }

    #[test]
    fn test_entity_id_json_shape() {
        let id = EntityId::new(vec![7.into(), "en".into()]);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, r#"[7,"en"]"#);
        let back: EntityId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, id);
    }

    #[test]
    fn test_document_fields() {
        let doc = EntityDocument::new("Place", EntityId::from(7))
            .field("name", "Hogwarts")
            .field("sorcerers.id", "42")
            .field("sorcerers.id", "43");
        assert_eq!(doc.values("sorcerers.id"), &["42", "43"]);
        assert!(doc.values("missing").is_empty());
    }
}
