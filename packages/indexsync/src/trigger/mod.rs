//! Trigger DDL Generator
//!
//! Produces the dialect-specific SQL that makes a database record its own
//! changes: a shared sequence, one log table per watched table and one trigger
//! per (watched table, DML event).
//!
//! ```text
//! INSERT INTO place ...  ──trigger──▶  place_updates(update_id = next(seq), place_id = NEW.id, event_case = 0)
//! ```
//!
//! This is the only module that knows SQL dialects. Everything downstream
//! consumes `LogRow`s.
//!
//! Statements are returned as text; executing them is up to the caller (see
//! `SqliteLogStore::execute_ddl` for the SQLite case).

pub mod mysql;
pub mod postgres;
pub mod sqlite;

pub use mysql::MySqlTriggerSource;
pub use postgres::PostgresTriggerSource;
pub use sqlite::SqliteTriggerSource;

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::domain::{EventModelInfo, EventType, IdColumnType};
use crate::error::{Result, SyncError};

/// Prefix of every generated database object
pub const OBJECT_PREFIX: &str = "isync";

/// Name of the shared sequence (or sequence table) stamping every log row
pub const SEQUENCE_NAME: &str = "isync_sequence";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    Sqlite,
    Postgres,
    MySql,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Postgres => "postgres",
            Dialect::MySql => "mysql",
        }
    }

    pub fn trigger_source(&self) -> Box<dyn TriggerSqlSource> {
        match self {
            Dialect::Sqlite => Box::new(SqliteTriggerSource),
            Dialect::Postgres => Box::new(PostgresTriggerSource),
            Dialect::MySql => Box::new(MySqlTriggerSource),
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What `install_statements` does with triggers that may already exist
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerCreationStrategy {
    /// Create missing objects, keep existing ones
    #[default]
    Create,
    /// Drop the triggers first, then create everything
    DropCreate,
    /// Generate nothing (objects are managed out of band)
    DontCreate,
}

/// Dialect-specific DDL generation
pub trait TriggerSqlSource: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// One-time idempotent setup (shared sequence)
    fn setup_statements(&self) -> Vec<String>;

    /// Inverse of `setup_statements`
    fn teardown_statements(&self) -> Vec<String>;

    /// Idempotent creation of the log table described by `model`
    fn create_log_table(&self, model: &EventModelInfo) -> Result<Vec<String>>;

    fn create_trigger(&self, model: &EventModelInfo, event_type: EventType) -> Result<Vec<String>>;

    fn drop_trigger(&self, model: &EventModelInfo, event_type: EventType) -> Result<Vec<String>>;

    /// Full ordered statement list: setup, log tables, triggers
    fn install_statements(
        &self,
        models: &[EventModelInfo],
        strategy: TriggerCreationStrategy,
    ) -> Result<Vec<String>> {
        let mut statements = Vec::new();
        if strategy == TriggerCreationStrategy::DontCreate {
            return Ok(statements);
        }

        statements.extend(self.setup_statements());
        for model in models {
            statements.extend(self.create_log_table(model)?);
            for event_type in EventType::ALL {
                if strategy == TriggerCreationStrategy::DropCreate {
                    statements.extend(self.drop_trigger(model, event_type)?);
                }
                statements.extend(self.create_trigger(model, event_type)?);
            }
        }
        Ok(statements)
    }

    /// Drop every trigger, then the shared sequence. Log tables are kept.
    fn uninstall_statements(&self, models: &[EventModelInfo]) -> Result<Vec<String>> {
        let mut statements = Vec::new();
        for model in models {
            for event_type in EventType::ALL {
                statements.extend(self.drop_trigger(model, event_type)?);
            }
        }
        statements.extend(self.teardown_statements());
        Ok(statements)
    }
}

/// Deterministic trigger name for `(original_table, event_type)`
pub fn trigger_name(original_table: &str, event_type: EventType) -> String {
    format!(
        "{}_{}_{}",
        OBJECT_PREFIX,
        original_table.to_lowercase(),
        event_type.as_str()
    )
}

/// Reject anything that is not a plain SQL identifier.
///
/// Names are spliced into DDL, so quoting tricks are not accepted.
pub fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) => {
            (first.is_ascii_alphabetic() || first == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(SyncError::invalid_model(format!(
            "'{}' is not a valid SQL identifier",
            name
        )))
    }
}

/// Structural validation plus identifier checks on every name used in DDL
pub(crate) fn validate_for_ddl(model: &EventModelInfo) -> Result<()> {
    model.validate()?;
    validate_identifier(&model.update_table)?;
    validate_identifier(&model.original_table)?;
    validate_identifier(&model.sequence_column)?;
    validate_identifier(&model.event_type_column)?;
    for (_, log_column, original_column) in model.log_columns() {
        validate_identifier(log_column)?;
        validate_identifier(original_column)?;
    }
    Ok(())
}

/// Row alias the trigger copies ids from
pub(crate) fn row_alias(event_type: EventType) -> &'static str {
    match event_type {
        EventType::Insert | EventType::Update => "NEW",
        EventType::Delete => "OLD",
    }
}

/// Column list and value list of the log insert, without the sequence value.
///
/// Returns `(["place_id", "event_case"], ["NEW.id", "0"])`.
pub(crate) fn log_insert_parts(
    model: &EventModelInfo,
    event_type: EventType,
) -> (Vec<String>, Vec<String>) {
    let alias = row_alias(event_type);
    let mut columns = Vec::new();
    let mut values = Vec::new();
    for (_, log_column, original_column) in model.log_columns() {
        columns.push(log_column.to_string());
        values.push(format!("{}.{}", alias, original_column));
    }
    columns.push(model.event_type_column.clone());
    values.push(event_type.code().to_string());
    (columns, values)
}

/// `sorcerer_id INTEGER NOT NULL, place_id INTEGER, ...` for the id columns
/// of a log table.
///
/// Only the leading mapping (the changed row's own key) is `NOT NULL`. Later
/// mappings copy foreign keys that may be NULL, and the trigger must never
/// reject the application's write.
pub(crate) fn id_column_definitions(
    model: &EventModelInfo,
    sql_type: impl Fn(IdColumnType) -> &'static str,
) -> Vec<String> {
    model
        .ids
        .iter()
        .enumerate()
        .flat_map(|(position, info)| {
            let constraint = if position == 0 { " NOT NULL" } else { "" };
            let sql_type = sql_type(info.column_type);
            info.log_columns
                .iter()
                .map(move |column| format!("{} {}{}", column, sql_type, constraint))
        })
        .collect()
}
