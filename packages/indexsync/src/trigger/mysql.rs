//! MySQL dialect
//!
//! MySQL has no sequences. A one-row counter table stands in for one: the
//! trigger bumps it with `UPDATE ... SET id = LAST_INSERT_ID(id + 1)`, which
//! also makes the new value visible to `LAST_INSERT_ID()` for this session.
//! The row lock serialises concurrent writers.

use super::{
    id_column_definitions, log_insert_parts, trigger_name, validate_for_ddl, Dialect,
    TriggerSqlSource, SEQUENCE_NAME,
};
use crate::domain::{EventModelInfo, EventType, IdColumnType};
use crate::error::Result;

#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlTriggerSource;

impl TriggerSqlSource for MySqlTriggerSource {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    fn setup_statements(&self) -> Vec<String> {
        vec![
            format!(
                "CREATE TABLE IF NOT EXISTS {} (id BIGINT NOT NULL)",
                SEQUENCE_NAME
            ),
            format!(
                "INSERT INTO {seq} (id) SELECT 0 FROM DUAL WHERE NOT EXISTS (SELECT 1 FROM {seq})",
                seq = SEQUENCE_NAME
            ),
        ]
    }

    fn teardown_statements(&self) -> Vec<String> {
        vec![format!("DROP TABLE IF EXISTS {}", SEQUENCE_NAME)]
    }

    fn create_log_table(&self, model: &EventModelInfo) -> Result<Vec<String>> {
        validate_for_ddl(model)?;
        let mut columns = vec![format!("{} BIGINT NOT NULL PRIMARY KEY", model.sequence_column)];
        columns.extend(id_column_definitions(model, |column_type| match column_type {
            IdColumnType::Integer => "BIGINT",
            IdColumnType::Text => "VARCHAR(255)",
        }));
        columns.push(format!("{} INT NOT NULL", model.event_type_column));

        Ok(vec![format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            model.update_table,
            columns.join(", ")
        )])
    }

    fn create_trigger(&self, model: &EventModelInfo, event_type: EventType) -> Result<Vec<String>> {
        validate_for_ddl(model)?;
        let (columns, values) = log_insert_parts(model, event_type);

        Ok(vec![format!(
            "CREATE TRIGGER IF NOT EXISTS {name} AFTER {event} ON {table} FOR EACH ROW\n\
             BEGIN\n    \
             UPDATE {seq} SET id = LAST_INSERT_ID(id + 1);\n    \
             INSERT INTO {log} ({seq_col}, {columns})\n    \
             VALUES (LAST_INSERT_ID(), {values});\n\
             END",
            name = trigger_name(&model.original_table, event_type),
            event = event_type.as_str().to_uppercase(),
            table = model.original_table,
            seq = SEQUENCE_NAME,
            log = model.update_table,
            seq_col = model.sequence_column,
            columns = columns.join(", "),
            values = values.join(", "),
        )])
    }

    fn drop_trigger(&self, model: &EventModelInfo, event_type: EventType) -> Result<Vec<String>> {
        validate_for_ddl(model)?;
        Ok(vec![format!(
            "DROP TRIGGER IF EXISTS {}",
            trigger_name(&model.original_table, event_type)
        )])
    }
}
