//! PostgreSQL dialect
//!
//! Uses a real sequence and one plpgsql function per trigger.

use super::{
    id_column_definitions, log_insert_parts, trigger_name, validate_for_ddl, Dialect,
    TriggerSqlSource, SEQUENCE_NAME,
};
use crate::domain::{EventModelInfo, EventType, IdColumnType};
use crate::error::Result;

#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresTriggerSource;

fn function_name(model: &EventModelInfo, event_type: EventType) -> String {
    format!("{}_fn", trigger_name(&model.original_table, event_type))
}

impl TriggerSqlSource for PostgresTriggerSource {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn setup_statements(&self) -> Vec<String> {
        vec![format!("CREATE SEQUENCE IF NOT EXISTS {}", SEQUENCE_NAME)]
    }

    fn teardown_statements(&self) -> Vec<String> {
        vec![format!("DROP SEQUENCE IF EXISTS {}", SEQUENCE_NAME)]
    }

    fn create_log_table(&self, model: &EventModelInfo) -> Result<Vec<String>> {
        validate_for_ddl(model)?;
        let mut columns = vec![format!("{} BIGINT PRIMARY KEY", model.sequence_column)];
        columns.extend(id_column_definitions(model, |column_type| match column_type {
            IdColumnType::Integer => "BIGINT",
            IdColumnType::Text => "TEXT",
        }));
        columns.push(format!("{} INTEGER NOT NULL", model.event_type_column));

        Ok(vec![format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            model.update_table,
            columns.join(", ")
        )])
    }

    fn create_trigger(&self, model: &EventModelInfo, event_type: EventType) -> Result<Vec<String>> {
        validate_for_ddl(model)?;
        let (columns, values) = log_insert_parts(model, event_type);
        let name = trigger_name(&model.original_table, event_type);
        let function = function_name(model, event_type);

        Ok(vec![
            format!(
                "CREATE OR REPLACE FUNCTION {function}() RETURNS TRIGGER AS $$\n\
                 BEGIN\n    \
                 INSERT INTO {log} ({seq_col}, {columns})\n    \
                 VALUES (nextval('{seq}'), {values});\n    \
                 RETURN NULL;\n\
                 END;\n\
                 $$ LANGUAGE plpgsql",
                function = function,
                log = model.update_table,
                seq_col = model.sequence_column,
                columns = columns.join(", "),
                seq = SEQUENCE_NAME,
                values = values.join(", "),
            ),
            format!("DROP TRIGGER IF EXISTS {} ON {}", name, model.original_table),
            format!(
                "CREATE TRIGGER {} AFTER {} ON {} FOR EACH ROW EXECUTE PROCEDURE {}()",
                name,
                event_type.as_str().to_uppercase(),
                model.original_table,
                function
            ),
        ])
    }

    fn drop_trigger(&self, model: &EventModelInfo, event_type: EventType) -> Result<Vec<String>> {
        validate_for_ddl(model)?;
        Ok(vec![
            format!(
                "DROP TRIGGER IF EXISTS {} ON {}",
                trigger_name(&model.original_table, event_type),
                model.original_table
            ),
            format!(
                "DROP FUNCTION IF EXISTS {}()",
                function_name(model, event_type)
            ),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::IdInfo;

    fn sorcerer_model() -> EventModelInfo {
        EventModelInfo::builder("sorcerer_updates", "sorcerer")
            .id(IdInfo::single("Sorcerer", "sorcerer_id", "id"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_setup_is_idempotent_sequence() {
        assert_eq!(
            PostgresTriggerSource.setup_statements(),
            vec!["CREATE SEQUENCE IF NOT EXISTS isync_sequence"]
        );
    }

    #[test]
    fn test_trigger_function_uses_nextval() {
        let ddl = PostgresTriggerSource
            .create_trigger(&sorcerer_model(), EventType::Insert)
            .unwrap();
        assert_eq!(ddl.len(), 3);
        assert!(ddl[0].starts_with("CREATE OR REPLACE FUNCTION isync_sorcerer_insert_fn()"));
        assert!(ddl[0].contains("VALUES (nextval('isync_sequence'), NEW.id, 0);"));
        assert!(ddl[0].ends_with("$$ LANGUAGE plpgsql"));
        assert_eq!(
            ddl[2],
            "CREATE TRIGGER isync_sorcerer_insert AFTER INSERT ON sorcerer FOR EACH ROW EXECUTE PROCEDURE isync_sorcerer_insert_fn()"
        );
    }

    #[test]
    fn test_drop_removes_trigger_and_function() {
        let ddl = PostgresTriggerSource
            .drop_trigger(&sorcerer_model(), EventType::Delete)
            .unwrap();
        assert_eq!(
            ddl,
            vec![
                "DROP TRIGGER IF EXISTS isync_sorcerer_delete ON sorcerer",
                "DROP FUNCTION IF EXISTS isync_sorcerer_delete_fn()",
            ]
        );
    }

    #[test]
    fn test_log_table_uses_bigint() {
        let ddl = PostgresTriggerSource
            .create_log_table(&sorcerer_model())
            .unwrap();
        assert_eq!(
            ddl[0],
            "CREATE TABLE IF NOT EXISTS sorcerer_updates (update_id BIGINT PRIMARY KEY, sorcerer_id BIGINT NOT NULL, event_case INTEGER NOT NULL)"
        );
    }
}
