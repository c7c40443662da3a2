//! SQLite Log Store
//!
//! Log tables living in the same SQLite database as the captured tables.
//! A poll runs inside `BEGIN IMMEDIATE`, which takes the write lock up front,
//! so trigger inserts from other connections wait until the poll commits.

use parking_lot::{Mutex, MutexGuard};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::domain::{EventModelInfo, IdValue, LogRow, LogStore, LogTransaction};
use crate::error::{Result, SyncError};
use crate::trigger::{validate_for_ddl, SqliteTriggerSource, TriggerCreationStrategy, TriggerSqlSource};

/// SQLite caps bound parameters per statement; stay well below it
const DELETE_CHUNK: usize = 500;

/// SQLite-backed `LogStore`
#[derive(Clone)]
pub struct SqliteLogStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLogStore {
    /// Open (or create) the database at the given path
    pub fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        Self::from_connection(conn)
    }

    /// Create an in-memory database (for testing)
    pub fn in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        conn.busy_timeout(std::time::Duration::from_secs(5))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Shared handle to the underlying connection.
    ///
    /// Application writes made through it fire the installed triggers.
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    /// Run DDL statements in one transaction
    pub fn execute_ddl(&self, statements: &[String]) -> Result<()> {
        if statements.is_empty() {
            return Ok(());
        }
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;
        for statement in statements {
            tx.execute_batch(statement).map_err(|err| {
                SyncError::database(format!("DDL failed: {}", statement.lines().next().unwrap_or("")))
                    .with_source(err)
            })?;
        }
        tx.commit()?;
        debug!(statements = statements.len(), "DDL applied");
        Ok(())
    }

    /// Create the sequence, log tables and triggers for `models`
    pub fn install(&self, models: &[EventModelInfo], strategy: TriggerCreationStrategy) -> Result<()> {
        let statements = SqliteTriggerSource.install_statements(models, strategy)?;
        self.execute_ddl(&statements)?;
        info!(
            tables = models.len(),
            strategy = ?strategy,
            "Change capture triggers installed"
        );
        Ok(())
    }

    /// Drop triggers and the sequence. Log tables and their rows are kept.
    pub fn uninstall(&self, models: &[EventModelInfo]) -> Result<()> {
        let statements = SqliteTriggerSource.uninstall_statements(models)?;
        self.execute_ddl(&statements)?;
        info!(tables = models.len(), "Change capture triggers removed");
        Ok(())
    }

    /// Number of rows waiting in `model`'s log table
    pub fn pending_rows(&self, model: &EventModelInfo) -> Result<usize> {
        validate_for_ddl(model)?;
        let conn = self.conn.lock();
        let count: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM {}", model.update_table),
            [],
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }
}

impl LogStore for SqliteLogStore {
    fn begin(&self) -> Result<Box<dyn LogTransaction + '_>> {
        let conn = self.conn.lock();
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Box::new(SqliteLogTransaction {
            conn,
            finished: false,
        }))
    }
}

struct SqliteLogTransaction<'a> {
    conn: MutexGuard<'a, Connection>,
    finished: bool,
}

/// NULL decodes to `None`: the row carries no id for that column
fn id_value(model: &EventModelInfo, column: &str, value: Value) -> Result<Option<IdValue>> {
    match value {
        Value::Null => Ok(None),
        Value::Integer(v) => Ok(Some(IdValue::Integer(v))),
        Value::Text(v) => Ok(Some(IdValue::Text(v))),
        other => Err(SyncError::database(format!(
            "Unsupported id value {:?} in {}.{}",
            other, model.update_table, column
        ))),
    }
}

impl LogTransaction for SqliteLogTransaction<'_> {
    fn fetch_window(
        &mut self,
        model: &EventModelInfo,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<LogRow>> {
        validate_for_ddl(model)?;
        let id_columns: Vec<&str> = model.log_columns().map(|(_, log, _)| log).collect();
        let sql = format!(
            "SELECT {seq}, {event}, {columns} FROM {table} WHERE {seq} > ?1 ORDER BY {seq} LIMIT ?2",
            seq = model.sequence_column,
            event = model.event_type_column,
            columns = id_columns.join(", "),
            table = model.update_table,
        );

        let mut stmt = self.conn.prepare_cached(&sql)?;
        let raw = stmt
            .query_map(params![after.unwrap_or(i64::MIN), limit as i64], |row| {
                let mut values = Vec::with_capacity(id_columns.len());
                for index in 0..id_columns.len() {
                    values.push(row.get::<_, Value>(index + 2)?);
                }
                Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?, values))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        raw.into_iter()
            .map(|(sequence_id, event_code, values)| {
                let mut row = LogRow::new(sequence_id, event_code);
                for (column, value) in id_columns.iter().zip(values) {
                    if let Some(value) = id_value(model, column, value)? {
                        row = row.with_column(*column, value);
                    }
                }
                Ok(row)
            })
            .collect()
    }

    fn delete_rows(&mut self, model: &EventModelInfo, sequence_ids: &[i64]) -> Result<usize> {
        validate_for_ddl(model)?;
        let mut removed = 0;
        for chunk in sequence_ids.chunks(DELETE_CHUNK) {
            let placeholders = vec!["?"; chunk.len()].join(", ");
            let sql = format!(
                "DELETE FROM {} WHERE {} IN ({})",
                model.update_table, model.sequence_column, placeholders
            );
            removed += self.conn.execute(&sql, params_from_iter(chunk.iter()))?;
        }
        Ok(removed)
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> Result<()> {
        self.finished = true;
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

impl Drop for SqliteLogTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(err) = self.conn.execute_batch("ROLLBACK") {
                warn!(error = %err, "Rollback of abandoned log transaction failed");
            }
        }
    }
}
