//! In-Memory Log Store
//!
//! BTreeMap-backed log tables with the same transactional contract as the
//! SQLite store: one writer transaction at a time, deletes staged until commit.
//! Used in unit tests and by embedders that capture changes in-process.

use parking_lot::{Mutex, MutexGuard};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use crate::domain::{EventModelInfo, EventType, IdValue, LogRow, LogStore, LogTransaction};
use crate::error::{Result, SyncError};

type Tables = HashMap<String, BTreeMap<i64, LogRow>>;

#[derive(Clone)]
pub struct InMemoryLogStore {
    tables: Arc<Mutex<Tables>>,
    sequence: Arc<AtomicI64>,
}

impl InMemoryLogStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(Mutex::new(HashMap::new())),
            sequence: Arc::new(AtomicI64::new(0)),
        }
    }

    /// Append a row the way a trigger would, stamping it from the shared
    /// sequence. `ids` are matched to the model's log columns in order.
    pub fn record(
        &self,
        model: &EventModelInfo,
        event_type: EventType,
        ids: &[IdValue],
    ) -> Result<i64> {
        let columns: Vec<&str> = model.log_columns().map(|(_, log, _)| log).collect();
        if columns.len() != ids.len() {
            return Err(SyncError::invalid_model(format!(
                "'{}' has {} id columns, got {} values",
                model.update_table,
                columns.len(),
                ids.len()
            )));
        }

        let mut tables = self.tables.lock();
        let sequence_id = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let mut row = LogRow::new(sequence_id, event_type.code());
        for (column, value) in columns.into_iter().zip(ids) {
            row = row.with_column(column, value.clone());
        }
        tables
            .entry(model.update_table.clone())
            .or_default()
            .insert(sequence_id, row);
        Ok(sequence_id)
    }

    /// Insert a row with an explicit sequence id
    pub fn insert_row(&self, update_table: &str, row: LogRow) {
        let mut tables = self.tables.lock();
        self.sequence.fetch_max(row.sequence_id, Ordering::SeqCst);
        tables
            .entry(update_table.to_string())
            .or_default()
            .insert(row.sequence_id, row);
    }

    /// Committed rows of one log table, ascending
    pub fn pending(&self, update_table: &str) -> Vec<LogRow> {
        self.tables
            .lock()
            .get(update_table)
            .map(|rows| rows.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn pending_count(&self) -> usize {
        self.tables.lock().values().map(BTreeMap::len).sum()
    }
}

impl Default for InMemoryLogStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LogStore for InMemoryLogStore {
    fn begin(&self) -> Result<Box<dyn LogTransaction + '_>> {
        Ok(Box::new(InMemoryLogTransaction {
            tables: self.tables.lock(),
            deleted: HashMap::new(),
        }))
    }
}

struct InMemoryLogTransaction<'a> {
    tables: MutexGuard<'a, Tables>,
    deleted: HashMap<String, BTreeSet<i64>>,
}

impl LogTransaction for InMemoryLogTransaction<'_> {
    fn fetch_window(
        &mut self,
        model: &EventModelInfo,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<LogRow>> {
        let Some(rows) = self.tables.get(&model.update_table) else {
            return Ok(Vec::new());
        };
        let deleted = self.deleted.get(&model.update_table);
        let lower = after.map_or(i64::MIN, |seen| seen.saturating_add(1));

        Ok(rows
            .range(lower..)
            .filter(|(sequence_id, _)| !deleted.is_some_and(|set| set.contains(*sequence_id)))
            .take(limit)
            .map(|(_, row)| row.clone())
            .collect())
    }

    fn delete_rows(&mut self, model: &EventModelInfo, sequence_ids: &[i64]) -> Result<usize> {
        let Some(rows) = self.tables.get(&model.update_table) else {
            return Ok(0);
        };
        let staged = self.deleted.entry(model.update_table.clone()).or_default();
        let mut removed = 0;
        for sequence_id in sequence_ids {
            if rows.contains_key(sequence_id) && staged.insert(*sequence_id) {
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        let deleted = std::mem::take(&mut self.deleted);
        for (table, sequence_ids) in deleted {
            if let Some(rows) = self.tables.get_mut(&table) {
                for sequence_id in sequence_ids {
                    rows.remove(&sequence_id);
                }
            }
        }
        Ok(())
    }

    fn rollback(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}
