//! Ordered Multi-Log Reader
//!
//! Presents N log tables, each ascending by sequence id, as one ascending
//! stream (k-way merge). Every table is read through a bounded window:
//!
//! ```text
//! place_updates    [1, 3, 5] ─┐
//! sorcerer_updates [2, 4]    ─┼─▶ min head ─▶ 1, 2, 3, 4, 5, 6
//! book_updates     [6]       ─┘
//! ```
//!
//! A window is refilled (`sequence_id > last_seen ORDER BY sequence_id LIMIT W`)
//! as soon as it runs empty, unless its last fetch came back short, which
//! means the table is exhausted for this transaction.

use std::collections::VecDeque;

use crate::domain::{EventModelInfo, LogRow, LogTransaction};
use crate::error::{Result, SyncError};

#[derive(Debug, Default)]
struct Window {
    rows: VecDeque<LogRow>,
    last_seen: Option<i64>,
    exhausted: bool,
}

/// K-way merge over the log tables of one transaction
pub struct MultiLogReader<'t, 'm, T: LogTransaction + ?Sized> {
    tx: &'t mut T,
    models: &'m [EventModelInfo],
    window_size: usize,
    windows: Vec<Window>,
    opened: bool,
    finished: bool,
    current: Option<(usize, LogRow)>,
}

impl<'t, 'm, T: LogTransaction + ?Sized> MultiLogReader<'t, 'm, T> {
    pub fn new(tx: &'t mut T, models: &'m [EventModelInfo], window_size: usize) -> Self {
        Self {
            tx,
            models,
            window_size: window_size.max(1),
            windows: Vec::new(),
            opened: false,
            finished: false,
            current: None,
        }
    }

    /// Fetch the first window of every table
    pub fn open(&mut self) -> Result<()> {
        if self.opened {
            return Err(SyncError::invalid_state("reader already opened"));
        }
        self.windows = self.models.iter().map(|_| Window::default()).collect();
        for index in 0..self.windows.len() {
            self.fill(index)?;
        }
        self.opened = true;
        Ok(())
    }

    /// Advance to the row with the smallest sequence id across all tables.
    ///
    /// Returns `false` once every table is exhausted.
    pub fn next(&mut self) -> Result<bool> {
        if !self.opened {
            return Err(SyncError::invalid_state("next() called before open()"));
        }
        if self.finished {
            return Ok(false);
        }

        let head = self
            .windows
            .iter()
            .enumerate()
            .filter_map(|(index, window)| window.rows.front().map(|row| (index, row.sequence_id)))
            .min_by_key(|(_, sequence_id)| *sequence_id);

        let Some((index, _)) = head else {
            self.current = None;
            self.finished = true;
            return Ok(false);
        };

        let row = match self.windows[index].rows.pop_front() {
            Some(row) => row,
            None => return Err(SyncError::invalid_state("selected window is empty")),
        };
        if self.windows[index].rows.is_empty() && !self.windows[index].exhausted {
            self.fill(index)?;
        }

        self.current = Some((index, row));
        Ok(true)
    }

    /// Row selected by the last successful `next()`
    pub fn current(&self) -> Result<&LogRow> {
        self.current
            .as_ref()
            .map(|(_, row)| row)
            .ok_or_else(|| SyncError::invalid_state("no current row (call next() first)"))
    }

    /// Position of the current row's table in the model list
    pub fn current_index(&self) -> Result<usize> {
        self.current
            .as_ref()
            .map(|(index, _)| *index)
            .ok_or_else(|| SyncError::invalid_state("no current row (call next() first)"))
    }

    /// Event model of the current row's table
    pub fn current_model(&self) -> Result<&'m EventModelInfo> {
        let models = self.models;
        Ok(&models[self.current_index()?])
    }

    fn fill(&mut self, index: usize) -> Result<()> {
        let model = &self.models[index];
        let window = &mut self.windows[index];
        let rows = self
            .tx
            .fetch_window(model, window.last_seen, self.window_size)?;

        let mut previous = window.last_seen;
        for row in &rows {
            if previous.is_some_and(|seen| row.sequence_id <= seen) {
                return Err(SyncError::database(format!(
                    "Log table '{}' returned sequence id {} out of order",
                    model.update_table, row.sequence_id
                )));
            }
            previous = Some(row.sequence_id);
        }

        window.exhausted = rows.len() < self.window_size;
        window.last_seen = previous;
        window.rows.extend(rows);
        Ok(())
    }
}
