//! Update Poller: one polling tick.
//!
//! Inside a single log store transaction:
//! 1. open the multi-log reader over every configured log table
//! 2. pull up to `batch_size` rows in sequence order, decode them to events
//! 3. hand the whole batch to every consumer, in registration order
//! 4. delete exactly the rows pulled in step 2
//! 5. commit
//!
//! Any error rolls the transaction back, so the rows stay for the next tick.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

use super::reader::MultiLogReader;
use crate::domain::{ChangeEvent, EventModelInfo, LogStore, LogTransaction, UpdateConsumer};
use crate::error::{Result, SyncError};

/// What a failing consumer does to the poll
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConsumerFailurePolicy {
    /// Roll the whole poll back; the batch is redelivered next tick
    #[default]
    Abort,
    /// Log the failure, keep notifying the other consumers and delete the rows
    LogAndContinue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerConfig {
    /// Maximum log rows drained per tick
    pub batch_size: usize,
    /// Look-ahead rows fetched per log table
    pub window_size: usize,
    pub consumer_failure: ConsumerFailurePolicy,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            batch_size: 100,
            window_size: 100,
            consumer_failure: ConsumerFailurePolicy::Abort,
        }
    }
}

/// Outcome of one tick
#[derive(Debug, Clone, Serialize)]
pub struct PollReport {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Log rows consumed (and deleted)
    pub rows: usize,
    /// Change events dispatched
    pub events: usize,
    /// Rows skipped because their event code is unknown
    pub unknown_event_codes: usize,
    /// Id mappings left without an event because the row held NULL ids
    pub orphaned_ids: usize,
    /// Consumer failures absorbed under `LogAndContinue`
    pub consumer_failures: Vec<String>,
}

impl PollReport {
    fn new(started_at: DateTime<Utc>) -> Self {
        Self {
            started_at,
            duration_ms: 0,
            rows: 0,
            events: 0,
            unknown_event_codes: 0,
            orphaned_ids: 0,
            consumer_failures: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }
}

/// Drains log tables into consumers, one batch per call
pub struct UpdatePoller {
    store: Arc<dyn LogStore>,
    models: Vec<EventModelInfo>,
    consumers: Vec<Arc<dyn UpdateConsumer>>,
    config: PollerConfig,
}

impl UpdatePoller {
    pub fn new(
        store: Arc<dyn LogStore>,
        models: Vec<EventModelInfo>,
        consumers: Vec<Arc<dyn UpdateConsumer>>,
        config: PollerConfig,
    ) -> Result<Self> {
        if config.batch_size == 0 || config.window_size == 0 {
            return Err(SyncError::config("batch_size and window_size must be positive"));
        }
        let mut tables = HashSet::new();
        for model in &models {
            model.validate()?;
            if !tables.insert(model.update_table.as_str()) {
                return Err(SyncError::invalid_model(format!(
                    "Log table '{}' configured twice",
                    model.update_table
                )));
            }
        }

        Ok(Self {
            store,
            models,
            consumers,
            config,
        })
    }

    pub fn models(&self) -> &[EventModelInfo] {
        &self.models
    }

    pub fn config(&self) -> &PollerConfig {
        &self.config
    }

    /// Run one tick
    pub fn poll_once(&self) -> Result<PollReport> {
        let started = Instant::now();
        let mut tx = self.store.begin()?;

        match self.drain(&mut *tx, PollReport::new(Utc::now())) {
            Ok(mut report) => {
                if report.is_empty() {
                    tx.rollback()?;
                } else if let Err(err) = tx.commit() {
                    error!(
                        error = %err,
                        rows = report.rows,
                        "Log commit failed after dispatch; the batch will be replayed"
                    );
                    return Err(err);
                }
                report.duration_ms = started.elapsed().as_millis() as u64;
                if !report.is_empty() {
                    debug!(
                        rows = report.rows,
                        events = report.events,
                        duration_ms = report.duration_ms,
                        "Poll committed"
                    );
                }
                Ok(report)
            }
            Err(err) => {
                error!(error = %err, "Poll failed, rolling back log transaction");
                if let Err(rollback_err) = tx.rollback() {
                    error!(error = %rollback_err, "Rollback of log transaction failed");
                }
                Err(err)
            }
        }
    }

    fn drain<T: LogTransaction + ?Sized>(
        &self,
        tx: &mut T,
        mut report: PollReport,
    ) -> Result<PollReport> {
        let mut consumed: Vec<Vec<i64>> = vec![Vec::new(); self.models.len()];
        let mut events: Vec<ChangeEvent> = Vec::new();

        {
            let mut reader = MultiLogReader::new(tx, &self.models, self.config.window_size);
            reader.open()?;
            while report.rows < self.config.batch_size && reader.next()? {
                let index = reader.current_index()?;
                let model = reader.current_model()?;
                let row = reader.current()?;

                match row.event_type() {
                    Some(event_type) => {
                        let decoded = model.events_for(row, event_type)?;
                        report.orphaned_ids += model.ids.len() - decoded.len();
                        events.extend(decoded);
                    }
                    None => {
                        warn!(
                            table = %model.update_table,
                            sequence_id = row.sequence_id,
                            code = row.event_code,
                            "Unknown event type code, skipping row"
                        );
                        report.unknown_event_codes += 1;
                    }
                }
                consumed[index].push(row.sequence_id);
                report.rows += 1;
            }
        }

        report.events = events.len();
        if !events.is_empty() {
            self.dispatch(&events, &mut report)?;
        }

        for (model, sequence_ids) in self.models.iter().zip(&consumed) {
            if sequence_ids.is_empty() {
                continue;
            }
            let removed = tx.delete_rows(model, sequence_ids)?;
            if removed != sequence_ids.len() {
                return Err(SyncError::database(format!(
                    "Expected to delete {} rows from '{}', deleted {}",
                    sequence_ids.len(),
                    model.update_table,
                    removed
                )));
            }
        }
        Ok(report)
    }

    fn dispatch(&self, events: &[ChangeEvent], report: &mut PollReport) -> Result<()> {
        for consumer in &self.consumers {
            let Err(err) = consumer.on_batch(events) else {
                continue;
            };
            match self.config.consumer_failure {
                ConsumerFailurePolicy::Abort => {
                    error!(
                        consumer = consumer.name(),
                        events = events.len(),
                        error = %err,
                        "Consumer failed, rolling back batch"
                    );
                    return Err(SyncError::consumer(format!(
                        "Consumer '{}' failed: {}",
                        consumer.name(),
                        err
                    ))
                    .with_source(err));
                }
                ConsumerFailurePolicy::LogAndContinue => {
                    error!(
                        consumer = consumer.name(),
                        events = events.len(),
                        error = %err,
                        "Consumer failed; its view of this batch may be stale"
                    );
                    report
                        .consumer_failures
                        .push(format!("{}: {}", consumer.name(), err));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{EntityId, EventType, IdInfo, IdValue, LogRow};
    use crate::infrastructure::InMemoryLogStore;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct Recorder {
        batches: Mutex<Vec<Vec<ChangeEvent>>>,
        fail: Mutex<bool>,
    }

    impl UpdateConsumer for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn on_batch(&self, events: &[ChangeEvent]) -> Result<()> {
            self.batches.lock().push(events.to_vec());
            if *self.fail.lock() {
                return Err(SyncError::index("index writer closed"));
            }
            Ok(())
        }
    }

    fn models() -> Vec<EventModelInfo> {
        vec![
            EventModelInfo::builder("place_updates", "place")
                .id(IdInfo::single("Place", "place_id", "id"))
                .build()
                .unwrap(),
            EventModelInfo::builder("place_sorcerer_updates", "place_sorcerer")
                .id(IdInfo::single("Place", "place_id", "place_id"))
                .id(IdInfo::single("Sorcerer", "sorcerer_id", "sorcerer_id"))
                .build()
                .unwrap(),
        ]
    }

    fn poller(
        store: &InMemoryLogStore,
        consumers: Vec<Arc<dyn UpdateConsumer>>,
        batch_size: usize,
        consumer_failure: ConsumerFailurePolicy,
    ) -> UpdatePoller {
        UpdatePoller::new(
            Arc::new(store.clone()),
            models(),
            consumers,
            PollerConfig {
                batch_size,
                window_size: 3,
                consumer_failure,
            },
        )
        .unwrap()
    }

    fn event(entity: &str, id: i64, event_type: EventType) -> ChangeEvent {
        ChangeEvent::new(entity, EntityId::from(id), event_type)
    }

    #[test]
    fn test_empty_poll_invokes_nobody() {
        let store = InMemoryLogStore::new();
        let recorder = Arc::new(Recorder::default());
        let report = poller(&store, vec![recorder.clone()], 10, ConsumerFailurePolicy::Abort)
            .poll_once()
            .unwrap();
        assert!(report.is_empty());
        assert!(recorder.batches.lock().is_empty());
    }

    #[test]
    fn test_batch_preserves_sequence_and_join_order() {
        let store = InMemoryLogStore::new();
        let models = models();
        store.record(&models[0], EventType::Insert, &[7.into()]).unwrap();
        store
            .record(&models[1], EventType::Insert, &[7.into(), 42.into()])
            .unwrap();
        store.record(&models[0], EventType::Update, &[7.into()]).unwrap();

        let recorder = Arc::new(Recorder::default());
        let report = poller(&store, vec![recorder.clone()], 10, ConsumerFailurePolicy::Abort)
            .poll_once()
            .unwrap();

        assert_eq!(report.rows, 3);
        assert_eq!(report.events, 4);
        assert_eq!(
            recorder.batches.lock().clone(),
            vec![vec![
                event("Place", 7, EventType::Insert),
                event("Place", 7, EventType::Insert),
                event("Sorcerer", 42, EventType::Insert),
                event("Place", 7, EventType::Update),
            ]]
        );
        assert_eq!(store.pending_count(), 0);
    }

    #[test]
    fn test_batch_size_splits_ticks() {
        let store = InMemoryLogStore::new();
        let models = models();
        let place = &models[0];
        for id in 1..=4 {
            store.record(place, EventType::Insert, &[IdValue::Integer(id)]).unwrap();
        }

        let recorder = Arc::new(Recorder::default());
        let poller = poller(&store, vec![recorder.clone()], 2, ConsumerFailurePolicy::Abort);

        assert_eq!(poller.poll_once().unwrap().rows, 2);
        assert_eq!(store.pending_count(), 2);
        assert_eq!(poller.poll_once().unwrap().rows, 2);
        assert_eq!(poller.poll_once().unwrap().rows, 0);

        let batches = recorder.batches.lock().clone();
        assert_eq!(batches.len(), 2);
        let ids: Vec<String> = batches
            .iter()
            .flatten()
            .map(|event| event.id.to_string())
            .collect();
        assert_eq!(ids, vec!["1", "2", "3", "4"]);
    }

    #[test]
    fn test_abort_policy_keeps_rows_and_redelivers() {
        let store = InMemoryLogStore::new();
        let models = models();
        let place = &models[0];
        for id in 1..=5 {
            store.record(place, EventType::Update, &[IdValue::Integer(id)]).unwrap();
        }

        let recorder = Arc::new(Recorder::default());
        *recorder.fail.lock() = true;
        let poller = poller(&store, vec![recorder.clone()], 10, ConsumerFailurePolicy::Abort);

        let err = poller.poll_once().unwrap_err();
        assert_eq!(err.kind, crate::ErrorKind::Consumer);
        assert_eq!(store.pending_count(), 5);

        *recorder.fail.lock() = false;
        assert_eq!(poller.poll_once().unwrap().rows, 5);
        let batches = recorder.batches.lock().clone();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0], batches[1]);
        assert_eq!(store.pending_count(), 0);
    }

    #[test]
    fn test_log_and_continue_notifies_remaining_consumers() {
        let store = InMemoryLogStore::new();
        store
            .record(&models()[0], EventType::Delete, &[3.into()])
            .unwrap();

        let failing = Arc::new(Recorder::default());
        *failing.fail.lock() = true;
        let healthy = Arc::new(Recorder::default());
        let report = poller(
            &store,
            vec![failing.clone(), healthy.clone()],
            10,
            ConsumerFailurePolicy::LogAndContinue,
        )
        .poll_once()
        .unwrap();

        assert_eq!(report.consumer_failures.len(), 1);
        assert!(report.consumer_failures[0].starts_with("recorder:"));
        assert_eq!(healthy.batches.lock().len(), 1);
        assert_eq!(store.pending_count(), 0);
    }

    #[test]
    fn test_unknown_event_code_is_skipped_but_consumed() {
        let store = InMemoryLogStore::new();
        store.insert_row(
            "place_updates",
            LogRow::new(1, 9).with_column("place_id", 1),
        );
        store.insert_row(
            "place_updates",
            LogRow::new(2, EventType::Insert.code()).with_column("place_id", 2),
        );

        let recorder = Arc::new(Recorder::default());
        let report = poller(&store, vec![recorder.clone()], 10, ConsumerFailurePolicy::Abort)
            .poll_once()
            .unwrap();

        assert_eq!(report.rows, 2);
        assert_eq!(report.unknown_event_codes, 1);
        assert_eq!(
            recorder.batches.lock().clone(),
            vec![vec![event("Place", 2, EventType::Insert)]]
        );
        assert_eq!(store.pending_count(), 0);
    }

    #[test]
    fn test_null_reference_is_counted_and_consumed() {
        let store = InMemoryLogStore::new();
        store.insert_row(
            "place_sorcerer_updates",
            LogRow::new(1, EventType::Update.code()).with_column("place_id", 7),
        );

        let recorder = Arc::new(Recorder::default());
        let report = poller(&store, vec![recorder.clone()], 10, ConsumerFailurePolicy::Abort)
            .poll_once()
            .unwrap();

        assert_eq!(report.rows, 1);
        assert_eq!(report.orphaned_ids, 1);
        assert_eq!(
            recorder.batches.lock().clone(),
            vec![vec![event("Place", 7, EventType::Update)]]
        );
        assert_eq!(store.pending_count(), 0);
    }

    #[test]
    fn test_duplicate_log_table_rejected() {
        let mut models = models();
        models.push(models[0].clone());
        let result = UpdatePoller::new(
            Arc::new(InMemoryLogStore::new()),
            models,
            Vec::new(),
            PollerConfig::default(),
        );
        assert!(result.is_err());
    }
}
