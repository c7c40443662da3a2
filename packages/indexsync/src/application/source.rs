//! Update Source: fixed-delay scheduler around `UpdatePoller`.
//!
//! State machine:
//!
//! ```text
//! New ──start──▶ Running ◀──resume── Paused
//!                   │ ──pause──────────▲
//!                   └──stop──▶ Stopped (terminal)
//! ```
//!
//! Each tick waits `interval` after the previous tick finished, then runs
//! `poll_once` on the blocking pool. Ticks therefore never overlap. While
//! paused the loop keeps ticking but skips the poll.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::poller::UpdatePoller;
use crate::error::{Result, SyncError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceState {
    New,
    Running,
    Paused,
    Stopped,
}

impl SourceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceState::New => "new",
            SourceState::Running => "running",
            SourceState::Paused => "paused",
            SourceState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for SourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Default)]
struct TickCounters {
    ticks: AtomicU64,
    skipped_while_paused: AtomicU64,
    failed_polls: AtomicU64,
    rows: AtomicU64,
    events: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SourceStats {
    /// Polls executed
    pub ticks: u64,
    pub skipped_while_paused: u64,
    pub failed_polls: u64,
    /// Log rows consumed over all successful polls
    pub rows: u64,
    pub events: u64,
}

pub struct UpdateSource {
    poller: Arc<UpdatePoller>,
    interval: Duration,
    state: watch::Sender<SourceState>,
    counters: Arc<TickCounters>,
    task: Option<JoinHandle<()>>,
}

impl UpdateSource {
    pub fn new(poller: UpdatePoller, interval: Duration) -> Self {
        let (state, _) = watch::channel(SourceState::New);
        Self {
            poller: Arc::new(poller),
            interval,
            state,
            counters: Arc::new(TickCounters::default()),
            task: None,
        }
    }

    pub fn state(&self) -> SourceState {
        *self.state.borrow()
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn poller(&self) -> &UpdatePoller {
        &self.poller
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            ticks: self.counters.ticks.load(Ordering::Relaxed),
            skipped_while_paused: self.counters.skipped_while_paused.load(Ordering::Relaxed),
            failed_polls: self.counters.failed_polls.load(Ordering::Relaxed),
            rows: self.counters.rows.load(Ordering::Relaxed),
            events: self.counters.events.load(Ordering::Relaxed),
        }
    }

    /// Spawn the polling loop on the current Tokio runtime
    pub fn start(&mut self) -> Result<()> {
        let handle = tokio::runtime::Handle::try_current().map_err(|_| {
            SyncError::invalid_state("UpdateSource::start must be called inside a Tokio runtime")
        })?;
        self.transition(&[SourceState::New], SourceState::Running)?;

        let task = handle.spawn(run(
            Arc::clone(&self.poller),
            self.interval,
            self.state.subscribe(),
            Arc::clone(&self.counters),
        ));
        self.task = Some(task);

        info!(
            interval_ms = self.interval.as_millis() as u64,
            tables = self.poller.models().len(),
            "Update source started"
        );
        Ok(())
    }

    /// Keep ticking but stop polling
    pub fn pause(&self) -> Result<()> {
        self.transition(&[SourceState::Running], SourceState::Paused)?;
        info!("Update source paused");
        Ok(())
    }

    pub fn resume(&self) -> Result<()> {
        self.transition(&[SourceState::Paused], SourceState::Running)?;
        info!("Update source resumed");
        Ok(())
    }

    /// Stop the loop and wait for an in-flight poll to finish.
    ///
    /// Stopping twice is a no-op.
    pub async fn stop(&mut self) -> Result<()> {
        let previous = self.state.send_replace(SourceState::Stopped);
        if previous == SourceState::Stopped {
            return Ok(());
        }

        if let Some(task) = self.task.take() {
            task.await.map_err(|err| {
                SyncError::invalid_state(format!("update source task did not finish cleanly: {}", err))
            })?;
        }
        info!(previous = %previous, "Update source stopped");
        Ok(())
    }

    fn transition(&self, from: &[SourceState], to: SourceState) -> Result<()> {
        let mut outcome = Ok(());
        self.state.send_if_modified(|state| {
            if from.contains(state) {
                *state = to;
                true
            } else {
                outcome = Err(SyncError::invalid_state(format!(
                    "cannot move update source from {} to {}",
                    state, to
                )));
                false
            }
        });
        outcome
    }
}

impl Drop for UpdateSource {
    fn drop(&mut self) {
        if self.task.is_some() {
            // The loop exits after its current tick
            self.state.send_replace(SourceState::Stopped);
        }
    }
}

async fn run(
    poller: Arc<UpdatePoller>,
    interval: Duration,
    mut state: watch::Receiver<SourceState>,
    counters: Arc<TickCounters>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = state.changed() => {
                if changed.is_err() || *state.borrow_and_update() == SourceState::Stopped {
                    break;
                }
                // pause/resume: restart the delay
                continue;
            }
        }

        let current = *state.borrow_and_update();
        match current {
            SourceState::Stopped => break,
            SourceState::Paused => {
                counters.skipped_while_paused.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            SourceState::New | SourceState::Running => {}
        }

        counters.ticks.fetch_add(1, Ordering::Relaxed);
        let tick_poller = Arc::clone(&poller);
        match tokio::task::spawn_blocking(move || tick_poller.poll_once()).await {
            Ok(Ok(report)) => {
                counters.rows.fetch_add(report.rows as u64, Ordering::Relaxed);
                counters.events.fetch_add(report.events as u64, Ordering::Relaxed);
                if !report.consumer_failures.is_empty() {
                    warn!(
                        failures = report.consumer_failures.len(),
                        "Poll committed with consumer failures"
                    );
                }
            }
            Ok(Err(err)) => {
                counters.failed_polls.fetch_add(1, Ordering::Relaxed);
                error!(error = %err, "Poll failed; log rows are kept for the next tick");
            }
            Err(err) => {
                counters.failed_polls.fetch_add(1, Ordering::Relaxed);
                error!(error = %err, "Poll task panicked");
            }
        }
    }
    debug!("Update source loop exited");
}
