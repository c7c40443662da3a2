//! Application Layer
//!
//! The change-capture pipeline on top of the domain ports:
//! `MultiLogReader` merges log tables, `UpdatePoller` runs one transactional
//! tick, `UpdateSource` schedules ticks, `IndexUpdater` applies batches.

pub mod index_updater;
pub mod poller;
pub mod reader;
pub mod source;

pub use index_updater::{BatchOutcome, IndexUpdater, UpdaterConfig, UpdaterStats};
pub use poller::{ConsumerFailurePolicy, PollReport, PollerConfig, UpdatePoller};
pub use reader::MultiLogReader;
pub use source::{SourceState, SourceStats, UpdateSource};
