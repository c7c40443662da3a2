//! indexsync - trigger-based change data capture for full-text indexes
//!
//! Database triggers append one row per INSERT/UPDATE/DELETE to per-table log
//! tables, stamped from a shared sequence. A scheduled poller drains the log
//! tables in global sequence order and hands the decoded changes to
//! consumers; the principal consumer rewrites the affected index documents,
//! including every root document that embeds a changed entity.
//!
//! ## Layout
//!
//! - `trigger`: DDL for the sequence, log tables and triggers (SQLite,
//!   PostgreSQL, MySQL)
//! - `domain`: event models, containment metadata, port traits
//! - `application`: multi-log reader, poller, scheduler, index updater
//! - `infrastructure`: SQLite log store, tantivy index, in-memory adapters
//! - `config`: YAML configuration
//!
//! ## Usage
//!
//! ```rust,ignore
//! use indexsync::prelude::*;
//!
//! let config = SyncConfig::from_yaml("indexsync.yaml")?;
//! let store = SqliteLogStore::new("app.db")?;
//! let models = config.event_models()?;
//! store.install(&models, TriggerCreationStrategy::Create)?;
//!
//! let index = Arc::new(TantivyIndexEngine::open_in_dir(path, config.index_layout()?)?);
//! let updater = IndexUpdater::new(
//!     Arc::new(config.containment()?),
//!     provider,
//!     index,
//!     config.updater_config(),
//! )?;
//! let poller = UpdatePoller::new(Arc::new(store), models, vec![Arc::new(updater)], config.poller_config())?;
//!
//! let mut source = UpdateSource::new(poller, config.poll_interval());
//! source.start()?;
//! // ...
//! source.stop().await?;
//! ```

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod trigger;

pub use error::{ErrorKind, Result, SyncError};

pub use application::{
    BatchOutcome, ConsumerFailurePolicy, IndexUpdater, MultiLogReader, PollReport, PollerConfig,
    SourceState, SourceStats, UpdatePoller, UpdateSource, UpdaterConfig, UpdaterStats,
};
pub use config::{ConfigError, SyncConfig};
pub use domain::{
    ChangeEvent, ContainmentIndex, EntityDocument, EntityId, EntityProvider, EntitySession,
    EventModelInfo, EventType, IdInfo, IdValue, IndexEngine, IndexTransaction, LogRow, LogStore,
    LogTransaction, UpdateConsumer,
};
pub use trigger::{Dialect, TriggerCreationStrategy, TriggerSqlSource};

/// Common imports for wiring a pipeline
pub mod prelude {
    pub use crate::application::*;
    pub use crate::config::SyncConfig;
    pub use crate::domain::*;
    pub use crate::error::{ErrorKind, Result, SyncError};
    pub use crate::infrastructure::*;
    pub use crate::trigger::{Dialect, TriggerCreationStrategy, TriggerSqlSource};
    pub use std::sync::Arc;
}
