//! Test fixtures
//!
//! The schema used throughout: `place` rows are index roots, `sorcerer` rows
//! are embedded in the place they live in (`sorcerers.id`, `sorcerers.name`).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use rusqlite::{Connection, OptionalExtension};
use tempfile::TempDir;
use tracing_subscriber::EnvFilter;

use indexsync::infrastructure::{IndexLayout, SqliteLogStore, TantivyIndexEngine};
use indexsync::{
    ContainmentIndex, EntityDocument, EntityId, EntityProvider, EntitySession, EventModelInfo,
    IdInfo, IdValue, IndexUpdater, PollReport, PollerConfig, Result, SyncConfig, SyncError,
    TriggerCreationStrategy, UpdateConsumer, UpdatePoller, UpdaterConfig,
};

pub const SCHEMA: &str = "
    CREATE TABLE place (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
    CREATE TABLE sorcerer (
        id INTEGER PRIMARY KEY,
        name TEXT NOT NULL,
        place_id INTEGER REFERENCES place (id)
    );
";

/// Install a test subscriber once; `RUST_LOG` overrides the default filter
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("indexsync=debug")),
        )
        .with_test_writer()
        .try_init();
}

pub fn place_model() -> EventModelInfo {
    EventModelInfo::builder("place_updates", "place")
        .id(IdInfo::single("Place", "place_id", "id"))
        .build()
        .unwrap()
}

pub fn sorcerer_model() -> EventModelInfo {
    EventModelInfo::builder("sorcerer_updates", "sorcerer")
        .id(IdInfo::single("Sorcerer", "sorcerer_id", "id"))
        .build()
        .unwrap()
}

/// `sorcerer` log that also records the (nullable) place a sorcerer lives in
pub fn sorcerer_in_place_model() -> EventModelInfo {
    EventModelInfo::builder("sorcerer_updates", "sorcerer")
        .id(IdInfo::single("Sorcerer", "sorcerer_id", "id"))
        .id(IdInfo::single("Place", "place_id", "place_id"))
        .build()
        .unwrap()
}

pub fn models() -> Vec<EventModelInfo> {
    vec![place_model(), sorcerer_model()]
}

pub fn containment() -> ContainmentIndex {
    ContainmentIndex::builder()
        .root("Place")
        .embeds("Place", "Sorcerer", "sorcerers.id")
        .build()
        .unwrap()
}

pub fn layout() -> IndexLayout {
    IndexLayout::for_containment(&containment())
        .text_field("name")
        .text_field("sorcerers.name")
}

// ═══════════════════════════════════════════════════════════════════════════
// Database
// ═══════════════════════════════════════════════════════════════════════════

/// File-backed database with the schema and capture triggers installed
pub struct Database {
    pub store: Arc<SqliteLogStore>,
    pub path: PathBuf,
    models: Vec<EventModelInfo>,
    _dir: TempDir,
}

impl Database {
    pub fn new() -> Self {
        Self::with_models(&models())
    }

    pub fn with_models(models: &[EventModelInfo]) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.db");
        let store = SqliteLogStore::new(&path).unwrap();
        {
            let conn = store.connection();
            let conn = conn.lock();
            // Readers on other connections must not block the poll transaction
            let _: String = conn
                .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
                .unwrap();
            conn.execute_batch(SCHEMA).unwrap();
        }
        store
            .install(models, TriggerCreationStrategy::Create)
            .unwrap();

        Self {
            store: Arc::new(store),
            path,
            models: models.to_vec(),
            _dir: dir,
        }
    }

    /// Run application SQL; the triggers record every change
    pub fn execute(&self, sql: &str) {
        self.store.connection().lock().execute_batch(sql).unwrap();
    }

    /// Log rows waiting across all log tables
    pub fn pending(&self) -> usize {
        self.models
            .iter()
            .map(|model| self.store.pending_rows(model).unwrap())
            .sum()
    }

    pub fn entity_provider(&self) -> SqliteEntityProvider {
        SqliteEntityProvider::open(&self.path)
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Entity Provider
// ═══════════════════════════════════════════════════════════════════════════

/// Loads places and sorcerers through a connection of its own
pub struct SqliteEntityProvider {
    conn: Mutex<Connection>,
}

impl SqliteEntityProvider {
    pub fn open(path: &Path) -> Self {
        let conn = Connection::open(path).unwrap();
        conn.busy_timeout(std::time::Duration::from_secs(5)).unwrap();
        Self {
            conn: Mutex::new(conn),
        }
    }
}

impl EntityProvider for SqliteEntityProvider {
    fn open(&self) -> Result<Box<dyn EntitySession + '_>> {
        Ok(Box::new(SqliteEntitySession {
            conn: self.conn.lock(),
        }))
    }
}

struct SqliteEntitySession<'a> {
    conn: MutexGuard<'a, Connection>,
}

impl SqliteEntitySession<'_> {
    fn load_place(&self, id: i64) -> Result<Option<EntityDocument>> {
        let name: Option<String> = self
            .conn
            .query_row("SELECT name FROM place WHERE id = ?1", [id], |row| row.get(0))
            .optional()?;
        let Some(name) = name else {
            return Ok(None);
        };

        let mut document = EntityDocument::new("Place", EntityId::from(id)).field("name", name);
        let mut stmt = self
            .conn
            .prepare_cached("SELECT id, name FROM sorcerer WHERE place_id = ?1 ORDER BY id")?;
        let sorcerers = stmt.query_map([id], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
        })?;
        for sorcerer in sorcerers {
            let (sorcerer_id, sorcerer_name) = sorcerer?;
            document = document
                .field("sorcerers.id", sorcerer_id.to_string())
                .field("sorcerers.name", sorcerer_name);
        }
        Ok(Some(document))
    }

    fn load_sorcerer(&self, id: i64) -> Result<Option<EntityDocument>> {
        let row: Option<(String, Option<i64>)> = self
            .conn
            .query_row(
                "SELECT name, place_id FROM sorcerer WHERE id = ?1",
                [id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(row.map(|(name, place_id)| {
            let document = EntityDocument::new("Sorcerer", EntityId::from(id)).field("name", name);
            match place_id {
                Some(place_id) => document.field("place.id", place_id.to_string()),
                None => document,
            }
        }))
    }
}

impl EntitySession for SqliteEntitySession<'_> {
    fn get(&mut self, entity_type: &str, id: &EntityId) -> Result<Option<EntityDocument>> {
        let key = match id.values() {
            [IdValue::Integer(value)] => *value,
            _ => {
                return Err(SyncError::entity_provider(format!(
                    "Unexpected {} id {}",
                    entity_type, id
                )))
            }
        };
        match entity_type {
            "Place" => self.load_place(key),
            "Sorcerer" => self.load_sorcerer(key),
            other => Err(SyncError::entity_provider(format!(
                "Unknown entity type '{}'",
                other
            ))),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Pipeline
// ═══════════════════════════════════════════════════════════════════════════

/// Database -> poller -> index updater -> in-RAM tantivy index
pub struct Pipeline {
    pub index: Arc<TantivyIndexEngine>,
    pub updater: Arc<IndexUpdater>,
    pub poller: UpdatePoller,
    pub db: Database,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::with(PollerConfig::default(), Vec::new())
    }

    /// Pipeline whose poller also feeds `extra` consumers, after the updater
    pub fn with(config: PollerConfig, extra: Vec<Arc<dyn UpdateConsumer>>) -> Self {
        Self::assemble(
            Database::new(),
            layout(),
            containment(),
            UpdaterConfig { page_size: 2 },
            config,
            extra,
        )
    }

    /// Pipeline capturing changes through `models` instead of the default ones
    pub fn for_models(models: &[EventModelInfo]) -> Self {
        Self::assemble(
            Database::with_models(models),
            layout(),
            containment(),
            UpdaterConfig { page_size: 2 },
            PollerConfig::default(),
            Vec::new(),
        )
    }

    /// Pipeline wired entirely from a configuration
    pub fn from_config(config: &SyncConfig) -> Self {
        Self::assemble(
            Database::with_models(&config.event_models().unwrap()),
            config.index_layout().unwrap(),
            config.containment().unwrap(),
            config.updater_config(),
            config.poller_config(),
            Vec::new(),
        )
    }

    fn assemble(
        db: Database,
        layout: IndexLayout,
        containment: ContainmentIndex,
        updater_config: UpdaterConfig,
        poller_config: PollerConfig,
        extra: Vec<Arc<dyn UpdateConsumer>>,
    ) -> Self {
        let index = Arc::new(TantivyIndexEngine::in_memory(layout).unwrap());
        let updater = Arc::new(
            IndexUpdater::new(
                Arc::new(containment),
                Arc::new(db.entity_provider()),
                index.clone(),
                updater_config,
            )
            .unwrap(),
        );

        let mut consumers: Vec<Arc<dyn UpdateConsumer>> = vec![updater.clone()];
        consumers.extend(extra);
        let poller =
            UpdatePoller::new(db.store.clone(), db.models.clone(), consumers, poller_config)
                .unwrap();

        Self {
            index,
            updater,
            poller,
            db,
        }
    }

    /// Poll until the log tables are empty, returning one report per tick
    pub fn drain(&self) -> Vec<PollReport> {
        let mut reports = Vec::new();
        loop {
            let report = self.poller.poll_once().unwrap();
            if report.is_empty() {
                return reports;
            }
            reports.push(report);
        }
    }
}
