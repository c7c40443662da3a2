//! Configuration
//!
//! ```yaml
//! version: 1
//! polling:
//!   interval: 500
//!   unit: milliseconds
//!   batch_size: 100
//! log_tables:
//!   - update_table: place_updates
//!     original_table: place
//!     ids:
//!       - entity_type: Place
//!         log_columns: [place_id]
//!         original_columns: [id]
//! roots:
//!   - entity_type: Place
//!     embeds:
//!       - entity_type: Sorcerer
//!         id_fields: [sorcerers.id]
//! ```
//!
//! Every `polling` and `index` field has a default; `version` is mandatory.

pub mod error;
pub mod io;

pub use error::{ConfigError, ConfigResult};
pub use io::ConfigFileV1;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::application::{ConsumerFailurePolicy, PollerConfig, UpdaterConfig};
use crate::domain::{ContainmentIndex, EventModelInfo};
#[cfg(feature = "tantivy")]
use crate::infrastructure::IndexLayout;

pub const MAX_BATCH_SIZE: usize = 100_000;
pub const MAX_WINDOW_SIZE: usize = 100_000;
pub const MAX_PAGE_SIZE: usize = 10_000;

/// Unit of `polling.interval`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeUnit {
    #[default]
    Milliseconds,
    Seconds,
    Minutes,
}

impl TimeUnit {
    pub fn duration(&self, amount: u64) -> Duration {
        match self {
            TimeUnit::Milliseconds => Duration::from_millis(amount),
            TimeUnit::Seconds => Duration::from_secs(amount),
            TimeUnit::Minutes => Duration::from_secs(amount.saturating_mul(60)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollingConfig {
    /// Delay between the end of one tick and the start of the next
    pub interval: u64,
    pub unit: TimeUnit,
    pub batch_size: usize,
    pub window_size: usize,
    pub consumer_failure: ConsumerFailurePolicy,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval: 500,
            unit: TimeUnit::Milliseconds,
            batch_size: 100,
            window_size: 100,
            consumer_failure: ConsumerFailurePolicy::Abort,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IndexConfig {
    /// Page size of containing-root lookups
    pub page_size: usize,
    /// Tokenized document fields (containment id fields are added as keywords)
    pub text_fields: Vec<String>,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            page_size: 100,
            text_fields: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmbedConfig {
    pub entity_type: String,
    pub id_fields: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RootConfig {
    pub entity_type: String,
    #[serde(default)]
    pub embeds: Vec<EmbedConfig>,
}

/// Validated configuration
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SyncConfig {
    pub polling: PollingConfig,
    pub index: IndexConfig,
    pub log_tables: Vec<EventModelInfo>,
    pub roots: Vec<RootConfig>,
}

impl SyncConfig {
    /// Load and validate a YAML file
    pub fn from_yaml(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let file: ConfigFileV1 = serde_yaml::from_str(content)?;
        match file.version {
            None => return Err(ConfigError::MissingVersion),
            Some(version) if !io::SUPPORTED_VERSIONS.contains(&version) => {
                return Err(ConfigError::UnsupportedVersion {
                    found: version,
                    supported: io::SUPPORTED_VERSIONS.to_vec(),
                })
            }
            Some(_) => {}
        }

        let config = Self {
            polling: file.polling,
            index: file.index,
            log_tables: file.log_tables,
            roots: file.roots,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn to_yaml(&self) -> ConfigResult<String> {
        let file = ConfigFileV1 {
            version: Some(1),
            polling: self.polling.clone(),
            index: self.index.clone(),
            log_tables: self.log_tables.clone(),
            roots: self.roots.clone(),
        };
        Ok(serde_yaml::to_string(&file)?)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let polling = &self.polling;
        if polling.interval == 0 {
            return Err(ConfigError::range_with_hint(
                "polling.interval",
                polling.interval,
                1,
                u64::MAX,
                "A zero delay would spin on the log tables.",
            ));
        }
        check_range("polling.batch_size", polling.batch_size, MAX_BATCH_SIZE)?;
        check_range("polling.window_size", polling.window_size, MAX_WINDOW_SIZE)?;
        check_range("index.page_size", self.index.page_size, MAX_PAGE_SIZE)?;

        if self.log_tables.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one entry under 'log_tables' is required".to_string(),
            ));
        }
        let mut tables = HashSet::new();
        for model in &self.log_tables {
            model
                .validate()
                .map_err(|err| ConfigError::Invalid(err.message))?;
            if !tables.insert(model.update_table.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "log table '{}' is declared twice",
                    model.update_table
                )));
            }
        }

        self.containment()
            .map_err(|err| ConfigError::Invalid(err.message))?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        self.polling.unit.duration(self.polling.interval)
    }

    pub fn event_models(&self) -> crate::Result<Vec<EventModelInfo>> {
        for model in &self.log_tables {
            model.validate()?;
        }
        Ok(self.log_tables.clone())
    }

    pub fn containment(&self) -> crate::Result<ContainmentIndex> {
        let mut builder = ContainmentIndex::builder();
        for root in &self.roots {
            builder = builder.root(root.entity_type.as_str());
        }
        for root in &self.roots {
            for embed in &root.embeds {
                for field in &embed.id_fields {
                    builder = builder.embeds(
                        root.entity_type.as_str(),
                        embed.entity_type.as_str(),
                        field.as_str(),
                    );
                }
            }
        }
        builder.build()
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            batch_size: self.polling.batch_size,
            window_size: self.polling.window_size,
            consumer_failure: self.polling.consumer_failure,
        }
    }

    pub fn updater_config(&self) -> UpdaterConfig {
        UpdaterConfig {
            page_size: self.index.page_size,
        }
    }

    /// Containment id fields as keywords plus the configured text fields
    #[cfg(feature = "tantivy")]
    pub fn index_layout(&self) -> crate::Result<IndexLayout> {
        let layout = IndexLayout::for_containment(&self.containment()?);
        Ok(self
            .index
            .text_fields
            .iter()
            .fold(layout, |layout, field| layout.text_field(field.as_str())))
    }
}

fn check_range(field: &str, value: usize, max: usize) -> ConfigResult<()> {
    if (1..=max).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::range_with_hint(
            field,
            value,
            1,
            max,
            format!("Use a value between 1 and {}.", max),
        ))
    }
}
