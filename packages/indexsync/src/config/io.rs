//! Configuration I/O (YAML schema)
//!
//! On-disk shape of the configuration. `SyncConfig` converts to and from it.

use serde::{Deserialize, Serialize};

use super::{IndexConfig, PollingConfig, RootConfig};
use crate::domain::EventModelInfo;

/// YAML Schema v1
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFileV1 {
    /// Schema version (always 1 for v1). Optional here so a missing field
    /// gets a dedicated error instead of a generic parse failure.
    #[serde(default)]
    pub version: Option<u32>,

    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(default)]
    pub index: IndexConfig,

    #[serde(default)]
    pub log_tables: Vec<EventModelInfo>,

    #[serde(default)]
    pub roots: Vec<RootConfig>,
}

pub const SUPPORTED_VERSIONS: &[u32] = &[1];
