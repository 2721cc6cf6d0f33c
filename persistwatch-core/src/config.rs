//! User configuration at `~/.persistwatch/config.yaml`.
//!
//! Every field is optional; a missing file yields [`Config::default`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{io_err, StoreError};
use crate::location::{Location, LocationTable};
use crate::store::data_root;

pub const CONFIG_FILE: &str = "config.yaml";

/// Root configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub notifications_enabled: bool,
    /// Per-location elevation requirement, verified against the running OS.
    pub elevation_overrides: BTreeMap<Location, bool>,
    pub watch: WatchConfig,
    pub attribution: AttributionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            notifications_enabled: true,
            elevation_overrides: BTreeMap::new(),
            watch: WatchConfig::default(),
            attribution: AttributionConfig::default(),
        }
    }
}

/// Watch-service timing knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    pub coalescing_latency_ms: u64,
    pub debounce_ms: u64,
    pub notification_grace_secs: u64,
    pub permission_poll_secs: u64,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            coalescing_latency_ms: 2_500,
            debounce_ms: 1_500,
            notification_grace_secs: 60,
            permission_poll_secs: 30,
        }
    }
}

impl WatchConfig {
    pub fn coalescing_latency(&self) -> Duration {
        Duration::from_millis(self.coalescing_latency_ms)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn notification_grace(&self) -> Duration {
        Duration::from_secs(self.notification_grace_secs)
    }

    pub fn permission_poll(&self) -> Duration {
        Duration::from_secs(self.permission_poll_secs.max(1))
    }
}

/// Attribution resolver knobs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AttributionConfig {
    /// Additional directories scanned (one level deep) for `.app` bundles.
    pub extra_app_dirs: Vec<PathBuf>,
}

impl Config {
    /// The standard location table with this config's elevation overrides.
    pub fn location_table(&self, home: &Path) -> LocationTable {
        LocationTable::standard(home).with_elevation_overrides(&self.elevation_overrides)
    }
}

/// `<home>/.persistwatch/config.yaml` — pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    data_root(home).join(CONFIG_FILE)
}

/// Load the config under `home`, falling back to defaults when absent.
///
/// Returns `StoreError::Parse` (with path) if the YAML is malformed.
pub fn load_at(home: &Path) -> Result<Config, StoreError> {
    let path = config_path_at(home);
    let contents = match std::fs::read_to_string(&path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Config::default()),
        Err(err) => return Err(io_err(&path, err)),
    };
    if contents.trim().is_empty() {
        return Ok(Config::default());
    }
    serde_yaml::from_str(&contents).map_err(|e| StoreError::Parse {
        path,
        message: e.to_string(),
    })
}
