//! Location registry — the closed, ordered catalog of persistence locations.
//!
//! | Location                   | Standard path                                                  | Kind |
//! |----------------------------|----------------------------------------------------------------|------|
//! | `UserLaunchAgents`         | `~/Library/LaunchAgents`                                       | dir  |
//! | `SystemLaunchAgents`       | `/Library/LaunchAgents`                                        | dir  |
//! | `SystemLaunchDaemons`      | `/Library/LaunchDaemons`                                       | dir  |
//! | `SystemExtensions`         | `/Library/SystemExtensions`                                    | dir  |
//! | `BackgroundTaskManagement` | `/private/var/db/com.apple.backgroundtaskmanagement`           | dir  |
//! | `ConfigurationProfiles`    | `/private/var/db/ConfigurationProfiles/Store`                  | dir  |
//! | `UserTccDatabase`          | `~/Library/Application Support/com.apple.TCC/TCC.db`           | file |
//! | `SystemTccDatabase`        | `/Library/Application Support/com.apple.TCC/TCC.db`            | file |
//!
//! Whether a location needs the elevated (Full Disk Access) permission is a
//! per-location value on [`LocationSpec`], seeded from
//! [`Location::default_requires_elevation`] and overridable from config.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// One of the fixed set of monitored persistence locations.
///
/// Declaration order is the display / grouping order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Location {
    UserLaunchAgents,
    SystemLaunchAgents,
    SystemLaunchDaemons,
    SystemExtensions,
    BackgroundTaskManagement,
    ConfigurationProfiles,
    UserTccDatabase,
    SystemTccDatabase,
}

impl Location {
    /// All locations in a stable order.
    pub const ALL: [Location; 8] = [
        Location::UserLaunchAgents,
        Location::SystemLaunchAgents,
        Location::SystemLaunchDaemons,
        Location::SystemExtensions,
        Location::BackgroundTaskManagement,
        Location::ConfigurationProfiles,
        Location::UserTccDatabase,
        Location::SystemTccDatabase,
    ];

    pub fn display_name(&self) -> &'static str {
        match self {
            Location::UserLaunchAgents => "User Launch Agents",
            Location::SystemLaunchAgents => "System Launch Agents",
            Location::SystemLaunchDaemons => "Launch Daemons",
            Location::SystemExtensions => "System Extensions",
            Location::BackgroundTaskManagement => "Background Task Management",
            Location::ConfigurationProfiles => "Configuration Profiles",
            Location::UserTccDatabase => "User Privacy Database",
            Location::SystemTccDatabase => "System Privacy Database",
        }
    }

    /// Single-file locations are scanned as one item each.
    pub fn is_single_file(&self) -> bool {
        matches!(
            self,
            Location::UserTccDatabase | Location::SystemTccDatabase
        )
    }

    /// File extensions (lowercase, without dot) that count as items.
    /// Empty for single-file locations.
    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Location::BackgroundTaskManagement => &["plist", "btm"],
            Location::UserTccDatabase | Location::SystemTccDatabase => &[],
            _ => &["plist"],
        }
    }

    /// How many directory levels below the root are walked.
    /// The BTM store nests registrations under per-owner subdirectories.
    pub fn max_depth(&self) -> usize {
        match self {
            Location::BackgroundTaskManagement => 2,
            _ => 1,
        }
    }

    pub fn default_requires_elevation(&self) -> bool {
        matches!(
            self,
            Location::BackgroundTaskManagement
                | Location::ConfigurationProfiles
                | Location::UserTccDatabase
                | Location::SystemTccDatabase
        )
    }

    /// Standard macOS path, with home-relative locations resolved against `home`.
    pub fn standard_path(&self, home: &Path) -> PathBuf {
        match self {
            Location::UserLaunchAgents => home.join("Library").join("LaunchAgents"),
            Location::SystemLaunchAgents => PathBuf::from("/Library/LaunchAgents"),
            Location::SystemLaunchDaemons => PathBuf::from("/Library/LaunchDaemons"),
            Location::SystemExtensions => PathBuf::from("/Library/SystemExtensions"),
            Location::BackgroundTaskManagement => {
                PathBuf::from("/private/var/db/com.apple.backgroundtaskmanagement")
            }
            Location::ConfigurationProfiles => {
                PathBuf::from("/private/var/db/ConfigurationProfiles/Store")
            }
            Location::UserTccDatabase => home
                .join("Library")
                .join("Application Support")
                .join("com.apple.TCC")
                .join("TCC.db"),
            Location::SystemTccDatabase => {
                PathBuf::from("/Library/Application Support/com.apple.TCC/TCC.db")
            }
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// A location bound to a concrete path and elevation requirement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationSpec {
    pub location: Location,
    pub path: PathBuf,
    pub requires_elevation: bool,
}

impl LocationSpec {
    pub fn new(location: Location, path: impl Into<PathBuf>) -> Self {
        Self {
            location,
            path: path.into(),
            requires_elevation: location.default_requires_elevation(),
        }
    }

    pub fn is_single_file(&self) -> bool {
        self.location.is_single_file()
    }

    /// Directory to subscribe for change notifications. Subscriptions need a
    /// directory, so single-file locations watch their parent.
    pub fn watch_path(&self) -> PathBuf {
        if self.is_single_file() {
            self.path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| self.path.clone())
        } else {
            self.path.clone()
        }
    }

    /// Whether this location may be read given the current permission state.
    pub fn is_accessible(&self, permission_granted: bool) -> bool {
        !self.requires_elevation || permission_granted
    }
}

/// The set of locations a scanner or watcher operates on, in [`Location`] order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocationTable {
    specs: Vec<LocationSpec>,
}

impl LocationTable {
    /// Build a table from arbitrary specs. Tests use this to point every
    /// location at a scratch directory.
    pub fn new(mut specs: Vec<LocationSpec>) -> Self {
        specs.sort_by_key(|s| s.location);
        specs.dedup_by_key(|s| s.location);
        Self { specs }
    }

    /// Every location at its standard macOS path.
    pub fn standard(home: &Path) -> Self {
        Self::new(
            Location::ALL
                .iter()
                .map(|loc| LocationSpec::new(*loc, loc.standard_path(home)))
                .collect(),
        )
    }

    /// Apply configured elevation requirements on top of the defaults.
    pub fn with_elevation_overrides(mut self, overrides: &BTreeMap<Location, bool>) -> Self {
        for spec in &mut self.specs {
            if let Some(required) = overrides.get(&spec.location) {
                spec.requires_elevation = *required;
            }
        }
        self
    }

    pub fn specs(&self) -> &[LocationSpec] {
        &self.specs
    }

    pub fn get(&self, location: Location) -> Option<&LocationSpec> {
        self.specs.iter().find(|s| s.location == location)
    }

    /// Deduplicated, sorted watch-subscription paths. Privileged locations
    /// contribute only while the permission is granted.
    pub fn watch_paths(&self, permission_granted: bool) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self
            .specs
            .iter()
            .filter(|s| s.is_accessible(permission_granted))
            .map(LocationSpec::watch_path)
            .collect();
        paths.sort();
        paths.dedup();
        paths
    }

    /// The location whose root contains `path`, preferring the deepest root.
    pub fn location_for_path(&self, path: &Path) -> Option<Location> {
        self.specs
            .iter()
            .filter(|s| path.starts_with(&s.path))
            .max_by_key(|s| s.path.components().count())
            .map(|s| s.location)
    }
}
