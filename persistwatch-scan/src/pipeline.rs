//! Shared capture pipeline used by the CLI and the daemon.

use std::path::Path;
use std::sync::Arc;

use persistwatch_attribution::AttributionResolver;
use persistwatch_core::privilege::FsPermissionProbe;
use persistwatch_core::{Config, Diff, DiffSource, Snapshot, Store, SystemCommandRunner};

use crate::diff::diff;
use crate::profiles::ProfileScanner;
use crate::scanner::Scanner;
use crate::ScanError;

/// Anything that can produce a fresh snapshot.
///
/// The watch service and the scan queue depend on this rather than on
/// [`Pipeline`] so tests can script snapshot sequences.
pub trait SnapshotProvider: Send + Sync {
    fn capture(&self, label: &str) -> Result<Snapshot, ScanError>;
}

/// Filesystem scan, profile enumeration and attribution, in that order.
pub struct Pipeline {
    scanner: Scanner,
    profiles: Option<ProfileScanner>,
    resolver: Option<Arc<AttributionResolver>>,
}

impl Pipeline {
    pub fn new(scanner: Scanner) -> Self {
        Self {
            scanner,
            profiles: None,
            resolver: None,
        }
    }

    pub fn with_profiles(mut self, profiles: ProfileScanner) -> Self {
        self.profiles = Some(profiles);
        self
    }

    pub fn with_resolver(mut self, resolver: Arc<AttributionResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// The production pipeline for `home`: standard locations with config
    /// overrides, the TCC-readability permission probe, `profiles` (macOS
    /// only) and the standard attribution roots.
    pub fn standard(home: &Path, config: &Config) -> Self {
        let scanner = Scanner::new(
            config.location_table(home),
            Arc::new(FsPermissionProbe::default()),
        );
        let mut pipeline = Self::new(scanner).with_resolver(Arc::new(
            AttributionResolver::standard(home, &config.attribution),
        ));
        if cfg!(target_os = "macos") {
            pipeline = pipeline.with_profiles(ProfileScanner::new(Arc::new(SystemCommandRunner)));
        }
        pipeline
    }

    pub fn scanner(&self) -> &Scanner {
        &self.scanner
    }

    pub fn resolver(&self) -> Option<&Arc<AttributionResolver>> {
        self.resolver.as_ref()
    }

    /// Scan everything into a new snapshot. Never fails: unreadable units
    /// are simply absent.
    pub fn scan(&self, label: &str) -> Snapshot {
        let mut items = self.scanner.scan_items();
        if let Some(profiles) = &self.profiles {
            items.extend(profiles.scan_profiles());
        }
        if let Some(resolver) = &self.resolver {
            resolver.attribute_all(&mut items);
        }
        let snapshot = Snapshot::capture(label, items);
        tracing::info!(
            "captured snapshot {} ({} items)",
            snapshot.id,
            snapshot.items.len()
        );
        snapshot
    }
}

impl SnapshotProvider for Pipeline {
    fn capture(&self, label: &str) -> Result<Snapshot, ScanError> {
        Ok(self.scan(label))
    }
}

/// Persist a user-requested snapshot and diff it against the previous one.
///
/// Returns the diff when a previous snapshot existed. A non-empty diff is
/// recorded with [`DiffSource::Manual`]. Only reading the previous snapshot
/// can fail; write failures are logged and the diff is still returned.
pub fn record_manual_scan(
    store: &Store,
    snapshot: &Snapshot,
) -> Result<Option<Diff>, ScanError> {
    let previous = store.latest_snapshot()?;
    if let Err(err) = store.save_snapshot(snapshot) {
        tracing::error!("failed to store snapshot {}: {err}", snapshot.id);
    }

    let Some(previous) = previous else {
        return Ok(None);
    };
    let delta = diff(&previous, snapshot);
    if !delta.is_empty() {
        if let Err(err) = store.save_record(&delta.to_record(DiffSource::Manual)) {
            tracing::error!("failed to store diff record: {err}");
        }
    }
    Ok(Some(delta))
}
