//! Keyed JSON store for snapshots, diff records and watch state.
//!
//! # Storage layout
//!
//! ```text
//! ~/.persistwatch/
//!   snapshots/<snapshot_id>.json   (mode 0600)
//!   records/<record_id>.json       (mode 0600)
//!   pending.json                   (unacknowledged watch detection)
//!   baseline.json                  (pointer to the watch baseline snapshot)
//! ```
//!
//! # API pattern
//!
//! [`Store::at`] takes an explicit home and is what tests use with `TempDir`;
//! [`Store::open`] derives home from `dirs::home_dir()`.
//!
//! Every write goes to a `.tmp` sibling, is chmod'ed `0600`, then renamed
//! over the target, so readers never observe a half-written file.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{io_err, StoreError};
use crate::types::{DiffRecord, PendingDiffPair, Snapshot, SnapshotId};

pub const DATA_DIR: &str = ".persistwatch";
const SNAPSHOTS_DIR: &str = "snapshots";
const RECORDS_DIR: &str = "records";
const PENDING_FILE: &str = "pending.json";
const BASELINE_FILE: &str = "baseline.json";

/// `<home>/.persistwatch/`
pub fn data_root(home: &Path) -> PathBuf {
    home.join(DATA_DIR)
}

/// Listing entry for a stored snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotSummary {
    pub id: SnapshotId,
    pub captured_at: DateTime<Utc>,
    pub label: String,
    pub item_count: usize,
    pub aggregate_digest: String,
}

impl From<&Snapshot> for SnapshotSummary {
    fn from(snapshot: &Snapshot) -> Self {
        Self {
            id: snapshot.id,
            captured_at: snapshot.captured_at,
            label: snapshot.label.clone(),
            item_count: snapshot.items.len(),
            aggregate_digest: snapshot.aggregate_digest.clone(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct BaselinePointer {
    snapshot_id: SnapshotId,
}

/// File-backed store rooted at `<home>/.persistwatch/`.
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    /// Store rooted under an explicit home directory.
    pub fn at(home: &Path) -> Self {
        Self {
            root: data_root(home),
        }
    }

    /// Store rooted under the current user's home directory.
    pub fn open() -> Result<Self, StoreError> {
        let home = dirs::home_dir().ok_or(StoreError::HomeNotFound)?;
        Ok(Self::at(&home))
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    pub fn snapshot_path(&self, id: SnapshotId) -> PathBuf {
        self.root.join(SNAPSHOTS_DIR).join(format!("{id}.json"))
    }

    pub fn save_snapshot(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        write_json_atomic(&self.snapshot_path(snapshot.id), snapshot)
    }

    pub fn load_snapshot(&self, id: SnapshotId) -> Result<Snapshot, StoreError> {
        read_json(&self.snapshot_path(id))
    }

    pub fn delete_snapshot(&self, id: SnapshotId) -> Result<(), StoreError> {
        remove_file(&self.snapshot_path(id))
    }

    /// Summaries of every readable snapshot, oldest first. Unreadable files
    /// are skipped with a warning.
    pub fn list_snapshots(&self) -> Result<Vec<SnapshotSummary>, StoreError> {
        let mut summaries: Vec<SnapshotSummary> = self
            .read_all::<Snapshot>(SNAPSHOTS_DIR)?
            .iter()
            .map(SnapshotSummary::from)
            .collect();
        summaries.sort_by(|a, b| a.captured_at.cmp(&b.captured_at).then(a.id.cmp(&b.id)));
        Ok(summaries)
    }

    /// Most recent stored snapshot, if any.
    pub fn latest_snapshot(&self) -> Result<Option<Snapshot>, StoreError> {
        match self.list_snapshots()?.last() {
            Some(summary) => self.load_snapshot(summary.id).map(Some),
            None => Ok(None),
        }
    }

    // -----------------------------------------------------------------------
    // Diff records
    // -----------------------------------------------------------------------

    pub fn record_path(&self, id: Uuid) -> PathBuf {
        self.root.join(RECORDS_DIR).join(format!("{id}.json"))
    }

    pub fn save_record(&self, record: &DiffRecord) -> Result<(), StoreError> {
        write_json_atomic(&self.record_path(record.id), record)
    }

    pub fn load_record(&self, id: Uuid) -> Result<DiffRecord, StoreError> {
        read_json(&self.record_path(id))
    }

    pub fn delete_record(&self, id: Uuid) -> Result<(), StoreError> {
        remove_file(&self.record_path(id))
    }

    /// Every readable diff record, newest first.
    pub fn list_records(&self) -> Result<Vec<DiffRecord>, StoreError> {
        let mut records = self.read_all::<DiffRecord>(RECORDS_DIR)?;
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(records)
    }

    // -----------------------------------------------------------------------
    // Pending pair
    // -----------------------------------------------------------------------

    pub fn save_pending(&self, pending: &PendingDiffPair) -> Result<(), StoreError> {
        write_json_atomic(&self.root.join(PENDING_FILE), pending)
    }

    pub fn load_pending(&self) -> Result<Option<PendingDiffPair>, StoreError> {
        read_json_optional(&self.root.join(PENDING_FILE))
    }

    /// Acknowledge the pending detection. Idempotent.
    pub fn clear_pending(&self) -> Result<(), StoreError> {
        match remove_file(&self.root.join(PENDING_FILE)) {
            Err(StoreError::NotFound { .. }) => Ok(()),
            other => other,
        }
    }

    // -----------------------------------------------------------------------
    // Watch baseline
    // -----------------------------------------------------------------------

    /// Persist `snapshot` and mark it as the watch baseline.
    pub fn save_baseline(&self, snapshot: &Snapshot) -> Result<(), StoreError> {
        self.save_snapshot(snapshot)?;
        write_json_atomic(
            &self.root.join(BASELINE_FILE),
            &BaselinePointer {
                snapshot_id: snapshot.id,
            },
        )
    }

    /// The current baseline, or `None` if none is recorded or its snapshot
    /// has since been deleted.
    pub fn load_baseline(&self) -> Result<Option<Snapshot>, StoreError> {
        let Some(pointer) = read_json_optional::<BaselinePointer>(&self.root.join(BASELINE_FILE))?
        else {
            return Ok(None);
        };
        match self.load_snapshot(pointer.snapshot_id) {
            Ok(snapshot) => Ok(Some(snapshot)),
            Err(StoreError::NotFound { .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn read_all<T: DeserializeOwned>(&self, subdir: &str) -> Result<Vec<T>, StoreError> {
        let dir = self.root.join(subdir);
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(err) => return Err(io_err(&dir, err)),
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        paths.sort();

        let mut values = Vec::with_capacity(paths.len());
        for path in paths {
            match read_json(&path) {
                Ok(value) => values.push(value),
                Err(err) => tracing::warn!("skipping unreadable store entry: {err}"),
            }
        }
        Ok(values)
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            return Err(StoreError::NotFound {
                path: path.to_path_buf(),
            })
        }
        Err(err) => return Err(io_err(path, err)),
    };
    serde_json::from_str(&contents).map_err(|e| StoreError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

fn read_json_optional<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match read_json(path) {
        Ok(value) => Ok(Some(value)),
        Err(StoreError::NotFound { .. }) => Ok(None),
        Err(err) => Err(err),
    }
}

fn remove_file(path: &Path) -> Result<(), StoreError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Err(StoreError::NotFound {
            path: path.to_path_buf(),
        }),
        Err(err) => Err(io_err(path, err)),
    }
}

/// Write flow: serialize → `.json.tmp` sibling → `chmod 0600` → `rename`.
/// `.tmp` is always in the same directory as the target (same filesystem).
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let Some(dir) = path.parent() else {
        return Err(io_err(path, std::io::Error::other("invalid store path")));
    };
    ensure_dir(dir)?;

    let json = serde_json::to_string_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json).map_err(|e| io_err(&tmp, e))?;
    set_file_permissions(&tmp)?;
    if let Err(err) = std::fs::rename(&tmp, path) {
        let _ = std::fs::remove_file(&tmp);
        return Err(io_err(path, err));
    }
    Ok(())
}

fn ensure_dir(dir: &Path) -> Result<(), StoreError> {
    if dir.exists() {
        return Ok(());
    }
    std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
    set_dir_permissions(dir)
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), StoreError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), StoreError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
