//! Domain types for persistence inventories.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.
//! All persisted types are serializable via serde + serde_json.

use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::location::Location;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed snapshot identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotId(pub Uuid);

impl SnapshotId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SnapshotId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for SnapshotId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// A strongly-typed identifier for a single scanned item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub Uuid);

impl ItemId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ItemId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ItemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Attribution
// ---------------------------------------------------------------------------

/// Which resolver strategy produced an [`Attribution`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributionSource {
    ProgramPath,
    IdentifierPrefix,
    InstallReceipt,
    TeamId,
}

impl fmt::Display for AttributionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributionSource::ProgramPath => write!(f, "program path"),
            AttributionSource::IdentifierPrefix => write!(f, "identifier"),
            AttributionSource::InstallReceipt => write!(f, "install receipt"),
            AttributionSource::TeamId => write!(f, "team id"),
        }
    }
}

/// The installed application heuristically identified as an item's owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attribution {
    pub app_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle_id: Option<String>,
    pub bundle_path: PathBuf,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signing_identity: Option<String>,
    pub source: AttributionSource,
}

// ---------------------------------------------------------------------------
// Item
// ---------------------------------------------------------------------------

/// One entry found at a persistence location.
///
/// Two items are the same persistence unit iff their paths match. Equality
/// and hashing compare path **and** digest, so an unchanged item is one whose
/// content digest also matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    pub path: PathBuf,
    pub location: Location,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
    pub size: u64,
    /// Lowercase hex SHA-256 of the item's raw bytes.
    pub digest: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_at_boot: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_alive: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribution: Option<Attribution>,
}

impl Item {
    /// A bare item with every optional field absent.
    pub fn new(path: impl Into<PathBuf>, location: Location, digest: impl Into<String>) -> Self {
        let path = path.into();
        Self {
            id: ItemId::new(),
            name: file_name_of(&path),
            path,
            location,
            modified_at: None,
            size: 0,
            digest: digest.into(),
            identifier: None,
            program: None,
            run_at_boot: None,
            keep_alive: None,
            attribution: None,
        }
    }

    /// Whether `other` is the same persistence unit (same path).
    pub fn same_unit(&self, other: &Item) -> bool {
        self.path == other.path
    }
}

impl PartialEq for Item {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.digest == other.digest
    }
}

impl Eq for Item {}

impl Hash for Item {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
        self.digest.hash(state);
    }
}

fn file_name_of(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// An immutable, hashed inventory of every item found at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: SnapshotId,
    pub captured_at: DateTime<Utc>,
    pub label: String,
    pub items: Vec<Item>,
    pub aggregate_digest: String,
}

impl Snapshot {
    /// Build a snapshot from scanned items: sorts by path and computes the
    /// aggregate digest.
    pub fn capture(label: impl Into<String>, mut items: Vec<Item>) -> Self {
        items.sort_by(|a, b| a.path.cmp(&b.path));
        let aggregate_digest = aggregate_digest(&items);
        Self {
            id: SnapshotId::new(),
            captured_at: Utc::now(),
            label: label.into(),
            items,
            aggregate_digest,
        }
    }

    /// Cheap whole-snapshot equality probe.
    pub fn same_contents(&self, other: &Snapshot) -> bool {
        self.aggregate_digest == other.aggregate_digest
    }

    pub fn item_at(&self, path: &Path) -> Option<&Item> {
        self.items.iter().find(|item| item.path == path)
    }

    /// Number of items per location, in [`Location`] order.
    pub fn counts_by_location(&self) -> BTreeMap<Location, usize> {
        let mut counts = BTreeMap::new();
        for item in &self.items {
            *counts.entry(item.location).or_insert(0) += 1;
        }
        counts
    }
}

/// SHA-256 over the lexicographically sorted concatenation of item digests.
pub fn aggregate_digest(items: &[Item]) -> String {
    let mut digests: Vec<&str> = items.iter().map(|i| i.digest.as_str()).collect();
    digests.sort_unstable();
    let mut h = Sha256::new();
    for digest in digests {
        h.update(digest.as_bytes());
    }
    hex::encode(h.finalize())
}

// ---------------------------------------------------------------------------
// Diff
// ---------------------------------------------------------------------------

/// An item present in both snapshots whose digest changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModifiedItem {
    pub before: Item,
    pub after: Item,
}

impl ModifiedItem {
    pub fn path(&self) -> &Path {
        &self.after.path
    }
}

/// Per-location change counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChangeCounts {
    pub added: usize,
    pub removed: usize,
    pub modified: usize,
}

impl ChangeCounts {
    pub fn total(&self) -> usize {
        self.added + self.removed + self.modified
    }
}

/// The classified delta between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diff {
    pub before_id: SnapshotId,
    pub after_id: SnapshotId,
    pub before_captured_at: DateTime<Utc>,
    pub after_captured_at: DateTime<Utc>,
    pub added: Vec<Item>,
    pub removed: Vec<Item>,
    pub modified: Vec<ModifiedItem>,
}

impl Diff {
    pub fn total_changes(&self) -> usize {
        self.added.len() + self.removed.len() + self.modified.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total_changes() == 0
    }

    pub fn counts(&self) -> ChangeCounts {
        ChangeCounts {
            added: self.added.len(),
            removed: self.removed.len(),
            modified: self.modified.len(),
        }
    }

    /// Change counts grouped by location, in [`Location`] order.
    pub fn counts_by_location(&self) -> BTreeMap<Location, ChangeCounts> {
        let mut by_location: BTreeMap<Location, ChangeCounts> = BTreeMap::new();
        for item in &self.added {
            by_location.entry(item.location).or_default().added += 1;
        }
        for item in &self.removed {
            by_location.entry(item.location).or_default().removed += 1;
        }
        for pair in &self.modified {
            by_location.entry(pair.after.location).or_default().modified += 1;
        }
        by_location
    }

    /// Locations touched by any change, ordered and deduplicated.
    pub fn affected_locations(&self) -> Vec<Location> {
        self.counts_by_location().into_keys().collect()
    }

    /// Lightweight persisted summary of this diff.
    pub fn to_record(&self, source: DiffSource) -> DiffRecord {
        DiffRecord {
            id: Uuid::new_v4(),
            before_snapshot_id: self.before_id,
            after_snapshot_id: self.after_id,
            timestamp: Utc::now(),
            added_count: self.added.len(),
            removed_count: self.removed.len(),
            modified_count: self.modified.len(),
            source,
            affected_locations: Some(self.affected_locations()),
        }
    }
}

// ---------------------------------------------------------------------------
// Persisted records
// ---------------------------------------------------------------------------

/// How a diff was detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiffSource {
    Manual,
    Automatic,
}

impl fmt::Display for DiffSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiffSource::Manual => write!(f, "manual"),
            DiffSource::Automatic => write!(f, "automatic"),
        }
    }
}

/// Current on-disk schema version for [`DiffRecord`].
pub const DIFF_RECORD_SCHEMA_VERSION: u32 = 2;

/// Persisted summary of one completed diff.
///
/// `affected_locations` is `None` for version 1 records, which predate the
/// field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "DiffRecordWire", into = "DiffRecordWire")]
pub struct DiffRecord {
    pub id: Uuid,
    pub before_snapshot_id: SnapshotId,
    pub after_snapshot_id: SnapshotId,
    pub timestamp: DateTime<Utc>,
    pub added_count: usize,
    pub removed_count: usize,
    pub modified_count: usize,
    pub source: DiffSource,
    pub affected_locations: Option<Vec<Location>>,
}

impl DiffRecord {
    pub fn total_changes(&self) -> usize {
        self.added_count + self.removed_count + self.modified_count
    }
}

/// On-disk shape of a [`DiffRecord`]. Records written before versioning carry
/// no `schema_version` and are read as version 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct DiffRecordWire {
    #[serde(default = "legacy_schema_version")]
    schema_version: u32,
    id: Uuid,
    before_snapshot_id: SnapshotId,
    after_snapshot_id: SnapshotId,
    timestamp: DateTime<Utc>,
    added_count: usize,
    removed_count: usize,
    modified_count: usize,
    source: DiffSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    affected_locations: Option<Vec<Location>>,
}

fn legacy_schema_version() -> u32 {
    1
}

impl TryFrom<DiffRecordWire> for DiffRecord {
    type Error = String;

    fn try_from(wire: DiffRecordWire) -> Result<Self, Self::Error> {
        let affected_locations = match wire.schema_version {
            1 => None,
            2 => Some(wire.affected_locations.ok_or_else(|| {
                "schema version 2 diff record is missing affected_locations".to_string()
            })?),
            other => return Err(format!("unsupported diff record schema version {other}")),
        };
        Ok(DiffRecord {
            id: wire.id,
            before_snapshot_id: wire.before_snapshot_id,
            after_snapshot_id: wire.after_snapshot_id,
            timestamp: wire.timestamp,
            added_count: wire.added_count,
            removed_count: wire.removed_count,
            modified_count: wire.modified_count,
            source: wire.source,
            affected_locations,
        })
    }
}

impl From<DiffRecord> for DiffRecordWire {
    fn from(record: DiffRecord) -> Self {
        let schema_version = match record.affected_locations {
            Some(_) => DIFF_RECORD_SCHEMA_VERSION,
            None => legacy_schema_version(),
        };
        DiffRecordWire {
            schema_version,
            id: record.id,
            before_snapshot_id: record.before_snapshot_id,
            after_snapshot_id: record.after_snapshot_id,
            timestamp: record.timestamp,
            added_count: record.added_count,
            removed_count: record.removed_count,
            modified_count: record.modified_count,
            source: record.source,
            affected_locations: record.affected_locations,
        }
    }
}

/// A detected but not yet acknowledged before/after snapshot pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingDiffPair {
    pub before_id: SnapshotId,
    pub after_id: SnapshotId,
    #[serde(default = "Utc::now")]
    pub detected_at: DateTime<Utc>,
}

impl PendingDiffPair {
    pub fn new(before_id: SnapshotId, after_id: SnapshotId) -> Self {
        Self {
            before_id,
            after_id,
            detected_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
