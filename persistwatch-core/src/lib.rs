//! persistwatch core library — persistence model, locations, store, errors.
//!
//! Public API surface:
//! - [`types`] — items, snapshots, diffs and persisted records
//! - [`location`] — the closed catalog of monitored locations
//! - [`store`] — keyed JSON store under `~/.persistwatch/`
//! - [`config`] — `config.yaml` loading
//! - [`process`] — bounded external-process execution
//! - [`privilege`] — permission probe and privileged helper contract
//! - [`error`] — [`StoreError`]

pub mod config;
pub mod error;
pub mod location;
pub mod privilege;
pub mod process;
pub mod store;
pub mod types;

pub use config::Config;
pub use error::StoreError;
pub use location::{Location, LocationSpec, LocationTable};
pub use privilege::{PermissionProbe, PrivilegedHelper};
pub use process::{CommandRunner, SystemCommandRunner};
pub use store::{SnapshotSummary, Store};
pub use types::{
    Attribution, AttributionSource, ChangeCounts, Diff, DiffRecord, DiffSource, Item, ItemId,
    ModifiedItem, PendingDiffPair, Snapshot, SnapshotId,
};
