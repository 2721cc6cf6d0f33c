//! persistwatch daemon: continuous persistence monitoring.
//!
//! - [`watch`]: the stopped/running watch service and its debounced
//!   scan-diff cycle
//! - [`fsevents`]: the change-source seam and its `notify` adapter
//! - [`scan_queue`]: the serialized scan worker
//! - [`notifier`]: user notification delivery
//! - [`protocol`]: socket client and wire types
//! - [`launchd`]: per-user LaunchAgent management

mod error;
pub mod fsevents;
pub mod launchd;
pub mod log_rotation;
pub mod notifier;
pub mod paths;
pub mod protocol;
mod runtime;
pub mod scan_queue;
pub mod watch;

pub use error::DaemonError;
pub use fsevents::{ChangeBurst, ChangeSource, NotifyChangeSource, Subscription};
pub use launchd::{generate_plist, install as install_launchd, uninstall as uninstall_launchd};
pub use notifier::{LogNotifier, Notifier};
pub use protocol::{
    request_restart, request_scan, request_status, request_stop, send_request, DaemonRequest,
    DaemonResponse,
};
pub use runtime::{run, start_blocking, MANUAL_SNAPSHOT_LABEL};
pub use scan_queue::ScanQueue;
pub use watch::{CycleOutcome, DiffCallback, WatchService, WatchSettings};
