//! # persistwatch-scan
//!
//! Snapshot capture and comparison.
//!
//! [`Pipeline::scan`] walks every persistence location, enumerates
//! configuration profiles and attributes the results; [`diff`] classifies
//! the delta between two snapshots.

pub mod descriptor;
pub mod diff;
pub mod error;
pub mod hasher;
pub mod pipeline;
pub mod profiles;
pub mod scanner;

pub use descriptor::{DescriptorFields, DescriptorKind};
pub use diff::{diff, diff_stored, reconstruct_pending};
pub use error::ScanError;
pub use pipeline::{record_manual_scan, Pipeline, SnapshotProvider};
pub use profiles::ProfileScanner;
pub use scanner::{read_item, Scanner};
