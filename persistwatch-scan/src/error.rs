//! Error types for persistwatch-scan.

use std::path::PathBuf;

use thiserror::Error;

use persistwatch_core::StoreError;

/// All errors that can arise from scan and diff operations.
///
/// Per-location and per-item failures never surface here; they degrade to
/// "absent" inside the scanner. These variants cover the calls that do fail:
/// explicit file hashing, stored-snapshot lookups and pipeline plumbing.
#[derive(Debug, Error)]
pub enum ScanError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An error from the snapshot store.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// The scan could not be completed (worker lost, runtime shut down).
    #[error("scan aborted: {0}")]
    Aborted(String),
}

/// Convenience constructor for [`ScanError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ScanError {
    ScanError::Io {
        path: path.into(),
        source,
    }
}
