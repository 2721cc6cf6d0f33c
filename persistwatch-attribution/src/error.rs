//! Error types for persistwatch-attribution.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from reading bundles and receipts.
///
/// The resolver itself never fails; these surface from the individual
/// readers and are logged and skipped while the registry is built.
#[derive(Debug, Error)]
pub enum AttributionError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse property list {path}: {source}")]
    Plist {
        path: PathBuf,
        #[source]
        source: plist::Error,
    },

    #[error("'{path}' is not an application bundle")]
    NotABundle { path: PathBuf },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> AttributionError {
    AttributionError::Io {
        path: path.into(),
        source,
    }
}
