//! Error types for persistwatch-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from store and configuration operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying I/O failure, annotated with the path that was touched.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization error (write path).
    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// JSON or YAML parse error on load — includes the offending file.
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    /// A persisted record carries a schema version this build cannot read.
    #[error("unsupported schema version {version} in {path}")]
    UnsupportedSchema { path: PathBuf, version: u32 },

    /// `dirs::home_dir()` returned `None` — cannot locate `~/.persistwatch/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// The requested record did not exist at the expected path.
    #[error("not found at {path}")]
    NotFound { path: PathBuf },
}

/// Convenience constructor for [`StoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}
