//! Elevated-permission probing and the privileged helper contract.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;

/// Reports whether the elevated (Full Disk Access) permission is granted.
///
/// Consulted on every scan and every watcher start; implementations must not
/// cache the answer.
pub trait PermissionProbe: Send + Sync {
    fn is_granted(&self) -> bool;
}

/// Treats the permission as granted when a protected file is readable.
#[derive(Debug, Clone)]
pub struct FsPermissionProbe {
    protected_file: PathBuf,
}

impl FsPermissionProbe {
    pub fn new(protected_file: impl Into<PathBuf>) -> Self {
        Self {
            protected_file: protected_file.into(),
        }
    }
}

impl Default for FsPermissionProbe {
    /// Probes the system privacy database, which only Full Disk Access can open.
    fn default() -> Self {
        Self::new("/Library/Application Support/com.apple.TCC/TCC.db")
    }
}

impl PermissionProbe for FsPermissionProbe {
    fn is_granted(&self) -> bool {
        std::fs::File::open(&self.protected_file).is_ok()
    }
}

/// A probe whose answer is set explicitly. Used by tests and by callers that
/// learn the permission state from elsewhere.
#[derive(Debug, Default)]
pub struct FixedPermission(AtomicBool);

impl FixedPermission {
    pub fn new(granted: bool) -> Self {
        Self(AtomicBool::new(granted))
    }

    pub fn set(&self, granted: bool) {
        self.0.store(granted, Ordering::SeqCst);
    }
}

impl PermissionProbe for FixedPermission {
    fn is_granted(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Errors surfaced by a privileged helper connection.
#[derive(Debug, Error)]
pub enum HelperError {
    #[error("privileged helper is not connected")]
    NotConnected,

    #[error("privileged helper rejected {path}: {message}")]
    Rejected { path: PathBuf, message: String },
}

/// Remote contract of the out-of-process privileged helper.
pub trait PrivilegedHelper: Send + Sync {
    /// Paths of the entries found at a privileged location.
    fn scan_location(&self, path: &Path) -> Result<Vec<PathBuf>, HelperError>;

    fn version(&self) -> Result<String, HelperError>;
}

/// Helper stand-in used when no helper connection is established.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableHelper;

impl PrivilegedHelper for UnavailableHelper {
    fn scan_location(&self, _path: &Path) -> Result<Vec<PathBuf>, HelperError> {
        Err(HelperError::NotConnected)
    }

    fn version(&self) -> Result<String, HelperError> {
        Err(HelperError::NotConnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn fs_probe_follows_readability() {
        let file = NamedTempFile::new().unwrap();
        assert!(FsPermissionProbe::new(file.path()).is_granted());
        assert!(!FsPermissionProbe::new("/nonexistent/TCC.db").is_granted());
    }

    #[test]
    fn fixed_permission_can_flip() {
        let probe = FixedPermission::new(false);
        assert!(!probe.is_granted());
        probe.set(true);
        assert!(probe.is_granted());
    }

    #[test]
    fn unavailable_helper_is_not_connected() {
        let err = UnavailableHelper.scan_location(Path::new("/x")).unwrap_err();
        assert!(matches!(err, HelperError::NotConnected));
    }
}
