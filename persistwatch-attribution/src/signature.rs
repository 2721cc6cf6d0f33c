//! Code-signature lookup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use persistwatch_core::process::DEFAULT_COMMAND_TIMEOUT;
use persistwatch_core::{CommandRunner, SystemCommandRunner};

/// Signing details of a binary or bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SigningInfo {
    pub team_id: Option<String>,
    /// Leaf signing authority, e.g. `Developer ID Application: Example (ABCDE12345)`.
    pub signing_identity: Option<String>,
}

/// Reads signing information for a path. `None` when unsigned or unknown.
pub trait SignatureReader: Send + Sync {
    fn read(&self, path: &Path) -> Option<SigningInfo>;
}

/// Never finds a signature.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoSignatures;

impl SignatureReader for NoSignatures {
    fn read(&self, _path: &Path) -> Option<SigningInfo> {
        None
    }
}

/// [`SignatureReader`] backed by `codesign -dv`.
///
/// `codesign` reports on stderr, so the invocation goes through `/bin/sh`
/// with stderr folded into stdout. The path is passed as a positional
/// argument, never interpolated into the script.
pub struct CodesignReader {
    runner: Arc<dyn CommandRunner>,
    shell: PathBuf,
    timeout: Duration,
}

impl CodesignReader {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            shell: PathBuf::from("/bin/sh"),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }
}

impl Default for CodesignReader {
    fn default() -> Self {
        Self::new(Arc::new(SystemCommandRunner))
    }
}

const CODESIGN_SCRIPT: &str = "exec /usr/bin/codesign -dv --verbose=2 \"$0\" 2>&1";

impl SignatureReader for CodesignReader {
    fn read(&self, path: &Path) -> Option<SigningInfo> {
        let path = path.to_str()?;
        let output = self
            .runner
            .run(&self.shell, &["-c", CODESIGN_SCRIPT, path], self.timeout)?;
        let info = parse_codesign_output(&String::from_utf8_lossy(&output));
        if info == SigningInfo::default() {
            None
        } else {
            Some(info)
        }
    }
}

/// Extract `TeamIdentifier=` and the first `Authority=` line.
pub fn parse_codesign_output(text: &str) -> SigningInfo {
    let mut info = SigningInfo::default();
    for line in text.lines() {
        if let Some(team) = line.strip_prefix("TeamIdentifier=") {
            let team = team.trim();
            if !team.is_empty() && team != "not set" {
                info.team_id = Some(team.to_string());
            }
        } else if let Some(authority) = line.strip_prefix("Authority=") {
            if info.signing_identity.is_none() {
                info.signing_identity = Some(authority.trim().to_string());
            }
        }
    }
    info
}
