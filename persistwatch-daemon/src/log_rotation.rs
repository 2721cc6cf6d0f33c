//! Size-based rotation for the daemon's stdout/stderr logs.
//!
//! launchd appends to `daemon.log` / `daemon-err.log` forever, so the daemon
//! rotates them itself: `daemon.log` → `daemon.log.1` → … → `daemon.log.5`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::paths::{stderr_log_path, stdout_log_path};

/// When to rotate and how many copies to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    pub max_bytes: u64,
    pub max_files: usize,
}

impl Default for RotationPolicy {
    /// 10 MiB, five rotated copies.
    fn default() -> Self {
        Self {
            max_bytes: 10 * 1024 * 1024,
            max_files: 5,
        }
    }
}

impl RotationPolicy {
    /// Rotate `log_path` once it reaches `max_bytes`. Returns whether a
    /// rotation happened; a missing log is not an error.
    ///
    /// The oldest copy is dropped, the rest shift up by one, and a fresh empty
    /// log takes the original name.
    pub fn rotate(&self, log_path: &Path) -> io::Result<bool> {
        let size = match fs::metadata(log_path) {
            Ok(meta) => meta.len(),
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err),
        };
        if size < self.max_bytes || self.max_files == 0 {
            return Ok(false);
        }

        let oldest = numbered_path(log_path, self.max_files);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for n in (1..self.max_files).rev() {
            let src = numbered_path(log_path, n);
            if src.exists() {
                fs::rename(&src, numbered_path(log_path, n + 1))?;
            }
        }
        fs::rename(log_path, numbered_path(log_path, 1))?;

        fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(log_path)?;
        Ok(true)
    }
}

/// Rotate both daemon logs under `home`. Failures are logged per file.
pub fn rotate_daemon_logs(home: &Path, policy: RotationPolicy) {
    for log_path in [stdout_log_path(home), stderr_log_path(home)] {
        match policy.rotate(&log_path) {
            Ok(true) => tracing::info!(path = %log_path.display(), "log file rotated"),
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(path = %log_path.display(), error = %err, "log rotation failed")
            }
        }
    }
}

/// `daemon.log` + 2 → `daemon.log.2`
fn numbered_path(base: &Path, n: usize) -> PathBuf {
    let mut name = base.file_name().unwrap_or_default().to_os_string();
    name.push(format!(".{n}"));
    base.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const SMALL: RotationPolicy = RotationPolicy {
        max_bytes: 16,
        max_files: 3,
    };

    #[test]
    fn default_policy_is_ten_mebibytes_five_copies() {
        let policy = RotationPolicy::default();
        assert_eq!(policy.max_bytes, 10 * 1024 * 1024);
        assert_eq!(policy.max_files, 5);
    }

    #[test]
    fn small_or_missing_logs_are_left_alone() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("daemon.log");
        assert!(!SMALL.rotate(&log).unwrap());

        fs::write(&log, b"short").unwrap();
        assert!(!SMALL.rotate(&log).unwrap());
        assert!(!numbered_path(&log, 1).exists());
    }

    #[test]
    fn oversized_log_moves_to_first_copy() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("daemon.log");
        fs::write(&log, b"0123456789abcdefXYZ").unwrap();

        assert!(SMALL.rotate(&log).unwrap());
        assert_eq!(fs::metadata(&log).unwrap().len(), 0);
        assert_eq!(
            fs::read(numbered_path(&log, 1)).unwrap(),
            b"0123456789abcdefXYZ"
        );
    }

    #[test]
    fn copies_shift_and_are_capped() {
        let dir = TempDir::new().unwrap();
        let log = dir.path().join("daemon-err.log");

        for round in 1..=5u8 {
            fs::write(&log, vec![b'0' + round; 32]).unwrap();
            SMALL.rotate(&log).unwrap();
        }

        assert_eq!(fs::read(numbered_path(&log, 1)).unwrap()[0], b'5');
        assert_eq!(fs::read(numbered_path(&log, 3)).unwrap()[0], b'3');
        assert!(!numbered_path(&log, 4).exists());
    }

    #[test]
    fn rotates_both_daemon_logs() {
        let home = TempDir::new().unwrap();
        let out = stdout_log_path(home.path());
        let err = stderr_log_path(home.path());
        fs::create_dir_all(out.parent().unwrap()).unwrap();
        fs::write(&out, vec![b'o'; 64]).unwrap();
        fs::write(&err, vec![b'e'; 64]).unwrap();

        rotate_daemon_logs(home.path(), SMALL);

        assert!(numbered_path(&out, 1).exists());
        assert!(numbered_path(&err, 1).exists());
    }
}
