//! Bounded external-process execution.
//!
//! Every OS utility the scanners shell out to (`profiles`, `codesign`) runs
//! under a hard deadline. On timeout the child is killed and the call yields
//! no data instead of blocking the scan.

use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

/// Deadline applied to external enumeration utilities.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Runs an external program and returns its stdout.
///
/// `None` means "no data": the program could not be spawned, exited non-zero,
/// or exceeded `timeout`.
pub trait CommandRunner: Send + Sync {
    fn run(&self, program: &Path, args: &[&str], timeout: Duration) -> Option<Vec<u8>>;
}

/// [`CommandRunner`] backed by `std::process`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCommandRunner;

impl CommandRunner for SystemCommandRunner {
    fn run(&self, program: &Path, args: &[&str], timeout: Duration) -> Option<Vec<u8>> {
        let mut child = match Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(err) => {
                tracing::debug!("failed to spawn {}: {err}", program.display());
                return None;
            }
        };

        // Drain pipes on helper threads so a chatty child cannot fill the pipe
        // buffer and stall before exiting.
        let stdout_reader = child.stdout.take().map(|mut out| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = out.read_to_end(&mut buf);
                buf
            })
        });
        let stderr_reader = child.stderr.take().map(|mut err| {
            thread::spawn(move || {
                let mut buf = Vec::new();
                let _ = err.read_to_end(&mut buf);
                buf
            })
        });

        let started = Instant::now();
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if started.elapsed() > timeout {
                        let _ = child.kill();
                        let _ = child.wait();
                        tracing::warn!(
                            "{} timed out after {}s; killed",
                            program.display(),
                            timeout.as_secs()
                        );
                        return None;
                    }
                    thread::sleep(POLL_INTERVAL);
                }
                Err(err) => {
                    tracing::warn!("failed to wait for {}: {err}", program.display());
                    let _ = child.kill();
                    return None;
                }
            }
        };

        let stdout = stdout_reader
            .and_then(|h| h.join().ok())
            .unwrap_or_default();
        let stderr = stderr_reader
            .and_then(|h| h.join().ok())
            .unwrap_or_default();

        if !status.success() {
            tracing::debug!(
                "{} exited with {}: {}",
                program.display(),
                status,
                String::from_utf8_lossy(&stderr).trim()
            );
            return None;
        }
        Some(stdout)
    }
}
