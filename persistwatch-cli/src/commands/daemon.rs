//! `persistwatch daemon` — the background watcher and its LaunchAgent.

use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};

use persistwatch_daemon::paths::{socket_path, stderr_log_path, stdout_log_path};
use persistwatch_daemon::{
    install_launchd, request_restart, request_status, request_stop, start_blocking,
    uninstall_launchd, DaemonError,
};

use super::{home_dir, print_json};

#[derive(Subcommand, Debug)]
pub enum DaemonCommand {
    /// Run the daemon in the foreground (watch service + control socket).
    Start,
    /// Ask a running daemon to shut down.
    Stop,
    /// Print the running daemon's status as JSON.
    Status,
    /// Rebuild the watch subscription for the current permission state.
    Restart,
    /// Write and bootstrap the per-user LaunchAgent.
    Install,
    /// Boot out and delete the LaunchAgent.
    Uninstall,
    /// Show the tail of the daemon's log files.
    Logs(DaemonLogsArgs),
}

#[derive(Args, Debug)]
pub struct DaemonLogsArgs {
    /// Number of trailing lines to show per file.
    #[arg(long, default_value_t = 100)]
    pub lines: usize,

    /// Skip the stdout log.
    #[arg(long)]
    pub stderr_only: bool,
}

pub fn run(command: DaemonCommand) -> Result<()> {
    let home = home_dir()?;

    match command {
        DaemonCommand::Start => start_blocking(&home).context("daemon exited with error"),
        DaemonCommand::Stop => {
            match if_running(request_stop(&home), "failed to stop daemon")? {
                Some(()) => println!("daemon stop requested"),
                None => println!("daemon is not running"),
            }
            Ok(())
        }
        DaemonCommand::Status => {
            match if_running(request_status(&home), "failed to query daemon status")? {
                Some(status) => print_json(&status),
                None => print_json(&serde_json::json!({
                    "running": false,
                    "socket": socket_path(&home).display().to_string(),
                })),
            }
        }
        DaemonCommand::Restart => {
            match if_running(request_restart(&home), "failed to restart watcher")? {
                Some(watch) => print_json(&watch),
                None => {
                    println!("daemon is not running");
                    Ok(())
                }
            }
        }
        DaemonCommand::Install => {
            let binary = std::env::current_exe().context("cannot locate persistwatch binary")?;
            let plist = install_launchd(&home, &binary).context("failed to install launch agent")?;
            println!("installed launch agent: {}", plist.display());
            Ok(())
        }
        DaemonCommand::Uninstall => {
            uninstall_launchd(&home).context("failed to uninstall launch agent")?;
            println!("uninstalled launch agent");
            Ok(())
        }
        DaemonCommand::Logs(args) => {
            for path in log_files(&home, args.stderr_only) {
                print_tail(&path, args.lines)?;
            }
            Ok(())
        }
    }
}

/// `None` when no daemon answers the socket.
fn if_running<T>(reply: Result<T, DaemonError>, failure: &'static str) -> Result<Option<T>> {
    match reply {
        Ok(value) => Ok(Some(value)),
        Err(DaemonError::DaemonNotRunning { .. }) => Ok(None),
        Err(err) => Err(err).context(failure),
    }
}

fn log_files(home: &Path, stderr_only: bool) -> Vec<PathBuf> {
    let mut files = Vec::with_capacity(2);
    if !stderr_only {
        files.push(stdout_log_path(home));
    }
    files.push(stderr_log_path(home));
    files
}

fn print_tail(path: &Path, count: usize) -> Result<()> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            println!("log file not found: {}", path.display());
            return Ok(());
        }
        Err(err) => return Err(err).with_context(|| format!("open {}", path.display())),
    };

    let lines = BufReader::new(file)
        .lines()
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("read {}", path.display()))?;

    println!("==> {} <==", path.display());
    for line in &lines[lines.len().saturating_sub(count)..] {
        println!("{line}");
    }
    Ok(())
}
