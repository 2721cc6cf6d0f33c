//! Per-user LaunchAgent that keeps the daemon running across logins.

use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::process::Command;

use plist::{Dictionary, Value};

use crate::error::{io_err, DaemonError};
use crate::paths::{
    launch_agents_dir, launchd_plist_path, logs_dir, run_dir, socket_path, stderr_log_path,
    stdout_log_path, DAEMON_LABEL,
};

/// XML property list for an agent running `<binary> daemon start` in the
/// background, restarted whenever it exits.
pub fn generate_plist(binary_path: &Path, home: &Path) -> Result<Vec<u8>, DaemonError> {
    let path_value = |p: &Path| Value::String(p.display().to_string());

    let mut agent = Dictionary::new();
    agent.insert("Label".into(), Value::String(DAEMON_LABEL.into()));
    agent.insert(
        "ProgramArguments".into(),
        Value::Array(vec![
            path_value(binary_path),
            Value::String("daemon".into()),
            Value::String("start".into()),
        ]),
    );
    agent.insert("RunAtLoad".into(), Value::Boolean(true));
    agent.insert("KeepAlive".into(), Value::Boolean(true));
    agent.insert("ProcessType".into(), Value::String("Background".into()));
    agent.insert("StandardOutPath".into(), path_value(&stdout_log_path(home)));
    agent.insert("StandardErrorPath".into(), path_value(&stderr_log_path(home)));

    let mut xml = Vec::new();
    Value::Dictionary(agent).to_writer_xml(&mut xml)?;
    Ok(xml)
}

/// Write the LaunchAgent for `binary_path` and bootstrap it into the user's
/// GUI domain, replacing any loaded instance.
pub fn install(home: &Path, binary_path: &Path) -> Result<PathBuf, DaemonError> {
    ensure_macos()?;

    for dir in [launch_agents_dir(home), logs_dir(home), run_dir(home)] {
        fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
    }

    let plist = launchd_plist_path(home);
    fs::write(&plist, generate_plist(binary_path, home)?).map_err(|e| io_err(&plist, e))?;

    let domain = gui_domain(home)?;
    let target = service_target(&domain);
    launchctl(&["bootout", &target]).ok();
    launchctl(&["bootstrap", &domain, &plist.display().to_string()])?;
    launchctl(&["kickstart", "-k", &target])?;

    tracing::info!(plist = %plist.display(), domain = %domain, "launch agent installed");
    Ok(plist)
}

/// Boot the agent out, then remove its plist and any leftover socket.
pub fn uninstall(home: &Path) -> Result<(), DaemonError> {
    ensure_macos()?;

    let plist = launchd_plist_path(home);
    if plist.exists() {
        let target = service_target(&gui_domain(home)?);
        if let Err(err) = launchctl(&["bootout", &target]) {
            tracing::debug!(error = %err, "bootout failed; agent was not loaded");
        }
        fs::remove_file(&plist).map_err(|e| io_err(&plist, e))?;
    }

    let socket = socket_path(home);
    match fs::remove_file(&socket) {
        Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(io_err(&socket, err)),
        _ => Ok(()),
    }
}

fn ensure_macos() -> Result<(), DaemonError> {
    if cfg!(target_os = "macos") {
        Ok(())
    } else {
        Err(DaemonError::Launchd(
            "LaunchAgents exist only on macOS".to_string(),
        ))
    }
}

fn service_target(domain: &str) -> String {
    format!("{domain}/{DAEMON_LABEL}")
}

/// `gui/<uid>` for the owner of `home`.
fn gui_domain(home: &Path) -> Result<String, DaemonError> {
    let uid = fs::metadata(home).map_err(|e| io_err(home, e))?.uid();
    Ok(format!("gui/{uid}"))
}

fn launchctl(args: &[&str]) -> Result<(), DaemonError> {
    let output = Command::new("/bin/launchctl")
        .args(args)
        .output()
        .map_err(|e| io_err("/bin/launchctl", e))?;
    if output.status.success() {
        return Ok(());
    }

    let verb = args.first().copied().unwrap_or("launchctl");
    let detail = String::from_utf8_lossy(&output.stderr);
    Err(DaemonError::Launchd(format!(
        "`launchctl {verb}` exited with {}: {}",
        output.status,
        detail.trim()
    )))
}
