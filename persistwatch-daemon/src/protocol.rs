//! Newline-delimited JSON control protocol spoken over the daemon socket.
//!
//! One request per line, one response per line:
//!
//! ```text
//! {"cmd":"status"}                   -> {"ok":true,"data":{...}}
//! {"cmd":"scan","label":"nightly"}   -> {"ok":true,"data":{"snapshot":{...},"changes":...}}
//! {"cmd":"restart"}                  -> {"ok":true,"data":{"watching":true,"paths":[...]}}
//! {"cmd":"stop"}                     -> {"ok":true,"data":{"stopping":true}}
//! ```

use std::io::{BufRead, BufReader, ErrorKind, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{io_err, DaemonError};
use crate::paths::socket_path;

/// One control command. Serialized with its name under `cmd`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum DaemonRequest {
    Status,
    /// Capture a snapshot now, optionally labelled.
    Scan {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        label: Option<String>,
    },
    /// Resubscribe the watcher with the current permission state.
    Restart,
    Stop,
}

/// Reply to one request: `data` on success, `error` otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }

    pub fn into_data(self) -> Result<Value, DaemonError> {
        if self.ok {
            Ok(self.data.unwrap_or(Value::Null))
        } else {
            Err(DaemonError::Protocol(
                self.error
                    .unwrap_or_else(|| "unknown daemon error".to_string()),
            ))
        }
    }
}

/// One request/response exchange over the daemon socket.
pub fn send_request(home: &Path, request: &DaemonRequest) -> Result<DaemonResponse, DaemonError> {
    let socket = socket_path(home);
    let stream = match UnixStream::connect(&socket) {
        Ok(stream) => stream,
        Err(err) if daemon_absent(&err) => return Err(DaemonError::DaemonNotRunning { socket }),
        Err(err) => return Err(io_err(&socket, err)),
    };

    let mut line = serde_json::to_vec(request)?;
    line.push(b'\n');
    (&stream)
        .write_all(&line)
        .map_err(|e| io_err(&socket, e))?;

    let mut reply = String::new();
    if BufReader::new(&stream)
        .read_line(&mut reply)
        .map_err(|e| io_err(&socket, e))?
        == 0
    {
        return Err(DaemonError::Protocol(
            "daemon hung up without replying".to_string(),
        ));
    }
    Ok(serde_json::from_str(reply.trim_end())?)
}

/// A missing socket file or a socket nobody listens on.
fn daemon_absent(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        ErrorKind::NotFound | ErrorKind::ConnectionRefused | ErrorKind::ConnectionReset
    )
}

/// Daemon status, retrying briefly while a just-started daemon binds its
/// socket.
pub fn request_status(home: &Path) -> Result<Value, DaemonError> {
    let mut attempts_left = 5;
    loop {
        match send_request(home, &DaemonRequest::Status) {
            Ok(response) => return response.into_data(),
            Err(err @ DaemonError::DaemonNotRunning { .. }) => {
                attempts_left -= 1;
                if attempts_left == 0 {
                    return Err(err);
                }
                sleep(Duration::from_millis(100));
            }
            Err(err) => return Err(err),
        }
    }
}

pub fn request_stop(home: &Path) -> Result<(), DaemonError> {
    send_request(home, &DaemonRequest::Stop)?
        .into_data()
        .map(|_| ())
}

/// Ask the daemon to capture a snapshot through its scan queue.
pub fn request_scan(home: &Path, label: Option<String>) -> Result<Value, DaemonError> {
    send_request(home, &DaemonRequest::Scan { label })?.into_data()
}

/// Restart the watch service against the current permission state.
pub fn request_restart(home: &Path) -> Result<Value, DaemonError> {
    send_request(home, &DaemonRequest::Restart)?.into_data()
}
