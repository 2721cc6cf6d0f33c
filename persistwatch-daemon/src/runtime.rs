use std::fs;
use std::io::ErrorKind;
use std::os::unix::net::UnixStream as StdUnixStream;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, Mutex};

use persistwatch_core::{config, Diff, PermissionProbe, SnapshotSummary, Store, SystemCommandRunner};
use persistwatch_report::Renderer;
use persistwatch_scan::{record_manual_scan, Pipeline};

use crate::error::{io_err, DaemonError};
use crate::fsevents::NotifyChangeSource;
use crate::log_rotation::{rotate_daemon_logs, RotationPolicy};
use crate::notifier::platform_notifier;
use crate::paths::{logs_dir, run_dir, socket_path, DAEMON_LABEL};
use crate::protocol::{DaemonRequest, DaemonResponse};
use crate::scan_queue::ScanQueue;
use crate::watch::{WatchService, WatchSettings};

/// Label for snapshots requested over the socket without one.
pub const MANUAL_SNAPSHOT_LABEL: &str = "manual";

const LOG_ROTATION_INTERVAL: Duration = Duration::from_secs(5);

/// State shared by every daemon task.
struct DaemonState {
    home: PathBuf,
    store: Store,
    queue: ScanQueue,
    watch: Arc<Mutex<WatchService>>,
    permission: Arc<dyn PermissionProbe>,
    started_at_unix: u64,
    last_change_at_unix: Arc<AtomicU64>,
}

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), DaemonError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon: scan queue, watch service, permission monitor, log
/// rotation and the control socket, until `stop` or ctrl-c.
pub async fn run(home: PathBuf) -> Result<(), DaemonError> {
    ensure_runtime_dirs(&home)?;

    let config = config::load_at(&home)?;
    let store = Store::at(&home);
    let pipeline = Arc::new(Pipeline::standard(&home, &config));
    let permission = pipeline.scanner().permission().clone();
    let renderer = Arc::new(Renderer::for_data_root(store.root())?);

    let (shutdown_tx, _) = broadcast::channel::<()>(16);
    let (queue, scan_worker) = ScanQueue::spawn(pipeline, shutdown_tx.subscribe());

    let last_change_at_unix = Arc::new(AtomicU64::new(0));
    let on_diff = {
        let last_change = last_change_at_unix.clone();
        Arc::new(move |delta: &Diff| {
            last_change.store(unix_seconds_now(), Ordering::Relaxed);
            tracing::debug!(total = delta.total_changes(), "diff recorded");
        })
    };
    let watch = WatchService::new(
        config.location_table(&home),
        permission.clone(),
        Arc::new(NotifyChangeSource),
        queue.clone(),
        store.clone(),
    )
    .with_settings(WatchSettings::from_config(&config))
    .with_notifier(platform_notifier(Arc::new(SystemCommandRunner)))
    .with_renderer(renderer)
    .on_diff(on_diff);

    let state = Arc::new(DaemonState {
        home: home.clone(),
        store,
        queue,
        watch: Arc::new(Mutex::new(watch)),
        permission,
        started_at_unix: unix_seconds_now(),
        last_change_at_unix,
    });

    let watch_handle = {
        let shutdown = shutdown_tx.clone();
        let watch = state.watch.clone();
        tokio::spawn(async move {
            let result = watch_task(watch, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let permission_handle = {
        let shutdown = shutdown_tx.clone();
        let state = state.clone();
        let poll = config.watch.permission_poll();
        tokio::spawn(async move {
            let result = permission_monitor_task(state, poll, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let state = state.clone();
        tokio::spawn(async move {
            let result = socket_server_task(state, shutdown.clone(), shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let rotation_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        tokio::spawn(async move {
            let result = log_rotation_task(home, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(DaemonError::Protocol(format!("ctrl-c handler failed: {err}"))),
                    }
                }
            }
        })
    };

    let (watch_result, permission_result, socket_result, rotation_result, signal_result, scan_result) =
        tokio::join!(
            watch_handle,
            permission_handle,
            socket_handle,
            rotation_handle,
            signal_handle,
            scan_worker
        );

    handle_join("watch", watch_result)?;
    handle_join("permission_monitor", permission_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("log_rotation", rotation_result)?;
    handle_join("signal_handler", signal_result)?;
    handle_join("scan_worker", scan_result.map(Ok))?;
    tracing::info!("daemon stopped");
    Ok(())
}

async fn watch_task(
    watch: Arc<Mutex<WatchService>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    if !watch.lock().await.start() {
        tracing::warn!("daemon running without a watch subscription");
    }
    let _ = shutdown_rx.recv().await;
    watch.lock().await.stop().await;
    Ok(())
}

/// Restart the watch service whenever the elevated permission flips, so
/// privileged locations join or leave the subscription.
async fn permission_monitor_task(
    state: Arc<DaemonState>,
    poll: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(poll);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await;

    let mut last_granted = state.permission.is_granted();
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let granted = state.permission.is_granted();
                if granted == last_granted {
                    continue;
                }
                tracing::info!(granted, "elevated permission changed; restarting watch service");
                last_granted = granted;
                state.watch.lock().await.restart_with_current_permission_state().await;
            }
        }
    }
    Ok(())
}

async fn socket_server_task(
    state: Arc<DaemonState>,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let socket = socket_path(&state.home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "control socket listening");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let state = state.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_socket_client(stream, state, shutdown_tx).await {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    state: Arc<DaemonState>,
    shutdown_tx: broadcast::Sender<()>,
) -> Result<(), DaemonError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: DaemonRequest = match serde_json::from_str(&line) {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &DaemonResponse::error(format!("invalid request: {err}")),
                )
                .await?;
                continue;
            }
        };

        let stopping = request == DaemonRequest::Stop;
        let response = dispatch(&state, &shutdown_tx, request).await;
        write_response(&mut writer, &response).await?;
        if stopping {
            break;
        }
    }

    Ok(())
}

async fn dispatch(
    state: &DaemonState,
    shutdown_tx: &broadcast::Sender<()>,
    request: DaemonRequest,
) -> DaemonResponse {
    match request {
        DaemonRequest::Status => DaemonResponse::ok(build_status_payload(state).await),
        DaemonRequest::Scan { label } => match manual_scan(state, label).await {
            Ok(payload) => DaemonResponse::ok(payload),
            Err(err) => DaemonResponse::error(err.to_string()),
        },
        DaemonRequest::Restart => {
            let mut watch = state.watch.lock().await;
            let watching = watch.restart_with_current_permission_state().await;
            DaemonResponse::ok(json!({
                "watching": watching,
                "paths": watch.watched_paths(),
            }))
        }
        DaemonRequest::Stop => {
            let _ = shutdown_tx.send(());
            DaemonResponse::ok(json!({ "stopping": true }))
        }
    }
}

/// Capture through the scan queue, store the snapshot and diff it against
/// the previous one.
async fn manual_scan(state: &DaemonState, label: Option<String>) -> Result<Value, DaemonError> {
    let label = label.unwrap_or_else(|| MANUAL_SNAPSHOT_LABEL.to_string());
    let snapshot = state.queue.capture(label).await?;
    let summary = SnapshotSummary::from(&snapshot);

    let store = state.store.clone();
    let delta = tokio::task::spawn_blocking(move || record_manual_scan(&store, &snapshot))
        .await
        .map_err(|err| DaemonError::Protocol(format!("scan record join error: {err}")))??;

    Ok(json!({
        "snapshot": summary,
        "changes": delta.map(|d| d.counts()),
    }))
}

async fn build_status_payload(state: &DaemonState) -> Value {
    let (watching, paths, uptime_secs) = {
        let watch = state.watch.lock().await;
        (
            watch.is_running(),
            watch.watched_paths(),
            watch.uptime().map(|d| d.as_secs()),
        )
    };

    let pending = state.store.load_pending().unwrap_or_else(|err| {
        tracing::warn!(error = %err, "cannot read pending diff");
        None
    });

    json!({
        "running": true,
        "label": DAEMON_LABEL,
        "pid": std::process::id(),
        "started_at_unix": state.started_at_unix,
        "last_change_at_unix": state.last_change_at_unix.load(Ordering::Relaxed),
        "permission_granted": state.permission.is_granted(),
        "watch": {
            "running": watching,
            "paths": paths,
            "uptime_secs": uptime_secs,
        },
        "pending": pending,
        "socket": socket_path(&state.home).display().to_string(),
        "data_root": state.store.root().display().to_string(),
    })
}

async fn log_rotation_task(
    home: PathBuf,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), DaemonError> {
    let mut interval = tokio::time::interval(LOG_ROTATION_INTERVAL);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let home = home.clone();
                let _ = tokio::task::spawn_blocking(move || {
                    rotate_daemon_logs(&home, RotationPolicy::default());
                })
                .await;
            }
        }
    }
    Ok(())
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), DaemonError> {
    if !socket.exists() {
        return Ok(());
    }

    match StdUnixStream::connect(socket) {
        Ok(_) => {
            return Err(DaemonError::Protocol(format!(
                "daemon socket already in use: {}",
                socket.display()
            )));
        }
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
        }
    }

    match fs::remove_file(socket) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(socket, err)),
    }
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), DaemonError> {
    for dir in [run_dir(home), logs_dir(home)] {
        fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
    }
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &DaemonResponse,
) -> Result<(), DaemonError> {
    let mut payload = serde_json::to_vec(response)?;
    payload.push(b'\n');
    writer
        .write_all(&payload)
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

fn handle_join(
    task: &str,
    result: Result<Result<(), DaemonError>, tokio::task::JoinError>,
) -> Result<(), DaemonError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(DaemonError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// `RUST_LOG` filter (default `info`); `PERSISTWATCH_LOG_FORMAT=json` switches
/// to JSON lines.
fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("PERSISTWATCH_LOG_FORMAT").is_ok_and(|v| v == "json");
    let _ = if json {
        fmt().with_env_filter(filter).json().try_init()
    } else {
        fmt().with_env_filter(filter).with_target(false).try_init()
    };
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), DaemonError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), DaemonError> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use persistwatch_core::privilege::FixedPermission;
    use persistwatch_core::{Item, Location, LocationSpec, LocationTable, Snapshot};
    use persistwatch_scan::{ScanError, SnapshotProvider};
    use tempfile::TempDir;

    use crate::fsevents::{BurstSender, ChangeSource, Subscription};

    struct DetachedSource;

    impl ChangeSource for DetachedSource {
        fn subscribe(
            &self,
            paths: &[PathBuf],
            _latency: Duration,
            _sink: BurstSender,
        ) -> Result<Subscription, DaemonError> {
            Ok(Subscription::detached(paths.to_vec()))
        }
    }

    /// Each capture returns the next item list; the last one repeats.
    struct Sequence(StdMutex<Vec<Vec<Item>>>);

    impl SnapshotProvider for Sequence {
        fn capture(&self, label: &str) -> Result<Snapshot, ScanError> {
            let mut lists = self.0.lock().unwrap();
            let items = if lists.len() > 1 {
                lists.remove(0)
            } else {
                lists.first().cloned().unwrap_or_default()
            };
            Ok(Snapshot::capture(label, items))
        }
    }

    struct Harness {
        home: TempDir,
        state: Arc<DaemonState>,
        shutdown_tx: broadcast::Sender<()>,
    }

    fn harness(items: Vec<Vec<Item>>) -> Harness {
        let home = TempDir::new().unwrap();
        let (shutdown_tx, _) = broadcast::channel(4);
        let (queue, _worker) =
            ScanQueue::spawn(Arc::new(Sequence(StdMutex::new(items))), shutdown_tx.subscribe());
        let store = Store::at(home.path());
        let permission: Arc<dyn PermissionProbe> = Arc::new(FixedPermission::new(false));
        let locations = LocationTable::new(vec![LocationSpec::new(
            Location::UserLaunchAgents,
            home.path().join("LaunchAgents"),
        )]);
        let watch = WatchService::new(
            locations,
            permission.clone(),
            Arc::new(DetachedSource),
            queue.clone(),
            store.clone(),
        );
        let state = Arc::new(DaemonState {
            home: home.path().to_path_buf(),
            store,
            queue,
            watch: Arc::new(Mutex::new(watch)),
            permission,
            started_at_unix: 1_000_000,
            last_change_at_unix: Arc::new(AtomicU64::new(0)),
        });
        Harness {
            home,
            state,
            shutdown_tx,
        }
    }

    fn agent(name: &str, digest: &str) -> Item {
        Item::new(format!("/LaunchAgents/{name}"), Location::UserLaunchAgents, digest)
    }

    #[tokio::test]
    async fn status_before_any_change() {
        let h = harness(vec![]);
        let payload = build_status_payload(&h.state).await;

        assert_eq!(payload["running"], json!(true));
        assert_eq!(payload["started_at_unix"], json!(1_000_000u64));
        assert_eq!(payload["last_change_at_unix"], json!(0u64));
        assert_eq!(payload["permission_granted"], json!(false));
        assert_eq!(payload["watch"]["running"], json!(false));
        assert_eq!(payload["pending"], Value::Null);
    }

    #[tokio::test]
    async fn scan_command_stores_snapshot_and_reports_changes() {
        let h = harness(vec![vec![agent("a.plist", "1")], vec![
            agent("a.plist", "1"),
            agent("b.plist", "1"),
        ]]);

        let first = dispatch(&h.state, &h.shutdown_tx, DaemonRequest::Scan { label: None })
            .await
            .into_data()
            .unwrap();
        assert_eq!(first["snapshot"]["label"], json!(MANUAL_SNAPSHOT_LABEL));
        assert_eq!(first["changes"], Value::Null);

        let request = DaemonRequest::Scan {
            label: Some("after-install".into()),
        };
        let second = dispatch(&h.state, &h.shutdown_tx, request)
            .await
            .into_data()
            .unwrap();
        assert_eq!(second["snapshot"]["label"], json!("after-install"));
        assert_eq!(second["changes"]["added"], json!(1));

        assert_eq!(h.state.store.list_snapshots().unwrap().len(), 2);
        assert_eq!(h.state.store.list_records().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn restart_command_starts_watching() {
        let h = harness(vec![]);
        let data = dispatch(&h.state, &h.shutdown_tx, DaemonRequest::Restart)
            .await
            .into_data()
            .unwrap();
        assert_eq!(data["watching"], json!(true));
        assert_eq!(
            data["paths"],
            json!([h.home.path().join("LaunchAgents").display().to_string()])
        );
        h.state.watch.lock().await.stop().await;
    }

    #[tokio::test]
    async fn stop_command_signals_shutdown() {
        let h = harness(vec![]);
        let mut shutdown_rx = h.shutdown_tx.subscribe();

        let stop = dispatch(&h.state, &h.shutdown_tx, DaemonRequest::Stop).await;
        assert!(stop.ok);
        shutdown_rx.recv().await.expect("shutdown signal");
    }

    #[tokio::test]
    async fn socket_client_answers_each_line_and_rejects_bad_requests() {
        let h = harness(vec![]);
        let (server, client) = UnixStream::pair().unwrap();
        let server_task = tokio::spawn(handle_socket_client(
            server,
            h.state.clone(),
            h.shutdown_tx.clone(),
        ));

        let (reader, mut writer) = client.into_split();
        let mut lines = BufReader::new(reader).lines();

        writer.write_all(b"not json\n").await.unwrap();
        let bad: DaemonResponse =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert!(!bad.ok);
        assert!(bad.error.unwrap().starts_with("invalid request"));

        writer.write_all(b"{\"cmd\":\"sync\"}\n").await.unwrap();
        let unknown: DaemonResponse =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert!(!unknown.ok);
        assert!(unknown.error.unwrap().contains("unknown variant `sync`"));

        writer.write_all(b"{\"cmd\":\"status\"}\n").await.unwrap();
        let status: DaemonResponse =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert!(status.ok);

        writer.write_all(b"{\"cmd\":\"stop\"}\n").await.unwrap();
        let stop: DaemonResponse =
            serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
        assert!(stop.ok);

        tokio_test::assert_ok!(server_task.await.unwrap());
    }

    #[test]
    fn stale_socket_is_removed_before_bind() {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("daemon.sock");
        fs::write(&socket, b"").unwrap();
        prepare_socket_for_bind(&socket).unwrap();
        assert!(!socket.exists());
    }
}
