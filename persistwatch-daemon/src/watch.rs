//! Watch service: continuous change detection over the persistence locations.
//!
//! ```text
//!            start()                         stop()
//!  Stopped ───────────▶ Running ─────────────────────▶ Stopped
//!                         │
//!   ChangeSource bursts ──┤ trailing debounce (reset per burst)
//!                         ▼
//!                 scan → diff vs baseline → persist → callback / notify
//! ```
//!
//! One tokio task per running instance owns the debounce timer and runs each
//! scan-diff-persist cycle to completion before looking at the next burst.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use persistwatch_core::{
    Config, Diff, DiffSource, LocationTable, PendingDiffPair, PermissionProbe, Snapshot,
    SnapshotId, Store,
};
use persistwatch_report::{NotificationPayload, Renderer};
use persistwatch_scan::diff;

use crate::fsevents::{ChangeBurst, ChangeSource, Subscription};
use crate::notifier::{LogNotifier, Notifier};
use crate::scan_queue::ScanQueue;

/// Label given to every snapshot the watch service captures.
pub const WATCH_SNAPSHOT_LABEL: &str = "watch";

/// Invoked with every non-empty diff the watch service detects.
pub type DiffCallback = Arc<dyn Fn(&Diff) + Send + Sync>;

/// Timing and notification knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSettings {
    /// Window the change source merges raw events over.
    pub coalescing_latency: Duration,
    /// Quiet period after the last burst before a cycle runs.
    pub debounce: Duration,
    /// No notifications this soon after the subscription started.
    pub notification_grace: Duration,
    pub notifications_enabled: bool,
}

impl Default for WatchSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

impl WatchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            coalescing_latency: config.watch.coalescing_latency(),
            debounce: config.watch.debounce(),
            notification_grace: config.watch.notification_grace(),
            notifications_enabled: config.notifications_enabled,
        }
    }
}

/// Result of one debounced scan-diff cycle.
#[derive(Debug, Clone)]
pub enum CycleOutcome {
    /// No baseline existed; the fresh snapshot became the baseline.
    BaselineCaptured(SnapshotId),
    Unchanged,
    Changed(Diff),
    /// The scan did not produce a snapshot; treated as "no change".
    ScanFailed,
}

/// Notifications need all three: enabled, consumer not in front, and the
/// grace period since the subscription started has passed.
pub fn should_notify(settings: &WatchSettings, consumer_visible: bool, elapsed: Duration) -> bool {
    settings.notifications_enabled && !consumer_visible && elapsed > settings.notification_grace
}

// ---------------------------------------------------------------------------
// Cycle
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct WatchCycle {
    queue: ScanQueue,
    store: Store,
    notifier: Arc<dyn Notifier>,
    renderer: Option<Arc<Renderer>>,
    on_diff: Option<DiffCallback>,
    settings: WatchSettings,
}

impl WatchCycle {
    async fn run(&self, started_at: Instant) -> CycleOutcome {
        let snapshot = match self.queue.capture(WATCH_SNAPSHOT_LABEL).await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                tracing::warn!(error = %err, "watch scan failed; treating as no change");
                return CycleOutcome::ScanFailed;
            }
        };

        let store = self.store.clone();
        let outcome = match tokio::task::spawn_blocking(move || compare_and_persist(&store, snapshot))
            .await
        {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::error!(error = %err, "watch diff task failed");
                return CycleOutcome::ScanFailed;
            }
        };

        if let CycleOutcome::Changed(delta) = &outcome {
            if let Some(on_diff) = &self.on_diff {
                on_diff(delta);
            }
            let visible = self.notifier.is_consumer_visible();
            if should_notify(&self.settings, visible, started_at.elapsed()) {
                self.notifier.notify(&self.notification_for(delta));
            } else {
                tracing::debug!(visible, "notification suppressed");
            }
        }
        outcome
    }

    fn notification_for(&self, delta: &Diff) -> NotificationPayload {
        if let Some(renderer) = &self.renderer {
            match renderer.notification(delta) {
                Ok(payload) => return payload,
                Err(err) => tracing::warn!(error = %err, "notification template failed"),
            }
        }
        let counts = delta.counts();
        NotificationPayload::new(format!(
            "{} added, {} removed, {} modified.",
            counts.added, counts.removed, counts.modified
        ))
    }
}

/// Diff `snapshot` against the stored baseline and persist the outcome.
///
/// Store failures are logged and never change the outcome; the in-memory
/// diff is still returned.
pub fn compare_and_persist(store: &Store, snapshot: Snapshot) -> CycleOutcome {
    let baseline = store.load_baseline().unwrap_or_else(|err| {
        tracing::warn!(error = %err, "cannot read watch baseline; capturing a new one");
        None
    });

    let Some(baseline) = baseline else {
        if let Err(err) = store.save_baseline(&snapshot) {
            tracing::error!(error = %err, "failed to store watch baseline");
        }
        return CycleOutcome::BaselineCaptured(snapshot.id);
    };

    let delta = diff(&baseline, &snapshot);
    if delta.is_empty() {
        return CycleOutcome::Unchanged;
    }

    if let Err(err) = store.save_baseline(&snapshot) {
        tracing::error!(error = %err, "failed to advance watch baseline");
    }
    if let Err(err) = store.save_record(&delta.to_record(DiffSource::Automatic)) {
        tracing::error!(error = %err, "failed to store diff record");
    }
    if let Err(err) = store.save_pending(&PendingDiffPair::new(baseline.id, snapshot.id)) {
        tracing::error!(error = %err, "failed to store pending diff");
    }
    CycleOutcome::Changed(delta)
}

// ---------------------------------------------------------------------------
// Service
// ---------------------------------------------------------------------------

struct Running {
    stop: oneshot::Sender<()>,
    task: JoinHandle<()>,
    subscription: Subscription,
    started_at: Instant,
    permission_granted: bool,
}

/// Stopped/running state machine around one change subscription.
pub struct WatchService {
    locations: LocationTable,
    permission: Arc<dyn PermissionProbe>,
    source: Arc<dyn ChangeSource>,
    cycle: WatchCycle,
    running: Option<Running>,
}

impl WatchService {
    pub fn new(
        locations: LocationTable,
        permission: Arc<dyn PermissionProbe>,
        source: Arc<dyn ChangeSource>,
        queue: ScanQueue,
        store: Store,
    ) -> Self {
        Self {
            locations,
            permission,
            source,
            cycle: WatchCycle {
                queue,
                store,
                notifier: Arc::new(LogNotifier),
                renderer: None,
                on_diff: None,
                settings: WatchSettings::default(),
            },
            running: None,
        }
    }

    pub fn with_settings(mut self, settings: WatchSettings) -> Self {
        self.cycle.settings = settings;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.cycle.notifier = notifier;
        self
    }

    pub fn with_renderer(mut self, renderer: Arc<Renderer>) -> Self {
        self.cycle.renderer = Some(renderer);
        self
    }

    pub fn on_diff(mut self, callback: DiffCallback) -> Self {
        self.cycle.on_diff = Some(callback);
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Paths the live subscription covers; empty while stopped.
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        self.running
            .as_ref()
            .map(|r| r.subscription.paths().to_vec())
            .unwrap_or_default()
    }

    /// Time since the current subscription started.
    pub fn uptime(&self) -> Option<Duration> {
        self.running.as_ref().map(|r| r.started_at.elapsed())
    }

    /// Permission state the current subscription was built with.
    pub fn permission_at_start(&self) -> Option<bool> {
        self.running.as_ref().map(|r| r.permission_granted)
    }

    /// Subscribe and start the cycle task. Returns whether the service is
    /// running afterwards; starting a running service is a no-op.
    ///
    /// With nothing to watch, or when the subscription fails, the service
    /// stays stopped. Must be called within a tokio runtime.
    pub fn start(&mut self) -> bool {
        if self.running.is_some() {
            return true;
        }

        let permission_granted = self.permission.is_granted();
        let paths = self.locations.watch_paths(permission_granted);
        if paths.is_empty() {
            tracing::warn!("no watchable locations; watch service stays stopped");
            return false;
        }

        let (burst_tx, burst_rx) = mpsc::unbounded_channel();
        let subscription =
            match self
                .source
                .subscribe(&paths, self.cycle.settings.coalescing_latency, burst_tx)
            {
                Ok(subscription) => subscription,
                Err(err) => {
                    tracing::warn!(error = %err, "change subscription failed; watch service stays stopped");
                    return false;
                }
            };

        let started_at = Instant::now();
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(watch_loop(
            Arc::new(self.cycle.clone()),
            burst_rx,
            stop_rx,
            started_at,
        ));
        tracing::info!(
            paths = subscription.paths().len(),
            permission_granted,
            "watch service started"
        );

        self.running = Some(Running {
            stop: stop_tx,
            task,
            subscription,
            started_at,
            permission_granted,
        });
        true
    }

    /// Stop watching. A cycle already in progress completes first; a pending
    /// debounce is dropped. Stopping a stopped service is a no-op.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        let _ = running.stop.send(());
        if let Err(err) = running.task.await {
            tracing::error!(error = %err, "watch task ended abnormally");
        }
        drop(running.subscription);
        tracing::info!("watch service stopped");
    }

    /// Rebuild the subscription so it reflects the permission state now.
    pub async fn restart_with_current_permission_state(&mut self) -> bool {
        self.stop().await;
        self.start()
    }
}

async fn watch_loop(
    cycle: Arc<WatchCycle>,
    mut bursts: mpsc::UnboundedReceiver<ChangeBurst>,
    mut stop: oneshot::Receiver<()>,
    started_at: Instant,
) {
    let debounce = cycle.settings.debounce;
    let mut fire_at: Option<Instant> = None;
    let mut source_open = true;

    loop {
        let wake = fire_at.unwrap_or_else(Instant::now);
        tokio::select! {
            _ = &mut stop => break,
            burst = bursts.recv(), if source_open => match burst {
                Some(burst) => {
                    tracing::debug!(paths = burst.paths.len(), "change burst");
                    fire_at = Some(Instant::now() + debounce);
                }
                None => {
                    tracing::warn!("change source closed");
                    source_open = false;
                }
            },
            _ = sleep_until(wake), if fire_at.is_some() => {
                fire_at = None;
                match cycle.run(started_at).await {
                    CycleOutcome::BaselineCaptured(id) => {
                        tracing::info!(snapshot = %id, "watch baseline captured")
                    }
                    CycleOutcome::Unchanged => tracing::debug!("no persistence changes"),
                    CycleOutcome::Changed(delta) => {
                        let counts = delta.counts();
                        tracing::info!(
                            added = counts.added,
                            removed = counts.removed,
                            modified = counts.modified,
                            "persistence changes detected"
                        );
                    }
                    CycleOutcome::ScanFailed => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use persistwatch_core::{Item, Location};
    use tempfile::TempDir;

    fn snapshot(paths: &[(&str, &str)]) -> Snapshot {
        Snapshot::capture(
            "t",
            paths
                .iter()
                .map(|(p, d)| Item::new(*p, Location::UserLaunchAgents, *d))
                .collect(),
        )
    }

    #[test]
    fn first_cycle_only_captures_baseline() {
        let tmp = TempDir::new().unwrap();
        let store = Store::at(tmp.path());
        let first = snapshot(&[("/a.plist", "1")]);

        let outcome = compare_and_persist(&store, first.clone());
        assert!(matches!(outcome, CycleOutcome::BaselineCaptured(id) if id == first.id));
        assert_eq!(store.load_baseline().unwrap().unwrap().id, first.id);
        assert!(store.list_records().unwrap().is_empty());
        assert!(store.load_pending().unwrap().is_none());
    }

    #[test]
    fn unchanged_snapshot_is_discarded() {
        let tmp = TempDir::new().unwrap();
        let store = Store::at(tmp.path());
        let first = snapshot(&[("/a.plist", "1")]);
        store.save_baseline(&first).unwrap();

        let again = snapshot(&[("/a.plist", "1")]);
        assert!(matches!(
            compare_and_persist(&store, again.clone()),
            CycleOutcome::Unchanged
        ));
        assert_eq!(store.load_baseline().unwrap().unwrap().id, first.id);
        assert!(store.load_snapshot(again.id).is_err());
    }

    #[test]
    fn change_advances_baseline_and_records_pending_pair() {
        let tmp = TempDir::new().unwrap();
        let store = Store::at(tmp.path());
        let first = snapshot(&[("/a.plist", "1")]);
        store.save_baseline(&first).unwrap();

        let second = snapshot(&[("/a.plist", "2"), ("/b.plist", "1")]);
        let CycleOutcome::Changed(delta) = compare_and_persist(&store, second.clone()) else {
            panic!("expected a change");
        };
        assert_eq!(delta.added.len(), 1);
        assert_eq!(delta.modified.len(), 1);

        assert_eq!(store.load_baseline().unwrap().unwrap().id, second.id);
        let records = store.list_records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source, DiffSource::Automatic);
        let pending = store.load_pending().unwrap().unwrap();
        assert_eq!((pending.before_id, pending.after_id), (first.id, second.id));
    }

    #[test]
    fn notification_gate() {
        let settings = WatchSettings::default();
        let past_grace = Duration::from_secs(61);
        assert!(should_notify(&settings, false, past_grace));
        assert!(!should_notify(&settings, false, Duration::from_secs(60)));
        assert!(!should_notify(&settings, true, past_grace));

        let muted = WatchSettings {
            notifications_enabled: false,
            ..WatchSettings::default()
        };
        assert!(!should_notify(&muted, false, past_grace));
    }

    #[test]
    fn settings_follow_config() {
        let mut config = Config::default();
        config.watch.debounce_ms = 200;
        config.notifications_enabled = false;
        let settings = WatchSettings::from_config(&config);
        assert_eq!(settings.debounce, Duration::from_millis(200));
        assert_eq!(settings.coalescing_latency, Duration::from_millis(2_500));
        assert!(!settings.notifications_enabled);
    }
}
