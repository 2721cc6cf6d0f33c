//! Change-notification bridge between the OS and the watch service.
//!
//! [`ChangeSource`] is the seam: the watch service hands it a set of paths
//! and a channel, and receives coalesced [`ChangeBurst`]s on that channel
//! until the returned [`Subscription`] is dropped. [`NotifyChangeSource`] is
//! the platform adapter, built on `notify`'s recommended watcher (FSEvents on
//! macOS).

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::{recommended_watcher, Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};

use crate::error::DaemonError;

/// Paths reported changed within one coalescing window, sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeBurst {
    pub paths: Vec<PathBuf>,
}

/// Receiving end handed to a [`ChangeSource`].
pub type BurstSender = mpsc::UnboundedSender<ChangeBurst>;

/// A source of coalesced file-system change notifications.
pub trait ChangeSource: Send + Sync {
    /// Watch `paths`, delivering at most one burst per `latency` window to
    /// `sink`. Delivery stops when the returned subscription is dropped.
    fn subscribe(
        &self,
        paths: &[PathBuf],
        latency: Duration,
        sink: BurstSender,
    ) -> Result<Subscription, DaemonError>;
}

/// A live subscription. Owns the OS watcher and the forwarding task.
pub struct Subscription {
    paths: Vec<PathBuf>,
    _watcher: Option<Box<dyn Send>>,
    forwarder: Option<JoinHandle<()>>,
}

impl Subscription {
    pub fn new(
        paths: Vec<PathBuf>,
        watcher: Option<Box<dyn Send>>,
        forwarder: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            paths,
            _watcher: watcher,
            forwarder,
        }
    }

    /// A subscription with nothing behind it, for sources that deliver
    /// bursts by other means.
    pub fn detached(paths: Vec<PathBuf>) -> Self {
        Self::new(paths, None, None)
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(forwarder) = self.forwarder.take() {
            forwarder.abort();
        }
    }
}

// ---------------------------------------------------------------------------
// notify adapter
// ---------------------------------------------------------------------------

/// [`ChangeSource`] backed by `notify::RecommendedWatcher`.
///
/// Must be subscribed from within a tokio runtime.
#[derive(Debug, Clone, Copy, Default)]
pub struct NotifyChangeSource;

impl ChangeSource for NotifyChangeSource {
    fn subscribe(
        &self,
        paths: &[PathBuf],
        latency: Duration,
        sink: BurstSender,
    ) -> Result<Subscription, DaemonError> {
        let (raw_tx, raw_rx) = mpsc::unbounded_channel::<Vec<PathBuf>>();
        let mut watcher = recommended_watcher(move |event: notify::Result<Event>| match event {
            Ok(event) if is_relevant_event_kind(&event.kind) => {
                let _ = raw_tx.send(event.paths);
            }
            Ok(_) => {}
            Err(err) => tracing::warn!(error = %err, "watcher event error"),
        })?;

        let mut watched = Vec::new();
        let mut recursive = Vec::new();
        let mut waiting = Vec::new();
        for path in paths {
            let (target, mode) = watch_target(path);
            match watcher.watch(&target, mode) {
                Ok(()) => {
                    tracing::debug!(path = %target.display(), ?mode, "watching location");
                    match mode {
                        RecursiveMode::Recursive => recursive.push(target.clone()),
                        RecursiveMode::NonRecursive => waiting.push(MissingRoot {
                            root: path.clone(),
                            target: target.clone(),
                        }),
                    }
                    watched.push(target);
                }
                Err(err) => {
                    tracing::warn!(path = %target.display(), error = %err, "cannot watch location")
                }
            }
        }
        if watched.is_empty() {
            return Err(DaemonError::Protocol(
                "none of the requested paths could be watched".to_string(),
            ));
        }

        let roots = Arc::new(Mutex::new(RootTracker::new(watcher, waiting, recursive)));
        let forwarder = tokio::spawn(forward(raw_rx, sink, latency, Arc::clone(&roots)));
        Ok(Subscription::new(watched, Some(Box::new(roots)), Some(forwarder)))
    }
}

/// A requested location that did not exist at subscribe time, and the
/// ancestor currently watched in its place.
#[derive(Debug, Clone, PartialEq, Eq)]
struct MissingRoot {
    root: PathBuf,
    target: PathBuf,
}

/// Owns the OS watcher and moves the watch for each missing location down
/// its path as directories appear, ending with a recursive watch on the
/// location itself.
struct RootTracker<W> {
    watcher: W,
    waiting: Vec<MissingRoot>,
    /// Recursive watches that must never be dropped.
    recursive: Vec<PathBuf>,
}

impl<W: Watcher> RootTracker<W> {
    fn new(watcher: W, waiting: Vec<MissingRoot>, recursive: Vec<PathBuf>) -> Self {
        Self {
            watcher,
            waiting,
            recursive,
        }
    }

    fn is_settled(&self) -> bool {
        self.waiting.is_empty()
    }

    /// Re-resolve every waiting location. Returns the locations that now
    /// have their own recursive watch.
    fn refresh(&mut self) -> Vec<PathBuf> {
        let mut arrived = Vec::new();
        let mut retired = Vec::new();
        let mut still_waiting = Vec::with_capacity(self.waiting.len());

        for missing in std::mem::take(&mut self.waiting) {
            let (target, mode) = watch_target(&missing.root);
            if target == missing.target {
                still_waiting.push(missing);
                continue;
            }
            if let Err(err) = self.watcher.watch(&target, mode) {
                tracing::warn!(path = %target.display(), error = %err, "cannot follow new location");
                still_waiting.push(missing);
                continue;
            }
            retired.push(missing.target);
            if mode == RecursiveMode::Recursive {
                tracing::info!(path = %target.display(), "location created; watching it");
                self.recursive.push(target);
                arrived.push(missing.root);
            } else {
                still_waiting.push(MissingRoot {
                    root: missing.root,
                    target,
                });
            }
        }

        for old in retired {
            let in_use =
                self.recursive.contains(&old) || still_waiting.iter().any(|w| w.target == old);
            if !in_use {
                if let Err(err) = self.watcher.unwatch(&old) {
                    tracing::debug!(path = %old.display(), error = %err, "unwatch failed");
                }
            }
        }
        self.waiting = still_waiting;
        arrived
    }
}

/// Re-resolve missing locations on every raw batch, then coalesce.
async fn forward<W: Watcher + Send + 'static>(
    mut raw: mpsc::UnboundedReceiver<Vec<PathBuf>>,
    sink: BurstSender,
    latency: Duration,
    roots: Arc<Mutex<RootTracker<W>>>,
) {
    let (batch_tx, batch_rx) = mpsc::unbounded_channel();
    let follow = async move {
        while let Some(batch) = raw.recv().await {
            if let Ok(mut tracker) = roots.lock() {
                if !tracker.is_settled() {
                    tracker.refresh();
                }
            }
            if batch_tx.send(batch).is_err() {
                break;
            }
        }
    };
    tokio::join!(follow, coalesce(batch_rx, sink, latency));
}

fn is_relevant_event_kind(kind: &EventKind) -> bool {
    !matches!(kind, EventKind::Access(_))
}

/// Locations that do not exist yet are watched through their nearest
/// existing ancestor, non-recursively, so their creation is still seen.
fn watch_target(path: &Path) -> (PathBuf, RecursiveMode) {
    if path.exists() {
        return (path.to_path_buf(), RecursiveMode::Recursive);
    }
    let ancestor = path
        .ancestors()
        .skip(1)
        .find(|candidate| candidate.exists())
        .unwrap_or_else(|| Path::new("/"));
    (ancestor.to_path_buf(), RecursiveMode::NonRecursive)
}

/// Forward raw change batches as at most one burst per `latency` window.
///
/// The window opens at the first change after a quiet period; everything
/// arriving before it closes is merged into one burst.
pub(crate) async fn coalesce(
    mut raw: mpsc::UnboundedReceiver<Vec<PathBuf>>,
    sink: BurstSender,
    latency: Duration,
) {
    while let Some(first) = raw.recv().await {
        let mut paths: BTreeSet<PathBuf> = first.into_iter().collect();
        let deadline = Instant::now() + latency;
        let mut source_closed = false;
        loop {
            tokio::select! {
                _ = sleep_until(deadline) => break,
                next = raw.recv() => match next {
                    Some(more) => paths.extend(more),
                    None => {
                        source_closed = true;
                        break;
                    }
                },
            }
        }

        if !paths.is_empty() {
            let burst = ChangeBurst {
                paths: paths.into_iter().collect(),
            };
            if sink.send(burst).is_err() {
                break;
            }
        }
        if source_closed {
            break;
        }
    }
}
