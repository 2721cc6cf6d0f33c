//! Serialized scan queue.
//!
//! Every snapshot the daemon captures, whether requested over the socket or
//! triggered by the watch service, goes through one worker task that runs
//! one scan at a time on the blocking pool.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;

use persistwatch_core::Snapshot;
use persistwatch_scan::{ScanError, SnapshotProvider};

use crate::error::DaemonError;

const QUEUE_DEPTH: usize = 16;

struct ScanJob {
    label: String,
    respond_to: oneshot::Sender<Result<Snapshot, ScanError>>,
}

/// Cloneable handle onto the scan worker.
#[derive(Clone)]
pub struct ScanQueue {
    jobs: mpsc::Sender<ScanJob>,
}

impl ScanQueue {
    /// Start the worker. It exits when `shutdown` fires or every handle is
    /// dropped; jobs still queued at that point are answered with
    /// [`DaemonError::ChannelClosed`].
    pub fn spawn(
        provider: Arc<dyn SnapshotProvider>,
        shutdown: broadcast::Receiver<()>,
    ) -> (Self, JoinHandle<()>) {
        let (jobs, rx) = mpsc::channel(QUEUE_DEPTH);
        let worker = tokio::spawn(scan_worker(provider, rx, shutdown));
        (Self { jobs }, worker)
    }

    /// Queue a capture labelled `label` and wait for its snapshot.
    pub async fn capture(&self, label: impl Into<String>) -> Result<Snapshot, DaemonError> {
        let (tx, rx) = oneshot::channel();
        self.jobs
            .send(ScanJob {
                label: label.into(),
                respond_to: tx,
            })
            .await
            .map_err(|_| DaemonError::ChannelClosed("scan queue"))?;

        let outcome = rx
            .await
            .map_err(|_| DaemonError::ChannelClosed("scan response"))?;
        Ok(outcome?)
    }
}

async fn scan_worker(
    provider: Arc<dyn SnapshotProvider>,
    mut jobs: mpsc::Receiver<ScanJob>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = shutdown.recv() => break,
            job = jobs.recv() => {
                let Some(job) = job else { break };
                let provider = provider.clone();
                let label = job.label;
                let result = tokio::task::spawn_blocking(move || provider.capture(&label))
                    .await
                    .unwrap_or_else(|err| Err(ScanError::Aborted(format!("scan task failed: {err}"))));
                if let Err(err) = &result {
                    tracing::warn!(error = %err, "scan failed");
                }
                let _ = job.respond_to.send(result);
            }
        }
    }
    tracing::debug!("scan worker stopped");
}
