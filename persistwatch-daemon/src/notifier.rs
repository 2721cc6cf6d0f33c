//! User notification delivery.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use persistwatch_core::CommandRunner;
use persistwatch_report::NotificationPayload;

const OSASCRIPT: &str = "/usr/bin/osascript";
const OSASCRIPT_TIMEOUT: Duration = Duration::from_secs(5);

/// Posts notifications and reports whether the consumer UI is in front.
pub trait Notifier: Send + Sync {
    /// While the consumer is visible the user sees changes directly, so no
    /// notification is raised.
    fn is_consumer_visible(&self) -> bool;

    fn notify(&self, payload: &NotificationPayload);
}

/// Writes notifications to the log. The headless default.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn is_consumer_visible(&self) -> bool {
        false
    }

    fn notify(&self, payload: &NotificationPayload) {
        tracing::info!(
            title = %payload.title,
            action = %payload.action,
            "{}",
            payload.body
        );
    }
}

/// Posts through Notification Center with `osascript`.
pub struct OsascriptNotifier {
    runner: Arc<dyn CommandRunner>,
}

impl OsascriptNotifier {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

impl Notifier for OsascriptNotifier {
    fn is_consumer_visible(&self) -> bool {
        false
    }

    fn notify(&self, payload: &NotificationPayload) {
        // Title and body travel as argv so they never need AppleScript quoting.
        let args = [
            "-e",
            "on run argv",
            "-e",
            "display notification (item 2 of argv) with title (item 1 of argv)",
            "-e",
            "end run",
            payload.title.as_str(),
            payload.body.as_str(),
        ];
        if self
            .runner
            .run(Path::new(OSASCRIPT), &args, OSASCRIPT_TIMEOUT)
            .is_none()
        {
            tracing::warn!("notification could not be posted; falling back to log");
            LogNotifier.notify(payload);
        }
    }
}

/// Notification Center on macOS, the log elsewhere.
pub fn platform_notifier(runner: Arc<dyn CommandRunner>) -> Arc<dyn Notifier> {
    if cfg!(target_os = "macos") {
        Arc::new(OsascriptNotifier::new(runner))
    } else {
        Arc::new(LogNotifier)
    }
}
