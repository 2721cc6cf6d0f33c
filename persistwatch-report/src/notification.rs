//! Notification payload handed to the platform notifier.

use serde::{Deserialize, Serialize};

/// Action tag telling the consumer to reconstruct and reveal the pending diff.
pub const REVEAL_PENDING_DIFF: &str = "reveal-pending-diff";

pub const NOTIFICATION_TITLE: &str = "Persistence changes detected";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub title: String,
    pub body: String,
    pub action: String,
}

impl NotificationPayload {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            title: NOTIFICATION_TITLE.to_string(),
            body: body.into(),
            action: REVEAL_PENDING_DIFF.to_string(),
        }
    }
}
