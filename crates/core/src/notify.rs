//! Notification collaborator. Delivery is fire-and-forget.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::types::NotificationChannel;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMessage {
    pub rule_id: Uuid,
    pub owner_id: Uuid,
    pub entity_id: String,
    pub channels: Vec<NotificationChannel>,
    pub subject: String,
    pub body: String,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, message: NotificationMessage);
}

/// Writes each notification to the log.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, message: NotificationMessage) {
        info!(
            rule_id = %message.rule_id,
            owner_id = %message.owner_id,
            entity_id = %message.entity_id,
            channels = ?message.channels,
            subject = %message.subject,
            "Notification dispatched"
        );
    }
}

/// Keeps notifications in memory for assertions.
#[derive(Default)]
pub struct CaptureNotifier {
    sent: Mutex<Vec<NotificationMessage>>,
}

impl CaptureNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<NotificationMessage> {
        self.sent.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.sent.lock().len()
    }
}

impl Notifier for CaptureNotifier {
    fn notify(&self, message: NotificationMessage) {
        self.sent.lock().push(message);
    }
}
