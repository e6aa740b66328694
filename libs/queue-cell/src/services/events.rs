use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::models::Visit;

pub type QueueEventReceiver = broadcast::Receiver<QueueEvent>;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QueueEventKind {
    Admitted,
    Called,
    Recalled,
    Advanced,
    Retriaged,
    Completed,
    Cancelled,
    NoShow,
    Removed,
    Restored,
}

impl QueueEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueEventKind::Admitted => "admitted",
            QueueEventKind::Called => "called",
            QueueEventKind::Recalled => "recalled",
            QueueEventKind::Advanced => "advanced",
            QueueEventKind::Retriaged => "retriaged",
            QueueEventKind::Completed => "completed",
            QueueEventKind::Cancelled => "cancelled",
            QueueEventKind::NoShow => "no_show",
            QueueEventKind::Removed => "removed",
            QueueEventKind::Restored => "restored",
        }
    }
}

/// Post-mutation snapshot pushed to display boards and the notification
/// service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueEvent {
    pub kind: QueueEventKind,
    pub visit: Visit,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct QueueEventBus {
    sender: broadcast::Sender<QueueEvent>,
}

impl QueueEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn publish(&self, kind: QueueEventKind, visit: &Visit, occurred_at: DateTime<Utc>) {
        let event = QueueEvent {
            kind,
            visit: visit.clone(),
            occurred_at,
        };

        // No subscribers is normal outside clinic hours.
        if let Err(e) = self.sender.send(event) {
            debug!("Queue event {:?} for visit {} had no subscribers: {}", kind, visit.id, e);
        }
    }

    pub fn subscribe(&self) -> QueueEventReceiver {
        self.sender.subscribe()
    }
}

impl Default for QueueEventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
