use serde::Serialize;

use super::store::QueueSnapshot;
use crate::models::QueueStatus;

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueEventKind {
    Enqueued { id: i64 },
    Removed { id: i64 },
    Cleared { count: usize },
    Started { id: i64 },
    Finished { id: i64, status: QueueStatus },
    ProcessingStarted,
    ProcessingStopped,
}

/// Published after every queue mutation. Receivers that lag simply miss
/// events and can reload the durable store instead.
#[derive(Debug, Clone, Serialize)]
pub struct QueueEvent {
    pub kind: QueueEventKind,
    pub snapshot: QueueSnapshot,
}
