use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Running,
    Completed,
    Error,
}

impl QueueStatus {
    /// Completed and Error items are immutable and live in history.
    pub fn is_terminal(self) -> bool {
        matches!(self, QueueStatus::Completed | QueueStatus::Error)
    }

    pub fn is_active(self) -> bool {
        matches!(self, QueueStatus::Pending | QueueStatus::Running)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueItem {
    pub id: i64,
    pub profile_id: i64,
    pub app_id: String,
    pub parent_app_id: Option<String>,
    pub profile_name: String,
    pub app_name: String,
    pub order: i64,
    pub is_main_app: bool,
    pub status: QueueStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: String,
}

impl QueueItem {
    pub(crate) fn mark_running(&mut self, now: DateTime<Utc>) {
        debug_assert_eq!(self.status, QueueStatus::Pending);
        self.status = QueueStatus::Running;
        self.started_at = Some(now.max(self.created_at));
    }

    pub(crate) fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.status = QueueStatus::Completed;
        self.completed_at = Some(self.clamp_finish(now));
        self.error.clear();
    }

    pub(crate) fn mark_error(&mut self, now: DateTime<Utc>, error: impl Into<String>) {
        self.status = QueueStatus::Error;
        self.completed_at = Some(self.clamp_finish(now));
        self.error = error.into();
    }

    // Wall clock can step backwards; keep created <= started <= completed.
    fn clamp_finish(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let floor = self.started_at.unwrap_or(self.created_at);
        now.max(floor)
    }
}
