use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::TaskId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStatus {
    Pending,
    Processed,
    Ignored,
    Failed,
    Duplicate,
}

/// A raw webhook delivery, kept for audit and duplicate suppression.
/// `(source, payload_hash)` is unique within the sliding `PROC_WINDOW`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub event_id: String,
    pub source: String,
    pub event_type: String,
    pub payload: Value,
    pub payload_hash: String,
    pub signature: Option<String>,
    pub received_at: DateTime<Utc>,
    pub processing_status: ProcessingStatus,
    pub related_task_id: Option<TaskId>,
    pub error_message: Option<String>,
}
