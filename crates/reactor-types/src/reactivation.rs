use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{ReactivationId, RunId, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Update,
    Manual,
    Automatic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReactivationStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Audit record of a reactivation attempt, append-only, linked 1:1 to at
/// most one Run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactivationRecord {
    pub reactivation_id: ReactivationId,
    pub task_id: TaskId,
    pub trigger_type: TriggerType,
    pub status: ReactivationStatus,
    pub payload: Value,
    pub error_message: Option<String>,
    pub run_id: Option<RunId>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}
