use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{NodeName, RunId, StepId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

/// One node execution within a Run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub step_id: StepId,
    pub run_id: RunId,
    pub node_name: NodeName,
    pub step_order: usize,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    pub retry_count: u32,
    pub input_snapshot: Option<Value>,
    pub output_snapshot: Option<Value>,
    pub error_details: Option<String>,
}

impl Step {
    pub fn pending(step_id: StepId, run_id: RunId, node_name: NodeName) -> Self {
        Self {
            step_id,
            run_id,
            node_name,
            step_order: node_name.step_order(),
            status: StepStatus::Pending,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            retry_count: 0,
            input_snapshot: None,
            output_snapshot: None,
            error_details: None,
        }
    }
}
