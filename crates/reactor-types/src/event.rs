use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{NodeName, RunId, TaskId, ValidationId};

/// Tagged union of bus payloads published by the orchestrator for
/// observability and for the read-only admin surface (§9 "dynamic typing of
/// event payloads" design note: parsed once at the boundary, carried as one
/// enum internally).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    RunCreated {
        task_id: TaskId,
        run_id: RunId,
        run_number: u32,
        is_reactivation: bool,
        at: DateTime<Utc>,
    },
    StepStarted {
        run_id: RunId,
        node: NodeName,
        at: DateTime<Utc>,
    },
    StepFinished {
        run_id: RunId,
        node: NodeName,
        succeeded: bool,
        progress_percent: u8,
        at: DateTime<Utc>,
    },
    RunSuspended {
        run_id: RunId,
        validation_id: ValidationId,
        at: DateTime<Utc>,
    },
    RunTerminal {
        task_id: TaskId,
        run_id: RunId,
        status: String,
        at: DateTime<Utc>,
    },
    ValidationResolved {
        validation_id: ValidationId,
        run_id: RunId,
        status: String,
        at: DateTime<Utc>,
    },
    ReactivationRejected {
        task_id: TaskId,
        reason: String,
        at: DateTime<Utc>,
    },
}
