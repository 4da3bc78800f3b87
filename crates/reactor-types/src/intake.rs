use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::TaskId;

/// What the Webhook Intake classified `event.type` into (§4.1). `Ignored`
/// never reaches the Event Router; the intake layer short-circuits it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntakeEventKind {
    TaskCreate,
    TaskStatusChange,
    ItemUpdate,
    ColumnValueChange,
}

/// The normalised shape the Webhook Intake hands to the Event Router, after
/// signature verification and dedup (§4.1 "Output"). `task_id` is populated
/// once the Event Router has resolved `item_id` against the Task store; the
/// intake layer itself only knows the external ticket id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntakeEvent {
    pub task_id: Option<TaskId>,
    pub item_id: String,
    pub kind: IntakeEventKind,
    pub text: Option<String>,
    pub column: Option<String>,
    pub new_value: Option<Value>,
    pub triggerer_id: Option<String>,
}
