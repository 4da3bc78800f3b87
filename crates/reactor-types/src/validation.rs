use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{RunId, TaskId, ValidationId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationStatus {
    Pending,
    Approved,
    Rejected,
    Abandoned,
    TimedOut,
}

impl ValidationStatus {
    /// Testable property #5 (§8): transitions only from `Pending` to one of
    /// these, never back. The one exception is `TimedOut`, which §4.6
    /// explicitly keeps resolvable ("a subsequent reply can still resolve
    /// it") — a late comment can still carry it to `Approved`/`Rejected`/
    /// `Abandoned`. `is_terminal` reflects the sweep's view (nothing left
    /// for the timeout sweep to do), not a hard stop on every transition.
    pub fn is_terminal(self) -> bool {
        !matches!(self, ValidationStatus::Pending)
    }
}

/// A pending human decision, created when the Workflow Driver suspends a Run
/// at the `validation` node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationRequest {
    pub validation_id: ValidationId,
    pub run_id: RunId,
    pub task_id: TaskId,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: ValidationStatus,
    pub rejection_instructions: Option<String>,
    pub analysis_confidence: Option<f64>,
    pub timeout_notified: bool,
    pub clarification_requested: bool,
}

impl ValidationRequest {
    pub fn new(
        validation_id: ValidationId,
        run_id: RunId,
        task_id: TaskId,
        created_at: DateTime<Utc>,
        timeout: chrono::Duration,
    ) -> Self {
        Self {
            validation_id,
            run_id,
            task_id,
            created_at,
            expires_at: created_at + timeout,
            status: ValidationStatus::Pending,
            rejection_instructions: None,
            analysis_confidence: None,
            timeout_notified: false,
            clarification_requested: false,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
