use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{RunId, TaskId};

/// `internal_status` per §3: a Task moves through this set as its active Run
/// progresses. `quality_check` and `completed`/`failed` are the terminal
/// states from which a reactivation may be attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InternalStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    QualityCheck,
    Abandoned,
}

impl InternalStatus {
    /// States from which the Reactivation Gate's state check (§4.3 step 1)
    /// allows a new Run to be spawned.
    pub fn reactivatable(self) -> bool {
        matches!(
            self,
            InternalStatus::Completed | InternalStatus::Failed | InternalStatus::QualityCheck
        )
    }
}

/// The long-lived intent derived from a ticket. Created once per
/// `external_item_id`, never deleted, mutated only by the Reactivation Gate
/// and the Workflow Driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub external_item_id: String,
    pub title: String,
    /// Append-only log of updates; the newest entries are an "UPDATES"
    /// section appended by the Run Factory (§4.4), capped to the last N.
    pub description: String,
    pub repository_url: String,
    pub base_branch: Option<String>,
    pub priority: Option<String>,
    pub internal_status: InternalStatus,
    pub is_locked: bool,
    pub locked_by: Option<String>,
    pub lock_acquired_at: Option<DateTime<Utc>>,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub reactivation_count: u32,
    pub failed_reactivation_attempts: u32,
    pub last_run_id: Option<RunId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        task_id: TaskId,
        external_item_id: String,
        title: String,
        description: String,
        repository_url: String,
        priority: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            task_id,
            external_item_id,
            title,
            description,
            repository_url,
            base_branch: None,
            priority,
            internal_status: InternalStatus::Pending,
            is_locked: false,
            locked_by: None,
            lock_acquired_at: None,
            cooldown_until: None,
            reactivation_count: 0,
            failed_reactivation_attempts: 0,
            last_run_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Invariant: `is_locked => locked_by != null`.
    pub fn invariants_hold(&self) -> bool {
        if self.is_locked && self.locked_by.is_none() {
            return false;
        }
        true
    }
}
