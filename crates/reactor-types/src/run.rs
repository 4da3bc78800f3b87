use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{RunId, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Started,
    Running,
    ValidationPending,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }

    /// Testable property #1 (§8): at most one Run per Task may be in one of
    /// these statuses at a time.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            RunStatus::Started | RunStatus::Running | RunStatus::ValidationPending
        )
    }
}

/// Fixed, ordered sequence of workflow nodes (§4.5). The Workflow Driver
/// never runs two of these concurrently within a Run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeName {
    Prepare,
    Analyze,
    Implement,
    Test,
    Qa,
    Finalize,
    Validation,
    Merge,
    Update,
}

pub const NODE_ORDER: [NodeName; 9] = [
    NodeName::Prepare,
    NodeName::Analyze,
    NodeName::Implement,
    NodeName::Test,
    NodeName::Qa,
    NodeName::Finalize,
    NodeName::Validation,
    NodeName::Merge,
    NodeName::Update,
];

impl NodeName {
    pub fn step_order(self) -> usize {
        NODE_ORDER.iter().position(|n| *n == self).expect("node in NODE_ORDER")
    }

    pub fn next(self) -> Option<NodeName> {
        NODE_ORDER.get(self.step_order() + 1).copied()
    }

    /// Per-node retry budget (§4.5): the default is 0 (idempotent, single
    /// attempt) except for `test`, which gets `MAX_TEST_RETRIES`.
    pub fn default_max_retries(self, max_test_retries: u32) -> u32 {
        match self {
            NodeName::Test => max_test_retries,
            _ => 0,
        }
    }
}

/// One attempt at executing the workflow for a Task. Runs are append-only
/// w.r.t. identity: `run_number` strictly increases per Task and a Run is
/// never deleted, only transitioned to a terminal status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub run_id: RunId,
    pub task_id: TaskId,
    pub run_number: u32,
    pub status: RunStatus,
    pub is_reactivation: bool,
    pub reactivation_count: u32,
    pub parent_run_id: Option<RunId>,
    pub base_branch: String,
    pub branch_name: String,
    pub rejection_instructions: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub active_worker_ids: BTreeSet<String>,
    pub last_worker_id: Option<String>,
    pub current_node: Option<NodeName>,
}

impl Run {
    pub fn progress_percent(&self) -> u8 {
        let completed = self.current_node.map(|n| n.step_order()).unwrap_or(0);
        let total = NODE_ORDER.len();
        ((completed as f64 / total as f64) * 100.0).round() as u8
    }

    /// Testable property #2 (§8): `Step.step_order` values form a gapless
    /// prefix of `NODE_ORDER`. `current_node` never points past
    /// `NODE_ORDER.len()`.
    pub fn is_complete_sequence(&self) -> bool {
        match self.current_node {
            None => true,
            Some(node) => node.step_order() < NODE_ORDER.len(),
        }
    }
}
