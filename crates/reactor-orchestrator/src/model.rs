//! `RunContext` / `StepResult` (§4.5): the contract between the Workflow
//! Driver and a workflow node. Nodes are pure functions of
//! `RunContext -> StepResult`; `RunContext` is read-only except for
//! append-step-result, which a node never calls directly — only the driver's
//! `run_step` wrapper does (§9 "decorator-based monitoring" design note).

use async_trait::async_trait;
use reactor_types::{AIUsageRecord, NodeName, Run, Task};
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct RunContext {
    pub task: Task,
    pub run: Run,
    /// Extracted requirements from a REJECT verdict, surfaced to the
    /// `implement` node of the spawned Run (§4.6).
    pub rejection_instructions: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Completed,
    Failed,
    /// Only the `validation` node returns this: the driver suspends the Run
    /// instead of advancing (§4.5).
    Suspended,
}

#[derive(Debug, Clone)]
pub struct StepResult {
    pub outcome: StepOutcome,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub duration_ms: u64,
    pub ai_usage: Vec<AIUsageRecord>,
}

impl StepResult {
    pub fn completed(output: Option<Value>, duration_ms: u64) -> Self {
        Self {
            outcome: StepOutcome::Completed,
            output,
            error: None,
            duration_ms,
            ai_usage: Vec::new(),
        }
    }

    pub fn failed(error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            outcome: StepOutcome::Failed,
            output: None,
            error: Some(error.into()),
            duration_ms,
            ai_usage: Vec::new(),
        }
    }

    pub fn suspended(duration_ms: u64) -> Self {
        Self {
            outcome: StepOutcome::Suspended,
            output: None,
            error: None,
            duration_ms,
            ai_usage: Vec::new(),
        }
    }

    pub fn with_usage(mut self, usage: Vec<AIUsageRecord>) -> Self {
        self.ai_usage = usage;
        self
    }
}

/// A workflow node, treated as a black box per §1: this crate only defines
/// the contract nodes execute against, never their internals (analyze,
/// implement, test, QA are out of scope).
#[async_trait]
pub trait StepNode: Send + Sync {
    fn name(&self) -> NodeName;

    async fn execute(&self, ctx: &RunContext) -> StepResult;
}
