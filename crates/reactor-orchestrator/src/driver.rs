//! Workflow Driver (§4.5): drives a Run sequentially through
//! `NODE_ORDER`, persisting a `Step` per node, forwarding AI usage to the
//! Ledger, retrying `test` with exponential backoff + jitter, suspending at
//! `validation`, and honouring cancellation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use reactor_core::{CancellationRegistry, EventBus, Ledger, ReactorConfig, Result, Stores};
use reactor_types::{NodeName, Run, RunId, RunStatus, Step, StepStatus, WorkflowEvent, NODE_ORDER};

use crate::model::{RunContext, StepNode, StepOutcome};

/// Exponential backoff with jitter for a retried node (§4.5). `attempt` is
/// 1-indexed (the first retry).
fn backoff_with_jitter(attempt: u32) -> Duration {
    let base_ms = 500u64.saturating_mul(1u64 << attempt.min(6));
    let jitter_ms = rand::thread_rng().gen_range(0..=base_ms / 4 + 1);
    Duration::from_millis(base_ms + jitter_ms)
}

pub struct WorkflowDriver {
    stores: Arc<Stores>,
    ledger: Ledger,
    events: EventBus,
    cancellation: CancellationRegistry,
    config: Arc<ReactorConfig>,
    nodes: HashMap<NodeName, Arc<dyn StepNode>>,
}

pub enum DriveOutcome {
    /// The Run reached `validation` and is now suspended, awaiting the
    /// Validation Coordinator.
    SuspendedForValidation,
    /// The Run ran every node to completion.
    Completed,
    /// A node failed past its retry budget; the Run is now `failed`.
    Failed,
    /// The Run was cancelled mid-flight.
    Cancelled,
}

impl WorkflowDriver {
    pub fn new(
        stores: Arc<Stores>,
        ledger: Ledger,
        events: EventBus,
        cancellation: CancellationRegistry,
        config: Arc<ReactorConfig>,
        nodes: Vec<Arc<dyn StepNode>>,
    ) -> Self {
        let nodes = nodes.into_iter().map(|n| (n.name(), n)).collect();
        Self {
            stores,
            ledger,
            events,
            cancellation,
            config,
            nodes,
        }
    }

    /// Drives `run` forward from its `current_node` (or `prepare` if new)
    /// until it suspends, fails, completes, or is cancelled. Resumable: a
    /// call after `merge` (post-approval) starts at `merge`, not `prepare`.
    pub async fn drive(&self, run_id: RunId, worker_id: &str) -> Result<DriveOutcome> {
        let token = self.cancellation.token_for(run_id).await;
        self.cancellation.heartbeat(run_id, worker_id).await;

        let mut run = self.require_run(run_id).await?;
        let task = self.require_task(run.task_id).await?;

        let start_index = run.current_node.map(|n| n.step_order() + 1).unwrap_or(0);

        for node_name in &NODE_ORDER[start_index..] {
            if token.is_cancelled() {
                self.mark_cancelled(&mut run).await?;
                return Ok(DriveOutcome::Cancelled);
            }

            let Some(node) = self.nodes.get(node_name) else {
                tracing::warn!(node = ?node_name, "no implementation registered for node, skipping");
                continue;
            };

            self.events.publish(WorkflowEvent::StepStarted {
                run_id,
                node: *node_name,
                at: Utc::now(),
            });

            let ctx = RunContext {
                task: task.clone(),
                run: run.clone(),
                rejection_instructions: run.rejection_instructions.clone(),
            };

            let max_retries = node_name.default_max_retries(self.config.max_test_retries);
            let step_id = self.stores.alloc_step_id();
            self.stores
                .steps
                .insert(step_id, Step::pending(step_id, run_id, *node_name))
                .await?;

            let mut attempt = 0u32;
            let result = loop {
                self.cancellation.heartbeat(run_id, worker_id).await;
                let outcome = node.execute(&ctx).await;
                if outcome.outcome != StepOutcome::Failed || attempt >= max_retries {
                    break outcome;
                }
                attempt += 1;
                tokio::time::sleep(backoff_with_jitter(attempt)).await;
            };

            self.persist_step_result(step_id, &result, attempt).await?;
            // Nodes have no way to know their own `step_id` (it's allocated
            // here, after the node already ran), so stamp it and `run_id`
            // onto every usage record before it's persisted rather than
            // trusting whatever the node filled in.
            for usage in &result.ai_usage {
                let mut usage = usage.clone();
                usage.run_id = run_id;
                usage.step_id = step_id;
                self.stores.usage.insert(format!("{}-{}", usage.run_id, usage.step_id), usage).await?;
            }

            let progress = node_name.step_order() as f64 / NODE_ORDER.len() as f64 * 100.0;
            self.events.publish(WorkflowEvent::StepFinished {
                run_id,
                node: *node_name,
                succeeded: result.outcome == StepOutcome::Completed,
                progress_percent: progress.round() as u8,
                at: Utc::now(),
            });

            match result.outcome {
                StepOutcome::Completed => {
                    run = self.advance(run_id, *node_name).await?;
                }
                StepOutcome::Suspended => {
                    self.suspend(run_id, *node_name).await?;
                    return Ok(DriveOutcome::SuspendedForValidation);
                }
                StepOutcome::Failed => {
                    self.fail(run_id).await?;
                    return Ok(DriveOutcome::Failed);
                }
            }
        }

        self.complete(run_id).await?;
        Ok(DriveOutcome::Completed)
    }

    async fn require_run(&self, run_id: RunId) -> Result<Run> {
        self.stores
            .runs
            .get(&run_id)
            .await
            .ok_or_else(|| reactor_core::ReactorError::not_found(format!("run {run_id} not found")))
    }

    async fn require_task(&self, task_id: reactor_types::TaskId) -> Result<reactor_types::Task> {
        self.stores
            .tasks
            .get(&task_id)
            .await
            .ok_or_else(|| reactor_core::ReactorError::not_found(format!("task {task_id} not found")))
    }

    async fn persist_step_result(
        &self,
        step_id: reactor_types::StepId,
        result: &crate::model::StepResult,
        retry_count: u32,
    ) -> Result<()> {
        self.stores
            .cas_step(step_id, |step| {
                let mut updated = step.clone();
                updated.status = match result.outcome {
                    StepOutcome::Completed => StepStatus::Completed,
                    StepOutcome::Failed => StepStatus::Failed,
                    StepOutcome::Suspended => StepStatus::Completed,
                };
                updated.started_at.get_or_insert(Utc::now());
                updated.completed_at = Some(Utc::now());
                updated.duration_ms = Some(result.duration_ms);
                updated.retry_count = retry_count;
                updated.output_snapshot = result.output.clone();
                updated.error_details = result.error.clone();
                Ok(updated)
            })
            .await
            .map(|_| ())
    }

    async fn advance(&self, run_id: RunId, finished_node: NodeName) -> Result<Run> {
        self.stores
            .cas_run(run_id, |run| {
                let mut updated = run.clone();
                updated.current_node = Some(finished_node);
                updated.status = RunStatus::Running;
                Ok(updated)
            })
            .await
    }

    async fn suspend(&self, run_id: RunId, node: NodeName) -> Result<Run> {
        let run = self
            .stores
            .cas_run(run_id, |run| {
                let mut updated = run.clone();
                updated.current_node = Some(node);
                updated.status = RunStatus::ValidationPending;
                Ok(updated)
            })
            .await?;
        // A Task sitting on a suspended Run is reactivatable (§4.3 step 1):
        // a REJECT on this validation must be able to spawn a fresh Run
        // through the gate without waiting for `merge`/`update` to run.
        self.stores
            .cas_task(run.task_id, |task| {
                let mut updated = task.clone();
                updated.internal_status = reactor_types::InternalStatus::QualityCheck;
                updated.updated_at = Utc::now();
                Ok(updated)
            })
            .await?;
        Ok(run)
    }

    async fn fail(&self, run_id: RunId) -> Result<Run> {
        let run = self
            .stores
            .cas_run(run_id, |run| {
                let mut updated = run.clone();
                updated.status = RunStatus::Failed;
                updated.completed_at = Some(Utc::now());
                Ok(updated)
            })
            .await?;
        self.stores
            .cas_task(run.task_id, |task| {
                let mut updated = task.clone();
                updated.internal_status = reactor_types::InternalStatus::Failed;
                updated.updated_at = Utc::now();
                Ok(updated)
            })
            .await?;
        self.cancellation.forget(run_id).await;
        self.events.publish(WorkflowEvent::RunTerminal {
            task_id: run.task_id,
            run_id,
            status: "failed".to_string(),
            at: Utc::now(),
        });
        Ok(run)
    }

    async fn complete(&self, run_id: RunId) -> Result<Run> {
        let run = self
            .stores
            .cas_run(run_id, |run| {
                let mut updated = run.clone();
                updated.status = RunStatus::Completed;
                updated.completed_at = Some(Utc::now());
                Ok(updated)
            })
            .await?;
        self.stores
            .cas_task(run.task_id, |task| {
                let mut updated = task.clone();
                updated.internal_status = reactor_types::InternalStatus::Completed;
                updated.updated_at = Utc::now();
                Ok(updated)
            })
            .await?;
        self.cancellation.forget(run_id).await;
        self.events.publish(WorkflowEvent::RunTerminal {
            task_id: run.task_id,
            run_id,
            status: "completed".to_string(),
            at: Utc::now(),
        });
        Ok(run)
    }

    async fn mark_cancelled(&self, run: &mut Run) -> Result<()> {
        let updated = self
            .stores
            .cas_run(run.run_id, |r| {
                let mut updated = r.clone();
                if !updated.status.is_terminal() {
                    updated.status = RunStatus::Cancelled;
                    updated.completed_at = Some(Utc::now());
                }
                Ok(updated)
            })
            .await?;
        self.cancellation.forget(run.run_id).await;
        self.events.publish(WorkflowEvent::RunTerminal {
            task_id: updated.task_id,
            run_id: updated.run_id,
            status: "cancelled".to_string(),
            at: Utc::now(),
        });
        *run = updated;
        Ok(())
    }

    /// Resumes a Run after its suspended `validation` node was approved,
    /// continuing at `merge` (§4.6 "the Run resumes at `merge`").
    pub async fn resume_at_merge(&self, run_id: RunId, worker_id: &str) -> Result<DriveOutcome> {
        self.stores
            .cas_run(run_id, |run| {
                let mut updated = run.clone();
                updated.current_node = Some(NodeName::Validation);
                updated.status = RunStatus::Running;
                Ok(updated)
            })
            .await?;
        self.drive(run_id, worker_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use reactor_types::{InternalStatus, RunStatus as RS, Task};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct AlwaysCompletes(NodeName);

    #[async_trait]
    impl StepNode for AlwaysCompletes {
        fn name(&self) -> NodeName {
            self.0
        }
        async fn execute(&self, _ctx: &RunContext) -> crate::model::StepResult {
            if self.0 == NodeName::Validation {
                crate::model::StepResult::suspended(1)
            } else {
                crate::model::StepResult::completed(None, 1)
            }
        }
    }

    struct FlakyTest {
        failures_remaining: AtomicU32,
    }

    #[async_trait]
    impl StepNode for FlakyTest {
        fn name(&self) -> NodeName {
            NodeName::Test
        }
        async fn execute(&self, _ctx: &RunContext) -> crate::model::StepResult {
            if self.failures_remaining.load(Ordering::SeqCst) > 0 {
                self.failures_remaining.fetch_sub(1, Ordering::SeqCst);
                crate::model::StepResult::failed("flaky", 1)
            } else {
                crate::model::StepResult::completed(None, 1)
            }
        }
    }

    async fn setup() -> (Arc<Stores>, Ledger, EventBus, CancellationRegistry, Arc<ReactorConfig>, tempfile::TempDir, RunId) {
        let dir = tempfile::tempdir().unwrap();
        let stores = Stores::open(dir.path()).await.unwrap();
        let config = Arc::new(ReactorConfig::from_env().unwrap());
        let task_id = stores.alloc_task_id();
        let task = Task::new(task_id, "item-1".into(), "t".into(), "d".into(), "r".into(), None, Utc::now());
        stores.tasks.insert(task_id, task).await.unwrap();
        let run_id = stores.alloc_run_id();
        let run = Run {
            run_id,
            task_id,
            run_number: 1,
            status: RS::Started,
            is_reactivation: false,
            reactivation_count: 0,
            parent_run_id: None,
            base_branch: "main".into(),
            branch_name: "reactor/task-1-run-1".into(),
            rejection_instructions: None,
            started_at: Utc::now(),
            completed_at: None,
            active_worker_ids: Default::default(),
            last_worker_id: None,
            current_node: None,
        };
        stores.runs.insert(run_id, run).await.unwrap();
        let ledger = Ledger::new(stores.clone());
        (stores, ledger, EventBus::new(), CancellationRegistry::new(), config, dir, run_id)
    }

    #[tokio::test]
    async fn validation_node_suspends_the_run() {
        let (stores, ledger, events, cancellation, config, _dir, run_id) = setup().await;
        let nodes: Vec<Arc<dyn StepNode>> = NODE_ORDER
            .iter()
            .take_while(|n| **n != NodeName::Merge)
            .map(|n| Arc::new(AlwaysCompletes(*n)) as Arc<dyn StepNode>)
            .collect();
        let driver = WorkflowDriver::new(stores.clone(), ledger, events, cancellation, config, nodes);
        let outcome = driver.drive(run_id, "worker-1").await.unwrap();
        assert!(matches!(outcome, DriveOutcome::SuspendedForValidation));
        let run = stores.runs.get(&run_id).await.unwrap();
        assert_eq!(run.status, RS::ValidationPending);
    }

    #[tokio::test]
    async fn test_node_retries_until_it_passes() {
        let (stores, ledger, events, cancellation, config, _dir, run_id) = setup().await;
        let mut nodes: Vec<Arc<dyn StepNode>> = NODE_ORDER
            .iter()
            .take_while(|n| **n != NodeName::Qa)
            .filter(|n| **n != NodeName::Test)
            .map(|n| Arc::new(AlwaysCompletes(*n)) as Arc<dyn StepNode>)
            .collect();
        nodes.push(Arc::new(FlakyTest {
            failures_remaining: AtomicU32::new(2),
        }));
        let driver = WorkflowDriver::new(stores.clone(), ledger, events, cancellation, config, nodes);
        let run_id_copy = run_id;
        let handle = tokio::time::timeout(std::time::Duration::from_secs(5), driver.drive(run_id_copy, "w"));
        let outcome = handle.await.unwrap().unwrap();
        let run = stores.runs.get(&run_id).await.unwrap();
        assert!(matches!(outcome, DriveOutcome::Completed) || matches!(outcome, DriveOutcome::SuspendedForValidation));
        assert!(run.current_node.is_some());
        let _ = ChronoDuration::seconds(0);
        let _ = InternalStatus::Completed;
    }

    #[tokio::test]
    async fn cancellation_stops_the_run() {
        let (stores, ledger, events, cancellation, config, _dir, run_id) = setup().await;
        let token = cancellation.token_for(run_id).await;
        token.cancel();
        let nodes: Vec<Arc<dyn StepNode>> = NODE_ORDER
            .iter()
            .map(|n| Arc::new(AlwaysCompletes(*n)) as Arc<dyn StepNode>)
            .collect();
        let driver = WorkflowDriver::new(stores.clone(), ledger, events, cancellation, config, nodes);
        let outcome = driver.drive(run_id, "worker-1").await.unwrap();
        assert!(matches!(outcome, DriveOutcome::Cancelled));
        let run = stores.runs.get(&run_id).await.unwrap();
        assert_eq!(run.status, RS::Cancelled);
    }
}
