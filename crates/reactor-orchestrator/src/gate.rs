//! Reactivation Gate (§4.3): the exclusive gatekeeper deciding whether an
//! incoming instruction may spawn a new Run. Check ordering is mandatory and
//! the first four checks plus lock acquisition run inside one
//! compare-and-set so two concurrent triggers for the same Task can never
//! both pass.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reactor_core::{CancellationRegistry, EventBus, ReactorConfig, ReactorError, RunEntryPoint, RunQueue, Stores};
use reactor_types::{
    InternalStatus, ReactivationId, ReactivationRecord, ReactivationStatus, Run, Task, TaskId,
    TriggerType, WorkflowEvent,
};

use crate::factory::{enrich_description, RunFactory, RunTrigger};

#[derive(Debug, Clone, PartialEq)]
pub enum GateRejection {
    TaskNotFound,
    NotReactivatable,
    CooldownActive { remaining_secs: i64 },
    TooManyAttempts,
    AlreadyLocked,
    RunCreationFailed(String),
    StorageError(String),
}

impl std::fmt::Display for GateRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GateRejection::TaskNotFound => write!(f, "task not found"),
            GateRejection::NotReactivatable => write!(f, "task is not in a reactivatable state"),
            GateRejection::CooldownActive { remaining_secs } => {
                write!(f, "cooldown active for {remaining_secs}s more")
            }
            GateRejection::TooManyAttempts => write!(f, "too_many_attempts"),
            GateRejection::AlreadyLocked => write!(f, "already_locked"),
            GateRejection::RunCreationFailed(reason) => write!(f, "run creation failed: {reason}"),
            GateRejection::StorageError(reason) => write!(f, "storage error: {reason}"),
        }
    }
}

impl From<ReactorError> for GateRejection {
    fn from(err: ReactorError) -> Self {
        GateRejection::StorageError(err.to_string())
    }
}

pub struct GateOutcome {
    pub run: Run,
    pub reactivation: ReactivationRecord,
    /// `false` when the run queue was at capacity: the Run and
    /// `ReactivationRecord` are persisted either way (the gate has already
    /// committed by this point), but the caller must not tell the webhook
    /// source this succeeded (§5 "503 with Retry-After").
    pub enqueued: bool,
}

pub struct ReactivationGate {
    stores: Arc<Stores>,
    factory: RunFactory,
    events: EventBus,
    cancellation: CancellationRegistry,
    config: Arc<ReactorConfig>,
    queue: RunQueue,
}

impl ReactivationGate {
    pub fn new(
        stores: Arc<Stores>,
        events: EventBus,
        cancellation: CancellationRegistry,
        config: Arc<ReactorConfig>,
        queue: RunQueue,
    ) -> Self {
        let factory = RunFactory::new(stores.clone(), events.clone(), cancellation.clone(), config.clone());
        Self {
            stores,
            factory,
            events,
            cancellation,
            config,
            queue,
        }
    }

    /// Runs the full gate: state check, cooldown check, failed-attempts cap,
    /// lock acquisition (all inside one CAS), then Run Factory invocation,
    /// then commit or rollback (§4.3 step 5).
    pub async fn attempt(
        &self,
        task_id: TaskId,
        trigger_type: TriggerType,
        trigger: RunTrigger,
        now: DateTime<Utc>,
    ) -> Result<GateOutcome, GateRejection> {
        let lock_id = uuid::Uuid::new_v4().to_string();
        let max_failed = self.config.max_failed_reactivations;

        let mut rejection: Option<GateRejection> = None;
        let locked = self
            .stores
            .cas_task(task_id, |task| {
                if !task.internal_status.reactivatable() {
                    rejection = Some(GateRejection::NotReactivatable);
                    return Err(ReactorError::policy_rejection("not_reactivatable"));
                }
                if let Some(until) = task.cooldown_until {
                    if until > now {
                        rejection = Some(GateRejection::CooldownActive {
                            remaining_secs: (until - now).num_seconds().max(0),
                        });
                        return Err(ReactorError::policy_rejection("cooldown_active"));
                    }
                }
                if task.failed_reactivation_attempts >= max_failed {
                    rejection = Some(GateRejection::TooManyAttempts);
                    return Err(ReactorError::policy_rejection("too_many_attempts"));
                }
                if task.is_locked {
                    rejection = Some(GateRejection::AlreadyLocked);
                    return Err(ReactorError::policy_rejection("already_locked"));
                }
                let mut updated = task.clone();
                updated.is_locked = true;
                updated.locked_by = Some(lock_id.clone());
                updated.lock_acquired_at = Some(now);
                Ok(updated)
            })
            .await;

        let locked_task = match locked {
            Ok(task) => task,
            Err(ReactorError::NotFound(_)) => return Err(GateRejection::TaskNotFound),
            Err(_) => {
                let blocked = rejection.unwrap_or(GateRejection::AlreadyLocked);
                // §8 scenario 4 ("Cooldown block"): a policy-rejected attempt
                // still gets an audit trail, even though nothing was ever
                // locked or enqueued for it.
                let reactivation_id = self.stores.alloc_reactivation_id();
                let reactivation = ReactivationRecord {
                    reactivation_id,
                    task_id,
                    trigger_type,
                    status: ReactivationStatus::Failed,
                    payload: trigger.raw_payload.clone(),
                    error_message: Some(blocked.to_string()),
                    run_id: None,
                    created_at: now,
                    completed_at: Some(now),
                };
                self.stores.reactivations.insert(reactivation_id, reactivation).await?;
                return Err(blocked);
            }
        };

        let reactivation_id = self.stores.alloc_reactivation_id();
        let reactivation = ReactivationRecord {
            reactivation_id,
            task_id,
            trigger_type,
            status: ReactivationStatus::Processing,
            payload: trigger.raw_payload.clone(),
            error_message: None,
            run_id: None,
            created_at: now,
            completed_at: None,
        };
        self.stores.reactivations.insert(reactivation_id, reactivation).await?;

        match self.factory.create_run(&locked_task, &trigger, now).await {
            Ok(run) => {
                let committed_task = self
                    .commit(task_id, &locked_task, &run, trigger.trigger_text.as_deref(), now)
                    .await?;
                let _ = committed_task;
                let reactivation = self
                    .stores
                    .cas_reactivation(reactivation_id, |r| {
                        let mut updated = r.clone();
                        updated.status = ReactivationStatus::Completed;
                        updated.run_id = Some(run.run_id);
                        updated.completed_at = Some(now);
                        Ok(updated)
                    })
                    .await?;
                let enqueued = self.queue.enqueue(run.run_id, RunEntryPoint::FromStart).is_ok();
                if !enqueued {
                    tracing::warn!(run_id = %run.run_id, "run queue full, run persisted but not yet enqueued");
                }
                Ok(GateOutcome { run, reactivation, enqueued })
            }
            Err(err) => {
                self.rollback(task_id, now).await?;
                self.stores
                    .cas_reactivation(reactivation_id, |r| {
                        let mut updated = r.clone();
                        updated.status = ReactivationStatus::Failed;
                        updated.error_message = Some(err.to_string());
                        updated.completed_at = Some(now);
                        Ok(updated)
                    })
                    .await?;
                self.events.publish(WorkflowEvent::ReactivationRejected {
                    task_id,
                    reason: err.to_string(),
                    at: now,
                });
                Err(GateRejection::RunCreationFailed(err.to_string()))
            }
        }
    }

    /// §4.3 step 5 success path: reset the failure counter, start a fresh
    /// normal-rung cooldown, release the lock, and fold the trigger text into
    /// the Task description.
    async fn commit(
        &self,
        task_id: TaskId,
        locked_task: &Task,
        run: &Run,
        trigger_text: Option<&str>,
        now: DateTime<Utc>,
    ) -> reactor_core::Result<Task> {
        self.stores
            .cas_task(task_id, |task| {
                let mut updated = task.clone();
                updated.is_locked = false;
                updated.locked_by = None;
                updated.lock_acquired_at = None;
                updated.failed_reactivation_attempts = 0;
                updated.cooldown_until = Some(now + chrono::Duration::from_std(self.config.cooldown.normal).unwrap_or_default());
                updated.reactivation_count = locked_task.reactivation_count + 1;
                updated.last_run_id = Some(run.run_id);
                updated.internal_status = InternalStatus::Processing;
                if let Some(text) = trigger_text {
                    updated.description =
                        enrich_description(&task.description, text, now, self.config.max_update_history);
                }
                updated.updated_at = now;
                Ok(updated)
            })
            .await
    }

    /// §4.3 step 5 failure path: increment the failure counter, escalate the
    /// cooldown rung, release the lock.
    async fn rollback(&self, task_id: TaskId, now: DateTime<Utc>) -> reactor_core::Result<Task> {
        let ladder = self.config.cooldown;
        self.stores
            .cas_task(task_id, |task| {
                let mut updated = task.clone();
                updated.is_locked = false;
                updated.locked_by = None;
                updated.lock_acquired_at = None;
                updated.failed_reactivation_attempts += 1;
                let rung = ladder.duration_for(updated.failed_reactivation_attempts);
                updated.cooldown_until = Some(now + chrono::Duration::from_std(rung).unwrap_or_default());
                updated.updated_at = now;
                Ok(updated)
            })
            .await
    }

    /// Operator sweep (§4.3): forcibly reclaims any lock older than
    /// `lock_max_age`, regardless of which process holds it.
    pub async fn reclaim_stale_locks(&self, now: DateTime<Utc>) -> reactor_core::Result<Vec<TaskId>> {
        let stale: Vec<TaskId> = self
            .stores
            .tasks
            .filter(|t| {
                t.is_locked
                    && t.lock_acquired_at
                        .map(|acquired| now - acquired > chrono::Duration::from_std(self.config.lock_max_age).unwrap_or_default())
                        .unwrap_or(false)
            })
            .await
            .into_iter()
            .map(|t| t.task_id)
            .collect();

        for task_id in &stale {
            self.stores
                .cas_task(*task_id, |task| {
                    let mut updated = task.clone();
                    updated.is_locked = false;
                    updated.locked_by = None;
                    updated.lock_acquired_at = None;
                    Ok(updated)
                })
                .await?;
        }
        Ok(stale)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reactor_types::InternalStatus as Status;
    use serde_json::json;

    async fn gate_with_task(status: Status) -> (ReactivationGate, Arc<Stores>, TaskId, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let stores = Stores::open(dir.path()).await.unwrap();
        let config = Arc::new(ReactorConfig::from_env().unwrap());
        let task_id = stores.alloc_task_id();
        let mut task = Task::new(
            task_id,
            "item-1".into(),
            "Add health endpoint".into(),
            "desc".into(),
            "https://git.example/org/repo".into(),
            None,
            Utc::now(),
        );
        task.internal_status = status;
        stores.tasks.insert(task_id, task).await.unwrap();
        let gate = ReactivationGate::new(
            stores.clone(),
            EventBus::new(),
            CancellationRegistry::new(),
            config,
            RunQueue::new(16),
        );
        (gate, stores, task_id, dir)
    }

    #[tokio::test]
    async fn rejects_when_not_reactivatable() {
        let (gate, _stores, task_id, _dir) = gate_with_task(Status::Pending).await;
        let trigger = RunTrigger::initial(json!({}), None);
        let outcome = gate.attempt(task_id, TriggerType::Update, trigger, Utc::now()).await;
        assert_eq!(outcome.err(), Some(GateRejection::NotReactivatable));
    }

    #[tokio::test]
    async fn succeeds_and_sets_cooldown() {
        let (gate, stores, task_id, _dir) = gate_with_task(Status::Completed).await;
        let trigger = RunTrigger::initial(json!({"text": "please add metrics"}), None);
        let outcome = gate
            .attempt(task_id, TriggerType::Update, trigger, Utc::now())
            .await
            .unwrap();
        assert_eq!(outcome.run.task_id, task_id);
        let task = stores.tasks.get(&task_id).await.unwrap();
        assert!(!task.is_locked);
        assert!(task.cooldown_until.is_some());
        assert_eq!(task.failed_reactivation_attempts, 0);
    }

    #[tokio::test]
    async fn second_concurrent_attempt_finds_it_locked_or_on_cooldown() {
        let (gate, _stores, task_id, _dir) = gate_with_task(Status::Completed).await;
        let now = Utc::now();
        let first = gate
            .attempt(task_id, TriggerType::Update, RunTrigger::initial(json!({}), None), now)
            .await;
        assert!(first.is_ok());
        let second = gate
            .attempt(task_id, TriggerType::Update, RunTrigger::initial(json!({}), None), now)
            .await;
        assert_eq!(second.err(), Some(GateRejection::CooldownActive { remaining_secs: 15 }));
    }

    /// §8 scenario 4 ("Cooldown block"): the blocked second attempt still
    /// leaves a `ReactivationRecord(status=failed)` behind, not nothing.
    #[tokio::test]
    async fn cooldown_block_is_recorded_as_a_failed_reactivation() {
        let (gate, stores, task_id, _dir) = gate_with_task(Status::Completed).await;
        let now = Utc::now();
        gate.attempt(task_id, TriggerType::Update, RunTrigger::initial(json!({}), None), now)
            .await
            .unwrap();
        let before = stores.reactivations.list().await.len();
        let second = gate
            .attempt(task_id, TriggerType::Update, RunTrigger::initial(json!({}), None), now)
            .await;
        assert!(second.is_err());
        let records = stores.reactivations.list().await;
        assert_eq!(records.len(), before + 1);
        let blocked = records
            .iter()
            .find(|r| r.status == reactor_types::ReactivationStatus::Failed)
            .expect("a failed reactivation record for the blocked attempt");
        assert_eq!(blocked.task_id, task_id);
        assert!(blocked.error_message.is_some());
    }
}
