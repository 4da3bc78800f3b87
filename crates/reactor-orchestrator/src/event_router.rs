//! Event Classifier & Intent Analyzer entrypoint (§4.2): given an
//! `IntakeEvent` already past signature verification and dedup, decide
//! whether to create a new Task+Run, reactivate an existing Task, resolve a
//! pending validation, or ignore the event outright.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reactor_adapters::TicketSystemClient;
use reactor_core::{EventBus, ReactorConfig, Result, RunEntryPoint, RunQueue, Stores};
use reactor_intent::{analyze_update, classify_comment, CommentContext, ReactivationCache};
use reactor_providers::LLMClient;
use reactor_types::{IntakeEvent, IntakeEventKind, RunId, Task, TaskId, TriggerType};

use crate::factory::{RunFactory, RunTrigger};
use crate::gate::ReactivationGate;
use crate::validation_coordinator::{ValidationCoordinator, ValidationOutcome};

#[derive(Debug)]
pub enum RoutedOutcome {
    TaskCreated { task_id: TaskId, run_id: RunId },
    TaskAlreadyExists { task_id: TaskId },
    Reactivated { task_id: TaskId, run_id: RunId },
    ReactivationRejected { task_id: TaskId, reason: String },
    ValidationResolved(ValidationOutcome),
    Ignored { reason: String },
}

pub struct EventRouter {
    stores: Arc<Stores>,
    factory: RunFactory,
    gate: Arc<ReactivationGate>,
    validation: Arc<ValidationCoordinator>,
    queue: RunQueue,
    ticket: Option<Arc<dyn TicketSystemClient>>,
    llm: Option<Arc<dyn LLMClient>>,
    reactivation_cache: ReactivationCache,
}

impl EventRouter {
    pub fn new(
        stores: Arc<Stores>,
        events: EventBus,
        cancellation: reactor_core::CancellationRegistry,
        config: Arc<ReactorConfig>,
        gate: Arc<ReactivationGate>,
        validation: Arc<ValidationCoordinator>,
        queue: RunQueue,
        ticket: Option<Arc<dyn TicketSystemClient>>,
        llm: Option<Arc<dyn LLMClient>>,
    ) -> Self {
        let factory = RunFactory::new(stores.clone(), events, cancellation, config);
        Self {
            stores,
            factory,
            gate,
            validation,
            queue,
            ticket,
            llm,
            reactivation_cache: ReactivationCache::new(),
        }
    }

    /// Resolves `event.item_id` against the Task store if the intake layer
    /// did not already carry a `task_id`, then dispatches by kind.
    pub async fn route(&self, mut event: IntakeEvent, now: DateTime<Utc>) -> Result<RoutedOutcome> {
        if event.task_id.is_none() {
            if let Some(existing) = self.stores.find_task_by_external_id(&event.item_id).await {
                event.task_id = Some(existing.task_id);
            }
        }

        match event.kind {
            IntakeEventKind::TaskCreate => self.handle_create(&event, now).await,
            IntakeEventKind::ItemUpdate | IntakeEventKind::TaskStatusChange | IntakeEventKind::ColumnValueChange => {
                match event.task_id {
                    Some(task_id) => self.handle_update(task_id, &event, now).await,
                    None => Ok(RoutedOutcome::Ignored {
                        reason: "no task found for this item".to_string(),
                    }),
                }
            }
        }
    }

    /// Testable property #8: creating a Task from the same ticket twice
    /// yields the same `task_id` and spawns no second Run.
    async fn handle_create(&self, event: &IntakeEvent, now: DateTime<Utc>) -> Result<RoutedOutcome> {
        if let Some(existing) = self.stores.find_task_by_external_id(&event.item_id).await {
            return Ok(RoutedOutcome::TaskAlreadyExists { task_id: existing.task_id });
        }

        let (title, description, repository_url, base_branch) = self.resolve_item_details(event).await;

        let task_id = self.stores.alloc_task_id();
        let task = Task::new(task_id, event.item_id.clone(), title, description, repository_url, None, now);
        self.stores.tasks.insert(task_id, task.clone()).await?;

        let trigger = RunTrigger::initial(
            serde_json::json!({"source": "task_create", "item_id": event.item_id}),
            base_branch,
        );
        let run = self.factory.create_run(&task, &trigger, now).await?;
        // The Task and Run are already persisted at this point; a full
        // queue still has to surface as an error (§5 "503 with
        // Retry-After"), not a warn-and-drop, or the caller is told
        // "processed" about a Run that will never run.
        self.queue.enqueue(run.run_id, RunEntryPoint::FromStart)?;
        Ok(RoutedOutcome::TaskCreated { task_id, run_id: run.run_id })
    }

    /// Item details come from the ticket system's full record, not the
    /// webhook body, since creation payloads are typically sparse. Falls
    /// back to the event's own text when no ticket client is configured or
    /// the lookup fails.
    async fn resolve_item_details(&self, event: &IntakeEvent) -> (String, String, String, Option<String>) {
        if let Some(ticket) = &self.ticket {
            match ticket.get_item_info(&event.item_id).await {
                Ok(info) => {
                    return (
                        info.name,
                        info.description,
                        info.repository_url.unwrap_or_default(),
                        info.base_branch,
                    );
                }
                Err(err) => {
                    tracing::warn!(item_id = %event.item_id, error = %err, "item lookup failed, falling back to event text");
                }
            }
        }
        (
            event.item_id.clone(),
            event.text.clone().unwrap_or_default(),
            String::new(),
            None,
        )
    }

    async fn handle_update(&self, task_id: TaskId, event: &IntakeEvent, now: DateTime<Utc>) -> Result<RoutedOutcome> {
        let Some(task) = self.stores.tasks.get(&task_id).await else {
            return Ok(RoutedOutcome::Ignored {
                reason: "task not found".to_string(),
            });
        };

        if let Some(active_run) = self.stores.active_run_for_task(task_id).await {
            if self.stores.resolvable_validation_for_run(active_run.run_id).await.is_some() {
                let Some(text) = &event.text else {
                    return Ok(RoutedOutcome::Ignored {
                        reason: "no text to classify against a pending validation".to_string(),
                    });
                };
                let ctx = CommentContext {
                    urgent: task.priority.as_deref() == Some("urgent"),
                    prior_rejections: task.failed_reactivation_attempts,
                    ..Default::default()
                };
                let task_context = format!("{}\n{}", task.title, task.description);
                let decision = classify_comment(text, ctx, &task_context, self.llm.as_deref()).await;
                let outcome = self.validation.resolve(active_run.run_id, decision, now).await?;
                return Ok(RoutedOutcome::ValidationResolved(outcome));
            }
        }

        // No pending validation: treat the update as a candidate reactivation
        // trigger. A still-`running` Run does not absorb it — it goes
        // through the gate like any other trigger, which will reject it
        // while the Task is mid-flight and accept it once the Task reaches
        // a reactivatable state (completed/failed/quality_check).
        let Some(text) = &event.text else {
            return Ok(RoutedOutcome::Ignored {
                reason: "no text to analyze".to_string(),
            });
        };
        if self.reactivation_cache.is_repeat(task_id, text).await {
            return Ok(RoutedOutcome::Ignored {
                reason: "repeat of a recently-seen update".to_string(),
            });
        }

        let analysis = analyze_update(text);
        if !analysis.requires_reactivation {
            return Ok(RoutedOutcome::Ignored { reason: analysis.reasoning });
        }

        let trigger_type = if event.triggerer_id.is_some() {
            TriggerType::Update
        } else {
            TriggerType::Automatic
        };
        let trigger = RunTrigger {
            is_reactivation: true,
            trigger_text: analysis.extracted_requirements.clone(),
            event_base_branch: None,
            rejection_instructions: None,
            raw_payload: serde_json::json!({"source": "item_update", "item_id": event.item_id}),
        };
        match self.gate.attempt(task_id, trigger_type, trigger, now).await {
            // The Run is already persisted at this point; a full queue must
            // still reach the caller as an error (§5 "503 with
            // Retry-After"), not as a successful `Reactivated`.
            Ok(outcome) if !outcome.enqueued => Err(reactor_core::ReactorError::QueueFull),
            Ok(outcome) => Ok(RoutedOutcome::Reactivated {
                task_id,
                run_id: outcome.run.run_id,
            }),
            Err(rejection) => Ok(RoutedOutcome::ReactivationRejected {
                task_id,
                reason: rejection.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reactor_core::CancellationRegistry;
    use reactor_types::InternalStatus;

    async fn router() -> (EventRouter, Arc<Stores>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let stores = Stores::open(dir.path()).await.unwrap();
        let config = Arc::new(ReactorConfig::from_env().unwrap());
        let events = EventBus::new();
        let cancellation = CancellationRegistry::new();
        let queue = RunQueue::new(64);
        let gate = Arc::new(ReactivationGate::new(
            stores.clone(),
            events.clone(),
            cancellation.clone(),
            config.clone(),
            queue.clone(),
        ));
        let validation = Arc::new(ValidationCoordinator::new(
            stores.clone(),
            events.clone(),
            config.clone(),
            gate.clone(),
            queue.clone(),
            None,
            None,
        ));
        let router = EventRouter::new(
            stores.clone(),
            events,
            cancellation,
            config,
            gate,
            validation,
            queue,
            None,
            None,
        );
        (router, stores, dir)
    }

    #[tokio::test]
    async fn creating_the_same_item_twice_is_idempotent() {
        let (router, stores, _dir) = router().await;
        let event = IntakeEvent {
            task_id: None,
            item_id: "item-42".into(),
            kind: IntakeEventKind::TaskCreate,
            text: Some("Add a health endpoint".into()),
            column: None,
            new_value: None,
            triggerer_id: Some("user-1".into()),
        };
        let first = router.route(event.clone(), Utc::now()).await.unwrap();
        let first_id = match first {
            RoutedOutcome::TaskCreated { task_id, .. } => task_id,
            other => panic!("expected TaskCreated, got {other:?}"),
        };
        let second = router.route(event, Utc::now()).await.unwrap();
        match second {
            RoutedOutcome::TaskAlreadyExists { task_id } => assert_eq!(task_id, first_id),
            other => panic!("expected TaskAlreadyExists, got {other:?}"),
        }
        assert_eq!(stores.runs_for_task(first_id).await.len(), 1);
    }

    #[tokio::test]
    async fn update_with_no_reactivation_signal_is_ignored() {
        let (router, stores, _dir) = router().await;
        let task_id = stores.alloc_task_id();
        let mut task = Task::new(task_id, "item-7".into(), "t".into(), "d".into(), "r".into(), None, Utc::now());
        task.internal_status = InternalStatus::Completed;
        stores.tasks.insert(task_id, task).await.unwrap();

        let event = IntakeEvent {
            task_id: Some(task_id),
            item_id: "item-7".into(),
            kind: IntakeEventKind::ItemUpdate,
            text: Some("ok".into()),
            column: None,
            new_value: None,
            triggerer_id: Some("user-1".into()),
        };
        let outcome = router.route(event, Utc::now()).await.unwrap();
        assert!(matches!(outcome, RoutedOutcome::Ignored { .. }));
    }

    #[tokio::test]
    async fn update_with_explicit_request_reactivates_a_completed_task() {
        let (router, stores, _dir) = router().await;
        let task_id = stores.alloc_task_id();
        let mut task = Task::new(task_id, "item-9".into(), "t".into(), "d".into(), "r".into(), None, Utc::now());
        task.internal_status = InternalStatus::Completed;
        stores.tasks.insert(task_id, task).await.unwrap();

        let event = IntakeEvent {
            task_id: Some(task_id),
            item_id: "item-9".into(),
            kind: IntakeEventKind::ItemUpdate,
            text: Some("Please also add Prometheus metrics to this endpoint".into()),
            column: None,
            new_value: None,
            triggerer_id: Some("user-1".into()),
        };
        let outcome = router.route(event, Utc::now()).await.unwrap();
        assert!(matches!(outcome, RoutedOutcome::Reactivated { .. }));
    }

    /// §4.6 timeout behaviour + §8 scenario 6: a validation that already
    /// timed out still resolves on a later reply instead of being treated
    /// as a brand-new reactivation trigger.
    #[tokio::test]
    async fn late_reply_after_timeout_still_resolves_the_validation() {
        use reactor_types::{Run, RunStatus, ValidationRequest, ValidationStatus};

        let (router, stores, _dir) = router().await;
        let task_id = stores.alloc_task_id();
        let mut task = Task::new(task_id, "item-55".into(), "t".into(), "d".into(), "r".into(), None, Utc::now());
        task.internal_status = InternalStatus::QualityCheck;
        stores.tasks.insert(task_id, task).await.unwrap();

        let run_id = stores.alloc_run_id();
        let run = Run {
            run_id,
            task_id,
            run_number: 1,
            status: RunStatus::ValidationPending,
            is_reactivation: false,
            reactivation_count: 0,
            parent_run_id: None,
            base_branch: "main".into(),
            branch_name: "reactor/task-55-run-1".into(),
            rejection_instructions: None,
            started_at: Utc::now(),
            completed_at: None,
            active_worker_ids: Default::default(),
            last_worker_id: None,
            current_node: Some(reactor_types::NodeName::Validation),
        };
        stores.runs.insert(run_id, run).await.unwrap();

        let validation_id = stores.alloc_validation_id();
        let mut validation = ValidationRequest::new(validation_id, run_id, task_id, Utc::now(), chrono::Duration::hours(1));
        validation.status = ValidationStatus::TimedOut;
        validation.timeout_notified = true;
        stores.validations.insert(validation_id, validation).await.unwrap();

        let event = IntakeEvent {
            task_id: Some(task_id),
            item_id: "item-55".into(),
            kind: IntakeEventKind::ItemUpdate,
            text: Some("oui, approuvé, merci".into()),
            column: None,
            new_value: None,
            triggerer_id: Some("user-1".into()),
        };
        let outcome = router.route(event, Utc::now()).await.unwrap();
        match outcome {
            RoutedOutcome::ValidationResolved(ValidationOutcome::Approved) => {}
            other => panic!("expected a resolved approval, got {other:?}"),
        }
        let validation = stores.validations.get(&validation_id).await.unwrap();
        assert_eq!(validation.status, ValidationStatus::Approved);
    }
}
