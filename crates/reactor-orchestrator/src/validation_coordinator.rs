//! Validation Coordinator (§4.6): turns a human reply into one of
//! {approve, reject-with-instructions, abandon} within a bounded time, and
//! owns the `ValidationRequest` deadline the suspended Run itself does not
//! track.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reactor_adapters::{MessagingClient, TicketSystemClient};
use reactor_core::{EventBus, ReactorConfig, ReactorError, Result, RunEntryPoint, RunQueue, Stores};
use reactor_types::{
    Intent, IntentDecision, RunId, RunStatus, Task, TriggerType, ValidationId, ValidationRequest,
    ValidationStatus, WorkflowEvent,
};

use crate::factory::RunTrigger;
use crate::gate::ReactivationGate;

const COMMENT_CLASSIFICATION_MEDIUM: f64 = 0.5;

#[derive(Debug)]
pub enum ValidationOutcome {
    Approved,
    Rejected { reactivated: bool, reason: Option<String> },
    Abandoned,
    RemainsPending,
    TimedOut,
}

pub struct ValidationCoordinator {
    stores: Arc<Stores>,
    events: EventBus,
    config: Arc<ReactorConfig>,
    gate: Arc<ReactivationGate>,
    queue: RunQueue,
    ticket: Option<Arc<dyn TicketSystemClient>>,
    messaging: Option<Arc<dyn MessagingClient>>,
}

impl ValidationCoordinator {
    pub fn new(
        stores: Arc<Stores>,
        events: EventBus,
        config: Arc<ReactorConfig>,
        gate: Arc<ReactivationGate>,
        queue: RunQueue,
        ticket: Option<Arc<dyn TicketSystemClient>>,
        messaging: Option<Arc<dyn MessagingClient>>,
    ) -> Self {
        Self {
            stores,
            events,
            config,
            gate,
            queue,
            ticket,
            messaging,
        }
    }

    /// Opens a `ValidationRequest` for a Run that just suspended at the
    /// `validation` node (§4.6 "On entry").
    pub async fn open(
        &self,
        run_id: RunId,
        task: &Task,
        analysis_confidence: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<ValidationRequest> {
        let validation_id = self.stores.alloc_validation_id();
        let mut request = ValidationRequest::new(
            validation_id,
            run_id,
            task.task_id,
            now,
            chrono::Duration::from_std(self.config.validation_timeout_question).unwrap_or_default(),
        );
        request.analysis_confidence = analysis_confidence;
        self.stores.validations.insert(validation_id, request.clone()).await?;

        self.events.publish(WorkflowEvent::RunSuspended {
            run_id,
            validation_id,
            at: now,
        });

        if let Some(ticket) = &self.ticket {
            let _ = ticket
                .add_comment(&task.external_item_id, "Awaiting validation of this change.")
                .await;
        }

        Ok(request)
    }

    /// Resolves a pending `ValidationRequest` from the Intent Analyzer's
    /// verdict on a new comment (§4.6).
    pub async fn resolve(
        &self,
        run_id: RunId,
        decision: IntentDecision,
        now: DateTime<Utc>,
    ) -> Result<ValidationOutcome> {
        // Matches `Pending` or `TimedOut`: §4.6 keeps a timed-out request
        // resolvable by a later reply, so this must not be narrower than
        // the check the Event Router used to route the comment here.
        let Some(pending) = self.stores.resolvable_validation_for_run(run_id).await else {
            return Err(ReactorError::not_found(format!("no pending validation for run {run_id}")));
        };

        match decision.decision {
            Intent::Approve if decision.confidence >= COMMENT_CLASSIFICATION_MEDIUM => {
                self.transition(pending.validation_id, ValidationStatus::Approved, None, now).await?;
                // A worker dequeuing this re-enters via `WorkflowDriver::resume_at_merge`,
                // which itself CASes the Run back to `running` at the `validation` node
                // before driving `merge` onward. A full queue must surface as an
                // error (§5 "503 with Retry-After"), not a warn-and-drop, since the
                // approval is already recorded and won't be re-asked for.
                self.queue.enqueue(run_id, RunEntryPoint::FromMerge)?;
                Ok(ValidationOutcome::Approved)
            }
            Intent::Reject if decision.confidence >= COMMENT_CLASSIFICATION_MEDIUM => {
                self.reject(run_id, &pending, decision.extracted_requirements, now).await
            }
            Intent::Abandon => {
                self.abandon(run_id, &pending, now).await?;
                Ok(ValidationOutcome::Abandoned)
            }
            Intent::Question | Intent::ClarificationNeeded => {
                self.request_clarification(&pending, now).await?;
                Ok(ValidationOutcome::RemainsPending)
            }
            _ => Ok(ValidationOutcome::RemainsPending),
        }
    }

    async fn reject(
        &self,
        run_id: RunId,
        pending: &ValidationRequest,
        extracted_requirements: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ValidationOutcome> {
        self.transition(
            pending.validation_id,
            ValidationStatus::Rejected,
            extracted_requirements.clone(),
            now,
        )
        .await?;

        let run = self
            .stores
            .cas_run(run_id, |run| {
                let mut updated = run.clone();
                if !updated.status.is_terminal() {
                    updated.status = RunStatus::Cancelled;
                    updated.completed_at = Some(now);
                }
                Ok(updated)
            })
            .await?;
        self.events.publish(WorkflowEvent::RunTerminal {
            task_id: run.task_id,
            run_id,
            status: "cancelled".to_string(),
            at: now,
        });

        if run.reactivation_count >= self.config.max_reactivations_per_run {
            self.stores
                .cas_task(run.task_id, |task| {
                    let mut updated = task.clone();
                    updated.internal_status = reactor_types::InternalStatus::Abandoned;
                    updated.updated_at = now;
                    Ok(updated)
                })
                .await?;
            self.events.publish(WorkflowEvent::ReactivationRejected {
                task_id: run.task_id,
                reason: "max_reactivations_per_run_exceeded".to_string(),
                at: now,
            });
            return Ok(ValidationOutcome::Rejected {
                reactivated: false,
                reason: Some("max_reactivations_per_run_exceeded".to_string()),
            });
        }

        let trigger = RunTrigger {
            is_reactivation: true,
            trigger_text: extracted_requirements.clone(),
            event_base_branch: None,
            rejection_instructions: extracted_requirements,
            raw_payload: serde_json::json!({"source": "validation_rejection", "run_id": run_id.0}),
        };
        match self.gate.attempt(run.task_id, TriggerType::Update, trigger, now).await {
            // The replacement Run is already persisted; a full queue must
            // still surface as an error (§5) rather than a successful
            // "reactivated" outcome the caller would otherwise believe.
            Ok(outcome) if !outcome.enqueued => Err(ReactorError::QueueFull),
            Ok(_outcome) => Ok(ValidationOutcome::Rejected { reactivated: true, reason: None }),
            Err(rejection) => Ok(ValidationOutcome::Rejected {
                reactivated: false,
                reason: Some(rejection.to_string()),
            }),
        }
    }

    async fn abandon(&self, run_id: RunId, pending: &ValidationRequest, now: DateTime<Utc>) -> Result<()> {
        self.transition(pending.validation_id, ValidationStatus::Abandoned, None, now).await?;
        let run = self
            .stores
            .cas_run(run_id, |run| {
                let mut updated = run.clone();
                updated.status = RunStatus::Cancelled;
                updated.completed_at = Some(now);
                Ok(updated)
            })
            .await?;
        self.stores
            .cas_task(run.task_id, |task| {
                let mut updated = task.clone();
                updated.internal_status = reactor_types::InternalStatus::Abandoned;
                updated.updated_at = now;
                Ok(updated)
            })
            .await?;
        self.events.publish(WorkflowEvent::RunTerminal {
            task_id: run.task_id,
            run_id,
            status: "cancelled".to_string(),
            at: now,
        });
        Ok(())
    }

    /// Posts a clarification prompt at most once per request (§4.6).
    async fn request_clarification(&self, pending: &ValidationRequest, now: DateTime<Utc>) -> Result<()> {
        if pending.clarification_requested {
            return Ok(());
        }
        self.stores
            .cas_validation(pending.validation_id, |v| {
                let mut updated = v.clone();
                updated.clarification_requested = true;
                Ok(updated)
            })
            .await?;
        if let Some(ticket) = &self.ticket {
            if let Some(task) = self.stores.tasks.get(&pending.task_id).await {
                let _ = ticket
                    .add_comment(&task.external_item_id, "Could you clarify your reply?")
                    .await;
            }
        }
        let _ = now;
        Ok(())
    }

    /// Transitions an expired `ValidationRequest` to `timed_out` and notifies
    /// the requester, leaving the Run in `validation_pending` so a later
    /// reply can still resolve it (§4.6).
    pub async fn handle_timeout(&self, validation_id: ValidationId, now: DateTime<Utc>) -> Result<bool> {
        let Some(current) = self.stores.validations.get(&validation_id).await else {
            return Ok(false);
        };
        if current.status != ValidationStatus::Pending || !current.is_expired(now) {
            return Ok(false);
        }

        self.stores
            .cas_validation(validation_id, |v| {
                let mut updated = v.clone();
                updated.status = ValidationStatus::TimedOut;
                updated.timeout_notified = true;
                Ok(updated)
            })
            .await?;

        self.events.publish(WorkflowEvent::ValidationResolved {
            validation_id,
            run_id: current.run_id,
            status: "timed_out".to_string(),
            at: now,
        });

        if let (Some(messaging), Some(task)) = (&self.messaging, self.stores.tasks.get(&current.task_id).await) {
            if let Some(run) = self.stores.runs.get(&current.run_id).await {
                let text = reactor_adapters::render_timeout_template(&task.title, run.run_number);
                let _ = self.notify_user(messaging.as_ref(), &task, &text).await;
            }
        }

        Ok(true)
    }

    async fn notify_user(
        &self,
        messaging: &dyn MessagingClient,
        task: &Task,
        text: &str,
    ) -> std::result::Result<(), reactor_adapters::MessagingError> {
        let email = format!("owner+{}@example.invalid", task.task_id);
        let user_id = messaging.lookup_user_by_email(&email).await?;
        let channel = messaging.open_direct_channel(&user_id).await?;
        messaging.post_message(&channel, text, None).await
    }

    async fn transition(
        &self,
        validation_id: ValidationId,
        status: ValidationStatus,
        rejection_instructions: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<ValidationRequest> {
        let updated = self
            .stores
            .cas_validation(validation_id, |v| {
                let mut updated = v.clone();
                updated.status = status;
                if rejection_instructions.is_some() {
                    updated.rejection_instructions = rejection_instructions.clone();
                }
                Ok(updated)
            })
            .await?;
        self.events.publish(WorkflowEvent::ValidationResolved {
            validation_id,
            run_id: updated.run_id,
            status: format!("{status:?}").to_lowercase(),
            at: now,
        });
        Ok(updated)
    }
}
