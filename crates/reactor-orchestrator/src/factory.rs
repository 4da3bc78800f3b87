//! Run Factory (§4.4): atomically creates a new `Run`, cancels any
//! still-active Run of the same Task, and enriches the Task description with
//! the triggering update.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use reactor_core::{CancellationRegistry, EventBus, ReactorConfig, Result, Stores};
use reactor_types::{Run, RunId, RunStatus, Task, WorkflowEvent};
use serde_json::Value;

use crate::branch::{self, BranchResolutionInput};

/// What triggered this Run: either the original ticket creation or a
/// reactivating update/manual/automatic trigger (§3 "TriggerType").
#[derive(Debug, Clone)]
pub struct RunTrigger {
    pub is_reactivation: bool,
    pub trigger_text: Option<String>,
    pub event_base_branch: Option<String>,
    pub rejection_instructions: Option<String>,
    pub raw_payload: Value,
}

impl RunTrigger {
    pub fn initial(raw_payload: Value, event_base_branch: Option<String>) -> Self {
        Self {
            is_reactivation: false,
            trigger_text: None,
            event_base_branch,
            rejection_instructions: None,
            raw_payload,
        }
    }
}

pub struct RunFactory {
    stores: Arc<Stores>,
    events: EventBus,
    cancellation: CancellationRegistry,
    config: Arc<ReactorConfig>,
}

impl RunFactory {
    pub fn new(
        stores: Arc<Stores>,
        events: EventBus,
        cancellation: CancellationRegistry,
        config: Arc<ReactorConfig>,
    ) -> Self {
        Self {
            stores,
            events,
            cancellation,
            config,
        }
    }

    /// Cancels the Task's currently-active Run, if any: sends a revoke
    /// signal to every id in `active_worker_ids`, clears them, and
    /// transitions the Run to `cancelled` unless it is already terminal
    /// (§4.4: "the prior Run's still-active workers are marked cancelled").
    async fn cancel_active_run(&self, task_id: reactor_types::TaskId) -> Result<()> {
        let Some(active) = self.stores.active_run_for_task(task_id).await else {
            return Ok(());
        };
        self.cancellation.cancel(active.run_id).await;
        let cancelled = self
            .stores
            .cas_run(active.run_id, |run| {
                let mut updated = run.clone();
                if !updated.status.is_terminal() {
                    updated.status = RunStatus::Cancelled;
                    updated.completed_at = Some(Utc::now());
                }
                updated.active_worker_ids.clear();
                Ok(updated)
            })
            .await?;
        self.events.publish(WorkflowEvent::RunTerminal {
            task_id,
            run_id: cancelled.run_id,
            status: "cancelled".to_string(),
            at: Utc::now(),
        });
        Ok(())
    }

    /// Creates a fresh Run for `task`, off a newly-resolved base branch — the
    /// new Run is never a continuation of a cancelled Run's branch (§4.4).
    pub async fn create_run(&self, task: &Task, trigger: &RunTrigger, now: DateTime<Utc>) -> Result<Run> {
        self.cancel_active_run(task.task_id).await?;

        let run_number = self.stores.next_run_number(task.task_id).await;
        let run_id = self.stores.alloc_run_id();

        let repo_override = self.config.repo_base_branches.get(&task.repository_url).map(String::as_str);
        let resolution = BranchResolutionInput {
            event_base_branch: trigger.event_base_branch.as_deref(),
            repo_override,
            title: &task.title,
            description: &task.description,
            priority: task.priority.as_deref(),
            trigger_text: trigger.trigger_text.as_deref(),
            global_default: &self.config.default_base_branch,
        };
        let base_branch = branch::resolve_base_branch(&resolution);
        let branch_name = format!("reactor/task-{}-run-{run_number}", task.task_id.0);

        let run = Run {
            run_id,
            task_id: task.task_id,
            run_number,
            status: RunStatus::Started,
            is_reactivation: trigger.is_reactivation,
            reactivation_count: if trigger.is_reactivation { task.reactivation_count + 1 } else { 0 },
            parent_run_id: if trigger.is_reactivation { task.last_run_id } else { None },
            base_branch,
            branch_name,
            rejection_instructions: trigger.rejection_instructions.clone(),
            started_at: now,
            completed_at: None,
            active_worker_ids: Default::default(),
            last_worker_id: None,
            current_node: None,
        };

        self.stores.runs.insert(run_id, run.clone()).await?;
        self.events.publish(WorkflowEvent::RunCreated {
            task_id: task.task_id,
            run_id,
            run_number,
            is_reactivation: run.is_reactivation,
            at: now,
        });
        Ok(run)
    }
}

/// Appends the triggering update to `current` under a timestamped "UPDATES"
/// section, capped to the last `max_entries`. Never shrinks an already
/// enriched description (§4.4: "If the new description is strictly shorter
/// than the existing one, do not overwrite").
pub fn enrich_description(current: &str, update_text: &str, now: DateTime<Utc>, max_entries: usize) -> String {
    const MARKER: &str = "## UPDATES";
    let (body, mut entries) = match current.split_once(MARKER) {
        Some((body, rest)) => (
            body.trim_end().to_string(),
            rest.lines().filter(|l| !l.trim().is_empty()).map(str::to_string).collect::<Vec<_>>(),
        ),
        None => (current.to_string(), Vec::new()),
    };

    let stamp = now.format("%Y-%m-%d %H:%M:%SZ");
    entries.push(format!("- [{stamp}] {}", update_text.trim()));
    if entries.len() > max_entries {
        let drop = entries.len() - max_entries;
        entries.drain(0..drop);
    }

    let mut candidate = body;
    candidate.push_str("\n\n");
    candidate.push_str(MARKER);
    candidate.push('\n');
    candidate.push_str(&entries.join("\n"));

    if candidate.len() < current.len() {
        return current.to_string();
    }
    candidate
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enrichment_appends_under_updates_marker() {
        let enriched = enrich_description("Add a health endpoint.", "also add metrics", Utc::now(), 4);
        assert!(enriched.contains("## UPDATES"));
        assert!(enriched.contains("also add metrics"));
    }

    #[test]
    fn enrichment_caps_history_length() {
        let mut description = "Body.".to_string();
        for i in 0..10 {
            description = enrich_description(&description, &format!("update {i}"), Utc::now(), 4);
        }
        let entry_count = description.lines().filter(|l| l.trim_start().starts_with('-')).count();
        assert_eq!(entry_count, 4);
        assert!(description.contains("update 9"));
        assert!(!description.contains("update 0"));
    }

    #[test]
    fn enrichment_never_shrinks_description() {
        let mut rich = "Body.".to_string();
        for _ in 0..4 {
            rich = enrich_description(&rich, &"a very long requirement line ".repeat(3), Utc::now(), 4);
        }
        let candidate = enrich_description(&rich, "x", Utc::now(), 4);
        assert_eq!(candidate, rich);
    }
}
