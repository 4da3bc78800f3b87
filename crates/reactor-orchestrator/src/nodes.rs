//! Concrete `StepNode` implementations (§4.5, §1). `prepare`/`analyze`/
//! `implement`/`test`/`qa` are treated as an external black box;
//! [`LlmDelegateNode`] is the thinnest implementation of
//! that contract that still drives a Run end-to-end in a single-process
//! deployment, handing the node's purpose to the configured [`LLMClient`]
//! rather than leaving it unimplemented. `finalize`, `validation`, `merge`,
//! and `update` are in this system's scope: `finalize` is a deterministic
//! aggregation step, `validation` always suspends (the Validation
//! Coordinator owns the deadline), and `merge`/`update` call the
//! source-hosting and ticket/messaging adapters directly.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use reactor_adapters::{MessagingClient, SourceHostingClient, TicketSystemClient};
use reactor_providers::{CompletionRequest, LLMClient, PricingTable};
use reactor_types::{AIUsageRecord, NodeName, StepId};
use serde_json::json;

use crate::model::{RunContext, StepNode, StepOutcome, StepResult};

/// System prompts for the five black-box AI nodes (§4.5 node order). The
/// prompt text only shapes what the delegate sends; the actual analysis,
/// code generation, and test execution stay out of scope (§1).
pub const PREPARE_PROMPT: &str =
    "Prepare the repository for this task: resolve the working branch and summarize the surrounding code.";
pub const ANALYZE_PROMPT: &str = "Analyze the task description and produce an implementation plan.";
pub const IMPLEMENT_PROMPT: &str = "Implement the plan as a set of file changes.";
pub const TEST_PROMPT: &str = "Run the test suite against the implemented changes and report pass/fail.";
pub const QA_PROMPT: &str = "Review the diff for correctness and regressions before requesting human validation.";

/// A black-box AI workflow node (§1): hands its system prompt plus the
/// Task/Run context to the configured `LLMClient` and records the resulting
/// `AIUsageRecord`. With no provider configured it completes as a no-op so a
/// Run can still be driven end-to-end (mirrors §4.2.1's "only if ... an LLM
/// is configured" fallback for the intent analyzer).
pub struct LlmDelegateNode {
    name: NodeName,
    system_prompt: &'static str,
    llm: Option<Arc<dyn LLMClient>>,
    pricing: Arc<PricingTable>,
}

impl LlmDelegateNode {
    pub fn new(
        name: NodeName,
        system_prompt: &'static str,
        llm: Option<Arc<dyn LLMClient>>,
        pricing: Arc<PricingTable>,
    ) -> Self {
        Self {
            name,
            system_prompt,
            llm,
            pricing,
        }
    }
}

#[async_trait]
impl StepNode for LlmDelegateNode {
    fn name(&self) -> NodeName {
        self.name
    }

    async fn execute(&self, ctx: &RunContext) -> StepResult {
        let start = Instant::now();
        let Some(llm) = &self.llm else {
            return StepResult::completed(None, start.elapsed().as_millis() as u64);
        };

        let prompt = format!(
            "{}\n\nTask: {}\nDescription: {}\nRejection instructions: {}",
            self.system_prompt,
            ctx.task.title,
            ctx.task.description,
            ctx.rejection_instructions.as_deref().unwrap_or("none"),
        );
        let request = CompletionRequest {
            system_prompt: Some(self.system_prompt.to_string()),
            prompt,
            response_schema: None,
            max_tokens: 2048,
        };

        match llm.complete(request).await {
            Ok(response) => {
                let (estimated_cost, warning) = self.pricing.estimate_cost(
                    &response.provider,
                    &response.model,
                    response.input_tokens,
                    response.output_tokens,
                );
                if let Some(warning) = warning {
                    tracing::warn!(
                        provider = %warning.provider,
                        model = %warning.model,
                        "no pricing entry for model, costing this call at 0"
                    );
                }
                // `step_id` is not yet known to the node (only the driver
                // allocates it); the driver overwrites this placeholder
                // before persisting the record.
                let usage = AIUsageRecord {
                    run_id: ctx.run.run_id,
                    step_id: StepId(0),
                    provider: response.provider,
                    model: response.model,
                    operation: node_operation_name(self.name),
                    input_tokens: response.input_tokens,
                    output_tokens: response.output_tokens,
                    estimated_cost,
                    duration_ms: response.duration_ms,
                    success: true,
                    error: None,
                    timestamp: Utc::now(),
                };
                StepResult::completed(Some(json!({"text": response.text})), start.elapsed().as_millis() as u64)
                    .with_usage(vec![usage])
            }
            Err(err) => StepResult::failed(err.to_string(), start.elapsed().as_millis() as u64),
        }
    }
}

fn node_operation_name(name: NodeName) -> String {
    format!("{name:?}").to_lowercase()
}

/// Deterministic aggregation step (§4.5 node order, between `qa` and
/// `validation`): no LLM call, just a checkpoint the driver can always run.
pub struct FinalizeNode;

#[async_trait]
impl StepNode for FinalizeNode {
    fn name(&self) -> NodeName {
        NodeName::Finalize
    }

    async fn execute(&self, _ctx: &RunContext) -> StepResult {
        StepResult::completed(None, 0)
    }
}

/// Always suspends the Run (§4.5 "suspension"): the Validation Coordinator,
/// not this node or the driver, owns the deadline and the eventual
/// approve/reject/abandon transition.
pub struct ValidationNode;

#[async_trait]
impl StepNode for ValidationNode {
    fn name(&self) -> NodeName {
        NodeName::Validation
    }

    async fn execute(&self, _ctx: &RunContext) -> StepResult {
        StepResult::suspended(0)
    }
}

/// Derives an `owner/repo` slug from a repository URL (git or https form)
/// for source-hosting calls that expect the GitHub-shaped `repo` parameter.
fn repo_slug(repository_url: &str) -> String {
    let trimmed = repository_url.trim_end_matches('/').trim_end_matches(".git");
    let parts: Vec<&str> = trimmed.rsplit('/').take(2).collect();
    parts.into_iter().rev().collect::<Vec<_>>().join("/")
}

/// `merge` (§4.5, §7): idempotent — guarded by a prior check for an open PR
/// so a retried or re-driven step never double-merges.
pub struct MergeNode {
    scm: Arc<dyn SourceHostingClient>,
}

impl MergeNode {
    pub fn new(scm: Arc<dyn SourceHostingClient>) -> Self {
        Self { scm }
    }
}

#[async_trait]
impl StepNode for MergeNode {
    fn name(&self) -> NodeName {
        NodeName::Merge
    }

    async fn execute(&self, ctx: &RunContext) -> StepResult {
        let start = Instant::now();
        let repo = repo_slug(&ctx.task.repository_url);

        let existing_pr = match self.scm.find_open_pr_for_branch(&repo, &ctx.run.branch_name).await {
            Ok(pr) => pr,
            Err(err) => return StepResult::failed(err.to_string(), start.elapsed().as_millis() as u64),
        };

        let pr = match existing_pr {
            Some(pr) => pr,
            None => {
                let title = format!("{} (run #{})", ctx.task.title, ctx.run.run_number);
                match self
                    .scm
                    .create_pull_request(&repo, &ctx.run.branch_name, &ctx.run.base_branch, &title, &ctx.task.description)
                    .await
                {
                    Ok(pr) => pr,
                    Err(err) => return StepResult::failed(err.to_string(), start.elapsed().as_millis() as u64),
                }
            }
        };

        if pr.is_merged {
            return StepResult::completed(
                Some(json!({"pr_number": pr.number, "already_merged": true})),
                start.elapsed().as_millis() as u64,
            );
        }

        match self.scm.merge_pull_request(&repo, pr.number).await {
            Ok(()) => {
                StepResult::completed(Some(json!({"pr_number": pr.number})), start.elapsed().as_millis() as u64)
            }
            Err(err) => StepResult::failed(err.to_string(), start.elapsed().as_millis() as u64),
        }
    }
}

/// `update` (§4.5): closes the loop with the ticket system and, best-effort,
/// a DM to the task's owner. Never the control channel (§6 "messaging ...
/// only used for notifications").
pub struct UpdateNode {
    ticket: Option<Arc<dyn TicketSystemClient>>,
    messaging: Option<Arc<dyn MessagingClient>>,
}

impl UpdateNode {
    pub fn new(ticket: Option<Arc<dyn TicketSystemClient>>, messaging: Option<Arc<dyn MessagingClient>>) -> Self {
        Self { ticket, messaging }
    }

    async fn notify(&self, task_id: reactor_types::TaskId, text: &str) {
        let Some(messaging) = &self.messaging else { return };
        let email = format!("owner+{task_id}@example.invalid");
        let Ok(user_id) = messaging.lookup_user_by_email(&email).await else {
            return;
        };
        let Ok(channel) = messaging.open_direct_channel(&user_id).await else {
            return;
        };
        let _ = messaging.post_message(&channel, text, None).await;
    }
}

#[async_trait]
impl StepNode for UpdateNode {
    fn name(&self) -> NodeName {
        NodeName::Update
    }

    async fn execute(&self, ctx: &RunContext) -> StepResult {
        let start = Instant::now();
        if let Some(ticket) = &self.ticket {
            let _ = ticket.update_item_status(&ctx.task.external_item_id, "Done").await;
            let _ = ticket
                .add_comment(
                    &ctx.task.external_item_id,
                    &format!("Run #{} merged and the task is complete.", ctx.run.run_number),
                )
                .await;
        }
        self.notify(
            ctx.task.task_id,
            &format!("\"{}\" (run #{}) merged.", ctx.task.title, ctx.run.run_number),
        )
        .await;
        StepResult::completed(None, start.elapsed().as_millis() as u64)
    }
}

/// Builds the full `NODE_ORDER` set of nodes for a running engine: black-box
/// LLM delegates for `prepare`/`analyze`/`implement`/`test`/`qa`, the
/// deterministic `finalize` and always-suspending `validation`, and the
/// adapter-backed `merge`/`update`.
#[allow(clippy::too_many_arguments)]
pub fn default_nodes(
    llm: Option<Arc<dyn LLMClient>>,
    pricing: Arc<PricingTable>,
    scm: Arc<dyn SourceHostingClient>,
    ticket: Option<Arc<dyn TicketSystemClient>>,
    messaging: Option<Arc<dyn MessagingClient>>,
) -> Vec<Arc<dyn StepNode>> {
    vec![
        Arc::new(LlmDelegateNode::new(NodeName::Prepare, PREPARE_PROMPT, llm.clone(), pricing.clone())),
        Arc::new(LlmDelegateNode::new(NodeName::Analyze, ANALYZE_PROMPT, llm.clone(), pricing.clone())),
        Arc::new(LlmDelegateNode::new(NodeName::Implement, IMPLEMENT_PROMPT, llm.clone(), pricing.clone())),
        Arc::new(LlmDelegateNode::new(NodeName::Test, TEST_PROMPT, llm.clone(), pricing.clone())),
        Arc::new(LlmDelegateNode::new(NodeName::Qa, QA_PROMPT, llm, pricing)),
        Arc::new(FinalizeNode),
        Arc::new(ValidationNode),
        Arc::new(MergeNode::new(scm)),
        Arc::new(UpdateNode::new(ticket, messaging)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use reactor_adapters::scm::{PullRequest, ScmResult};
    use reactor_types::{InternalStatus, Run, RunStatus, Task};

    fn ctx(task_id: reactor_types::TaskId, run_id: reactor_types::RunId) -> RunContext {
        let task = Task::new(
            task_id,
            "item-1".into(),
            "Add health endpoint".into(),
            "desc".into(),
            "https://git.example.com/org/repo.git".into(),
            None,
            Utc::now(),
        );
        let run = Run {
            run_id,
            task_id,
            run_number: 1,
            status: RunStatus::Running,
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
        RunContext {
            task,
            run,
            rejection_instructions: None,
        }
    }

    #[tokio::test]
    async fn llm_delegate_with_no_provider_is_a_noop_completion() {
        let node = LlmDelegateNode::new(NodeName::Analyze, ANALYZE_PROMPT, None, Arc::new(PricingTable::with_defaults()));
        let ctx = ctx(reactor_types::TaskId(1), reactor_types::RunId(1));
        let result = node.execute(&ctx).await;
        assert_eq!(result.outcome, StepOutcome::Completed);
        assert!(result.ai_usage.is_empty());
    }

    #[tokio::test]
    async fn validation_node_always_suspends() {
        let node = ValidationNode;
        let ctx = ctx(reactor_types::TaskId(1), reactor_types::RunId(1));
        let result = node.execute(&ctx).await;
        assert_eq!(result.outcome, StepOutcome::Suspended);
    }

    struct FakeScm {
        open_prs: Vec<PullRequest>,
        merged: std::sync::Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl SourceHostingClient for FakeScm {
        async fn list_pull_requests(&self, _repo: &str, _state: &str) -> ScmResult<Vec<PullRequest>> {
            Ok(self.open_prs.clone())
        }
        async fn get_pull_request(&self, _repo: &str, number: u64) -> ScmResult<PullRequest> {
            self.open_prs
                .iter()
                .find(|pr| pr.number == number)
                .cloned()
                .ok_or(reactor_adapters::ScmError::NotFound(number))
        }
        async fn list_pr_files(&self, _repo: &str, _number: u64) -> ScmResult<Vec<String>> {
            Ok(vec![])
        }
        async fn create_pull_request(
            &self,
            _repo: &str,
            head: &str,
            base: &str,
            title: &str,
            _body: &str,
        ) -> ScmResult<PullRequest> {
            Ok(PullRequest {
                number: 9,
                title: title.to_string(),
                state: "open".to_string(),
                head_branch: head.to_string(),
                base_branch: base.to_string(),
                is_merged: false,
            })
        }
        async fn add_pr_comment(&self, _repo: &str, _number: u64, _body: &str) -> ScmResult<()> {
            Ok(())
        }
        async fn merge_pull_request(&self, _repo: &str, number: u64) -> ScmResult<()> {
            self.merged.lock().unwrap().push(number);
            Ok(())
        }
        async fn list_recent_commits(&self, _repo: &str, _branch: &str, _limit: u32) -> ScmResult<Vec<Commit>> {
            Ok(vec![])
        }
    }

    use reactor_adapters::scm::Commit;

    #[tokio::test]
    async fn merge_node_creates_and_merges_when_no_open_pr() {
        let scm = Arc::new(FakeScm {
            open_prs: vec![],
            merged: std::sync::Mutex::new(vec![]),
        });
        let node = MergeNode::new(scm.clone());
        let result = node.execute(&ctx(reactor_types::TaskId(1), reactor_types::RunId(1))).await;
        assert_eq!(result.outcome, StepOutcome::Completed);
        assert_eq!(*scm.merged.lock().unwrap(), vec![9]);
    }

    #[tokio::test]
    async fn merge_node_skips_merge_if_already_merged() {
        let scm = Arc::new(FakeScm {
            open_prs: vec![PullRequest {
                number: 3,
                title: "t".into(),
                state: "open".into(),
                head_branch: "reactor/task-1-run-1".into(),
                base_branch: "main".into(),
                is_merged: true,
            }],
            merged: std::sync::Mutex::new(vec![]),
        });
        let node = MergeNode::new(scm.clone());
        let result = node.execute(&ctx(reactor_types::TaskId(1), reactor_types::RunId(1))).await;
        assert_eq!(result.outcome, StepOutcome::Completed);
        assert!(scm.merged.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_node_completes_without_any_adapters_configured() {
        let node = UpdateNode::new(None, None);
        let result = node.execute(&ctx(reactor_types::TaskId(1), reactor_types::RunId(1))).await;
        assert_eq!(result.outcome, StepOutcome::Completed);
    }

    #[test]
    fn repo_slug_handles_https_and_git_suffix() {
        assert_eq!(repo_slug("https://git.example.com/org/repo.git"), "org/repo");
        assert_eq!(repo_slug("https://git.example.com/org/repo/"), "org/repo");
    }
}
