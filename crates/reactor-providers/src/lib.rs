//! `LLMClient` capability (§9 design note: "multi-provider" LLM access
//! becomes one trait with `complete`/`moderate`; the primary/fallback ladder
//! lives in one composite implementation, not scattered at call sites) and
//! the pricing table the Cost & Audit Ledger uses to compute
//! `AIUsageRecord.estimated_cost`.

mod fallback;
mod http_client;
mod pricing;

pub use fallback::FallbackLlmClient;
pub use http_client::{AnthropicClient, OpenAiCompatibleClient};
pub use pricing::{PricingTable, UnknownModelWarning};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Request(String),
    #[error("provider returned a response that did not match the requested schema: {0}")]
    SchemaMismatch(String),
    #[error("provider timed out")]
    Timeout,
}

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub system_prompt: Option<String>,
    pub prompt: String,
    /// A JSON schema the response must validate against (§6 "text-completion
    /// with JSON-schema response contract").
    pub response_schema: Option<Value>,
    pub max_tokens: u32,
}

#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub provider: String,
    pub model: String,
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ModerationResult {
    pub flagged: bool,
    pub categories: Vec<String>,
}

/// Text-completion with a JSON-schema response contract, and a moderation
/// endpoint for inbound safety checks (§6). Implementations never see each
/// other's wire shapes; callers only see this trait.
#[async_trait]
pub trait LLMClient: Send + Sync {
    fn provider_name(&self) -> &str;

    async fn complete(&self, request: CompletionRequest) -> ProviderResult<CompletionResponse>;

    async fn moderate(&self, text: &str) -> ProviderResult<ModerationResult>;
}

/// Used by tests and by callers with no LLM configured: the pattern stage of
/// the intent analyzer must work without any provider at all (§4.2.1 "only
/// if ... an LLM is configured").
pub struct LocalEchoClient;

#[async_trait]
impl LLMClient for LocalEchoClient {
    fn provider_name(&self) -> &str {
        "local-echo"
    }

    async fn complete(&self, request: CompletionRequest) -> ProviderResult<CompletionResponse> {
        Ok(CompletionResponse {
            provider: "local-echo".to_string(),
            model: "echo-1".to_string(),
            text: request.prompt,
            input_tokens: 0,
            output_tokens: 0,
            duration_ms: 0,
        })
    }

    async fn moderate(&self, _text: &str) -> ProviderResult<ModerationResult> {
        Ok(ModerationResult {
            flagged: false,
            categories: Vec::new(),
        })
    }
}
