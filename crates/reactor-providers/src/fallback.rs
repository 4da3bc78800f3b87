//! Primary/fallback ladder as one composite `LLMClient` (§9 design note),
//! instead of scattering provider-selection logic at call sites.

use async_trait::async_trait;
use tracing::warn;

use crate::{CompletionRequest, CompletionResponse, LLMClient, ModerationResult, ProviderResult};

pub struct FallbackLlmClient {
    primary: Box<dyn LLMClient>,
    fallback: Option<Box<dyn LLMClient>>,
}

impl FallbackLlmClient {
    pub fn new(primary: Box<dyn LLMClient>, fallback: Option<Box<dyn LLMClient>>) -> Self {
        Self { primary, fallback }
    }
}

#[async_trait]
impl LLMClient for FallbackLlmClient {
    fn provider_name(&self) -> &str {
        self.primary.provider_name()
    }

    async fn complete(&self, request: CompletionRequest) -> ProviderResult<CompletionResponse> {
        match self.primary.complete(request.clone()).await {
            Ok(response) => Ok(response),
            Err(primary_err) => match &self.fallback {
                Some(fallback) => {
                    warn!(
                        provider = self.primary.provider_name(),
                        error = %primary_err,
                        "primary provider failed, falling back"
                    );
                    fallback.complete(request).await
                }
                None => Err(primary_err),
            },
        }
    }

    async fn moderate(&self, text: &str) -> ProviderResult<ModerationResult> {
        match self.primary.moderate(text).await {
            Ok(result) => Ok(result),
            Err(primary_err) => match &self.fallback {
                Some(fallback) => fallback.moderate(text).await,
                None => Err(primary_err),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::LocalEchoClient;

    struct AlwaysFails;

    #[async_trait]
    impl LLMClient for AlwaysFails {
        fn provider_name(&self) -> &str {
            "always-fails"
        }
        async fn complete(&self, _request: CompletionRequest) -> ProviderResult<CompletionResponse> {
            Err(crate::ProviderError::Timeout)
        }
        async fn moderate(&self, _text: &str) -> ProviderResult<ModerationResult> {
            Err(crate::ProviderError::Timeout)
        }
    }

    #[tokio::test]
    async fn falls_back_when_primary_fails() {
        let client = FallbackLlmClient::new(Box::new(AlwaysFails), Some(Box::new(LocalEchoClient)));
        let response = client
            .complete(CompletionRequest {
                system_prompt: None,
                prompt: "hello".into(),
                response_schema: None,
                max_tokens: 16,
            })
            .await
            .unwrap();
        assert_eq!(response.provider, "local-echo");
    }

    #[tokio::test]
    async fn propagates_error_with_no_fallback() {
        let client = FallbackLlmClient::new(Box::new(AlwaysFails), None);
        let result = client
            .complete(CompletionRequest {
                system_prompt: None,
                prompt: "hello".into(),
                response_schema: None,
                max_tokens: 16,
            })
            .await;
        assert!(result.is_err());
    }
}
