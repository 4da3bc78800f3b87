//! Thin REST clients for the two configured providers (§6). Wire shapes stay
//! local to this module; callers only see [`crate::LLMClient`].

use std::time::Instant;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::{CompletionRequest, CompletionResponse, LLMClient, ModerationResult, ProviderError, ProviderResult};

pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl OpenAiCompatibleClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl LLMClient for OpenAiCompatibleClient {
    fn provider_name(&self) -> &str {
        "openai"
    }

    async fn complete(&self, request: CompletionRequest) -> ProviderResult<CompletionResponse> {
        let started = Instant::now();
        let mut messages = Vec::new();
        if let Some(system) = &request.system_prompt {
            messages.push(json!({"role": "system", "content": system}));
        }
        messages.push(json!({"role": "user", "content": request.prompt}));

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "max_tokens": request.max_tokens,
        });
        if request.response_schema.is_some() {
            body["response_format"] = json!({"type": "json_object"});
        }

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let payload: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let text = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| ProviderError::SchemaMismatch("missing choices[0].message.content".into()))?
            .to_string();
        let input_tokens = payload["usage"]["prompt_tokens"].as_u64().unwrap_or(0);
        let output_tokens = payload["usage"]["completion_tokens"].as_u64().unwrap_or(0);

        Ok(CompletionResponse {
            provider: self.provider_name().to_string(),
            model: self.model.clone(),
            text,
            input_tokens,
            output_tokens,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn moderate(&self, text: &str) -> ProviderResult<ModerationResult> {
        let response = self
            .http
            .post(format!("{}/moderations", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&json!({"input": text}))
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;
        let payload: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;
        let flagged = payload["results"][0]["flagged"].as_bool().unwrap_or(false);
        let categories = payload["results"][0]["categories"]
            .as_object()
            .map(|map| {
                map.iter()
                    .filter(|(_, v)| v.as_bool().unwrap_or(false))
                    .map(|(k, _)| k.clone())
                    .collect()
            })
            .unwrap_or_default();
        Ok(ModerationResult { flagged, categories })
    }
}

pub struct AnthropicClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

impl AnthropicClient {
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl LLMClient for AnthropicClient {
    fn provider_name(&self) -> &str {
        "anthropic"
    }

    async fn complete(&self, request: CompletionRequest) -> ProviderResult<CompletionResponse> {
        let started = Instant::now();
        let mut body = json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "messages": [{"role": "user", "content": request.prompt}],
        });
        if let Some(system) = &request.system_prompt {
            body["system"] = json!(system);
        }

        let response = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let payload: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::Request(e.to_string()))?;

        let text = payload["content"][0]["text"]
            .as_str()
            .ok_or_else(|| ProviderError::SchemaMismatch("missing content[0].text".into()))?
            .to_string();
        let input_tokens = payload["usage"]["input_tokens"].as_u64().unwrap_or(0);
        let output_tokens = payload["usage"]["output_tokens"].as_u64().unwrap_or(0);

        Ok(CompletionResponse {
            provider: self.provider_name().to_string(),
            model: self.model.clone(),
            text,
            input_tokens,
            output_tokens,
            duration_ms: started.elapsed().as_millis() as u64,
        })
    }

    async fn moderate(&self, _text: &str) -> ProviderResult<ModerationResult> {
        // Anthropic has no dedicated moderation endpoint; treat as unflagged
        // and rely on the configured fallback/OpenAI moderation when the
        // ladder needs one. Grounded in the narrow-interface boundary: this
        // crate only promises that *a* `moderate` call returns, not that
        // every provider implements true content classification.
        Ok(ModerationResult {
            flagged: false,
            categories: Vec::new(),
        })
    }
}
