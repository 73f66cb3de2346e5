//! HTTP client for OpenAI-compatible chat/completions endpoints, with a
//! bounded exponential-backoff retry loop layered on top (`spec.md` §4.C).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::LlmError;
use crate::identity;
use crate::models::{LlmCallDraft, LlmOperation};

/// The code version stamped onto every `llm_api_calls` row. A build-time
/// crate version is used rather than a git commit hash so recording it never
/// depends on shelling out at build time.
const CODE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Placeholder pricing used only to populate `estimated_cost`; no vendor
/// pricing is specified, so this is a flat per-1k-token rate applied to
/// prompt + completion tokens combined.
const ESTIMATED_COST_PER_1K_TOKENS: f64 = 0.01;

/// Outcome of one `invoke` call: the parsed JSON content plus every attempt
/// made along the way, successful or not, so the caller can persist all of
/// them to `llm_api_calls` regardless of how the call ultimately turned out.
pub struct InvokeOutcome {
    pub content: serde_json::Value,
    pub attempts: Vec<LlmCallDraft>,
}

/// Raised when every retry is exhausted; still carries the attempt history.
pub struct InvokeFailure {
    pub error: LlmError,
    pub attempts: Vec<LlmCallDraft>,
}

/// Everything about the call site that isn't the prompt text itself:
/// threaded through so every `llm_api_calls` row can be identified,
/// attributed to a document, and hashed for reprocessing decisions
/// (`spec.md` §4.C).
#[derive(Debug, Clone)]
pub struct InvokeContext {
    pub letter_id: Option<i64>,
    pub document_name: String,
    pub document_size: i64,
    pub prompt_template_name: String,
    pub prompt_version: String,
    pub prompt_config_hash: String,
}

/// The seam `extraction`/`rerank` actually depend on, rather than the
/// concrete `LlmClient`, so the orchestrator's stages can be driven by a
/// fake implementation in tests without a live HTTP endpoint.
#[async_trait]
pub trait LlmInvoker: Send + Sync {
    #[allow(clippy::too_many_arguments)]
    async fn invoke(
        &self,
        operation: LlmOperation,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        request_timeout: Duration,
        context: &InvokeContext,
    ) -> Result<InvokeOutcome, InvokeFailure>;
}

pub struct LlmClient {
    http_client: Client,
    api_base: String,
    api_key: String,
    max_retries: u32,
}

impl LlmClient {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>, max_retries: u32) -> Self {
        let http_client = Client::builder().build().expect("failed to build HTTP client");
        Self { http_client, api_base: api_base.into(), api_key: api_key.into(), max_retries }
    }

    #[allow(clippy::type_complexity)]
    async fn call_once(
        &self,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        request_timeout: Duration,
    ) -> Result<(serde_json::Value, i32, i32, Option<i32>, f64, serde_json::Value), LlmError> {
        let chat_request = ChatCompletionRequest {
            model: model.to_string(),
            messages: vec![
                ChatMessage { role: "system".to_string(), content: system_prompt.to_string() },
                ChatMessage { role: "user".to_string(), content: user_prompt.to_string() },
            ],
            temperature: Some(temperature),
            response_format: Some(ResponseFormat { r#type: "json_object".to_string() }),
        };

        let url = format!("{}/chat/completions", self.api_base.trim_end_matches('/'));

        let response = self
            .http_client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .timeout(request_timeout)
            .json(&chat_request)
            .send()
            .await
            .map_err(|e| if e.is_timeout() { LlmError::Timeout } else { LlmError::Network(e) })?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30);
            return Err(LlmError::RateLimited(retry_after));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Api(format!("{status}: {body}")));
        }

        let chat_response: ChatCompletionResponse =
            response.json().await.map_err(LlmError::Network)?;

        let content_str = chat_response
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .ok_or_else(|| LlmError::InvalidResponse("empty choices[0].message.content".into()))?;

        let content = parse_json_content(content_str)?;

        let prompt_tokens = chat_response.usage.as_ref().map(|u| u.prompt_tokens).unwrap_or(0);
        let completion_tokens =
            chat_response.usage.as_ref().map(|u| u.completion_tokens).unwrap_or(0);
        let total_tokens = chat_response.usage.as_ref().and_then(|u| u.total_tokens);

        let confidence = extract_confidence(&content);

        let raw_response = serde_json::json!({
            "content": content_str,
            "usage": chat_response.usage,
        });

        Ok((content, prompt_tokens, completion_tokens, total_tokens, confidence, raw_response))
    }
}

/// Probes, in order, `extraction_confidence`, `confidence_score`, and
/// `extraction_metadata.confidence` on the parsed response body, defaulting
/// to 0.0 when none are present (`spec.md` §4.C).
fn extract_confidence(content: &serde_json::Value) -> f64 {
    content
        .get("extraction_confidence")
        .and_then(|v| v.as_f64())
        .or_else(|| content.get("confidence_score").and_then(|v| v.as_f64()))
        .or_else(|| {
            content.get("extraction_metadata").and_then(|m| m.get("confidence")).and_then(|v| v.as_f64())
        })
        .unwrap_or(0.0)
}

#[async_trait]
impl LlmInvoker for LlmClient {
    /// Issues one logical call (extract or rerank), retrying retryable
    /// failures with `2^attempt` second backoff up to `max_retries` times.
    async fn invoke(
        &self,
        operation: LlmOperation,
        model: &str,
        system_prompt: &str,
        user_prompt: &str,
        temperature: f32,
        request_timeout: Duration,
        context: &InvokeContext,
    ) -> Result<InvokeOutcome, InvokeFailure> {
        let request_payload = serde_json::json!({
            "model": model,
            "system": system_prompt,
            "user": user_prompt,
            "temperature": temperature,
        });

        let system_prompt_hash = identity::text_hash(system_prompt);
        let user_prompt_hash = identity::text_hash(user_prompt);
        let input_char_count = Some((system_prompt.chars().count() + user_prompt.chars().count()) as i32);

        let mut attempts = Vec::new();
        let mut last_error = LlmError::Timeout;

        for attempt in 0..self.max_retries {
            let call_id = Uuid::new_v4();
            let requested_at = Utc::now();
            let started = Instant::now();
            let outcome = self
                .call_once(model, system_prompt, user_prompt, temperature, request_timeout)
                .await;
            let latency_ms = started.elapsed().as_millis() as i64;
            let responded_at = Some(Utc::now());

            match outcome {
                Ok((content, prompt_tokens, completion_tokens, total_tokens, confidence, raw_response)) => {
                    let output_char_count = Some(content.to_string().chars().count() as i32);
                    let estimated_cost = total_tokens.map(|t| {
                        (t as f64 / 1000.0) * ESTIMATED_COST_PER_1K_TOKENS
                    });
                    attempts.push(LlmCallDraft {
                        call_id,
                        letter_id: context.letter_id,
                        operation,
                        model: model.to_string(),
                        base_url: self.api_base.clone(),
                        system_prompt_hash: system_prompt_hash.clone(),
                        user_prompt_hash: user_prompt_hash.clone(),
                        prompt_version: context.prompt_version.clone(),
                        prompt_template_name: context.prompt_template_name.clone(),
                        prompt_config_hash: context.prompt_config_hash.clone(),
                        request_payload: request_payload.clone(),
                        response_payload: Some(raw_response),
                        prompt_tokens: Some(prompt_tokens),
                        completion_tokens: Some(completion_tokens),
                        total_tokens,
                        latency_ms,
                        requested_at,
                        responded_at,
                        attempt: attempt as i32,
                        succeeded: true,
                        confidence: Some(confidence),
                        error_kind: None,
                        error_message: None,
                        code_version: CODE_VERSION.to_string(),
                        document_name: context.document_name.clone(),
                        document_size: context.document_size,
                        input_char_count,
                        output_char_count,
                        estimated_cost,
                    });
                    return Ok(InvokeOutcome { content, attempts });
                },
                Err(err) => {
                    attempts.push(LlmCallDraft {
                        call_id,
                        letter_id: context.letter_id,
                        operation,
                        model: model.to_string(),
                        base_url: self.api_base.clone(),
                        system_prompt_hash: system_prompt_hash.clone(),
                        user_prompt_hash: user_prompt_hash.clone(),
                        prompt_version: context.prompt_version.clone(),
                        prompt_template_name: context.prompt_template_name.clone(),
                        prompt_config_hash: context.prompt_config_hash.clone(),
                        request_payload: request_payload.clone(),
                        response_payload: None,
                        prompt_tokens: None,
                        completion_tokens: None,
                        total_tokens: None,
                        latency_ms,
                        requested_at,
                        responded_at,
                        attempt: attempt as i32,
                        succeeded: false,
                        confidence: None,
                        error_kind: Some(err.kind().to_string()),
                        error_message: Some(err.to_string()),
                        code_version: CODE_VERSION.to_string(),
                        document_name: context.document_name.clone(),
                        document_size: context.document_size,
                        input_char_count,
                        output_char_count: None,
                        estimated_cost: None,
                    });

                    let is_last = attempt == self.max_retries - 1;
                    if !err.is_retryable() || is_last {
                        last_error = err;
                        break;
                    }

                    let backoff = match &err {
                        LlmError::RateLimited(secs) => Duration::from_secs(*secs),
                        _ => Duration::from_secs(2u64.saturating_pow(attempt + 1)),
                    };
                    last_error = err;
                    tokio::time::sleep(backoff).await;
                },
            }
        }

        Err(InvokeFailure { error: last_error, attempts })
    }
}

/// Parses the model's text content as JSON, falling back to extracting the
/// first top-level `{...}` block when the model wraps it in prose or a code
/// fence despite `response_format: json_object`.
fn parse_json_content(content: &str) -> Result<serde_json::Value, LlmError> {
    if let Ok(value) = serde_json::from_str(content) {
        return Ok(value);
    }

    let re = Regex::new(r"\{[\s\S]*\}").expect("static regex is valid");
    if let Some(m) = re.find(content) {
        if let Ok(value) = serde_json::from_str(m.as_str()) {
            return Ok(value);
        }
    }

    Err(LlmError::InvalidResponse(format!("could not parse JSON from response: {content}")))
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<ResponseFormat>,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    r#type: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Usage {
    prompt_tokens: i32,
    completion_tokens: i32,
    #[serde(default)]
    total_tokens: Option<i32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_json_content_accepts_clean_json() {
        let value = parse_json_content(r#"{"a": 1}"#).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn parse_json_content_recovers_from_prose_wrapper() {
        let text = "Sure, here is the result:\n```json\n{\"a\": 1}\n```\nHope that helps!";
        let value = parse_json_content(text).unwrap();
        assert_eq!(value["a"], 1);
    }

    #[test]
    fn parse_json_content_rejects_non_json() {
        assert!(parse_json_content("no json here").is_err());
    }
}
