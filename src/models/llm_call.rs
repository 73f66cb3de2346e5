//! `llm_api_calls` — append-only observability rows written regardless of
//! pipeline outcome (`spec.md` §3.1, §4.C, §4.H).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Which stage issued the call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LlmOperation {
    Extract,
    Rerank,
}

impl LlmOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Extract => "extract",
            Self::Rerank => "rerank",
        }
    }
}

/// A single call to the LLM endpoint, successful or not (`spec.md` §3.1
/// "LLMCall").
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LlmCallRecord {
    pub id: i64,
    pub call_id: Uuid,
    pub letter_id: Option<i64>,
    pub operation: String,
    pub model: String,
    pub base_url: String,
    pub system_prompt_hash: String,
    pub user_prompt_hash: String,
    pub prompt_version: String,
    pub prompt_template_name: String,
    pub prompt_config_hash: String,
    pub request_payload: serde_json::Value,
    pub response_payload: Option<serde_json::Value>,
    pub prompt_tokens: Option<i32>,
    pub completion_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
    pub latency_ms: i64,
    pub requested_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub attempt: i32,
    pub succeeded: bool,
    pub confidence: Option<f64>,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub code_version: String,
    pub document_name: String,
    pub document_size: i64,
    pub input_char_count: Option<i32>,
    pub output_char_count: Option<i32>,
    pub estimated_cost: Option<f64>,
    pub created_at: DateTime<Utc>,
}

/// Draft passed to `LetterStore::record_llm_call`, built by the client
/// immediately after each attempt completes (success or exhausted retries).
#[derive(Debug, Clone)]
pub struct LlmCallDraft {
    pub call_id: Uuid,
    pub letter_id: Option<i64>,
    pub operation: LlmOperation,
    pub model: String,
    pub base_url: String,
    pub system_prompt_hash: String,
    pub user_prompt_hash: String,
    pub prompt_version: String,
    pub prompt_template_name: String,
    pub prompt_config_hash: String,
    pub request_payload: serde_json::Value,
    pub response_payload: Option<serde_json::Value>,
    pub prompt_tokens: Option<i32>,
    pub completion_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
    pub latency_ms: i64,
    pub requested_at: DateTime<Utc>,
    pub responded_at: Option<DateTime<Utc>>,
    pub attempt: i32,
    pub succeeded: bool,
    pub confidence: Option<f64>,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub code_version: String,
    pub document_name: String,
    pub document_size: i64,
    pub input_char_count: Option<i32>,
    pub output_char_count: Option<i32>,
    pub estimated_cost: Option<f64>,
}

/// One day/operation bucket of `llm_api_calls`, aggregated on read rather than
/// maintained incrementally in its own table (`spec.md` §6.4).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LlmUsageStats {
    pub day: DateTime<Utc>,
    pub operation: String,
    pub total_calls: i64,
    pub successful_calls: i64,
    pub failed_calls: i64,
    pub total_prompt_tokens: i64,
    pub total_completion_tokens: i64,
    pub avg_latency_ms: f64,
}
