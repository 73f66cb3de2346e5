//! End-to-end tests for the Pipeline Orchestrator (component H), covering
//! the seeded scenarios and invariants. Driven by an in-process fake
//! `LlmInvoker` against a disposable Postgres schema via `#[sqlx::test]`,
//! the way the client's own HTTP call path is never exercised by a unit
//! test (mirrored from `services/llm/tests.rs` in the teacher, which only
//! ever drives DB-CRUD against a fixture, never the network call itself).

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use se_letters_core::artifacts::OutputStore;
use se_letters_core::catalog::CatalogStore;
use se_letters_core::error::{LlmError, StageKind};
use se_letters_core::llm::{InvokeContext, InvokeFailure, InvokeOutcome, LlmInvoker, PromptConfig};
use se_letters_core::models::{Document, LetterDraft, LetterStatus, LlmCallDraft, LlmOperation};
use se_letters_core::pipeline::{Pipeline, PipelineSettings, ProcessingStatus};
use se_letters_core::store::{self, LetterStore};

/// One scripted answer for a single `invoke` call.
enum Scripted {
    Ok(serde_json::Value),
    /// Exhausts `max_retries` attempts the way `LlmClient::invoke` itself
    /// would, so the LLMCall rows it leaves behind match the real client's
    /// shape (spec.md §8 scenario 4).
    AlwaysFail,
}

/// Drives `extraction::extract`/`rerank::rerank` without a live HTTP
/// endpoint. Each call pops the next scripted answer off the matching
/// per-operation queue.
struct FakeLlm {
    extract: Mutex<VecDeque<Scripted>>,
    rerank: Mutex<VecDeque<Scripted>>,
    max_retries: i32,
}

impl FakeLlm {
    fn new() -> Self {
        Self { extract: Mutex::new(VecDeque::new()), rerank: Mutex::new(VecDeque::new()), max_retries: 3 }
    }

    fn push_extract(&self, value: serde_json::Value) {
        self.extract.lock().unwrap().push_back(Scripted::Ok(value));
    }

    fn push_extract_failure(&self) {
        self.extract.lock().unwrap().push_back(Scripted::AlwaysFail);
    }

    fn push_rerank(&self, value: serde_json::Value) {
        self.rerank.lock().unwrap().push_back(Scripted::Ok(value));
    }
}

#[async_trait]
impl LlmInvoker for FakeLlm {
    async fn invoke(
        &self,
        operation: LlmOperation,
        model: &str,
        _system_prompt: &str,
        _user_prompt: &str,
        _temperature: f32,
        _request_timeout: Duration,
        context: &InvokeContext,
    ) -> Result<InvokeOutcome, InvokeFailure> {
        let queue = match operation {
            LlmOperation::Extract => &self.extract,
            LlmOperation::Rerank => &self.rerank,
        };
        let scripted = queue.lock().unwrap().pop_front().expect("no scripted response queued");

        match scripted {
            Scripted::Ok(value) => {
                let attempt = LlmCallDraft {
                    call_id: Uuid::new_v4(),
                    letter_id: context.letter_id,
                    operation,
                    model: model.to_string(),
                    base_url: "https://fake.test".to_string(),
                    system_prompt_hash: "fake-system-hash".to_string(),
                    user_prompt_hash: "fake-user-hash".to_string(),
                    prompt_version: context.prompt_version.clone(),
                    prompt_template_name: context.prompt_template_name.clone(),
                    prompt_config_hash: context.prompt_config_hash.clone(),
                    request_payload: serde_json::json!({}),
                    response_payload: Some(value.clone()),
                    prompt_tokens: Some(10),
                    completion_tokens: Some(20),
                    total_tokens: Some(30),
                    latency_ms: 5,
                    requested_at: Utc::now(),
                    responded_at: Some(Utc::now()),
                    attempt: 0,
                    succeeded: true,
                    confidence: Some(0.9),
                    error_kind: None,
                    error_message: None,
                    code_version: "test".to_string(),
                    document_name: context.document_name.clone(),
                    document_size: context.document_size,
                    input_char_count: Some(100),
                    output_char_count: Some(50),
                    estimated_cost: Some(0.001),
                };
                Ok(InvokeOutcome { content: value, attempts: vec![attempt] })
            },
            Scripted::AlwaysFail => {
                let attempts = (0..self.max_retries)
                    .map(|attempt| LlmCallDraft {
                        call_id: Uuid::new_v4(),
                        letter_id: context.letter_id,
                        operation,
                        model: model.to_string(),
                        base_url: "https://fake.test".to_string(),
                        system_prompt_hash: "fake-system-hash".to_string(),
                        user_prompt_hash: "fake-user-hash".to_string(),
                        prompt_version: context.prompt_version.clone(),
                        prompt_template_name: context.prompt_template_name.clone(),
                        prompt_config_hash: context.prompt_config_hash.clone(),
                        request_payload: serde_json::json!({}),
                        response_payload: None,
                        prompt_tokens: None,
                        completion_tokens: None,
                        total_tokens: None,
                        latency_ms: 1,
                        requested_at: Utc::now(),
                        responded_at: Some(Utc::now()),
                        attempt,
                        succeeded: false,
                        confidence: None,
                        error_kind: Some("invalid_response".to_string()),
                        error_message: Some("could not parse JSON from response".to_string()),
                        code_version: "test".to_string(),
                        document_name: context.document_name.clone(),
                        document_size: context.document_size,
                        input_char_count: Some(100),
                        output_char_count: None,
                        estimated_cost: None,
                    })
                    .collect();
                Err(InvokeFailure {
                    error: LlmError::InvalidResponse("scripted failure".into()),
                    attempts,
                })
            },
        }
    }
}

fn scratch_path(label: &str) -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("se-letters-pipeline-test-{label}-{}-{n}", std::process::id()))
}

/// Writes a small non-empty file and returns a `Document` pointing at it.
fn document(content_hash: &str) -> Document {
    let path = scratch_path("doc");
    std::fs::write(&path, b"%PDF-1.4 obsolescence letter").unwrap();
    Document {
        path,
        byte_size: 27,
        content_hash: content_hash.to_string(),
        mime_hint: "application/pdf".to_string(),
    }
}

fn settings(force_reprocess: bool) -> PipelineSettings {
    PipelineSettings {
        skip_confidence_threshold: 0.95,
        min_match_confidence: 0.5,
        force_reprocess,
        discovery_limit: 1000,
        request_timeout: Duration::from_secs(5),
    }
}

async fn create_catalog_table(pool: &PgPool) {
    sqlx::query(
        "CREATE TABLE products (
            product_identifier TEXT PRIMARY KEY,
            product_type TEXT,
            product_description TEXT,
            brand_code TEXT,
            brand_label TEXT,
            range_code TEXT,
            range_label TEXT,
            subrange_code TEXT,
            subrange_label TEXT,
            devicetype_label TEXT,
            pl_services TEXT,
            commercial_status TEXT
        )",
    )
    .execute(pool)
    .await
    .unwrap();
}

async fn insert_catalog_row(pool: &PgPool, identifier: &str, range_label: &str) {
    sqlx::query(
        "INSERT INTO products (product_identifier, range_label, pl_services, commercial_status) \
         VALUES ($1, $2, 'SPIBS', 'active')",
    )
    .bind(identifier)
    .bind(range_label)
    .execute(pool)
    .await
    .unwrap();
}

async fn letters_count(pool: &PgPool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM letters").fetch_one(pool).await.unwrap()
}

async fn letter_products_count(pool: &PgPool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM letter_products").fetch_one(pool).await.unwrap()
}

async fn letter_product_matches_count(pool: &PgPool) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM letter_product_matches").fetch_one(pool).await.unwrap()
}

fn build_pipeline(pool: &PgPool, llm: FakeLlm, force_reprocess: bool) -> (Pipeline, PathBuf) {
    let catalog = CatalogStore::with_pool(pool.clone(), "products", 1000);
    let store = LetterStore::with_pool(pool.clone());
    let output_dir = scratch_path("artifacts");
    let output = OutputStore::new(output_dir.clone(), 10, 30, false);
    let pipeline = Pipeline::new(
        catalog,
        store,
        Box::new(llm),
        PromptConfig::default(),
        output,
        settings(force_reprocess),
    );
    (pipeline, output_dir)
}

/// Scenario 1 (spec.md §8): a prior compliant letter is never reprocessed.
#[sqlx::test(migrations = false)]
async fn skip_path_returns_prior_letter_id_without_new_inserts(pool: PgPool) {
    store::ensure_schema(&pool).await.unwrap();
    let store_handle = LetterStore::with_pool(pool.clone());

    let prior_id = store_handle
        .insert_letter(
            &LetterDraft {
                document_name: "letter.pdf".into(),
                source_path: "/tmp/letter.pdf".into(),
                byte_size: 27,
                content_hash: "hash-skip".into(),
                processing_method: "pipeline-v1".into(),
                processing_duration_ms: 10,
                extraction_confidence: 0.97,
                raw_extractor_response: serde_json::json!({}),
                ocr_text: None,
                processing_steps: serde_json::json!([]),
                validation_details: serde_json::json!({}),
                status: LetterStatus::Completed,
            },
            &[],
            &[],
        )
        .await
        .unwrap();

    let (pipeline, _artifacts) = build_pipeline(&pool, FakeLlm::new(), false);
    let mut doc = document("hash-skip");
    doc.path = PathBuf::from("/tmp/letter.pdf");

    let result = pipeline.process_document(&doc, &CancellationToken::new()).await;

    assert_eq!(result.status, ProcessingStatus::Skipped);
    assert_eq!(result.letter_id, Some(prior_id));
    assert_eq!(letters_count(&pool).await, 1);
}

/// Scenario 2: a clean run with 3 validated matches, none hallucinated.
#[sqlx::test(migrations = false)]
async fn fresh_success_persists_letter_product_and_matches(pool: PgPool) {
    store::ensure_schema(&pool).await.unwrap();
    create_catalog_table(&pool).await;
    insert_catalog_row(&pool, "GLX6000-A", "Galaxy 6000").await;
    insert_catalog_row(&pool, "GLX6000-B", "Galaxy 6000").await;
    insert_catalog_row(&pool, "GLX6000-C", "Galaxy 6000").await;

    let llm = FakeLlm::new();
    llm.push_extract(serde_json::json!({
        "product_identification": {
            "ranges": ["Galaxy 6000"],
            "descriptions": ["UPS system"],
            "product_types": ["low voltage"],
        },
        "overall_confidence": 0.82,
    }));
    llm.push_rerank(serde_json::json!({
        "validated_products": [
            {"product_identifier": "GLX6000-A", "range_label": "Galaxy 6000", "confidence": 0.9, "validation_reason": "exact match"},
            {"product_identifier": "GLX6000-B", "range_label": "Galaxy 6000", "confidence": 0.85, "validation_reason": "exact match"},
            {"product_identifier": "GLX6000-C", "range_label": "Galaxy 6000", "confidence": 0.8, "validation_reason": "exact match"},
        ],
        "validation_confidence": 0.85,
        "validation_errors": [],
    }));

    let (pipeline, artifacts) = build_pipeline(&pool, llm, false);
    let doc = document("hash-fresh");

    let result = pipeline.process_document(&doc, &CancellationToken::new()).await;

    assert_eq!(result.status, ProcessingStatus::Completed);
    assert_eq!(result.confidence, 0.82);
    assert_eq!(result.product_count, 1);
    assert_eq!(result.match_count, 3);
    assert_eq!(letters_count(&pool).await, 1);
    assert_eq!(letter_products_count(&pool).await, 1);
    assert_eq!(letter_product_matches_count(&pool).await, 3);

    let (range_label, product_line): (String, String) =
        sqlx::query_as("SELECT range_label, product_line FROM letter_products")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(range_label, "Galaxy 6000");
    assert_eq!(product_line, "SPIBS");

    tokio::fs::remove_dir_all(&artifacts).await.ok();
    std::fs::remove_file(&doc.path).ok();
}

/// Scenario 3: a hallucinated candidate is silently dropped, not persisted.
#[sqlx::test(migrations = false)]
async fn hallucinated_match_is_dropped_before_persist(pool: PgPool) {
    store::ensure_schema(&pool).await.unwrap();
    create_catalog_table(&pool).await;
    insert_catalog_row(&pool, "GLX6000-A", "Galaxy 6000").await;

    let llm = FakeLlm::new();
    llm.push_extract(serde_json::json!({
        "product_identification": {
            "ranges": ["Galaxy 6000"],
            "descriptions": ["UPS system"],
            "product_types": [],
        },
        "overall_confidence": 0.75,
    }));
    llm.push_rerank(serde_json::json!({
        "validated_products": [
            {"product_identifier": "GLX6000-A", "range_label": "Galaxy 6000", "confidence": 0.9, "validation_reason": "exact match"},
            {"product_identifier": "FAKE-XYZ", "range_label": "Galaxy 6000", "confidence": 0.95, "validation_reason": "hallucinated"},
        ],
        "validation_confidence": 0.9,
        "validation_errors": [],
    }));

    let (pipeline, artifacts) = build_pipeline(&pool, llm, false);
    let doc = document("hash-hallucination");

    let result = pipeline.process_document(&doc, &CancellationToken::new()).await;

    assert_eq!(result.status, ProcessingStatus::Completed);
    assert_eq!(result.match_count, 1);
    assert_eq!(letter_product_matches_count(&pool).await, 1);

    let identifier: String =
        sqlx::query_scalar("SELECT catalog_product_identifier FROM letter_product_matches")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(identifier, "GLX6000-A");

    tokio::fs::remove_dir_all(&artifacts).await.ok();
    std::fs::remove_file(&doc.path).ok();
}

/// Scenario 4: the extractor exhausts its retries; 3 failed LLMCall rows,
/// zero Letter rows, a failure tagged `extract_error`.
#[sqlx::test(migrations = false)]
async fn extractor_failure_writes_no_letter_but_records_every_attempt(pool: PgPool) {
    store::ensure_schema(&pool).await.unwrap();

    let llm = FakeLlm::new();
    llm.push_extract_failure();

    let (pipeline, artifacts) = build_pipeline(&pool, llm, false);
    let doc = document("hash-extract-failure");

    let result = pipeline.process_document(&doc, &CancellationToken::new()).await;

    assert_eq!(result.status, ProcessingStatus::Failed);
    assert_eq!(result.error_kind, Some(StageKind::Extract));
    assert!(result.error_message.unwrap().contains("extract"));
    assert_eq!(letters_count(&pool).await, 0);

    let failed_calls: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM llm_api_calls WHERE succeeded = false")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(failed_calls, 3);

    let mut attempts: Vec<i32> = sqlx::query_scalar("SELECT attempt FROM llm_api_calls ORDER BY attempt")
        .fetch_all(&pool)
        .await
        .unwrap();
    attempts.sort();
    assert_eq!(attempts, vec![0, 1, 2]);

    tokio::fs::remove_dir_all(&artifacts).await.ok();
    std::fs::remove_file(&doc.path).ok();
}

/// Scenario 5: `force_reprocess=true` deletes the prior letter and writes a
/// fresh one under a new id.
#[sqlx::test(migrations = false)]
async fn forced_reprocess_replaces_the_prior_letter(pool: PgPool) {
    store::ensure_schema(&pool).await.unwrap();
    create_catalog_table(&pool).await;
    let store_handle = LetterStore::with_pool(pool.clone());

    let prior_id = store_handle
        .insert_letter(
            &LetterDraft {
                document_name: "letter.pdf".into(),
                source_path: "/tmp/force.pdf".into(),
                byte_size: 27,
                content_hash: "hash-force".into(),
                processing_method: "pipeline-v1".into(),
                processing_duration_ms: 10,
                extraction_confidence: 0.97,
                raw_extractor_response: serde_json::json!({}),
                ocr_text: None,
                processing_steps: serde_json::json!([]),
                validation_details: serde_json::json!({}),
                status: LetterStatus::Completed,
            },
            &[],
            &[],
        )
        .await
        .unwrap();

    let llm = FakeLlm::new();
    llm.push_extract(serde_json::json!({
        "product_identification": {"ranges": [], "descriptions": [], "product_types": []},
        "overall_confidence": 0.6,
    }));
    llm.push_rerank(serde_json::json!({
        "validated_products": [],
        "validation_confidence": 0.0,
        "validation_errors": [],
    }));

    let (pipeline, artifacts) = build_pipeline(&pool, llm, true);
    let mut doc = document("hash-force");
    doc.path = PathBuf::from("/tmp/force.pdf");
    std::fs::write(&doc.path, b"%PDF-1.4 force reprocess").unwrap();

    let result = pipeline.process_document(&doc, &CancellationToken::new()).await;

    assert_eq!(result.status, ProcessingStatus::Completed);
    assert_ne!(result.letter_id, Some(prior_id));
    assert_eq!(letters_count(&pool).await, 1);

    tokio::fs::remove_dir_all(&artifacts).await.ok();
    std::fs::remove_file(&doc.path).ok();
}

/// Scenario 6: an extractor response with no ranges finds no discovery
/// candidates, reranks an empty candidate set, and still completes the
/// letter with zero products and matches.
#[sqlx::test(migrations = false)]
async fn empty_ranges_completes_with_no_products_or_matches(pool: PgPool) {
    store::ensure_schema(&pool).await.unwrap();

    let llm = FakeLlm::new();
    llm.push_extract(serde_json::json!({
        "product_identification": {"ranges": [], "descriptions": [], "product_types": []},
        "overall_confidence": 0.40,
    }));
    llm.push_rerank(serde_json::json!({
        "validated_products": [],
        "validation_confidence": 0.0,
        "validation_errors": [],
    }));

    let (pipeline, artifacts) = build_pipeline(&pool, llm, false);
    let doc = document("hash-empty-ranges");

    let result = pipeline.process_document(&doc, &CancellationToken::new()).await;

    assert_eq!(result.status, ProcessingStatus::Completed);
    assert_eq!(result.confidence, 0.40);
    assert_eq!(result.product_count, 0);
    assert_eq!(result.match_count, 0);
    assert_eq!(letter_products_count(&pool).await, 0);
    assert_eq!(letter_product_matches_count(&pool).await, 0);

    let validation_details: serde_json::Value =
        sqlx::query_scalar("SELECT validation_details FROM letters LIMIT 1")
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(validation_details["message"], "No products to validate");

    tokio::fs::remove_dir_all(&artifacts).await.ok();
    std::fs::remove_file(&doc.path).ok();
}
