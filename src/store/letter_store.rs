//! The transactional side of persistence: `letters`, `letter_products`, and
//! `letter_product_matches` land in one transaction; `llm_api_calls` and
//! `letter_raw_content` are written outside it, append-mostly, so that an
//! observability write never rolls back a completed pipeline run
//! (`spec.md` §4.B, §4.C).

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::error::StoreError;
use crate::models::{
    LetterDraft, LetterProductDraft, LetterProductMatchDraft, LetterSummary, LlmCallDraft,
    LlmUsageStats, RawContentDraft, RawContentRecord,
};

use super::schema::ensure_schema;

pub struct LetterStore {
    pool: PgPool,
}

impl LetterStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        ensure_schema(&pool).await?;
        Ok(Self { pool })
    }

    pub fn with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Most recent letter matching either the file's content hash or its
    /// source path, used by the skip gate (`spec.md` §4.B, §9). Mirrors the
    /// original's "most recent row wins" semantics rather than erroring on
    /// multiple historical rows for the same document.
    pub async fn find_by_identity(
        &self,
        content_hash: &str,
        source_path: &str,
    ) -> Result<Option<LetterSummary>, StoreError> {
        let row = sqlx::query_as::<_, LetterSummary>(
            "SELECT id, status, processing_duration_ms, extraction_confidence, validation_details \
             FROM letters WHERE content_hash = $1 OR source_path = $2 \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(content_hash)
        .bind(source_path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Natural-key lookup on the composite processing signature
    /// (`spec.md` §4.B, §4.D).
    pub async fn has_been_processed_with_current_prompt(
        &self,
        processing_signature: &str,
    ) -> Result<Option<RawContentRecord>, StoreError> {
        let row = sqlx::query_as::<_, RawContentRecord>(
            "SELECT id, letter_id, content_hash, text_hash, processing_signature, \
             extracted_text, character_count, extraction_method, quality_score, created_at \
             FROM letter_raw_content WHERE processing_signature = $1 \
             ORDER BY created_at DESC LIMIT 1",
        )
        .bind(processing_signature)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    /// Deletes a prior letter and its children (`letter_products`,
    /// `letter_product_matches` cascade) ahead of a forced reprocess.
    pub async fn delete_letter(&self, letter_id: i64) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM letters WHERE id = $1")
            .bind(letter_id)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::LetterNotFound(letter_id));
        }
        Ok(())
    }

    /// Inserts a letter and its product/match children in a single
    /// transaction, returning the new letter id.
    pub async fn insert_letter(
        &self,
        letter: &LetterDraft,
        products: &[LetterProductDraft],
        matches: &[LetterProductMatchDraft],
    ) -> Result<i64, StoreError> {
        let mut tx = self.pool.begin().await?;

        let (letter_id,): (i64,) = sqlx::query_as(
            "INSERT INTO letters (
                document_name, source_path, byte_size, content_hash, processing_method,
                processing_duration_ms, extraction_confidence, raw_extractor_response,
                ocr_text, processing_steps, validation_details, status
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING id",
        )
        .bind(&letter.document_name)
        .bind(&letter.source_path)
        .bind(letter.byte_size)
        .bind(&letter.content_hash)
        .bind(&letter.processing_method)
        .bind(letter.processing_duration_ms)
        .bind(letter.extraction_confidence)
        .bind(&letter.raw_extractor_response)
        .bind(&letter.ocr_text)
        .bind(&letter.processing_steps)
        .bind(&letter.validation_details)
        .bind(letter.status.as_str())
        .fetch_one(&mut *tx)
        .await?;

        let mut product_ids = Vec::with_capacity(products.len());
        for product in products {
            let (product_id,): (i64,) = sqlx::query_as(
                "INSERT INTO letter_products (
                    letter_id, product_identifier, range_label, subrange_label, product_line,
                    description, obsolescence_status, end_of_service_date,
                    replacement_suggestions, confidence
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                RETURNING id",
            )
            .bind(letter_id)
            .bind(&product.product_identifier)
            .bind(&product.range_label)
            .bind(&product.subrange_label)
            .bind(&product.product_line)
            .bind(&product.description)
            .bind(&product.obsolescence_status)
            .bind(&product.end_of_service_date)
            .bind(&product.replacement_suggestions)
            .bind(product.confidence)
            .fetch_one(&mut *tx)
            .await?;
            product_ids.push(product_id);
        }

        for m in matches {
            let letter_product_id = m.letter_product_index.and_then(|i| product_ids.get(i).copied());
            sqlx::query(
                "INSERT INTO letter_product_matches (
                    letter_id, letter_product_id, catalog_product_identifier, confidence,
                    match_reason, technical_score, nomenclature_score, product_line_score,
                    match_type, from_range_discovery
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            )
            .bind(letter_id)
            .bind(letter_product_id)
            .bind(&m.catalog_product_identifier)
            .bind(m.confidence)
            .bind(&m.match_reason)
            .bind(m.technical_score)
            .bind(m.nomenclature_score)
            .bind(m.product_line_score)
            .bind(&m.match_type)
            .bind(m.from_range_discovery)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(letter_id)
    }

    /// Best-effort observability write; failures here are logged by the
    /// caller but never abort the pipeline run.
    pub async fn record_llm_call(&self, call: &LlmCallDraft) -> Result<i64, StoreError> {
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO llm_api_calls (
                call_id, letter_id, operation, model, base_url, system_prompt_hash,
                user_prompt_hash, prompt_version, prompt_template_name, prompt_config_hash,
                request_payload, response_payload, prompt_tokens, completion_tokens,
                total_tokens, latency_ms, requested_at, responded_at, attempt, succeeded,
                confidence, error_kind, error_message, code_version, document_name,
                document_size, input_char_count, output_char_count, estimated_cost
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                $18, $19, $20, $21, $22, $23, $24, $25, $26, $27, $28, $29
            )
            RETURNING id",
        )
        .bind(call.call_id)
        .bind(call.letter_id)
        .bind(call.operation.as_str())
        .bind(&call.model)
        .bind(&call.base_url)
        .bind(&call.system_prompt_hash)
        .bind(&call.user_prompt_hash)
        .bind(&call.prompt_version)
        .bind(&call.prompt_template_name)
        .bind(&call.prompt_config_hash)
        .bind(&call.request_payload)
        .bind(&call.response_payload)
        .bind(call.prompt_tokens)
        .bind(call.completion_tokens)
        .bind(call.total_tokens)
        .bind(call.latency_ms)
        .bind(call.requested_at)
        .bind(call.responded_at)
        .bind(call.attempt)
        .bind(call.succeeded)
        .bind(call.confidence)
        .bind(&call.error_kind)
        .bind(&call.error_message)
        .bind(&call.code_version)
        .bind(&call.document_name)
        .bind(call.document_size)
        .bind(call.input_char_count)
        .bind(call.output_char_count)
        .bind(call.estimated_cost)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Also best-effort and outside the main transaction: extracted text can
    /// be large and is never read back by the pipeline itself.
    pub async fn store_raw_content(
        &self,
        letter_id: i64,
        content: &RawContentDraft,
    ) -> Result<i64, StoreError> {
        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO letter_raw_content (
                letter_id, content_hash, text_hash, processing_signature, extracted_text,
                character_count, extraction_method, quality_score
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id",
        )
        .bind(letter_id)
        .bind(&content.content_hash)
        .bind(&content.text_hash)
        .bind(&content.processing_signature)
        .bind(&content.extracted_text)
        .bind(content.character_count)
        .bind(&content.extraction_method)
        .bind(content.quality_score)
        .fetch_one(&self.pool)
        .await?;
        Ok(id)
    }

    /// Per-day, per-operation aggregate over `llm_api_calls`
    /// (`spec.md` §6.4), aggregated on read rather than maintained
    /// incrementally in a separate rollup table.
    pub async fn llm_usage_stats(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<LlmUsageStats>, StoreError> {
        let rows = sqlx::query_as::<_, LlmUsageStats>(
            "SELECT
                date_trunc('day', created_at) AS day,
                operation,
                COUNT(*) AS total_calls,
                COUNT(*) FILTER (WHERE succeeded) AS successful_calls,
                COUNT(*) FILTER (WHERE NOT succeeded) AS failed_calls,
                COALESCE(SUM(prompt_tokens), 0) AS total_prompt_tokens,
                COALESCE(SUM(completion_tokens), 0) AS total_completion_tokens,
                COALESCE(AVG(latency_ms)::float8, 0) AS avg_latency_ms
             FROM llm_api_calls
             WHERE created_at >= $1
             GROUP BY day, operation
             ORDER BY day DESC, operation",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}
