//! DDL for the five tables the pipeline owns (`spec.md` §6.2).
//!
//! Applied with `CREATE TABLE IF NOT EXISTS` at startup, the same way the
//! test harness bootstraps its own schema inline rather than through a
//! separate migration runner.

use sqlx::PgPool;

use crate::error::StoreError;

pub async fn ensure_schema(pool: &PgPool) -> Result<(), StoreError> {
    sqlx::query(LETTERS_TABLE).execute(pool).await?;
    sqlx::query(LETTER_PRODUCTS_TABLE).execute(pool).await?;
    sqlx::query(LETTER_PRODUCT_MATCHES_TABLE).execute(pool).await?;
    sqlx::query(LLM_API_CALLS_TABLE).execute(pool).await?;
    sqlx::query(LETTER_RAW_CONTENT_TABLE).execute(pool).await?;
    sqlx::query(CONTENT_HASH_INDEX).execute(pool).await?;
    Ok(())
}

const LETTERS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS letters (
    id BIGSERIAL PRIMARY KEY,
    document_name TEXT NOT NULL,
    source_path TEXT NOT NULL,
    byte_size BIGINT NOT NULL,
    content_hash TEXT NOT NULL,
    processing_method TEXT NOT NULL,
    processing_duration_ms BIGINT NOT NULL DEFAULT 0,
    extraction_confidence DOUBLE PRECISION NOT NULL DEFAULT 0,
    raw_extractor_response JSONB NOT NULL DEFAULT '{}'::jsonb,
    ocr_text TEXT,
    processing_steps JSONB NOT NULL DEFAULT '[]'::jsonb,
    validation_details JSONB NOT NULL DEFAULT '{}'::jsonb,
    status TEXT NOT NULL DEFAULT 'pending',
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

const LETTER_PRODUCTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS letter_products (
    id BIGSERIAL PRIMARY KEY,
    letter_id BIGINT NOT NULL REFERENCES letters(id) ON DELETE CASCADE,
    product_identifier TEXT,
    range_label TEXT NOT NULL,
    subrange_label TEXT,
    product_line TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    obsolescence_status TEXT,
    end_of_service_date TEXT,
    replacement_suggestions TEXT,
    confidence DOUBLE PRECISION NOT NULL DEFAULT 0
)
"#;

const LETTER_PRODUCT_MATCHES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS letter_product_matches (
    id BIGSERIAL PRIMARY KEY,
    letter_id BIGINT NOT NULL REFERENCES letters(id) ON DELETE CASCADE,
    letter_product_id BIGINT REFERENCES letter_products(id) ON DELETE CASCADE,
    catalog_product_identifier TEXT NOT NULL,
    confidence DOUBLE PRECISION NOT NULL,
    match_reason TEXT NOT NULL DEFAULT '',
    technical_score DOUBLE PRECISION NOT NULL DEFAULT 0,
    nomenclature_score DOUBLE PRECISION NOT NULL DEFAULT 0,
    product_line_score DOUBLE PRECISION NOT NULL DEFAULT 0,
    match_type TEXT NOT NULL DEFAULT 'range_based',
    from_range_discovery BOOLEAN NOT NULL DEFAULT true
)
"#;

const LLM_API_CALLS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS llm_api_calls (
    id BIGSERIAL PRIMARY KEY,
    call_id UUID NOT NULL,
    letter_id BIGINT REFERENCES letters(id) ON DELETE SET NULL,
    operation TEXT NOT NULL,
    model TEXT NOT NULL,
    base_url TEXT NOT NULL,
    system_prompt_hash TEXT NOT NULL,
    user_prompt_hash TEXT NOT NULL,
    prompt_version TEXT NOT NULL DEFAULT '',
    prompt_template_name TEXT NOT NULL DEFAULT '',
    prompt_config_hash TEXT NOT NULL,
    request_payload JSONB NOT NULL,
    response_payload JSONB,
    prompt_tokens INTEGER,
    completion_tokens INTEGER,
    total_tokens INTEGER,
    latency_ms BIGINT NOT NULL,
    requested_at TIMESTAMPTZ NOT NULL,
    responded_at TIMESTAMPTZ,
    attempt INTEGER NOT NULL DEFAULT 0,
    succeeded BOOLEAN NOT NULL,
    confidence DOUBLE PRECISION,
    error_kind TEXT,
    error_message TEXT,
    code_version TEXT NOT NULL DEFAULT '',
    document_name TEXT NOT NULL DEFAULT '',
    document_size BIGINT NOT NULL DEFAULT 0,
    input_char_count INTEGER,
    output_char_count INTEGER,
    estimated_cost DOUBLE PRECISION,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

const LETTER_RAW_CONTENT_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS letter_raw_content (
    id BIGSERIAL PRIMARY KEY,
    letter_id BIGINT NOT NULL REFERENCES letters(id) ON DELETE CASCADE,
    content_hash TEXT NOT NULL,
    text_hash TEXT NOT NULL,
    processing_signature TEXT NOT NULL,
    extracted_text TEXT NOT NULL,
    character_count INTEGER NOT NULL,
    extraction_method TEXT NOT NULL,
    quality_score DOUBLE PRECISION NOT NULL,
    created_at TIMESTAMPTZ NOT NULL DEFAULT now()
)
"#;

const CONTENT_HASH_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_letters_content_hash ON letters (content_hash)";
