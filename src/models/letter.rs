//! `Letter`, `LetterProduct`, and `LetterProductMatch` — the three tables
//! written atomically by the Letter Store (`spec.md` §3.1, §4.B).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle status of a `Letter` row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LetterStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Skipped,
    Duplicate,
}

impl LetterStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Duplicate => "duplicate",
        }
    }

    pub fn parse_status(s: &str) -> Self {
        match s {
            "pending" => Self::Pending,
            "processing" => Self::Processing,
            "completed" => Self::Completed,
            "skipped" => Self::Skipped,
            "duplicate" => Self::Duplicate,
            _ => Self::Failed,
        }
    }
}

/// A fully persisted `letters` row, as read back from the database.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LetterRow {
    pub id: i64,
    pub document_name: String,
    pub source_path: String,
    pub byte_size: i64,
    pub content_hash: String,
    pub processing_method: String,
    pub processing_duration_ms: i64,
    pub extraction_confidence: f64,
    pub raw_extractor_response: serde_json::Value,
    pub ocr_text: Option<String>,
    pub processing_steps: serde_json::Value,
    pub validation_details: serde_json::Value,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

impl LetterRow {
    pub fn status_enum(&self) -> LetterStatus {
        LetterStatus::parse_status(&self.status)
    }
}

/// Minimal projection returned by the skip-gate lookup
/// (`LetterStore::find_by_identity`).
#[derive(Debug, Clone, FromRow)]
pub struct LetterSummary {
    pub id: i64,
    pub status: String,
    pub processing_duration_ms: i64,
    pub extraction_confidence: f64,
    pub validation_details: serde_json::Value,
}

impl LetterSummary {
    pub fn status_enum(&self) -> LetterStatus {
        LetterStatus::parse_status(&self.status)
    }

    /// The skip gate in `spec.md` §9: a prior completed letter is only
    /// considered "compliant" (skippable) above this confidence threshold.
    /// Whether this is intentional given prior letters below the threshold
    /// are always created with `status=completed` is flagged as an open
    /// question in `spec.md` §9 — see `DESIGN.md` for the decision taken here.
    pub fn is_compliant(&self, threshold: f64) -> bool {
        self.status_enum() == LetterStatus::Completed && self.extraction_confidence >= threshold
    }
}

/// In-memory draft of a `Letter` row, accumulated by the orchestrator before
/// a single transaction inserts it and its children (design note: "cyclic
/// pipeline inserts a letter whose id is needed by its children" -> builder).
#[derive(Debug, Clone)]
pub struct LetterDraft {
    pub document_name: String,
    pub source_path: String,
    pub byte_size: i64,
    pub content_hash: String,
    pub processing_method: String,
    pub processing_duration_ms: i64,
    pub extraction_confidence: f64,
    pub raw_extractor_response: serde_json::Value,
    pub ocr_text: Option<String>,
    pub processing_steps: serde_json::Value,
    pub validation_details: serde_json::Value,
    pub status: LetterStatus,
}

/// A product range the extractor said the letter is about
/// (`spec.md` §3.1 "LetterProduct").
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LetterProductRow {
    pub id: i64,
    pub letter_id: i64,
    pub product_identifier: Option<String>,
    pub range_label: String,
    pub subrange_label: Option<String>,
    pub product_line: String,
    pub description: String,
    pub obsolescence_status: Option<String>,
    pub end_of_service_date: Option<String>,
    pub replacement_suggestions: Option<String>,
    pub confidence: f64,
}

#[derive(Debug, Clone)]
pub struct LetterProductDraft {
    pub product_identifier: Option<String>,
    pub range_label: String,
    pub subrange_label: Option<String>,
    pub product_line: String,
    pub description: String,
    pub obsolescence_status: Option<String>,
    pub end_of_service_date: Option<String>,
    pub replacement_suggestions: Option<String>,
    pub confidence: f64,
}

/// A validated link from a letter to a concrete catalog row
/// (`spec.md` §3.1 "LetterProductMatch").
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LetterProductMatchRow {
    pub id: i64,
    pub letter_id: i64,
    pub letter_product_id: Option<i64>,
    pub catalog_product_identifier: String,
    pub confidence: f64,
    pub match_reason: String,
    pub technical_score: f64,
    pub nomenclature_score: f64,
    pub product_line_score: f64,
    pub match_type: String,
    pub from_range_discovery: bool,
}

#[derive(Debug, Clone)]
pub struct LetterProductMatchDraft {
    /// Index into the `LetterProductDraft` slice passed to
    /// `insert_letter_products`, resolved to a real id after insert.
    pub letter_product_index: Option<usize>,
    pub catalog_product_identifier: String,
    pub confidence: f64,
    pub match_reason: String,
    pub technical_score: f64,
    pub nomenclature_score: f64,
    pub product_line_score: f64,
    pub match_type: String,
    pub from_range_discovery: bool,
}
