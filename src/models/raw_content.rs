//! `letter_raw_content` — the extracted-text side channel kept apart from
//! `letters` because it can be large and is never queried by the pipeline
//! itself (`spec.md` §3.1 "RawContentRecord").

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RawContentRecord {
    pub id: i64,
    pub letter_id: i64,
    pub content_hash: String,
    pub text_hash: String,
    pub processing_signature: String,
    pub extracted_text: String,
    pub character_count: i32,
    pub extraction_method: String,
    pub quality_score: f64,
    pub created_at: DateTime<Utc>,
}

/// Draft form, before the letter id is known.
#[derive(Debug, Clone)]
pub struct RawContentDraft {
    pub content_hash: String,
    pub text_hash: String,
    pub processing_signature: String,
    pub extracted_text: String,
    pub character_count: i32,
    pub extraction_method: String,
    pub quality_score: f64,
}

impl RawContentDraft {
    /// Cheap proxy for extraction quality, mirrored on whitespace-ratio and
    /// length heuristics used upstream to decide whether OCR fallback text is
    /// worth persisting at all.
    pub fn compute_quality_score(text: &str) -> f64 {
        if text.is_empty() {
            return 0.0;
        }
        let len = text.chars().count() as f64;
        let whitespace = text.chars().filter(|c| c.is_whitespace()).count() as f64;
        let printable_ratio = 1.0 - (whitespace / len).min(0.9);
        let length_score = (len / 2000.0).min(1.0);
        (printable_ratio * 0.6 + length_score * 0.4).clamp(0.0, 1.0)
    }
}
