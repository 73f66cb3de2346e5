//! Pipeline Orchestrator (component H, `spec.md` §4.H): sequences
//! IDENTIFY → VALIDATE → EXTRACT → DISCOVER → RERANK → PERSIST for one
//! document, fail-fast, with no orchestrator-level retries (`spec.md` §5,
//! §7). Retries only happen inside the LLM Client.

use std::path::Path;
use std::time::{Duration, Instant};

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::artifacts::OutputStore;
use crate::catalog::CatalogStore;
use crate::discovery;
use crate::error::{StageError, StageKind};
use crate::extraction::{self, ExtractedLetter, ExtractedProduct};
use crate::llm::{LlmInvoker, PromptConfig};
use crate::models::{
    Document, LetterDraft, LetterProductDraft, LetterProductMatchDraft, LetterStatus, LlmCallDraft,
};
use crate::rerank::{self, RerankResult};
use crate::store::LetterStore;

/// The tag written to `letters.processing_method`, bumped whenever the
/// orchestrator's own semantics change (not the prompt templates, which are
/// tracked separately via `prompt_config_hash`).
const PROCESSING_METHOD: &str = "pipeline-v1";

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub skip_confidence_threshold: f64,
    pub min_match_confidence: f64,
    pub force_reprocess: bool,
    pub discovery_limit: usize,
    pub request_timeout: Duration,
}

pub struct Pipeline {
    catalog: CatalogStore,
    store: LetterStore,
    llm: Box<dyn LlmInvoker>,
    prompt: PromptConfig,
    output: OutputStore,
    settings: PipelineSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStatus {
    Skipped,
    Completed,
    Failed,
    Cancelled,
}

/// Everything the orchestrator hands back to its caller, per `spec.md` §7:
/// status, optional letter id, elapsed ms, confidence (0 on failure), and an
/// error message when applicable.
#[derive(Debug, Clone)]
pub struct ProcessingResult {
    pub status: ProcessingStatus,
    pub letter_id: Option<i64>,
    pub elapsed_ms: i64,
    pub confidence: f64,
    pub error_kind: Option<StageKind>,
    pub error_message: Option<String>,
    pub product_count: usize,
    pub match_count: usize,
}

impl ProcessingResult {
    fn skipped(letter_id: i64, elapsed_ms: i64, confidence: f64) -> Self {
        Self {
            status: ProcessingStatus::Skipped,
            letter_id: Some(letter_id),
            elapsed_ms,
            confidence,
            error_kind: None,
            error_message: None,
            product_count: 0,
            match_count: 0,
        }
    }

    fn cancelled(elapsed_ms: i64) -> Self {
        Self {
            status: ProcessingStatus::Cancelled,
            letter_id: None,
            elapsed_ms,
            confidence: 0.0,
            error_kind: Some(StageKind::Cancelled),
            error_message: Some("cancelled".to_string()),
            product_count: 0,
            match_count: 0,
        }
    }

    fn failed(err: &StageError, elapsed_ms: i64) -> Self {
        Self {
            status: ProcessingStatus::Failed,
            letter_id: None,
            elapsed_ms,
            confidence: 0.0,
            error_kind: Some(err.kind),
            error_message: Some(err.message.clone()),
            product_count: 0,
            match_count: 0,
        }
    }
}

impl Pipeline {
    pub fn new(
        catalog: CatalogStore,
        store: LetterStore,
        llm: Box<dyn LlmInvoker>,
        prompt: PromptConfig,
        output: OutputStore,
        settings: PipelineSettings,
    ) -> Self {
        Self { catalog, store, llm, prompt, output, settings }
    }

    /// Runs one document through the full state machine.
    pub async fn process_document(
        &self,
        document: &Document,
        cancellation: &CancellationToken,
    ) -> ProcessingResult {
        let started = Instant::now();

        let prompt_hash = match self.prompt.hash() {
            Ok(hash) => hash,
            Err(e) => {
                return ProcessingResult::failed(
                    &StageError::validation(format!("could not hash prompt config: {e}")),
                    elapsed_ms(started),
                );
            },
        };

        if cancellation.is_cancelled() {
            return ProcessingResult::cancelled(elapsed_ms(started));
        }

        // IDENTIFY
        match self.store.find_by_identity(&document.content_hash, &document.source_path()).await {
            Ok(Some(existing)) => {
                let compliant = existing.is_compliant(self.settings.skip_confidence_threshold);
                if compliant && !self.settings.force_reprocess {
                    tracing::info!(letter_id = existing.id, "skipping already-processed document");
                    return ProcessingResult::skipped(
                        existing.id,
                        elapsed_ms(started),
                        existing.extraction_confidence,
                    );
                }
                if self.settings.force_reprocess {
                    tracing::info!(letter_id = existing.id, "forced reprocess, deleting prior letter");
                    if let Err(e) = self.store.delete_letter(existing.id).await {
                        tracing::warn!(error = %e, "failed to delete prior letter ahead of forced reprocess");
                    }
                }
            },
            Ok(None) => {},
            Err(e) => return ProcessingResult::failed(&e.into(), elapsed_ms(started)),
        }

        if cancellation.is_cancelled() {
            return ProcessingResult::cancelled(elapsed_ms(started));
        }

        // VALIDATE
        if let Err(err) = validate_document(document) {
            return ProcessingResult::failed(&err, elapsed_ms(started));
        }

        if cancellation.is_cancelled() {
            return ProcessingResult::cancelled(elapsed_ms(started));
        }

        // EXTRACT
        let raw_document_reference = match build_document_reference(&document.path, &document.mime_hint)
        {
            Ok(reference) => reference,
            Err(e) => {
                return ProcessingResult::failed(
                    &StageError::validation(format!("could not read document: {e}")),
                    elapsed_ms(started),
                );
            },
        };

        let (extracted, raw_extraction, extract_attempts) = match extraction::extract(
            &self.llm,
            &self.prompt,
            self.settings.request_timeout,
            &raw_document_reference,
            &document.name(),
            document.byte_size as i64,
            None,
            &prompt_hash,
        )
        .await
        {
            Ok(outcome) => outcome,
            Err((stage_err, attempts)) => {
                self.persist_llm_calls(attempts).await;
                return ProcessingResult::failed(&stage_err, elapsed_ms(started));
            },
        };
        self.persist_llm_calls(extract_attempts).await;

        if cancellation.is_cancelled() {
            return ProcessingResult::cancelled(elapsed_ms(started));
        }

        // DISCOVER
        let normalized_products = extracted.normalized_products();
        let per_range_candidates =
            discovery::discover_all(&self.catalog, &normalized_products, self.settings.discovery_limit)
                .await;

        if cancellation.is_cancelled() {
            return ProcessingResult::cancelled(elapsed_ms(started));
        }

        // RERANK
        let (rerank_result, raw_rerank, rerank_attempts) = match rerank::rerank(
            &self.llm,
            &self.prompt,
            self.settings.request_timeout,
            &extracted,
            &per_range_candidates,
            self.settings.min_match_confidence,
            &document.name(),
            document.byte_size as i64,
            None,
            &prompt_hash,
        )
        .await
        {
            Ok(outcome) => outcome,
            Err((stage_err, attempts)) => {
                self.persist_llm_calls(attempts).await;
                return ProcessingResult::failed(&stage_err, elapsed_ms(started));
            },
        };
        self.persist_llm_calls(rerank_attempts).await;

        if cancellation.is_cancelled() {
            return ProcessingResult::cancelled(elapsed_ms(started));
        }

        // PERSIST
        let elapsed = elapsed_ms(started);
        let validation_details = build_validation_details(&normalized_products, &rerank_result);
        let (letter_draft, product_drafts, match_drafts) = build_drafts(
            document,
            &extracted,
            &normalized_products,
            &rerank_result,
            raw_extraction.clone(),
            validation_details.clone(),
            elapsed,
        );

        let letter_id =
            match self.store.insert_letter(&letter_draft, &product_drafts, &match_drafts).await {
                Ok(id) => id,
                Err(e) => return ProcessingResult::failed(&e.into(), elapsed_ms(started)),
            };

        // COMPLETED: write the JSON artifact bundle best-effort, outside the
        // DB transaction (spec.md §4.H, §6.3).
        let pipeline_summary = serde_json::json!({
            "letter_id": letter_id,
            "status": "completed",
            "product_count": product_drafts.len(),
            "match_count": match_drafts.len(),
            "elapsed_ms": elapsed_ms(started),
            "strategy_tags": per_range_candidates.iter().map(|c| c.strategy_tag.clone()).collect::<Vec<_>>(),
        });
        let processing_result = serde_json::json!({
            "status": "completed",
            "letter_id": letter_id,
            "elapsed_ms": elapsed_ms(started),
            "confidence": extracted.overall_confidence,
        });
        if let Err(e) = self
            .output
            .write_bundle(
                &document.content_hash,
                Some(letter_id),
                "completed",
                extracted.overall_confidence,
                &raw_extraction,
                &validation_details,
                &processing_result,
                &pipeline_summary,
                Utc::now(),
            )
            .await
        {
            tracing::warn!(error = %e, letter_id, "failed to write JSON artifact bundle");
        }

        tracing::info!(
            letter_id,
            products = product_drafts.len(),
            matches = match_drafts.len(),
            elapsed_ms = elapsed_ms(started),
            "pipeline completed"
        );

        ProcessingResult {
            status: ProcessingStatus::Completed,
            letter_id: Some(letter_id),
            elapsed_ms: elapsed_ms(started),
            confidence: extracted.overall_confidence,
            error_kind: None,
            error_message: None,
            product_count: product_drafts.len(),
            match_count: match_drafts.len(),
        }
    }

    async fn persist_llm_calls(&self, attempts: Vec<LlmCallDraft>) {
        for call in attempts {
            if let Err(e) = self.store.record_llm_call(&call).await {
                tracing::warn!(error = %e, "failed to record llm_api_calls row");
            }
        }
    }
}

fn elapsed_ms(started: Instant) -> i64 {
    started.elapsed().as_millis() as i64
}

fn validate_document(document: &Document) -> Result<(), StageError> {
    if !document.path.exists() {
        return Err(StageError::validation(format!("file not found: {}", document.path.display())));
    }
    if document.byte_size == 0 {
        return Err(StageError::validation("file is empty"));
    }
    Ok(())
}

/// The extractor is contracted to accept the raw document directly
/// (`spec.md` §4.E); this base64-encodes the bytes into a data URL so the
/// reference can travel inside a JSON user prompt without a second binary
/// transport.
fn build_document_reference(path: &Path, mime_hint: &str) -> std::io::Result<String> {
    let bytes = std::fs::read(path)?;
    let encoded = BASE64.encode(bytes);
    Ok(format!("data:{mime_hint};base64,{encoded}"))
}

/// `spec.md` §8 scenario 6: when there are no extracted ranges, validation
/// details record that there was nothing to validate rather than an empty
/// reranker payload.
fn build_validation_details(
    normalized_products: &[ExtractedProduct],
    rerank_result: &RerankResult,
) -> serde_json::Value {
    if normalized_products.is_empty() {
        return serde_json::json!({
            "message": "No products to validate",
            "validated_products": [],
            "validation_confidence": rerank_result.validation_confidence,
            "validation_errors": rerank_result.validation_errors,
        });
    }
    serde_json::json!({
        "validated_products": rerank_result.validated_products,
        "validation_confidence": rerank_result.validation_confidence,
        "validation_errors": rerank_result.validation_errors,
    })
}

#[allow(clippy::too_many_arguments)]
fn build_drafts(
    document: &Document,
    extracted: &ExtractedLetter,
    normalized_products: &[ExtractedProduct],
    rerank_result: &RerankResult,
    raw_extraction: serde_json::Value,
    validation_details: serde_json::Value,
    elapsed_ms: i64,
) -> (LetterDraft, Vec<LetterProductDraft>, Vec<LetterProductMatchDraft>) {
    let product_drafts: Vec<LetterProductDraft> = normalized_products
        .iter()
        .map(|product| LetterProductDraft {
            // The extractor's normalized schema (spec.md §4.E) never states a
            // product_identifier directly; that link is established later by
            // the reranker via LetterProductMatch.
            product_identifier: None,
            range_label: product.range_label.clone(),
            subrange_label: None,
            product_line: product.product_line.clone(),
            description: product.description.clone(),
            obsolescence_status: None,
            end_of_service_date: None,
            replacement_suggestions: None,
            confidence: extracted.overall_confidence,
        })
        .collect();

    let match_drafts: Vec<LetterProductMatchDraft> = rerank_result
        .validated_products
        .iter()
        .map(|validated| {
            let letter_product_index =
                product_drafts.iter().position(|p| p.range_label == validated.range_label);
            LetterProductMatchDraft {
                letter_product_index,
                catalog_product_identifier: validated.product_identifier.clone(),
                confidence: validated.confidence,
                match_reason: validated.validation_reason.clone(),
                // The reranker's output schema (spec.md §4.G) carries only an
                // aggregate confidence, not decomposed sub-scores; all three
                // mirror it until the reranker contract is extended.
                technical_score: validated.confidence,
                nomenclature_score: validated.confidence,
                product_line_score: validated.confidence,
                match_type: "final-llm-validated".to_string(),
                from_range_discovery: true,
            }
        })
        .collect();

    let letter_draft = LetterDraft {
        document_name: document.name(),
        source_path: document.source_path(),
        byte_size: document.byte_size as i64,
        content_hash: document.content_hash.clone(),
        processing_method: PROCESSING_METHOD.to_string(),
        processing_duration_ms: elapsed_ms,
        extraction_confidence: extracted.overall_confidence,
        raw_extractor_response: raw_extraction,
        ocr_text: None,
        processing_steps: serde_json::json!({
            "stages": ["identify", "validate", "extract", "discover", "rerank", "persist"],
        }),
        validation_details,
        status: LetterStatus::Completed,
    };

    (letter_draft, product_drafts, match_drafts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extraction::{DocumentInformation, ProductIdentification};
    use crate::rerank::ValidatedProduct;

    fn document(byte_size: u64) -> Document {
        Document {
            path: std::env::temp_dir().join("nonexistent-letter.pdf"),
            byte_size,
            content_hash: "abc123".to_string(),
            mime_hint: "application/pdf".to_string(),
        }
    }

    #[test]
    fn validate_document_rejects_missing_file() {
        let err = validate_document(&document(10)).unwrap_err();
        assert_eq!(err.kind, StageKind::Validation);
    }

    #[test]
    fn validate_document_rejects_empty_file() {
        let path = std::env::temp_dir().join("pipeline-test-empty-file.pdf");
        std::fs::write(&path, []).unwrap();
        let mut doc = document(0);
        doc.path = path.clone();
        let err = validate_document(&doc).unwrap_err();
        assert_eq!(err.kind, StageKind::Validation);
        assert!(err.message.contains("empty"));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn validate_document_accepts_nonempty_existing_file() {
        let path = std::env::temp_dir().join("pipeline-test-nonempty-file.pdf");
        std::fs::write(&path, b"%PDF-1.4").unwrap();
        let mut doc = document(8);
        doc.path = path.clone();
        assert!(validate_document(&doc).is_ok());
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn build_document_reference_encodes_as_base64_data_url() {
        let path = std::env::temp_dir().join("pipeline-test-reference.pdf");
        std::fs::write(&path, b"hello").unwrap();
        let reference = build_document_reference(&path, "application/pdf").unwrap();
        assert!(reference.starts_with("data:application/pdf;base64,"));
        assert!(reference.ends_with(&base64::engine::general_purpose::STANDARD.encode(b"hello")));
        std::fs::remove_file(&path).unwrap();
    }

    fn extracted_letter(ranges: Vec<&str>) -> ExtractedLetter {
        ExtractedLetter {
            document_information: DocumentInformation::default(),
            product_identification: ProductIdentification {
                ranges: ranges.into_iter().map(String::from).collect(),
                descriptions: vec![],
                product_types: vec![],
            },
            overall_confidence: 0.9,
        }
    }

    #[test]
    fn build_validation_details_reports_nothing_to_validate_for_empty_ranges() {
        let letter = extracted_letter(vec![]);
        let normalized = letter.normalized_products();
        let details = build_validation_details(&normalized, &RerankResult::default());
        assert_eq!(details["message"], "No products to validate");
        assert_eq!(details["validated_products"].as_array().unwrap().len(), 0);
    }

    #[test]
    fn build_validation_details_carries_validated_products_through() {
        let letter = extracted_letter(vec!["Galaxy 6000"]);
        let normalized = letter.normalized_products();
        let rerank_result = RerankResult {
            validated_products: vec![ValidatedProduct {
                product_identifier: "GLX6000-A".into(),
                range_label: "Galaxy 6000".into(),
                confidence: 0.88,
                validation_reason: "exact range match".into(),
            }],
            validation_confidence: 0.88,
            validation_errors: vec![],
        };
        let details = build_validation_details(&normalized, &rerank_result);
        assert!(details["message"].is_null());
        assert_eq!(details["validated_products"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn build_drafts_links_matches_back_to_their_letter_product_by_range_label() {
        let doc = document(123);
        let letter = extracted_letter(vec!["Galaxy 6000", "Masterpact MT"]);
        let normalized = letter.normalized_products();
        let rerank_result = RerankResult {
            validated_products: vec![ValidatedProduct {
                product_identifier: "MTZ1-A".into(),
                range_label: "Masterpact MT".into(),
                confidence: 0.75,
                validation_reason: "fuzzy range match".into(),
            }],
            validation_confidence: 0.75,
            validation_errors: vec![],
        };
        let validation_details = build_validation_details(&normalized, &rerank_result);
        let (letter_draft, product_drafts, match_drafts) = build_drafts(
            &doc,
            &letter,
            &normalized,
            &rerank_result,
            serde_json::json!({"raw": true}),
            validation_details,
            42,
        );

        assert_eq!(product_drafts.len(), 2);
        assert_eq!(match_drafts.len(), 1);
        assert_eq!(match_drafts[0].letter_product_index, Some(1));
        assert_eq!(match_drafts[0].technical_score, 0.75);
        assert_eq!(match_drafts[0].nomenclature_score, 0.75);
        assert_eq!(match_drafts[0].product_line_score, 0.75);
        assert_eq!(letter_draft.content_hash, "abc123");
        assert_eq!(letter_draft.status, LetterStatus::Completed);
    }

    #[test]
    fn build_drafts_unmatched_range_yields_no_letter_product_index() {
        let doc = document(10);
        let letter = extracted_letter(vec!["Galaxy 6000"]);
        let normalized = letter.normalized_products();
        let rerank_result = RerankResult {
            validated_products: vec![ValidatedProduct {
                product_identifier: "UNRELATED-1".into(),
                range_label: "Some Other Range".into(),
                confidence: 0.6,
                validation_reason: "test".into(),
            }],
            validation_confidence: 0.6,
            validation_errors: vec![],
        };
        let validation_details = build_validation_details(&normalized, &rerank_result);
        let (_, _, match_drafts) = build_drafts(
            &doc,
            &letter,
            &normalized,
            &rerank_result,
            serde_json::Value::Null,
            validation_details,
            0,
        );
        assert_eq!(match_drafts[0].letter_product_index, None);
    }
}
