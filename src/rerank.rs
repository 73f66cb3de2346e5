//! Match Reranker (component G, `spec.md` §4.G): one call per letter, with
//! the union of all per-range candidates, asking the LLM to pick and score
//! final matches.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::discovery::ProductCandidates;
use crate::error::StageError;
use crate::extraction::ExtractedLetter;
use crate::llm::{InvokeContext, LlmInvoker, PromptConfig};
use crate::models::{CandidateRef, LlmCallDraft, LlmOperation};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ValidatedProduct {
    /// Must appear in the candidate set handed to the model; enforced by
    /// [`apply_hallucination_guard`], not merely requested of the model.
    pub product_identifier: String,
    pub range_label: String,
    #[serde(default)]
    pub confidence: f64,
    #[serde(default)]
    pub validation_reason: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RerankResult {
    #[serde(default)]
    pub validated_products: Vec<ValidatedProduct>,
    #[serde(default)]
    pub validation_confidence: f64,
    #[serde(default)]
    pub validation_errors: Vec<String>,
}

/// Reranks the whole letter at once. Even when every range came back with
/// zero candidates (`spec.md` §8 "empty ranges" scenario) the LLM is still
/// invoked, with an empty `candidates` array; the reranker is contracted to
/// return `validated_products=[]` for an empty candidate set, and the
/// hallucination guard enforces that regardless of what the model answers.
#[allow(clippy::too_many_arguments)]
pub async fn rerank(
    client: &dyn LlmInvoker,
    prompt: &PromptConfig,
    request_timeout: Duration,
    extracted: &ExtractedLetter,
    per_range_candidates: &[ProductCandidates],
    min_match_confidence: f64,
    document_name: &str,
    document_size: i64,
    letter_id: Option<i64>,
    prompt_config_hash: &str,
) -> Result<(RerankResult, serde_json::Value, Vec<LlmCallDraft>), (StageError, Vec<LlmCallDraft>)> {
    let union = union_candidates(per_range_candidates);

    let user_prompt = serde_json::json!({
        "extracted_letter": {
            "document_information": {
                "document_type": extracted.document_information.document_type,
                "document_title": extracted.document_information.document_title,
            },
            "product_identification": {
                "ranges": extracted.product_identification.ranges,
                "descriptions": extracted.product_identification.descriptions,
                "product_types": extracted.product_identification.product_types,
            },
            "overall_confidence": extracted.overall_confidence,
        },
        "candidates": union,
    })
    .to_string();

    let context = InvokeContext {
        letter_id,
        document_name: document_name.to_string(),
        document_size,
        prompt_template_name: prompt.rerank_template_name.clone(),
        prompt_version: prompt.prompt_version.clone(),
        prompt_config_hash: prompt_config_hash.to_string(),
    };
    let outcome = client
        .invoke(
            LlmOperation::Rerank,
            &prompt.rerank_model,
            &prompt.rerank_system_prompt,
            &user_prompt,
            prompt.temperature,
            request_timeout,
            &context,
        )
        .await;

    let (mut parsed, raw, attempts) = match outcome {
        Ok(success) => match serde_json::from_value::<RerankResult>(success.content.clone()) {
            Ok(parsed) => (parsed, success.content, success.attempts),
            Err(e) => {
                return Err((
                    StageError::rerank(format!("malformed rerank response: {e}")),
                    success.attempts,
                ));
            },
        },
        Err(failure) => {
            return Err((StageError::rerank(failure.error.to_string()), failure.attempts));
        },
    };

    parsed.validated_products = apply_hallucination_guard(
        std::mem::take(&mut parsed.validated_products),
        &union,
        min_match_confidence,
    );
    Ok((parsed, raw, attempts))
}

/// Deduplicates candidates across ranges by `product_identifier` — the same
/// catalog row can legitimately surface for more than one extracted range.
fn union_candidates(per_range_candidates: &[ProductCandidates]) -> Vec<CandidateRef> {
    let mut seen = HashSet::new();
    let mut union = Vec::new();
    for range in per_range_candidates {
        for candidate in range.as_refs() {
            if seen.insert(candidate.product_identifier.clone()) {
                union.push(candidate);
            }
        }
    }
    union
}

/// Drops any `validated_products` entry whose `product_identifier` is not a
/// member of the candidate set actually handed to the model (prevents
/// hallucinated SKUs, `spec.md` §4.G), and clamps confidence into `[0, 1]`.
fn apply_hallucination_guard(
    validated: Vec<ValidatedProduct>,
    candidates: &[CandidateRef],
    min_match_confidence: f64,
) -> Vec<ValidatedProduct> {
    let known: HashSet<&str> = candidates.iter().map(|c| c.product_identifier.as_str()).collect();

    validated
        .into_iter()
        .filter(|v| {
            let ok = known.contains(v.product_identifier.as_str());
            if !ok {
                tracing::warn!(
                    product_identifier = %v.product_identifier,
                    "dropping validated product not present in candidate set"
                );
            }
            ok
        })
        .map(|mut v| {
            v.confidence = v.confidence.clamp(0.0, 1.0);
            v
        })
        .filter(|v| v.confidence >= min_match_confidence)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str) -> CandidateRef {
        CandidateRef {
            product_identifier: id.to_string(),
            range_label: "PIX 36".into(),
            subrange_label: None,
            description: None,
            brand_label: None,
            product_line: Some("PIX".into()),
            devicetype_label: None,
            commercial_status: None,
        }
    }

    fn validated(id: &str, confidence: f64) -> ValidatedProduct {
        ValidatedProduct {
            product_identifier: id.to_string(),
            range_label: "PIX 36".into(),
            confidence,
            validation_reason: "test".into(),
        }
    }

    #[test]
    fn drops_hallucinated_identifiers() {
        let candidates = vec![candidate("PIX36-001")];
        let validated_products = vec![validated("PIX36-001", 0.9), validated("MADE-UP-999", 0.95)];
        let guarded = apply_hallucination_guard(validated_products, &candidates, 0.5);
        assert_eq!(guarded.len(), 1);
        assert_eq!(guarded[0].product_identifier, "PIX36-001");
    }

    #[test]
    fn drops_low_confidence_matches() {
        let candidates = vec![candidate("PIX36-001")];
        let validated_products = vec![validated("PIX36-001", 0.2)];
        assert!(apply_hallucination_guard(validated_products, &candidates, 0.5).is_empty());
    }

    #[test]
    fn clamps_out_of_range_confidence() {
        let candidates = vec![candidate("PIX36-001")];
        let validated_products = vec![validated("PIX36-001", 1.4)];
        let guarded = apply_hallucination_guard(validated_products, &candidates, 0.5);
        assert_eq!(guarded[0].confidence, 1.0);
    }

    #[test]
    fn union_dedupes_across_ranges() {
        let ranges = vec![
            ProductCandidates {
                candidates: vec![],
                strategy_tag: "primary".into(),
            },
        ];
        assert!(union_candidates(&ranges).is_empty());
    }
}
