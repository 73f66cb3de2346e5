//! Extraction stage (component E, `spec.md` §4.E): sends the raw document
//! straight to the LLM and normalizes its response into product ranges.
//!
//! This subsystem never pre-OCRs the document; the extractor is contracted
//! to accept the raw bytes/path reference directly.

use std::time::Duration;

use serde::Deserialize;

use crate::error::StageError;
use crate::llm::{InvokeContext, LlmInvoker, PromptConfig};
use crate::models::{LlmCallDraft, LlmOperation};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DocumentInformation {
    #[serde(default)]
    pub document_type: String,
    #[serde(default)]
    pub document_title: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProductIdentification {
    #[serde(default)]
    pub ranges: Vec<String>,
    #[serde(default)]
    pub descriptions: Vec<String>,
    #[serde(default)]
    pub product_types: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExtractedLetter {
    #[serde(default)]
    pub document_information: DocumentInformation,
    #[serde(default)]
    pub product_identification: ProductIdentification,
    #[serde(default)]
    pub overall_confidence: f64,
}

/// One normalized product range, paired with its description by index and
/// tagged with an inferred product line.
#[derive(Debug, Clone)]
pub struct ExtractedProduct {
    pub range_label: String,
    pub description: String,
    pub product_line: String,
}

impl ExtractedLetter {
    /// Pairs `ranges[i]` with `descriptions[i]` (empty string when the
    /// description array is short or absent) and infers a product line per
    /// range from keyword rules (`spec.md` §4.E).
    pub fn normalized_products(&self) -> Vec<ExtractedProduct> {
        let product_type_hint = self.product_identification.product_types.first().cloned();
        self.product_identification
            .ranges
            .iter()
            .enumerate()
            .map(|(i, range_label)| {
                let description = self
                    .product_identification
                    .descriptions
                    .get(i)
                    .cloned()
                    .unwrap_or_default();
                let product_line =
                    infer_product_line(range_label, &description, product_type_hint.as_deref());
                ExtractedProduct { range_label: range_label.clone(), description, product_line }
            })
            .collect()
    }
}

/// `spec.md` §4.E product-line inference ladder.
fn infer_product_line(range_label: &str, description: &str, product_type: Option<&str>) -> String {
    let haystack = format!("{range_label} {description}").to_lowercase();

    if ["ups", "galaxy", "uninterruptible", "backup"].iter().any(|kw| haystack.contains(kw)) {
        return "SPIBS".to_string();
    }
    if ["acb", "masterpact", "powerpact", "easypact"].iter().any(|kw| haystack.contains(kw)) {
        return "PPIBS".to_string();
    }
    if ["plc", "automation", "control"].iter().any(|kw| haystack.contains(kw)) {
        return "DPIBS".to_string();
    }
    if ["power", "distribution", "transformer"].iter().any(|kw| haystack.contains(kw)) {
        return "PSIBS".to_string();
    }

    match product_type.map(|t| t.to_lowercase()) {
        Some(t) if t.contains("medium voltage") => "PSIBS".to_string(),
        Some(t) if t.contains("low voltage") => "PPIBS".to_string(),
        _ => "PSIBS".to_string(),
    }
}

/// Runs the extraction call and parses its response. Returns the attempt
/// history regardless of outcome so the caller can persist every row to
/// `llm_api_calls`.
#[allow(clippy::too_many_arguments)]
pub async fn extract(
    client: &dyn LlmInvoker,
    prompt: &PromptConfig,
    request_timeout: Duration,
    raw_document_reference: &str,
    document_name: &str,
    document_size: i64,
    letter_id: Option<i64>,
    prompt_config_hash: &str,
) -> Result<(ExtractedLetter, serde_json::Value, Vec<LlmCallDraft>), (StageError, Vec<LlmCallDraft>)> {
    let context = InvokeContext {
        letter_id,
        document_name: document_name.to_string(),
        document_size,
        prompt_template_name: prompt.extract_template_name.clone(),
        prompt_version: prompt.prompt_version.clone(),
        prompt_config_hash: prompt_config_hash.to_string(),
    };
    let outcome = client
        .invoke(
            LlmOperation::Extract,
            &prompt.extract_model,
            &prompt.extract_system_prompt,
            raw_document_reference,
            prompt.temperature,
            request_timeout,
            &context,
        )
        .await;

    match outcome {
        Ok(success) => match serde_json::from_value::<ExtractedLetter>(success.content.clone()) {
            Ok(extracted) => Ok((extracted, success.content, success.attempts)),
            Err(e) => Err((
                StageError::extract(format!("malformed extraction response: {e}")),
                success.attempts,
            )),
        },
        Err(failure) => Err((StageError::extract(failure.error.to_string()), failure.attempts)),
    }
}
