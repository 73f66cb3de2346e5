//! The extraction/rerank prompt templates, hashed into
//! `llm_api_calls.prompt_config_hash` / `letters` identity so a template
//! change always forces reprocessing (`spec.md` §4.D, §9).

use serde::Serialize;

use crate::error::StoreError;
use crate::identity::prompt_config_hash;

#[derive(Debug, Clone, Serialize)]
pub struct PromptConfig {
    pub extract_system_prompt: String,
    pub extract_model: String,
    pub extract_template_name: String,
    pub rerank_system_prompt: String,
    pub rerank_model: String,
    pub rerank_template_name: String,
    pub prompt_version: String,
    pub temperature: f32,
}

impl PromptConfig {
    pub fn hash(&self) -> Result<String, StoreError> {
        let value = serde_json::to_value(self)?;
        prompt_config_hash(&value)
    }
}

impl Default for PromptConfig {
    fn default() -> Self {
        Self {
            extract_system_prompt: DEFAULT_EXTRACT_PROMPT.to_string(),
            extract_model: "grok-4".to_string(),
            extract_template_name: "extract_obsolescence_v1".to_string(),
            rerank_system_prompt: DEFAULT_RERANK_PROMPT.to_string(),
            rerank_model: "grok-4".to_string(),
            rerank_template_name: "rerank_validate_v1".to_string(),
            prompt_version: "v1".to_string(),
            temperature: 0.1,
        }
    }
}

const DEFAULT_EXTRACT_PROMPT: &str = "You are an expert in industrial equipment obsolescence \
letters. Given the raw text of a letter, return a JSON object describing the document \
(document_type, product_line, products: an array of {range_label, subrange_label, \
product_identifier, description, obsolescence_status, end_of_service_date, \
replacement_suggestions, confidence}) and nothing else.";

const DEFAULT_RERANK_PROMPT: &str = "You are validating candidate catalog matches for a \
product range extracted from an obsolescence letter. Given the extracted product and a list \
of candidate catalog entries, return a JSON object with a `matches` array, each entry scoring \
{product_identifier, confidence, technical_score, nomenclature_score, product_line_score, \
match_reason}. Never invent a product_identifier that is not present in the candidate list.";
