//! Data model for the document-to-catalog matching pipeline.

pub mod catalog;
pub mod document;
pub mod letter;
pub mod llm_call;
pub mod raw_content;

pub use catalog::{CandidateRef, CatalogProduct, CatalogStats, DiscoverFilters, DiscoveryResult};
pub use document::Document;
pub use letter::{
    LetterDraft, LetterProductDraft, LetterProductMatchDraft, LetterProductMatchRow,
    LetterProductRow, LetterRow, LetterStatus, LetterSummary,
};
pub use llm_call::{LlmCallDraft, LlmCallRecord, LlmOperation, LlmUsageStats};
pub use raw_content::{RawContentDraft, RawContentRecord};
