//! Document-to-catalog obsolescence letter matching pipeline.
//!
//! Ingests obsolescence announcement documents, extracts structured
//! product-obsolescence metadata via an external LLM, resolves the
//! referenced product ranges against a large catalog table, validates the
//! resolution with a second LLM call, and persists the result relationally.

pub mod artifacts;
pub mod catalog;
pub mod config;
pub mod discovery;
pub mod error;
pub mod extraction;
pub mod identity;
pub mod llm;
pub mod models;
pub mod pipeline;
pub mod rerank;
pub mod store;

pub use config::Config;
pub use error::CoreError;
pub use models::Document;
pub use pipeline::{Pipeline, PipelineSettings, ProcessingResult, ProcessingStatus};

/// Explicit constructor wiring for the pipeline's collaborators
/// (`spec.md` §9 "replace the implicit process-wide service locator"): build
/// each component from `Config`, then hand them to `Pipeline::new`. No
/// component reaches into globals or re-reads the environment after this.
pub struct PipelineContext {
    pub catalog: catalog::CatalogStore,
    pub store: store::LetterStore,
    pub llm: Box<dyn llm::LlmInvoker>,
    pub prompt: llm::PromptConfig,
    pub output: artifacts::OutputStore,
}

impl PipelineContext {
    pub async fn connect(config: &Config) -> Result<Self, CoreError> {
        let catalog = catalog::CatalogStore::connect(
            &config.database.url,
            config.database.max_connections,
            config.catalog.table.clone(),
            config.catalog.max_candidates,
        )
        .await?;

        let store =
            store::LetterStore::connect(&config.database.url, config.database.max_connections)
                .await?;

        let llm: Box<dyn llm::LlmInvoker> = Box::new(llm::LlmClient::new(
            &config.llm.api_base,
            &config.llm.api_key,
            config.llm.max_retries,
        ));

        let prompt = llm::PromptConfig {
            extract_model: config.llm.extract_model.clone(),
            rerank_model: config.llm.rerank_model.clone(),
            temperature: config.llm.temperature,
            ..llm::PromptConfig::default()
        };

        let output = artifacts::OutputStore::new(
            config.output.json_output_root.clone(),
            config.output.max_versions_per_document,
            config.output.retention_days,
            config.output.auto_cleanup_enabled,
        );

        Ok(Self { catalog, store, llm, prompt, output })
    }

    pub fn into_pipeline(self, config: &Config) -> Pipeline {
        let settings = PipelineSettings {
            skip_confidence_threshold: config.pipeline.skip_confidence_threshold,
            min_match_confidence: config.pipeline.min_match_confidence,
            force_reprocess: config.pipeline.force_reprocess,
            discovery_limit: config.catalog.max_candidates,
            request_timeout: std::time::Duration::from_secs(config.llm.request_timeout_secs),
        };
        Pipeline::new(self.catalog, self.store, self.llm, self.prompt, self.output, settings)
    }
}
