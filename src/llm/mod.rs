//! The LLM extraction/rerank client (component C).

mod client;
mod prompt;

pub use client::{InvokeContext, InvokeFailure, InvokeOutcome, LlmClient, LlmInvoker};
pub use prompt::PromptConfig;
