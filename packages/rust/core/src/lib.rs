//! Core pipeline orchestration and domain logic for sitemind.
//!
//! This crate ties sitemap resolution, page fetching, and the content store
//! together:
//! - [`processor`] — compute-once content, prompt, and response caching
//! - [`pipeline`] — the staged index → scrape → AI-process run
//! - [`completion`] — the text-generation capability and its OpenRouter backend
//! - [`semantic`] — similarity search over fetched pages

pub mod completion;
pub mod pipeline;
pub mod processor;
pub mod semantic;

#[cfg(test)]
mod test_support;

pub use completion::{Completion, OpenRouterCompletion};
pub use pipeline::{
    IndexingSummary, Pipeline, PipelineOptions, PipelineResult, ProcessingSummary,
    ProgressReporter, ScrapingSummary, SilentProgress,
};
pub use processor::{CacheAwareProcessor, Ensured, build_prompt};
pub use semantic::{LexicalIndex, SearchFilter, SearchHit, SemanticIndex, entry_for};
