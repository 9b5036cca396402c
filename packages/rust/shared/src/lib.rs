//! Shared types, error model, and configuration for sitemind.
//!
//! This crate is the foundation depended on by all other sitemind crates.
//! It provides:
//! - [`SitemindError`] — the unified error type
//! - Page identity ([`PageKey`], [`domain_of`])
//! - Domain types ([`PageRecord`], [`PageContent`], [`ProcessingStatus`], ...)
//! - [`with_retries`] — bounded exponential backoff
//! - Configuration ([`AppConfig`], [`FetchOptions`], config loading)

pub mod config;
pub mod error;
pub mod key;
pub mod retry;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, COMPLETION_TIMEOUT, CacheConfig, CachePolicy, FetchConfig, FetchOptions,
    OpenRouterConfig, PipelineConfig, ServiceConfig, StoreConfig, config_dir, config_file_path,
    expand_home, init_config, load_config, load_config_from, validate_api_key,
};
pub use error::{Result, SitemindError};
pub use key::{KEY_LEN, PageKey, domain_of, page_key};
pub use retry::{RetryPolicy, with_retries};
pub use types::{
    PageContent, PageDescriptor, PageRecord, ProcessingStatus, Progress, PromptCacheEntry,
    ResponseCacheEntry, RunStatus, SemanticEntry, SitemapMeta, SitemapStatus,
    display_name_from_url,
};
