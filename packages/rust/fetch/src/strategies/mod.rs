//! Page retrieval strategies.
//!
//! Each strategy turns a URL into normalized page text by a different route.
//! [`crate::FetchChain`] tries them in order until one succeeds.

mod browser;
mod direct;
mod reader;

use async_trait::async_trait;
use sitemind_shared::{FetchOptions, Result};

pub use browser::BrowserStrategy;
pub use direct::DirectStrategy;
pub use reader::ReaderStrategy;

/// Remote strategies returning less text than this are treated as failures.
pub const MIN_CONTENT_LEN: usize = 100;

/// Text produced by a successful strategy attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedPage {
    pub display_name: String,
    pub text: String,
}

/// One way of retrieving a page.
///
/// New retrieval routes plug into the chain by implementing this trait.
#[async_trait]
pub trait FetchStrategy: Send + Sync {
    /// Short name reported as `method_used`.
    fn name(&self) -> &'static str;

    /// Whether the options allow this strategy to run.
    fn is_enabled(&self, options: &FetchOptions) -> bool;

    /// Fetch and normalize `url`.
    async fn attempt(&self, url: &str, options: &FetchOptions) -> Result<FetchedPage>;
}

/// Reject remote output too short to be a real page.
pub(crate) fn require_min_len(page: FetchedPage, url: &str) -> Result<FetchedPage> {
    let len = page.text.chars().count();
    if len < MIN_CONTENT_LEN {
        return Err(sitemind_shared::SitemindError::format(format!(
            "{url}: only {len} characters of content (minimum {MIN_CONTENT_LEN})"
        )));
    }
    Ok(page)
}
