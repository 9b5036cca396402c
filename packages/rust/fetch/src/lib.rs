//! Page retrieval with ordered fallback.
//!
//! This crate provides:
//! - [`strategies`] — reader service, headless browser, and direct fetch
//! - [`FetchChain`] — tries enabled strategies in order, direct fetch last

mod chain;
pub mod strategies;

pub use chain::{FetchChain, FetchOutcome, build_client};
pub use strategies::{
    BrowserStrategy, DirectStrategy, FetchStrategy, FetchedPage, MIN_CONTENT_LEN, ReaderStrategy,
};
