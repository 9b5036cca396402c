//! Error types for sitemind.
//!
//! Library crates use [`SitemindError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all sitemind operations.
#[derive(Debug, thiserror::Error)]
pub enum SitemindError {
    /// Missing or invalid configuration (credentials, endpoints). Never retried.
    #[error("config error: {message}")]
    Config { message: String },

    /// Network fault or non-2xx response from an upstream.
    #[error("fetch error: {0}")]
    Fetch(String),

    /// Upstream answered with a non-success status.
    #[error("{url}: HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    /// A request exceeded its timeout.
    #[error("timeout: {0}")]
    Timeout(String),

    /// Malformed sitemap or upstream payload.
    #[error("format error: {message}")]
    Format { message: String },

    /// Sitemap index nesting went deeper than allowed.
    #[error("sitemap depth {depth} exceeds maximum {max_depth} at {url}")]
    DepthExceeded {
        url: String,
        depth: u32,
        max_depth: u32,
    },

    /// A prompt was requested before the page content was fetched.
    #[error("no cached content for {url}")]
    ContentMissing { url: String },

    /// The injected completion backend failed.
    #[error("completion error: {0}")]
    Completion(String),

    /// Key-value store failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// HTML-to-text conversion error.
    #[error("conversion error: {0}")]
    Conversion(String),

    /// Data validation error (bad URL, bad argument, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SitemindError>;

impl SitemindError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch(msg.into())
    }

    /// Create a format error from any displayable message.
    pub fn format(msg: impl Into<String>) -> Self {
        Self::Format {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Map a reqwest transport error, keeping timeouts distinguishable.
    pub fn transport(context: &str, err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout(format!("{context}: {err}"))
        } else {
            Self::Fetch(format!("{context}: {err}"))
        }
    }

    /// Whether the operation that produced this error may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Fetch(_) | Self::Timeout(_) => true,
            Self::HttpStatus { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            _ => false,
        }
    }
}
