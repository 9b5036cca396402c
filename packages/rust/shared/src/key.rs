//! Page identity: URL → fixed-width content key, and URL → domain.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::error::{Result, SitemindError};

/// Number of hex characters kept from the digest.
pub const KEY_LEN: usize = 16;

/// Storage identity of a page, derived from its literal URL string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageKey(String);

impl PageKey {
    /// Hash a URL into its key. The URL is used byte-for-byte, never normalized.
    pub fn from_url(url: &str) -> Self {
        let digest = Sha256::digest(url.as_bytes());
        let mut hex = format!("{digest:x}");
        hex.truncate(KEY_LEN);
        Self(hex)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for PageKey {
    type Err = SitemindError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        if s.len() == KEY_LEN && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            Ok(Self(s.to_ascii_lowercase()))
        } else {
            Err(SitemindError::validation(format!(
                "page key must be {KEY_LEN} hex characters, got {s:?}"
            )))
        }
    }
}

/// Shorthand for [`PageKey::from_url`].
pub fn page_key(url: &str) -> PageKey {
    PageKey::from_url(url)
}

/// Host portion of a URL, used as the domain scope for indexes and status.
pub fn domain_of(url: &str) -> Result<String> {
    let parsed = Url::parse(url)
        .map_err(|e| SitemindError::validation(format!("invalid URL '{url}': {e}")))?;
    parsed
        .host_str()
        .map(|h| h.to_ascii_lowercase())
        .ok_or_else(|| SitemindError::validation(format!("URL has no host: {url}")))
}
