//! Core domain types: page inventory, progress ledger, and cached artifacts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::key::PageKey;

// ---------------------------------------------------------------------------
// Sitemap inventory
// ---------------------------------------------------------------------------

/// One `<url>` entry from a sitemap URL set. Never persisted directly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageDescriptor {
    /// The `<loc>` value, verbatim.
    pub loc: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_frequency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<f32>,
}

impl PageDescriptor {
    /// A descriptor carrying only a location.
    pub fn new(loc: impl Into<String>) -> Self {
        Self {
            loc: loc.into(),
            last_modified: None,
            change_frequency: None,
            priority: None,
        }
    }
}

/// An indexed page, stored at `url:{key}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRecord {
    pub url: String,
    pub key: PageKey,
    pub domain: String,
    /// Human-readable name derived from the URL at indexing time.
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_frequency: Option<String>,
    pub indexed_at: DateTime<Utc>,
    /// Whether a fetch attempt has completed successfully.
    #[serde(default)]
    pub processed: bool,
    /// Last fetch failure, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PageRecord {
    /// Build a fresh, unprocessed record for `descriptor` under `domain`.
    pub fn from_descriptor(descriptor: &PageDescriptor, domain: &str) -> Self {
        Self {
            url: descriptor.loc.clone(),
            key: PageKey::from_url(&descriptor.loc),
            domain: domain.to_string(),
            display_name: display_name_from_url(&descriptor.loc),
            priority: descriptor.priority,
            last_modified: descriptor.last_modified.clone(),
            change_frequency: descriptor.change_frequency.clone(),
            indexed_at: Utc::now(),
            processed: false,
            error: None,
        }
    }
}

/// Derive a readable page name from the last path segment of a URL.
///
/// `https://example.com/guides/getting-started.html` → `Getting Started`.
/// Falls back to the host for root URLs.
pub fn display_name_from_url(url: &str) -> String {
    let Ok(parsed) = url::Url::parse(url) else {
        return url.to_string();
    };

    let segment = parsed
        .path_segments()
        .and_then(|mut segs| segs.rfind(|s| !s.is_empty()))
        .map(|s| {
            let stem = s.rsplit_once('.').map_or(s, |(stem, _)| stem);
            stem.to_string()
        })
        .filter(|s| !s.is_empty());

    match segment {
        Some(stem) => stem
            .split(['-', '_'])
            .filter(|w| !w.is_empty())
            .map(capitalize)
            .collect::<Vec<_>>()
            .join(" "),
        None => parsed.host_str().unwrap_or(url).to_string(),
    }
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

// ---------------------------------------------------------------------------
// Progress ledger
// ---------------------------------------------------------------------------

/// Lifecycle of the last indexing run for a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SitemapStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Per-domain sitemap summary, stored at `sitemap:{domain}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SitemapMeta {
    pub domain: String,
    pub sitemap_url: String,
    pub total_urls: usize,
    pub processed_urls: usize,
    pub last_processed: DateTime<Utc>,
    pub status: SitemapStatus,
}

/// Phase of a live pipeline run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Idle,
    Parsing,
    Indexing,
    Scraping,
    /// AI stage.
    Processing,
    Completed,
    Error,
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Parsing => "parsing",
            Self::Indexing => "indexing",
            Self::Scraping => "scraping",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Counters for a run in progress.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
}

/// Live progress cursor, stored at `status:{domain}` with a short TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingStatus {
    pub domain: String,
    pub status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_url: Option<String>,
    #[serde(default)]
    pub progress: Progress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProcessingStatus {
    /// A new cursor for `domain` entering `status` now.
    pub fn started(domain: &str, status: RunStatus) -> Self {
        Self {
            domain: domain.to_string(),
            status,
            current_url: None,
            progress: Progress::default(),
            started_at: Some(Utc::now()),
            completed_at: None,
            error: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Cached artifacts
// ---------------------------------------------------------------------------

/// Normalized page text, stored at `content:{key}` with a retention TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageContent {
    pub url: String,
    pub display_name: String,
    pub normalized_text: String,
    pub fetched_at: DateTime<Utc>,
    /// Length of `normalized_text` in characters.
    pub length: usize,
}

/// Generated prompt, stored at `prompt:{key}` until explicitly cleared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptCacheEntry {
    pub prompt: String,
    pub cached_at: DateTime<Utc>,
}

/// Completion output, stored at `response:{key}` until explicitly cleared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseCacheEntry {
    pub prompt: String,
    pub response: String,
    pub cached_at: DateTime<Utc>,
}

/// A document handed to the semantic index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticEntry {
    pub key: PageKey,
    pub url: String,
    pub display_name: String,
    pub domain: String,
    /// Text that gets embedded.
    pub prompt_text: String,
    /// Small JSON document returned verbatim with search hits.
    pub compact_payload: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_name_from_path() {
        assert_eq!(
            display_name_from_url("https://example.com/guides/getting-started.html"),
            "Getting Started"
        );
        assert_eq!(
            display_name_from_url("https://example.com/blog/my_first_post/"),
            "My First Post"
        );
        assert_eq!(display_name_from_url("https://example.com/"), "example.com");
    }

    #[test]
    fn record_from_descriptor() {
        let descriptor = PageDescriptor {
            loc: "https://example.com/about".into(),
            last_modified: Some("2024-05-01".into()),
            change_frequency: Some("weekly".into()),
            priority: Some(0.8),
        };
        let record = PageRecord::from_descriptor(&descriptor, "example.com");
        assert_eq!(record.key, PageKey::from_url("https://example.com/about"));
        assert_eq!(record.display_name, "About");
        assert_eq!(record.priority, Some(0.8));
        assert!(!record.processed);
        assert!(record.error.is_none());
    }

    #[test]
    fn status_serializes_snake_case() {
        let status = ProcessingStatus::started("example.com", RunStatus::Indexing);
        let json = serde_json::to_string(&status).expect("serialize");
        assert!(json.contains(r#""status":"indexing""#));
        let parsed: ProcessingStatus = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.status, RunStatus::Indexing);
        assert_eq!(parsed.progress, Progress::default());
    }

    #[test]
    fn record_tolerates_missing_optional_fields() {
        let json = r#"{
            "url": "https://example.com/a",
            "key": "0123456789abcdef",
            "domain": "example.com",
            "display_name": "A",
            "indexed_at": "2024-01-15T10:30:00Z"
        }"#;
        let record: PageRecord = serde_json::from_str(json).expect("deserialize");
        assert!(!record.processed);
        assert!(record.priority.is_none());
    }
}
