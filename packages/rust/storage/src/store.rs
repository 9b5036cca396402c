//! Typed content store over a [`KvStore`].
//!
//! Key layout (one flat keyspace):
//!
//! | key               | value                        | expiry          |
//! |-------------------|------------------------------|-----------------|
//! | `sitemap:{domain}`| [`SitemapMeta`]              | none            |
//! | `status:{domain}` | [`ProcessingStatus`]         | status TTL      |
//! | `urls:{domain}`   | ordered set of page keys     | none            |
//! | `url:{key}`       | [`PageRecord`]               | none            |
//! | `content:{key}`   | [`PageContent`]              | content TTL     |
//! | `prompt:{key}`    | [`PromptCacheEntry`]         | none            |
//! | `response:{key}`  | [`ResponseCacheEntry`]       | none            |
//! | `lock:{key}`      | lease token                  | lease TTL       |

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use sitemind_shared::{
    CachePolicy, PageContent, PageKey, PageRecord, ProcessingStatus, PromptCacheEntry,
    ResponseCacheEntry, Result, SitemapMeta, SitemindError,
};
use tracing::{debug, info, instrument, warn};

use crate::database::LibsqlKv;
use crate::kv::{KvStore, MemoryKv};

const SITEMAP: &str = "sitemap:";
const STATUS: &str = "status:";
const URLS: &str = "urls:";
const URL: &str = "url:";
const CONTENT: &str = "content:";
const PROMPT: &str = "prompt:";
const RESPONSE: &str = "response:";
const LOCK: &str = "lock:";

/// Aggregate counts across the whole store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub domains: usize,
    pub pages: usize,
    pub cached_content: usize,
    pub cached_prompts: usize,
    pub cached_responses: usize,
}

/// Sole owner of every persisted key. Cheap to clone.
#[derive(Clone)]
pub struct ContentStore {
    kv: Arc<dyn KvStore>,
    policy: CachePolicy,
}

impl std::fmt::Debug for ContentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentStore")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

fn encode<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| SitemindError::Storage(format!("encode: {e}")))
}

fn decode<T: DeserializeOwned>(key: &str, raw: &str) -> Result<T> {
    serde_json::from_str(raw).map_err(|e| SitemindError::Storage(format!("decode {key}: {e}")))
}

impl ContentStore {
    pub fn new(kv: Arc<dyn KvStore>, policy: CachePolicy) -> Self {
        Self { kv, policy }
    }

    /// A store backed by process memory.
    pub fn in_memory(policy: CachePolicy) -> Self {
        Self::new(Arc::new(MemoryKv::new()), policy)
    }

    /// Open (or create) the durable store at `path`.
    pub async fn open(path: &Path, policy: CachePolicy) -> Result<Self> {
        let kv = LibsqlKv::open(path).await?;
        info!(path = %path.display(), "content store opened");
        Ok(Self::new(Arc::new(kv), policy))
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    pub async fn close(&self) -> Result<()> {
        self.kv.close().await
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.kv.get(key).await? {
            Some(raw) => decode(key, &raw).map(Some),
            None => Ok(None),
        }
    }

    async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) -> Result<()> {
        self.kv.set(key, &encode(value)?, ttl).await
    }

    // -----------------------------------------------------------------------
    // Sitemap metadata and progress
    // -----------------------------------------------------------------------

    pub async fn put_sitemap_meta(&self, meta: &SitemapMeta) -> Result<()> {
        self.set_json(&format!("{SITEMAP}{}", meta.domain), meta, None)
            .await
    }

    pub async fn get_sitemap_meta(&self, domain: &str) -> Result<Option<SitemapMeta>> {
        self.get_json(&format!("{SITEMAP}{domain}")).await
    }

    /// Overwrite the live progress cursor. Expires after the status TTL.
    pub async fn put_status(&self, status: &ProcessingStatus) -> Result<()> {
        self.set_json(
            &format!("{STATUS}{}", status.domain),
            status,
            Some(self.policy.status_ttl),
        )
        .await
    }

    pub async fn get_status(&self, domain: &str) -> Result<Option<ProcessingStatus>> {
        self.get_json(&format!("{STATUS}{domain}")).await
    }

    // -----------------------------------------------------------------------
    // Page records and the domain index
    // -----------------------------------------------------------------------

    /// Insert `record` and add its key to the domain index.
    ///
    /// An existing record is never rewritten: its sitemap fields, index
    /// position, and processed/error state stay as first indexed. A key
    /// already owned by another domain is left out of this domain's index.
    /// Returns whether the key was new to the index.
    #[instrument(skip_all, fields(key = %record.key, domain = %record.domain))]
    pub async fn index_page(&self, record: &PageRecord) -> Result<bool> {
        let record_key = format!("{URL}{}", record.key);

        match self.get_json::<PageRecord>(&record_key).await? {
            Some(existing) if existing.domain != record.domain => {
                warn!(owner = %existing.domain, url = %record.url, "page owned by another domain");
                return Ok(false);
            }
            Some(_) => {}
            None => self.set_json(&record_key, record, None).await?,
        }

        let added = self
            .kv
            .zadd_if_absent(&format!("{URLS}{}", record.domain), record.key.as_str())
            .await?;
        debug!(added, "page indexed");
        Ok(added)
    }

    /// Whether a record for `key` exists under `domain`.
    pub async fn page_exists(&self, domain: &str, key: &PageKey) -> Result<bool> {
        Ok(self
            .get_page(key)
            .await?
            .is_some_and(|record| record.domain == domain))
    }

    pub async fn get_page(&self, key: &PageKey) -> Result<Option<PageRecord>> {
        self.get_json(&format!("{URL}{key}")).await
    }

    /// Page keys of a domain in insertion order.
    pub async fn page_keys(&self, domain: &str, limit: usize) -> Result<Vec<PageKey>> {
        let members = self
            .kv
            .zrange(&format!("{URLS}{domain}"), 0, limit, false)
            .await?;
        members
            .iter()
            .map(|m| {
                m.parse()
                    .map_err(|e| SitemindError::Storage(format!("bad index member {m}: {e}")))
            })
            .collect()
    }

    async fn records_for(&self, members: Vec<String>) -> Result<Vec<PageRecord>> {
        let mut records = Vec::with_capacity(members.len());
        for member in members {
            if let Some(record) = self.get_json(&format!("{URL}{member}")).await? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Indexed pages of `domain` in insertion order.
    pub async fn list_pages(
        &self,
        domain: &str,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<PageRecord>> {
        let members = self
            .kv
            .zrange(&format!("{URLS}{domain}"), offset, limit, false)
            .await?;
        self.records_for(members).await
    }

    /// The most recently indexed pages of `domain`, newest first.
    pub async fn recent_pages(&self, domain: &str, limit: usize) -> Result<Vec<PageRecord>> {
        let members = self
            .kv
            .zrange(&format!("{URLS}{domain}"), 0, limit, true)
            .await?;
        self.records_for(members).await
    }

    /// Record the outcome of a fetch attempt.
    ///
    /// Only `processed` and `error` change. An unknown key is ignored and
    /// reported as `false`.
    pub async fn mark_processed(
        &self,
        key: &PageKey,
        success: bool,
        error: Option<&str>,
    ) -> Result<bool> {
        let record_key = format!("{URL}{key}");
        let Some(mut record) = self.get_json::<PageRecord>(&record_key).await? else {
            debug!(%key, "mark_processed for unknown page dropped");
            return Ok(false);
        };
        record.processed = success;
        record.error = error.map(str::to_string);
        self.set_json(&record_key, &record, None).await?;
        Ok(true)
    }

    pub async fn get_url_count(&self, domain: &str) -> Result<usize> {
        self.kv.zcard(&format!("{URLS}{domain}")).await
    }

    // -----------------------------------------------------------------------
    // Cached artifacts
    // -----------------------------------------------------------------------

    pub async fn put_content(&self, key: &PageKey, content: &PageContent) -> Result<()> {
        self.set_json(
            &format!("{CONTENT}{key}"),
            content,
            Some(self.policy.content_ttl),
        )
        .await
    }

    pub async fn get_content(&self, key: &PageKey) -> Result<Option<PageContent>> {
        self.get_json(&format!("{CONTENT}{key}")).await
    }

    pub async fn del_content(&self, key: &PageKey) -> Result<bool> {
        self.kv.delete(&format!("{CONTENT}{key}")).await
    }

    pub async fn put_prompt(&self, key: &PageKey, entry: &PromptCacheEntry) -> Result<()> {
        self.set_json(&format!("{PROMPT}{key}"), entry, None).await
    }

    pub async fn get_prompt(&self, key: &PageKey) -> Result<Option<PromptCacheEntry>> {
        self.get_json(&format!("{PROMPT}{key}")).await
    }

    pub async fn del_prompt(&self, key: &PageKey) -> Result<bool> {
        self.kv.delete(&format!("{PROMPT}{key}")).await
    }

    pub async fn put_response(&self, key: &PageKey, entry: &ResponseCacheEntry) -> Result<()> {
        self.set_json(&format!("{RESPONSE}{key}"), entry, None).await
    }

    pub async fn get_response(&self, key: &PageKey) -> Result<Option<ResponseCacheEntry>> {
        self.get_json(&format!("{RESPONSE}{key}")).await
    }

    pub async fn del_response(&self, key: &PageKey) -> Result<bool> {
        self.kv.delete(&format!("{RESPONSE}{key}")).await
    }

    // -----------------------------------------------------------------------
    // Leases
    // -----------------------------------------------------------------------

    /// Try to take the per-page lease. `token` identifies the holder.
    pub async fn acquire_lease(&self, key: &PageKey, token: &str) -> Result<bool> {
        self.kv
            .set_if_absent(&format!("{LOCK}{key}"), token, Some(self.policy.lease_ttl))
            .await
    }

    pub async fn lease_held(&self, key: &PageKey) -> Result<bool> {
        Ok(self.kv.get(&format!("{LOCK}{key}")).await?.is_some())
    }

    /// Release the lease if `token` still holds it.
    pub async fn release_lease(&self, key: &PageKey, token: &str) -> Result<bool> {
        let lock_key = format!("{LOCK}{key}");
        match self.kv.get(&lock_key).await? {
            Some(holder) if holder == token => self.kv.delete(&lock_key).await,
            _ => Ok(false),
        }
    }

    // -----------------------------------------------------------------------
    // Aggregates (full keyspace scans)
    // -----------------------------------------------------------------------

    /// Number of live keys starting with `prefix`. O(total keys).
    pub async fn count_by_pattern(&self, prefix: &str) -> Result<usize> {
        Ok(self.kv.scan_prefix(prefix).await?.len())
    }

    /// Domains with sitemap metadata or a page index, sorted. O(total keys).
    pub async fn list_domains(&self) -> Result<Vec<String>> {
        let mut domains: Vec<String> = self
            .kv
            .scan_prefix(SITEMAP)
            .await?
            .into_iter()
            .chain(self.kv.scan_prefix(URLS).await?)
            .filter_map(|k| {
                k.strip_prefix(SITEMAP)
                    .or_else(|| k.strip_prefix(URLS))
                    .map(str::to_string)
            })
            .collect();
        domains.sort();
        domains.dedup();
        Ok(domains)
    }

    pub async fn get_stats(&self) -> Result<StoreStats> {
        Ok(StoreStats {
            domains: self.list_domains().await?.len(),
            pages: self.count_by_pattern(URL).await?,
            cached_content: self.count_by_pattern(CONTENT).await?,
            cached_prompts: self.count_by_pattern(PROMPT).await?,
            cached_responses: self.count_by_pattern(RESPONSE).await?,
        })
    }

    /// Delete a domain's pages, their cached artifacts, its index, metadata,
    /// and status. Index entries whose record belongs to another domain are
    /// dropped without touching that record. Not atomic: a concurrent writer
    /// may leave stragglers. Returns the number of pages removed.
    #[instrument(skip(self))]
    pub async fn purge_domain(&self, domain: &str) -> Result<usize> {
        let index_key = format!("{URLS}{domain}");
        let members = self.kv.zrange(&index_key, 0, usize::MAX, false).await?;

        let mut removed = 0;
        for member in &members {
            let owner = self
                .get_json::<PageRecord>(&format!("{URL}{member}"))
                .await?
                .map(|record| record.domain);
            if owner.as_deref().is_some_and(|owner| owner != domain) {
                debug!(%member, "kept page owned by another domain");
                continue;
            }
            for prefix in [URL, CONTENT, PROMPT, RESPONSE, LOCK] {
                self.kv.delete(&format!("{prefix}{member}")).await?;
            }
            removed += 1;
        }
        self.kv.delete(&index_key).await?;
        self.kv.delete(&format!("{SITEMAP}{domain}")).await?;
        self.kv.delete(&format!("{STATUS}{domain}")).await?;

        info!(pages = removed, "domain purged");
        Ok(removed)
    }
}
