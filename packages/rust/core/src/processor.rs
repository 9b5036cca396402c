//! Compute-once cache over fetched content, prompts, and responses.
//!
//! Each page key moves through
//! `no content → content cached → prompt cached → response cached`,
//! and every step is skipped when its artifact is already in the store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use sitemind_fetch::FetchChain;
use sitemind_shared::{
    FetchOptions, PageContent, PageKey, PromptCacheEntry, ResponseCacheEntry, Result,
    SitemindError, domain_of,
};
use sitemind_storage::ContentStore;

use crate::completion::Completion;
use crate::semantic::{self, SemanticIndex};

/// How often a caller waiting on another caller's lease re-checks the cache.
const DEFAULT_LEASE_POLL: Duration = Duration::from_millis(250);

/// A cached or freshly computed artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct Ensured<T> {
    pub value: T,
    /// `true` when the value came from the store without any upstream call.
    pub from_cache: bool,
}

impl<T> Ensured<T> {
    fn cached(value: T) -> Self {
        Self {
            value,
            from_cache: true,
        }
    }

    fn fresh(value: T) -> Self {
        Self {
            value,
            from_cache: false,
        }
    }
}

/// Build the prompt sent to the completion backend for one page.
pub fn build_prompt(content: &PageContent) -> String {
    format!(
        "You are analyzing a single web page.\n\n\
         Title: {}\n\
         URL: {}\n\n\
         Page content:\n\
         ---\n\
         {}\n\
         ---\n\n\
         Summarize what this page is about, list its key topics, and note \
         any facts, steps, or reference data a reader would look it up for. \
         Answer in concise Markdown.",
        content.display_name, content.url, content.normalized_text
    )
}

/// Cache-aware access to page artifacts.
#[derive(Clone)]
pub struct CacheAwareProcessor {
    store: ContentStore,
    fetcher: Arc<FetchChain>,
    options: FetchOptions,
    semantic: Option<Arc<dyn SemanticIndex>>,
    lease_poll: Duration,
}

impl std::fmt::Debug for CacheAwareProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheAwareProcessor")
            .field("fetcher", &self.fetcher)
            .field("semantic", &self.semantic.is_some())
            .finish_non_exhaustive()
    }
}

impl CacheAwareProcessor {
    pub fn new(store: ContentStore, fetcher: Arc<FetchChain>, options: FetchOptions) -> Self {
        Self {
            store,
            fetcher,
            options,
            semantic: None,
            lease_poll: DEFAULT_LEASE_POLL,
        }
    }

    /// Index freshly fetched pages into `index`.
    pub fn with_semantic_index(mut self, index: Arc<dyn SemanticIndex>) -> Self {
        self.semantic = Some(index);
        self
    }

    pub fn with_lease_poll(mut self, interval: Duration) -> Self {
        self.lease_poll = interval;
        self
    }

    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    /// Cached page content, or fetch and cache it.
    #[instrument(skip(self))]
    pub async fn ensure_content(&self, url: &str) -> Result<Ensured<PageContent>> {
        let key = PageKey::from_url(url);
        if let Some(content) = self.store.get_content(&key).await? {
            debug!(%key, "content cache hit");
            return Ok(Ensured::cached(content));
        }

        let outcome = self.fetcher.fetch(url, &self.options).await;
        let method_used = outcome.method_used.clone();
        let page = outcome.into_page(url)?;

        let content = PageContent {
            url: url.to_string(),
            display_name: page.display_name,
            length: page.text.chars().count(),
            normalized_text: page.text,
            fetched_at: Utc::now(),
        };
        self.store.put_content(&key, &content).await?;
        info!(
            %key,
            method = method_used.as_deref().unwrap_or("unknown"),
            length = content.length,
            "content cached"
        );

        self.reindex(&key, &content).await;
        Ok(Ensured::fresh(content))
    }

    async fn reindex(&self, key: &PageKey, content: &PageContent) {
        let Some(index) = &self.semantic else {
            return;
        };
        // a sitemap may list pages on other hosts; the record knows the owner
        let domain = match self.store.get_page(key).await {
            Ok(Some(record)) => record.domain,
            _ => domain_of(&content.url).unwrap_or_default(),
        };
        // absence of a previous entry is the common case
        let _ = index.remove(key).await;
        if let Err(e) = index.index(semantic::entry_for(key, content, &domain)).await {
            warn!(%key, error = %e, "semantic indexing failed");
        }
    }

    /// Cached prompt, or build it from cached content.
    ///
    /// Fails with `ContentMissing` when the page has not been fetched.
    #[instrument(skip(self))]
    pub async fn ensure_prompt(&self, url: &str) -> Result<Ensured<PromptCacheEntry>> {
        let key = PageKey::from_url(url);
        let Some(content) = self.store.get_content(&key).await? else {
            return Err(SitemindError::ContentMissing {
                url: url.to_string(),
            });
        };
        if let Some(prompt) = self.store.get_prompt(&key).await? {
            return Ok(Ensured::cached(prompt));
        }

        let entry = PromptCacheEntry {
            prompt: build_prompt(&content),
            cached_at: Utc::now(),
        };
        self.store.put_prompt(&key, &entry).await?;
        debug!(%key, "prompt cached");
        Ok(Ensured::fresh(entry))
    }

    /// Cached response, or generate one with `completion` and cache it.
    ///
    /// With single-flight enabled, concurrent callers for the same page
    /// share one completion call through a lease.
    #[instrument(skip(self, completion))]
    pub async fn ensure_response(
        &self,
        url: &str,
        completion: &dyn Completion,
    ) -> Result<Ensured<ResponseCacheEntry>> {
        let key = PageKey::from_url(url);
        if let Some(response) = self.store.get_response(&key).await? {
            debug!(%key, "response cache hit");
            return Ok(Ensured::cached(response));
        }

        if !self.store.policy().single_flight {
            return self.generate(url, &key, completion).await;
        }

        let token = Uuid::now_v7().to_string();
        loop {
            if self.store.acquire_lease(&key, &token).await? {
                let result = match self.store.get_response(&key).await {
                    Ok(Some(response)) => Ok(Ensured::cached(response)),
                    Ok(None) => self.generate(url, &key, completion).await,
                    Err(e) => Err(e),
                };
                if let Err(e) = self.store.release_lease(&key, &token).await {
                    warn!(%key, error = %e, "failed to release lease");
                }
                return result;
            }

            debug!(%key, "waiting on another caller's lease");
            tokio::time::sleep(self.lease_poll).await;
            if let Some(response) = self.store.get_response(&key).await? {
                return Ok(Ensured::cached(response));
            }
        }
    }

    async fn generate(
        &self,
        url: &str,
        key: &PageKey,
        completion: &dyn Completion,
    ) -> Result<Ensured<ResponseCacheEntry>> {
        let prompt = self.ensure_prompt(url).await?.value.prompt;
        let response = completion.complete(&prompt).await.map_err(|e| match e {
            SitemindError::Completion(_) => e,
            other => SitemindError::Completion(other.to_string()),
        })?;

        let entry = ResponseCacheEntry {
            prompt,
            response,
            cached_at: Utc::now(),
        };
        self.store.put_response(key, &entry).await?;
        info!(%key, "response cached");
        Ok(Ensured::fresh(entry))
    }

    /// Drop the cached prompt and response for `url`. Content stays.
    pub async fn clear(&self, url: &str) -> Result<()> {
        let key = PageKey::from_url(url);
        let prompt = self.store.del_prompt(&key).await?;
        let response = self.store.del_response(&key).await?;
        debug!(%key, prompt, response, "cleared cached prompt and response");
        Ok(())
    }
}
