//! End-to-end run: sitemap → index → scrape → AI-process.
//!
//! Stages run strictly one after another and, inside the scrape and AI
//! stages, one page at a time with a fixed pause between upstream calls.
//! Every stage is idempotent, so an interrupted run resumes by running the
//! remaining stages again.

use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use tracing::{info, instrument, warn};

use sitemind_discovery::{ResolverOptions, SitemapResolver};
use sitemind_fetch::FetchChain;
use sitemind_shared::{
    AppConfig, FetchOptions, PageDescriptor, PageKey, PageRecord, ProcessingStatus, Progress,
    Result, RunStatus, SitemapMeta, SitemapStatus, SitemindError, domain_of,
};
use sitemind_storage::ContentStore;

use crate::completion::Completion;
use crate::processor::CacheAwareProcessor;

/// Bounds for one run.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub max_urls: usize,
    pub scrape_delay: Duration,
    pub ai_delay: Duration,
    /// Records upserted concurrently per indexing batch.
    pub batch_size: usize,
    pub skip_existing: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for PipelineOptions {
    fn from(config: &AppConfig) -> Self {
        let p = &config.pipeline;
        Self {
            max_urls: p.max_urls,
            scrape_delay: Duration::from_millis(p.scrape_delay_ms),
            ai_delay: Duration::from_millis(p.ai_delay_ms),
            batch_size: p.batch_size.max(1),
            skip_existing: p.skip_existing,
        }
    }
}

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexingSummary {
    pub total: usize,
    pub indexed: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ScrapingSummary {
    pub total: usize,
    pub attempted: usize,
    pub succeeded: usize,
    /// Successes served from the content cache.
    pub cached: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessingSummary {
    pub total: usize,
    pub attempted: usize,
    pub succeeded: usize,
    pub cached: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

/// Outcome of [`Pipeline::run_pipeline`]. Failures are reported here, never raised.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub success: bool,
    pub domain: String,
    pub sitemap_url: String,
    pub indexing: IndexingSummary,
    pub scraping: ScrapingSummary,
    pub processing: ProcessingSummary,
    pub elapsed: Duration,
    /// Per-item failures from every stage.
    pub errors: Vec<String>,
    /// The stage-fatal error that ended the run early.
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when a stage starts with its item count.
    fn stage(&self, status: RunStatus, total: usize);
    /// Called before each item of the current stage.
    fn item(&self, url: &str, current: usize, total: usize);
    /// Called when a stage ends.
    fn stage_done(&self, status: RunStatus, succeeded: usize, failed: usize);
    /// Called when a full run completes.
    fn done(&self, result: &PipelineResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn stage(&self, _status: RunStatus, _total: usize) {}
    fn item(&self, _url: &str, _current: usize, _total: usize) {}
    fn stage_done(&self, _status: RunStatus, _succeeded: usize, _failed: usize) {}
    fn done(&self, _result: &PipelineResult) {}
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Drives runs against one shared store.
#[derive(Debug, Clone)]
pub struct Pipeline {
    store: ContentStore,
    resolver: SitemapResolver,
    processor: CacheAwareProcessor,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(
        resolver: SitemapResolver,
        processor: CacheAwareProcessor,
        options: PipelineOptions,
    ) -> Self {
        Self {
            store: processor.store().clone(),
            resolver,
            processor,
            options,
        }
    }

    /// Wire the standard resolver, fetch chain, and processor from `config`.
    pub fn from_config(config: &AppConfig, store: ContentStore) -> Result<Self> {
        let resolver = SitemapResolver::new(&ResolverOptions {
            max_depth: config.pipeline.max_depth,
            ..ResolverOptions::default()
        })?;
        let chain = FetchChain::from_config(config)?;
        let processor =
            CacheAwareProcessor::new(store, std::sync::Arc::new(chain), FetchOptions::from(config));
        Ok(Self::new(resolver, processor, PipelineOptions::from(config)))
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn processor(&self) -> &CacheAwareProcessor {
        &self.processor
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    async fn set_status(
        &self,
        status: &mut ProcessingStatus,
        phase: RunStatus,
        total: usize,
    ) -> Result<()> {
        status.status = phase;
        status.current_url = None;
        status.progress = Progress {
            total,
            ..Progress::default()
        };
        self.store.put_status(status).await
    }

    async fn complete_status(&self, status: &mut ProcessingStatus) -> Result<()> {
        status.status = RunStatus::Completed;
        status.current_url = None;
        status.completed_at = Some(Utc::now());
        self.store.put_status(status).await
    }

    async fn fail_status(&self, status: &mut ProcessingStatus, error: &SitemindError) {
        status.status = RunStatus::Error;
        status.error = Some(error.to_string());
        status.completed_at = Some(Utc::now());
        if let Err(e) = self.store.put_status(status).await {
            warn!(error = %e, "failed to record error status");
        }
    }

    // -----------------------------------------------------------------------
    // Stage 1: index
    // -----------------------------------------------------------------------

    /// Resolve `sitemap_url` and index up to `max_urls` of its pages.
    #[instrument(skip(self, progress))]
    pub async fn index_sitemap(
        &self,
        sitemap_url: &str,
        progress: &dyn ProgressReporter,
    ) -> Result<IndexingSummary> {
        let domain = domain_of(sitemap_url)?;
        let mut status = ProcessingStatus::started(&domain, RunStatus::Parsing);
        self.store.put_status(&status).await?;

        match self.index_stage(sitemap_url, &domain, &mut status, progress).await {
            Ok(summary) => {
                self.complete_status(&mut status).await?;
                Ok(summary)
            }
            Err(e) => {
                self.fail_status(&mut status, &e).await;
                Err(e)
            }
        }
    }

    async fn index_stage(
        &self,
        sitemap_url: &str,
        domain: &str,
        status: &mut ProcessingStatus,
        progress: &dyn ProgressReporter,
    ) -> Result<IndexingSummary> {
        let mut pages = self.resolver.resolve(sitemap_url).await?;
        pages.truncate(self.options.max_urls);

        let total = pages.len();
        let mut summary = IndexingSummary {
            total,
            ..IndexingSummary::default()
        };
        progress.stage(RunStatus::Indexing, total);
        self.set_status(status, RunStatus::Indexing, total).await?;

        let mut meta = SitemapMeta {
            domain: domain.to_string(),
            sitemap_url: sitemap_url.to_string(),
            total_urls: self.store.get_url_count(domain).await?,
            processed_urls: 0,
            last_processed: Utc::now(),
            status: SitemapStatus::Processing,
        };
        if let Some(existing) = self.store.get_sitemap_meta(domain).await? {
            meta.processed_urls = existing.processed_urls;
        }

        let mut done = 0;
        let mut first_error = None;
        for batch in pages.chunks(self.options.batch_size.max(1)) {
            let results = join_all(batch.iter().map(|page| self.index_one(page, domain))).await;

            for (page, result) in batch.iter().zip(results) {
                done += 1;
                progress.item(&page.loc, done, total);
                match result {
                    Ok(true) => summary.indexed += 1,
                    Ok(false) => summary.skipped += 1,
                    Err(e) => {
                        warn!(url = %page.loc, error = %e, "failed to index page");
                        summary.errors.push(format!("{}: {e}", page.loc));
                        first_error.get_or_insert(e);
                    }
                }
            }

            status.progress.completed = summary.indexed + summary.skipped;
            status.progress.failed = summary.errors.len();
            status.current_url = batch.last().map(|p| p.loc.clone());
            self.store.put_status(status).await?;

            meta.total_urls = self.store.get_url_count(domain).await?;
            meta.last_processed = Utc::now();
            self.store.put_sitemap_meta(&meta).await?;
        }

        if let Some(cause) = first_error.filter(|_| summary.errors.len() == total) {
            meta.status = SitemapStatus::Failed;
            self.store.put_sitemap_meta(&meta).await?;
            warn!(total, "indexing failed for every page");
            return Err(cause);
        }

        meta.status = SitemapStatus::Completed;
        meta.total_urls = self.store.get_url_count(domain).await?;
        self.store.put_sitemap_meta(&meta).await?;
        progress.stage_done(RunStatus::Indexing, summary.indexed, summary.errors.len());

        info!(
            total,
            indexed = summary.indexed,
            skipped = summary.skipped,
            errors = summary.errors.len(),
            "indexing complete"
        );
        Ok(summary)
    }

    /// Returns `Ok(false)` when the page was already indexed and left alone.
    async fn index_one(&self, page: &PageDescriptor, domain: &str) -> Result<bool> {
        let record = PageRecord::from_descriptor(page, domain);
        if self.options.skip_existing && self.store.page_exists(domain, &record.key).await? {
            return Ok(false);
        }
        self.store.index_page(&record).await
    }

    /// Page URLs of `domain` in index order, capped at `max_urls`.
    async fn stage_urls(&self, domain: &str) -> Result<Vec<(PageKey, String)>> {
        let mut urls = Vec::new();
        for key in self.store.page_keys(domain, self.options.max_urls).await? {
            match self.store.get_page(&key).await? {
                Some(record) => urls.push((key, record.url)),
                None => warn!(%key, "index entry without a page record"),
            }
        }
        Ok(urls)
    }

    // -----------------------------------------------------------------------
    // Stage 2: scrape
    // -----------------------------------------------------------------------

    /// Fetch and cache content for the indexed pages of `domain`.
    #[instrument(skip(self, progress))]
    pub async fn scrape_domain(
        &self,
        domain: &str,
        progress: &dyn ProgressReporter,
    ) -> Result<ScrapingSummary> {
        let mut status = ProcessingStatus::started(domain, RunStatus::Scraping);
        match self.scrape_stage(domain, &mut status, progress).await {
            Ok(summary) => {
                self.complete_status(&mut status).await?;
                Ok(summary)
            }
            Err(e) => {
                self.fail_status(&mut status, &e).await;
                Err(e)
            }
        }
    }

    async fn scrape_stage(
        &self,
        domain: &str,
        status: &mut ProcessingStatus,
        progress: &dyn ProgressReporter,
    ) -> Result<ScrapingSummary> {
        let urls = self.stage_urls(domain).await?;
        let total = urls.len();
        let mut summary = ScrapingSummary {
            total,
            ..ScrapingSummary::default()
        };
        progress.stage(RunStatus::Scraping, total);
        self.set_status(status, RunStatus::Scraping, total).await?;

        let mut fetched_before = false;
        for (i, (key, url)) in urls.iter().enumerate() {
            progress.item(url, i + 1, total);

            let needs_fetch = self.store.get_content(key).await?.is_none();
            if needs_fetch && fetched_before && !self.options.scrape_delay.is_zero() {
                tokio::time::sleep(self.options.scrape_delay).await;
            }
            fetched_before |= needs_fetch;

            summary.attempted += 1;
            match self.processor.ensure_content(url).await {
                Ok(content) => {
                    summary.succeeded += 1;
                    if content.from_cache {
                        summary.cached += 1;
                    }
                    self.store.mark_processed(key, true, None).await?;
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "scrape failed");
                    summary.failed += 1;
                    summary.errors.push(format!("{url}: {e}"));
                    self.store.mark_processed(key, false, Some(&e.to_string())).await?;
                }
            }

            status.current_url = Some(url.clone());
            status.progress.completed = summary.succeeded;
            status.progress.failed = summary.failed;
            self.store.put_status(status).await?;
        }

        if let Some(mut meta) = self.store.get_sitemap_meta(domain).await? {
            meta.processed_urls = summary.succeeded;
            meta.last_processed = Utc::now();
            self.store.put_sitemap_meta(&meta).await?;
        }
        progress.stage_done(RunStatus::Scraping, summary.succeeded, summary.failed);

        info!(
            total,
            succeeded = summary.succeeded,
            cached = summary.cached,
            failed = summary.failed,
            "scraping complete"
        );
        Ok(summary)
    }

    // -----------------------------------------------------------------------
    // Stage 3: AI-process
    // -----------------------------------------------------------------------

    /// Generate and cache responses for the indexed pages of `domain`.
    #[instrument(skip(self, completion, progress))]
    pub async fn process_domain(
        &self,
        domain: &str,
        completion: &dyn Completion,
        progress: &dyn ProgressReporter,
    ) -> Result<ProcessingSummary> {
        let mut status = ProcessingStatus::started(domain, RunStatus::Processing);
        match self.process_stage(domain, completion, &mut status, progress).await {
            Ok(summary) => {
                self.complete_status(&mut status).await?;
                Ok(summary)
            }
            Err(e) => {
                self.fail_status(&mut status, &e).await;
                Err(e)
            }
        }
    }

    async fn process_stage(
        &self,
        domain: &str,
        completion: &dyn Completion,
        status: &mut ProcessingStatus,
        progress: &dyn ProgressReporter,
    ) -> Result<ProcessingSummary> {
        let urls = self.stage_urls(domain).await?;
        let total = urls.len();
        let mut summary = ProcessingSummary {
            total,
            ..ProcessingSummary::default()
        };
        progress.stage(RunStatus::Processing, total);
        self.set_status(status, RunStatus::Processing, total).await?;

        let mut called_before = false;
        for (i, (key, url)) in urls.iter().enumerate() {
            progress.item(url, i + 1, total);

            // only pages with content and no response will reach the model
            let needs_call = self.store.get_response(key).await?.is_none()
                && self.store.get_content(key).await?.is_some();
            if needs_call && called_before && !self.options.ai_delay.is_zero() {
                tokio::time::sleep(self.options.ai_delay).await;
            }
            called_before |= needs_call;

            summary.attempted += 1;
            match self.processor.ensure_response(url, completion).await {
                Ok(response) => {
                    summary.succeeded += 1;
                    if response.from_cache {
                        summary.cached += 1;
                    }
                }
                Err(e) => {
                    warn!(url = %url, error = %e, "processing failed");
                    summary.failed += 1;
                    summary.errors.push(format!("{url}: {e}"));
                }
            }

            status.current_url = Some(url.clone());
            status.progress.completed = summary.succeeded;
            status.progress.failed = summary.failed;
            self.store.put_status(status).await?;
        }
        progress.stage_done(RunStatus::Processing, summary.succeeded, summary.failed);

        info!(
            total,
            succeeded = summary.succeeded,
            cached = summary.cached,
            failed = summary.failed,
            "processing complete"
        );
        Ok(summary)
    }

    // -----------------------------------------------------------------------
    // Full run
    // -----------------------------------------------------------------------

    /// Run all three stages for `sitemap_url`.
    #[instrument(skip(self, completion, progress))]
    pub async fn run_pipeline(
        &self,
        sitemap_url: &str,
        completion: &dyn Completion,
        progress: &dyn ProgressReporter,
    ) -> PipelineResult {
        let start = Instant::now();
        let mut result = PipelineResult {
            success: false,
            domain: domain_of(sitemap_url).unwrap_or_default(),
            sitemap_url: sitemap_url.to_string(),
            indexing: IndexingSummary::default(),
            scraping: ScrapingSummary::default(),
            processing: ProcessingSummary::default(),
            elapsed: Duration::ZERO,
            errors: Vec::new(),
            error: None,
        };

        info!(sitemap_url, "starting pipeline run");
        if let Err(e) = self.run_stages(sitemap_url, completion, progress, &mut result).await {
            warn!(error = %e, "pipeline run aborted");
            result.error = Some(e.to_string());
        } else {
            result.success = true;
        }

        result.errors = result
            .indexing
            .errors
            .iter()
            .chain(&result.scraping.errors)
            .chain(&result.processing.errors)
            .cloned()
            .collect();
        result.elapsed = start.elapsed();

        info!(
            success = result.success,
            errors = result.errors.len(),
            elapsed_ms = result.elapsed.as_millis() as u64,
            "pipeline run finished"
        );
        progress.done(&result);
        result
    }

    async fn run_stages(
        &self,
        sitemap_url: &str,
        completion: &dyn Completion,
        progress: &dyn ProgressReporter,
        result: &mut PipelineResult,
    ) -> Result<()> {
        let domain = domain_of(sitemap_url)?;
        let started_at = Utc::now();

        result.indexing = self.index_sitemap(sitemap_url, progress).await?;
        result.scraping = self.scrape_domain(&domain, progress).await?;
        result.processing = self.process_domain(&domain, completion, progress).await?;

        let mut status = ProcessingStatus::started(&domain, RunStatus::Completed);
        status.started_at = Some(started_at);
        status.completed_at = Some(Utc::now());
        status.progress = Progress {
            total: result.processing.total,
            completed: result.processing.succeeded,
            failed: result.processing.failed,
        };
        self.store.put_status(&status).await
    }
}
