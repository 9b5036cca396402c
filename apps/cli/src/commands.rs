//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use sitemind_core::{
    LexicalIndex, OpenRouterCompletion, Pipeline, PipelineResult, SearchFilter, SemanticIndex,
};
use sitemind_discovery::{ResolverOptions, SitemapResolver};
use sitemind_shared::{AppConfig, CachePolicy, expand_home, init_config, load_config};
use sitemind_storage::ContentStore;
use tracing::info;

use crate::progress::CliProgress;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// sitemind: crawl a sitemap, cache every page, and process it with AI.
#[derive(Parser)]
#[command(
    name = "sitemind",
    version,
    about = "Index a site's sitemap, fetch its pages, and run them through a completion model.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Database file (overrides `[store] path`).
    #[arg(long, global = true, env = "SITEMIND_DB")]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Index, scrape, and AI-process every page of a sitemap.
    Run {
        /// Sitemap URL.
        sitemap_url: String,

        /// Maximum pages taken from the sitemap.
        #[arg(long)]
        max_urls: Option<usize>,

        /// OpenRouter model ID (defaults to `[openrouter] default_model`).
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Resolve a sitemap and index its pages.
    Index {
        /// Sitemap URL.
        sitemap_url: String,

        #[arg(long)]
        max_urls: Option<usize>,
    },

    /// Find a site's sitemap via robots.txt and conventional paths.
    Discover {
        /// Domain or site URL.
        domain: String,

        /// Index the discovered sitemap as well.
        #[arg(long)]
        index: bool,
    },

    /// Fetch and cache content for a domain's indexed pages.
    Scrape {
        domain: String,
    },

    /// Generate AI responses for a domain's cached pages.
    Process {
        domain: String,

        #[arg(short, long)]
        model: Option<String>,
    },

    /// Show the live progress cursor and sitemap summary for a domain.
    Status {
        domain: String,
    },

    /// List a domain's indexed pages.
    Pages {
        domain: String,

        #[arg(long, default_value = "20")]
        limit: usize,

        #[arg(long, default_value = "0")]
        offset: usize,

        /// Newest first.
        #[arg(long)]
        recent: bool,
    },

    /// Show store-wide counts.
    Stats,

    /// Delete every stored artifact of a domain.
    Purge {
        domain: String,
    },

    /// Drop the cached prompt and response for a page.
    Clear {
        url: String,
    },

    /// Rank a domain's cached pages against a query.
    Search {
        domain: String,

        query: String,

        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "sitemind=info",
        1 => "sitemind=debug",
        _ => "sitemind=trace",
    };

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let mut config = load_config()?;

    if let Command::Config { action } = &cli.command {
        return match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(&config),
        };
    }

    let db_path = cli
        .db
        .clone()
        .unwrap_or_else(|| expand_home(&config.store.path));
    let store = ContentStore::open(&db_path, CachePolicy::from(&config)).await?;

    let result = match cli.command {
        Command::Run {
            sitemap_url,
            max_urls,
            model,
        } => {
            if let Some(n) = max_urls {
                config.pipeline.max_urls = n;
            }
            cmd_run(&config, &store, &sitemap_url, model).await
        }
        Command::Index {
            sitemap_url,
            max_urls,
        } => {
            if let Some(n) = max_urls {
                config.pipeline.max_urls = n;
            }
            cmd_index(&config, &store, &sitemap_url).await
        }
        Command::Discover { domain, index } => cmd_discover(&config, &store, &domain, index).await,
        Command::Scrape { domain } => cmd_scrape(&config, &store, &domain).await,
        Command::Process { domain, model } => cmd_process(&config, &store, &domain, model).await,
        Command::Status { domain } => cmd_status(&store, &domain).await,
        Command::Pages {
            domain,
            limit,
            offset,
            recent,
        } => cmd_pages(&store, &domain, limit, offset, recent).await,
        Command::Stats => cmd_stats(&store).await,
        Command::Purge { domain } => cmd_purge(&store, &domain).await,
        Command::Clear { url } => cmd_clear(&config, &store, &url).await,
        Command::Search {
            domain,
            query,
            limit,
        } => cmd_search(&store, &domain, &query, limit).await,
        Command::Config { .. } => Ok(()),
    };

    store.close().await?;
    result
}

fn completion_for(config: &AppConfig, model: Option<String>) -> Result<OpenRouterCompletion> {
    let completion = OpenRouterCompletion::from_config(config)?;
    Ok(match model {
        Some(model) => completion.with_model(model),
        None => completion,
    })
}

// ---------------------------------------------------------------------------
// Pipeline commands
// ---------------------------------------------------------------------------

async fn cmd_run(
    config: &AppConfig,
    store: &ContentStore,
    sitemap_url: &str,
    model: Option<String>,
) -> Result<()> {
    // Validate API key before doing anything
    let completion = completion_for(config, model)?;
    let pipeline = Pipeline::from_config(config, store.clone())?;

    info!(
        sitemap_url,
        model = completion.model(),
        max_urls = config.pipeline.max_urls,
        "starting run"
    );

    let reporter = CliProgress::new();
    let result = pipeline.run_pipeline(sitemap_url, &completion, &reporter).await;
    print_run_summary(&result);

    match result.error {
        Some(error) => Err(eyre!("run aborted: {error}")),
        None => Ok(()),
    }
}

fn print_run_summary(result: &PipelineResult) {
    println!();
    if result.success {
        println!("  Run completed for {}", result.domain);
    } else {
        println!("  Run failed for {}", result.domain);
    }
    println!(
        "  Indexed:    {} new, {} skipped of {}",
        result.indexing.indexed, result.indexing.skipped, result.indexing.total
    );
    println!(
        "  Scraped:    {} ok ({} cached), {} failed of {}",
        result.scraping.succeeded,
        result.scraping.cached,
        result.scraping.failed,
        result.scraping.total
    );
    println!(
        "  Processed:  {} ok ({} cached), {} failed of {}",
        result.processing.succeeded,
        result.processing.cached,
        result.processing.failed,
        result.processing.total
    );
    println!("  Time:       {:.1}s", result.elapsed.as_secs_f64());
    if !result.errors.is_empty() {
        println!("  Errors:");
        for error in result.errors.iter().take(10) {
            println!("    - {error}");
        }
        if result.errors.len() > 10 {
            println!("    ... and {} more", result.errors.len() - 10);
        }
    }
    println!();
}

async fn cmd_index(config: &AppConfig, store: &ContentStore, sitemap_url: &str) -> Result<()> {
    let pipeline = Pipeline::from_config(config, store.clone())?;
    let reporter = CliProgress::new();
    let summary = pipeline.index_sitemap(sitemap_url, &reporter).await;
    reporter.finish();
    let summary = summary?;

    println!(
        "Indexed {} new, {} skipped, {} errors ({} URLs)",
        summary.indexed,
        summary.skipped,
        summary.errors.len(),
        summary.total
    );
    Ok(())
}

async fn cmd_discover(
    config: &AppConfig,
    store: &ContentStore,
    domain: &str,
    index: bool,
) -> Result<()> {
    let resolver = SitemapResolver::new(&ResolverOptions {
        max_depth: config.pipeline.max_depth,
        ..ResolverOptions::default()
    })?;
    let found = resolver.discover(domain).await?;
    println!("{} ({} pages)", found.sitemap_url, found.pages.len());

    if index {
        cmd_index(config, store, &found.sitemap_url).await?;
    }
    Ok(())
}

async fn cmd_scrape(config: &AppConfig, store: &ContentStore, domain: &str) -> Result<()> {
    let pipeline = Pipeline::from_config(config, store.clone())?;
    let reporter = CliProgress::new();
    let summary = pipeline.scrape_domain(domain, &reporter).await;
    reporter.finish();
    let summary = summary?;

    println!(
        "Scraped {} ok ({} cached), {} failed of {}",
        summary.succeeded, summary.cached, summary.failed, summary.total
    );
    for error in &summary.errors {
        println!("  - {error}");
    }
    Ok(())
}

async fn cmd_process(
    config: &AppConfig,
    store: &ContentStore,
    domain: &str,
    model: Option<String>,
) -> Result<()> {
    let completion = completion_for(config, model)?;
    let pipeline = Pipeline::from_config(config, store.clone())?;
    let reporter = CliProgress::new();
    let summary = pipeline.process_domain(domain, &completion, &reporter).await;
    reporter.finish();
    let summary = summary?;

    println!(
        "Processed {} ok ({} cached), {} failed of {}",
        summary.succeeded, summary.cached, summary.failed, summary.total
    );
    for error in &summary.errors {
        println!("  - {error}");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Store inspection
// ---------------------------------------------------------------------------

async fn cmd_status(store: &ContentStore, domain: &str) -> Result<()> {
    match store.get_sitemap_meta(domain).await? {
        Some(meta) => {
            println!("Sitemap:   {}", meta.sitemap_url);
            println!("Pages:     {} indexed, {} processed", meta.total_urls, meta.processed_urls);
            println!("Updated:   {}", meta.last_processed.to_rfc3339());
        }
        None => println!("No sitemap recorded for {domain}"),
    }

    match store.get_status(domain).await? {
        Some(status) => {
            println!("Status:    {}", status.status);
            println!(
                "Progress:  {}/{} ({} failed)",
                status.progress.completed, status.progress.total, status.progress.failed
            );
            if let Some(url) = &status.current_url {
                println!("Current:   {url}");
            }
            if let Some(error) = &status.error {
                println!("Error:     {error}");
            }
        }
        None => println!("Status:    idle"),
    }
    Ok(())
}

async fn cmd_pages(
    store: &ContentStore,
    domain: &str,
    limit: usize,
    offset: usize,
    recent: bool,
) -> Result<()> {
    let pages = if recent {
        store.recent_pages(domain, limit).await?
    } else {
        store.list_pages(domain, limit, offset).await?
    };
    let total = store.get_url_count(domain).await?;

    for page in &pages {
        let state = match (&page.error, page.processed) {
            (Some(_), _) => "error",
            (None, true) => "done",
            (None, false) => "pending",
        };
        println!("{}  {:<7}  {}  {}", page.key, state, page.display_name, page.url);
    }
    println!("-- {} of {total} pages", pages.len());
    Ok(())
}

async fn cmd_stats(store: &ContentStore) -> Result<()> {
    let stats = store.get_stats().await?;
    println!("Domains:           {}", stats.domains);
    println!("Pages:             {}", stats.pages);
    println!("Cached content:    {}", stats.cached_content);
    println!("Cached prompts:    {}", stats.cached_prompts);
    println!("Cached responses:  {}", stats.cached_responses);
    for domain in store.list_domains().await? {
        println!("  {domain}: {} pages", store.get_url_count(&domain).await?);
    }
    Ok(())
}

async fn cmd_purge(store: &ContentStore, domain: &str) -> Result<()> {
    let removed = store.purge_domain(domain).await?;
    println!("Purged {domain}: {removed} pages removed");
    Ok(())
}

async fn cmd_clear(config: &AppConfig, store: &ContentStore, url: &str) -> Result<()> {
    let pipeline = Pipeline::from_config(config, store.clone())?;
    pipeline.processor().clear(url).await?;
    println!("Cleared cached prompt and response for {url}");
    Ok(())
}

async fn cmd_search(store: &ContentStore, domain: &str, query: &str, limit: usize) -> Result<()> {
    let index = LexicalIndex::new();
    let loaded = index.load_domain(store, domain).await?;
    if loaded == 0 {
        return Err(eyre!("no cached pages for {domain}; run `sitemind scrape {domain}` first"));
    }

    let filter = SearchFilter {
        domain: Some(domain.to_string()),
        limit,
        ..SearchFilter::default()
    };
    let hits = index.search(query, &filter).await?;
    if hits.is_empty() {
        println!("No matches among {loaded} pages");
    }
    for hit in hits {
        println!(
            "{:.3}  {}  {}",
            hit.similarity,
            hit.payload["display_name"].as_str().unwrap_or(""),
            hit.payload["url"].as_str().unwrap_or("")
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
    Ok(())
}
