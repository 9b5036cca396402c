//! Application configuration for sitemind.
//!
//! User config lives at `~/.sitemind/sitemind.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SitemindError};
use crate::retry::RetryPolicy;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "sitemind.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".sitemind";

/// Upper bound on a single completion request.
pub const COMPLETION_TIMEOUT: Duration = Duration::from_secs(120);

/// A response lease must outlive the completion request it guards.
const LEASE_MARGIN: Duration = Duration::from_secs(60);

// ---------------------------------------------------------------------------
// Config structs (matching sitemind.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub fetch: FetchConfig,

    /// Document-to-text conversion service.
    #[serde(default)]
    pub reader: ServiceConfig,

    /// Headless rendering backend.
    #[serde(default)]
    pub browser: ServiceConfig,

    #[serde(default)]
    pub openrouter: OpenRouterConfig,

    #[serde(default)]
    pub cache: CacheConfig,
}

/// `[store]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the libSQL database file.
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "~/.sitemind/sitemind.db".into()
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Upper bound on URLs taken from a sitemap per run.
    #[serde(default = "default_max_urls")]
    pub max_urls: usize,

    /// Pause between page fetches in the scrape stage.
    #[serde(default = "default_scrape_delay")]
    pub scrape_delay_ms: u64,

    /// Pause between completion calls in the AI stage.
    #[serde(default = "default_ai_delay")]
    pub ai_delay_ms: u64,

    /// Records upserted concurrently per indexing batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum sitemap index nesting.
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Leave already-indexed URLs untouched when re-indexing.
    #[serde(default = "default_true")]
    pub skip_existing: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_urls: default_max_urls(),
            scrape_delay_ms: default_scrape_delay(),
            ai_delay_ms: default_ai_delay(),
            batch_size: default_batch_size(),
            max_depth: default_max_depth(),
            skip_existing: true,
        }
    }
}

fn default_max_urls() -> usize {
    100
}
fn default_scrape_delay() -> u64 {
    1_000
}
fn default_ai_delay() -> u64 {
    2_000
}
fn default_batch_size() -> usize {
    10
}
fn default_max_depth() -> u32 {
    3
}
fn default_true() -> bool {
    true
}

/// `[fetch]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Try the reader service first.
    #[serde(default = "default_true")]
    pub use_reader: bool,

    /// Try the rendering backend before the direct fetch.
    #[serde(default)]
    pub use_browser: bool,

    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Attempts for the direct fetch, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    /// Strip navigation, footers, ads and banners before conversion.
    #[serde(default = "default_true")]
    pub clean: bool,

    /// Prepend a metadata header to normalized text.
    #[serde(default)]
    pub include_metadata: bool,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            use_reader: true,
            use_browser: false,
            timeout_secs: default_timeout(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay(),
            clean: true,
            include_metadata: false,
        }
    }
}

fn default_timeout() -> u64 {
    30
}
fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay() -> u64 {
    1_000
}

/// `[reader]` / `[browser]` sections: a remote service with optional bearer auth.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Base URL of the service. Empty disables the strategy.
    #[serde(default)]
    pub endpoint: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default)]
    pub api_key_env: String,
}

impl ServiceConfig {
    /// Read the API key from the configured env var, if any.
    pub fn api_key(&self) -> Option<String> {
        if self.api_key_env.is_empty() {
            return None;
        }
        std::env::var(&self.api_key_env).ok().filter(|v| !v.is_empty())
    }
}

/// `[openrouter]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenRouterConfig {
    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    #[serde(default = "default_model")]
    pub default_model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Chat-completions base URL.
    #[serde(default = "default_openrouter_endpoint")]
    pub endpoint: String,
}

impl Default for OpenRouterConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            default_model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            endpoint: default_openrouter_endpoint(),
        }
    }
}

fn default_api_key_env() -> String {
    "OPENROUTER_API_KEY".into()
}
fn default_model() -> String {
    "openai/gpt-4o-mini".into()
}
fn default_temperature() -> f32 {
    0.3
}
fn default_max_tokens() -> u32 {
    2_000
}
fn default_openrouter_endpoint() -> String {
    "https://openrouter.ai/api/v1".into()
}

/// `[cache]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Retention of fetched page content.
    #[serde(default = "default_content_ttl")]
    pub content_ttl_secs: u64,

    /// Lifetime of the live progress cursor.
    #[serde(default = "default_status_ttl")]
    pub status_ttl_secs: u64,

    /// Guard completion calls with a per-key lease.
    #[serde(default = "default_true")]
    pub single_flight: bool,

    #[serde(default = "default_lease_ttl")]
    pub lease_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            content_ttl_secs: default_content_ttl(),
            status_ttl_secs: default_status_ttl(),
            single_flight: true,
            lease_ttl_secs: default_lease_ttl(),
        }
    }
}

fn default_content_ttl() -> u64 {
    7 * 24 * 60 * 60
}
fn default_status_ttl() -> u64 {
    60 * 60
}
fn default_lease_ttl() -> u64 {
    (COMPLETION_TIMEOUT + LEASE_MARGIN).as_secs()
}

// ---------------------------------------------------------------------------
// Runtime options (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime fetch options handed to the strategy chain.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub use_reader: bool,
    pub use_browser: bool,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub clean: bool,
    pub include_metadata: bool,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for FetchOptions {
    fn from(config: &AppConfig) -> Self {
        Self {
            use_reader: config.fetch.use_reader,
            use_browser: config.fetch.use_browser,
            timeout: Duration::from_secs(config.fetch.timeout_secs),
            retry: RetryPolicy::new(
                config.fetch.max_attempts,
                Duration::from_millis(config.fetch.base_delay_ms),
            ),
            clean: config.fetch.clean,
            include_metadata: config.fetch.include_metadata,
        }
    }
}

/// Expiration policy per artifact class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    pub content_ttl: Duration,
    pub status_ttl: Duration,
    pub single_flight: bool,
    pub lease_ttl: Duration,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for CachePolicy {
    fn from(config: &AppConfig) -> Self {
        Self {
            content_ttl: Duration::from_secs(config.cache.content_ttl_secs),
            status_ttl: Duration::from_secs(config.cache.status_ttl_secs),
            single_flight: config.cache.single_flight,
            lease_ttl: Duration::from_secs(config.cache.lease_ttl_secs)
                .max(COMPLETION_TIMEOUT + LEASE_MARGIN),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.sitemind/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| SitemindError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.sitemind/sitemind.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| SitemindError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| SitemindError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| SitemindError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| SitemindError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| SitemindError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Expand a leading `~/` against the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    match (path.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(path),
    }
}

/// Read the OpenRouter API key, failing with a config error if it is unset.
pub fn validate_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.openrouter.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(SitemindError::config(format!(
            "OpenRouter API key not found. Set the {var_name} environment variable."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("max_urls"));
        assert!(toml_str.contains("OPENROUTER_API_KEY"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.pipeline.max_depth, 3);
        assert_eq!(parsed.cache.content_ttl_secs, 604_800);
        assert_eq!(parsed.openrouter.api_key_env, "OPENROUTER_API_KEY");
    }

    #[test]
    fn lease_outlives_completion_timeout() {
        let policy = CachePolicy::default();
        assert_eq!(policy.lease_ttl, Duration::from_secs(180));
        assert!(policy.lease_ttl > COMPLETION_TIMEOUT);

        let config: AppConfig = toml::from_str("[cache]\nlease_ttl_secs = 30\n").expect("parse");
        assert_eq!(config.cache.lease_ttl_secs, 30);
        assert!(CachePolicy::from(&config).lease_ttl > COMPLETION_TIMEOUT);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let toml_str = r#"
[pipeline]
max_urls = 5

[reader]
endpoint = "https://r.example.com"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.pipeline.max_urls, 5);
        assert_eq!(config.pipeline.batch_size, 10);
        assert!(config.pipeline.skip_existing);
        assert_eq!(config.reader.endpoint, "https://r.example.com");
        assert!(config.browser.endpoint.is_empty());
    }

    #[test]
    fn fetch_options_from_app_config() {
        let mut app = AppConfig::default();
        app.fetch.max_attempts = 4;
        app.fetch.base_delay_ms = 250;
        let opts = FetchOptions::from(&app);
        assert!(opts.use_reader);
        assert!(!opts.use_browser);
        assert_eq!(opts.retry.max_attempts, 4);
        assert_eq!(opts.retry.base_delay, Duration::from_millis(250));
        assert_eq!(opts.timeout, Duration::from_secs(30));
    }

    #[test]
    fn cache_policy_from_app_config() {
        let policy = CachePolicy::default();
        assert_eq!(policy.content_ttl, Duration::from_secs(7 * 24 * 3600));
        assert_eq!(policy.status_ttl, Duration::from_secs(3600));
        assert!(policy.single_flight);
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.openrouter.api_key_env = "SITEMIND_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }

    #[test]
    fn expand_home_leaves_absolute_paths() {
        assert_eq!(expand_home("/tmp/x.db"), PathBuf::from("/tmp/x.db"));
    }
}
