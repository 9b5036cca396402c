//! Ordered fallback over fetch strategies.

use std::time::Duration;

use reqwest::Client;
use sitemind_shared::{
    AppConfig, FetchOptions, Result, SitemindError, ServiceConfig, display_name_from_url,
};
use tracing::{debug, info, instrument, warn};

use crate::strategies::{
    BrowserStrategy, DirectStrategy, FetchStrategy, FetchedPage, ReaderStrategy,
};

/// User-Agent string for page requests.
const USER_AGENT: &str = concat!("sitemind/", env!("CARGO_PKG_VERSION"));

/// Maximum number of redirects to follow.
const MAX_REDIRECTS: usize = 5;

/// Result of [`FetchChain::fetch`]. Failures are reported, not raised.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOutcome {
    pub success: bool,
    pub display_name: String,
    pub normalized_text: Option<String>,
    /// Character count of `normalized_text`.
    pub length: Option<usize>,
    /// Name of the strategy that produced the text.
    pub method_used: Option<String>,
    /// Last failure detail when every strategy failed.
    pub error: Option<String>,
}

impl FetchOutcome {
    /// The fetched page, or why there is none.
    ///
    /// A failed chain maps to `Fetch`. A success that carries no text is a
    /// malformed outcome and maps to `Format`.
    pub fn into_page(self, url: &str) -> Result<FetchedPage> {
        if !self.success {
            return Err(SitemindError::fetch(
                self.error
                    .unwrap_or_else(|| format!("{url}: every fetch strategy failed")),
            ));
        }
        match self.normalized_text {
            Some(text) => Ok(FetchedPage {
                display_name: self.display_name,
                text,
            }),
            None => Err(SitemindError::format(format!(
                "{url}: fetch reported success without page text"
            ))),
        }
    }
}

/// Tries enabled strategies in order, then the fallback.
pub struct FetchChain {
    strategies: Vec<Box<dyn FetchStrategy>>,
    fallback: Box<dyn FetchStrategy>,
}

impl std::fmt::Debug for FetchChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchChain")
            .field("strategies", &self.strategy_names())
            .finish()
    }
}

/// HTTP client shared by the built-in strategies.
pub fn build_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .timeout(timeout)
        .build()
        .map_err(|e| SitemindError::fetch(format!("failed to build HTTP client: {e}")))
}

impl FetchChain {
    /// Reader, then browser, then direct fetch as the fallback.
    pub fn standard(reader: &ServiceConfig, browser: &ServiceConfig) -> Result<Self> {
        let client = build_client(Duration::from_secs(60))?;
        Ok(Self::from_strategies(
            vec![
                Box::new(ReaderStrategy::new(
                    client.clone(),
                    reader.endpoint.clone(),
                    reader.api_key(),
                )),
                Box::new(BrowserStrategy::new(
                    client.clone(),
                    browser.endpoint.clone(),
                    browser.api_key(),
                )),
            ],
            Box::new(DirectStrategy::new(client)),
        ))
    }

    /// [`FetchChain::standard`] configured from the app config.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        Self::standard(&config.reader, &config.browser)
    }

    /// `fallback` runs whenever every strategy in `strategies` failed or was disabled.
    pub fn from_strategies(
        strategies: Vec<Box<dyn FetchStrategy>>,
        fallback: Box<dyn FetchStrategy>,
    ) -> Self {
        Self {
            strategies,
            fallback,
        }
    }

    /// Add a strategy after the existing ones, ahead of the fallback.
    pub fn register(&mut self, strategy: Box<dyn FetchStrategy>) {
        self.strategies.push(strategy);
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies
            .iter()
            .chain(std::iter::once(&self.fallback))
            .map(|s| s.name())
            .collect()
    }

    /// Return the first successful strategy's result.
    #[instrument(skip(self, options), fields(url = %url))]
    pub async fn fetch(&self, url: &str, options: &FetchOptions) -> FetchOutcome {
        let enabled = self
            .strategies
            .iter()
            .filter(|s| s.is_enabled(options))
            .chain(std::iter::once(&self.fallback));

        let mut last_error = None;
        for strategy in enabled {
            debug!(strategy = strategy.name(), "attempting");
            match strategy.attempt(url, options).await {
                Ok(page) => {
                    let length = page.text.chars().count();
                    info!(strategy = strategy.name(), length, "page fetched");
                    return FetchOutcome {
                        success: true,
                        display_name: page.display_name,
                        normalized_text: Some(page.text),
                        length: Some(length),
                        method_used: Some(strategy.name().to_string()),
                        error: None,
                    };
                }
                Err(e) => {
                    warn!(strategy = strategy.name(), error = %e, "strategy failed");
                    last_error = Some(e.to_string());
                }
            }
        }

        FetchOutcome {
            success: false,
            display_name: display_name_from_url(url),
            normalized_text: None,
            length: None,
            method_used: None,
            error: last_error,
        }
    }
}
