//! Plain HTTP GET with local normalization. Always available.

use async_trait::async_trait;
use reqwest::Client;
use sitemind_markdown::{NormalizeOptions, normalize};
use sitemind_shared::{FetchOptions, Result, SitemindError, with_retries};
use tracing::{debug, instrument};

use super::{FetchStrategy, FetchedPage};

/// Downloads the raw page and converts it locally, retrying transient failures.
#[derive(Debug, Clone)]
pub struct DirectStrategy {
    client: Client,
}

impl DirectStrategy {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn download(&self, url: &str, options: &FetchOptions) -> Result<String> {
        let response = self
            .client
            .get(url)
            .timeout(options.timeout)
            .send()
            .await
            .map_err(|e| SitemindError::transport(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SitemindError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        response
            .text()
            .await
            .map_err(|e| SitemindError::transport(url, &e))
    }
}

#[async_trait]
impl FetchStrategy for DirectStrategy {
    fn name(&self) -> &'static str {
        "direct"
    }

    fn is_enabled(&self, _options: &FetchOptions) -> bool {
        true
    }

    #[instrument(skip(self, options), fields(strategy = "direct"))]
    async fn attempt(&self, url: &str, options: &FetchOptions) -> Result<FetchedPage> {
        let html = with_retries(&options.retry, move |attempt| {
            debug!(attempt, "downloading");
            self.download(url, options)
        })
        .await?;

        let page = normalize(
            &html,
            url,
            &NormalizeOptions {
                clean: options.clean,
                include_metadata: options.include_metadata,
            },
        )?;

        if page.text.is_empty() {
            return Err(SitemindError::format(format!(
                "{url}: no text content extracted"
            )));
        }

        Ok(FetchedPage {
            display_name: page.display_name,
            text: page.text,
        })
    }
}
