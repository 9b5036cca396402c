//! Remote document-to-text reader service (`GET {endpoint}/{url}`).

use async_trait::async_trait;
use reqwest::Client;
use sitemind_shared::{FetchOptions, Result, SitemindError, display_name_from_url};
use tracing::{debug, instrument};

use super::{FetchStrategy, FetchedPage, require_min_len};

/// Used when no reader endpoint is configured.
pub const DEFAULT_READER_ENDPOINT: &str = "https://r.jina.ai";

const TITLE_PREFIX: &str = "Title:";
const CONTENT_MARKER: &str = "Markdown Content:";

/// Asks a reader service to convert the page and uses its text as-is.
#[derive(Debug, Clone)]
pub struct ReaderStrategy {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl ReaderStrategy {
    pub fn new(client: Client, endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        let endpoint = endpoint.into();
        let endpoint = if endpoint.trim().is_empty() {
            DEFAULT_READER_ENDPOINT.to_string()
        } else {
            endpoint.trim_end_matches('/').to_string()
        };
        Self {
            client,
            endpoint,
            api_key,
        }
    }
}

#[async_trait]
impl FetchStrategy for ReaderStrategy {
    fn name(&self) -> &'static str {
        "reader"
    }

    fn is_enabled(&self, options: &FetchOptions) -> bool {
        options.use_reader
    }

    #[instrument(skip(self, options), fields(strategy = "reader"))]
    async fn attempt(&self, url: &str, options: &FetchOptions) -> Result<FetchedPage> {
        let mut request = self
            .client
            .get(format!("{}/{url}", self.endpoint))
            .timeout(options.timeout)
            .header(reqwest::header::ACCEPT, "text/plain");
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
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

        let body = response
            .text()
            .await
            .map_err(|e| SitemindError::transport(url, &e))?;
        debug!(len = body.len(), "reader response");

        require_min_len(parse_reader_output(&body, url), url)
    }
}

/// Split reader output into an optional `Title:` line and the content body.
fn parse_reader_output(body: &str, url: &str) -> FetchedPage {
    let title = body
        .lines()
        .find_map(|line| line.strip_prefix(TITLE_PREFIX))
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string);

    let content = match body.split_once(CONTENT_MARKER) {
        Some((_, content)) => content,
        None => body,
    };

    FetchedPage {
        display_name: title.unwrap_or_else(|| display_name_from_url(url)),
        text: sitemind_markdown::tidy(content),
    }
}
