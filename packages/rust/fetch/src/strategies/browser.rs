//! Headless rendering backend (`POST {endpoint}/content`).

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use sitemind_markdown::{NormalizeOptions, normalize};
use sitemind_shared::{FetchOptions, Result, SitemindError};
use tracing::instrument;

use super::{FetchStrategy, FetchedPage, require_min_len};

#[derive(Serialize)]
struct ContentRequest<'a> {
    url: &'a str,
}

/// Renders the page with scripts executed, then normalizes the returned HTML.
#[derive(Debug, Clone)]
pub struct BrowserStrategy {
    client: Client,
    endpoint: Option<String>,
    token: Option<String>,
}

impl BrowserStrategy {
    /// An empty `endpoint` leaves the strategy unconfigured; attempts then fail
    /// with a config error.
    pub fn new(client: Client, endpoint: impl Into<String>, token: Option<String>) -> Self {
        let endpoint = endpoint.into();
        let endpoint = endpoint.trim().trim_end_matches('/');
        Self {
            client,
            endpoint: (!endpoint.is_empty()).then(|| endpoint.to_string()),
            token,
        }
    }
}

#[async_trait]
impl FetchStrategy for BrowserStrategy {
    fn name(&self) -> &'static str {
        "browser"
    }

    fn is_enabled(&self, options: &FetchOptions) -> bool {
        options.use_browser
    }

    #[instrument(skip(self, options), fields(strategy = "browser"))]
    async fn attempt(&self, url: &str, options: &FetchOptions) -> Result<FetchedPage> {
        let endpoint = self.endpoint.as_deref().ok_or_else(|| {
            SitemindError::config("browser strategy enabled but no [browser] endpoint is set")
        })?;

        let mut request = self
            .client
            .post(format!("{endpoint}/content"))
            .timeout(options.timeout)
            .json(&ContentRequest { url });
        if let Some(token) = &self.token {
            request = request.query(&[("token", token)]);
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

        let html = response
            .text()
            .await
            .map_err(|e| SitemindError::transport(url, &e))?;

        let page = normalize(
            &html,
            url,
            &NormalizeOptions {
                clean: options.clean,
                include_metadata: options.include_metadata,
            },
        )?;

        require_min_len(
            FetchedPage {
                display_name: page.display_name,
                text: page.text,
            },
            url,
        )
    }
}
