//! Sitemap resolution and discovery.
//!
//! [`SitemapResolver::resolve`] fetches a sitemap and recursively expands
//! sitemap indexes into a flat, depth-first list of page descriptors.
//! [`SitemapResolver::discover`] finds a site's sitemap from robots.txt or
//! a list of conventional paths.
//!
//! Failure policy: a broken child sitemap is logged and skipped, but nesting
//! deeper than `max_depth` aborts the whole resolution.

mod parser;

use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use sitemind_shared::{PageDescriptor, Result, SitemindError};
use tracing::{debug, info, instrument, warn};
use url::Url;

pub use parser::SitemapDocument;

/// Maximum number of redirects to follow when fetching sitemaps.
const MAX_REDIRECTS: usize = 5;

/// Default timeout in seconds for sitemap requests.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default sitemap index nesting limit.
const DEFAULT_MAX_DEPTH: u32 = 3;

/// Sitemap protocol cap on uncompressed size (50 MB).
const MAX_RESPONSE_SIZE: u64 = 50 * 1024 * 1024;

/// User-Agent string for discovery requests.
const USER_AGENT: &str = concat!("sitemind/", env!("CARGO_PKG_VERSION"));

/// Conventional sitemap locations, tried after robots.txt.
const CONVENTIONAL_PATHS: &[&str] = &[
    "/sitemap.xml",
    "/sitemap_index.xml",
    "/sitemap-index.xml",
    "/sitemaps.xml",
    "/wp-sitemap.xml",
];

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Configuration for the resolver.
#[derive(Debug, Clone)]
pub struct ResolverOptions {
    /// Timeout for HTTP requests in seconds.
    pub timeout_secs: u64,
    /// Deepest allowed index nesting; the root sitemap is depth 0.
    pub max_depth: u32,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

/// A sitemap located by [`SitemapResolver::discover`].
#[derive(Debug, Clone)]
pub struct DiscoveredSitemap {
    /// The sitemap URL that resolved.
    pub sitemap_url: String,
    /// Pages it expanded to.
    pub pages: Vec<PageDescriptor>,
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

/// Fetches and expands sitemaps. Cheap to clone.
#[derive(Debug, Clone)]
pub struct SitemapResolver {
    client: Client,
    max_depth: u32,
}

impl SitemapResolver {
    /// Build a resolver with its own HTTP client.
    pub fn new(opts: &ResolverOptions) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(Duration::from_secs(opts.timeout_secs))
            .build()
            .map_err(|e| SitemindError::fetch(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            max_depth: opts.max_depth,
        })
    }

    pub fn max_depth(&self) -> u32 {
        self.max_depth
    }

    /// Resolve `sitemap_url` into every leaf page entry, depth-first.
    #[instrument(skip(self), fields(max_depth = self.max_depth))]
    pub async fn resolve(&self, sitemap_url: &str) -> Result<Vec<PageDescriptor>> {
        let pages = self.resolve_at(sitemap_url, 0).await?;
        info!(pages = pages.len(), "sitemap resolved");
        Ok(pages)
    }

    /// Resolve one sitemap found at nesting level `depth`.
    pub fn resolve_at<'a>(
        &'a self,
        sitemap_url: &'a str,
        depth: u32,
    ) -> BoxFuture<'a, Result<Vec<PageDescriptor>>> {
        Box::pin(async move {
            if depth > self.max_depth {
                return Err(SitemindError::DepthExceeded {
                    url: sitemap_url.to_string(),
                    depth,
                    max_depth: self.max_depth,
                });
            }

            let xml = self.fetch_sitemap(sitemap_url).await?;

            match parser::parse_sitemap(&xml)? {
                SitemapDocument::UrlSet(entries) => {
                    debug!(url = sitemap_url, depth, entries = entries.len(), "url set");
                    Ok(entries)
                }
                SitemapDocument::Index(children) => {
                    debug!(url = sitemap_url, depth, children = children.len(), "sitemap index");
                    let mut pages = Vec::new();
                    for child in &children {
                        match self.resolve_at(child, depth + 1).await {
                            Ok(mut child_pages) => pages.append(&mut child_pages),
                            Err(e @ SitemindError::DepthExceeded { .. }) => return Err(e),
                            Err(e) => {
                                warn!(child = %child, error = %e, "skipping child sitemap");
                            }
                        }
                    }
                    Ok(pages)
                }
            }
        })
    }

    /// Find and resolve a site's sitemap.
    ///
    /// Tries robots.txt `Sitemap:` directives in file order, then the
    /// conventional paths. Returns the first candidate that resolves to at
    /// least one page.
    #[instrument(skip(self))]
    pub async fn discover(&self, site: &str) -> Result<DiscoveredSitemap> {
        let origin = origin_of(site)?;

        let mut candidates = match self.fetch_text(&format!("{origin}/robots.txt")).await {
            Ok(robots) => parser::robots_sitemaps(&robots),
            Err(e) => {
                debug!(error = %e, "robots.txt unavailable");
                Vec::new()
            }
        };
        candidates.extend(CONVENTIONAL_PATHS.iter().map(|p| format!("{origin}{p}")));

        for candidate in candidates {
            match self.resolve(&candidate).await {
                Ok(pages) if !pages.is_empty() => {
                    info!(sitemap = %candidate, pages = pages.len(), "sitemap discovered");
                    return Ok(DiscoveredSitemap {
                        sitemap_url: candidate,
                        pages,
                    });
                }
                Ok(_) => debug!(sitemap = %candidate, "sitemap is empty"),
                Err(e) => debug!(sitemap = %candidate, error = %e, "candidate failed"),
            }
        }

        Err(SitemindError::fetch(format!("no sitemap found for {origin}")))
    }

    /// Fetch a sitemap body, rejecting compressed payloads up front.
    async fn fetch_sitemap(&self, url: &str) -> Result<String> {
        if url.to_ascii_lowercase().ends_with(".gz") {
            return Err(gzip_unsupported(url));
        }

        let response = self.get(url).await?;

        let gzip_content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("gzip"));
        if gzip_content_type {
            return Err(gzip_unsupported(url));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SitemindError::transport(url, &e))?;

        if bytes.starts_with(&[0x1f, 0x8b]) {
            return Err(gzip_unsupported(url));
        }

        String::from_utf8(bytes.to_vec())
            .map_err(|e| SitemindError::format(format!("{url}: sitemap is not UTF-8: {e}")))
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        self.get(url)
            .await?
            .text()
            .await
            .map_err(|e| SitemindError::transport(url, &e))
    }

    /// GET with status and size checks.
    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let response = self
            .client
            .get(url)
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

        if let Some(len) = response.content_length() {
            if len > MAX_RESPONSE_SIZE {
                return Err(SitemindError::format(format!(
                    "{url}: response too large ({len} bytes, max {MAX_RESPONSE_SIZE})"
                )));
            }
        }

        Ok(response)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn gzip_unsupported(url: &str) -> SitemindError {
    SitemindError::format(format!(
        "{url}: gzip-compressed sitemaps are not supported"
    ))
}

/// Origin (scheme + host + port) of a URL or bare domain; bare domains get `https://`.
fn origin_of(site: &str) -> Result<String> {
    let with_scheme = if site.contains("://") {
        site.to_string()
    } else {
        format!("https://{site}")
    };
    let url = Url::parse(&with_scheme)
        .map_err(|e| SitemindError::validation(format!("invalid site '{site}': {e}")))?;
    let host = url
        .host_str()
        .ok_or_else(|| SitemindError::validation(format!("URL has no host: {site}")))?;

    match url.port() {
        Some(port) => Ok(format!("{}://{host}:{port}", url.scheme())),
        None => Ok(format!("{}://{host}", url.scheme())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn urlset(locs: &[String]) -> String {
        let body: String = locs
            .iter()
            .map(|l| format!("<url><loc>{l}</loc></url>"))
            .collect();
        format!(r#"<urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">{body}</urlset>"#)
    }

    fn index(locs: &[String]) -> String {
        let body: String = locs
            .iter()
            .map(|l| format!("<sitemap><loc>{l}</loc></sitemap>"))
            .collect();
        format!(
            r#"<sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">{body}</sitemapindex>"#
        )
    }

    async fn mount_xml(server: &MockServer, at: &str, body: String) {
        Mock::given(method("GET"))
            .and(path(at))
            .respond_with(ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    fn resolver(max_depth: u32) -> SitemapResolver {
        SitemapResolver::new(&ResolverOptions {
            timeout_secs: 5,
            max_depth,
        })
        .unwrap()
    }

    #[test]
    fn test_origin_of() {
        assert_eq!(origin_of("example.com").unwrap(), "https://example.com");
        assert_eq!(
            origin_of("http://localhost:3000/docs").unwrap(),
            "http://localhost:3000"
        );
    }

    #[tokio::test]
    async fn resolves_plain_urlset() {
        let server = MockServer::start().await;
        let base = server.uri();
        let pages = vec![format!("{base}/a"), format!("{base}/b")];
        mount_xml(&server, "/sitemap.xml", urlset(&pages)).await;

        let result = resolver(3)
            .resolve(&format!("{base}/sitemap.xml"))
            .await
            .unwrap();
        let locs: Vec<_> = result.iter().map(|p| p.loc.clone()).collect();
        assert_eq!(locs, pages);
    }

    #[tokio::test]
    async fn index_skips_broken_child() {
        let server = MockServer::start().await;
        let base = server.uri();

        mount_xml(
            &server,
            "/sitemap.xml",
            index(&[
                format!("{base}/broken.xml"),
                format!("{base}/good.xml"),
            ]),
        )
        .await;
        Mock::given(method("GET"))
            .and(path("/broken.xml"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        mount_xml(
            &server,
            "/good.xml",
            urlset(&[format!("{base}/one"), format!("{base}/two")]),
        )
        .await;

        let result = resolver(3)
            .resolve(&format!("{base}/sitemap.xml"))
            .await
            .expect("broken child must not abort resolution");
        assert_eq!(result.len(), 2);
        assert_eq!(result[0].loc, format!("{base}/one"));
    }

    #[tokio::test]
    async fn depth_first_order_is_preserved() {
        let server = MockServer::start().await;
        let base = server.uri();

        mount_xml(
            &server,
            "/root.xml",
            index(&[format!("{base}/nested.xml"), format!("{base}/flat.xml")]),
        )
        .await;
        mount_xml(&server, "/nested.xml", index(&[format!("{base}/leaf.xml")])).await;
        mount_xml(&server, "/leaf.xml", urlset(&[format!("{base}/deep")])).await;
        mount_xml(&server, "/flat.xml", urlset(&[format!("{base}/shallow")])).await;

        let result = resolver(3).resolve(&format!("{base}/root.xml")).await.unwrap();
        let locs: Vec<_> = result.iter().map(|p| p.loc.as_str()).collect();
        assert_eq!(locs, vec![format!("{base}/deep"), format!("{base}/shallow")]);
    }

    #[tokio::test]
    async fn nested_indexes_beyond_max_depth_fail() {
        let server = MockServer::start().await;
        let base = server.uri();
        let max_depth = 2;

        // index-0 -> index-1 -> ... each level is another index
        for level in 0..=max_depth + 1 {
            mount_xml(
                &server,
                &format!("/index-{level}.xml"),
                index(&[format!("{base}/index-{}.xml", level + 1)]),
            )
            .await;
        }

        let err = resolver(max_depth)
            .resolve(&format!("{base}/index-0.xml"))
            .await
            .unwrap_err();
        assert!(matches!(err, SitemindError::DepthExceeded { depth: 3, .. }));
    }

    #[tokio::test]
    async fn self_referencing_index_terminates() {
        let server = MockServer::start().await;
        let base = server.uri();
        mount_xml(&server, "/loop.xml", index(&[format!("{base}/loop.xml")])).await;

        let err = resolver(4)
            .resolve(&format!("{base}/loop.xml"))
            .await
            .unwrap_err();
        assert!(matches!(err, SitemindError::DepthExceeded { .. }));
    }

    #[tokio::test]
    async fn http_error_is_fatal_at_root() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sitemap.xml"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = resolver(3)
            .resolve(&format!("{}/sitemap.xml", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, SitemindError::HttpStatus { status: 404, .. }));
    }

    #[tokio::test]
    async fn gzip_sitemaps_fail_fast() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sitemap.xml"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0x1f, 0x8b, 0x08, 0x00]))
            .mount(&server)
            .await;

        let r = resolver(3);
        let err = r
            .resolve(&format!("{}/sitemap.xml.gz", server.uri()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("gzip"));

        let err = r
            .resolve(&format!("{}/sitemap.xml", server.uri()))
            .await
            .unwrap_err();
        assert!(matches!(err, SitemindError::Format { .. }));
    }

    #[tokio::test]
    async fn discover_prefers_robots_directive() {
        let server = MockServer::start().await;
        let base = server.uri();

        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_string(format!(
                "User-agent: *\nDisallow:\nSitemap: {base}/custom-sitemap.xml\n"
            )))
            .mount(&server)
            .await;
        mount_xml(&server, "/custom-sitemap.xml", urlset(&[format!("{base}/from-robots")])).await;
        mount_xml(&server, "/sitemap.xml", urlset(&[format!("{base}/conventional")])).await;

        let found = resolver(3).discover(&base).await.unwrap();
        assert_eq!(found.sitemap_url, format!("{base}/custom-sitemap.xml"));
        assert_eq!(found.pages[0].loc, format!("{base}/from-robots"));
    }

    #[tokio::test]
    async fn discover_falls_back_to_conventional_paths() {
        let server = MockServer::start().await;
        let base = server.uri();

        Mock::given(method("GET"))
            .and(path("/robots.txt"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        mount_xml(&server, "/sitemap_index.xml", urlset(&[format!("{base}/x")])).await;

        let found = resolver(3).discover(&base).await.unwrap();
        assert_eq!(found.sitemap_url, format!("{base}/sitemap_index.xml"));
    }

    #[tokio::test]
    async fn discover_reports_missing_sitemap() {
        let server = MockServer::start().await;
        let err = resolver(3).discover(&server.uri()).await.unwrap_err();
        assert!(err.to_string().contains("no sitemap found"));
    }
}
