//! Sitemap protocol and robots.txt parsers.
//!
//! Sitemaps come in two shapes (<https://www.sitemaps.org/protocol.html>):
//! - `<sitemapindex>` listing child `<sitemap><loc>` documents
//! - `<urlset>` listing `<url>` page entries with optional
//!   `<lastmod>`, `<changefreq>`, and `<priority>`
//!
//! Element names are matched on their local name so namespaced and
//! un-namespaced documents parse the same way.

use roxmltree::{Document, Node};
use sitemind_shared::{PageDescriptor, Result, SitemindError};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// A parsed sitemap document.
#[derive(Debug, Clone, PartialEq)]
pub enum SitemapDocument {
    /// Child sitemap URLs, in document order.
    Index(Vec<String>),
    /// Page entries, in document order.
    UrlSet(Vec<PageDescriptor>),
}

// ---------------------------------------------------------------------------
// XML
// ---------------------------------------------------------------------------

/// Parse sitemap XML into an index or a URL set.
pub(crate) fn parse_sitemap(xml: &str) -> Result<SitemapDocument> {
    let doc = Document::parse(xml)
        .map_err(|e| SitemindError::format(format!("invalid sitemap XML: {e}")))?;
    let root = doc.root_element();

    match root.tag_name().name() {
        "sitemapindex" => {
            let children = child_elements(root, "sitemap")
                .filter_map(|sitemap| child_text(sitemap, "loc"))
                .collect();
            Ok(SitemapDocument::Index(children))
        }
        "urlset" => {
            let entries = child_elements(root, "url")
                .filter_map(|url| {
                    let loc = child_text(url, "loc")?;
                    Some(PageDescriptor {
                        loc,
                        last_modified: child_text(url, "lastmod"),
                        change_frequency: child_text(url, "changefreq"),
                        priority: child_text(url, "priority").and_then(|p| parse_priority(&p)),
                    })
                })
                .collect();
            Ok(SitemapDocument::UrlSet(entries))
        }
        other => Err(SitemindError::format(format!(
            "unrecognized sitemap root element <{other}>, expected <urlset> or <sitemapindex>"
        ))),
    }
}

fn child_elements<'a, 'input>(
    node: Node<'a, 'input>,
    name: &'static str,
) -> impl Iterator<Item = Node<'a, 'input>> {
    node.children()
        .filter(move |n| n.is_element() && n.tag_name().name() == name)
}

/// Trimmed, non-empty text of the first `name` child.
fn child_text(node: Node<'_, '_>, name: &'static str) -> Option<String> {
    child_elements(node, name)
        .next()
        .and_then(|n| n.text())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
}

/// Priority must be a number in `[0, 1]`; anything else is dropped.
fn parse_priority(raw: &str) -> Option<f32> {
    raw.parse::<f32>()
        .ok()
        .filter(|p| (0.0..=1.0).contains(p))
}

// ---------------------------------------------------------------------------
// robots.txt
// ---------------------------------------------------------------------------

/// Extract `Sitemap:` directive values from robots.txt, in file order.
///
/// The directive name is case-insensitive; comments and other directives are ignored.
pub(crate) fn robots_sitemaps(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| line.split('#').next().unwrap_or("").trim())
        .filter_map(|line| {
            let (directive, value) = line.split_once(':')?;
            if directive.trim().eq_ignore_ascii_case("sitemap") {
                let value = value.trim();
                (!value.is_empty()).then(|| value.to_string())
            } else {
                None
            }
        })
        .collect()
}
