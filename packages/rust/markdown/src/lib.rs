//! HTML-to-text normalization.
//!
//! [`normalize`] turns a raw HTML page into compact Markdown-flavoured text:
//! it picks the main content region, optionally strips page chrome (navigation,
//! footers, ads, cookie banners), converts with `htmd`, and runs a cleanup
//! pipeline that drops in-page anchors and collapses blank-line runs.

mod cleanup;

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};
use tracing::{debug, instrument};
use url::Url;

use sitemind_shared::{Result, SitemindError};

pub use cleanup::tidy;

/// Display name used when a page has no usable title.
pub const UNTITLED: &str = "Untitled Page";

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Options for [`normalize`].
#[derive(Debug, Clone, Copy)]
pub struct NormalizeOptions {
    /// Remove navigation, footers, ads, and cookie banners before conversion.
    pub clean: bool,
    /// Prepend a header with title, source URL, description, and keywords.
    pub include_metadata: bool,
}

impl Default for NormalizeOptions {
    fn default() -> Self {
        Self {
            clean: true,
            include_metadata: false,
        }
    }
}

/// Metadata read from the document head.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageMetadata {
    pub title: Option<String>,
    pub description: Option<String>,
    pub keywords: Vec<String>,
}

/// Result of [`normalize`].
#[derive(Debug, Clone)]
pub struct NormalizedPage {
    pub text: String,
    /// Page title, or [`UNTITLED`].
    pub display_name: String,
    pub metadata: PageMetadata,
}

// ---------------------------------------------------------------------------
// Selectors
// ---------------------------------------------------------------------------

fn selector(s: &str) -> Selector {
    Selector::parse(s).expect("valid selector")
}

static TITLE: LazyLock<Selector> = LazyLock::new(|| selector("title"));
static OG_TITLE: LazyLock<Selector> =
    LazyLock::new(|| selector(r#"meta[property="og:title"]"#));
static H1: LazyLock<Selector> = LazyLock::new(|| selector("h1"));
static DESCRIPTION: LazyLock<Selector> = LazyLock::new(|| {
    selector(r#"meta[name="description"], meta[property="og:description"]"#)
});
static KEYWORDS: LazyLock<Selector> = LazyLock::new(|| selector(r#"meta[name="keywords"]"#));

/// Content regions in priority order.
static REGIONS: LazyLock<Vec<Selector>> = LazyLock::new(|| {
    ["main", r#"[role="main"]"#, "article", "body"]
        .into_iter()
        .map(selector)
        .collect()
});

/// Page chrome removed when cleaning.
static NOISE: LazyLock<Selector> = LazyLock::new(|| {
    selector(
        "nav, footer, aside, iframe, form, \
         body > header, \
         [role=\"navigation\"], [role=\"banner\"], [role=\"contentinfo\"], \
         .ad, .ads, .advert, .advertisement, [id^=\"ad-\"], [class*=\"ad-slot\"], \
         [class*=\"cookie\"], [id*=\"cookie\"], [class*=\"consent\"], [id*=\"consent\"], \
         .sidebar, .breadcrumbs",
    )
});

static TABLE: LazyLock<Selector> = LazyLock::new(|| selector("table"));
static TR: LazyLock<Selector> = LazyLock::new(|| selector("tr"));
static TH: LazyLock<Selector> = LazyLock::new(|| selector("th"));
static TD: LazyLock<Selector> = LazyLock::new(|| selector("td"));

// ---------------------------------------------------------------------------
// Normalizer
// ---------------------------------------------------------------------------

/// Normalize an HTML page fetched from `url`.
///
/// 1. Read title, description, and keywords
/// 2. Strip page chrome (if `opts.clean`)
/// 3. Select `<main>`, else `<article>`, else `<body>`
/// 4. Convert tables, then HTML → Markdown via `htmd`
/// 5. Run the cleanup pipeline
/// 6. Prepend the metadata header (if `opts.include_metadata`)
#[instrument(skip(html, opts), fields(url = %url, clean = opts.clean))]
pub fn normalize(html: &str, url: &str, opts: &NormalizeOptions) -> Result<NormalizedPage> {
    let mut doc = Html::parse_document(html);

    let metadata = extract_metadata(&doc);
    let display_name = metadata
        .title
        .clone()
        .unwrap_or_else(|| UNTITLED.to_string());

    if opts.clean {
        strip_noise(&mut doc);
    }

    let region = content_region(&doc);
    let region = preprocess_tables(&region);

    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec!["script", "style", "noscript", "svg", "template"])
        .build();
    let raw = converter
        .convert(&region)
        .map_err(|e| SitemindError::Conversion(format!("htmd conversion failed: {e}")))?;

    let base_url = Url::parse(url).ok();
    let body = cleanup::run_pipeline(&raw, base_url.as_ref());

    let text = if opts.include_metadata {
        let header = metadata_header(&display_name, url, &metadata);
        tidy(&format!("{header}\n\n{body}"))
    } else {
        body
    };

    debug!(display_name = %display_name, len = text.len(), "normalized");

    Ok(NormalizedPage {
        text,
        display_name,
        metadata,
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn element_text(el: ElementRef<'_>) -> Option<String> {
    let text = el.text().collect::<String>();
    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (!text.is_empty()).then_some(text)
}

fn meta_content(doc: &Html, sel: &Selector) -> Option<String> {
    doc.select(sel)
        .filter_map(|el| el.value().attr("content"))
        .map(str::trim)
        .find(|c| !c.is_empty())
        .map(str::to_string)
}

/// Title from `<title>`, then `og:title`, then the first `<h1>`.
fn extract_metadata(doc: &Html) -> PageMetadata {
    let title = doc
        .select(&TITLE)
        .find_map(element_text)
        .or_else(|| meta_content(doc, &OG_TITLE))
        .or_else(|| doc.select(&H1).find_map(element_text));

    let keywords = meta_content(doc, &KEYWORDS)
        .map(|k| {
            k.split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    PageMetadata {
        title,
        description: meta_content(doc, &DESCRIPTION),
        keywords,
    }
}

/// Detach every chrome element from the tree.
fn strip_noise(doc: &mut Html) {
    let ids: Vec<_> = doc.select(&NOISE).map(|el| el.id()).collect();
    debug!(removed = ids.len(), "stripping page chrome");
    for id in ids {
        if let Some(mut node) = doc.tree.get_mut(id) {
            node.detach();
        }
    }
}

fn content_region(doc: &Html) -> String {
    REGIONS
        .iter()
        .find_map(|sel| doc.select(sel).next())
        .map(|el| el.inner_html())
        .unwrap_or_else(|| doc.root_element().inner_html())
}

fn metadata_header(display_name: &str, url: &str, metadata: &PageMetadata) -> String {
    let mut header = format!("# {display_name}\n\nSource: {url}");
    if let Some(description) = &metadata.description {
        header.push_str(&format!("\nDescription: {description}"));
    }
    if !metadata.keywords.is_empty() {
        header.push_str(&format!("\nKeywords: {}", metadata.keywords.join(", ")));
    }
    header.push_str("\n\n---");
    header
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

/// Rewrite `<table>` elements as Markdown tables ahead of `htmd`, which
/// has no table support.
fn preprocess_tables(html: &str) -> String {
    let doc = Html::parse_fragment(html);
    let mut result = html.to_string();

    for table in doc.select(&TABLE) {
        result = result.replacen(&table.html(), &table_to_markdown(table), 1);
    }

    result
}

fn table_to_markdown(table: ElementRef<'_>) -> String {
    let cells = |row: ElementRef<'_>, sel: &Selector| -> Vec<String> {
        row.select(sel)
            .map(|cell| element_text(cell).unwrap_or_default())
            .collect()
    };

    let mut rows: Vec<Vec<String>> = Vec::new();
    let mut has_header = false;
    for tr in table.select(&TR) {
        let ths = cells(tr, &TH);
        if !ths.is_empty() {
            has_header = rows.is_empty();
            rows.push(ths);
            continue;
        }
        let tds = cells(tr, &TD);
        if !tds.is_empty() {
            rows.push(tds);
        }
    }

    let cols = rows.iter().map(Vec::len).max().unwrap_or(0);
    if cols == 0 {
        return String::new();
    }
    for row in &mut rows {
        row.resize(cols, String::new());
    }

    let line = |row: &[String]| format!("| {} |\n", row.join(" | "));
    let separator = line(&vec!["---".to_string(); cols]);

    let mut md = String::from("\n\n");
    if has_header {
        md.push_str(&line(&rows[0]));
        md.push_str(&separator);
        rows[1..].iter().for_each(|r| md.push_str(&line(r)));
    } else {
        md.push_str(&line(&vec![String::new(); cols]));
        md.push_str(&separator);
        rows.iter().for_each(|r| md.push_str(&line(r)));
    }
    md.push('\n');
    md
}
