//! Post-conversion cleanup passes for normalized text.
//!
//! Each pass is a function `&str -> String` applied in sequence.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Run the full cleanup pipeline on freshly converted text.
pub(crate) fn run_pipeline(text: &str, base_url: Option<&Url>) -> String {
    let mut result = text.to_string();

    result = fix_code_block_languages(&result);
    result = strip_leftover_html(&result);
    result = drop_anchor_links(&result);
    result = resolve_links(&result, base_url);

    tidy(&result)
}

/// Whitespace-only passes: trailing spaces, blank-line runs, outer trim.
///
/// Safe to apply to text that did not come from HTML conversion.
pub fn tidy(text: &str) -> String {
    let result = normalize_whitespace(text);
    let result = collapse_blank_lines(&result);
    result.trim().to_string()
}

// ---------------------------------------------------------------------------
// Code block language hints
// ---------------------------------------------------------------------------

/// Turn class-style fence hints (`language-js`, `lang-python`) into plain ones.
fn fix_code_block_languages(text: &str) -> String {
    static LANG_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?m)^```(?:language-|lang-|highlight-)(\w+)").expect("valid regex")
    });

    LANG_PREFIX_RE.replace_all(text, "```$1").to_string()
}

// ---------------------------------------------------------------------------
// Leftover HTML
// ---------------------------------------------------------------------------

/// Remove stray container tags that survived conversion, outside code fences.
fn strip_leftover_html(text: &str) -> String {
    static HTML_TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"</?(?:div|span|section|article|aside|header|footer|figure|figcaption|details|summary)(?:\s[^>]*)?>",
        )
        .expect("valid regex")
    });

    let mut in_code_block = false;
    text.lines()
        .map(|line| {
            if line.trim_start().starts_with("```") {
                in_code_block = !in_code_block;
                return line.to_string();
            }
            if in_code_block {
                line.to_string()
            } else {
                HTML_TAG_RE.replace_all(line, "").to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Links
// ---------------------------------------------------------------------------

static LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]*)\]\(([^)\s]+)(?:\s+[^)]*)?\)").expect("valid regex"));

/// Whether the match starting at `start` is an image (`![alt](src)`).
fn is_image(text: &str, start: usize) -> bool {
    start > 0 && text.as_bytes()[start - 1] == b'!'
}

/// Replace `[text](#anchor)` links with their bare text.
fn drop_anchor_links(text: &str) -> String {
    LINK_RE
        .replace_all(text, |caps: &regex::Captures| {
            let start = caps.get(0).map_or(0, |m| m.start());
            if caps[2].starts_with('#') && !is_image(text, start) {
                caps[1].to_string()
            } else {
                caps[0].to_string()
            }
        })
        .to_string()
}

/// Resolve relative link and image targets against the page URL.
fn resolve_links(text: &str, base_url: Option<&Url>) -> String {
    let Some(base) = base_url else {
        return text.to_string();
    };

    LINK_RE
        .replace_all(text, |caps: &regex::Captures| {
            let label = &caps[1];
            let href = &caps[2];

            if href.contains("://") || href.starts_with('#') || href.starts_with("mailto:") {
                return caps[0].to_string();
            }

            // images keep their leading `!`, which sits outside the match
            match base.join(href) {
                Ok(resolved) => format!("[{label}]({resolved})"),
                Err(_) => caps[0].to_string(),
            }
        })
        .to_string()
}

// ---------------------------------------------------------------------------
// Whitespace
// ---------------------------------------------------------------------------

/// Strip trailing whitespace from every line.
fn normalize_whitespace(text: &str) -> String {
    text.lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

/// Collapse runs of two or more blank lines into exactly one.
fn collapse_blank_lines(text: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"\n{3,}").expect("valid regex"));

    MULTI_BLANK_RE.replace_all(text, "\n\n").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapse_blank_lines_leaves_one() {
        assert_eq!(collapse_blank_lines("a\n\n\n\n\nb"), "a\n\nb");
        assert_eq!(collapse_blank_lines("a\n\nb"), "a\n\nb");
        assert_eq!(collapse_blank_lines("a\nb"), "a\nb");
    }

    #[test]
    fn tidy_handles_whitespace_only_lines() {
        let input = "\n\n  Title  \n \n\t\n   \nBody\n\n\n";
        assert_eq!(tidy(input), "Title\n\nBody");
    }

    #[test]
    fn fix_code_block_languages_strips_prefix() {
        let input = "```language-javascript\nconsole.log('hi');\n```";
        assert!(fix_code_block_languages(input).starts_with("```javascript"));
    }

    #[test]
    fn strip_leftover_html_preserves_code_blocks() {
        let input = "<div class=\"note\">Info</div>\n```html\n<div>Kept</div>\n```";
        let result = strip_leftover_html(input);
        assert!(result.starts_with("Info\n"));
        assert!(result.contains("<div>Kept</div>"));
    }

    #[test]
    fn anchor_links_become_text() {
        let input = "See [Install](#install) or [Guide](/guide).";
        assert_eq!(drop_anchor_links(input), "See Install or [Guide](/guide).");
    }

    #[test]
    fn resolve_links_relative_and_images() {
        let base = Url::parse("https://docs.example.com/guide/intro").unwrap();
        let input = "[Next](/api) ![Logo](img/logo.png) [Ext](https://other.com)";
        let result = resolve_links(input, Some(&base));
        assert_eq!(
            result,
            "[Next](https://docs.example.com/api) ![Logo](https://docs.example.com/guide/img/logo.png) [Ext](https://other.com)"
        );
    }
}
