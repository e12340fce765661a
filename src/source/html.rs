//! HTML helpers shared by the proceedings scrapers.
//!
//! Parsed documents are not `Send`, so callers parse and extract in plain
//! functions and only carry owned results across `.await` points.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::dataset::short_digest;

/// Compiles a static CSS selector, panicking on an invalid literal.
pub(crate) fn static_selector(css: &str) -> Selector {
    Selector::parse(css).unwrap_or_else(|e| panic!("invalid static selector '{css}': {e}"))
}

/// Compiles a static regex, panicking on an invalid literal.
pub(crate) fn static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

pub(crate) static ANCHOR: LazyLock<Selector> = LazyLock::new(|| static_selector("a[href]"));
static SECTION_HEADER: LazyLock<Selector> = LazyLock::new(|| static_selector("h2, h3, h4"));

/// Collapsed, trimmed text content of an element.
pub(crate) fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "))
}

/// Joins runs of whitespace into single spaces and trims.
pub(crate) fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Resolves `href` against `base`; absolute and protocol-relative links pass through.
pub(crate) fn absolutize(href: &str, base: &Url) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    if href.starts_with("http://") || href.starts_with("https://") {
        return Some(href.to_string());
    }
    if let Some(rest) = href.strip_prefix("//") {
        return Some(format!("{}://{rest}", base.scheme()));
    }
    base.join(href).ok().map(|url| url.to_string())
}

/// Text of the first non-empty element following a `h2`/`h3`/`h4` titled `name`.
pub(crate) fn section_text(document: &Html, name: &str) -> Option<String> {
    document
        .select(&SECTION_HEADER)
        .filter(|header| element_text(*header).eq_ignore_ascii_case(name))
        .find_map(|header| {
            header
                .next_siblings()
                .filter_map(ElementRef::wrap)
                .take_while(|sibling| !is_section_header(*sibling))
                .filter(|sibling| !matches!(sibling.value().name(), "br" | "hr"))
                .map(element_text)
                .find(|text| !text.is_empty())
        })
}

/// All non-empty text following a header titled `name`, up to the next header.
pub(crate) fn section_paragraphs(document: &Html, name: &str) -> Option<String> {
    document
        .select(&SECTION_HEADER)
        .filter(|header| element_text(*header).eq_ignore_ascii_case(name))
        .find_map(|header| {
            let chunks: Vec<String> = header
                .next_siblings()
                .filter_map(ElementRef::wrap)
                .take_while(|sibling| !is_section_header(*sibling))
                .map(element_text)
                .filter(|text| !text.is_empty())
                .collect();
            (!chunks.is_empty()).then(|| chunks.join(" "))
        })
}

fn is_section_header(element: ElementRef<'_>) -> bool {
    matches!(element.value().name(), "h1" | "h2" | "h3" | "h4")
}

/// Splits a `,`/`;` separated list, dropping blanks.
pub(crate) fn split_list(text: &str) -> Vec<String> {
    text.split([',', ';'])
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(str::to_string)
        .collect()
}

/// Stable id for papers whose source offers none.
pub(crate) fn fallback_id(title: &str) -> String {
    short_digest(&collapse_whitespace(title).to_lowercase())
}

/// Last path segment of a URL, ignoring a trailing slash.
pub(crate) fn url_basename(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_section_text_skips_empty_siblings() {
        let doc = Html::parse_document(
            "<h4>Abstract</h4><p></p><br><p>We study  graphs.</p><h4>Keywords</h4><p>a; b</p>",
        );
        assert_eq!(section_text(&doc, "abstract").unwrap(), "We study graphs.");
        assert_eq!(section_text(&doc, "Keywords").unwrap(), "a; b");
        assert!(section_text(&doc, "Authors").is_none());
    }

    #[test]
    fn test_section_paragraphs_stops_at_next_header() {
        let doc = Html::parse_document(
            "<h3>Abstract</h3><p>One.</p><p>Two.</p><h3>Related</h3><p>Three.</p>",
        );
        assert_eq!(section_paragraphs(&doc, "Abstract").unwrap(), "One. Two.");
    }

    #[test]
    fn test_absolutize_variants() {
        let base = Url::parse("https://example.com/paper/2024").unwrap();
        assert_eq!(
            absolutize("/hash/a-Abstract.html", &base).unwrap(),
            "https://example.com/hash/a-Abstract.html"
        );
        assert_eq!(
            absolutize("//cdn.example.com/x.pdf", &base).unwrap(),
            "https://cdn.example.com/x.pdf"
        );
        assert!(absolutize("#top", &base).is_none());
    }

    #[test]
    fn test_split_list_handles_both_separators() {
        assert_eq!(split_list("a, b; c,,"), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_fallback_id_ignores_case_and_spacing() {
        assert_eq!(fallback_id("Graph  Nets"), fallback_id("graph nets"));
        assert_eq!(fallback_id("x").len(), 16);
    }

    #[test]
    fn test_url_basename() {
        assert_eq!(url_basename("https://a/b/c.html"), Some("c.html"));
        assert_eq!(url_basename("https://a/b/c/"), Some("c"));
        assert_eq!(url_basename("https://a/b/c.html?x=1"), Some("c.html"));
    }
}
