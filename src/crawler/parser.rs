//! HTML link extraction
//!
//! Pulls `<a href>` targets and their anchor text out of a page. Links are
//! returned as written in the document; resolution and canonicalization are
//! done later by the URL normalizer against the page URL.

use scraper::{Html, Selector};

/// An outbound link as it appears in the page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawLink {
    pub href: String,
    pub anchor_text: String,
}

/// Extracts all followable links from an HTML document
///
/// # Link Extraction Rules
///
/// **Include:** `<a href="...">` anywhere in the document, including
/// `download` and `rel="nofollow"` anchors (documents are often linked that way)
///
/// **Exclude:** `javascript:`, `mailto:`, `tel:` and `data:` targets, empty
/// hrefs and fragment-only links
///
/// # Example
///
/// ```
/// use trawler::crawler::extract_links;
///
/// let html = r#"<a href="/report.pdf">Annual report</a><a href="mailto:x@y.z">Mail</a>"#;
/// let links = extract_links(html);
/// assert_eq!(links.len(), 1);
/// assert_eq!(links[0].href, "/report.pdf");
/// assert_eq!(links[0].anchor_text, "Annual report");
/// ```
pub fn extract_links(html: &str) -> Vec<RawLink> {
    let document = Html::parse_document(html);
    let mut links = Vec::new();

    let Ok(selector) = Selector::parse("a[href]") else {
        return links;
    };

    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if !is_followable(href) {
            continue;
        }

        let anchor_text = element
            .text()
            .collect::<Vec<_>>()
            .join(" ")
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");

        links.push(RawLink {
            href: href.to_string(),
            anchor_text,
        });
    }

    links
}

fn is_followable(href: &str) -> bool {
    if href.is_empty() || href.starts_with('#') {
        return false;
    }

    let lower = href.to_ascii_lowercase();
    !["javascript:", "mailto:", "tel:", "data:"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
}
