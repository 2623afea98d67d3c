//! Composable scope predicates
//!
//! The frontier and the coordinator decide which links belong to a crawl by
//! combining small predicates instead of a fixed rule set.

use crate::url::{extract_domain, matches_wildcard, registrable_domain};
use std::sync::Arc;
use url::Url;

/// A shareable URL filter
pub type UrlPredicate = Arc<dyn Fn(&Url) -> bool + Send + Sync>;

/// Accepts only http and https URLs
pub fn http_scheme() -> UrlPredicate {
    Arc::new(|url: &Url| matches!(url.scheme(), "http" | "https"))
}

/// Accepts URLs on the same registrable domain as `root`
pub fn same_registrable_domain(root: &Url) -> UrlPredicate {
    let site = extract_domain(root).map(|host| registrable_domain(&host));
    Arc::new(move |url: &Url| match (&site, extract_domain(url)) {
        (Some(site), Some(host)) => registrable_domain(&host) == *site,
        _ => false,
    })
}

/// Accepts URLs whose host matches any of the wildcard patterns
pub fn matches_domain_patterns(patterns: &[String]) -> UrlPredicate {
    let patterns: Vec<String> = patterns.iter().map(|p| p.to_lowercase()).collect();
    Arc::new(move |url: &Url| {
        extract_domain(url)
            .map(|host| patterns.iter().any(|p| matches_wildcard(p, &host)))
            .unwrap_or(false)
    })
}

/// Accepts a URL if any predicate does
pub fn any_of(predicates: Vec<UrlPredicate>) -> UrlPredicate {
    Arc::new(move |url: &Url| predicates.iter().any(|p| p(url)))
}

/// Accepts a URL only if every predicate does
pub fn all_of(predicates: Vec<UrlPredicate>) -> UrlPredicate {
    Arc::new(move |url: &Url| predicates.iter().all(|p| p(url)))
}

/// Builds the default crawl scope: http(s) on the start URL's site or an allowed pattern
pub fn crawl_scope(root: &Url, allowed_domains: &[String]) -> UrlPredicate {
    let mut site_rules = vec![same_registrable_domain(root)];
    if !allowed_domains.is_empty() {
        site_rules.push(matches_domain_patterns(allowed_domains));
    }
    all_of(vec![http_scheme(), any_of(site_rules)])
}
