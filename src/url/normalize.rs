use crate::UrlError;
use url::Url;

/// Produces the canonical form of a URL
///
/// # Normalization Steps
///
/// 1. Resolve `raw` against `base` when given (relative links); otherwise parse it as absolute
/// 2. Reject anything that is not http or https
/// 3. Lowercase scheme and host, drop the default port (done by the parser)
/// 4. Remove the fragment
/// 5. Drop tracking query parameters (`tracking_params` plus any `utm_*`),
///    keeping the remaining parameters in their original order and encoding
/// 6. Remove an empty query string (trailing `?`)
///
/// Two URLs that normalize identically are the same node. The function is
/// pure: the same input always yields the same output.
///
/// # Examples
///
/// ```
/// use trawler::url::normalize;
///
/// let tracking = vec!["fbclid".to_string()];
/// let url = normalize("HTTP://Example.COM:80/a?b=2&fbclid=x&a=1#top", None, &tracking).unwrap();
/// assert_eq!(url.as_str(), "http://example.com/a?b=2&a=1");
/// ```
pub fn normalize(raw: &str, base: Option<&Url>, tracking_params: &[String]) -> Result<Url, UrlError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(UrlError::Malformed("empty URL".to_string()));
    }

    let mut url = match base {
        Some(base) => base.join(raw),
        None => Url::parse(raw),
    }
    .map_err(|e| UrlError::Parse(format!("{}: {}", raw, e)))?;

    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(UrlError::InvalidScheme(format!(
            "Only HTTP and HTTPS schemes are supported, got: {}",
            url.scheme()
        )));
    }

    match url.host_str() {
        Some(host) if !host.is_empty() => {}
        _ => return Err(UrlError::MissingDomain),
    }

    url.set_fragment(None);

    if let Some(query) = url.query() {
        let kept = filter_query(query, tracking_params);
        if kept.is_empty() {
            url.set_query(None);
        } else {
            url.set_query(Some(&kept));
        }
    }

    Ok(url)
}

/// Convenience wrapper returning the canonical string form
pub fn normalize_str(raw: &str, base: Option<&Url>, tracking_params: &[String]) -> Result<String, UrlError> {
    normalize(raw, base, tracking_params).map(String::from)
}

/// Removes tracking pairs from a raw query string without re-encoding the rest
fn filter_query(query: &str, tracking_params: &[String]) -> String {
    query
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter(|pair| {
            let key = pair.split('=').next().unwrap_or_default();
            !is_tracking_param(key, tracking_params)
        })
        .collect::<Vec<_>>()
        .join("&")
}

/// Checks if a query parameter is a tracking parameter
fn is_tracking_param(key: &str, tracking_params: &[String]) -> bool {
    key.starts_with("utm_") || tracking_params.iter().any(|p| p == key)
}
