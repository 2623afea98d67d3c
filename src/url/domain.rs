use url::Url;

/// Two-label public suffixes under which registrations happen at the third label
const MULTI_LABEL_SUFFIXES: &[&str] = &[
    "co.uk", "org.uk", "ac.uk", "gov.uk", "ltd.uk", "me.uk", "net.uk", "nhs.uk",
    "com.au", "net.au", "org.au", "edu.au", "gov.au",
    "co.nz", "org.nz", "govt.nz", "ac.nz",
    "co.jp", "ne.jp", "or.jp", "ac.jp", "go.jp",
    "com.br", "gov.br", "org.br",
    "co.za", "gov.za", "ac.za",
    "co.in", "gov.in", "ac.in",
    "com.cn", "gov.cn", "edu.cn",
    "com.mx", "gob.mx",
    "co.kr", "go.kr",
];

/// Extracts the lowercase host from a URL
///
/// # Examples
///
/// ```
/// use url::Url;
/// use trawler::url::extract_domain;
///
/// let url = Url::parse("https://Sub.Example.com/path").unwrap();
/// assert_eq!(extract_domain(&url), Some("sub.example.com".to_string()));
/// ```
pub fn extract_domain(url: &Url) -> Option<String> {
    url.host_str().map(|h| h.to_lowercase())
}

/// Returns the registrable domain ("site") of a host
///
/// `blog.example.co.uk` and `www.example.co.uk` both map to `example.co.uk`.
/// IP addresses and single-label hosts such as `localhost` map to themselves.
pub fn registrable_domain(host: &str) -> String {
    let host = host.trim_end_matches('.').to_lowercase();

    if host.parse::<std::net::IpAddr>().is_ok() || host.starts_with('[') {
        return host;
    }

    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() <= 2 {
        return host;
    }

    let last_two = labels[labels.len() - 2..].join(".");
    let keep = if MULTI_LABEL_SUFFIXES.contains(&last_two.as_str()) {
        3
    } else {
        2
    };

    labels[labels.len().saturating_sub(keep)..].join(".")
}
