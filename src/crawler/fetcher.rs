//! Page fetch service
//!
//! The orchestrator and the download workers only see the `FetchService`
//! trait. `HttpFetcher` is the reqwest-backed implementation used by the CLI;
//! tests plug in in-memory services.

use crate::crawler::parser::{extract_links, RawLink};
use async_trait::async_trait;
use reqwest::{header, redirect::Policy, Client};
use std::time::Duration;
use thiserror::Error;

/// User agent sent by `HttpFetcher`
pub const USER_AGENT: &str = concat!("Trawler/", env!("CARGO_PKG_VERSION"));

/// Errors returned by a fetch service
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("Request timed out")]
    Timeout,

    #[error("Network error: {0}")]
    Network(String),

    #[error("HTTP status {code}")]
    Status { code: u16 },
}

impl FetchError {
    /// Timeouts, network failures, 5xx and 429 are worth retrying
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Network(_) => true,
            Self::Status { code } => *code >= 500 || *code == 429,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Status { code } => Some(*code),
            _ => None,
        }
    }

    /// Short kind string used in the session error log
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Network(_) => "network",
            Self::Status { code } if *code >= 500 => "http_5xx",
            Self::Status { .. } => "http_4xx",
        }
    }
}

/// A fetched HTML (or other) page
#[derive(Debug, Clone, Default)]
pub struct FetchedPage {
    pub status_code: u16,
    pub content_type: Option<String>,
    pub body: String,
    pub links: Vec<RawLink>,
}

/// Raw bytes of a downloaded file
#[derive(Debug, Clone, Default)]
pub struct FetchedFile {
    pub status_code: u16,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
    /// Server-advertised `Content-Length`, if any
    pub content_length: Option<u64>,
    /// Server-advertised `ETag`, quotes and weak prefix kept
    pub etag: Option<String>,
}

/// External page fetch collaborator
///
/// Non-2xx responses are reported as `FetchError::Status`.
#[async_trait]
pub trait FetchService: Send + Sync {
    /// Fetches a page and its outbound links
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError>;

    /// Fetches raw bytes for the download pipeline
    async fn fetch_bytes(&self, url: &str) -> Result<FetchedFile, FetchError>;
}

/// Builds the HTTP client used by `HttpFetcher`
pub fn build_http_client(timeout: Duration) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// reqwest-backed fetch service
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: build_http_client(timeout)?,
        })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, FetchError> {
        let response = self.client.get(url).send().await.map_err(classify_error)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                code: status.as_u16(),
            });
        }
        Ok(response)
    }
}

fn classify_error(error: reqwest::Error) -> FetchError {
    if error.is_timeout() {
        FetchError::Timeout
    } else if let Some(status) = error.status() {
        FetchError::Status {
            code: status.as_u16(),
        }
    } else {
        FetchError::Network(error.to_string())
    }
}

fn header_string(response: &reqwest::Response, name: header::HeaderName) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}

/// True for HTML and XHTML content types (and a missing content type)
pub fn is_html(content_type: Option<&str>) -> bool {
    match content_type {
        None => true,
        Some(ct) => {
            let ct = ct.to_ascii_lowercase();
            ct.contains("text/html") || ct.contains("application/xhtml")
        }
    }
}

#[async_trait]
impl FetchService for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage, FetchError> {
        let response = self.get(url).await?;
        let status_code = response.status().as_u16();
        let content_type = header_string(&response, header::CONTENT_TYPE);

        // Only HTML bodies are read here; documents go through fetch_bytes
        if !is_html(content_type.as_deref()) {
            return Ok(FetchedPage {
                status_code,
                content_type,
                body: String::new(),
                links: Vec::new(),
            });
        }

        let body = response.text().await.map_err(classify_error)?;
        let links = extract_links(&body);

        Ok(FetchedPage {
            status_code,
            content_type,
            body,
            links,
        })
    }

    async fn fetch_bytes(&self, url: &str) -> Result<FetchedFile, FetchError> {
        let response = self.get(url).await?;
        let status_code = response.status().as_u16();
        let content_type = header_string(&response, header::CONTENT_TYPE);
        let etag = header_string(&response, header::ETAG);
        let content_length = header_string(&response, header::CONTENT_LENGTH)
            .and_then(|v| v.trim().parse::<u64>().ok());

        let bytes = response.bytes().await.map_err(classify_error)?;

        Ok(FetchedFile {
            status_code,
            content_type,
            bytes: bytes.to_vec(),
            content_length,
            etag,
        })
    }
}
