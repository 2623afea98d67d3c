use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default allow-list of downloadable file extensions
pub const DEFAULT_FILE_EXTENSIONS: &[&str] = &[
    "pdf", "doc", "docx", "xls", "xlsx", "ppt", "pptx", "csv", "zip", "json", "xml",
];

/// Query parameters stripped during normalization unless overridden
pub const DEFAULT_TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
    "mc_eid",
    "mc_cid",
    "_ga",
];

/// Main configuration structure for Trawler
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub output: OutputConfig,
    #[serde(default)]
    pub crawl: CrawlConfig,
}

/// Output configuration
#[derive(Debug, Clone, Deserialize)]
pub struct OutputConfig {
    /// Path to the SQLite database file
    #[serde(rename = "database-path")]
    pub database_path: String,
}

/// Per-session crawl configuration
///
/// Every field has a default so a session can be started from
/// `CrawlConfig::default()` and selectively overridden.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct CrawlConfig {
    /// Maximum link depth from the start URL
    pub max_depth: u32,

    /// Maximum number of pages fetched before halting
    pub max_pages: u64,

    /// Maximum number of URLs waiting in the frontier
    pub max_frontier_size: usize,

    /// Size of the page-fetch pool (URLs dispatched per batch)
    pub max_concurrent_fetches: usize,

    /// Per-fetch timeout in seconds
    pub fetch_timeout_secs: u64,

    /// Extra attempts for transient fetch failures (timeout, network, 5xx)
    pub fetch_retries: u32,

    /// Optional wall-clock budget for the whole session
    pub max_duration_secs: Option<u64>,

    /// Consecutive zero-discovery pages before the crawl is declared dead
    pub dead_end_threshold: u32,

    /// Revisit ratio over the sliding window that terminates the crawl
    pub revisit_ratio_threshold: f64,

    /// Minimum window entries before the revisit ratio is evaluated
    pub min_sample_size: usize,

    /// Number of recently processed pages kept in the sliding window
    pub revisit_window_size: usize,

    /// Whether discovered files are downloaded at all
    pub download_enabled: bool,

    /// Size of the download worker pool
    pub download_concurrency: usize,

    /// Capacity of the bounded download queue
    pub download_queue_size: usize,

    /// Attempts per file before it is marked failed
    pub download_max_attempts: u32,

    /// Base delay for exponential backoff between download attempts
    pub download_backoff_base_ms: u64,

    /// Upper bound for a single backoff delay
    pub download_backoff_max_ms: u64,

    /// Extensions (without the leading dot) treated as downloadable files
    pub file_extensions: Vec<String>,

    /// Root directory for downloaded files
    pub download_directory: PathBuf,

    /// Query parameters removed by the URL normalizer
    pub tracking_params: Vec<String>,

    /// Extra in-scope domain patterns (e.g. "*.example.org")
    pub allowed_domains: Vec<String>,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            max_depth: 100,
            max_pages: 10_000,
            max_frontier_size: 100_000,
            max_concurrent_fetches: 10,
            fetch_timeout_secs: 30,
            fetch_retries: 2,
            max_duration_secs: None,
            dead_end_threshold: 50,
            revisit_ratio_threshold: 0.95,
            min_sample_size: 20,
            revisit_window_size: 100,
            download_enabled: true,
            download_concurrency: 4,
            download_queue_size: 10_000,
            download_max_attempts: 3,
            download_backoff_base_ms: 500,
            download_backoff_max_ms: 30_000,
            file_extensions: DEFAULT_FILE_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            download_directory: PathBuf::from("./downloads"),
            tracking_params: DEFAULT_TRACKING_PARAMS
                .iter()
                .map(|param| param.to_string())
                .collect(),
            allowed_domains: Vec::new(),
        }
    }
}

impl CrawlConfig {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn max_duration(&self) -> Option<Duration> {
        self.max_duration_secs.map(Duration::from_secs)
    }
}
