//! Configuration module for Trawler
//!
//! This module handles loading, parsing, and validating TOML configuration files.
//!
//! # Example
//!
//! ```no_run
//! use trawler::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("trawler.toml")).unwrap();
//! println!("Crawl will stop after {} dead pages", config.crawl.dead_end_threshold);
//! ```

mod parser;
mod types;
mod validation;

// Re-export types
pub use types::{
    Config, CrawlConfig, OutputConfig, DEFAULT_FILE_EXTENSIONS, DEFAULT_TRACKING_PARAMS,
};

// Re-export parser and validation functions
pub use parser::{
    compute_config_hash, hash_crawl_config, load_config, load_config_with_hash, parse_config,
};
pub use validation::validate_crawl_config;
