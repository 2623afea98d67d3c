use crate::config::types::{Config, CrawlConfig, OutputConfig};
use crate::ConfigError;

/// Validates the entire configuration
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_output_config(&config.output)?;
    validate_crawl_config(&config.crawl)?;
    Ok(())
}

/// Validates a per-session crawl configuration
///
/// This runs synchronously inside `start_session`, so a bad threshold is
/// rejected before any crawling begins.
pub fn validate_crawl_config(config: &CrawlConfig) -> Result<(), ConfigError> {
    validate_limits(config)?;
    validate_dead_end(config)?;
    validate_downloads(config)?;
    validate_url_rules(config)?;
    Ok(())
}

/// Validates output configuration
fn validate_output_config(config: &OutputConfig) -> Result<(), ConfigError> {
    if config.database_path.is_empty() {
        return Err(ConfigError::Validation(
            "database_path cannot be empty".to_string(),
        ));
    }

    Ok(())
}

fn validate_limits(config: &CrawlConfig) -> Result<(), ConfigError> {
    if config.max_pages < 1 {
        return Err(ConfigError::Validation(format!(
            "max_pages must be >= 1, got {}",
            config.max_pages
        )));
    }

    if config.max_frontier_size < 1 {
        return Err(ConfigError::Validation(format!(
            "max_frontier_size must be >= 1, got {}",
            config.max_frontier_size
        )));
    }

    if config.max_concurrent_fetches < 1 || config.max_concurrent_fetches > 100 {
        return Err(ConfigError::Validation(format!(
            "max_concurrent_fetches must be between 1 and 100, got {}",
            config.max_concurrent_fetches
        )));
    }

    if config.fetch_timeout_secs < 1 {
        return Err(ConfigError::Validation(
            "fetch_timeout_secs must be >= 1".to_string(),
        ));
    }

    if config.max_duration_secs == Some(0) {
        return Err(ConfigError::Validation(
            "max_duration_secs must be >= 1 when set".to_string(),
        ));
    }

    Ok(())
}

fn validate_dead_end(config: &CrawlConfig) -> Result<(), ConfigError> {
    if config.dead_end_threshold < 1 {
        return Err(ConfigError::Validation(format!(
            "dead_end_threshold must be >= 1, got {}",
            config.dead_end_threshold
        )));
    }

    let ratio = config.revisit_ratio_threshold;
    if !ratio.is_finite() || !(0.0..=1.0).contains(&ratio) {
        return Err(ConfigError::Validation(format!(
            "revisit_ratio_threshold must be between 0 and 1, got {}",
            ratio
        )));
    }

    if config.min_sample_size < 1 {
        return Err(ConfigError::Validation(
            "min_sample_size must be >= 1".to_string(),
        ));
    }

    // A floor larger than the window would never be reached
    if config.min_sample_size > config.revisit_window_size {
        return Err(ConfigError::Validation(format!(
            "min_sample_size ({}) cannot exceed revisit_window_size ({})",
            config.min_sample_size, config.revisit_window_size
        )));
    }

    Ok(())
}

fn validate_downloads(config: &CrawlConfig) -> Result<(), ConfigError> {
    if config.download_concurrency < 1 {
        return Err(ConfigError::Validation(format!(
            "download_concurrency must be >= 1, got {}",
            config.download_concurrency
        )));
    }

    if config.download_queue_size < 1 {
        return Err(ConfigError::Validation(
            "download_queue_size must be >= 1".to_string(),
        ));
    }

    if config.download_max_attempts < 1 {
        return Err(ConfigError::Validation(
            "download_max_attempts must be >= 1".to_string(),
        ));
    }

    if config.download_backoff_base_ms > config.download_backoff_max_ms {
        return Err(ConfigError::Validation(format!(
            "download_backoff_base_ms ({}) cannot exceed download_backoff_max_ms ({})",
            config.download_backoff_base_ms, config.download_backoff_max_ms
        )));
    }

    if config.download_directory.as_os_str().is_empty() {
        return Err(ConfigError::Validation(
            "download_directory cannot be empty".to_string(),
        ));
    }

    for ext in &config.file_extensions {
        let trimmed = ext.trim_start_matches('.');
        if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_alphanumeric() || c == '.') {
            return Err(ConfigError::Validation(format!(
                "Invalid file extension '{}'",
                ext
            )));
        }
    }

    Ok(())
}

fn validate_url_rules(config: &CrawlConfig) -> Result<(), ConfigError> {
    if config.tracking_params.iter().any(|p| p.is_empty()) {
        return Err(ConfigError::Validation(
            "tracking_params cannot contain empty names".to_string(),
        ));
    }

    for pattern in &config.allowed_domains {
        validate_domain_pattern(pattern)?;
    }

    Ok(())
}

/// Validates a domain pattern (supports wildcards)
fn validate_domain_pattern(pattern: &str) -> Result<(), ConfigError> {
    if pattern.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain pattern cannot be empty".to_string(),
        ));
    }

    match pattern.strip_prefix("*.") {
        Some(domain) => validate_domain_string(domain),
        None => validate_domain_string(pattern),
    }
}

/// Validates a domain string (without wildcard prefix)
fn validate_domain_string(domain: &str) -> Result<(), ConfigError> {
    if domain.is_empty() {
        return Err(ConfigError::InvalidPattern(
            "Domain cannot be empty".to_string(),
        ));
    }

    if !domain
        .chars()
        .all(|c| c.is_alphanumeric() || c == '.' || c == '-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' contains invalid characters",
            domain
        )));
    }

    if domain.starts_with('.')
        || domain.ends_with('.')
        || domain.starts_with('-')
        || domain.ends_with('-')
    {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot start or end with '.' or '-'",
            domain
        )));
    }

    if domain.contains("..") {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' cannot contain consecutive dots",
            domain
        )));
    }

    if !domain.contains('.') {
        return Err(ConfigError::InvalidPattern(format!(
            "Domain '{}' must contain at least one dot (e.g., 'example.com')",
            domain
        )));
    }

    Ok(())
}
