//! Trawler main entry point
//!
//! Command-line interface for the exhaustive crawl engine.

use anyhow::{bail, Context};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use trawler::config::{load_config_with_hash, validate_crawl_config, Config};
use trawler::crawler::{CrawlEngine, HttpFetcher, SessionReport};
use trawler::output::{load_statistics, print_statistics};
use trawler::storage::{open_storage, SharedStorage};
use tracing_subscriber::EnvFilter;

/// Trawler: exhaustive site crawler
///
/// Crawls every page of a site breadth-first, records the link graph in
/// SQLite, downloads linked documents, and stops once the site stops
/// yielding new pages.
#[derive(Parser, Debug)]
#[command(name = "trawler")]
#[command(version)]
#[command(about = "Exhaustive site crawler", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// URL to start crawling from
    #[arg(value_name = "START_URL", required_unless_present_any = ["resume", "stats", "list", "dry_run"])]
    start_url: Option<String>,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Resume a paused session by ID
    #[arg(long, value_name = "SESSION_ID", conflicts_with_all = ["start_url", "stats", "list"])]
    resume: Option<String>,

    /// Validate config and show the crawl settings without crawling
    #[arg(long, conflicts_with_all = ["stats", "list", "resume"])]
    dry_run: bool,

    /// Show statistics for a session (latest if no --session) and exit
    #[arg(long, conflicts_with_all = ["dry_run", "list"])]
    stats: bool,

    /// List all sessions in the database and exit
    #[arg(long)]
    list: bool,

    /// Session to use with --stats or --export-graph
    #[arg(long, value_name = "SESSION_ID")]
    session: Option<String>,

    /// Write the site graph as JSON when done
    #[arg(long, value_name = "PATH")]
    export_graph: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    setup_logging(cli.verbose, cli.quiet);

    // Load and validate configuration
    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("Failed to load configuration from {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", hash);

    if cli.dry_run {
        return handle_dry_run(&config, cli.start_url.as_deref());
    }

    let storage: SharedStorage = Arc::new(
        open_storage(Path::new(&config.output.database_path))
            .with_context(|| format!("Failed to open database {}", config.output.database_path))?,
    );

    if cli.list {
        return handle_list(&storage);
    }
    if cli.stats {
        let session_id = session_or_latest(&storage, cli.session.as_deref())?;
        let stats = load_statistics(storage.as_ref(), &session_id)?;
        print_statistics(&stats);
        if let Some(path) = &cli.export_graph {
            export_graph(&storage, &session_id, path)?;
        }
        return Ok(());
    }

    let fetcher = Arc::new(HttpFetcher::new(config.crawl.fetch_timeout())?);
    let engine = CrawlEngine::new(Arc::clone(&storage), fetcher);

    let session_id = match (&cli.resume, &cli.start_url) {
        (Some(session_id), _) => {
            engine.resume_session(session_id).await?;
            session_id.clone()
        }
        (None, Some(start_url)) => engine.start_session(start_url, config.crawl.clone()).await?,
        (None, None) => bail!("A start URL or --resume is required"),
    };
    println!("Session: {}", session_id);

    let report = tokio::select! {
        report = engine.wait(&session_id) => report?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupt received, stopping session {}", session_id);
            if let Err(e) = engine.stop_session(&session_id).await {
                tracing::warn!("Could not stop session {}: {}", session_id, e);
            }
            engine.wait(&session_id).await?
        }
    };
    print_report(&report);

    if let Some(path) = &cli.export_graph {
        export_graph(&storage, &session_id, path)?;
    }

    Ok(())
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("trawler=info,warn"),
            1 => EnvFilter::new("trawler=debug,info"),
            2 => EnvFilter::new("trawler=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles the --dry-run mode: validates config and shows the crawl settings
fn handle_dry_run(config: &Config, start_url: Option<&str>) -> anyhow::Result<()> {
    let crawl = &config.crawl;
    validate_crawl_config(crawl)?;

    println!("=== Trawler Dry Run ===\n");

    if let Some(url) = start_url {
        let root = trawler::normalize(url, None, &crawl.tracking_params)?;
        println!("Start URL: {}\n", root);
    }

    println!("Crawl Limits:");
    println!("  Max depth: {}", crawl.max_depth);
    println!("  Max pages: {}", crawl.max_pages);
    println!("  Max frontier size: {}", crawl.max_frontier_size);
    println!("  Concurrent fetches: {}", crawl.max_concurrent_fetches);
    println!("  Fetch timeout: {}s ({} retries)", crawl.fetch_timeout_secs, crawl.fetch_retries);
    if let Some(budget) = crawl.max_duration_secs {
        println!("  Time budget: {}s", budget);
    }

    println!("\nDead-End Detection:");
    println!("  Dead-end threshold: {}", crawl.dead_end_threshold);
    println!("  Revisit ratio threshold: {}", crawl.revisit_ratio_threshold);
    println!(
        "  Window: {} pages (evaluated after {})",
        crawl.revisit_window_size, crawl.min_sample_size
    );

    println!("\nDownloads:");
    if crawl.download_enabled {
        println!("  Directory: {}", crawl.download_directory.display());
        println!("  Workers: {}", crawl.download_concurrency);
        println!("  Extensions: {}", crawl.file_extensions.join(", "));
    } else {
        println!("  Disabled");
    }

    if !crawl.allowed_domains.is_empty() {
        println!("\nAllowed Domains ({}):", crawl.allowed_domains.len());
        for pattern in &crawl.allowed_domains {
            println!("  - {}", pattern);
        }
    }

    println!("\nOutput:");
    println!("  Database: {}", config.output.database_path);

    println!("\n✓ Configuration is valid");
    Ok(())
}

fn handle_list(storage: &SharedStorage) -> anyhow::Result<()> {
    let sessions = storage.list_sessions()?;
    if sessions.is_empty() {
        println!("No sessions found");
        return Ok(());
    }
    for session in sessions {
        println!(
            "{}  {:<9}  {}  {}",
            session.id,
            session.status.to_string(),
            session.started_at,
            session.start_url
        );
    }
    Ok(())
}

fn session_or_latest(storage: &SharedStorage, session: Option<&str>) -> anyhow::Result<String> {
    if let Some(id) = session {
        return Ok(id.to_string());
    }
    match storage.list_sessions()?.into_iter().next() {
        Some(latest) => Ok(latest.id),
        None => bail!("No crawl sessions found in database"),
    }
}

fn export_graph(storage: &SharedStorage, session_id: &str, path: &Path) -> anyhow::Result<()> {
    let graph = storage.export_graph(session_id)?;
    let json = serde_json::to_string_pretty(&graph)?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write graph to {}", path.display()))?;
    println!(
        "✓ Site graph exported to {} ({} nodes, {} edges)",
        path.display(),
        graph.nodes.len(),
        graph.edges.len()
    );
    Ok(())
}

fn print_report(report: &SessionReport) {
    let p = &report.progress;
    println!();
    match report.halt_reason {
        Some(reason) => println!("Session {} {} ({})", report.session_id, report.status, reason),
        None => println!("Session {} {}", report.session_id, report.status),
    }
    println!("  Pages discovered: {}", p.pages_discovered);
    println!("  Pages crawled: {}", p.pages_crawled);
    println!("  Pages failed: {}", p.pages_failed);
    println!(
        "  Documents: {} found, {} downloaded, {} failed",
        p.documents_found, p.documents_downloaded, p.documents_failed
    );
    println!("  Deepest page: {}", p.max_depth_reached);
    println!(
        "  Elapsed: {:.1}s ({:.2} pages/sec)",
        p.elapsed_seconds, p.pages_per_second
    );
    if p.dropped_overflow > 0 {
        println!("  Frontier overflow: {} URLs dropped", p.dropped_overflow);
    }
}
