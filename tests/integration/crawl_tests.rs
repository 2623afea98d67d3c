//! Integration tests for the crawl engine
//!
//! Sessions run end-to-end against an in-memory site, so the outcome of
//! every test is fully determined by the scripted pages.

mod common;

use common::{
    engine, file_bytes, memory_storage, test_config, url, BrokenStorage, BrokenWrite, MockSite,
    ROOT,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use trawler::config::hash_crawl_config;
use trawler::crawler::{CrawlEngine, DetectorState, FetchError, FetchService};
use trawler::download::sha256_hex;
use trawler::state::{CrawlStatus, DownloadStatus, HaltReason, SessionStatus};
use trawler::storage::{Link, SessionRecord, SiteGraph};
use trawler::{CrawlConfig, TrawlerError};

fn depths(graph: &SiteGraph) -> HashMap<String, u32> {
    graph
        .nodes
        .iter()
        .map(|node| (node.url.clone(), node.depth))
        .collect()
}

#[tokio::test]
async fn test_linear_chain_halts_on_first_dead_end() {
    let dir = TempDir::new().unwrap();
    let site = Arc::new(
        MockSite::new()
            .page("/", &["/b"])
            .page("/b", &["/c"])
            .page("/c", &["/d"])
            .page("/d", &[]),
    );
    let engine = engine(&site);

    let config = CrawlConfig {
        dead_end_threshold: 1,
        ..test_config(&dir)
    };
    let id = engine.start_session(ROOT, config).await.unwrap();
    let report = engine.wait(&id).await.unwrap();

    assert_eq!(report.status, SessionStatus::Completed);
    assert_eq!(report.halt_reason, Some(HaltReason::DeadEnd));
    assert_eq!(report.progress.pages_crawled, 4);
    assert_eq!(report.progress.detector_state, DetectorState::Terminated);

    let graph = engine.export_site_graph(&id).await.unwrap();
    let depths = depths(&graph);
    assert_eq!(depths[ROOT], 0);
    assert_eq!(depths[&url("/b")], 1);
    assert_eq!(depths[&url("/c")], 2);
    assert_eq!(depths[&url("/d")], 3);
    assert_eq!(graph.edges.len(), 3);
}

#[tokio::test]
async fn test_cycle_adds_edge_but_no_node() {
    let dir = TempDir::new().unwrap();
    let site = Arc::new(MockSite::new().page("/", &["/b"]).page("/b", &["/"]));
    let engine = engine(&site);

    let id = engine.start_session(ROOT, test_config(&dir)).await.unwrap();
    let report = engine.wait(&id).await.unwrap();

    assert_eq!(report.halt_reason, Some(HaltReason::FrontierExhausted));
    assert_eq!(report.progress.pages_discovered, 2);
    assert_eq!(report.progress.consecutive_dead_pages, 1);

    let graph = engine.export_site_graph(&id).await.unwrap();
    assert_eq!(graph.nodes.len(), 2);
    assert_eq!(graph.edges.len(), 2);
    assert!(graph
        .edges
        .iter()
        .any(|e| e.from_url == url("/b") && e.to_url == ROOT));
    assert_eq!(site.fetched().len(), 2);
}

#[tokio::test]
async fn test_hub_site_terminates_after_threshold_dead_leaves() {
    let dir = TempDir::new().unwrap();
    let leaves: Vec<String> = (0..100).map(|i| format!("/leaf{}", i)).collect();
    let leaf_refs: Vec<&str> = leaves.iter().map(String::as_str).collect();

    let mut site = MockSite::new().page("/", &leaf_refs);
    for leaf in &leaves {
        site = site.page(leaf, &["/"]);
    }
    let site = Arc::new(site);
    let engine = engine(&site);

    // Leaves only link back to the root, so keep the revisit ratio out of it
    let config = CrawlConfig {
        dead_end_threshold: 50,
        max_concurrent_fetches: 10,
        revisit_ratio_threshold: 1.0,
        ..test_config(&dir)
    };
    let id = engine.start_session(ROOT, config).await.unwrap();
    let report = engine.wait(&id).await.unwrap();

    assert_eq!(report.halt_reason, Some(HaltReason::DeadEnd));
    // Root, then five batches of ten dead leaves
    assert_eq!(report.progress.pages_crawled, 51);
    assert_eq!(report.progress.pages_discovered, 101);

    let graph = engine.export_site_graph(&id).await.unwrap();
    let pending = graph
        .nodes
        .iter()
        .filter(|n| n.crawl_status == CrawlStatus::Pending)
        .count();
    assert_eq!(pending, 50);
}

#[tokio::test]
async fn test_leaves_pointing_home_trip_revisit_ratio() {
    let dir = TempDir::new().unwrap();
    let leaves: Vec<String> = (0..60).map(|i| format!("/leaf{}", i)).collect();
    let leaf_refs: Vec<&str> = leaves.iter().map(String::as_str).collect();

    let mut site = MockSite::new().page("/", &leaf_refs);
    for leaf in &leaves {
        site = site.page(leaf, &["/"]);
    }
    let site = Arc::new(site);
    let engine = engine(&site);

    let config = CrawlConfig {
        dead_end_threshold: 1000,
        revisit_ratio_threshold: 0.5,
        min_sample_size: 5,
        revisit_window_size: 10,
        max_concurrent_fetches: 1,
        ..test_config(&dir)
    };
    let id = engine.start_session(ROOT, config).await.unwrap();
    let report = engine.wait(&id).await.unwrap();

    assert_eq!(report.status, SessionStatus::Completed);
    assert_eq!(report.halt_reason, Some(HaltReason::DeadEnd));
    assert_eq!(report.progress.detector_state, DetectorState::Terminated);
    // Root plus four leaves fill the sample: 4 of 5 were revisits
    assert_eq!(report.progress.pages_crawled, 5);
    assert!(report.progress.consecutive_dead_pages < 1000);
    assert!(report.progress.revisit_ratio >= 0.5);
}

#[tokio::test]
async fn test_mixed_page_routes_files_to_downloads() {
    let dir = TempDir::new().unwrap();
    let site = Arc::new(
        MockSite::new()
            .page(
                "/",
                &[
                    "/docs/a.pdf",
                    "/docs/b.docx",
                    "/data/c.csv",
                    "/data/d.json",
                    "/archive/e.zip",
                    "/about",
                    "/contact",
                ],
            )
            .page("/about", &[])
            .page("/contact", &[])
            .file("/docs/a.pdf", b"pdf bytes")
            .file("/docs/b.docx", b"docx bytes")
            .file("/data/c.csv", b"a,b\n1,2\n")
            .file("/data/d.json", b"{\"k\":1}")
            .file("/archive/e.zip", b"PK zip"),
    );
    let engine = engine(&site);

    let id = engine.start_session(ROOT, test_config(&dir)).await.unwrap();
    let report = engine.wait(&id).await.unwrap();
    assert_eq!(report.status, SessionStatus::Completed);
    assert_eq!(report.progress.documents_found, 5);
    assert_eq!(report.progress.documents_downloaded, 5);

    let graph = engine.export_site_graph(&id).await.unwrap();
    let depths = depths(&graph);
    assert_eq!(graph.nodes.len(), 3);
    assert_eq!(depths[&url("/about")], 1);
    assert_eq!(depths[&url("/contact")], 1);
    assert!(!site.fetched().iter().any(|u| u.ends_with(".pdf")));

    let documents = engine.list_documents(&id).await.unwrap();
    assert_eq!(documents.len(), 5);
    for doc in &documents {
        assert_eq!(doc.download_status, DownloadStatus::Completed);
        assert_eq!(doc.source_page, ROOT);
        let path = doc.local_path.as_ref().unwrap();
        assert!(std::path::Path::new(path).exists());
    }
}

#[tokio::test]
async fn test_transient_download_failure_is_retried() {
    let dir = TempDir::new().unwrap();
    let bytes = b"quarterly numbers";
    let site = Arc::new(
        MockSite::new()
            .page("/", &["/report.pdf"])
            .file_responses(
                "/report.pdf",
                vec![
                    Err(FetchError::Network("connection reset".to_string())),
                    Ok(file_bytes(bytes)),
                ],
            ),
    );
    let engine = engine(&site);

    let id = engine.start_session(ROOT, test_config(&dir)).await.unwrap();
    engine.wait(&id).await.unwrap();

    let documents = engine.list_documents(&id).await.unwrap();
    assert_eq!(documents.len(), 1);
    let doc = &documents[0];
    assert_eq!(doc.download_status, DownloadStatus::Completed);
    assert_eq!(doc.checksum.as_deref(), Some(sha256_hex(bytes).as_str()));
    assert_eq!(doc.size, Some(bytes.len() as u64));
    assert_eq!(doc.attempts, 2);
    assert_eq!(site.file_attempts("/report.pdf"), 2);
}

#[tokio::test]
async fn test_missing_download_fails_without_retry() {
    let dir = TempDir::new().unwrap();
    let site = Arc::new(
        MockSite::new()
            .page("/", &["/gone.pdf"])
            .file_responses("/gone.pdf", vec![Err(FetchError::Status { code: 404 })]),
    );
    let engine = engine(&site);

    let id = engine.start_session(ROOT, test_config(&dir)).await.unwrap();
    let report = engine.wait(&id).await.unwrap();

    let documents = engine.list_documents(&id).await.unwrap();
    assert_eq!(documents[0].download_status, DownloadStatus::Failed);
    assert_eq!(documents[0].failure_reason.as_deref(), Some("http_client_error"));
    assert_eq!(site.file_attempts("/gone.pdf"), 1);
    assert_eq!(report.progress.documents_failed, 1);
}

#[tokio::test]
async fn test_size_mismatch_exhausts_retries() {
    let dir = TempDir::new().unwrap();
    let mut truncated = file_bytes(b"short");
    truncated.content_length = Some(1000);
    let site = Arc::new(
        MockSite::new()
            .page("/", &["/big.zip"])
            .file_responses("/big.zip", vec![Ok(truncated)]),
    );
    let engine = engine(&site);

    let config = CrawlConfig {
        download_max_attempts: 3,
        ..test_config(&dir)
    };
    let id = engine.start_session(ROOT, config).await.unwrap();
    engine.wait(&id).await.unwrap();

    let documents = engine.list_documents(&id).await.unwrap();
    assert_eq!(documents[0].download_status, DownloadStatus::Failed);
    assert_eq!(documents[0].failure_reason.as_deref(), Some("size_mismatch"));
    assert_eq!(documents[0].attempts, 3);
    assert_eq!(site.file_attempts("/big.zip"), 3);
}

#[tokio::test]
async fn test_identical_content_is_stored_once() {
    let dir = TempDir::new().unwrap();
    let site = Arc::new(
        MockSite::new()
            .page("/", &["/a/report.pdf", "/b/copy.pdf"])
            .file("/a/report.pdf", b"same bytes")
            .file("/b/copy.pdf", b"same bytes"),
    );
    let engine = engine(&site);

    let config = CrawlConfig {
        download_concurrency: 2,
        ..test_config(&dir)
    };
    let id = engine.start_session(ROOT, config).await.unwrap();
    engine.wait(&id).await.unwrap();

    let documents = engine.list_documents(&id).await.unwrap();
    assert_eq!(documents.len(), 2);
    assert!(documents
        .iter()
        .all(|d| d.download_status == DownloadStatus::Completed));
    assert_eq!(documents[0].checksum, documents[1].checksum);
    assert_eq!(documents[0].local_path, documents[1].local_path);

    let stored = std::fs::read_dir(dir.path().join("downloads").join(&id))
        .unwrap()
        .count();
    assert_eq!(stored, 1);
}

#[tokio::test]
async fn test_file_discovered_twice_is_downloaded_once() {
    let dir = TempDir::new().unwrap();
    let site = Arc::new(
        MockSite::new()
            .page("/", &["/a", "/b"])
            .page("/a", &["/shared.csv"])
            .page("/b", &["/shared.csv"])
            .file("/shared.csv", b"x,y"),
    );
    let engine = engine(&site);

    let id = engine.start_session(ROOT, test_config(&dir)).await.unwrap();
    let report = engine.wait(&id).await.unwrap();

    assert_eq!(report.progress.documents_found, 1);
    assert_eq!(engine.list_documents(&id).await.unwrap().len(), 1);
    assert_eq!(site.file_attempts("/shared.csv"), 1);
}

#[tokio::test]
async fn test_page_serving_a_document_is_downloaded() {
    let dir = TempDir::new().unwrap();
    let site = Arc::new(
        MockSite::new()
            .page("/", &["/download?id=7"])
            .document_page("/download?id=7", "application/pdf")
            .file_responses("/download?id=7", vec![Ok(file_bytes(b"%PDF-1.7"))]),
    );
    let engine = engine(&site);

    let id = engine.start_session(ROOT, test_config(&dir)).await.unwrap();
    engine.wait(&id).await.unwrap();

    let graph = engine.export_site_graph(&id).await.unwrap();
    let node = graph
        .nodes
        .iter()
        .find(|n| n.url == url("/download?id=7"))
        .unwrap();
    assert_eq!(node.crawl_status, CrawlStatus::Crawled);

    let documents = engine.list_documents(&id).await.unwrap();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].extension, "pdf");
    assert_eq!(documents[0].source_page, ROOT);
    assert_eq!(documents[0].download_status, DownloadStatus::Completed);
}

#[tokio::test]
async fn test_failed_fetch_is_recorded() {
    let dir = TempDir::new().unwrap();
    let site = Arc::new(
        MockSite::new()
            .page("/", &["/ok", "/missing", "/broken"])
            .page("/ok", &[])
            .failing_page("/broken", FetchError::Status { code: 503 }),
    );
    let engine = engine(&site);

    let config = CrawlConfig {
        fetch_retries: 1,
        ..test_config(&dir)
    };
    let id = engine.start_session(ROOT, config).await.unwrap();
    let report = engine.wait(&id).await.unwrap();

    assert_eq!(report.progress.pages_crawled, 2);
    assert_eq!(report.progress.pages_failed, 2);
    assert_eq!(report.progress.errors.len(), 2);

    let graph = engine.export_site_graph(&id).await.unwrap();
    let missing = graph.nodes.iter().find(|n| n.url == url("/missing")).unwrap();
    assert_eq!(missing.crawl_status, CrawlStatus::Failed);
    assert_eq!(missing.status_code, Some(404));

    // 404 is fetched once, 503 once plus one retry
    let fetched = site.fetched();
    assert_eq!(fetched.iter().filter(|u| **u == url("/missing")).count(), 1);
    assert_eq!(fetched.iter().filter(|u| **u == url("/broken")).count(), 2);

    let errors = engine.storage().list_errors(&id, 10).unwrap();
    assert_eq!(errors.len(), 2);
}

#[tokio::test]
async fn test_depth_is_minimum_over_parents() {
    let dir = TempDir::new().unwrap();
    let site = Arc::new(
        MockSite::new()
            .page("/", &["/a", "/b"])
            .page("/a", &["/deep"])
            .page("/b", &["/c"])
            .page("/c", &["/deep"])
            .page("/deep", &[]),
    );
    let engine = engine(&site);

    let id = engine.start_session(ROOT, test_config(&dir)).await.unwrap();
    engine.wait(&id).await.unwrap();

    let graph = engine.export_site_graph(&id).await.unwrap();
    let depths = depths(&graph);
    assert_eq!(depths[&url("/deep")], 2);
    assert_eq!(
        graph.nodes.iter().filter(|n| n.url == url("/deep")).count(),
        1
    );
    assert_eq!(
        graph.edges.iter().filter(|e| e.to_url == url("/deep")).count(),
        2
    );
}

#[tokio::test]
async fn test_out_of_scope_and_tracking_links() {
    let dir = TempDir::new().unwrap();
    let site = Arc::new(
        MockSite::new()
            .page(
                "/",
                &[
                    "https://other.example/page",
                    "https://docs.site.test/guide",
                    "/news?utm_source=x&id=3#top",
                    "mailto:someone@site.test",
                ],
            )
            .page("/news?id=3", &[]),
    );
    let engine = engine(&site);

    let id = engine.start_session(ROOT, test_config(&dir)).await.unwrap();
    engine.wait(&id).await.unwrap();

    let graph = engine.export_site_graph(&id).await.unwrap();
    let urls: Vec<&str> = graph.nodes.iter().map(|n| n.url.as_str()).collect();
    assert!(urls.contains(&"https://site.test/news?id=3"));
    assert!(urls.contains(&"https://docs.site.test/guide"));
    assert!(!urls.iter().any(|u| u.contains("other.example")));
    assert_eq!(urls.len(), 3);
}

#[tokio::test]
async fn test_max_pages_limits_fetches() {
    let dir = TempDir::new().unwrap();
    let site = Arc::new(
        MockSite::new()
            .page("/", &["/1", "/2", "/3", "/4", "/5", "/6"])
            .page("/1", &[])
            .page("/2", &[])
            .page("/3", &[])
            .page("/4", &[])
            .page("/5", &[])
            .page("/6", &[]),
    );
    let engine = engine(&site);

    let config = CrawlConfig {
        max_pages: 4,
        ..test_config(&dir)
    };
    let id = engine.start_session(ROOT, config).await.unwrap();
    let report = engine.wait(&id).await.unwrap();

    assert_eq!(report.halt_reason, Some(HaltReason::MaxPages));
    assert_eq!(report.status, SessionStatus::Completed);
    assert_eq!(report.progress.pages_crawled, 4);
    assert_eq!(site.fetched().len(), 4);
}

#[tokio::test]
async fn test_max_depth_reached() {
    let dir = TempDir::new().unwrap();
    let site = Arc::new(
        MockSite::new()
            .page("/", &["/a"])
            .page("/a", &["/b"])
            .page("/b", &["/c"]),
    );
    let engine = engine(&site);

    let config = CrawlConfig {
        max_depth: 1,
        ..test_config(&dir)
    };
    let id = engine.start_session(ROOT, config).await.unwrap();
    let report = engine.wait(&id).await.unwrap();

    assert_eq!(report.halt_reason, Some(HaltReason::MaxDepthReached));
    assert_eq!(report.progress.pages_crawled, 2);

    let graph = engine.export_site_graph(&id).await.unwrap();
    let b = graph.nodes.iter().find(|n| n.url == url("/b")).unwrap();
    assert_eq!(b.depth, 2);
    assert_eq!(b.crawl_status, CrawlStatus::Pending);
}

#[tokio::test]
async fn test_invalid_config_is_rejected_before_crawling() {
    let dir = TempDir::new().unwrap();
    let site = Arc::new(MockSite::new().page("/", &[]));
    let engine = engine(&site);

    let config = CrawlConfig {
        revisit_ratio_threshold: 1.5,
        ..test_config(&dir)
    };
    let result = engine.start_session(ROOT, config).await;
    assert!(matches!(result, Err(TrawlerError::Config(_))));

    let result = engine.start_session("ftp://site.test/", test_config(&dir)).await;
    assert!(matches!(result, Err(TrawlerError::Url(_))));

    assert!(engine.list_sessions().await.unwrap().is_empty());
    assert!(site.fetched().is_empty());
}

#[tokio::test]
async fn test_unknown_session() {
    let site = Arc::new(MockSite::new());
    let engine = engine(&site);
    assert!(matches!(
        engine.get_status("nope").await,
        Err(TrawlerError::SessionNotFound(_))
    ));
    assert!(matches!(
        engine.stop_session("nope").await,
        Err(TrawlerError::SessionNotFound(_))
    ));
}

fn slow_hub(pages: usize) -> MockSite {
    let leaves: Vec<String> = (0..pages).map(|i| format!("/p{}", i)).collect();
    let refs: Vec<&str> = leaves.iter().map(String::as_str).collect();
    let mut site = MockSite::new()
        .page("/", &refs)
        .with_delay(Duration::from_millis(30));
    for leaf in &leaves {
        site = site.page(leaf, &["/"]);
    }
    site
}

#[tokio::test]
async fn test_stop_leaves_no_half_written_nodes() {
    let dir = TempDir::new().unwrap();
    let site = Arc::new(slow_hub(200));
    let engine = engine(&site);

    let config = CrawlConfig {
        max_concurrent_fetches: 2,
        revisit_ratio_threshold: 1.0,
        ..test_config(&dir)
    };
    let id = engine.start_session(ROOT, config).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    engine.stop_session(&id).await.unwrap();
    let report = engine.wait(&id).await.unwrap();

    assert_eq!(report.status, SessionStatus::Stopped);
    assert_eq!(report.halt_reason, Some(HaltReason::StopSignal));

    // Every page with outbound edges was fully recorded
    let graph = engine.export_site_graph(&id).await.unwrap();
    let status: HashMap<&str, CrawlStatus> = graph
        .nodes
        .iter()
        .map(|n| (n.url.as_str(), n.crawl_status))
        .collect();
    for edge in &graph.edges {
        assert!(status.contains_key(edge.to_url.as_str()));
        assert_ne!(status[edge.from_url.as_str()], CrawlStatus::Pending);
    }
    assert!(report.progress.pages_crawled < 201);

    assert!(matches!(
        engine.stop_session(&id).await,
        Err(TrawlerError::InvalidSessionState { .. })
    ));
}

#[tokio::test]
async fn test_pause_and_resume() {
    let dir = TempDir::new().unwrap();
    let site = Arc::new(slow_hub(20));
    let engine = engine(&site);

    let config = CrawlConfig {
        max_concurrent_fetches: 2,
        revisit_ratio_threshold: 1.0,
        ..test_config(&dir)
    };
    let id = engine.start_session(ROOT, config).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    engine.pause_session(&id).await.unwrap();
    let paused = engine.get_status(&id).await.unwrap();
    assert_eq!(paused.status, SessionStatus::Paused);
    assert!(matches!(
        engine.pause_session(&id).await,
        Err(TrawlerError::InvalidSessionState { .. })
    ));

    // Let any in-flight batch land, then check nothing new is dispatched
    tokio::time::sleep(Duration::from_millis(100)).await;
    let before = site.fetched().len();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(site.fetched().len(), before);

    engine.resume_session(&id).await.unwrap();
    let report = engine.wait(&id).await.unwrap();
    assert_eq!(report.status, SessionStatus::Completed);
    assert_eq!(report.halt_reason, Some(HaltReason::FrontierExhausted));
    assert_eq!(report.progress.pages_crawled, 21);
}

#[tokio::test]
async fn test_resume_rebuilds_persisted_session() {
    let dir = TempDir::new().unwrap();
    let storage = memory_storage();
    let config = test_config(&dir);

    // A session paused by an earlier process: root crawled, two pages pending
    let timestamp = chrono::Utc::now().to_rfc3339();
    storage
        .create_session(&SessionRecord {
            id: "earlier".to_string(),
            start_url: ROOT.to_string(),
            config_json: serde_json::to_string(&config).unwrap(),
            config_hash: hash_crawl_config(&config),
            status: SessionStatus::Paused,
            halt_reason: None,
            started_at: timestamp.clone(),
            updated_at: timestamp,
            finished_at: None,
            snapshot_json: Some(r#"{"pages_discovered":3,"pages_crawled":1}"#.to_string()),
        })
        .unwrap();
    storage.upsert_node_and_edges("earlier", ROOT, None, &[]).unwrap();
    storage
        .upsert_node_and_edges("earlier", ROOT, None, &[Link::new(url("/a")), Link::new(url("/b"))])
        .unwrap();
    storage
        .mark_fetched("earlier", ROOT, Some(200), None, CrawlStatus::Crawled)
        .unwrap();

    let site = Arc::new(MockSite::new().page("/a", &["/c"]).page("/b", &[]).page("/c", &[]));
    let fetcher: Arc<dyn FetchService> = site.clone();
    let engine = CrawlEngine::new(storage, fetcher);

    engine.resume_session("earlier").await.unwrap();
    let report = engine.wait("earlier").await.unwrap();

    assert_eq!(report.status, SessionStatus::Completed);
    assert_eq!(report.progress.pages_crawled, 4);
    assert_eq!(report.progress.pages_discovered, 4);
    assert!(!site.fetched().contains(&ROOT.to_string()));

    let graph = engine.export_site_graph("earlier").await.unwrap();
    assert_eq!(depths(&graph)[&url("/c")], 2);
}

#[tokio::test]
async fn test_sessions_are_independent() {
    let dir = TempDir::new().unwrap();
    let site = Arc::new(MockSite::new().page("/", &["/a"]).page("/a", &[]));
    let engine = engine(&site);

    let first = engine.start_session(ROOT, test_config(&dir)).await.unwrap();
    let second = engine.start_session(ROOT, test_config(&dir)).await.unwrap();
    assert_ne!(first, second);

    let a = engine.wait(&first).await.unwrap();
    let b = engine.wait(&second).await.unwrap();
    assert_eq!(a.progress.pages_crawled, 2);
    assert_eq!(b.progress.pages_crawled, 2);
    assert_eq!(engine.export_site_graph(&first).await.unwrap().nodes.len(), 2);
    assert_eq!(engine.list_sessions().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_stop_cancels_download_in_flight() {
    let dir = TempDir::new().unwrap();
    let site = Arc::new(
        MockSite::new()
            .page("/", &["/big.pdf"])
            .file("/big.pdf", b"a very large report")
            .with_file_delay(Duration::from_secs(5)),
    );
    let engine = engine(&site);

    let id = engine.start_session(ROOT, test_config(&dir)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(site.file_attempts("/big.pdf"), 1);

    engine.stop_session(&id).await.unwrap();
    let report = engine.wait(&id).await.unwrap();
    assert_eq!(report.status, SessionStatus::Stopped);
    assert_eq!(report.halt_reason, Some(HaltReason::StopSignal));

    let documents = engine.list_documents(&id).await.unwrap();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].download_status, DownloadStatus::Failed);
    assert_eq!(documents[0].failure_reason.as_deref(), Some("cancelled"));
    assert!(documents[0].local_path.is_none());

    // Neither the file nor a partial write was left behind
    let session_dir = dir.path().join("downloads").join(&id);
    if session_dir.exists() {
        assert_eq!(std::fs::read_dir(&session_dir).unwrap().count(), 0);
    }
}

#[tokio::test]
async fn test_graph_write_failure_fails_session() {
    let dir = TempDir::new().unwrap();
    let site = Arc::new(
        MockSite::new()
            .page("/", &["/b", "/c"])
            .page("/b", &[])
            .page("/c", &[]),
    );
    let fetcher: Arc<dyn FetchService> = site.clone();
    let storage = BrokenStorage::new(BrokenWrite::MarkFetched(url("/b")));
    let engine = CrawlEngine::new(Arc::new(storage), fetcher);

    let id = engine.start_session(ROOT, test_config(&dir)).await.unwrap();
    let report = engine.wait(&id).await.unwrap();

    assert_eq!(report.status, SessionStatus::Failed);
    assert_eq!(report.halt_reason, Some(HaltReason::StorageFailure));

    let status = engine.get_status(&id).await.unwrap();
    assert_eq!(status.status, SessionStatus::Failed);
    assert_eq!(status.halt_reason, Some(HaltReason::StorageFailure));

    let graph = engine.export_site_graph(&id).await.unwrap();
    let b = graph.nodes.iter().find(|n| n.url == url("/b")).unwrap();
    assert_eq!(b.crawl_status, CrawlStatus::Pending);
}

#[tokio::test]
async fn test_download_write_failure_fails_session() {
    let dir = TempDir::new().unwrap();
    let site = Arc::new(
        MockSite::new()
            .page("/", &["/minutes.pdf"])
            .file("/minutes.pdf", b"minutes of the meeting"),
    );
    let fetcher: Arc<dyn FetchService> = site.clone();
    let engine = CrawlEngine::new(
        Arc::new(BrokenStorage::new(BrokenWrite::CompleteFile)),
        fetcher,
    );

    let id = engine.start_session(ROOT, test_config(&dir)).await.unwrap();
    let report = engine.wait(&id).await.unwrap();

    assert_eq!(report.status, SessionStatus::Failed);
    assert_eq!(report.halt_reason, Some(HaltReason::StorageFailure));
    assert_eq!(report.progress.documents_downloaded, 0);

    let documents = engine.list_documents(&id).await.unwrap();
    assert_eq!(documents[0].download_status, DownloadStatus::Failed);
}

#[tokio::test]
async fn test_finished_sessions_leave_the_engine() {
    let dir = TempDir::new().unwrap();
    let site = Arc::new(slow_hub(3));
    let engine = engine(&site);

    let id = engine.start_session(ROOT, test_config(&dir)).await.unwrap();
    assert_eq!(engine.active_sessions().await, vec![id.clone()]);

    let report = engine.wait(&id).await.unwrap();
    assert!(engine.active_sessions().await.is_empty());
    assert_eq!(report.progress.pages_crawled, 4);

    // Finished sessions still answer from the archive
    let status = engine.get_status(&id).await.unwrap();
    assert_eq!(status.status, SessionStatus::Completed);
    assert_eq!(status.progress, report.progress);
    assert!(matches!(
        engine.pause_session(&id).await,
        Err(TrawlerError::InvalidSessionState { .. })
    ));
}
