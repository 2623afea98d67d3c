//! Integration tests for the HTTP fetch service
//!
//! These tests use wiremock to serve pages and documents over real HTTP.

use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use trawler::crawler::{CrawlEngine, FetchError, FetchService, HttpFetcher};
use trawler::download::sha256_hex;
use trawler::state::{DownloadStatus, HaltReason, SessionStatus};
use trawler::storage::SqliteStorage;
use trawler::CrawlConfig;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn fetcher() -> HttpFetcher {
    HttpFetcher::new(Duration::from_secs(5)).unwrap()
}

async fn html(server: &MockServer, route: &str, body: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body.to_string(), "text/html"))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_fetch_extracts_links() {
    let server = MockServer::start().await;
    html(
        &server,
        "/",
        r#"<html><body>
            <a href="/about">About   us</a>
            <a href="report.pdf">Report</a>
            <a href="mailto:info@example.com">Mail</a>
            <a href="javascript:void(0)">Nothing</a>
        </body></html>"#,
    )
    .await;

    let page = fetcher()
        .fetch(&format!("{}/", server.uri()))
        .await
        .unwrap();

    assert_eq!(page.status_code, 200);
    assert_eq!(page.links.len(), 2);
    assert_eq!(page.links[0].href, "/about");
    assert_eq!(page.links[0].anchor_text, "About us");
    assert_eq!(page.links[1].href, "report.pdf");
}

#[tokio::test]
async fn test_fetch_reports_http_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let fetcher = fetcher();
    let missing = fetcher.fetch(&format!("{}/missing", server.uri())).await;
    assert_eq!(missing.unwrap_err(), FetchError::Status { code: 404 });

    let busy = fetcher
        .fetch_bytes(&format!("{}/busy", server.uri()))
        .await
        .unwrap_err();
    assert!(busy.is_transient());
}

#[tokio::test]
async fn test_non_html_page_has_no_links() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/export"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(b"%PDF-1.7 <a href=\"/x\">".to_vec(), "application/pdf"),
        )
        .mount(&server)
        .await;

    let page = fetcher()
        .fetch(&format!("{}/export", server.uri()))
        .await
        .unwrap();

    assert_eq!(page.content_type.as_deref(), Some("application/pdf"));
    assert!(page.links.is_empty());
    assert!(page.body.is_empty());
}

#[tokio::test]
async fn test_fetch_bytes_headers() {
    let server = MockServer::start().await;
    let body = b"col_a,col_b\n1,2\n".to_vec();
    Mock::given(method("GET"))
        .and(path("/data.csv"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(body.clone(), "text/csv")
                .insert_header("ETag", "\"v1\""),
        )
        .mount(&server)
        .await;

    let file = fetcher()
        .fetch_bytes(&format!("{}/data.csv", server.uri()))
        .await
        .unwrap();

    assert_eq!(file.bytes, body);
    assert_eq!(file.content_length, Some(body.len() as u64));
    assert_eq!(file.etag.as_deref(), Some("\"v1\""));
    assert_eq!(file.content_type.as_deref(), Some("text/csv"));
}

#[tokio::test]
async fn test_crawl_over_http() {
    let server = MockServer::start().await;
    let dir = TempDir::new().unwrap();
    let pdf = b"%PDF-1.4 minutes of the meeting".to_vec();

    html(
        &server,
        "/",
        r#"<html><body>
            <a href="/about">About</a>
            <a href="/files/minutes.pdf">Minutes</a>
        </body></html>"#,
    )
    .await;
    html(
        &server,
        "/about",
        r#"<html><body><a href="/">Home</a><a href="/team">Team</a></body></html>"#,
    )
    .await;
    html(&server, "/team", "<html><body>No links here</body></html>").await;
    Mock::given(method("GET"))
        .and(path("/files/minutes.pdf"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(pdf.clone(), "application/pdf"))
        .expect(1)
        .mount(&server)
        .await;

    let storage = Arc::new(SqliteStorage::new_in_memory().unwrap());
    let engine = CrawlEngine::new(storage, Arc::new(fetcher()));
    let config = CrawlConfig {
        download_directory: dir.path().join("downloads"),
        ..CrawlConfig::default()
    };

    let root = format!("{}/", server.uri());
    let id = engine.start_session(&root, config).await.unwrap();
    let report = engine.wait(&id).await.unwrap();

    assert_eq!(report.status, SessionStatus::Completed);
    assert_eq!(report.halt_reason, Some(HaltReason::FrontierExhausted));
    assert_eq!(report.progress.pages_crawled, 3);
    assert_eq!(report.progress.documents_downloaded, 1);

    let graph = engine.export_site_graph(&id).await.unwrap();
    assert_eq!(graph.nodes.len(), 3);
    assert!(graph
        .edges
        .iter()
        .any(|e| e.to_url.ends_with("/about") && e.anchor_text.as_deref() == Some("About")));

    let documents = engine.list_documents(&id).await.unwrap();
    assert_eq!(documents.len(), 1);
    assert_eq!(documents[0].download_status, DownloadStatus::Completed);
    assert_eq!(documents[0].checksum.as_deref(), Some(sha256_hex(&pdf).as_str()));
    assert_eq!(documents[0].filename.as_deref(), Some("minutes.pdf"));

    let stored = std::fs::read(documents[0].local_path.as_ref().unwrap()).unwrap();
    assert_eq!(stored, pdf);
}
