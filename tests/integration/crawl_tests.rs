//! Integration tests for the crawler
//!
//! These tests use wiremock to create mock HTTP servers and run the full
//! crawl cycle end-to-end against a SQLite database in a temp directory.

use dredge::config::{parse_config, Config};
use dredge::crawler::{AbortReason, Coordinator, DriverState, RunOptions};
use dredge::frontier::{Frontier, FrontierEntry};
use dredge::output::{export_collection, ExportFormat};
use dredge::state::EntryState;
use dredge::storage::{FrontierStore, RunLog, RunStatus, Sink};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

const CRAWLER: &str = r#"
[crawler]
default-delay-ms = 0
backoff-ms = 10
max-backoff-ms = 100
request-timeout-secs = 5
"#;

const IDENTITY: &str = r#"
[user-agent]
crawler-name = "Dredge"
crawler-version = "0.1"
contact-url = "https://example.com/bot"
contact-email = "bot@example.com"
"#;

/// Builds a validated config from a crawler section and site sections
fn create_test_config(crawler: &str, sites: &str, db_path: &Path) -> Config {
    let text = format!(
        "{}\n{}\n[output]\ndatabase-path = \"{}\"\n\n{}",
        crawler,
        IDENTITY,
        db_path.display(),
        sites
    );
    parse_config(&text).expect("test config should be valid")
}

fn books_site(base: &str, seeds: &[&str]) -> String {
    let seeds: Vec<String> = seeds
        .iter()
        .map(|route| format!("\"{}{}\"", base, route))
        .collect();
    format!(
        r#"
[[site]]
name = "books"
domain = "127.0.0.1"
seeds = [{}]
export-fields = ["title", "price"]
[site.extractor]
kind = "selector"
item = "article.product_pod"
key = "url"
follow = ["li.next a"]
[site.extractor.fields]
url = {{ selector = "h3 a", attr = "href" }}
title = {{ selector = "h3 a", attr = "title" }}
price = {{ selector = ".price_color", value = "number" }}
"#,
        seeds.join(", ")
    )
}

fn links_site(base: &str, seeds: &[&str]) -> String {
    let seeds: Vec<String> = seeds
        .iter()
        .map(|route| format!("\"{}{}\"", base, route))
        .collect();
    format!(
        r#"
[[site]]
name = "pages"
domain = "127.0.0.1"
seeds = [{}]
[site.extractor]
kind = "links"
"#,
        seeds.join(", ")
    )
}

/// A catalogue page; items without a price are malformed
fn listing(items: &[(&str, &str, Option<&str>)], next: Option<&str>) -> String {
    let articles: String = items
        .iter()
        .map(|(slug, title, price)| {
            let price = price
                .map(|p| format!("<p class=\"price_color\">£{}</p>", p))
                .unwrap_or_default();
            format!(
                "<article class=\"product_pod\"><h3><a href=\"{}/index.html\" title=\"{}\">{}</a></h3>{}</article>",
                slug, title, title, price
            )
        })
        .collect();
    let pager = next
        .map(|href| format!("<ul class=\"pager\"><li class=\"next\"><a href=\"{}\">next</a></li></ul>", href))
        .unwrap_or_default();
    format!("<html><body><ol>{}</ol>{}</body></html>", articles, pager)
}

fn stored_entry(store_entries: &[FrontierEntry], url: &str) -> FrontierEntry {
    let key = Frontier::key_for(url).unwrap();
    store_entries
        .iter()
        .find(|entry| entry.url == key)
        .cloned()
        .unwrap_or_else(|| panic!("{} not in stored frontier", key))
}

/// Answers 429 once, then 200 with the given body
struct RateLimitedOnce {
    calls: AtomicUsize,
    body: String,
}

impl Respond for RateLimitedOnce {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
            ResponseTemplate::new(429).insert_header("Retry-After", "0")
        } else {
            ResponseTemplate::new(200).set_body_string(self.body.clone())
        }
    }
}

#[tokio::test]
async fn test_rate_limited_then_ok_is_done_and_persisted() {
    let server = MockServer::start().await;
    let base = server.uri();
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/catalogue/page-1.html"))
        .respond_with(RateLimitedOnce {
            calls: AtomicUsize::new(0),
            body: listing(&[("a", "Book A", Some("51.77"))], None),
        })
        .expect(2)
        .mount(&server)
        .await;

    let config = create_test_config(
        CRAWLER,
        &books_site(&base, &["/catalogue/page-1.html"]),
        &dir.path().join("crawl.db"),
    );
    let coordinator =
        Coordinator::new(config, "hash".to_string(), RunOptions::default()).unwrap();

    let report = coordinator.run().await.unwrap();
    assert_eq!(report.state, DriverState::Completed);
    assert_eq!(report.metadata.retries, 1);
    assert_eq!(report.metadata.records_written, 1);

    let store = coordinator.store();
    let entries = store.load_frontier().unwrap();
    let entry = stored_entry(&entries, &format!("{}/catalogue/page-1.html", base));
    assert_eq!(entry.state, EntryState::Done);
    assert_eq!(entry.attempts, 2);

    assert!(store
        .exists("books", &format!("{}/catalogue/a/index.html", base))
        .unwrap());
}

#[tokio::test]
async fn test_not_found_fails_without_retry() {
    let server = MockServer::start().await;
    let base = server.uri();
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/catalogue/missing.html"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let config = create_test_config(
        CRAWLER,
        &books_site(&base, &["/catalogue/missing.html"]),
        &dir.path().join("crawl.db"),
    );
    let coordinator =
        Coordinator::new(config, "hash".to_string(), RunOptions::default()).unwrap();

    let report = coordinator.run().await.unwrap();
    assert_eq!(report.state, DriverState::Completed);
    assert_eq!(report.frontier.failed, 1);
    assert_eq!(report.metadata.retries, 0);

    let entries = coordinator.store().load_frontier().unwrap();
    let entry = stored_entry(&entries, &format!("{}/catalogue/missing.html", base));
    assert_eq!(entry.state, EntryState::Failed);
    assert_eq!(entry.attempts, 1);
    assert!(entry.last_error.unwrap().contains("404"));
}

#[tokio::test]
async fn test_page_budget_aborts_then_resume_finishes() {
    let server = MockServer::start().await;
    let base = server.uri();
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("crawl.db");

    // every page is fetched exactly once across both runs
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><title>t</title></html>"))
        .expect(10)
        .mount(&server)
        .await;

    let routes: Vec<String> = (0..10).map(|i| format!("/page-{}.html", i)).collect();
    let seeds: Vec<&str> = routes.iter().map(String::as_str).collect();
    let sites = links_site(&base, &seeds);

    let budgeted = format!("{}max-pages = 5\n", CRAWLER);
    let config = create_test_config(&budgeted, &sites, &db_path);
    let coordinator =
        Coordinator::new(config, "first".to_string(), RunOptions::default()).unwrap();

    let report = coordinator.run().await.unwrap();
    assert_eq!(report.state, DriverState::Aborted(AbortReason::PageBudget));
    assert_eq!(report.frontier.done, 5);
    assert_eq!(report.frontier.pending, 5);

    let run = coordinator.store().latest_run().unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Aborted);
    assert_eq!(run.pages_fetched, 5);
    coordinator.close().unwrap();

    let config = create_test_config(CRAWLER, &sites, &db_path);
    let coordinator =
        Coordinator::new(config, "second".to_string(), RunOptions::default()).unwrap();

    let report = coordinator.run().await.unwrap();
    assert_eq!(report.state, DriverState::Completed);
    assert_eq!(report.metadata.pages_fetched, 5);
    assert_eq!(report.frontier.done, 10);
    assert_eq!(coordinator.store().count(Some("pages")).unwrap(), 10);
    assert_eq!(coordinator.store().list_runs(10).unwrap().len(), 2);
}

#[tokio::test]
async fn test_paginated_catalogue_and_export() {
    let server = MockServer::start().await;
    let base = server.uri();
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("crawl.db");

    Mock::given(method("GET"))
        .and(path("/catalogue/page-1.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing(
            &[
                ("a", "Book A", Some("51.77")),
                ("b", "Book B, Vol. 2", Some("53.74")),
                ("c", "Book C", None),
            ],
            Some("page-2.html"),
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/catalogue/page-2.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string(listing(
            &[("d", "Book D", Some("20.5")), ("e", "Book E", Some("13.99"))],
            None,
        )))
        .mount(&server)
        .await;

    let sites = books_site(&base, &["/catalogue/page-1.html"]);
    let config = create_test_config(CRAWLER, &sites, &db_path);
    let coordinator =
        Coordinator::new(config.clone(), "hash".to_string(), RunOptions::default()).unwrap();

    let report = coordinator.run().await.unwrap();
    assert_eq!(report.state, DriverState::Completed);
    assert_eq!(report.frontier.done, 2);
    assert_eq!(report.metadata.records_written, 4);
    assert_eq!(report.metadata.records_skipped, 1);

    let site = config.site("books").unwrap();
    let mut out = Vec::new();
    let written = export_collection(
        coordinator.store().as_ref(),
        "books",
        &site.export_fields,
        ExportFormat::Csv,
        &mut out,
    )
    .unwrap();
    assert_eq!(written, 4);

    let csv = String::from_utf8(out).unwrap();
    let expected = format!(
        "key,title,price\n\
         {base}/catalogue/a/index.html,Book A,51.77\n\
         {base}/catalogue/b/index.html,\"Book B, Vol. 2\",53.74\n\
         {base}/catalogue/d/index.html,Book D,20.5\n\
         {base}/catalogue/e/index.html,Book E,13.99\n",
        base = base
    );
    assert_eq!(csv, expected);
    drop(coordinator);

    // a fresh re-crawl of unchanged pages writes nothing new
    let coordinator = Coordinator::new(
        config,
        "hash".to_string(),
        RunOptions {
            fresh: true,
            retry_failed: false,
        },
    )
    .unwrap();
    let report = coordinator.run().await.unwrap();

    assert_eq!(report.metadata.records_written, 0);
    assert_eq!(report.metadata.records_unchanged, 4);
    assert_eq!(coordinator.store().count(Some("books")).unwrap(), 4);
}

#[tokio::test]
async fn test_json_api_follows_next_pointer() {
    let server = MockServer::start().await;
    let base = server.uri();
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/api/items"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "results": [
                {"id": "sku-1", "name": "Kettle", "price": 24.5},
                {"id": "sku-2", "name": "Toaster", "price": 31}
            ],
            "next": "/api/items?page=2"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/items"))
        .and(query_param("page", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "results": [{"id": "sku-3", "name": "Blender"}],
            "next": null
        })))
        .expect(1)
        .mount(&server)
        .await;

    let sites = format!(
        r#"
[[site]]
name = "shop"
domain = "127.0.0.1"
seeds = ["{}/api/items?page=1"]
[site.extractor]
kind = "json"
items = "/results"
key = "id"
next = ["/next"]
[site.extractor.fields]
id = {{ pointer = "/id" }}
name = {{ pointer = "/name" }}
price = {{ pointer = "/price", required = false }}
"#,
        base
    );
    let config = create_test_config(CRAWLER, &sites, &dir.path().join("crawl.db"));
    let coordinator =
        Coordinator::new(config, "hash".to_string(), RunOptions::default()).unwrap();

    let report = coordinator.run().await.unwrap();
    assert_eq!(report.state, DriverState::Completed);

    let store = coordinator.store();
    assert_eq!(store.count(Some("shop")).unwrap(), 3);
    let blender = store.get("shop", "sku-3").unwrap().unwrap();
    assert_eq!(blender.record.get("name"), Some(&serde_json::json!("Blender")));
    assert_eq!(blender.record.get("price"), None);
}

#[tokio::test]
async fn test_robots_txt_respect() {
    let server = MockServer::start().await;
    let base = server.uri();
    let dir = TempDir::new().unwrap();

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private\n"),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/private/report.html"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/open.html"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<title>Open</title>"))
        .expect(1)
        .mount(&server)
        .await;

    let crawler = format!("{}respect-robots = true\n", CRAWLER);
    let sites = links_site(&base, &["/private/report.html", "/open.html"]);
    let config = create_test_config(&crawler, &sites, &dir.path().join("crawl.db"));
    let coordinator =
        Coordinator::new(config, "hash".to_string(), RunOptions::default()).unwrap();

    let report = coordinator.run().await.unwrap();
    assert_eq!(report.frontier.done, 1);
    assert_eq!(report.frontier.failed, 1);

    let entries = coordinator.store().load_frontier().unwrap();
    let denied = stored_entry(&entries, &format!("{}/private/report.html", base));
    assert_eq!(denied.state, EntryState::Failed);
    assert!(denied.last_error.unwrap().contains("robots.txt"));
}
