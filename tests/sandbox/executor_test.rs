//! Execution invariants: per-source ordering, partial failure, timeout.

use std::time::{Duration, Instant};

use straylight::config::ScrapingConfig;
use straylight::sandbox::SandboxExecutor;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ROWS_PLAN: &str = r#"{"scrape_data": {
    "record_selector": "tr.row",
    "fields": {
        "symbol": {"selector": "td.sym"},
        "price": {"selector": "td.price", "pattern": "([0-9,.]+)"}
    }
}}"#;

fn page(rows: &[(&str, &str)]) -> String {
    let mut body = String::from("<html><body><table>");
    for (symbol, price) in rows {
        body.push_str(&format!(
            "<tr class=\"row\"><td class=\"sym\">{symbol}</td><td class=\"price\">${price}</td></tr>"
        ));
    }
    body.push_str("</table></body></html>");
    body
}

fn executor() -> SandboxExecutor {
    let config = ScrapingConfig {
        request_timeout_seconds: 5,
        ..ScrapingConfig::default()
    };
    SandboxExecutor::new(&config).expect("executor builds")
}

#[tokio::test]
async fn happy_path_aggregates_records_with_consistent_counts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/crypto"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string(page(&[("BTC", "45,000"), ("ETH", "3,200")])),
        )
        .mount(&server)
        .await;

    let urls = vec![format!("{}/crypto", server.uri())];
    let result = executor()
        .execute_text(ROWS_PLAN, &urls, Duration::from_secs(10))
        .await;

    assert!(result.ok);
    assert_eq!(result.records.len(), 2);
    assert_eq!(result.meta.total_count, 2);
    assert_eq!(result.records[0]["symbol"], "BTC");
    assert_eq!(result.records[0]["price"], "45,000");
    assert_eq!(result.per_source.len(), 1);
    assert!(result.per_source[0].ok);
    assert_eq!(result.per_source[0].record_count, 2);
    assert!(result.scraped_at.is_some());
    assert!(result.errors.is_empty());
}

#[tokio::test]
async fn per_source_matches_input_order_and_isolates_failures() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page(&[("AAA", "1")])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/c"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page(&[("CCC", "3")])))
        .mount(&server)
        .await;

    let urls = vec![
        format!("{}/a", server.uri()),
        format!("{}/b", server.uri()),
        format!("{}/c", server.uri()),
    ];
    let result = executor()
        .execute_text(ROWS_PLAN, &urls, Duration::from_secs(10))
        .await;

    // One failing middle source: the others still contribute, order holds.
    assert!(result.ok);
    assert_eq!(result.per_source.len(), 3);
    assert_eq!(result.per_source[0].url, urls[0]);
    assert_eq!(result.per_source[1].url, urls[1]);
    assert_eq!(result.per_source[2].url, urls[2]);
    assert!(result.per_source[0].ok);
    assert!(!result.per_source[1].ok);
    assert!(result.per_source[2].ok);
    assert_eq!(result.meta.total_count, 2);
    assert_eq!(result.records[0]["symbol"], "AAA");
    assert_eq!(result.records[1]["symbol"], "CCC");
    assert!(result
        .errors
        .iter()
        .any(|e| e.contains("/b") && e.contains("status 500")));
}

#[tokio::test]
async fn timeout_returns_promptly_with_partial_outcomes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/fast"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page(&[("FST", "1")])))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(page(&[("SLW", "2")]))
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let urls = vec![
        format!("{}/fast", server.uri()),
        format!("{}/slow", server.uri()),
    ];
    let started = Instant::now();
    let result = executor()
        .execute_text(ROWS_PLAN, &urls, Duration::from_secs(1))
        .await;
    let elapsed = started.elapsed();

    assert!(elapsed < Duration::from_millis(1500), "took {elapsed:?}");
    assert!(result.errors.iter().any(|e| e == "execution-timeout: 1s"));
    assert_eq!(result.per_source.len(), 2);
    // The fast source finished before the deadline and is preserved.
    assert!(result.per_source[0].ok);
    assert_eq!(result.per_source[0].record_count, 1);
    // The slow source is marked as timed out.
    assert!(!result.per_source[1].ok);
    assert_eq!(result.per_source[1].error.as_deref(), Some("timeout"));
}

#[tokio::test]
async fn all_sources_slow_yields_timeout_with_no_records() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(page(&[("SLW", "2")]))
                .set_delay(Duration::from_secs(10)),
        )
        .mount(&server)
        .await;

    let urls = vec![format!("{}/slow", server.uri())];
    let result = executor()
        .execute_text(ROWS_PLAN, &urls, Duration::from_secs(1))
        .await;

    assert!(!result.ok);
    assert!(result.records.is_empty());
    assert!(result.per_source.iter().all(|s| !s.ok));
}

#[tokio::test]
async fn duplicates_across_sources_are_counted_not_kept() {
    let server = MockServer::start().await;
    let body = page(&[("BTC", "45,000"), ("ETH", "3,200")]);
    for route in ["/one", "/two"] {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_string(body.clone()))
            .mount(&server)
            .await;
    }

    let plan = r#"{"scrape_data": {
        "record_selector": "tr.row",
        "fields": {
            "symbol": {"selector": "td.sym"},
            "price": {"selector": "td.price", "pattern": "([0-9,.]+)"}
        },
        "dedupe_on": ["symbol"]
    }}"#;
    let urls = vec![
        format!("{}/one", server.uri()),
        format!("{}/two", server.uri()),
    ];
    let result = executor()
        .execute_text(plan, &urls, Duration::from_secs(10))
        .await;

    assert_eq!(result.meta.total_count, 2);
    assert_eq!(result.meta.duplicate_count, 2);
    assert_eq!(result.per_source[0].duplicate_count, 0);
    assert_eq!(result.per_source[1].duplicate_count, 2);
}

#[tokio::test]
async fn pagination_follows_next_links_within_budget() {
    let server = MockServer::start().await;
    let first = format!(
        "{}<a class=\"next\" href=\"/page2\">next</a>",
        page(&[("ONE", "1")])
    );
    Mock::given(method("GET"))
        .and(path("/page1"))
        .respond_with(ResponseTemplate::new(200).set_body_string(first))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/page2"))
        .respond_with(ResponseTemplate::new(200).set_body_string(page(&[("TWO", "2")])))
        .mount(&server)
        .await;

    let plan = r#"{"scrape_data": {
        "record_selector": "tr.row",
        "fields": {"symbol": {"selector": "td.sym"}},
        "follow_next": {"selector": "a.next", "max_pages": 1}
    }}"#;
    let urls = vec![format!("{}/page1", server.uri())];
    let result = executor()
        .execute_text(plan, &urls, Duration::from_secs(10))
        .await;

    assert_eq!(result.meta.total_count, 2);
    assert_eq!(result.records[0]["symbol"], "ONE");
    assert_eq!(result.records[1]["symbol"], "TWO");
    // One source, one per_source entry, regardless of pages fetched.
    assert_eq!(result.per_source.len(), 1);
}

#[tokio::test]
async fn no_matching_records_is_reported_per_source() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/empty"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html><body></body></html>"))
        .mount(&server)
        .await;

    let urls = vec![format!("{}/empty", server.uri())];
    let result = executor()
        .execute_text(ROWS_PLAN, &urls, Duration::from_secs(10))
        .await;

    assert!(!result.ok);
    assert!(result.records.is_empty());
    assert_eq!(
        result.per_source[0].error.as_deref(),
        Some("no records matched record_selector")
    );
}
