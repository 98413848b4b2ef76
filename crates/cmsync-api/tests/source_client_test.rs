// Integration tests for `SourceClient` using wiremock.
#![allow(clippy::unwrap_used)]

use serde_json::json;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use cmsync_api::{RetryPolicy, SourceClient, SourceError};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, SourceClient) {
    let server = MockServer::start().await;
    let client = SourceClient::from_reqwest(
        &format!("{}/api/p/ws/proj", server.uri()),
        reqwest::Client::new(),
        RetryPolicy::immediate(),
    )
    .unwrap();
    (server, client)
}

fn items(range: std::ops::Range<usize>) -> Vec<serde_json::Value> {
    range.map(|i| json!({ "id": format!("item-{i}"), "name": format!("Item {i}") })).collect()
}

// ── Pagination ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_fetch_all_items_stops_at_total_count() {
    let (server, client) = setup().await;
    let client = client.with_page_size(2);

    for (page, range) in [("1", 0..2), ("2", 2..4)] {
        Mock::given(method("GET"))
            .and(path("/api/p/ws/proj/shelters"))
            .and(query_param("page", page))
            .and(query_param("perPage", "2"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "results": items(range), "totalCount": 4 })),
            )
            .expect(1)
            .mount(&server)
            .await;
    }

    let all = client.fetch_all_items("shelters").await.unwrap();
    assert_eq!(all.len(), 4);
    assert_eq!(all[3]["id"], "item-3");
}

#[tokio::test]
async fn test_fetch_all_items_stops_on_short_page() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/p/ws/proj/parks"))
        .and(query_param("page", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "results": items(0..3) })))
        .expect(1)
        .mount(&server)
        .await;

    let all = client.fetch_all_items("parks").await.unwrap();
    assert_eq!(all.len(), 3);
}

#[tokio::test]
async fn test_items_preserve_field_order() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/p/ws/proj/ordered"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(
            r#"{"results":[{"zeta":1,"alpha":2,"mid":3}],"totalCount":1}"#,
            "application/json",
        ))
        .mount(&server)
        .await;

    let all = client.fetch_all_items("ordered").await.unwrap();
    let keys: Vec<&str> = all[0].keys().map(String::as_str).collect();
    assert_eq!(keys, ["zeta", "alpha", "mid"]);
}

// ── CSV export ──────────────────────────────────────────────────────

#[tokio::test]
async fn test_fetch_csv_requests_text_csv() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/p/ws/proj/shelters.csv"))
        .and(header("accept", "text/csv"))
        .respond_with(ResponseTemplate::new(200).set_body_string("id,name\n1,A\n2,B\n"))
        .mount(&server)
        .await;

    let csv = client.fetch_csv("shelters").await.unwrap();
    assert!(csv.starts_with("id,name"));
}

#[tokio::test]
async fn test_fetch_csv_missing_export() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/p/ws/proj/nope.csv"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = client.fetch_csv("nope").await.unwrap_err();
    assert!(matches!(err, SourceError::CsvNotFound { .. }));
    assert!(err.is_not_found());
}

// ── Error classification ────────────────────────────────────────────

#[tokio::test]
async fn test_server_error_is_not_retried() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/p/ws/proj/broken.csv"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let err = client.fetch_csv("broken").await.unwrap_err();
    assert!(matches!(err, SourceError::Server { status: 500 }));
}

#[tokio::test]
async fn test_auth_failure_classified() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/p/ws/proj/private"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let err = client.fetch_model_items("private", 1, 100).await.unwrap_err();
    assert!(matches!(err, SourceError::Unauthorized));
}

#[tokio::test]
async fn test_connection_refused_is_retried_then_surfaces() {
    // Nothing listens on this port once the server is dropped.
    let uri = {
        let server = MockServer::start().await;
        server.uri()
    };
    let client =
        SourceClient::from_reqwest(&uri, reqwest::Client::new(), RetryPolicy::immediate()).unwrap();

    let err = client.fetch_csv("anything").await.unwrap_err();
    assert!(err.is_transient());
}

// ── Connectivity ────────────────────────────────────────────────────

#[tokio::test]
async fn test_connection_accepts_client_errors() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    assert!(client.test_connection().await);
}
