//! Dispatcher against a stubbed cluster over real HTTP

use es_compat_client::ClientFactory;
use es_compat_core::config::{CacheConfig, ElasticsearchConfig};
use es_compat_core::prelude::*;
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer, version: ProtocolVersion) -> ElasticsearchConfig {
    ElasticsearchConfig {
        hosts: vec![server.uri()],
        protocol_version: version,
        ..Default::default()
    }
}

fn json_response(status: u16, body: serde_json::Value) -> ResponseTemplate {
    ResponseTemplate::new(status).set_body_raw(body.to_string(), "application/json; charset=UTF-8")
}

#[tokio::test]
async fn test_match_all_search_on_mid_generation() {
    let server = MockServer::start().await;
    let hits: Vec<_> = (0..10)
        .map(|i| json!({"_index": "books", "_type": "book", "_id": i.to_string(), "_score": 1.0, "_source": {"n": i}}))
        .collect();
    Mock::given(method("POST"))
        .and(path("/books/book/_search"))
        .and(query_param("typed_keys", "true"))
        .and(body_partial_json(json!({"from": 0, "size": 10, "query": {"match_all": {}}})))
        .respond_with(json_response(
            200,
            json!({
                "took": 3,
                "timed_out": false,
                "_shards": {"total": 5, "successful": 5, "failed": 0},
                "hits": {"total": 1234, "max_score": 1.0, "hits": hits}
            }),
        ))
        .expect(1)
        .mount(&server)
        .await;

    let factory = ClientFactory::new(&CacheConfig::default());
    let client = factory
        .dispatcher(&config_for(&server, ProtocolVersion::V5_6))
        .build()
        .unwrap();

    let request = SearchRequest::new(
        ["books"],
        json!({"from": 0, "size": 10, "query": {"match_all": {}}}),
    )
    .with_type("book");
    let result = client.search(request).await.unwrap();

    assert_eq!(result.hits.len(), 10);
    assert_eq!(result.total_hits(), 1234);
    assert_eq!(result.relation(), Relation::Exact);
    assert_eq!(result.max_score, Some(1.0));
    factory.shutdown();
}

#[tokio::test]
async fn test_newest_generation_reports_lower_bound() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/logs/_search"))
        .respond_with(json_response(
            200,
            json!({
                "took": 9,
                "timed_out": false,
                "hits": {"total": {"value": 10000, "relation": "gte"}, "hits": []}
            }),
        ))
        .mount(&server)
        .await;

    let factory = ClientFactory::new(&CacheConfig::default());
    let client = factory
        .dispatcher(&config_for(&server, ProtocolVersion::V7_9))
        .build()
        .unwrap();
    let total = client
        .count(SearchRequest::new(["logs"], json!({"query": {"match_all": {}}})))
        .await
        .unwrap();

    assert_eq!(total.value, 10000);
    assert_eq!(total.relation, Relation::LowerBound);
}

#[tokio::test]
async fn test_missing_document_is_data_and_server_errors_are_not_masked() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/books/book/missing"))
        .respond_with(json_response(
            404,
            json!({"_index": "books", "_type": "book", "_id": "missing", "found": false}),
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/books/book/broken"))
        .respond_with(json_response(
            500,
            json!({"error": {"type": "illegal_state_exception", "reason": "shard failure"}, "status": 500}),
        ))
        .mount(&server)
        .await;

    let factory = ClientFactory::new(&CacheConfig::default());
    let client = factory
        .dispatcher(&config_for(&server, ProtocolVersion::V6_8))
        .reuse_connection(false)
        .build()
        .unwrap();

    let missing = client
        .get(GetRequest::new("books", "missing").with_type("book"))
        .await
        .unwrap();
    assert!(!missing.found);

    let err = client
        .get(GetRequest::new("books", "broken").with_type("book"))
        .await
        .unwrap_err();
    assert_eq!(err.status(), Some(500));
    assert!(err.to_string().contains("shard failure"));
    client.close().unwrap();
}

#[tokio::test]
async fn test_oldest_generation_scroll_continuation_on_the_wire() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/_search/scroll"))
        .and(query_param("scroll", "60000ms"))
        .respond_with(json_response(
            200,
            json!({"_scroll_id": "c2", "took": 1, "hits": {"total": 3, "hits": []}}),
        ))
        .expect(1)
        .mount(&server)
        .await;

    let factory = ClientFactory::new(&CacheConfig::default());
    let client = factory
        .dispatcher(&config_for(&server, ProtocolVersion::V1_7))
        .build()
        .unwrap();
    let page = client
        .scroll("c1", std::time::Duration::from_secs(60))
        .await
        .unwrap();
    assert!(page.hits.is_empty());

    let received = server.received_requests().await.unwrap();
    assert_eq!(received[0].body, b"c1");
}
