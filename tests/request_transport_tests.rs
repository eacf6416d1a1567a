//! # Request Transport Tests
//!
//! The reqwest-backed transport and request cache against a mock HTTP upstream.

use resilient_cache::core::config::RequestCacheConfig;
use resilient_cache::{CacheError, FetchError, HttpTransport, OutboundRequest, RequestCacheManager, ReqwestTransport};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[derive(Debug, Deserialize, PartialEq)]
struct Inventory {
    sku: String,
    available: u32,
}

fn transport() -> ReqwestTransport {
    ReqwestTransport::new(Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_get_decodes_json() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/inventory/A-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"sku": "A-1", "available": 4})))
        .expect(1)
        .mount(&server)
        .await;

    let value = transport()
        .send(&OutboundRequest::get(format!("{}/inventory/A-1", server.uri())))
        .await
        .unwrap();

    assert_eq!(value, json!({"sku": "A-1", "available": 4}));
}

#[tokio::test]
async fn test_post_sends_json_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/reserve"))
        .and(body_json(json!({"sku": "A-1", "quantity": 2})))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"reserved": true})))
        .expect(1)
        .mount(&server)
        .await;

    let request = OutboundRequest::post(format!("{}/reserve", server.uri()), json!({"sku": "A-1", "quantity": 2}));
    let value = transport().send(&request).await.unwrap();

    assert_eq!(value, json!({"reserved": true}));
}

#[tokio::test]
async fn test_error_status_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let url = format!("{}/inventory/A-1", server.uri());
    let err = transport().send(&OutboundRequest::get(url.clone())).await.unwrap_err();

    assert_eq!(err, FetchError::Status { url, status: 503 });
}

#[tokio::test]
async fn test_non_json_body_is_decode_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&server)
        .await;

    let err = transport()
        .send(&OutboundRequest::get(format!("{}/inventory", server.uri())))
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Decode { .. }));
}

#[tokio::test]
async fn test_unreachable_upstream_is_transport_error() {
    let err = transport()
        .send(&OutboundRequest::get("http://127.0.0.1:1/inventory"))
        .await
        .unwrap_err();

    assert!(matches!(err, FetchError::Transport { .. }));
}

#[tokio::test]
async fn test_request_cache_calls_upstream_once() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/inventory/A-1"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"sku": "A-1", "available": 4}))
                .set_delay(Duration::from_millis(100)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let cache = RequestCacheManager::with_reqwest(&RequestCacheConfig::default()).unwrap();
    let url = format!("{}/inventory/A-1", server.uri());

    let (a, b, c) = tokio::join!(
        cache.fetch_cached::<Inventory>(OutboundRequest::get(url.clone()), None),
        cache.fetch_cached::<Inventory>(OutboundRequest::get(url.clone()), None),
        cache.fetch_cached::<Value>(OutboundRequest::get(url.clone()), None),
    );

    let expected = Inventory {
        sku: "A-1".to_string(),
        available: 4,
    };
    assert_eq!(a.unwrap(), expected);
    assert_eq!(b.unwrap(), expected);
    assert_eq!(c.unwrap()["available"], json!(4));

    let again: Inventory = cache.fetch_cached(OutboundRequest::get(url), None).await.unwrap();
    assert_eq!(again, expected);
}

#[tokio::test]
async fn test_request_cache_surfaces_upstream_failure() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let cache = RequestCacheManager::with_reqwest(&RequestCacheConfig::default()).unwrap();
    let url = format!("{}/inventory", server.uri());

    for _ in 0..2 {
        let err = cache.fetch_cached::<Value>(OutboundRequest::get(url.clone()), None).await.unwrap_err();
        assert!(matches!(err, CacheError::Fetch(FetchError::Status { status: 500, .. })));
    }
}
