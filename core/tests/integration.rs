//! Client behaviour against the live mock marketplace API.
//!
//! # Design
//! Starts the mock server on a random port, then drives the reqwest-backed
//! transport over real HTTP. Validates envelope decoding, error mapping,
//! timeouts, cancellation and identity forwarding end-to-end.

use std::sync::Arc;
use std::time::Duration;

use http::HeaderMap;
use serde_json::{json, Value};
use storefront_transport::{
    context_client, ApiError, ClientSettings, ContextOverrides, FetchError, HttpClient,
    ReqwestFetch, RequestOptions, ResponseData, TransportConfig,
};
use tokio_util::sync::CancellationToken;

#[derive(Debug, serde::Deserialize)]
struct Listing {
    mint: String,
    price: f64,
}

async fn start_server() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { mock_server::run(listener).await });
    format!("http://{addr}")
}

fn client(base_url: &str) -> HttpClient {
    HttpClient::new(
        Arc::new(ReqwestFetch::default()),
        RequestOptions::default().base_url(base_url),
        ClientSettings::default(),
    )
}

#[tokio::test]
async fn get_decodes_json_payload() {
    let base = start_server().await;
    let client = client(&base).create(RequestOptions::default().retry(true));

    let envelope = client.get("/ping").await.unwrap();

    assert!(envelope.ok);
    assert_eq!(envelope.status, 200);
    assert_eq!(envelope.status_text, "OK");
    assert_eq!(envelope.data.to_value(), json!({"pong": true}));
    assert!(!envelope.redirected);
}

#[tokio::test]
async fn params_reach_the_upstream() {
    let base = start_server().await;

    let options = RequestOptions::new("/listings").param("collection", "degen-apes");
    let envelope = client(&base).request(options).await.unwrap();
    let listings: Vec<Listing> = envelope.json().unwrap();

    assert_eq!(listings.len(), 2);
    assert!(listings.iter().all(|l| l.mint.starts_with("mint-ape")));
}

#[tokio::test]
async fn typed_listing_lookup() {
    let base = start_server().await;

    let listing: Listing = client(&base)
        .get("/listings/mint-frog-7")
        .await
        .unwrap()
        .json()
        .unwrap();

    assert_eq!(listing.price, 3.25);
}

#[tokio::test]
async fn not_found_becomes_transport_error() {
    let base = start_server().await;

    let err = client(&base).get("/listings/nope").await.unwrap_err();
    let transport = err.as_transport().expect("transport error");

    assert_eq!(transport.status, 404);
    assert_eq!(transport.name, format!("RequestError: GET 404 {base}/listings/nope"));
    assert_eq!(transport.body, json!({"message": "listing not found"}));
}

#[tokio::test]
async fn post_creates_offer() {
    let base = start_server().await;

    let envelope = client(&base)
        .post("/listings/mint-ape-1/offers", json!({"price": 40.0}))
        .await
        .unwrap();

    assert_eq!(envelope.status, 201);
    assert_eq!(envelope.data.to_value()["mint"], "mint-ape-1");
}

#[tokio::test]
async fn validation_errors_keep_their_body() {
    let base = start_server().await;

    let err = client(&base)
        .post("/listings/mint-ape-1/offers", json!({}))
        .await
        .unwrap_err();
    let transport = err.as_transport().expect("transport error");

    assert_eq!(transport.status, 400);
    assert_eq!(transport.meta.data["errors"][0]["price"], "price is required");
}

#[tokio::test]
async fn slow_upstream_times_out_to_408() {
    let base = start_server().await;
    let client = client(&base).create(
        RequestOptions::default()
            .retry(true)
            .retries(1)
            .timeout(Duration::from_millis(50)),
    );

    let err = client
        .request(RequestOptions::new("/slow").param("ms", "5000"))
        .await
        .unwrap_err();

    assert_eq!(err.status_code(), Some(408));
}

#[tokio::test]
async fn caller_cancellation_aborts_request() {
    let base = start_server().await;
    let signal = CancellationToken::new();
    let canceller = signal.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        canceller.cancel();
    });

    let options = RequestOptions::new("/slow")
        .param("ms", "5000")
        .retry(true)
        .retries(3)
        .signal(signal);
    let err = client(&base).request(options).await.unwrap_err();

    assert!(matches!(err, ApiError::Fetch(FetchError::Aborted)));
}

#[tokio::test]
async fn refused_connection_is_a_network_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client(&format!("http://{addr}"))
        .get("/ping")
        .await
        .unwrap_err();

    assert!(matches!(err, ApiError::Fetch(FetchError::Network(_))));
    assert_eq!(err.status_code(), None);
}

#[tokio::test]
async fn context_client_forwards_identity() {
    let base = start_server().await;
    let config = TransportConfig {
        api_url: base.clone(),
        forwarded_host: Some("www.example.com".to_string()),
        ..TransportConfig::default()
    };
    let mut inbound = HeaderMap::new();
    inbound.insert("authorization", "Bearer abc".parse().unwrap());
    inbound.insert("cookie", "sid=123".parse().unwrap());
    inbound.insert("x-forwarded-proto", "http".parse().unwrap());

    let api = context_client(
        &client(&base),
        Some(&inbound),
        &ContextOverrides::default(),
        &config,
    )
    .unwrap();
    let envelope = api.get("/whoami").await.unwrap();

    let ResponseData::Json(echo) = envelope.data else {
        panic!("expected JSON echo");
    };
    assert_eq!(echo["authorization"], "Bearer abc");
    assert_eq!(echo["cookie"], "sid=123");
    assert_eq!(echo["x-forwarded-host"], "www.example.com");
    assert_eq!(echo["x-forwarded-proto"], "https");
    assert_ne!(echo["host"], Value::Null);
}
