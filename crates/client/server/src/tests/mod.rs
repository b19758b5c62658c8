//! End-to-end tests of the ingress server over a full pipeline wired
//! to httpmock back-end nodes.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use httpmock::prelude::*;
use hyper::StatusCode;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use lg_jsonrpc::codes;
use lg_node_client::NodeClient;
use lg_pipeline::{cache::ResponseCache, Cacher, Dispatcher, Validator};
use lg_store::{AddressBook, NodeId};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::{GatewayServer, RateLimit, RateLimits, ServerConfig};

const MAILBOX_CAP: usize = 10;

/// Builds validator → cacher → dispatcher over the given nodes.
fn pipeline(servers: &[&MockServer]) -> lg_pipeline::Mailbox {
    let store = Arc::new(AddressBook::new(
        servers
            .iter()
            .enumerate()
            .map(|(i, server)| {
                (NodeId(format!("node-{i}")), format!("http://{}/", server.address()).parse().unwrap())
            })
            .collect(),
    ));
    let dispatcher = Dispatcher::new(store, NodeClient::new(Duration::from_secs(5))).spawn(MAILBOX_CAP);
    let cache = Arc::new(ResponseCache::new(Duration::from_secs(60)));
    let cacher = Cacher::new(dispatcher, cache).spawn(MAILBOX_CAP);
    Validator::new(cacher).spawn(MAILBOX_CAP)
}

/// Starts a gateway over `servers`, returning its address and the
/// shutdown token.
async fn gateway(servers: &[&MockServer], config: ServerConfig) -> (SocketAddr, CancellationToken) {
    let server = GatewayServer::new(config, pipeline(servers));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let token = CancellationToken::new();
    tokio::spawn(server.serve(listener, token.clone()));
    (addr, token)
}

fn config() -> ServerConfig {
    // The port is unused: tests bind their own listener.
    ServerConfig::new(0)
}

/// Mocks a node answering every `POST /` with the given result.
fn mock_node(server: &MockServer, result: Value) {
    server.mock(|when, then| {
        when.method(POST).path("/");
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({"jsonrpc": "2.0", "id": 1, "result": result}));
    });
}

async fn post(addr: SocketAddr, path_and_query: &str, body: String) -> (StatusCode, Value) {
    let client: Client<_, Full<Bytes>> = Client::builder(TokioExecutor::new()).build_http();
    let req = hyper::Request::post(format!("http://{addr}{path_and_query}"))
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(body)))
        .unwrap();
    let response = client.request(req).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let value = if body.is_empty() { Value::Null } else { serde_json::from_slice(&body).unwrap() };
    (status, value)
}

fn single(id: u64, method: &str, params: Value) -> String {
    json!({"jsonrpc": "2.0", "id": id, "method": method, "params": params}).to_string()
}

#[tokio::test]
async fn health_endpoint_answers_ok() {
    let node = MockServer::start_async().await;
    let (addr, _token) = gateway(&[&node], config()).await;

    let client: Client<_, Full<Bytes>> = Client::builder(TokioExecutor::new()).build_http();
    let req = hyper::Request::get(format!("http://{addr}/health")).body(Full::default()).unwrap();
    let response = client.request(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn a_single_query_round_trips_through_a_node() {
    let node = MockServer::start_async().await;
    mock_node(&node, json!({"block": {"height": 42}}));
    let (addr, _token) = gateway(&[&node], config()).await;

    let (status, body) = post(addr, "/", single(1, "ren_queryBlock", json!({}))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"jsonrpc": "2.0", "id": 1, "result": {"block": {"height": 42}}}));
}

#[tokio::test]
async fn an_invalid_version_is_rejected_with_http_400() {
    let node = MockServer::start_async().await;
    let (addr, _token) = gateway(&[&node], config()).await;

    let body = json!({"jsonrpc": "1.0", "id": 1, "method": "ren_queryBlock", "params": {}}).to_string();
    let (status, body) = post(addr, "/", body).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body,
        json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32600, "message": "invalid jsonrpc field: expected \"2.0\", got \"1.0\""}
        })
    );
}

#[tokio::test]
async fn an_unknown_method_is_rejected_with_http_404() {
    let node = MockServer::start_async().await;
    let (addr, _token) = gateway(&[&node], config()).await;

    let (status, body) = post(addr, "/", single(7, "method", json!({}))).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], json!(codes::METHOD_NOT_FOUND));
    assert!(body["error"]["message"].as_str().unwrap().contains("unsupported method method"));
}

#[tokio::test]
async fn malformed_submit_tx_params_are_rejected() {
    let node = MockServer::start_async().await;
    let (addr, _token) = gateway(&[&node], config()).await;

    let (status, body) = post(addr, "/", single(3, "ren_submitTx", json!({}))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!(codes::INVALID_PARAMS));
    assert_eq!(
        body["error"]["message"],
        json!("invalid parameters in request: parameters object does not match method")
    );
}

#[tokio::test]
async fn invalid_json_is_rejected_with_a_parse_error() {
    let node = MockServer::start_async().await;
    let (addr, _token) = gateway(&[&node], config()).await;

    for body in ["this is not json", "42", "\"string\""] {
        let (status, value) = post(addr, "/", body.to_string()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(value["error"]["code"], json!(codes::PARSE_ERROR));
    }
}

#[tokio::test]
async fn an_oversized_batch_is_rejected_whole() {
    let node = MockServer::start_async().await;
    mock_node(&node, json!("unreached"));
    let (addr, _token) = gateway(&[&node], config()).await;

    let batch: Vec<Value> = (0..11)
        .map(|i| json!({"jsonrpc": "2.0", "id": i, "method": "ren_queryBlock", "params": {"blockHeight": i}}))
        .collect();
    let (status, body) = post(addr, "/", serde_json::to_string(&batch).unwrap()).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], json!(codes::MAX_BATCH_SIZE_EXCEEDED));
    assert_eq!(body["error"]["message"], json!("maximum batch size exceeded: maximum is 10 but got 11"));
}

#[tokio::test]
async fn batch_responses_preserve_input_order() {
    let node = MockServer::start_async().await;
    // The first slot answers slowly, the second instantly; the
    // response array must still follow input order.
    node.mock(|when, then| {
        when.method(POST).path("/").json_body_partial(r#"{"params": {"blockHeight": 1}}"#);
        then.status(200)
            .header("content-type", "application/json")
            .delay(Duration::from_millis(150))
            .json_body(json!({"jsonrpc": "2.0", "id": 1, "result": "slow"}));
    });
    node.mock(|when, then| {
        when.method(POST).path("/").json_body_partial(r#"{"params": {"blockHeight": 2}}"#);
        then.status(200)
            .header("content-type", "application/json")
            .json_body(json!({"jsonrpc": "2.0", "id": 2, "result": "fast"}));
    });
    let (addr, _token) = gateway(&[&node], config()).await;

    let batch = json!([
        {"jsonrpc": "2.0", "id": 1, "method": "ren_queryBlock", "params": {"blockHeight": 1}},
        {"jsonrpc": "2.0", "id": 2, "method": "ren_queryBlock", "params": {"blockHeight": 2}},
    ]);
    let (status, body) = post(addr, "/", batch.to_string()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!([
            {"jsonrpc": "2.0", "id": 1, "result": "slow"},
            {"jsonrpc": "2.0", "id": 2, "result": "fast"},
        ])
    );
}

#[tokio::test]
async fn a_repeated_query_is_served_from_the_cache() {
    let node = MockServer::start_async().await;
    let mock = node
        .mock_async(|when, then| {
            when.method(POST).path("/");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({"jsonrpc": "2.0", "id": 5, "result": {"block": 9}}));
        })
        .await;
    let (addr, _token) = gateway(&[&node], config()).await;

    let request = single(5, "ren_queryBlock", json!({"blockHeight": 9}));
    let (_, first) = post(addr, "/", request.clone()).await;
    let (_, second) = post(addr, "/", request).await;

    assert_eq!(first, second);
    assert_eq!(mock.hits_async().await, 1);
}

#[tokio::test]
async fn rate_limited_requests_get_http_429() {
    let node = MockServer::start_async().await;
    mock_node(&node, json!("ok"));

    let mut config = config();
    config.rate_limits = RateLimits { default: RateLimit::new(1, 1), per_method: Default::default() };
    let (addr, _token) = gateway(&[&node], config).await;

    let request = single(1, "ren_queryBlock", json!({}));
    let (first_status, _) = post(addr, "/", request.clone()).await;
    let (second_status, body) = post(addr, "/", request).await;

    assert_eq!(first_status, StatusCode::OK);
    assert_eq!(second_status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"]["code"], json!(codes::RATE_LIMIT_EXCEEDED));
    assert_eq!(body["error"]["message"], json!("rate limit exceeded"));
}

#[tokio::test]
async fn unknown_methods_do_not_consume_rate_budget() {
    let node = MockServer::start_async().await;
    mock_node(&node, json!("ok"));

    let mut config = config();
    config.rate_limits = RateLimits { default: RateLimit::new(1, 1), per_method: Default::default() };
    let (addr, _token) = gateway(&[&node], config).await;

    let (status, _) = post(addr, "/", single(1, "nonsense", json!({}))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // The unknown method above must not have burned the budget.
    let (status, _) = post(addr, "/", single(2, "ren_queryBlock", json!({}))).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn a_stalled_node_times_the_request_out() {
    let node = MockServer::start_async().await;
    node.mock(|when, then| {
        when.method(POST).path("/");
        then.status(200)
            .header("content-type", "application/json")
            .delay(Duration::from_secs(2))
            .json_body(json!({"jsonrpc": "2.0", "id": 1, "result": "too late"}));
    });

    let mut config = config();
    config.timeout = Duration::from_millis(200);
    let (addr, _token) = gateway(&[&node], config).await;

    let started = Instant::now();
    let (status, body) = post(addr, "/", single(1, "ren_queryBlock", json!({}))).await;
    let elapsed = started.elapsed();

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], json!(codes::TIMEOUT));
    assert!(elapsed >= Duration::from_millis(200), "replied before the deadline: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(800), "replied far after the deadline: {elapsed:?}");
}

#[tokio::test]
async fn the_id_query_parameter_pins_the_target_node() {
    let wrong = MockServer::start_async().await;
    let right = MockServer::start_async().await;
    mock_node(&wrong, json!("wrong node"));
    let hit = right
        .mock_async(|when, then| {
            when.method(POST).path("/");
            then.status(200)
                .header("content-type", "application/json")
                .json_body(json!({"jsonrpc": "2.0", "id": 1, "result": "right node"}));
        })
        .await;
    let (addr, _token) = gateway(&[&wrong, &right], config()).await;

    let (status, body) = post(addr, "/?id=node-1", single(1, "ren_queryBlock", json!({}))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["result"], json!("right node"));
    assert_eq!(hit.hits_async().await, 1);
}

#[tokio::test]
async fn responses_carry_permissive_cors_headers() {
    let node = MockServer::start_async().await;
    mock_node(&node, json!("ok"));
    let (addr, _token) = gateway(&[&node], config()).await;

    let client: Client<_, Full<Bytes>> = Client::builder(TokioExecutor::new()).build_http();
    let req = hyper::Request::post(format!("http://{addr}/"))
        .header("content-type", "application/json")
        .header("origin", "https://example.com")
        .body(Full::new(Bytes::from(single(1, "ren_queryBlock", json!({})))))
        .unwrap();
    let response = client.request(req).await.unwrap();

    assert_eq!(response.headers().get("access-control-allow-origin").unwrap(), "*");
}

#[tokio::test]
async fn cancellation_stops_the_server() {
    let node = MockServer::start_async().await;
    mock_node(&node, json!("ok"));

    let server = GatewayServer::new(config(), pipeline(&[&node]));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let token = CancellationToken::new();
    let handle = tokio::spawn(server.serve(listener, token.clone()));

    // The server is live...
    let (status, _) = post(addr, "/", single(1, "ren_queryBlock", json!({}))).await;
    assert_eq!(status, StatusCode::OK);

    // ...until cancelled.
    token.cancel();
    tokio::time::timeout(Duration::from_secs(5), handle).await.unwrap().unwrap().unwrap();
    assert!(tokio::net::TcpStream::connect(addr).await.is_err());
}
