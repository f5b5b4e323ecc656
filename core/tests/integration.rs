//! Request pipeline tests against the live mock server.
//!
//! # Design
//! Starts the mock server on a random port in its own thread and runtime,
//! then drives `Client` over real HTTP through `ReqwestTransport`. The DTOs
//! below are written independently of the mock-server crate so schema drift
//! shows up here.

mod common;

use std::collections::BTreeMap;
use std::time::Duration;

use courier_core::{ApiError, AuthScheme, Client, Config, ErrorModel, NoErrorModel, Request, TransportError};
use serde::Deserialize;
use serde_json::{json, Value};

use common::spawn_server;

fn client() -> Client {
    Client::from_config(&Config::default()).unwrap()
}

#[derive(Debug, Deserialize)]
struct Echoed {
    method: String,
    headers: BTreeMap<String, String>,
    body: Value,
}

#[derive(Debug, Deserialize, PartialEq)]
struct HasA {
    a: i64,
}

#[derive(Debug, Deserialize)]
struct Problem {
    error: String,
    detail: String,
}

impl ErrorModel for Problem {
    fn message(&self) -> Option<String> {
        Some(self.detail.clone())
    }
}

#[tokio::test]
async fn fetch_decodes_json_object() {
    let addr = spawn_server();
    let value: HasA = client()
        .fetch::<_, NoErrorModel>(Request::get(format!("http://{addr}/json")))
        .await
        .unwrap();
    assert_eq!(value, HasA { a: 1 });
}

#[tokio::test]
async fn post_sends_json_params_and_bearer_auth() {
    let addr = spawn_server();
    let request = Request::post(format!("http://{addr}/echo"))
        .json()
        .bearer("secret-token")
        .params(&json!({ "name": "widget", "count": 3 }));

    let echoed: Echoed = client().fetch(request).await.unwrap();
    assert_eq!(echoed.method, "POST");
    assert_eq!(echoed.headers["authorization"], "Bearer secret-token");
    assert_eq!(echoed.headers["content-type"], "application/json");
    assert_eq!(echoed.headers["accept"], "application/json");
    assert!(echoed.headers["user-agent"].starts_with("courier/"));
    assert_eq!(echoed.body, json!({ "name": "widget", "count": 3 }));
}

#[tokio::test]
async fn auth_scheme_without_credential_sends_no_header() {
    let addr = spawn_server();
    let request = Request::get(format!("http://{addr}/echo")).auth_scheme(AuthScheme::Basic);
    let echoed: Echoed = client().fetch(request).await.unwrap();
    assert!(!echoed.headers.contains_key("authorization"));
}

#[tokio::test]
async fn every_method_reaches_the_server() {
    let addr = spawn_server();
    let url = format!("http://{addr}/echo");
    let requests = [
        ("GET", Request::get(url.clone())),
        ("POST", Request::post(url.clone())),
        ("PUT", Request::put(url.clone())),
        ("PATCH", Request::patch(url.clone())),
        ("DELETE", Request::delete(url.clone())),
    ];
    let client = client();
    for (expected, request) in requests {
        let echoed: Echoed = client.fetch(request).await.unwrap();
        assert_eq!(echoed.method, expected);
        assert!(echoed.body.is_null(), "{expected}: unexpected body");
    }
}

#[tokio::test]
async fn empty_success_returns_empty_body() {
    let addr = spawn_server();
    let body = client()
        .send(Request::delete(format!("http://{addr}/empty")))
        .await
        .unwrap();
    assert!(body.is_empty());
}

#[tokio::test]
async fn not_found_without_model_is_unacceptable_status() {
    let addr = spawn_server();
    let err = client()
        .send(Request::get(format!("http://{addr}/status/404")))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::UnacceptableStatus(404)));
    assert_eq!(err.status(), Some(404));
}

#[tokio::test]
async fn not_found_with_model_decodes_problem() {
    let addr = spawn_server();
    let err = client()
        .send(Request::get(format!("http://{addr}/status/404")).error_model::<Problem>())
        .await
        .unwrap_err();
    match err {
        ApiError::ErrorModel { status, model, message } => {
            assert_eq!(status, 404);
            assert_eq!(model.error, "not_found");
            assert_eq!(message.as_deref(), Some("requested status 404"));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn error_body_not_matching_model_is_undecodable() {
    let addr = spawn_server();
    let err = client()
        .send(
            Request::get(format!("http://{addr}/text"))
                .acceptable(300..=399)
                .error_model::<Problem>(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::ErrorBodyUndecodable { status: 200 }));
}

#[tokio::test]
async fn fetch_json_on_text_body_is_decode_error() {
    let addr = spawn_server();
    let err = client()
        .fetch_json::<Value, NoErrorModel>(Request::get(format!("http://{addr}/text")))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::JsonDecode(_)));
}

#[tokio::test]
async fn request_timeout_is_reported() {
    let addr = spawn_server();
    let err = client()
        .send(Request::get(format!("http://{addr}/slow/2000")).timeout(Duration::from_millis(100)))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Transport(TransportError::Timeout)), "{err:?}");
}

#[tokio::test]
async fn refused_connection_is_connect_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = client()
        .send(Request::get(format!("http://{addr}/json")))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::Transport(TransportError::Connect(_))), "{err:?}");
}

#[tokio::test]
async fn malformed_url_never_leaves_the_client() {
    let err = client().send(Request::get("not a url")).await.unwrap_err();
    assert!(matches!(err, ApiError::UrlMalformed { .. }));
}
