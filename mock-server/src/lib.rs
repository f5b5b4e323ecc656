use std::collections::BTreeMap;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path,
    },
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{any, get},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{debug, info};

/// Longest delay `/slow/{ms}` will honour.
pub const MAX_DELAY_MS: u64 = 10_000;

/// What `/echo` reports back about the request it received.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Echo {
    pub method: String,
    pub headers: BTreeMap<String, String>,
    /// JSON body, the body as text if it is not JSON, or null when empty.
    pub body: Value,
}

/// Error body returned by `/status/{code}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Problem {
    pub error: String,
    pub detail: String,
}

pub fn app() -> Router {
    Router::new()
        .route("/echo", any(echo))
        .route("/status/{code}", any(status))
        .route("/empty", any(empty))
        .route("/json", get(json_object))
        .route("/text", get(text))
        .route("/slow/{ms}", get(slow))
        .route("/ws/echo", get(ws_echo))
        .route("/ws/pings", get(ws_pings))
        .route("/ws/close", get(ws_close))
}

pub async fn run(listener: TcpListener) -> Result<(), std::io::Error> {
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "mock server listening");
    }
    axum::serve(listener, app()).await
}

async fn echo(method: Method, headers: HeaderMap, body: Bytes) -> Json<Echo> {
    let headers = headers
        .iter()
        .filter_map(|(name, value)| Some((name.as_str().to_string(), value.to_str().ok()?.to_string())))
        .collect();
    let body = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()))
    };
    debug!(%method, "echo");
    Json(Echo {
        method: method.to_string(),
        headers,
        body,
    })
}

async fn status(Path(code): Path<u16>) -> Response {
    let Ok(status) = StatusCode::from_u16(code) else {
        return (StatusCode::BAD_REQUEST, "invalid status code").into_response();
    };
    if status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED {
        return status.into_response();
    }
    let problem = Problem {
        error: status
            .canonical_reason()
            .unwrap_or("unknown")
            .to_lowercase()
            .replace(' ', "_"),
        detail: format!("requested status {code}"),
    };
    (status, Json(problem)).into_response()
}

async fn empty() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn json_object() -> Json<Value> {
    Json(json!({ "a": 1 }))
}

async fn text() -> &'static str {
    "plain text"
}

async fn slow(Path(ms): Path<u64>) -> Json<Value> {
    let ms = ms.min(MAX_DELAY_MS);
    tokio::time::sleep(Duration::from_millis(ms)).await;
    Json(json!({ "slept_ms": ms }))
}

async fn ws_echo(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(run_echo)
}

async fn ws_pings(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(run_ping_reporter)
}

async fn ws_close(ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(|mut socket| async move {
        let _ = socket.send(Message::Close(None)).await;
    })
}

/// Send every text or binary message straight back.
async fn run_echo(mut socket: WebSocket) {
    while let Some(Ok(msg)) = socket.recv().await {
        let reply = match msg {
            Message::Text(_) | Message::Binary(_) => msg,
            Message::Close(_) => break,
            _ => continue,
        };
        if socket.send(reply).await.is_err() {
            break;
        }
    }
    debug!("ws echo closed");
}

/// Answer every ping frame with a `"ping"` text message.
async fn run_ping_reporter(mut socket: WebSocket) {
    while let Some(Ok(msg)) = socket.recv().await {
        match msg {
            Message::Ping(_) => {
                if socket.send(Message::Text("ping".into())).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }
    debug!("ws ping reporter closed");
}
